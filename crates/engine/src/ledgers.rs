//! Bookings, receivables, payables and the agent ledger behind the
//! organization guard.

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use tripdesk_core::{Money, TripdeskError, TripdeskResult};
use tripdesk_finance::agents::AgentBalances;
use tripdesk_finance::bookings::{BookingMargin, BookingSummary, CostLine};
use tripdesk_finance::payables::Payables;
use tripdesk_finance::receivables::ReceivablesSummary;
use tripdesk_finance::{
    Agent, AgentStatus, AgentTransaction, BillTo, BillToKind, Booking, BookingStatus, CustomerInvoice, InvoiceItem,
    InvoiceStatus, NewAgent, NewBooking, NewInvoice, NewInvoicePayment, NewPayment, NewSupplier, NewSupplierInvoice,
    NewSupplierPayment, PayablesFilter, Payment, QuoteStatus, Supplier, SupplierInvoice, TransactionKind,
};
use tripdesk_platform::{Actor, Permission};

use crate::Tripdesk;

/// Payment schedule chosen when a quote is booked.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BookingTerms {
    /// Zero when absent.
    pub deposit_amount: Option<Money>,
    pub deposit_due: Option<NaiveDate>,
    pub balance_due_date: Option<NaiveDate>,
}

impl Tripdesk {
    // ------------------------------------------------------------------
    // Bookings
    // ------------------------------------------------------------------

    /// Book a sent, viewed or accepted quote. An unaccepted quote is
    /// accepted first; the quote's agent accrues commission on the total.
    pub fn create_booking_from_quote(&self, actor: &Actor, quote_id: Uuid, terms: BookingTerms) -> TripdeskResult<Booking> {
        let quote = self.quotes.get(quote_id)?;
        let organization_id = quote.organization_id;
        self.guard_write(actor, organization_id, Permission::BookingWrite)?;

        if !matches!(quote.status, QuoteStatus::Sent | QuoteStatus::Viewed | QuoteStatus::Accepted) {
            return Err(TripdeskError::transition("quote", quote.status, "booked"));
        }
        if self.bookings.get_by_quote(quote_id).is_some() {
            return Err(TripdeskError::Conflict(format!(
                "quote {} already has a booking",
                quote.quote_number
            )));
        }
        if quote.pricing.is_none() || !quote.total.is_positive() {
            return Err(TripdeskError::validation(format!(
                "quote {} has no price",
                quote.quote_number
            )));
        }
        let deposit_amount = terms.deposit_amount.unwrap_or(Money::zero(quote.currency));
        if deposit_amount.currency != quote.currency {
            return Err(TripdeskError::CurrencyMismatch {
                expected: quote.currency,
                found: deposit_amount.currency,
            });
        }
        if deposit_amount.is_negative() || deposit_amount.minor > quote.total.minor {
            return Err(TripdeskError::validation("deposit must be between zero and the quote total"));
        }
        if let Some(agent_id) = quote.agent_id {
            self.agents.commission_due(agent_id, quote.total)?;
        }

        let today = Self::today();
        if quote.status != QuoteStatus::Accepted {
            self.quotes.accept(quote_id, today)?;
        }
        let booking = self.bookings.create(
            organization_id,
            NewBooking {
                quote_id,
                customer: quote.customer.clone(),
                agent_id: quote.agent_id,
                total: quote.total,
                deposit_amount,
                deposit_due: terms.deposit_due,
                balance_due_date: terms.balance_due_date,
                start_date: quote.start_date,
                end_date: quote.end_date,
            },
            today,
        )?;
        let commission = match booking.agent_id {
            Some(agent_id) => self.agents.accrue_commission(agent_id, booking.id, booking.total, today)?,
            None => None,
        };

        self.record(
            Some(actor),
            organization_id,
            "booking_create",
            "booking",
            booking.id,
            json!({
                "booking_number": booking.booking_number,
                "quote_number": quote.quote_number,
                "total": booking.total,
                "commission": commission.as_ref().map(|tx| tx.amount),
            }),
        );
        info!(org_id = %organization_id, booking = %booking.booking_number, quote = %quote.quote_number, "Quote booked");
        Ok(booking)
    }

    fn booking_for(&self, actor: &Actor, booking_id: Uuid, permission: Permission, write: bool) -> TripdeskResult<Booking> {
        let booking = self.bookings.get(booking_id)?;
        if write {
            self.guard_write(actor, booking.organization_id, permission)?;
        } else {
            self.guard_read(actor, booking.organization_id, permission)?;
        }
        Ok(booking)
    }

    pub fn get_booking(&self, actor: &Actor, booking_id: Uuid) -> TripdeskResult<Booking> {
        self.booking_for(actor, booking_id, Permission::BookingRead, false)
    }

    pub fn list_bookings(&self, actor: &Actor, organization_id: Uuid, status: Option<BookingStatus>) -> TripdeskResult<Vec<Booking>> {
        self.guard_read(actor, organization_id, Permission::BookingRead)?;
        Ok(self.bookings.list(organization_id, status))
    }

    pub fn booking_payments(&self, actor: &Actor, booking_id: Uuid) -> TripdeskResult<Vec<Payment>> {
        self.booking_for(actor, booking_id, Permission::BookingRead, false)?;
        Ok(self.bookings.payments(booking_id))
    }

    /// Record a customer payment. `recorded_by` is taken from the actor.
    pub fn record_booking_payment(&self, actor: &Actor, booking_id: Uuid, payment: NewPayment) -> TripdeskResult<(Booking, Payment)> {
        self.booking_for(actor, booking_id, Permission::BookingWrite, true)?;
        let (booking, payment) = self.bookings.record_payment(
            booking_id,
            NewPayment {
                recorded_by: actor.user_id,
                ..payment
            },
        )?;
        self.record(
            Some(actor),
            booking.organization_id,
            "booking_payment",
            "payment",
            payment.id,
            json!({
                "booking_number": booking.booking_number,
                "kind": payment.kind,
                "amount": payment.amount,
                "status": booking.status,
            }),
        );
        Ok((booking, payment))
    }

    pub fn void_booking_payment(&self, actor: &Actor, payment_id: Uuid) -> TripdeskResult<(Booking, Payment)> {
        let payment = self.bookings.get_payment(payment_id)?;
        self.booking_for(actor, payment.booking_id, Permission::FinanceWrite, true)?;
        let (booking, payment) = self.bookings.void_payment(payment_id, Self::today())?;
        self.record(
            Some(actor),
            booking.organization_id,
            "booking_payment_void",
            "payment",
            payment_id,
            json!({ "amount": payment.amount, "status": booking.status }),
        );
        Ok((booking, payment))
    }

    fn booking_transition(
        &self,
        actor: &Actor,
        booking_id: Uuid,
        action: &str,
        details: serde_json::Value,
        apply: impl FnOnce() -> TripdeskResult<Booking>,
    ) -> TripdeskResult<Booking> {
        let before = self.booking_for(actor, booking_id, Permission::BookingWrite, true)?;
        let booking = apply()?;
        let mut details = details;
        details["from"] = json!(before.status);
        details["to"] = json!(booking.status);
        self.record(Some(actor), booking.organization_id, action, "booking", booking_id, details);
        Ok(booking)
    }

    pub fn start_booking(&self, actor: &Actor, booking_id: Uuid) -> TripdeskResult<Booking> {
        self.booking_transition(actor, booking_id, "booking_start", json!({}), || self.bookings.start(booking_id))
    }

    pub fn complete_booking(&self, actor: &Actor, booking_id: Uuid) -> TripdeskResult<Booking> {
        self.booking_transition(actor, booking_id, "booking_complete", json!({}), || {
            self.bookings.complete(booking_id)
        })
    }

    pub fn cancel_booking(&self, actor: &Actor, booking_id: Uuid, reason: &str) -> TripdeskResult<Booking> {
        self.booking_transition(actor, booking_id, "booking_cancel", json!({ "reason": reason }), || {
            self.bookings.cancel(booking_id, reason)
        })
    }

    /// Attach a supplier cost to a booking. The supplier, when given, must
    /// belong to the same organization.
    pub fn add_booking_cost(
        &self,
        actor: &Actor,
        booking_id: Uuid,
        supplier_id: Option<Uuid>,
        description: &str,
        service_date: Option<NaiveDate>,
        amount: Money,
    ) -> TripdeskResult<CostLine> {
        let booking = self.booking_for(actor, booking_id, Permission::FinanceWrite, true)?;
        if let Some(supplier_id) = supplier_id {
            let supplier = self.payables.get_supplier(supplier_id)?;
            if supplier.organization_id != booking.organization_id {
                return Err(TripdeskError::not_found("supplier", supplier_id));
            }
        }
        let line = self
            .bookings
            .add_cost_line(booking_id, supplier_id, description, service_date, amount)?;
        self.record(
            Some(actor),
            booking.organization_id,
            "booking_cost_add",
            "booking",
            booking_id,
            json!({ "line_id": line.id, "description": line.description, "amount": line.amount }),
        );
        Ok(line)
    }

    pub fn remove_booking_cost(&self, actor: &Actor, booking_id: Uuid, line_id: Uuid) -> TripdeskResult<CostLine> {
        let booking = self.booking_for(actor, booking_id, Permission::FinanceWrite, true)?;
        let line = self.bookings.remove_cost_line(booking_id, line_id)?;
        self.record(
            Some(actor),
            booking.organization_id,
            "booking_cost_remove",
            "booking",
            booking_id,
            json!({ "line_id": line.id, "amount": line.amount }),
        );
        Ok(line)
    }

    pub fn booking_costs(&self, actor: &Actor, booking_id: Uuid) -> TripdeskResult<Vec<CostLine>> {
        self.booking_for(actor, booking_id, Permission::FinanceRead, false)?;
        Ok(self.bookings.cost_lines(booking_id))
    }

    pub fn booking_margin(&self, actor: &Actor, booking_id: Uuid) -> TripdeskResult<BookingMargin> {
        self.booking_for(actor, booking_id, Permission::FinanceRead, false)?;
        self.bookings.margin(booking_id)
    }

    /// Booking counts and revenue in the organization's own currency.
    pub fn booking_summary(&self, actor: &Actor, organization_id: Uuid) -> TripdeskResult<BookingSummary> {
        self.guard_read(actor, organization_id, Permission::FinanceRead)?;
        let currency = self.orgs.get(organization_id)?.default_currency;
        self.bookings.summary(organization_id, currency)
    }

    // ------------------------------------------------------------------
    // Receivables
    // ------------------------------------------------------------------

    pub fn create_invoice(&self, actor: &Actor, organization_id: Uuid, new: NewInvoice) -> TripdeskResult<CustomerInvoice> {
        self.guard_write(actor, organization_id, Permission::FinanceWrite)?;
        if let Some(booking_id) = new.booking_id {
            if self.bookings.get(booking_id)?.organization_id != organization_id {
                return Err(TripdeskError::not_found("booking", booking_id));
            }
        }
        let invoice = self.receivables.create(organization_id, new)?;
        self.record(
            Some(actor),
            organization_id,
            "invoice_create",
            "customer_invoice",
            invoice.id,
            json!({ "invoice_number": invoice.invoice_number, "total": invoice.total, "bill_to": invoice.bill_to.name }),
        );
        Ok(invoice)
    }

    /// Draft an invoice for the booking's full value, billed to its customer.
    pub fn invoice_booking(
        &self,
        actor: &Actor,
        booking_id: Uuid,
        tax_rate_bps: i64,
        due_in_days: i64,
    ) -> TripdeskResult<CustomerInvoice> {
        let booking = self.booking_for(actor, booking_id, Permission::FinanceWrite, true)?;
        let today = Self::today();
        self.create_invoice(
            actor,
            booking.organization_id,
            NewInvoice {
                booking_id: Some(booking.id),
                bill_to: BillTo {
                    kind: BillToKind::Customer,
                    id: None,
                    name: booking.customer.name.clone(),
                    email: Some(booking.customer.email.clone()),
                    address: None,
                },
                currency: booking.total.currency,
                items: vec![InvoiceItem {
                    description: format!(
                        "Tour package {} ({} to {})",
                        booking.booking_number, booking.start_date, booking.end_date
                    ),
                    quantity: 1,
                    unit_price: booking.total,
                }],
                tax_rate_bps,
                discount: Money::zero(booking.total.currency),
                issued_on: today,
                due_on: today + Duration::days(due_in_days.max(0)),
                notes: None,
                terms: None,
            },
        )
    }

    fn invoice_for(&self, actor: &Actor, invoice_id: Uuid, permission: Permission, write: bool) -> TripdeskResult<CustomerInvoice> {
        let invoice = self.receivables.get(invoice_id)?;
        if write {
            self.guard_write(actor, invoice.organization_id, permission)?;
        } else {
            self.guard_read(actor, invoice.organization_id, permission)?;
        }
        Ok(invoice)
    }

    pub fn get_invoice(&self, actor: &Actor, invoice_id: Uuid) -> TripdeskResult<CustomerInvoice> {
        self.invoice_for(actor, invoice_id, Permission::FinanceRead, false)
    }

    pub fn list_invoices(
        &self,
        actor: &Actor,
        organization_id: Uuid,
        status: Option<InvoiceStatus>,
    ) -> TripdeskResult<Vec<CustomerInvoice>> {
        self.guard_read(actor, organization_id, Permission::FinanceRead)?;
        Ok(self.receivables.list(organization_id, status))
    }

    pub fn update_invoice_items(
        &self,
        actor: &Actor,
        invoice_id: Uuid,
        items: Vec<InvoiceItem>,
        tax_rate_bps: i64,
        discount: Money,
    ) -> TripdeskResult<CustomerInvoice> {
        self.invoice_for(actor, invoice_id, Permission::FinanceWrite, true)?;
        let invoice = self.receivables.update_items(invoice_id, items, tax_rate_bps, discount)?;
        self.record(
            Some(actor),
            invoice.organization_id,
            "invoice_update",
            "customer_invoice",
            invoice_id,
            json!({ "total": invoice.total }),
        );
        Ok(invoice)
    }

    pub fn send_invoice(&self, actor: &Actor, invoice_id: Uuid) -> TripdeskResult<CustomerInvoice> {
        self.invoice_for(actor, invoice_id, Permission::FinanceWrite, true)?;
        let invoice = self.receivables.send(invoice_id)?;
        self.record(
            Some(actor),
            invoice.organization_id,
            "invoice_send",
            "customer_invoice",
            invoice_id,
            json!({ "invoice_number": invoice.invoice_number }),
        );
        Ok(invoice)
    }

    pub fn record_invoice_payment(
        &self,
        actor: &Actor,
        invoice_id: Uuid,
        payment: NewInvoicePayment,
    ) -> TripdeskResult<CustomerInvoice> {
        self.invoice_for(actor, invoice_id, Permission::FinanceWrite, true)?;
        let (invoice, payment) = self.receivables.record_payment(
            invoice_id,
            NewInvoicePayment {
                recorded_by: actor.user_id,
                ..payment
            },
        )?;
        self.record(
            Some(actor),
            invoice.organization_id,
            "invoice_payment",
            "customer_invoice",
            invoice_id,
            json!({ "payment_id": payment.id, "amount": payment.amount, "status": invoice.status }),
        );
        Ok(invoice)
    }

    pub fn cancel_invoice(&self, actor: &Actor, invoice_id: Uuid) -> TripdeskResult<CustomerInvoice> {
        self.invoice_for(actor, invoice_id, Permission::FinanceWrite, true)?;
        let invoice = self.receivables.cancel(invoice_id)?;
        self.record(
            Some(actor),
            invoice.organization_id,
            "invoice_cancel",
            "customer_invoice",
            invoice_id,
            json!({ "invoice_number": invoice.invoice_number }),
        );
        Ok(invoice)
    }

    pub fn receivables_summary(&self, actor: &Actor, organization_id: Uuid) -> TripdeskResult<ReceivablesSummary> {
        self.guard_read(actor, organization_id, Permission::FinanceRead)?;
        let currency = self.orgs.get(organization_id)?.default_currency;
        self.receivables.summary(organization_id, currency)
    }

    // ------------------------------------------------------------------
    // Payables
    // ------------------------------------------------------------------

    pub fn add_supplier(&self, actor: &Actor, organization_id: Uuid, new: NewSupplier) -> TripdeskResult<Supplier> {
        self.guard_write(actor, organization_id, Permission::FinanceWrite)?;
        let supplier = self.payables.add_supplier(organization_id, new)?;
        self.record(
            Some(actor),
            organization_id,
            "supplier_create",
            "supplier",
            supplier.id,
            json!({ "name": supplier.name, "kind": supplier.kind }),
        );
        Ok(supplier)
    }

    pub fn list_suppliers(&self, actor: &Actor, organization_id: Uuid) -> TripdeskResult<Vec<Supplier>> {
        self.guard_read(actor, organization_id, Permission::FinanceRead)?;
        Ok(self.payables.list_suppliers(organization_id))
    }

    fn supplier_for(&self, actor: &Actor, supplier_id: Uuid) -> TripdeskResult<Supplier> {
        let supplier = self.payables.get_supplier(supplier_id)?;
        self.guard_write(actor, supplier.organization_id, Permission::FinanceWrite)?;
        Ok(supplier)
    }

    pub fn deactivate_supplier(&self, actor: &Actor, supplier_id: Uuid) -> TripdeskResult<Supplier> {
        self.supplier_for(actor, supplier_id)?;
        let supplier = self.payables.deactivate_supplier(supplier_id)?;
        self.record(Some(actor), supplier.organization_id, "supplier_deactivate", "supplier", supplier_id, json!({}));
        Ok(supplier)
    }

    pub fn record_supplier_invoice(&self, actor: &Actor, new: NewSupplierInvoice) -> TripdeskResult<SupplierInvoice> {
        let supplier = self.supplier_for(actor, new.supplier_id)?;
        if let Some(booking_id) = new.reference {
            if self.bookings.get(booking_id)?.organization_id != supplier.organization_id {
                return Err(TripdeskError::not_found("booking", booking_id));
            }
        }
        let invoice = self.payables.record_invoice(new)?;
        self.record(
            Some(actor),
            invoice.organization_id,
            "supplier_invoice_create",
            "supplier_invoice",
            invoice.id,
            json!({ "supplier": supplier.name, "number": invoice.invoice_number, "total": invoice.total }),
        );
        Ok(invoice)
    }

    fn supplier_invoice_for(&self, actor: &Actor, invoice_id: Uuid) -> TripdeskResult<SupplierInvoice> {
        let invoice = self.payables.get_invoice(invoice_id)?;
        self.guard_write(actor, invoice.organization_id, Permission::FinanceWrite)?;
        Ok(invoice)
    }

    pub fn record_supplier_payment(
        &self,
        actor: &Actor,
        invoice_id: Uuid,
        payment: NewSupplierPayment,
    ) -> TripdeskResult<SupplierInvoice> {
        self.supplier_invoice_for(actor, invoice_id)?;
        let (invoice, payment) = self.payables.record_payment(
            invoice_id,
            NewSupplierPayment {
                recorded_by: actor.user_id,
                ..payment
            },
        )?;
        self.record(
            Some(actor),
            invoice.organization_id,
            "supplier_payment",
            "supplier_invoice",
            invoice_id,
            json!({ "payment_id": payment.id, "amount": payment.amount, "status": invoice.status }),
        );
        Ok(invoice)
    }

    pub fn cancel_supplier_invoice(&self, actor: &Actor, invoice_id: Uuid) -> TripdeskResult<SupplierInvoice> {
        self.supplier_invoice_for(actor, invoice_id)?;
        let invoice = self.payables.cancel_invoice(invoice_id)?;
        self.record(
            Some(actor),
            invoice.organization_id,
            "supplier_invoice_cancel",
            "supplier_invoice",
            invoice_id,
            json!({ "number": invoice.invoice_number }),
        );
        Ok(invoice)
    }

    pub fn payables(
        &self,
        actor: &Actor,
        organization_id: Uuid,
        filter: &PayablesFilter,
        as_of: NaiveDate,
    ) -> TripdeskResult<Payables> {
        self.guard_read(actor, organization_id, Permission::FinanceRead)?;
        self.payables.payables(organization_id, filter, as_of)
    }

    // ------------------------------------------------------------------
    // Agents
    // ------------------------------------------------------------------

    pub fn add_agent(&self, actor: &Actor, organization_id: Uuid, new: NewAgent) -> TripdeskResult<Agent> {
        self.guard_write(actor, organization_id, Permission::FinanceWrite)?;
        let agent = self.agents.add_agent(organization_id, new)?;
        self.record(
            Some(actor),
            organization_id,
            "agent_create",
            "agent",
            agent.id,
            json!({ "company": agent.company_name, "commission": agent.commission }),
        );
        Ok(agent)
    }

    pub fn list_agents(&self, actor: &Actor, organization_id: Uuid) -> TripdeskResult<Vec<Agent>> {
        self.guard_read(actor, organization_id, Permission::FinanceRead)?;
        Ok(self.agents.list(organization_id))
    }

    fn agent_for(&self, actor: &Actor, agent_id: Uuid, permission: Permission, write: bool) -> TripdeskResult<Agent> {
        let agent = self.agents.get(agent_id)?;
        if write {
            self.guard_write(actor, agent.organization_id, permission)?;
        } else {
            self.guard_read(actor, agent.organization_id, permission)?;
        }
        Ok(agent)
    }

    pub fn set_agent_status(&self, actor: &Actor, agent_id: Uuid, status: AgentStatus) -> TripdeskResult<Agent> {
        self.agent_for(actor, agent_id, Permission::FinanceWrite, true)?;
        let agent = self.agents.set_status(agent_id, status)?;
        self.record(
            Some(actor),
            agent.organization_id,
            "agent_status",
            "agent",
            agent_id,
            json!({ "status": status }),
        );
        Ok(agent)
    }

    /// Post a payment, refund or adjustment to an agent's ledger.
    pub fn record_agent_transaction(
        &self,
        actor: &Actor,
        agent_id: Uuid,
        kind: TransactionKind,
        amount: Money,
        reference: Option<String>,
        description: &str,
    ) -> TripdeskResult<AgentTransaction> {
        let agent = self.agent_for(actor, agent_id, Permission::FinanceWrite, true)?;
        let tx = self
            .agents
            .record(agent_id, kind, amount, reference, description, Self::today())?;
        self.record(
            Some(actor),
            agent.organization_id,
            "agent_transaction",
            "agent",
            agent_id,
            json!({ "kind": kind, "amount": tx.amount, "balance": tx.running_balance }),
        );
        Ok(tx)
    }

    pub fn agent_statement(&self, actor: &Actor, agent_id: Uuid) -> TripdeskResult<Vec<AgentTransaction>> {
        self.agent_for(actor, agent_id, Permission::FinanceRead, false)?;
        Ok(self.agents.statement(agent_id))
    }

    pub fn agent_balances(&self, actor: &Actor, organization_id: Uuid) -> TripdeskResult<AgentBalances> {
        self.guard_read(actor, organization_id, Permission::FinanceRead)?;
        let currency = self.orgs.get(organization_id)?.default_currency;
        self.agents.balances(organization_id, currency)
    }
}
