//! Customer invoices issued by an operator to a traveller or an agent.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use tripdesk_core::{Currency, DocumentSequence, Money, TripdeskError, TripdeskResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Draft,
    Sent,
    PartiallyPaid,
    Paid,
    Overdue,
    Cancelled,
}

impl InvoiceStatus {
    fn accepts_payment(&self) -> bool {
        matches!(self, Self::Sent | Self::PartiallyPaid | Self::Overdue)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillToKind {
    Customer,
    Agent,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillTo {
    pub kind: BillToKind,
    pub id: Option<Uuid>,
    pub name: String,
    pub email: Option<String>,
    pub address: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceItem {
    pub description: String,
    pub quantity: u32,
    pub unit_price: Money,
}

impl InvoiceItem {
    pub fn amount(&self) -> TripdeskResult<Money> {
        self.unit_price.times(i64::from(self.quantity))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomerInvoice {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub booking_id: Option<Uuid>,
    pub invoice_number: String,
    pub bill_to: BillTo,
    pub currency: Currency,
    pub items: Vec<InvoiceItem>,
    pub subtotal: Money,
    pub tax_rate_bps: i64,
    pub tax_amount: Money,
    pub discount: Money,
    pub total: Money,
    pub amount_paid: Money,
    pub balance_due: Money,
    pub issued_on: NaiveDate,
    pub due_on: NaiveDate,
    pub status: InvoiceStatus,
    pub notes: Option<String>,
    pub terms: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoicePayment {
    pub id: Uuid,
    pub invoice_id: Uuid,
    pub amount: Money,
    pub method: String,
    pub reference: Option<String>,
    pub paid_on: NaiveDate,
    pub recorded_by: Uuid,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewInvoice {
    pub booking_id: Option<Uuid>,
    pub bill_to: BillTo,
    pub currency: Currency,
    pub items: Vec<InvoiceItem>,
    pub tax_rate_bps: i64,
    pub discount: Money,
    pub issued_on: NaiveDate,
    pub due_on: NaiveDate,
    pub notes: Option<String>,
    pub terms: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewInvoicePayment {
    pub amount: Money,
    pub method: String,
    pub reference: Option<String>,
    pub paid_on: NaiveDate,
    pub recorded_by: Uuid,
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceivablesSummary {
    pub currency: Currency,
    pub by_status: Vec<(InvoiceStatus, usize)>,
    pub invoiced: Money,
    pub received: Money,
    pub outstanding: Money,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReceivablesState {
    pub invoices: Vec<CustomerInvoice>,
    pub payments: Vec<InvoicePayment>,
    pub idempotency: Vec<(String, Uuid)>,
}

struct Totals {
    subtotal: Money,
    tax: Money,
    total: Money,
}

fn compute_totals(
    currency: Currency,
    items: &[InvoiceItem],
    tax_rate_bps: i64,
    discount: Money,
) -> TripdeskResult<Totals> {
    if items.is_empty() {
        return Err(TripdeskError::validation("an invoice needs at least one item"));
    }
    if !(0..=10_000).contains(&tax_rate_bps) {
        return Err(TripdeskError::validation("tax rate must be 0-100%"));
    }
    for item in items {
        if item.quantity == 0 || item.unit_price.is_negative() {
            return Err(TripdeskError::validation(format!(
                "item '{}' needs a positive quantity and a non-negative price",
                item.description
            )));
        }
    }
    let subtotal = items
        .iter()
        .try_fold(Money::zero(currency), |acc, item| acc.checked_add(item.amount()?))?;
    let tax = subtotal.percent_bps(tax_rate_bps);
    let gross = subtotal.checked_add(tax)?;
    if discount.is_negative() {
        return Err(TripdeskError::validation("discount cannot be negative"));
    }
    if discount.currency != currency {
        return Err(TripdeskError::CurrencyMismatch {
            expected: currency,
            found: discount.currency,
        });
    }
    if discount.minor > gross.minor {
        return Err(TripdeskError::validation("discount exceeds invoice amount"));
    }
    Ok(Totals {
        subtotal,
        tax,
        total: gross.checked_sub(discount)?,
    })
}

pub struct ReceivablesLedger {
    invoices: DashMap<Uuid, CustomerInvoice>,
    payments: DashMap<Uuid, InvoicePayment>,
    idempotency: DashMap<String, Uuid>,
    posting: Mutex<()>,
    numbers: Arc<DocumentSequence>,
    prefix: String,
}

impl ReceivablesLedger {
    pub fn new(numbers: Arc<DocumentSequence>, prefix: impl Into<String>) -> Self {
        Self {
            invoices: DashMap::new(),
            payments: DashMap::new(),
            idempotency: DashMap::new(),
            posting: Mutex::new(()),
            numbers,
            prefix: prefix.into(),
        }
    }

    pub fn from_state(state: ReceivablesState, numbers: Arc<DocumentSequence>, prefix: impl Into<String>) -> Self {
        let ledger = Self::new(numbers, prefix);
        for inv in state.invoices {
            ledger.invoices.insert(inv.id, inv);
        }
        for p in state.payments {
            ledger.payments.insert(p.id, p);
        }
        for (key, id) in state.idempotency {
            ledger.idempotency.insert(key, id);
        }
        ledger
    }

    pub fn export(&self) -> ReceivablesState {
        let mut invoices: Vec<CustomerInvoice> = self.invoices.iter().map(|e| e.value().clone()).collect();
        invoices.sort_by_key(|i| (i.created_at, i.id));
        let mut payments: Vec<InvoicePayment> = self.payments.iter().map(|e| e.value().clone()).collect();
        payments.sort_by_key(|p| (p.created_at, p.id));
        let mut idempotency: Vec<(String, Uuid)> = self
            .idempotency
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect();
        idempotency.sort();
        ReceivablesState {
            invoices,
            payments,
            idempotency,
        }
    }

    pub fn create(&self, organization_id: Uuid, new: NewInvoice) -> TripdeskResult<CustomerInvoice> {
        if new.bill_to.name.trim().is_empty() {
            return Err(TripdeskError::validation("bill-to name is required"));
        }
        if new.due_on < new.issued_on {
            return Err(TripdeskError::validation("invoice is due before it is issued"));
        }
        let totals = compute_totals(new.currency, &new.items, new.tax_rate_bps, new.discount)?;

        let now = Utc::now();
        let invoice = CustomerInvoice {
            id: Uuid::new_v4(),
            organization_id,
            booking_id: new.booking_id,
            invoice_number: self
                .numbers
                .next(&organization_id.to_string(), &self.prefix, new.issued_on.year()),
            bill_to: new.bill_to,
            currency: new.currency,
            items: new.items,
            subtotal: totals.subtotal,
            tax_rate_bps: new.tax_rate_bps,
            tax_amount: totals.tax,
            discount: new.discount,
            total: totals.total,
            amount_paid: Money::zero(new.currency),
            balance_due: totals.total,
            issued_on: new.issued_on,
            due_on: new.due_on,
            status: InvoiceStatus::Draft,
            notes: new.notes,
            terms: new.terms,
            sent_at: None,
            paid_at: None,
            created_at: now,
            updated_at: now,
        };
        self.invoices.insert(invoice.id, invoice.clone());
        info!(org_id = %organization_id, invoice_id = %invoice.id, number = %invoice.invoice_number, total = %invoice.total, "Customer invoice created");
        Ok(invoice)
    }

    pub fn get(&self, id: Uuid) -> TripdeskResult<CustomerInvoice> {
        self.invoices
            .get(&id)
            .map(|e| e.value().clone())
            .ok_or_else(|| TripdeskError::not_found("invoice", id))
    }

    pub fn list(&self, organization_id: Uuid, status: Option<InvoiceStatus>) -> Vec<CustomerInvoice> {
        let mut invoices: Vec<CustomerInvoice> = self
            .invoices
            .iter()
            .filter(|e| {
                let i = e.value();
                i.organization_id == organization_id && status.map_or(true, |s| i.status == s)
            })
            .map(|e| e.value().clone())
            .collect();
        invoices.sort_by(|a, b| b.issued_on.cmp(&a.issued_on).then(b.invoice_number.cmp(&a.invoice_number)));
        invoices
    }

    pub fn payments(&self, invoice_id: Uuid) -> Vec<InvoicePayment> {
        let mut payments: Vec<InvoicePayment> = self
            .payments
            .iter()
            .filter(|e| e.value().invoice_id == invoice_id)
            .map(|e| e.value().clone())
            .collect();
        payments.sort_by_key(|p| (p.paid_on, p.created_at));
        payments
    }

    /// Replace the line items and recompute totals. Drafts only.
    pub fn update_items(
        &self,
        id: Uuid,
        items: Vec<InvoiceItem>,
        tax_rate_bps: i64,
        discount: Money,
    ) -> TripdeskResult<CustomerInvoice> {
        let _posting = self.posting.lock();
        let mut invoice = self
            .invoices
            .get_mut(&id)
            .ok_or_else(|| TripdeskError::not_found("invoice", id))?;
        if invoice.status != InvoiceStatus::Draft {
            return Err(TripdeskError::Conflict(format!(
                "invoice {} is {:?}; only drafts can be edited",
                invoice.invoice_number, invoice.status
            )));
        }
        let totals = compute_totals(invoice.currency, &items, tax_rate_bps, discount)?;
        invoice.items = items;
        invoice.tax_rate_bps = tax_rate_bps;
        invoice.discount = discount;
        invoice.subtotal = totals.subtotal;
        invoice.tax_amount = totals.tax;
        invoice.total = totals.total;
        invoice.balance_due = totals.total;
        invoice.updated_at = Utc::now();
        Ok(invoice.clone())
    }

    /// Issue a draft. An invoice that totals zero has nothing to collect and
    /// is settled on the spot.
    pub fn send(&self, id: Uuid) -> TripdeskResult<CustomerInvoice> {
        let _posting = self.posting.lock();
        let mut invoice = self
            .invoices
            .get_mut(&id)
            .ok_or_else(|| TripdeskError::not_found("invoice", id))?;
        if invoice.status != InvoiceStatus::Draft {
            return Err(TripdeskError::transition("invoice", invoice.status, InvoiceStatus::Sent));
        }
        let now = Utc::now();
        invoice.sent_at = Some(now);
        invoice.updated_at = now;
        if invoice.total.is_zero() {
            invoice.status = InvoiceStatus::Paid;
            invoice.paid_at = Some(now);
        } else {
            invoice.status = InvoiceStatus::Sent;
        }
        info!(invoice_id = %id, status = ?invoice.status, "Customer invoice sent");
        Ok(invoice.clone())
    }

    pub fn record_payment(
        &self,
        id: Uuid,
        new: NewInvoicePayment,
    ) -> TripdeskResult<(CustomerInvoice, InvoicePayment)> {
        let _posting = self.posting.lock();

        let idem_key = new.idempotency_key.as_ref().map(|k| format!("{id}/{k}"));
        if let Some(ref key) = idem_key {
            if let Some(existing) = self.idempotency.get(key).map(|e| *e.value()) {
                let payment = self
                    .payments
                    .get(&existing)
                    .map(|e| e.value().clone())
                    .ok_or_else(|| TripdeskError::not_found("invoice payment", existing))?;
                return Ok((self.get(id)?, payment));
            }
        }

        let mut invoice = self
            .invoices
            .get_mut(&id)
            .ok_or_else(|| TripdeskError::not_found("invoice", id))?;
        if !invoice.status.accepts_payment() {
            return Err(TripdeskError::Conflict(format!(
                "invoice {} is {:?} and cannot take payments",
                invoice.invoice_number, invoice.status
            )));
        }
        if !new.amount.is_positive() {
            return Err(TripdeskError::validation("payment amount must be positive"));
        }
        if new.amount.currency != invoice.currency {
            return Err(TripdeskError::CurrencyMismatch {
                expected: invoice.currency,
                found: new.amount.currency,
            });
        }
        if new.amount.minor > invoice.balance_due.minor {
            return Err(TripdeskError::validation(format!(
                "payment {} exceeds balance due {}",
                new.amount, invoice.balance_due
            )));
        }

        let now = Utc::now();
        let payment = InvoicePayment {
            id: Uuid::new_v4(),
            invoice_id: id,
            amount: new.amount,
            method: new.method,
            reference: new.reference,
            paid_on: new.paid_on,
            recorded_by: new.recorded_by,
            created_at: now,
        };
        invoice.amount_paid = invoice.amount_paid.checked_add(new.amount)?;
        invoice.balance_due = invoice.total.checked_sub(invoice.amount_paid)?;
        if invoice.balance_due.is_zero() {
            invoice.status = InvoiceStatus::Paid;
            invoice.paid_at = Some(now);
        } else {
            invoice.status = InvoiceStatus::PartiallyPaid;
        }
        invoice.updated_at = now;

        self.payments.insert(payment.id, payment.clone());
        if let Some(key) = idem_key {
            self.idempotency.insert(key, payment.id);
        }
        metrics::counter!("payments.recorded", "ledger" => "receivable").increment(1);
        info!(
            invoice_id = %id,
            amount = %payment.amount,
            balance_due = %invoice.balance_due,
            status = ?invoice.status,
            "Invoice payment recorded"
        );
        Ok((invoice.clone(), payment))
    }

    /// Cancel an invoice that has not collected anything.
    pub fn cancel(&self, id: Uuid) -> TripdeskResult<CustomerInvoice> {
        let _posting = self.posting.lock();
        let mut invoice = self
            .invoices
            .get_mut(&id)
            .ok_or_else(|| TripdeskError::not_found("invoice", id))?;
        if matches!(invoice.status, InvoiceStatus::Paid | InvoiceStatus::Cancelled) {
            return Err(TripdeskError::transition("invoice", invoice.status, InvoiceStatus::Cancelled));
        }
        if !invoice.amount_paid.is_zero() {
            return Err(TripdeskError::Conflict(format!(
                "invoice {} has payments and cannot be cancelled",
                invoice.invoice_number
            )));
        }
        invoice.status = InvoiceStatus::Cancelled;
        invoice.updated_at = Utc::now();
        info!(invoice_id = %id, "Customer invoice cancelled");
        Ok(invoice.clone())
    }

    /// Flag unpaid invoices whose due date is before `today`.
    pub fn mark_overdue(&self, today: NaiveDate) -> Vec<CustomerInvoice> {
        let _posting = self.posting.lock();
        let mut flagged = Vec::new();
        for mut entry in self.invoices.iter_mut() {
            let invoice = entry.value_mut();
            if matches!(invoice.status, InvoiceStatus::Sent | InvoiceStatus::PartiallyPaid)
                && invoice.due_on < today
            {
                invoice.status = InvoiceStatus::Overdue;
                invoice.updated_at = Utc::now();
                flagged.push(invoice.clone());
            }
        }
        if !flagged.is_empty() {
            info!(count = flagged.len(), "Invoices marked overdue");
        }
        flagged
    }

    /// Totals in `currency` across an organization's non-cancelled invoices.
    pub fn summary(&self, organization_id: Uuid, currency: Currency) -> TripdeskResult<ReceivablesSummary> {
        let mut counts: HashMap<InvoiceStatus, usize> = HashMap::new();
        let mut invoiced = Money::zero(currency);
        let mut received = Money::zero(currency);
        let mut outstanding = Money::zero(currency);

        for inv in self.list(organization_id, None) {
            if inv.status == InvoiceStatus::Cancelled {
                continue;
            }
            *counts.entry(inv.status).or_default() += 1;
            if inv.currency != currency {
                continue;
            }
            invoiced = invoiced.checked_add(inv.total)?;
            received = received.checked_add(inv.amount_paid)?;
            outstanding = outstanding.checked_add(inv.balance_due)?;
        }

        let mut by_status: Vec<(InvoiceStatus, usize)> = counts.into_iter().collect();
        by_status.sort_by_key(|(s, _)| format!("{s:?}"));
        Ok(ReceivablesSummary {
            currency,
            by_status,
            invoiced,
            received,
            outstanding,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eur(major: i64) -> Money {
        Money::from_major(major, Currency::Eur)
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, d).unwrap()
    }

    fn ledger() -> ReceivablesLedger {
        ReceivablesLedger::new(Arc::new(DocumentSequence::new()), "INV")
    }

    fn new_invoice(discount: i64) -> NewInvoice {
        NewInvoice {
            booking_id: None,
            bill_to: BillTo {
                kind: BillToKind::Customer,
                id: None,
                name: "John Smith".into(),
                email: Some("john@example.com".into()),
                address: None,
            },
            currency: Currency::Eur,
            items: vec![
                InvoiceItem {
                    description: "Istanbul package".into(),
                    quantity: 2,
                    unit_price: eur(400),
                },
                InvoiceItem {
                    description: "Airport transfer".into(),
                    quantity: 1,
                    unit_price: eur(200),
                },
            ],
            tax_rate_bps: 1_000,
            discount: eur(discount),
            issued_on: day(1),
            due_on: day(15),
            notes: None,
            terms: None,
        }
    }

    fn payment(major: i64, key: Option<&str>) -> NewInvoicePayment {
        NewInvoicePayment {
            amount: eur(major),
            method: "card".into(),
            reference: None,
            paid_on: day(10),
            recorded_by: Uuid::new_v4(),
            idempotency_key: key.map(String::from),
        }
    }

    #[test]
    fn test_totals() {
        let ledger = ledger();
        let inv = ledger.create(Uuid::new_v4(), new_invoice(50)).unwrap();
        assert_eq!(inv.invoice_number, "INV-2025-0001");
        assert_eq!(inv.subtotal, eur(1_000));
        assert_eq!(inv.tax_amount, eur(100));
        assert_eq!(inv.total, eur(1_050));
        assert_eq!(inv.balance_due, eur(1_050));
        assert!(ledger.create(Uuid::new_v4(), new_invoice(1_101)).is_err());
    }

    #[test]
    fn test_items_editable_only_in_draft() {
        let ledger = ledger();
        let inv = ledger.create(Uuid::new_v4(), new_invoice(0)).unwrap();
        let items = vec![InvoiceItem {
            description: "Revised package".into(),
            quantity: 1,
            unit_price: eur(500),
        }];
        let updated = ledger.update_items(inv.id, items.clone(), 0, eur(0)).unwrap();
        assert_eq!(updated.total, eur(500));

        ledger.send(inv.id).unwrap();
        assert!(matches!(
            ledger.update_items(inv.id, items, 0, eur(0)),
            Err(TripdeskError::Conflict(_))
        ));
    }

    #[test]
    fn test_payments_move_status() {
        let ledger = ledger();
        let inv = ledger.create(Uuid::new_v4(), new_invoice(0)).unwrap();
        assert!(ledger.record_payment(inv.id, payment(100, None)).is_err());
        ledger.send(inv.id).unwrap();

        let (partial, _) = ledger.record_payment(inv.id, payment(600, None)).unwrap();
        assert_eq!(partial.status, InvoiceStatus::PartiallyPaid);
        assert_eq!(partial.balance_due, eur(500));

        assert!(ledger.record_payment(inv.id, payment(501, None)).is_err());
        let (paid, _) = ledger.record_payment(inv.id, payment(500, None)).unwrap();
        assert_eq!(paid.status, InvoiceStatus::Paid);
        assert!(paid.paid_at.is_some());
    }

    #[test]
    fn test_zero_total_settles_on_send() {
        let ledger = ledger();
        let inv = ledger.create(Uuid::new_v4(), new_invoice(1_100)).unwrap();
        assert!(inv.total.is_zero());

        let sent = ledger.send(inv.id).unwrap();
        assert_eq!(sent.status, InvoiceStatus::Paid);
        assert!(sent.paid_at.is_some());
        assert!(sent.balance_due.is_zero());
        assert!(ledger.mark_overdue(day(30)).is_empty());
    }

    #[test]
    fn test_payment_idempotent() {
        let ledger = ledger();
        let inv = ledger.create(Uuid::new_v4(), new_invoice(0)).unwrap();
        ledger.send(inv.id).unwrap();
        ledger.record_payment(inv.id, payment(300, Some("wire-77"))).unwrap();
        let (again, _) = ledger.record_payment(inv.id, payment(300, Some("wire-77"))).unwrap();
        assert_eq!(again.amount_paid, eur(300));
        assert_eq!(ledger.payments(inv.id).len(), 1);
    }

    #[test]
    fn test_cancel_requires_no_payments() {
        let ledger = ledger();
        let inv = ledger.create(Uuid::new_v4(), new_invoice(0)).unwrap();
        ledger.send(inv.id).unwrap();
        ledger.record_payment(inv.id, payment(100, None)).unwrap();
        assert!(matches!(ledger.cancel(inv.id), Err(TripdeskError::Conflict(_))));

        let other = ledger.create(Uuid::new_v4(), new_invoice(0)).unwrap();
        assert_eq!(ledger.cancel(other.id).unwrap().status, InvoiceStatus::Cancelled);
    }

    #[test]
    fn test_mark_overdue_and_summary() {
        let ledger = ledger();
        let org = Uuid::new_v4();
        let late = ledger.create(org, new_invoice(0)).unwrap();
        ledger.send(late.id).unwrap();
        ledger.record_payment(late.id, payment(100, None)).unwrap();
        let draft = ledger.create(org, new_invoice(0)).unwrap();
        let cancelled = ledger.create(org, new_invoice(0)).unwrap();
        ledger.cancel(cancelled.id).unwrap();

        assert!(ledger.mark_overdue(day(15)).is_empty());
        let flagged = ledger.mark_overdue(day(16));
        assert_eq!(flagged.len(), 1);
        assert_eq!(flagged[0].id, late.id);
        assert_eq!(ledger.get(draft.id).unwrap().status, InvoiceStatus::Draft);

        // overdue invoices still take payments
        ledger.record_payment(late.id, payment(100, None)).unwrap();

        let s = ledger.summary(org, Currency::Eur).unwrap();
        assert_eq!(s.invoiced, eur(2_200));
        assert_eq!(s.received, eur(200));
        assert_eq!(s.outstanding, eur(2_000));
        assert_eq!(s.by_status.iter().map(|(_, n)| n).sum::<usize>(), 2);
    }
}
