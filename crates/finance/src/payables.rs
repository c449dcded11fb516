//! Suppliers and the invoices they send the operator.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use tripdesk_core::{Currency, Money, TripdeskError, TripdeskResult};
use tripdesk_platform::validation::is_valid_email;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SupplierKind {
    Hotel,
    Transport,
    Guide,
    Restaurant,
    Activity,
    Other,
}

impl std::str::FromStr for SupplierKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "hotel" => Ok(Self::Hotel),
            "transport" => Ok(Self::Transport),
            "guide" => Ok(Self::Guide),
            "restaurant" => Ok(Self::Restaurant),
            "activity" => Ok(Self::Activity),
            "other" => Ok(Self::Other),
            other => Err(format!("unknown supplier kind '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Supplier {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub name: String,
    pub kind: SupplierKind,
    pub email: Option<String>,
    pub currency: Currency,
    pub payment_terms_days: u32,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewSupplier {
    pub name: String,
    pub kind: SupplierKind,
    pub email: Option<String>,
    pub currency: Currency,
    pub payment_terms_days: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SupplierInvoiceStatus {
    Pending,
    Partial,
    Paid,
    Cancelled,
}

impl SupplierInvoiceStatus {
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Pending | Self::Partial)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupplierInvoice {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub supplier_id: Uuid,
    /// Number printed on the supplier's own document.
    pub invoice_number: String,
    pub invoice_date: NaiveDate,
    pub due_date: NaiveDate,
    pub subtotal: Money,
    pub tax: Money,
    pub total: Money,
    pub amount_paid: Money,
    pub status: SupplierInvoiceStatus,
    /// Booking the invoice relates to.
    pub reference: Option<Uuid>,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SupplierInvoice {
    pub fn outstanding(&self) -> TripdeskResult<Money> {
        self.total.checked_sub(self.amount_paid)
    }
}

#[derive(Debug, Clone)]
pub struct NewSupplierInvoice {
    pub supplier_id: Uuid,
    pub invoice_number: String,
    pub invoice_date: NaiveDate,
    /// Defaults to the supplier's payment terms.
    pub due_date: Option<NaiveDate>,
    pub subtotal: Money,
    pub tax: Money,
    pub reference: Option<Uuid>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupplierPayment {
    pub id: Uuid,
    pub supplier_invoice_id: Uuid,
    pub amount: Money,
    pub method: String,
    pub reference: Option<String>,
    pub paid_on: NaiveDate,
    pub recorded_by: Uuid,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewSupplierPayment {
    pub amount: Money,
    pub method: String,
    pub reference: Option<String>,
    pub paid_on: NaiveDate,
    pub recorded_by: Uuid,
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct PayablesFilter {
    pub supplier_id: Option<Uuid>,
    pub overdue_only: bool,
    /// Currency the summary is totalled in; the ledger default otherwise.
    pub currency: Option<Currency>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayablesSummary {
    pub currency: Currency,
    pub total_outstanding: Money,
    pub overdue_amount: Money,
    pub overdue_count: usize,
    pub due_soon: Money,
    pub invoice_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payables {
    pub invoices: Vec<SupplierInvoice>,
    pub summary: PayablesSummary,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PayablesState {
    pub suppliers: Vec<Supplier>,
    pub invoices: Vec<SupplierInvoice>,
    pub payments: Vec<SupplierPayment>,
    pub idempotency: Vec<(String, Uuid)>,
}

pub struct PayablesLedger {
    suppliers: DashMap<Uuid, Supplier>,
    invoices: DashMap<Uuid, SupplierInvoice>,
    /// (supplier, supplier's invoice number) -> invoice id
    numbers: DashMap<(Uuid, String), Uuid>,
    payments: DashMap<Uuid, SupplierPayment>,
    idempotency: DashMap<String, Uuid>,
    posting: Mutex<()>,
    default_currency: Currency,
    due_soon_days: i64,
}

impl PayablesLedger {
    pub fn new(default_currency: Currency, due_soon_days: i64) -> Self {
        Self {
            suppliers: DashMap::new(),
            invoices: DashMap::new(),
            numbers: DashMap::new(),
            payments: DashMap::new(),
            idempotency: DashMap::new(),
            posting: Mutex::new(()),
            default_currency,
            due_soon_days,
        }
    }

    pub fn from_state(state: PayablesState, default_currency: Currency, due_soon_days: i64) -> Self {
        let ledger = Self::new(default_currency, due_soon_days);
        for s in state.suppliers {
            ledger.suppliers.insert(s.id, s);
        }
        for inv in state.invoices {
            ledger
                .numbers
                .insert((inv.supplier_id, inv.invoice_number.clone()), inv.id);
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

    pub fn export(&self) -> PayablesState {
        let mut suppliers: Vec<Supplier> = self.suppliers.iter().map(|e| e.value().clone()).collect();
        suppliers.sort_by_key(|s| (s.created_at, s.id));
        let mut invoices: Vec<SupplierInvoice> = self.invoices.iter().map(|e| e.value().clone()).collect();
        invoices.sort_by_key(|i| (i.created_at, i.id));
        let mut payments: Vec<SupplierPayment> = self.payments.iter().map(|e| e.value().clone()).collect();
        payments.sort_by_key(|p| (p.created_at, p.id));
        let mut idempotency: Vec<(String, Uuid)> = self
            .idempotency
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect();
        idempotency.sort();
        PayablesState {
            suppliers,
            invoices,
            payments,
            idempotency,
        }
    }

    pub fn add_supplier(&self, organization_id: Uuid, new: NewSupplier) -> TripdeskResult<Supplier> {
        let name = new.name.trim();
        if name.is_empty() {
            return Err(TripdeskError::validation("supplier name is required"));
        }
        if let Some(ref email) = new.email {
            if !is_valid_email(email) {
                return Err(TripdeskError::validation(format!("invalid supplier email '{email}'")));
            }
        }
        let supplier = Supplier {
            id: Uuid::new_v4(),
            organization_id,
            name: name.to_string(),
            kind: new.kind,
            email: new.email,
            currency: new.currency,
            payment_terms_days: new.payment_terms_days,
            active: true,
            created_at: Utc::now(),
        };
        self.suppliers.insert(supplier.id, supplier.clone());
        info!(org_id = %organization_id, supplier_id = %supplier.id, name = %supplier.name, "Supplier added");
        Ok(supplier)
    }

    pub fn get_supplier(&self, id: Uuid) -> TripdeskResult<Supplier> {
        self.suppliers
            .get(&id)
            .map(|e| e.value().clone())
            .ok_or_else(|| TripdeskError::not_found("supplier", id))
    }

    pub fn list_suppliers(&self, organization_id: Uuid) -> Vec<Supplier> {
        let mut suppliers: Vec<Supplier> = self
            .suppliers
            .iter()
            .filter(|e| e.value().organization_id == organization_id)
            .map(|e| e.value().clone())
            .collect();
        suppliers.sort_by(|a, b| a.name.cmp(&b.name));
        suppliers
    }

    pub fn deactivate_supplier(&self, id: Uuid) -> TripdeskResult<Supplier> {
        let mut supplier = self
            .suppliers
            .get_mut(&id)
            .ok_or_else(|| TripdeskError::not_found("supplier", id))?;
        supplier.active = false;
        Ok(supplier.clone())
    }

    pub fn record_invoice(&self, new: NewSupplierInvoice) -> TripdeskResult<SupplierInvoice> {
        let supplier = self.get_supplier(new.supplier_id)?;
        if !supplier.active {
            return Err(TripdeskError::Conflict(format!(
                "supplier '{}' is inactive",
                supplier.name
            )));
        }
        let number = new.invoice_number.trim().to_string();
        if number.is_empty() {
            return Err(TripdeskError::validation("supplier invoice number is required"));
        }
        for amount in [new.subtotal, new.tax] {
            if amount.currency != supplier.currency {
                return Err(TripdeskError::CurrencyMismatch {
                    expected: supplier.currency,
                    found: amount.currency,
                });
            }
            if amount.is_negative() {
                return Err(TripdeskError::validation("invoice amounts cannot be negative"));
            }
        }
        let total = new.subtotal.checked_add(new.tax)?;
        if !total.is_positive() {
            return Err(TripdeskError::validation("invoice total must be positive"));
        }
        let due_date = new
            .due_date
            .unwrap_or(new.invoice_date + Duration::days(i64::from(supplier.payment_terms_days)));
        if due_date < new.invoice_date {
            return Err(TripdeskError::validation("invoice is due before its date"));
        }

        let now = Utc::now();
        let invoice = SupplierInvoice {
            id: Uuid::new_v4(),
            organization_id: supplier.organization_id,
            supplier_id: supplier.id,
            invoice_number: number.clone(),
            invoice_date: new.invoice_date,
            due_date,
            subtotal: new.subtotal,
            tax: new.tax,
            total,
            amount_paid: Money::zero(supplier.currency),
            status: SupplierInvoiceStatus::Pending,
            reference: new.reference,
            description: new.description,
            created_at: now,
            updated_at: now,
        };

        match self.numbers.entry((supplier.id, number)) {
            Entry::Occupied(_) => {
                return Err(TripdeskError::Conflict(format!(
                    "supplier '{}' already has invoice {}",
                    supplier.name, invoice.invoice_number
                )))
            }
            Entry::Vacant(slot) => {
                slot.insert(invoice.id);
            }
        }
        self.invoices.insert(invoice.id, invoice.clone());
        info!(
            supplier_id = %supplier.id,
            invoice_id = %invoice.id,
            number = %invoice.invoice_number,
            total = %invoice.total,
            "Supplier invoice recorded"
        );
        Ok(invoice)
    }

    pub fn get_invoice(&self, id: Uuid) -> TripdeskResult<SupplierInvoice> {
        self.invoices
            .get(&id)
            .map(|e| e.value().clone())
            .ok_or_else(|| TripdeskError::not_found("supplier invoice", id))
    }

    pub fn invoices_for_supplier(&self, supplier_id: Uuid) -> Vec<SupplierInvoice> {
        let mut invoices: Vec<SupplierInvoice> = self
            .invoices
            .iter()
            .filter(|e| e.value().supplier_id == supplier_id)
            .map(|e| e.value().clone())
            .collect();
        invoices.sort_by_key(|i| (i.invoice_date, i.created_at));
        invoices
    }

    pub fn record_payment(
        &self,
        invoice_id: Uuid,
        new: NewSupplierPayment,
    ) -> TripdeskResult<(SupplierInvoice, SupplierPayment)> {
        let _posting = self.posting.lock();

        let idem_key = new.idempotency_key.as_ref().map(|k| format!("{invoice_id}/{k}"));
        if let Some(ref key) = idem_key {
            if let Some(existing) = self.idempotency.get(key).map(|e| *e.value()) {
                let payment = self
                    .payments
                    .get(&existing)
                    .map(|e| e.value().clone())
                    .ok_or_else(|| TripdeskError::not_found("supplier payment", existing))?;
                return Ok((self.get_invoice(invoice_id)?, payment));
            }
        }

        let mut invoice = self
            .invoices
            .get_mut(&invoice_id)
            .ok_or_else(|| TripdeskError::not_found("supplier invoice", invoice_id))?;
        if !invoice.status.is_open() {
            return Err(TripdeskError::Conflict(format!(
                "supplier invoice {} is {:?}",
                invoice.invoice_number, invoice.status
            )));
        }
        if !new.amount.is_positive() {
            return Err(TripdeskError::validation("payment amount must be positive"));
        }
        if new.amount.currency != invoice.total.currency {
            return Err(TripdeskError::CurrencyMismatch {
                expected: invoice.total.currency,
                found: new.amount.currency,
            });
        }
        let outstanding = invoice.outstanding()?;
        if new.amount.minor > outstanding.minor {
            return Err(TripdeskError::validation(format!(
                "payment {} exceeds outstanding {}",
                new.amount, outstanding
            )));
        }

        let now = Utc::now();
        let payment = SupplierPayment {
            id: Uuid::new_v4(),
            supplier_invoice_id: invoice_id,
            amount: new.amount,
            method: new.method,
            reference: new.reference,
            paid_on: new.paid_on,
            recorded_by: new.recorded_by,
            created_at: now,
        };
        invoice.amount_paid = invoice.amount_paid.checked_add(new.amount)?;
        invoice.status = if invoice.amount_paid == invoice.total {
            SupplierInvoiceStatus::Paid
        } else {
            SupplierInvoiceStatus::Partial
        };
        invoice.updated_at = now;

        self.payments.insert(payment.id, payment.clone());
        if let Some(key) = idem_key {
            self.idempotency.insert(key, payment.id);
        }
        metrics::counter!("payments.recorded", "ledger" => "payable").increment(1);
        info!(
            invoice_id = %invoice_id,
            amount = %payment.amount,
            status = ?invoice.status,
            "Supplier payment recorded"
        );
        Ok((invoice.clone(), payment))
    }

    pub fn cancel_invoice(&self, invoice_id: Uuid) -> TripdeskResult<SupplierInvoice> {
        let _posting = self.posting.lock();
        let mut invoice = self
            .invoices
            .get_mut(&invoice_id)
            .ok_or_else(|| TripdeskError::not_found("supplier invoice", invoice_id))?;
        if invoice.status != SupplierInvoiceStatus::Pending {
            return Err(TripdeskError::transition(
                "supplier invoice",
                invoice.status,
                SupplierInvoiceStatus::Cancelled,
            ));
        }
        invoice.status = SupplierInvoiceStatus::Cancelled;
        invoice.updated_at = Utc::now();
        Ok(invoice.clone())
    }

    /// Open invoices ordered by due date, with totals as of `as_of`.
    pub fn payables(
        &self,
        organization_id: Uuid,
        filter: &PayablesFilter,
        as_of: NaiveDate,
    ) -> TripdeskResult<Payables> {
        let currency = filter.currency.unwrap_or(self.default_currency);
        let soon = as_of + Duration::days(self.due_soon_days);

        let mut invoices: Vec<SupplierInvoice> = self
            .invoices
            .iter()
            .filter(|e| {
                let i = e.value();
                i.organization_id == organization_id
                    && i.status.is_open()
                    && filter.supplier_id.map_or(true, |s| i.supplier_id == s)
                    && (!filter.overdue_only || i.due_date < as_of)
            })
            .map(|e| e.value().clone())
            .collect();
        invoices.sort_by_key(|i| (i.due_date, i.invoice_date, i.created_at));

        let mut summary = PayablesSummary {
            currency,
            total_outstanding: Money::zero(currency),
            overdue_amount: Money::zero(currency),
            overdue_count: 0,
            due_soon: Money::zero(currency),
            invoice_count: invoices.len(),
        };
        for inv in invoices.iter().filter(|i| i.total.currency == currency) {
            let outstanding = inv.outstanding()?;
            summary.total_outstanding = summary.total_outstanding.checked_add(outstanding)?;
            if inv.due_date < as_of {
                summary.overdue_amount = summary.overdue_amount.checked_add(outstanding)?;
                summary.overdue_count += 1;
            } else if inv.due_date <= soon {
                summary.due_soon = summary.due_soon.checked_add(outstanding)?;
            }
        }

        Ok(Payables { invoices, summary })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eur(major: i64) -> Money {
        Money::from_major(major, Currency::Eur)
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, d).unwrap()
    }

    fn setup() -> (PayablesLedger, Uuid, Supplier) {
        let ledger = PayablesLedger::new(Currency::Eur, 7);
        let org = Uuid::new_v4();
        let supplier = ledger
            .add_supplier(
                org,
                NewSupplier {
                    name: "Bosphorus Coaches".into(),
                    kind: SupplierKind::Transport,
                    email: Some("billing@bosphorus.example".into()),
                    currency: Currency::Eur,
                    payment_terms_days: 30,
                },
            )
            .unwrap();
        (ledger, org, supplier)
    }

    fn invoice(supplier: Uuid, number: &str, date: NaiveDate, due: Option<NaiveDate>, major: i64) -> NewSupplierInvoice {
        NewSupplierInvoice {
            supplier_id: supplier,
            invoice_number: number.into(),
            invoice_date: date,
            due_date: due,
            subtotal: eur(major),
            tax: eur(0),
            reference: None,
            description: None,
        }
    }

    fn pay(major: i64, key: Option<&str>) -> NewSupplierPayment {
        NewSupplierPayment {
            amount: eur(major),
            method: "bank".into(),
            reference: None,
            paid_on: day(20),
            recorded_by: Uuid::new_v4(),
            idempotency_key: key.map(String::from),
        }
    }

    #[test]
    fn test_invoice_numbers_unique_per_supplier() {
        let (ledger, org, supplier) = setup();
        let inv = ledger.record_invoice(invoice(supplier.id, "BC-100", day(1), None, 500)).unwrap();
        assert_eq!(inv.due_date, day(31));
        assert!(matches!(
            ledger.record_invoice(invoice(supplier.id, "BC-100", day(2), None, 100)),
            Err(TripdeskError::Conflict(_))
        ));

        let other = ledger
            .add_supplier(
                org,
                NewSupplier {
                    name: "Cave Hotel".into(),
                    kind: SupplierKind::Hotel,
                    email: None,
                    currency: Currency::Eur,
                    payment_terms_days: 14,
                },
            )
            .unwrap();
        assert!(ledger.record_invoice(invoice(other.id, "BC-100", day(2), None, 100)).is_ok());
    }

    #[test]
    fn test_payments_update_status() {
        let (ledger, _, supplier) = setup();
        let inv = ledger.record_invoice(invoice(supplier.id, "BC-1", day(1), None, 500)).unwrap();

        let (partial, _) = ledger.record_payment(inv.id, pay(200, Some("t1"))).unwrap();
        assert_eq!(partial.status, SupplierInvoiceStatus::Partial);
        let (same, _) = ledger.record_payment(inv.id, pay(200, Some("t1"))).unwrap();
        assert_eq!(same.amount_paid, eur(200));

        assert!(ledger.record_payment(inv.id, pay(301, None)).is_err());
        let (paid, _) = ledger.record_payment(inv.id, pay(300, None)).unwrap();
        assert_eq!(paid.status, SupplierInvoiceStatus::Paid);
        assert!(matches!(
            ledger.record_payment(inv.id, pay(1, None)),
            Err(TripdeskError::Conflict(_))
        ));
    }

    #[test]
    fn test_payables_summary() {
        let (ledger, org, supplier) = setup();
        let overdue = ledger
            .record_invoice(invoice(supplier.id, "A", day(1), Some(day(5)), 300))
            .unwrap();
        ledger
            .record_invoice(invoice(supplier.id, "B", day(1), Some(day(14)), 200))
            .unwrap();
        ledger
            .record_invoice(invoice(supplier.id, "C", day(1), Some(day(28)), 100))
            .unwrap();
        let paid = ledger
            .record_invoice(invoice(supplier.id, "D", day(1), Some(day(2)), 50))
            .unwrap();
        ledger.record_payment(paid.id, pay(50, None)).unwrap();
        ledger.record_payment(overdue.id, pay(100, None)).unwrap();

        let result = ledger.payables(org, &PayablesFilter::default(), day(10)).unwrap();
        let numbers: Vec<&str> = result.invoices.iter().map(|i| i.invoice_number.as_str()).collect();
        assert_eq!(numbers, vec!["A", "B", "C"]);
        assert_eq!(result.summary.invoice_count, 3);
        assert_eq!(result.summary.total_outstanding, eur(500));
        assert_eq!(result.summary.overdue_amount, eur(200));
        assert_eq!(result.summary.overdue_count, 1);
        assert_eq!(result.summary.due_soon, eur(200));

        let overdue_only = ledger
            .payables(
                org,
                &PayablesFilter {
                    overdue_only: true,
                    ..Default::default()
                },
                day(10),
            )
            .unwrap();
        assert_eq!(overdue_only.invoices.len(), 1);
    }
}
