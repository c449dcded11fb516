//! Credit invoices: the platform's bills to operators for credit purchases
//! and subscriptions. Numbered in one platform-wide series.

use std::sync::Arc;

use chrono::{DateTime, Datelike, Duration, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use tripdesk_core::config::BillingConfig;
use tripdesk_core::money::BPS_SCALE;
use tripdesk_core::numbering::PLATFORM_SCOPE;
use tripdesk_core::{Currency, DocumentSequence, Money, TripdeskError, TripdeskResult};

use crate::credits::{CreditGrant, CreditLedger, CreditTxKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreditInvoiceKind {
    Deposit,
    Subscription,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreditInvoiceStatus {
    Pending,
    Paid,
    Canceled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditInvoice {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub invoice_number: String,
    pub kind: CreditInvoiceKind,
    /// Net amount before tax.
    pub amount: Money,
    pub currency: Currency,
    pub tax_rate_bps: i64,
    pub tax_amount: Money,
    pub total: Money,
    pub credits_to_add: Money,
    pub status: CreditInvoiceStatus,
    pub payment_method: Option<String>,
    pub payment_reference: Option<String>,
    pub payment_notes: Option<String>,
    pub issued_at: DateTime<Utc>,
    pub due_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
    pub marked_paid_by: Option<Uuid>,
}

/// Payment details captured when a super admin confirms a transfer.
#[derive(Debug, Clone, Default)]
pub struct PaymentConfirmation {
    pub method: Option<String>,
    pub reference: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreditInvoiceState {
    pub invoices: Vec<CreditInvoice>,
}

pub struct CreditInvoiceBook {
    invoices: DashMap<Uuid, CreditInvoice>,
    posting: Mutex<()>,
    numbers: Arc<DocumentSequence>,
    credits: Arc<CreditLedger>,
    config: BillingConfig,
}

impl CreditInvoiceBook {
    pub fn new(numbers: Arc<DocumentSequence>, credits: Arc<CreditLedger>, config: BillingConfig) -> Self {
        Self {
            invoices: DashMap::new(),
            posting: Mutex::new(()),
            numbers,
            credits,
            config,
        }
    }

    pub fn from_state(
        state: CreditInvoiceState,
        numbers: Arc<DocumentSequence>,
        credits: Arc<CreditLedger>,
        config: BillingConfig,
    ) -> Self {
        let book = Self::new(numbers, credits, config);
        for invoice in state.invoices {
            book.invoices.insert(invoice.id, invoice);
        }
        book
    }

    pub fn export(&self) -> CreditInvoiceState {
        let mut invoices: Vec<CreditInvoice> = self.invoices.iter().map(|e| e.value().clone()).collect();
        invoices.sort_by(|a, b| a.issued_at.cmp(&b.issued_at).then(a.invoice_number.cmp(&b.invoice_number)));
        CreditInvoiceState { invoices }
    }

    /// Raise a Pending deposit invoice for buying credits worth `amount`.
    pub fn purchase(&self, organization_id: Uuid, amount: Money) -> TripdeskResult<CreditInvoice> {
        if amount.currency != self.config.currency {
            return Err(TripdeskError::CurrencyMismatch {
                expected: self.config.currency,
                found: amount.currency,
            });
        }
        let min = Money::new(self.config.min_purchase_minor, self.config.currency);
        let max = Money::new(self.config.max_purchase_minor, self.config.currency);
        if amount.minor < min.minor || amount.minor > max.minor {
            return Err(TripdeskError::validation(format!(
                "purchase amount must be between {min} and {max}"
            )));
        }
        let credits = Money::new(
            amount.minor * self.config.credit_ratio_bps / BPS_SCALE,
            self.config.currency,
        );
        self.issue(organization_id, CreditInvoiceKind::Deposit, amount, credits)
    }

    /// Raise a Pending subscription invoice for one billing period.
    pub fn bill_subscription(&self, organization_id: Uuid, price: Money) -> TripdeskResult<CreditInvoice> {
        if price.currency != self.config.currency {
            return Err(TripdeskError::CurrencyMismatch {
                expected: self.config.currency,
                found: price.currency,
            });
        }
        // Subscription credits are granted by the subscription itself.
        self.issue(
            organization_id,
            CreditInvoiceKind::Subscription,
            price,
            Money::zero(self.config.currency),
        )
    }

    fn issue(
        &self,
        organization_id: Uuid,
        kind: CreditInvoiceKind,
        amount: Money,
        credits_to_add: Money,
    ) -> TripdeskResult<CreditInvoice> {
        let now = Utc::now();
        let tax_amount = amount.percent_bps(self.config.tax_rate_bps);
        let invoice = CreditInvoice {
            id: Uuid::new_v4(),
            organization_id,
            invoice_number: self
                .numbers
                .next(PLATFORM_SCOPE, &self.config.invoice_prefix, now.year()),
            kind,
            amount,
            currency: amount.currency,
            tax_rate_bps: self.config.tax_rate_bps,
            tax_amount,
            total: amount.checked_add(tax_amount)?,
            credits_to_add,
            status: CreditInvoiceStatus::Pending,
            payment_method: None,
            payment_reference: None,
            payment_notes: None,
            issued_at: now,
            due_at: now + Duration::days(self.config.invoice_due_days),
            paid_at: None,
            marked_paid_by: None,
        };
        self.invoices.insert(invoice.id, invoice.clone());
        metrics::counter!("credit_invoices.issued").increment(1);
        info!(
            org_id = %organization_id,
            invoice_id = %invoice.id,
            number = %invoice.invoice_number,
            total = %invoice.total,
            "Credit invoice issued"
        );
        Ok(invoice)
    }

    pub fn get(&self, id: Uuid) -> TripdeskResult<CreditInvoice> {
        self.invoices
            .get(&id)
            .map(|e| e.value().clone())
            .ok_or_else(|| TripdeskError::not_found("credit invoice", id))
    }

    /// Confirm payment. The status change and the credit deposit happen
    /// together, once.
    pub fn mark_paid(
        &self,
        id: Uuid,
        marked_by: Uuid,
        confirmation: PaymentConfirmation,
    ) -> TripdeskResult<CreditInvoice> {
        let _posting = self.posting.lock();
        let current = self.get(id)?;
        if current.status != CreditInvoiceStatus::Pending {
            return Err(TripdeskError::transition(
                "credit invoice",
                current.status,
                CreditInvoiceStatus::Paid,
            ));
        }

        if current.credits_to_add.is_positive() {
            self.credits.add(
                current.organization_id,
                CreditGrant {
                    kind: CreditTxKind::Deposit,
                    amount: current.credits_to_add,
                    description: format!("Credit purchase {}", current.invoice_number),
                    invoice_id: Some(current.id),
                    created_by: Some(marked_by),
                },
            )?;
        }

        let mut invoice = self
            .invoices
            .get_mut(&id)
            .ok_or_else(|| TripdeskError::not_found("credit invoice", id))?;
        invoice.status = CreditInvoiceStatus::Paid;
        invoice.paid_at = Some(Utc::now());
        invoice.marked_paid_by = Some(marked_by);
        invoice.payment_method = confirmation.method;
        invoice.payment_reference = confirmation.reference;
        invoice.payment_notes = confirmation.notes;
        metrics::counter!("credit_invoices.paid").increment(1);
        info!(
            invoice_id = %id,
            number = %invoice.invoice_number,
            credits = %invoice.credits_to_add,
            "Credit invoice marked paid"
        );
        Ok(invoice.clone())
    }

    pub fn cancel(&self, id: Uuid) -> TripdeskResult<CreditInvoice> {
        let _posting = self.posting.lock();
        let mut invoice = self
            .invoices
            .get_mut(&id)
            .ok_or_else(|| TripdeskError::not_found("credit invoice", id))?;
        if invoice.status != CreditInvoiceStatus::Pending {
            return Err(TripdeskError::transition(
                "credit invoice",
                invoice.status,
                CreditInvoiceStatus::Canceled,
            ));
        }
        invoice.status = CreditInvoiceStatus::Canceled;
        info!(invoice_id = %id, "Credit invoice canceled");
        Ok(invoice.clone())
    }

    /// Pending invoices across the platform, earliest due first.
    pub fn pending(&self) -> Vec<CreditInvoice> {
        let mut invoices: Vec<CreditInvoice> = self
            .invoices
            .iter()
            .filter(|e| e.value().status == CreditInvoiceStatus::Pending)
            .map(|e| e.value().clone())
            .collect();
        invoices.sort_by_key(|i| (i.due_at, i.issued_at));
        invoices
    }

    /// An organization's invoices, newest first.
    pub fn list(&self, organization_id: Uuid) -> Vec<CreditInvoice> {
        let mut invoices: Vec<CreditInvoice> = self
            .invoices
            .iter()
            .filter(|e| e.value().organization_id == organization_id)
            .map(|e| e.value().clone())
            .collect();
        invoices.sort_by(|a, b| b.issued_at.cmp(&a.issued_at));
        invoices
    }

    pub fn total_by_status(&self, status: CreditInvoiceStatus) -> TripdeskResult<Money> {
        Money::sum(
            self.config.currency,
            self.invoices
                .iter()
                .filter(|e| e.value().status == status)
                .map(|e| e.value().total),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tl(major: i64) -> Money {
        Money::from_major(major, Currency::Try)
    }

    fn book() -> (CreditInvoiceBook, Arc<CreditLedger>) {
        let credits = Arc::new(CreditLedger::new(Currency::Try));
        let book = CreditInvoiceBook::new(
            Arc::new(DocumentSequence::new()),
            credits.clone(),
            BillingConfig::default(),
        );
        (book, credits)
    }

    #[test]
    fn test_purchase_totals_and_numbering() {
        let (book, _) = book();
        let org = Uuid::new_v4();
        let inv = book.purchase(org, tl(1_000)).unwrap();
        let year = Utc::now().year();
        assert_eq!(inv.invoice_number, format!("TQB-{year}-0001"));
        assert_eq!(inv.tax_amount, tl(200));
        assert_eq!(inv.total, tl(1_200));
        assert_eq!(inv.credits_to_add, tl(1_000));
        assert_eq!(inv.status, CreditInvoiceStatus::Pending);

        let other = book.purchase(Uuid::new_v4(), tl(500)).unwrap();
        assert_eq!(other.invoice_number, format!("TQB-{year}-0002"));
    }

    #[test]
    fn test_purchase_limits() {
        let (book, _) = book();
        let org = Uuid::new_v4();
        assert!(book.purchase(org, tl(99)).is_err());
        assert!(book.purchase(org, tl(10_001)).is_err());
        assert!(book.purchase(org, tl(100)).is_ok());
    }

    #[test]
    fn test_mark_paid_credits_exactly_once() {
        let (book, credits) = book();
        let org = Uuid::new_v4();
        credits.open_account(org);
        let inv = book.purchase(org, tl(1_000)).unwrap();
        let admin = Uuid::new_v4();

        let paid = book
            .mark_paid(
                inv.id,
                admin,
                PaymentConfirmation {
                    method: Some("bank_transfer".into()),
                    reference: Some("EFT-1".into()),
                    notes: None,
                },
            )
            .unwrap();
        assert_eq!(paid.status, CreditInvoiceStatus::Paid);
        assert_eq!(paid.marked_paid_by, Some(admin));
        assert_eq!(credits.balance(org).unwrap(), tl(1_000));

        assert!(matches!(
            book.mark_paid(inv.id, admin, PaymentConfirmation::default()),
            Err(TripdeskError::InvalidTransition { .. })
        ));
        assert_eq!(credits.balance(org).unwrap(), tl(1_000));
        assert_eq!(credits.account(org).unwrap().total_purchased, tl(1_000));
    }

    #[test]
    fn test_failed_deposit_leaves_invoice_pending() {
        let (book, _) = book();
        // no credit account opened
        let inv = book.purchase(Uuid::new_v4(), tl(1_000)).unwrap();
        assert!(book.mark_paid(inv.id, Uuid::new_v4(), PaymentConfirmation::default()).is_err());
        assert_eq!(book.get(inv.id).unwrap().status, CreditInvoiceStatus::Pending);
    }

    #[test]
    fn test_cancel_and_pending() {
        let (book, _) = book();
        let org = Uuid::new_v4();
        let a = book.purchase(org, tl(200)).unwrap();
        let b = book.purchase(org, tl(300)).unwrap();
        book.cancel(a.id).unwrap();
        assert!(book.cancel(a.id).is_err());

        let pending = book.pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, b.id);
        assert_eq!(book.list(org).len(), 2);
        assert_eq!(book.total_by_status(CreditInvoiceStatus::Pending).unwrap(), tl(360));
    }
}
