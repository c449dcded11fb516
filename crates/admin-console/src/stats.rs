//! Cross-tenant overview for the platform operator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tripdesk_billing::{CreditInvoiceBook, CreditInvoiceStatus, CreditLedger};
use tripdesk_core::{Money, TripdeskResult};
use tripdesk_finance::{QuoteBook, QuoteStatus};
use tripdesk_platform::tenancy::{OrgStatus, OrganizationRegistry};
use tripdesk_platform::StaffDirectory;

/// Organization count by status.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusBreakdown {
    pub active: usize,
    pub trial: usize,
    pub suspended: usize,
    pub cancelled: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformStats {
    pub total_organizations: usize,
    pub organizations: StatusBreakdown,
    pub users: usize,
    pub credits_outstanding: Money,
    pub pending_invoice_total: Money,
    pub paid_revenue: Money,
    pub quotes_by_status: Vec<(QuoteStatus, usize)>,
    pub generated_at: DateTime<Utc>,
}

pub fn platform_stats(
    orgs: &OrganizationRegistry,
    staff: &StaffDirectory,
    credits: &CreditLedger,
    invoices: &CreditInvoiceBook,
    quotes: &QuoteBook,
) -> TripdeskResult<PlatformStats> {
    let mut breakdown = StatusBreakdown::default();
    let all = orgs.list();
    for org in &all {
        match org.status {
            OrgStatus::Active => breakdown.active += 1,
            OrgStatus::Trial => breakdown.trial += 1,
            OrgStatus::Suspended => breakdown.suspended += 1,
            OrgStatus::Cancelled => breakdown.cancelled += 1,
        }
    }

    Ok(PlatformStats {
        total_organizations: all.len(),
        organizations: breakdown,
        users: staff.count(),
        credits_outstanding: credits.total_outstanding()?,
        pending_invoice_total: invoices.total_by_status(CreditInvoiceStatus::Pending)?,
        paid_revenue: invoices.total_by_status(CreditInvoiceStatus::Paid)?,
        quotes_by_status: quotes.count_by_status(None),
        generated_at: Utc::now(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tripdesk_core::config::BillingConfig;
    use tripdesk_core::{Currency, DocumentSequence};
    use tripdesk_platform::NewOrganization;

    #[test]
    fn test_platform_stats() {
        let orgs = OrganizationRegistry::new();
        let staff = StaffDirectory::new();
        let numbers = Arc::new(DocumentSequence::new());
        let credits = Arc::new(CreditLedger::new(Currency::Try));
        let invoices = CreditInvoiceBook::new(numbers.clone(), credits.clone(), BillingConfig::default());
        let quotes = QuoteBook::new(numbers, "QT", 30);

        let mut ids = Vec::new();
        for (sub, trial) in [("alpha", false), ("beta", true), ("gamma", false)] {
            let org = orgs
                .create(NewOrganization {
                    name: sub.into(),
                    subdomain: sub.into(),
                    contact_email: format!("ops@{sub}.example"),
                    default_currency: Currency::Eur,
                    trial,
                })
                .unwrap();
            credits.open_account(org.id);
            ids.push(org.id);
        }
        orgs.suspend(ids[2]).unwrap();

        let paid = invoices.purchase(ids[0], Money::from_major(1_000, Currency::Try)).unwrap();
        invoices
            .mark_paid(paid.id, uuid::Uuid::new_v4(), Default::default())
            .unwrap();
        invoices.purchase(ids[1], Money::from_major(100, Currency::Try)).unwrap();

        let stats = platform_stats(&orgs, &staff, &credits, &invoices, &quotes).unwrap();
        assert_eq!(stats.total_organizations, 3);
        assert_eq!(stats.organizations.active, 1);
        assert_eq!(stats.organizations.trial, 1);
        assert_eq!(stats.organizations.suspended, 1);
        assert_eq!(stats.credits_outstanding, Money::from_major(1_000, Currency::Try));
        assert_eq!(stats.paid_revenue, Money::from_major(1_200, Currency::Try));
        assert_eq!(stats.pending_invoice_total, Money::from_major(120, Currency::Try));
    }
}
