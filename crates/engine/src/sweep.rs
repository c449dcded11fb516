//! Periodic maintenance: everything that changes state because time passed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use tripdesk_billing::RenewalOutcome;

use crate::Tripdesk;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SweepReport {
    pub quotes_expired: usize,
    pub invoices_overdue: usize,
    pub subscriptions_renewed: usize,
    pub subscriptions_cancelled: usize,
    pub subscriptions_past_due: usize,
    pub subscription_invoices: usize,
    pub rate_limit_windows_purged: usize,
    pub ran_at: Option<DateTime<Utc>>,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.quotes_expired == 0
            && self.invoices_overdue == 0
            && self.subscriptions_renewed == 0
            && self.subscriptions_cancelled == 0
            && self.subscriptions_past_due == 0
            && self.rate_limit_windows_purged == 0
    }
}

impl Tripdesk {
    /// Expire lapsed quotes, flag overdue receivables, roll subscription
    /// periods (billing each renewed priced period) and drop stale rate-limit
    /// windows.
    pub fn sweep(&self, now: DateTime<Utc>) -> SweepReport {
        let today = now.date_naive();
        let mut report = SweepReport {
            ran_at: Some(now),
            ..Default::default()
        };

        for quote in self.quotes.expire_due(today) {
            self.record(
                None,
                quote.organization_id,
                "quote_expire",
                "quote",
                quote.id,
                json!({ "quote_number": quote.quote_number, "valid_until": quote.valid_until }),
            );
            report.quotes_expired += 1;
        }

        for invoice in self.receivables.mark_overdue(today) {
            self.record(
                None,
                invoice.organization_id,
                "invoice_overdue",
                "customer_invoice",
                invoice.id,
                json!({ "invoice_number": invoice.invoice_number, "balance_due": invoice.balance_due }),
            );
            report.invoices_overdue += 1;
        }

        for renewal in self.subscriptions.renew_due(now) {
            let sub = &renewal.subscription;
            match renewal.outcome {
                RenewalOutcome::Renewed => {
                    report.subscriptions_renewed += 1;
                    if sub.price.is_positive() {
                        match self.credit_invoices.bill_subscription(sub.organization_id, sub.price) {
                            Ok(_) => report.subscription_invoices += 1,
                            Err(e) => {
                                warn!(subscription_id = %sub.id, error = %e, "Subscription invoice failed")
                            }
                        }
                    }
                }
                RenewalOutcome::Cancelled => report.subscriptions_cancelled += 1,
                RenewalOutcome::PastDue => report.subscriptions_past_due += 1,
            }
            self.record(
                None,
                sub.organization_id,
                "subscription_renewal",
                "subscription",
                sub.id,
                json!({ "outcome": renewal.outcome, "period_end": sub.current_period_end }),
            );
        }

        report.rate_limit_windows_purged = self.public_limiter.cleanup(now);

        metrics::counter!("sweeps.completed").increment(1);
        if !report.is_empty() {
            info!(
                quotes_expired = report.quotes_expired,
                invoices_overdue = report.invoices_overdue,
                renewed = report.subscriptions_renewed,
                cancelled = report.subscriptions_cancelled,
                past_due = report.subscriptions_past_due,
                "Sweep finished"
            );
        }
        report
    }
}
