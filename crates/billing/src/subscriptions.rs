//! Monthly subscriptions that grant a credit allocation each period.

use std::sync::Arc;

use chrono::{DateTime, Months, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use tripdesk_core::{Money, TripdeskError, TripdeskResult};

use crate::credits::{CreditGrant, CreditLedger, CreditTxKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    PastDue,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub plan: String,
    pub monthly_credits: Money,
    pub price: Money,
    pub status: SubscriptionStatus,
    pub current_period_start: DateTime<Utc>,
    pub current_period_end: DateTime<Utc>,
    pub cancel_at_period_end: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewSubscription {
    pub plan: String,
    pub monthly_credits: Money,
    pub price: Money,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenewalOutcome {
    Renewed,
    Cancelled,
    PastDue,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Renewal {
    pub subscription: Subscription,
    pub outcome: RenewalOutcome,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubscriptionState {
    pub subscriptions: Vec<Subscription>,
}

pub struct SubscriptionBook {
    subscriptions: DashMap<Uuid, Subscription>,
    posting: Mutex<()>,
    credits: Arc<CreditLedger>,
}

fn one_month_after(at: DateTime<Utc>) -> TripdeskResult<DateTime<Utc>> {
    at.checked_add_months(Months::new(1))
        .ok_or_else(|| TripdeskError::validation("subscription period out of range"))
}

impl SubscriptionBook {
    pub fn new(credits: Arc<CreditLedger>) -> Self {
        Self {
            subscriptions: DashMap::new(),
            posting: Mutex::new(()),
            credits,
        }
    }

    pub fn from_state(state: SubscriptionState, credits: Arc<CreditLedger>) -> Self {
        let book = Self::new(credits);
        for sub in state.subscriptions {
            book.subscriptions.insert(sub.id, sub);
        }
        book
    }

    pub fn export(&self) -> SubscriptionState {
        let mut subscriptions: Vec<Subscription> =
            self.subscriptions.iter().map(|e| e.value().clone()).collect();
        subscriptions.sort_by_key(|s| (s.created_at, s.id));
        SubscriptionState { subscriptions }
    }

    fn allocate(&self, sub: &Subscription, created_by: Option<Uuid>) -> TripdeskResult<()> {
        if !sub.monthly_credits.is_positive() {
            return Ok(());
        }
        self.credits.add(
            sub.organization_id,
            CreditGrant {
                kind: CreditTxKind::Bonus,
                amount: sub.monthly_credits,
                description: format!(
                    "{} allocation {} to {}",
                    sub.plan,
                    sub.current_period_start.date_naive(),
                    sub.current_period_end.date_naive()
                ),
                invoice_id: None,
                created_by,
            },
        )?;
        Ok(())
    }

    /// Start a subscription and grant its first allocation.
    pub fn create(
        &self,
        organization_id: Uuid,
        new: NewSubscription,
        created_by: Uuid,
        now: DateTime<Utc>,
    ) -> TripdeskResult<Subscription> {
        if new.plan.trim().is_empty() {
            return Err(TripdeskError::validation("plan name is required"));
        }
        if new.monthly_credits.is_negative() || new.price.is_negative() {
            return Err(TripdeskError::validation("subscription amounts cannot be negative"));
        }
        let _posting = self.posting.lock();
        if self.active_for(organization_id).is_some() {
            return Err(TripdeskError::Conflict(format!(
                "organization {organization_id} already has an active subscription"
            )));
        }

        let sub = Subscription {
            id: Uuid::new_v4(),
            organization_id,
            plan: new.plan.trim().to_string(),
            monthly_credits: new.monthly_credits,
            price: new.price,
            status: SubscriptionStatus::Active,
            current_period_start: now,
            current_period_end: one_month_after(now)?,
            cancel_at_period_end: false,
            created_at: now,
            updated_at: now,
        };
        self.allocate(&sub, Some(created_by))?;
        self.subscriptions.insert(sub.id, sub.clone());
        info!(org_id = %organization_id, subscription_id = %sub.id, plan = %sub.plan, "Subscription created");
        Ok(sub)
    }

    pub fn get(&self, id: Uuid) -> TripdeskResult<Subscription> {
        self.subscriptions
            .get(&id)
            .map(|e| e.value().clone())
            .ok_or_else(|| TripdeskError::not_found("subscription", id))
    }

    /// The organization's Active or PastDue subscription.
    pub fn active_for(&self, organization_id: Uuid) -> Option<Subscription> {
        self.subscriptions
            .iter()
            .find(|e| {
                let s = e.value();
                s.organization_id == organization_id && s.status != SubscriptionStatus::Cancelled
            })
            .map(|e| e.value().clone())
    }

    pub fn list(&self) -> Vec<Subscription> {
        self.export().subscriptions
    }

    /// Stop renewing at the end of the current period.
    pub fn cancel(&self, id: Uuid) -> TripdeskResult<Subscription> {
        let _posting = self.posting.lock();
        let mut sub = self
            .subscriptions
            .get_mut(&id)
            .ok_or_else(|| TripdeskError::not_found("subscription", id))?;
        if sub.status == SubscriptionStatus::Cancelled {
            return Err(TripdeskError::transition(
                "subscription",
                sub.status,
                SubscriptionStatus::Cancelled,
            ));
        }
        sub.cancel_at_period_end = true;
        sub.updated_at = Utc::now();
        info!(subscription_id = %id, period_end = %sub.current_period_end, "Subscription set to cancel at period end");
        Ok(sub.clone())
    }

    /// End the organization's open subscription immediately, with no further
    /// renewals or allocations.
    pub fn end_for_organization(&self, organization_id: Uuid, now: DateTime<Utc>) -> Option<Subscription> {
        let _posting = self.posting.lock();
        let mut entry = self.subscriptions.iter_mut().find(|e| {
            let s = e.value();
            s.organization_id == organization_id && s.status != SubscriptionStatus::Cancelled
        })?;
        let sub = entry.value_mut();
        sub.status = SubscriptionStatus::Cancelled;
        sub.cancel_at_period_end = true;
        sub.updated_at = now;
        info!(org_id = %organization_id, subscription_id = %sub.id, "Subscription ended");
        Some(sub.clone())
    }

    /// Roll every lapsed period forward one month at a time, granting an
    /// allocation per period. Subscriptions flagged for cancellation end
    /// instead.
    pub fn renew_due(&self, now: DateTime<Utc>) -> Vec<Renewal> {
        let _posting = self.posting.lock();
        let due: Vec<Uuid> = self
            .subscriptions
            .iter()
            .filter(|e| {
                let s = e.value();
                s.status == SubscriptionStatus::Active && s.current_period_end <= now
            })
            .map(|e| *e.key())
            .collect();

        let mut renewals = Vec::new();
        for id in due {
            let Some(mut sub) = self.subscriptions.get(&id).map(|e| e.value().clone()) else {
                continue;
            };
            while sub.status == SubscriptionStatus::Active && sub.current_period_end <= now {
                let outcome = if sub.cancel_at_period_end {
                    sub.status = SubscriptionStatus::Cancelled;
                    RenewalOutcome::Cancelled
                } else {
                    match one_month_after(sub.current_period_end) {
                        Ok(next_end) => {
                            sub.current_period_start = sub.current_period_end;
                            sub.current_period_end = next_end;
                            match self.allocate(&sub, None) {
                                Ok(()) => RenewalOutcome::Renewed,
                                Err(e) => {
                                    warn!(subscription_id = %id, error = %e, "Subscription allocation failed");
                                    sub.status = SubscriptionStatus::PastDue;
                                    RenewalOutcome::PastDue
                                }
                            }
                        }
                        Err(e) => {
                            warn!(subscription_id = %id, error = %e, "Subscription period overflow");
                            sub.status = SubscriptionStatus::PastDue;
                            RenewalOutcome::PastDue
                        }
                    }
                };
                sub.updated_at = now;
                renewals.push(Renewal {
                    subscription: sub.clone(),
                    outcome,
                });
            }
            self.subscriptions.insert(id, sub);
        }
        if !renewals.is_empty() {
            metrics::counter!("subscriptions.renewals").increment(renewals.len() as u64);
            info!(count = renewals.len(), "Subscriptions processed");
        }
        renewals
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tripdesk_core::Currency;

    fn tl(major: i64) -> Money {
        Money::from_major(major, Currency::Try)
    }

    fn at(month: u32, day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, month, day, 9, 0, 0).unwrap()
    }

    fn setup() -> (SubscriptionBook, Arc<CreditLedger>, Uuid) {
        let credits = Arc::new(CreditLedger::new(Currency::Try));
        let org = Uuid::new_v4();
        credits.open_account(org);
        (SubscriptionBook::new(credits.clone()), credits, org)
    }

    fn plan() -> NewSubscription {
        NewSubscription {
            plan: "Growth".into(),
            monthly_credits: tl(300),
            price: tl(250),
        }
    }

    #[test]
    fn test_create_grants_first_allocation() {
        let (book, credits, org) = setup();
        let sub = book.create(org, plan(), Uuid::new_v4(), at(1, 15)).unwrap();
        assert_eq!(sub.current_period_end, at(2, 15));
        assert_eq!(credits.balance(org).unwrap(), tl(300));
        let history = credits.history(org, 10, 0);
        assert_eq!(history[0].kind, CreditTxKind::Bonus);
        assert!(credits.account(org).unwrap().total_purchased.is_zero());

        assert!(matches!(
            book.create(org, plan(), Uuid::new_v4(), at(1, 16)),
            Err(TripdeskError::Conflict(_))
        ));
    }

    #[test]
    fn test_renew_rolls_each_missed_period() {
        let (book, credits, org) = setup();
        book.create(org, plan(), Uuid::new_v4(), at(1, 15)).unwrap();

        assert!(book.renew_due(at(2, 14)).is_empty());
        let renewals = book.renew_due(at(3, 20));
        assert_eq!(renewals.len(), 2);
        assert!(renewals.iter().all(|r| r.outcome == RenewalOutcome::Renewed));
        let sub = book.active_for(org).unwrap();
        assert_eq!(sub.current_period_start, at(3, 15));
        assert_eq!(sub.current_period_end, at(4, 15));
        assert_eq!(credits.balance(org).unwrap(), tl(900));
    }

    #[test]
    fn test_cancel_at_period_end() {
        let (book, credits, org) = setup();
        let sub = book.create(org, plan(), Uuid::new_v4(), at(1, 15)).unwrap();
        book.cancel(sub.id).unwrap();

        let renewals = book.renew_due(at(2, 15));
        assert_eq!(renewals.len(), 1);
        assert_eq!(renewals[0].outcome, RenewalOutcome::Cancelled);
        assert_eq!(book.get(sub.id).unwrap().status, SubscriptionStatus::Cancelled);
        assert_eq!(credits.balance(org).unwrap(), tl(300));
        assert!(book.active_for(org).is_none());
        assert!(book.create(org, plan(), Uuid::new_v4(), at(2, 16)).is_ok());
    }

    #[test]
    fn test_end_for_organization_stops_renewals() {
        let (book, credits, org) = setup();
        let sub = book.create(org, plan(), Uuid::new_v4(), at(1, 15)).unwrap();

        let ended = book.end_for_organization(org, at(1, 20)).unwrap();
        assert_eq!(ended.id, sub.id);
        assert_eq!(ended.status, SubscriptionStatus::Cancelled);
        assert!(book.end_for_organization(org, at(1, 21)).is_none());

        assert!(book.renew_due(at(5, 1)).is_empty());
        assert_eq!(credits.balance(org).unwrap(), tl(300));
    }
}
