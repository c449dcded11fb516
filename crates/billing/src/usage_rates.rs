//! Per-unit credit prices for metered actions, and the itinerary charge that
//! uses them.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use tripdesk_core::{Money, TripdeskError, TripdeskResult};

use crate::credits::CreditLedger;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageRate {
    pub id: Uuid,
    pub item_type: String,
    pub price_per_unit: Money,
    pub valid_from: DateTime<Utc>,
    /// Exclusive. `None` while the rate is open.
    pub valid_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl UsageRate {
    fn applies_at(&self, at: DateTime<Utc>) -> bool {
        self.valid_from <= at && self.valid_until.map_or(true, |end| at < end)
    }
}

/// A completed itinerary charge. Keyed by itinerary so it is taken once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItineraryCharge {
    pub itinerary_id: Uuid,
    pub organization_id: Uuid,
    pub rate_id: Uuid,
    /// `None` when the rate was free and no credits moved.
    pub transaction_id: Option<Uuid>,
    pub amount: Money,
    pub charged_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageRateState {
    pub rates: Vec<UsageRate>,
    pub charges: Vec<ItineraryCharge>,
}

pub struct UsageRateBook {
    rates: DashMap<Uuid, UsageRate>,
    charges: DashMap<Uuid, ItineraryCharge>,
    posting: Mutex<()>,
    credits: Arc<CreditLedger>,
}

impl UsageRateBook {
    pub fn new(credits: Arc<CreditLedger>) -> Self {
        Self {
            rates: DashMap::new(),
            charges: DashMap::new(),
            posting: Mutex::new(()),
            credits,
        }
    }

    pub fn from_state(state: UsageRateState, credits: Arc<CreditLedger>) -> Self {
        let book = Self::new(credits);
        for rate in state.rates {
            book.rates.insert(rate.id, rate);
        }
        for charge in state.charges {
            book.charges.insert(charge.itinerary_id, charge);
        }
        book
    }

    pub fn export(&self) -> UsageRateState {
        let mut rates: Vec<UsageRate> = self.rates.iter().map(|e| e.value().clone()).collect();
        rates.sort_by(|a, b| a.item_type.cmp(&b.item_type).then(a.valid_from.cmp(&b.valid_from)));
        let mut charges: Vec<ItineraryCharge> = self.charges.iter().map(|e| e.value().clone()).collect();
        charges.sort_by_key(|c| (c.charged_at, c.itinerary_id));
        UsageRateState { rates, charges }
    }

    /// Publish a new rate, closing the item type's open rate at `valid_from`.
    pub fn set_rate(
        &self,
        item_type: &str,
        price_per_unit: Money,
        valid_from: DateTime<Utc>,
    ) -> TripdeskResult<UsageRate> {
        let item_type = item_type.trim();
        if item_type.is_empty() {
            return Err(TripdeskError::validation("item type is required"));
        }
        if price_per_unit.currency != self.credits.currency() {
            return Err(TripdeskError::CurrencyMismatch {
                expected: self.credits.currency(),
                found: price_per_unit.currency,
            });
        }
        if price_per_unit.is_negative() {
            return Err(TripdeskError::validation("rate cannot be negative"));
        }

        let _posting = self.posting.lock();
        for mut entry in self.rates.iter_mut() {
            let rate = entry.value_mut();
            if rate.item_type == item_type && rate.valid_until.is_none() {
                if rate.valid_from >= valid_from {
                    return Err(TripdeskError::Conflict(format!(
                        "open {item_type} rate starts at {}; new rate must start later",
                        rate.valid_from
                    )));
                }
                rate.valid_until = Some(valid_from);
            }
        }
        let rate = UsageRate {
            id: Uuid::new_v4(),
            item_type: item_type.to_string(),
            price_per_unit,
            valid_from,
            valid_until: None,
            created_at: Utc::now(),
        };
        self.rates.insert(rate.id, rate.clone());
        info!(item_type = %rate.item_type, price = %rate.price_per_unit, valid_from = %rate.valid_from, "Usage rate set");
        Ok(rate)
    }

    /// The rate in force for `item_type` at `at`.
    pub fn current(&self, item_type: &str, at: DateTime<Utc>) -> TripdeskResult<UsageRate> {
        self.rates
            .iter()
            .filter(|e| e.value().item_type == item_type && e.value().applies_at(at))
            .max_by_key(|e| e.value().valid_from)
            .map(|e| e.value().clone())
            .ok_or_else(|| TripdeskError::not_found("usage rate", item_type))
    }

    pub fn list(&self) -> Vec<UsageRate> {
        self.export().rates
    }

    pub fn charge_for(&self, itinerary_id: Uuid) -> Option<ItineraryCharge> {
        self.charges.get(&itinerary_id).map(|e| e.value().clone())
    }

    /// Deduct the current rate for one itinerary. Repeats with the same
    /// itinerary id return the original charge. A zero rate is recorded
    /// without touching the credit balance.
    pub fn charge_itinerary(
        &self,
        organization_id: Uuid,
        itinerary_id: Uuid,
        item_type: &str,
        created_by: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> TripdeskResult<ItineraryCharge> {
        let _posting = self.posting.lock();
        if let Some(existing) = self.charge_for(itinerary_id) {
            return Ok(existing);
        }
        let rate = self.current(item_type, now)?;
        let transaction_id = if rate.price_per_unit.is_zero() {
            None
        } else {
            let tx = self.credits.deduct(
                organization_id,
                rate.price_per_unit,
                format!("{item_type} {itinerary_id}"),
                Some(itinerary_id),
                created_by,
            )?;
            Some(tx.id)
        };
        let charge = ItineraryCharge {
            itinerary_id,
            organization_id,
            rate_id: rate.id,
            transaction_id,
            amount: rate.price_per_unit,
            charged_at: now,
        };
        self.charges.insert(itinerary_id, charge.clone());
        metrics::counter!("itineraries.charged").increment(1);
        Ok(charge)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credits::{CreditGrant, CreditTxKind};
    use chrono::TimeZone;
    use tripdesk_core::Currency;

    const ITEM: &str = "itinerary_generation";

    fn tl(major: i64) -> Money {
        Money::from_major(major, Currency::Try)
    }

    fn at(month: u32, day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, month, day, 0, 0, 0).unwrap()
    }

    fn setup(balance: i64) -> (UsageRateBook, Arc<CreditLedger>, Uuid) {
        let credits = Arc::new(CreditLedger::new(Currency::Try));
        let org = Uuid::new_v4();
        credits.open_account(org);
        if balance > 0 {
            credits
                .add(
                    org,
                    CreditGrant {
                        kind: CreditTxKind::Deposit,
                        amount: tl(balance),
                        description: "seed".into(),
                        invoice_id: None,
                        created_by: None,
                    },
                )
                .unwrap();
        }
        (UsageRateBook::new(credits.clone()), credits, org)
    }

    #[test]
    fn test_set_rate_closes_previous() {
        let (book, _, _) = setup(0);
        let first = book.set_rate(ITEM, tl(10), at(1, 1)).unwrap();
        book.set_rate(ITEM, tl(15), at(3, 1)).unwrap();

        assert_eq!(book.current(ITEM, at(2, 1)).unwrap().id, first.id);
        assert_eq!(book.current(ITEM, at(3, 1)).unwrap().price_per_unit, tl(15));
        assert!(book.current(ITEM, at(1, 1) - chrono::Duration::seconds(1)).is_err());
        assert!(book.current("pdf_export", at(3, 1)).is_err());
        assert!(book.set_rate(ITEM, tl(20), at(2, 1)).is_err());
    }

    #[test]
    fn test_charge_is_idempotent_per_itinerary() {
        let (book, credits, org) = setup(100);
        book.set_rate(ITEM, tl(25), at(1, 1)).unwrap();
        let itinerary = Uuid::new_v4();

        let first = book.charge_itinerary(org, itinerary, ITEM, None, at(2, 1)).unwrap();
        let again = book.charge_itinerary(org, itinerary, ITEM, None, at(2, 1)).unwrap();
        assert!(first.transaction_id.is_some());
        assert_eq!(first.transaction_id, again.transaction_id);
        assert_eq!(credits.balance(org).unwrap(), tl(75));
    }

    #[test]
    fn test_free_rate_charges_nothing() {
        let (book, credits, org) = setup(0);
        book.set_rate(ITEM, tl(0), at(1, 1)).unwrap();
        let itinerary = Uuid::new_v4();

        let charge = book.charge_itinerary(org, itinerary, ITEM, None, at(2, 1)).unwrap();
        assert!(charge.transaction_id.is_none());
        assert!(charge.amount.is_zero());
        assert_eq!(credits.balance(org).unwrap(), tl(0));
        assert!(book.charge_for(itinerary).is_some());
    }

    #[test]
    fn test_charge_requires_credits_and_rate() {
        let (book, credits, org) = setup(10);
        assert!(matches!(
            book.charge_itinerary(org, Uuid::new_v4(), ITEM, None, at(2, 1)),
            Err(TripdeskError::NotFound { .. })
        ));
        book.set_rate(ITEM, tl(25), at(1, 1)).unwrap();
        let itinerary = Uuid::new_v4();
        assert!(matches!(
            book.charge_itinerary(org, itinerary, ITEM, None, at(2, 1)),
            Err(TripdeskError::InsufficientCredits { .. })
        ));
        assert!(book.charge_for(itinerary).is_none());
        assert_eq!(credits.balance(org).unwrap(), tl(10));
    }
}
