//! Quote price calculation.
//!
//! Every line is turned into a group total according to its charge basis,
//! with child discounts applied to per-head charges, and totals are grouped by
//! category. All arithmetic is in integer minor units.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use tripdesk_core::money::BPS_SCALE;
use tripdesk_core::{Currency, Money, TripdeskError, TripdeskResult};

use crate::catalog::{ChargeBasis, ItemKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceCategory {
    Hotels,
    Tours,
    Transport,
    Guides,
    EntranceFees,
    Meals,
    Extras,
}

impl ItemKind {
    pub fn category(&self) -> PriceCategory {
        match self {
            ItemKind::Hotel => PriceCategory::Hotels,
            ItemKind::Tour => PriceCategory::Tours,
            ItemKind::Vehicle | ItemKind::Transfer => PriceCategory::Transport,
            ItemKind::Guide => PriceCategory::Guides,
            ItemKind::EntranceFee => PriceCategory::EntranceFees,
            ItemKind::Meal | ItemKind::Restaurant => PriceCategory::Meals,
            ItemKind::Extra => PriceCategory::Extras,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChildDiscount {
    Percentage { bps: i64 },
    Fixed { amount: Money },
}

/// Discount for children whose age falls in `[min_age, max_age]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildSlab {
    pub label: String,
    pub min_age: u32,
    pub max_age: u32,
    pub discount: ChildDiscount,
}

impl ChildSlab {
    pub fn validate(&self) -> TripdeskResult<()> {
        if self.min_age > self.max_age || self.max_age > 17 {
            return Err(TripdeskError::validation(format!(
                "child slab '{}' has an invalid age range",
                self.label
            )));
        }
        match self.discount {
            ChildDiscount::Percentage { bps } if !(0..=BPS_SCALE).contains(&bps) => Err(
                TripdeskError::validation("child discount percentage must be 0-100%"),
            ),
            ChildDiscount::Fixed { amount } if amount.is_negative() => Err(
                TripdeskError::validation("child discount amount cannot be negative"),
            ),
            _ => Ok(()),
        }
    }

    fn covers(&self, age: u32) -> bool {
        self.min_age <= age && age <= self.max_age
    }

    /// The child's charge for a full per-head charge. Never below zero.
    fn apply(&self, charge: Money) -> TripdeskResult<Money> {
        let discount = match self.discount {
            ChildDiscount::Percentage { bps } => charge.percent_bps(bps),
            ChildDiscount::Fixed { amount } => amount.min(charge),
        };
        let discounted = charge.checked_sub(discount)?;
        Ok(if discounted.is_negative() {
            Money::zero(charge.currency)
        } else {
            discounted
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Party {
    pub adults: u32,
    #[serde(default)]
    pub children_ages: Vec<u32>,
}

impl Party {
    pub fn heads(&self) -> u32 {
        self.adults + self.children_ages.len() as u32
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteLine {
    pub kind: ItemKind,
    pub description: String,
    pub unit_price: Money,
    /// Heads for per-person lines (0 = whole party), units for group lines.
    pub quantity: u32,
    /// Nights for hotel lines.
    pub nights: u32,
    #[serde(default)]
    pub item_id: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteDay {
    pub day_number: u32,
    pub date: Option<NaiveDate>,
    pub city: String,
    pub lines: Vec<QuoteLine>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceBreakdown {
    pub currency: Currency,
    /// Group totals per category.
    pub categories: BTreeMap<PriceCategory, Money>,
    pub total: Money,
    pub per_person: Money,
    pub heads: u32,
}

impl PriceBreakdown {
    pub fn category_total(&self, category: PriceCategory) -> Money {
        self.categories
            .get(&category)
            .copied()
            .unwrap_or(Money::zero(self.currency))
    }
}

fn child_charge(full: Money, age: u32, slabs: &[ChildSlab]) -> TripdeskResult<Money> {
    match slabs.iter().find(|s| s.covers(age)) {
        Some(slab) => slab.apply(full),
        None => Ok(full),
    }
}

/// Group total for one line.
fn line_total(line: &QuoteLine, party: &Party, slabs: &[ChildSlab]) -> TripdeskResult<Money> {
    let unit = line.unit_price;
    match line.kind.basis() {
        ChargeBasis::PerPersonPerNight => {
            let nights = if line.nights > 0 {
                line.nights
            } else {
                line.quantity.max(1)
            };
            let per_head = unit.times(i64::from(nights))?;
            let mut total = per_head.times(i64::from(party.adults))?;
            for age in &party.children_ages {
                total = total.checked_add(child_charge(per_head, *age, slabs)?)?;
            }
            Ok(total)
        }
        ChargeBasis::PerPerson => {
            let heads = if line.quantity == 0 {
                party.heads()
            } else {
                line.quantity
            };
            // Adults are counted first; any heads beyond them are the party's children.
            let children = heads
                .saturating_sub(party.adults)
                .min(party.children_ages.len() as u32) as usize;
            let full_heads = heads - children as u32;
            let mut total = unit.times(i64::from(full_heads))?;
            for age in party.children_ages.iter().take(children) {
                total = total.checked_add(child_charge(unit, *age, slabs)?)?;
            }
            Ok(total)
        }
        ChargeBasis::PerGroup => unit.times(i64::from(line.quantity.max(1))),
    }
}

/// Price every line of `days` for `party`.
pub fn calculate(
    currency: Currency,
    days: &[QuoteDay],
    party: &Party,
    slabs: &[ChildSlab],
) -> TripdeskResult<PriceBreakdown> {
    if party.adults == 0 {
        return Err(TripdeskError::validation("at least one adult is required"));
    }

    let mut categories: BTreeMap<PriceCategory, Money> = BTreeMap::new();
    for line in days.iter().flat_map(|d| d.lines.iter()) {
        if line.unit_price.currency != currency {
            return Err(TripdeskError::CurrencyMismatch {
                expected: currency,
                found: line.unit_price.currency,
            });
        }
        if line.unit_price.is_negative() {
            return Err(TripdeskError::validation(format!(
                "line '{}' has a negative price",
                line.description
            )));
        }
        let amount = line_total(line, party, slabs)?;
        let slot = categories
            .entry(line.kind.category())
            .or_insert(Money::zero(currency));
        *slot = slot.checked_add(amount)?;
    }

    let total = Money::sum(currency, categories.values().copied())?;
    let heads = party.heads();
    Ok(PriceBreakdown {
        currency,
        categories,
        total,
        per_person: total.split(heads),
        heads,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eur(major: i64) -> Money {
        Money::from_major(major, Currency::Eur)
    }

    fn line(kind: ItemKind, unit: Money, quantity: u32, nights: u32) -> QuoteLine {
        QuoteLine {
            kind,
            description: format!("{kind:?}"),
            unit_price: unit,
            quantity,
            nights,
            item_id: None,
        }
    }

    fn half_price_kids() -> Vec<ChildSlab> {
        vec![ChildSlab {
            label: "2-11".into(),
            min_age: 2,
            max_age: 11,
            discount: ChildDiscount::Percentage { bps: 5_000 },
        }]
    }

    #[test]
    fn test_basis_rules_adults_only() {
        let party = Party {
            adults: 30,
            children_ages: vec![],
        };
        let days = vec![QuoteDay {
            day_number: 1,
            date: None,
            city: "Istanbul".into(),
            lines: vec![
                line(ItemKind::Hotel, eur(230), 1, 1),
                line(ItemKind::Tour, eur(150), 30, 0),
                line(ItemKind::Vehicle, eur(250), 1, 0),
            ],
        }];

        let b = calculate(Currency::Eur, &days, &party, &[]).unwrap();
        assert_eq!(b.category_total(PriceCategory::Hotels), eur(6_900));
        assert_eq!(b.category_total(PriceCategory::Tours), eur(4_500));
        assert_eq!(b.category_total(PriceCategory::Transport), eur(250));
        assert_eq!(b.total, eur(11_650));
        // 11650 / 30 = 388.333.. rounds to 388.33
        assert_eq!(b.per_person.minor, 38_833);
    }

    #[test]
    fn test_child_slabs_reduce_per_head_charges() {
        let party = Party {
            adults: 2,
            children_ages: vec![5, 14],
        };
        let days = vec![QuoteDay {
            day_number: 1,
            date: None,
            city: "Cappadocia".into(),
            lines: vec![
                line(ItemKind::Hotel, eur(100), 0, 3),
                line(ItemKind::Tour, eur(50), 0, 0),
                line(ItemKind::Guide, eur(150), 1, 0),
            ],
        }];

        let b = calculate(Currency::Eur, &days, &party, &half_price_kids()).unwrap();
        // 3 full payers at 300 plus one child at 150
        assert_eq!(b.category_total(PriceCategory::Hotels), eur(1_050));
        // 3 full payers at 50 plus one child at 25
        assert_eq!(b.category_total(PriceCategory::Tours), eur(175));
        // group charges are never discounted
        assert_eq!(b.category_total(PriceCategory::Guides), eur(150));
        assert_eq!(b.total, eur(1_375));
        assert_eq!(b.heads, 4);
    }

    #[test]
    fn test_fixed_child_discount_floors_at_zero() {
        let slabs = vec![ChildSlab {
            label: "infant".into(),
            min_age: 0,
            max_age: 1,
            discount: ChildDiscount::Fixed { amount: eur(500) },
        }];
        let party = Party {
            adults: 1,
            children_ages: vec![1],
        };
        let days = vec![QuoteDay {
            day_number: 1,
            date: None,
            city: "Antalya".into(),
            lines: vec![line(ItemKind::Meal, eur(30), 0, 0)],
        }];
        let b = calculate(Currency::Eur, &days, &party, &slabs).unwrap();
        assert_eq!(b.total, eur(30));
    }

    #[test]
    fn test_mixed_currency_rejected() {
        let party = Party {
            adults: 2,
            children_ages: vec![],
        };
        let days = vec![QuoteDay {
            day_number: 1,
            date: None,
            city: "Izmir".into(),
            lines: vec![line(ItemKind::Transfer, Money::from_major(40, Currency::Usd), 1, 0)],
        }];
        assert!(matches!(
            calculate(Currency::Eur, &days, &party, &[]),
            Err(TripdeskError::CurrencyMismatch { .. })
        ));
    }

    #[test]
    fn test_slab_validation() {
        let bad = ChildSlab {
            label: "bad".into(),
            min_age: 12,
            max_age: 3,
            discount: ChildDiscount::Percentage { bps: 1_000 },
        };
        assert!(bad.validate().is_err());
        assert!(half_price_kids()[0].validate().is_ok());
    }
}
