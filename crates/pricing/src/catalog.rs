//! Inventory catalog: the hotels, tours, guides, vehicles and extras an
//! operator sells, each with a base price and optional seasonal rates.

use chrono::{DateTime, NaiveDate, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use tripdesk_core::{Money, TripdeskError, TripdeskResult};

use crate::calculator::ChildSlab;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    Hotel,
    Tour,
    Guide,
    Vehicle,
    Transfer,
    Meal,
    Restaurant,
    EntranceFee,
    Extra,
}

/// How a unit price turns into a charge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChargeBasis {
    /// Unit price per head per night.
    PerPersonPerNight,
    /// Unit price per head; quantity is the number of heads.
    PerPerson,
    /// Unit price for the whole group; quantity is the number of units.
    PerGroup,
}

impl ItemKind {
    pub fn basis(&self) -> ChargeBasis {
        match self {
            Self::Hotel => ChargeBasis::PerPersonPerNight,
            Self::Tour | Self::Meal | Self::Restaurant | Self::EntranceFee => ChargeBasis::PerPerson,
            Self::Guide | Self::Vehicle | Self::Transfer | Self::Extra => ChargeBasis::PerGroup,
        }
    }
}

impl std::str::FromStr for ItemKind {
    type Err = TripdeskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "hotel" => Ok(Self::Hotel),
            "tour" => Ok(Self::Tour),
            "guide" => Ok(Self::Guide),
            "vehicle" => Ok(Self::Vehicle),
            "transfer" => Ok(Self::Transfer),
            "meal" => Ok(Self::Meal),
            "restaurant" => Ok(Self::Restaurant),
            "entrance_fee" | "entrance-fee" => Ok(Self::EntranceFee),
            "extra" => Ok(Self::Extra),
            other => Err(TripdeskError::validation(format!("unknown item kind '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeasonalRate {
    pub name: String,
    pub start: NaiveDate,
    /// Inclusive.
    pub end: NaiveDate,
    pub price: Money,
    pub min_stay_nights: u32,
}

impl SeasonalRate {
    fn covers(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryItem {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub kind: ItemKind,
    pub name: String,
    pub city: String,
    /// Star rating, hotels only.
    pub stars: Option<u8>,
    pub base_price: Money,
    pub seasons: Vec<SeasonalRate>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewItem {
    pub kind: ItemKind,
    pub name: String,
    pub city: String,
    pub stars: Option<u8>,
    pub base_price: Money,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PriceSource {
    Seasonal { name: String },
    Base,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedPrice {
    pub price: Money,
    pub source: PriceSource,
}

#[derive(Debug, Clone, Default)]
pub struct ItemFilter {
    pub kind: Option<ItemKind>,
    pub city: Option<String>,
    pub include_inactive: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogState {
    pub items: Vec<InventoryItem>,
    pub child_slabs: Vec<(Uuid, Vec<ChildSlab>)>,
}

pub struct Catalog {
    items: DashMap<Uuid, InventoryItem>,
    child_slabs: DashMap<Uuid, Vec<ChildSlab>>,
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new()
    }
}

impl Catalog {
    pub fn new() -> Self {
        Self {
            items: DashMap::new(),
            child_slabs: DashMap::new(),
        }
    }

    pub fn from_state(state: CatalogState) -> Self {
        let catalog = Self::new();
        for item in state.items {
            catalog.items.insert(item.id, item);
        }
        for (org, slabs) in state.child_slabs {
            catalog.child_slabs.insert(org, slabs);
        }
        catalog
    }

    pub fn export(&self) -> CatalogState {
        let mut items: Vec<InventoryItem> = self.items.iter().map(|e| e.value().clone()).collect();
        items.sort_by_key(|i| (i.created_at, i.id));
        let mut child_slabs: Vec<(Uuid, Vec<ChildSlab>)> = self
            .child_slabs
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();
        child_slabs.sort_by_key(|(org, _)| *org);
        CatalogState { items, child_slabs }
    }

    pub fn add_item(&self, organization_id: Uuid, new: NewItem) -> TripdeskResult<InventoryItem> {
        let name = new.name.trim().to_string();
        if name.is_empty() {
            return Err(TripdeskError::validation("item name is required"));
        }
        if new.base_price.is_negative() {
            return Err(TripdeskError::validation("base price cannot be negative"));
        }
        if let Some(stars) = new.stars {
            if !(1..=5).contains(&stars) {
                return Err(TripdeskError::validation("stars must be 1-5"));
            }
        }
        let now = Utc::now();
        let item = InventoryItem {
            id: Uuid::new_v4(),
            organization_id,
            kind: new.kind,
            name,
            city: new.city.trim().to_string(),
            stars: new.stars,
            base_price: new.base_price,
            seasons: Vec::new(),
            active: true,
            created_at: now,
            updated_at: now,
        };
        info!(org_id = %organization_id, item_id = %item.id, kind = ?item.kind, "Inventory item added");
        self.items.insert(item.id, item.clone());
        Ok(item)
    }

    pub fn get(&self, id: Uuid) -> TripdeskResult<InventoryItem> {
        self.items
            .get(&id)
            .map(|e| e.value().clone())
            .ok_or_else(|| TripdeskError::not_found("inventory item", id))
    }

    /// Change the base price. Seasonal rates must stay in the same currency.
    pub fn update_base_price(&self, id: Uuid, price: Money) -> TripdeskResult<InventoryItem> {
        if price.is_negative() {
            return Err(TripdeskError::validation("base price cannot be negative"));
        }
        let mut item = self
            .items
            .get_mut(&id)
            .ok_or_else(|| TripdeskError::not_found("inventory item", id))?;
        if let Some(season) = item.seasons.iter().find(|s| s.price.currency != price.currency) {
            return Err(TripdeskError::CurrencyMismatch {
                expected: season.price.currency,
                found: price.currency,
            });
        }
        item.base_price = price;
        item.updated_at = Utc::now();
        Ok(item.clone())
    }

    pub fn add_season(&self, id: Uuid, season: SeasonalRate) -> TripdeskResult<InventoryItem> {
        if season.end < season.start {
            return Err(TripdeskError::validation("season ends before it starts"));
        }
        if season.price.is_negative() {
            return Err(TripdeskError::validation("season price cannot be negative"));
        }
        let mut item = self
            .items
            .get_mut(&id)
            .ok_or_else(|| TripdeskError::not_found("inventory item", id))?;
        if season.price.currency != item.base_price.currency {
            return Err(TripdeskError::CurrencyMismatch {
                expected: item.base_price.currency,
                found: season.price.currency,
            });
        }
        info!(item_id = %id, season = %season.name, start = %season.start, end = %season.end, "Season added");
        item.seasons.push(season);
        item.updated_at = Utc::now();
        Ok(item.clone())
    }

    pub fn deactivate(&self, id: Uuid) -> TripdeskResult<InventoryItem> {
        let mut item = self
            .items
            .get_mut(&id)
            .ok_or_else(|| TripdeskError::not_found("inventory item", id))?;
        item.active = false;
        item.updated_at = Utc::now();
        info!(item_id = %id, "Inventory item deactivated");
        Ok(item.clone())
    }

    pub fn list(&self, organization_id: Uuid, filter: &ItemFilter) -> Vec<InventoryItem> {
        let city = filter.city.as_ref().map(|c| c.to_lowercase());
        let mut items: Vec<InventoryItem> = self
            .items
            .iter()
            .filter(|e| {
                let item = e.value();
                item.organization_id == organization_id
                    && (filter.include_inactive || item.active)
                    && filter.kind.map_or(true, |k| item.kind == k)
                    && city.as_ref().map_or(true, |c| &item.city.to_lowercase() == c)
            })
            .map(|e| e.value().clone())
            .collect();
        items.sort_by(|a, b| (a.kind, &a.city, &a.name).cmp(&(b.kind, &b.city, &b.name)));
        items
    }

    /// Price on `date`, ignoring minimum-stay rules.
    pub fn price_on(&self, id: Uuid, date: NaiveDate) -> TripdeskResult<ResolvedPrice> {
        self.price_for_stay(id, date, u32::MAX)
    }

    /// Price on `date` for a stay of `nights`. Among the seasons that cover the
    /// date and whose minimum stay is met, the latest start wins.
    pub fn price_for_stay(&self, id: Uuid, date: NaiveDate, nights: u32) -> TripdeskResult<ResolvedPrice> {
        let item = self.get(id)?;
        Ok(resolve(&item, date, nights))
    }

    pub fn set_child_slabs(&self, organization_id: Uuid, mut slabs: Vec<ChildSlab>) -> TripdeskResult<()> {
        for slab in &slabs {
            slab.validate()?;
        }
        slabs.sort_by_key(|s| s.min_age);
        info!(org_id = %organization_id, slabs = slabs.len(), "Child slabs updated");
        self.child_slabs.insert(organization_id, slabs);
        Ok(())
    }

    pub fn child_slabs(&self, organization_id: Uuid) -> Vec<ChildSlab> {
        self.child_slabs
            .get(&organization_id)
            .map(|e| e.value().clone())
            .unwrap_or_default()
    }
}

pub(crate) fn resolve(item: &InventoryItem, date: NaiveDate, nights: u32) -> ResolvedPrice {
    let season = item
        .seasons
        .iter()
        .filter(|s| s.covers(date) && nights >= s.min_stay_nights)
        .max_by_key(|s| s.start);
    match season {
        Some(s) => ResolvedPrice {
            price: s.price,
            source: PriceSource::Seasonal { name: s.name.clone() },
        },
        None => ResolvedPrice {
            price: item.base_price,
            source: PriceSource::Base,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tripdesk_core::Currency;

    fn date(m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, m, d).unwrap()
    }

    fn hotel(catalog: &Catalog, org: Uuid) -> InventoryItem {
        catalog
            .add_item(
                org,
                NewItem {
                    kind: ItemKind::Hotel,
                    name: "Sultanahmet Palace".into(),
                    city: "Istanbul".into(),
                    stars: Some(4),
                    base_price: Money::from_major(80, Currency::Eur),
                },
            )
            .unwrap()
    }

    fn season(name: &str, start: NaiveDate, end: NaiveDate, major: i64) -> SeasonalRate {
        SeasonalRate {
            name: name.into(),
            start,
            end,
            price: Money::from_major(major, Currency::Eur),
            min_stay_nights: 0,
        }
    }

    #[test]
    fn test_charge_basis() {
        assert_eq!(ItemKind::Hotel.basis(), ChargeBasis::PerPersonPerNight);
        assert_eq!(ItemKind::Restaurant.basis(), ChargeBasis::PerPerson);
        assert_eq!(ItemKind::Transfer.basis(), ChargeBasis::PerGroup);
        assert_eq!("entrance_fee".parse::<ItemKind>().unwrap(), ItemKind::EntranceFee);
    }

    #[test]
    fn test_seasonal_price_inclusive_and_latest_start_wins() {
        let catalog = Catalog::new();
        let org = Uuid::new_v4();
        let item = hotel(&catalog, org);

        catalog
            .add_season(item.id, season("Summer", date(6, 1), date(8, 31), 120))
            .unwrap();
        catalog
            .add_season(item.id, season("August peak", date(8, 1), date(8, 15), 150))
            .unwrap();

        assert_eq!(catalog.price_on(item.id, date(5, 31)).unwrap().source, PriceSource::Base);
        assert_eq!(catalog.price_on(item.id, date(6, 1)).unwrap().price.minor, 12_000);
        assert_eq!(catalog.price_on(item.id, date(8, 15)).unwrap().price.minor, 15_000);
        assert_eq!(catalog.price_on(item.id, date(8, 31)).unwrap().price.minor, 12_000);
    }

    #[test]
    fn test_min_stay_respected() {
        let catalog = Catalog::new();
        let item = hotel(&catalog, Uuid::new_v4());
        let mut long_stay = season("Long stay", date(1, 1), date(12, 31), 60);
        long_stay.min_stay_nights = 5;
        catalog.add_season(item.id, long_stay).unwrap();

        assert_eq!(catalog.price_for_stay(item.id, date(3, 1), 2).unwrap().price.minor, 8_000);
        assert_eq!(catalog.price_for_stay(item.id, date(3, 1), 7).unwrap().price.minor, 6_000);
    }

    #[test]
    fn test_season_validation() {
        let catalog = Catalog::new();
        let item = hotel(&catalog, Uuid::new_v4());
        assert!(catalog
            .add_season(item.id, season("Backwards", date(9, 1), date(8, 1), 100))
            .is_err());

        let mut usd = season("USD", date(1, 1), date(1, 31), 100);
        usd.price = Money::from_major(100, Currency::Usd);
        assert!(matches!(
            catalog.add_season(item.id, usd),
            Err(TripdeskError::CurrencyMismatch { .. })
        ));
    }

    #[test]
    fn test_list_scoped_and_filtered() {
        let catalog = Catalog::new();
        let org = Uuid::new_v4();
        let item = hotel(&catalog, org);
        hotel(&catalog, Uuid::new_v4());
        catalog
            .add_item(
                org,
                NewItem {
                    kind: ItemKind::Guide,
                    name: "Licensed guide".into(),
                    city: "Istanbul".into(),
                    stars: None,
                    base_price: Money::from_major(150, Currency::Eur),
                },
            )
            .unwrap();

        assert_eq!(catalog.list(org, &ItemFilter::default()).len(), 2);
        let hotels = ItemFilter {
            kind: Some(ItemKind::Hotel),
            city: Some("istanbul".into()),
            ..Default::default()
        };
        assert_eq!(catalog.list(org, &hotels).len(), 1);

        catalog.deactivate(item.id).unwrap();
        assert!(catalog.list(org, &hotels).is_empty());
    }
}
