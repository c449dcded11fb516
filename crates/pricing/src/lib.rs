//! Operator inventory with seasonal rates, and quote price calculation.

pub mod calculator;
pub mod catalog;
pub mod planner;

pub use calculator::{calculate, ChildDiscount, ChildSlab, Party, PriceBreakdown, PriceCategory, QuoteDay, QuoteLine};
pub use catalog::{Catalog, ChargeBasis, InventoryItem, ItemKind, NewItem, ResolvedPrice, SeasonalRate};
