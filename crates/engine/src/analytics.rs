//! Organization analytics: quote conversion, booked revenue and the
//! destinations customers ask for.

use std::collections::HashMap;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use tripdesk_core::{Currency, Money, TripdeskResult};
use tripdesk_finance::{BookingStatus, QuoteStatus};
use tripdesk_platform::{Actor, Permission};

use crate::Tripdesk;

const TOP_DESTINATIONS: usize = 10;
const TREND_MONTHS: u32 = 6;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestinationStat {
    pub destination: String,
    pub quotes: usize,
    pub accepted: usize,
    /// Sum of the quoted totals in the organization's currency.
    pub total_value: Money,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonthlyRevenue {
    /// `YYYY-MM`
    pub month: String,
    pub bookings: usize,
    pub revenue: Money,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrgAnalytics {
    pub currency: Currency,
    pub total_quotes: usize,
    pub open_quotes: usize,
    pub accepted_quotes: usize,
    pub rejected_quotes: usize,
    pub total_bookings: usize,
    /// Bookings per quote in basis points.
    pub conversion_rate_bps: u32,
    /// Non-cancelled bookings.
    pub booked_revenue: Money,
    pub collected: Money,
    pub travellers_booked: u32,
    pub top_destinations: Vec<DestinationStat>,
    /// Oldest month first, ending with the current one.
    pub monthly_revenue: Vec<MonthlyRevenue>,
}

fn month_key(date: NaiveDate) -> String {
    format!("{:04}-{:02}", date.year(), date.month())
}

fn trailing_months(today: NaiveDate, count: u32) -> Vec<String> {
    let current = today.year() * 12 + today.month0() as i32;
    (0..count as i32)
        .rev()
        .map(|back| {
            let index = current - back;
            format!("{:04}-{:02}", index.div_euclid(12), index.rem_euclid(12) + 1)
        })
        .collect()
}

fn conversion_bps(bookings: usize, quotes: usize) -> u32 {
    if quotes == 0 {
        return 0;
    }
    ((bookings as u64 * 10_000 + quotes as u64 / 2) / quotes as u64) as u32
}

impl Tripdesk {
    pub fn organization_analytics(&self, actor: &Actor, organization_id: Uuid) -> TripdeskResult<OrgAnalytics> {
        self.guard_read(actor, organization_id, Permission::QuoteRead)?;
        self.guard_read(actor, organization_id, Permission::BookingRead)?;
        let currency = self.orgs.get(organization_id)?.default_currency;
        self.analytics_on(organization_id, currency, Self::today())
    }

    fn analytics_on(&self, organization_id: Uuid, currency: Currency, today: NaiveDate) -> TripdeskResult<OrgAnalytics> {
        let quotes = self.quotes.list(organization_id, None);
        let mut destinations: HashMap<String, DestinationStat> = HashMap::new();
        for q in quotes.iter().filter(|q| !q.destination.trim().is_empty()) {
            let stat = destinations
                .entry(q.destination.clone())
                .or_insert_with(|| DestinationStat {
                    destination: q.destination.clone(),
                    quotes: 0,
                    accepted: 0,
                    total_value: Money::zero(currency),
                });
            stat.quotes += 1;
            if q.status == QuoteStatus::Accepted {
                stat.accepted += 1;
            }
            if q.currency == currency {
                stat.total_value = stat.total_value.checked_add(q.total)?;
            }
        }
        let mut top_destinations: Vec<DestinationStat> = destinations.into_values().collect();
        top_destinations.sort_by(|a, b| b.quotes.cmp(&a.quotes).then(a.destination.cmp(&b.destination)));
        top_destinations.truncate(TOP_DESTINATIONS);

        let bookings = self.bookings.list(organization_id, None);
        let mut monthly: Vec<MonthlyRevenue> = trailing_months(today, TREND_MONTHS)
            .into_iter()
            .map(|month| MonthlyRevenue {
                month,
                bookings: 0,
                revenue: Money::zero(currency),
            })
            .collect();
        let mut travellers_booked = 0;
        for b in bookings.iter().filter(|b| b.status != BookingStatus::Cancelled) {
            if let Ok(quote) = self.quotes.get(b.quote_id) {
                travellers_booked += quote.party.heads();
            }
            let key = month_key(b.created_at.date_naive());
            if let Some(slot) = monthly.iter_mut().find(|m| m.month == key) {
                slot.bookings += 1;
                if b.total.currency == currency {
                    slot.revenue = slot.revenue.checked_add(b.total)?;
                }
            }
        }
        let summary = self.bookings.summary(organization_id, currency)?;

        Ok(OrgAnalytics {
            currency,
            total_quotes: quotes.len(),
            open_quotes: quotes.iter().filter(|q| q.status.is_open()).count(),
            accepted_quotes: quotes.iter().filter(|q| q.status == QuoteStatus::Accepted).count(),
            rejected_quotes: quotes.iter().filter(|q| q.status == QuoteStatus::Rejected).count(),
            total_bookings: bookings.len(),
            conversion_rate_bps: conversion_bps(bookings.len(), quotes.len()),
            booked_revenue: summary.active_revenue,
            collected: summary.collected,
            travellers_booked,
            top_destinations,
            monthly_revenue: monthly,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trailing_months_cross_year() {
        let today = NaiveDate::from_ymd_opt(2025, 2, 14).unwrap();
        assert_eq!(
            trailing_months(today, 6),
            vec!["2024-09", "2024-10", "2024-11", "2024-12", "2025-01", "2025-02"]
        );
    }

    #[test]
    fn test_conversion_rounds_to_basis_points() {
        assert_eq!(conversion_bps(0, 0), 0);
        assert_eq!(conversion_bps(1, 3), 3_333);
        assert_eq!(conversion_bps(2, 3), 6_667);
        assert_eq!(conversion_bps(4, 4), 10_000);
    }
}
