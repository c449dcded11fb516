//! Draft itinerary days from the operator's own inventory.
//!
//! One day per night, grouped by city in request order. The first day in
//! each city carries the hotel for the whole stay (and an arrival transfer
//! after the first city); each day gets the next unused tour in that city,
//! plus a guide when the request is for a private tour.

use chrono::Duration;
use uuid::Uuid;

use tripdesk_core::{Currency, TripdeskError, TripdeskResult};
use tripdesk_platform::validation::{ItineraryRequest, TourType};

use crate::calculator::{QuoteDay, QuoteLine};
use crate::catalog::{resolve, Catalog, InventoryItem, ItemFilter, ItemKind};

fn in_city(catalog: &Catalog, org: Uuid, kind: ItemKind, city: &str, currency: Currency) -> Vec<InventoryItem> {
    catalog
        .list(
            org,
            &ItemFilter {
                kind: Some(kind),
                city: Some(city.to_string()),
                include_inactive: false,
            },
        )
        .into_iter()
        .filter(|item| item.base_price.currency == currency)
        .collect()
}

fn priced_line(item: &InventoryItem, date: chrono::NaiveDate, nights: u32, quantity: u32) -> QuoteLine {
    let resolved = resolve(item, date, nights.max(1));
    QuoteLine {
        kind: item.kind,
        description: item.name.clone(),
        unit_price: resolved.price,
        quantity,
        nights,
        item_id: Some(item.id),
    }
}

pub fn draft_days(
    catalog: &Catalog,
    organization_id: Uuid,
    request: &ItineraryRequest,
    currency: Currency,
) -> TripdeskResult<Vec<QuoteDay>> {
    let mut days = Vec::new();
    let mut date = request.start_date;
    let mut day_number = 1;

    for (city_index, stay) in request.city_nights.iter().enumerate() {
        let hotels = in_city(catalog, organization_id, ItemKind::Hotel, &stay.city, currency);
        let check_in = date;
        let hotel = hotels
            .iter()
            .min_by_key(|h| {
                let preferred = h.stars == Some(request.hotel_category);
                (!preferred, resolve(h, check_in, stay.nights).price.minor)
            })
            .ok_or_else(|| {
                TripdeskError::validation(format!("no hotel available in {}", stay.city))
            })?;

        let tours = in_city(catalog, organization_id, ItemKind::Tour, &stay.city, currency);
        let guide = in_city(catalog, organization_id, ItemKind::Guide, &stay.city, currency)
            .into_iter()
            .next();
        let transfer = in_city(catalog, organization_id, ItemKind::Transfer, &stay.city, currency)
            .into_iter()
            .next();

        for night in 0..stay.nights {
            let mut lines = Vec::new();
            if night == 0 {
                lines.push(priced_line(hotel, date, stay.nights, 0));
                if city_index > 0 {
                    if let Some(ref t) = transfer {
                        lines.push(priced_line(t, date, 0, 1));
                    }
                }
            }
            if let Some(tour) = tours.get(night as usize) {
                lines.push(priced_line(tour, date, 0, 0));
                if request.tour_type == TourType::Private {
                    if let Some(ref g) = guide {
                        lines.push(priced_line(g, date, 0, 1));
                    }
                }
            }
            days.push(QuoteDay {
                day_number,
                date: Some(date),
                city: stay.city.clone(),
                lines,
            });
            day_number += 1;
            date += Duration::days(1);
        }
    }

    Ok(days)
}
