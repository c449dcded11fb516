//! Inventory, itinerary generation, quotes and the customer-facing public
//! quote link.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use dashmap::DashSet;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use tripdesk_core::{Money, TripdeskError, TripdeskResult};
use tripdesk_finance::{Customer, NewQuote, PublicQuote, Quote, QuoteStatus};
use tripdesk_platform::validation::{validate_itinerary_request, ItineraryRequest};
use tripdesk_platform::{Actor, Permission};
use tripdesk_pricing::catalog::ItemFilter;
use tripdesk_pricing::{calculate, planner, ChildSlab, InventoryItem, NewItem, Party, QuoteDay, SeasonalRate};

use crate::Tripdesk;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateItinerary {
    pub request: ItineraryRequest,
    pub customer: Customer,
    #[serde(default)]
    pub agent_id: Option<Uuid>,
    #[serde(default)]
    pub client_id: Option<Uuid>,
    /// Caller-chosen id; retrying with the same id neither charges again nor
    /// creates a second quote.
    #[serde(default)]
    pub itinerary_id: Option<Uuid>,
}

/// Holds an itinerary id while it is being generated so a concurrent retry
/// with the same id cannot price and quote it twice.
struct ItineraryReservation<'a> {
    generating: &'a DashSet<Uuid>,
    itinerary_id: Uuid,
}

impl<'a> ItineraryReservation<'a> {
    fn take(generating: &'a DashSet<Uuid>, itinerary_id: Uuid) -> TripdeskResult<Self> {
        if !generating.insert(itinerary_id) {
            return Err(TripdeskError::Conflict(format!(
                "itinerary {itinerary_id} is already being generated"
            )));
        }
        Ok(Self {
            generating,
            itinerary_id,
        })
    }
}

impl Drop for ItineraryReservation<'_> {
    fn drop(&mut self) {
        self.generating.remove(&self.itinerary_id);
    }
}

impl Tripdesk {
    // ------------------------------------------------------------------
    // Catalog
    // ------------------------------------------------------------------

    pub fn add_inventory_item(&self, actor: &Actor, organization_id: Uuid, new: NewItem) -> TripdeskResult<InventoryItem> {
        self.guard_write(actor, organization_id, Permission::PricingWrite)?;
        let item = self.catalog.add_item(organization_id, new)?;
        self.record(
            Some(actor),
            organization_id,
            "inventory_create",
            "inventory_item",
            item.id,
            json!({ "kind": item.kind, "name": item.name, "city": item.city, "base_price": item.base_price }),
        );
        Ok(item)
    }

    pub fn inventory(&self, actor: &Actor, organization_id: Uuid, filter: &ItemFilter) -> TripdeskResult<Vec<InventoryItem>> {
        self.guard_read(actor, organization_id, Permission::PricingRead)?;
        Ok(self.catalog.list(organization_id, filter))
    }

    fn writable_item(&self, actor: &Actor, item_id: Uuid) -> TripdeskResult<InventoryItem> {
        let item = self.catalog.get(item_id)?;
        self.guard_write(actor, item.organization_id, Permission::PricingWrite)?;
        Ok(item)
    }

    pub fn update_item_price(&self, actor: &Actor, item_id: Uuid, price: Money) -> TripdeskResult<InventoryItem> {
        let before = self.writable_item(actor, item_id)?;
        let item = self.catalog.update_base_price(item_id, price)?;
        self.record(
            Some(actor),
            item.organization_id,
            "inventory_price_update",
            "inventory_item",
            item_id,
            json!({ "from": before.base_price, "to": item.base_price }),
        );
        Ok(item)
    }

    pub fn add_item_season(&self, actor: &Actor, item_id: Uuid, season: SeasonalRate) -> TripdeskResult<InventoryItem> {
        self.writable_item(actor, item_id)?;
        let details = json!({ "season": season.name, "start": season.start, "end": season.end, "price": season.price });
        let item = self.catalog.add_season(item_id, season)?;
        self.record(Some(actor), item.organization_id, "inventory_season_add", "inventory_item", item_id, details);
        Ok(item)
    }

    pub fn deactivate_item(&self, actor: &Actor, item_id: Uuid) -> TripdeskResult<InventoryItem> {
        self.writable_item(actor, item_id)?;
        let item = self.catalog.deactivate(item_id)?;
        self.record(Some(actor), item.organization_id, "inventory_deactivate", "inventory_item", item_id, json!({}));
        Ok(item)
    }

    pub fn set_child_slabs(&self, actor: &Actor, organization_id: Uuid, slabs: Vec<ChildSlab>) -> TripdeskResult<()> {
        self.guard_write(actor, organization_id, Permission::PricingWrite)?;
        let count = slabs.len();
        self.catalog.set_child_slabs(organization_id, slabs)?;
        self.record(
            Some(actor),
            organization_id,
            "child_slabs_update",
            "organization",
            organization_id,
            json!({ "slabs": count }),
        );
        Ok(())
    }

    pub fn child_slabs(&self, actor: &Actor, organization_id: Uuid) -> TripdeskResult<Vec<ChildSlab>> {
        self.guard_read(actor, organization_id, Permission::PricingRead)?;
        Ok(self.catalog.child_slabs(organization_id))
    }

    // ------------------------------------------------------------------
    // Itineraries
    // ------------------------------------------------------------------

    pub(crate) fn check_agent(&self, organization_id: Uuid, agent_id: Option<Uuid>) -> TripdeskResult<()> {
        if let Some(agent_id) = agent_id {
            let agent = self.agents.get(agent_id)?;
            if agent.organization_id != organization_id {
                return Err(TripdeskError::not_found("agent", agent_id));
            }
        }
        Ok(())
    }

    pub(crate) fn check_client(&self, organization_id: Uuid, client_id: Option<Uuid>) -> TripdeskResult<()> {
        if let Some(client_id) = client_id {
            if self.clients.get(client_id)?.organization_id != organization_id {
                return Err(TripdeskError::not_found("client", client_id));
            }
        }
        Ok(())
    }

    /// Draft and price an itinerary from the organization's inventory,
    /// charge one generation against its credits and store it as a Draft
    /// quote.
    pub fn generate_itinerary(
        &self,
        actor: &Actor,
        organization_id: Uuid,
        generate: GenerateItinerary,
    ) -> TripdeskResult<Quote> {
        self.guard_write(actor, organization_id, Permission::QuoteWrite)?;
        let GenerateItinerary {
            request,
            customer,
            agent_id,
            client_id,
            itinerary_id,
        } = generate;
        validate_itinerary_request(&request).map_err(|errors| TripdeskError::validation(errors.join("; ")))?;
        customer.validate()?;

        let itinerary_id = itinerary_id.unwrap_or_else(Uuid::new_v4);
        let _reservation = ItineraryReservation::take(&self.generating, itinerary_id)?;
        if let Some(quote_id) = self.itineraries.get(&itinerary_id).map(|e| *e.value()) {
            let quote = self.quotes.get(quote_id)?;
            if quote.organization_id != organization_id {
                return Err(TripdeskError::Conflict(format!("itinerary {itinerary_id} belongs to another organization")));
            }
            return Ok(quote);
        }
        self.check_agent(organization_id, agent_id)?;
        self.check_client(organization_id, client_id)?;

        let currency = self.orgs.get(organization_id)?.default_currency;
        let days = planner::draft_days(&self.catalog, organization_id, &request, currency)?;
        let party = Party {
            adults: request.adults,
            children_ages: request.children_ages.clone(),
        };
        let pricing = calculate(currency, &days, &party, &self.catalog.child_slabs(organization_id))?;

        let charge = self.usage_rates.charge_itinerary(
            organization_id,
            itinerary_id,
            &self.config.billing.itinerary_item_type,
            Some(actor.user_id),
            Utc::now(),
        )?;

        let destination = request
            .city_nights
            .iter()
            .map(|c| c.city.as_str())
            .collect::<Vec<_>>()
            .join(" - ");
        let quote = self.quotes.create(
            organization_id,
            NewQuote {
                created_by: actor.user_id,
                customer,
                destination,
                start_date: request.start_date,
                end_date: request.start_date + Duration::days(i64::from(request.total_nights())),
                party,
                agent_id,
                currency,
                valid_until: None,
            },
            Self::today(),
        )?;
        let mut quote = self.quotes.reprice(quote.id, days, pricing)?;
        if client_id.is_some() {
            quote = self.quotes.assign_client(quote.id, client_id)?;
        }
        self.itineraries.insert(itinerary_id, quote.id);

        self.record(
            Some(actor),
            organization_id,
            "itinerary_generate",
            "quote",
            quote.id,
            json!({
                "itinerary_id": itinerary_id,
                "quote_number": quote.quote_number,
                "credits_charged": charge.amount,
                "total": quote.total,
            }),
        );
        metrics::counter!("itineraries.generated").increment(1);
        info!(org_id = %organization_id, itinerary_id = %itinerary_id, quote = %quote.quote_number, charged = %charge.amount, "Itinerary generated");
        Ok(quote)
    }

    // ------------------------------------------------------------------
    // Quotes
    // ------------------------------------------------------------------

    /// Open an empty Draft quote. `created_by` is taken from the actor.
    pub fn create_quote(&self, actor: &Actor, organization_id: Uuid, new: NewQuote) -> TripdeskResult<Quote> {
        self.guard_write(actor, organization_id, Permission::QuoteWrite)?;
        self.check_agent(organization_id, new.agent_id)?;
        let quote = self.quotes.create(
            organization_id,
            NewQuote {
                created_by: actor.user_id,
                ..new
            },
            Self::today(),
        )?;
        self.record(
            Some(actor),
            organization_id,
            "quote_create",
            "quote",
            quote.id,
            json!({ "quote_number": quote.quote_number, "customer": quote.customer.name }),
        );
        Ok(quote)
    }

    fn quote_for(&self, actor: &Actor, quote_id: Uuid, permission: Permission, write: bool) -> TripdeskResult<Quote> {
        let quote = self.quotes.get(quote_id)?;
        if write {
            self.guard_write(actor, quote.organization_id, permission)?;
        } else {
            self.guard_read(actor, quote.organization_id, permission)?;
        }
        Ok(quote)
    }

    /// Replace the quote's days and price them for its party.
    pub fn price_quote(&self, actor: &Actor, quote_id: Uuid, days: Vec<QuoteDay>) -> TripdeskResult<Quote> {
        let quote = self.quote_for(actor, quote_id, Permission::QuoteWrite, true)?;
        let slabs = self.catalog.child_slabs(quote.organization_id);
        let pricing = calculate(quote.currency, &days, &quote.party, &slabs)?;
        let quote = self.quotes.reprice(quote_id, days, pricing)?;
        self.record(
            Some(actor),
            quote.organization_id,
            "quote_price",
            "quote",
            quote_id,
            json!({ "total": quote.total }),
        );
        Ok(quote)
    }

    fn quote_transition(
        &self,
        actor: &Actor,
        quote_id: Uuid,
        action: &str,
        apply: impl FnOnce() -> TripdeskResult<Quote>,
    ) -> TripdeskResult<Quote> {
        let before = self.quote_for(actor, quote_id, Permission::QuoteWrite, true)?;
        let quote = apply()?;
        self.record(
            Some(actor),
            quote.organization_id,
            action,
            "quote",
            quote_id,
            json!({ "from": before.status, "to": quote.status }),
        );
        Ok(quote)
    }

    pub fn send_quote(&self, actor: &Actor, quote_id: Uuid) -> TripdeskResult<Quote> {
        self.quote_transition(actor, quote_id, "quote_send", || self.quotes.send(quote_id))
    }

    pub fn accept_quote(&self, actor: &Actor, quote_id: Uuid) -> TripdeskResult<Quote> {
        self.quote_transition(actor, quote_id, "quote_accept", || self.quotes.accept(quote_id, Self::today()))
    }

    pub fn reject_quote(&self, actor: &Actor, quote_id: Uuid, reason: Option<String>) -> TripdeskResult<Quote> {
        self.quote_transition(actor, quote_id, "quote_reject", || self.quotes.reject(quote_id, reason))
    }

    pub fn revise_quote(&self, actor: &Actor, quote_id: Uuid, valid_until: NaiveDate) -> TripdeskResult<Quote> {
        if valid_until < Self::today() {
            return Err(TripdeskError::validation("a revised quote must be valid from today on"));
        }
        self.quote_transition(actor, quote_id, "quote_revise", || self.quotes.revise(quote_id, valid_until))
    }

    pub fn get_quote(&self, actor: &Actor, quote_id: Uuid) -> TripdeskResult<Quote> {
        self.quote_for(actor, quote_id, Permission::QuoteRead, false)
    }

    pub fn list_quotes(&self, actor: &Actor, organization_id: Uuid, status: Option<QuoteStatus>) -> TripdeskResult<Vec<Quote>> {
        self.guard_read(actor, organization_id, Permission::QuoteRead)?;
        Ok(self.quotes.list(organization_id, status))
    }

    pub fn quote_pipeline(&self, actor: &Actor, organization_id: Uuid) -> TripdeskResult<Vec<(QuoteStatus, usize)>> {
        self.guard_read(actor, organization_id, Permission::QuoteRead)?;
        Ok(self.quotes.count_by_status(Some(organization_id)))
    }

    // ------------------------------------------------------------------
    // Public link
    // ------------------------------------------------------------------

    fn throttle(&self, client_key: &str, now: DateTime<Utc>) -> TripdeskResult<()> {
        let decision = self.public_limiter.check(&format!("public:{client_key}"), now);
        if !decision.allowed {
            metrics::counter!("public.rate_limited").increment(1);
            warn!(client = client_key, reset_at = %decision.reset_at, "Public quote access rate limited");
            return Err(TripdeskError::RateLimited {
                retry_at: decision.reset_at,
            });
        }
        Ok(())
    }

    fn public_quote(&self, token: &str, client_key: &str, now: DateTime<Utc>) -> TripdeskResult<Quote> {
        self.throttle(client_key, now)?;
        let quote = self.quotes.get_by_token(token)?;
        if quote.status == QuoteStatus::Draft {
            return Err(TripdeskError::not_found("quote", token));
        }
        self.orgs.ensure_operational(quote.organization_id)?;
        Ok(quote)
    }

    /// Customer opens the quote link. The first view of a sent quote marks
    /// it Viewed; drafts are not visible.
    pub fn public_view(&self, token: &str, client_key: &str, now: DateTime<Utc>) -> TripdeskResult<PublicQuote> {
        let quote = self.public_quote(token, client_key, now)?;
        let quote = if quote.status == QuoteStatus::Sent {
            let viewed = self.quotes.mark_viewed(quote.id)?;
            self.record(
                None,
                viewed.organization_id,
                "quote_view",
                "quote",
                viewed.id,
                json!({ "client": client_key }),
            );
            viewed
        } else {
            quote
        };
        Ok(PublicQuote::from(&quote))
    }

    pub fn public_accept(&self, token: &str, client_key: &str, now: DateTime<Utc>) -> TripdeskResult<PublicQuote> {
        let quote = self.public_quote(token, client_key, now)?;
        let accepted = self.quotes.accept(quote.id, now.date_naive())?;
        self.record(
            None,
            accepted.organization_id,
            "quote_accept",
            "quote",
            accepted.id,
            json!({ "from": quote.status, "client": client_key, "via": "public_link" }),
        );
        info!(quote = %accepted.quote_number, "Quote accepted by customer");
        Ok(PublicQuote::from(&accepted))
    }

    pub fn public_reject(
        &self,
        token: &str,
        reason: Option<String>,
        client_key: &str,
        now: DateTime<Utc>,
    ) -> TripdeskResult<PublicQuote> {
        let quote = self.public_quote(token, client_key, now)?;
        let rejected = self.quotes.reject(quote.id, reason)?;
        self.record(
            None,
            rejected.organization_id,
            "quote_reject",
            "quote",
            rejected.id,
            json!({ "from": quote.status, "reason": rejected.rejection_reason, "client": client_key, "via": "public_link" }),
        );
        info!(quote = %rejected.quote_number, "Quote rejected by customer");
        Ok(PublicQuote::from(&rejected))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reservation_blocks_concurrent_generation() {
        let generating = DashSet::new();
        let itinerary = Uuid::new_v4();

        let held = ItineraryReservation::take(&generating, itinerary).unwrap();
        assert!(matches!(
            ItineraryReservation::take(&generating, itinerary),
            Err(TripdeskError::Conflict(_))
        ));
        assert!(ItineraryReservation::take(&generating, Uuid::new_v4()).is_ok());

        drop(held);
        assert!(generating.is_empty());
        assert!(ItineraryReservation::take(&generating, itinerary).is_ok());
    }
}
