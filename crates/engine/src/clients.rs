//! Client register and inbound customer requests behind the organization
//! guard.

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use tripdesk_core::{Money, TripdeskError, TripdeskResult};
use tripdesk_finance::{
    Client, ClientFilter, ClientSourceCounts, ClientUpdate, CustomerRequest, NewClient, NewCustomerRequest, Quote,
    QuoteStatus, RequestStats, RequestStatus,
};
use tripdesk_platform::{Actor, Permission};
use tripdesk_pricing::{calculate, planner, Party};

use crate::{GenerateItinerary, Tripdesk};

/// A client with the activity recorded against it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientSummary {
    pub client: Client,
    pub total_quotes: usize,
    pub total_requests: usize,
    /// Accepted quote totals in the organization's currency.
    pub total_spent: Money,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientRegister {
    pub clients: Vec<ClientSummary>,
    pub counts: ClientSourceCounts,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecalculationReport {
    /// Requests with a draft quote to reprice.
    pub total: usize,
    pub updated: usize,
    pub errors: Vec<String>,
}

impl Tripdesk {
    // ------------------------------------------------------------------
    // Clients
    // ------------------------------------------------------------------

    fn client_for(&self, actor: &Actor, client_id: Uuid, permission: Permission, write: bool) -> TripdeskResult<Client> {
        let client = self.clients.get(client_id)?;
        if write {
            self.guard_write(actor, client.organization_id, permission)?;
        } else {
            self.guard_read(actor, client.organization_id, permission)?;
        }
        Ok(client)
    }

    fn summarize_client(&self, client: Client) -> TripdeskResult<ClientSummary> {
        let currency = self.orgs.get(client.organization_id)?.default_currency;
        let quotes = self.quotes.for_client(client.id);
        let total_spent = Money::sum(
            currency,
            quotes
                .iter()
                .filter(|q| q.status == QuoteStatus::Accepted && q.currency == currency)
                .map(|q| q.total),
        )?;
        Ok(ClientSummary {
            total_quotes: quotes.len(),
            total_requests: self.requests.referencing_client(client.id),
            total_spent,
            client,
        })
    }

    pub fn add_client(&self, actor: &Actor, organization_id: Uuid, new: NewClient) -> TripdeskResult<Client> {
        self.guard_write(actor, organization_id, Permission::QuoteWrite)?;
        self.check_agent(organization_id, new.agent_id)?;
        let client = self.clients.add(organization_id, new)?;
        self.record(
            Some(actor),
            organization_id,
            "client_create",
            "client",
            client.id,
            json!({ "name": client.name, "source": client.source }),
        );
        Ok(client)
    }

    pub fn get_client(&self, actor: &Actor, client_id: Uuid) -> TripdeskResult<ClientSummary> {
        let client = self.client_for(actor, client_id, Permission::QuoteRead, false)?;
        self.summarize_client(client)
    }

    /// Matching clients newest first, with register-wide counts by source.
    pub fn list_clients(&self, actor: &Actor, organization_id: Uuid, filter: &ClientFilter) -> TripdeskResult<ClientRegister> {
        self.guard_read(actor, organization_id, Permission::QuoteRead)?;
        let clients = self
            .clients
            .list(organization_id, filter)
            .into_iter()
            .map(|c| self.summarize_client(c))
            .collect::<TripdeskResult<Vec<_>>>()?;
        Ok(ClientRegister {
            clients,
            counts: self.clients.source_counts(organization_id),
        })
    }

    pub fn update_client(&self, actor: &Actor, client_id: Uuid, update: ClientUpdate) -> TripdeskResult<Client> {
        self.client_for(actor, client_id, Permission::QuoteWrite, true)?;
        let client = self.clients.update(client_id, update)?;
        self.record(
            Some(actor),
            client.organization_id,
            "client_update",
            "client",
            client_id,
            json!({ "name": client.name }),
        );
        Ok(client)
    }

    /// Remove a client nothing refers to. Clients with quotes or requests
    /// on file stay.
    pub fn remove_client(&self, actor: &Actor, client_id: Uuid) -> TripdeskResult<Client> {
        let client = self.client_for(actor, client_id, Permission::QuoteWrite, true)?;
        let quotes = self.quotes.for_client(client_id).len();
        let requests = self.requests.referencing_client(client_id);
        if quotes > 0 || requests > 0 {
            return Err(TripdeskError::Conflict(format!(
                "client {} has {quotes} quote(s) and {requests} request(s) on file",
                client.name
            )));
        }
        let client = self.clients.remove(client_id)?;
        self.record(
            Some(actor),
            client.organization_id,
            "client_delete",
            "client",
            client_id,
            json!({ "name": client.name }),
        );
        Ok(client)
    }

    /// Link a quote to a client of the same organization, or clear the link.
    pub fn assign_quote_client(&self, actor: &Actor, quote_id: Uuid, client_id: Option<Uuid>) -> TripdeskResult<Quote> {
        let quote = self.quotes.get(quote_id)?;
        self.guard_write(actor, quote.organization_id, Permission::QuoteWrite)?;
        self.check_client(quote.organization_id, client_id)?;
        let quote = self.quotes.assign_client(quote_id, client_id)?;
        self.record(
            Some(actor),
            quote.organization_id,
            "quote_client_assign",
            "quote",
            quote_id,
            json!({ "client_id": client_id }),
        );
        Ok(quote)
    }

    // ------------------------------------------------------------------
    // Customer requests
    // ------------------------------------------------------------------

    fn request_for(&self, actor: &Actor, request_id: Uuid, permission: Permission, write: bool) -> TripdeskResult<CustomerRequest> {
        let request = self.requests.get(request_id)?;
        if write {
            self.guard_write(actor, request.organization_id, permission)?;
        } else {
            self.guard_read(actor, request.organization_id, permission)?;
        }
        Ok(request)
    }

    pub fn submit_customer_request(
        &self,
        actor: &Actor,
        organization_id: Uuid,
        new: NewCustomerRequest,
    ) -> TripdeskResult<CustomerRequest> {
        self.guard_write(actor, organization_id, Permission::QuoteWrite)?;
        self.check_agent(organization_id, new.agent_id)?;
        self.check_client(organization_id, new.client_id)?;
        let request = self.requests.submit(organization_id, new, Self::today())?;
        self.record(
            Some(actor),
            organization_id,
            "customer_request_create",
            "customer_request",
            request.id,
            json!({ "reference": request.reference, "customer": request.customer.name }),
        );
        Ok(request)
    }

    pub fn get_customer_request(&self, actor: &Actor, request_id: Uuid) -> TripdeskResult<CustomerRequest> {
        self.request_for(actor, request_id, Permission::QuoteRead, false)
    }

    pub fn list_customer_requests(
        &self,
        actor: &Actor,
        organization_id: Uuid,
        status: Option<RequestStatus>,
    ) -> TripdeskResult<(Vec<CustomerRequest>, RequestStats)> {
        self.guard_read(actor, organization_id, Permission::QuoteRead)?;
        Ok((
            self.requests.list(organization_id, status),
            self.requests.stats(organization_id),
        ))
    }

    /// Generate the itinerary for a pending request and link the resulting
    /// draft quote. The request id doubles as the itinerary id, so quoting
    /// the same request again returns the same quote without a second charge.
    pub fn quote_customer_request(&self, actor: &Actor, request_id: Uuid) -> TripdeskResult<(CustomerRequest, Quote)> {
        let request = self.request_for(actor, request_id, Permission::QuoteWrite, true)?;
        if let Some(quote_id) = request.quote_id {
            return Ok((request, self.quotes.get(quote_id)?));
        }
        if request.status != RequestStatus::Pending {
            return Err(TripdeskError::transition("customer request", request.status, RequestStatus::Quoted));
        }
        let quote = self.generate_itinerary(
            actor,
            request.organization_id,
            GenerateItinerary {
                request: request.itinerary.clone(),
                customer: request.customer.clone(),
                agent_id: request.agent_id,
                client_id: request.client_id,
                itinerary_id: Some(request.id),
            },
        )?;
        let request = self.requests.attach_quote(request_id, quote.id)?;
        self.record(
            Some(actor),
            request.organization_id,
            "customer_request_quote",
            "customer_request",
            request_id,
            json!({ "reference": request.reference, "quote_number": quote.quote_number }),
        );
        Ok((request, quote))
    }

    pub fn confirm_customer_request(&self, actor: &Actor, request_id: Uuid) -> TripdeskResult<CustomerRequest> {
        self.request_for(actor, request_id, Permission::QuoteWrite, true)?;
        let request = self.requests.confirm(request_id)?;
        self.record_request_change(actor, &request, json!({}));
        Ok(request)
    }

    pub fn complete_customer_request(&self, actor: &Actor, request_id: Uuid) -> TripdeskResult<CustomerRequest> {
        self.request_for(actor, request_id, Permission::QuoteWrite, true)?;
        let request = self.requests.complete(request_id)?;
        self.record_request_change(actor, &request, json!({}));
        Ok(request)
    }

    pub fn cancel_customer_request(
        &self,
        actor: &Actor,
        request_id: Uuid,
        reason: Option<String>,
    ) -> TripdeskResult<CustomerRequest> {
        self.request_for(actor, request_id, Permission::QuoteWrite, true)?;
        let request = self.requests.cancel(request_id, reason.clone())?;
        self.record_request_change(actor, &request, json!({ "reason": reason }));
        Ok(request)
    }

    fn record_request_change(&self, actor: &Actor, request: &CustomerRequest, mut details: serde_json::Value) {
        details["reference"] = json!(request.reference);
        details["status"] = json!(request.status);
        self.record(
            Some(actor),
            request.organization_id,
            "customer_request_status",
            "customer_request",
            request.id,
            details,
        );
    }

    /// Re-draft and reprice every request whose quote is still a draft,
    /// against today's inventory. Failures are collected per request and do
    /// not stop the run.
    pub fn recalculate_customer_requests(&self, actor: &Actor, organization_id: Uuid) -> TripdeskResult<RecalculationReport> {
        self.guard_write(actor, organization_id, Permission::QuoteWrite)?;
        let slabs = self.catalog.child_slabs(organization_id);
        let mut report = RecalculationReport::default();

        for request in self.requests.list(organization_id, None) {
            let Some(quote_id) = request.quote_id else { continue };
            let quote = match self.quotes.get(quote_id) {
                Ok(q) if q.status == QuoteStatus::Draft => q,
                Ok(_) => continue,
                Err(e) => {
                    report.total += 1;
                    report.errors.push(format!("{}: {e}", request.reference));
                    continue;
                }
            };
            report.total += 1;

            let party = Party {
                adults: request.itinerary.adults,
                children_ages: request.itinerary.children_ages.clone(),
            };
            let repriced = planner::draft_days(&self.catalog, organization_id, &request.itinerary, quote.currency)
                .and_then(|days| {
                    let pricing = calculate(quote.currency, &days, &party, &slabs)?;
                    self.quotes.reprice(quote_id, days, pricing)
                });
            match repriced {
                Ok(_) => report.updated += 1,
                Err(e) => {
                    warn!(request = %request.reference, error = %e, "Request recalculation failed");
                    report.errors.push(format!("{}: {e}", request.reference));
                }
            }
        }

        self.record(
            Some(actor),
            organization_id,
            "customer_request_recalculate",
            "organization",
            organization_id,
            json!({ "total": report.total, "updated": report.updated, "errors": report.errors.len() }),
        );
        info!(org_id = %organization_id, total = report.total, updated = report.updated, "Customer requests recalculated");
        Ok(report)
    }
}
