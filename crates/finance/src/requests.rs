//! Inbound customer requests: trip enquiries waiting to be turned into a
//! quote and followed through to travel.

use std::sync::Arc;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use tripdesk_core::{DocumentSequence, TripdeskError, TripdeskResult};
use tripdesk_platform::validation::{validate_itinerary_request, ItineraryRequest};

use crate::quotes::Customer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Quoted,
    Confirmed,
    Completed,
    Cancelled,
}

impl RequestStatus {
    fn can_become(self, to: RequestStatus) -> bool {
        use RequestStatus::*;
        matches!(
            (self, to),
            (Pending, Quoted)
                | (Quoted, Confirmed)
                | (Confirmed, Completed)
                | (Pending, Cancelled)
                | (Quoted, Cancelled)
                | (Confirmed, Cancelled)
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomerRequest {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub reference: String,
    pub client_id: Option<Uuid>,
    pub agent_id: Option<Uuid>,
    pub customer: Customer,
    pub itinerary: ItineraryRequest,
    pub status: RequestStatus,
    /// Quote generated for this request.
    pub quote_id: Option<Uuid>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewCustomerRequest {
    pub customer: Customer,
    pub itinerary: ItineraryRequest,
    #[serde(default)]
    pub client_id: Option<Uuid>,
    #[serde(default)]
    pub agent_id: Option<Uuid>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestStats {
    pub total: usize,
    pub pending: usize,
    pub quoted: usize,
    pub confirmed: usize,
    pub completed: usize,
    pub cancelled: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestState {
    pub requests: Vec<CustomerRequest>,
}

pub struct RequestBook {
    requests: DashMap<Uuid, CustomerRequest>,
    numbers: Arc<DocumentSequence>,
    prefix: String,
}

impl RequestBook {
    pub fn new(numbers: Arc<DocumentSequence>, prefix: impl Into<String>) -> Self {
        Self {
            requests: DashMap::new(),
            numbers,
            prefix: prefix.into(),
        }
    }

    pub fn from_state(state: RequestState, numbers: Arc<DocumentSequence>, prefix: impl Into<String>) -> Self {
        let book = Self::new(numbers, prefix);
        for request in state.requests {
            book.requests.insert(request.id, request);
        }
        book
    }

    pub fn export(&self) -> RequestState {
        let mut requests: Vec<CustomerRequest> = self.requests.iter().map(|e| e.value().clone()).collect();
        requests.sort_by_key(|r| (r.created_at, r.id));
        RequestState { requests }
    }

    pub fn submit(&self, organization_id: Uuid, new: NewCustomerRequest, today: NaiveDate) -> TripdeskResult<CustomerRequest> {
        new.customer.validate()?;
        validate_itinerary_request(&new.itinerary).map_err(|errors| TripdeskError::validation(errors.join("; ")))?;

        let now = Utc::now();
        let request = CustomerRequest {
            id: Uuid::new_v4(),
            organization_id,
            reference: self
                .numbers
                .next(&organization_id.to_string(), &self.prefix, today.year()),
            client_id: new.client_id,
            agent_id: new.agent_id,
            customer: new.customer,
            itinerary: new.itinerary,
            status: RequestStatus::Pending,
            quote_id: None,
            notes: new.notes.map(|n| n.trim().to_string()).filter(|n| !n.is_empty()),
            created_at: now,
            updated_at: now,
        };
        self.requests.insert(request.id, request.clone());
        metrics::counter!("requests.submitted").increment(1);
        info!(org_id = %organization_id, request = %request.reference, "Customer request received");
        Ok(request)
    }

    pub fn get(&self, id: Uuid) -> TripdeskResult<CustomerRequest> {
        self.requests
            .get(&id)
            .map(|e| e.value().clone())
            .ok_or_else(|| TripdeskError::not_found("customer request", id))
    }

    /// Requests newest first.
    pub fn list(&self, organization_id: Uuid, status: Option<RequestStatus>) -> Vec<CustomerRequest> {
        let mut requests: Vec<CustomerRequest> = self
            .requests
            .iter()
            .filter(|e| {
                let r = e.value();
                r.organization_id == organization_id && status.map_or(true, |s| r.status == s)
            })
            .map(|e| e.value().clone())
            .collect();
        requests.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.reference.cmp(&a.reference)));
        requests
    }

    pub fn stats(&self, organization_id: Uuid) -> RequestStats {
        let mut stats = RequestStats::default();
        for e in self.requests.iter().filter(|e| e.value().organization_id == organization_id) {
            stats.total += 1;
            match e.value().status {
                RequestStatus::Pending => stats.pending += 1,
                RequestStatus::Quoted => stats.quoted += 1,
                RequestStatus::Confirmed => stats.confirmed += 1,
                RequestStatus::Completed => stats.completed += 1,
                RequestStatus::Cancelled => stats.cancelled += 1,
            }
        }
        stats
    }

    pub fn referencing_client(&self, client_id: Uuid) -> usize {
        self.requests
            .iter()
            .filter(|e| e.value().client_id == Some(client_id))
            .count()
    }

    fn transition(&self, id: Uuid, to: RequestStatus, apply: impl FnOnce(&mut CustomerRequest)) -> TripdeskResult<CustomerRequest> {
        let mut request = self
            .requests
            .get_mut(&id)
            .ok_or_else(|| TripdeskError::not_found("customer request", id))?;
        if !request.status.can_become(to) {
            return Err(TripdeskError::transition("customer request", request.status, to));
        }
        let from = request.status;
        request.status = to;
        request.updated_at = Utc::now();
        apply(request.value_mut());
        info!(request_id = %id, from = ?from, to = ?to, "Customer request status changed");
        Ok(request.clone())
    }

    /// Link the generated quote. Linking the same quote again is a no-op.
    pub fn attach_quote(&self, id: Uuid, quote_id: Uuid) -> TripdeskResult<CustomerRequest> {
        let request = self.get(id)?;
        if request.quote_id == Some(quote_id) {
            return Ok(request);
        }
        self.transition(id, RequestStatus::Quoted, |r| r.quote_id = Some(quote_id))
    }

    pub fn confirm(&self, id: Uuid) -> TripdeskResult<CustomerRequest> {
        self.transition(id, RequestStatus::Confirmed, |_| {})
    }

    pub fn complete(&self, id: Uuid) -> TripdeskResult<CustomerRequest> {
        self.transition(id, RequestStatus::Completed, |_| {})
    }

    pub fn cancel(&self, id: Uuid, reason: Option<String>) -> TripdeskResult<CustomerRequest> {
        self.transition(id, RequestStatus::Cancelled, |r| {
            if let Some(reason) = reason.map(|s| s.trim().to_string()).filter(|s| !s.is_empty()) {
                r.notes = Some(match r.notes.take() {
                    Some(notes) => format!("{notes}\nCancelled: {reason}"),
                    None => format!("Cancelled: {reason}"),
                });
            }
        })
    }
}
