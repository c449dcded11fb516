//! Quotes: priced travel proposals sent to end customers.
//!
//! Status changes go through [`QuoteLifecycle`]; customers reach a quote only
//! through its random public token.

use std::sync::Arc;

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use tripdesk_core::{Currency, DocumentSequence, Money, TripdeskError, TripdeskResult};
use tripdesk_platform::validation::{validate_customer_info, CustomerInfo};
use tripdesk_pricing::{Party, PriceBreakdown, QuoteDay};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuoteStatus {
    Draft,
    Sent,
    Viewed,
    Accepted,
    Rejected,
    Expired,
}

impl QuoteStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Sent => "sent",
            Self::Viewed => "viewed",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
            Self::Expired => "expired",
        }
    }

    /// Still waiting on the customer (or the operator) to decide.
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Draft | Self::Sent | Self::Viewed)
    }
}

/// A single permitted status change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuoteTransition {
    pub from: QuoteStatus,
    pub to: QuoteStatus,
    pub trigger: String,
}

/// Finite set of valid quote status transitions.
#[derive(Debug, Clone)]
pub struct QuoteLifecycle {
    pub transitions: Vec<QuoteTransition>,
}

impl QuoteLifecycle {
    pub fn new() -> Self {
        use QuoteStatus::*;
        let table = [
            (Draft, Sent, "send"),
            (Sent, Viewed, "customer_view"),
            (Sent, Accepted, "accept"),
            (Viewed, Accepted, "accept"),
            (Draft, Rejected, "reject"),
            (Sent, Rejected, "reject"),
            (Viewed, Rejected, "reject"),
            (Draft, Expired, "expire"),
            (Sent, Expired, "expire"),
            (Viewed, Expired, "expire"),
            (Rejected, Draft, "revise"),
            (Expired, Draft, "revise"),
        ];
        Self {
            transitions: table
                .into_iter()
                .map(|(from, to, trigger)| QuoteTransition {
                    from,
                    to,
                    trigger: trigger.to_string(),
                })
                .collect(),
        }
    }

    pub fn can_transition(&self, from: QuoteStatus, to: QuoteStatus) -> bool {
        self.transitions.iter().any(|t| t.from == from && t.to == to)
    }

    pub fn check(&self, from: QuoteStatus, to: QuoteStatus) -> TripdeskResult<()> {
        if self.can_transition(from, to) {
            Ok(())
        } else {
            Err(TripdeskError::transition("quote", from, to))
        }
    }
}

impl Default for QuoteLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
}

impl Customer {
    pub fn validate(&self) -> TripdeskResult<()> {
        validate_customer_info(&CustomerInfo {
            name: self.name.clone(),
            email: self.email.clone(),
            phone: self.phone.clone(),
        })
        .map_err(|errors| TripdeskError::validation(errors.join("; ")))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub quote_number: String,
    pub public_token: String,
    pub created_by: Uuid,
    pub customer: Customer,
    pub destination: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub party: Party,
    pub agent_id: Option<Uuid>,
    /// Entry in the client register, when the traveller is on file.
    #[serde(default)]
    pub client_id: Option<Uuid>,
    pub currency: Currency,
    pub days: Vec<QuoteDay>,
    pub pricing: Option<PriceBreakdown>,
    pub total: Money,
    pub status: QuoteStatus,
    pub valid_until: NaiveDate,
    pub sent_at: Option<DateTime<Utc>>,
    pub viewed_at: Option<DateTime<Utc>>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub rejected_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
    pub expired_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The part of a quote a customer sees through the public link.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicQuote {
    pub quote_number: String,
    pub customer_name: String,
    pub destination: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub party: Party,
    pub days: Vec<QuoteDay>,
    pub total: Money,
    pub per_person: Option<Money>,
    pub status: QuoteStatus,
    pub valid_until: NaiveDate,
}

impl From<&Quote> for PublicQuote {
    fn from(q: &Quote) -> Self {
        Self {
            quote_number: q.quote_number.clone(),
            customer_name: q.customer.name.clone(),
            destination: q.destination.clone(),
            start_date: q.start_date,
            end_date: q.end_date,
            party: q.party.clone(),
            days: q.days.clone(),
            total: q.total,
            per_person: q.pricing.as_ref().map(|p| p.per_person),
            status: q.status,
            valid_until: q.valid_until,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewQuote {
    pub created_by: Uuid,
    pub customer: Customer,
    pub destination: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub party: Party,
    pub agent_id: Option<Uuid>,
    pub currency: Currency,
    pub valid_until: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuoteState {
    pub quotes: Vec<Quote>,
}

pub struct QuoteBook {
    quotes: DashMap<Uuid, Quote>,
    tokens: DashMap<String, Uuid>,
    lifecycle: QuoteLifecycle,
    numbers: Arc<DocumentSequence>,
    prefix: String,
    validity_days: i64,
}

fn public_token() -> String {
    let bytes: [u8; 16] = rand::random();
    hex::encode(bytes)
}

impl QuoteBook {
    pub fn new(numbers: Arc<DocumentSequence>, prefix: impl Into<String>, validity_days: i64) -> Self {
        Self {
            quotes: DashMap::new(),
            tokens: DashMap::new(),
            lifecycle: QuoteLifecycle::new(),
            numbers,
            prefix: prefix.into(),
            validity_days,
        }
    }

    pub fn from_state(
        state: QuoteState,
        numbers: Arc<DocumentSequence>,
        prefix: impl Into<String>,
        validity_days: i64,
    ) -> Self {
        let book = Self::new(numbers, prefix, validity_days);
        for quote in state.quotes {
            book.tokens.insert(quote.public_token.clone(), quote.id);
            book.quotes.insert(quote.id, quote);
        }
        book
    }

    pub fn export(&self) -> QuoteState {
        let mut quotes: Vec<Quote> = self.quotes.iter().map(|e| e.value().clone()).collect();
        quotes.sort_by_key(|q| (q.created_at, q.id));
        QuoteState { quotes }
    }

    pub fn create(&self, organization_id: Uuid, new: NewQuote, today: NaiveDate) -> TripdeskResult<Quote> {
        new.customer.validate()?;
        if new.end_date < new.start_date {
            return Err(TripdeskError::validation("trip ends before it starts"));
        }
        if new.party.adults == 0 {
            return Err(TripdeskError::validation("at least one adult is required"));
        }
        let valid_until = new
            .valid_until
            .unwrap_or(today + Duration::days(self.validity_days));
        if valid_until < today {
            return Err(TripdeskError::validation("valid_until is in the past"));
        }

        let now = Utc::now();
        let quote = Quote {
            id: Uuid::new_v4(),
            organization_id,
            quote_number: self
                .numbers
                .next(&organization_id.to_string(), &self.prefix, today.year()),
            public_token: public_token(),
            created_by: new.created_by,
            customer: new.customer,
            destination: new.destination.trim().to_string(),
            start_date: new.start_date,
            end_date: new.end_date,
            party: new.party,
            agent_id: new.agent_id,
            client_id: None,
            currency: new.currency,
            days: Vec::new(),
            pricing: None,
            total: Money::zero(new.currency),
            status: QuoteStatus::Draft,
            valid_until,
            sent_at: None,
            viewed_at: None,
            accepted_at: None,
            rejected_at: None,
            rejection_reason: None,
            expired_at: None,
            created_at: now,
            updated_at: now,
        };

        self.tokens.insert(quote.public_token.clone(), quote.id);
        self.quotes.insert(quote.id, quote.clone());
        metrics::counter!("quotes.created").increment(1);
        info!(org_id = %organization_id, quote_id = %quote.id, number = %quote.quote_number, "Quote created");
        Ok(quote)
    }

    pub fn get(&self, id: Uuid) -> TripdeskResult<Quote> {
        self.quotes
            .get(&id)
            .map(|e| e.value().clone())
            .ok_or_else(|| TripdeskError::not_found("quote", id))
    }

    pub fn get_by_token(&self, token: &str) -> TripdeskResult<Quote> {
        let id = self
            .tokens
            .get(token)
            .map(|e| *e.value())
            .ok_or_else(|| TripdeskError::not_found("quote", "token"))?;
        self.get(id)
    }

    pub fn list(&self, organization_id: Uuid, status: Option<QuoteStatus>) -> Vec<Quote> {
        let mut quotes: Vec<Quote> = self
            .quotes
            .iter()
            .filter(|e| {
                let q = e.value();
                q.organization_id == organization_id && status.map_or(true, |s| q.status == s)
            })
            .map(|e| e.value().clone())
            .collect();
        quotes.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        quotes
    }

    /// Point the quote at a client register entry, or clear the link.
    pub fn assign_client(&self, id: Uuid, client_id: Option<Uuid>) -> TripdeskResult<Quote> {
        let mut quote = self
            .quotes
            .get_mut(&id)
            .ok_or_else(|| TripdeskError::not_found("quote", id))?;
        quote.client_id = client_id;
        quote.updated_at = Utc::now();
        Ok(quote.clone())
    }

    pub fn for_client(&self, client_id: Uuid) -> Vec<Quote> {
        let mut quotes: Vec<Quote> = self
            .quotes
            .iter()
            .filter(|e| e.value().client_id == Some(client_id))
            .map(|e| e.value().clone())
            .collect();
        quotes.sort_by_key(|q| (q.created_at, q.id));
        quotes
    }

    /// Replace days and pricing. Only drafts can be repriced.
    pub fn reprice(&self, id: Uuid, days: Vec<QuoteDay>, pricing: PriceBreakdown) -> TripdeskResult<Quote> {
        let mut quote = self
            .quotes
            .get_mut(&id)
            .ok_or_else(|| TripdeskError::not_found("quote", id))?;
        if quote.status != QuoteStatus::Draft {
            return Err(TripdeskError::Conflict(format!(
                "quote {} is {:?}; only drafts can be repriced",
                quote.quote_number, quote.status
            )));
        }
        if pricing.currency != quote.currency {
            return Err(TripdeskError::CurrencyMismatch {
                expected: quote.currency,
                found: pricing.currency,
            });
        }
        quote.total = pricing.total;
        quote.days = days;
        quote.pricing = Some(pricing);
        quote.updated_at = Utc::now();
        info!(quote_id = %id, total = %quote.total, "Quote repriced");
        Ok(quote.clone())
    }

    fn transition(
        &self,
        id: Uuid,
        to: QuoteStatus,
        apply: impl FnOnce(&mut Quote, DateTime<Utc>),
    ) -> TripdeskResult<Quote> {
        let mut quote = self
            .quotes
            .get_mut(&id)
            .ok_or_else(|| TripdeskError::not_found("quote", id))?;
        self.lifecycle.check(quote.status, to)?;
        let now = Utc::now();
        let from = quote.status;
        quote.status = to;
        quote.updated_at = now;
        apply(quote.value_mut(), now);
        metrics::counter!("quotes.transitions", "to" => to.as_str()).increment(1);
        info!(quote_id = %id, from = ?from, to = ?to, "Quote status changed");
        Ok(quote.clone())
    }

    pub fn send(&self, id: Uuid) -> TripdeskResult<Quote> {
        let quote = self.get(id)?;
        if quote.pricing.is_none() {
            return Err(TripdeskError::validation("quote must be priced before sending"));
        }
        self.transition(id, QuoteStatus::Sent, |q, now| q.sent_at = Some(now))
    }

    /// Record that the customer opened the quote. Repeat views are a no-op.
    pub fn mark_viewed(&self, id: Uuid) -> TripdeskResult<Quote> {
        let quote = self.get(id)?;
        if quote.status == QuoteStatus::Viewed {
            return Ok(quote);
        }
        self.transition(id, QuoteStatus::Viewed, |q, now| q.viewed_at = Some(now))
    }

    pub fn accept(&self, id: Uuid, today: NaiveDate) -> TripdeskResult<Quote> {
        let quote = self.get(id)?;
        if quote.status.is_open() && today > quote.valid_until {
            return Err(TripdeskError::validation(format!(
                "quote {} expired on {}",
                quote.quote_number, quote.valid_until
            )));
        }
        self.transition(id, QuoteStatus::Accepted, |q, now| q.accepted_at = Some(now))
    }

    pub fn reject(&self, id: Uuid, reason: Option<String>) -> TripdeskResult<Quote> {
        let reason = reason.map(|r| r.trim().to_string()).filter(|r| !r.is_empty());
        self.transition(id, QuoteStatus::Rejected, |q, now| {
            q.rejected_at = Some(now);
            q.rejection_reason = reason;
        })
    }

    pub fn expire(&self, id: Uuid) -> TripdeskResult<Quote> {
        self.transition(id, QuoteStatus::Expired, |q, now| q.expired_at = Some(now))
    }

    /// Reopen a rejected or expired quote as a draft with a fresh validity window.
    pub fn revise(&self, id: Uuid, valid_until: NaiveDate) -> TripdeskResult<Quote> {
        self.transition(id, QuoteStatus::Draft, |q, _| {
            q.valid_until = valid_until;
            q.rejection_reason = None;
        })
    }

    /// Expire every open quote whose validity ended before `today`.
    pub fn expire_due(&self, today: NaiveDate) -> Vec<Quote> {
        let due: Vec<Uuid> = self
            .quotes
            .iter()
            .filter(|e| e.value().status.is_open() && e.value().valid_until < today)
            .map(|e| *e.key())
            .collect();
        due.into_iter().filter_map(|id| self.expire(id).ok()).collect()
    }

    pub fn count_by_status(&self, organization_id: Option<Uuid>) -> Vec<(QuoteStatus, usize)> {
        let mut counts: std::collections::HashMap<QuoteStatus, usize> = std::collections::HashMap::new();
        for e in self.quotes.iter() {
            if organization_id.map_or(true, |org| e.value().organization_id == org) {
                *counts.entry(e.value().status).or_default() += 1;
            }
        }
        let mut counts: Vec<(QuoteStatus, usize)> = counts.into_iter().collect();
        counts.sort_by_key(|(s, _)| s.as_str());
        counts
    }
}
