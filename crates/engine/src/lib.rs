//! The Tripdesk facade. Owns every engine plus the application config and
//! exposes the operations the CLIs call.
//!
//! Every tenant-scoped operation takes the acting [`Actor`], checks it with
//! [`authorize`] against the organization that owns the record, refuses
//! writes for suspended or cancelled organizations, performs the change and
//! appends an audit entry.

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use dashmap::{DashMap, DashSet};
use uuid::Uuid;

use tripdesk_billing::{CreditInvoiceBook, CreditLedger, SubscriptionBook, UsageRateBook};
use tripdesk_core::{AppConfig, DocumentSequence, TripdeskResult};
use tripdesk_finance::{AgentLedger, BookingBook, ClientBook, PayablesLedger, QuoteBook, ReceivablesLedger, RequestBook};
use tripdesk_platform::{
    authorize, Actor, AuditLog, OrganizationRegistry, Permission, RateLimitConfig, RateLimiter, StaffDirectory,
};
use tripdesk_pricing::Catalog;

pub mod admin;
pub mod analytics;
pub mod clients;
pub mod credits;
pub mod ledgers;
pub mod operator;
pub mod quoting;
pub mod snapshot;
pub mod sweep;

pub use analytics::{DestinationStat, MonthlyRevenue, OrgAnalytics};
pub use clients::{ClientRegister, ClientSummary, RecalculationReport};
pub use ledgers::BookingTerms;
pub use operator::{Signup, SignupRequest};
pub use quoting::GenerateItinerary;
pub use snapshot::Snapshot;
pub use sweep::SweepReport;

pub struct Tripdesk {
    config: AppConfig,
    numbers: Arc<DocumentSequence>,
    orgs: OrganizationRegistry,
    staff: StaffDirectory,
    audit: AuditLog,
    public_limiter: RateLimiter,
    catalog: Catalog,
    quotes: QuoteBook,
    bookings: BookingBook,
    receivables: ReceivablesLedger,
    payables: PayablesLedger,
    agents: AgentLedger,
    clients: ClientBook,
    requests: RequestBook,
    credits: Arc<CreditLedger>,
    credit_invoices: CreditInvoiceBook,
    subscriptions: SubscriptionBook,
    usage_rates: UsageRateBook,
    /// itinerary id -> generated quote
    itineraries: DashMap<Uuid, Uuid>,
    /// itinerary ids with a generation in progress
    generating: DashSet<Uuid>,
}

impl Tripdesk {
    pub fn new(config: AppConfig) -> Self {
        Self::from_snapshot(config, Snapshot::default())
    }

    pub fn from_snapshot(config: AppConfig, snapshot: Snapshot) -> Self {
        let numbers = Arc::new(DocumentSequence::from_state(snapshot.sequences));
        let credits = Arc::new(CreditLedger::from_state(snapshot.credits, config.billing.currency));
        let finance = &config.finance;

        let itineraries = DashMap::new();
        for (itinerary, quote) in snapshot.itineraries {
            itineraries.insert(itinerary, quote);
        }

        Self {
            orgs: OrganizationRegistry::from_state(snapshot.tenancy),
            staff: StaffDirectory::from_state(snapshot.staff),
            audit: AuditLog::from_state(snapshot.audit),
            public_limiter: RateLimiter::new(RateLimitConfig {
                max_requests: config.public.rate_limit_max_requests,
                window_secs: config.public.rate_limit_window_secs,
            }),
            catalog: Catalog::from_state(snapshot.catalog),
            quotes: QuoteBook::from_state(
                snapshot.quotes,
                numbers.clone(),
                finance.quote_prefix.clone(),
                finance.quote_validity_days,
            ),
            bookings: BookingBook::from_state(snapshot.bookings, numbers.clone(), finance.booking_prefix.clone()),
            receivables: ReceivablesLedger::from_state(
                snapshot.receivables,
                numbers.clone(),
                finance.invoice_prefix.clone(),
            ),
            payables: PayablesLedger::from_state(
                snapshot.payables,
                finance.default_currency,
                finance.payables_due_soon_days,
            ),
            agents: AgentLedger::from_state(snapshot.agents),
            clients: ClientBook::from_state(snapshot.clients),
            requests: RequestBook::from_state(snapshot.requests, numbers.clone(), finance.request_prefix.clone()),
            credit_invoices: CreditInvoiceBook::from_state(
                snapshot.credit_invoices,
                numbers.clone(),
                credits.clone(),
                config.billing.clone(),
            ),
            subscriptions: SubscriptionBook::from_state(snapshot.subscriptions, credits.clone()),
            usage_rates: UsageRateBook::from_state(snapshot.usage_rates, credits.clone()),
            credits,
            numbers,
            itineraries,
            generating: DashSet::new(),
            config,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Resolve a user id into the identity operations run as.
    pub fn actor_for(&self, user_id: Uuid) -> TripdeskResult<Actor> {
        let actor = self.staff.actor_for(user_id)?;
        self.staff.record_login(user_id)?;
        Ok(actor)
    }

    /// Resolve a login email into an actor.
    pub fn actor_by_email(&self, email: &str) -> TripdeskResult<Actor> {
        let user = self
            .staff
            .find_by_email(email)
            .ok_or_else(|| tripdesk_core::TripdeskError::not_found("user", email))?;
        self.actor_for(user.id)
    }

    fn guard_read(&self, actor: &Actor, organization_id: Uuid, permission: Permission) -> TripdeskResult<()> {
        authorize(actor, organization_id, permission)
    }

    fn guard_write(&self, actor: &Actor, organization_id: Uuid, permission: Permission) -> TripdeskResult<()> {
        authorize(actor, organization_id, permission)?;
        self.orgs.ensure_operational(organization_id)
    }

    fn record(
        &self,
        actor: Option<&Actor>,
        organization_id: Uuid,
        action: &str,
        resource_type: &str,
        resource_id: impl ToString,
        details: serde_json::Value,
    ) {
        self.audit
            .record(Some(organization_id), actor, action, resource_type, resource_id, details);
    }

    fn today() -> NaiveDate {
        Utc::now().date_naive()
    }
}
