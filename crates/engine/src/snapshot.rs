//! Whole-state JSON snapshots. A save writes a sibling temp file and renames
//! it over the target, so a crash mid-write leaves the previous state intact.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use tripdesk_billing::credits::CreditState;
use tripdesk_billing::invoices::CreditInvoiceState;
use tripdesk_billing::subscriptions::SubscriptionState;
use tripdesk_billing::usage_rates::UsageRateState;
use tripdesk_core::numbering::SequenceState;
use tripdesk_core::{AppConfig, TripdeskError, TripdeskResult};
use tripdesk_finance::agents::AgentState;
use tripdesk_finance::bookings::BookingState;
use tripdesk_finance::clients::ClientState;
use tripdesk_finance::payables::PayablesState;
use tripdesk_finance::quotes::QuoteState;
use tripdesk_finance::receivables::ReceivablesState;
use tripdesk_finance::requests::RequestState;
use tripdesk_platform::audit::AuditState;
use tripdesk_platform::staff::StaffState;
use tripdesk_platform::tenancy::TenancyState;
use tripdesk_pricing::catalog::CatalogState;

use crate::Tripdesk;

pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: u32,
    pub saved_at: Option<DateTime<Utc>>,
    pub sequences: SequenceState,
    pub tenancy: TenancyState,
    pub staff: StaffState,
    pub audit: AuditState,
    pub catalog: CatalogState,
    pub quotes: QuoteState,
    pub bookings: BookingState,
    pub receivables: ReceivablesState,
    pub payables: PayablesState,
    pub agents: AgentState,
    #[serde(default)]
    pub clients: ClientState,
    #[serde(default)]
    pub requests: RequestState,
    pub credits: CreditState,
    pub credit_invoices: CreditInvoiceState,
    pub subscriptions: SubscriptionState,
    pub usage_rates: UsageRateState,
    pub itineraries: Vec<(Uuid, Uuid)>,
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

impl Snapshot {
    pub fn write_to(&self, path: &Path) -> TripdeskResult<()> {
        let bytes = serde_json::to_vec_pretty(self)?;
        let tmp = temp_path(path);
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Read a snapshot; `None` when the file does not exist yet.
    pub fn read_from(path: &Path) -> TripdeskResult<Option<Snapshot>> {
        if !path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(path)?;
        let snapshot: Snapshot = serde_json::from_slice(&bytes)?;
        if snapshot.version > SNAPSHOT_VERSION {
            return Err(TripdeskError::Config(format!(
                "state file {} has version {}, this build reads up to {}",
                path.display(),
                snapshot.version,
                SNAPSHOT_VERSION
            )));
        }
        Ok(Some(snapshot))
    }
}

impl Tripdesk {
    pub fn snapshot(&self) -> Snapshot {
        let mut itineraries: Vec<(Uuid, Uuid)> =
            self.itineraries.iter().map(|e| (*e.key(), *e.value())).collect();
        itineraries.sort();
        Snapshot {
            version: SNAPSHOT_VERSION,
            saved_at: Some(Utc::now()),
            sequences: self.numbers.export(),
            tenancy: self.orgs.export(),
            staff: self.staff.export(),
            audit: self.audit.export(),
            catalog: self.catalog.export(),
            quotes: self.quotes.export(),
            bookings: self.bookings.export(),
            receivables: self.receivables.export(),
            payables: self.payables.export(),
            agents: self.agents.export(),
            clients: self.clients.export(),
            requests: self.requests.export(),
            credits: self.credits.export(),
            credit_invoices: self.credit_invoices.export(),
            subscriptions: self.subscriptions.export(),
            usage_rates: self.usage_rates.export(),
            itineraries,
        }
    }

    pub fn save(&self, path: impl AsRef<Path>) -> TripdeskResult<()> {
        let path = path.as_ref();
        self.snapshot().write_to(path)?;
        info!(path = %path.display(), "State saved");
        Ok(())
    }

    /// Open the state at `path`, or start empty when there is none.
    pub fn load(config: AppConfig, path: impl AsRef<Path>) -> TripdeskResult<Self> {
        let path = path.as_ref();
        match Snapshot::read_from(path)? {
            Some(snapshot) => {
                info!(path = %path.display(), saved_at = ?snapshot.saved_at, "State loaded");
                Ok(Self::from_snapshot(config, snapshot))
            }
            None => {
                info!(path = %path.display(), "No state file, starting empty");
                Ok(Self::new(config))
            }
        }
    }
}
