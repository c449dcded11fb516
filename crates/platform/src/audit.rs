//! Activity log: tamper-evident, append-only, with SHA-256 hash chaining.
//!
//! Every state change performed on behalf of an actor lands here, including
//! the super admin behind an impersonated session.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::info;
use uuid::Uuid;

use crate::authz::Actor;

const GENESIS: &str = "genesis";

/// A single audit entry with tamper-evident hash chaining.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub sequence: u64,
    pub organization_id: Option<Uuid>,
    pub actor_id: Option<Uuid>,
    pub impersonated_by: Option<Uuid>,
    pub action: String,
    pub resource_type: String,
    pub resource_id: String,
    pub details: serde_json::Value,
    pub timestamp: DateTime<Utc>,
    /// SHA-256 hash of this entry's content.
    pub event_hash: String,
    /// Hash of the previous entry (`genesis` for the first).
    pub previous_hash: String,
}

impl AuditEntry {
    fn content_hash(&self) -> String {
        let content = format!(
            "{}:{}:{}:{}:{}:{}:{}:{}:{}:{}",
            self.sequence,
            self.organization_id.map(|id| id.to_string()).unwrap_or_default(),
            self.actor_id.map(|id| id.to_string()).unwrap_or_default(),
            self.impersonated_by.map(|id| id.to_string()).unwrap_or_default(),
            self.action,
            self.resource_type,
            self.resource_id,
            self.details,
            self.timestamp.to_rfc3339(),
            self.previous_hash,
        );
        sha256_hex(&content)
    }
}

#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub organization_id: Option<Uuid>,
    pub actor_id: Option<Uuid>,
    pub action: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

/// Result of verifying the audit chain integrity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainVerification {
    pub total_events: usize,
    pub valid_events: usize,
    pub tampered_sequences: Vec<u64>,
    pub chain_intact: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditState {
    pub entries: Vec<AuditEntry>,
}

struct ChainHead {
    sequence: u64,
    last_hash: String,
}

pub struct AuditLog {
    entries: DashMap<Uuid, AuditEntry>,
    head: Mutex<ChainHead>,
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new()
    }
}

impl AuditLog {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            head: Mutex::new(ChainHead {
                sequence: 0,
                last_hash: GENESIS.to_string(),
            }),
        }
    }

    pub fn from_state(state: AuditState) -> Self {
        let log = Self::new();
        {
            let mut head = log.head.lock();
            for entry in state.entries {
                if entry.sequence >= head.sequence {
                    head.sequence = entry.sequence;
                    head.last_hash = entry.event_hash.clone();
                }
                log.entries.insert(entry.id, entry);
            }
        }
        log
    }

    pub fn export(&self) -> AuditState {
        let mut entries: Vec<AuditEntry> = self.entries.iter().map(|e| e.value().clone()).collect();
        entries.sort_by_key(|e| e.sequence);
        AuditState { entries }
    }

    /// Append an entry. `actor` is `None` for public (unauthenticated) actions.
    pub fn record(
        &self,
        organization_id: Option<Uuid>,
        actor: Option<&Actor>,
        action: &str,
        resource_type: &str,
        resource_id: impl ToString,
        details: serde_json::Value,
    ) -> AuditEntry {
        let mut entry = AuditEntry {
            id: Uuid::new_v4(),
            sequence: 0,
            organization_id,
            actor_id: actor.map(|a| a.user_id),
            impersonated_by: actor.and_then(|a| a.impersonated_by),
            action: action.to_string(),
            resource_type: resource_type.to_string(),
            resource_id: resource_id.to_string(),
            details,
            timestamp: Utc::now(),
            event_hash: String::new(),
            previous_hash: String::new(),
        };

        {
            let mut head = self.head.lock();
            head.sequence += 1;
            entry.sequence = head.sequence;
            entry.previous_hash = head.last_hash.clone();
            entry.event_hash = entry.content_hash();
            head.last_hash = entry.event_hash.clone();
            self.entries.insert(entry.id, entry.clone());
        }

        info!(
            sequence = entry.sequence,
            org_id = ?entry.organization_id,
            action = %entry.action,
            resource = %entry.resource_type,
            resource_id = %entry.resource_id,
            "Audit entry recorded"
        );
        entry
    }

    /// Matching entries, newest first.
    pub fn query(&self, filter: &AuditFilter) -> Vec<AuditEntry> {
        let mut results: Vec<AuditEntry> = self
            .entries
            .iter()
            .filter(|e| {
                let ev = e.value();
                if filter.organization_id.is_some() && ev.organization_id != filter.organization_id {
                    return false;
                }
                if filter.actor_id.is_some() && ev.actor_id != filter.actor_id {
                    return false;
                }
                if let Some(ref action) = filter.action {
                    if &ev.action != action {
                        return false;
                    }
                }
                if let Some(ref f) = filter.from {
                    if ev.timestamp < *f {
                        return false;
                    }
                }
                if let Some(ref t) = filter.to {
                    if ev.timestamp > *t {
                        return false;
                    }
                }
                true
            })
            .map(|e| e.value().clone())
            .collect();

        results.sort_by(|a, b| b.sequence.cmp(&a.sequence));
        if let Some(limit) = filter.limit {
            results.truncate(limit);
        }
        results
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn verify_chain(&self) -> ChainVerification {
        let entries = self.export().entries;

        let total = entries.len();
        let mut valid = 0;
        let mut tampered = Vec::new();
        let mut expected_prev = GENESIS.to_string();

        for entry in &entries {
            if entry.previous_hash == expected_prev && entry.content_hash() == entry.event_hash {
                valid += 1;
            } else {
                tampered.push(entry.sequence);
            }
            expected_prev = entry.event_hash.clone();
        }

        ChainVerification {
            total_events: total,
            valid_events: valid,
            tampered_sequences: tampered,
            chain_intact: valid == total,
        }
    }
}

fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}
