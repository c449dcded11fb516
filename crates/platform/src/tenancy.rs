//! Multi-tenancy: operator organizations, their subdomains and lifecycle.

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use tripdesk_core::{Currency, TripdeskError, TripdeskResult};

/// Subdomains that route to the platform itself.
pub const RESERVED_SUBDOMAINS: &[&str] = &["www", "admin", "api", "app", "mail"];

/// Organization lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrgStatus {
    Active,
    Trial,
    Suspended,
    Cancelled,
}

impl OrgStatus {
    /// Whether tenant users may make changes.
    pub fn is_operational(&self) -> bool {
        matches!(self, Self::Active | Self::Trial)
    }
}

/// A tour operator tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Organization {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub subdomain: String,
    pub status: OrgStatus,
    pub contact_email: String,
    pub default_currency: Currency,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewOrganization {
    pub name: String,
    pub subdomain: String,
    pub contact_email: String,
    pub default_currency: Currency,
    pub trial: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TenancyState {
    pub organizations: Vec<Organization>,
}

/// Organization registry backed by DashMap, with a subdomain index.
pub struct OrganizationRegistry {
    orgs: DashMap<Uuid, Organization>,
    subdomains: DashMap<String, Uuid>,
}

impl Default for OrganizationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Check the subdomain shape and the reserved list.
pub fn validate_subdomain(subdomain: &str) -> TripdeskResult<()> {
    let len = subdomain.len();
    if !(3..=63).contains(&len) {
        return Err(TripdeskError::validation(
            "subdomain must be 3-63 characters",
        ));
    }
    if !subdomain
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Err(TripdeskError::validation(
            "subdomain may only contain lowercase letters, digits and '-'",
        ));
    }
    if subdomain.starts_with('-') || subdomain.ends_with('-') {
        return Err(TripdeskError::validation(
            "subdomain cannot start or end with '-'",
        ));
    }
    if RESERVED_SUBDOMAINS.contains(&subdomain) {
        return Err(TripdeskError::validation(format!(
            "subdomain '{subdomain}' is reserved"
        )));
    }
    Ok(())
}

fn slugify(name: &str) -> String {
    let raw: String = name
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '-' })
        .collect();
    raw.split('-')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

impl OrganizationRegistry {
    pub fn new() -> Self {
        Self {
            orgs: DashMap::new(),
            subdomains: DashMap::new(),
        }
    }

    pub fn from_state(state: TenancyState) -> Self {
        let registry = Self::new();
        for org in state.organizations {
            registry.subdomains.insert(org.subdomain.clone(), org.id);
            registry.orgs.insert(org.id, org);
        }
        registry
    }

    pub fn export(&self) -> TenancyState {
        let mut organizations = self.list();
        organizations.sort_by_key(|o| (o.created_at, o.id));
        TenancyState { organizations }
    }

    /// Register a new organization. The subdomain is claimed atomically.
    pub fn create(&self, new: NewOrganization) -> TripdeskResult<Organization> {
        let name = new.name.trim().to_string();
        if name.is_empty() || name.len() > 100 {
            return Err(TripdeskError::validation(
                "organization name must be 1-100 characters",
            ));
        }
        let subdomain = new.subdomain.trim().to_string();
        validate_subdomain(&subdomain)?;

        let now = Utc::now();
        let org = Organization {
            id: Uuid::new_v4(),
            slug: slugify(&name),
            name,
            subdomain: subdomain.clone(),
            status: if new.trial {
                OrgStatus::Trial
            } else {
                OrgStatus::Active
            },
            contact_email: new.contact_email,
            default_currency: new.default_currency,
            created_at: now,
            updated_at: now,
        };

        match self.subdomains.entry(subdomain) {
            Entry::Occupied(e) => {
                return Err(TripdeskError::Conflict(format!(
                    "subdomain '{}' is already taken",
                    e.key()
                )))
            }
            Entry::Vacant(e) => {
                e.insert(org.id);
            }
        }
        self.orgs.insert(org.id, org.clone());

        info!(org_id = %org.id, subdomain = %org.subdomain, "Organization created");
        Ok(org)
    }

    pub fn get(&self, id: Uuid) -> TripdeskResult<Organization> {
        self.orgs
            .get(&id)
            .map(|e| e.value().clone())
            .ok_or_else(|| TripdeskError::not_found("organization", id))
    }

    /// Public lookup used when a request arrives on `{subdomain}.<platform>`.
    pub fn get_by_subdomain(&self, subdomain: &str) -> TripdeskResult<Organization> {
        let id = self
            .subdomains
            .get(&subdomain.to_lowercase())
            .map(|e| *e.value())
            .ok_or_else(|| TripdeskError::not_found("organization", subdomain))?;
        self.get(id)
    }

    pub fn list(&self) -> Vec<Organization> {
        let mut orgs: Vec<Organization> = self.orgs.iter().map(|e| e.value().clone()).collect();
        orgs.sort_by(|a, b| a.name.cmp(&b.name));
        orgs
    }

    pub fn count(&self) -> usize {
        self.orgs.len()
    }

    pub fn suspend(&self, id: Uuid) -> TripdeskResult<Organization> {
        self.set_status(id, OrgStatus::Suspended, |from| from.is_operational())
    }

    /// Bring a suspended or cancelled organization back to Active.
    pub fn reactivate(&self, id: Uuid) -> TripdeskResult<Organization> {
        self.set_status(id, OrgStatus::Active, |from| {
            matches!(from, OrgStatus::Suspended | OrgStatus::Cancelled)
        })
    }

    pub fn cancel(&self, id: Uuid) -> TripdeskResult<Organization> {
        self.set_status(id, OrgStatus::Cancelled, |from| from != OrgStatus::Cancelled)
    }

    pub fn is_operational(&self, id: Uuid) -> TripdeskResult<bool> {
        Ok(self.get(id)?.status.is_operational())
    }

    /// Fails with `Forbidden` when the organization may not make changes.
    pub fn ensure_operational(&self, id: Uuid) -> TripdeskResult<()> {
        let org = self.get(id)?;
        if !org.status.is_operational() {
            return Err(TripdeskError::Forbidden(format!(
                "organization is {:?}",
                org.status
            )));
        }
        Ok(())
    }

    fn set_status(
        &self,
        id: Uuid,
        to: OrgStatus,
        allowed: impl Fn(OrgStatus) -> bool,
    ) -> TripdeskResult<Organization> {
        let mut entry = self
            .orgs
            .get_mut(&id)
            .ok_or_else(|| TripdeskError::not_found("organization", id))?;
        if !allowed(entry.status) {
            return Err(TripdeskError::transition("organization", entry.status, to));
        }
        entry.status = to;
        entry.updated_at = Utc::now();
        info!(org_id = %id, status = ?to, "Organization status changed");
        Ok(entry.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_org(name: &str, subdomain: &str) -> NewOrganization {
        NewOrganization {
            name: name.into(),
            subdomain: subdomain.into(),
            contact_email: "ops@example.com".into(),
            default_currency: Currency::Eur,
            trial: false,
        }
    }

    #[test]
    fn test_create_organization() {
        let reg = OrganizationRegistry::new();
        let org = reg.create(new_org("Blue Anatolia Tours", "blue-anatolia")).unwrap();

        assert_eq!(org.slug, "blue-anatolia-tours");
        assert_eq!(org.status, OrgStatus::Active);
        assert_eq!(reg.get_by_subdomain("blue-anatolia").unwrap().id, org.id);
    }

    #[test]
    fn test_subdomain_rules() {
        assert!(validate_subdomain("ab").is_err());
        assert!(validate_subdomain("-agency").is_err());
        assert!(validate_subdomain("agency-").is_err());
        assert!(validate_subdomain("Agency").is_err());
        assert!(validate_subdomain("admin").is_err());
        assert!(validate_subdomain("istanbul-2").is_ok());
        assert!(validate_subdomain(&"a".repeat(64)).is_err());
    }

    #[test]
    fn test_duplicate_subdomain_conflicts() {
        let reg = OrganizationRegistry::new();
        reg.create(new_org("One", "cappadocia")).unwrap();
        let err = reg.create(new_org("Two", "cappadocia")).unwrap_err();
        assert!(matches!(err, TripdeskError::Conflict(_)));
        assert_eq!(reg.count(), 1);
    }

    #[test]
    fn test_suspend_and_reactivate() {
        let reg = OrganizationRegistry::new();
        let org = reg.create(new_org("One", "one-tours")).unwrap();

        reg.suspend(org.id).unwrap();
        assert!(!reg.is_operational(org.id).unwrap());
        assert!(matches!(
            reg.ensure_operational(org.id),
            Err(TripdeskError::Forbidden(_))
        ));
        assert!(reg.suspend(org.id).is_err());

        reg.reactivate(org.id).unwrap();
        assert!(reg.is_operational(org.id).unwrap());
        assert!(reg.reactivate(org.id).is_err());
    }

    #[test]
    fn test_state_roundtrip_keeps_index() {
        let reg = OrganizationRegistry::new();
        reg.create(new_org("One", "one-tours")).unwrap();
        let restored = OrganizationRegistry::from_state(reg.export());
        assert!(restored.get_by_subdomain("one-tours").is_ok());
        assert!(restored.create(new_org("Dup", "one-tours")).is_err());
    }
}
