//! Tenant lifecycle operations for super admins: listing with activity
//! counts, suspend, reactivate and impersonation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use tripdesk_billing::CreditLedger;
use tripdesk_core::{Money, TripdeskError, TripdeskResult};
use tripdesk_finance::{BookingBook, QuoteBook};
use tripdesk_platform::tenancy::{OrgStatus, Organization, OrganizationRegistry};
use tripdesk_platform::{require_super_admin, Actor, AuditLog, StaffDirectory, User};

/// Per-organization row for the admin table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantRow {
    pub organization: Organization,
    pub users: usize,
    pub quotes: usize,
    pub bookings: usize,
    pub credit_balance: Option<Money>,
}

/// Result of a lifecycle action with before/after status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantOpResult {
    pub organization_id: Uuid,
    pub action: String,
    pub previous_status: OrgStatus,
    pub new_status: OrgStatus,
    pub reason: String,
    pub performed_by: Uuid,
    pub performed_at: DateTime<Utc>,
}

/// An identity a super admin can act through.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Impersonation {
    pub actor: Actor,
    pub target: User,
    pub organization: Organization,
}

pub struct TenantOps<'a> {
    orgs: &'a OrganizationRegistry,
    staff: &'a StaffDirectory,
    credits: &'a CreditLedger,
    quotes: &'a QuoteBook,
    bookings: &'a BookingBook,
    audit: &'a AuditLog,
}

impl<'a> TenantOps<'a> {
    pub fn new(
        orgs: &'a OrganizationRegistry,
        staff: &'a StaffDirectory,
        credits: &'a CreditLedger,
        quotes: &'a QuoteBook,
        bookings: &'a BookingBook,
        audit: &'a AuditLog,
    ) -> Self {
        Self {
            orgs,
            staff,
            credits,
            quotes,
            bookings,
            audit,
        }
    }

    pub fn list_with_stats(&self, admin: &Actor) -> TripdeskResult<Vec<TenantRow>> {
        require_super_admin(admin)?;
        Ok(self
            .orgs
            .list()
            .into_iter()
            .map(|org| TenantRow {
                users: self.staff.list_members(org.id).len(),
                quotes: self.quotes.list(org.id, None).len(),
                bookings: self.bookings.list(org.id, None).len(),
                credit_balance: self.credits.balance(org.id).ok(),
                organization: org,
            })
            .collect())
    }

    pub fn suspend(&self, admin: &Actor, organization_id: Uuid, reason: &str) -> TripdeskResult<TenantOpResult> {
        require_super_admin(admin)?;
        let previous = self.orgs.get(organization_id)?.status;
        let org = self.orgs.suspend(organization_id)?;
        Ok(self.finish(admin, "organization_suspend", previous, org.status, organization_id, reason))
    }

    pub fn reactivate(&self, admin: &Actor, organization_id: Uuid, reason: &str) -> TripdeskResult<TenantOpResult> {
        require_super_admin(admin)?;
        let previous = self.orgs.get(organization_id)?.status;
        let org = self.orgs.reactivate(organization_id)?;
        Ok(self.finish(admin, "organization_reactivate", previous, org.status, organization_id, reason))
    }

    fn finish(
        &self,
        admin: &Actor,
        action: &str,
        previous_status: OrgStatus,
        new_status: OrgStatus,
        organization_id: Uuid,
        reason: &str,
    ) -> TenantOpResult {
        self.audit.record(
            Some(organization_id),
            Some(admin),
            action,
            "organization",
            organization_id,
            json!({ "from": previous_status, "to": new_status, "reason": reason }),
        );
        info!(org_id = %organization_id, action, ?previous_status, ?new_status, "Tenant lifecycle action");
        TenantOpResult {
            organization_id,
            action: action.to_string(),
            previous_status,
            new_status,
            reason: reason.to_string(),
            performed_by: admin.user_id,
            performed_at: Utc::now(),
        }
    }

    /// Act as the organization's first active admin, or its first active
    /// user when it has no admin.
    pub fn impersonate(&self, admin: &Actor, organization_id: Uuid) -> TripdeskResult<Impersonation> {
        require_super_admin(admin)?;
        let organization = self.orgs.get(organization_id)?;
        if !organization.status.is_operational() {
            return Err(TripdeskError::Conflict(format!(
                "organization '{}' is {:?}",
                organization.name, organization.status
            )));
        }
        let target = self.staff.first_active_admin(organization_id).ok_or_else(|| {
            TripdeskError::Conflict(format!("organization '{}' has no active users", organization.name))
        })?;
        let actor = Actor::impersonating(&target, admin.user_id);

        self.audit.record(
            Some(organization_id),
            Some(admin),
            "impersonate_start",
            "user",
            target.id,
            json!({ "target_email": target.email }),
        );
        info!(admin_id = %admin.user_id, org_id = %organization_id, target = %target.email, "Impersonation started");
        Ok(Impersonation {
            actor,
            target,
            organization,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tripdesk_core::{Currency, DocumentSequence};
    use tripdesk_platform::{NewMember, NewOrganization, Role};

    struct Fixture {
        orgs: OrganizationRegistry,
        staff: StaffDirectory,
        credits: CreditLedger,
        quotes: QuoteBook,
        bookings: BookingBook,
        audit: AuditLog,
    }

    impl Fixture {
        fn new() -> Self {
            let numbers = Arc::new(DocumentSequence::new());
            Self {
                orgs: OrganizationRegistry::new(),
                staff: StaffDirectory::new(),
                credits: CreditLedger::new(Currency::Try),
                quotes: QuoteBook::new(numbers.clone(), "QT", 30),
                bookings: BookingBook::new(numbers, "BK"),
                audit: AuditLog::new(),
            }
        }

        fn ops(&self) -> TenantOps<'_> {
            TenantOps::new(&self.orgs, &self.staff, &self.credits, &self.quotes, &self.bookings, &self.audit)
        }

        fn org(&self, subdomain: &str) -> Organization {
            self.orgs
                .create(NewOrganization {
                    name: format!("{subdomain} tours"),
                    subdomain: subdomain.into(),
                    contact_email: format!("ops@{subdomain}.example"),
                    default_currency: Currency::Eur,
                    trial: false,
                })
                .unwrap()
        }

        fn member(&self, org: Uuid, email: &str, role: Role) -> User {
            self.staff
                .add_member(
                    org,
                    NewMember {
                        email: email.into(),
                        first_name: "Ayse".into(),
                        last_name: "Demir".into(),
                        role,
                    },
                )
                .unwrap()
        }

        fn admin(&self) -> Actor {
            let user = self
                .staff
                .create_super_admin("root@tripdesk.example", "Platform", "Admin")
                .unwrap();
            Actor::from_user(&user)
        }
    }

    #[test]
    fn test_suspend_and_reactivate() {
        let fx = Fixture::new();
        let admin = fx.admin();
        let org = fx.org("sunway");

        let result = fx.ops().suspend(&admin, org.id, "unpaid invoices").unwrap();
        assert_eq!(result.previous_status, OrgStatus::Active);
        assert_eq!(result.new_status, OrgStatus::Suspended);
        assert!(fx.ops().suspend(&admin, org.id, "again").is_err());

        let back = fx.ops().reactivate(&admin, org.id, "paid").unwrap();
        assert_eq!(back.new_status, OrgStatus::Active);
        assert_eq!(fx.audit.len(), 2);
    }

    #[test]
    fn test_operator_cannot_use_tenant_ops() {
        let fx = Fixture::new();
        let org = fx.org("sunway");
        let user = fx.member(org.id, "boss@sunway.example", Role::OrgAdmin);
        let actor = Actor::from_user(&user);
        assert!(matches!(
            fx.ops().suspend(&actor, org.id, "x"),
            Err(TripdeskError::Forbidden(_))
        ));
        assert!(fx.ops().list_with_stats(&actor).is_err());
    }

    #[test]
    fn test_impersonate_prefers_admin() {
        let fx = Fixture::new();
        let admin = fx.admin();
        let org = fx.org("sunway");
        fx.member(org.id, "agent@sunway.example", Role::OrgUser);
        let boss = fx.member(org.id, "boss@sunway.example", Role::OrgAdmin);

        let imp = fx.ops().impersonate(&admin, org.id).unwrap();
        assert_eq!(imp.target.id, boss.id);
        assert_eq!(imp.actor.impersonated_by, Some(admin.user_id));
        assert_eq!(imp.actor.organization_id, Some(org.id));

        let entries = fx.audit.query(&Default::default());
        assert_eq!(entries[0].action, "impersonate_start");
    }

    #[test]
    fn test_impersonate_requires_active_org() {
        let fx = Fixture::new();
        let admin = fx.admin();
        let org = fx.org("sunway");
        fx.member(org.id, "boss@sunway.example", Role::OrgAdmin);
        fx.ops().suspend(&admin, org.id, "fraud check").unwrap();
        assert!(matches!(
            fx.ops().impersonate(&admin, org.id),
            Err(TripdeskError::Conflict(_))
        ));
    }

    #[test]
    fn test_list_with_stats() {
        let fx = Fixture::new();
        let admin = fx.admin();
        let org = fx.org("sunway");
        fx.member(org.id, "boss@sunway.example", Role::OrgAdmin);
        fx.credits.open_account(org.id);

        let rows = fx.ops().list_with_stats(&admin).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].users, 1);
        assert_eq!(rows[0].credit_balance, Some(Money::zero(Currency::Try)));
    }
}
