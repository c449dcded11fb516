//! Tenant authorization guard.
//!
//! Every tenant-scoped operation calls [`authorize`] with the acting identity,
//! the organization that owns the target record, and the permission needed.
//! Cross-tenant access is reported as `Forbidden`, never as `NotFound`.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use tripdesk_core::{TripdeskError, TripdeskResult};

use crate::staff::{Role, User};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    QuoteRead,
    QuoteWrite,
    BookingRead,
    BookingWrite,
    FinanceRead,
    FinanceWrite,
    PricingRead,
    PricingWrite,
    TeamManage,
    CreditRead,
    CreditPurchase,
    PlatformAdmin,
}

impl Permission {
    pub fn all() -> Vec<Permission> {
        vec![
            Permission::QuoteRead,
            Permission::QuoteWrite,
            Permission::BookingRead,
            Permission::BookingWrite,
            Permission::FinanceRead,
            Permission::FinanceWrite,
            Permission::PricingRead,
            Permission::PricingWrite,
            Permission::TeamManage,
            Permission::CreditRead,
            Permission::CreditPurchase,
            Permission::PlatformAdmin,
        ]
    }

    pub fn is_read(&self) -> bool {
        matches!(
            self,
            Self::QuoteRead
                | Self::BookingRead
                | Self::FinanceRead
                | Self::PricingRead
                | Self::CreditRead
        )
    }
}

impl Role {
    pub fn grants(&self, permission: Permission) -> bool {
        match self {
            Role::SuperAdmin => true,
            Role::OrgAdmin => permission != Permission::PlatformAdmin,
            Role::OrgUser => {
                permission.is_read()
                    || matches!(
                        permission,
                        Permission::QuoteWrite | Permission::BookingWrite | Permission::PricingWrite
                    )
            }
        }
    }

    pub fn permissions(&self) -> Vec<Permission> {
        Permission::all()
            .into_iter()
            .filter(|p| self.grants(*p))
            .collect()
    }
}

/// The identity an operation runs as.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: Uuid,
    pub role: Role,
    pub organization_id: Option<Uuid>,
    /// Super admin acting through this identity, if any.
    pub impersonated_by: Option<Uuid>,
}

impl Actor {
    pub fn from_user(user: &User) -> Self {
        Self {
            user_id: user.id,
            role: user.role,
            organization_id: user.organization_id,
            impersonated_by: None,
        }
    }

    pub fn impersonating(user: &User, admin_id: Uuid) -> Self {
        Self {
            impersonated_by: Some(admin_id),
            ..Self::from_user(user)
        }
    }

    pub fn is_super_admin(&self) -> bool {
        self.role == Role::SuperAdmin
    }

    /// The organization a non-admin actor belongs to.
    pub fn home_org(&self) -> TripdeskResult<Uuid> {
        self.organization_id
            .ok_or_else(|| TripdeskError::Forbidden("actor has no organization".into()))
    }
}

pub fn authorize(actor: &Actor, organization_id: Uuid, permission: Permission) -> TripdeskResult<()> {
    if actor.is_super_admin() {
        return Ok(());
    }
    if actor.organization_id != Some(organization_id) {
        return Err(TripdeskError::Forbidden(
            "resource belongs to another organization".into(),
        ));
    }
    if !actor.role.grants(permission) {
        return Err(TripdeskError::Forbidden(format!(
            "role {:?} lacks {:?}",
            actor.role, permission
        )));
    }
    Ok(())
}

pub fn require_super_admin(actor: &Actor) -> TripdeskResult<()> {
    if !actor.is_super_admin() {
        return Err(TripdeskError::Forbidden("super admin required".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn actor(role: Role, org: Option<Uuid>) -> Actor {
        Actor {
            user_id: Uuid::new_v4(),
            role,
            organization_id: org,
            impersonated_by: None,
        }
    }

    #[test]
    fn test_role_grants() {
        assert!(Role::OrgUser.grants(Permission::QuoteWrite));
        assert!(Role::OrgUser.grants(Permission::FinanceRead));
        assert!(!Role::OrgUser.grants(Permission::FinanceWrite));
        assert!(!Role::OrgUser.grants(Permission::TeamManage));
        assert!(!Role::OrgUser.grants(Permission::CreditPurchase));
        assert!(Role::OrgAdmin.grants(Permission::TeamManage));
        assert!(!Role::OrgAdmin.grants(Permission::PlatformAdmin));
        assert_eq!(Role::SuperAdmin.permissions().len(), Permission::all().len());
    }

    #[test]
    fn test_cross_org_forbidden() {
        let org_a = Uuid::new_v4();
        let org_b = Uuid::new_v4();
        let admin = actor(Role::OrgAdmin, Some(org_a));

        assert!(authorize(&admin, org_a, Permission::FinanceWrite).is_ok());
        assert!(matches!(
            authorize(&admin, org_b, Permission::QuoteRead),
            Err(TripdeskError::Forbidden(_))
        ));
    }

    #[test]
    fn test_super_admin_passes_any_org() {
        let sa = actor(Role::SuperAdmin, None);
        assert!(authorize(&sa, Uuid::new_v4(), Permission::FinanceWrite).is_ok());
        assert!(require_super_admin(&sa).is_ok());
        assert!(require_super_admin(&actor(Role::OrgAdmin, Some(Uuid::new_v4()))).is_err());
    }

    #[test]
    fn test_orgless_actor_forbidden() {
        let broken = actor(Role::OrgUser, None);
        assert!(authorize(&broken, Uuid::new_v4(), Permission::QuoteRead).is_err());
        assert!(broken.home_org().is_err());
    }
}
