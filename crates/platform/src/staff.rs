//! Staff accounts: platform super admins and per-organization members.

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use tripdesk_core::{TripdeskError, TripdeskResult};

use crate::authz::Actor;
use crate::validation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    SuperAdmin,
    OrgAdmin,
    OrgUser,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserStatus {
    Active,
    Disabled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    /// `None` only for super admins.
    pub organization_id: Option<Uuid>,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub role: Role,
    pub status: UserStatus,
    pub created_at: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
}

impl User {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }

    pub fn is_active(&self) -> bool {
        self.status == UserStatus::Active
    }
}

#[derive(Debug, Clone)]
pub struct NewMember {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub role: Role,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StaffState {
    pub users: Vec<User>,
}

/// User directory. Emails are unique platform-wide, compared case-insensitively.
pub struct StaffDirectory {
    users: DashMap<Uuid, User>,
    emails: DashMap<String, Uuid>,
    /// Serializes role and status changes so the last-admin check cannot race.
    admin_lock: Mutex<()>,
}

impl Default for StaffDirectory {
    fn default() -> Self {
        Self::new()
    }
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

impl StaffDirectory {
    pub fn new() -> Self {
        Self {
            users: DashMap::new(),
            emails: DashMap::new(),
            admin_lock: Mutex::new(()),
        }
    }

    pub fn from_state(state: StaffState) -> Self {
        let dir = Self::new();
        for user in state.users {
            dir.emails.insert(normalize_email(&user.email), user.id);
            dir.users.insert(user.id, user);
        }
        dir
    }

    pub fn export(&self) -> StaffState {
        let mut users: Vec<User> = self.users.iter().map(|e| e.value().clone()).collect();
        users.sort_by_key(|u| (u.created_at, u.id));
        StaffState { users }
    }

    pub fn create_super_admin(
        &self,
        email: &str,
        first_name: &str,
        last_name: &str,
    ) -> TripdeskResult<User> {
        self.insert(None, email, first_name, last_name, Role::SuperAdmin)
    }

    /// Add a member to an organization. Only OrgAdmin and OrgUser roles are allowed.
    pub fn add_member(&self, organization_id: Uuid, member: NewMember) -> TripdeskResult<User> {
        if member.role == Role::SuperAdmin {
            return Err(TripdeskError::validation(
                "organization members must be org_admin or org_user",
            ));
        }
        self.insert(
            Some(organization_id),
            &member.email,
            &member.first_name,
            &member.last_name,
            member.role,
        )
    }

    fn insert(
        &self,
        organization_id: Option<Uuid>,
        email: &str,
        first_name: &str,
        last_name: &str,
        role: Role,
    ) -> TripdeskResult<User> {
        let email = normalize_email(email);
        if !validation::is_valid_email(&email) {
            return Err(TripdeskError::validation(format!("invalid email '{email}'")));
        }
        if !validation::is_valid_name(first_name.trim()) || !validation::is_valid_name(last_name.trim())
        {
            return Err(TripdeskError::validation(
                "first and last name must be 1-100 characters",
            ));
        }

        let user = User {
            id: Uuid::new_v4(),
            organization_id,
            email: email.clone(),
            first_name: first_name.trim().to_string(),
            last_name: last_name.trim().to_string(),
            role,
            status: UserStatus::Active,
            created_at: Utc::now(),
            last_login: None,
        };

        match self.emails.entry(email) {
            Entry::Occupied(e) => {
                return Err(TripdeskError::Conflict(format!(
                    "email '{}' is already registered",
                    e.key()
                )))
            }
            Entry::Vacant(e) => {
                e.insert(user.id);
            }
        }
        self.users.insert(user.id, user.clone());

        info!(user_id = %user.id, org_id = ?organization_id, role = ?role, "User created");
        Ok(user)
    }

    pub fn get(&self, id: Uuid) -> TripdeskResult<User> {
        self.users
            .get(&id)
            .map(|e| e.value().clone())
            .ok_or_else(|| TripdeskError::not_found("user", id))
    }

    pub fn find_by_email(&self, email: &str) -> Option<User> {
        let id = *self.emails.get(&normalize_email(email))?.value();
        self.get(id).ok()
    }

    /// Resolve an acting identity. Disabled users cannot act.
    pub fn actor_for(&self, user_id: Uuid) -> TripdeskResult<Actor> {
        let user = self.get(user_id)?;
        if !user.is_active() {
            return Err(TripdeskError::Forbidden("user is disabled".into()));
        }
        Ok(Actor::from_user(&user))
    }

    pub fn list_members(&self, organization_id: Uuid) -> Vec<User> {
        let mut members: Vec<User> = self
            .users
            .iter()
            .filter(|e| e.value().organization_id == Some(organization_id))
            .map(|e| e.value().clone())
            .collect();
        members.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        members
    }

    pub fn count(&self) -> usize {
        self.users.len()
    }

    fn active_admins(&self, organization_id: Uuid) -> usize {
        self.users
            .iter()
            .filter(|e| {
                let u = e.value();
                u.organization_id == Some(organization_id)
                    && u.role == Role::OrgAdmin
                    && u.is_active()
            })
            .count()
    }

    /// Would removing `user`'s admin capacity leave the org without an active admin?
    fn is_last_admin(&self, user: &User) -> bool {
        match user.organization_id {
            Some(org) if user.role == Role::OrgAdmin && user.is_active() => {
                self.active_admins(org) <= 1
            }
            _ => false,
        }
    }

    pub fn change_role(&self, acting_user: Uuid, user_id: Uuid, role: Role) -> TripdeskResult<User> {
        if acting_user == user_id {
            return Err(TripdeskError::Forbidden("cannot change your own role".into()));
        }
        if role == Role::SuperAdmin {
            return Err(TripdeskError::validation(
                "organization members must be org_admin or org_user",
            ));
        }
        let _guard = self.admin_lock.lock();
        let user = self.get(user_id)?;
        if user.organization_id.is_none() {
            return Err(TripdeskError::Forbidden("cannot change a super admin role".into()));
        }
        if role != Role::OrgAdmin && self.is_last_admin(&user) {
            return Err(TripdeskError::Conflict(
                "organization must keep at least one active admin".into(),
            ));
        }
        let mut entry = self
            .users
            .get_mut(&user_id)
            .ok_or_else(|| TripdeskError::not_found("user", user_id))?;
        entry.role = role;
        info!(user_id = %user_id, role = ?role, "User role changed");
        Ok(entry.clone())
    }

    pub fn disable(&self, acting_user: Uuid, user_id: Uuid) -> TripdeskResult<User> {
        if acting_user == user_id {
            return Err(TripdeskError::Forbidden("cannot disable yourself".into()));
        }
        let _guard = self.admin_lock.lock();
        let user = self.get(user_id)?;
        if self.is_last_admin(&user) {
            return Err(TripdeskError::Conflict(
                "organization must keep at least one active admin".into(),
            ));
        }
        self.set_status(user_id, UserStatus::Disabled)
    }

    pub fn enable(&self, user_id: Uuid) -> TripdeskResult<User> {
        let _guard = self.admin_lock.lock();
        self.set_status(user_id, UserStatus::Active)
    }

    fn set_status(&self, user_id: Uuid, status: UserStatus) -> TripdeskResult<User> {
        let mut entry = self
            .users
            .get_mut(&user_id)
            .ok_or_else(|| TripdeskError::not_found("user", user_id))?;
        entry.status = status;
        info!(user_id = %user_id, status = ?status, "User status changed");
        Ok(entry.clone())
    }

    pub fn record_login(&self, user_id: Uuid) -> TripdeskResult<()> {
        let mut entry = self
            .users
            .get_mut(&user_id)
            .ok_or_else(|| TripdeskError::not_found("user", user_id))?;
        entry.last_login = Some(Utc::now());
        Ok(())
    }

    /// Impersonation target: the earliest active admin, else the earliest active user.
    pub fn first_active_admin(&self, organization_id: Uuid) -> Option<User> {
        let members: Vec<User> = self
            .list_members(organization_id)
            .into_iter()
            .filter(|u| u.is_active())
            .collect();
        members
            .iter()
            .find(|u| u.role == Role::OrgAdmin)
            .or_else(|| members.iter().find(|u| u.role == Role::OrgUser))
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(email: &str, role: Role) -> NewMember {
        NewMember {
            email: email.into(),
            first_name: "Ayse".into(),
            last_name: "Demir".into(),
            role,
        }
    }

    #[test]
    fn test_email_unique_case_insensitive() {
        let dir = StaffDirectory::new();
        let org = Uuid::new_v4();
        dir.add_member(org, member("Ops@Agency.com", Role::OrgAdmin)).unwrap();
        let err = dir
            .add_member(Uuid::new_v4(), member("ops@agency.COM", Role::OrgUser))
            .unwrap_err();
        assert!(matches!(err, TripdeskError::Conflict(_)));
        assert!(dir.find_by_email("OPS@agency.com").is_some());
    }

    #[test]
    fn test_member_cannot_be_super_admin() {
        let dir = StaffDirectory::new();
        assert!(dir
            .add_member(Uuid::new_v4(), member("x@agency.com", Role::SuperAdmin))
            .is_err());
        assert!(dir
            .add_member(Uuid::new_v4(), member("not-an-email", Role::OrgUser))
            .is_err());
    }

    #[test]
    fn test_last_admin_protected() {
        let dir = StaffDirectory::new();
        let org = Uuid::new_v4();
        let admin = dir.add_member(org, member("a@agency.com", Role::OrgAdmin)).unwrap();
        let other = dir.add_member(org, member("b@agency.com", Role::OrgAdmin)).unwrap();

        dir.change_role(admin.id, other.id, Role::OrgUser).unwrap();
        // `admin` is now the only active admin.
        assert!(matches!(
            dir.disable(other.id, admin.id),
            Err(TripdeskError::Conflict(_))
        ));
        assert!(matches!(
            dir.change_role(other.id, admin.id, Role::OrgUser),
            Err(TripdeskError::Conflict(_))
        ));
    }

    #[test]
    fn test_no_self_service_role_or_disable() {
        let dir = StaffDirectory::new();
        let org = Uuid::new_v4();
        let admin = dir.add_member(org, member("a@agency.com", Role::OrgAdmin)).unwrap();
        assert!(matches!(
            dir.change_role(admin.id, admin.id, Role::OrgUser),
            Err(TripdeskError::Forbidden(_))
        ));
        assert!(matches!(
            dir.disable(admin.id, admin.id),
            Err(TripdeskError::Forbidden(_))
        ));
    }

    #[test]
    fn test_disabled_user_cannot_act() {
        let dir = StaffDirectory::new();
        let org = Uuid::new_v4();
        let admin = dir.add_member(org, member("a@agency.com", Role::OrgAdmin)).unwrap();
        let user = dir.add_member(org, member("u@agency.com", Role::OrgUser)).unwrap();
        dir.disable(admin.id, user.id).unwrap();
        assert!(dir.actor_for(user.id).is_err());
        dir.enable(user.id).unwrap();
        assert!(dir.actor_for(user.id).is_ok());
    }

    #[test]
    fn test_first_active_admin_prefers_admins() {
        let dir = StaffDirectory::new();
        let org = Uuid::new_v4();
        let user = dir.add_member(org, member("u@agency.com", Role::OrgUser)).unwrap();
        assert_eq!(dir.first_active_admin(org).unwrap().id, user.id);
        let admin = dir.add_member(org, member("a@agency.com", Role::OrgAdmin)).unwrap();
        assert_eq!(dir.first_active_admin(org).unwrap().id, admin.id);
        assert!(dir.first_active_admin(Uuid::new_v4()).is_none());
    }
}
