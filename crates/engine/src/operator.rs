//! Operator onboarding and team management.

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use tripdesk_billing::{CreditAccount, CreditGrant, CreditTransaction, CreditTxKind};
use tripdesk_core::{Currency, Money, TripdeskError, TripdeskResult};
use tripdesk_platform::validation::is_valid_email;
use tripdesk_platform::{Actor, NewMember, NewOrganization, Organization, Permission, Role, User};

use crate::Tripdesk;

/// Self-service signup of a new tour operator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignupRequest {
    pub organization_name: String,
    pub subdomain: String,
    pub contact_email: String,
    /// Quote and booking currency; the configured finance default otherwise.
    pub default_currency: Option<Currency>,
    pub trial: bool,
    pub admin_email: String,
    pub admin_first_name: String,
    pub admin_last_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signup {
    pub organization: Organization,
    pub admin: User,
    pub credit_account: CreditAccount,
    pub bonus: Option<CreditTransaction>,
}

impl Tripdesk {
    /// Create the organization, its first admin and its credit account, and
    /// grant the configured signup bonus.
    pub fn signup_operator(&self, request: SignupRequest) -> TripdeskResult<Signup> {
        if !is_valid_email(&request.admin_email) {
            return Err(TripdeskError::validation(format!(
                "invalid admin email '{}'",
                request.admin_email
            )));
        }
        if self.staff.find_by_email(&request.admin_email).is_some() {
            return Err(TripdeskError::Conflict(format!(
                "a user with email '{}' already exists",
                request.admin_email
            )));
        }

        let organization = self.orgs.create(NewOrganization {
            name: request.organization_name,
            subdomain: request.subdomain,
            contact_email: request.contact_email,
            default_currency: request
                .default_currency
                .unwrap_or(self.config.finance.default_currency),
            trial: request.trial,
        })?;
        let admin = self.staff.add_member(
            organization.id,
            NewMember {
                email: request.admin_email,
                first_name: request.admin_first_name,
                last_name: request.admin_last_name,
                role: Role::OrgAdmin,
            },
        )?;
        let actor = Actor::from_user(&admin);

        self.credits.open_account(organization.id);
        let bonus_minor = self.config.billing.signup_bonus_minor;
        let bonus = if bonus_minor > 0 {
            Some(self.credits.add(
                organization.id,
                CreditGrant {
                    kind: CreditTxKind::Bonus,
                    amount: Money::new(bonus_minor, self.credits.currency()),
                    description: "Signup bonus".into(),
                    invoice_id: None,
                    created_by: None,
                },
            )?)
        } else {
            None
        };
        let credit_account = self.credits.account(organization.id)?;

        self.record(
            Some(&actor),
            organization.id,
            "organization_signup",
            "organization",
            organization.id,
            json!({
                "subdomain": organization.subdomain,
                "admin_email": admin.email,
                "bonus": bonus.as_ref().map(|tx| tx.amount),
            }),
        );
        metrics::counter!("organizations.signups").increment(1);
        info!(org_id = %organization.id, subdomain = %organization.subdomain, admin = %admin.email, "Operator signed up");

        Ok(Signup {
            organization,
            admin,
            credit_account,
            bonus,
        })
    }

    pub fn organization(&self, actor: &Actor, organization_id: Uuid) -> TripdeskResult<Organization> {
        self.guard_read(actor, organization_id, Permission::QuoteRead)?;
        self.orgs.get(organization_id)
    }

    // ------------------------------------------------------------------
    // Team
    // ------------------------------------------------------------------

    pub fn add_team_member(&self, actor: &Actor, organization_id: Uuid, member: NewMember) -> TripdeskResult<User> {
        self.guard_write(actor, organization_id, Permission::TeamManage)?;
        let user = self.staff.add_member(organization_id, member)?;
        self.record(
            Some(actor),
            organization_id,
            "user_create",
            "user",
            user.id,
            json!({ "email": user.email, "role": user.role }),
        );
        Ok(user)
    }

    pub fn team(&self, actor: &Actor, organization_id: Uuid) -> TripdeskResult<Vec<User>> {
        self.guard_read(actor, organization_id, Permission::TeamManage)?;
        Ok(self.staff.list_members(organization_id))
    }

    /// The member's organization, after checking the actor may manage it.
    fn member_org(&self, actor: &Actor, user_id: Uuid) -> TripdeskResult<Uuid> {
        let user = self.staff.get(user_id)?;
        let organization_id = user
            .organization_id
            .ok_or_else(|| TripdeskError::Forbidden("platform users are not team members".into()))?;
        self.guard_write(actor, organization_id, Permission::TeamManage)?;
        Ok(organization_id)
    }

    pub fn change_member_role(&self, actor: &Actor, user_id: Uuid, role: Role) -> TripdeskResult<User> {
        let organization_id = self.member_org(actor, user_id)?;
        let user = self.staff.change_role(actor.user_id, user_id, role)?;
        self.record(
            Some(actor),
            organization_id,
            "user_role_change",
            "user",
            user_id,
            json!({ "role": role }),
        );
        Ok(user)
    }

    pub fn disable_member(&self, actor: &Actor, user_id: Uuid) -> TripdeskResult<User> {
        let organization_id = self.member_org(actor, user_id)?;
        let user = self.staff.disable(actor.user_id, user_id)?;
        self.record(Some(actor), organization_id, "user_disable", "user", user_id, json!({}));
        Ok(user)
    }

    pub fn enable_member(&self, actor: &Actor, user_id: Uuid) -> TripdeskResult<User> {
        let organization_id = self.member_org(actor, user_id)?;
        let user = self.staff.enable(user_id)?;
        self.record(Some(actor), organization_id, "user_enable", "user", user_id, json!({}));
        Ok(user)
    }
}
