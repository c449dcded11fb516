//! Super-admin surface: platform bootstrap, tenant and billing desks, usage
//! rates, platform statistics and the audit trail.

use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use tripdesk_admin_console::{
    platform_stats, BillingOps, Impersonation, PlatformStats, TenantOpResult, TenantOps, TenantRow,
};
use tripdesk_billing::{
    CreditInvoice, CreditTransaction, NewSubscription, PaymentConfirmation, Subscription, UsageRate,
};
use tripdesk_core::{Money, TripdeskError, TripdeskResult};
use tripdesk_platform::audit::ChainVerification;
use tripdesk_platform::{authorize, require_super_admin, Actor, AuditEntry, AuditFilter, Organization, Permission, Role, User};

use crate::Tripdesk;

impl Tripdesk {
    /// Create the first super admin. Refused once one exists.
    pub fn bootstrap_super_admin(&self, email: &str, first_name: &str, last_name: &str) -> TripdeskResult<User> {
        if self.staff.export().users.iter().any(|u| u.role == Role::SuperAdmin) {
            return Err(TripdeskError::Conflict("a super admin already exists".into()));
        }
        let user = self.staff.create_super_admin(email, first_name, last_name)?;
        let actor = Actor::from_user(&user);
        self.audit.record(
            None,
            Some(&actor),
            "platform_bootstrap",
            "user",
            user.id,
            json!({ "email": user.email }),
        );
        info!(user_id = %user.id, email = %user.email, "Super admin bootstrapped");
        Ok(user)
    }

    fn tenant_ops(&self) -> TenantOps<'_> {
        TenantOps::new(
            &self.orgs,
            &self.staff,
            &self.credits,
            &self.quotes,
            &self.bookings,
            &self.audit,
        )
    }

    fn billing_ops(&self) -> BillingOps<'_> {
        BillingOps::new(&self.credit_invoices, &self.subscriptions, &self.credits, &self.audit)
    }

    // ------------------------------------------------------------------
    // Tenants
    // ------------------------------------------------------------------

    pub fn list_tenants(&self, admin: &Actor) -> TripdeskResult<Vec<TenantRow>> {
        self.tenant_ops().list_with_stats(admin)
    }

    pub fn find_organization(&self, admin: &Actor, subdomain: &str) -> TripdeskResult<Organization> {
        require_super_admin(admin)?;
        self.orgs.get_by_subdomain(subdomain)
    }

    pub fn suspend_organization(&self, admin: &Actor, organization_id: Uuid, reason: &str) -> TripdeskResult<TenantOpResult> {
        self.tenant_ops().suspend(admin, organization_id, reason)
    }

    pub fn reactivate_organization(&self, admin: &Actor, organization_id: Uuid, reason: &str) -> TripdeskResult<TenantOpResult> {
        self.tenant_ops().reactivate(admin, organization_id, reason)
    }

    /// Close an organization for good. Its records stay readable and its
    /// subscription ends at once.
    pub fn cancel_organization(&self, admin: &Actor, organization_id: Uuid, reason: &str) -> TripdeskResult<Organization> {
        require_super_admin(admin)?;
        let previous = self.orgs.get(organization_id)?.status;
        let org = self.orgs.cancel(organization_id)?;
        let ended = self.subscriptions.end_for_organization(organization_id, Utc::now());
        self.record(
            Some(admin),
            organization_id,
            "organization_cancel",
            "organization",
            organization_id,
            json!({
                "from": previous,
                "to": org.status,
                "reason": reason,
                "subscription_ended": ended.as_ref().map(|s| s.id),
            }),
        );
        Ok(org)
    }

    pub fn impersonate(&self, admin: &Actor, organization_id: Uuid) -> TripdeskResult<Impersonation> {
        self.tenant_ops().impersonate(admin, organization_id)
    }

    // ------------------------------------------------------------------
    // Billing
    // ------------------------------------------------------------------

    pub fn pending_credit_invoices(&self, admin: &Actor) -> TripdeskResult<Vec<CreditInvoice>> {
        self.billing_ops().pending_invoices(admin)
    }

    pub fn mark_credit_invoice_paid(
        &self,
        admin: &Actor,
        invoice_id: Uuid,
        confirmation: PaymentConfirmation,
    ) -> TripdeskResult<CreditInvoice> {
        self.billing_ops().mark_paid(admin, invoice_id, confirmation)
    }

    pub fn cancel_credit_invoice(&self, admin: &Actor, invoice_id: Uuid) -> TripdeskResult<CreditInvoice> {
        self.billing_ops().cancel_invoice(admin, invoice_id)
    }

    pub fn create_subscription(
        &self,
        admin: &Actor,
        organization_id: Uuid,
        new: NewSubscription,
        now: DateTime<Utc>,
    ) -> TripdeskResult<(Subscription, Option<CreditInvoice>)> {
        require_super_admin(admin)?;
        self.orgs.ensure_operational(organization_id)?;
        self.credits.open_account(organization_id);
        self.billing_ops().create_subscription(admin, organization_id, new, now)
    }

    pub fn cancel_subscription(&self, admin: &Actor, subscription_id: Uuid) -> TripdeskResult<Subscription> {
        require_super_admin(admin)?;
        let sub = self.subscriptions.cancel(subscription_id)?;
        self.record(
            Some(admin),
            sub.organization_id,
            "subscription_cancel",
            "subscription",
            sub.id,
            json!({ "plan": sub.plan, "period_end": sub.current_period_end }),
        );
        Ok(sub)
    }

    pub fn subscriptions(&self, admin: &Actor) -> TripdeskResult<Vec<Subscription>> {
        require_super_admin(admin)?;
        Ok(self.subscriptions.list())
    }

    pub fn adjust_credits(
        &self,
        admin: &Actor,
        organization_id: Uuid,
        amount: Money,
        reason: &str,
    ) -> TripdeskResult<CreditTransaction> {
        self.orgs.get(organization_id)?;
        self.billing_ops().adjust_credits(admin, organization_id, amount, reason)
    }

    pub fn set_usage_rate(
        &self,
        admin: &Actor,
        item_type: &str,
        price_per_unit: Money,
        valid_from: DateTime<Utc>,
    ) -> TripdeskResult<UsageRate> {
        require_super_admin(admin)?;
        let rate = self.usage_rates.set_rate(item_type, price_per_unit, valid_from)?;
        self.audit.record(
            None,
            Some(admin),
            "usage_rate_set",
            "usage_rate",
            rate.id,
            json!({ "item_type": rate.item_type, "price": rate.price_per_unit, "valid_from": rate.valid_from }),
        );
        Ok(rate)
    }

    pub fn usage_rates(&self, admin: &Actor) -> TripdeskResult<Vec<UsageRate>> {
        require_super_admin(admin)?;
        Ok(self.usage_rates.list())
    }

    // ------------------------------------------------------------------
    // Reporting
    // ------------------------------------------------------------------

    pub fn platform_stats(&self, admin: &Actor) -> TripdeskResult<PlatformStats> {
        require_super_admin(admin)?;
        platform_stats(&self.orgs, &self.staff, &self.credits, &self.credit_invoices, &self.quotes)
    }

    pub fn verify_audit(&self, admin: &Actor) -> TripdeskResult<ChainVerification> {
        require_super_admin(admin)?;
        Ok(self.audit.verify_chain())
    }

    /// Audit entries, newest first. Organization admins see only their own
    /// organization's trail.
    pub fn audit_trail(&self, actor: &Actor, filter: AuditFilter) -> TripdeskResult<Vec<AuditEntry>> {
        if actor.is_super_admin() {
            return Ok(self.audit.query(&filter));
        }
        let home = actor.home_org()?;
        let organization_id = filter.organization_id.unwrap_or(home);
        authorize(actor, organization_id, Permission::TeamManage)?;
        Ok(self.audit.query(&AuditFilter {
            organization_id: Some(organization_id),
            ..filter
        }))
    }
}
