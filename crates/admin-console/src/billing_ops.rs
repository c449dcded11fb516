//! Super-admin billing desk: confirm or cancel credit invoices, start
//! subscriptions and adjust credit balances by hand.

use chrono::{DateTime, Utc};
use serde_json::json;
use uuid::Uuid;

use tripdesk_billing::{
    CreditGrant, CreditInvoice, CreditInvoiceBook, CreditLedger, CreditTransaction, CreditTxKind,
    NewSubscription, PaymentConfirmation, Subscription, SubscriptionBook,
};
use tripdesk_core::{Money, TripdeskError, TripdeskResult};
use tripdesk_platform::{require_super_admin, Actor, AuditLog};

pub struct BillingOps<'a> {
    invoices: &'a CreditInvoiceBook,
    subscriptions: &'a SubscriptionBook,
    credits: &'a CreditLedger,
    audit: &'a AuditLog,
}

impl<'a> BillingOps<'a> {
    pub fn new(
        invoices: &'a CreditInvoiceBook,
        subscriptions: &'a SubscriptionBook,
        credits: &'a CreditLedger,
        audit: &'a AuditLog,
    ) -> Self {
        Self {
            invoices,
            subscriptions,
            credits,
            audit,
        }
    }

    pub fn pending_invoices(&self, admin: &Actor) -> TripdeskResult<Vec<CreditInvoice>> {
        require_super_admin(admin)?;
        Ok(self.invoices.pending())
    }

    pub fn mark_paid(
        &self,
        admin: &Actor,
        invoice_id: Uuid,
        confirmation: PaymentConfirmation,
    ) -> TripdeskResult<CreditInvoice> {
        require_super_admin(admin)?;
        let invoice = self.invoices.mark_paid(invoice_id, admin.user_id, confirmation)?;
        self.audit.record(
            Some(invoice.organization_id),
            Some(admin),
            "credit_invoice_paid",
            "credit_invoice",
            invoice.id,
            json!({
                "number": invoice.invoice_number,
                "total": invoice.total,
                "credits": invoice.credits_to_add,
                "reference": invoice.payment_reference,
            }),
        );
        Ok(invoice)
    }

    pub fn cancel_invoice(&self, admin: &Actor, invoice_id: Uuid) -> TripdeskResult<CreditInvoice> {
        require_super_admin(admin)?;
        let invoice = self.invoices.cancel(invoice_id)?;
        self.audit.record(
            Some(invoice.organization_id),
            Some(admin),
            "credit_invoice_cancel",
            "credit_invoice",
            invoice.id,
            json!({ "number": invoice.invoice_number }),
        );
        Ok(invoice)
    }

    /// Start a subscription. A priced plan also raises its first-period
    /// invoice.
    pub fn create_subscription(
        &self,
        admin: &Actor,
        organization_id: Uuid,
        new: NewSubscription,
        now: DateTime<Utc>,
    ) -> TripdeskResult<(Subscription, Option<CreditInvoice>)> {
        require_super_admin(admin)?;
        let sub = self.subscriptions.create(organization_id, new, admin.user_id, now)?;
        let invoice = if sub.price.is_positive() {
            Some(self.invoices.bill_subscription(organization_id, sub.price)?)
        } else {
            None
        };
        self.audit.record(
            Some(organization_id),
            Some(admin),
            "subscription_create",
            "subscription",
            sub.id,
            json!({ "plan": sub.plan, "monthly_credits": sub.monthly_credits, "price": sub.price }),
        );
        Ok((sub, invoice))
    }

    /// Signed manual correction. Cannot take the balance below zero.
    pub fn adjust_credits(
        &self,
        admin: &Actor,
        organization_id: Uuid,
        amount: Money,
        reason: &str,
    ) -> TripdeskResult<CreditTransaction> {
        require_super_admin(admin)?;
        if reason.trim().is_empty() {
            return Err(TripdeskError::validation("an adjustment needs a reason"));
        }
        let tx = self.credits.add(
            organization_id,
            CreditGrant {
                kind: CreditTxKind::Adjustment,
                amount,
                description: reason.trim().to_string(),
                invoice_id: None,
                created_by: Some(admin.user_id),
            },
        )?;
        self.audit.record(
            Some(organization_id),
            Some(admin),
            "credit_adjust",
            "credit_account",
            organization_id,
            json!({ "amount": amount, "balance_after": tx.balance_after, "reason": reason }),
        );
        Ok(tx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tripdesk_core::config::BillingConfig;
    use tripdesk_core::{Currency, DocumentSequence};
    use tripdesk_platform::Role;

    fn tl(major: i64) -> Money {
        Money::from_major(major, Currency::Try)
    }

    fn admin() -> Actor {
        Actor {
            user_id: Uuid::new_v4(),
            role: Role::SuperAdmin,
            organization_id: None,
            impersonated_by: None,
        }
    }

    struct Fixture {
        credits: Arc<CreditLedger>,
        invoices: CreditInvoiceBook,
        subscriptions: SubscriptionBook,
        audit: AuditLog,
    }

    impl Fixture {
        fn new() -> Self {
            let credits = Arc::new(CreditLedger::new(Currency::Try));
            Self {
                invoices: CreditInvoiceBook::new(
                    Arc::new(DocumentSequence::new()),
                    credits.clone(),
                    BillingConfig::default(),
                ),
                subscriptions: SubscriptionBook::new(credits.clone()),
                credits,
                audit: AuditLog::new(),
            }
        }

        fn ops(&self) -> BillingOps<'_> {
            BillingOps::new(&self.invoices, &self.subscriptions, &self.credits, &self.audit)
        }
    }

    #[test]
    fn test_mark_paid_is_audited() {
        let fx = Fixture::new();
        let org = Uuid::new_v4();
        fx.credits.open_account(org);
        let inv = fx.invoices.purchase(org, tl(500)).unwrap();

        assert_eq!(fx.ops().pending_invoices(&admin()).unwrap().len(), 1);
        fx.ops().mark_paid(&admin(), inv.id, PaymentConfirmation::default()).unwrap();
        assert_eq!(fx.credits.balance(org).unwrap(), tl(500));
        assert!(fx.ops().pending_invoices(&admin()).unwrap().is_empty());
        assert_eq!(fx.audit.len(), 1);
    }

    #[test]
    fn test_operator_cannot_mark_paid() {
        let fx = Fixture::new();
        let org = Uuid::new_v4();
        fx.credits.open_account(org);
        let inv = fx.invoices.purchase(org, tl(500)).unwrap();
        let operator = Actor {
            role: Role::OrgAdmin,
            organization_id: Some(org),
            ..admin()
        };
        assert!(matches!(
            fx.ops().mark_paid(&operator, inv.id, PaymentConfirmation::default()),
            Err(TripdeskError::Forbidden(_))
        ));
        assert!(fx.credits.balance(org).unwrap().is_zero());
    }

    #[test]
    fn test_subscription_bills_first_period() {
        let fx = Fixture::new();
        let org = Uuid::new_v4();
        fx.credits.open_account(org);
        let (sub, invoice) = fx
            .ops()
            .create_subscription(
                &admin(),
                org,
                NewSubscription {
                    plan: "Growth".into(),
                    monthly_credits: tl(300),
                    price: tl(250),
                },
                Utc::now(),
            )
            .unwrap();
        assert_eq!(fx.credits.balance(org).unwrap(), tl(300));
        let invoice = invoice.unwrap();
        assert_eq!(invoice.amount, sub.price);
        assert!(invoice.credits_to_add.is_zero());
    }

    #[test]
    fn test_adjust_credits() {
        let fx = Fixture::new();
        let org = Uuid::new_v4();
        fx.credits.open_account(org);
        fx.ops().adjust_credits(&admin(), org, tl(40), "goodwill").unwrap();
        assert!(fx.ops().adjust_credits(&admin(), org, tl(-50), "clawback").is_err());
        assert!(fx.ops().adjust_credits(&admin(), org, tl(10), " ").is_err());
        let tx = fx.ops().adjust_credits(&admin(), org, tl(-40), "clawback").unwrap();
        assert!(tx.balance_after.is_zero());
    }
}
