//! Operator side of credit billing: buying credits and reading the account.

use serde_json::json;
use uuid::Uuid;

use tripdesk_billing::{CreditAccount, CreditInvoice, CreditTransaction};
use tripdesk_core::{Money, TripdeskResult};
use tripdesk_platform::{Actor, Permission};

use crate::Tripdesk;

impl Tripdesk {
    /// Raise a Pending deposit invoice. Credits arrive when a super admin
    /// confirms the payment.
    pub fn purchase_credits(&self, actor: &Actor, organization_id: Uuid, amount: Money) -> TripdeskResult<CreditInvoice> {
        self.guard_write(actor, organization_id, Permission::CreditPurchase)?;
        self.credits.open_account(organization_id);
        let invoice = self.credit_invoices.purchase(organization_id, amount)?;
        self.record(
            Some(actor),
            organization_id,
            "credit_purchase",
            "credit_invoice",
            invoice.id,
            json!({
                "number": invoice.invoice_number,
                "amount": invoice.amount,
                "total": invoice.total,
                "credits": invoice.credits_to_add,
            }),
        );
        Ok(invoice)
    }

    pub fn credit_account(&self, actor: &Actor, organization_id: Uuid) -> TripdeskResult<CreditAccount> {
        self.guard_read(actor, organization_id, Permission::CreditRead)?;
        self.credits.account(organization_id)
    }

    pub fn credit_history(
        &self,
        actor: &Actor,
        organization_id: Uuid,
        limit: usize,
        offset: usize,
    ) -> TripdeskResult<Vec<CreditTransaction>> {
        self.guard_read(actor, organization_id, Permission::CreditRead)?;
        Ok(self.credits.history(organization_id, limit, offset))
    }

    pub fn credit_invoices(&self, actor: &Actor, organization_id: Uuid) -> TripdeskResult<Vec<CreditInvoice>> {
        self.guard_read(actor, organization_id, Permission::CreditRead)?;
        Ok(self.credit_invoices.list(organization_id))
    }
}
