//! Prepaid credit accounts, one per organization. Credits are debited for
//! itinerary generation and topped up through paid credit invoices,
//! subscriptions and manual adjustments. Every balance change is a
//! transaction whose `balance_before + amount == balance_after`.

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use tripdesk_core::{Currency, Money, TripdeskError, TripdeskResult};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Credit account for one organization. Credits are held as minor units of
/// the billing currency.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditAccount {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub balance: Money,
    pub total_purchased: Money,
    pub total_spent: Money,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreditTxKind {
    Deposit,
    Usage,
    Refund,
    Bonus,
    Adjustment,
}

impl CreditTxKind {
    fn label(self) -> &'static str {
        match self {
            Self::Deposit => "deposit",
            Self::Usage => "usage",
            Self::Refund => "refund",
            Self::Bonus => "bonus",
            Self::Adjustment => "adjustment",
        }
    }
}

/// A single balance movement. `amount` is signed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditTransaction {
    pub id: Uuid,
    /// Posting order across the ledger.
    pub sequence: u64,
    pub organization_id: Uuid,
    pub kind: CreditTxKind,
    pub amount: Money,
    pub balance_before: Money,
    pub balance_after: Money,
    pub description: String,
    pub invoice_id: Option<Uuid>,
    pub itinerary_id: Option<Uuid>,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// A credit added to an account.
#[derive(Debug, Clone)]
pub struct CreditGrant {
    pub kind: CreditTxKind,
    pub amount: Money,
    pub description: String,
    pub invoice_id: Option<Uuid>,
    pub created_by: Option<Uuid>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreditState {
    pub accounts: Vec<CreditAccount>,
    pub transactions: Vec<CreditTransaction>,
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

/// Credit ledger backed by `DashMap`. All postings run under one lock.
pub struct CreditLedger {
    accounts: DashMap<Uuid, CreditAccount>,
    transactions: DashMap<Uuid, CreditTransaction>,
    posting: Mutex<()>,
    currency: Currency,
}

impl CreditLedger {
    pub fn new(currency: Currency) -> Self {
        Self {
            accounts: DashMap::new(),
            transactions: DashMap::new(),
            posting: Mutex::new(()),
            currency,
        }
    }

    pub fn from_state(state: CreditState, currency: Currency) -> Self {
        let ledger = Self::new(currency);
        for account in state.accounts {
            ledger.accounts.insert(account.organization_id, account);
        }
        for tx in state.transactions {
            ledger.transactions.insert(tx.id, tx);
        }
        ledger
    }

    pub fn export(&self) -> CreditState {
        let mut accounts: Vec<CreditAccount> = self.accounts.iter().map(|e| e.value().clone()).collect();
        accounts.sort_by_key(|a| (a.created_at, a.id));
        let mut transactions: Vec<CreditTransaction> =
            self.transactions.iter().map(|e| e.value().clone()).collect();
        transactions.sort_by_key(|t| t.sequence);
        CreditState {
            accounts,
            transactions,
        }
    }

    pub fn currency(&self) -> Currency {
        self.currency
    }

    /// Open the organization's account, or return the existing one.
    pub fn open_account(&self, organization_id: Uuid) -> CreditAccount {
        match self.accounts.entry(organization_id) {
            Entry::Occupied(existing) => existing.get().clone(),
            Entry::Vacant(slot) => {
                let now = Utc::now();
                let zero = Money::zero(self.currency);
                let account = CreditAccount {
                    id: Uuid::new_v4(),
                    organization_id,
                    balance: zero,
                    total_purchased: zero,
                    total_spent: zero,
                    created_at: now,
                    updated_at: now,
                };
                slot.insert(account.clone());
                info!(org_id = %organization_id, "Credit account opened");
                account
            }
        }
    }

    pub fn account(&self, organization_id: Uuid) -> TripdeskResult<CreditAccount> {
        self.accounts
            .get(&organization_id)
            .map(|e| e.value().clone())
            .ok_or_else(|| TripdeskError::not_found("credit account", organization_id))
    }

    pub fn balance(&self, organization_id: Uuid) -> TripdeskResult<Money> {
        Ok(self.account(organization_id)?.balance)
    }

    pub fn check_sufficient(&self, organization_id: Uuid, amount: Money) -> TripdeskResult<bool> {
        let balance = self.balance(organization_id)?;
        Ok(balance.minor >= amount.minor)
    }

    /// Add credits. Deposits, bonuses and refunds must be positive;
    /// adjustments carry their own sign but can never take the balance below
    /// zero.
    pub fn add(&self, organization_id: Uuid, grant: CreditGrant) -> TripdeskResult<CreditTransaction> {
        match grant.kind {
            CreditTxKind::Usage => {
                return Err(TripdeskError::validation("usage is recorded with deduct"));
            }
            CreditTxKind::Adjustment if grant.amount.is_zero() => {
                return Err(TripdeskError::validation("adjustment cannot be zero"));
            }
            CreditTxKind::Deposit | CreditTxKind::Bonus | CreditTxKind::Refund
                if !grant.amount.is_positive() =>
            {
                return Err(TripdeskError::validation("credit amount must be positive"));
            }
            _ => {}
        }
        let _posting = self.posting.lock();
        self.post(
            organization_id,
            grant.kind,
            grant.amount,
            grant.description,
            grant.invoice_id,
            None,
            grant.created_by,
        )
    }

    /// Debit credits for usage.
    pub fn deduct(
        &self,
        organization_id: Uuid,
        amount: Money,
        description: impl Into<String>,
        itinerary_id: Option<Uuid>,
        created_by: Option<Uuid>,
    ) -> TripdeskResult<CreditTransaction> {
        if !amount.is_positive() {
            return Err(TripdeskError::validation("deduction must be positive"));
        }
        let _posting = self.posting.lock();
        self.post(
            organization_id,
            CreditTxKind::Usage,
            amount.negate(),
            description.into(),
            None,
            itinerary_id,
            created_by,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn post(
        &self,
        organization_id: Uuid,
        kind: CreditTxKind,
        amount: Money,
        description: String,
        invoice_id: Option<Uuid>,
        itinerary_id: Option<Uuid>,
        created_by: Option<Uuid>,
    ) -> TripdeskResult<CreditTransaction> {
        if amount.currency != self.currency {
            return Err(TripdeskError::CurrencyMismatch {
                expected: self.currency,
                found: amount.currency,
            });
        }
        let mut account = self
            .accounts
            .get_mut(&organization_id)
            .ok_or_else(|| TripdeskError::not_found("credit account", organization_id))?;

        let balance_before = account.balance;
        let balance_after = balance_before.checked_add(amount)?;
        if balance_after.is_negative() {
            return Err(TripdeskError::InsufficientCredits {
                balance: balance_before.to_string(),
                required: amount.abs().to_string(),
            });
        }

        let now = Utc::now();
        account.balance = balance_after;
        match kind {
            CreditTxKind::Deposit => account.total_purchased = account.total_purchased.checked_add(amount)?,
            CreditTxKind::Usage => account.total_spent = account.total_spent.checked_add(amount.abs())?,
            _ => {}
        }
        account.updated_at = now;

        let tx = CreditTransaction {
            id: Uuid::new_v4(),
            sequence: self.transactions.len() as u64 + 1,
            organization_id,
            kind,
            amount,
            balance_before,
            balance_after,
            description,
            invoice_id,
            itinerary_id,
            created_by,
            created_at: now,
        };
        self.transactions.insert(tx.id, tx.clone());
        metrics::counter!("credits.transactions", "kind" => kind.label()).increment(1);
        info!(
            org_id = %organization_id,
            kind = kind.label(),
            amount = %amount,
            balance = %balance_after,
            "Credit transaction posted"
        );
        Ok(tx)
    }

    /// Transactions for an organization, newest first.
    pub fn history(&self, organization_id: Uuid, limit: usize, offset: usize) -> Vec<CreditTransaction> {
        let mut txs: Vec<CreditTransaction> = self
            .transactions
            .iter()
            .filter(|e| e.value().organization_id == organization_id)
            .map(|e| e.value().clone())
            .collect();
        txs.sort_by(|a, b| b.sequence.cmp(&a.sequence));
        txs.into_iter().skip(offset).take(limit).collect()
    }

    /// Sum of all balances across the platform.
    pub fn total_outstanding(&self) -> TripdeskResult<Money> {
        Money::sum(self.currency, self.accounts.iter().map(|e| e.value().balance))
    }

    /// Check that the balance equals the sum of its transactions and that the
    /// before/after amounts chain.
    pub fn reconcile(&self, organization_id: Uuid) -> TripdeskResult<bool> {
        let account = self.account(organization_id)?;
        let mut txs = self.history(organization_id, usize::MAX, 0);
        txs.reverse();
        let mut running = Money::zero(self.currency);
        for tx in &txs {
            if tx.balance_before != running || tx.balance_before.checked_add(tx.amount)? != tx.balance_after {
                return Ok(false);
            }
            running = tx.balance_after;
        }
        Ok(running == account.balance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tl(major: i64) -> Money {
        Money::from_major(major, Currency::Try)
    }

    fn grant(kind: CreditTxKind, amount: Money) -> CreditGrant {
        CreditGrant {
            kind,
            amount,
            description: "test".into(),
            invoice_id: None,
            created_by: None,
        }
    }

    #[test]
    fn test_deposit_and_usage_totals() {
        let ledger = CreditLedger::new(Currency::Try);
        let org = Uuid::new_v4();
        ledger.open_account(org);

        ledger.add(org, grant(CreditTxKind::Deposit, tl(500))).unwrap();
        ledger.add(org, grant(CreditTxKind::Bonus, tl(50))).unwrap();
        let usage = ledger.deduct(org, tl(120), "itinerary", None, None).unwrap();
        assert_eq!(usage.amount, tl(-120));
        assert_eq!(usage.balance_before, tl(550));
        assert_eq!(usage.balance_after, tl(430));

        let account = ledger.account(org).unwrap();
        assert_eq!(account.total_purchased, tl(500));
        assert_eq!(account.total_spent, tl(120));
        assert!(ledger.reconcile(org).unwrap());
    }

    #[test]
    fn test_insufficient_credits() {
        let ledger = CreditLedger::new(Currency::Try);
        let org = Uuid::new_v4();
        ledger.open_account(org);
        ledger.add(org, grant(CreditTxKind::Deposit, tl(100))).unwrap();
        assert!(matches!(
            ledger.deduct(org, tl(101), "itinerary", None, None),
            Err(TripdeskError::InsufficientCredits { .. })
        ));
        assert!(matches!(
            ledger.add(org, grant(CreditTxKind::Adjustment, tl(-150))),
            Err(TripdeskError::InsufficientCredits { .. })
        ));
        assert!(ledger.check_sufficient(org, tl(100)).unwrap());
        assert!(!ledger.check_sufficient(org, tl(101)).unwrap());
        assert_eq!(ledger.balance(org).unwrap(), tl(100));
    }

    #[test]
    fn test_add_rejects_bad_grants() {
        let ledger = CreditLedger::new(Currency::Try);
        let org = Uuid::new_v4();
        ledger.open_account(org);
        assert!(ledger.add(org, grant(CreditTxKind::Deposit, tl(-5))).is_err());
        assert!(ledger.add(org, grant(CreditTxKind::Usage, tl(5))).is_err());
        assert!(matches!(
            ledger.add(org, grant(CreditTxKind::Deposit, Money::from_major(5, Currency::Eur))),
            Err(TripdeskError::CurrencyMismatch { .. })
        ));
    }

    #[test]
    fn test_history_newest_first_with_paging() {
        let ledger = CreditLedger::new(Currency::Try);
        let org = Uuid::new_v4();
        ledger.open_account(org);
        for major in 1..=5 {
            ledger.add(org, grant(CreditTxKind::Deposit, tl(major))).unwrap();
        }
        let page = ledger.history(org, 2, 1);
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].amount, tl(4));
        assert_eq!(page[1].amount, tl(3));
        assert_eq!(ledger.history(org, 10, 0).len(), 5);
    }

    #[test]
    fn test_open_account_is_idempotent() {
        let ledger = CreditLedger::new(Currency::Try);
        let org = Uuid::new_v4();
        let a = ledger.open_account(org);
        let b = ledger.open_account(org);
        assert_eq!(a.id, b.id);
    }
}
