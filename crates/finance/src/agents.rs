//! Sub-agent accounts and their commission ledger.
//!
//! Every transaction carries the agent's running balance after it was
//! posted. A positive balance means the operator owes the agent.

use chrono::{DateTime, NaiveDate, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use tripdesk_core::money::BPS_SCALE;
use tripdesk_core::{Currency, Money, TripdeskError, TripdeskResult};
use tripdesk_platform::validation::is_valid_email;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Commission {
    Percentage { bps: i64 },
    Fixed { amount: Money },
}

impl Commission {
    pub fn on(&self, booking_total: Money) -> Money {
        match *self {
            Commission::Percentage { bps } => booking_total.percent_bps(bps),
            Commission::Fixed { amount } => amount,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Active,
    Inactive,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub company_name: String,
    pub contact_person: String,
    pub email: String,
    pub commission: Commission,
    pub currency: Currency,
    pub status: AgentStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewAgent {
    pub company_name: String,
    pub contact_person: String,
    pub email: String,
    pub commission: Commission,
    pub currency: Currency,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Commission,
    Payment,
    Refund,
    Adjustment,
}

impl TransactionKind {
    /// Signed effect on the balance.
    fn effect(&self, amount: Money) -> Money {
        match self {
            TransactionKind::Commission => amount.abs(),
            TransactionKind::Payment | TransactionKind::Refund => amount.abs().negate(),
            TransactionKind::Adjustment => amount,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentTransaction {
    pub id: Uuid,
    /// Posting order across the ledger.
    #[serde(default)]
    pub sequence: u64,
    pub agent_id: Uuid,
    pub organization_id: Uuid,
    pub kind: TransactionKind,
    /// Booking or invoice the entry relates to.
    pub reference: Option<String>,
    pub amount: Money,
    pub running_balance: Money,
    pub description: String,
    pub transaction_date: NaiveDate,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentBalance {
    pub agent_id: Uuid,
    pub company_name: String,
    pub balance: Money,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentBalances {
    pub currency: Currency,
    pub agents: Vec<AgentBalance>,
    pub total: Money,
    pub agents_with_balance: usize,
    pub agents_owed: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentState {
    pub agents: Vec<Agent>,
    pub transactions: Vec<AgentTransaction>,
}

pub struct AgentLedger {
    agents: DashMap<Uuid, Agent>,
    transactions: DashMap<Uuid, AgentTransaction>,
    balances: DashMap<Uuid, Money>,
    /// (agent, booking) -> commission transaction
    accruals: DashMap<(Uuid, Uuid), Uuid>,
    posting: Mutex<()>,
}

impl Default for AgentLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentLedger {
    pub fn new() -> Self {
        Self {
            agents: DashMap::new(),
            transactions: DashMap::new(),
            balances: DashMap::new(),
            accruals: DashMap::new(),
            posting: Mutex::new(()),
        }
    }

    pub fn from_state(state: AgentState) -> Self {
        let ledger = Self::new();
        for agent in state.agents {
            ledger.balances.insert(agent.id, Money::zero(agent.currency));
            ledger.agents.insert(agent.id, agent);
        }
        let mut transactions = state.transactions;
        transactions.sort_by_key(|t| (t.sequence, t.created_at, t.id));
        for tx in transactions {
            ledger.balances.insert(tx.agent_id, tx.running_balance);
            if tx.kind == TransactionKind::Commission {
                if let Some(booking) = tx.reference.as_deref().and_then(|r| r.parse::<Uuid>().ok()) {
                    ledger.accruals.insert((tx.agent_id, booking), tx.id);
                }
            }
            ledger.transactions.insert(tx.id, tx);
        }
        ledger
    }

    pub fn export(&self) -> AgentState {
        let mut agents: Vec<Agent> = self.agents.iter().map(|e| e.value().clone()).collect();
        agents.sort_by_key(|a| (a.created_at, a.id));
        AgentState {
            agents,
            transactions: self.all_transactions(),
        }
    }

    fn all_transactions(&self) -> Vec<AgentTransaction> {
        let mut txs: Vec<AgentTransaction> = self.transactions.iter().map(|e| e.value().clone()).collect();
        txs.sort_by_key(|t| (t.sequence, t.created_at, t.id));
        txs
    }

    pub fn add_agent(&self, organization_id: Uuid, new: NewAgent) -> TripdeskResult<Agent> {
        if new.company_name.trim().is_empty() {
            return Err(TripdeskError::validation("agent company name is required"));
        }
        if !is_valid_email(&new.email) {
            return Err(TripdeskError::validation(format!("invalid agent email '{}'", new.email)));
        }
        match new.commission {
            Commission::Percentage { bps } if !(0..=BPS_SCALE).contains(&bps) => {
                return Err(TripdeskError::validation("commission must be 0-100%"));
            }
            Commission::Fixed { amount } if amount.is_negative() || amount.currency != new.currency => {
                return Err(TripdeskError::validation(
                    "fixed commission must be non-negative and in the agent's currency",
                ));
            }
            _ => {}
        }
        let agent = Agent {
            id: Uuid::new_v4(),
            organization_id,
            company_name: new.company_name.trim().to_string(),
            contact_person: new.contact_person,
            email: new.email,
            commission: new.commission,
            currency: new.currency,
            status: AgentStatus::Active,
            created_at: Utc::now(),
        };
        self.balances.insert(agent.id, Money::zero(agent.currency));
        self.agents.insert(agent.id, agent.clone());
        info!(org_id = %organization_id, agent_id = %agent.id, company = %agent.company_name, "Agent added");
        Ok(agent)
    }

    pub fn get(&self, id: Uuid) -> TripdeskResult<Agent> {
        self.agents
            .get(&id)
            .map(|e| e.value().clone())
            .ok_or_else(|| TripdeskError::not_found("agent", id))
    }

    pub fn list(&self, organization_id: Uuid) -> Vec<Agent> {
        let mut agents: Vec<Agent> = self
            .agents
            .iter()
            .filter(|e| e.value().organization_id == organization_id)
            .map(|e| e.value().clone())
            .collect();
        agents.sort_by(|a, b| a.company_name.cmp(&b.company_name));
        agents
    }

    pub fn set_status(&self, id: Uuid, status: AgentStatus) -> TripdeskResult<Agent> {
        let mut agent = self
            .agents
            .get_mut(&id)
            .ok_or_else(|| TripdeskError::not_found("agent", id))?;
        agent.status = status;
        Ok(agent.clone())
    }

    pub fn balance(&self, agent_id: Uuid) -> TripdeskResult<Money> {
        self.balances
            .get(&agent_id)
            .map(|e| *e.value())
            .ok_or_else(|| TripdeskError::not_found("agent", agent_id))
    }

    /// Post a transaction. Commission adds, payments and refunds subtract,
    /// adjustments apply their own sign.
    pub fn record(
        &self,
        agent_id: Uuid,
        kind: TransactionKind,
        amount: Money,
        reference: Option<String>,
        description: impl Into<String>,
        transaction_date: NaiveDate,
    ) -> TripdeskResult<AgentTransaction> {
        let _posting = self.posting.lock();
        self.post(agent_id, kind, amount, reference, description.into(), transaction_date)
    }

    fn post(
        &self,
        agent_id: Uuid,
        kind: TransactionKind,
        amount: Money,
        reference: Option<String>,
        description: String,
        transaction_date: NaiveDate,
    ) -> TripdeskResult<AgentTransaction> {
        let agent = self.get(agent_id)?;
        if amount.currency != agent.currency {
            return Err(TripdeskError::CurrencyMismatch {
                expected: agent.currency,
                found: amount.currency,
            });
        }
        if amount.is_zero() {
            return Err(TripdeskError::validation("transaction amount cannot be zero"));
        }

        let effect = kind.effect(amount);
        let previous = self.balance(agent_id)?;
        let running_balance = previous.checked_add(effect)?;

        let tx = AgentTransaction {
            id: Uuid::new_v4(),
            sequence: self.transactions.len() as u64 + 1,
            agent_id,
            organization_id: agent.organization_id,
            kind,
            reference,
            amount: effect,
            running_balance,
            description,
            transaction_date,
            created_at: Utc::now(),
        };
        self.balances.insert(agent_id, running_balance);
        self.transactions.insert(tx.id, tx.clone());
        metrics::counter!("agent.transactions", "kind" => kind_label(kind)).increment(1);
        info!(agent_id = %agent_id, kind = ?kind, amount = %effect, balance = %running_balance, "Agent transaction posted");
        Ok(tx)
    }

    /// Commission an active agent would earn on a booking of `booking_total`.
    pub fn commission_due(&self, agent_id: Uuid, booking_total: Money) -> TripdeskResult<Money> {
        let agent = self.get(agent_id)?;
        if agent.status != AgentStatus::Active {
            return Err(TripdeskError::Conflict(format!(
                "agent '{}' is inactive",
                agent.company_name
            )));
        }
        if booking_total.currency != agent.currency {
            return Err(TripdeskError::CurrencyMismatch {
                expected: agent.currency,
                found: booking_total.currency,
            });
        }
        Ok(agent.commission.on(booking_total))
    }

    /// Accrue the agent's commission on a booking. Repeats for the same
    /// booking return the original entry. A commission that comes to zero
    /// posts nothing.
    pub fn accrue_commission(
        &self,
        agent_id: Uuid,
        booking_id: Uuid,
        booking_total: Money,
        transaction_date: NaiveDate,
    ) -> TripdeskResult<Option<AgentTransaction>> {
        let _posting = self.posting.lock();
        if let Entry::Occupied(existing) = self.accruals.entry((agent_id, booking_id)) {
            let tx_id = *existing.get();
            return self
                .transactions
                .get(&tx_id)
                .map(|e| Some(e.value().clone()))
                .ok_or_else(|| TripdeskError::not_found("agent transaction", tx_id));
        }

        let amount = self.commission_due(agent_id, booking_total)?;
        if amount.is_zero() {
            return Ok(None);
        }
        let tx = self.post(
            agent_id,
            TransactionKind::Commission,
            amount,
            Some(booking_id.to_string()),
            format!("Commission on booking {booking_id}"),
            transaction_date,
        )?;
        self.accruals.insert((agent_id, booking_id), tx.id);
        Ok(Some(tx))
    }

    /// Transactions for one agent, oldest first.
    pub fn statement(&self, agent_id: Uuid) -> Vec<AgentTransaction> {
        self.all_transactions()
            .into_iter()
            .filter(|t| t.agent_id == agent_id)
            .collect()
    }

    pub fn balances(&self, organization_id: Uuid, currency: Currency) -> TripdeskResult<AgentBalances> {
        let mut agents = Vec::new();
        let mut total = Money::zero(currency);
        for agent in self.list(organization_id) {
            let balance = self.balance(agent.id)?;
            if balance.currency == currency {
                total = total.checked_add(balance)?;
            }
            agents.push(AgentBalance {
                agent_id: agent.id,
                company_name: agent.company_name,
                balance,
            });
        }
        Ok(AgentBalances {
            currency,
            agents_with_balance: agents.iter().filter(|a| !a.balance.is_zero()).count(),
            agents_owed: agents.iter().filter(|a| a.balance.is_positive()).count(),
            agents,
            total,
        })
    }
}

fn kind_label(kind: TransactionKind) -> &'static str {
    match kind {
        TransactionKind::Commission => "commission",
        TransactionKind::Payment => "payment",
        TransactionKind::Refund => "refund",
        TransactionKind::Adjustment => "adjustment",
    }
}
