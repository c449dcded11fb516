//! Bookings: confirmed trips created from accepted quotes, with the customer
//! payments collected against them and the supplier costs behind them.
//!
//! Payment status is derived, never set by hand: after every payment change
//! the booking is Confirmed, DepositReceived or FullyPaid according to the net
//! amount collected. Payments are posted under a single lock so the check
//! against the outstanding amount and the status update happen together.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use tripdesk_core::money::BPS_SCALE;
use tripdesk_core::{Currency, DocumentSequence, Money, TripdeskError, TripdeskResult};

use crate::quotes::Customer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Confirmed,
    DepositReceived,
    FullyPaid,
    InProgress,
    Completed,
    Cancelled,
}

impl BookingStatus {
    /// Statuses that follow the payment balance.
    fn is_payment_driven(&self) -> bool {
        matches!(self, Self::Confirmed | Self::DepositReceived | Self::FullyPaid)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentKind {
    Deposit,
    Balance,
    Refund,
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Booking {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub booking_number: String,
    pub quote_id: Uuid,
    pub customer: Customer,
    pub agent_id: Option<Uuid>,
    pub total: Money,
    pub deposit_amount: Money,
    pub deposit_due: Option<NaiveDate>,
    pub balance_due_date: Option<NaiveDate>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub status: BookingStatus,
    pub deposit_paid_date: Option<NaiveDate>,
    pub balance_paid_date: Option<NaiveDate>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancellation_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub id: Uuid,
    pub booking_id: Uuid,
    pub kind: PaymentKind,
    pub amount: Money,
    pub method: String,
    pub reference: Option<String>,
    pub paid_on: NaiveDate,
    pub notes: Option<String>,
    pub recorded_by: Uuid,
    pub voided: bool,
    pub created_at: DateTime<Utc>,
}

/// A supplier service booked for the trip.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostLine {
    pub id: Uuid,
    pub booking_id: Uuid,
    pub supplier_id: Option<Uuid>,
    pub description: String,
    pub service_date: Option<NaiveDate>,
    pub amount: Money,
}

#[derive(Debug, Clone)]
pub struct NewBooking {
    pub quote_id: Uuid,
    pub customer: Customer,
    pub agent_id: Option<Uuid>,
    pub total: Money,
    pub deposit_amount: Money,
    pub deposit_due: Option<NaiveDate>,
    pub balance_due_date: Option<NaiveDate>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

#[derive(Debug, Clone)]
pub struct NewPayment {
    pub kind: PaymentKind,
    pub amount: Money,
    pub method: String,
    pub reference: Option<String>,
    pub paid_on: NaiveDate,
    pub notes: Option<String>,
    pub recorded_by: Uuid,
    /// Retrying with the same key returns the original payment.
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingMargin {
    pub total: Money,
    pub costs: Money,
    pub margin: Money,
    /// Margin as a share of the total, in basis points.
    pub margin_bps: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingSummary {
    pub currency: Currency,
    pub total_bookings: usize,
    pub by_status: Vec<(BookingStatus, usize)>,
    pub total_revenue: Money,
    pub active_revenue: Money,
    pub collected: Money,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BookingState {
    pub bookings: Vec<Booking>,
    pub payments: Vec<Payment>,
    pub cost_lines: Vec<CostLine>,
    pub idempotency: Vec<(String, Uuid)>,
}

pub struct BookingBook {
    bookings: DashMap<Uuid, Booking>,
    by_quote: DashMap<Uuid, Uuid>,
    payments: DashMap<Uuid, Payment>,
    cost_lines: DashMap<Uuid, CostLine>,
    idempotency: DashMap<String, Uuid>,
    posting: Mutex<()>,
    numbers: Arc<DocumentSequence>,
    prefix: String,
}

impl BookingBook {
    pub fn new(numbers: Arc<DocumentSequence>, prefix: impl Into<String>) -> Self {
        Self {
            bookings: DashMap::new(),
            by_quote: DashMap::new(),
            payments: DashMap::new(),
            cost_lines: DashMap::new(),
            idempotency: DashMap::new(),
            posting: Mutex::new(()),
            numbers,
            prefix: prefix.into(),
        }
    }

    pub fn from_state(state: BookingState, numbers: Arc<DocumentSequence>, prefix: impl Into<String>) -> Self {
        let book = Self::new(numbers, prefix);
        for b in state.bookings {
            book.by_quote.insert(b.quote_id, b.id);
            book.bookings.insert(b.id, b);
        }
        for p in state.payments {
            book.payments.insert(p.id, p);
        }
        for c in state.cost_lines {
            book.cost_lines.insert(c.id, c);
        }
        for (key, id) in state.idempotency {
            book.idempotency.insert(key, id);
        }
        book
    }

    pub fn export(&self) -> BookingState {
        let mut bookings: Vec<Booking> = self.bookings.iter().map(|e| e.value().clone()).collect();
        bookings.sort_by_key(|b| (b.created_at, b.id));
        let mut payments: Vec<Payment> = self.payments.iter().map(|e| e.value().clone()).collect();
        payments.sort_by_key(|p| (p.created_at, p.id));
        let mut cost_lines: Vec<CostLine> = self.cost_lines.iter().map(|e| e.value().clone()).collect();
        cost_lines.sort_by_key(|c| (c.booking_id, c.id));
        let mut idempotency: Vec<(String, Uuid)> = self
            .idempotency
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect();
        idempotency.sort();
        BookingState {
            bookings,
            payments,
            cost_lines,
            idempotency,
        }
    }

    /// Create the booking for a quote. A quote can be booked only once.
    pub fn create(&self, organization_id: Uuid, new: NewBooking, today: NaiveDate) -> TripdeskResult<Booking> {
        if !new.total.is_positive() {
            return Err(TripdeskError::validation("booking total must be positive"));
        }
        if new.deposit_amount.is_negative() {
            return Err(TripdeskError::validation("deposit cannot be negative"));
        }
        if new.deposit_amount.currency != new.total.currency {
            return Err(TripdeskError::CurrencyMismatch {
                expected: new.total.currency,
                found: new.deposit_amount.currency,
            });
        }
        if new.deposit_amount.minor > new.total.minor {
            return Err(TripdeskError::validation("deposit exceeds booking total"));
        }
        if new.end_date < new.start_date {
            return Err(TripdeskError::validation("trip ends before it starts"));
        }

        let now = Utc::now();
        let id = Uuid::new_v4();
        match self.by_quote.entry(new.quote_id) {
            Entry::Occupied(_) => {
                return Err(TripdeskError::Conflict(format!(
                    "quote {} already has a booking",
                    new.quote_id
                )))
            }
            Entry::Vacant(e) => {
                e.insert(id);
            }
        }

        let booking = Booking {
            id,
            organization_id,
            booking_number: self
                .numbers
                .next(&organization_id.to_string(), &self.prefix, today.year()),
            quote_id: new.quote_id,
            customer: new.customer,
            agent_id: new.agent_id,
            total: new.total,
            deposit_amount: new.deposit_amount,
            deposit_due: new.deposit_due,
            balance_due_date: new.balance_due_date,
            start_date: new.start_date,
            end_date: new.end_date,
            status: BookingStatus::Confirmed,
            deposit_paid_date: None,
            balance_paid_date: None,
            cancelled_at: None,
            cancellation_reason: None,
            created_at: now,
            updated_at: now,
        };
        self.bookings.insert(id, booking.clone());
        metrics::counter!("bookings.created").increment(1);
        info!(org_id = %organization_id, booking_id = %id, number = %booking.booking_number, total = %booking.total, "Booking created");
        Ok(booking)
    }

    pub fn get(&self, id: Uuid) -> TripdeskResult<Booking> {
        self.bookings
            .get(&id)
            .map(|e| e.value().clone())
            .ok_or_else(|| TripdeskError::not_found("booking", id))
    }

    pub fn get_by_quote(&self, quote_id: Uuid) -> Option<Booking> {
        let id = *self.by_quote.get(&quote_id)?.value();
        self.get(id).ok()
    }

    pub fn get_payment(&self, id: Uuid) -> TripdeskResult<Payment> {
        self.payments
            .get(&id)
            .map(|e| e.value().clone())
            .ok_or_else(|| TripdeskError::not_found("payment", id))
    }

    pub fn list(&self, organization_id: Uuid, status: Option<BookingStatus>) -> Vec<Booking> {
        let mut bookings: Vec<Booking> = self
            .bookings
            .iter()
            .filter(|e| {
                let b = e.value();
                b.organization_id == organization_id && status.map_or(true, |s| b.status == s)
            })
            .map(|e| e.value().clone())
            .collect();
        bookings.sort_by(|a, b| a.start_date.cmp(&b.start_date));
        bookings
    }

    pub fn payments(&self, booking_id: Uuid) -> Vec<Payment> {
        let mut payments: Vec<Payment> = self
            .payments
            .iter()
            .filter(|e| e.value().booking_id == booking_id)
            .map(|e| e.value().clone())
            .collect();
        payments.sort_by_key(|p| (p.paid_on, p.created_at));
        payments
    }

    /// Non-refund payments minus refunds, ignoring voided payments.
    pub fn net_paid(&self, booking_id: Uuid, currency: Currency) -> TripdeskResult<Money> {
        self.payments
            .iter()
            .filter(|e| e.value().booking_id == booking_id && !e.value().voided)
            .try_fold(Money::zero(currency), |acc, e| {
                let p = e.value();
                if p.kind == PaymentKind::Refund {
                    acc.checked_sub(p.amount)
                } else {
                    acc.checked_add(p.amount)
                }
            })
    }

    /// Post a customer payment or refund.
    pub fn record_payment(&self, booking_id: Uuid, new: NewPayment) -> TripdeskResult<(Booking, Payment)> {
        let _posting = self.posting.lock();

        let idem_key = new
            .idempotency_key
            .as_ref()
            .map(|k| format!("{booking_id}/{k}"));
        if let Some(ref key) = idem_key {
            if let Some(existing) = self.idempotency.get(key).map(|e| *e.value()) {
                info!(booking_id = %booking_id, payment_id = %existing, "Duplicate payment request ignored");
                return Ok((self.get(booking_id)?, self.get_payment(existing)?));
            }
        }

        let booking = self.get(booking_id)?;
        match booking.status {
            BookingStatus::Completed => {
                return Err(TripdeskError::Conflict(format!(
                    "booking {} is completed",
                    booking.booking_number
                )))
            }
            BookingStatus::Cancelled if new.kind != PaymentKind::Refund => {
                return Err(TripdeskError::Conflict(format!(
                    "booking {} is cancelled; only refunds can be recorded",
                    booking.booking_number
                )))
            }
            _ => {}
        }
        if !new.amount.is_positive() {
            return Err(TripdeskError::validation("payment amount must be positive"));
        }
        if new.amount.currency != booking.total.currency {
            return Err(TripdeskError::CurrencyMismatch {
                expected: booking.total.currency,
                found: new.amount.currency,
            });
        }

        let net = self.net_paid(booking_id, booking.total.currency)?;
        if new.kind == PaymentKind::Refund {
            if new.amount.minor > net.minor {
                return Err(TripdeskError::validation(format!(
                    "refund {} exceeds net paid {}",
                    new.amount, net
                )));
            }
        } else {
            let outstanding = booking.total.checked_sub(net)?;
            if new.amount.minor > outstanding.minor {
                return Err(TripdeskError::validation(format!(
                    "payment {} exceeds outstanding balance {}",
                    new.amount, outstanding
                )));
            }
        }

        let payment = Payment {
            id: Uuid::new_v4(),
            booking_id,
            kind: new.kind,
            amount: new.amount,
            method: new.method,
            reference: new.reference,
            paid_on: new.paid_on,
            notes: new.notes,
            recorded_by: new.recorded_by,
            voided: false,
            created_at: Utc::now(),
        };
        self.payments.insert(payment.id, payment.clone());
        if let Some(key) = idem_key {
            self.idempotency.insert(key, payment.id);
        }
        let booking = self.refresh_status(booking_id, payment.paid_on)?;

        metrics::counter!("payments.recorded", "ledger" => "booking").increment(1);
        info!(
            booking_id = %booking_id,
            payment_id = %payment.id,
            kind = ?payment.kind,
            amount = %payment.amount,
            status = ?booking.status,
            "Booking payment recorded"
        );
        Ok((booking, payment))
    }

    /// Void a payment entered in error and re-derive the booking status.
    pub fn void_payment(&self, payment_id: Uuid, today: NaiveDate) -> TripdeskResult<(Booking, Payment)> {
        let _posting = self.posting.lock();
        let payment = self.get_payment(payment_id)?;
        if payment.voided {
            return Err(TripdeskError::Conflict("payment is already voided".into()));
        }
        let booking = self.get(payment.booking_id)?;
        let net = self.net_paid(booking.id, booking.total.currency)?;
        let net_after = if payment.kind == PaymentKind::Refund {
            net.checked_add(payment.amount)?
        } else {
            net.checked_sub(payment.amount)?
        };
        if net_after.is_negative() {
            return Err(TripdeskError::Conflict(
                "voiding this payment would leave refunds above payments".into(),
            ));
        }
        if net_after.minor > booking.total.minor {
            return Err(TripdeskError::Conflict(
                "voiding this refund would overpay the booking".into(),
            ));
        }

        let payment = {
            let mut entry = self
                .payments
                .get_mut(&payment_id)
                .ok_or_else(|| TripdeskError::not_found("payment", payment_id))?;
            entry.voided = true;
            entry.clone()
        };
        let booking = self.refresh_status(booking.id, today)?;
        info!(payment_id = %payment_id, booking_id = %booking.id, status = ?booking.status, "Booking payment voided");
        Ok((booking, payment))
    }

    fn refresh_status(&self, booking_id: Uuid, paid_on: NaiveDate) -> TripdeskResult<Booking> {
        let currency = self.get(booking_id)?.total.currency;
        let net = self.net_paid(booking_id, currency)?;
        let mut booking = self
            .bookings
            .get_mut(&booking_id)
            .ok_or_else(|| TripdeskError::not_found("booking", booking_id))?;
        if booking.status.is_payment_driven() {
            let status = if net.minor >= booking.total.minor {
                BookingStatus::FullyPaid
            } else if booking.deposit_amount.is_positive() && net.minor >= booking.deposit_amount.minor {
                BookingStatus::DepositReceived
            } else {
                BookingStatus::Confirmed
            };
            if status != BookingStatus::Confirmed && booking.deposit_paid_date.is_none() {
                booking.deposit_paid_date = Some(paid_on);
            }
            booking.balance_paid_date = if status == BookingStatus::FullyPaid {
                booking.balance_paid_date.or(Some(paid_on))
            } else {
                None
            };
            if status == BookingStatus::Confirmed {
                booking.deposit_paid_date = None;
            }
            booking.status = status;
        }
        booking.updated_at = Utc::now();
        Ok(booking.clone())
    }

    fn set_status(
        &self,
        id: Uuid,
        to: BookingStatus,
        allowed: impl Fn(BookingStatus) -> bool,
        apply: impl FnOnce(&mut Booking),
    ) -> TripdeskResult<Booking> {
        let _posting = self.posting.lock();
        let mut booking = self
            .bookings
            .get_mut(&id)
            .ok_or_else(|| TripdeskError::not_found("booking", id))?;
        if !allowed(booking.status) {
            return Err(TripdeskError::transition("booking", booking.status, to));
        }
        booking.status = to;
        booking.updated_at = Utc::now();
        apply(booking.value_mut());
        info!(booking_id = %id, status = ?to, "Booking status changed");
        Ok(booking.clone())
    }

    pub fn start(&self, id: Uuid) -> TripdeskResult<Booking> {
        self.set_status(id, BookingStatus::InProgress, |s| s.is_payment_driven(), |_| {})
    }

    pub fn complete(&self, id: Uuid) -> TripdeskResult<Booking> {
        self.set_status(
            id,
            BookingStatus::Completed,
            |s| s == BookingStatus::InProgress,
            |_| {},
        )
    }

    pub fn cancel(&self, id: Uuid, reason: &str) -> TripdeskResult<Booking> {
        let reason = reason.trim().to_string();
        if reason.is_empty() {
            return Err(TripdeskError::validation("a cancellation reason is required"));
        }
        self.set_status(
            id,
            BookingStatus::Cancelled,
            |s| !matches!(s, BookingStatus::Completed | BookingStatus::Cancelled),
            |b| {
                b.cancelled_at = Some(Utc::now());
                b.cancellation_reason = Some(reason);
            },
        )
    }

    pub fn add_cost_line(
        &self,
        booking_id: Uuid,
        supplier_id: Option<Uuid>,
        description: &str,
        service_date: Option<NaiveDate>,
        amount: Money,
    ) -> TripdeskResult<CostLine> {
        let booking = self.get(booking_id)?;
        if amount.is_negative() {
            return Err(TripdeskError::validation("cost cannot be negative"));
        }
        if amount.currency != booking.total.currency {
            return Err(TripdeskError::CurrencyMismatch {
                expected: booking.total.currency,
                found: amount.currency,
            });
        }
        let line = CostLine {
            id: Uuid::new_v4(),
            booking_id,
            supplier_id,
            description: description.trim().to_string(),
            service_date,
            amount,
        };
        self.cost_lines.insert(line.id, line.clone());
        info!(booking_id = %booking_id, cost_line_id = %line.id, amount = %amount, "Cost line added");
        Ok(line)
    }

    pub fn remove_cost_line(&self, booking_id: Uuid, line_id: Uuid) -> TripdeskResult<CostLine> {
        match self.cost_lines.remove_if(&line_id, |_, line| line.booking_id == booking_id) {
            Some((_, line)) => Ok(line),
            None => Err(TripdeskError::not_found("cost line", line_id)),
        }
    }

    pub fn cost_lines(&self, booking_id: Uuid) -> Vec<CostLine> {
        let mut lines: Vec<CostLine> = self
            .cost_lines
            .iter()
            .filter(|e| e.value().booking_id == booking_id)
            .map(|e| e.value().clone())
            .collect();
        lines.sort_by_key(|l| (l.service_date, l.id));
        lines
    }

    pub fn margin(&self, booking_id: Uuid) -> TripdeskResult<BookingMargin> {
        let booking = self.get(booking_id)?;
        let costs = Money::sum(
            booking.total.currency,
            self.cost_lines(booking_id).into_iter().map(|l| l.amount),
        )?;
        let margin = booking.total.checked_sub(costs)?;
        let margin_bps = if booking.total.is_zero() {
            0
        } else {
            (i128::from(margin.minor) * i128::from(BPS_SCALE) / i128::from(booking.total.minor)) as i64
        };
        Ok(BookingMargin {
            total: booking.total,
            costs,
            margin,
            margin_bps,
        })
    }

    /// Counts by status and revenue in `currency` for one organization.
    pub fn summary(&self, organization_id: Uuid, currency: Currency) -> TripdeskResult<BookingSummary> {
        let bookings = self.list(organization_id, None);
        let mut counts: HashMap<BookingStatus, usize> = HashMap::new();
        let mut total_revenue = Money::zero(currency);
        let mut active_revenue = Money::zero(currency);
        let mut collected = Money::zero(currency);

        for b in &bookings {
            *counts.entry(b.status).or_default() += 1;
            if b.total.currency != currency {
                continue;
            }
            total_revenue = total_revenue.checked_add(b.total)?;
            if b.status != BookingStatus::Cancelled {
                active_revenue = active_revenue.checked_add(b.total)?;
            }
            collected = collected.checked_add(self.net_paid(b.id, currency)?)?;
        }

        let mut by_status: Vec<(BookingStatus, usize)> = counts.into_iter().collect();
        by_status.sort_by_key(|(s, _)| format!("{s:?}"));
        Ok(BookingSummary {
            currency,
            total_bookings: bookings.len(),
            by_status,
            total_revenue,
            active_revenue,
            collected,
        })
    }
}
