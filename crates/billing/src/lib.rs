//! Platform billing: operator credit accounts, credit invoices,
//! subscriptions and usage rates.

pub mod credits;
pub mod invoices;
pub mod subscriptions;
pub mod usage_rates;

pub use credits::{CreditAccount, CreditGrant, CreditLedger, CreditTransaction, CreditTxKind};
pub use invoices::{CreditInvoice, CreditInvoiceBook, CreditInvoiceKind, CreditInvoiceStatus, PaymentConfirmation};
pub use subscriptions::{NewSubscription, Renewal, RenewalOutcome, Subscription, SubscriptionBook, SubscriptionStatus};
pub use usage_rates::{ItineraryCharge, UsageRate, UsageRateBook};
