//! Super-admin console for the Tripdesk platform. Composes tenancy, staff,
//! billing and finance into one administration surface.
//!
//! # Modules
//!
//! - [`tenant_ops`]: organization lifecycle and impersonation
//! - [`billing_ops`]: credit invoices, subscriptions, manual credit adjustments
//! - [`stats`]: cross-tenant platform overview

pub mod billing_ops;
pub mod stats;
pub mod tenant_ops;

pub use billing_ops::BillingOps;
pub use stats::{platform_stats, PlatformStats};
pub use tenant_ops::{Impersonation, TenantOpResult, TenantOps, TenantRow};
