//! Shared building blocks for Tripdesk: configuration, errors, money, and
//! document numbering.

pub mod config;
pub mod error;
pub mod money;
pub mod numbering;

pub use config::AppConfig;
pub use error::{TripdeskError, TripdeskResult};
pub use money::{Currency, Money};
pub use numbering::DocumentSequence;
