use serde::Deserialize;

use crate::money::Currency;

/// Root application configuration. Loaded from an optional `tripdesk.toml`
/// and environment variables with the prefix `TRIPDESK__`.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub billing: BillingConfig,
    #[serde(default)]
    pub finance: FinanceConfig,
    #[serde(default)]
    pub public: PublicConfig,
    #[serde(default)]
    pub sweep: SweepConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_state_path")]
    pub state_path: String,
}

/// Platform credit billing (operators buying itinerary credits).
#[derive(Debug, Clone, Deserialize)]
pub struct BillingConfig {
    #[serde(default = "default_billing_currency")]
    pub currency: Currency,
    #[serde(default = "default_tax_rate_bps")]
    pub tax_rate_bps: i64,
    #[serde(default = "default_credit_invoice_prefix")]
    pub invoice_prefix: String,
    #[serde(default = "default_invoice_due_days")]
    pub invoice_due_days: i64,
    #[serde(default = "default_min_purchase_minor")]
    pub min_purchase_minor: i64,
    #[serde(default = "default_max_purchase_minor")]
    pub max_purchase_minor: i64,
    /// Credits granted per currency unit paid, in basis points (10_000 = 1:1).
    #[serde(default = "default_credit_ratio_bps")]
    pub credit_ratio_bps: i64,
    #[serde(default)]
    pub signup_bonus_minor: i64,
    #[serde(default = "default_itinerary_item_type")]
    pub itinerary_item_type: String,
}

/// Operator-side finance: quotes, bookings, invoices, payables.
#[derive(Debug, Clone, Deserialize)]
pub struct FinanceConfig {
    #[serde(default = "default_finance_currency")]
    pub default_currency: Currency,
    #[serde(default = "default_quote_prefix")]
    pub quote_prefix: String,
    #[serde(default = "default_booking_prefix")]
    pub booking_prefix: String,
    #[serde(default = "default_invoice_prefix")]
    pub invoice_prefix: String,
    #[serde(default = "default_request_prefix")]
    pub request_prefix: String,
    #[serde(default = "default_quote_validity_days")]
    pub quote_validity_days: i64,
    #[serde(default = "default_payables_due_soon_days")]
    pub payables_due_soon_days: i64,
}

/// Limits for unauthenticated customer-facing quote actions.
#[derive(Debug, Clone, Deserialize)]
pub struct PublicConfig {
    #[serde(default = "default_rate_limit_max_requests")]
    pub rate_limit_max_requests: u32,
    #[serde(default = "default_rate_limit_window_secs")]
    pub rate_limit_window_secs: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SweepConfig {
    #[serde(default = "default_sweep_interval_secs")]
    pub interval_secs: u64,
}

// Default functions
fn default_state_path() -> String {
    "tripdesk-state.json".to_string()
}
fn default_billing_currency() -> Currency {
    Currency::Try
}
fn default_tax_rate_bps() -> i64 {
    2_000
}
fn default_credit_invoice_prefix() -> String {
    "TQB".to_string()
}
fn default_invoice_due_days() -> i64 {
    3
}
fn default_min_purchase_minor() -> i64 {
    10_000
}
fn default_max_purchase_minor() -> i64 {
    1_000_000
}
fn default_credit_ratio_bps() -> i64 {
    10_000
}
fn default_itinerary_item_type() -> String {
    "itinerary_generation".to_string()
}
fn default_finance_currency() -> Currency {
    Currency::Eur
}
fn default_quote_prefix() -> String {
    "QT".to_string()
}
fn default_booking_prefix() -> String {
    "BK".to_string()
}
fn default_invoice_prefix() -> String {
    "INV".to_string()
}
fn default_request_prefix() -> String {
    "REQ".to_string()
}
fn default_quote_validity_days() -> i64 {
    30
}
fn default_payables_due_soon_days() -> i64 {
    7
}
fn default_rate_limit_max_requests() -> u32 {
    10
}
fn default_rate_limit_window_secs() -> i64 {
    60
}
fn default_sweep_interval_secs() -> u64 {
    300
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            state_path: default_state_path(),
        }
    }
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            currency: default_billing_currency(),
            tax_rate_bps: default_tax_rate_bps(),
            invoice_prefix: default_credit_invoice_prefix(),
            invoice_due_days: default_invoice_due_days(),
            min_purchase_minor: default_min_purchase_minor(),
            max_purchase_minor: default_max_purchase_minor(),
            credit_ratio_bps: default_credit_ratio_bps(),
            signup_bonus_minor: 0,
            itinerary_item_type: default_itinerary_item_type(),
        }
    }
}

impl Default for FinanceConfig {
    fn default() -> Self {
        Self {
            default_currency: default_finance_currency(),
            quote_prefix: default_quote_prefix(),
            booking_prefix: default_booking_prefix(),
            invoice_prefix: default_invoice_prefix(),
            request_prefix: default_request_prefix(),
            quote_validity_days: default_quote_validity_days(),
            payables_due_soon_days: default_payables_due_soon_days(),
        }
    }
}

impl Default for PublicConfig {
    fn default() -> Self {
        Self {
            rate_limit_max_requests: default_rate_limit_max_requests(),
            rate_limit_window_secs: default_rate_limit_window_secs(),
        }
    }
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            billing: BillingConfig::default(),
            finance: FinanceConfig::default(),
            public: PublicConfig::default(),
            sweep: SweepConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from `tripdesk.toml` (if present) and environment variables.
    pub fn load() -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder()
            .add_source(config::File::with_name("tripdesk").required(false))
            .add_source(
                config::Environment::with_prefix("TRIPDESK")
                    .separator("__")
                    .try_parsing(true),
            );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Sanity checks that serde defaults cannot express.
    pub fn validate(&self) -> Result<(), crate::TripdeskError> {
        let b = &self.billing;
        if b.tax_rate_bps < 0 || b.credit_ratio_bps <= 0 {
            return Err(crate::TripdeskError::Config(
                "billing rates must be non-negative".into(),
            ));
        }
        if b.min_purchase_minor <= 0 || b.min_purchase_minor > b.max_purchase_minor {
            return Err(crate::TripdeskError::Config(
                "billing purchase bounds are inconsistent".into(),
            ));
        }
        if self.public.rate_limit_max_requests == 0 || self.public.rate_limit_window_secs <= 0 {
            return Err(crate::TripdeskError::Config(
                "public rate limit must allow at least one request".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_consistent() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.billing.tax_rate_bps, 2_000);
        assert_eq!(cfg.billing.currency, Currency::Try);
        assert_eq!(cfg.finance.default_currency, Currency::Eur);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_inverted_purchase_bounds_rejected() {
        let mut cfg = AppConfig::default();
        cfg.billing.min_purchase_minor = 50_000;
        cfg.billing.max_purchase_minor = 100;
        assert!(cfg.validate().is_err());
    }
}
