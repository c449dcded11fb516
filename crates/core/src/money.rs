//! Fixed-point money in integer minor units (cents / kuruş).
//!
//! Every amount carries its currency; arithmetic across currencies is an
//! error rather than a silent conversion.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{TripdeskError, TripdeskResult};

/// Basis points in one whole (100%).
pub const BPS_SCALE: i64 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Eur,
    Usd,
    Try,
    Gbp,
}

impl Currency {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Eur => "EUR",
            Self::Usd => "USD",
            Self::Try => "TRY",
            Self::Gbp => "GBP",
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Currency {
    type Err = TripdeskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "EUR" => Ok(Self::Eur),
            "USD" => Ok(Self::Usd),
            "TRY" => Ok(Self::Try),
            "GBP" => Ok(Self::Gbp),
            other => Err(TripdeskError::validation(format!("unknown currency '{other}'"))),
        }
    }
}

/// An amount of money in minor units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Money {
    pub minor: i64,
    pub currency: Currency,
}

impl Money {
    pub const fn new(minor: i64, currency: Currency) -> Self {
        Self { minor, currency }
    }

    pub const fn zero(currency: Currency) -> Self {
        Self { minor: 0, currency }
    }

    /// Whole units, e.g. `Money::from_major(120, Currency::Eur)` is 120.00 EUR.
    pub const fn from_major(major: i64, currency: Currency) -> Self {
        Self {
            minor: major * 100,
            currency,
        }
    }

    /// Parse a decimal string such as `"1250"`, `"99.9"` or `"-12.05"`.
    pub fn parse(s: &str, currency: Currency) -> TripdeskResult<Self> {
        let s = s.trim();
        let invalid = || TripdeskError::validation(format!("invalid amount '{s}'"));
        let (negative, digits) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s),
        };
        let (whole, frac) = match digits.split_once('.') {
            Some((w, f)) => (w, f),
            None => (digits, ""),
        };
        if whole.is_empty() || frac.len() > 2 {
            return Err(invalid());
        }
        if !whole.chars().all(|c| c.is_ascii_digit()) || !frac.chars().all(|c| c.is_ascii_digit()) {
            return Err(invalid());
        }
        let whole: i64 = whole.parse().map_err(|_| invalid())?;
        let frac: i64 = match frac.len() {
            0 => 0,
            1 => frac.parse::<i64>().map_err(|_| invalid())? * 10,
            _ => frac.parse().map_err(|_| invalid())?,
        };
        let minor = whole
            .checked_mul(100)
            .and_then(|m| m.checked_add(frac))
            .ok_or_else(invalid)?;
        Ok(Self::new(if negative { -minor } else { minor }, currency))
    }

    pub fn is_positive(&self) -> bool {
        self.minor > 0
    }

    pub fn is_negative(&self) -> bool {
        self.minor < 0
    }

    pub fn is_zero(&self) -> bool {
        self.minor == 0
    }

    pub fn abs(&self) -> Self {
        Self::new(self.minor.abs(), self.currency)
    }

    pub fn negate(&self) -> Self {
        Self::new(-self.minor, self.currency)
    }

    fn same_currency(&self, other: &Money) -> TripdeskResult<()> {
        if self.currency != other.currency {
            return Err(TripdeskError::CurrencyMismatch {
                expected: self.currency,
                found: other.currency,
            });
        }
        Ok(())
    }

    pub fn checked_add(&self, other: Money) -> TripdeskResult<Money> {
        self.same_currency(&other)?;
        self.minor
            .checked_add(other.minor)
            .map(|minor| Money::new(minor, self.currency))
            .ok_or_else(|| TripdeskError::validation("amount overflow"))
    }

    pub fn checked_sub(&self, other: Money) -> TripdeskResult<Money> {
        self.same_currency(&other)?;
        self.minor
            .checked_sub(other.minor)
            .map(|minor| Money::new(minor, self.currency))
            .ok_or_else(|| TripdeskError::validation("amount overflow"))
    }

    pub fn times(&self, factor: i64) -> TripdeskResult<Money> {
        self.minor
            .checked_mul(factor)
            .map(|minor| Money::new(minor, self.currency))
            .ok_or_else(|| TripdeskError::validation("amount overflow"))
    }

    /// `self × bps / 10_000`, rounded half away from zero.
    pub fn percent_bps(&self, bps: i64) -> Money {
        let scaled = i128::from(self.minor) * i128::from(bps);
        Money::new(div_round(scaled, i128::from(BPS_SCALE)) as i64, self.currency)
    }

    /// Share of `self` for one of `parts` heads, rounded half away from zero.
    pub fn split(&self, parts: u32) -> Money {
        if parts == 0 {
            return Money::zero(self.currency);
        }
        Money::new(
            div_round(i128::from(self.minor), i128::from(parts)) as i64,
            self.currency,
        )
    }

    pub fn min(self, other: Money) -> Money {
        if other.minor < self.minor {
            other
        } else {
            self
        }
    }

    /// Sum an iterator of amounts that must all be in `currency`.
    pub fn sum<I>(currency: Currency, amounts: I) -> TripdeskResult<Money>
    where
        I: IntoIterator<Item = Money>,
    {
        amounts
            .into_iter()
            .try_fold(Money::zero(currency), |acc, m| acc.checked_add(m))
    }
}

fn div_round(numerator: i128, denominator: i128) -> i128 {
    let quotient = numerator / denominator;
    let remainder = numerator % denominator;
    if remainder.abs() * 2 >= denominator.abs() {
        if (numerator < 0) != (denominator < 0) {
            quotient - 1
        } else {
            quotient + 1
        }
    } else {
        quotient
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.minor < 0 { "-" } else { "" };
        let abs = self.minor.unsigned_abs();
        write!(f, "{sign}{}.{:02} {}", abs / 100, abs % 100, self.currency)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_amounts() {
        assert_eq!(Money::parse("1250", Currency::Eur).unwrap().minor, 125_000);
        assert_eq!(Money::parse("99.9", Currency::Eur).unwrap().minor, 9_990);
        assert_eq!(Money::parse("-12.05", Currency::Eur).unwrap().minor, -1_205);
        assert!(Money::parse("1.234", Currency::Eur).is_err());
        assert!(Money::parse("abc", Currency::Eur).is_err());
        assert!(Money::parse(".5", Currency::Eur).is_err());
    }

    #[test]
    fn test_percent_rounds_half_up() {
        // 20% of 0.05 = 0.01
        let m = Money::new(5, Currency::Try);
        assert_eq!(m.percent_bps(2_000).minor, 1);
        // 20% of 500.00 = 100.00
        let m = Money::from_major(500, Currency::Try);
        assert_eq!(m.percent_bps(2_000).minor, 10_000);
        // negative amounts round away from zero
        assert_eq!(Money::new(-5, Currency::Try).percent_bps(5_000).minor, -3);
    }

    #[test]
    fn test_split_per_head() {
        let group = Money::from_major(250, Currency::Eur);
        assert_eq!(group.split(30).minor, 833);
        assert_eq!(group.split(0).minor, 0);
    }

    #[test]
    fn test_currency_mismatch_rejected() {
        let eur = Money::from_major(10, Currency::Eur);
        let usd = Money::from_major(10, Currency::Usd);
        assert!(matches!(
            eur.checked_add(usd),
            Err(TripdeskError::CurrencyMismatch { .. })
        ));
    }

    #[test]
    fn test_display() {
        assert_eq!(Money::new(123_456, Currency::Eur).to_string(), "1234.56 EUR");
        assert_eq!(Money::new(-5, Currency::Try).to_string(), "-0.05 TRY");
    }
}
