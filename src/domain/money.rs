//! Decimal value model and the closed currency set.
//!
//! Monetary and quantity fields cross the boundary as strings, never binary
//! floats, so leveraged P&L math cannot silently lose precision. Everything is
//! normalized to a canonical decimal string before persistence; arithmetic on
//! derived values goes through [`rust_decimal::Decimal`].

use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::error::LedgerError;

/// The closed set of currencies a platform can be denominated in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Currency {
    CNY,
    HKD,
    USD,
}

impl Currency {
    pub const ALL: [Currency; 3] = [Currency::CNY, Currency::HKD, Currency::USD];

    pub fn as_str(&self) -> &'static str {
        match self {
            Currency::CNY => "CNY",
            Currency::HKD => "HKD",
            Currency::USD => "USD",
        }
    }
}

impl FromStr for Currency {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "CNY" => Ok(Currency::CNY),
            "HKD" => Ok(Currency::HKD),
            "USD" => Ok(Currency::USD),
            other => Err(LedgerError::validation(format!(
                "currency must be CNY, HKD or USD, got {other:?}"
            ))),
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parse a boundary string as a finite decimal. Scientific notation and
/// non-numeric input are rejected with a `Validation` error.
pub fn parse_decimal(input: &str) -> Result<Decimal, LedgerError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(LedgerError::validation("empty decimal value"));
    }
    // rust_decimal's FromStr accepts exponents; the boundary contract is
    // plain decimal notation only.
    if trimmed.contains(['e', 'E']) {
        return Err(LedgerError::validation(format!(
            "scientific notation is not accepted: {trimmed:?}"
        )));
    }
    Decimal::from_str(trimmed)
        .map_err(|_| LedgerError::validation(format!("not a valid decimal: {trimmed:?}")))
}

/// Normalize a boundary string to its canonical decimal form: trimmed, no
/// scientific notation, no trailing zeros (`"1.50"` becomes `"1.5"`,
/// `"0.00"` becomes `"0"`).
pub fn canonical_decimal(input: &str) -> Result<String, LedgerError> {
    Ok(parse_decimal(input)?.normalize().to_string())
}

/// Canonicalize an optional decimal field. `None` is distinct from `"0"` and
/// round-trips as null; an empty string also counts as null, matching the
/// original boundary behavior.
pub fn canonical_opt(input: Option<&str>) -> Result<Option<String>, LedgerError> {
    match input {
        None => Ok(None),
        Some(s) if s.trim().is_empty() => Ok(None),
        Some(s) => canonical_decimal(s).map(Some),
    }
}

/// Parse a stored optional decimal, treating null as zero. Used when summing
/// profit/fee columns that default to `"0"`.
pub fn decimal_or_zero(input: Option<&str>) -> Result<Decimal, LedgerError> {
    match input {
        None => Ok(Decimal::ZERO),
        Some(s) => parse_decimal(s),
    }
}

/// Serde helper: accept a JSON string or number for a decimal field, keeping
/// the raw text so precision is preserved until canonicalization.
pub fn decimal_input<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    decimal_text(value).map_err(serde::de::Error::custom)
}

/// Serde helper for patch payloads: distinguishes a missing field (keep) from
/// an explicit null (clear). Wrap the field in `Option<Option<String>>` with
/// `#[serde(default)]`.
pub fn nullable_decimal_input<'de, D>(deserializer: D) -> Result<Option<Option<String>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    decimal_text(value).map(Some).map_err(serde::de::Error::custom)
}

fn decimal_text(value: Option<serde_json::Value>) -> Result<Option<String>, String> {
    match value {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::String(s)) => Ok(Some(s)),
        Some(serde_json::Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(format!("expected decimal string or number, got {other}")),
    }
}
