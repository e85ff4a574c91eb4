//! Platforms: an account/venue holding capital in one fixed currency.
//!
//! A platform exclusively owns its transactions; deleting it cascades. The
//! schema allows changing a platform's currency after transactions exist,
//! which silently reinterprets historical amounts — preserved as-is and
//! asserted by the test suite rather than "fixed".

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::error::LedgerError;
use super::money::{self, Currency};
use super::transaction::realized_totals;
use crate::ports::store_port::LedgerStore;

/// A platform as persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Platform {
    pub id: i64,
    pub name: String,
    pub currency: Currency,
    pub initial_capital: String,
    pub created_at: String,
    pub updated_at: String,
}

impl Platform {
    pub fn initial_capital_decimal(&self) -> Result<Decimal, LedgerError> {
        money::parse_decimal(&self.initial_capital)
    }
}

/// A platform with its realized-profit aggregates, in its own currency.
#[derive(Debug, Clone, Serialize)]
pub struct PlatformStats {
    #[serde(flatten)]
    pub platform: Platform,
    pub total_realized_profit: Decimal,
    pub total_capital: Decimal,
    pub change_amount: Decimal,
    pub change_percent: Decimal,
    pub transaction_count: i64,
}

/// `realized / initial * 100` at two decimal places, zero when the initial
/// capital is zero. Division by zero is special-cased, never trapped.
pub fn change_percent(initial: Decimal, realized: Decimal) -> Decimal {
    if initial.is_zero() {
        Decimal::ZERO.round_dp(2)
    } else {
        (realized / initial * Decimal::from(100)).round_dp(2)
    }
}

fn stats_for(
    platform: Platform,
    realized: Decimal,
    transaction_count: i64,
) -> Result<PlatformStats, LedgerError> {
    let initial = platform.initial_capital_decimal()?;
    Ok(PlatformStats {
        platform,
        total_realized_profit: realized,
        total_capital: initial + realized,
        change_amount: realized,
        change_percent: change_percent(initial, realized),
        transaction_count,
    })
}

pub fn list_platforms(store: &dyn LedgerStore) -> Result<Vec<PlatformStats>, LedgerError> {
    let totals = realized_totals(&store.profit_entries()?)?;
    store
        .list_platforms()?
        .into_iter()
        .map(|platform| {
            let (realized, count) = totals
                .get(&platform.id)
                .copied()
                .unwrap_or((Decimal::ZERO, 0));
            stats_for(platform, realized, count)
        })
        .collect()
}

pub fn get_platform(store: &dyn LedgerStore, id: i64) -> Result<PlatformStats, LedgerError> {
    let platform = store
        .get_platform(id)?
        .ok_or_else(|| LedgerError::not_found("platform", id))?;
    let totals = realized_totals(&store.profit_entries()?)?;
    let (realized, count) = totals.get(&id).copied().unwrap_or((Decimal::ZERO, 0));
    stats_for(platform, realized, count)
}

/// Boundary payload for creating a platform.
#[derive(Debug, Clone, Deserialize)]
pub struct NewPlatform {
    pub name: String,
    pub currency: Currency,
    #[serde(default, deserialize_with = "money::decimal_input")]
    pub initial_capital: Option<String>,
}

impl NewPlatform {
    pub fn validate(self) -> Result<ValidatedPlatform, LedgerError> {
        let name = self.name.trim().to_string();
        if name.is_empty() {
            return Err(LedgerError::validation("platform name is required"));
        }
        let initial_capital = money::canonical_opt(self.initial_capital.as_deref())?
            .unwrap_or_else(|| "0".to_string());
        Ok(ValidatedPlatform {
            name,
            currency: self.currency,
            initial_capital,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ValidatedPlatform {
    pub name: String,
    pub currency: Currency,
    pub initial_capital: String,
}

/// Partial update; a missing field keeps the stored value. Currency is
/// intentionally mutable here (known modeling looseness, see module docs).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PlatformPatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub currency: Option<Currency>,
    #[serde(default, deserialize_with = "money::decimal_input")]
    pub initial_capital: Option<String>,
}

pub fn create_platform(
    store: &dyn LedgerStore,
    new: NewPlatform,
) -> Result<Platform, LedgerError> {
    let validated = new.validate()?;
    store.insert_platform(&validated)
}

pub fn update_platform(
    store: &dyn LedgerStore,
    id: i64,
    patch: PlatformPatch,
) -> Result<Platform, LedgerError> {
    let existing = store
        .get_platform(id)?
        .ok_or_else(|| LedgerError::not_found("platform", id))?;

    let name = match patch.name {
        Some(name) => {
            let trimmed = name.trim().to_string();
            if trimmed.is_empty() {
                return Err(LedgerError::validation("platform name is required"));
            }
            trimmed
        }
        None => existing.name,
    };
    let merged = ValidatedPlatform {
        name,
        currency: patch.currency.unwrap_or(existing.currency),
        initial_capital: match patch.initial_capital {
            Some(value) => money::canonical_decimal(&value)?,
            None => existing.initial_capital,
        },
    };
    store.update_platform(id, &merged)?;
    store
        .get_platform(id)?
        .ok_or_else(|| LedgerError::not_found("platform", id))
}

/// Delete a platform; its transactions go with it (cascade).
pub fn delete_platform(store: &dyn LedgerStore, id: i64) -> Result<Platform, LedgerError> {
    store
        .delete_platform(id)?
        .ok_or_else(|| LedgerError::not_found("platform", id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn change_percent_zero_capital() {
        assert_eq!(
            change_percent(Decimal::ZERO, Decimal::from(500)),
            Decimal::new(0, 2)
        );
    }

    #[test]
    fn change_percent_rounds_to_two_places() {
        let pct = change_percent(Decimal::from(1000), Decimal::from(140));
        assert_eq!(pct.to_string(), "14.00");

        let pct = change_percent(Decimal::from(3), Decimal::from(1));
        assert_eq!(pct.to_string(), "33.33");
    }

    #[test]
    fn new_platform_defaults_capital_to_zero() {
        let new = NewPlatform {
            name: "  Binance ".into(),
            currency: Currency::USD,
            initial_capital: None,
        };
        let validated = new.validate().unwrap();
        assert_eq!(validated.name, "Binance");
        assert_eq!(validated.initial_capital, "0");
    }

    #[test]
    fn new_platform_rejects_blank_name() {
        let new = NewPlatform {
            name: "   ".into(),
            currency: Currency::CNY,
            initial_capital: None,
        };
        assert!(new.validate().is_err());
    }

    #[test]
    fn new_platform_accepts_numeric_capital() {
        let new: NewPlatform = serde_json::from_str(
            r#"{"name": "HKEX", "currency": "HKD", "initial_capital": 2500.50}"#,
        )
        .unwrap();
        let validated = new.validate().unwrap();
        assert_eq!(validated.initial_capital, "2500.5");
    }
}
