//! Exchange rate table, resolution and the multi-source refresh protocol.
//!
//! Rates are approximations, not ledger amounts, so `f64` is fine here; the
//! conversion factor handed to the aggregator is a `Decimal` derived from the
//! shortest decimal representation of the stored rate.

use std::collections::BTreeMap;
use std::time::Duration;

use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use serde::{Deserialize, Serialize};

use super::error::LedgerError;
use super::money::Currency;
use crate::ports::rate_source_port::RateSource;
use crate::ports::store_port::LedgerStore;

/// One persisted rate row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeRate {
    pub from_currency: Currency,
    pub to_currency: Currency,
    pub rate: f64,
    pub updated_at: String,
}

/// In-memory from→to→rate table.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct RateTable {
    rates: BTreeMap<Currency, BTreeMap<Currency, f64>>,
}

/// Outcome of resolving a conversion factor. `fallback` is true when the pair
/// was absent and the documented missing-rate-defaults-to-1 policy applied, so
/// callers can tell a real 1:1 rate from the silent default.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Resolution {
    pub rate: f64,
    pub factor: Decimal,
    pub fallback: bool,
}

impl RateTable {
    pub fn from_rows(rows: &[ExchangeRate]) -> Self {
        let mut table = RateTable::default();
        for row in rows {
            table.insert(row.from_currency, row.to_currency, row.rate);
        }
        table
    }

    pub fn insert(&mut self, from: Currency, to: Currency, rate: f64) {
        self.rates.entry(from).or_default().insert(to, rate);
    }

    pub fn get(&self, from: Currency, to: Currency) -> Option<f64> {
        self.rates.get(&from).and_then(|m| m.get(&to)).copied()
    }

    /// Resolve a conversion factor. A same-currency pair is exactly 1 no
    /// matter what the table holds; a missing pair defaults to 1 with the
    /// `fallback` flag set — deliberately not an error.
    pub fn resolve(&self, from: Currency, to: Currency) -> Resolution {
        if from == to {
            return Resolution {
                rate: 1.0,
                factor: Decimal::ONE,
                fallback: false,
            };
        }
        match self.get(from, to) {
            Some(rate) => Resolution {
                rate,
                factor: Decimal::from_f64(rate).unwrap_or(Decimal::ONE),
                fallback: false,
            },
            None => Resolution {
                rate: 1.0,
                factor: Decimal::ONE,
                fallback: true,
            },
        }
    }

    /// The built-in static table used when every rate source fails. Injected
    /// at the refresh call site rather than kept as module state.
    pub fn builtin_fallback() -> Self {
        let mut table = RateTable::default();
        for (from, to, rate) in [
            (Currency::CNY, Currency::HKD, 1.09),
            (Currency::CNY, Currency::USD, 0.14),
            (Currency::HKD, Currency::CNY, 0.92),
            (Currency::HKD, Currency::USD, 0.13),
            (Currency::USD, Currency::CNY, 7.24),
            (Currency::USD, Currency::HKD, 7.80),
        ] {
            table.insert(from, to, rate);
        }
        for currency in Currency::ALL {
            table.insert(currency, currency, 1.0);
        }
        table
    }
}

/// Where a refreshed rate came from.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase", tag = "kind", content = "name")]
pub enum RateProvenance {
    /// Same-currency pair, always 1, no source consulted.
    Fixed,
    /// Fetched from the named external source.
    Api(String),
    /// Every source missed; the built-in table supplied the value.
    Fallback,
}

#[derive(Debug, Clone, Serialize)]
pub struct RefreshedRate {
    pub from: Currency,
    pub to: Currency,
    pub rate: f64,
    pub source: RateProvenance,
}

/// Sanity window for externally fetched rates.
fn plausible(rate: f64) -> bool {
    rate.is_finite() && rate > 0.0 && rate < 10_000.0
}

/// Refresh every currency pair, committing one pair at a time so a partial
/// refresh leaves previously-updated pairs intact. Sources are tried in the
/// given priority order; total failure for a pair falls back to `fallback`.
/// `pacing` is a courtesy delay between external lookups, not a correctness
/// requirement.
pub fn refresh_rates(
    store: &dyn LedgerStore,
    sources: &[&dyn RateSource],
    fallback: &RateTable,
    pacing: Duration,
) -> Result<Vec<RefreshedRate>, LedgerError> {
    let mut results = Vec::new();

    for from in Currency::ALL {
        for to in Currency::ALL {
            if from == to {
                store.upsert_rate(from, to, 1.0)?;
                results.push(RefreshedRate {
                    from,
                    to,
                    rate: 1.0,
                    source: RateProvenance::Fixed,
                });
                continue;
            }

            let mut fetched = None;
            for source in sources {
                match source.fetch(from, to) {
                    Some(rate) if plausible(rate) => {
                        tracing::info!(%from, %to, rate, source = source.name(), "rate fetched");
                        fetched = Some((rate, source.name().to_string()));
                        break;
                    }
                    Some(rate) => {
                        tracing::warn!(%from, %to, rate, source = source.name(), "implausible rate ignored");
                    }
                    None => {}
                }
            }

            match fetched {
                Some((rate, name)) => {
                    store.upsert_rate(from, to, rate)?;
                    results.push(RefreshedRate {
                        from,
                        to,
                        rate,
                        source: RateProvenance::Api(name),
                    });
                }
                None => match fallback.get(from, to) {
                    Some(rate) => {
                        tracing::warn!(%from, %to, rate, "all rate sources failed, using fallback");
                        store.upsert_rate(from, to, rate)?;
                        results.push(RefreshedRate {
                            from,
                            to,
                            rate,
                            source: RateProvenance::Fallback,
                        });
                    }
                    None => {
                        tracing::warn!(%from, %to, "no source or fallback rate for pair");
                    }
                },
            }

            if !pacing.is_zero() {
                std::thread::sleep(pacing);
            }
        }
    }

    Ok(results)
}

/// Manual override: validate and persist a single rate. Wins until the next
/// refresh rewrites the pair.
pub fn set_rate(
    store: &dyn LedgerStore,
    from: Currency,
    to: Currency,
    rate: f64,
) -> Result<ExchangeRate, LedgerError> {
    if !rate.is_finite() || rate <= 0.0 {
        return Err(LedgerError::validation("rate must be a positive number"));
    }
    store.upsert_rate(from, to, rate)?;
    store
        .get_rate(from, to)?
        .ok_or_else(|| LedgerError::not_found("exchange rate", format!("{from}->{to}")))
}

/// Nested `{from: {to: rate}}` map of all persisted rates.
pub fn rate_map(store: &dyn LedgerStore) -> Result<RateTable, LedgerError> {
    Ok(RateTable::from_rows(&store.all_rates()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn self_pair_is_always_one() {
        let mut table = RateTable::default();
        // Even a corrupted self-pair entry is ignored.
        table.insert(Currency::USD, Currency::USD, 42.0);
        let res = table.resolve(Currency::USD, Currency::USD);
        assert_eq!(res.rate, 1.0);
        assert_eq!(res.factor, Decimal::ONE);
        assert!(!res.fallback);
    }

    #[test]
    fn missing_pair_defaults_to_one_with_flag() {
        let table = RateTable::default();
        let res = table.resolve(Currency::USD, Currency::CNY);
        assert_eq!(res.rate, 1.0);
        assert!(res.fallback);
    }

    #[test]
    fn present_pair_resolves_exactly() {
        let mut table = RateTable::default();
        table.insert(Currency::USD, Currency::CNY, 7.24);
        let res = table.resolve(Currency::USD, Currency::CNY);
        assert!(!res.fallback);
        // from_f64 takes the shortest decimal representation, so the factor
        // multiplies exactly: 140 * 7.24 = 1013.6.
        assert_eq!(
            (Decimal::from(140) * res.factor).normalize().to_string(),
            "1013.6"
        );
    }

    #[test]
    fn builtin_fallback_covers_all_pairs() {
        let table = RateTable::builtin_fallback();
        for from in Currency::ALL {
            for to in Currency::ALL {
                assert!(table.get(from, to).is_some(), "{from}->{to} missing");
            }
        }
        assert_eq!(table.get(Currency::USD, Currency::CNY), Some(7.24));
    }

    #[test]
    fn plausibility_window() {
        assert!(plausible(7.24));
        assert!(!plausible(0.0));
        assert!(!plausible(-1.0));
        assert!(!plausible(10_001.0));
        assert!(!plausible(f64::NAN));
    }
}
