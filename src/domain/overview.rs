//! Ledger aggregation: consolidated summaries, capital distribution and
//! monthly P&L trend, all converted into a requested display currency.
//!
//! Conversion happens per platform *before* summing; summing raw amounts
//! across currencies would produce a currency-meaningless number and is
//! forbidden. All operations here are read-only.

use std::collections::BTreeMap;

use chrono::{Local, Months, NaiveDate};
use rust_decimal::Decimal;
use serde::Serialize;

use super::error::LedgerError;
use super::money::{self, Currency};
use super::platform::change_percent;
use super::rates::RateTable;
use super::transaction::realized_totals;
use crate::ports::store_port::LedgerStore;

/// An amount in the platform's own currency alongside its converted value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConvertedAmount {
    pub original: Decimal,
    pub converted: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlatformOverview {
    pub id: i64,
    pub name: String,
    pub original_currency: Currency,
    pub display_currency: Currency,
    pub exchange_rate: f64,
    /// True when the missing-rate-defaults-to-1 policy applied to this
    /// platform, so a silent default is distinguishable from a real 1:1 rate.
    pub rate_fallback: bool,
    pub initial_capital: ConvertedAmount,
    pub total_realized_profit: ConvertedAmount,
    pub total_capital: ConvertedAmount,
    pub change_percent: Decimal,
    pub transaction_count: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct OverviewSummary {
    pub total_initial_capital: Decimal,
    pub total_realized_profit: Decimal,
    pub total_capital: Decimal,
    pub total_change_percent: Decimal,
    pub platform_count: usize,
    pub total_transactions: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct OverviewReport {
    pub display_currency: Currency,
    pub summary: OverviewSummary,
    pub platforms: Vec<PlatformOverview>,
    pub exchange_rates: RateTable,
}

/// Per-platform realized profit and capital, converted into `display` and
/// summed after conversion.
pub fn overview(
    store: &dyn LedgerStore,
    display: Currency,
) -> Result<OverviewReport, LedgerError> {
    let platforms = store.list_platforms()?;
    let totals = realized_totals(&store.profit_entries()?)?;
    let rates = RateTable::from_rows(&store.all_rates()?);

    let mut total_initial = Decimal::ZERO;
    let mut total_realized = Decimal::ZERO;
    let mut total_capital = Decimal::ZERO;
    let mut total_transactions = 0i64;

    let mut reports = Vec::with_capacity(platforms.len());
    for platform in platforms {
        let (realized, count) = totals
            .get(&platform.id)
            .copied()
            .unwrap_or((Decimal::ZERO, 0));
        let initial = platform.initial_capital_decimal()?;
        let resolution = rates.resolve(platform.currency, display);

        let initial_converted = initial * resolution.factor;
        let realized_converted = realized * resolution.factor;
        let capital_converted = initial_converted + realized_converted;

        total_initial += initial_converted;
        total_realized += realized_converted;
        total_capital += capital_converted;
        total_transactions += count;

        reports.push(PlatformOverview {
            id: platform.id,
            name: platform.name,
            original_currency: platform.currency,
            display_currency: display,
            exchange_rate: resolution.rate,
            rate_fallback: resolution.fallback,
            initial_capital: ConvertedAmount {
                original: initial,
                converted: initial_converted,
            },
            total_realized_profit: ConvertedAmount {
                original: realized,
                converted: realized_converted,
            },
            total_capital: ConvertedAmount {
                original: initial + realized,
                converted: capital_converted,
            },
            change_percent: change_percent(initial, realized),
            transaction_count: count,
        });
    }

    Ok(OverviewReport {
        display_currency: display,
        summary: OverviewSummary {
            total_initial_capital: total_initial,
            total_realized_profit: total_realized,
            total_capital,
            total_change_percent: change_percent(total_initial, total_realized),
            platform_count: reports.len(),
            total_transactions,
        },
        platforms: reports,
        exchange_rates: rates,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DistributionEntry {
    pub name: String,
    pub value: Decimal,
    pub currency: Currency,
    pub percent: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct DistributionReport {
    pub display_currency: Currency,
    pub total: Decimal,
    pub distribution: Vec<DistributionEntry>,
}

/// Converted per-platform total capital as chart weights. A platform whose
/// losses exceed its initial capital is floored at 0, never a negative share.
pub fn distribution(
    store: &dyn LedgerStore,
    display: Currency,
) -> Result<DistributionReport, LedgerError> {
    let platforms = store.list_platforms()?;
    let totals = realized_totals(&store.profit_entries()?)?;
    let rates = RateTable::from_rows(&store.all_rates()?);

    let mut values = Vec::with_capacity(platforms.len());
    let mut total = Decimal::ZERO;
    for platform in platforms {
        let (realized, _) = totals
            .get(&platform.id)
            .copied()
            .unwrap_or((Decimal::ZERO, 0));
        let initial = platform.initial_capital_decimal()?;
        let resolution = rates.resolve(platform.currency, display);
        let capital = (initial + realized) * resolution.factor;
        let value = capital.max(Decimal::ZERO);
        total += value;
        values.push((platform.name, value));
    }

    let distribution = values
        .into_iter()
        .map(|(name, value)| DistributionEntry {
            name,
            value,
            currency: display,
            percent: if total.is_zero() {
                Decimal::ZERO.round_dp(2)
            } else {
                (value / total * Decimal::from(100)).round_dp(2)
            },
        })
        .collect();

    Ok(DistributionReport {
        display_currency: display,
        total,
        distribution,
    })
}

/// A closed transaction as needed for trend bucketing.
#[derive(Debug, Clone)]
pub struct ClosedEntry {
    pub close_time: String,
    pub platform_currency: Currency,
    pub total_profit: String,
    pub total_fee: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendBucket {
    pub month: String,
    pub profit: Decimal,
    /// Positive magnitude of the month's losses.
    pub loss: Decimal,
    pub net: Decimal,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrendReport {
    pub display_currency: Currency,
    pub months: u32,
    pub trend: Vec<TrendBucket>,
}

/// Monthly P&L buckets over the trailing `months` window, cutoff taken from
/// the local clock. Open positions (null close_time) never appear.
pub fn trend(
    store: &dyn LedgerStore,
    display: Currency,
    months: u32,
) -> Result<TrendReport, LedgerError> {
    trend_since(store, display, months, Local::now().date_naive())
}

/// Same as [`trend`] with an explicit "today", for deterministic tests.
pub fn trend_since(
    store: &dyn LedgerStore,
    display: Currency,
    months: u32,
    today: NaiveDate,
) -> Result<TrendReport, LedgerError> {
    let cutoff = today
        .checked_sub_months(Months::new(months))
        .unwrap_or(NaiveDate::MIN)
        .format("%Y-%m-%d")
        .to_string();
    let rates = RateTable::from_rows(&store.all_rates()?);

    let mut buckets: BTreeMap<String, TrendBucket> = BTreeMap::new();
    for entry in store.closed_transactions_since(&cutoff)? {
        if entry.close_time.len() < 7 {
            continue;
        }
        let month = entry.close_time[..7].to_string();
        let resolution = rates.resolve(entry.platform_currency, display);
        let realized = (money::parse_decimal(&entry.total_profit)?
            - money::parse_decimal(&entry.total_fee)?)
            * resolution.factor;

        let bucket = buckets.entry(month.clone()).or_insert(TrendBucket {
            month,
            profit: Decimal::ZERO,
            loss: Decimal::ZERO,
            net: Decimal::ZERO,
            count: 0,
        });
        if realized >= Decimal::ZERO {
            bucket.profit += realized;
        } else {
            bucket.loss += -realized;
        }
        bucket.net += realized;
        bucket.count += 1;
    }

    Ok(TrendReport {
        display_currency: display,
        months,
        // BTreeMap iteration is already ascending by month key.
        trend: buckets.into_values().collect(),
    })
}
