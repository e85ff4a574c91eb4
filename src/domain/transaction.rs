//! Transaction records: the single trade/position row owned by a platform.
//!
//! All monetary fields live as canonical decimal strings (see
//! [`super::money`]). `realized_profit` and `holding_time` are derived at read
//! time and never stored.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::error::LedgerError;
use super::money::{self, Currency};
use crate::ports::store_port::LedgerStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    /// Leveraged contract position.
    Contract,
    /// Plain spot holding.
    Spot,
    /// Binary-outcome bet with no meaningful price/quantity.
    Event,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Contract => "contract",
            TransactionType::Spot => "spot",
            TransactionType::Event => "event",
        }
    }
}

impl FromStr for TransactionType {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "contract" => Ok(TransactionType::Contract),
            "spot" => Ok(TransactionType::Spot),
            "event" => Ok(TransactionType::Event),
            other => Err(LedgerError::validation(format!(
                "type must be contract, spot or event, got {other:?}"
            ))),
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Long => "long",
            Direction::Short => "short",
        }
    }
}

impl FromStr for Direction {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "long" => Ok(Direction::Long),
            "short" => Ok(Direction::Short),
            other => Err(LedgerError::validation(format!(
                "direction must be long or short, got {other:?}"
            ))),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A transaction as persisted, decimals already canonical.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    #[serde(default)]
    pub id: Option<i64>,
    pub platform_id: i64,
    pub asset_name: String,
    pub asset_code: String,
    #[serde(rename = "type")]
    pub kind: TransactionType,
    pub direction: Direction,
    pub leverage: String,
    pub quantity: Option<String>,
    pub open_price: Option<String>,
    pub close_price: Option<String>,
    pub investment: Option<String>,
    pub open_time: String,
    pub close_time: Option<String>,
    pub total_profit: String,
    pub total_fee: String,
    pub reason: Option<String>,
}

impl TransactionRecord {
    /// `total_profit - total_fee`, exact decimal arithmetic.
    pub fn realized_profit(&self) -> Result<Decimal, LedgerError> {
        Ok(money::parse_decimal(&self.total_profit)? - money::parse_decimal(&self.total_fee)?)
    }

    /// Human-readable open-to-close duration, `None` while the position is
    /// still open or when close precedes open.
    pub fn holding_time(&self) -> Option<String> {
        holding_time(&self.open_time, self.close_time.as_deref())
    }
}

/// A transaction joined with its owning platform, as listed.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionRow {
    pub record: TransactionRecord,
    pub platform_name: String,
    pub platform_currency: Currency,
}

/// The outward shape of a listed transaction: stored fields plus the derived
/// `realized_profit` and `holding_time`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionView {
    #[serde(flatten)]
    pub record: TransactionRecord,
    pub platform_name: String,
    pub platform_currency: Currency,
    pub realized_profit: Decimal,
    pub holding_time: Option<String>,
}

impl TransactionRow {
    pub fn into_view(self) -> Result<TransactionView, LedgerError> {
        let realized_profit = self.record.realized_profit()?;
        let holding_time = self.record.holding_time();
        Ok(TransactionView {
            record: self.record,
            platform_name: self.platform_name,
            platform_currency: self.platform_currency,
            realized_profit,
            holding_time,
        })
    }
}

/// Raw profit/fee of one transaction, for per-platform aggregation.
#[derive(Debug, Clone)]
pub struct ProfitEntry {
    pub platform_id: i64,
    pub total_profit: String,
    pub total_fee: String,
}

/// Sum realized profit and count transactions per platform.
pub fn realized_totals(
    entries: &[ProfitEntry],
) -> Result<HashMap<i64, (Decimal, i64)>, LedgerError> {
    let mut totals: HashMap<i64, (Decimal, i64)> = HashMap::new();
    for entry in entries {
        let realized =
            money::parse_decimal(&entry.total_profit)? - money::parse_decimal(&entry.total_fee)?;
        let slot = totals.entry(entry.platform_id).or_insert((Decimal::ZERO, 0));
        slot.0 += realized;
        slot.1 += 1;
    }
    Ok(totals)
}

const TIMESTAMP_FORMATS: [&str; 5] = [
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%d",
];

/// Parse an ISO-8601-ish boundary timestamp. Date-only input is taken as
/// midnight; an RFC 3339 offset is accepted and dropped.
pub fn parse_timestamp(input: &str) -> Result<NaiveDateTime, LedgerError> {
    let trimmed = input.trim();
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(trimmed) {
        return Ok(dt.naive_local());
    }
    for format in TIMESTAMP_FORMATS {
        if format == "%Y-%m-%d" {
            if let Ok(d) = NaiveDate::parse_from_str(trimmed, format) {
                if let Some(dt) = d.and_hms_opt(0, 0, 0) {
                    return Ok(dt);
                }
            }
        } else if let Ok(dt) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Ok(dt);
        }
    }
    Err(LedgerError::validation(format!(
        "not an ISO-8601 timestamp: {trimmed:?}"
    )))
}

/// Format the open-to-close duration with second precision: days, hours and
/// minutes when present, seconds only under one day, `"0s"` floor.
pub fn holding_time(open_time: &str, close_time: Option<&str>) -> Option<String> {
    let close = close_time?;
    let open = parse_timestamp(open_time).ok()?;
    let close = parse_timestamp(close).ok()?;
    let diff = close.signed_duration_since(open);
    if diff < chrono::Duration::zero() {
        return None;
    }

    let total_seconds = diff.num_seconds();
    let days = total_seconds / 86_400;
    let hours = (total_seconds % 86_400) / 3_600;
    let minutes = (total_seconds % 3_600) / 60;
    let seconds = total_seconds % 60;

    let mut out = String::new();
    if days > 0 {
        out.push_str(&format!("{days}d"));
    }
    if hours > 0 {
        out.push_str(&format!("{hours}h"));
    }
    if minutes > 0 {
        out.push_str(&format!("{minutes}m"));
    }
    if seconds > 0 && days == 0 {
        out.push_str(&format!("{seconds}s"));
    }
    if out.is_empty() { Some("0s".to_string()) } else { Some(out) }
}

/// Boundary payload for creating a transaction.
#[derive(Debug, Clone, Deserialize)]
pub struct NewTransaction {
    pub platform_id: i64,
    pub asset_name: String,
    pub asset_code: String,
    #[serde(rename = "type")]
    pub kind: TransactionType,
    pub direction: Direction,
    #[serde(default, deserialize_with = "money::decimal_input")]
    pub leverage: Option<String>,
    #[serde(default, deserialize_with = "money::decimal_input")]
    pub quantity: Option<String>,
    #[serde(default, deserialize_with = "money::decimal_input")]
    pub open_price: Option<String>,
    #[serde(default, deserialize_with = "money::decimal_input")]
    pub close_price: Option<String>,
    #[serde(default, deserialize_with = "money::decimal_input")]
    pub investment: Option<String>,
    pub open_time: String,
    #[serde(default)]
    pub close_time: Option<String>,
    #[serde(default, deserialize_with = "money::decimal_input")]
    pub total_profit: Option<String>,
    #[serde(default, deserialize_with = "money::decimal_input")]
    pub total_fee: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

impl NewTransaction {
    /// Canonicalize decimals, validate timestamps and leverage, and produce a
    /// record ready for persistence.
    pub fn validate(self) -> Result<TransactionRecord, LedgerError> {
        if self.asset_name.trim().is_empty() {
            return Err(LedgerError::validation("asset_name is required"));
        }
        if self.asset_code.trim().is_empty() {
            return Err(LedgerError::validation("asset_code is required"));
        }

        let leverage = match money::canonical_opt(self.leverage.as_deref())? {
            Some(canonical) => canonical,
            None => "1".to_string(),
        };
        if money::parse_decimal(&leverage)? < Decimal::ONE {
            return Err(LedgerError::validation("leverage must be at least 1"));
        }

        parse_timestamp(&self.open_time)?;
        let close_time = match self.close_time.as_deref() {
            Some(s) if !s.trim().is_empty() => {
                parse_timestamp(s)?;
                Some(s.trim().to_string())
            }
            _ => None,
        };

        Ok(TransactionRecord {
            id: None,
            platform_id: self.platform_id,
            asset_name: self.asset_name.trim().to_string(),
            asset_code: self.asset_code.trim().to_string(),
            kind: self.kind,
            direction: self.direction,
            leverage,
            quantity: money::canonical_opt(self.quantity.as_deref())?,
            open_price: money::canonical_opt(self.open_price.as_deref())?,
            close_price: money::canonical_opt(self.close_price.as_deref())?,
            investment: money::canonical_opt(self.investment.as_deref())?,
            open_time: self.open_time.trim().to_string(),
            close_time,
            total_profit: money::canonical_opt(self.total_profit.as_deref())?
                .unwrap_or_else(|| "0".to_string()),
            total_fee: money::canonical_opt(self.total_fee.as_deref())?
                .unwrap_or_else(|| "0".to_string()),
            reason: self.reason.filter(|r| !r.trim().is_empty()),
        })
    }
}

fn nullable_string<'de, D>(deserializer: D) -> Result<Option<Option<String>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer).map(Some)
}

/// Partial update: a missing field keeps the stored value, an explicit null
/// clears it where nullable.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TransactionPatch {
    #[serde(default)]
    pub platform_id: Option<i64>,
    #[serde(default)]
    pub asset_name: Option<String>,
    #[serde(default)]
    pub asset_code: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<TransactionType>,
    #[serde(default)]
    pub direction: Option<Direction>,
    #[serde(default, deserialize_with = "money::decimal_input")]
    pub leverage: Option<String>,
    #[serde(default, deserialize_with = "money::nullable_decimal_input")]
    pub quantity: Option<Option<String>>,
    #[serde(default, deserialize_with = "money::nullable_decimal_input")]
    pub open_price: Option<Option<String>>,
    #[serde(default, deserialize_with = "money::nullable_decimal_input")]
    pub close_price: Option<Option<String>>,
    #[serde(default, deserialize_with = "money::nullable_decimal_input")]
    pub investment: Option<Option<String>>,
    #[serde(default)]
    pub open_time: Option<String>,
    #[serde(default, deserialize_with = "nullable_string")]
    pub close_time: Option<Option<String>>,
    #[serde(default, deserialize_with = "money::decimal_input")]
    pub total_profit: Option<String>,
    #[serde(default, deserialize_with = "money::decimal_input")]
    pub total_fee: Option<String>,
    #[serde(default, deserialize_with = "nullable_string")]
    pub reason: Option<Option<String>>,
}

impl TransactionPatch {
    /// Merge over an existing record and re-validate the result.
    pub fn apply(self, existing: TransactionRecord) -> Result<TransactionRecord, LedgerError> {
        fn merge_nullable(
            patch: Option<Option<String>>,
            existing: Option<String>,
        ) -> Result<Option<String>, LedgerError> {
            match patch {
                None => Ok(existing),
                Some(None) => Ok(None),
                Some(Some(value)) => money::canonical_opt(Some(&value)),
            }
        }

        let leverage = match self.leverage {
            Some(value) => {
                let canonical = money::canonical_decimal(&value)?;
                if money::parse_decimal(&canonical)? < Decimal::ONE {
                    return Err(LedgerError::validation("leverage must be at least 1"));
                }
                canonical
            }
            None => existing.leverage,
        };

        let open_time = match self.open_time {
            Some(value) => {
                parse_timestamp(&value)?;
                value.trim().to_string()
            }
            None => existing.open_time,
        };

        let close_time = match self.close_time {
            None => existing.close_time,
            Some(None) => None,
            Some(Some(value)) => {
                if value.trim().is_empty() {
                    None
                } else {
                    parse_timestamp(&value)?;
                    Some(value.trim().to_string())
                }
            }
        };

        Ok(TransactionRecord {
            id: existing.id,
            platform_id: self.platform_id.unwrap_or(existing.platform_id),
            asset_name: self.asset_name.unwrap_or(existing.asset_name),
            asset_code: self.asset_code.unwrap_or(existing.asset_code),
            kind: self.kind.unwrap_or(existing.kind),
            direction: self.direction.unwrap_or(existing.direction),
            leverage,
            quantity: merge_nullable(self.quantity, existing.quantity)?,
            open_price: merge_nullable(self.open_price, existing.open_price)?,
            close_price: merge_nullable(self.close_price, existing.close_price)?,
            investment: merge_nullable(self.investment, existing.investment)?,
            open_time,
            close_time,
            total_profit: match self.total_profit {
                Some(value) => money::canonical_decimal(&value)?,
                None => existing.total_profit,
            },
            total_fee: match self.total_fee {
                Some(value) => money::canonical_decimal(&value)?,
                None => existing.total_fee,
            },
            reason: match self.reason {
                None => existing.reason,
                Some(value) => value.filter(|r| !r.trim().is_empty()),
            },
        })
    }
}

/// Create a transaction; the platform must already exist.
pub fn create_transaction(
    store: &dyn LedgerStore,
    new: NewTransaction,
) -> Result<TransactionView, LedgerError> {
    let record = new.validate()?;
    if store.get_platform(record.platform_id)?.is_none() {
        return Err(LedgerError::validation(format!(
            "platform {} does not exist",
            record.platform_id
        )));
    }
    let id = store.insert_transaction(&record)?;
    let row = store
        .get_transaction(id)?
        .ok_or_else(|| LedgerError::not_found("transaction", id))?;
    row.into_view()
}

pub fn get_transaction(store: &dyn LedgerStore, id: i64) -> Result<TransactionView, LedgerError> {
    store
        .get_transaction(id)?
        .ok_or_else(|| LedgerError::not_found("transaction", id))?
        .into_view()
}

pub fn update_transaction(
    store: &dyn LedgerStore,
    id: i64,
    patch: TransactionPatch,
) -> Result<TransactionView, LedgerError> {
    let existing = store
        .get_transaction(id)?
        .ok_or_else(|| LedgerError::not_found("transaction", id))?;

    if let Some(platform_id) = patch.platform_id {
        if store.get_platform(platform_id)?.is_none() {
            return Err(LedgerError::validation(format!(
                "platform {platform_id} does not exist"
            )));
        }
    }

    let merged = patch.apply(existing.record)?;
    store.update_transaction(id, &merged)?;
    store
        .get_transaction(id)?
        .ok_or_else(|| LedgerError::not_found("transaction", id))?
        .into_view()
}

/// Delete one transaction, returning the removed row.
pub fn delete_transaction(
    store: &dyn LedgerStore,
    id: i64,
) -> Result<TransactionView, LedgerError> {
    store
        .delete_transaction(id)?
        .ok_or_else(|| LedgerError::not_found("transaction", id))?
        .into_view()
}

/// Delete a batch of transactions by id, returning how many rows went away.
pub fn batch_delete_transactions(
    store: &dyn LedgerStore,
    ids: &[i64],
) -> Result<usize, LedgerError> {
    if ids.is_empty() {
        return Err(LedgerError::validation(
            "provide a non-empty list of transaction ids",
        ));
    }
    store.delete_transactions(ids)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_new() -> NewTransaction {
        NewTransaction {
            platform_id: 1,
            asset_name: "Bitcoin".into(),
            asset_code: "BTC".into(),
            kind: TransactionType::Contract,
            direction: Direction::Long,
            leverage: Some("10".into()),
            quantity: Some("0.50".into()),
            open_price: Some("60000".into()),
            close_price: None,
            investment: Some("1000".into()),
            open_time: "2024-03-01T10:00:00".into(),
            close_time: None,
            total_profit: Some("150".into()),
            total_fee: Some("10".into()),
            reason: None,
        }
    }

    #[test]
    fn validate_canonicalizes_decimals() {
        let record = base_new().validate().unwrap();
        assert_eq!(record.quantity.as_deref(), Some("0.5"));
        assert_eq!(record.leverage, "10");
        assert_eq!(record.total_profit, "150");
    }

    #[test]
    fn validate_defaults_leverage_and_totals() {
        let mut new = base_new();
        new.leverage = None;
        new.total_profit = None;
        new.total_fee = None;
        let record = new.validate().unwrap();
        assert_eq!(record.leverage, "1");
        assert_eq!(record.total_profit, "0");
        assert_eq!(record.total_fee, "0");
    }

    #[test]
    fn validate_rejects_sub_unit_leverage() {
        let mut new = base_new();
        new.leverage = Some("0.5".into());
        assert!(matches!(
            new.validate(),
            Err(LedgerError::Validation { .. })
        ));
    }

    #[test]
    fn validate_rejects_bad_open_time() {
        let mut new = base_new();
        new.open_time = "yesterday".into();
        assert!(new.validate().is_err());
    }

    #[test]
    fn realized_profit_is_exact() {
        let record = base_new().validate().unwrap();
        assert_eq!(record.realized_profit().unwrap(), Decimal::from(140));
    }

    #[test]
    fn holding_time_open_position_is_none() {
        let record = base_new().validate().unwrap();
        assert_eq!(record.holding_time(), None);
    }

    #[test]
    fn holding_time_formats_days_and_hours() {
        assert_eq!(
            holding_time("2024-03-01T10:00:00", Some("2024-03-03T14:30:00")),
            Some("2d4h30m".to_string())
        );
    }

    #[test]
    fn holding_time_seconds_only_under_one_day() {
        assert_eq!(
            holding_time("2024-03-01T10:00:00", Some("2024-03-01T10:05:30")),
            Some("5m30s".to_string())
        );
        assert_eq!(
            holding_time("2024-03-01T10:00:00", Some("2024-03-02T10:00:30")),
            Some("1d".to_string())
        );
    }

    #[test]
    fn holding_time_zero_floor_and_negative() {
        assert_eq!(
            holding_time("2024-03-01T10:00:00", Some("2024-03-01T10:00:00")),
            Some("0s".to_string())
        );
        assert_eq!(
            holding_time("2024-03-02T10:00:00", Some("2024-03-01T10:00:00")),
            None
        );
    }

    #[test]
    fn patch_missing_keeps_null_clears() {
        let existing = base_new().validate().unwrap();

        let patch: TransactionPatch =
            serde_json::from_str(r#"{"total_profit": "200"}"#).unwrap();
        let merged = patch.apply(existing.clone()).unwrap();
        assert_eq!(merged.total_profit, "200");
        assert_eq!(merged.quantity.as_deref(), Some("0.5"));

        let patch: TransactionPatch = serde_json::from_str(r#"{"quantity": null}"#).unwrap();
        let merged = patch.apply(existing).unwrap();
        assert_eq!(merged.quantity, None);
        assert_eq!(merged.total_profit, "150");
    }

    #[test]
    fn patch_accepts_numeric_decimals() {
        let existing = base_new().validate().unwrap();
        let patch: TransactionPatch =
            serde_json::from_str(r#"{"total_fee": 12.50, "open_price": 61000}"#).unwrap();
        let merged = patch.apply(existing).unwrap();
        assert_eq!(merged.total_fee, "12.5");
        assert_eq!(merged.open_price.as_deref(), Some("61000"));
    }

    #[test]
    fn patch_clears_close_time() {
        let mut existing = base_new().validate().unwrap();
        existing.close_time = Some("2024-03-05T10:00:00".into());
        let patch: TransactionPatch = serde_json::from_str(r#"{"close_time": null}"#).unwrap();
        let merged = patch.apply(existing).unwrap();
        assert_eq!(merged.close_time, None);
    }

    #[test]
    fn enum_round_trip() {
        assert_eq!("contract".parse::<TransactionType>().unwrap().as_str(), "contract");
        assert_eq!("SHORT".parse::<Direction>().unwrap(), Direction::Short);
        assert!("margin".parse::<TransactionType>().is_err());
        assert!("sideways".parse::<Direction>().is_err());
    }

    #[test]
    fn realized_totals_groups_by_platform() {
        let entries = vec![
            ProfitEntry {
                platform_id: 1,
                total_profit: "150".into(),
                total_fee: "10".into(),
            },
            ProfitEntry {
                platform_id: 1,
                total_profit: "-30".into(),
                total_fee: "5".into(),
            },
            ProfitEntry {
                platform_id: 2,
                total_profit: "0.3".into(),
                total_fee: "0.1".into(),
            },
        ];
        let totals = realized_totals(&entries).unwrap();
        assert_eq!(totals[&1], (Decimal::from(105), 2));
        assert_eq!(totals[&2], (money::parse_decimal("0.2").unwrap(), 1));
    }
}
