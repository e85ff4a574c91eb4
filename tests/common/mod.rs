#![allow(dead_code)]

use std::collections::HashMap;

use finledger::adapters::sqlite_store::SqliteStore;
use finledger::domain::money::Currency;
use finledger::domain::platform::{self, NewPlatform, Platform};
use finledger::domain::transaction::{self, NewTransaction, TransactionView};
use finledger::ports::rate_source_port::RateSource;

pub fn store() -> SqliteStore {
    let store = SqliteStore::in_memory().unwrap();
    store.initialize_schema().unwrap();
    store
}

pub fn add_platform(
    store: &SqliteStore,
    name: &str,
    currency: Currency,
    initial_capital: &str,
) -> Platform {
    platform::create_platform(
        store,
        NewPlatform {
            name: name.to_string(),
            currency,
            initial_capital: Some(initial_capital.to_string()),
        },
    )
    .unwrap()
}

/// A spot BTC transaction with everything else defaulted; tests mutate the
/// fields they care about.
pub fn new_transaction(platform_id: i64, open_time: &str) -> NewTransaction {
    serde_json::from_value(serde_json::json!({
        "platform_id": platform_id,
        "asset_name": "Bitcoin",
        "asset_code": "BTC",
        "type": "spot",
        "direction": "long",
        "open_time": open_time,
    }))
    .unwrap()
}

pub fn add_transaction(
    store: &SqliteStore,
    platform_id: i64,
    open_time: &str,
    profit: &str,
    fee: &str,
) -> TransactionView {
    let mut new = new_transaction(platform_id, open_time);
    new.total_profit = Some(profit.to_string());
    new.total_fee = Some(fee.to_string());
    transaction::create_transaction(store, new).unwrap()
}

pub fn add_closed_transaction(
    store: &SqliteStore,
    platform_id: i64,
    open_time: &str,
    close_time: &str,
    profit: &str,
) -> TransactionView {
    let mut new = new_transaction(platform_id, open_time);
    new.close_time = Some(close_time.to_string());
    new.total_profit = Some(profit.to_string());
    transaction::create_transaction(store, new).unwrap()
}

/// Rate source answering from a fixed table.
pub struct ScriptedSource {
    pub name: String,
    pub rates: HashMap<(Currency, Currency), f64>,
}

impl ScriptedSource {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            rates: HashMap::new(),
        }
    }

    pub fn with_rate(mut self, from: Currency, to: Currency, rate: f64) -> Self {
        self.rates.insert((from, to), rate);
        self
    }
}

impl RateSource for ScriptedSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn fetch(&self, from: Currency, to: Currency) -> Option<f64> {
        self.rates.get(&(from, to)).copied()
    }
}

/// Rate source that never answers.
pub struct DeadSource;

impl RateSource for DeadSource {
    fn name(&self) -> &str {
        "dead"
    }

    fn fetch(&self, _from: Currency, _to: Currency) -> Option<f64> {
        None
    }
}
