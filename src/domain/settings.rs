//! Key→value settings (display currency, refresh interval, color mode).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::error::LedgerError;
use crate::ports::store_port::LedgerStore;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Setting {
    pub key: String,
    pub value: String,
}

pub fn all_settings(store: &dyn LedgerStore) -> Result<BTreeMap<String, String>, LedgerError> {
    Ok(store
        .all_settings()?
        .into_iter()
        .map(|s| (s.key, s.value))
        .collect())
}

pub fn get_setting(store: &dyn LedgerStore, key: &str) -> Result<Setting, LedgerError> {
    store
        .get_setting(key)?
        .ok_or_else(|| LedgerError::not_found("setting", key))
}

pub fn upsert_setting(
    store: &dyn LedgerStore,
    key: &str,
    value: &str,
) -> Result<Setting, LedgerError> {
    store.upsert_setting(key, value)?;
    get_setting(store, key)
}

/// Atomic bulk upsert; returns the full settings map afterwards.
pub fn upsert_settings(
    store: &dyn LedgerStore,
    entries: &BTreeMap<String, String>,
) -> Result<BTreeMap<String, String>, LedgerError> {
    let pairs: Vec<(String, String)> = entries
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    store.upsert_settings(&pairs)?;
    all_settings(store)
}

pub fn delete_setting(store: &dyn LedgerStore, key: &str) -> Result<Setting, LedgerError> {
    store
        .delete_setting(key)?
        .ok_or_else(|| LedgerError::not_found("setting", key))
}
