//! Storage port: the ACID relational store the ledger core talks to.

use std::collections::HashSet;

use crate::domain::error::LedgerError;
use crate::domain::money::Currency;
use crate::domain::overview::ClosedEntry;
use crate::domain::pagination::Cursor;
use crate::domain::platform::{Platform, ValidatedPlatform};
use crate::domain::rates::ExchangeRate;
use crate::domain::settings::Setting;
use crate::domain::transaction::{ProfitEntry, TransactionRecord, TransactionRow};
use crate::domain::transfer::PlatformRecord;

/// What became of a single row inside a bulk import: applied, or skipped on a
/// constraint violation. Storage-fatal problems surface as `Err` instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowOutcome {
    Applied,
    Skipped,
}

pub trait LedgerStore {
    // Platforms. `insert_platform` maps a unique-name violation to
    // `LedgerError::Conflict`.
    fn list_platforms(&self) -> Result<Vec<Platform>, LedgerError>;
    fn get_platform(&self, id: i64) -> Result<Option<Platform>, LedgerError>;
    fn insert_platform(&self, platform: &ValidatedPlatform) -> Result<Platform, LedgerError>;
    fn update_platform(&self, id: i64, platform: &ValidatedPlatform) -> Result<(), LedgerError>;
    /// Returns the deleted platform; its transactions cascade away with it.
    fn delete_platform(&self, id: i64) -> Result<Option<Platform>, LedgerError>;

    // Transactions. Rows come back joined with the owning platform's name and
    // currency, ordered by `open_time DESC, id DESC` where paged.
    fn get_transaction(&self, id: i64) -> Result<Option<TransactionRow>, LedgerError>;
    fn insert_transaction(&self, record: &TransactionRecord) -> Result<i64, LedgerError>;
    fn update_transaction(&self, id: i64, record: &TransactionRecord) -> Result<(), LedgerError>;
    fn delete_transaction(&self, id: i64) -> Result<Option<TransactionRow>, LedgerError>;
    fn delete_transactions(&self, ids: &[i64]) -> Result<usize, LedgerError>;
    fn count_transactions(&self, platform_id: Option<i64>) -> Result<i64, LedgerError>;
    fn transactions_page(
        &self,
        platform_id: Option<i64>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<TransactionRow>, LedgerError>;
    /// Keyset page: rows strictly after the cursor in the listing order,
    /// i.e. `open_time < c.open_time OR (open_time = c.open_time AND id < c.id)`.
    fn transactions_after(
        &self,
        platform_id: Option<i64>,
        cursor: &Cursor,
        limit: i64,
    ) -> Result<Vec<TransactionRow>, LedgerError>;

    // Aggregation feeds.
    fn profit_entries(&self) -> Result<Vec<ProfitEntry>, LedgerError>;
    /// Closed transactions with `close_time >= cutoff` (ISO date string).
    fn closed_transactions_since(&self, cutoff: &str) -> Result<Vec<ClosedEntry>, LedgerError>;
    /// Export scan: up to `limit` records with `id > last_id`, ascending.
    fn transactions_batch_after(
        &self,
        last_id: i64,
        limit: i64,
    ) -> Result<Vec<TransactionRecord>, LedgerError>;

    // Exchange rates.
    fn all_rates(&self) -> Result<Vec<ExchangeRate>, LedgerError>;
    fn get_rate(&self, from: Currency, to: Currency) -> Result<Option<ExchangeRate>, LedgerError>;
    fn upsert_rate(&self, from: Currency, to: Currency, rate: f64) -> Result<(), LedgerError>;

    // Settings. `upsert_settings` applies the whole batch atomically.
    fn all_settings(&self) -> Result<Vec<Setting>, LedgerError>;
    fn get_setting(&self, key: &str) -> Result<Option<Setting>, LedgerError>;
    fn upsert_setting(&self, key: &str, value: &str) -> Result<(), LedgerError>;
    fn upsert_settings(&self, entries: &[(String, String)]) -> Result<(), LedgerError>;
    fn delete_setting(&self, key: &str) -> Result<Option<Setting>, LedgerError>;

    /// Open the exclusive transaction a bulk import runs under. Dropping the
    /// handle without `commit` rolls everything back.
    fn begin_import<'a>(&'a self) -> Result<Box<dyn ImportTx + 'a>, LedgerError>;
}

/// Handle over one atomic import transaction.
pub trait ImportTx {
    /// The precomputed valid-platform-id set every imported row is checked
    /// against.
    fn platform_ids(&mut self) -> Result<HashSet<i64>, LedgerError>;
    fn delete_all_transactions(&mut self) -> Result<(), LedgerError>;
    fn update_platform_record(&mut self, record: &PlatformRecord)
    -> Result<RowOutcome, LedgerError>;
    fn insert_transaction_record(
        &mut self,
        record: &TransactionRecord,
    ) -> Result<RowOutcome, LedgerError>;
    fn upsert_setting_record(&mut self, key: &str, value: &str) -> Result<(), LedgerError>;
    fn commit(self: Box<Self>) -> Result<(), LedgerError>;
}
