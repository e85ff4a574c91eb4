//! Bulk export and atomic import of the full ledger.
//!
//! Export streams the transaction table in fixed-size batches so memory stays
//! bounded; the chunk sequence concatenates to valid JSON by construction.
//! Import runs as one storage transaction: a per-row failure is counted as
//! skipped, a storage-fatal error rolls the whole thing back. Exchange rates
//! are excluded from both directions — they are re-fetchable, not
//! source-of-truth state.

use std::io::Write;

use serde::{Deserialize, Serialize};

use super::error::LedgerError;
use super::money;
use super::platform::Platform;
use super::settings::Setting;
use super::transaction::TransactionRecord;
use crate::ports::store_port::{LedgerStore, RowOutcome};

pub const EXPORT_VERSION: &str = "1.0";
pub const EXPORT_BATCH_SIZE: i64 = 500;

/// A platform as exported/imported. Matched by id on import; never
/// auto-created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlatformRecord {
    pub id: i64,
    pub name: String,
    pub currency: super::money::Currency,
    pub initial_capital: String,
}

impl From<Platform> for PlatformRecord {
    fn from(p: Platform) -> Self {
        PlatformRecord {
            id: p.id,
            name: p.name,
            currency: p.currency,
            initial_capital: p.initial_capital,
        }
    }
}

/// Incremental JSON array writer: items are appended with comma placement
/// handled here, so any prefix+chunks+suffix concatenation is well-formed.
#[derive(Debug, Default)]
struct JsonArrayStream {
    wrote_any: bool,
}

impl JsonArrayStream {
    fn chunk<T: Serialize>(&mut self, items: &[T]) -> Result<String, LedgerError> {
        let mut out = String::new();
        for item in items {
            if self.wrote_any {
                out.push(',');
            }
            out.push_str(&serde_json::to_string(item).map_err(|e| {
                LedgerError::DatabaseQuery {
                    reason: format!("serialize export row: {e}"),
                }
            })?);
            self.wrote_any = true;
        }
        Ok(out)
    }
}

enum ExportState {
    Header,
    Transactions,
    Settings,
    Done,
}

/// Lazily yields the export as string chunks. Platforms and settings are
/// small and emitted whole; transactions stream in id order, batch by batch.
pub struct ExportStream<'a> {
    store: &'a dyn LedgerStore,
    export_time: String,
    state: ExportState,
    array: JsonArrayStream,
    last_id: i64,
}

impl<'a> ExportStream<'a> {
    pub fn new(store: &'a dyn LedgerStore, export_time: String) -> Self {
        ExportStream {
            store,
            export_time,
            state: ExportState::Header,
            array: JsonArrayStream::default(),
            last_id: 0,
        }
    }

    fn header(&mut self) -> Result<String, LedgerError> {
        let platforms: Vec<PlatformRecord> = self
            .store
            .list_platforms()?
            .into_iter()
            .map(PlatformRecord::from)
            .collect();
        let platforms_json =
            serde_json::to_string(&platforms).map_err(|e| LedgerError::DatabaseQuery {
                reason: format!("serialize platforms: {e}"),
            })?;
        Ok(format!(
            "{{\"version\":{},\"export_time\":{},\"data\":{{\"platforms\":{},\"transactions\":[",
            serde_json::json!(EXPORT_VERSION),
            serde_json::json!(self.export_time),
            platforms_json,
        ))
    }

    fn settings_tail(&mut self) -> Result<String, LedgerError> {
        let settings = self.store.all_settings()?;
        let settings_json =
            serde_json::to_string(&settings).map_err(|e| LedgerError::DatabaseQuery {
                reason: format!("serialize settings: {e}"),
            })?;
        Ok(format!("],\"settings\":{settings_json}}}}}"))
    }
}

impl Iterator for ExportStream<'_> {
    type Item = Result<String, LedgerError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.state {
                ExportState::Header => {
                    self.state = ExportState::Transactions;
                    return Some(self.header());
                }
                ExportState::Transactions => {
                    let batch = match self.store.transactions_batch_after(self.last_id, EXPORT_BATCH_SIZE)
                    {
                        Ok(batch) => batch,
                        Err(e) => {
                            self.state = ExportState::Done;
                            return Some(Err(e));
                        }
                    };
                    if (batch.len() as i64) < EXPORT_BATCH_SIZE {
                        self.state = ExportState::Settings;
                    }
                    match batch.last().and_then(|r| r.id) {
                        Some(id) => self.last_id = id,
                        None => continue, // empty batch, fall through to settings
                    }
                    return Some(self.array.chunk(&batch));
                }
                ExportState::Settings => {
                    self.state = ExportState::Done;
                    return Some(self.settings_tail());
                }
                ExportState::Done => return None,
            }
        }
    }
}

/// Stream the full ledger into `out`.
pub fn export_to_writer(
    store: &dyn LedgerStore,
    export_time: String,
    out: &mut dyn Write,
) -> Result<(), LedgerError> {
    for chunk in ExportStream::new(store, export_time) {
        out.write_all(chunk?.as_bytes())?;
    }
    out.flush()?;
    Ok(())
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ImportData {
    #[serde(default)]
    pub platforms: Vec<PlatformRecord>,
    #[serde(default)]
    pub transactions: Vec<serde_json::Value>,
    #[serde(default)]
    pub settings: Vec<Setting>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImportPayload {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub export_time: Option<String>,
    pub data: ImportData,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct ImportOptions {
    /// When false (the default) all existing transactions are deleted before
    /// any new rows land. Platforms and settings are never deleted.
    #[serde(default)]
    pub keep_existing: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct EntityCounts {
    pub imported: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ImportReport {
    pub platforms: EntityCounts,
    pub transactions: EntityCounts,
    pub settings: EntityCounts,
}

/// All-or-nothing bulk import. Per-row problems (unknown platform, malformed
/// row, constraint violation) are counted as skipped and never abort; only a
/// storage-fatal error propagates, rolling back the enclosing transaction.
pub fn import_ledger(
    store: &dyn LedgerStore,
    payload: ImportPayload,
    options: ImportOptions,
) -> Result<ImportReport, LedgerError> {
    let mut report = ImportReport::default();
    let mut tx = store.begin_import()?;

    // The valid-platform set is computed once so every row of this import
    // sees the same membership.
    let valid_ids = tx.platform_ids()?;

    if !options.keep_existing {
        tx.delete_all_transactions()?;
    }

    for record in payload.data.platforms {
        if !valid_ids.contains(&record.id) {
            tracing::warn!(id = record.id, name = %record.name, "unknown platform in import, skipped");
            report.platforms.skipped += 1;
            continue;
        }
        let record = match sanitize_platform(record) {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(error = %e, "invalid platform row in import, skipped");
                report.platforms.skipped += 1;
                continue;
            }
        };
        match tx.update_platform_record(&record)? {
            RowOutcome::Applied => report.platforms.imported += 1,
            RowOutcome::Skipped => report.platforms.skipped += 1,
        }
    }

    for raw in payload.data.transactions {
        let record = match parse_transaction(raw) {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(error = %e, "invalid transaction row in import, skipped");
                report.transactions.skipped += 1;
                continue;
            }
        };
        if !valid_ids.contains(&record.platform_id) {
            report.transactions.skipped += 1;
            continue;
        }
        match tx.insert_transaction_record(&record)? {
            RowOutcome::Applied => report.transactions.imported += 1,
            RowOutcome::Skipped => report.transactions.skipped += 1,
        }
    }

    for setting in payload.data.settings {
        tx.upsert_setting_record(&setting.key, &setting.value)?;
        report.settings.imported += 1;
    }

    tx.commit()?;
    Ok(report)
}

fn sanitize_platform(record: PlatformRecord) -> Result<PlatformRecord, LedgerError> {
    if record.name.trim().is_empty() {
        return Err(LedgerError::validation("platform name is required"));
    }
    Ok(PlatformRecord {
        id: record.id,
        name: record.name.trim().to_string(),
        currency: record.currency,
        initial_capital: money::canonical_decimal(&record.initial_capital)?,
    })
}

/// Decode and canonicalize one imported transaction row. Kept separate from
/// the create path: imported rows may carry an id, which is preserved.
fn parse_transaction(raw: serde_json::Value) -> Result<TransactionRecord, LedgerError> {
    let record: TransactionRecord = serde_json::from_value(raw)
        .map_err(|e| LedgerError::validation(format!("malformed transaction row: {e}")))?;

    super::transaction::parse_timestamp(&record.open_time)?;
    if let Some(close) = record.close_time.as_deref() {
        super::transaction::parse_timestamp(close)?;
    }

    Ok(TransactionRecord {
        leverage: money::canonical_decimal(&record.leverage)?,
        quantity: money::canonical_opt(record.quantity.as_deref())?,
        open_price: money::canonical_opt(record.open_price.as_deref())?,
        close_price: money::canonical_opt(record.close_price.as_deref())?,
        investment: money::canonical_opt(record.investment.as_deref())?,
        total_profit: money::canonical_decimal(&record.total_profit)?,
        total_fee: money::canonical_decimal(&record.total_fee)?,
        ..record
    })
}
