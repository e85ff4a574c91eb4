//! SQLite storage adapter backing the [`LedgerStore`] port.

use std::collections::HashSet;
use std::str::FromStr;

use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::types::Value;
use rusqlite::{Row, params, params_from_iter};

use crate::domain::error::LedgerError;
use crate::domain::money::Currency;
use crate::domain::overview::ClosedEntry;
use crate::domain::pagination::Cursor;
use crate::domain::platform::{Platform, ValidatedPlatform};
use crate::domain::rates::{ExchangeRate, RateTable};
use crate::domain::settings::Setting;
use crate::domain::transaction::{
    Direction, ProfitEntry, TransactionRecord, TransactionRow, TransactionType,
};
use crate::domain::transfer::PlatformRecord;
use crate::ports::config_port::ConfigPort;
use crate::ports::store_port::{ImportTx, LedgerStore, RowOutcome};

pub struct SqliteStore {
    pool: Pool<SqliteConnectionManager>,
}

fn db_err(e: r2d2::Error) -> LedgerError {
    LedgerError::Database {
        reason: e.to_string(),
    }
}

fn query_err(e: rusqlite::Error) -> LedgerError {
    LedgerError::DatabaseQuery {
        reason: e.to_string(),
    }
}

fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(inner, _)
            if inner.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

/// Unique-name violations on platforms surface as `Conflict`; everything else
/// stays storage-level.
fn platform_write_err(e: rusqlite::Error) -> LedgerError {
    if is_constraint_violation(&e) && e.to_string().contains("platforms.name") {
        LedgerError::Conflict {
            message: "platform name already exists".to_string(),
        }
    } else {
        query_err(e)
    }
}

fn conversion_err(idx: usize, e: LedgerError) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
}

fn platform_from_row(row: &Row<'_>) -> rusqlite::Result<Platform> {
    let currency: String = row.get(2)?;
    Ok(Platform {
        id: row.get(0)?,
        name: row.get(1)?,
        currency: Currency::from_str(&currency).map_err(|e| conversion_err(2, e))?,
        initial_capital: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

const PLATFORM_COLUMNS: &str = "id, name, currency, initial_capital, created_at, updated_at";

const TRANSACTION_COLUMNS: &str = "t.id, t.platform_id, t.asset_name, t.asset_code, t.type, \
     t.direction, t.leverage, t.quantity, t.open_price, t.close_price, t.investment, \
     t.open_time, t.close_time, t.total_profit, t.total_fee, t.reason";

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<TransactionRecord> {
    let kind: String = row.get(4)?;
    let direction: String = row.get(5)?;
    Ok(TransactionRecord {
        id: Some(row.get(0)?),
        platform_id: row.get(1)?,
        asset_name: row.get(2)?,
        asset_code: row.get(3)?,
        kind: TransactionType::from_str(&kind).map_err(|e| conversion_err(4, e))?,
        direction: Direction::from_str(&direction).map_err(|e| conversion_err(5, e))?,
        leverage: row.get(6)?,
        quantity: row.get(7)?,
        open_price: row.get(8)?,
        close_price: row.get(9)?,
        investment: row.get(10)?,
        open_time: row.get(11)?,
        close_time: row.get(12)?,
        total_profit: row.get(13)?,
        total_fee: row.get(14)?,
        reason: row.get(15)?,
    })
}

/// Maps a `SELECT t.<cols>, p.name, p.currency` row.
fn joined_row(row: &Row<'_>) -> rusqlite::Result<TransactionRow> {
    let record = record_from_row(row)?;
    let currency: String = row.get(17)?;
    Ok(TransactionRow {
        record,
        platform_name: row.get(16)?,
        platform_currency: Currency::from_str(&currency).map_err(|e| conversion_err(17, e))?,
    })
}

impl SqliteStore {
    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, LedgerError> {
        let db_path = config.get_string("sqlite", "path").ok_or_else(|| {
            LedgerError::validation("missing config key [sqlite] path")
        })?;
        let pool_size = config.get_int("sqlite", "pool_size", 4) as u32;

        let manager = SqliteConnectionManager::file(&db_path)
            .with_init(|conn| conn.execute_batch("PRAGMA foreign_keys = ON;"));
        let pool = Pool::builder()
            .max_size(pool_size)
            .build(manager)
            .map_err(db_err)?;

        Ok(Self { pool })
    }

    pub fn in_memory() -> Result<Self, LedgerError> {
        let manager = SqliteConnectionManager::memory()
            .with_init(|conn| conn.execute_batch("PRAGMA foreign_keys = ON;"));
        let pool = Pool::builder().max_size(1).build(manager).map_err(db_err)?;
        Ok(Self { pool })
    }

    fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>, LedgerError> {
        self.pool.get().map_err(db_err)
    }

    /// Create tables, indexes and update triggers, then seed default rates
    /// and settings. Idempotent.
    pub fn initialize_schema(&self) -> Result<(), LedgerError> {
        let conn = self.conn()?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS platforms (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                currency TEXT NOT NULL CHECK(currency IN ('CNY', 'HKD', 'USD')),
                initial_capital TEXT NOT NULL DEFAULT '0',
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );
            CREATE TABLE IF NOT EXISTS transactions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                platform_id INTEGER NOT NULL,
                asset_name TEXT NOT NULL,
                asset_code TEXT NOT NULL,
                type TEXT NOT NULL CHECK(type IN ('contract', 'spot', 'event')),
                direction TEXT NOT NULL CHECK(direction IN ('long', 'short')),
                leverage TEXT NOT NULL DEFAULT '1',
                quantity TEXT,
                open_price TEXT,
                close_price TEXT,
                investment TEXT,
                open_time TEXT NOT NULL,
                close_time TEXT,
                total_profit TEXT NOT NULL DEFAULT '0',
                total_fee TEXT NOT NULL DEFAULT '0',
                reason TEXT,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                updated_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                FOREIGN KEY (platform_id) REFERENCES platforms(id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS idx_transactions_platform_id
                ON transactions(platform_id);
            CREATE INDEX IF NOT EXISTS idx_transactions_open_time
                ON transactions(open_time DESC);
            CREATE INDEX IF NOT EXISTS idx_transactions_platform_time
                ON transactions(platform_id, open_time DESC);
            CREATE INDEX IF NOT EXISTS idx_transactions_asset_code
                ON transactions(asset_code);
            CREATE INDEX IF NOT EXISTS idx_transactions_close_time
                ON transactions(close_time);
            CREATE TABLE IF NOT EXISTS exchange_rates (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                from_currency TEXT NOT NULL,
                to_currency TEXT NOT NULL,
                rate REAL NOT NULL,
                updated_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                UNIQUE(from_currency, to_currency)
            );
            CREATE TABLE IF NOT EXISTS settings (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                key TEXT NOT NULL UNIQUE,
                value TEXT NOT NULL
            );
            CREATE TRIGGER IF NOT EXISTS update_platforms_timestamp
            AFTER UPDATE ON platforms
            BEGIN
                UPDATE platforms SET updated_at = CURRENT_TIMESTAMP WHERE id = NEW.id;
            END;
            CREATE TRIGGER IF NOT EXISTS update_transactions_timestamp
            AFTER UPDATE ON transactions
            BEGIN
                UPDATE transactions SET updated_at = CURRENT_TIMESTAMP WHERE id = NEW.id;
            END;",
        )
        .map_err(query_err)?;

        let fallback = RateTable::builtin_fallback();
        for from in Currency::ALL {
            for to in Currency::ALL {
                if let Some(rate) = fallback.get(from, to) {
                    conn.execute(
                        "INSERT OR IGNORE INTO exchange_rates (from_currency, to_currency, rate)
                         VALUES (?1, ?2, ?3)",
                        params![from.as_str(), to.as_str(), rate],
                    )
                    .map_err(query_err)?;
                }
            }
        }

        for (key, value) in [
            ("display_currency", "CNY"),
            ("exchange_rate_update_interval", "3600000"),
        ] {
            conn.execute(
                "INSERT OR IGNORE INTO settings (key, value) VALUES (?1, ?2)",
                params![key, value],
            )
            .map_err(query_err)?;
        }

        Ok(())
    }
}

impl LedgerStore for SqliteStore {
    fn list_platforms(&self) -> Result<Vec<Platform>, LedgerError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {PLATFORM_COLUMNS} FROM platforms ORDER BY id"
            ))
            .map_err(query_err)?;
        let rows = stmt
            .query_map([], platform_from_row)
            .map_err(query_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(query_err)?;
        Ok(rows)
    }

    fn get_platform(&self, id: i64) -> Result<Option<Platform>, LedgerError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {PLATFORM_COLUMNS} FROM platforms WHERE id = ?1"
            ))
            .map_err(query_err)?;
        let mut rows = stmt
            .query_map(params![id], platform_from_row)
            .map_err(query_err)?;
        rows.next().transpose().map_err(query_err)
    }

    fn insert_platform(&self, platform: &ValidatedPlatform) -> Result<Platform, LedgerError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO platforms (name, currency, initial_capital) VALUES (?1, ?2, ?3)",
            params![
                platform.name,
                platform.currency.as_str(),
                platform.initial_capital
            ],
        )
        .map_err(platform_write_err)?;
        let id = conn.last_insert_rowid();
        // Read back through the held connection; going through the pool again
        // would deadlock a single-connection pool.
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {PLATFORM_COLUMNS} FROM platforms WHERE id = ?1"
            ))
            .map_err(query_err)?;
        let mut rows = stmt
            .query_map(params![id], platform_from_row)
            .map_err(query_err)?;
        rows.next()
            .transpose()
            .map_err(query_err)?
            .ok_or_else(|| LedgerError::not_found("platform", id))
    }

    fn update_platform(&self, id: i64, platform: &ValidatedPlatform) -> Result<(), LedgerError> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE platforms SET name = ?1, currency = ?2, initial_capital = ?3 WHERE id = ?4",
            params![
                platform.name,
                platform.currency.as_str(),
                platform.initial_capital,
                id
            ],
        )
        .map_err(platform_write_err)?;
        Ok(())
    }

    fn delete_platform(&self, id: i64) -> Result<Option<Platform>, LedgerError> {
        let existing = self.get_platform(id)?;
        if existing.is_some() {
            let conn = self.conn()?;
            conn.execute("DELETE FROM platforms WHERE id = ?1", params![id])
                .map_err(query_err)?;
        }
        Ok(existing)
    }

    fn get_transaction(&self, id: i64) -> Result<Option<TransactionRow>, LedgerError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {TRANSACTION_COLUMNS}, p.name, p.currency
                 FROM transactions t
                 JOIN platforms p ON t.platform_id = p.id
                 WHERE t.id = ?1"
            ))
            .map_err(query_err)?;
        let mut rows = stmt.query_map(params![id], joined_row).map_err(query_err)?;
        rows.next().transpose().map_err(query_err)
    }

    fn insert_transaction(&self, record: &TransactionRecord) -> Result<i64, LedgerError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO transactions (
                platform_id, asset_name, asset_code, type, direction, leverage,
                quantity, open_price, close_price, investment, open_time, close_time,
                total_profit, total_fee, reason
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            params![
                record.platform_id,
                record.asset_name,
                record.asset_code,
                record.kind.as_str(),
                record.direction.as_str(),
                record.leverage,
                record.quantity,
                record.open_price,
                record.close_price,
                record.investment,
                record.open_time,
                record.close_time,
                record.total_profit,
                record.total_fee,
                record.reason,
            ],
        )
        .map_err(query_err)?;
        Ok(conn.last_insert_rowid())
    }

    fn update_transaction(&self, id: i64, record: &TransactionRecord) -> Result<(), LedgerError> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE transactions SET
                platform_id = ?1, asset_name = ?2, asset_code = ?3, type = ?4,
                direction = ?5, leverage = ?6, quantity = ?7, open_price = ?8,
                close_price = ?9, investment = ?10, open_time = ?11, close_time = ?12,
                total_profit = ?13, total_fee = ?14, reason = ?15
             WHERE id = ?16",
            params![
                record.platform_id,
                record.asset_name,
                record.asset_code,
                record.kind.as_str(),
                record.direction.as_str(),
                record.leverage,
                record.quantity,
                record.open_price,
                record.close_price,
                record.investment,
                record.open_time,
                record.close_time,
                record.total_profit,
                record.total_fee,
                record.reason,
                id,
            ],
        )
        .map_err(query_err)?;
        Ok(())
    }

    fn delete_transaction(&self, id: i64) -> Result<Option<TransactionRow>, LedgerError> {
        let existing = self.get_transaction(id)?;
        if existing.is_some() {
            let conn = self.conn()?;
            conn.execute("DELETE FROM transactions WHERE id = ?1", params![id])
                .map_err(query_err)?;
        }
        Ok(existing)
    }

    fn delete_transactions(&self, ids: &[i64]) -> Result<usize, LedgerError> {
        let conn = self.conn()?;
        let placeholders = vec!["?"; ids.len()].join(",");
        let mut stmt = conn
            .prepare(&format!(
                "DELETE FROM transactions WHERE id IN ({placeholders})"
            ))
            .map_err(query_err)?;
        let changed = stmt
            .execute(params_from_iter(ids.iter()))
            .map_err(query_err)?;
        Ok(changed)
    }

    fn count_transactions(&self, platform_id: Option<i64>) -> Result<i64, LedgerError> {
        let conn = self.conn()?;
        let (sql, args): (&str, Vec<Value>) = match platform_id {
            Some(id) => (
                "SELECT COUNT(*) FROM transactions WHERE platform_id = ?1",
                vec![Value::Integer(id)],
            ),
            None => ("SELECT COUNT(*) FROM transactions", vec![]),
        };
        conn.query_row(sql, params_from_iter(args), |row| row.get(0))
            .map_err(query_err)
    }

    fn transactions_page(
        &self,
        platform_id: Option<i64>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<TransactionRow>, LedgerError> {
        let conn = self.conn()?;
        let mut sql = format!(
            "SELECT {TRANSACTION_COLUMNS}, p.name, p.currency
             FROM transactions t
             JOIN platforms p ON t.platform_id = p.id"
        );
        let mut args: Vec<Value> = Vec::new();
        if let Some(id) = platform_id {
            sql.push_str(" WHERE t.platform_id = ?1");
            args.push(Value::Integer(id));
        }
        sql.push_str(&format!(
            " ORDER BY t.open_time DESC, t.id DESC LIMIT ?{} OFFSET ?{}",
            args.len() + 1,
            args.len() + 2
        ));
        args.push(Value::Integer(limit));
        args.push(Value::Integer(offset));

        let mut stmt = conn.prepare(&sql).map_err(query_err)?;
        let rows = stmt
            .query_map(params_from_iter(args), joined_row)
            .map_err(query_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(query_err)?;
        Ok(rows)
    }

    fn transactions_after(
        &self,
        platform_id: Option<i64>,
        cursor: &Cursor,
        limit: i64,
    ) -> Result<Vec<TransactionRow>, LedgerError> {
        let conn = self.conn()?;
        let mut sql = format!(
            "SELECT {TRANSACTION_COLUMNS}, p.name, p.currency
             FROM transactions t
             JOIN platforms p ON t.platform_id = p.id
             WHERE (t.open_time < ?1 OR (t.open_time = ?1 AND t.id < ?2))"
        );
        let mut args: Vec<Value> = vec![
            Value::Text(cursor.open_time.clone()),
            Value::Integer(cursor.id),
        ];
        if let Some(id) = platform_id {
            sql.push_str(" AND t.platform_id = ?3");
            args.push(Value::Integer(id));
        }
        sql.push_str(&format!(
            " ORDER BY t.open_time DESC, t.id DESC LIMIT ?{}",
            args.len() + 1
        ));
        args.push(Value::Integer(limit));

        let mut stmt = conn.prepare(&sql).map_err(query_err)?;
        let rows = stmt
            .query_map(params_from_iter(args), joined_row)
            .map_err(query_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(query_err)?;
        Ok(rows)
    }

    fn profit_entries(&self) -> Result<Vec<ProfitEntry>, LedgerError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT platform_id, total_profit, total_fee FROM transactions")
            .map_err(query_err)?;
        let rows = stmt
            .query_map([], |row| {
                Ok(ProfitEntry {
                    platform_id: row.get(0)?,
                    total_profit: row.get(1)?,
                    total_fee: row.get(2)?,
                })
            })
            .map_err(query_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(query_err)?;
        Ok(rows)
    }

    fn closed_transactions_since(&self, cutoff: &str) -> Result<Vec<ClosedEntry>, LedgerError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT t.close_time, p.currency, t.total_profit, t.total_fee
                 FROM transactions t
                 JOIN platforms p ON t.platform_id = p.id
                 WHERE t.close_time IS NOT NULL AND t.close_time >= ?1
                 ORDER BY t.close_time",
            )
            .map_err(query_err)?;
        let rows = stmt
            .query_map(params![cutoff], |row| {
                let currency: String = row.get(1)?;
                Ok(ClosedEntry {
                    close_time: row.get(0)?,
                    platform_currency: Currency::from_str(&currency)
                        .map_err(|e| conversion_err(1, e))?,
                    total_profit: row.get(2)?,
                    total_fee: row.get(3)?,
                })
            })
            .map_err(query_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(query_err)?;
        Ok(rows)
    }

    fn transactions_batch_after(
        &self,
        last_id: i64,
        limit: i64,
    ) -> Result<Vec<TransactionRecord>, LedgerError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {TRANSACTION_COLUMNS} FROM transactions t
                 WHERE t.id > ?1 ORDER BY t.id LIMIT ?2"
            ))
            .map_err(query_err)?;
        let rows = stmt
            .query_map(params![last_id, limit], record_from_row)
            .map_err(query_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(query_err)?;
        Ok(rows)
    }

    fn all_rates(&self) -> Result<Vec<ExchangeRate>, LedgerError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT from_currency, to_currency, rate, updated_at
                 FROM exchange_rates ORDER BY from_currency, to_currency",
            )
            .map_err(query_err)?;
        let rows = stmt
            .query_map([], |row| {
                let from: String = row.get(0)?;
                let to: String = row.get(1)?;
                Ok(ExchangeRate {
                    from_currency: Currency::from_str(&from).map_err(|e| conversion_err(0, e))?,
                    to_currency: Currency::from_str(&to).map_err(|e| conversion_err(1, e))?,
                    rate: row.get(2)?,
                    updated_at: row.get(3)?,
                })
            })
            .map_err(query_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(query_err)?;
        Ok(rows)
    }

    fn get_rate(&self, from: Currency, to: Currency) -> Result<Option<ExchangeRate>, LedgerError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT from_currency, to_currency, rate, updated_at
                 FROM exchange_rates WHERE from_currency = ?1 AND to_currency = ?2",
            )
            .map_err(query_err)?;
        let mut rows = stmt
            .query_map(params![from.as_str(), to.as_str()], |row| {
                let from: String = row.get(0)?;
                let to: String = row.get(1)?;
                Ok(ExchangeRate {
                    from_currency: Currency::from_str(&from).map_err(|e| conversion_err(0, e))?,
                    to_currency: Currency::from_str(&to).map_err(|e| conversion_err(1, e))?,
                    rate: row.get(2)?,
                    updated_at: row.get(3)?,
                })
            })
            .map_err(query_err)?;
        rows.next().transpose().map_err(query_err)
    }

    fn upsert_rate(&self, from: Currency, to: Currency, rate: f64) -> Result<(), LedgerError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO exchange_rates (from_currency, to_currency, rate, updated_at)
             VALUES (?1, ?2, ?3, datetime('now', 'localtime'))",
            params![from.as_str(), to.as_str(), rate],
        )
        .map_err(query_err)?;
        Ok(())
    }

    fn all_settings(&self) -> Result<Vec<Setting>, LedgerError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT key, value FROM settings ORDER BY key")
            .map_err(query_err)?;
        let rows = stmt
            .query_map([], |row| {
                Ok(Setting {
                    key: row.get(0)?,
                    value: row.get(1)?,
                })
            })
            .map_err(query_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(query_err)?;
        Ok(rows)
    }

    fn get_setting(&self, key: &str) -> Result<Option<Setting>, LedgerError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT key, value FROM settings WHERE key = ?1")
            .map_err(query_err)?;
        let mut rows = stmt
            .query_map(params![key], |row| {
                Ok(Setting {
                    key: row.get(0)?,
                    value: row.get(1)?,
                })
            })
            .map_err(query_err)?;
        rows.next().transpose().map_err(query_err)
    }

    fn upsert_setting(&self, key: &str, value: &str) -> Result<(), LedgerError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO settings (key, value) VALUES (?1, ?2)",
            params![key, value],
        )
        .map_err(query_err)?;
        Ok(())
    }

    fn upsert_settings(&self, entries: &[(String, String)]) -> Result<(), LedgerError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(query_err)?;
        for (key, value) in entries {
            tx.execute(
                "INSERT OR REPLACE INTO settings (key, value) VALUES (?1, ?2)",
                params![key, value],
            )
            .map_err(query_err)?;
        }
        tx.commit().map_err(query_err)
    }

    fn delete_setting(&self, key: &str) -> Result<Option<Setting>, LedgerError> {
        let existing = self.get_setting(key)?;
        if existing.is_some() {
            let conn = self.conn()?;
            conn.execute("DELETE FROM settings WHERE key = ?1", params![key])
                .map_err(query_err)?;
        }
        Ok(existing)
    }

    fn begin_import<'a>(&'a self) -> Result<Box<dyn ImportTx + 'a>, LedgerError> {
        let conn = self.conn()?;
        conn.execute_batch("BEGIN IMMEDIATE").map_err(query_err)?;
        Ok(Box::new(SqliteImportTx {
            conn,
            finished: false,
        }))
    }
}

/// One exclusive import transaction over a pooled connection. Rolls back on
/// drop unless committed.
struct SqliteImportTx {
    conn: PooledConnection<SqliteConnectionManager>,
    finished: bool,
}

impl ImportTx for SqliteImportTx {
    fn platform_ids(&mut self) -> Result<HashSet<i64>, LedgerError> {
        let mut stmt = self
            .conn
            .prepare("SELECT id FROM platforms")
            .map_err(query_err)?;
        let ids = stmt
            .query_map([], |row| row.get(0))
            .map_err(query_err)?
            .collect::<rusqlite::Result<HashSet<i64>>>()
            .map_err(query_err)?;
        Ok(ids)
    }

    fn delete_all_transactions(&mut self) -> Result<(), LedgerError> {
        self.conn
            .execute("DELETE FROM transactions", [])
            .map_err(query_err)?;
        Ok(())
    }

    fn update_platform_record(
        &mut self,
        record: &PlatformRecord,
    ) -> Result<RowOutcome, LedgerError> {
        let result = self.conn.execute(
            "UPDATE platforms SET name = ?1, currency = ?2, initial_capital = ?3 WHERE id = ?4",
            params![
                record.name,
                record.currency.as_str(),
                record.initial_capital,
                record.id
            ],
        );
        match result {
            Ok(_) => Ok(RowOutcome::Applied),
            Err(e) if is_constraint_violation(&e) => Ok(RowOutcome::Skipped),
            Err(e) => Err(query_err(e)),
        }
    }

    fn insert_transaction_record(
        &mut self,
        record: &TransactionRecord,
    ) -> Result<RowOutcome, LedgerError> {
        let result = self.conn.execute(
            "INSERT INTO transactions (
                id, platform_id, asset_name, asset_code, type, direction, leverage,
                quantity, open_price, close_price, investment, open_time, close_time,
                total_profit, total_fee, reason
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
            params![
                record.id,
                record.platform_id,
                record.asset_name,
                record.asset_code,
                record.kind.as_str(),
                record.direction.as_str(),
                record.leverage,
                record.quantity,
                record.open_price,
                record.close_price,
                record.investment,
                record.open_time,
                record.close_time,
                record.total_profit,
                record.total_fee,
                record.reason,
            ],
        );
        match result {
            Ok(_) => Ok(RowOutcome::Applied),
            Err(e) if is_constraint_violation(&e) => Ok(RowOutcome::Skipped),
            Err(e) => Err(query_err(e)),
        }
    }

    fn upsert_setting_record(&mut self, key: &str, value: &str) -> Result<(), LedgerError> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO settings (key, value) VALUES (?1, ?2)",
                params![key, value],
            )
            .map_err(query_err)?;
        Ok(())
    }

    fn commit(mut self: Box<Self>) -> Result<(), LedgerError> {
        self.conn.execute_batch("COMMIT").map_err(query_err)?;
        self.finished = true;
        Ok(())
    }
}

impl Drop for SqliteImportTx {
    fn drop(&mut self) {
        if !self.finished {
            let _ = self.conn.execute_batch("ROLLBACK");
        }
    }
}
