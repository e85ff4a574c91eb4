//! Offset and cursor (keyset) pagination over the transaction set.
//!
//! Both modes order by `open_time DESC, id DESC`; the id tie-break keeps the
//! order total. Offset mode has an accepted weak-consistency window between
//! the count and page queries. Cursor mode is immune to insert/delete-induced
//! duplication or omission for rows strictly before the cursor; it is not
//! immune to a row's `open_time` being updated mid-traversal.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};

use super::error::LedgerError;
use super::transaction::TransactionView;
use crate::ports::store_port::LedgerStore;

pub const DEFAULT_PAGE_SIZE: i64 = 50;

/// Keyset position: the `(open_time, id)` of the last row of the previous
/// page, carried as an opaque base64 token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    pub open_time: String,
    pub id: i64,
}

impl Cursor {
    pub fn encode(&self) -> String {
        // Serializing a two-field struct cannot fail.
        let json = serde_json::to_string(self).unwrap_or_default();
        BASE64.encode(json)
    }

    pub fn decode(token: &str) -> Result<Self, LedgerError> {
        let bytes = BASE64
            .decode(token.trim())
            .map_err(|e| LedgerError::InvalidCursor {
                reason: e.to_string(),
            })?;
        serde_json::from_slice(&bytes).map_err(|e| LedgerError::InvalidCursor {
            reason: e.to_string(),
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PaginationMeta {
    pub page: i64,
    pub limit: i64,
    pub total: i64,
    pub total_pages: i64,
}

#[derive(Debug, Serialize)]
pub struct OffsetPage {
    pub data: Vec<TransactionView>,
    pub pagination: PaginationMeta,
}

/// Offset mode: `(page, limit)` with a total count. Stable only while no
/// concurrent writes land between the count and page queries.
pub fn list_transactions(
    store: &dyn LedgerStore,
    platform_id: Option<i64>,
    page: i64,
    limit: i64,
) -> Result<OffsetPage, LedgerError> {
    let page = page.max(1);
    let limit = limit.max(1);
    let offset = (page - 1) * limit;

    let total = store.count_transactions(platform_id)?;
    let rows = store.transactions_page(platform_id, limit, offset)?;
    let data = rows
        .into_iter()
        .map(|row| row.into_view())
        .collect::<Result<Vec<_>, _>>()?;

    Ok(OffsetPage {
        data,
        pagination: PaginationMeta {
            page,
            limit,
            total,
            total_pages: (total + limit - 1) / limit,
        },
    })
}

#[derive(Debug, Serialize)]
pub struct CursorPage {
    pub data: Vec<TransactionView>,
    pub next_cursor: Option<String>,
    pub has_more: bool,
}

/// Cursor mode: fetches `page_size + 1` rows to detect `has_more` without a
/// second count query. A malformed token fails with `InvalidCursor`.
pub fn list_transactions_cursor(
    store: &dyn LedgerStore,
    platform_id: Option<i64>,
    cursor: Option<&str>,
    page_size: i64,
) -> Result<CursorPage, LedgerError> {
    let page_size = page_size.max(1);
    let probe = page_size + 1;

    let mut rows = match cursor {
        Some(token) => {
            let cursor = Cursor::decode(token)?;
            store.transactions_after(platform_id, &cursor, probe)?
        }
        None => store.transactions_page(platform_id, probe, 0)?,
    };

    let has_more = rows.len() as i64 > page_size;
    rows.truncate(page_size as usize);

    let next_cursor = if has_more {
        rows.last().map(|row| {
            Cursor {
                open_time: row.record.open_time.clone(),
                // Rows coming out of the store always carry an id.
                id: row.record.id.unwrap_or_default(),
            }
            .encode()
        })
    } else {
        None
    };

    let data = rows
        .into_iter()
        .map(|row| row.into_view())
        .collect::<Result<Vec<_>, _>>()?;

    Ok(CursorPage {
        data,
        next_cursor,
        has_more,
    })
}
