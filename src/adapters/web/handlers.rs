//! JSON request handlers.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;

use axum::Json;
use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::json;

use crate::domain::money::Currency;
use crate::domain::overview;
use crate::domain::pagination::{self, DEFAULT_PAGE_SIZE};
use crate::domain::platform::{self, NewPlatform, PlatformPatch};
use crate::domain::rates::{self, RateTable};
use crate::domain::settings;
use crate::domain::transaction::{self, NewTransaction, TransactionPatch};
use crate::domain::transfer::{ExportStream, ImportOptions, ImportPayload, import_ledger};
use crate::ports::rate_source_port::RateSource;
use crate::ports::store_port::LedgerStore;

use super::{ApiError, AppState};

pub async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

// ---- platforms ----

pub async fn list_platforms(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let platforms = platform::list_platforms(state.store.as_ref())?;
    Ok(Json(platforms).into_response())
}

pub async fn get_platform(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Response, ApiError> {
    let stats = platform::get_platform(state.store.as_ref(), id)?;
    Ok(Json(stats).into_response())
}

pub async fn create_platform(
    State(state): State<Arc<AppState>>,
    Json(new): Json<NewPlatform>,
) -> Result<Response, ApiError> {
    let created = platform::create_platform(state.store.as_ref(), new)?;
    Ok((StatusCode::CREATED, Json(created)).into_response())
}

pub async fn update_platform(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(patch): Json<PlatformPatch>,
) -> Result<Response, ApiError> {
    let updated = platform::update_platform(state.store.as_ref(), id, patch)?;
    Ok(Json(updated).into_response())
}

pub async fn delete_platform(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Response, ApiError> {
    let deleted = platform::delete_platform(state.store.as_ref(), id)?;
    Ok(Json(deleted).into_response())
}

// ---- transactions ----

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub platform_id: Option<i64>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub cursor: Option<String>,
    pub page_size: Option<i64>,
    pub mode: Option<String>,
}

pub async fn list_transactions(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Result<Response, ApiError> {
    let cursor_mode = query.cursor.is_some() || query.mode.as_deref() == Some("cursor");
    if cursor_mode {
        let page = pagination::list_transactions_cursor(
            state.store.as_ref(),
            query.platform_id,
            query.cursor.as_deref(),
            query.page_size.unwrap_or(DEFAULT_PAGE_SIZE),
        )?;
        Ok(Json(page).into_response())
    } else {
        let page = pagination::list_transactions(
            state.store.as_ref(),
            query.platform_id,
            query.page.unwrap_or(1),
            query.limit.unwrap_or(DEFAULT_PAGE_SIZE),
        )?;
        Ok(Json(page).into_response())
    }
}

pub async fn get_transaction(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Response, ApiError> {
    let view = transaction::get_transaction(state.store.as_ref(), id)?;
    Ok(Json(view).into_response())
}

pub async fn create_transaction(
    State(state): State<Arc<AppState>>,
    Json(new): Json<NewTransaction>,
) -> Result<Response, ApiError> {
    let created = transaction::create_transaction(state.store.as_ref(), new)?;
    Ok((StatusCode::CREATED, Json(created)).into_response())
}

pub async fn update_transaction(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(patch): Json<TransactionPatch>,
) -> Result<Response, ApiError> {
    let updated = transaction::update_transaction(state.store.as_ref(), id, patch)?;
    Ok(Json(updated).into_response())
}

pub async fn delete_transaction(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Response, ApiError> {
    let deleted = transaction::delete_transaction(state.store.as_ref(), id)?;
    Ok(Json(deleted).into_response())
}

#[derive(Debug, Deserialize)]
pub struct BatchDeleteBody {
    pub ids: Vec<i64>,
}

pub async fn batch_delete_transactions(
    State(state): State<Arc<AppState>>,
    Json(body): Json<BatchDeleteBody>,
) -> Result<Response, ApiError> {
    let deleted = transaction::batch_delete_transactions(state.store.as_ref(), &body.ids)?;
    Ok(Json(json!({ "deleted": deleted })).into_response())
}

// ---- exchange rates ----

pub async fn list_rates(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let table = rates::rate_map(state.store.as_ref())?;
    Ok(Json(table).into_response())
}

#[derive(Debug, Deserialize)]
pub struct SetRateBody {
    pub from: Currency,
    pub to: Currency,
    pub rate: f64,
}

pub async fn set_rate(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SetRateBody>,
) -> Result<Response, ApiError> {
    let saved = rates::set_rate(state.store.as_ref(), body.from, body.to, body.rate)?;
    Ok(Json(saved).into_response())
}

/// Rate refresh talks to external APIs over blocking HTTP, so it runs on the
/// blocking pool rather than the async executor.
pub async fn refresh_rates(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let store = state.store.clone();
    let sources = state.rate_sources.clone();
    let pacing = state.rate_pacing;

    let refreshed = tokio::task::spawn_blocking(move || {
        let refs: Vec<&dyn RateSource> =
            sources.iter().map(|s| &**s as &dyn RateSource).collect();
        rates::refresh_rates(
            store.as_ref(),
            &refs,
            &RateTable::builtin_fallback(),
            pacing,
        )
    })
    .await
    .map_err(|e| ApiError::internal(e.to_string()))??;

    Ok(Json(json!({ "refreshed": refreshed })).into_response())
}

// ---- overview ----

#[derive(Debug, Deserialize)]
pub struct CurrencyQuery {
    pub currency: Option<String>,
    pub months: Option<u32>,
}

/// The display currency: the `currency` query parameter when given, otherwise
/// the persisted `display_currency` setting.
fn display_currency(
    store: &dyn LedgerStore,
    requested: Option<&str>,
) -> Result<Currency, ApiError> {
    let name = match requested {
        Some(name) => name.to_string(),
        None => store
            .get_setting("display_currency")?
            .map(|s| s.value)
            .unwrap_or_else(|| "CNY".to_string()),
    };
    Ok(Currency::from_str(&name)?)
}

pub async fn overview(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CurrencyQuery>,
) -> Result<Response, ApiError> {
    let display = display_currency(state.store.as_ref(), query.currency.as_deref())?;
    let report = overview::overview(state.store.as_ref(), display)?;
    Ok(Json(report).into_response())
}

pub async fn distribution(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CurrencyQuery>,
) -> Result<Response, ApiError> {
    let display = display_currency(state.store.as_ref(), query.currency.as_deref())?;
    let report = overview::distribution(state.store.as_ref(), display)?;
    Ok(Json(report).into_response())
}

pub async fn trend(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CurrencyQuery>,
) -> Result<Response, ApiError> {
    let display = display_currency(state.store.as_ref(), query.currency.as_deref())?;
    let report = overview::trend(state.store.as_ref(), display, query.months.unwrap_or(6))?;
    Ok(Json(report).into_response())
}

// ---- settings ----

pub async fn all_settings(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let map = settings::all_settings(state.store.as_ref())?;
    Ok(Json(map).into_response())
}

pub async fn get_setting(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> Result<Response, ApiError> {
    let setting = settings::get_setting(state.store.as_ref(), &key)?;
    Ok(Json(setting).into_response())
}

#[derive(Debug, Deserialize)]
pub struct SettingBody {
    pub value: String,
}

pub async fn upsert_setting(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
    Json(body): Json<SettingBody>,
) -> Result<Response, ApiError> {
    let setting = settings::upsert_setting(state.store.as_ref(), &key, &body.value)?;
    Ok(Json(setting).into_response())
}

pub async fn bulk_upsert_settings(
    State(state): State<Arc<AppState>>,
    Json(entries): Json<BTreeMap<String, String>>,
) -> Result<Response, ApiError> {
    let map = settings::upsert_settings(state.store.as_ref(), &entries)?;
    Ok(Json(map).into_response())
}

pub async fn delete_setting(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> Result<Response, ApiError> {
    let setting = settings::delete_setting(state.store.as_ref(), &key)?;
    Ok(Json(setting).into_response())
}

// ---- export / import ----

/// Streams the export body chunk by chunk. The blocking producer writes into
/// an unbounded channel; a client disconnect drops the receiver and stops the
/// scan at the next send.
pub async fn export_all(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let store = state.store.clone();
    let (tx, rx) = futures::channel::mpsc::unbounded::<Result<String, std::io::Error>>();

    tokio::task::spawn_blocking(move || {
        let export_time = chrono::Local::now().format("%Y-%m-%dT%H:%M:%S").to_string();
        for chunk in ExportStream::new(store.as_ref(), export_time) {
            if tx.unbounded_send(chunk.map_err(std::io::Error::other)).is_err() {
                break;
            }
        }
    });

    Ok((
        [
            (header::CONTENT_TYPE, "application/json"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"finledger-export.json\"",
            ),
        ],
        Body::from_stream(rx),
    )
        .into_response())
}

pub async fn import_all(
    State(state): State<Arc<AppState>>,
    Query(options): Query<ImportOptions>,
    Json(payload): Json<ImportPayload>,
) -> Result<Response, ApiError> {
    let report = import_ledger(state.store.as_ref(), payload, options)?;
    Ok(Json(report).into_response())
}
