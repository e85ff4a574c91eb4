//! JSON API adapter over the ledger core.

mod error;
mod handlers;

pub use error::ApiError;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::cors::CorsLayer;

use crate::ports::rate_source_port::RateSource;
use crate::ports::store_port::LedgerStore;

pub struct AppState {
    pub store: Arc<dyn LedgerStore + Send + Sync>,
    pub rate_sources: Arc<Vec<Box<dyn RateSource + Send + Sync>>>,
    /// Delay between external rate lookups during a refresh.
    pub rate_pacing: Duration,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(handlers::health))
        .route(
            "/api/platforms",
            get(handlers::list_platforms).post(handlers::create_platform),
        )
        .route(
            "/api/platforms/{id}",
            get(handlers::get_platform)
                .put(handlers::update_platform)
                .delete(handlers::delete_platform),
        )
        .route(
            "/api/transactions",
            get(handlers::list_transactions).post(handlers::create_transaction),
        )
        .route(
            "/api/transactions/batch-delete",
            post(handlers::batch_delete_transactions),
        )
        .route(
            "/api/transactions/{id}",
            get(handlers::get_transaction)
                .put(handlers::update_transaction)
                .delete(handlers::delete_transaction),
        )
        .route("/api/exchange-rates", get(handlers::list_rates).post(handlers::set_rate))
        .route("/api/exchange-rates/refresh", post(handlers::refresh_rates))
        .route("/api/overview", get(handlers::overview))
        .route("/api/overview/distribution", get(handlers::distribution))
        .route("/api/overview/trend", get(handlers::trend))
        .route(
            "/api/settings",
            get(handlers::all_settings).put(handlers::bulk_upsert_settings),
        )
        .route("/api/settings/export/all", get(handlers::export_all))
        .route("/api/settings/import/all", post(handlers::import_all))
        .route(
            "/api/settings/{key}",
            get(handlers::get_setting)
                .put(handlers::upsert_setting)
                .delete(handlers::delete_setting),
        )
        .layer(CorsLayer::permissive())
        .with_state(Arc::new(state))
}
