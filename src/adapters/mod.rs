//! Concrete adapter implementations for ports.

pub mod file_config_adapter;
pub mod rate_http;
pub mod sqlite_store;
#[cfg(feature = "web")]
pub mod web;
