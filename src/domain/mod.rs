//! Core ledger domain: decimal value model, aggregation, pagination and
//! bulk transfer logic.

pub mod error;
pub mod money;
pub mod overview;
pub mod pagination;
pub mod platform;
pub mod rates;
pub mod settings;
pub mod transaction;
pub mod transfer;
