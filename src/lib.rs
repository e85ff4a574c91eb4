//! finledger — multi-platform, multi-currency trading ledger.
//!
//! Hexagonal architecture: ledger logic in [`domain`], port traits in
//! [`ports`], concrete implementations in [`adapters`].

pub mod adapters;
pub mod cli;
pub mod domain;
pub mod ports;
