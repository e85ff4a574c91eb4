//! Port traits separating the ledger core from its collaborators.

pub mod config_port;
pub mod rate_source_port;
pub mod store_port;
