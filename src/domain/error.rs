//! Ledger error taxonomy.

/// Top-level error type for finledger.
///
/// `Database` and `DatabaseQuery` are storage-fatal: inside a bulk import they
/// abort and roll back the whole transaction. Everything else is a caller
/// problem and maps to a 4xx-equivalent outcome.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("{message}")]
    Validation { message: String },

    #[error("invalid cursor token: {reason}")]
    InvalidCursor { reason: String },

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("{message}")]
    Conflict { message: String },

    #[error("database error: {reason}")]
    Database { reason: String },

    #[error("database query error: {reason}")]
    DatabaseQuery { reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl LedgerError {
    pub fn validation(message: impl Into<String>) -> Self {
        LedgerError::Validation {
            message: message.into(),
        }
    }

    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        LedgerError::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

impl From<&LedgerError> for std::process::ExitCode {
    fn from(err: &LedgerError) -> Self {
        let code: u8 = match err {
            LedgerError::Io(_) => 1,
            LedgerError::Validation { .. }
            | LedgerError::InvalidCursor { .. }
            | LedgerError::Conflict { .. } => 2,
            LedgerError::Database { .. } | LedgerError::DatabaseQuery { .. } => 3,
            LedgerError::NotFound { .. } => 4,
        };
        std::process::ExitCode::from(code)
    }
}
