use rusqlite::ErrorCode;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Store I/O error (code {code}): {detail}")]
    Io { code: i32, detail: String },

    #[error("Store is corrupt: {0}")]
    CorruptStore(String),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(rusqlite::Error),

    #[error("Filesystem error: {0}")]
    Filesystem(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Coarse classification used by the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    Io,
    CorruptStore,
    ConstraintViolation,
    Cancelled,
    NotFound,
    Database,
    Filesystem,
    Config,
}

/// Only failures of the store's backing file are worth a reopen-and-retry.
pub fn is_recoverable(kind: ErrorKind) -> bool {
    matches!(kind, ErrorKind::Io | ErrorKind::CorruptStore)
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Io { .. } => ErrorKind::Io,
            Error::CorruptStore(_) => ErrorKind::CorruptStore,
            Error::ConstraintViolation(_) => ErrorKind::ConstraintViolation,
            Error::Cancelled => ErrorKind::Cancelled,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::Database(_) => ErrorKind::Database,
            Error::Filesystem(_) => ErrorKind::Filesystem,
            Error::Config(_) | Error::Serialization(_) => ErrorKind::Config,
        }
    }

    pub fn is_recoverable(&self) -> bool {
        is_recoverable(self.kind())
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    pub(crate) fn vanished(path: &std::path::Path) -> Self {
        Error::Io {
            code: rusqlite::ffi::SQLITE_CANTOPEN,
            detail: format!("database file {} no longer exists", path.display()),
        }
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        let (code, extended_code) = match &err {
            rusqlite::Error::SqliteFailure(failure, _) => (failure.code, failure.extended_code),
            _ => return Error::Database(err),
        };

        match code {
            ErrorCode::SystemIoFailure
            | ErrorCode::CannotOpen
            | ErrorCode::ReadOnly
            | ErrorCode::DiskFull => Error::Io {
                code: extended_code,
                detail: err.to_string(),
            },
            ErrorCode::DatabaseCorrupt | ErrorCode::NotADatabase => {
                Error::CorruptStore(err.to_string())
            }
            ErrorCode::ConstraintViolation => Error::ConstraintViolation(err.to_string()),
            _ => Error::Database(err),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
