use rusqlite::ffi;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No signer is available for the active session.
    #[error("Signer not ready: {message}")]
    NotReady { message: String },

    #[error("Not found: {what}")]
    NotFound { what: String },

    /// A write referenced a parent row that does not exist.
    #[error("Referential integrity violation: {message}")]
    ReferentialIntegrity { message: String },

    /// Local store I/O failure. Callers may retry.
    #[error("Storage unavailable: {message}")]
    StorageUnavailable { message: String },

    #[error("Relay source unavailable: {message}")]
    SourceUnavailable { message: String },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    /// A cached row could not be decoded.
    #[error("Invalid cached data: {message}")]
    InvalidData { message: String },
}

impl Error {
    pub fn not_ready(message: impl Into<String>) -> Self {
        Self::NotReady {
            message: message.into(),
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    pub fn source(message: impl std::fmt::Display) -> Self {
        Self::SourceUnavailable {
            message: message.to_string(),
        }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::StorageUnavailable {
            message: message.into(),
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Storage and relay failures can be retried as-is.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::StorageUnavailable { .. } | Self::SourceUnavailable { .. }
        )
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(code, _)
                if code.extended_code == ffi::SQLITE_CONSTRAINT_FOREIGNKEY =>
            {
                Self::ReferentialIntegrity {
                    message: err.to_string(),
                }
            }
            _ => Self::StorageUnavailable {
                message: err.to_string(),
            },
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidData {
            message: err.to_string(),
        }
    }
}
