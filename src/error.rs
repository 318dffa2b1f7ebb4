//! Engine error types.
//!
//! [`LunchError`] is the central error type returned by every core
//! operation. [`BackendError`] describes a failure inside one of the
//! collaborators (event log or user directory) and is always wrapped in
//! [`LunchError::Backend`] together with the name of the operation that
//! hit it.

/// Failure reported by a storage or directory collaborator.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// Transient I/O failure talking to the backing store.
    #[error("storage i/o failure: {0}")]
    Io(String),

    /// A stored record could not be decoded.
    #[error("corrupt record: {0}")]
    Corrupt(String),

    /// Error propagated from the PostgreSQL driver.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Error enum returned by the engine.
///
/// # Error Code Ranges
///
/// | Range     | Category              |
/// |-----------|-----------------------|
/// | 1000–1999 | Validation            |
/// | 2000–2999 | State / Not Found     |
/// | 3000–3999 | Backend               |
/// | 4000–4999 | Lottery rules         |
#[derive(Debug, thiserror::Error)]
pub enum LunchError {
    /// Requested entity is absent from the materialized view.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Entity kind (`"place"`, `"room"`, ...).
        kind: &'static str,
        /// Identifier that was looked up.
        id: String,
    },

    /// The room has no non-deleted places to roll from.
    #[error("no places to choose from")]
    NoPlaces,

    /// The caller has no weekly points left for this action.
    #[error("no points left")]
    NoPoints,

    /// Request validation failed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A collaborator failed while performing `operation`.
    #[error("{operation} failed: {source}")]
    Backend {
        /// Name of the operation that failed.
        operation: &'static str,
        /// Underlying collaborator error.
        #[source]
        source: BackendError,
    },

    /// Invalid engine configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

impl LunchError {
    /// Builds a [`LunchError::NotFound`] for the given kind and id.
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    /// Wraps a collaborator failure with the name of the failing operation.
    #[must_use]
    pub fn backend(operation: &'static str, source: BackendError) -> Self {
        Self::Backend { operation, source }
    }

    /// Returns the numeric error code for this variant.
    #[must_use]
    pub const fn error_code(&self) -> u32 {
        match self {
            Self::InvalidRequest(_) => 1001,
            Self::Config(_) => 1002,
            Self::NotFound { .. } => 2001,
            Self::Backend { .. } => 3001,
            Self::NoPlaces => 4001,
            Self::NoPoints => 4002,
        }
    }

    /// Returns `true` if retrying the same call may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Backend {
                source: BackendError::Io(_) | BackendError::Database(_),
                ..
            }
        )
    }
}
