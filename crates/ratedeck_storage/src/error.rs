//! Error types for storage operations.

use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Whether a failure is likely to clear up on retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Likely recoverable by retrying the same operation.
    Transient,
    /// Retrying will not help.
    Permanent,
}

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The database could not be opened or reached.
    #[error("database '{db}' unavailable: {message}")]
    Unavailable {
        /// Database name.
        db: String,
        /// Engine-provided description.
        message: String,
        /// Retry classification.
        kind: ErrorKind,
    },

    /// An operation was issued against a closed database.
    #[error("database '{db}' is not open")]
    NotOpen {
        /// Database name.
        db: String,
    },

    /// The named store does not exist in the open schema.
    #[error("store '{store}' not found in database '{db}'")]
    StoreNotFound {
        /// Database name.
        db: String,
        /// Store name.
        store: String,
    },

    /// The store has no index on the requested field.
    #[error("index '{index}' not found on store '{store}'")]
    IndexNotFound {
        /// Store name.
        store: String,
        /// Requested index field.
        index: String,
    },

    /// Open requested a version lower than the stored one.
    #[error("requested version {requested} is lower than stored version {current} for '{db}'")]
    VersionConflict {
        /// Database name.
        db: String,
        /// Version asked for.
        requested: u32,
        /// Version on record.
        current: u32,
    },

    /// A store definition could not be parsed or applied.
    #[error("invalid schema: {0}")]
    InvalidSchema(String),

    /// A record did not carry a usable primary key.
    #[error("invalid key in store '{store}': {message}")]
    InvalidKey {
        /// Store name.
        store: String,
        /// What was wrong with the key.
        message: String,
    },

    /// Opaque failure surfaced by an engine adapter.
    #[error("backend error: {message}")]
    Backend {
        /// Engine-provided description.
        message: String,
        /// Retry classification.
        kind: ErrorKind,
    },
}

impl StorageError {
    /// Creates a transient unavailability error.
    pub fn transient(db: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Unavailable {
            db: db.into(),
            message: message.into(),
            kind: ErrorKind::Transient,
        }
    }

    /// Creates a permanent unavailability error.
    pub fn permanent(db: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Unavailable {
            db: db.into(),
            message: message.into(),
            kind: ErrorKind::Permanent,
        }
    }

    /// Wraps an untyped failure from a foreign engine.
    ///
    /// Only adapters that receive bare messages should use this; the kind
    /// is inferred with [`classify_message`].
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        let kind = classify_message(&message);
        Self::Backend { message, kind }
    }

    /// Returns the retry classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Unavailable { kind, .. } | Self::Backend { kind, .. } => *kind,
            _ => ErrorKind::Permanent,
        }
    }

    /// Returns true if retrying may succeed.
    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }
}

/// Substrings that mark an untyped failure as transient.
const TRANSIENT_MARKERS: [&str; 4] = ["timeout", "connection", "network", "temporarily"];

/// Classifies a free-form error message (case-insensitive substring match).
pub fn classify_message(message: &str) -> ErrorKind {
    let lower = message.to_lowercase();
    if TRANSIENT_MARKERS.iter().any(|m| lower.contains(m)) {
        ErrorKind::Transient
    } else {
        ErrorKind::Permanent
    }
}
