//! Error types for the storage core.

use ratedeck_storage::StorageError;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in the storage core.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Opening or reopening a database failed.
    #[error("connection to '{db}' failed after {attempts} attempt(s): {source}")]
    Connection {
        /// Database name.
        db: String,
        /// Number of open attempts made.
        attempts: u32,
        /// Last engine error.
        #[source]
        source: StorageError,
    },

    /// A schema migration could not be declared or applied.
    #[error("schema migration of '{db}' failed: {message}")]
    Schema {
        /// Database name.
        db: String,
        /// Description of the failure.
        message: String,
    },

    /// A read or write against an open database failed.
    #[error("data error in '{db}/{store}': {source}")]
    Data {
        /// Database name.
        db: String,
        /// Store name.
        store: String,
        /// Engine error.
        #[source]
        source: StorageError,
    },

    /// The requested store does not exist.
    #[error("store '{store}' not found in database '{db}'")]
    NotFound {
        /// Database name.
        db: String,
        /// Store name.
        store: String,
    },

    /// A batch of a bulk write failed; earlier batches stay committed.
    #[error(
        "bulk write to '{db}/{store}' failed at batch {batch_index} \
         ({rows_committed} rows already committed): {source}"
    )]
    BulkWrite {
        /// Database name.
        db: String,
        /// Store name.
        store: String,
        /// Zero-based index of the failed batch.
        batch_index: usize,
        /// Rows written by the batches before the failure.
        rows_committed: usize,
        /// Engine error.
        #[source]
        source: StorageError,
    },

    /// A record could not be folded into a derived view.
    #[error("transform error: {0}")]
    Transform(String),

    /// JSON encoding or decoding failed.
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// Configuration is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl CoreError {
    /// Maps an engine error raised by a read or write on `db/store`.
    ///
    /// Missing stores become [`CoreError::NotFound`]; closed or unreachable
    /// databases become [`CoreError::Connection`].
    pub fn from_storage(db: &str, store: &str, source: StorageError) -> Self {
        match source {
            StorageError::StoreNotFound { .. } => Self::NotFound {
                db: db.to_string(),
                store: store.to_string(),
            },
            StorageError::NotOpen { .. } | StorageError::Unavailable { .. } => Self::Connection {
                db: db.to_string(),
                attempts: 0,
                source,
            },
            source => Self::Data {
                db: db.to_string(),
                store: store.to_string(),
                source,
            },
        }
    }

    /// Creates a schema error.
    pub fn schema(db: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Schema {
            db: db.into(),
            message: message.into(),
        }
    }

    /// Creates a configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }

    /// Returns true if retrying the operation may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Connection { source, .. }
            | Self::Data { source, .. }
            | Self::BulkWrite { source, .. } => source.is_transient(),
            _ => false,
        }
    }

    /// Returns true if the error means "store absent".
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Message suitable for showing to an end user.
    pub fn user_message(&self) -> String {
        match self {
            Self::NotFound { store, .. } => format!("Table not found: {store}"),
            Self::Connection { db, .. } => format!("Database unavailable: {db}"),
            Self::Schema { db, .. } => format!("Database unavailable: {db} (schema update failed)"),
            Self::BulkWrite {
                batch_index,
                rows_committed,
                ..
            } => format!(
                "Upload failed at batch {} after {rows_committed} rows were saved",
                batch_index + 1
            ),
            Self::Data { store, .. } => format!("Failed to load data from {store}"),
            Self::Transform(message) => format!("Failed to process data: {message}"),
            Self::Codec(_) => "Failed to read stored records".to_string(),
            Self::InvalidConfig(message) => format!("Invalid settings: {message}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_not_found_maps_to_not_found() {
        let err = CoreError::from_storage(
            "rates",
            "lerg",
            StorageError::StoreNotFound {
                db: "rates".into(),
                store: "lerg".into(),
            },
        );
        assert!(err.is_not_found());
        assert_eq!(err.user_message(), "Table not found: lerg");
    }

    #[test]
    fn closed_database_maps_to_connection() {
        let err = CoreError::from_storage("rates", "lerg", StorageError::NotOpen { db: "rates".into() });
        assert!(matches!(err, CoreError::Connection { .. }));
        assert_eq!(err.user_message(), "Database unavailable: rates");
    }

    #[test]
    fn bulk_write_reports_batch() {
        let err = CoreError::BulkWrite {
            db: "rates".into(),
            store: "lerg".into(),
            batch_index: 2,
            rows_committed: 5000,
            source: StorageError::transient("rates", "timeout"),
        };
        assert!(err.is_transient());
        assert!(err.user_message().contains("batch 3"));
        assert!(err.to_string().contains("5000 rows"));
    }
}
