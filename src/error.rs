//! # Error Handling for bulkload
//!
//! A single error enum ([`Error`]) covers every failure mode of the ingestion
//! pipeline. The variants follow the scope of the failure, because that scope
//! decides what the loader does next:
//!
//! | Scope | Variants | Loader response |
//! |-------|----------|-----------------|
//! | Record | `Decoding`, `MissingKey` | Skip the record, keep streaming |
//! | Record | `StorageExecution`, `Sqlite`, `Timeout`, `RetriesExhausted` | Fail that record's pipeline only |
//! | Caller | `QueueFull` | Drain one operation, then offer again |
//! | Call | `StreamFraming`, `Io` | Drain in-flight work, abort the load |
//! | Setup | `Schema`, `TableNotFound`, `TableAlreadyExists` | Fix configuration |
//!
//! A rejected conditional statement is deliberately *not* an error. It is a
//! protocol signal read from [`ResultSet::was_applied`](crate::session::ResultSet::was_applied)
//! and drives the compare-and-swap loop in [`pipeline`](crate::pipeline).

use thiserror::Error;

// =============================================================================
// Error Type
// =============================================================================

/// All errors that can occur while loading records.
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Record Errors (skip the record, continue the stream)
    // =========================================================================

    /// An attribute could not be decoded from its external representation.
    ///
    /// Raised for unknown type tags, malformed base64 or decimal text, empty
    /// sets, and values whose tag disagrees with the declared column type.
    #[error("cannot decode attribute '{attribute}': {reason}")]
    Decoding {
        /// The attribute name (empty when the failure is not tied to one)
        attribute: String,
        /// What was wrong with the value
        reason: String,
    },

    /// A record is missing one of the table's key attributes.
    #[error("record is missing key attribute '{attribute}'")]
    MissingKey {
        /// The key attribute that was absent
        attribute: String,
    },

    // =========================================================================
    // Storage Errors (terminate one record's pipeline)
    // =========================================================================

    /// The storage engine failed to execute a statement.
    #[error("storage execution failed: {0}")]
    StorageExecution(String),

    /// SQLite failure inside the local storage engine.
    ///
    /// The `#[from]` attribute lets `?` convert `rusqlite::Error` directly.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A single storage operation did not resolve in time.
    #[error("{operation} timed out after {after_ms}ms")]
    Timeout {
        /// The statement kind that stalled
        operation: &'static str,
        /// The configured timeout
        after_ms: u64,
    },

    /// The compare-and-swap loop kept losing to concurrent writers.
    #[error("conditional write not applied after {attempts} attempts")]
    RetriesExhausted {
        /// Number of conditional statements that were rejected
        attempts: u32,
    },

    // =========================================================================
    // Admission
    // =========================================================================

    /// The admission queue is at capacity; the caller must drain first.
    #[error("admission queue full: {capacity} operations in flight")]
    QueueFull {
        /// The configured capacity
        capacity: usize,
    },

    /// A pipeline task panicked or was cancelled before resolving.
    #[error("pipeline task failed: {0}")]
    TaskFailed(String),

    // =========================================================================
    // Stream Errors (abort the whole load)
    // =========================================================================

    /// An input chunk could not be framed as a JSON object.
    #[error("malformed input at line {line}: {reason}")]
    StreamFraming {
        /// 1-based line number of the offending chunk
        line: usize,
        /// Why the chunk was rejected
        reason: String,
    },

    /// Reading the input stream failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    // =========================================================================
    // Setup Errors
    // =========================================================================

    /// Invalid table schema, configuration, or catalog contents.
    #[error("schema error: {0}")]
    Schema(String),

    /// The requested table is not registered in the catalog.
    #[error("table '{tenant}.{table}' does not exist")]
    TableNotFound {
        /// Owning tenant
        tenant: String,
        /// Table name
        table: String,
    },

    /// Provisioning found the table already registered.
    #[error("table '{tenant}.{table}' already exists")]
    TableAlreadyExists {
        /// Owning tenant
        tenant: String,
        /// Table name
        table: String,
    },

    /// JSON (de)serialization failed outside of record decoding.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Shorthand for a [`Error::Decoding`] error.
    pub fn decoding(attribute: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Decoding {
            attribute: attribute.into(),
            reason: reason.into(),
        }
    }

    /// True for errors that fail a single record without aborting the stream.
    pub fn is_record_scoped(&self) -> bool {
        matches!(
            self,
            Error::Decoding { .. }
                | Error::MissingKey { .. }
                | Error::StorageExecution(_)
                | Error::Sqlite(_)
                | Error::Timeout { .. }
                | Error::RetriesExhausted { .. }
                | Error::TaskFailed(_)
        )
    }

    /// True for errors raised before any statement reached the storage engine.
    pub fn is_decode_failure(&self) -> bool {
        matches!(self, Error::Decoding { .. } | Error::MissingKey { .. })
    }
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// A `Result` type alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Tests
// =============================================================================
