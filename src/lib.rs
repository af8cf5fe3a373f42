//! # bulkload - Conditional Bulk Ingestion for Column Stores
//!
//! bulkload streams schema-flexible records into a column-store table while
//! keeping a synthetic secondary index consistent with the primary data. It
//! provides:
//!
//! - **Typed attribute codec**: six external type tags, schema and dynamic
//!   storage encodings
//! - **Structured statements**: parameterized CQL, never string-spliced values
//! - **Compare-and-swap writes**: optimistic insert, read, compare, correct
//! - **Atomic index maintenance**: index rows move in one conditional batch
//! - **Backpressure**: a bounded FIFO of in-flight record pipelines
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          BulkLoader                             │
//! │            (frames NDJSON, decodes, counts outcomes)            │
//! └─────────────────────────────┬───────────────────────────────────┘
//!                               │ admit / drain
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        AdmissionQueue                           │
//! │                (at most C record pipelines in flight)           │
//! └─────────────────────────────┬───────────────────────────────────┘
//!                               │ spawn
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                  WriteContext::put_item                         │
//! │   PendingInsert → ReadingExisting → ComparingIndex → Corrective │
//! │                                                                 │
//! │  ┌──────────────────┐  ┌──────────────┐  ┌──────────────────┐   │
//! │  │ StatementBuilder │  │    codec     │  │  retry/backoff   │   │
//! │  └──────────────────┘  └──────────────┘  └──────────────────┘   │
//! └─────────────────────────────┬───────────────────────────────────┘
//!                               │ Session::execute
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │            Column store (LocalSession or a driver)              │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Core Invariants
//!
//! 1. **One primary row per item**, at the sentinel index slot
//! 2. **At most one index row per item**, at the slot of its indexed value
//! 3. **Index moves are atomic**: delete-old and insert-new share a batch
//!    guarded by the value seen at read time
//! 4. **Bounded work**: never more than `queue_capacity` pipelines in flight
//! 5. **No abandoned work**: a load resolves only after every admitted
//!    pipeline has resolved
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use bulkload::{BulkLoader, LoaderConfig, LocalSession};
//!
//! let session = Arc::new(LocalSession::open("bulkload.db")?);
//! let loader = BulkLoader::open(session, LoaderConfig::from_env()?).await?;
//! let summary = loader.load(tokio::io::BufReader::new(tokio::io::stdin())).await?;
//! assert!(summary.is_success());
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

/// Error types for every stage of a load.
pub mod error;

/// Attribute values, records, table schemas and index slots.
pub mod types;

/// Conversions between external JSON, typed values and storage values.
pub mod codec;

/// Persisted table layout and DDL rendering.
pub mod schema;

/// Structured statements and the builder for the write pipeline.
pub mod statement;

/// The storage engine boundary.
pub mod session;

/// Embedded SQLite engine with column-store semantics.
pub mod local;

/// Loader configuration and retry policy.
pub mod config;

/// Per-record compare-and-swap state machine.
pub mod pipeline;

/// Bounded queue of in-flight operations.
pub mod admission;

/// Stream-level orchestration and load summaries.
pub mod loader;

// =============================================================================
// Re-exports
// =============================================================================

pub use admission::AdmissionQueue;
pub use config::{LoaderConfig, RetryPolicy};
pub use error::{Error, Result};
pub use loader::{BulkLoader, LoadSummary};
pub use local::LocalSession;
pub use pipeline::{WriteContext, WriteOutcome, WriteReport};
pub use session::{ResultSet, Row, Session};
pub use statement::{CqlValue, Statement, StatementBuilder};

pub use types::{
    AttributeMap, AttributeType, AttributeValue, IndexDefinition, IndexSlot, TableInfo,
    TableSchema,
};
