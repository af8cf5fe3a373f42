//! # Bulk Loader
//!
//! Drives a stream of external records through the write pipeline.
//!
//! ```text
//!  NDJSON lines ──► frame ──► decode ──► AdmissionQueue ──► put_item (spawned)
//!                    │          │              │
//!                    │          │              └─ full: drain oldest first
//!                    │          └─ bad record: count it, keep going
//!                    └─ bad chunk: drain everything, abort the call
//! ```
//!
//! A single producer reads records in order; the pipelines of many records
//! overlap on the storage engine. Nothing is reported per record. The call
//! resolves once, after every admitted pipeline has resolved, with a
//! [`LoadSummary`].

use std::pin::pin;
use std::sync::Arc;
use std::time::Instant;

use futures::{Stream, StreamExt};
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{info, warn};

use crate::admission::AdmissionQueue;
use crate::codec::{check_declared_types, decode_record};
use crate::config::LoaderConfig;
use crate::error::{Error, Result};
use crate::pipeline::{WriteContext, WriteOutcome, WriteReport};
use crate::session::Session;
use crate::types::{AttributeMap, TableInfo, TableSchema};

// =============================================================================
// Summary
// =============================================================================

/// Aggregate outcome of one load.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoadSummary {
    /// Records read from the stream.
    pub received: u64,
    pub succeeded: u64,
    pub failed: u64,
    /// Failed before reaching storage: bad tags or values, missing keys.
    pub decode_failures: u64,
    /// Failed in storage: engine errors, timeouts, exhausted retries.
    pub storage_failures: u64,
    pub inserted: u64,
    pub updated: u64,
    pub reindexed: u64,
    /// Lost conditional-write races across all records.
    pub retries: u64,
}

impl LoadSummary {
    /// True when every received record was written.
    pub fn is_success(&self) -> bool {
        self.failed == 0 && self.succeeded == self.received
    }

    fn record(&mut self, result: Result<WriteReport>) {
        match result {
            Ok(report) => {
                self.succeeded += 1;
                self.retries += u64::from(report.retries);
                match report.outcome {
                    WriteOutcome::Inserted => self.inserted += 1,
                    WriteOutcome::Updated => self.updated += 1,
                    WriteOutcome::Reindexed => self.reindexed += 1,
                }
            }
            Err(e) => {
                self.failed += 1;
                if e.is_decode_failure() {
                    self.decode_failures += 1;
                } else {
                    self.storage_failures += 1;
                }
                warn!(error = %e, "record failed");
            }
        }
    }
}

// =============================================================================
// Loader
// =============================================================================

/// Streams records into one table.
pub struct BulkLoader<S: ?Sized> {
    context: WriteContext<S>,
    config: LoaderConfig,
}

impl<S: Session + ?Sized> BulkLoader<S> {
    /// Creates a loader for an already described table.
    pub fn new(session: Arc<S>, table: TableInfo, config: LoaderConfig) -> Self {
        let context = WriteContext::new(session, Arc::new(table), config.retry.clone());
        Self { context, config }
    }

    /// Looks up `config.tenant`/`config.table` and creates a loader for it.
    pub async fn open(session: Arc<S>, config: LoaderConfig) -> Result<Self> {
        config.validate()?;
        let table = session.describe_table(&config.tenant, &config.table).await?;
        info!(
            tenant = %table.tenant,
            table = %table.name,
            indexed = table.schema.index().is_some(),
            "loaded table schema"
        );
        Ok(Self::new(session, table, config))
    }

    pub fn table(&self) -> &TableInfo {
        self.context.table()
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// Loads newline-delimited JSON records. Blank lines are skipped.
    ///
    /// # Errors
    ///
    /// [`Error::StreamFraming`] for a line that is not a JSON object, or
    /// [`Error::Io`] if reading fails. In both cases every admitted record is
    /// drained before the error is returned.
    pub async fn load<R>(&self, reader: R) -> Result<LoadSummary>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut run = self.start();
        let mut lines = reader.lines();
        let mut line_no = 0;

        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => return run.abort(e.into()).await,
            };
            line_no += 1;

            if line.trim().is_empty() {
                continue;
            }

            let value = match serde_json::from_str::<Value>(&line) {
                Ok(value) => value,
                Err(e) => {
                    let framing = Error::StreamFraming {
                        line: line_no,
                        reason: e.to_string(),
                    };
                    return run.abort(framing).await;
                }
            };

            if let Err(e) = run.admit(value, line_no).await {
                return run.abort(e).await;
            }
        }

        Ok(run.finish().await)
    }

    /// Loads already parsed records.
    pub async fn load_values<I>(&self, records: I) -> Result<LoadSummary>
    where
        I: IntoIterator<Item = Value>,
    {
        self.load_stream(futures::stream::iter(records.into_iter().map(Ok)))
            .await
    }

    /// Loads records from a stream.
    ///
    /// An `Err` item that concerns one record only (see
    /// [`Error::is_record_scoped`]) is counted as a failed record. Any other
    /// `Err` item aborts the load like a framing error.
    pub async fn load_stream<St>(&self, stream: St) -> Result<LoadSummary>
    where
        St: Stream<Item = Result<Value>>,
    {
        let mut stream = pin!(stream);
        let mut run = self.start();
        let mut position = 0;

        while let Some(next) = stream.next().await {
            position += 1;
            let admitted = match next {
                Ok(value) => run.admit(value, position).await,
                Err(e) if e.is_record_scoped() => {
                    run.reject(e);
                    Ok(())
                }
                Err(e) => Err(e),
            };
            if let Err(e) = admitted {
                return run.abort(e).await;
            }
        }

        Ok(run.finish().await)
    }

    fn start(&self) -> Run<'_, S> {
        Run {
            loader: self,
            queue: AdmissionQueue::new(self.config.queue_capacity),
            summary: LoadSummary::default(),
            started: Instant::now(),
        }
    }
}

// =============================================================================
// One Load
// =============================================================================

struct Run<'l, S: ?Sized> {
    loader: &'l BulkLoader<S>,
    queue: AdmissionQueue<WriteReport>,
    summary: LoadSummary,
    started: Instant,
}

impl<S: Session + ?Sized> Run<'_, S> {
    /// Decodes and admits one record. Only framing problems are returned;
    /// record failures are counted.
    async fn admit(&mut self, value: Value, position: usize) -> Result<()> {
        let record = match value {
            Value::Object(record) => record,
            other => {
                return Err(Error::StreamFraming {
                    line: position,
                    reason: format!("expected a JSON object, found {}", json_kind(&other)),
                })
            }
        };

        self.summary.received += 1;

        match decode_item(&record, &self.loader.table().schema) {
            Ok(item) => {
                let context = self.loader.context.clone();
                let operation = async move { context.put_item(&item).await };
                if let Some(drained) = self.queue.admit(operation).await {
                    self.summary.record(drained);
                }
            }
            Err(e) => self.summary.record(Err(e)),
        }

        let interval = self.loader.config.progress_interval;
        if interval > 0 && self.summary.received % interval == 0 {
            info!(
                received = self.summary.received,
                succeeded = self.summary.succeeded,
                failed = self.summary.failed,
                in_flight = self.queue.len(),
                "progress"
            );
        }
        Ok(())
    }

    /// Counts a record that failed before it could be admitted.
    fn reject(&mut self, error: Error) {
        self.summary.received += 1;
        self.summary.record(Err(error));
    }

    async fn drain(&mut self) {
        for result in self.queue.drain_all().await {
            self.summary.record(result);
        }
    }

    async fn finish(mut self) -> LoadSummary {
        self.drain().await;
        info!(
            received = self.summary.received,
            succeeded = self.summary.succeeded,
            failed = self.summary.failed,
            inserted = self.summary.inserted,
            updated = self.summary.updated,
            reindexed = self.summary.reindexed,
            retries = self.summary.retries,
            elapsed_ms = self.started.elapsed().as_millis() as u64,
            "load complete"
        );
        self.summary
    }

    async fn abort(mut self, error: Error) -> Result<LoadSummary> {
        self.drain().await;
        warn!(
            error = %error,
            received = self.summary.received,
            succeeded = self.summary.succeeded,
            failed = self.summary.failed,
            "load aborted"
        );
        Err(error)
    }
}

/// Decodes a record and checks it against the table schema.
pub fn decode_item(record: &Map<String, Value>, schema: &TableSchema) -> Result<AttributeMap> {
    let item = decode_record(record)?;
    check_declared_types(&item, schema)?;
    if let Some(missing) = schema.key_attributes().iter().find(|key| !item.contains(key)) {
        return Err(Error::MissingKey {
            attribute: missing.clone(),
        });
    }
    Ok(item)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
