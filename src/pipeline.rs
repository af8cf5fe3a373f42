//! # Conditional Write Pipeline
//!
//! Writes one record with compare-and-swap semantics while keeping its index
//! row consistent with its primary row.
//!
//! ## State Machine
//!
//! ```text
//!                 ┌──────────────────────── row vanished (retry) ───────────────┐
//!                 ▼                                                             │
//!         ┌───────────────┐  applied   ┌──────────┐                             │
//!  ──────►│ PendingInsert │ ─────────► │ Inserted │                             │
//!         └───────────────┘            └──────────┘                             │
//!                 │ rejected                                                    │
//!                 ▼                                                             │
//!         ┌─────────────────┐  row ┌────────────────┐                           │
//!   ┌───► │ ReadingExisting │ ───► │ ComparingIndex │                           │
//!   │     └─────────────────┘      └────────────────┘                           │
//!   │             │ no row                 │ same slot: corrective update       │
//!   │             └────────────────────────┼────────────────────────────────────┘
//!   │                                      │ moved slot: corrective batch
//!   │                                      ▼
//!   │     rejected (retry)     ┌───────────────────┐  applied  ┌────────────────────┐
//!   └───────────────────────── │ PendingCorrective │ ────────► │ Updated/Reindexed  │
//!                              └───────────────────┘           └────────────────────┘
//! ```
//!
//! Slots are compared by value: a number indexed as `1` that comes back as
//! `1.0` stays on its index row and takes the update path.
//!
//! Exactly one statement is in flight per record, and each transition waits
//! for the previous statement to resolve. No locks are taken here: the
//! storage engine's conditional statements decide every race.
//!
//! ## Bounds
//!
//! - Each statement is awaited under [`RetryPolicy::op_timeout`].
//! - Every lost race (rejected corrective write, or a row that disappeared
//!   between insert and read) counts as a retry. Retries sleep with jittered
//!   exponential backoff and stop after [`RetryPolicy::max_retries`].
//! - Any storage error ends this record's pipeline only.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use crate::codec::from_schema_value;
use crate::config::RetryPolicy;
use crate::error::{Error, Result};
use crate::schema::attribute_column;
use crate::session::{ResultSet, Row, Session};
use crate::statement::{CqlValue, Statement, StatementBuilder};
use crate::types::{AttributeMap, AttributeValue, TableInfo};

// =============================================================================
// Outcomes
// =============================================================================

/// How a record ended up in the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The optimistic insert created the item.
    Inserted,
    /// The item existed; its data was rewritten at the same index position.
    Updated,
    /// The item existed; its index row moved, appeared, or disappeared.
    Reindexed,
}

/// Result of one record's pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteReport {
    pub outcome: WriteOutcome,
    /// Lost races before the final statement was applied.
    pub retries: u32,
}

enum State {
    PendingInsert,
    ReadingExisting,
    ComparingIndex(Row),
    PendingCorrective {
        statement: Statement,
        outcome: WriteOutcome,
    },
}

// =============================================================================
// Write Context
// =============================================================================

/// Everything a pipeline needs, passed explicitly to every call.
pub struct WriteContext<S: ?Sized> {
    session: Arc<S>,
    table: Arc<TableInfo>,
    retry: RetryPolicy,
}

impl<S: ?Sized> Clone for WriteContext<S> {
    fn clone(&self) -> Self {
        Self {
            session: Arc::clone(&self.session),
            table: Arc::clone(&self.table),
            retry: self.retry.clone(),
        }
    }
}

impl<S: Session + ?Sized> WriteContext<S> {
    pub fn new(session: Arc<S>, table: Arc<TableInfo>, retry: RetryPolicy) -> Self {
        Self {
            session,
            table,
            retry,
        }
    }

    pub fn table(&self) -> &TableInfo {
        &self.table
    }

    /// Runs one record through the state machine until a statement applies.
    ///
    /// # Errors
    ///
    /// - [`Error::MissingKey`] / [`Error::Decoding`] if no statement can be
    ///   built for the record.
    /// - [`Error::Timeout`] if a statement does not resolve in time.
    /// - [`Error::RetriesExhausted`] if concurrent writers keep winning.
    /// - Any error the session returns.
    pub async fn put_item(&self, item: &AttributeMap) -> Result<WriteReport> {
        let builder = StatementBuilder::new(&self.table);
        let mut retries = 0;
        let mut state = State::PendingInsert;

        loop {
            state = match state {
                State::PendingInsert => {
                    let statement = builder.optimistic_insert(item)?;
                    if self.execute(&statement).await?.was_applied() {
                        return Ok(WriteReport {
                            outcome: WriteOutcome::Inserted,
                            retries,
                        });
                    }
                    State::ReadingExisting
                }

                State::ReadingExisting => {
                    let statement = builder.read_existing(item)?;
                    match self.execute(&statement).await?.rows.into_iter().next() {
                        Some(row) => State::ComparingIndex(row),
                        None => {
                            retries = self.back_off(retries).await?;
                            State::PendingInsert
                        }
                    }
                }

                State::ComparingIndex(row) => {
                    let seen = self.stored_index_value(&row)?;

                    if builder.slot_of(seen.as_ref())? == builder.index_slot(item)? {
                        State::PendingCorrective {
                            statement: builder.corrective_update(item, seen.as_ref())?,
                            outcome: WriteOutcome::Updated,
                        }
                    } else {
                        State::PendingCorrective {
                            statement: builder.corrective_batch(item, seen.as_ref())?,
                            outcome: WriteOutcome::Reindexed,
                        }
                    }
                }

                State::PendingCorrective { statement, outcome } => {
                    if self.execute(&statement).await?.was_applied() {
                        return Ok(WriteReport { outcome, retries });
                    }
                    retries = self.back_off(retries).await?;
                    State::ReadingExisting
                }
            };
        }
    }

    async fn execute(&self, statement: &Statement) -> Result<ResultSet> {
        debug!(
            statement = statement.kind(),
            table = %self.table.name,
            cql = %statement.to_literal_cql(),
            "executing"
        );

        match tokio::time::timeout(self.retry.op_timeout, self.session.execute(statement)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout {
                operation: statement.kind(),
                after_ms: self.retry.op_timeout.as_millis() as u64,
            }),
        }
    }

    /// Sleeps before the next retry, or fails once the budget is spent.
    async fn back_off(&self, retries: u32) -> Result<u32> {
        let next = retries + 1;
        if next > self.retry.max_retries {
            warn!(
                table = %self.table.name,
                attempts = next,
                "giving up on contended record"
            );
            return Err(Error::RetriesExhausted { attempts: next });
        }

        let delay = jittered(self.retry.backoff(next));
        debug!(retry = next, delay_us = delay.as_micros() as u64, "conditional write lost a race");
        tokio::time::sleep(delay).await;
        Ok(next)
    }

    /// The indexed attribute as stored in the primary row.
    fn stored_index_value(&self, row: &Row) -> Result<Option<AttributeValue>> {
        let Some(index) = self.table.schema.index() else {
            return Ok(None);
        };
        let ty = self
            .table
            .schema
            .attribute_type(&index.attribute)
            .ok_or_else(|| Error::Schema(format!("indexed attribute '{}' is not declared", index.attribute)))?;
        let stored = row
            .get(&attribute_column(&index.attribute))
            .unwrap_or(&CqlValue::Null);
        from_schema_value(&index.attribute, ty, stored)
    }
}

/// Equal jitter: half the delay fixed, half random.
fn jittered(delay: Duration) -> Duration {
    let half = (delay.as_micros() / 2) as u64;
    Duration::from_micros(half + rand::thread_rng().gen_range(0..=half))
}
