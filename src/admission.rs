//! # Admission Queue
//!
//! Bounds how many record pipelines are in flight at once. The producer must
//! drain the oldest outstanding operation before admitting a new one when the
//! queue is full, which throttles ingestion to the storage engine's pace.
//!
//! ```text
//!  offer ──► [ op7 | op6 | op5 | op4 ] ──► drain_one (oldest first)
//!             └──────── capacity ──────┘
//! ```
//!
//! Draining is FIFO and ignores keys: the queue only limits concurrency.
//! Correctness between writers to the same key comes from the conditional
//! statements in [`pipeline`](crate::pipeline).

use std::collections::VecDeque;
use std::future::Future;

use tokio::task::JoinHandle;

use crate::error::{Error, Result};

/// FIFO of spawned operations with a fixed capacity.
pub struct AdmissionQueue<T> {
    capacity: usize,
    in_flight: VecDeque<JoinHandle<Result<T>>>,
}

impl<T: Send + 'static> AdmissionQueue<T> {
    /// Creates a queue admitting up to `capacity` operations (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            in_flight: VecDeque::with_capacity(capacity),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Operations admitted and not yet drained.
    pub fn len(&self) -> usize {
        self.in_flight.len()
    }

    pub fn is_empty(&self) -> bool {
        self.in_flight.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.in_flight.len() >= self.capacity
    }

    /// Spawns `operation` if there is room.
    ///
    /// # Errors
    ///
    /// [`Error::QueueFull`] when at capacity. The operation is dropped without
    /// ever being polled.
    pub fn offer<F>(&mut self, operation: F) -> Result<()>
    where
        F: Future<Output = Result<T>> + Send + 'static,
    {
        if self.is_full() {
            return Err(Error::QueueFull {
                capacity: self.capacity,
            });
        }
        self.in_flight.push_back(tokio::spawn(operation));
        Ok(())
    }

    /// Admits `operation`, first draining the oldest operation if the queue is
    /// full. Returns the drained result, if any.
    pub async fn admit<F>(&mut self, operation: F) -> Option<Result<T>>
    where
        F: Future<Output = Result<T>> + Send + 'static,
    {
        let drained = if self.is_full() {
            self.drain_one().await
        } else {
            None
        };
        self.in_flight.push_back(tokio::spawn(operation));
        drained
    }

    /// Waits for the oldest operation. `None` when nothing is in flight.
    ///
    /// A panicked or cancelled operation resolves to [`Error::TaskFailed`].
    pub async fn drain_one(&mut self) -> Option<Result<T>> {
        let handle = self.in_flight.pop_front()?;
        Some(match handle.await {
            Ok(result) => result,
            Err(e) => Err(Error::TaskFailed(e.to_string())),
        })
    }

    /// Waits for every outstanding operation, oldest first.
    pub async fn drain_all(&mut self) -> Vec<Result<T>> {
        let mut results = Vec::with_capacity(self.in_flight.len());
        while let Some(result) = self.drain_one().await {
            results.push(result);
        }
        results
    }
}
