// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! An in-process stand-in for a durable staging queue.
//!
//! Producers push JSON-encoded [Record]s onto the tail; a
//! [crate::drainer::BatchDrainer] pops them off the head in batches. Once
//! the producer is done it closes the queue, which lets the drainer stop as
//! soon as the queue is empty.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;
use wb_store::{Record, RecordFactory};

use crate::error::StagingError;

/// Yield to the scheduler after this many pushes in [StagingQueue::fill].
const FILL_YIELD_EVERY: u64 = 1024;

#[derive(Debug, Default)]
struct State {
    entries: VecDeque<Vec<u8>>,
    closed: bool,
}

/// A FIFO of encoded records, shared by cloning.
#[derive(Debug, Clone, Default)]
pub struct StagingQueue {
    state: Arc<Mutex<State>>,
}

impl StagingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Encodes `record` and appends it to the tail.
    pub fn push(&self, record: &Record) -> Result<(), StagingError> {
        let entry = serde_json::to_vec(record)?;
        self.push_encoded(entry)
    }

    /// Appends an already encoded entry to the tail. The entry is not
    /// validated.
    pub fn push_encoded(&self, entry: Vec<u8>) -> Result<(), StagingError> {
        let mut state = self.state();
        if state.closed {
            return Err(StagingError::Closed);
        }
        state.entries.push_back(entry);
        Ok(())
    }

    /// Removes and returns up to `max` entries from the head, oldest first.
    pub fn pop_batch(&self, max: usize) -> Vec<Vec<u8>> {
        let mut state = self.state();
        let n = max.min(state.entries.len());
        state.entries.drain(..n).collect()
    }

    pub fn len(&self) -> usize {
        self.state().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Rejects further pushes. Entries already queued stay poppable.
    pub fn close(&self) {
        self.state().closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.state().closed
    }

    /// Drops every queued entry and reopens the queue.
    pub fn clear(&self) {
        let mut state = self.state();
        state.entries.clear();
        state.closed = false;
    }

    /// Pushes `n` records from `factory`, then closes the queue. Returns the
    /// number of records pushed.
    ///
    /// The queue is closed even if pushing fails part-way.
    pub async fn fill<F>(&self, mut factory: F, n: u64) -> Result<u64, StagingError>
    where
        F: RecordFactory,
    {
        let mut pushed = 0;
        let result = async {
            while pushed < n {
                self.push(&factory.next_record())?;
                pushed += 1;
                if pushed % FILL_YIELD_EVERY == 0 {
                    tokio::task::yield_now().await;
                }
            }
            Ok::<_, StagingError>(pushed)
        }
        .await;
        self.close();
        debug!("staged {} records", pushed);
        result
    }
}

/// Decodes an entry produced by [StagingQueue::push].
pub fn decode(entry: &[u8]) -> Result<Record, serde_json::Error> {
    serde_json::from_slice(entry)
}
