// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! In-memory implementations for testing and benchmarking.

use std::collections::BTreeMap;
use std::num::NonZeroU64;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;
use wb_ore::cast::CastFrom;

use crate::error::WriteError;
use crate::location::{Ack, WriteFuture, Writer};
use crate::record::Record;

/// Which submissions a [MemWriter] should fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Every submission succeeds.
    #[default]
    Never,
    /// Submissions whose zero-based index is a multiple of `n` fail with a
    /// [WriteError::Transport], i.e. the 1st, the `n+1`th, the `2n+1`th...
    EveryNth(NonZeroU64),
}

impl FailurePolicy {
    /// Returns a policy failing every `n`th submission, or
    /// [FailurePolicy::Never] if `n` is zero.
    pub fn every_nth(n: u64) -> Self {
        NonZeroU64::new(n).map_or(FailurePolicy::Never, FailurePolicy::EveryNth)
    }

    fn fails(&self, index: u64) -> bool {
        match self {
            FailurePolicy::Never => false,
            FailurePolicy::EveryNth(n) => index % n.get() == 0,
        }
    }
}

/// Configuration of a [MemWriter].
#[derive(Debug, Clone, Default)]
pub struct MemWriterConfig {
    /// How long each submission takes to be acknowledged.
    pub latency: Duration,
    /// Which single-record submissions fail.
    pub write_failures: FailurePolicy,
    /// Which batch submissions fail.
    pub batch_failures: FailurePolicy,
}

#[derive(Debug, Default)]
struct MemCore {
    schema_created: bool,
    rows: BTreeMap<Uuid, Record>,
    committed_batches: Vec<usize>,
    duplicates: u64,
}

impl MemCore {
    fn ensure_schema(&self) -> Result<(), WriteError> {
        if !self.schema_created {
            return Err(WriteError::Backend(
                "relation \"messages\" does not exist".into(),
            ));
        }
        Ok(())
    }

    // Upsert by primary key, like a CQL INSERT.
    fn insert(&mut self, record: Record) {
        if self.rows.insert(record.id, record).is_some() {
            self.duplicates += 1;
        }
    }
}

/// An in-memory implementation of [Writer].
///
/// Rows are keyed by their primary key, so replaying the same records is
/// idempotent. Latency and failures can be injected through
/// [MemWriterConfig]. Cloning a `MemWriter` yields a handle to the same
/// store.
#[derive(Debug, Clone)]
pub struct MemWriter {
    cfg: MemWriterConfig,
    core: Arc<Mutex<MemCore>>,
    writes_submitted: Arc<AtomicU64>,
    batches_submitted: Arc<AtomicU64>,
    active: Arc<AtomicUsize>,
    peak_active: Arc<AtomicUsize>,
}

impl MemWriter {
    /// Constructs a new, empty MemWriter.
    pub fn new(cfg: MemWriterConfig) -> Self {
        MemWriter {
            cfg,
            core: Arc::new(Mutex::new(MemCore::default())),
            writes_submitted: Arc::new(AtomicU64::new(0)),
            batches_submitted: Arc::new(AtomicU64::new(0)),
            active: Arc::new(AtomicUsize::new(0)),
            peak_active: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn core(&self) -> MutexGuard<'_, MemCore> {
        // Nothing in MemCore can be left half-updated by a panic.
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The number of distinct rows currently stored.
    pub fn row_count(&self) -> usize {
        self.core().rows.len()
    }

    /// Whether a row with the given primary key is stored.
    pub fn contains(&self, id: &Uuid) -> bool {
        self.core().rows.contains_key(id)
    }

    /// How many writes replaced an existing row.
    pub fn duplicates(&self) -> u64 {
        self.core().duplicates
    }

    /// The sizes of all successfully committed batches, in commit order.
    pub fn committed_batches(&self) -> Vec<usize> {
        self.core().committed_batches.clone()
    }

    /// The number of single-record submissions received so far.
    pub fn writes_submitted(&self) -> u64 {
        self.writes_submitted.load(Ordering::SeqCst)
    }

    /// The number of batch submissions received so far.
    pub fn batches_submitted(&self) -> u64 {
        self.batches_submitted.load(Ordering::SeqCst)
    }

    /// The highest number of submissions that were being processed at once.
    pub fn peak_active(&self) -> usize {
        self.peak_active.load(Ordering::SeqCst)
    }

    fn track_active(&self) -> ActiveGuard {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_active.fetch_max(now, Ordering::SeqCst);
        ActiveGuard {
            active: Arc::clone(&self.active),
        }
    }
}

struct ActiveGuard {
    active: Arc<AtomicUsize>,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Writer for MemWriter {
    fn name(&self) -> &'static str {
        "mem"
    }

    async fn ensure_schema(&self) -> Result<(), WriteError> {
        self.core().schema_created = true;
        Ok(())
    }

    async fn truncate(&self) -> Result<(), WriteError> {
        let mut core = self.core();
        core.ensure_schema()?;
        core.rows.clear();
        core.committed_batches.clear();
        core.duplicates = 0;
        Ok(())
    }

    fn submit(&self, record: Record) -> WriteFuture {
        let index = self.writes_submitted.fetch_add(1, Ordering::SeqCst);
        let fail = self.cfg.write_failures.fails(index);
        let this = self.clone();
        Box::pin(async move {
            let _active = this.track_active();
            if !this.cfg.latency.is_zero() {
                tokio::time::sleep(this.cfg.latency).await;
            }
            if fail {
                return Err(WriteError::Transport(format!(
                    "injected failure for write {}",
                    index
                )));
            }
            let mut core = this.core();
            core.ensure_schema()?;
            core.insert(record);
            Ok(Ack { rows: 1 })
        })
    }

    fn submit_batch(&self, records: Vec<Record>, tx: bool) -> WriteFuture {
        let index = self.batches_submitted.fetch_add(1, Ordering::SeqCst);
        let fail = self.cfg.batch_failures.fails(index);
        let this = self.clone();
        Box::pin(async move {
            let _active = this.track_active();
            if !this.cfg.latency.is_zero() {
                tokio::time::sleep(this.cfg.latency).await;
            }
            let mut core = this.core();
            core.ensure_schema()?;
            if fail {
                return Err(WriteError::Transport(format!(
                    "injected failure for batch {}",
                    index
                )));
            }
            // Without a transaction, an unlogged batch can land partially.
            // We model the common case where it lands completely, so the
            // only observable difference is the commit bookkeeping.
            let rows = records.len();
            for record in records {
                core.insert(record);
            }
            if tx {
                core.committed_batches.push(rows);
            }
            Ok(Ack {
                rows: u64::cast_from(rows),
            })
        })
    }
}
