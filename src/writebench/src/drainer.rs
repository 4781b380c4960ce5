// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Drains the staging queue into the store in batches.
//!
//! This is the optimized relational write path: instead of one round trip
//! per record, the drainer pops up to `batch_size` entries at a time and
//! writes them with a single multi-row insert, optionally inside a
//! transaction. Latency is observed per batch, in
//! `<namespace>_db_write_latency_seconds`.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use wb_ore::cast::{CastFrom, CastLossy};
use wb_store::{Ack, Record, RecordFactory, WriteError, Writer};

use crate::error::{BatchError, StagingError};
use crate::metrics::DrainerMetrics;
use crate::reporter::{millis, throughput, ProgressReporter, Thousands};
use crate::staging::{self, StagingQueue};

pub const DEFAULT_BATCH_SIZE: usize = 100;

/// How long to wait before polling an empty queue again.
pub const DEFAULT_IDLE_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct DrainerConfig {
    /// Maximum number of records per batch.
    pub batch_size: usize,
    pub idle_interval: Duration,
    /// Pause after every batch, to throttle the drainer.
    pub batch_pause: Duration,
    /// Whether each batch is all-or-nothing.
    pub transactional: bool,
    /// Log progress every this many written messages.
    pub progress_every: u64,
    /// The number of messages the run is expected to write, for progress
    /// lines only.
    pub expected_total: u64,
}

impl Default for DrainerConfig {
    fn default() -> Self {
        DrainerConfig {
            batch_size: DEFAULT_BATCH_SIZE,
            idle_interval: DEFAULT_IDLE_INTERVAL,
            batch_pause: Duration::ZERO,
            transactional: true,
            progress_every: crate::pump::DEFAULT_PROGRESS_EVERY,
            expected_total: 0,
        }
    }
}

/// What a [BatchDrainer::run] did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DrainSummary {
    pub batches: u64,
    pub messages: u64,
    pub failed_batches: u64,
    pub failed_messages: u64,
    pub decode_errors: u64,
    pub elapsed: Duration,
    pub avg_batch_latency: Duration,
}

impl DrainSummary {
    /// Messages written per second.
    pub fn throughput(&self) -> f64 {
        throughput(self.messages, self.elapsed)
    }
}

impl fmt::Display for DrainSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Total time: {} ms", self.elapsed.as_millis())?;
        writeln!(
            f,
            "Messages: {} written in {} batches",
            Thousands(self.messages),
            Thousands(self.batches),
        )?;
        writeln!(
            f,
            "Failures: {} batches ({} messages), {} undecodable entries",
            Thousands(self.failed_batches),
            Thousands(self.failed_messages),
            Thousands(self.decode_errors),
        )?;
        writeln!(f, "Throughput: {:.2} msg/s", self.throughput())?;
        write!(
            f,
            "Average batch latency: {:.3} ms",
            millis(self.avg_batch_latency)
        )
    }
}

#[derive(Debug)]
pub struct BatchDrainer {
    writer: Arc<dyn Writer>,
    queue: StagingQueue,
    metrics: DrainerMetrics,
    config: DrainerConfig,
}

impl BatchDrainer {
    pub fn new(
        writer: Arc<dyn Writer>,
        queue: StagingQueue,
        metrics: DrainerMetrics,
        config: DrainerConfig,
    ) -> Self {
        BatchDrainer {
            writer,
            queue,
            metrics,
            config,
        }
    }

    pub fn metrics(&self) -> &DrainerMetrics {
        &self.metrics
    }

    /// Drains batches until the queue is closed and empty, or until
    /// `shutdown` is cancelled.
    ///
    /// A batch the store rejects is logged and dropped, not re-queued.
    pub async fn run(&self, shutdown: CancellationToken) -> DrainSummary {
        let start = Instant::now();
        let reporter = ProgressReporter::new(
            self.config.expected_total,
            self.config.progress_every,
            start,
            self.metrics.db_write_latency_seconds.clone(),
        );
        let batch_size = self.config.batch_size.max(1);
        let mut summary = DrainSummary::default();
        let mut batch_time = Duration::ZERO;

        loop {
            if shutdown.is_cancelled() {
                info!(
                    "drainer shutting down with {} entries still staged",
                    self.queue.len()
                );
                break;
            }
            // Read before popping: a queue observed closed can't grow, so an
            // empty pop after that means there is nothing left.
            let closed = self.queue.is_closed();
            let entries = self.queue.pop_batch(batch_size);
            self.metrics.set_staged(self.queue.len());
            if entries.is_empty() {
                if closed {
                    break;
                }
                pause(self.config.idle_interval, &shutdown).await;
                continue;
            }

            let records = self.decode_all(entries, &mut summary);
            if records.is_empty() {
                continue;
            }
            let n = u64::cast_from(records.len());
            let started = Instant::now();
            match self.write_batch(records).await {
                Ok(_) => {
                    let before = summary.messages;
                    summary.batches += 1;
                    summary.messages += n;
                    reporter.on_advance(before, summary.messages);
                }
                Err(e) => {
                    summary.failed_batches += 1;
                    summary.failed_messages += n;
                    warn!("dropping batch: {}", e);
                }
            }
            batch_time += started.elapsed();

            if !self.config.batch_pause.is_zero() {
                pause(self.config.batch_pause, &shutdown).await;
            }
        }

        summary.elapsed = start.elapsed();
        let attempted = summary.batches + summary.failed_batches;
        if attempted > 0 {
            summary.avg_batch_latency =
                Duration::from_secs_f64(batch_time.as_secs_f64() / f64::cast_lossy(attempted));
        }
        summary
    }

    /// Writes one batch and records its metrics.
    ///
    /// A writer that panics fails the batch with a [WriteError::Backend].
    pub async fn write_batch(&self, records: Vec<Record>) -> Result<Ack, BatchError> {
        let n = records.len();
        let timer = self.metrics.db_write_latency_seconds.start_timer();
        let panicked = || -> Result<Ack, WriteError> {
            Err(WriteError::Backend(format!(
                "{} writer panicked on a batch of {} records",
                self.writer.name(),
                n
            )))
        };
        let tx = self.config.transactional;
        let outcome = match panic::catch_unwind(AssertUnwindSafe(|| {
            self.writer.submit_batch(records, tx)
        })) {
            Ok(write) => AssertUnwindSafe(write)
                .catch_unwind()
                .await
                .unwrap_or_else(|_| panicked()),
            Err(_) => panicked(),
        };
        match outcome {
            Ok(ack) => {
                timer.observe_duration();
                self.metrics.record_messages(n);
                debug!("wrote batch of {} records to {}", n, self.writer.name());
                Ok(ack)
            }
            Err(source) => {
                timer.stop_and_discard();
                self.metrics.batch_errors_total.inc();
                Err(BatchError { records: n, source })
            }
        }
    }

    fn decode_all(&self, entries: Vec<Vec<u8>>, summary: &mut DrainSummary) -> Vec<Record> {
        let mut records = Vec::with_capacity(entries.len());
        for entry in entries {
            match staging::decode(&entry) {
                Ok(record) => records.push(record),
                Err(e) => {
                    summary.decode_errors += 1;
                    self.metrics.decode_errors_total.inc();
                    warn!("dropping undecodable staged entry: {}", e);
                }
            }
        }
        records
    }
}

async fn pause(duration: Duration, shutdown: &CancellationToken) {
    tokio::select! {
        _ = tokio::time::sleep(duration) => {}
        _ = shutdown.cancelled() => {}
    }
}

/// Stages `total` records from `factory` while `drainer` drains them, and
/// returns once both are done.
pub async fn run_staged<F>(
    queue: &StagingQueue,
    drainer: &BatchDrainer,
    factory: F,
    total: u64,
    shutdown: CancellationToken,
) -> (Result<u64, StagingError>, DrainSummary)
where
    F: RecordFactory,
{
    futures::join!(queue.fill(factory, total), drainer.run(shutdown))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;
    use wb_ore::metrics::MetricsRegistry;
    use wb_ore::now::now_zero;
    use wb_store::mem::{FailurePolicy, MemWriter, MemWriterConfig};
    use wb_store::{PayloadFactory, WriteFuture};

    use super::*;

    async fn setup(
        mem: MemWriterConfig,
        config: DrainerConfig,
    ) -> (MemWriter, StagingQueue, BatchDrainer) {
        let writer = MemWriter::new(mem);
        writer.ensure_schema().await.unwrap();
        let queue = StagingQueue::new();
        let registry = MetricsRegistry::new();
        let drainer = BatchDrainer::new(
            Arc::new(writer.clone()),
            queue.clone(),
            DrainerMetrics::register_into(&registry, "test"),
            config,
        );
        (writer, queue, drainer)
    }

    #[tokio::test]
    async fn drains_in_batches_until_closed() {
        let (writer, queue, drainer) = setup(
            MemWriterConfig::default(),
            DrainerConfig {
                batch_size: 1000,
                ..Default::default()
            },
        )
        .await;
        queue
            .fill(PayloadFactory::new("p", now_zero()), 2500)
            .await
            .unwrap();

        let summary = drainer.run(CancellationToken::new()).await;
        assert_eq!(summary.messages, 2500);
        assert_eq!(summary.batches, 3);
        assert_eq!(writer.committed_batches(), vec![1000, 1000, 500]);
        assert_eq!(writer.row_count(), 2500);
        assert_eq!(drainer.metrics().messages_total(), 2500);
        assert_eq!(drainer.metrics().db_write_latency().get_sample_count(), 3);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn failed_batch_writes_nothing() {
        let (writer, queue, drainer) = setup(
            MemWriterConfig {
                batch_failures: FailurePolicy::every_nth(2),
                ..Default::default()
            },
            DrainerConfig {
                batch_size: 10,
                ..Default::default()
            },
        )
        .await;
        queue
            .fill(PayloadFactory::new("p", now_zero()), 40)
            .await
            .unwrap();

        let summary = drainer.run(CancellationToken::new()).await;
        // Batches 0 and 2 fail.
        assert_eq!(summary.failed_batches, 2);
        assert_eq!(summary.failed_messages, 20);
        assert_eq!(summary.messages, 20);
        assert_eq!(writer.row_count(), 20);
        assert_eq!(drainer.metrics().batch_errors_total(), 2);
        assert_eq!(drainer.metrics().db_write_latency().get_sample_count(), 2);
    }

    /// Panics while writing its first batch, then delegates to `inner`.
    #[derive(Debug)]
    struct FirstBatchPanics {
        inner: MemWriter,
        panicked: AtomicBool,
    }

    async fn explode() -> Result<Ack, WriteError> {
        panic!("boom")
    }

    #[async_trait]
    impl Writer for FirstBatchPanics {
        fn name(&self) -> &'static str {
            "first-batch-panics"
        }

        async fn ensure_schema(&self) -> Result<(), WriteError> {
            self.inner.ensure_schema().await
        }

        async fn truncate(&self) -> Result<(), WriteError> {
            self.inner.truncate().await
        }

        fn submit(&self, record: Record) -> WriteFuture {
            self.inner.submit(record)
        }

        fn submit_batch(&self, records: Vec<Record>, tx: bool) -> WriteFuture {
            if self.panicked.swap(true, Ordering::SeqCst) {
                self.inner.submit_batch(records, tx)
            } else {
                explode().boxed()
            }
        }
    }

    #[tokio::test]
    async fn panicking_batch_is_dropped_and_draining_continues() {
        let inner = MemWriter::new(MemWriterConfig::default());
        inner.ensure_schema().await.unwrap();
        let writer = FirstBatchPanics {
            inner: inner.clone(),
            panicked: AtomicBool::new(false),
        };
        let queue = StagingQueue::new();
        let registry = MetricsRegistry::new();
        let drainer = BatchDrainer::new(
            Arc::new(writer),
            queue.clone(),
            DrainerMetrics::register_into(&registry, "test"),
            DrainerConfig::default(),
        );
        queue
            .fill(PayloadFactory::new("p", now_zero()), 250)
            .await
            .unwrap();

        let summary = drainer.run(CancellationToken::new()).await;
        assert_eq!(summary.failed_batches, 1);
        assert_eq!(summary.failed_messages, 100);
        assert_eq!(summary.batches, 2);
        assert_eq!(summary.messages, 150);
        assert_eq!(inner.committed_batches(), vec![100, 50]);
        assert_eq!(drainer.metrics().batch_errors_total(), 1);
        assert_eq!(drainer.metrics().db_write_latency().get_sample_count(), 2);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn undecodable_entries_are_skipped() {
        let (writer, queue, drainer) = setup(MemWriterConfig::default(), Default::default()).await;
        let mut factory = PayloadFactory::new("p", now_zero());
        queue.push(&factory.next_record()).unwrap();
        queue.push_encoded(b"garbage".to_vec()).unwrap();
        queue.push(&factory.next_record()).unwrap();
        queue.close();

        let summary = drainer.run(CancellationToken::new()).await;
        assert_eq!(summary.decode_errors, 1);
        assert_eq!(summary.messages, 2);
        assert_eq!(writer.row_count(), 2);
        assert_eq!(drainer.metrics().decode_errors_total(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn idles_until_shutdown() {
        let (writer, queue, drainer) = setup(MemWriterConfig::default(), Default::default()).await;
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn({
            let shutdown = shutdown.clone();
            async move { drainer.run(shutdown).await }
        });
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(!handle.is_finished());

        shutdown.cancel();
        let summary = handle.await.unwrap();
        assert_eq!(summary.batches, 0);
        assert_eq!(writer.batches_submitted(), 0);
        assert!(!queue.is_closed());
    }

    #[tokio::test]
    async fn producer_and_drainer_run_concurrently() {
        let (writer, queue, drainer) = setup(
            MemWriterConfig::default(),
            DrainerConfig {
                batch_size: 100,
                idle_interval: Duration::from_millis(1),
                ..Default::default()
            },
        )
        .await;
        let (staged, summary) = run_staged(
            &queue,
            &drainer,
            PayloadFactory::new("p", now_zero()),
            5000,
            CancellationToken::new(),
        )
        .await;
        assert_eq!(staged.unwrap(), 5000);
        assert_eq!(summary.messages, 5000);
        assert_eq!(writer.row_count(), 5000);
        assert!(writer.committed_batches().iter().all(|n| *n <= 100));
    }
}
