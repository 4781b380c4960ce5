// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! A bounded-concurrency write load generator.
//!
//! The pump submits `total_records` writes, one per record produced by a
//! [RecordFactory], while never holding more than
//! [InFlightLimiter::max] writes outstanding. Completions are accounted for
//! on a separate path: each write task reports a [CompletionEvent] on a
//! channel, and the run is over once as many events as submissions have
//! been received.
//!
//! With a limit of one, the pump awaits each write before submitting the
//! next, which is the naive write path.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;
use wb_ore::cast::CastLossy;
use wb_ore::metrics::HistogramTimer;
use wb_ore::task;
use wb_store::{Ack, RecordFactory, WriteError, Writer};

use crate::limiter::{InFlightLimiter, InFlightPermit};
use crate::metrics::{mean_seconds, PumpMetrics};
use crate::reporter::{millis, throughput, ProgressReporter, Thousands};

/// How often to log progress when not configured otherwise.
pub const DEFAULT_PROGRESS_EVERY: u64 = 10_000;

/// Failed writes are logged for the first failure and then once per this
/// many failures.
pub const DEFAULT_ERROR_LOG_EVERY: u64 = 1_000;

/// Configuration of an [AsyncPump].
#[derive(Debug, Clone)]
pub struct PumpConfig {
    /// Number of writes to submit.
    pub total_records: u64,
    /// Log progress every this many completions.
    pub progress_every: u64,
    /// Log every this many failures, after the first.
    pub error_log_every: u64,
}

impl PumpConfig {
    /// A config for `total_records` writes with default logging intervals.
    pub fn new(total_records: u64) -> Self {
        PumpConfig {
            total_records,
            progress_every: DEFAULT_PROGRESS_EVERY,
            error_log_every: DEFAULT_ERROR_LOG_EVERY,
        }
    }
}

/// The outcome of one submitted write.
#[derive(Debug, Clone)]
pub struct CompletionEvent {
    pub record_id: Uuid,
    pub started: Instant,
    pub finished: Instant,
    pub outcome: Result<Ack, WriteError>,
}

/// The result of [AsyncPump::run].
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    /// Writes submitted, which is also the number of completions observed.
    pub total: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub elapsed: Duration,
    /// Mean latency over every write observed by the latency histogram.
    pub avg_latency: Duration,
    /// The value of the `writes_total` counter when the run ended.
    pub writes_total: u64,
    /// The value of the `errors_total` counter, over all kinds, when the run
    /// ended.
    pub errors_total: u64,
    pub max_in_flight: usize,
    pub peak_in_flight: usize,
}

impl RunSummary {
    /// Completed writes per second.
    pub fn throughput(&self) -> f64 {
        throughput(self.total, self.elapsed)
    }

    /// Wall-clock milliseconds per submitted write, or zero for an empty
    /// run.
    pub fn processing_time_per_message(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            millis(self.elapsed) / f64::cast_lossy(self.total)
        }
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Total time: {} ms", self.elapsed.as_millis())?;
        writeln!(
            f,
            "Messages: {} submitted, {} succeeded, {} failed",
            Thousands(self.total),
            Thousands(self.succeeded),
            Thousands(self.failed),
        )?;
        writeln!(
            f,
            "Average processing time: {:.3} ms/msg",
            self.processing_time_per_message()
        )?;
        writeln!(f, "Throughput: {:.2} msg/s", self.throughput())?;
        writeln!(f, "Average latency: {:.3} ms", millis(self.avg_latency))?;
        writeln!(
            f,
            "Counters: {} writes, {} errors",
            Thousands(self.writes_total),
            Thousands(self.errors_total),
        )?;
        write!(
            f,
            "Peak in-flight: {}/{}",
            self.peak_in_flight, self.max_in_flight
        )
    }
}

/// Drives writes through a [Writer], bounded by an [InFlightLimiter].
#[derive(Debug)]
pub struct AsyncPump {
    writer: Arc<dyn Writer>,
    limiter: InFlightLimiter,
    metrics: PumpMetrics,
    config: PumpConfig,
}

impl AsyncPump {
    pub fn new(
        writer: Arc<dyn Writer>,
        limiter: InFlightLimiter,
        metrics: PumpMetrics,
        config: PumpConfig,
    ) -> Self {
        AsyncPump {
            writer,
            limiter,
            metrics,
            config,
        }
    }

    pub fn limiter(&self) -> &InFlightLimiter {
        &self.limiter
    }

    pub fn metrics(&self) -> &PumpMetrics {
        &self.metrics
    }

    /// Submits every write and returns once all of them have completed.
    pub async fn run<F>(&self, factory: F) -> RunSummary
    where
        F: RecordFactory,
    {
        self.run_observed(factory, |_| {}).await
    }

    /// Like [AsyncPump::run], but hands every [CompletionEvent] to
    /// `observer` as it is accounted for.
    pub async fn run_observed<F, O>(&self, mut factory: F, mut observer: O) -> RunSummary
    where
        F: RecordFactory,
        O: FnMut(&CompletionEvent),
    {
        let total = self.config.total_records;
        let error_log_every = self.config.error_log_every.max(1);
        let start = Instant::now();
        let reporter = ProgressReporter::new(
            total,
            self.config.progress_every,
            start,
            self.metrics.write_latency_seconds.clone(),
        );
        let (tx, mut rx) = mpsc::unbounded_channel();

        let produce = async move {
            for _ in 0..total {
                let permit = self.limiter.acquire().await;
                let mut completion = Completion::start(&self.metrics, permit, tx.clone());
                let record = factory.next_record();
                completion.record_id = record.id;
                // The permit must come back even if the writer panics.
                let write = match panic::catch_unwind(AssertUnwindSafe(|| {
                    self.writer.submit(record)
                })) {
                    Ok(write) => write,
                    Err(_) => {
                        completion.finish(Err(WriteError::Backend(format!(
                            "{} writer panicked on submit",
                            self.writer.name()
                        ))));
                        continue;
                    }
                };
                task::spawn(|| "pump_write", async move {
                    let outcome = AssertUnwindSafe(write)
                        .catch_unwind()
                        .await
                        .unwrap_or_else(|_| Err(WriteError::Backend("write panicked".into())));
                    completion.finish(outcome);
                });
            }
            debug!("submitted {} writes", total);
        };

        let consume = async {
            let mut succeeded = 0u64;
            let mut failed = 0u64;
            while succeeded + failed < total {
                let Some(event) = rx.recv().await else {
                    break;
                };
                match &event.outcome {
                    Ok(_) => succeeded += 1,
                    Err(e) => {
                        failed += 1;
                        if logs_failure(failed, error_log_every) {
                            warn!(
                                record_id = %event.record_id,
                                kind = e.kind(),
                                "write failed ({} failures so far): {}",
                                failed,
                                e
                            );
                        }
                    }
                }
                observer(&event);
                reporter.on_completion(succeeded + failed);
            }
            (succeeded, failed)
        };

        let ((), (succeeded, failed)) = futures::join!(produce, consume);

        RunSummary {
            total,
            succeeded,
            failed,
            elapsed: start.elapsed(),
            avg_latency: Duration::from_secs_f64(mean_seconds(&self.metrics.write_latency_seconds)),
            writes_total: self.metrics.writes_total(),
            errors_total: self.metrics.errors_total(),
            max_in_flight: self.limiter.max(),
            peak_in_flight: self.limiter.peak(),
        }
    }
}

/// Accounts for exactly one write, however it ends.
///
/// Completing observes the latency, counts the outcome, decrements the
/// in-flight gauge, releases the permit and reports the event, in that
/// order. Dropping an unfinished completion completes it as a transport
/// error.
struct Completion {
    record_id: Uuid,
    started: Instant,
    timer: Option<HistogramTimer>,
    permit: Option<InFlightPermit>,
    metrics: PumpMetrics,
    events: mpsc::UnboundedSender<CompletionEvent>,
}

impl Completion {
    fn start(
        metrics: &PumpMetrics,
        permit: InFlightPermit,
        events: mpsc::UnboundedSender<CompletionEvent>,
    ) -> Self {
        metrics.inflight.inc();
        Completion {
            record_id: Uuid::nil(),
            started: Instant::now(),
            timer: Some(metrics.write_latency_seconds.start_timer()),
            permit: Some(permit),
            metrics: metrics.clone(),
            events,
        }
    }

    fn finish(mut self, outcome: Result<Ack, WriteError>) {
        self.complete(outcome);
    }

    fn complete(&mut self, outcome: Result<Ack, WriteError>) {
        let (Some(timer), Some(permit)) = (self.timer.take(), self.permit.take()) else {
            return;
        };
        timer.observe_duration();
        match &outcome {
            Ok(_) => self.metrics.writes_total.inc(),
            Err(e) => self.metrics.errors_total.with_label_values(&[e.kind()]).inc(),
        }
        self.metrics.inflight.dec();
        permit.release();
        // The receiver only goes away if the run itself was dropped.
        let _ = self.events.send(CompletionEvent {
            record_id: self.record_id,
            started: self.started,
            finished: Instant::now(),
            outcome,
        });
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        self.complete(Err(WriteError::Transport(
            "write abandoned before completion".into(),
        )));
    }
}

/// Whether the `failed`th failure of a run is logged.
fn logs_failure(failed: u64, every: u64) -> bool {
    failed == 1 || failed % every.max(1) == 0
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use async_trait::async_trait;
    use wb_ore::metrics::MetricsRegistry;
    use wb_ore::now::now_zero;
    use wb_store::mem::{FailurePolicy, MemWriter, MemWriterConfig};
    use wb_store::{PayloadFactory, Record, WriteFuture};

    use super::*;

    fn pump(writer: Arc<dyn Writer>, max_in_flight: usize, total: u64) -> AsyncPump {
        let registry = MetricsRegistry::new();
        AsyncPump::new(
            writer,
            InFlightLimiter::new(max_in_flight).unwrap(),
            PumpMetrics::register_into(&registry, "test"),
            PumpConfig::new(total),
        )
    }

    async fn mem_writer(cfg: MemWriterConfig) -> MemWriter {
        let writer = MemWriter::new(cfg);
        writer.ensure_schema().await.unwrap();
        writer
    }

    #[tokio::test]
    async fn zero_records_completes_immediately() {
        let writer = mem_writer(MemWriterConfig::default()).await;
        let pump = pump(Arc::new(writer.clone()), 4, 0);
        let summary = pump.run(PayloadFactory::new("p", now_zero())).await;
        assert_eq!(summary.total, 0);
        assert_eq!(summary.succeeded + summary.failed, 0);
        assert_eq!(summary.avg_latency, Duration::ZERO);
        assert_eq!(summary.throughput(), 0.0);
        assert_eq!(writer.writes_submitted(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn every_write_is_accounted_for() {
        let writer = mem_writer(MemWriterConfig {
            latency: Duration::from_millis(1),
            ..Default::default()
        })
        .await;
        let pump = pump(Arc::new(writer.clone()), 8, 500);
        let mut ids = BTreeSet::new();
        let summary = pump
            .run_observed(PayloadFactory::new("p", now_zero()), |event| {
                assert!(event.finished >= event.started);
                assert!(ids.insert(event.record_id), "duplicate completion");
            })
            .await;

        assert_eq!(ids.len(), 500);
        assert_eq!(summary.succeeded, 500);
        assert_eq!(summary.failed, 0);
        assert_eq!(summary.writes_total, 500);
        assert_eq!(writer.row_count(), 500);
        assert!(summary.peak_in_flight <= 8);
        assert!(writer.peak_active() <= 8);
        assert_eq!(pump.limiter().outstanding(), 0);
        assert_eq!(pump.metrics().inflight(), 0.0);
        assert_eq!(pump.metrics().write_latency().get_sample_count(), 500);
    }

    #[tokio::test]
    async fn failures_are_counted_by_kind() {
        let writer = mem_writer(MemWriterConfig {
            write_failures: FailurePolicy::every_nth(3),
            ..Default::default()
        })
        .await;
        let pump = pump(Arc::new(writer.clone()), 4, 50);
        let summary = pump.run(PayloadFactory::new("p", now_zero())).await;

        assert_eq!(summary.failed, 17);
        assert_eq!(summary.succeeded, 33);
        assert_eq!(pump.metrics().errors_of_kind("transport"), 17);
        assert_eq!(summary.errors_total, 17);
        assert_eq!(writer.row_count(), 33);
        assert_eq!(pump.limiter().outstanding(), 0);
    }

    #[tokio::test]
    async fn naive_path_waits_for_each_write() {
        let writer = mem_writer(MemWriterConfig {
            latency: Duration::from_millis(1),
            ..Default::default()
        })
        .await;
        let pump = pump(Arc::new(writer.clone()), 1, 20);
        let summary = pump.run(PayloadFactory::new("p", now_zero())).await;
        assert_eq!(summary.succeeded, 20);
        assert_eq!(summary.peak_in_flight, 1);
        assert_eq!(writer.peak_active(), 1);
    }

    #[derive(Debug)]
    struct PanickingWriter {
        in_future: bool,
    }

    async fn explode() -> Result<Ack, WriteError> {
        panic!("boom")
    }

    #[async_trait]
    impl Writer for PanickingWriter {
        fn name(&self) -> &'static str {
            "panicking"
        }

        async fn ensure_schema(&self) -> Result<(), WriteError> {
            Ok(())
        }

        async fn truncate(&self) -> Result<(), WriteError> {
            Ok(())
        }

        fn submit(&self, _record: Record) -> WriteFuture {
            if self.in_future {
                explode().boxed()
            } else {
                panic!("boom")
            }
        }

        fn submit_batch(&self, _records: Vec<Record>, _tx: bool) -> WriteFuture {
            unimplemented!()
        }
    }

    #[tokio::test]
    async fn panicking_writer_releases_every_permit() {
        for in_future in [false, true] {
            let pump = pump(Arc::new(PanickingWriter { in_future }), 2, 10);
            let summary = pump.run(PayloadFactory::new("p", now_zero())).await;
            assert_eq!(summary.failed, 10);
            assert_eq!(pump.metrics().errors_of_kind("backend"), 10);
            assert_eq!(pump.limiter().outstanding(), 0);
            assert_eq!(pump.metrics().inflight(), 0.0);
        }
    }

    #[test]
    fn failure_logging_is_throttled() {
        let logged: Vec<u64> = (1..=7).filter(|n| logs_failure(*n, 2)).collect();
        assert_eq!(logged, vec![1, 2, 4, 6]);
        let logged: Vec<u64> = (1..=3000).filter(|n| logs_failure(*n, 1000)).collect();
        assert_eq!(logged, vec![1, 1000, 2000, 3000]);
        assert!(logs_failure(5, 0));
    }

    #[test]
    fn summary_display() {
        let summary = RunSummary {
            total: 100_000,
            succeeded: 99_000,
            failed: 1_000,
            elapsed: Duration::from_secs(4),
            avg_latency: Duration::from_micros(2_500),
            writes_total: 99_000,
            errors_total: 1_000,
            max_in_flight: 1024,
            peak_in_flight: 1024,
        };
        assert_eq!(
            summary.to_string(),
            "Total time: 4000 ms\n\
             Messages: 100,000 submitted, 99,000 succeeded, 1,000 failed\n\
             Average processing time: 0.040 ms/msg\n\
             Throughput: 25000.00 msg/s\n\
             Average latency: 2.500 ms\n\
             Counters: 99,000 writes, 1,000 errors\n\
             Peak in-flight: 1024/1024"
        );
    }
}
