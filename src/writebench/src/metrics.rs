// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Prometheus metrics for the write paths.
//!
//! Every metric name is prefixed by a namespace (by default the store name,
//! e.g. `cassandra_writes_total`), so that runs against different stores can
//! be told apart on a shared dashboard.

use wb_ore::cast::CastLossy;
use wb_ore::metric;
use wb_ore::metrics::{Counter, CounterVec, Gauge, Histogram, MetricsRegistry};
use wb_ore::stats::{histogram_seconds_buckets, WRITE_LATENCY_BUCKETS};
use wb_store::WriteError;

use crate::error::ConfigError;

/// Checks that `namespace` can prefix a Prometheus metric name.
pub fn validate_namespace(namespace: &str) -> Result<(), ConfigError> {
    let mut chars = namespace.chars();
    let valid = match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };
    if valid {
        Ok(())
    } else {
        Err(ConfigError::InvalidNamespace(namespace.to_owned()))
    }
}

/// Metrics of an [crate::pump::AsyncPump].
#[derive(Debug, Clone)]
pub struct PumpMetrics {
    pub(crate) writes_total: Counter,
    pub(crate) errors_total: CounterVec,
    pub(crate) inflight: Gauge,
    pub(crate) write_latency_seconds: Histogram,
}

impl PumpMetrics {
    /// Registers the pump metrics under `namespace`.
    ///
    /// Panics if metrics with the same namespace were already registered.
    pub fn register_into(registry: &MetricsRegistry, namespace: &str) -> Self {
        let metrics = PumpMetrics {
            writes_total: registry.register(metric!(
                name: format!("{namespace}_writes_total"),
                help: "Total number of successful writes.",
            )),
            errors_total: registry.register(metric!(
                name: format!("{namespace}_errors_total"),
                help: "Total number of failed writes, by kind of error.",
                var_labels: ["kind"],
            )),
            inflight: registry.register(metric!(
                name: format!("{namespace}_inflight_requests"),
                help: "Number of writes submitted but not yet completed.",
            )),
            write_latency_seconds: registry.register(metric!(
                name: format!("{namespace}_write_latency_seconds"),
                help: "Time from submitting a write to its completion, in seconds.",
                buckets: WRITE_LATENCY_BUCKETS.to_vec(),
            )),
        };
        // Export every kind from the start so rate() works on the first error.
        for kind in WriteError::KINDS {
            metrics.errors_total.with_label_values(&[kind]);
        }
        metrics
    }

    /// Successful writes so far.
    pub fn writes_total(&self) -> u64 {
        u64::cast_lossy(self.writes_total.get())
    }

    /// Failed writes so far, across all kinds.
    pub fn errors_total(&self) -> u64 {
        WriteError::KINDS
            .iter()
            .map(|kind| self.errors_of_kind(kind))
            .sum()
    }

    /// Failed writes so far of the given [WriteError::kind].
    pub fn errors_of_kind(&self, kind: &str) -> u64 {
        u64::cast_lossy(self.errors_total.with_label_values(&[kind]).get())
    }

    /// Writes currently in flight.
    pub fn inflight(&self) -> f64 {
        self.inflight.get()
    }

    /// The per-write latency histogram.
    pub fn write_latency(&self) -> &Histogram {
        &self.write_latency_seconds
    }
}

/// Metrics of a [crate::drainer::BatchDrainer].
#[derive(Debug, Clone)]
pub struct DrainerMetrics {
    pub(crate) messages_total: Counter,
    pub(crate) batches_total: Counter,
    pub(crate) batch_errors_total: Counter,
    pub(crate) decode_errors_total: Counter,
    pub(crate) staged_messages: Gauge,
    pub(crate) db_write_latency_seconds: Histogram,
}

impl DrainerMetrics {
    /// Registers the drainer metrics under `namespace`.
    ///
    /// Panics if metrics with the same namespace were already registered.
    pub fn register_into(registry: &MetricsRegistry, namespace: &str) -> Self {
        DrainerMetrics {
            messages_total: registry.register(metric!(
                name: format!("{namespace}_messages_total"),
                help: "Total number of messages written by the batch drainer.",
            )),
            batches_total: registry.register(metric!(
                name: format!("{namespace}_batches_total"),
                help: "Total number of batches written by the batch drainer.",
            )),
            batch_errors_total: registry.register(metric!(
                name: format!("{namespace}_batch_errors_total"),
                help: "Total number of batches the store rejected.",
            )),
            decode_errors_total: registry.register(metric!(
                name: format!("{namespace}_decode_errors_total"),
                help: "Total number of staged entries that could not be decoded.",
            )),
            staged_messages: registry.register(metric!(
                name: format!("{namespace}_staged_messages"),
                help: "Number of messages waiting in the staging queue.",
            )),
            db_write_latency_seconds: registry.register(metric!(
                name: format!("{namespace}_db_write_latency_seconds"),
                help: "Time to write one batch to the store, in seconds.",
                buckets: histogram_seconds_buckets(0.000_500, 32.0),
            )),
        }
    }

    /// Messages durably written so far.
    pub fn messages_total(&self) -> u64 {
        u64::cast_lossy(self.messages_total.get())
    }

    /// Batches durably written so far.
    pub fn batches_total(&self) -> u64 {
        u64::cast_lossy(self.batches_total.get())
    }

    /// Batches rejected so far.
    pub fn batch_errors_total(&self) -> u64 {
        u64::cast_lossy(self.batch_errors_total.get())
    }

    /// Undecodable entries dropped so far.
    pub fn decode_errors_total(&self) -> u64 {
        u64::cast_lossy(self.decode_errors_total.get())
    }

    /// The per-batch latency histogram.
    pub fn db_write_latency(&self) -> &Histogram {
        &self.db_write_latency_seconds
    }

    pub(crate) fn record_messages(&self, n: usize) {
        self.messages_total.inc_by(f64::cast_lossy(n));
        self.batches_total.inc();
    }

    pub(crate) fn set_staged(&self, n: usize) {
        self.staged_messages.set(f64::cast_lossy(n));
    }
}

/// Mean of the observations in `histogram`, in seconds, or zero if it has
/// none.
pub fn mean_seconds(histogram: &Histogram) -> f64 {
    let count = histogram.get_sample_count();
    if count == 0 {
        0.0
    } else {
        histogram.get_sample_sum() / f64::cast_lossy(count)
    }
}
