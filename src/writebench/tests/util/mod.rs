// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Helpers shared by the integration tests.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use wb_ore::metrics::MetricsRegistry;
use wb_store::mem::{MemWriter, MemWriterConfig};
use wb_store::Writer;
use writebench::limiter::InFlightLimiter;
use writebench::metrics::PumpMetrics;
use writebench::pump::{AsyncPump, PumpConfig};

pub async fn mem_writer(cfg: MemWriterConfig) -> MemWriter {
    let writer = MemWriter::new(cfg);
    writer.ensure_schema().await.expect("mem schema");
    writer
}

pub fn pump(writer: &MemWriter, max_in_flight: usize, total: u64) -> (AsyncPump, MetricsRegistry) {
    let registry = MetricsRegistry::new();
    let pump = AsyncPump::new(
        Arc::new(writer.clone()),
        InFlightLimiter::new(max_in_flight).expect("valid limit"),
        PumpMetrics::register_into(&registry, "test"),
        PumpConfig::new(total),
    );
    (pump, registry)
}

/// A parsed Prometheus text-format exposition: sample line (name plus
/// labels, verbatim) to value.
#[derive(Debug, Default)]
pub struct Scrape {
    pub samples: BTreeMap<String, f64>,
    /// Histogram buckets in exposition order, keyed by metric name.
    pub buckets: BTreeMap<String, Vec<(f64, f64)>>,
}

impl Scrape {
    pub fn parse(text: &str) -> Scrape {
        let mut scrape = Scrape::default();
        for line in text.lines() {
            if line.starts_with('#') || line.trim().is_empty() {
                continue;
            }
            let (key, value) = line.rsplit_once(' ').expect("sample line");
            let value: f64 = value.parse().expect("sample value");
            if let Some((name, labels)) = key.split_once("_bucket{") {
                let le = labels
                    .split(',')
                    .find_map(|l| l.strip_prefix("le=\""))
                    .and_then(|l| l.split('"').next())
                    .expect("le label");
                let le = if le == "+Inf" {
                    f64::INFINITY
                } else {
                    le.parse().expect("le value")
                };
                scrape
                    .buckets
                    .entry(name.to_owned())
                    .or_default()
                    .push((le, value));
            }
            scrape.samples.insert(key.to_owned(), value);
        }
        scrape
    }

    pub fn get(&self, key: &str) -> f64 {
        self.samples.get(key).copied().unwrap_or(0.0)
    }

    /// Sum of every sample of `name`, across label sets.
    pub fn sum(&self, name: &str) -> f64 {
        self.samples
            .iter()
            .filter(|(k, _)| *k == name || k.starts_with(&format!("{name}{{")))
            .map(|(_, v)| v)
            .sum()
    }

    /// Asserts that every histogram has cumulative buckets ending in a
    /// `+Inf` bucket equal to its count.
    pub fn assert_histograms_consistent(&self) {
        for (name, buckets) in &self.buckets {
            assert!(
                buckets.windows(2).all(|w| w[0].0 < w[1].0 && w[0].1 <= w[1].1),
                "{name} buckets not cumulative: {buckets:?}"
            );
            let (le, inf) = *buckets.last().expect("at least the +Inf bucket");
            assert_eq!(le, f64::INFINITY, "{name} has no +Inf bucket");
            assert_eq!(inf, self.get(&format!("{name}_count")), "{name} +Inf != count");
        }
    }
}

/// Renders `registry` the way the scrape endpoint does and parses it.
pub fn scrape_registry(registry: &MetricsRegistry) -> Scrape {
    use prometheus::{Encoder, TextEncoder};
    let mut buffer = Vec::new();
    TextEncoder::new()
        .encode(&registry.gather(), &mut buffer)
        .expect("encodable");
    Scrape::parse(&String::from_utf8(buffer).expect("utf-8"))
}
