// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! End-to-end runs against the in-memory store.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use wb_ore::cast::CastLossy;
use wb_ore::metrics::MetricsRegistry;
use wb_ore::now::now_zero;
use wb_store::mem::{FailurePolicy, MemWriterConfig};
use wb_store::{PayloadFactory, RecordFactory};
use writebench::config::{LoadgenConfig, Variant};
use writebench::drainer::{run_staged, BatchDrainer, DrainerConfig};
use writebench::metrics::DrainerMetrics;
use writebench::staging::StagingQueue;
use writebench::{Harness, Report};

mod util;

use util::{mem_writer, pump, scrape_registry, Scrape};

#[tokio::test]
async fn empty_run() {
    let writer = mem_writer(MemWriterConfig::default()).await;
    let (pump, registry) = pump(&writer, 8, 0);
    let summary = pump.run(PayloadFactory::new("p", now_zero())).await;

    assert_eq!(summary.total, 0);
    assert_eq!(summary.writes_total, 0);
    assert_eq!(summary.errors_total, 0);
    let scrape = scrape_registry(&registry);
    assert_eq!(scrape.get("test_writes_total"), 0.0);
    assert_eq!(scrape.get("test_write_latency_seconds_count"), 0.0);
}

#[tokio::test]
async fn immediate_acks() {
    let writer = mem_writer(MemWriterConfig::default()).await;
    let (pump, registry) = pump(&writer, 4, 100);
    let mut max_inflight = 0.0f64;
    let summary = pump
        .run_observed(PayloadFactory::new("p", now_zero()), |_| {
            max_inflight = max_inflight.max(pump.metrics().inflight());
        })
        .await;

    assert_eq!(summary.writes_total, 100);
    assert!(summary.peak_in_flight <= 4);
    assert!(max_inflight <= 4.0);
    let scrape = scrape_registry(&registry);
    assert_eq!(scrape.get("test_writes_total"), 100.0);
    assert_eq!(scrape.get("test_write_latency_seconds_count"), 100.0);
    assert_eq!(scrape.get("test_inflight_requests"), 0.0);
    scrape.assert_histograms_consistent();
}

#[tokio::test(start_paused = true)]
async fn delayed_acks_overlap() {
    let writer = mem_writer(MemWriterConfig {
        latency: Duration::from_millis(5),
        ..Default::default()
    })
    .await;
    let (pump, _registry) = pump(&writer, 16, 100);
    let summary = pump.run(PayloadFactory::new("p", now_zero())).await;

    assert_eq!(summary.succeeded, 100);
    assert_eq!(summary.peak_in_flight, 16);
    assert_eq!(writer.peak_active(), 16);
    // ceil(100 / 16) rounds of 5ms each.
    assert!(summary.elapsed >= Duration::from_millis(35));
    assert!(summary.elapsed < Duration::from_millis(40));
}

#[tokio::test]
async fn every_third_write_fails() {
    let writer = mem_writer(MemWriterConfig {
        write_failures: FailurePolicy::every_nth(3),
        ..Default::default()
    })
    .await;
    let (pump, registry) = pump(&writer, 8, 50);
    let summary = pump.run(PayloadFactory::new("p", now_zero())).await;

    assert_eq!(summary.errors_total, 17);
    assert_eq!(summary.writes_total, 33);
    assert_eq!(summary.succeeded + summary.failed, 50);
    let scrape = scrape_registry(&registry);
    assert_eq!(scrape.get(r#"test_errors_total{kind="transport"}"#), 17.0);
    assert_eq!(scrape.sum("test_errors_total"), 17.0);
    assert_eq!(scrape.get("test_write_latency_seconds_count"), 50.0);
    assert_eq!(pump.limiter().outstanding(), 0);
}

#[tokio::test]
async fn drainer_batches() {
    let writer = mem_writer(MemWriterConfig::default()).await;
    let registry = MetricsRegistry::new();
    let queue = StagingQueue::new();
    let drainer = BatchDrainer::new(
        Arc::new(writer.clone()),
        queue.clone(),
        DrainerMetrics::register_into(&registry, "whatsapp"),
        DrainerConfig {
            batch_size: 100,
            ..Default::default()
        },
    );
    queue
        .fill(PayloadFactory::new("p", now_zero()), 250)
        .await
        .unwrap();
    let summary = drainer.run(CancellationToken::new()).await;

    assert_eq!(summary.batches, 3);
    assert_eq!(writer.batches_submitted(), 3);
    assert_eq!(writer.committed_batches(), vec![100, 100, 50]);
    let scrape = scrape_registry(&registry);
    assert_eq!(scrape.get("whatsapp_db_write_latency_seconds_count"), 3.0);
    assert_eq!(scrape.get("whatsapp_messages_total"), 250.0);
    scrape.assert_histograms_consistent();
}

#[tokio::test]
async fn staging_replay_is_idempotent() {
    let mut factory = PayloadFactory::new("p", now_zero());
    let records: Vec<_> = (0..1234)
        .map(|_| factory.next_record())
        .collect();

    let mut row_counts = Vec::new();
    let replayed = mem_writer(MemWriterConfig::default()).await;
    for writer in [
        replayed.clone(),
        mem_writer(MemWriterConfig::default()).await,
        replayed.clone(),
    ] {
        let queue = StagingQueue::new();
        for record in &records {
            queue.push(record).unwrap();
        }
        queue.close();
        let drainer = BatchDrainer::new(
            Arc::new(writer.clone()),
            queue,
            DrainerMetrics::register_into(&MetricsRegistry::new(), "whatsapp"),
            DrainerConfig {
                batch_size: 100,
                ..Default::default()
            },
        );
        drainer.run(CancellationToken::new()).await;
        row_counts.push(writer.row_count());
    }
    assert_eq!(row_counts, vec![1234, 1234, 1234]);
    assert_eq!(replayed.duplicates(), 1234);
}

#[tokio::test]
async fn staged_producer_and_drainer_overlap() {
    let writer = mem_writer(MemWriterConfig {
        latency: Duration::from_millis(1),
        ..Default::default()
    })
    .await;
    let queue = StagingQueue::new();
    let drainer = BatchDrainer::new(
        Arc::new(writer.clone()),
        queue.clone(),
        DrainerMetrics::register_into(&MetricsRegistry::new(), "whatsapp"),
        DrainerConfig {
            batch_size: 64,
            idle_interval: Duration::from_millis(1),
            ..Default::default()
        },
    );
    let (staged, summary) = run_staged(
        &queue,
        &drainer,
        PayloadFactory::new("p", now_zero()),
        10_000,
        CancellationToken::new(),
    )
    .await;
    assert_eq!(staged.unwrap(), 10_000);
    assert_eq!(summary.messages, 10_000);
    assert_eq!(writer.row_count(), 10_000);
    assert_eq!(writer.duplicates(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn scrapes_during_a_run_are_consistent() {
    const TOTAL: u64 = 3000;
    const MAX_IN_FLIGHT: usize = 32;

    let writer = mem_writer(MemWriterConfig {
        latency: Duration::from_millis(1),
        write_failures: FailurePolicy::every_nth(7),
        ..Default::default()
    })
    .await;
    let mut config = LoadgenConfig::mem(Variant::Async, TOTAL);
    config.max_in_flight = MAX_IN_FLIGHT;
    let harness = Arc::new(
        Harness::with_writer(config, Arc::new(writer.clone()))
            .await
            .unwrap(),
    );
    let url = format!("http://{}/metrics", harness.scrape_addr());

    let run = tokio::spawn({
        let harness = Arc::clone(&harness);
        async move { harness.run(CancellationToken::new()).await }
    });

    let mut last = (0.0, 0.0);
    let mut scrapes = 0;
    while !run.is_finished() {
        let body = reqwest::get(&url).await.unwrap().text().await.unwrap();
        let scrape = Scrape::parse(&body);
        let writes = scrape.get("mem_writes_total");
        let errors = scrape.sum("mem_errors_total");
        assert!(writes + errors <= f64::cast_lossy(TOTAL));
        assert!(scrape.get("mem_inflight_requests") <= f64::cast_lossy(MAX_IN_FLIGHT));
        assert!(writes >= last.0 && errors >= last.1, "counters went backwards");
        scrape.assert_histograms_consistent();
        last = (writes, errors);
        scrapes += 1;
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(scrapes > 0);

    let Report::Pump(summary) = run.await.unwrap() else {
        panic!("expected a pump report");
    };
    assert_eq!(summary.succeeded + summary.failed, TOTAL);
    let body = reqwest::get(&url).await.unwrap().text().await.unwrap();
    let scrape = Scrape::parse(&body);
    assert_eq!(
        scrape.get("mem_writes_total") + scrape.sum("mem_errors_total"),
        f64::cast_lossy(TOTAL)
    );
    assert_eq!(scrape.get("mem_inflight_requests"), 0.0);

    let harness = Arc::into_inner(harness).expect("run task finished");
    harness.shutdown().await;
}

#[tokio::test]
async fn liveness_endpoint() {
    let harness = Harness::setup(LoadgenConfig::mem(Variant::Async, 0))
        .await
        .unwrap();
    let response = reqwest::get(format!("http://{}/api/livez", harness.scrape_addr()))
        .await
        .unwrap();
    assert!(response.status().is_success());
    harness.shutdown().await;
}
