// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Wires a [LoadgenConfig] into a runnable benchmark.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;
use wb_ore::metrics::MetricsRegistry;
use wb_ore::now::system_time_fn;
use wb_store::cql::CqlWriter;
use wb_store::mem::MemWriter;
use wb_store::postgres::PostgresWriter;
use wb_store::{PayloadFactory, Writer};

use crate::config::{LoadgenConfig, StoreConfig, Variant};
use crate::drainer::{self, BatchDrainer, DrainSummary, DrainerConfig};
use crate::error::{SetupError, StagingError};
use crate::http::MetricsServer;
use crate::limiter::InFlightLimiter;
use crate::metrics::{DrainerMetrics, PumpMetrics};
use crate::pump::{AsyncPump, PumpConfig, RunSummary};
use crate::staging::StagingQueue;

#[derive(Debug)]
enum Workload {
    Pump(AsyncPump),
    Staged {
        queue: StagingQueue,
        drainer: BatchDrainer,
    },
}

/// What [Harness::run] did.
#[derive(Debug)]
pub enum Report {
    Pump(RunSummary),
    Staged {
        staged: Result<u64, StagingError>,
        summary: DrainSummary,
    },
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Report::Pump(summary) => write!(f, "{summary}"),
            Report::Staged { staged, summary } => {
                match staged {
                    Ok(n) => writeln!(f, "Staged: {n} records")?,
                    Err(e) => writeln!(f, "Staging stopped early: {e}")?,
                }
                write!(f, "{summary}")
            }
        }
    }
}

/// A connected writer, its workload, and the metrics endpoint serving both.
#[derive(Debug)]
pub struct Harness {
    config: LoadgenConfig,
    server: MetricsServer,
    writer: Arc<dyn Writer>,
    workload: Workload,
}

impl Harness {
    /// Starts the metrics endpoint, connects to the configured store and
    /// prepares its schema.
    pub async fn setup(config: LoadgenConfig) -> Result<Self, SetupError> {
        config.validate()?;
        let registry = MetricsRegistry::new();
        let server = MetricsServer::bind(registry.clone(), config.scrape_addr).await?;
        let writer = open_writer(&config.store).await?;
        Self::prepare(config, registry, server, writer).await
    }

    /// Like [Harness::setup], but writes through `writer` instead of
    /// connecting to the configured store.
    pub async fn with_writer(
        config: LoadgenConfig,
        writer: Arc<dyn Writer>,
    ) -> Result<Self, SetupError> {
        config.validate()?;
        let registry = MetricsRegistry::new();
        let server = MetricsServer::bind(registry.clone(), config.scrape_addr).await?;
        Self::prepare(config, registry, server, writer).await
    }

    async fn prepare(
        config: LoadgenConfig,
        registry: MetricsRegistry,
        server: MetricsServer,
        writer: Arc<dyn Writer>,
    ) -> Result<Self, SetupError> {
        let store = writer.name();
        writer
            .ensure_schema()
            .await
            .map_err(|source| SetupError::Schema { store, source })?;
        if config.truncate {
            writer
                .truncate()
                .await
                .map_err(|source| SetupError::Schema { store, source })?;
            info!("truncated messages in {}", store);
        }

        let workload = match config.variant {
            Variant::Naive | Variant::Async => Workload::Pump(AsyncPump::new(
                Arc::clone(&writer),
                InFlightLimiter::new(config.max_in_flight)?,
                PumpMetrics::register_into(&registry, &config.namespace),
                PumpConfig {
                    total_records: config.total_records,
                    progress_every: config.progress_every,
                    error_log_every: crate::pump::DEFAULT_ERROR_LOG_EVERY,
                },
            )),
            Variant::Staged => {
                let queue = StagingQueue::new();
                let drainer = BatchDrainer::new(
                    Arc::clone(&writer),
                    queue.clone(),
                    DrainerMetrics::register_into(&registry, &config.namespace),
                    DrainerConfig {
                        batch_size: config.batch_size,
                        batch_pause: config.batch_pause,
                        transactional: config.transactional,
                        progress_every: config.progress_every,
                        expected_total: config.total_records,
                        ..Default::default()
                    },
                );
                Workload::Staged { queue, drainer }
            }
        };

        Ok(Harness {
            config,
            server,
            writer,
            workload,
        })
    }

    /// The address the metrics endpoint is bound to.
    pub fn scrape_addr(&self) -> SocketAddr {
        self.server.local_addr()
    }

    /// Runs the configured workload to completion.
    ///
    /// Cancelling `shutdown` stops a staged run early; the pump always
    /// waits for every submitted write.
    pub async fn run(&self, shutdown: CancellationToken) -> Report {
        info!(
            "starting {} run of {} records against {}",
            self.config.variant.name(),
            self.config.total_records,
            self.writer.name()
        );
        let factory = PayloadFactory::new(self.config.payload.clone(), system_time_fn());
        match &self.workload {
            Workload::Pump(pump) => Report::Pump(pump.run(factory).await),
            Workload::Staged { queue, drainer } => {
                let (staged, summary) = drainer::run_staged(
                    queue,
                    drainer,
                    factory,
                    self.config.total_records,
                    shutdown,
                )
                .await;
                Report::Staged { staged, summary }
            }
        }
    }

    /// Stops the metrics endpoint.
    pub async fn shutdown(self) {
        self.server.shutdown().await;
    }
}

async fn open_writer(store: &StoreConfig) -> Result<Arc<dyn Writer>, SetupError> {
    let name = store.kind().name();
    let connect = |source| SetupError::Connect { store: name, source };
    let writer: Arc<dyn Writer> = match store {
        StoreConfig::Mem(cfg) => Arc::new(MemWriter::new(cfg.clone())),
        StoreConfig::Postgres(cfg) => {
            Arc::new(PostgresWriter::open(cfg.clone()).await.map_err(connect)?)
        }
        StoreConfig::Cassandra(cfg) => Arc::new(CqlWriter::open(cfg.clone()).await.map_err(connect)?),
    };
    Ok(writer)
}
