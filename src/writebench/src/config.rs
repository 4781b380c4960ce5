// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Command-line configuration.
//!
//! Every flag can also be set through a `WRITEBENCH_`-prefixed environment
//! variable. Store-dependent defaults (port, database, metric namespace) are
//! resolved in [RunArgs::into_config].

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use tracing_subscriber::filter::Targets;
use wb_store::cfg::{CqlConfig, PostgresConfig};
use wb_store::mem::{FailurePolicy, MemWriterConfig};
use wb_store::record::DEFAULT_PAYLOAD;

use crate::error::ConfigError;
use crate::limiter::InFlightLimiter;
use crate::metrics::validate_namespace;

/// Which datastore to write to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum StoreKind {
    /// An in-process store, for dry runs.
    Mem,
    /// A PostgreSQL server.
    Postgres,
    /// A Cassandra (or any CQL) cluster.
    Cassandra,
}

impl StoreKind {
    pub fn name(self) -> &'static str {
        match self {
            StoreKind::Mem => "mem",
            StoreKind::Postgres => "postgres",
            StoreKind::Cassandra => "cassandra",
        }
    }

    fn default_port(self) -> u16 {
        match self {
            StoreKind::Mem => 0,
            StoreKind::Postgres => 5432,
            StoreKind::Cassandra => 9042,
        }
    }

    fn default_keyspace_or_database(self) -> &'static str {
        match self {
            StoreKind::Postgres => "whatsapp_db",
            StoreKind::Mem | StoreKind::Cassandra => "whatsapp",
        }
    }

    fn default_scrape_port(self) -> u16 {
        match self {
            StoreKind::Postgres => 8081,
            StoreKind::Mem | StoreKind::Cassandra => 8080,
        }
    }
}

/// Which write path to exercise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variant {
    Naive,
    Async,
    Staged,
}

impl Variant {
    pub fn name(self) -> &'static str {
        match self {
            Variant::Naive => "naive",
            Variant::Async => "async",
            Variant::Staged => "staged",
        }
    }

    fn default_total_records(self) -> u64 {
        match self {
            Variant::Naive => 10_000,
            Variant::Async => 100_000,
            Variant::Staged => 20_000,
        }
    }
}

/// Generates write load against a datastore and exports Prometheus metrics
/// about it.
#[derive(Debug, clap::Parser)]
#[clap(name = "writebench")]
pub struct Args {
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, clap::Subcommand)]
pub enum Command {
    /// Write one record at a time, awaiting each write before the next.
    Naive(RunArgs),
    /// Keep up to --max-in-flight writes outstanding at once.
    Async(RunArgs),
    /// Stage records in a queue and drain them into the store in batches.
    Staged(RunArgs),
}

#[derive(Debug, Clone, clap::Args)]
pub struct RunArgs {
    // === Store options. ===
    /// The store to write to.
    #[clap(long, env = "WRITEBENCH_STORE", value_enum)]
    pub store: StoreKind,
    /// Host of the store, or of a contact point of the cluster.
    #[clap(
        long,
        env = "WRITEBENCH_CONTACT_HOST",
        value_name = "HOST",
        default_value = "localhost"
    )]
    pub contact_host: String,
    /// Port of the store. Defaults to 5432 for postgres and 9042 for
    /// cassandra.
    #[clap(long, env = "WRITEBENCH_CONTACT_PORT", value_name = "PORT")]
    pub contact_port: Option<u16>,
    /// Local datacenter of the cassandra cluster.
    #[clap(long, env = "WRITEBENCH_DATACENTER", default_value = "datacenter1")]
    pub datacenter: String,
    /// Cassandra keyspace or postgres database holding the `messages` table.
    #[clap(long, env = "WRITEBENCH_KEYSPACE_OR_DATABASE", value_name = "NAME")]
    pub keyspace_or_database: Option<String>,
    #[clap(long, env = "WRITEBENCH_USER", default_value = "ajay")]
    pub user: String,
    #[clap(
        long,
        env = "WRITEBENCH_PASSWORD",
        default_value = "password",
        hide_env_values = true,
        hide_default_value = true
    )]
    pub password: String,
    /// Maximum number of pooled postgres connections.
    #[clap(long, env = "WRITEBENCH_POOL_SIZE", default_value = "50")]
    pub pool_size: usize,
    /// How long a single write may take before it fails.
    #[clap(
        long,
        env = "WRITEBENCH_REQUEST_TIMEOUT",
        value_parser = humantime::parse_duration,
        default_value = "10s"
    )]
    pub request_timeout: Duration,
    /// Remove every row from the `messages` table before the run.
    #[clap(long, env = "WRITEBENCH_TRUNCATE")]
    pub truncate: bool,

    // === Load options. ===
    /// Number of records to write. Defaults to 10000 for naive, 100000 for
    /// async and 20000 for staged.
    #[clap(long, env = "WRITEBENCH_TOTAL_RECORDS", value_name = "N")]
    pub total_records: Option<u64>,
    /// Maximum number of outstanding writes. Ignored by naive, which always
    /// uses 1.
    #[clap(
        long,
        env = "WRITEBENCH_MAX_IN_FLIGHT",
        value_name = "N",
        default_value = "1024"
    )]
    pub max_in_flight: usize,
    /// Maximum number of records per staged batch.
    #[clap(
        long,
        env = "WRITEBENCH_BATCH_SIZE",
        value_name = "N",
        default_value = "100"
    )]
    pub batch_size: usize,
    /// Pause between staged batches.
    ///
    /// Defaults to no pause, so the drainer keeps up with the store. A
    /// `50ms` pause gives the paced drain of a throttled worker.
    #[clap(
        long,
        env = "WRITEBENCH_BATCH_PAUSE",
        value_parser = humantime::parse_duration,
        default_value = "0s"
    )]
    pub batch_pause: Duration,
    /// Write staged batches without a transaction.
    #[clap(long, env = "WRITEBENCH_NO_TRANSACTION")]
    pub no_transaction: bool,
    /// The `content` of every record.
    #[clap(long, env = "WRITEBENCH_PAYLOAD", default_value = DEFAULT_PAYLOAD)]
    pub payload: String,

    // === Mem store options. ===
    /// Latency of every mem store write.
    #[clap(
        long,
        env = "WRITEBENCH_MEM_LATENCY",
        value_parser = humantime::parse_duration,
        default_value = "0s"
    )]
    pub mem_latency: Duration,
    /// Fail every Nth mem store write, starting with the first. 0 disables.
    #[clap(
        long,
        env = "WRITEBENCH_MEM_FAIL_EVERY",
        value_name = "N",
        default_value = "0"
    )]
    pub mem_fail_every: u64,
    /// Fail every Nth mem store batch, starting with the first. 0 disables.
    #[clap(
        long,
        env = "WRITEBENCH_MEM_BATCH_FAIL_EVERY",
        value_name = "N",
        default_value = "0"
    )]
    pub mem_batch_fail_every: u64,

    // === Observability options. ===
    /// Port of the Prometheus scrape endpoint. Defaults to 8081 for postgres
    /// and 8080 otherwise; 0 picks a free port.
    #[clap(long, env = "WRITEBENCH_SCRAPE_PORT", value_name = "PORT")]
    pub scrape_port: Option<u16>,
    /// Prefix of every metric name. Defaults to the store name, or
    /// `whatsapp` for staged.
    #[clap(long, env = "WRITEBENCH_METRICS_NAMESPACE", value_name = "NAME")]
    pub metrics_namespace: Option<String>,
    /// Log progress every this many completed writes.
    #[clap(
        long,
        env = "WRITEBENCH_PROGRESS_EVERY",
        value_name = "N",
        default_value = "10000"
    )]
    pub progress_every: u64,
    /// How long to keep serving metrics after the run, for a final scrape.
    #[clap(
        long,
        env = "WRITEBENCH_LINGER",
        value_parser = humantime::parse_duration,
        default_value = "60s"
    )]
    pub linger: Duration,
    /// Which log events to emit to stderr.
    #[clap(
        long,
        env = "WRITEBENCH_LOG_FILTER",
        value_name = "FILTER",
        default_value = wb_ore::tracing::DEFAULT_LOG_FILTER
    )]
    pub log_filter: Targets,
}

/// Connection settings for the chosen store.
#[derive(Debug, Clone)]
pub enum StoreConfig {
    Mem(MemWriterConfig),
    Postgres(PostgresConfig),
    Cassandra(CqlConfig),
}

impl StoreConfig {
    pub fn kind(&self) -> StoreKind {
        match self {
            StoreConfig::Mem(_) => StoreKind::Mem,
            StoreConfig::Postgres(_) => StoreKind::Postgres,
            StoreConfig::Cassandra(_) => StoreKind::Cassandra,
        }
    }
}

/// A validated configuration for one run.
#[derive(Debug, Clone)]
pub struct LoadgenConfig {
    pub variant: Variant,
    pub store: StoreConfig,
    pub truncate: bool,
    pub total_records: u64,
    pub max_in_flight: usize,
    pub batch_size: usize,
    pub batch_pause: Duration,
    pub transactional: bool,
    pub payload: String,
    pub scrape_addr: SocketAddr,
    pub namespace: String,
    pub progress_every: u64,
    pub linger: Duration,
    pub log_filter: Targets,
}

impl LoadgenConfig {
    /// A config that writes `total_records` to a fresh mem store and serves
    /// metrics on a free port.
    pub fn mem(variant: Variant, total_records: u64) -> Self {
        LoadgenConfig {
            variant,
            store: StoreConfig::Mem(MemWriterConfig::default()),
            truncate: false,
            total_records,
            max_in_flight: if variant == Variant::Naive { 1 } else { 1024 },
            batch_size: crate::drainer::DEFAULT_BATCH_SIZE,
            batch_pause: Duration::ZERO,
            transactional: true,
            payload: DEFAULT_PAYLOAD.into(),
            scrape_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, 0)),
            namespace: "mem".into(),
            progress_every: crate::pump::DEFAULT_PROGRESS_EVERY,
            linger: Duration::ZERO,
            log_filter: Targets::new(),
        }
    }

    /// Checks the values that can't be enforced by their types.
    pub fn validate(&self) -> Result<(), ConfigError> {
        InFlightLimiter::new(self.max_in_flight)?;
        if self.batch_size == 0 {
            return Err(ConfigError::ZeroBatchSize);
        }
        if self.progress_every == 0 {
            return Err(ConfigError::ZeroProgressEvery);
        }
        validate_namespace(&self.namespace)
    }
}

impl Args {
    pub fn into_config(self) -> Result<LoadgenConfig, ConfigError> {
        match self.command {
            Command::Naive(args) => args.into_config(Variant::Naive),
            Command::Async(args) => args.into_config(Variant::Async),
            Command::Staged(args) => args.into_config(Variant::Staged),
        }
    }
}

impl RunArgs {
    /// Resolves store-dependent defaults and validates the result.
    pub fn into_config(self, variant: Variant) -> Result<LoadgenConfig, ConfigError> {
        let kind = self.store;
        let port = self.contact_port.unwrap_or_else(|| kind.default_port());
        let keyspace_or_database = self
            .keyspace_or_database
            .unwrap_or_else(|| kind.default_keyspace_or_database().into());
        let store = match kind {
            StoreKind::Mem => StoreConfig::Mem(MemWriterConfig {
                latency: self.mem_latency,
                write_failures: FailurePolicy::every_nth(self.mem_fail_every),
                batch_failures: FailurePolicy::every_nth(self.mem_batch_fail_every),
            }),
            StoreKind::Postgres => StoreConfig::Postgres(PostgresConfig {
                host: self.contact_host,
                port,
                database: keyspace_or_database,
                user: self.user,
                password: self.password,
                pool_size: self.pool_size,
                request_timeout: self.request_timeout,
            }),
            StoreKind::Cassandra => StoreConfig::Cassandra(CqlConfig {
                host: self.contact_host,
                port,
                datacenter: self.datacenter,
                keyspace: keyspace_or_database,
                request_timeout: self.request_timeout,
            }),
        };
        let namespace = self.metrics_namespace.unwrap_or_else(|| match variant {
            Variant::Staged => "whatsapp".into(),
            Variant::Naive | Variant::Async => kind.name().into(),
        });
        let config = LoadgenConfig {
            variant,
            store,
            truncate: self.truncate,
            total_records: self
                .total_records
                .unwrap_or_else(|| variant.default_total_records()),
            max_in_flight: match variant {
                Variant::Naive => 1,
                Variant::Async | Variant::Staged => self.max_in_flight,
            },
            batch_size: self.batch_size,
            batch_pause: self.batch_pause,
            transactional: !self.no_transaction,
            payload: self.payload,
            scrape_addr: SocketAddr::from((
                Ipv4Addr::UNSPECIFIED,
                self.scrape_port
                    .unwrap_or_else(|| kind.default_scrape_port()),
            )),
            namespace,
            progress_every: self.progress_every,
            linger: self.linger,
            log_filter: self.log_filter,
        };
        config.validate()?;
        Ok(config)
    }
}
