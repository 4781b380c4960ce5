// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Errors surfaced by the load generator.

use std::net::SocketAddr;

use wb_store::WriteError;

/// A configuration value was rejected before any work started.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// The in-flight limit must admit at least one write.
    #[error("max in-flight must be at least 1")]
    ZeroMaxInFlight,
    /// The in-flight limit exceeds what the limiter can represent.
    #[error("max in-flight {0} exceeds the supported maximum of {1}")]
    MaxInFlightTooLarge(usize, usize),
    /// Batches must hold at least one record.
    #[error("batch size must be at least 1")]
    ZeroBatchSize,
    /// Progress must be reported every one or more completions.
    #[error("progress interval must be at least 1")]
    ZeroProgressEvery,
    /// A metric namespace must be a valid Prometheus name prefix.
    #[error("invalid metric namespace {0:?}")]
    InvalidNamespace(String),
}

/// The run could not start.
///
/// Every variant makes the process exit with a non-zero status.
#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("connecting to {store}: {source}")]
    Connect {
        store: &'static str,
        #[source]
        source: WriteError,
    },
    #[error("preparing schema in {store}: {source}")]
    Schema {
        store: &'static str,
        #[source]
        source: WriteError,
    },
    #[error("binding metrics endpoint to {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}

/// A batch the drainer could not write. None of its records are durable
/// when the batch was written transactionally.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("batch of {records} records failed: {source}")]
pub struct BatchError {
    /// Number of records in the failed batch.
    pub records: usize,
    /// What the store reported.
    #[source]
    pub source: WriteError,
}

/// An entry could not be added to the staging queue.
#[derive(Debug, thiserror::Error)]
pub enum StagingError {
    #[error("staging queue is closed")]
    Closed,
    #[error("encoding record: {0}")]
    Encode(#[from] serde_json::Error),
}
