// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Write-throughput benchmarking for relational and wide-column stores.
//!
//! Three write paths are provided, selected by [config::Variant]:
//!
//! * **naive**: one write at a time, each awaited before the next.
//! * **async**: an [pump::AsyncPump] keeping up to `max_in_flight` writes
//!   outstanding, bounded by an [limiter::InFlightLimiter].
//! * **staged**: records are encoded onto a [staging::StagingQueue] and a
//!   [drainer::BatchDrainer] writes them to the store in batches.
//!
//! Every path exports Prometheus metrics through [http::MetricsServer].

pub mod config;
pub mod drainer;
pub mod error;
pub mod harness;
pub mod http;
pub mod limiter;
pub mod metrics;
pub mod pump;
pub mod reporter;
pub mod staging;

pub use crate::harness::{Harness, Report};
