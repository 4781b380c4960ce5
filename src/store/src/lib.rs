// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Storage writers for writebench.
//!
//! A [Writer] is the only thing the load generator knows about a datastore:
//! it can create the schema, submit a single [Record] and submit a batch of
//! them. Everything else (sockets, pools, driver retries) is owned by the
//! implementation.

#![warn(missing_docs)]

pub mod cfg;
pub mod cql;
pub mod error;
pub mod location;
pub mod mem;
pub mod postgres;
pub mod record;

pub use crate::error::WriteError;
pub use crate::location::{Ack, WriteFuture, Writer};
pub use crate::record::{PayloadFactory, Record, RecordFactory};
