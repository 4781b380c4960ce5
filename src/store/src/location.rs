// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! The abstraction over a datastore that load is generated against.

use std::fmt::Debug;

use async_trait::async_trait;
use futures::future::BoxFuture;

use crate::error::WriteError;
use crate::record::Record;

/// The acknowledgement of a successful write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack {
    /// How many rows the store made durable.
    pub rows: u64,
}

/// The handle returned by [Writer::submit] and [Writer::submit_batch].
///
/// It resolves exactly once, with either an [Ack] or a terminal
/// [WriteError]. It is `'static` so that callers can drive it on a task of
/// their own.
pub type WriteFuture = BoxFuture<'static, Result<Ack, WriteError>>;

/// A capability to write [Record]s into a store.
///
/// Implementations may multiplex any number of outstanding submissions over
/// their connections. There is no ordering guarantee between two concurrent
/// submissions.
#[async_trait]
pub trait Writer: Debug + Send + Sync + 'static {
    /// A short name for the store, used in log lines.
    fn name(&self) -> &'static str;

    /// Creates the namespace and `messages` table if they don't exist.
    ///
    /// Idempotent; safe to call on every startup.
    async fn ensure_schema(&self) -> Result<(), WriteError>;

    /// Removes every row from the `messages` table.
    async fn truncate(&self) -> Result<(), WriteError>;

    /// Submits a single record without waiting for it to be acknowledged.
    ///
    /// Errors that happen before anything is sent are reported through the
    /// returned future, never by panicking.
    fn submit(&self, record: Record) -> WriteFuture;

    /// Submits a batch of records.
    ///
    /// When `tx` is true the batch is all-or-nothing: a successful [Ack]
    /// means every record is durable, an error means none is.
    fn submit_batch(&self, records: Vec<Record>, tx: bool) -> WriteFuture;
}
