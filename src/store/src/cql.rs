// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Implementation of [Writer] backed by a CQL (Cassandra-compatible)
//! wide-column store.

use std::sync::Arc;

use async_trait::async_trait;
use scylla::batch::{Batch, BatchType};
use scylla::load_balancing::DefaultPolicy;
use scylla::prepared_statement::PreparedStatement;
use scylla::{ExecutionProfile, Session, SessionBuilder};
use tokio::sync::OnceCell;
use tracing::info;
use wb_ore::cast::CastFrom;

use crate::cfg::CqlConfig;
use crate::error::WriteError;
use crate::location::{Ack, WriteFuture, Writer};
use crate::record::Record;

struct CqlInner {
    session: Session,
    keyspace: String,
    // Prepared lazily: the table may not exist until `ensure_schema`.
    insert: OnceCell<PreparedStatement>,
}

impl CqlInner {
    async fn insert_statement(&self) -> Result<&PreparedStatement, WriteError> {
        self.insert
            .get_or_try_init(|| async {
                let query = format!(
                    "INSERT INTO {}.messages (id, content, timestamp) VALUES (?, ?, ?)",
                    self.keyspace
                );
                Ok::<_, WriteError>(self.session.prepare(query).await?)
            })
            .await
    }
}

/// Implementation of [Writer] over a CQL session.
///
/// The driver multiplexes every outstanding request over its per-node
/// connection pools, so [Writer::submit] is cheap and many submissions can be
/// in flight at once. A transactional batch is a `LOGGED` batch.
#[derive(Clone)]
pub struct CqlWriter {
    inner: Arc<CqlInner>,
}

impl std::fmt::Debug for CqlWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CqlWriter")
            .field("keyspace", &self.inner.keyspace)
            .finish_non_exhaustive()
    }
}

impl CqlWriter {
    /// Connects to the cluster through the contact point in `config`.
    pub async fn open(config: CqlConfig) -> Result<Self, WriteError> {
        let policy = DefaultPolicy::builder()
            .prefer_datacenter(config.datacenter.clone())
            .build();
        let profile = ExecutionProfile::builder()
            .load_balancing_policy(policy)
            .request_timeout(Some(config.request_timeout))
            .build();
        let session = SessionBuilder::new()
            .known_node(format!("{}:{}", config.host, config.port))
            .default_execution_profile_handle(profile.into_handle())
            .build()
            .await
            .map_err(|e| WriteError::Transport(e.to_string()))?;
        info!(
            "connected to cql cluster via {}:{} (local datacenter {})",
            config.host, config.port, config.datacenter
        );
        Ok(CqlWriter {
            inner: Arc::new(CqlInner {
                session,
                keyspace: config.keyspace,
                insert: OnceCell::new(),
            }),
        })
    }
}

#[async_trait]
impl Writer for CqlWriter {
    fn name(&self) -> &'static str {
        "cassandra"
    }

    async fn ensure_schema(&self) -> Result<(), WriteError> {
        let keyspace = &self.inner.keyspace;
        // Replication factor 1: the target is a single local node.
        self.inner
            .session
            .query(
                format!(
                    "CREATE KEYSPACE IF NOT EXISTS {} WITH replication = \
                     {{'class': 'SimpleStrategy', 'replication_factor': 1}}",
                    keyspace
                ),
                (),
            )
            .await?;
        self.inner
            .session
            .query(
                format!(
                    "CREATE TABLE IF NOT EXISTS {}.messages \
                     (id uuid PRIMARY KEY, content text, timestamp bigint)",
                    keyspace
                ),
                (),
            )
            .await?;
        Ok(())
    }

    async fn truncate(&self) -> Result<(), WriteError> {
        self.inner
            .session
            .query(format!("TRUNCATE {}.messages", self.inner.keyspace), ())
            .await?;
        Ok(())
    }

    fn submit(&self, record: Record) -> WriteFuture {
        let inner = Arc::clone(&self.inner);
        Box::pin(async move {
            let insert = inner.insert_statement().await?;
            inner
                .session
                .execute(insert, (record.id, record.content, record.timestamp))
                .await?;
            Ok(Ack { rows: 1 })
        })
    }

    fn submit_batch(&self, records: Vec<Record>, tx: bool) -> WriteFuture {
        let inner = Arc::clone(&self.inner);
        Box::pin(async move {
            let insert = inner.insert_statement().await?;
            let mut batch = Batch::new(if tx {
                BatchType::Logged
            } else {
                BatchType::Unlogged
            });
            let mut values = Vec::with_capacity(records.len());
            for record in records {
                batch.append_statement(insert.clone());
                values.push((record.id, record.content, record.timestamp));
            }
            let rows = u64::cast_from(values.len());
            inner.session.batch(&batch, values).await?;
            Ok(Ack { rows })
        })
    }
}
