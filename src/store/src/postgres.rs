// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Implementation of [Writer] backed by Postgres.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use deadpool_postgres::tokio_postgres::{Client, Config, NoTls};
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use tracing::info;
use uuid::Uuid;
use wb_ore::now::EpochMillis;

use crate::cfg::PostgresConfig;
use crate::error::WriteError;
use crate::location::{Ack, WriteFuture, Writer};
use crate::record::Record;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS messages (
    id UUID PRIMARY KEY,
    content TEXT,
    timestamp BIGINT
)
";

const INSERT: &str = "INSERT INTO messages (id, content, timestamp) VALUES ($1, $2, $3)";

/// Inserts a whole batch in one statement, and therefore one network round
/// trip, by shipping each column as an array parameter.
const INSERT_BATCH: &str = "
INSERT INTO messages (id, content, timestamp)
SELECT * FROM UNNEST($1::uuid[], $2::text[], $3::bigint[])
";

/// Implementation of [Writer] over a pool of Postgres connections.
///
/// A single-record submission is an autocommit `INSERT`, so every record pays
/// for its own commit. Batches pay for one commit in total.
#[derive(Clone)]
pub struct PostgresWriter {
    pool: Pool,
    request_timeout: Duration,
}

impl std::fmt::Debug for PostgresWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresWriter")
            .field("request_timeout", &self.request_timeout)
            .finish_non_exhaustive()
    }
}

impl PostgresWriter {
    /// Opens a connection pool with `config` and checks that a connection can
    /// be established.
    pub async fn open(config: PostgresConfig) -> Result<Self, WriteError> {
        let mut pg_config = Config::new();
        pg_config
            .host(&config.host)
            .port(config.port)
            .dbname(&config.database)
            .user(&config.user)
            .password(&config.password)
            .connect_timeout(config.request_timeout);
        let manager = Manager::from_config(
            pg_config,
            NoTls,
            ManagerConfig {
                recycling_method: RecyclingMethod::Fast,
            },
        );
        let pool = Pool::builder(manager)
            .max_size(config.pool_size)
            .build()
            .map_err(|e| WriteError::Transport(e.to_string()))?;

        // Surface bad addresses and credentials now rather than on the first
        // write.
        drop(pool.get().await?);
        info!(
            "connected to postgres at {}:{}/{} (pool size {})",
            config.host, config.port, config.database, config.pool_size
        );

        Ok(PostgresWriter {
            pool,
            request_timeout: config.request_timeout,
        })
    }
}

async fn with_timeout<F, T>(timeout: Duration, f: F) -> Result<T, WriteError>
where
    F: Future<Output = Result<T, WriteError>>,
{
    match tokio::time::timeout(timeout, f).await {
        Ok(res) => res,
        Err(_) => Err(WriteError::Timeout(format!("no ack after {:?}", timeout))),
    }
}

fn columns(records: Vec<Record>) -> (Vec<Uuid>, Vec<String>, Vec<EpochMillis>) {
    let mut ids = Vec::with_capacity(records.len());
    let mut contents = Vec::with_capacity(records.len());
    let mut timestamps = Vec::with_capacity(records.len());
    for record in records {
        ids.push(record.id);
        contents.push(record.content);
        timestamps.push(record.timestamp);
    }
    (ids, contents, timestamps)
}

#[async_trait]
impl Writer for PostgresWriter {
    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn ensure_schema(&self) -> Result<(), WriteError> {
        let client = self.pool.get().await?;
        client.batch_execute(SCHEMA).await?;
        Ok(())
    }

    async fn truncate(&self) -> Result<(), WriteError> {
        let client = self.pool.get().await?;
        client.batch_execute("TRUNCATE TABLE messages").await?;
        Ok(())
    }

    fn submit(&self, record: Record) -> WriteFuture {
        let pool = self.pool.clone();
        Box::pin(with_timeout(self.request_timeout, async move {
            let client = pool.get().await?;
            let statement = client.prepare_cached(INSERT).await?;
            let rows = client
                .execute(
                    &statement,
                    &[&record.id, &record.content, &record.timestamp],
                )
                .await?;
            Ok(Ack { rows })
        }))
    }

    fn submit_batch(&self, records: Vec<Record>, tx: bool) -> WriteFuture {
        let pool = self.pool.clone();
        Box::pin(with_timeout(self.request_timeout, async move {
            let (ids, contents, timestamps) = columns(records);
            let mut client = pool.get().await?;
            let client: &mut Client = &mut client;
            let rows = if tx {
                let txn = client.transaction().await?;
                let rows = txn
                    .execute(INSERT_BATCH, &[&ids, &contents, &timestamps])
                    .await?;
                // Dropping an uncommitted transaction rolls it back, so any
                // early return above leaves nothing behind.
                txn.commit().await?;
                rows
            } else {
                client
                    .execute(INSERT_BATCH, &[&ids, &contents, &timestamps])
                    .await?
            };
            Ok(Ack { rows })
        }))
    }
}
