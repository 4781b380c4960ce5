// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Write errors.

/// A terminal error for one write (or one batch of writes).
///
/// Retries, if any, happen inside the [crate::Writer] implementation; by the
/// time one of these is returned the write is considered done.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WriteError {
    /// The connection to the store was lost or could not be established.
    #[error("transport error: {0}")]
    Transport(String),
    /// The store received the write and rejected it.
    #[error("backend rejected write: {0}")]
    Backend(String),
    /// The store did not acknowledge the write in time.
    #[error("write timed out: {0}")]
    Timeout(String),
}

impl WriteError {
    /// A short, stable label for this kind of error, suitable for use as a
    /// metric label value.
    pub fn kind(&self) -> &'static str {
        match self {
            WriteError::Transport(_) => "transport",
            WriteError::Backend(_) => "backend",
            WriteError::Timeout(_) => "timeout",
        }
    }

    /// Whether the connection to the store failed.
    pub fn is_transport(&self) -> bool {
        matches!(self, WriteError::Transport(_))
    }

    /// Whether the store rejected the write.
    pub fn is_backend(&self) -> bool {
        matches!(self, WriteError::Backend(_))
    }

    /// Whether the store did not acknowledge the write in time.
    pub fn is_timeout(&self) -> bool {
        matches!(self, WriteError::Timeout(_))
    }

    /// All values [WriteError::kind] can return.
    pub const KINDS: [&'static str; 3] = ["transport", "backend", "timeout"];
}

impl From<tokio_postgres::Error> for WriteError {
    fn from(e: tokio_postgres::Error) -> Self {
        match e.as_db_error() {
            Some(db) => WriteError::Backend(format!("{}: {}", db.code().code(), db.message())),
            None => WriteError::Transport(e.to_string()),
        }
    }
}

impl From<deadpool_postgres::PoolError> for WriteError {
    fn from(e: deadpool_postgres::PoolError) -> Self {
        match e {
            deadpool_postgres::PoolError::Backend(e) => WriteError::from(e),
            deadpool_postgres::PoolError::Timeout(t) => {
                WriteError::Timeout(format!("waiting for pooled connection ({:?})", t))
            }
            e => WriteError::Transport(e.to_string()),
        }
    }
}

impl From<scylla::transport::errors::QueryError> for WriteError {
    fn from(e: scylla::transport::errors::QueryError) -> Self {
        use scylla::transport::errors::QueryError;
        match e {
            QueryError::DbError(db, msg) => WriteError::Backend(format!("{}: {}", db, msg)),
            QueryError::RequestTimeout(msg) => WriteError::Timeout(msg),
            e => WriteError::Transport(e.to_string()),
        }
    }
}
