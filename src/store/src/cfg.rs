// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Configuration for the store connections.

use std::fmt;
use std::time::Duration;

/// How to connect to the relational store.
#[derive(Clone)]
pub struct PostgresConfig {
    /// Host name of the server.
    pub host: String,
    /// TCP port of the server.
    pub port: u16,
    /// Database holding the `messages` table.
    pub database: String,
    /// User to authenticate as.
    pub user: String,
    /// Password to authenticate with.
    pub password: String,
    /// Maximum number of pooled connections.
    pub pool_size: usize,
    /// How long a single write may take before it fails with
    /// [crate::WriteError::Timeout].
    pub request_timeout: Duration,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        PostgresConfig {
            host: "localhost".into(),
            port: 5432,
            database: "whatsapp_db".into(),
            user: "ajay".into(),
            password: "password".into(),
            pool_size: 50,
            request_timeout: Duration::from_secs(10),
        }
    }
}

// Hand-written so the password never ends up in a log line.
impl fmt::Debug for PostgresConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("pool_size", &self.pool_size)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

/// How to connect to the wide-column store.
#[derive(Debug, Clone)]
pub struct CqlConfig {
    /// Host name of a contact point.
    pub host: String,
    /// CQL native protocol port of the contact point.
    pub port: u16,
    /// The local datacenter, preferred by the load balancing policy.
    pub datacenter: String,
    /// Keyspace holding the `messages` table.
    pub keyspace: String,
    /// How long a single request may take before it fails with
    /// [crate::WriteError::Timeout].
    pub request_timeout: Duration,
}

impl Default for CqlConfig {
    fn default() -> Self {
        CqlConfig {
            host: "localhost".into(),
            port: 9042,
            datacenter: "datacenter1".into(),
            keyspace: "whatsapp".into(),
            request_timeout: Duration::from_secs(10),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn postgres_debug_redacts_password() {
        let config = PostgresConfig {
            password: "hunter2".into(),
            ..Default::default()
        };
        let debug = format!("{:?}", config);
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("whatsapp_db"));
    }
}
