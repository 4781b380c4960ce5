// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! The synthetic payload written by the load generator.

use serde::{Deserialize, Serialize};
use uuid::Uuid;
use wb_ore::now::{EpochMillis, NowFn};

/// Payload used when none is configured.
pub const DEFAULT_PAYLOAD: &str = "Payload";

/// One row of the `messages` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Primary key. Unique per generated record.
    pub id: Uuid,
    /// A short payload; only its shape matters.
    pub content: String,
    /// Wall-clock creation time, in milliseconds since the Unix epoch.
    pub timestamp: EpochMillis,
}

/// Produces the records for a run.
pub trait RecordFactory: Send {
    /// Returns the next record. Every call must return a record with an id
    /// that has not been returned before.
    fn next_record(&mut self) -> Record;
}

/// A [RecordFactory] that stamps each record with a fresh v4 UUID, a fixed
/// payload, and the current wall-clock time.
#[derive(Debug, Clone)]
pub struct PayloadFactory {
    content: String,
    now: NowFn,
}

impl PayloadFactory {
    /// Returns a new factory emitting `content` as every record's payload.
    pub fn new(content: impl Into<String>, now: NowFn) -> Self {
        PayloadFactory {
            content: content.into(),
            now,
        }
    }
}

impl RecordFactory for PayloadFactory {
    fn next_record(&mut self) -> Record {
        Record {
            id: Uuid::new_v4(),
            content: self.content.clone(),
            timestamp: self.now.now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use wb_ore::now::now_zero;

    use super::*;

    #[test]
    fn payload_factory_ids_are_unique() {
        let mut factory = PayloadFactory::new("Payload", now_zero());
        let ids: BTreeSet<_> = (0..10_000).map(|_| factory.next_record().id).collect();
        assert_eq!(ids.len(), 10_000);
    }

    #[test]
    fn record_json_shape() {
        let record = Record {
            id: Uuid::nil(),
            content: "Hello World Payload".into(),
            timestamp: 1_700_000_000_000,
        };
        let json = serde_json::to_string(&record).expect("serializable");
        assert_eq!(
            json,
            r#"{"id":"00000000-0000-0000-0000-000000000000","content":"Hello World Payload","timestamp":1700000000000}"#
        );
    }
}
