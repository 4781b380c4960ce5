// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Bounds the number of writes that are outstanding at once.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::ConfigError;

/// The default bound for the async variant.
pub const DEFAULT_MAX_IN_FLIGHT: usize = 1024;

/// A counting semaphore sized to the maximum number of in-flight writes.
///
/// Waiters are admitted in FIFO order, so a waiting producer is never
/// starved. Cloning yields a handle to the same limiter.
#[derive(Debug, Clone)]
pub struct InFlightLimiter {
    semaphore: Arc<Semaphore>,
    max: usize,
    peak: Arc<AtomicUsize>,
}

impl InFlightLimiter {
    /// Returns a limiter admitting at most `max` concurrent holders.
    pub fn new(max: usize) -> Result<Self, ConfigError> {
        if max == 0 {
            return Err(ConfigError::ZeroMaxInFlight);
        }
        if max > Semaphore::MAX_PERMITS {
            return Err(ConfigError::MaxInFlightTooLarge(
                max,
                Semaphore::MAX_PERMITS,
            ));
        }
        Ok(InFlightLimiter {
            semaphore: Arc::new(Semaphore::new(max)),
            max,
            peak: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Waits until a permit is available and takes it.
    pub async fn acquire(&self) -> InFlightPermit {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .expect("in-flight semaphore is never closed");
        self.peak.fetch_max(self.outstanding(), Ordering::Relaxed);
        InFlightPermit { _permit: permit }
    }

    /// The configured bound.
    pub fn max(&self) -> usize {
        self.max
    }

    /// The number of permits currently held.
    pub fn outstanding(&self) -> usize {
        self.max - self.semaphore.available_permits()
    }

    /// The highest number of permits ever held at once.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::Relaxed)
    }
}

/// A held slot of an [InFlightLimiter]. The slot is returned when this is
/// released or dropped, whichever happens first.
#[derive(Debug)]
#[must_use = "a permit is returned to the limiter as soon as it is dropped"]
pub struct InFlightPermit {
    _permit: OwnedSemaphorePermit,
}

impl InFlightPermit {
    /// Returns the slot to the limiter.
    pub fn release(self) {
        drop(self)
    }
}
