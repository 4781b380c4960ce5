// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Periodic progress lines.

use std::fmt;
use std::time::Duration;

use tokio::time::Instant;
use tracing::info;
use wb_ore::cast::CastLossy;
use wb_ore::metrics::Histogram;

use crate::metrics::mean_seconds;

/// Logs a [Progress] line every `every` completions.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    total: u64,
    every: u64,
    start: Instant,
    latency: Histogram,
}

impl ProgressReporter {
    /// Returns a reporter for a run of `total` operations that started at
    /// `start`. The average latency is read from `latency`.
    ///
    /// An `every` of zero is treated as one.
    pub fn new(total: u64, every: u64, start: Instant, latency: Histogram) -> Self {
        ProgressReporter {
            total,
            every: every.max(1),
            start,
            latency,
        }
    }

    /// Records that `completed` operations have now completed, logging a
    /// progress line if that is a multiple of the reporting interval.
    pub fn on_completion(&self, completed: u64) -> Option<Progress> {
        self.on_advance(completed.saturating_sub(1), completed)
    }

    /// Records that the completed count moved from `before` to `after`,
    /// logging a progress line if a multiple of the reporting interval was
    /// reached on the way.
    pub fn on_advance(&self, before: u64, after: u64) -> Option<Progress> {
        if after <= before || before / self.every == after / self.every {
            return None;
        }
        let progress = self.snapshot(after);
        info!("{progress}");
        Some(progress)
    }

    /// Returns the progress as of now.
    pub fn snapshot(&self, completed: u64) -> Progress {
        Progress {
            completed,
            total: self.total,
            elapsed: self.start.elapsed(),
            avg_latency: Duration::from_secs_f64(mean_seconds(&self.latency)),
        }
    }
}

/// A point-in-time view of a run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Progress {
    pub completed: u64,
    pub total: u64,
    pub elapsed: Duration,
    pub avg_latency: Duration,
}

impl Progress {
    /// Completions per second, or zero if no time has passed.
    pub fn throughput(&self) -> f64 {
        throughput(self.completed, self.elapsed)
    }
}

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "progress: {}/{} | elapsed: {} ms | avg latency: {:.3} ms | throughput: {:.2} req/s",
            Thousands(self.completed),
            Thousands(self.total),
            self.elapsed.as_millis(),
            millis(self.avg_latency),
            self.throughput(),
        )
    }
}

pub(crate) fn throughput(n: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 {
        f64::cast_lossy(n) / secs
    } else {
        0.0
    }
}

pub(crate) fn millis(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

/// Formats an integer with `,` between groups of three digits.
pub(crate) struct Thousands(pub u64);

impl fmt::Display for Thousands {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let digits = self.0.to_string();
        for (i, c) in digits.chars().enumerate() {
            if i > 0 && (digits.len() - i) % 3 == 0 {
                f.write_str(",")?;
            }
            write!(f, "{c}")?;
        }
        Ok(())
    }
}
