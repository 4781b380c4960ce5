// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License in the LICENSE file at the
// root of this repository, or online at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Statistics utilities.

/// Buckets for store write latencies, in seconds.
///
/// Local single-node stores ack most writes in the low milliseconds, so the
/// resolution is concentrated there. Anything slower than 100ms lands in the
/// implicit `+Inf` bucket.
pub const WRITE_LATENCY_BUCKETS: [f64; 7] = [0.001, 0.002, 0.004, 0.010, 0.025, 0.050, 0.100];

/// Returns a `Vec` of time buckets that are both human-readable (they are
/// powers of two in milliseconds) and cover `[min, max]`, both inclusive.
///
/// Values are rounded outwards to the nearest power of two.
pub fn histogram_seconds_buckets(min: f64, max: f64) -> Vec<f64> {
    let mut buckets = Vec::new();
    let mut bucket = 0.001;
    while bucket > min {
        bucket /= 2.0;
    }
    while bucket <= max {
        buckets.push(bucket);
        bucket *= 2.0;
    }
    if buckets.last().map_or(true, |last| *last < max) {
        buckets.push(bucket);
    }
    buckets
}
