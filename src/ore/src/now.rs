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

//! Now utilities.

use std::fmt;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// A type representing the number of milliseconds since the Unix epoch.
pub type EpochMillis = i64;

/// A function that returns system or mocked time.
///
/// Record timestamps use wall-clock time from a `NowFn`; latency
/// measurements never do, they use the monotonic [`std::time::Instant`].
#[derive(Clone)]
pub struct NowFn(Arc<dyn Fn() -> EpochMillis + Send + Sync>);

impl NowFn {
    /// Returns now in milliseconds since the Unix epoch.
    pub fn now(&self) -> EpochMillis {
        (self.0)()
    }
}

impl fmt::Debug for NowFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<now_fn>")
    }
}

impl<F> From<F> for NowFn
where
    F: Fn() -> EpochMillis + Send + Sync + 'static,
{
    fn from(f: F) -> NowFn {
        NowFn(Arc::new(f))
    }
}

fn system_time() -> EpochMillis {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis());
    EpochMillis::try_from(millis).unwrap_or(EpochMillis::MAX)
}

/// A [`NowFn`] that returns the actual system time.
pub fn system_time_fn() -> NowFn {
    NowFn::from(system_time)
}

/// A [`NowFn`] that always returns zero.
///
/// For use in tests.
pub fn now_zero() -> NowFn {
    NowFn::from(|| 0)
}
