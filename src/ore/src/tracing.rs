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

//! Tracing utilities.
//!
//! Binaries call [`configure`] once at startup. Events go to stderr as text
//! lines; stdout is left to the binaries for their reports.

use std::io::{self, IsTerminal};

use tracing::{Event, Subscriber};
use tracing_subscriber::filter::Targets;
use tracing_subscriber::fmt::format::{format, Writer};
use tracing_subscriber::fmt::{self, FmtContext, FormatEvent, FormatFields, MakeWriter};
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;

/// The filter used when none is configured.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Application tracing configuration.
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Configuration of the stderr log.
    pub stderr_log: StderrLogConfig,
}

/// Configures the stderr log.
#[derive(Debug, Clone)]
pub struct StderrLogConfig {
    /// An optional prefix for each stderr log line.
    pub prefix: Option<String>,
    /// A filter which determines which events are emitted to the log.
    pub filter: Targets,
}

impl From<StderrLogConfig> for TracingConfig {
    fn from(stderr_log: StderrLogConfig) -> TracingConfig {
        TracingConfig { stderr_log }
    }
}

/// Installs the global subscriber.
///
/// Returns an error if a global subscriber has already been installed.
pub fn configure<C>(config: C) -> Result<(), anyhow::Error>
where
    C: Into<TracingConfig>,
{
    let config = config.into();
    tracing_subscriber::registry()
        .with(stderr_log_layer(
            config.stderr_log,
            io::stderr,
            io::stderr().is_terminal(),
        ))
        .try_init()?;
    Ok(())
}

fn stderr_log_layer<S, W>(config: StderrLogConfig, writer: W, ansi: bool) -> impl Layer<S>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    fmt::layer()
        .event_format(PrefixFormat {
            inner: format(),
            prefix: config.prefix,
        })
        .with_writer(writer)
        .with_ansi(ansi)
        .with_filter(config.filter)
}

/// A wrapper around a [`FormatEvent`] that adds an optional prefix to each
/// event.
#[derive(Debug)]
pub struct PrefixFormat<F> {
    inner: F,
    prefix: Option<String>,
}

impl<F, C, N> FormatEvent<C, N> for PrefixFormat<F>
where
    C: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
    F: FormatEvent<C, N>,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, C, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> std::fmt::Result {
        if let Some(prefix) = &self.prefix {
            write!(writer, "{}: ", prefix)?;
        }
        self.inner.format_event(ctx, writer, event)
    }
}
