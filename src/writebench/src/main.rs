// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Generates write load against a datastore.

use std::process;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use wb_ore::tracing::StderrLogConfig;
use writebench::config::Args;
use writebench::Harness;

#[tokio::main]
async fn main() {
    let args: Args = wb_ore::cli::parse_args();
    if let Err(err) = run(args).await {
        eprintln!("writebench: fatal: {:#}", err);
        process::exit(1);
    }
}

async fn run(args: Args) -> Result<(), anyhow::Error> {
    let config = args.into_config()?;
    wb_ore::tracing::configure(StderrLogConfig {
        prefix: None,
        filter: config.log_filter.clone(),
    })
    .context("configuring logging")?;

    let linger = config.linger;
    let harness = Harness::setup(config).await?;
    println!(
        "Metrics available at http://{}/metrics",
        harness.scrape_addr()
    );

    let shutdown = CancellationToken::new();
    let interrupt = wb_ore::task::spawn(|| "interrupt_handler", {
        let shutdown = shutdown.clone();
        async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    warn!("interrupted; stopping");
                    shutdown.cancel();
                }
                Err(e) => warn!("unable to listen for interrupts: {}", e),
            }
        }
    });

    let report = harness.run(shutdown.clone()).await;
    println!("{report}");

    if !linger.is_zero() && !shutdown.is_cancelled() {
        info!(
            "serving final metrics for {}",
            humantime::format_duration(linger)
        );
        tokio::select! {
            _ = tokio::time::sleep(linger) => {}
            _ = shutdown.cancelled() => {}
        }
    }
    interrupt.abort();
    harness.shutdown().await;
    Ok(())
}
