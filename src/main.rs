// Copyright 2026 U.S. Federal Government (in countries where recognized)
// SPDX-License-Identifier: Apache-2.0

//! fptpd, the unicast PTP client/server time synchronization daemon.
//!
//! Usage: `fptpd <config.json>`. Logging is configured through the
//! standard `RUST_LOG` environment variable.

mod config;
mod service;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use log::{error, info};

use fptp_io::{ClockRegistry, NetworkInventory};

use crate::config::Config;
use crate::service::Service;

fn clock_registry() -> Arc<dyn ClockRegistry> {
    #[cfg(target_os = "linux")]
    {
        Arc::new(fptp_io::unix::SystemClockRegistry::new())
    }
    #[cfg(not(target_os = "linux"))]
    {
        Arc::new(fptp_io::DryRunRegistry::new())
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let Some(path) = std::env::args().nth(1).map(PathBuf::from) else {
        eprintln!("usage: fptpd <config.json>");
        return ExitCode::FAILURE;
    };

    let config = match Config::load(&path).and_then(|config| config.resolve()) {
        Ok(config) => config,
        Err(errs) => {
            for err in errs {
                error!("{err}");
            }
            return ExitCode::FAILURE;
        }
    };

    let udp = match fptp_io::udp::UdpInventory::new() {
        Ok(inventory) => Arc::new(inventory),
        Err(e) => {
            error!("could not enumerate network interfaces: {e}");
            return ExitCode::FAILURE;
        }
    };

    // Interfaces and addresses come and go; refresh the inventory
    // periodically.
    let refresher = udp.clone();
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(std::time::Duration::from_secs(60)).await;
            if let Err(e) = refresher.refresh() {
                log::warn!("inventory refresh failed: {e}");
            }
        }
    });

    let inventory: Arc<dyn NetworkInventory> = udp;

    let service = Service::start(config, inventory, clock_registry());
    if !service.running() {
        return ExitCode::FAILURE;
    }

    info!("fptpd running, press ctrl-c to stop");
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("could not wait for shutdown signal: {e}");
    }
    service.stop().await;
    ExitCode::SUCCESS
}
