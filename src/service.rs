// Copyright 2026 U.S. Federal Government (in countries where recognized)
// SPDX-License-Identifier: Apache-2.0

//! Assembly and lifecycle of the running service.
//!
//! Client and server mode each run on their own coordinator task, sharing
//! the network inventory. When both run, their coordinators are
//! cross-wired so request-sequence packets landing on client sockets (and
//! vice versa) reach the right side. Shutdown is a watch flag every task
//! observes within its 100 ms loop granularity.

use std::sync::Arc;

use log::info;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use fptp_client::ClientCoordinator;
use fptp_io::{ClockRegistry, NetworkInventory};
use fptp_server::ServerCoordinator;

use crate::config::ResolvedConfig;

/// The running service.
pub struct Service {
    stop_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl Service {
    /// Start the configured modes.
    pub fn start(
        config: ResolvedConfig,
        inventory: Arc<dyn NetworkInventory>,
        clocks: Arc<dyn ClockRegistry>,
    ) -> Service {
        let (stop_tx, stop_rx) = watch::channel(false);
        let mut handles = Vec::new();

        let server = config
            .server
            .filter(|server| server.enabled)
            .map(|server| Arc::new(ServerCoordinator::new(server, inventory.clone())));

        let client = config
            .client
            .filter(|client| client.enabled)
            .map(|client| ClientCoordinator::new(client, inventory, clocks));

        match (client, server) {
            (Some(mut client), Some(server)) => {
                client.set_peer(server.inbox());
                server.set_peer(client.inbox());
                handles.push(tokio::spawn(client.run(stop_rx.clone())));
                handles.push(tokio::spawn(server.run(stop_rx)));
            }
            (Some(client), None) => {
                handles.push(tokio::spawn(client.run(stop_rx)));
            }
            (None, Some(server)) => {
                handles.push(tokio::spawn(server.run(stop_rx)));
            }
            (None, None) => {
                info!("neither client nor server mode is enabled");
            }
        }

        Service { stop_tx, handles }
    }

    /// Whether any mode is running.
    pub fn running(&self) -> bool {
        !self.handles.is_empty()
    }

    /// Signal shutdown and wait for the coordinator tasks.
    pub async fn stop(self) {
        let _ = self.stop_tx.send(true);
        for handle in self.handles {
            let _ = handle.await;
        }
        info!("service stopped");
    }
}
