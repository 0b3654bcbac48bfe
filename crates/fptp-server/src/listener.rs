// Copyright 2026 U.S. Federal Government (in countries where recognized)
// SPDX-License-Identifier: Apache-2.0

//! The per-interface receive task of server mode.
//!
//! A listener covers one interface with up to five socket profiles
//! (layer-2, IPv4 event/general, IPv6 event/general) and hands every
//! accepted packet to the server coordinator.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use tokio::sync::watch;

use fptp_io::{NetworkInventory, SocketProfile, SocketSpec};

use crate::config::ListenerSpec;
use crate::coordinator::ServerCoordinator;

/// One interface's receive task.
pub struct Listener {
    spec: ListenerSpec,
    invalid: bool,
}

impl Listener {
    /// Create a listener, checking that its interface exists.
    pub fn new(spec: ListenerSpec, inventory: &dyn NetworkInventory) -> Self {
        let invalid = !inventory.has_interface(&spec.interface);
        if invalid {
            warn!(
                "listener on {} will not be used, interface not found",
                spec.interface
            );
        }
        Listener { spec, invalid }
    }

    /// Whether the listener was rejected at construction.
    pub fn invalid(&self) -> bool {
        self.invalid
    }

    /// The interface this listener covers.
    pub fn interface(&self) -> &str {
        &self.spec.interface
    }

    /// The five socket profiles of this listener.
    pub fn socket_specs(&self) -> Vec<SocketSpec> {
        let level = Some(self.spec.timestamp_level);
        vec![
            SocketSpec {
                interface: self.spec.interface.clone(),
                profile: SocketProfile::Layer2,
                port: 0,
                timestamp_level: level,
            },
            SocketSpec {
                interface: self.spec.interface.clone(),
                profile: SocketProfile::Ipv4Event,
                port: self.spec.event_port,
                timestamp_level: level,
            },
            SocketSpec {
                interface: self.spec.interface.clone(),
                profile: SocketProfile::Ipv4General,
                port: self.spec.general_port,
                timestamp_level: None,
            },
            SocketSpec {
                interface: self.spec.interface.clone(),
                profile: SocketProfile::Ipv6Event,
                port: self.spec.event_port,
                timestamp_level: level,
            },
            SocketSpec {
                interface: self.spec.interface.clone(),
                profile: SocketProfile::Ipv6General,
                port: self.spec.general_port,
                timestamp_level: None,
            },
        ]
    }

    /// Receive until `stop` flips to true, feeding the coordinator.
    pub async fn run(
        self,
        coordinator: Arc<ServerCoordinator>,
        inventory: Arc<dyn NetworkInventory>,
        stop: watch::Receiver<bool>,
    ) {
        if self.invalid {
            return;
        }
        let specs = self.socket_specs();
        debug!("listener on {} running", self.spec.interface);
        while !*stop.borrow() {
            match inventory.recv(&specs, Duration::from_millis(100)).await {
                Ok(packets) if packets.is_empty() => {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
                Ok(packets) => {
                    for packet in packets {
                        coordinator.on_packet(packet).await;
                    }
                }
                Err(e) => {
                    warn!("listener on {}: receive failed: {e}", self.spec.interface);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
        debug!("listener on {} stopped", self.spec.interface);
    }
}
