// Copyright 2026 U.S. Federal Government (in countries where recognized)
// SPDX-License-Identifier: Apache-2.0

//! The client coordinator task.
//!
//! Owns the server workers, the selector and the adjusters. Each loop
//! iteration performs pending adjustments, then receives response packets
//! for up to 100 ms and dispatches them to the worker whose server sent
//! them. Once per second it resets the selector-driven state of servers
//! whose clock has no adjuster and rewrites the optional state table.
//!
//! Packets that turn out to belong to request sequences (this host also
//! runs server mode) are forwarded to the server coordinator through a
//! channel, and the server side forwards response packets here the same
//! way.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, info, trace, warn};
use tokio::sync::{mpsc, watch};

use fptp_io::{ClockRegistry, NetworkInventory, ReceivedPacket, SocketSpec};
use fptp_proto::{Message, ResponseTlv, TlvKind, tlv};

use crate::adjustment::Adjuster;
use crate::config::ResolvedClientMode;
use crate::selection::Selector;
use crate::worker::{ServerState, ServerWorker};

const STATE_TABLE_WIDTH: usize = 114;

/// Builds the header of the state table.
fn state_table_header() -> String {
    let mut table = format!(
        "{:<2}{:<18}{:<11}{:<28}{:<9}{:<7}{:<13}{:<13}{:<13}\n",
        "", "server", "clock", "p1/cc/ca/cv/p2/sr", "reach", "intv", "delay", "offset", "stdDev",
    );
    table.push_str(&"=".repeat(STATE_TABLE_WIDTH));
    table.push('\n');
    table
}

/// The client-mode coordinator.
pub struct ClientCoordinator {
    workers: Vec<Arc<ServerWorker>>,
    selector: Selector,
    adjusters: Vec<Adjuster>,
    inventory: Arc<dyn NetworkInventory>,
    clocks: Arc<dyn ClockRegistry>,
    state_file: Option<PathBuf>,
    state_table: bool,
    inbox_tx: mpsc::UnboundedSender<ReceivedPacket>,
    inbox_rx: mpsc::UnboundedReceiver<ReceivedPacket>,
    peer: Option<mpsc::UnboundedSender<ReceivedPacket>>,
}

impl ClientCoordinator {
    /// Assemble the coordinator from a resolved configuration.
    pub fn new(
        resolved: ResolvedClientMode,
        inventory: Arc<dyn NetworkInventory>,
        clocks: Arc<dyn ClockRegistry>,
    ) -> Self {
        let workers = resolved
            .workers
            .into_iter()
            .map(|config| Arc::new(ServerWorker::new(config, &*inventory)))
            .collect();
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        ClientCoordinator {
            workers,
            selector: resolved.selector,
            adjusters: resolved.adjusters,
            inventory,
            clocks,
            state_file: resolved.state_file,
            state_table: resolved.state_table,
            inbox_tx,
            inbox_rx,
            peer: None,
        }
    }

    /// The workers, for telemetry consumers.
    pub fn workers(&self) -> &[Arc<ServerWorker>] {
        &self.workers
    }

    /// Sender through which the server coordinator forwards response
    /// packets it received.
    pub fn inbox(&self) -> mpsc::UnboundedSender<ReceivedPacket> {
        self.inbox_tx.clone()
    }

    /// Where to forward request-sequence packets (the server coordinator's
    /// inbox).
    pub fn set_peer(&mut self, peer: mpsc::UnboundedSender<ReceivedPacket>) {
        self.peer = Some(peer);
    }

    /// Run client mode until `stop` flips to true.
    pub async fn run(mut self, stop: watch::Receiver<bool>) {
        let mut specs: Vec<SocketSpec> = Vec::new();
        for worker in &self.workers {
            if worker.invalid() {
                continue;
            }
            for spec in worker.socket_specs() {
                if !specs.contains(&spec) {
                    specs.push(spec);
                }
            }
            tokio::spawn(
                worker
                    .clone()
                    .run(self.inventory.clone(), stop.clone()),
            );
        }
        info!(
            "client mode running, {} servers, {} adjustments",
            self.workers.len(),
            self.adjusters.len()
        );

        let mut last_tick = Instant::now() - Duration::from_secs(1);
        while !*stop.borrow() {
            self.perform_adjustments();

            if last_tick.elapsed() >= Duration::from_secs(1) {
                last_tick = Instant::now();
                self.reset_unused_server_states();
                self.write_state_table();
            }

            while let Ok(packet) = self.inbox_rx.try_recv() {
                self.dispatch(packet);
            }

            match self
                .inventory
                .recv(&specs, Duration::from_millis(100))
                .await
            {
                Ok(packets) if packets.is_empty() => {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
                Ok(packets) => {
                    for packet in packets {
                        self.dispatch(packet);
                    }
                }
                Err(e) => {
                    warn!("receive failed: {e}");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
        info!("client mode stopped");
    }

    /// Route one received packet.
    pub fn dispatch(&self, packet: ReceivedPacket) {
        let Ok((msg, consumed)) = Message::decode(&packet.data) else {
            trace!("dropping malformed packet from {}", packet.src);
            return;
        };
        let region = &packet.data[consumed..];
        let kind = tlv::validate_org_ext(region);

        // Request-sequence traffic belongs to server mode.
        if !msg.is_response() || kind == Some(TlvKind::Request) {
            if let Some(peer) = &self.peer {
                let _ = peer.send(packet);
            }
            return;
        }

        let response = match kind {
            Some(TlvKind::Response) => match ResponseTlv::decode(region) {
                Ok((tlv, _)) => Some(tlv),
                Err(e) => {
                    debug!("dropping response with bad TLV from {}: {e}", packet.src);
                    return;
                }
            },
            _ => None,
        };

        for worker in &self.workers {
            if worker.dst_address() == packet.src.ip() {
                worker.process_message(&msg, response.as_ref(), packet.level, packet.timestamp);
                break;
            }
        }
    }

    /// Run every prepared adjuster against its selection.
    pub fn perform_adjustments(&mut self) {
        for adjuster in &mut self.adjusters {
            if !adjuster.prepare(&*self.inventory) {
                continue;
            }
            let Some(clock_id) = adjuster.clock_id() else {
                continue;
            };
            let selected = self.selector.select(&self.workers, clock_id);
            if selected.is_empty() {
                continue;
            }
            let Some(controller) = self.clocks.controller(clock_id) else {
                debug!("no controller available for clock {clock_id}");
                continue;
            };
            match adjuster.adjust(&selected, &*controller) {
                Ok(true) => adjuster.finalize(&selected),
                Ok(false) => {}
                Err(_) => {
                    // Already logged; the measurements stay pending and the
                    // next tick retries.
                }
            }
        }
    }

    /// Servers in a selector-driven state whose clock no adjuster drives
    /// fall back to ready.
    fn reset_unused_server_states(&self) {
        for worker in &self.workers {
            if worker.state() > ServerState::Ready && !self.has_adjuster_for(worker) {
                worker.set_state(ServerState::Ready);
            }
        }
    }

    fn has_adjuster_for(&self, worker: &ServerWorker) -> bool {
        let clock = worker.clock_id();
        clock.is_some() && self.adjusters.iter().any(|a| a.clock_id() == clock)
    }

    fn write_state_table(&self) {
        if self.state_file.is_none() && !self.state_table {
            return;
        }
        let mut table = state_table_header();
        for worker in &self.workers {
            table.push_str(&worker.state_row());
            table.push('\n');
        }
        if self.state_table {
            info!("server states:\n{table}");
        }
        if let Some(path) = &self.state_file
            && let Err(e) = std::fs::write(path, &table)
        {
            warn!("could not write state table to {}: {e}", path.display());
        }
    }
}
