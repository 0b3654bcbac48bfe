// Copyright 2026 U.S. Federal Government (in countries where recognized)
// SPDX-License-Identifier: Apache-2.0

//! The server coordinator: request reassembly, response generation and
//! request garbage collection.
//!
//! Listeners feed packets in; request-sequence parts are merged into the
//! request table (keyed by source address and sequence id) and a completed
//! request immediately produces a response. Response-sequence packets that
//! end up here are forwarded to the client coordinator. Incomplete
//! requests older than two seconds are swept once per second.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use log::{debug, info, trace, warn};
use tokio::sync::{mpsc, watch};

use fptp_io::{NetworkInventory, ReceivedPacket};
use fptp_proto::{Message, MessageType, RequestTlv, TlvKind, tlv};

use crate::config::ResolvedServerMode;
use crate::listener::Listener;
use crate::request::Request;
use crate::responder::send_response;

/// The server-mode coordinator.
pub struct ServerCoordinator {
    config: ResolvedServerMode,
    inventory: Arc<dyn NetworkInventory>,
    requests: Mutex<Vec<Request>>,
    inbox_tx: mpsc::UnboundedSender<ReceivedPacket>,
    inbox_rx: Mutex<Option<mpsc::UnboundedReceiver<ReceivedPacket>>>,
    peer: Mutex<Option<mpsc::UnboundedSender<ReceivedPacket>>>,
}

impl ServerCoordinator {
    /// Assemble the coordinator from a resolved configuration.
    pub fn new(config: ResolvedServerMode, inventory: Arc<dyn NetworkInventory>) -> Self {
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        ServerCoordinator {
            config,
            inventory,
            requests: Mutex::new(Vec::new()),
            inbox_tx,
            inbox_rx: Mutex::new(Some(inbox_rx)),
            peer: Mutex::new(None),
        }
    }

    /// Sender through which the client coordinator forwards request
    /// packets it received.
    pub fn inbox(&self) -> mpsc::UnboundedSender<ReceivedPacket> {
        self.inbox_tx.clone()
    }

    /// Where to forward response-sequence packets (the client
    /// coordinator's inbox).
    pub fn set_peer(&self, peer: mpsc::UnboundedSender<ReceivedPacket>) {
        *self.peer.lock().unwrap() = Some(peer);
    }

    /// Number of requests currently being reassembled.
    pub fn pending_requests(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// Handle one received packet.
    pub async fn on_packet(&self, packet: ReceivedPacket) {
        let Ok((msg, consumed)) = Message::decode(&packet.data) else {
            trace!("dropping malformed packet from {}", packet.src);
            return;
        };
        let region = &packet.data[consumed..];
        let kind = tlv::validate_org_ext(region);

        // Response-sequence traffic belongs to client mode.
        if msg.is_response() || kind == Some(TlvKind::Response) {
            if let Some(peer) = self.peer.lock().unwrap().as_ref() {
                let _ = peer.send(packet);
            }
            return;
        }

        let request_tlv = match kind {
            Some(TlvKind::Request) => match RequestTlv::decode(region) {
                Ok((tlv, _)) => Some(tlv),
                Err(e) => {
                    debug!("dropping request with bad TLV from {}: {e}", packet.src);
                    return;
                }
            },
            _ => None,
        };

        match msg.msg_type {
            MessageType::Sync => trace!(
                "received Sync request (seq id {}, {} timestamp) from {}",
                msg.sequence_id,
                packet.level.map(|l| l.as_short_str()).unwrap_or("no"),
                packet.src
            ),
            MessageType::FollowUp => trace!(
                "received Follow-Up request (seq id {}) from {}",
                msg.sequence_id, packet.src
            ),
            _ => return,
        }

        let completed = self.obtain_request(&msg, request_tlv.as_ref(), &packet);
        if let Some(request) = completed
            && let Err(e) = send_response(&*self.inventory, &self.config, &request).await
        {
            warn!("failed to respond to {}: {e}", request.src_address());
        }
    }

    /// Merge the part into the request table. Returns the request if it
    /// became complete (removed from the table).
    fn obtain_request(
        &self,
        msg: &Message,
        request_tlv: Option<&RequestTlv>,
        packet: &ReceivedPacket,
    ) -> Option<Request> {
        let mut requests = self.requests.lock().unwrap();
        let now = Instant::now();

        if let Some(index) = requests
            .iter()
            .position(|request| request.matches(packet.src.ip(), msg.sequence_id))
        {
            if requests[index].timed_out(now) {
                warn!(
                    "received message for timed out sequence (id {}) from {}",
                    msg.sequence_id,
                    packet.src
                );
                requests.remove(index);
                return None;
            }
            requests[index].merge(
                msg,
                request_tlv,
                packet.src,
                packet.dst,
                packet.level,
                packet.timestamp,
            );
            if requests[index].complete() {
                return Some(requests.remove(index));
            }
            return None;
        }

        let request = Request::new(
            msg,
            request_tlv,
            packet.src,
            packet.dst,
            packet.level,
            packet.timestamp,
        );
        if request.complete() {
            Some(request)
        } else {
            requests.push(request);
            None
        }
    }

    /// Drop incomplete requests past their timeout.
    pub fn sweep_timeouts(&self) {
        let now = Instant::now();
        let mut requests = self.requests.lock().unwrap();
        let before = requests.len();
        requests.retain(|request| !request.timed_out(now));
        let dropped = before - requests.len();
        if dropped > 0 {
            debug!("swept {dropped} timed out request(s)");
        }
    }

    /// Run server mode until `stop` flips to true.
    pub async fn run(self: Arc<Self>, stop: watch::Receiver<bool>) {
        let Some(mut inbox_rx) = self.inbox_rx.lock().unwrap().take() else {
            return;
        };

        let mut listeners = 0;
        for spec in &self.config.listeners {
            let listener = Listener::new(spec.clone(), &*self.inventory);
            if listener.invalid() {
                continue;
            }
            listeners += 1;
            tokio::spawn(listener.run(
                self.clone(),
                self.inventory.clone(),
                stop.clone(),
            ));
        }
        info!("server mode running, {listeners} listener(s)");

        let mut last_sweep = Instant::now();
        while !*stop.borrow() {
            if last_sweep.elapsed() >= Duration::from_secs(1) {
                last_sweep = Instant::now();
                self.sweep_timeouts();
            }
            tokio::select! {
                received = inbox_rx.recv() => {
                    if let Some(packet) = received {
                        self.on_packet(packet).await;
                    }
                }
                _ = tokio::time::sleep(Duration::from_millis(100)) => {}
            }
        }
        info!("server mode stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ListenerSpec, ResolvedServerMode};
    use crate::request::testutil::{client_addr, follow_up_msg, server_addr, sync_msg};
    use fptp_io::sim::{SimHost, SimInterface, SimNetwork};
    use fptp_io::{SocketProfile, SocketSpec};
    use fptp_proto::{ResponseTlv, ServerStateDs, Timestamp, TimestampLevel};

    fn server_host(net: &SimNetwork) -> SimHost {
        net.host()
            .interface(SimInterface {
                name: "eth0".into(),
                addrs: vec![server_addr(0).ip()],
                level: TimestampLevel::Hardware,
                phc: None,
                mac: [0xec, 0x46, 0x70, 1, 2, 3],
            })
            .build()
    }

    fn coordinator(net: &SimNetwork) -> ServerCoordinator {
        let config = ResolvedServerMode {
            enabled: true,
            server_state: ServerStateDs::default(),
            listeners: vec![ListenerSpec {
                interface: "eth0".into(),
                event_port: 319,
                general_port: 320,
                timestamp_level: TimestampLevel::Hardware,
                utc_offset: 37,
            }],
        };
        ServerCoordinator::new(config, Arc::new(server_host(net)))
    }

    fn request_packet(
        msg: &Message,
        tlv: Option<&RequestTlv>,
        src_port: u16,
        dst_port: u16,
    ) -> ReceivedPacket {
        let mut data = Vec::new();
        msg.encode(&mut data);
        if let Some(tlv) = tlv {
            tlv.encode(&mut data);
        }
        let event = dst_port == 319;
        ReceivedPacket {
            data,
            src: client_addr(src_port),
            dst: server_addr(dst_port),
            level: event.then_some(TimestampLevel::Hardware),
            timestamp: event.then_some(Timestamp::new(1000, 5_000_000)),
        }
    }

    async fn client_packets(net: &SimNetwork) -> Vec<ReceivedPacket> {
        let client = net
            .host()
            .simple_interface("eth0", client_addr(0).ip())
            .build();
        let specs = vec![
            SocketSpec {
                interface: "eth0".into(),
                profile: SocketProfile::Ipv4Event,
                port: 319,
                timestamp_level: Some(TimestampLevel::Hardware),
            },
            SocketSpec {
                interface: "eth0".into(),
                profile: SocketProfile::Ipv4General,
                port: 320,
                timestamp_level: None,
            },
        ];
        client.recv(&specs, Duration::from_millis(20)).await.unwrap()
    }

    #[tokio::test]
    async fn test_two_step_request_produces_response() {
        let net = SimNetwork::new();
        let coordinator = coordinator(&net);

        let tlv = RequestTlv::new(false);
        let sync = sync_msg(11, true, Some(&tlv));
        coordinator.on_packet(request_packet(&sync, Some(&tlv), 319, 319)).await;
        assert_eq!(coordinator.pending_requests(), 1);

        let fu = follow_up_msg(11, None);
        coordinator.on_packet(request_packet(&fu, None, 320, 320)).await;
        assert_eq!(coordinator.pending_requests(), 0);

        let packets = client_packets(&net).await;
        assert_eq!(packets.len(), 2);
        let (response, n) = Message::decode(&packets[0].data).unwrap();
        assert_eq!(response.sequence_id, 11);
        assert!(response.is_response());
        let (resp_tlv, _) = ResponseTlv::decode(&packets[0].data[n..]).unwrap();
        assert_eq!(resp_tlv.req_ingress_timestamp, Timestamp::new(1000, 5_000_000));
    }

    #[tokio::test]
    async fn test_one_step_request_immediate_response() {
        let net = SimNetwork::new();
        let coordinator = coordinator(&net);

        let tlv = RequestTlv::new(false);
        let sync = sync_msg(12, false, Some(&tlv));
        coordinator.on_packet(request_packet(&sync, Some(&tlv), 319, 319)).await;
        assert_eq!(coordinator.pending_requests(), 0);
        assert_eq!(client_packets(&net).await.len(), 1);
    }

    #[tokio::test]
    async fn test_response_packets_forward_to_peer() {
        let net = SimNetwork::new();
        let coordinator = coordinator(&net);
        let (tx, mut rx) = mpsc::unbounded_channel();
        coordinator.set_peer(tx);

        // A response-sequence Sync (log period 0x7f).
        let response = Message::new(MessageType::Sync, Message::PACKED_SIZE as u16, true);
        coordinator.on_packet(request_packet(&response, None, 319, 319)).await;
        assert!(rx.try_recv().is_ok());
        assert_eq!(coordinator.pending_requests(), 0);
    }

    #[tokio::test]
    async fn test_sweep_drops_stale_requests() {
        let net = SimNetwork::new();
        let coordinator = coordinator(&net);

        let tlv = RequestTlv::new(false);
        let sync = sync_msg(13, true, Some(&tlv));
        coordinator.on_packet(request_packet(&sync, Some(&tlv), 319, 319)).await;
        assert_eq!(coordinator.pending_requests(), 1);

        // Not yet stale.
        coordinator.sweep_timeouts();
        assert_eq!(coordinator.pending_requests(), 1);

        for request in coordinator.requests.lock().unwrap().iter_mut() {
            request.backdate(Duration::from_millis(2100));
        }
        coordinator.sweep_timeouts();
        assert_eq!(coordinator.pending_requests(), 0);
    }

    #[tokio::test]
    async fn test_malformed_packet_dropped() {
        let net = SimNetwork::new();
        let coordinator = coordinator(&net);
        coordinator
            .on_packet(ReceivedPacket {
                data: vec![0xff; 60],
                src: client_addr(319),
                dst: server_addr(319),
                level: None,
                timestamp: None,
            })
            .await;
        assert_eq!(coordinator.pending_requests(), 0);
    }
}
