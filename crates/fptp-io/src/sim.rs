// Copyright 2026 U.S. Federal Government (in countries where recognized)
// SPDX-License-Identifier: Apache-2.0

//! An in-memory network used by the test suites.
//!
//! A [`SimNetwork`] holds per-destination mailboxes and an optional manual
//! clock. Each participant gets a [`SimHost`] (an inventory implementation)
//! describing its interfaces; packets sent through one host are delivered
//! to whichever host owns the destination address. Transmit and receive
//! timestamps come from the shared clock, so a client and server wired to
//! the same network agree on time and measured offsets stay near zero
//! unless the test skews them.

use std::collections::{HashMap, VecDeque};
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use fptp_proto::{ClockIdentity, Timestamp, TimestampLevel};

use crate::clock::ClockId;
use crate::inventory::{
    NetworkInventory, PhcInfo, ReceivedPacket, SendRequest, SocketProfile, SocketSpec, TxReport,
    wall_clock_now,
};

const POLL_SLICE: Duration = Duration::from_millis(5);

#[derive(Clone, Debug)]
struct SimPacket {
    data: Vec<u8>,
    src: SocketAddr,
    dst: SocketAddr,
    timestamp: Timestamp,
}

#[derive(Default)]
struct SimState {
    mailboxes: HashMap<SocketAddr, VecDeque<SimPacket>>,
    dropped: Vec<IpAddr>,
}

struct SharedClock {
    manual: AtomicBool,
    manual_ns: AtomicI64,
}

/// The shared fabric connecting simulated hosts.
#[derive(Clone)]
pub struct SimNetwork {
    state: Arc<Mutex<SimState>>,
    clock: Arc<SharedClock>,
}

impl Default for SimNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl SimNetwork {
    /// Create an empty network using the real wall clock for timestamps.
    pub fn new() -> Self {
        SimNetwork {
            state: Arc::new(Mutex::new(SimState::default())),
            clock: Arc::new(SharedClock {
                manual: AtomicBool::new(false),
                manual_ns: AtomicI64::new(0),
            }),
        }
    }

    /// Switch to a manually driven clock starting at `now`.
    pub fn set_manual_time(&self, now: Timestamp) {
        self.clock.manual_ns.store(now.total_nanoseconds(), Ordering::SeqCst);
        self.clock.manual.store(true, Ordering::SeqCst);
    }

    /// Advance the manual clock.
    pub fn advance(&self, ns: i64) {
        self.clock.manual_ns.fetch_add(ns, Ordering::SeqCst);
    }

    /// The current network time.
    pub fn now(&self) -> Timestamp {
        if self.clock.manual.load(Ordering::SeqCst) {
            Timestamp::from_total_nanoseconds(self.clock.manual_ns.load(Ordering::SeqCst))
        } else {
            wall_clock_now()
        }
    }

    /// Drop all future packets addressed to `addr` (simulated outage).
    pub fn drop_packets_to(&self, addr: IpAddr) {
        self.state.lock().unwrap().dropped.push(addr);
    }

    /// Stop dropping packets addressed to `addr`.
    pub fn restore_packets_to(&self, addr: IpAddr) {
        self.state.lock().unwrap().dropped.retain(|a| *a != addr);
    }

    /// Create a host attached to this network.
    pub fn host(&self) -> SimHostBuilder {
        SimHostBuilder {
            network: self.clone(),
            interfaces: Vec::new(),
            forced_tx_level: None,
        }
    }

    fn deliver(&self, packet: SimPacket) {
        let mut state = self.state.lock().unwrap();
        if state.dropped.contains(&packet.dst.ip()) {
            return;
        }
        state.mailboxes.entry(packet.dst).or_default().push_back(packet);
    }

    fn take_matching(&self, addrs: &[(IpAddr, u16)]) -> Option<SimPacket> {
        let mut state = self.state.lock().unwrap();
        for (ip, port) in addrs {
            let key = SocketAddr::new(*ip, *port);
            if let Some(queue) = state.mailboxes.get_mut(&key)
                && let Some(packet) = queue.pop_front()
            {
                return Some(packet);
            }
        }
        None
    }
}

/// One simulated interface.
#[derive(Clone, Debug)]
pub struct SimInterface {
    /// Interface name.
    pub name: String,
    /// Assigned addresses.
    pub addrs: Vec<IpAddr>,
    /// Best timestamping level the interface offers.
    pub level: TimestampLevel,
    /// Attached PHC, if any.
    pub phc: Option<PhcInfo>,
    /// MAC address, for the PTP clock identity.
    pub mac: [u8; 6],
}

/// Builder for a [`SimHost`].
pub struct SimHostBuilder {
    network: SimNetwork,
    interfaces: Vec<SimInterface>,
    forced_tx_level: Option<TimestampLevel>,
}

impl SimHostBuilder {
    /// Add an interface.
    pub fn interface(mut self, interface: SimInterface) -> Self {
        self.interfaces.push(interface);
        self
    }

    /// Add a plain user-level interface with one address.
    pub fn simple_interface(self, name: &str, addr: IpAddr) -> Self {
        self.interface(SimInterface {
            name: name.to_string(),
            addrs: vec![addr],
            level: TimestampLevel::User,
            phc: None,
            mac: [0x02, 0, 0, 0, 0, 1],
        })
    }

    /// Finish.
    pub fn build(self) -> SimHost {
        SimHost {
            network: self.network,
            interfaces: self.interfaces,
            forced_tx_level: Arc::new(Mutex::new(self.forced_tx_level)),
        }
    }
}

/// A host on the simulated network; implements [`NetworkInventory`].
pub struct SimHost {
    network: SimNetwork,
    interfaces: Vec<SimInterface>,
    forced_tx_level: Arc<Mutex<Option<TimestampLevel>>>,
}

impl SimHost {
    fn interface(&self, name: &str) -> Option<&SimInterface> {
        self.interfaces.iter().find(|i| i.name == name)
    }

    /// Force every transmit-timestamp report to the given level, regardless
    /// of what was requested (simulated timestamp degradation).
    pub fn force_tx_level(&self, level: Option<TimestampLevel>) {
        *self.forced_tx_level.lock().unwrap() = level;
    }

    /// The network this host is attached to.
    pub fn network(&self) -> &SimNetwork {
        &self.network
    }

    fn local_addrs(&self, spec: &SocketSpec) -> Vec<(IpAddr, u16)> {
        let Some(interface) = self.interface(&spec.interface) else {
            return Vec::new();
        };
        let want_v6 = matches!(spec.profile, SocketProfile::Ipv6Event | SocketProfile::Ipv6General);
        interface
            .addrs
            .iter()
            .filter(|a| a.is_ipv6() == want_v6)
            .map(|a| (*a, spec.port))
            .collect()
    }
}

#[async_trait]
impl NetworkInventory for SimHost {
    fn has_interface(&self, name: &str) -> bool {
        self.interface(name).is_some()
    }

    fn has_address(&self, addr: &IpAddr) -> Option<String> {
        self.interfaces
            .iter()
            .find(|i| i.addrs.contains(addr))
            .map(|i| i.name.clone())
    }

    fn get_family_address(&self, interface: &str, ipv6: bool) -> Option<IpAddr> {
        self.interface(interface)?
            .addrs
            .iter()
            .find(|a| a.is_ipv6() == ipv6)
            .copied()
    }

    fn get_interface_timestamp_level(&self, interface: &str) -> Option<TimestampLevel> {
        self.interface(interface).map(|i| i.level)
    }

    fn get_interface_phc_info(&self, interface: &str) -> Option<PhcInfo> {
        self.interface(interface)?.phc.clone()
    }

    fn get_interface_ptp_clock_id(&self, interface: &str) -> Option<ClockIdentity> {
        self.interface(interface).map(|i| ClockIdentity::from_mac(i.mac))
    }

    fn get_phc_clock_id_by_name(&self, name: &str) -> Option<ClockId> {
        self.interfaces
            .iter()
            .filter_map(|i| i.phc.as_ref())
            .find(|phc| phc.name == name)
            .map(|phc| phc.clock_id)
    }

    fn wall_clock(&self) -> Timestamp {
        self.network.now()
    }

    async fn send(&self, request: SendRequest<'_>) -> io::Result<Option<TxReport>> {
        let interface = self.interface(request.src_interface).ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("no interface {}", request.src_interface))
        })?;
        let src_ip = interface
            .addrs
            .iter()
            .find(|a| a.is_ipv6() == request.dst.ip().is_ipv6())
            .copied()
            .ok_or_else(|| io::Error::new(io::ErrorKind::AddrNotAvailable, "no family address"))?;

        let now = self.network.now();
        self.network.deliver(SimPacket {
            data: request.data.to_vec(),
            src: SocketAddr::new(src_ip, request.src_port),
            dst: request.dst,
            timestamp: now,
        });

        Ok(request.timestamp_level.map(|wanted| {
            let forced = *self.forced_tx_level.lock().unwrap();
            let achieved = forced.unwrap_or_else(|| wanted.min(interface.level));
            TxReport { level: achieved, timestamp: now }
        }))
    }

    async fn recv(&self, specs: &[SocketSpec], timeout: Duration) -> io::Result<Vec<ReceivedPacket>> {
        let mut addrs: Vec<(IpAddr, u16, Option<TimestampLevel>, &str)> = Vec::new();
        for spec in specs {
            let level = if spec.profile.timestamped() { spec.timestamp_level } else { None };
            for (ip, port) in self.local_addrs(spec) {
                addrs.push((ip, port, level, spec.interface.as_str()));
            }
        }
        let flat: Vec<(IpAddr, u16)> = addrs.iter().map(|(ip, port, ..)| (*ip, *port)).collect();

        let mut packets = Vec::new();
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            while let Some(packet) = self.network.take_matching(&flat) {
                let level = addrs
                    .iter()
                    .find(|(ip, port, ..)| *ip == packet.dst.ip() && *port == packet.dst.port())
                    .and_then(|(_, _, level, _)| {
                        let interface_level =
                            self.has_address(&packet.dst.ip()).and_then(|name| {
                                self.get_interface_timestamp_level(&name)
                            })?;
                        level.map(|l| l.min(interface_level))
                    });
                packets.push(ReceivedPacket {
                    data: packet.data,
                    src: packet.src,
                    dst: packet.dst,
                    level,
                    timestamp: level.map(|_| self.network.now().max(packet.timestamp)),
                });
            }
            if !packets.is_empty() || tokio::time::Instant::now() >= deadline {
                return Ok(packets);
            }
            tokio::time::sleep(POLL_SLICE.min(deadline - tokio::time::Instant::now())).await;
        }
    }
}
