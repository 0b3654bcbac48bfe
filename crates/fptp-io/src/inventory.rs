// Copyright 2026 U.S. Federal Government (in countries where recognized)
// SPDX-License-Identifier: Apache-2.0

//! The network-inventory capability: interface lookups, timestamped send,
//! deadline-bounded batch receive.

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;

use fptp_proto::{ClockIdentity, Timestamp, TimestampLevel};

use crate::clock::ClockId;

/// The five socket profiles a listener may open on one interface.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum SocketProfile {
    /// Raw layer-2 (IEEE 802.3) socket.
    Layer2,
    /// IPv4 event port (timestamped).
    Ipv4Event,
    /// IPv4 general port.
    Ipv4General,
    /// IPv6 event port (timestamped).
    Ipv6Event,
    /// IPv6 general port.
    Ipv6General,
}

impl SocketProfile {
    /// Whether packets on this profile need receive timestamps.
    pub fn timestamped(self) -> bool {
        matches!(self, SocketProfile::Layer2 | SocketProfile::Ipv4Event | SocketProfile::Ipv6Event)
    }
}

/// One socket to receive from: an interface, a profile and a port.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct SocketSpec {
    /// Local interface name.
    pub interface: String,
    /// Socket profile.
    pub profile: SocketProfile,
    /// UDP port (ignored for layer-2).
    pub port: u16,
    /// Timestamp level wanted for packets on this socket; `None` for
    /// general-port sockets that need no timestamps.
    pub timestamp_level: Option<TimestampLevel>,
}

/// PHC information attached to an interface.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PhcInfo {
    /// Device name, e.g. `ptp0`.
    pub name: String,
    /// Clock handle for adjustments.
    pub clock_id: ClockId,
}

/// A packet to transmit.
#[derive(Clone, Debug)]
pub struct SendRequest<'a> {
    /// Encoded frame.
    pub data: &'a [u8],
    /// Source interface name.
    pub src_interface: &'a str,
    /// Source UDP port.
    pub src_port: u16,
    /// Destination address and port.
    pub dst: SocketAddr,
    /// Requested transmit-timestamp level; `None` when no transmit
    /// timestamp is needed (general messages).
    pub timestamp_level: Option<TimestampLevel>,
}

/// Transmit-timestamp report for a sent packet.
///
/// The achieved level may be lower than requested when the preferred
/// timestamping source did not deliver in time.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TxReport {
    /// Level the timestamp was actually taken at.
    pub level: TimestampLevel,
    /// The transmit timestamp.
    pub timestamp: Timestamp,
}

/// A received packet with its metadata.
#[derive(Clone, Debug)]
pub struct ReceivedPacket {
    /// The raw frame.
    pub data: Vec<u8>,
    /// Sender address.
    pub src: SocketAddr,
    /// Local destination address the packet arrived on.
    pub dst: SocketAddr,
    /// Level of the receive timestamp, when taken.
    pub level: Option<TimestampLevel>,
    /// Receive timestamp, when taken.
    pub timestamp: Option<Timestamp>,
}

/// Interface/address book plus packet I/O.
///
/// Query methods are synchronous and cheap; `send`/`recv` suspend, with
/// `recv` bounded by an explicit deadline so callers can interleave
/// housekeeping (the coordinators call it with a 100 ms deadline).
#[async_trait]
pub trait NetworkInventory: Send + Sync {
    /// Whether the named interface exists.
    fn has_interface(&self, name: &str) -> bool;

    /// If `addr` is assigned to a local interface, return that interface's
    /// name.
    fn has_address(&self, addr: &IpAddr) -> Option<String>;

    /// An address of the given family (v4/v6) on the interface.
    fn get_family_address(&self, interface: &str, ipv6: bool) -> Option<IpAddr>;

    /// Best timestamp level the interface supports.
    fn get_interface_timestamp_level(&self, interface: &str) -> Option<TimestampLevel>;

    /// PHC name and clock handle of the interface, when it has one.
    fn get_interface_phc_info(&self, interface: &str) -> Option<PhcInfo>;

    /// The PTP clock identity derived from the interface MAC.
    fn get_interface_ptp_clock_id(&self, interface: &str) -> Option<ClockIdentity>;

    /// Resolve a PHC device name to a clock handle.
    fn get_phc_clock_id_by_name(&self, name: &str) -> Option<ClockId>;

    /// Read the realtime clock used for packet timestamps.
    fn wall_clock(&self) -> Timestamp {
        wall_clock_now()
    }

    /// Transmit one packet. Returns the transmit-timestamp report when one
    /// was requested.
    async fn send(&self, request: SendRequest<'_>) -> io::Result<Option<TxReport>>;

    /// Receive pending packets on the given sockets, waiting at most
    /// `timeout`. Returns the accepted packets in arrival order (possibly
    /// empty).
    async fn recv(&self, specs: &[SocketSpec], timeout: Duration) -> io::Result<Vec<ReceivedPacket>>;
}

/// Read the realtime clock as a wire timestamp.
pub fn wall_clock_now() -> Timestamp {
    match std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH) {
        Ok(d) => Timestamp::new(d.as_secs(), d.subsec_nanos()),
        Err(_) => Timestamp::default(),
    }
}
