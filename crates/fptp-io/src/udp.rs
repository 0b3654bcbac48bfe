// Copyright 2026 U.S. Federal Government (in countries where recognized)
// SPDX-License-Identifier: Apache-2.0

//! A plain-UDP inventory with user-level timestamps.
//!
//! Sockets are bound to the wildcard address per (family, port) pair and
//! shared between send and receive paths. Timestamps are taken in user
//! space around the socket calls, so every report carries
//! [`TimestampLevel::User`]; hardware and socket timestamping require a
//! platform-specific inventory behind the same trait.

use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, warn};
use tokio::net::UdpSocket;

use fptp_proto::{ClockIdentity, TimestampLevel};

use crate::clock::ClockId;
use crate::inventory::{
    NetworkInventory, PhcInfo, ReceivedPacket, SendRequest, SocketSpec, TxReport, wall_clock_now,
};

const POLL_SLICE: Duration = Duration::from_millis(5);
const MAX_FRAME: usize = 1024;

#[derive(Clone, Debug)]
struct LocalInterface {
    name: String,
    addrs: Vec<IpAddr>,
}

/// User-level UDP implementation of [`NetworkInventory`].
pub struct UdpInventory {
    interfaces: std::sync::RwLock<Vec<LocalInterface>>,
    sockets: tokio::sync::Mutex<HashMap<(bool, u16), Arc<UdpSocket>>>,
}

impl UdpInventory {
    /// Enumerate local interfaces and create an inventory.
    pub fn new() -> io::Result<Self> {
        let interfaces = Self::enumerate()?;
        debug!("inventory: {} local interfaces", interfaces.len());
        Ok(UdpInventory {
            interfaces: std::sync::RwLock::new(interfaces),
            sockets: tokio::sync::Mutex::new(HashMap::new()),
        })
    }

    fn enumerate() -> io::Result<Vec<LocalInterface>> {
        let mut interfaces: Vec<LocalInterface> = Vec::new();
        for entry in if_addrs::get_if_addrs()? {
            let ip = entry.addr.ip();
            match interfaces.iter_mut().find(|i| i.name == entry.name) {
                Some(interface) => interface.addrs.push(ip),
                None => interfaces.push(LocalInterface { name: entry.name, addrs: vec![ip] }),
            }
        }
        Ok(interfaces)
    }

    /// Re-enumerate the local interfaces (addresses come and go).
    pub fn refresh(&self) -> io::Result<()> {
        let interfaces = Self::enumerate()?;
        debug!("inventory refresh: {} local interfaces", interfaces.len());
        *self.interfaces.write().unwrap() = interfaces;
        Ok(())
    }

    async fn socket(&self, ipv6: bool, port: u16) -> io::Result<Arc<UdpSocket>> {
        let mut sockets = self.sockets.lock().await;
        if let Some(socket) = sockets.get(&(ipv6, port)) {
            return Ok(socket.clone());
        }
        let bind_addr: SocketAddr = if ipv6 {
            (Ipv6Addr::UNSPECIFIED, port).into()
        } else {
            (Ipv4Addr::UNSPECIFIED, port).into()
        };
        let socket = Arc::new(UdpSocket::bind(bind_addr).await?);
        sockets.insert((ipv6, port), socket.clone());
        Ok(socket)
    }
}

#[async_trait]
impl NetworkInventory for UdpInventory {
    fn has_interface(&self, name: &str) -> bool {
        self.interfaces.read().unwrap().iter().any(|i| i.name == name)
    }

    fn has_address(&self, addr: &IpAddr) -> Option<String> {
        self.interfaces
            .read()
            .unwrap()
            .iter()
            .find(|i| i.addrs.contains(addr))
            .map(|i| i.name.clone())
    }

    fn get_family_address(&self, interface: &str, ipv6: bool) -> Option<IpAddr> {
        self.interfaces
            .read()
            .unwrap()
            .iter()
            .find(|i| i.name == interface)?
            .addrs
            .iter()
            .find(|a| a.is_ipv6() == ipv6)
            .copied()
    }

    fn get_interface_timestamp_level(&self, _interface: &str) -> Option<TimestampLevel> {
        Some(TimestampLevel::User)
    }

    fn get_interface_phc_info(&self, _interface: &str) -> Option<PhcInfo> {
        None
    }

    fn get_interface_ptp_clock_id(&self, _interface: &str) -> Option<ClockIdentity> {
        None
    }

    fn get_phc_clock_id_by_name(&self, _name: &str) -> Option<ClockId> {
        None
    }

    async fn send(&self, request: SendRequest<'_>) -> io::Result<Option<TxReport>> {
        let socket = self.socket(request.dst.ip().is_ipv6(), request.src_port).await?;
        socket.send_to(request.data, request.dst).await?;
        // The best this inventory can do is a clock read right after the
        // syscall returns.
        Ok(request
            .timestamp_level
            .map(|_| TxReport { level: TimestampLevel::User, timestamp: wall_clock_now() }))
    }

    async fn recv(&self, specs: &[SocketSpec], timeout: Duration) -> io::Result<Vec<ReceivedPacket>> {
        let mut sockets = Vec::new();
        for spec in specs {
            let ipv6 = matches!(
                spec.profile,
                crate::inventory::SocketProfile::Ipv6Event | crate::inventory::SocketProfile::Ipv6General
            );
            if matches!(spec.profile, crate::inventory::SocketProfile::Layer2) {
                warn!("inventory: layer-2 sockets are not supported over UDP, skipping");
                continue;
            }
            match self.socket(ipv6, spec.port).await {
                Ok(socket) => sockets.push((socket, spec.clone(), ipv6)),
                Err(e) => return Err(e),
            }
        }

        let mut packets = Vec::new();
        let mut buf = [0u8; MAX_FRAME];
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            for (socket, spec, ipv6) in &sockets {
                while let Ok((len, src)) = socket.try_recv_from(&mut buf) {
                    let local = socket.local_addr()?;
                    let dst_ip = if local.ip().is_unspecified() {
                        self.get_family_address(&spec.interface, *ipv6).unwrap_or(local.ip())
                    } else {
                        local.ip()
                    };
                    let timestamped = spec.profile.timestamped() && spec.timestamp_level.is_some();
                    packets.push(ReceivedPacket {
                        data: buf[..len].to_vec(),
                        src,
                        dst: SocketAddr::new(dst_ip, local.port()),
                        level: timestamped.then_some(TimestampLevel::User),
                        timestamp: timestamped.then(wall_clock_now),
                    });
                }
            }
            if !packets.is_empty() || tokio::time::Instant::now() >= deadline {
                return Ok(packets);
            }
            tokio::time::sleep(POLL_SLICE.min(deadline - tokio::time::Instant::now())).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::SocketProfile;

    #[tokio::test]
    async fn test_loopback_send_recv() {
        let inventory = UdpInventory::new().unwrap();
        let Some(lo) = inventory
            .interfaces
            .read()
            .unwrap()
            .iter()
            .find(|i| i.addrs.iter().any(|a| a.is_loopback() && a.is_ipv4()))
            .map(|i| i.name.clone())
        else {
            // No loopback interface in this environment.
            return;
        };

        let recv_spec = SocketSpec {
            interface: lo.clone(),
            profile: SocketProfile::Ipv4Event,
            port: 42319,
            timestamp_level: Some(TimestampLevel::User),
        };
        // Bind the receive socket first.
        inventory.socket(false, 42319).await.unwrap();

        inventory
            .send(SendRequest {
                data: &[0xab, 0xcd],
                src_interface: &lo,
                src_port: 42320,
                dst: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 42319),
                timestamp_level: Some(TimestampLevel::Hardware),
            })
            .await
            .unwrap();

        let packets = inventory
            .recv(std::slice::from_ref(&recv_spec), Duration::from_millis(200))
            .await
            .unwrap();
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].data, vec![0xab, 0xcd]);
        assert_eq!(packets[0].level, Some(TimestampLevel::User));
        assert!(packets[0].timestamp.is_some());
    }

    #[test]
    fn test_queries() {
        let inventory = UdpInventory::new().unwrap();
        assert!(!inventory.has_interface("definitely-not-an-interface"));
        assert_eq!(inventory.get_phc_clock_id_by_name("ptp0"), None);
        assert!(inventory.refresh().is_ok());
    }
}
