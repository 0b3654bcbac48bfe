// Copyright 2026 U.S. Federal Government (in countries where recognized)
// SPDX-License-Identifier: Apache-2.0

//! I/O collaborator seams for the synchronization core.
//!
//! The core never touches sockets or clock-adjustment syscalls directly.
//! It talks to two capabilities:
//!
//! - [`NetworkInventory`]: interface/address lookups, packet send with a
//!   transmit-timestamp report, and deadline-bounded batch receive.
//! - [`ClockController`]: frequency read/write, clock stepping and
//!   single-shot offset injection for one target clock.
//!
//! Two inventory implementations ship here: [`udp::UdpInventory`] (plain
//! tokio sockets, user-level timestamps) and [`sim::SimNetwork`] (an
//! in-memory network for tests and end-to-end scenarios). Hardware
//! timestamping and PHC plumbing live behind the same traits in
//! deployment-specific implementations.

#![warn(missing_docs)]

pub mod clock;
pub mod inventory;
pub mod sim;
pub mod udp;
#[cfg(target_os = "linux")]
pub mod unix;

pub use clock::{ClockController, ClockId, ClockRegistry, DryRunClock, DryRunRegistry};
pub use inventory::{
    NetworkInventory, PhcInfo, ReceivedPacket, SendRequest, SocketProfile, SocketSpec, TxReport,
};
