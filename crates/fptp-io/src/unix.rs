// Copyright 2026 U.S. Federal Government (in countries where recognized)
// SPDX-License-Identifier: Apache-2.0

//! Linux clock controllers backed by `clock_adjtime(2)`.
//!
//! The realtime clock is addressed as `CLOCK_REALTIME`; a PTP hardware
//! clock is addressed through its `/dev/ptpN` character device using the
//! fd-to-clockid encoding `(!fd << 3) | 3`.

use std::fs::{File, OpenOptions};
use std::io;
use std::os::fd::AsRawFd;
use std::sync::Mutex;

use crate::clock::{ClockController, ClockId, ClockRegistry};

fn empty_timex() -> libc::timex {
    // All-zero is the documented "read current state" request.
    unsafe { std::mem::zeroed() }
}

fn clock_adjtime(clkid: libc::clockid_t, tx: &mut libc::timex) -> io::Result<()> {
    let rc = unsafe { libc::clock_adjtime(clkid, tx) };
    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// A clock driven through `clock_adjtime`.
pub struct UnixClock {
    id: ClockId,
    clkid: libc::clockid_t,
    // Keeps the PHC device open for the lifetime of the controller.
    _device: Option<File>,
}

impl UnixClock {
    /// The system realtime clock.
    pub fn realtime() -> Self {
        UnixClock {
            id: ClockId::System,
            clkid: libc::CLOCK_REALTIME,
            _device: None,
        }
    }

    /// The PTP hardware clock behind `/dev/ptpN`.
    pub fn phc(index: u32) -> io::Result<Self> {
        let device = OpenOptions::new()
            .read(true)
            .write(true)
            .open(format!("/dev/ptp{index}"))?;
        let fd = device.as_raw_fd();
        let clkid = ((!fd as libc::clockid_t) << 3) | 3;
        Ok(UnixClock {
            id: ClockId::Phc(index),
            clkid,
            _device: Some(device),
        })
    }
}

impl ClockController for UnixClock {
    fn clock_id(&self) -> ClockId {
        self.id
    }

    fn read_frequency(&self) -> io::Result<i64> {
        let mut tx = empty_timex();
        clock_adjtime(self.clkid, &mut tx)?;
        Ok(tx.freq as i64)
    }

    fn set_frequency(&self, freq: i64) -> io::Result<()> {
        let mut tx = empty_timex();
        tx.modes = libc::ADJ_FREQUENCY | libc::ADJ_NANO;
        tx.freq = freq as libc::c_long;
        clock_adjtime(self.clkid, &mut tx)
    }

    fn step(&self, offset_ns: i64) -> io::Result<()> {
        let mut tx = empty_timex();
        tx.modes = libc::ADJ_SETOFFSET | libc::ADJ_NANO;
        // ADJ_SETOFFSET wants a normalized timeval with non-negative
        // nanoseconds.
        let mut sec = offset_ns / 1_000_000_000;
        let mut nsec = offset_ns % 1_000_000_000;
        if nsec < 0 {
            sec -= 1;
            nsec += 1_000_000_000;
        }
        tx.time.tv_sec = sec as libc::time_t;
        tx.time.tv_usec = nsec as libc::suseconds_t;
        clock_adjtime(self.clkid, &mut tx)
    }

    fn offset_injection(&self, offset_ns: i64) -> io::Result<()> {
        let mut tx = empty_timex();
        clock_adjtime(self.clkid, &mut tx)?;
        tx.modes = libc::ADJ_OFFSET | libc::ADJ_STATUS | libc::ADJ_NANO;
        tx.status |= libc::STA_PLL | libc::STA_NANO;
        tx.status &= !(libc::STA_RONLY | libc::STA_FREQHOLD);
        tx.offset = offset_ns as libc::c_long;
        clock_adjtime(self.clkid, &mut tx)
    }
}

/// A registry resolving clock handles to `clock_adjtime` controllers.
#[derive(Default)]
pub struct SystemClockRegistry {
    clocks: Mutex<std::collections::HashMap<ClockId, std::sync::Arc<UnixClock>>>,
}

impl SystemClockRegistry {
    /// Create an empty registry; controllers open lazily.
    pub fn new() -> Self {
        SystemClockRegistry::default()
    }
}

impl ClockRegistry for SystemClockRegistry {
    fn controller(&self, id: ClockId) -> Option<std::sync::Arc<dyn ClockController>> {
        let mut clocks = self.clocks.lock().unwrap();
        if let Some(clock) = clocks.get(&id) {
            return Some(clock.clone());
        }
        let clock = match id {
            ClockId::System => UnixClock::realtime(),
            ClockId::Phc(index) => UnixClock::phc(index).ok()?,
        };
        let clock = std::sync::Arc::new(clock);
        clocks.insert(id, clock.clone());
        Some(clock)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_realtime_frequency() {
        // Reading the adjustment state needs no privileges.
        let clock = UnixClock::realtime();
        assert_eq!(clock.clock_id(), ClockId::System);
        assert!(clock.read_frequency().is_ok());
    }

    #[test]
    fn test_registry_resolves_system() {
        let registry = SystemClockRegistry::new();
        let clock = registry.controller(ClockId::System).unwrap();
        assert_eq!(clock.clock_id(), ClockId::System);
    }
}
