// Copyright 2026 U.S. Federal Government (in countries where recognized)
// SPDX-License-Identifier: Apache-2.0

//! The clock-adjustment capability.
//!
//! Frequency values use the kernel's scaled-ppm convention: raw unit =
//! ppm × 65536, so one second-per-second corresponds to 65536 × 1e6 raw
//! and the ±500 ppm range spans ±32768000 raw.

use std::io;
use std::sync::Mutex;

use log::debug;

/// Conversion factor between raw scaled-ppm frequency units and
/// seconds-per-second (65536 × 1e6).
pub const FREQ_UNITS_PER_S_PER_S: f64 = 65_536_000_000.0;

/// Handle identifying a target clock.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ClockId {
    /// The system realtime clock.
    System,
    /// A PTP hardware clock, by device index (`/dev/ptpN`).
    Phc(u32),
}

impl std::fmt::Display for ClockId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClockId::System => f.write_str(fptp_proto::SYSTEM_CLOCK_NAME),
            ClockId::Phc(n) => write!(f, "ptp{n}"),
        }
    }
}

/// Adjustment interface for a single clock.
///
/// Implementations wrap `clock_adjtime`/`adjtimex` on Linux or an
/// equivalent facility elsewhere. All methods are expected to complete
/// quickly; they are called from the client coordinator task.
pub trait ClockController: Send + Sync {
    /// The clock this controller drives.
    fn clock_id(&self) -> ClockId;

    /// Read the currently applied frequency correction (raw scaled-ppm).
    fn read_frequency(&self) -> io::Result<i64>;

    /// Replace the frequency correction (raw scaled-ppm).
    fn set_frequency(&self, freq: i64) -> io::Result<()>;

    /// Step the clock by `offset_ns` (applied as an immediate set-time).
    fn step(&self, offset_ns: i64) -> io::Result<()>;

    /// Inject a single-shot phase offset of `offset_ns`, asserting PLL and
    /// nanosecond modes and clearing any leftover frequency-hold state.
    fn offset_injection(&self, offset_ns: i64) -> io::Result<()>;
}

/// Hands out the controller for a target clock.
pub trait ClockRegistry: Send + Sync {
    /// The controller driving `id`, if this deployment has one.
    fn controller(&self, id: ClockId) -> Option<std::sync::Arc<dyn ClockController>>;
}

/// A registry of [`DryRunClock`] controllers, created on demand.
#[derive(Default)]
pub struct DryRunRegistry {
    clocks: Mutex<std::collections::HashMap<ClockId, std::sync::Arc<DryRunClock>>>,
}

impl DryRunRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        DryRunRegistry::default()
    }

    /// The recorder for `id`, creating it if needed. Lets tests inspect
    /// what was applied.
    pub fn dry_run(&self, id: ClockId) -> std::sync::Arc<DryRunClock> {
        self.clocks
            .lock()
            .unwrap()
            .entry(id)
            .or_insert_with(|| std::sync::Arc::new(DryRunClock::new(id)))
            .clone()
    }
}

impl ClockRegistry for DryRunRegistry {
    fn controller(&self, id: ClockId) -> Option<std::sync::Arc<dyn ClockController>> {
        Some(self.dry_run(id))
    }
}

/// A controller that records adjustments without touching any clock.
///
/// Used for dry runs and by the test suites; deployments substitute a
/// platform controller behind the same trait.
#[derive(Debug)]
pub struct DryRunClock {
    id: ClockId,
    state: Mutex<DryRunState>,
}

#[derive(Clone, Copy, Debug, Default)]
struct DryRunState {
    freq: i64,
    last_step: Option<i64>,
    last_offset: Option<i64>,
    steps: u64,
    offsets: u64,
}

impl DryRunClock {
    /// Create a recorder for the given clock.
    pub fn new(id: ClockId) -> Self {
        DryRunClock {
            id,
            state: Mutex::new(DryRunState::default()),
        }
    }

    /// The last stepped amount, if any step happened.
    pub fn last_step(&self) -> Option<i64> {
        self.state.lock().unwrap().last_step
    }

    /// The last injected offset, if any.
    pub fn last_offset_injection(&self) -> Option<i64> {
        self.state.lock().unwrap().last_offset
    }

    /// Number of steps applied.
    pub fn step_count(&self) -> u64 {
        self.state.lock().unwrap().steps
    }

    /// Number of offset injections applied.
    pub fn offset_count(&self) -> u64 {
        self.state.lock().unwrap().offsets
    }

    /// Seed the frequency register, as if a previous run left it behind.
    pub fn set_initial_frequency(&self, freq: i64) {
        self.state.lock().unwrap().freq = freq;
    }
}

impl ClockController for DryRunClock {
    fn clock_id(&self) -> ClockId {
        self.id
    }

    fn read_frequency(&self) -> io::Result<i64> {
        Ok(self.state.lock().unwrap().freq)
    }

    fn set_frequency(&self, freq: i64) -> io::Result<()> {
        let mut state = self.state.lock().unwrap();
        debug!("dry-run {}: frequency {} -> {}", self.clock_id(), state.freq, freq);
        state.freq = freq;
        Ok(())
    }

    fn step(&self, offset_ns: i64) -> io::Result<()> {
        let mut state = self.state.lock().unwrap();
        debug!("dry-run {}: step by {} ns", self.clock_id(), offset_ns);
        state.last_step = Some(offset_ns);
        state.steps += 1;
        Ok(())
    }

    fn offset_injection(&self, offset_ns: i64) -> io::Result<()> {
        let mut state = self.state.lock().unwrap();
        debug!("dry-run {}: offset injection {} ns", self.clock_id(), offset_ns);
        state.last_offset = Some(offset_ns);
        state.offsets += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dry_run_records() {
        let clock = DryRunClock::new(ClockId::System);
        assert_eq!(clock.read_frequency().unwrap(), 0);
        clock.set_frequency(1000).unwrap();
        assert_eq!(clock.read_frequency().unwrap(), 1000);
        clock.step(2_000_000).unwrap();
        clock.offset_injection(-500).unwrap();
        assert_eq!(clock.last_step(), Some(2_000_000));
        assert_eq!(clock.last_offset_injection(), Some(-500));
        assert_eq!(clock.step_count(), 1);
        assert_eq!(clock.offset_count(), 1);
    }

    #[test]
    fn test_clock_id_display() {
        assert_eq!(ClockId::System.to_string(), "system");
        assert_eq!(ClockId::Phc(3).to_string(), "ptp3");
    }
}
