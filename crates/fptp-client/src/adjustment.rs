// Copyright 2026 U.S. Federal Government (in countries where recognized)
// SPDX-License-Identifier: Apache-2.0

//! Per-clock adjusters consuming the selected servers' measurements.
//!
//! Two controllers are available:
//!
//! - **Direct offset**: hands the mean offset straight to the kernel as a
//!   single-shot offset injection, or steps the clock when the offset
//!   exceeds the step limit.
//! - **PID with fake integral**: drives the clock frequency. Each round
//!   reverts all but `ki` of the previously applied frequency delta (the
//!   retained fraction accumulates like an integrator) before adding the
//!   new proportional and differential terms.
//!
//! An adjuster refuses to run unless every selected server holds an
//! unapplied measurement against the adjuster's clock; after a successful
//! application the consumed measurements are cleared so no reading is used
//! twice.

use std::io;
use std::sync::Arc;

use log::{debug, error, info, trace};

use fptp_io::clock::FREQ_UNITS_PER_S_PER_S;
use fptp_io::{ClockController, ClockId, NetworkInventory};
use fptp_proto::nanoseconds_to_str;

use crate::worker::ServerWorker;

/// Offset at which the direct adjuster steps instead of slewing (ns).
pub const DEFAULT_STEP_LIMIT: i64 = 500_000_000;

/// Clamp for the applied frequency in raw scaled-ppm units (±500 ppm).
pub const FREQ_LIMIT: i64 = 32_768_000;

/// Valid range and default of the proportional ratio.
pub const KP_RANGE: (f64, f64) = (0.01, 1.0);
/// Default proportional ratio.
pub const DEFAULT_KP: f64 = 0.2;
/// Valid range and default of the integral ratio.
pub const KI_RANGE: (f64, f64) = (0.005, 0.5);
/// Default integral ratio.
pub const DEFAULT_KI: f64 = 0.05;
/// Valid range of the differential ratio.
pub const KD_RANGE: (f64, f64) = (0.0, 1.0);
/// Default differential ratio.
pub const DEFAULT_KD: f64 = 0.0;
/// Default PID step threshold (ns).
pub const DEFAULT_STEP_THRESHOLD: i64 = 1_000_000;

/// Controller algorithm plus its state.
#[derive(Clone, Debug)]
enum Algorithm {
    DirectOffset {
        step_limit: i64,
    },
    Pid {
        kp: f64,
        ki: f64,
        kd: f64,
        step_threshold: i64,
        freq_addend: f64,
        integral: f64,
        stepped: bool,
    },
}

/// A per-clock adjuster.
#[derive(Clone, Debug)]
pub struct Adjuster {
    clock_name: String,
    clock_id: Option<ClockId>,
    algorithm: Algorithm,
}

impl Adjuster {
    /// A direct-offset adjuster for the named clock.
    pub fn direct_offset(clock_name: &str, step_limit: Option<i64>) -> Self {
        Adjuster {
            clock_name: clock_name.to_string(),
            clock_id: None,
            algorithm: Algorithm::DirectOffset {
                step_limit: step_limit.unwrap_or(DEFAULT_STEP_LIMIT),
            },
        }
    }

    /// A PID adjuster for the named clock.
    pub fn pid(clock_name: &str, kp: f64, ki: f64, kd: f64, step_threshold: i64) -> Self {
        Adjuster {
            clock_name: clock_name.to_string(),
            clock_id: None,
            algorithm: Algorithm::Pid {
                kp,
                ki,
                kd,
                step_threshold,
                freq_addend: 0.0,
                integral: 0.0,
                stepped: false,
            },
        }
    }

    /// The configured clock name.
    pub fn clock_name(&self) -> &str {
        &self.clock_name
    }

    /// The resolved target clock, once [`Adjuster::prepare`] succeeded.
    pub fn clock_id(&self) -> Option<ClockId> {
        self.clock_id
    }

    /// Resolve the clock name to a clock handle. Returns whether the
    /// adjuster is usable.
    pub fn prepare(&mut self, inventory: &dyn NetworkInventory) -> bool {
        if self.clock_id.is_none() {
            self.clock_id = if self.clock_name == fptp_proto::SYSTEM_CLOCK_NAME {
                Some(ClockId::System)
            } else {
                inventory.get_phc_clock_id_by_name(&self.clock_name)
            };
        }
        self.clock_id.is_some()
    }

    fn gates_pass(&self, servers: &[Arc<ServerWorker>]) -> bool {
        let Some(clock_id) = self.clock_id else {
            return false;
        };
        if servers.is_empty() {
            return false;
        }
        servers.iter().all(|server| {
            let telemetry = server.telemetry();
            telemetry.adjustment_pending && telemetry.clock_id == Some(clock_id)
        })
    }

    /// Apply one adjustment from the selected servers. Returns whether an
    /// adjustment was applied; controller failures propagate.
    pub fn adjust(
        &mut self,
        servers: &[Arc<ServerWorker>],
        controller: &dyn ClockController,
    ) -> io::Result<bool> {
        if !self.gates_pass(servers) {
            return Ok(false);
        }
        let result = match &mut self.algorithm {
            Algorithm::DirectOffset { step_limit } => {
                adjust_direct(&self.clock_name, *step_limit, servers, controller)
            }
            Algorithm::Pid {
                kp,
                ki,
                kd,
                step_threshold,
                freq_addend,
                integral,
                stepped,
            } => adjust_pid(
                &self.clock_name,
                *kp,
                *ki,
                *kd,
                *step_threshold,
                freq_addend,
                integral,
                stepped,
                servers,
                controller,
            ),
        };
        if let Err(e) = &result {
            error!("{} clock could not be adjusted: {}", self.clock_name, e);
        }
        result.map(|()| true)
    }

    /// Post-adjustment bookkeeping: consumed measurements are cleared so
    /// the same readings never drive two adjustments.
    pub fn finalize(&self, servers: &[Arc<ServerWorker>]) {
        for server in servers {
            server.clear_adjustment_pending();
        }
        match &self.algorithm {
            Algorithm::DirectOffset { .. } => {
                for server in servers {
                    server.clear_calculation_window(false);
                }
            }
            Algorithm::Pid { ki, stepped, .. } => {
                // A live integrator keeps its window between rounds; only a
                // disabled one (or a step) starts the measurement over.
                if *ki != 0.0 && !*stepped {
                    return;
                }
                for server in servers {
                    server.clear_calculation_window(true);
                }
            }
        }
    }
}

fn mean_offset(servers: &[Arc<ServerWorker>]) -> i64 {
    servers.iter().map(|s| s.telemetry().offset).sum::<i64>() / servers.len() as i64
}

fn mean_drift(servers: &[Arc<ServerWorker>]) -> f64 {
    servers.iter().map(|s| s.telemetry().drift).sum::<f64>() / servers.len() as f64
}

fn adjust_direct(
    clock_name: &str,
    step_limit: i64,
    servers: &[Arc<ServerWorker>],
    controller: &dyn ClockController,
) -> io::Result<()> {
    let time_addend = mean_offset(servers);
    if time_addend.abs() >= step_limit {
        controller.step(time_addend)?;
        info!(
            "step limit ({}) exceeded - stepped {} clock by {}, successfully",
            nanoseconds_to_str(step_limit),
            clock_name,
            nanoseconds_to_str(time_addend)
        );
    } else {
        controller.offset_injection(time_addend)?;
        debug!(
            "adjusted {} clock (offset injection) by {}, successfully",
            clock_name,
            nanoseconds_to_str(time_addend)
        );
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn adjust_pid(
    clock_name: &str,
    kp: f64,
    ki: f64,
    kd: f64,
    step_threshold: i64,
    freq_addend: &mut f64,
    integral: &mut f64,
    stepped: &mut bool,
    servers: &[Arc<ServerWorker>],
    controller: &dyn ClockController,
) -> io::Result<()> {
    let mut freq_aggregate = controller.read_frequency()? as f64 / FREQ_UNITS_PER_S_PER_S;

    // "Fake integral": revert the previous frequency delta except for the
    // ki-sized share that stays applied. The integral sum is logged only.
    *integral += *freq_addend * ki;
    freq_aggregate -= *freq_addend - *freq_addend * ki;

    let mut time_addend = mean_offset(servers);
    let offset = time_addend;

    let mut proportional = 0.0;
    let mut differential = 0.0;
    if step_threshold != 0 && time_addend.abs() >= step_threshold {
        freq_aggregate += mean_drift(servers);
        *freq_addend = 0.0;
        *stepped = true;
    } else {
        proportional = kp * (time_addend as f64 / 1e9);
        if kd != 0.0 {
            differential = kd * mean_drift(servers);
        }
        *freq_addend = proportional + differential;
        freq_aggregate += *freq_addend;
        time_addend = 0;
        *stepped = false;
    }

    if time_addend != 0 {
        controller.step(time_addend)?;
    }

    let freq_raw = (freq_aggregate * FREQ_UNITS_PER_S_PER_S) as i64;
    controller.set_frequency(freq_raw.clamp(-FREQ_LIMIT, FREQ_LIMIT))?;

    if time_addend == 0 {
        trace!(
            "PID controller of {clock_name} clock - kp {kp:.3} ({proportional:.12}), \
             ki {ki:.3} ({integral:.12}), kd {kd:.3} ({differential:.12})"
        );
        debug!(
            "adjusted {} clock (frequency) by {}, successfully",
            clock_name,
            nanoseconds_to_str(offset)
        );
    } else {
        info!(
            "step threshold ({}) exceeded - stepped {} clock by {}, successfully",
            nanoseconds_to_str(step_threshold),
            clock_name,
            nanoseconds_to_str(offset)
        );
    }
    Ok(())
}
