// Copyright 2026 U.S. Federal Government (in countries where recognized)
// SPDX-License-Identifier: Apache-2.0

//! Server selection: pre-filtering, truechimer detection and the final
//! pick.
//!
//! The selector first narrows the worker set to servers that are ready,
//! measure against the target clock, are allowed to be selected and sit
//! under the delay threshold. Survivors are partitioned into truechimers
//! and falsetickers by intersecting their correctness intervals (the
//! `[min, max]` of offsets in each calculator window), then the configured
//! metric picks the winners:
//!
//! - **stdDev**: smallest standard deviation over the offset history.
//! - **btca**: best dataset in the lexicographic clock-quality order
//!   `(priority1, clockClass, clockAccuracy, clockVariance, priority2,
//!   grandmasterId, stepsRemoved)`.

use std::cmp::Ordering;
use std::sync::Arc;

use log::debug;

use fptp_io::ClockId;
use fptp_proto::{ServerStateDs, TimestampLevel, nanoseconds_to_str};

use crate::worker::{ServerState, ServerWorker, WorkerTelemetry};

/// Default number of servers picked.
pub const DEFAULT_SELECTION_PICK: usize = 1;

/// Default delay threshold: servers farther than this are falsetickers.
pub const DEFAULT_DELAY_THRESHOLD: i64 = 1_500_000_000;

/// Intersection padding applied when every survivor carries hardware
/// timestamps (ns).
pub const DEFAULT_PADDING_HARDWARE: i64 = 100;

/// Intersection padding for software-timestamped measurements (ns).
pub const DEFAULT_PADDING_SYSTEM: i64 = 100_000;

/// Maximum distance of a server's offset from a group's mean offset (ns).
pub const DEFAULT_MAX_OFFSET_DIFFERENCE: i64 = 1_000_000;

/// The final pick metric.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SelectionMethod {
    /// Pick by smallest offset standard deviation.
    StdDev,
    /// Pick by best ServerStateDS in the clock-quality order.
    Btca,
}

/// Compare two clock-quality datasets; `Less` means better.
pub fn compare_server_state(a: &ServerStateDs, b: &ServerStateDs) -> Ordering {
    a.priority1
        .cmp(&b.priority1)
        .then(a.clock_class.cmp(&b.clock_class))
        .then(a.clock_accuracy.cmp(&b.clock_accuracy))
        .then(a.clock_variance.cmp(&b.clock_variance))
        .then(a.priority2.cmp(&b.priority2))
        .then(a.grandmaster_id.cmp(&b.grandmaster_id))
        .then(a.steps_removed.cmp(&b.steps_removed))
}

/// Picks the servers whose measurements drive a clock adjustment.
#[derive(Clone, Debug)]
pub struct Selector {
    method: SelectionMethod,
    pick: usize,
    delay_threshold: i64,
    /// Padding for intersection widening and tie-break hysteresis;
    /// 0 selects the level-dependent default.
    intersection_padding: i64,
    max_offset_difference: i64,
}

impl Selector {
    /// Create a selector.
    pub fn new(method: SelectionMethod, pick: usize) -> Self {
        Selector {
            method,
            pick: pick.max(1),
            delay_threshold: DEFAULT_DELAY_THRESHOLD,
            intersection_padding: 0,
            max_offset_difference: DEFAULT_MAX_OFFSET_DIFFERENCE,
        }
    }

    /// Override the delay threshold (ns).
    pub fn with_delay_threshold(mut self, threshold: i64) -> Self {
        self.delay_threshold = threshold;
        self
    }

    /// Override the intersection padding (ns); 0 restores the
    /// level-dependent default.
    pub fn with_intersection_padding(mut self, padding: i64) -> Self {
        self.intersection_padding = padding;
        self
    }

    /// Override the group offset guard (ns).
    pub fn with_max_offset_difference(mut self, difference: i64) -> Self {
        self.max_offset_difference = difference;
        self
    }

    /// Run selection against the target clock. Returns the picked servers,
    /// already marked `Selected`; unpicked truechimers are `Candidate` and
    /// the rest `Falseticker`.
    pub fn select(
        &self,
        workers: &[Arc<ServerWorker>],
        clock: ClockId,
    ) -> Vec<Arc<ServerWorker>> {
        let survivors = self.prefilter(workers, clock);
        if survivors.is_empty() {
            return Vec::new();
        }

        // Every survivor must hold an unapplied measurement, or this tick
        // produces no selection at all.
        if survivors.iter().any(|(_, t)| !t.adjustment_pending) {
            return Vec::new();
        }
        for (worker, _) in &survivors {
            worker.set_state(ServerState::Ready);
        }

        let padding = self.padding_for(&survivors);
        let truechimers = self.detect_truechimers(&survivors, padding);

        for (index, (worker, _)) in survivors.iter().enumerate() {
            if !truechimers.contains(&index) {
                worker.set_state(ServerState::Falseticker);
            }
        }

        let picked = self.pick_best(&survivors, &truechimers);
        for &index in &truechimers {
            survivors[index].0.set_state(ServerState::Candidate);
        }
        for worker in &picked {
            worker.set_state(ServerState::Selected);
        }
        picked
    }

    fn prefilter(
        &self,
        workers: &[Arc<ServerWorker>],
        clock: ClockId,
    ) -> Vec<(Arc<ServerWorker>, WorkerTelemetry)> {
        let mut survivors = Vec::new();
        for worker in workers {
            let telemetry = worker.telemetry();
            if telemetry.state < ServerState::Ready || telemetry.clock_id != Some(clock) {
                continue;
            }
            if worker.no_select() {
                worker.set_state(ServerState::Falseticker);
                continue;
            }
            if telemetry.delay.abs() > self.delay_threshold {
                if telemetry.state != ServerState::Falseticker {
                    debug!(
                        "considering server {} a falseticker, delay threshold exceeded ({} > {})",
                        worker.dst_address(),
                        nanoseconds_to_str(telemetry.delay.abs()),
                        nanoseconds_to_str(self.delay_threshold)
                    );
                    worker.set_state(ServerState::Falseticker);
                }
                continue;
            }
            survivors.push((worker.clone(), telemetry));
        }
        survivors
    }

    fn padding_for(&self, survivors: &[(Arc<ServerWorker>, WorkerTelemetry)]) -> i64 {
        if self.intersection_padding != 0 {
            return self.intersection_padding;
        }
        let all_hardware = survivors
            .iter()
            .all(|(_, t)| t.level == Some(TimestampLevel::Hardware));
        if all_hardware {
            DEFAULT_PADDING_HARDWARE
        } else {
            DEFAULT_PADDING_SYSTEM
        }
    }

    /// Partition survivors into truechimers via greedy interval grouping.
    /// Returns indices into `survivors`.
    fn detect_truechimers(
        &self,
        survivors: &[(Arc<ServerWorker>, WorkerTelemetry)],
        padding: i64,
    ) -> Vec<usize> {
        if survivors.len() <= 2 {
            return (0..survivors.len()).collect();
        }

        let intervals: Vec<(i64, i64)> = survivors
            .iter()
            .map(|(_, t)| {
                let min = t.window_offsets.iter().min().copied().unwrap_or(t.offset);
                let max = t.window_offsets.iter().max().copied().unwrap_or(t.offset);
                (min, max)
            })
            .collect();

        let mut groups: Vec<Vec<usize>> = Vec::new();
        for (index, &(min, max)) in intervals.iter().enumerate() {
            let mut joined = false;
            for group in &mut groups {
                let (lo, hi) = group_intersection(group, &intervals, padding);
                if max < lo || min > hi {
                    continue;
                }
                let mean_offset = group_mean_offset(group, survivors);
                if (survivors[index].1.offset - mean_offset).abs() > self.max_offset_difference {
                    continue;
                }
                group.push(index);
                joined = true;
                break;
            }
            if !joined {
                groups.push(vec![index]);
            }
        }

        let mut best = 0;
        for candidate in 1..groups.len() {
            if self.group_better(&groups[candidate], &groups[best], survivors, &intervals, padding) {
                best = candidate;
            }
        }
        groups.swap_remove(best)
    }

    /// Whether group `a` beats group `b`: larger membership, then narrower
    /// intersection, then smaller mean stdDev, then smaller mean delay.
    /// Numeric tie-breaks treat differences under `padding` as equal.
    fn group_better(
        &self,
        a: &[usize],
        b: &[usize],
        survivors: &[(Arc<ServerWorker>, WorkerTelemetry)],
        intervals: &[(i64, i64)],
        padding: i64,
    ) -> bool {
        if a.len() != b.len() {
            return a.len() > b.len();
        }

        let width = |group: &[usize]| {
            let (lo, hi) = group_intersection(group, intervals, padding);
            hi - lo
        };
        match fuzzy_cmp(width(a), width(b), padding) {
            Ordering::Less => return true,
            Ordering::Greater => return false,
            Ordering::Equal => {}
        }

        let mean_std_dev = |group: &[usize]| {
            let known: Vec<i64> = group
                .iter()
                .filter_map(|&i| survivors[i].1.std_dev)
                .collect();
            if known.is_empty() {
                i64::MAX
            } else {
                known.iter().sum::<i64>() / known.len() as i64
            }
        };
        match fuzzy_cmp(mean_std_dev(a), mean_std_dev(b), padding) {
            Ordering::Less => return true,
            Ordering::Greater => return false,
            Ordering::Equal => {}
        }

        let mean_delay = |group: &[usize]| {
            group.iter().map(|&i| survivors[i].1.delay).sum::<i64>() / group.len() as i64
        };
        fuzzy_cmp(mean_delay(a), mean_delay(b), padding) == Ordering::Less
    }

    fn pick_best(
        &self,
        survivors: &[(Arc<ServerWorker>, WorkerTelemetry)],
        truechimers: &[usize],
    ) -> Vec<Arc<ServerWorker>> {
        let mut picked: Vec<usize> = Vec::new();
        while picked.len() < self.pick {
            let mut best: Option<usize> = None;
            for &index in truechimers {
                if picked.contains(&index) {
                    continue;
                }
                let better = match self.method {
                    SelectionMethod::StdDev => {
                        let Some(std_dev) = survivors[index].1.std_dev else {
                            continue;
                        };
                        match best {
                            None => true,
                            Some(current) => {
                                std_dev < survivors[current].1.std_dev.unwrap_or(i64::MAX)
                            }
                        }
                    }
                    SelectionMethod::Btca => {
                        let Some(state) = survivors[index].0.server_state_ds() else {
                            continue;
                        };
                        match best.and_then(|current| survivors[current].0.server_state_ds()) {
                            None => true,
                            Some(current) => {
                                compare_server_state(&state, &current) == Ordering::Less
                            }
                        }
                    }
                };
                if better {
                    best = Some(index);
                }
            }
            match best {
                Some(index) => picked.push(index),
                None => break,
            }
        }
        picked
            .into_iter()
            .map(|index| survivors[index].0.clone())
            .collect()
    }
}

fn group_intersection(group: &[usize], intervals: &[(i64, i64)], padding: i64) -> (i64, i64) {
    let n = group.len() as i64;
    let lo = group.iter().map(|&i| intervals[i].0).sum::<i64>() / n;
    let hi = group.iter().map(|&i| intervals[i].1).sum::<i64>() / n;
    if hi - lo < padding {
        let center = (lo + hi) / 2;
        (center - padding / 2, center + padding / 2)
    } else {
        (lo, hi)
    }
}

fn group_mean_offset(group: &[usize], survivors: &[(Arc<ServerWorker>, WorkerTelemetry)]) -> i64 {
    group.iter().map(|&i| survivors[i].1.offset).sum::<i64>() / group.len() as i64
}

/// Compare treating differences smaller than `padding` as equal.
fn fuzzy_cmp(a: i64, b: i64, padding: i64) -> Ordering {
    if (a - b).abs() < padding {
        Ordering::Equal
    } else {
        a.cmp(&b)
    }
}
