// Copyright 2026 U.S. Federal Government (in countries where recognized)
// SPDX-License-Identifier: Apache-2.0

//! The sliding-window calculator turning filtered sequences into
//! `(delay, offset, drift)` estimates.
//!
//! The window is FIFO-bounded to `size`. Inserting a sequence at a new
//! timestamp level empties the window first. The most recent sequence's
//! `(t1, offset)` is remembered before each insert as the previous-sequence
//! anchor so the pass-through variant can compute drift across window
//! boundaries.

use std::collections::VecDeque;

use fptp_proto::{Timestamp, TimestampLevel};

use crate::sequence::Sequence;

/// Default window size of the arithmetic-mean variant.
pub const DEFAULT_CALCULATION_SIZE: usize = 8;

/// Estimation strategy over the window.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CalculationKind {
    /// Report the latest sequence unchanged; drift from the previous one.
    PassThrough,
    /// Arithmetic mean of the window; drift averaged over adjacent pairs.
    ArithmeticMean,
}

impl CalculationKind {
    /// Config token for this kind.
    pub fn as_str(self) -> &'static str {
        match self {
            CalculationKind::PassThrough => "passThrough",
            CalculationKind::ArithmeticMean => "arithmeticMean",
        }
    }

    /// Window size used when the config does not set one.
    pub fn default_size(self) -> usize {
        match self {
            CalculationKind::PassThrough => 1,
            CalculationKind::ArithmeticMean => DEFAULT_CALCULATION_SIZE,
        }
    }
}

/// Resolved calculator configuration.
#[derive(Clone, Debug)]
pub struct CalculationSpec {
    /// Estimation strategy.
    pub kind: CalculationKind,
    /// Window size; `None` selects the variant default.
    pub size: Option<usize>,
    /// Compensation value (ns) subtracted from the offset readout.
    pub compensation: i64,
}

impl CalculationSpec {
    /// Instantiate the calculator.
    pub fn build(&self) -> Calculator {
        Calculator::new(self.kind, self.size, self.compensation)
    }
}

impl Default for CalculationSpec {
    /// The arithmetic-mean calculator with default window size.
    fn default() -> Self {
        CalculationSpec {
            kind: CalculationKind::ArithmeticMean,
            size: None,
            compensation: 0,
        }
    }
}

/// Sliding-window `(delay, offset, drift)` estimator.
#[derive(Debug)]
pub struct Calculator {
    kind: CalculationKind,
    size: usize,
    compensation: i64,

    sequences: VecDeque<Sequence>,
    level: Option<TimestampLevel>,

    valid: bool,
    delay: i64,
    offset: i64,
    drift: f64,
    adjustment: bool,

    prev_anchor: Option<(Timestamp, i64)>,
}

impl Calculator {
    /// Create a calculator. `size` falls back to the variant default when
    /// `None`; `compensation` (ns) is subtracted from the offset readout.
    pub fn new(kind: CalculationKind, size: Option<usize>, compensation: i64) -> Self {
        Calculator {
            kind,
            size: size.unwrap_or_else(|| kind.default_size()).max(1),
            compensation,
            sequences: VecDeque::new(),
            level: None,
            valid: false,
            delay: 0,
            offset: 0,
            drift: 0.0,
            adjustment: false,
            prev_anchor: None,
        }
    }

    /// The estimation strategy.
    pub fn kind(&self) -> CalculationKind {
        self.kind
    }

    /// Configured window size.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of sequences currently in the window.
    pub fn num_sequences(&self) -> usize {
        self.sequences.len()
    }

    /// Whether the window reached its configured size.
    pub fn fully_loaded(&self) -> bool {
        self.sequences.len() >= self.size
    }

    /// Timestamp level of the windowed sequences.
    pub fn level(&self) -> Option<TimestampLevel> {
        self.level
    }

    /// Whether the current `(delay, offset, drift)` readouts are valid.
    pub fn valid(&self) -> bool {
        self.valid
    }

    /// Mean path delay estimate (ns).
    pub fn delay(&self) -> i64 {
        self.delay
    }

    /// Offset estimate (ns) with the compensation value applied.
    pub fn offset(&self) -> i64 {
        self.offset - self.compensation
    }

    /// Drift estimate (ns offset change per ns elapsed, i.e. s/s).
    pub fn drift(&self) -> f64 {
        self.drift
    }

    /// Whether a new adjustment should be applied from the current values.
    pub fn has_adjustment(&self) -> bool {
        self.valid && self.adjustment
    }

    /// Set or clear the adjustment-ready flag.
    pub fn set_adjustment(&mut self, adjustment: bool) {
        self.adjustment = adjustment;
    }

    /// The raw offsets of the windowed sequences, oldest first.
    pub fn window_offsets(&self) -> Vec<i64> {
        self.sequences.iter().map(|seq| seq.offset()).collect()
    }

    /// Time span (ns) between the first and last windowed sequence.
    pub fn window_duration(&self) -> i64 {
        match (self.sequences.front(), self.sequences.back()) {
            (Some(first), Some(last)) if self.sequences.len() > 1 => last.t1() - first.t1(),
            (Some(_), _) => (self.sample_rate() * 1e9) as i64,
            _ => 0,
        }
    }

    /// Seconds between the two most recent inserts.
    pub fn sample_rate(&self) -> f64 {
        match (self.sequences.back(), self.prev_anchor) {
            (Some(last), Some((prev_t1, _))) => (last.t1() - prev_t1) as f64 / 1e9,
            _ => 0.0,
        }
    }

    /// Insert a filtered sequence into the window.
    pub fn insert(&mut self, seq: Sequence) {
        if let Some(back) = self.sequences.back()
            && back.timestamp_level() != seq.timestamp_level()
        {
            self.clear_window();
        }

        if let Some(back) = self.sequences.back() {
            self.prev_anchor = Some((back.t1(), back.offset()));
        }

        while self.sequences.len() >= self.size {
            self.sequences.pop_front();
        }
        self.level = Some(seq.timestamp_level());
        self.sequences.push_back(seq);
    }

    /// Evict the oldest sequence (sequence timeout). An emptied window
    /// resets the calculator.
    pub fn remove(&mut self) {
        self.prev_anchor = None;
        self.sequences.pop_front();
        if self.sequences.is_empty() {
            self.reset();
        }
    }

    fn clear_window(&mut self) {
        self.prev_anchor = None;
        self.sequences.clear();
    }

    /// Empty the window, keeping the last readouts invalidated only if the
    /// window reset does so via [`Calculator::reset`].
    pub fn clear(&mut self) {
        self.clear_window();
    }

    /// Drop everything: window, level, readouts, adjustment flag.
    pub fn reset(&mut self) {
        self.clear_window();
        self.level = None;
        self.valid = false;
        self.delay = 0;
        self.offset = 0;
        self.drift = 0.0;
        self.adjustment = false;
    }

    /// Recompute the readouts from the window.
    pub fn calculate(&mut self) {
        match self.kind {
            CalculationKind::PassThrough => self.calculate_pass_through(),
            CalculationKind::ArithmeticMean => self.calculate_arithmetic_mean(),
        }
    }

    fn calculate_pass_through(&mut self) {
        let Some(last) = self.sequences.back() else {
            self.valid = false;
            return;
        };
        self.valid = true;
        self.delay = last.mean_path_delay();
        self.offset = last.offset();
        match self.prev_anchor {
            Some((prev_t1, prev_offset)) => {
                let dt = last.t1() - prev_t1;
                self.drift = if dt != 0 {
                    (last.offset() - prev_offset) as f64 / dt as f64
                } else {
                    0.0
                };
                self.adjustment = true;
            }
            None => {
                self.drift = 0.0;
                self.adjustment = false;
            }
        }
    }

    fn calculate_arithmetic_mean(&mut self) {
        let n = self.sequences.len();
        if n < 2 {
            return;
        }

        let mut delay = 0i64;
        let mut offset = 0i64;
        let mut drift = 0.0f64;
        for (i, seq) in self.sequences.iter().enumerate() {
            delay += seq.mean_path_delay();
            offset += seq.offset();
            if i >= 1 {
                let prev = &self.sequences[i - 1];
                let dt = seq.t1() - prev.t1();
                if dt != 0 {
                    drift += (seq.offset() - prev.offset()) as f64 / dt as f64;
                }
            }
        }
        self.delay = delay / n as i64;
        self.offset = offset / n as i64;
        self.drift = drift / (n - 1) as f64;
        self.valid = true;
        self.adjustment = n >= self.size;
    }
}
