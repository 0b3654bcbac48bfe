// Copyright 2026 U.S. Federal Government (in countries where recognized)
// SPDX-License-Identifier: Apache-2.0

//! Client-mode configuration: the `clientMode` object of the service's
//! JSON document.
//!
//! Deserialization is structural; [`ClientModeConfig::resolve`] then checks
//! every numeric range and enumerated token, aggregating human-readable
//! diagnostics instead of stopping at the first problem. Only a clean
//! config yields the resolved runtime types.

use std::net::IpAddr;
use std::path::PathBuf;

use serde::Deserialize;

use fptp_proto::TimestampLevel;

use crate::adjustment::{
    Adjuster, DEFAULT_KD, DEFAULT_KI, DEFAULT_KP, DEFAULT_STEP_THRESHOLD, KD_RANGE, KI_RANGE,
    KP_RANGE,
};
use crate::calculation::{CalculationKind, CalculationSpec};
use crate::filter::{DEFAULT_FILTER_PICK, DEFAULT_FILTER_SIZE, FilterKind, FilterSpec};
use crate::selection::{DEFAULT_SELECTION_PICK, SelectionMethod, Selector};
use crate::worker::{DEFAULT_MS_TIMEOUT, STATE_INTERVAL_NEVER, WorkerConfig};

/// The `clientMode` configuration object.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientModeConfig {
    /// Whether client mode runs at all.
    #[serde(default)]
    pub enabled: bool,
    /// Path of the periodically rewritten state table file.
    pub state_file: Option<String>,
    /// Also log the state table once per second.
    #[serde(default)]
    pub state_table: bool,
    /// Selection algorithm configuration.
    pub selection: Option<SelectionEntry>,
    /// Adjustment algorithm configurations, one per target clock.
    pub adjustments: Option<Vec<AdjustmentEntry>>,
    /// The servers to synchronize against.
    #[serde(default)]
    pub servers: Vec<ServerEntry>,
}

/// One entry of the `servers` array.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerEntry {
    /// Server address.
    pub dst_address: String,
    /// Server event port (default 319).
    #[serde(alias = "dstPort")]
    pub dst_event_port: Option<u16>,
    /// Server general port (default event port + 1).
    pub dst_general_port: Option<u16>,
    /// Local interface to use.
    pub src_interface: String,
    /// Local event port (default 319).
    #[serde(alias = "srcPort")]
    pub src_event_port: Option<u16>,
    /// Local general port (default event port + 1).
    pub src_general_port: Option<u16>,
    /// One-step requests (single packet, user-level timestamps).
    #[serde(default)]
    pub one_step: bool,
    /// Attach the Request TLV to the Sync instead of the Follow-Up.
    #[serde(default)]
    pub sync_tlv: bool,
    /// Request pacing exponent, −7..=7 (2^n seconds).
    #[serde(alias = "requestInterval")]
    pub interval: Option<i8>,
    /// ServerStateDS request pacing exponent, or 127 for "never".
    pub state_interval: Option<i8>,
    /// Per-sequence timeout in milliseconds, 10..=10000.
    pub ms_timeout: Option<u32>,
    /// Requested timestamp level: "usr", "so" or "hw".
    pub timestamp_level: Option<String>,
    /// Measure this server but never select it.
    #[serde(default)]
    pub no_select: bool,
    /// Filter chain.
    pub filters: Option<Vec<FilterEntry>>,
    /// Calculator configuration.
    pub calculation: Option<CalculationEntry>,
}

/// One entry of a server's `filters` array.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterEntry {
    /// Filter algorithm: "luckyPacket" or "medianOffset".
    #[serde(rename = "type")]
    pub kind: String,
    /// Buffer size (default 16).
    pub size: Option<usize>,
    /// Sequences emitted per flush (default 1).
    pub pick: Option<usize>,
}

/// A server's `calculation` object.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalculationEntry {
    /// Calculation algorithm: "passThrough" or "arithmeticMean".
    #[serde(rename = "type")]
    pub kind: String,
    /// Window size; pass-through accepts 1, other variants need at least 2.
    pub size: Option<usize>,
    /// Compensation value (ns) subtracted from the offset readout.
    pub compensation_value: Option<i64>,
}

/// The `selection` object.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectionEntry {
    /// Selection algorithm: "stdDev" or "btca".
    #[serde(rename = "type")]
    pub kind: Option<String>,
    /// Number of servers to pick (default 1).
    pub pick: Option<usize>,
    /// Delay threshold in nanoseconds.
    pub delay_threshold: Option<i64>,
    /// Correctness-interval padding in nanoseconds; 0 selects the
    /// level-dependent default.
    pub intersection_padding: Option<i64>,
    /// Maximum offset distance from a group's mean (ns).
    pub max_offset_difference: Option<i64>,
}

/// One entry of the `adjustments` array.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdjustmentEntry {
    /// Adjustment algorithm: "adjtimex" or "pidController".
    #[serde(rename = "type")]
    pub kind: String,
    /// Target clock name ("system" or a PHC device name).
    pub clock: String,
    /// Proportional ratio (pidController).
    #[serde(alias = "proportionalRatio", alias = "pRatio")]
    pub kp: Option<f64>,
    /// Integral ratio (pidController).
    #[serde(alias = "integralRatio", alias = "iRatio")]
    pub ki: Option<f64>,
    /// Differential ratio (pidController).
    #[serde(alias = "differentialRatio", alias = "dRatio")]
    pub kd: Option<f64>,
    /// Step threshold in nanoseconds (pidController).
    pub step_threshold: Option<i64>,
    /// Step limit in nanoseconds (adjtimex).
    pub step_limit: Option<i64>,
}

/// Runtime objects produced from a valid client-mode config.
#[derive(Debug)]
pub struct ResolvedClientMode {
    /// Whether client mode runs.
    pub enabled: bool,
    /// State table file path.
    pub state_file: Option<PathBuf>,
    /// Log the state table once per second.
    pub state_table: bool,
    /// The selector.
    pub selector: Selector,
    /// The adjusters.
    pub adjusters: Vec<Adjuster>,
    /// Per-server worker configurations.
    pub workers: Vec<WorkerConfig>,
}

impl ClientModeConfig {
    /// Validate and resolve. All problems are reported at once.
    pub fn resolve(&self) -> Result<ResolvedClientMode, Vec<String>> {
        let mut errs = Vec::new();

        let mut workers = Vec::new();
        for (index, server) in self.servers.iter().enumerate() {
            match resolve_server(server, &mut errs) {
                Some(config) => workers.push(config),
                None => {
                    errs.push(format!("\"servers\" entry {index} is invalid"));
                }
            }
        }

        let selector = resolve_selection(self.selection.as_ref(), &mut errs);

        let mut adjusters = Vec::new();
        match &self.adjustments {
            Some(entries) => {
                for entry in entries {
                    if let Some(adjuster) = resolve_adjustment(entry, &mut errs) {
                        adjusters.push(adjuster);
                    }
                }
            }
            // Without an adjustments array the system clock is driven by
            // the direct-offset adjuster.
            None => adjusters.push(Adjuster::direct_offset(fptp_proto::SYSTEM_CLOCK_NAME, None)),
        }

        if !errs.is_empty() {
            return Err(errs);
        }
        Ok(ResolvedClientMode {
            enabled: self.enabled,
            state_file: self.state_file.as_ref().map(PathBuf::from),
            state_table: self.state_table,
            selector,
            adjusters,
            workers,
        })
    }
}

fn resolve_server(entry: &ServerEntry, errs: &mut Vec<String>) -> Option<WorkerConfig> {
    let mut valid = true;

    let dst_address: Option<IpAddr> = match entry.dst_address.parse() {
        Ok(addr) => Some(addr),
        Err(_) => {
            errs.push(format!(
                "\"{}\" is not a valid value for property \"dstAddress\"",
                entry.dst_address
            ));
            valid = false;
            None
        }
    };

    let interval = entry.interval.unwrap_or(0);
    if !(-7..=7).contains(&interval) {
        errs.push(format!(
            "{interval} is not a valid value (-7 <= n <= +7) for property \"requestInterval\""
        ));
        valid = false;
    }

    let state_interval = entry.state_interval.unwrap_or(STATE_INTERVAL_NEVER);
    if state_interval != STATE_INTERVAL_NEVER && !(interval..=7).contains(&state_interval) {
        errs.push(format!(
            "{state_interval} is not a valid value ({interval} <= n <= +7) \
             for property \"stateInterval\""
        ));
        valid = false;
    }

    let ms_timeout = entry.ms_timeout.unwrap_or(DEFAULT_MS_TIMEOUT);
    if !(10..=10_000).contains(&ms_timeout) {
        errs.push(format!(
            "{ms_timeout} is not a valid value (10 <= n <= 10000) for property \"msTimeout\""
        ));
        valid = false;
    }

    let timestamp_level = match &entry.timestamp_level {
        Some(token) => match TimestampLevel::from_short_str(token) {
            Some(level) => level,
            None => {
                errs.push(format!(
                    "\"{token}\" is not a valid value (usr/so/hw) for property \"timestampLevel\""
                ));
                valid = false;
                TimestampLevel::Hardware
            }
        },
        None => TimestampLevel::Hardware,
    };

    let mut filters = Vec::new();
    for filter in entry.filters.iter().flatten() {
        match resolve_filter(filter, errs) {
            Some(spec) => filters.push(spec),
            None => valid = false,
        }
    }

    let calculation = match &entry.calculation {
        Some(calculation) => match resolve_calculation(calculation, errs) {
            Some(spec) => spec,
            None => {
                valid = false;
                CalculationSpec::default()
            }
        },
        None => CalculationSpec::default(),
    };

    if !valid {
        return None;
    }

    let dst_event_port = entry.dst_event_port.unwrap_or(fptp_proto::UDP_EVENT_PORT);
    let src_event_port = entry.src_event_port.unwrap_or(fptp_proto::UDP_EVENT_PORT);
    Some(WorkerConfig {
        dst_address: dst_address?,
        dst_event_port,
        dst_general_port: entry.dst_general_port.unwrap_or(dst_event_port + 1),
        src_interface: entry.src_interface.clone(),
        src_event_port,
        src_general_port: entry.src_general_port.unwrap_or(src_event_port + 1),
        one_step: entry.one_step,
        // One-step exchanges have no Follow-Up to carry the TLV.
        sync_tlv: entry.sync_tlv || entry.one_step,
        interval,
        state_interval,
        ms_timeout,
        timestamp_level,
        no_select: entry.no_select,
        filters,
        calculation,
    })
}

fn resolve_filter(entry: &FilterEntry, errs: &mut Vec<String>) -> Option<FilterSpec> {
    let kind = match entry.kind.as_str() {
        "luckyPacket" => FilterKind::LuckyPacket,
        "medianOffset" => FilterKind::MedianOffset,
        other => {
            errs.push(format!(
                "\"{other}\" is not a valid \"type\" (luckyPacket/medianOffset) \
                 within items of \"filters\""
            ));
            return None;
        }
    };
    let size = entry.size.unwrap_or(DEFAULT_FILTER_SIZE);
    let pick = entry.pick.unwrap_or(DEFAULT_FILTER_PICK);
    let mut valid = true;
    if size == 0 {
        errs.push("0 is not a valid value (0 < n) for property \"size\"".to_string());
        valid = false;
    }
    if pick == 0 {
        errs.push("0 is not a valid value (0 < n) for property \"pick\"".to_string());
        valid = false;
    }
    valid.then_some(FilterSpec { kind, size, pick })
}

fn resolve_calculation(entry: &CalculationEntry, errs: &mut Vec<String>) -> Option<CalculationSpec> {
    let kind = match entry.kind.as_str() {
        "passThrough" => CalculationKind::PassThrough,
        "arithmeticMean" => CalculationKind::ArithmeticMean,
        other => {
            errs.push(format!(
                "\"{other}\" is not a valid \"type\" (passThrough/arithmeticMean) \
                 within \"calculation\" objects"
            ));
            return None;
        }
    };
    if let Some(size) = entry.size {
        let min = kind.default_size().min(2);
        if size < min {
            errs.push(format!(
                "{size} is not a valid value ({min} <= n) for property \"size\""
            ));
            return None;
        }
    }
    Some(CalculationSpec {
        kind,
        size: entry.size,
        compensation: entry.compensation_value.unwrap_or(0),
    })
}

fn resolve_selection(entry: Option<&SelectionEntry>, errs: &mut Vec<String>) -> Selector {
    let entry = entry.cloned().unwrap_or_default();
    let method = match entry.kind.as_deref() {
        None | Some("stdDev") | Some("bestStandardDeviation") => SelectionMethod::StdDev,
        Some("btca") | Some("bestTimeTransmitterClock") => SelectionMethod::Btca,
        Some(other) => {
            errs.push(format!(
                "\"{other}\" is not a valid \"type\" (stdDev/btca) within \"selection\""
            ));
            SelectionMethod::StdDev
        }
    };
    let pick = entry.pick.unwrap_or(DEFAULT_SELECTION_PICK);
    if pick == 0 {
        errs.push("0 is not a valid value (0 < n) for property \"pick\"".to_string());
    }
    let mut selector = Selector::new(method, pick.max(1));
    if let Some(threshold) = entry.delay_threshold {
        if threshold <= 0 {
            errs.push(format!(
                "{threshold} is not a valid value (0 < n) for property \"delayThreshold\""
            ));
        } else {
            selector = selector.with_delay_threshold(threshold);
        }
    }
    if let Some(padding) = entry.intersection_padding {
        if padding < 0 {
            errs.push(format!(
                "{padding} is not a valid value (0 <= n) for property \"intersectionPadding\""
            ));
        } else {
            selector = selector.with_intersection_padding(padding);
        }
    }
    if let Some(difference) = entry.max_offset_difference {
        if difference <= 0 {
            errs.push(format!(
                "{difference} is not a valid value (0 < n) for property \"maxOffsetDifference\""
            ));
        } else {
            selector = selector.with_max_offset_difference(difference);
        }
    }
    selector
}

fn resolve_adjustment(entry: &AdjustmentEntry, errs: &mut Vec<String>) -> Option<Adjuster> {
    if entry.clock.is_empty() {
        errs.push("\"clock\" must be specified within items of \"adjustments\"".to_string());
        return None;
    }
    match entry.kind.as_str() {
        "adjtimex" => {
            if let Some(limit) = entry.step_limit
                && limit <= 0
            {
                errs.push(format!(
                    "{limit} is not a valid value (0 < n) for property \"stepLimit\""
                ));
                return None;
            }
            Some(Adjuster::direct_offset(&entry.clock, entry.step_limit))
        }
        "pidController" => {
            let mut valid = true;
            let kp = entry.kp.unwrap_or(DEFAULT_KP);
            if !(KP_RANGE.0..=KP_RANGE.1).contains(&kp) {
                errs.push(format!(
                    "value of property \"kp\" must be between {} and {}",
                    KP_RANGE.0, KP_RANGE.1
                ));
                valid = false;
            }
            let ki = entry.ki.unwrap_or(DEFAULT_KI);
            if ki != 0.0 && !(KI_RANGE.0..=KI_RANGE.1).contains(&ki) {
                errs.push(format!(
                    "value of property \"ki\" must be between {} and {}",
                    KI_RANGE.0, KI_RANGE.1
                ));
                valid = false;
            }
            let kd = entry.kd.unwrap_or(DEFAULT_KD);
            if !(KD_RANGE.0..=KD_RANGE.1).contains(&kd) {
                errs.push(format!(
                    "value of property \"kd\" must be between {} and {}",
                    KD_RANGE.0, KD_RANGE.1
                ));
                valid = false;
            }
            let step_threshold = entry.step_threshold.unwrap_or(DEFAULT_STEP_THRESHOLD);
            if step_threshold < 0 {
                errs.push(format!(
                    "{step_threshold} is not a valid value (0 <= n) \
                     for property \"stepThreshold\""
                ));
                valid = false;
            }
            valid.then(|| Adjuster::pid(&entry.clock, kp, ki, kd, step_threshold))
        }
        other => {
            errs.push(format!(
                "\"{other}\" is not a valid \"type\" (adjtimex/pidController) \
                 within items of \"adjustments\""
            ));
            None
        }
    }
}
