// Copyright 2026 U.S. Federal Government (in countries where recognized)
// SPDX-License-Identifier: Apache-2.0

//! The per-server worker: request pacing, reachability, standard-deviation
//! history and the filter/calculation pipeline for one remote server.
//!
//! Each worker runs its own task that builds and transmits Sync (+ optional
//! Follow-Up) requests at `2^interval` second pacing, sleeping in 100 ms
//! slices so shutdown and the once-per-second timeout sweep stay
//! responsive. Response parts are delivered by the client coordinator
//! through [`ServerWorker::process_message`]. Telemetry reads take the
//! shared lock briefly; the selection and adjustment code works on
//! snapshots.

use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use log::{debug, info, trace, warn};
use tokio::sync::watch;

use fptp_io::{ClockId, NetworkInventory, SendRequest, SocketProfile, SocketSpec};
use fptp_proto::{
    Message, MessageType, RequestTlv, ResponseTlv, ServerStateDs, Timestamp, TimestampLevel,
    nanoseconds_to_str,
};

use crate::calculation::{CalculationSpec, Calculator};
use crate::filter::{FilterChain, FilterSpec};
use crate::ledger::{LedgerEvent, SequenceLedger};
use crate::sequence::Sequence;

/// `stateInterval` value meaning "never request the ServerStateDS".
pub const STATE_INTERVAL_NEVER: i8 = 0x7f;

/// Default request timeout in milliseconds.
pub const DEFAULT_MS_TIMEOUT: u32 = 2000;

/// Slots in the standard-deviation offset history.
pub const STD_DEV_HISTORY_SIZE: usize = 16;

const SLICE_USEC: i64 = 100_000;

/// Lifecycle state of a server as seen by the client.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub enum ServerState {
    /// No exchange has completed yet.
    Initializing,
    /// The reach register collapsed to zero.
    Unreachable,
    /// Completions are arriving but the calculator is not full.
    Collecting,
    /// The calculator is fully loaded; eligible for selection.
    Ready,
    /// Rejected by the selector.
    Falseticker,
    /// Survived truechimer detection but was not picked.
    Candidate,
    /// Picked; its measurements drive clock adjustments.
    Selected,
}

impl ServerState {
    /// One-character mark used in the state table.
    pub fn mark(self) -> char {
        match self {
            ServerState::Initializing => '?',
            ServerState::Unreachable => '!',
            ServerState::Collecting => '^',
            ServerState::Ready => ' ',
            ServerState::Falseticker => '-',
            ServerState::Candidate => '+',
            ServerState::Selected => '*',
        }
    }

    /// Human-readable name.
    pub fn as_str(self) -> &'static str {
        match self {
            ServerState::Initializing => "Initializing",
            ServerState::Unreachable => "Unreachable",
            ServerState::Collecting => "Collecting",
            ServerState::Ready => "Ready",
            ServerState::Falseticker => "Falseticker",
            ServerState::Candidate => "Candidate",
            ServerState::Selected => "Selected",
        }
    }
}

impl std::fmt::Display for ServerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolved per-server configuration.
#[derive(Clone, Debug)]
pub struct WorkerConfig {
    /// Server address.
    pub dst_address: IpAddr,
    /// Server event port.
    pub dst_event_port: u16,
    /// Server general port.
    pub dst_general_port: u16,
    /// Local interface requests leave from.
    pub src_interface: String,
    /// Local event port.
    pub src_event_port: u16,
    /// Local general port.
    pub src_general_port: u16,
    /// One-step mode: no Follow-Up, TLV on the Sync, user-level timestamps.
    pub one_step: bool,
    /// Attach the Request TLV to the Sync instead of the Follow-Up.
    pub sync_tlv: bool,
    /// Request pacing exponent (2^interval seconds).
    pub interval: i8,
    /// ServerStateDS request pacing exponent, or
    /// [`STATE_INTERVAL_NEVER`].
    pub state_interval: i8,
    /// Per-sequence timeout in milliseconds.
    pub ms_timeout: u32,
    /// Requested timestamp level.
    pub timestamp_level: TimestampLevel,
    /// Never select this server (it stays a falseticker).
    pub no_select: bool,
    /// Filter chain configuration.
    pub filters: Vec<FilterSpec>,
    /// Calculator configuration.
    pub calculation: CalculationSpec,
}

impl WorkerConfig {
    /// A minimal config for the given server address; used by tests and as
    /// the base the config layer fills in.
    pub fn new(dst_address: IpAddr, src_interface: &str) -> Self {
        WorkerConfig {
            dst_address,
            dst_event_port: fptp_proto::UDP_EVENT_PORT,
            dst_general_port: fptp_proto::UDP_GENERAL_PORT,
            src_interface: src_interface.to_string(),
            src_event_port: fptp_proto::UDP_EVENT_PORT,
            src_general_port: fptp_proto::UDP_GENERAL_PORT,
            one_step: false,
            sync_tlv: false,
            interval: 0,
            state_interval: STATE_INTERVAL_NEVER,
            ms_timeout: DEFAULT_MS_TIMEOUT,
            timestamp_level: TimestampLevel::Hardware,
            no_select: false,
            filters: Vec::new(),
            calculation: CalculationSpec::default(),
        }
    }
}

/// Telemetry snapshot used by selection and adjustment.
#[derive(Clone, Debug)]
pub struct WorkerTelemetry {
    /// Current lifecycle state.
    pub state: ServerState,
    /// Whether the calculator readouts are valid.
    pub valid: bool,
    /// Delay estimate (ns).
    pub delay: i64,
    /// Offset estimate (ns, compensation applied).
    pub offset: i64,
    /// Drift estimate (s/s).
    pub drift: f64,
    /// Whether an unapplied adjustment is pending.
    pub adjustment_pending: bool,
    /// Timestamp level of the calculator window.
    pub level: Option<TimestampLevel>,
    /// Raw offsets in the calculator window, oldest first.
    pub window_offsets: Vec<i64>,
    /// Standard deviation over the offset history, when computable.
    pub std_dev: Option<i64>,
    /// Clock the measurements refer to.
    pub clock_id: Option<ClockId>,
}

struct WorkerShared {
    state: ServerState,
    reach: u16,
    server_state: Option<ServerStateDs>,
    clock_name: Option<String>,
    clock_id: Option<ClockId>,
    ledger: SequenceLedger,
    filters: FilterChain,
    calculation: Calculator,
    std_dev_history: [Option<i64>; STD_DEV_HISTORY_SIZE],
    std_dev_index: usize,
    std_dev: Option<i64>,
}

impl WorkerShared {
    fn new(config: &WorkerConfig) -> Self {
        WorkerShared {
            state: ServerState::Initializing,
            reach: 0,
            server_state: None,
            clock_name: None,
            clock_id: None,
            ledger: SequenceLedger::new(),
            filters: FilterChain::new(config.filters.iter().map(FilterSpec::build).collect()),
            calculation: config.calculation.build(),
            std_dev_history: [None; STD_DEV_HISTORY_SIZE],
            std_dev_index: 0,
            std_dev: None,
        }
    }

    fn push_std_dev_sample(&mut self, sample: Option<i64>) {
        self.std_dev_history[self.std_dev_index] = sample;
        self.std_dev_index = (self.std_dev_index + 1) % STD_DEV_HISTORY_SIZE;
        self.std_dev = std_dev_of(&self.std_dev_history);
    }

    fn clock_id(&self) -> Option<ClockId> {
        match self.calculation.level() {
            None => None,
            Some(level) if level <= TimestampLevel::Socket => Some(ClockId::System),
            Some(_) => self.clock_id,
        }
    }

    fn clock_name(&self) -> Option<String> {
        match self.calculation.level() {
            None => None,
            Some(level) if level <= TimestampLevel::Socket => {
                Some(fptp_proto::SYSTEM_CLOCK_NAME.to_string())
            }
            Some(_) => self.clock_name.clone(),
        }
    }
}

/// Unbiased sample standard deviation over the non-missing history slots.
fn std_dev_of(history: &[Option<i64>; STD_DEV_HISTORY_SIZE]) -> Option<i64> {
    let samples: Vec<i64> = history.iter().flatten().copied().collect();
    if samples.len() < 2 {
        return None;
    }
    let mean = samples.iter().sum::<i64>() as f64 / samples.len() as f64;
    let var = samples
        .iter()
        .map(|&s| (s as f64 - mean).powi(2))
        .sum::<f64>()
        / (samples.len() - 1) as f64;
    Some(var.sqrt() as i64)
}

/// Client-side representation of one remote server.
pub struct ServerWorker {
    config: WorkerConfig,
    invalid: bool,
    shared: RwLock<WorkerShared>,
}

impl ServerWorker {
    /// Create a worker, checking that the configured source interface
    /// exists and carries an address of the destination family.
    pub fn new(config: WorkerConfig, inventory: &dyn NetworkInventory) -> Self {
        let mut invalid = false;
        if !inventory.has_interface(&config.src_interface) {
            warn!(
                "server {} will not be used, source interface {} not found",
                config.dst_address, config.src_interface
            );
            invalid = true;
        } else if inventory
            .get_family_address(&config.src_interface, config.dst_address.is_ipv6())
            .is_none()
        {
            warn!(
                "server {} will not be used, no usable address on source interface {}",
                config.dst_address, config.src_interface
            );
            invalid = true;
        }

        let shared = WorkerShared::new(&config);
        ServerWorker {
            config,
            invalid,
            shared: RwLock::new(shared),
        }
    }

    /// Whether the worker was rejected at construction.
    pub fn invalid(&self) -> bool {
        self.invalid
    }

    /// The worker's configuration.
    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// The server address.
    pub fn dst_address(&self) -> IpAddr {
        self.config.dst_address
    }

    /// Whether this server is barred from selection.
    pub fn no_select(&self) -> bool {
        self.config.no_select
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ServerState {
        self.shared.read().unwrap().state
    }

    /// Force the lifecycle state (selector transitions).
    pub fn set_state(&self, state: ServerState) {
        self.shared.write().unwrap().state = state;
    }

    /// Current reach register.
    pub fn reach(&self) -> u16 {
        self.shared.read().unwrap().reach
    }

    /// Last known ServerStateDS, when valid.
    pub fn server_state_ds(&self) -> Option<ServerStateDs> {
        self.shared.read().unwrap().server_state
    }

    /// The clock the worker's measurements refer to.
    pub fn clock_id(&self) -> Option<ClockId> {
        self.shared.read().unwrap().clock_id()
    }

    /// Telemetry snapshot for selection/adjustment.
    pub fn telemetry(&self) -> WorkerTelemetry {
        let shared = self.shared.read().unwrap();
        WorkerTelemetry {
            state: shared.state,
            valid: shared.calculation.valid(),
            delay: shared.calculation.delay(),
            offset: shared.calculation.offset(),
            drift: shared.calculation.drift(),
            adjustment_pending: shared.calculation.has_adjustment(),
            level: shared.calculation.level(),
            window_offsets: shared.calculation.window_offsets(),
            std_dev: shared.std_dev,
            clock_id: shared.clock_id(),
        }
    }

    /// Clear the pending-adjustment flag after an adjuster consumed the
    /// current measurement.
    pub fn clear_adjustment_pending(&self) {
        self.shared.write().unwrap().calculation.set_adjustment(false);
    }

    /// Drop the calculator window. `only_multi_sample` restricts the clear
    /// to calculators with a window larger than one sequence.
    pub fn clear_calculation_window(&self, only_multi_sample: bool) {
        let mut shared = self.shared.write().unwrap();
        if only_multi_sample && shared.calculation.size() <= 1 {
            return;
        }
        shared.calculation.clear();
    }

    /// The sockets the coordinator must receive on for this worker.
    pub fn socket_specs(&self) -> Vec<SocketSpec> {
        let (event, general) = if self.config.dst_address.is_ipv6() {
            (SocketProfile::Ipv6Event, SocketProfile::Ipv6General)
        } else {
            (SocketProfile::Ipv4Event, SocketProfile::Ipv4General)
        };
        vec![
            SocketSpec {
                interface: self.config.src_interface.clone(),
                profile: event,
                port: self.config.src_event_port,
                timestamp_level: Some(self.config.timestamp_level),
            },
            SocketSpec {
                interface: self.config.src_interface.clone(),
                profile: general,
                port: self.config.src_general_port,
                timestamp_level: None,
            },
        ]
    }

    /// Feed a received response part into the matching sequence.
    pub fn process_message(
        &self,
        msg: &Message,
        tlv: Option<&ResponseTlv>,
        rx_level: Option<TimestampLevel>,
        rx_timestamp: Option<Timestamp>,
    ) {
        match msg.msg_type {
            MessageType::Sync => trace!(
                "received Sync response (seq id {}, {} timestamp) from {}",
                msg.sequence_id,
                rx_level.map(|l| l.as_short_str()).unwrap_or("no"),
                self.config.dst_address
            ),
            MessageType::FollowUp => trace!(
                "received Follow-Up response (seq id {}) from {}",
                msg.sequence_id, self.config.dst_address
            ),
            _ => return,
        }

        let mut shared = self.shared.write().unwrap();
        let event = shared.ledger.on_receive(
            self.config.dst_address,
            msg,
            tlv,
            rx_level,
            rx_timestamp,
            Instant::now(),
        );
        match event {
            LedgerEvent::None => {}
            LedgerEvent::TimedOut(seq) => self.on_sequence_timeout(&mut shared, seq),
            LedgerEvent::Complete(seq) => self.on_sequence_complete(&mut shared, seq),
        }
    }

    /// Move overdue sequences through timeout bookkeeping.
    pub fn sweep_timeouts(&self) {
        let mut shared = self.shared.write().unwrap();
        for seq in shared.ledger.sweep_timeouts(Instant::now()) {
            self.on_sequence_timeout(&mut shared, seq);
        }
    }

    fn on_sequence_complete(&self, shared: &mut WorkerShared, seq: Sequence) {
        shared.reach = (shared.reach << 1) | 1;

        if seq.server_state_requested() {
            shared.server_state = seq.server_state().copied();
        }

        trace!(
            "request sequence complete - server {}, id {}, reach 0x{:04x}, delay {}, offset {}",
            self.config.dst_address,
            seq.sequence_id(),
            shared.reach,
            nanoseconds_to_str(seq.mean_path_delay()),
            nanoseconds_to_str(seq.offset())
        );

        let emitted = shared.filters.push(seq);
        if emitted.is_empty() {
            return;
        }

        for seq in emitted {
            shared.push_std_dev_sample(Some(seq.offset()));
            shared.calculation.insert(seq);
        }

        shared.calculation.calculate();
        if shared.calculation.fully_loaded() {
            if shared.state < ServerState::Ready {
                shared.state = ServerState::Ready;
            }
            debug!(
                "calculation complete - server {}, delay {}, offset {}, drift {}",
                self.config.dst_address,
                nanoseconds_to_str(shared.calculation.delay()),
                nanoseconds_to_str(shared.calculation.offset()),
                nanoseconds_to_str((shared.calculation.drift() * 1e9) as i64)
            );
        } else if shared.state < ServerState::Collecting {
            shared.state = ServerState::Collecting;
        }
    }

    fn on_sequence_timeout(&self, shared: &mut WorkerShared, seq: Sequence) {
        shared.reach = (shared.reach << 1) & !1;

        if seq.server_state_requested() {
            shared.server_state = None;
        }

        if shared.reach == 0xfffe {
            info!(
                "request timed out unexpectedly (reach was 0xffff) - server {}, id {}",
                self.config.dst_address,
                seq.sequence_id()
            );
        } else {
            debug!(
                "request timed out - server {}, id {}, reach 0x{:04x}",
                self.config.dst_address,
                seq.sequence_id(),
                shared.reach
            );
        }

        if shared.reach == 0 {
            if shared.state > ServerState::Unreachable {
                warn!(
                    "server {} is not reachable any longer (reach 0x0000)",
                    self.config.dst_address
                );
            }
            shared.state = ServerState::Unreachable;
            shared.calculation.reset();
            shared.server_state = None;
        }

        // Four consecutive losses flush the filters; the calculator loses
        // its oldest entry only if the filters had nothing left to flush.
        let mut remove = true;
        if !shared.filters.is_empty() && shared.reach & 0xf == 0 && shared.filters.clear() {
            remove = false;
        }
        if remove {
            shared.calculation.remove();
        }

        shared.push_std_dev_sample(None);
    }

    /// One row of the state table.
    pub fn state_row(&self) -> String {
        let shared = self.shared.read().unwrap();
        let clock = shared.clock_name().unwrap_or_else(|| "-".to_string());
        let btca = shared
            .server_state
            .map(|state| state.tuple_str())
            .unwrap_or_else(|| "unknown".to_string());
        let (delay, offset) = if shared.calculation.valid() {
            (
                nanoseconds_to_str(shared.calculation.delay()),
                nanoseconds_to_str(shared.calculation.offset()),
            )
        } else {
            ("-".to_string(), "-".to_string())
        };
        let std_dev = shared
            .std_dev
            .map(nanoseconds_to_str)
            .unwrap_or_else(|| "-".to_string());
        format!(
            "{} {:<18}{:<11}{:<28}{:<9}{:<7}{:<13}{:<13}{:<13}",
            shared.state.mark(),
            self.config.dst_address.to_string(),
            clock,
            btca,
            format!("0x{:04x}", shared.reach),
            self.config.interval,
            delay,
            offset,
            std_dev,
        )
    }

    fn reset_state(&self) {
        let mut shared = self.shared.write().unwrap();
        *shared = WorkerShared::new(&self.config);
    }

    /// The request pacing loop. Runs until `stop` flips to true.
    pub async fn run(
        self: Arc<Self>,
        inventory: Arc<dyn NetworkInventory>,
        stop: watch::Receiver<bool>,
    ) {
        self.reset_state();

        // Learn the PHC behind the source interface when hardware
        // timestamping is in play.
        if self.config.timestamp_level == TimestampLevel::Hardware
            && inventory.get_interface_timestamp_level(&self.config.src_interface)
                == Some(TimestampLevel::Hardware)
            && let Some(phc) = inventory.get_interface_phc_info(&self.config.src_interface)
        {
            let mut shared = self.shared.write().unwrap();
            shared.clock_name = Some(phc.name);
            shared.clock_id = Some(phc.clock_id);
        }

        let interval_usec = (2f64.powi(self.config.interval as i32) * 1e6) as i64;
        let state_interval_usec = if self.config.state_interval == STATE_INTERVAL_NEVER {
            0
        } else {
            (2f64.powi(self.config.state_interval as i32) * 1e6) as i64
        };

        let mut sequence_id: u16 = 0;
        let mut usec: i64 = 0;
        let mut state_usec: i64 = 0;
        let mut last_sweep = Instant::now();

        debug!(
            "server worker {} starting (interval {}, timeout {} ms)",
            self.config.dst_address, self.config.interval, self.config.ms_timeout
        );

        while !*stop.borrow() {
            if last_sweep.elapsed() >= Duration::from_secs(1) {
                last_sweep = Instant::now();
                self.sweep_timeouts();
            }

            if usec == 0 {
                usec = interval_usec.max(1);
                let request_state =
                    self.config.state_interval != STATE_INTERVAL_NEVER && state_usec <= 0;
                self.issue_request(&*inventory, sequence_id, request_state).await;
                if request_state {
                    state_usec = state_interval_usec;
                }
            }

            if usec > SLICE_USEC {
                tokio::time::sleep(Duration::from_micros(SLICE_USEC as u64)).await;
                state_usec -= SLICE_USEC;
                usec -= SLICE_USEC;
                continue;
            } else if usec > 0 {
                tokio::time::sleep(Duration::from_micros(usec as u64)).await;
                state_usec -= usec;
                usec = 0;
            }

            sequence_id = sequence_id.wrapping_add(1);
        }

        self.reset_state();
        debug!("server worker {} stopped", self.config.dst_address);
    }

    /// Build and transmit one Sync (+ Follow-Up) request sequence.
    async fn issue_request(
        &self,
        inventory: &dyn NetworkInventory,
        sequence_id: u16,
        request_state: bool,
    ) {
        let tlv = RequestTlv::new(request_state);
        // One-step mode has a single packet, so the TLV rides the Sync and
        // the transmit timestamp can only come from a user-level read.
        let sync_tlv = self.config.sync_tlv || self.config.one_step;
        let wanted_level = if self.config.one_step {
            TimestampLevel::User
        } else {
            self.config.timestamp_level
        };

        let sync_total = Message::PACKED_SIZE + if sync_tlv { tlv.wire_len() } else { 0 };
        let mut msg = Message::new(MessageType::Sync, sync_total as u16, !self.config.one_step);
        msg.sequence_id = sequence_id;
        msg.log_message_period = self.config.interval;

        let mut buf = Vec::with_capacity(sync_total);
        msg.encode(&mut buf);
        if sync_tlv {
            tlv.encode(&mut buf);
        }

        let report = match inventory
            .send(SendRequest {
                data: &buf,
                src_interface: &self.config.src_interface,
                src_port: self.config.src_event_port,
                dst: SocketAddr::new(self.config.dst_address, self.config.dst_event_port),
                timestamp_level: Some(wanted_level),
            })
            .await
        {
            Ok(Some(report)) => report,
            Ok(None) => {
                warn!(
                    "no transmit timestamp for request {} to {}",
                    sequence_id, self.config.dst_address
                );
                return;
            }
            Err(e) => {
                warn!("failed to send request to {}: {}", self.config.dst_address, e);
                return;
            }
        };

        trace!(
            "sent Sync request (seq id {}, {} timestamp) to {}",
            sequence_id,
            report.level.as_short_str(),
            self.config.dst_address
        );

        let sequence = Sequence::new(
            &self.config.src_interface,
            self.config.src_event_port,
            self.config.src_general_port,
            self.config.dst_address,
            self.config.ms_timeout,
            sequence_id,
            report.level,
            report.timestamp,
            request_state,
        );

        if self.config.one_step {
            self.shared.write().unwrap().ledger.on_send(sequence);
            return;
        }

        let fu_total = Message::PACKED_SIZE + if sync_tlv { 0 } else { tlv.wire_len() };
        let mut fu = Message::new(MessageType::FollowUp, fu_total as u16, false);
        fu.sequence_id = sequence_id;
        fu.log_message_period = self.config.interval;
        fu.flags.timescale = report.level == TimestampLevel::Hardware;

        let mut buf = Vec::with_capacity(fu_total);
        fu.encode(&mut buf);
        if !sync_tlv {
            tlv.encode(&mut buf);
        }

        match inventory
            .send(SendRequest {
                data: &buf,
                src_interface: &self.config.src_interface,
                src_port: self.config.src_general_port,
                dst: SocketAddr::new(self.config.dst_address, self.config.dst_general_port),
                timestamp_level: None,
            })
            .await
        {
            Ok(_) => self.shared.write().unwrap().ledger.on_send(sequence),
            Err(e) => warn!(
                "failed to send Follow-Up to {}: {}",
                self.config.dst_address, e
            ),
        }
    }

    #[cfg(test)]
    pub(crate) fn inject_sequence_for_test(&self, seq: Sequence) {
        self.shared.write().unwrap().ledger.on_send(seq);
    }

    #[cfg(test)]
    pub(crate) fn outstanding_for_test(&self) -> usize {
        self.shared.read().unwrap().ledger.outstanding()
    }

    #[cfg(test)]
    pub(crate) fn complete_for_test(&self, seq: Sequence) {
        let mut shared = self.shared.write().unwrap();
        self.on_sequence_complete(&mut shared, seq);
    }

    #[cfg(test)]
    pub(crate) fn timeout_for_test(&self, seq: Sequence) {
        let mut shared = self.shared.write().unwrap();
        self.on_sequence_timeout(&mut shared, seq);
    }

    #[cfg(test)]
    pub(crate) fn set_clock_for_test(&self, name: &str, id: ClockId) {
        let mut shared = self.shared.write().unwrap();
        shared.clock_name = Some(name.to_string());
        shared.clock_id = Some(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calculation::CalculationKind;
    use crate::sequence::testutil::{sequence_with, sequence_with_level, server_addr};
    use fptp_io::sim::SimNetwork;

    fn test_worker(config: WorkerConfig) -> ServerWorker {
        let host = SimNetwork::new()
            .host()
            .simple_interface("eth0", "10.0.0.1".parse().unwrap())
            .build();
        ServerWorker::new(config, &host)
    }

    fn base_config() -> WorkerConfig {
        let mut config = WorkerConfig::new(server_addr(), "eth0");
        config.calculation = CalculationSpec {
            kind: CalculationKind::ArithmeticMean,
            size: Some(2),
            compensation: 0,
        };
        config
    }

    #[test]
    fn test_invalid_without_interface() {
        let config = WorkerConfig::new(server_addr(), "missing0");
        let worker = test_worker(config);
        assert!(worker.invalid());
    }

    #[test]
    fn test_reach_register_completions_and_timeouts() {
        let worker = test_worker(base_config());
        // Eight completions.
        for id in 0..8u16 {
            worker.complete_for_test(sequence_with(id, 100, 500));
        }
        assert_eq!(worker.reach(), 0x00ff);
        assert_eq!(worker.state(), ServerState::Ready);

        // Two timeouts: reach shifts left with zeros.
        worker.timeout_for_test(sequence_with(8, 100, 500));
        assert_eq!(worker.reach(), 0x01fe);
        worker.timeout_for_test(sequence_with(9, 100, 500));
        assert_eq!(worker.reach(), 0x03fc);
        // Still partially reachable.
        assert_eq!(worker.state(), ServerState::Ready);
    }

    #[test]
    fn test_unreachable_collapse_resets_calculator() {
        let worker = test_worker(base_config());
        for id in 0..16u16 {
            worker.complete_for_test(sequence_with(id, 100, 500));
        }
        assert_eq!(worker.reach(), 0xffff);
        assert!(worker.telemetry().valid);

        for id in 16..32u16 {
            worker.timeout_for_test(sequence_with(id, 100, 500));
        }
        assert_eq!(worker.reach(), 0);
        assert_eq!(worker.state(), ServerState::Unreachable);
        let telemetry = worker.telemetry();
        assert!(!telemetry.valid);
        assert!(!telemetry.adjustment_pending);

        // A subsequent completion leaves unreachable for collecting.
        worker.complete_for_test(sequence_with(32, 100, 500));
        assert_eq!(worker.state(), ServerState::Collecting);
    }

    #[test]
    fn test_state_progression() {
        let worker = test_worker(base_config());
        assert_eq!(worker.state(), ServerState::Initializing);
        worker.complete_for_test(sequence_with(0, 100, 500));
        assert_eq!(worker.state(), ServerState::Collecting);
        worker.complete_for_test(sequence_with(1, 100, 500));
        assert_eq!(worker.state(), ServerState::Ready);
        // Selector-driven states are not downgraded by completions.
        worker.set_state(ServerState::Selected);
        worker.complete_for_test(sequence_with(2, 100, 500));
        assert_eq!(worker.state(), ServerState::Selected);
    }

    #[test]
    fn test_server_state_ds_tracking() {
        let worker = test_worker(base_config());
        let mut seq = sequence_with(0, 100, 500);
        // A sequence that requested the DS but got none invalidates it.
        let mut with_request = Sequence::new(
            "eth0",
            319,
            320,
            server_addr(),
            2000,
            1,
            TimestampLevel::Hardware,
            fptp_proto::Timestamp::new(1000, 0),
            true,
        );
        let mut msg = Message::new(MessageType::Sync, Message::PACKED_SIZE as u16, false);
        msg.sequence_id = 1;
        msg.origin_timestamp = fptp_proto::Timestamp::new(1000, 3);
        let tlv = ResponseTlv {
            req_ingress_timestamp: fptp_proto::Timestamp::new(1000, 2),
            server_state: Some(ServerStateDs { clock_class: 6, ..ServerStateDs::default() }),
            ..ResponseTlv::default()
        };
        with_request.merge(
            &msg,
            Some(&tlv),
            Some(TimestampLevel::Hardware),
            Some(fptp_proto::Timestamp::new(1000, 4)),
        );
        with_request.finish();

        worker.complete_for_test(with_request);
        assert_eq!(worker.server_state_ds().unwrap().clock_class, 6);

        // A sequence that did not request the DS leaves it alone.
        worker.complete_for_test(seq.clone());
        assert!(worker.server_state_ds().is_some());

        // A timeout of a DS-requesting sequence invalidates it.
        seq = Sequence::new(
            "eth0",
            319,
            320,
            server_addr(),
            2000,
            2,
            TimestampLevel::Hardware,
            fptp_proto::Timestamp::new(1000, 0),
            true,
        );
        worker.timeout_for_test(seq);
        assert!(worker.server_state_ds().is_none());
    }

    #[test]
    fn test_filter_flush_on_four_losses() {
        let mut config = base_config();
        config.filters = vec![FilterSpec {
            kind: crate::filter::FilterKind::LuckyPacket,
            size: 8,
            pick: 1,
        }];
        let worker = test_worker(config);

        // Two completions buffered in the filter, nothing in the calculator.
        worker.complete_for_test(sequence_with(0, 100, 500));
        worker.complete_for_test(sequence_with(1, 100, 500));
        assert_eq!(worker.telemetry().window_offsets.len(), 0);

        // Three timeouts: low nibble not yet clear, no filter flush.
        for id in 2..5u16 {
            worker.timeout_for_test(sequence_with(id, 100, 500));
        }
        // Fourth timeout clears the filters instead of the calculator; no
        // filter output ever reached the calculator, so the worker never
        // left its initial state.
        worker.timeout_for_test(sequence_with(5, 100, 500));
        assert_eq!(worker.state(), ServerState::Initializing);
        assert!(worker.telemetry().window_offsets.is_empty());
    }

    #[test]
    fn test_std_dev_over_history() {
        let worker = test_worker(base_config());
        assert_eq!(worker.telemetry().std_dev, None);
        worker.complete_for_test(sequence_with(0, 100, 500));
        // One sample is not enough.
        assert_eq!(worker.telemetry().std_dev, None);
        worker.complete_for_test(sequence_with(1, 300, 500));
        // Sample stddev of {100, 300} = sqrt(20000) ≈ 141.
        assert_eq!(worker.telemetry().std_dev, Some(141));
    }

    #[test]
    fn test_clock_id_follows_level() {
        let worker = test_worker(base_config());
        assert_eq!(worker.clock_id(), None);
        worker.set_clock_for_test("ptp0", ClockId::Phc(0));
        worker.complete_for_test(sequence_with_level(0, 100, 500, TimestampLevel::User));
        worker.complete_for_test(sequence_with_level(1, 100, 500, TimestampLevel::User));
        // User-level measurements always refer to the system clock.
        assert_eq!(worker.clock_id(), Some(ClockId::System));

        worker.complete_for_test(sequence_with_level(2, 100, 500, TimestampLevel::Hardware));
        assert_eq!(worker.clock_id(), Some(ClockId::Phc(0)));
    }

    #[test]
    fn test_state_row_shape() {
        let worker = test_worker(base_config());
        let row = worker.state_row();
        assert!(row.starts_with('?'));
        assert!(row.contains("0x0000"));
        assert!(row.contains("unknown"));
    }

    fn receiving_server(net: &fptp_io::sim::SimNetwork) -> fptp_io::sim::SimHost {
        net.host()
            .simple_interface("eth0", crate::sequence::testutil::server_addr())
            .build()
    }

    fn server_specs() -> Vec<SocketSpec> {
        vec![
            SocketSpec {
                interface: "eth0".into(),
                profile: SocketProfile::Ipv4Event,
                port: 319,
                timestamp_level: Some(TimestampLevel::Hardware),
            },
            SocketSpec {
                interface: "eth0".into(),
                profile: SocketProfile::Ipv4General,
                port: 320,
                timestamp_level: None,
            },
        ]
    }

    #[tokio::test]
    async fn test_two_step_request_emission() {
        let net = fptp_io::sim::SimNetwork::new();
        let client = net
            .host()
            .simple_interface("eth0", "10.0.0.1".parse().unwrap())
            .build();
        let server = receiving_server(&net);

        let mut config = base_config();
        config.interval = 2;
        let worker = ServerWorker::new(config, &client);
        worker.issue_request(&client, 7, true).await;
        assert_eq!(worker.outstanding_for_test(), 1);

        let packets = server
            .recv(&server_specs(), Duration::from_millis(20))
            .await
            .unwrap();
        assert_eq!(packets.len(), 2);

        // The Sync carries the request interval and no TLV (syncTLV off).
        let (sync, n) = Message::decode(&packets[0].data).unwrap();
        assert_eq!(sync.msg_type, MessageType::Sync);
        assert_eq!(sync.sequence_id, 7);
        assert!(sync.flags.two_step);
        assert!(!sync.is_response());
        assert_eq!(sync.log_message_period, 2);
        assert_eq!(fptp_proto::tlv::validate_org_ext(&packets[0].data[n..]), None);

        // The Follow-Up carries the Request TLV with the DS request bit.
        let (fu, n) = Message::decode(&packets[1].data).unwrap();
        assert_eq!(fu.msg_type, MessageType::FollowUp);
        assert_eq!(
            fptp_proto::tlv::validate_org_ext(&packets[1].data[n..]),
            Some(fptp_proto::TlvKind::Request)
        );
        let (tlv, _) = RequestTlv::decode(&packets[1].data[n..]).unwrap();
        assert!(tlv.server_state_requested());
    }

    #[tokio::test]
    async fn test_one_step_request_emission() {
        let net = fptp_io::sim::SimNetwork::new();
        let client = net
            .host()
            .simple_interface("eth0", "10.0.0.1".parse().unwrap())
            .build();
        let server = receiving_server(&net);

        let mut config = base_config();
        config.one_step = true;
        let worker = ServerWorker::new(config, &client);
        worker.issue_request(&client, 3, false).await;
        assert_eq!(worker.outstanding_for_test(), 1);

        let packets = server
            .recv(&server_specs(), Duration::from_millis(20))
            .await
            .unwrap();
        // One packet only, TLV on the Sync, one-step flagged, and no
        // ServerStateDS request this round.
        assert_eq!(packets.len(), 1);
        let (sync, n) = Message::decode(&packets[0].data).unwrap();
        assert!(!sync.flags.two_step);
        assert_eq!(
            fptp_proto::tlv::validate_org_ext(&packets[0].data[n..]),
            Some(fptp_proto::TlvKind::Request)
        );
        let (tlv, _) = RequestTlv::decode(&packets[0].data[n..]).unwrap();
        assert!(!tlv.server_state_requested());
    }

    #[test]
    fn test_socket_specs() {
        let worker = test_worker(base_config());
        let specs = worker.socket_specs();
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0].profile, SocketProfile::Ipv4Event);
        assert_eq!(specs[0].timestamp_level, Some(TimestampLevel::Hardware));
        assert_eq!(specs[1].profile, SocketProfile::Ipv4General);
        assert_eq!(specs[1].timestamp_level, None);
    }
}
