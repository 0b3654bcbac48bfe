// Copyright 2026 U.S. Federal Government (in countries where recognized)
// SPDX-License-Identifier: Apache-2.0

//! One request/response exchange in flight.
//!
//! A sequence is created when the request Sync leaves the host (t1 is the
//! transmit timestamp) and accumulates the remaining timestamps as response
//! parts arrive: t2 and the request correction from the Response TLV, t3
//! from the response Sync (one-step) or Follow-Up, t4 as the receive
//! timestamp of the response Sync. Once all four are present the delay and
//! offset math runs.

use std::net::IpAddr;
use std::time::{Duration, Instant};

use fptp_proto::{
    Message, MessageType, ResponseTlv, ServerStateDs, TimeInterval, Timestamp, TimestampLevel,
};

/// A request sequence awaiting (or holding) its response parts.
#[derive(Clone, Debug)]
pub struct Sequence {
    issued_at: Instant,

    src_interface: String,
    src_event_port: u16,
    src_general_port: u16,
    dst_address: IpAddr,
    sequence_id: u16,
    ms_timeout: u32,

    timestamp_level: TimestampLevel,

    t1: Timestamp,
    t2: Timestamp,
    t2_correction: TimeInterval,
    t3: Timestamp,
    t4: Timestamp,
    sync_correction: TimeInterval,
    follow_up_correction: TimeInterval,
    t4_correction: TimeInterval,

    error: u16,
    utc_correction: i64,
    tlv_seen: bool,

    server_state_requested: bool,
    server_state: Option<ServerStateDs>,

    c2s_delay: i64,
    s2c_delay: i64,
    offset: i64,
}

impl Sequence {
    /// Record a freshly transmitted request. `t1` is the Sync transmit
    /// timestamp at `timestamp_level`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        src_interface: &str,
        src_event_port: u16,
        src_general_port: u16,
        dst_address: IpAddr,
        ms_timeout: u32,
        sequence_id: u16,
        timestamp_level: TimestampLevel,
        t1: Timestamp,
        server_state_requested: bool,
    ) -> Self {
        Sequence {
            issued_at: Instant::now(),
            src_interface: src_interface.to_string(),
            src_event_port,
            src_general_port,
            dst_address,
            sequence_id,
            ms_timeout,
            timestamp_level,
            t1,
            t2: Timestamp::default(),
            t2_correction: TimeInterval::default(),
            t3: Timestamp::default(),
            t4: Timestamp::default(),
            sync_correction: TimeInterval::default(),
            follow_up_correction: TimeInterval::default(),
            t4_correction: TimeInterval::default(),
            error: 0,
            utc_correction: 0,
            tlv_seen: false,
            server_state_requested,
            server_state: None,
            c2s_delay: 0,
            s2c_delay: 0,
            offset: 0,
        }
    }

    /// Source interface the request left on.
    pub fn src_interface(&self) -> &str {
        &self.src_interface
    }

    /// Source event port.
    pub fn src_event_port(&self) -> u16 {
        self.src_event_port
    }

    /// Source general port.
    pub fn src_general_port(&self) -> u16 {
        self.src_general_port
    }

    /// The server this request was sent to.
    pub fn dst_address(&self) -> IpAddr {
        self.dst_address
    }

    /// Sequence identifier.
    pub fn sequence_id(&self) -> u16 {
        self.sequence_id
    }

    /// Level of the timestamps collected so far.
    pub fn timestamp_level(&self) -> TimestampLevel {
        self.timestamp_level
    }

    /// Whether the sequence has been outstanding longer than its timeout.
    pub fn timed_out(&self, now: Instant) -> bool {
        now.duration_since(self.issued_at) > Duration::from_millis(self.ms_timeout as u64)
    }

    /// Whether this sequence matches a response source.
    pub fn matches(&self, src: IpAddr, sequence_id: u16) -> bool {
        self.dst_address == src && self.sequence_id == sequence_id
    }

    fn has_t1(&self) -> bool {
        !self.t1.is_empty()
    }

    fn has_t2(&self) -> bool {
        !self.t2.is_empty()
    }

    /// Whether the response Sync's origin (or Follow-Up) already arrived.
    pub fn has_t3(&self) -> bool {
        !self.t3.is_empty()
    }

    /// Whether the response Sync's receive timestamp already arrived.
    pub fn has_t4(&self) -> bool {
        !self.t4.is_empty()
    }

    /// All four timestamps present.
    pub fn complete(&self) -> bool {
        self.has_t1() && self.has_t2() && self.has_t3() && self.has_t4()
    }

    /// Fold a received response part into the sequence.
    ///
    /// Sync parts need a receive timestamp; a one-step Sync additionally
    /// supplies t3 from its origin timestamp. The Response TLV (wherever it
    /// rides) supplies t2, the request correction and optionally the
    /// ServerStateDS; only the first TLV seen is applied.
    pub fn merge(
        &mut self,
        msg: &Message,
        tlv: Option<&ResponseTlv>,
        rx_level: Option<TimestampLevel>,
        rx_timestamp: Option<Timestamp>,
    ) {
        match msg.msg_type {
            MessageType::Sync => {
                let (Some(level), Some(timestamp)) = (rx_level, rx_timestamp) else {
                    return;
                };
                if !msg.flags.two_step {
                    self.t3 = msg.origin_timestamp;
                }
                self.timestamp_level = level;
                self.t4 = timestamp;
                self.sync_correction = msg.correction;
            }
            MessageType::FollowUp => {
                self.t3 = msg.origin_timestamp;
                self.follow_up_correction = msg.correction;
            }
            _ => return,
        }

        if let Some(tlv) = tlv
            && !self.tlv_seen
        {
            self.tlv_seen = true;
            self.error = tlv.error;
            self.t2 = tlv.req_ingress_timestamp;
            self.t2_correction = tlv.req_correction_field;
            if msg.flags.utc_reasonable {
                self.utc_correction = tlv.utc_offset as i64 * 1_000_000_000;
            }
            if let Some(state) = tlv.server_state {
                self.server_state = Some(state);
            }
        }

        if self.complete() {
            self.t4_correction = self.sync_correction + self.follow_up_correction;
        }
    }

    /// Compute delays and offset from the collected timestamps. Call once
    /// the sequence is complete.
    pub fn finish(&mut self) {
        let t1 = self.t1.total_nanoseconds() as i128;
        let t2 = self.t2.total_nanoseconds() as i128;
        let t3 = self.t3.total_nanoseconds() as i128;
        let t4 = self.t4.total_nanoseconds() as i128;
        let t2c = self.t2_correction.nanoseconds() as i128;
        let t4c = self.t4_correction.nanoseconds() as i128;
        let utc = self.utc_correction as i128;

        self.c2s_delay = (t2 - t1 - t2c - utc) as i64;
        self.s2c_delay = (t4 - t3 - t4c + utc) as i64;
        self.offset = (((t2 + t3 - t2c - utc) - (t1 + t4 - t4c - utc)) / 2) as i64;
    }

    /// Error bits reported by the server.
    pub fn error(&self) -> u16 {
        self.error
    }

    /// Whether the server flagged an invalid transmit timestamp.
    pub fn has_tx_timestamp_error(&self) -> bool {
        self.error & fptp_proto::ERROR_TX_TIMESTAMP_INVALID != 0
    }

    /// Whether this sequence asked for the ServerStateDS.
    pub fn server_state_requested(&self) -> bool {
        self.server_state_requested
    }

    /// The ServerStateDS delivered with the response, if any.
    pub fn server_state(&self) -> Option<&ServerStateDs> {
        self.server_state.as_ref()
    }

    /// Request transmit timestamp.
    pub fn t1(&self) -> Timestamp {
        self.t1
    }

    /// Client-to-server path delay in nanoseconds.
    pub fn c2s_delay(&self) -> i64 {
        self.c2s_delay
    }

    /// Server-to-client path delay in nanoseconds.
    pub fn s2c_delay(&self) -> i64 {
        self.s2c_delay
    }

    /// Mean of the two path delays.
    pub fn mean_path_delay(&self) -> i64 {
        (self.c2s_delay + self.s2c_delay) / 2
    }

    /// Measured clock offset in nanoseconds.
    pub fn offset(&self) -> i64 {
        self.offset
    }

    #[cfg(test)]
    pub(crate) fn backdate(&mut self, by: Duration) {
        self.issued_at -= by;
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;
    use std::net::Ipv4Addr;

    pub fn server_addr() -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2))
    }

    const BASE: i64 = 1000 * 1_000_000_000;

    /// A completed sequence with the given timestamps (nanoseconds past
    /// second 1000), zero corrections.
    pub fn complete_sequence(id: u16, t1: i64, t2: i64, t3: i64, t4: i64) -> Sequence {
        let mut seq = Sequence::new(
            "eth0",
            319,
            320,
            server_addr(),
            2000,
            id,
            TimestampLevel::Hardware,
            Timestamp::from_total_nanoseconds(BASE + t1),
            false,
        );
        let mut sync = Message::new(MessageType::Sync, Message::PACKED_SIZE as u16, false);
        sync.sequence_id = id;
        sync.origin_timestamp = Timestamp::from_total_nanoseconds(BASE + t3);
        let tlv = ResponseTlv {
            req_ingress_timestamp: Timestamp::from_total_nanoseconds(BASE + t2),
            ..ResponseTlv::default()
        };
        seq.merge(
            &sync,
            Some(&tlv),
            Some(TimestampLevel::Hardware),
            Some(Timestamp::from_total_nanoseconds(BASE + t4)),
        );
        assert!(seq.complete());
        seq.finish();
        seq
    }

    /// A completed sequence whose measured offset and delay are forced to
    /// the given values (used by filter/calculator tests). Successive ids
    /// get t1 values one second apart so drift math has a time base.
    pub fn sequence_with(id: u16, offset_ns: i64, delay_ns: i64) -> Sequence {
        // Symmetric construction: t2 = t1 + delay + offset, t3 = t2,
        // t4 = t3 + delay - offset.
        let t1 = id as i64 * 1_000_000_000 + 100_000_000;
        let t2 = t1 + delay_ns + offset_ns;
        let t3 = t2;
        let t4 = t3 + delay_ns - offset_ns;
        let seq = complete_sequence(id, t1, t2, t3, t4);
        assert_eq!(seq.offset(), offset_ns);
        assert_eq!(seq.mean_path_delay(), delay_ns);
        seq
    }

    /// Like [`sequence_with`] but at an explicit timestamp level.
    pub fn sequence_with_level(
        id: u16,
        offset_ns: i64,
        delay_ns: i64,
        level: TimestampLevel,
    ) -> Sequence {
        let mut seq = sequence_with(id, offset_ns, delay_ns);
        seq.timestamp_level = level;
        seq
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn addr() -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2))
    }

    fn new_sequence(id: u16) -> Sequence {
        Sequence::new(
            "eth0",
            319,
            320,
            addr(),
            2000,
            id,
            TimestampLevel::Hardware,
            Timestamp::new(1000, 0),
            false,
        )
    }

    fn response_sync(id: u16, two_step: bool) -> Message {
        let mut msg = Message::new(MessageType::Sync, Message::PACKED_SIZE as u16, two_step);
        msg.sequence_id = id;
        msg
    }

    fn response_follow_up(id: u16, origin: Timestamp) -> Message {
        let mut msg = Message::new(MessageType::FollowUp, Message::PACKED_SIZE as u16, false);
        msg.sequence_id = id;
        msg.origin_timestamp = origin;
        msg
    }

    fn response_tlv(t2: Timestamp) -> ResponseTlv {
        ResponseTlv {
            req_ingress_timestamp: t2,
            ..ResponseTlv::default()
        }
    }

    #[test]
    fn test_two_step_exchange_math() {
        // Literal values: Sync out at t1 = (1000, 0); server receives at
        // (1000, 5ms); Follow-Up origin (1000, 5.5ms); response Sync back
        // at t4 = (1000, 10ms).
        let mut seq = new_sequence(7);

        let sync = response_sync(7, true);
        let tlv = response_tlv(Timestamp::new(1000, 5_000_000));
        seq.merge(
            &sync,
            Some(&tlv),
            Some(TimestampLevel::Hardware),
            Some(Timestamp::new(1000, 10_000_000)),
        );
        assert!(!seq.complete());

        let fu = response_follow_up(7, Timestamp::new(1000, 5_500_000));
        seq.merge(&fu, Some(&tlv), None, None);
        assert!(seq.complete());

        seq.finish();
        assert_eq!(seq.c2s_delay(), 5_000_000);
        assert_eq!(seq.s2c_delay(), 4_500_000);
        assert_eq!(seq.mean_path_delay(), 4_750_000);
        assert_eq!(seq.offset(), 250_000);
    }

    #[test]
    fn test_one_step_sync_supplies_t3() {
        let mut seq = new_sequence(3);
        let mut sync = response_sync(3, false);
        sync.origin_timestamp = Timestamp::new(1000, 5_500_000);
        let tlv = response_tlv(Timestamp::new(1000, 5_000_000));
        seq.merge(
            &sync,
            Some(&tlv),
            Some(TimestampLevel::User),
            Some(Timestamp::new(1000, 10_000_000)),
        );
        assert!(seq.complete());
        seq.finish();
        assert_eq!(seq.mean_path_delay(), 4_750_000);
        assert_eq!(seq.timestamp_level(), TimestampLevel::User);
    }

    #[test]
    fn test_sync_without_timestamp_ignored() {
        let mut seq = new_sequence(1);
        let sync = response_sync(1, true);
        seq.merge(&sync, None, None, None);
        assert!(!seq.has_t4());
    }

    #[test]
    fn test_utc_correction_applies() {
        // Same exchange as the two-step test but with all server-side
        // timestamps shifted +37 s (TAI) and utcOffset = 37 announced.
        let mut seq = new_sequence(9);

        let mut sync = response_sync(9, true);
        sync.flags.utc_reasonable = true;
        let tlv = ResponseTlv {
            req_ingress_timestamp: Timestamp::new(1037, 5_000_000),
            utc_offset: 37,
            ..ResponseTlv::default()
        };
        seq.merge(
            &sync,
            Some(&tlv),
            Some(TimestampLevel::Hardware),
            Some(Timestamp::new(1000, 10_000_000)),
        );
        let fu = response_follow_up(9, Timestamp::new(1037, 5_500_000));
        seq.merge(&fu, None, None, None);
        assert!(seq.complete());
        seq.finish();
        assert_eq!(seq.c2s_delay(), 5_000_000);
        assert_eq!(seq.s2c_delay(), 4_500_000);
        assert_eq!(seq.offset(), 250_000);
    }

    #[test]
    fn test_corrections_enter_math() {
        let mut seq = new_sequence(4);
        let mut sync = response_sync(4, true);
        sync.correction = TimeInterval::from_nanoseconds(100);
        let tlv = ResponseTlv {
            req_ingress_timestamp: Timestamp::new(1000, 5_000_000),
            req_correction_field: TimeInterval::from_nanoseconds(200),
            ..ResponseTlv::default()
        };
        seq.merge(
            &sync,
            Some(&tlv),
            Some(TimestampLevel::Hardware),
            Some(Timestamp::new(1000, 10_000_000)),
        );
        let mut fu = response_follow_up(4, Timestamp::new(1000, 5_500_000));
        fu.correction = TimeInterval::from_nanoseconds(300);
        seq.merge(&fu, None, None, None);
        seq.finish();
        // c2s: 5ms - 200; s2c: 4.5ms - (100 + 300).
        assert_eq!(seq.c2s_delay(), 5_000_000 - 200);
        assert_eq!(seq.s2c_delay(), 4_500_000 - 400);
        // offset: ((t2+t3-200) - (t1+t4-400)) / 2 = (500_000 + 200) / 2.
        assert_eq!(seq.offset(), 250_100);
    }

    #[test]
    fn test_first_tlv_wins() {
        let mut seq = new_sequence(5);
        let sync = response_sync(5, true);
        let first = response_tlv(Timestamp::new(1000, 5_000_000));
        seq.merge(
            &sync,
            Some(&first),
            Some(TimestampLevel::Hardware),
            Some(Timestamp::new(1000, 10_000_000)),
        );
        let second = response_tlv(Timestamp::new(2000, 0));
        let fu = response_follow_up(5, Timestamp::new(1000, 5_500_000));
        seq.merge(&fu, Some(&second), None, None);
        seq.finish();
        assert_eq!(seq.c2s_delay(), 5_000_000);
    }

    #[test]
    fn test_server_state_recorded() {
        let mut seq = new_sequence(6);
        let sync = response_sync(6, true);
        let tlv = ResponseTlv {
            req_ingress_timestamp: Timestamp::new(1000, 1),
            server_state: Some(ServerStateDs { clock_class: 6, ..ServerStateDs::default() }),
            ..ResponseTlv::default()
        };
        seq.merge(
            &sync,
            Some(&tlv),
            Some(TimestampLevel::Hardware),
            Some(Timestamp::new(1000, 2)),
        );
        assert_eq!(seq.server_state().unwrap().clock_class, 6);
    }

    #[test]
    fn test_timeout() {
        let mut seq = new_sequence(8);
        let now = Instant::now();
        assert!(!seq.timed_out(now));
        seq.backdate(Duration::from_millis(2001));
        assert!(seq.timed_out(Instant::now()));
    }

    #[test]
    fn test_matches() {
        let seq = new_sequence(2);
        assert!(seq.matches(addr(), 2));
        assert!(!seq.matches(addr(), 3));
        assert!(!seq.matches(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 9)), 2));
    }

    #[test]
    fn test_tx_timestamp_error_flag() {
        let mut seq = new_sequence(1);
        let sync = response_sync(1, true);
        let tlv = ResponseTlv {
            error: fptp_proto::ERROR_TX_TIMESTAMP_INVALID,
            req_ingress_timestamp: Timestamp::new(1, 1),
            ..ResponseTlv::default()
        };
        seq.merge(
            &sync,
            Some(&tlv),
            Some(TimestampLevel::Hardware),
            Some(Timestamp::new(1, 2)),
        );
        assert!(seq.has_tx_timestamp_error());
    }
}
