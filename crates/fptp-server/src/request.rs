// Copyright 2026 U.S. Federal Government (in countries where recognized)
// SPDX-License-Identifier: Apache-2.0

//! One partially received request sequence on the server side.
//!
//! A request is complete when its Sync has been seen, the Request TLV has
//! been seen, and (for two-step requests) the Follow-Up has been seen. The
//! parts may arrive in any order; each contributes its ports and
//! correction so the response can mirror the exchange exactly.

use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};

use fptp_proto::{Message, MessageType, RequestTlv, TimeInterval, Timestamp, TimestampLevel};

/// How long an incomplete request lingers before the sweep drops it.
pub const REQUEST_TIMEOUT: Duration = Duration::from_millis(2000);

/// A request sequence being reassembled.
#[derive(Clone, Debug)]
pub struct Request {
    received_at: Instant,

    src_address: IpAddr,
    src_event_port: u16,
    src_general_port: u16,
    dst_address: IpAddr,
    dst_event_port: u16,
    dst_general_port: u16,
    sequence_id: u16,

    sync_correction: TimeInterval,
    follow_up_correction: TimeInterval,
    correction: TimeInterval,

    timestamp_level: Option<TimestampLevel>,
    ingress_timestamp: Timestamp,

    flags: u32,
    sync_tlv: bool,
    one_step: bool,

    sync_received: bool,
    follow_up_received: bool,
    tlv_received: bool,
}

impl Request {
    /// Start reassembly from the first received part.
    pub fn new(
        msg: &Message,
        tlv: Option<&RequestTlv>,
        src: SocketAddr,
        dst: SocketAddr,
        rx_level: Option<TimestampLevel>,
        rx_timestamp: Option<Timestamp>,
    ) -> Self {
        let mut request = Request {
            received_at: Instant::now(),
            src_address: src.ip(),
            src_event_port: 0,
            src_general_port: 0,
            dst_address: dst.ip(),
            dst_event_port: 0,
            dst_general_port: 0,
            sequence_id: msg.sequence_id,
            sync_correction: TimeInterval::default(),
            follow_up_correction: TimeInterval::default(),
            correction: TimeInterval::default(),
            timestamp_level: None,
            ingress_timestamp: Timestamp::default(),
            flags: 0,
            sync_tlv: false,
            one_step: false,
            sync_received: false,
            follow_up_received: false,
            tlv_received: false,
        };
        request.merge(msg, tlv, src, dst, rx_level, rx_timestamp);
        request
    }

    /// Sender of the request.
    pub fn src_address(&self) -> IpAddr {
        self.src_address
    }

    /// Event port the client sent from.
    pub fn src_event_port(&self) -> u16 {
        self.src_event_port
    }

    /// General port the client sent from.
    pub fn src_general_port(&self) -> u16 {
        self.src_general_port
    }

    /// Local address the request was sent to.
    pub fn dst_address(&self) -> IpAddr {
        self.dst_address
    }

    /// Local event port the request arrived on.
    pub fn dst_event_port(&self) -> u16 {
        self.dst_event_port
    }

    /// Local general port the request arrived on.
    pub fn dst_general_port(&self) -> u16 {
        self.dst_general_port
    }

    /// Sequence identifier.
    pub fn sequence_id(&self) -> u16 {
        self.sequence_id
    }

    /// Accumulated correction of the request parts.
    pub fn correction(&self) -> TimeInterval {
        self.correction
    }

    /// Level of the Sync receive timestamp.
    pub fn timestamp_level(&self) -> Option<TimestampLevel> {
        self.timestamp_level
    }

    /// Receive timestamp of the request's Sync (t2).
    pub fn ingress_timestamp(&self) -> Timestamp {
        self.ingress_timestamp
    }

    /// Request TLV header flags.
    pub fn flags(&self) -> u32 {
        self.flags
    }

    /// Whether the ServerStateDS was requested.
    pub fn server_state_requested(&self) -> bool {
        self.flags & fptp_proto::FLAG_SERVER_STATE_DS != 0
    }

    /// Whether the TLV rode on the Sync (the response mirrors this).
    pub fn sync_tlv(&self) -> bool {
        self.sync_tlv
    }

    /// Whether the request was one-step.
    pub fn one_step(&self) -> bool {
        self.one_step
    }

    /// Age-based expiry for incomplete requests.
    pub fn timed_out(&self, now: Instant) -> bool {
        now.duration_since(self.received_at) > REQUEST_TIMEOUT
    }

    /// Whether this entry matches a packet source.
    pub fn matches(&self, src: IpAddr, sequence_id: u16) -> bool {
        self.src_address == src && self.sequence_id == sequence_id
    }

    /// Fold a received part into the entry.
    pub fn merge(
        &mut self,
        msg: &Message,
        tlv: Option<&RequestTlv>,
        src: SocketAddr,
        dst: SocketAddr,
        rx_level: Option<TimestampLevel>,
        rx_timestamp: Option<Timestamp>,
    ) {
        match msg.msg_type {
            MessageType::Sync => {
                let (Some(level), Some(timestamp)) = (rx_level, rx_timestamp) else {
                    return;
                };
                self.src_event_port = src.port();
                self.dst_event_port = dst.port();
                self.timestamp_level = Some(level);
                self.ingress_timestamp = timestamp;
                self.one_step = !msg.flags.two_step;
                self.sync_correction = msg.correction;
                self.sync_tlv = tlv.is_some();
                self.sync_received = true;
            }
            MessageType::FollowUp => {
                self.src_general_port = src.port();
                self.dst_general_port = dst.port();
                self.follow_up_correction = msg.correction;
                self.follow_up_received = true;
            }
            _ => return,
        }

        if let Some(tlv) = tlv
            && !self.tlv_received
        {
            self.flags = tlv.flags;
            self.tlv_received = true;
        }

        if self.complete() {
            self.correction = self.sync_correction + self.follow_up_correction;
        }
    }

    /// Whether all parts of the request have arrived.
    pub fn complete(&self) -> bool {
        self.sync_received && (self.one_step || self.follow_up_received) && self.tlv_received
    }

    #[cfg(test)]
    pub(crate) fn backdate(&mut self, by: Duration) {
        self.received_at -= by;
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;

    pub fn client_addr(port: u16) -> SocketAddr {
        SocketAddr::new("10.0.0.1".parse().unwrap(), port)
    }

    pub fn server_addr(port: u16) -> SocketAddr {
        SocketAddr::new("10.0.1.2".parse().unwrap(), port)
    }

    pub fn sync_msg(sequence_id: u16, two_step: bool, tlv: Option<&RequestTlv>) -> Message {
        let tlv_len = tlv.map(|t| t.wire_len()).unwrap_or(0);
        let mut msg = Message::new(
            MessageType::Sync,
            (Message::PACKED_SIZE + tlv_len) as u16,
            two_step,
        );
        msg.sequence_id = sequence_id;
        msg.log_message_period = 0;
        msg
    }

    pub fn follow_up_msg(sequence_id: u16, tlv: Option<&RequestTlv>) -> Message {
        let tlv_len = tlv.map(|t| t.wire_len()).unwrap_or(0);
        let mut msg = Message::new(
            MessageType::FollowUp,
            (Message::PACKED_SIZE + tlv_len) as u16,
            false,
        );
        msg.sequence_id = sequence_id;
        msg.log_message_period = 0;
        msg
    }
}

#[cfg(test)]
mod tests {
    use super::testutil::*;
    use super::*;

    #[test]
    fn test_two_step_sync_first() {
        let tlv = RequestTlv::new(false);
        let sync = sync_msg(7, true, Some(&tlv));
        let mut request = Request::new(
            &sync,
            Some(&tlv),
            client_addr(319),
            server_addr(319),
            Some(TimestampLevel::Hardware),
            Some(Timestamp::new(1000, 5_000_000)),
        );
        assert!(!request.complete());
        assert!(request.sync_tlv());

        let fu = follow_up_msg(7, None);
        request.merge(&fu, None, client_addr(320), server_addr(320), None, None);
        assert!(request.complete());
        assert_eq!(request.src_event_port(), 319);
        assert_eq!(request.src_general_port(), 320);
        assert_eq!(request.ingress_timestamp(), Timestamp::new(1000, 5_000_000));
        assert!(!request.one_step());
    }

    #[test]
    fn test_two_step_follow_up_first() {
        let tlv = RequestTlv::new(true);
        let fu = follow_up_msg(3, Some(&tlv));
        let mut request = Request::new(&fu, Some(&tlv), client_addr(320), server_addr(320), None, None);
        assert!(!request.complete());
        assert!(request.server_state_requested());

        let sync = sync_msg(3, true, None);
        request.merge(
            &sync,
            None,
            client_addr(319),
            server_addr(319),
            Some(TimestampLevel::User),
            Some(Timestamp::new(1000, 1)),
        );
        assert!(request.complete());
        assert!(!request.sync_tlv());
    }

    #[test]
    fn test_one_step_completes_with_sync_alone() {
        let tlv = RequestTlv::new(false);
        let sync = sync_msg(1, false, Some(&tlv));
        let request = Request::new(
            &sync,
            Some(&tlv),
            client_addr(319),
            server_addr(319),
            Some(TimestampLevel::Hardware),
            Some(Timestamp::new(1000, 2)),
        );
        assert!(request.one_step());
        assert!(request.complete());
    }

    #[test]
    fn test_corrections_accumulate() {
        let tlv = RequestTlv::new(false);
        let mut sync = sync_msg(4, true, Some(&tlv));
        sync.correction = TimeInterval::from_nanoseconds(100);
        let mut request = Request::new(
            &sync,
            Some(&tlv),
            client_addr(319),
            server_addr(319),
            Some(TimestampLevel::Hardware),
            Some(Timestamp::new(1000, 2)),
        );
        let mut fu = follow_up_msg(4, None);
        fu.correction = TimeInterval::from_nanoseconds(50);
        request.merge(&fu, None, client_addr(320), server_addr(320), None, None);
        assert_eq!(request.correction().nanoseconds(), 150);
    }

    #[test]
    fn test_sync_without_timestamp_ignored() {
        let tlv = RequestTlv::new(false);
        let sync = sync_msg(9, true, Some(&tlv));
        let request = Request::new(&sync, Some(&tlv), client_addr(319), server_addr(319), None, None);
        assert!(!request.complete());
        assert_eq!(request.timestamp_level(), None);
    }

    #[test]
    fn test_matches() {
        let tlv = RequestTlv::new(false);
        let sync = sync_msg(5, true, Some(&tlv));
        let request = Request::new(
            &sync,
            Some(&tlv),
            client_addr(319),
            server_addr(319),
            Some(TimestampLevel::Hardware),
            Some(Timestamp::new(1, 1)),
        );
        assert!(request.matches(client_addr(0).ip(), 5));
        assert!(!request.matches(client_addr(0).ip(), 6));
        assert!(!request.matches(server_addr(0).ip(), 5));
    }

    #[test]
    fn test_timeout() {
        let tlv = RequestTlv::new(false);
        let sync = sync_msg(5, true, Some(&tlv));
        let mut request = Request::new(
            &sync,
            Some(&tlv),
            client_addr(319),
            server_addr(319),
            Some(TimestampLevel::Hardware),
            Some(Timestamp::new(1, 1)),
        );
        assert!(!request.timed_out(Instant::now()));
        request.received_at -= Duration::from_millis(2001);
        assert!(request.timed_out(Instant::now()));
    }
}
