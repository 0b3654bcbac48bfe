// Copyright 2026 U.S. Federal Government (in countries where recognized)
// SPDX-License-Identifier: Apache-2.0

//! The per-server table of outstanding request sequences.
//!
//! Sequences enter on send and leave on completion or timeout. Incoming
//! response parts are correlated by sequence id (the owning worker already
//! matched the source address) and duplicates of already-received parts are
//! ignored.

use std::net::IpAddr;
use std::time::Instant;

use fptp_proto::{Message, MessageType, ResponseTlv, Timestamp, TimestampLevel};

use crate::sequence::Sequence;

/// What became of a response part handed to the ledger.
#[derive(Debug)]
pub enum LedgerEvent {
    /// No matching sequence, or the part was a duplicate: nothing changed.
    None,
    /// The matching sequence had already timed out; it was removed and must
    /// go through timeout bookkeeping.
    TimedOut(Sequence),
    /// The part completed the sequence; delay/offset math has run.
    Complete(Sequence),
}

/// Outstanding request sequences of one server worker.
#[derive(Debug, Default)]
pub struct SequenceLedger {
    sequences: Vec<Sequence>,
}

impl SequenceLedger {
    /// Create an empty ledger.
    pub fn new() -> Self {
        SequenceLedger::default()
    }

    /// Number of outstanding sequences.
    pub fn outstanding(&self) -> usize {
        self.sequences.len()
    }

    /// Record a freshly sent request.
    pub fn on_send(&mut self, sequence: Sequence) {
        self.sequences.push(sequence);
    }

    /// Correlate a received response part and fold it in.
    pub fn on_receive(
        &mut self,
        src: IpAddr,
        msg: &Message,
        tlv: Option<&ResponseTlv>,
        rx_level: Option<TimestampLevel>,
        rx_timestamp: Option<Timestamp>,
        now: Instant,
    ) -> LedgerEvent {
        let Some(index) = self
            .sequences
            .iter()
            .position(|seq| seq.matches(src, msg.sequence_id))
        else {
            return LedgerEvent::None;
        };

        if self.sequences[index].timed_out(now) {
            return LedgerEvent::TimedOut(self.sequences.remove(index));
        }

        let seq = &mut self.sequences[index];
        match msg.msg_type {
            MessageType::Sync if seq.has_t4() => return LedgerEvent::None,
            MessageType::FollowUp if seq.has_t3() => return LedgerEvent::None,
            MessageType::Sync | MessageType::FollowUp => {}
            _ => return LedgerEvent::None,
        }

        seq.merge(msg, tlv, rx_level, rx_timestamp);
        if seq.complete() {
            let mut seq = self.sequences.remove(index);
            seq.finish();
            LedgerEvent::Complete(seq)
        } else {
            LedgerEvent::None
        }
    }

    /// Remove and return every overdue sequence.
    pub fn sweep_timeouts(&mut self, now: Instant) -> Vec<Sequence> {
        let mut expired = Vec::new();
        let mut index = 0;
        while index < self.sequences.len() {
            if self.sequences[index].timed_out(now) {
                expired.push(self.sequences.remove(index));
            } else {
                index += 1;
            }
        }
        expired
    }

    /// Drop all outstanding sequences.
    pub fn clear(&mut self) {
        self.sequences.clear();
    }
}
