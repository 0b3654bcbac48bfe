// Copyright 2026 U.S. Federal Government (in countries where recognized)
// SPDX-License-Identifier: Apache-2.0

//! The PTPv2.1 message carried in every exchange part.
//!
//! Only Sync and Follow-Up messages are generated and consumed. The 34-byte
//! header is immediately followed by the 10-byte origin timestamp, so the
//! fixed message size is 44 bytes; a Request or Response TLV may follow.
//!
//! ### Layout
//!
//! ```ignore
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! | Sdo |  Type |    Version    |          Total Length           |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |    Domain     |   SdoMinor    |             Flags             |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                                                               |
//! +                      Correction Field (64)                    +
//! |                                                               |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                     Message Type Specific (32)                |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                                                               |
//! +                    Source Port Identity (80)                  +
//! |                                                               |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |          Sequence ID          |    Control    |  Log Period   |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                                                               |
//! +                      Origin Timestamp (80)                    +
//! |                                                               |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```

use crate::error::ParseError;
use crate::time::{ClockIdentity, TimeInterval, Timestamp};
use crate::{FIXED_DOMAIN, FIXED_SDO_ID, FIXED_VERSION, LOG_PERIOD_RESPONSE};

/// PTP message types. Only `Sync` and `FollowUp` are generated; the rest are
/// recognized on decode and dropped by the processing layers.
#[repr(u8)]
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum MessageType {
    /// Sync event message (type 0).
    Sync = 0,
    /// Delay request (type 1).
    DelayReq = 1,
    /// Peer delay request (type 2).
    PDelayReq = 2,
    /// Peer delay response (type 3).
    PDelayResp = 3,
    /// Follow-Up general message (type 8).
    FollowUp = 8,
    /// Delay response (type 9).
    DelayResp = 9,
    /// Peer delay response follow-up (type 10).
    PDelayRespFollowUp = 10,
    /// Announce (type 11).
    Announce = 11,
    /// Signaling (type 12).
    Signaling = 12,
    /// Management (type 13).
    Management = 13,
}

impl TryFrom<u8> for MessageType {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(MessageType::Sync),
            1 => Ok(MessageType::DelayReq),
            2 => Ok(MessageType::PDelayReq),
            3 => Ok(MessageType::PDelayResp),
            8 => Ok(MessageType::FollowUp),
            9 => Ok(MessageType::DelayResp),
            10 => Ok(MessageType::PDelayRespFollowUp),
            11 => Ok(MessageType::Announce),
            12 => Ok(MessageType::Signaling),
            13 => Ok(MessageType::Management),
            _ => Err(()),
        }
    }
}

impl MessageType {
    /// The legacy control-field value for this message type.
    pub fn control(self) -> u8 {
        match self {
            MessageType::Sync => 0,
            MessageType::FollowUp => 2,
            _ => 5,
        }
    }
}

/// The two-byte header flag field.
///
/// Only the flags the exchange logic reads and writes are named; reserved
/// and profile-specific bits are dropped on decode.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub struct Flags {
    /// Message is part of a two-step exchange (a Follow-Up will carry the
    /// precise timestamp).
    pub two_step: bool,
    /// Unicast transmission. Always set on generated messages; frames
    /// without it are rejected.
    pub unicast: bool,
    /// Leap-61 warning.
    pub leap61: bool,
    /// Leap-59 warning.
    pub leap59: bool,
    /// The UTC offset in the Response TLV is meaningful.
    pub utc_reasonable: bool,
    /// Timestamps use the PTP (TAI) timescale.
    pub timescale: bool,
    /// Time is traceable to a primary reference.
    pub time_traceable: bool,
    /// Frequency is traceable to a primary reference.
    pub frequency_traceable: bool,
}

impl Flags {
    /// Flags for a newly built message: unicast, optionally two-step.
    pub fn new(two_step: bool) -> Self {
        Flags {
            two_step,
            unicast: true,
            ..Flags::default()
        }
    }

    fn encode(self) -> [u8; 2] {
        let mut b0 = 0u8;
        if self.two_step {
            b0 |= 0x02;
        }
        if self.unicast {
            b0 |= 0x04;
        }
        let mut b1 = 0u8;
        if self.leap61 {
            b1 |= 0x01;
        }
        if self.leap59 {
            b1 |= 0x02;
        }
        if self.utc_reasonable {
            b1 |= 0x04;
        }
        if self.timescale {
            b1 |= 0x08;
        }
        if self.time_traceable {
            b1 |= 0x10;
        }
        if self.frequency_traceable {
            b1 |= 0x20;
        }
        [b0, b1]
    }

    fn decode(b0: u8, b1: u8) -> Self {
        Flags {
            two_step: b0 & 0x02 != 0,
            unicast: b0 & 0x04 != 0,
            leap61: b1 & 0x01 != 0,
            leap59: b1 & 0x02 != 0,
            utc_reasonable: b1 & 0x04 != 0,
            timescale: b1 & 0x08 != 0,
            time_traceable: b1 & 0x10 != 0,
            frequency_traceable: b1 & 0x20 != 0,
        }
    }
}

/// A decoded Sync or Follow-Up message (header plus origin timestamp).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Message {
    /// Message type.
    pub msg_type: MessageType,
    /// Total on-wire length of the message including any appended TLV.
    pub total_len: u16,
    /// Header flags.
    pub flags: Flags,
    /// Correction field in scaled nanoseconds.
    pub correction: TimeInterval,
    /// Clock identity part of the source port identity.
    pub source_clock: ClockIdentity,
    /// Port number part of the source port identity.
    pub source_port: u16,
    /// Sequence identifier correlating request and response parts.
    pub sequence_id: u16,
    /// Legacy control field.
    pub control: u8,
    /// Log message period; `0x7f` marks a response-sequence message.
    pub log_message_period: i8,
    /// Origin timestamp (zero unless a one-step Sync or a Follow-Up).
    pub origin_timestamp: Timestamp,
}

impl Message {
    /// Fixed wire size of a message without TLVs.
    pub const PACKED_SIZE: usize = 44;

    /// Build a message with the fixed protocol fields filled in.
    ///
    /// `total_len` must account for any TLV appended after the message.
    /// Newly built messages carry the response marker in
    /// `log_message_period`; request sequences overwrite it with the
    /// configured request interval.
    pub fn new(msg_type: MessageType, total_len: u16, two_step: bool) -> Self {
        Message {
            msg_type,
            total_len,
            flags: Flags::new(two_step),
            correction: TimeInterval::default(),
            source_clock: ClockIdentity::default(),
            source_port: 0,
            sequence_id: 0,
            control: msg_type.control(),
            log_message_period: LOG_PERIOD_RESPONSE,
            origin_timestamp: Timestamp::default(),
        }
    }

    /// Whether this message belongs to a response sequence.
    pub fn is_response(&self) -> bool {
        self.log_message_period == LOG_PERIOD_RESPONSE
    }

    /// Append the 44-byte wire form.
    pub fn encode(&self, buf: &mut Vec<u8>) {
        let sdo_major = ((FIXED_SDO_ID >> 8) & 0xf) as u8;
        buf.push((sdo_major << 4) | (self.msg_type as u8));
        buf.push(FIXED_VERSION);
        buf.extend_from_slice(&self.total_len.to_be_bytes());
        buf.push(FIXED_DOMAIN);
        buf.push((FIXED_SDO_ID & 0xff) as u8);
        buf.extend_from_slice(&self.flags.encode());
        self.correction.encode(buf);
        buf.extend_from_slice(&0u32.to_be_bytes());
        buf.extend_from_slice(&self.source_clock.0);
        buf.extend_from_slice(&self.source_port.to_be_bytes());
        buf.extend_from_slice(&self.sequence_id.to_be_bytes());
        buf.push(self.control);
        buf.push(self.log_message_period as u8);
        self.origin_timestamp.encode(buf);
    }

    /// Decode and validate a message from the head of `buf`.
    ///
    /// A frame is rejected unless the version, sdoId and domain match the
    /// fixed protocol values, the unicast flag is set and the declared
    /// total length covers at least the message itself.
    pub fn decode(buf: &[u8]) -> Result<(Self, usize), ParseError> {
        if buf.len() < Self::PACKED_SIZE {
            return Err(ParseError::BufferTooShort {
                needed: Self::PACKED_SIZE,
                available: buf.len(),
            });
        }

        let type_raw = buf[0] & 0x0f;
        let sdo_major = (buf[0] >> 4) as u16;
        let msg_type = MessageType::try_from(type_raw).map_err(|_| ParseError::InvalidField {
            field: "message type",
            value: type_raw as u32,
        })?;
        if buf[1] != FIXED_VERSION {
            return Err(ParseError::InvalidField {
                field: "version",
                value: buf[1] as u32,
            });
        }
        let total_len = u16::from_be_bytes([buf[2], buf[3]]);
        if (total_len as usize) < Self::PACKED_SIZE {
            return Err(ParseError::InvalidField {
                field: "total length",
                value: total_len as u32,
            });
        }
        if buf[4] != FIXED_DOMAIN {
            return Err(ParseError::InvalidField {
                field: "domain",
                value: buf[4] as u32,
            });
        }
        let sdo = (sdo_major << 8) | buf[5] as u16;
        if sdo != FIXED_SDO_ID {
            return Err(ParseError::InvalidField {
                field: "sdoId",
                value: sdo as u32,
            });
        }
        let flags = Flags::decode(buf[6], buf[7]);
        if !flags.unicast {
            return Err(ParseError::InvalidField {
                field: "unicast flag",
                value: 0,
            });
        }

        let (correction, _) = TimeInterval::decode(&buf[8..])?;
        let mut clock = [0u8; 8];
        clock.copy_from_slice(&buf[20..28]);
        let source_port = u16::from_be_bytes([buf[28], buf[29]]);
        let sequence_id = u16::from_be_bytes([buf[30], buf[31]]);
        let control = buf[32];
        let log_message_period = buf[33] as i8;
        let (origin_timestamp, _) = Timestamp::decode(&buf[34..])?;

        Ok((
            Message {
                msg_type,
                total_len,
                flags,
                correction,
                source_clock: ClockIdentity(clock),
                source_port,
                sequence_id,
                control,
                log_message_period,
                origin_timestamp,
            },
            Self::PACKED_SIZE,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_message() -> Message {
        let mut msg = Message::new(MessageType::Sync, 44, true);
        msg.sequence_id = 0x1234;
        msg.log_message_period = 2;
        msg.correction = TimeInterval::from_nanoseconds(1000);
        msg.source_clock = ClockIdentity::from_mac([1, 2, 3, 4, 5, 6]);
        msg.source_port = 1;
        msg.origin_timestamp = Timestamp::new(1000, 5_000_000);
        msg
    }

    #[test]
    fn test_roundtrip() {
        let msg = sample_message();
        let mut buf = Vec::new();
        msg.encode(&mut buf);
        assert_eq!(buf.len(), Message::PACKED_SIZE);
        let (decoded, n) = Message::decode(&buf).unwrap();
        assert_eq!(n, Message::PACKED_SIZE);
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_new_sets_fixed_fields() {
        let msg = Message::new(MessageType::Sync, 44, false);
        assert!(!msg.flags.two_step);
        assert!(msg.flags.unicast);
        assert_eq!(msg.control, 0);
        assert!(msg.is_response());

        let fu = Message::new(MessageType::FollowUp, 44, false);
        assert_eq!(fu.control, 2);
    }

    #[test]
    fn test_decode_rejects_bad_version() {
        let mut buf = Vec::new();
        sample_message().encode(&mut buf);
        buf[1] = 0x02;
        assert!(matches!(
            Message::decode(&buf),
            Err(ParseError::InvalidField { field: "version", .. })
        ));
    }

    #[test]
    fn test_decode_rejects_bad_domain() {
        let mut buf = Vec::new();
        sample_message().encode(&mut buf);
        buf[4] = 7;
        assert!(matches!(
            Message::decode(&buf),
            Err(ParseError::InvalidField { field: "domain", .. })
        ));
    }

    #[test]
    fn test_decode_rejects_bad_sdo() {
        let mut buf = Vec::new();
        sample_message().encode(&mut buf);
        buf[5] = 1;
        assert!(Message::decode(&buf).is_err());
        buf[5] = 0;
        buf[0] |= 0x10;
        assert!(Message::decode(&buf).is_err());
    }

    #[test]
    fn test_decode_rejects_multicast() {
        let mut buf = Vec::new();
        sample_message().encode(&mut buf);
        buf[6] &= !0x04;
        assert!(matches!(
            Message::decode(&buf),
            Err(ParseError::InvalidField { field: "unicast flag", .. })
        ));
    }

    #[test]
    fn test_decode_rejects_short_total_len() {
        let mut buf = Vec::new();
        sample_message().encode(&mut buf);
        buf[2] = 0;
        buf[3] = 20;
        assert!(Message::decode(&buf).is_err());
    }

    #[test]
    fn test_decode_rejects_truncated_buffer() {
        let mut buf = Vec::new();
        sample_message().encode(&mut buf);
        assert!(matches!(
            Message::decode(&buf[..20]),
            Err(ParseError::BufferTooShort { .. })
        ));
    }

    #[test]
    fn test_decode_rejects_unknown_type() {
        let mut buf = Vec::new();
        sample_message().encode(&mut buf);
        buf[0] = (buf[0] & 0xf0) | 0x07;
        assert!(matches!(
            Message::decode(&buf),
            Err(ParseError::InvalidField { field: "message type", .. })
        ));
    }

    #[test]
    fn test_flags_bits() {
        let mut flags = Flags::new(true);
        flags.utc_reasonable = true;
        flags.timescale = true;
        let [b0, b1] = flags.encode();
        assert_eq!(b0, 0x06);
        assert_eq!(b1, 0x0c);
        assert_eq!(Flags::decode(b0, b1), flags);
    }

    #[test]
    fn test_response_marker() {
        let mut msg = sample_message();
        assert!(!msg.is_response());
        msg.log_message_period = LOG_PERIOD_RESPONSE;
        assert!(msg.is_response());
    }
}
