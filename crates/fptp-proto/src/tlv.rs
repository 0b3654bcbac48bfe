// Copyright 2026 U.S. Federal Government (in countries where recognized)
// SPDX-License-Identifier: Apache-2.0

//! Organization-extension TLVs appended to Sync or Follow-Up messages.
//!
//! Both TLVs share a 14-byte header: `type (u16) | length (u16, inclusive) |
//! organizationId (3) | organizationSubType (3) | flags (u32)`. The sub-type
//! is the ASCII tag "Req" or "Res". Flag bit 0x1 announces a trailing
//! ServerStateDS.
//!
//! The Request TLV payload is pure padding (`u16 + Timestamp + TimeInterval +
//! i16`, 22 bytes, plus an 18-byte ServerStateDS slot when flagged); only the
//! header flags carry information. The Response TLV payload carries the
//! request's ingress timestamp and correction, the server's UTC offset and
//! optionally its ServerStateDS.

use crate::error::ParseError;
use crate::time::{ClockIdentity, TimeInterval, Timestamp};
use crate::{FLAG_SERVER_STATE_DS, ORG_EXT_TLV_TYPE, ORG_ID, SUB_TYPE_REQUEST, SUB_TYPE_RESPONSE};

/// Size of the shared TLV header in bytes.
pub const TLV_HEADER_SIZE: usize = 14;

/// Size of the fixed (non-ServerStateDS) payload of either TLV.
pub const TLV_PAYLOAD_BASE: usize = 22;

/// Which organization-extension TLV a frame carries.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TlvKind {
    /// Request TLV ("Req").
    Request,
    /// Response TLV ("Res").
    Response,
}

/// Inspect the TLV region of a frame (the bytes following the 44-byte
/// message) and classify it.
///
/// Returns `None` unless the TLV type is the organization extension, the
/// organization id matches the vendor triplet, the sub-type is "Req" or
/// "Res" and the declared length exceeds the header while fitting the
/// remaining buffer.
pub fn validate_org_ext(buf: &[u8]) -> Option<TlvKind> {
    if buf.len() < TLV_HEADER_SIZE {
        return None;
    }
    let tlv_type = u16::from_be_bytes([buf[0], buf[1]]);
    let tlv_len = u16::from_be_bytes([buf[2], buf[3]]) as usize;
    if tlv_type != ORG_EXT_TLV_TYPE || tlv_len <= TLV_HEADER_SIZE || tlv_len > buf.len() {
        return None;
    }
    if buf[4..7] != ORG_ID {
        return None;
    }
    if buf[7..10] == SUB_TYPE_REQUEST {
        Some(TlvKind::Request)
    } else if buf[7..10] == SUB_TYPE_RESPONSE {
        Some(TlvKind::Response)
    } else {
        None
    }
}

fn encode_header(buf: &mut Vec<u8>, sub_type: [u8; 3], length: u16, flags: u32) {
    buf.extend_from_slice(&ORG_EXT_TLV_TYPE.to_be_bytes());
    buf.extend_from_slice(&length.to_be_bytes());
    buf.extend_from_slice(&ORG_ID);
    buf.extend_from_slice(&sub_type);
    buf.extend_from_slice(&flags.to_be_bytes());
}

fn decode_header(buf: &[u8], expected: [u8; 3]) -> Result<(usize, u32), ParseError> {
    if buf.len() < TLV_HEADER_SIZE {
        return Err(ParseError::BufferTooShort {
            needed: TLV_HEADER_SIZE,
            available: buf.len(),
        });
    }
    let tlv_type = u16::from_be_bytes([buf[0], buf[1]]);
    if tlv_type != ORG_EXT_TLV_TYPE {
        return Err(ParseError::InvalidField {
            field: "TLV type",
            value: tlv_type as u32,
        });
    }
    let tlv_len = u16::from_be_bytes([buf[2], buf[3]]) as usize;
    if tlv_len > buf.len() {
        return Err(ParseError::TlvLengthMismatch {
            declared: tlv_len,
            available: buf.len(),
        });
    }
    if buf[4..7] != ORG_ID || buf[7..10] != expected {
        return Err(ParseError::InvalidField {
            field: "organization id",
            value: u32::from_be_bytes([0, buf[4], buf[5], buf[6]]),
        });
    }
    let flags = u32::from_be_bytes([buf[10], buf[11], buf[12], buf[13]]);
    Ok((tlv_len, flags))
}

/// The server clock-quality dataset appended to TLVs on request.
///
/// ### Layout (18 bytes)
///
/// ```ignore
/// u8 priority1 | u8 clockClass | u8 clockAccuracy | u16 clockVariance |
/// u8 priority2 | 8B grandmasterId | u16 stepsRemoved | u8 timeSource |
/// u8 reserved
/// ```
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ServerStateDs {
    /// Grandmaster priority 1.
    pub priority1: u8,
    /// Grandmaster clock class.
    pub clock_class: u8,
    /// Grandmaster clock accuracy code.
    pub clock_accuracy: u8,
    /// Grandmaster clock variance.
    pub clock_variance: u16,
    /// Grandmaster priority 2.
    pub priority2: u8,
    /// Grandmaster clock identity.
    pub grandmaster_id: ClockIdentity,
    /// Steps removed from the grandmaster.
    pub steps_removed: u16,
    /// Time source code.
    pub time_source: u8,
}

impl ServerStateDs {
    /// Wire size in bytes (including the reserved byte).
    pub const PACKED_SIZE: usize = 18;

    /// Append the wire form.
    pub fn encode(&self, buf: &mut Vec<u8>) {
        buf.push(self.priority1);
        buf.push(self.clock_class);
        buf.push(self.clock_accuracy);
        buf.extend_from_slice(&self.clock_variance.to_be_bytes());
        buf.push(self.priority2);
        buf.extend_from_slice(&self.grandmaster_id.0);
        buf.extend_from_slice(&self.steps_removed.to_be_bytes());
        buf.push(self.time_source);
        buf.push(0);
    }

    /// Decode from the head of `buf`.
    pub fn decode(buf: &[u8]) -> Result<(Self, usize), ParseError> {
        if buf.len() < Self::PACKED_SIZE {
            return Err(ParseError::BufferTooShort {
                needed: Self::PACKED_SIZE,
                available: buf.len(),
            });
        }
        let mut id = [0u8; 8];
        id.copy_from_slice(&buf[6..14]);
        Ok((
            ServerStateDs {
                priority1: buf[0],
                clock_class: buf[1],
                clock_accuracy: buf[2],
                clock_variance: u16::from_be_bytes([buf[3], buf[4]]),
                priority2: buf[5],
                grandmaster_id: ClockIdentity(id),
                steps_removed: u16::from_be_bytes([buf[14], buf[15]]),
                time_source: buf[16],
            },
            Self::PACKED_SIZE,
        ))
    }

    /// Dataset rendered as the `p1/cc/ca/cv/p2/sr` tuple used in the state
    /// table.
    pub fn tuple_str(&self) -> String {
        format!(
            "{}/{}/0x{:02x}/0x{:04x}/{}/{}",
            self.priority1,
            self.clock_class,
            self.clock_accuracy,
            self.clock_variance,
            self.priority2,
            self.steps_removed
        )
    }
}

/// A Request TLV. Only the header flags carry information; the payload is
/// zero padding sized for the matching Response TLV.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct RequestTlv {
    /// Header flags; bit 0x1 requests the ServerStateDS.
    pub flags: u32,
}

impl RequestTlv {
    /// Build a request, optionally asking for the ServerStateDS.
    pub fn new(request_server_state: bool) -> Self {
        RequestTlv {
            flags: if request_server_state { FLAG_SERVER_STATE_DS } else { 0 },
        }
    }

    /// Whether the ServerStateDS is requested.
    pub fn server_state_requested(&self) -> bool {
        self.flags & FLAG_SERVER_STATE_DS != 0
    }

    /// Total wire length of this TLV.
    pub fn wire_len(&self) -> usize {
        let mut len = TLV_HEADER_SIZE + TLV_PAYLOAD_BASE;
        if self.server_state_requested() {
            len += ServerStateDs::PACKED_SIZE;
        }
        len
    }

    /// Append the wire form (header plus zeroed payload).
    pub fn encode(&self, buf: &mut Vec<u8>) {
        let len = self.wire_len();
        encode_header(buf, SUB_TYPE_REQUEST, len as u16, self.flags);
        buf.resize(buf.len() + (len - TLV_HEADER_SIZE), 0);
    }

    /// Decode from the head of `buf`.
    pub fn decode(buf: &[u8]) -> Result<(Self, usize), ParseError> {
        let (tlv_len, flags) = decode_header(buf, SUB_TYPE_REQUEST)?;
        let tlv = RequestTlv { flags };
        if tlv_len < tlv.wire_len() {
            return Err(ParseError::TlvLengthMismatch {
                declared: tlv_len,
                available: buf.len(),
            });
        }
        Ok((tlv, tlv.wire_len()))
    }
}

/// A Response TLV carrying the request's ingress timestamp and correction.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ResponseTlv {
    /// Error bits; see [`crate::ERROR_TX_TIMESTAMP_INVALID`].
    pub error: u16,
    /// Receive timestamp of the matching request's Sync (t2).
    pub req_ingress_timestamp: Timestamp,
    /// Accumulated correction of the matching request.
    pub req_correction_field: TimeInterval,
    /// Current UTC offset in seconds; meaningful iff the carrying message
    /// sets `utc_reasonable`.
    pub utc_offset: i16,
    /// Server clock-quality dataset, present iff requested.
    pub server_state: Option<ServerStateDs>,
}

impl ResponseTlv {
    /// Total wire length of this TLV.
    pub fn wire_len(&self) -> usize {
        let mut len = TLV_HEADER_SIZE + TLV_PAYLOAD_BASE;
        if self.server_state.is_some() {
            len += ServerStateDs::PACKED_SIZE;
        }
        len
    }

    /// Append the wire form.
    pub fn encode(&self, buf: &mut Vec<u8>) {
        let flags = if self.server_state.is_some() {
            FLAG_SERVER_STATE_DS
        } else {
            0
        };
        encode_header(buf, SUB_TYPE_RESPONSE, self.wire_len() as u16, flags);
        buf.extend_from_slice(&self.error.to_be_bytes());
        self.req_ingress_timestamp.encode(buf);
        self.req_correction_field.encode(buf);
        buf.extend_from_slice(&self.utc_offset.to_be_bytes());
        if let Some(state) = &self.server_state {
            state.encode(buf);
        }
    }

    /// Decode from the head of `buf`.
    pub fn decode(buf: &[u8]) -> Result<(Self, usize), ParseError> {
        let (tlv_len, flags) = decode_header(buf, SUB_TYPE_RESPONSE)?;
        let mut pos = TLV_HEADER_SIZE;
        if buf.len() < pos + TLV_PAYLOAD_BASE {
            return Err(ParseError::BufferTooShort {
                needed: pos + TLV_PAYLOAD_BASE,
                available: buf.len(),
            });
        }
        let error = u16::from_be_bytes([buf[pos], buf[pos + 1]]);
        pos += 2;
        let (req_ingress_timestamp, n) = Timestamp::decode(&buf[pos..])?;
        pos += n;
        let (req_correction_field, n) = TimeInterval::decode(&buf[pos..])?;
        pos += n;
        let utc_offset = i16::from_be_bytes([buf[pos], buf[pos + 1]]);
        pos += 2;

        let server_state = if flags & FLAG_SERVER_STATE_DS != 0 {
            let (state, n) = ServerStateDs::decode(&buf[pos..])?;
            pos += n;
            Some(state)
        } else {
            None
        };

        if tlv_len < pos {
            return Err(ParseError::TlvLengthMismatch {
                declared: tlv_len,
                available: buf.len(),
            });
        }
        Ok((
            ResponseTlv {
                error,
                req_ingress_timestamp,
                req_correction_field,
                utc_offset,
                server_state,
            },
            pos,
        ))
    }
}
