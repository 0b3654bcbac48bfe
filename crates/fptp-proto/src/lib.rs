// Copyright 2026 U.S. Federal Government (in countries where recognized)
// SPDX-License-Identifier: Apache-2.0

//! Wire types and codec for unicast PTP (IEEE 1588 v2.1) request/response
//! exchanges.
//!
//! A synchronization exchange consists of a request sequence (Sync plus an
//! optional Follow-Up, one of which carries a Request TLV) answered by a
//! response sequence (Sync plus an optional Follow-Up, one of which carries
//! a Response TLV). The four timestamps t1..t4 collected across the exchange
//! feed the delay and offset computation on the client.
//!
//! This crate covers exactly the wire surface: the 44-byte message (34-byte
//! PTPv2.1 header plus origin timestamp), the organization-extension TLVs,
//! and the scalar formats they are built from. All multi-byte fields are
//! big-endian on the wire.

#![warn(missing_docs)]

pub mod error;
pub mod message;
pub mod time;
pub mod tlv;

pub use error::ParseError;
pub use message::{Flags, Message, MessageType};
pub use time::{ClockIdentity, TimeInterval, Timestamp, TimestampLevel, nanoseconds_to_str};
pub use tlv::{RequestTlv, ResponseTlv, ServerStateDs, TlvKind};

/// Default UDP port for event messages (Sync).
pub const UDP_EVENT_PORT: u16 = 319;
/// Default UDP port for general messages (Follow-Up).
pub const UDP_GENERAL_PORT: u16 = 320;

/// The only PTP version emitted and accepted: v2.1.
pub const FIXED_VERSION: u8 = 0x12;
/// Fixed sdoId (major nibble + minor byte are both zero).
pub const FIXED_SDO_ID: u16 = 0x000;
/// Fixed PTP domain number.
pub const FIXED_DOMAIN: u8 = 0;

/// `logMessagePeriod` value marking a message of a response sequence.
pub const LOG_PERIOD_RESPONSE: i8 = 0x7f;

/// Organization-extension TLV type code.
pub const ORG_EXT_TLV_TYPE: u16 = 3;
/// Vendor organization identifier carried in every Request/Response TLV.
pub const ORG_ID: [u8; 3] = [0xEC, 0x46, 0x70];
/// Organization sub-type of a Request TLV ("Req").
pub const SUB_TYPE_REQUEST: [u8; 3] = *b"Req";
/// Organization sub-type of a Response TLV ("Res").
pub const SUB_TYPE_RESPONSE: [u8; 3] = *b"Res";

/// TLV header flag: a ServerStateDS is present (request) or appended
/// (response).
pub const FLAG_SERVER_STATE_DS: u32 = 0x1;

/// Response TLV error bit: the transmit timestamp could not be obtained at
/// the requested level.
pub const ERROR_TX_TIMESTAMP_INVALID: u16 = 0x0001;

/// Clock name that maps to the system realtime clock.
pub const SYSTEM_CLOCK_NAME: &str = "system";
