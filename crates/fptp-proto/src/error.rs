// Copyright 2026 U.S. Federal Government (in countries where recognized)
// SPDX-License-Identifier: Apache-2.0

//! Parse errors for buffer-based message and TLV decoding.

use std::fmt;

/// Errors produced while decoding wire messages and TLVs.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ParseError {
    /// The buffer is shorter than the structure being decoded.
    BufferTooShort {
        /// Bytes needed to decode the structure.
        needed: usize,
        /// Bytes actually available.
        available: usize,
    },
    /// A fixed or enumerated field holds an unsupported value.
    InvalidField {
        /// Name of the offending field.
        field: &'static str,
        /// The raw value encountered.
        value: u32,
    },
    /// The declared TLV length does not fit the remaining buffer.
    TlvLengthMismatch {
        /// Length declared in the TLV header.
        declared: usize,
        /// Bytes remaining in the buffer.
        available: usize,
    },
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::BufferTooShort { needed, available } => {
                write!(f, "buffer too short: needed {needed} bytes, have {available}")
            }
            ParseError::InvalidField { field, value } => {
                write!(f, "invalid value {value:#x} for field {field}")
            }
            ParseError::TlvLengthMismatch { declared, available } => {
                write!(
                    f,
                    "TLV length {declared} exceeds remaining buffer ({available} bytes)"
                )
            }
        }
    }
}

impl std::error::Error for ParseError {}
