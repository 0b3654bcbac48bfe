// Copyright 2026 U.S. Federal Government (in countries where recognized)
// SPDX-License-Identifier: Apache-2.0

//! Response synthesis for completed requests.
//!
//! The response mirrors the request: same sequence id, the Response TLV on
//! the same message (Sync or Follow-Up) the Request TLV rode on, and one
//! or two steps to match. The TLV echoes the request's ingress timestamp
//! and accumulated correction; with hardware timestamping active and a
//! configured UTC offset, the carrying message also announces
//! `utcReasonable`/`timescale`. A transmit timestamp that comes back below
//! the requested level is reported via the `txTimestampInvalid` error bit
//! instead of a wrong timestamp.

use std::io;
use std::net::SocketAddr;

use log::{debug, trace, warn};

use fptp_io::{NetworkInventory, SendRequest};
use fptp_proto::{
    ERROR_TX_TIMESTAMP_INVALID, Message, MessageType, ResponseTlv, TimestampLevel,
};

use crate::config::ResolvedServerMode;
use crate::request::Request;

/// Synthesize and transmit the response for a completed request.
pub async fn send_response(
    inventory: &dyn NetworkInventory,
    config: &ResolvedServerMode,
    request: &Request,
) -> io::Result<()> {
    // 1. The request must have been addressed to one of our interfaces.
    let Some(interface) = inventory.has_address(&request.dst_address()) else {
        warn!(
            "discarding request (seq id {}) from {}, no interface owns address {}",
            request.sequence_id(),
            request.src_address(),
            request.dst_address()
        );
        return Ok(());
    };

    if request.one_step() {
        warn!(
            "one-step request received from {}, only user-level timestamps available",
            request.src_address()
        );
    }

    // 2. Assemble the Response TLV.
    let mut tlv = ResponseTlv {
        error: 0,
        req_ingress_timestamp: request.ingress_timestamp(),
        req_correction_field: request.correction(),
        utc_offset: 0,
        server_state: request.server_state_requested().then(|| {
            let mut state = config.server_state;
            // While we are the grandmaster, the identity is the responding
            // interface's PTP clock identity.
            if state.steps_removed == 0
                && let Some(identity) = inventory.get_interface_ptp_clock_id(&interface)
            {
                state.grandmaster_id = identity;
            }
            state
        }),
    };

    // 3. Build the response Sync.
    let sync_total =
        Message::PACKED_SIZE + if request.sync_tlv() { tlv.wire_len() } else { 0 };
    let mut sync = Message::new(MessageType::Sync, sync_total as u16, !request.one_step());
    sync.sequence_id = request.sequence_id();

    let wanted_level = if request.one_step() {
        sync.origin_timestamp = inventory.wall_clock();
        TimestampLevel::User
    } else {
        request.timestamp_level().unwrap_or(TimestampLevel::User)
    };

    // The UTC offset is announced only with hardware timestamps, taken
    // from the listener that owns the receiving interface.
    let utc_offset = (wanted_level == TimestampLevel::Hardware)
        .then(|| {
            config
                .listeners
                .iter()
                .find(|listener| listener.interface == interface)
                .map(|listener| listener.utc_offset)
        })
        .flatten();

    if request.sync_tlv() {
        if let Some(offset) = utc_offset {
            sync.flags.utc_reasonable = true;
            sync.flags.timescale = true;
            tlv.utc_offset = offset;
        }
    }

    let mut buf = Vec::with_capacity(sync_total);
    sync.encode(&mut buf);
    if request.sync_tlv() {
        tlv.encode(&mut buf);
    }

    // 4. Transmit the Sync over the event ports, collecting its transmit
    //    timestamp.
    let report = inventory
        .send(SendRequest {
            data: &buf,
            src_interface: &interface,
            src_port: request.dst_event_port(),
            dst: SocketAddr::new(request.src_address(), request.src_event_port()),
            timestamp_level: Some(wanted_level),
        })
        .await?;
    trace!(
        "sent Sync response (seq id {}) to {}",
        request.sequence_id(),
        request.src_address()
    );

    if request.one_step() {
        return Ok(());
    }

    // 5. Two-step: the Follow-Up carries the Sync's transmit timestamp and,
    //    unless the TLV already went with the Sync, the Response TLV.
    let fu_total = Message::PACKED_SIZE + if request.sync_tlv() { 0 } else { tlv.wire_len() };
    let mut follow_up = Message::new(MessageType::FollowUp, fu_total as u16, false);
    follow_up.sequence_id = request.sequence_id();

    let achieved = report.map(|r| r.level);
    if let Some(report) = report {
        follow_up.origin_timestamp = report.timestamp;
    }

    if !request.sync_tlv() {
        if achieved.is_none() || achieved < Some(wanted_level) {
            debug!(
                "could not obtain {} transmit timestamp for client {}, setting error bit",
                wanted_level,
                request.src_address()
            );
            tlv.error |= ERROR_TX_TIMESTAMP_INVALID;
        } else if let Some(offset) = utc_offset {
            follow_up.flags.utc_reasonable = true;
            follow_up.flags.timescale = true;
            tlv.utc_offset = offset;
        }
    }

    let mut buf = Vec::with_capacity(fu_total);
    follow_up.encode(&mut buf);
    if !request.sync_tlv() {
        tlv.encode(&mut buf);
    }

    inventory
        .send(SendRequest {
            data: &buf,
            src_interface: &interface,
            src_port: request.dst_general_port(),
            dst: SocketAddr::new(request.src_address(), request.src_general_port()),
            timestamp_level: None,
        })
        .await?;
    trace!(
        "sent Follow-Up response (seq id {}) to {}",
        request.sequence_id(),
        request.src_address()
    );
    Ok(())
}
