// Copyright 2026 U.S. Federal Government (in countries where recognized)
// SPDX-License-Identifier: Apache-2.0

//! Full-frame encode/decode tests: message plus TLV, as sent on the wire.

use fptp_proto::{
    FLAG_SERVER_STATE_DS, LOG_PERIOD_RESPONSE, Message, MessageType, RequestTlv, ResponseTlv,
    ServerStateDs, TimeInterval, Timestamp, TlvKind, tlv,
};

fn request_frame(two_step: bool, request_state: bool) -> Vec<u8> {
    let tlv = RequestTlv::new(request_state);
    let mut msg = Message::new(
        MessageType::Sync,
        (Message::PACKED_SIZE + tlv.wire_len()) as u16,
        two_step,
    );
    msg.sequence_id = 42;
    msg.log_message_period = 0;
    let mut buf = Vec::new();
    msg.encode(&mut buf);
    tlv.encode(&mut buf);
    buf
}

#[test]
fn request_frame_roundtrip() {
    let buf = request_frame(true, true);
    assert_eq!(buf.len(), 44 + 54);

    let (msg, n) = Message::decode(&buf).unwrap();
    assert_eq!(n, Message::PACKED_SIZE);
    assert_eq!(msg.msg_type, MessageType::Sync);
    assert_eq!(msg.total_len as usize, buf.len());
    assert!(msg.flags.two_step);
    assert!(!msg.is_response());

    assert_eq!(tlv::validate_org_ext(&buf[n..]), Some(TlvKind::Request));
    let (req, _) = RequestTlv::decode(&buf[n..]).unwrap();
    assert!(req.server_state_requested());
}

#[test]
fn response_frame_roundtrip() {
    let resp = ResponseTlv {
        error: 0,
        req_ingress_timestamp: Timestamp::new(1000, 5_000_000),
        req_correction_field: TimeInterval::from_nanoseconds(12),
        utc_offset: 37,
        server_state: Some(ServerStateDs {
            priority1: 128,
            clock_class: 6,
            clock_accuracy: 0x21,
            clock_variance: 0x4e5d,
            priority2: 128,
            grandmaster_id: fptp_proto::ClockIdentity::from_mac([0xec, 0x46, 0x70, 9, 8, 7]),
            steps_removed: 0,
            time_source: 0x20,
        }),
    };
    let mut msg = Message::new(
        MessageType::FollowUp,
        (Message::PACKED_SIZE + resp.wire_len()) as u16,
        false,
    );
    msg.sequence_id = 42;
    msg.flags.utc_reasonable = true;
    msg.flags.timescale = true;
    msg.origin_timestamp = Timestamp::new(1000, 5_500_000);

    let mut buf = Vec::new();
    msg.encode(&mut buf);
    resp.encode(&mut buf);

    let (decoded, n) = Message::decode(&buf).unwrap();
    assert_eq!(decoded, msg);
    assert!(decoded.is_response());
    assert_eq!(decoded.log_message_period, LOG_PERIOD_RESPONSE);

    assert_eq!(tlv::validate_org_ext(&buf[n..]), Some(TlvKind::Response));
    let (tlv, _) = ResponseTlv::decode(&buf[n..]).unwrap();
    assert_eq!(tlv, resp);
    assert_eq!(tlv.server_state.unwrap().steps_removed, 0);
}

#[test]
fn bare_message_has_no_tlv() {
    let msg = Message::new(MessageType::Sync, Message::PACKED_SIZE as u16, false);
    let mut buf = Vec::new();
    msg.encode(&mut buf);
    assert_eq!(tlv::validate_org_ext(&buf[Message::PACKED_SIZE..]), None);
}

#[test]
fn request_state_flag_governs_payload_size() {
    let plain = request_frame(true, false);
    let with_state = request_frame(true, true);
    assert_eq!(with_state.len() - plain.len(), ServerStateDs::PACKED_SIZE);

    let (_, n) = Message::decode(&with_state).unwrap();
    let (tlv, _) = RequestTlv::decode(&with_state[n..]).unwrap();
    assert_eq!(tlv.flags & FLAG_SERVER_STATE_DS, FLAG_SERVER_STATE_DS);
}
