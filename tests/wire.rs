use canlink::wire::{
    decode_datagram, encode_frames, DatagramBuilder, DecodeError, CANNELLONI_FRAME_BASE_SIZE,
    CANNELLONI_FRAME_VERSION, OP_DATA, UDP_DATA_PACKET_BASE_SIZE, UDP_PAYLOAD_SIZE,
};
use canlink::TunnelFrame;

const EFF_FLAG: u32 = 0x8000_0000;

fn frame(can_id: u32, payload: &[u8]) -> TunnelFrame {
    TunnelFrame::new(can_id, payload).expect("valid frame")
}

/// Frames whose records fill exactly `record_bytes` on the wire.
fn filler_frames(record_bytes: usize) -> Vec<TunnelFrame> {
    let mut frames = Vec::new();
    let mut remaining = record_bytes;
    let mut id = 0u32;
    while remaining > 0 {
        let len = if remaining % 13 == 0 { 8 } else { 0 };
        frames.push(frame(id, &[0x55; 8][..len]));
        remaining -= CANNELLONI_FRAME_BASE_SIZE + len;
        id += 1;
    }
    frames
}

#[test]
fn single_datagram_round_trip() {
    let frames = vec![
        frame(0x123, &[0xDE, 0xAD]),
        frame(0x7FF, &[]),
        frame(0x1FFF_FFFF | EFF_FLAG, &[1, 2, 3, 4, 5, 6, 7, 8]),
    ];
    let datagrams = encode_frames(&frames, 7);
    assert_eq!(datagrams.len(), 1);

    let decoded = decode_datagram(&datagrams[0]).unwrap();
    assert_eq!(decoded.seq, 7);
    assert_eq!(decoded.frames, frames);
}

#[test]
fn empty_input_emits_nothing() {
    assert!(encode_frames(&[], 0).is_empty());
}

#[test]
fn zero_length_payload_occupies_five_record_bytes() {
    let datagrams = encode_frames(&[frame(0x42, &[])], 0);
    assert_eq!(
        datagrams[0].len(),
        UDP_DATA_PACKET_BASE_SIZE + CANNELLONI_FRAME_BASE_SIZE
    );
}

#[test]
fn known_wire_bytes_for_a_single_frame() {
    let datagrams = encode_frames(&[frame(0x123, &[0xDE, 0xAD])], 0);
    assert_eq!(
        datagrams[0],
        [
            CANNELLONI_FRAME_VERSION,
            OP_DATA,
            0, // seq
            0,
            1, // count
            0x00,
            0x00,
            0x01,
            0x23, // id
            0x02, // len
            0xDE,
            0xAD,
        ]
    );
}

#[test]
fn extended_full_payload_frame_round_trips() {
    let frames = vec![frame(
        0x18DA_F1F2 | EFF_FLAG,
        &[0, 1, 2, 3, 4, 5, 6, 7],
    )];
    let decoded = decode_datagram(&encode_frames(&frames, 0)[0]).unwrap();
    assert_eq!(decoded.frames, frames);
    assert!(decoded.frames[0].is_extended());
}

#[test]
fn exact_fit_stays_in_one_datagram_and_one_byte_more_splits() {
    let exact = filler_frames(UDP_PAYLOAD_SIZE - UDP_DATA_PACKET_BASE_SIZE);
    let datagrams = encode_frames(&exact, 0);
    assert_eq!(datagrams.len(), 1);
    assert_eq!(datagrams[0].len(), UDP_PAYLOAD_SIZE);

    let mut over = exact;
    over.push(frame(0xABC, &[]));
    assert_eq!(encode_frames(&over, 0).len(), 2);
}

#[test]
fn fragmenting_round_trip_preserves_order_and_increments_seq() {
    let frames: Vec<_> = (0..300)
        .map(|i| frame(i, &(i as u64).to_be_bytes()))
        .collect();
    let datagrams = encode_frames(&frames, 254);
    assert!(datagrams.len() > 1);

    let mut reassembled = Vec::new();
    let mut expected_seq = 254u8;
    for datagram in &datagrams {
        let decoded = decode_datagram(datagram).unwrap();
        assert_eq!(decoded.seq, expected_seq);
        assert!(!decoded.frames.is_empty());
        expected_seq = expected_seq.wrapping_add(1);
        reassembled.extend(decoded.frames);
    }
    assert_eq!(reassembled, frames);
}

#[test]
fn truncated_final_frame_discards_the_whole_datagram() {
    let frames = vec![frame(0x1, &[1]), frame(0x2, &[2, 3]), frame(0x3, &[4, 5, 6])];
    let mut bytes = encode_frames(&frames, 0).remove(0);
    bytes.pop();
    assert_eq!(decode_datagram(&bytes), Err(DecodeError::Truncated));
}

#[test]
fn version_mismatch_is_rejected() {
    let mut bytes = encode_frames(&[frame(0x1, &[])], 0).remove(0);
    bytes[0] = 0;
    assert_eq!(decode_datagram(&bytes), Err(DecodeError::Version(0)));
}

#[test]
fn unknown_op_code_is_rejected() {
    let mut bytes = encode_frames(&[frame(0x1, &[])], 0).remove(0);
    bytes[1] = 2;
    assert_eq!(decode_datagram(&bytes), Err(DecodeError::OpCode(2)));
}

#[test]
fn zero_frame_count_is_rejected() {
    let bytes = [CANNELLONI_FRAME_VERSION, OP_DATA, 9, 0, 0];
    assert_eq!(decode_datagram(&bytes), Err(DecodeError::Empty));
}

#[test]
fn short_header_is_truncated() {
    let bytes = [CANNELLONI_FRAME_VERSION, OP_DATA, 0];
    assert_eq!(decode_datagram(&bytes), Err(DecodeError::Truncated));
}

#[test]
fn reserved_payload_length_is_rejected() {
    let bytes = [
        CANNELLONI_FRAME_VERSION,
        OP_DATA,
        0,
        0,
        1, // one frame
        0,
        0,
        0,
        1, // id
        9, // reserved length
    ];
    assert_eq!(decode_datagram(&bytes), Err(DecodeError::FrameLength(9)));
}

#[test]
fn builder_reset_starts_a_fresh_datagram() {
    let mut builder = DatagramBuilder::new();
    assert!(builder.push(&frame(0x1, &[1, 2])));
    assert_eq!(builder.frame_count(), 1);

    builder.reset();
    assert!(builder.is_empty());
    assert!(builder.push(&frame(0x2, &[])));

    let decoded = decode_datagram(builder.seal(3)).unwrap();
    assert_eq!(decoded.seq, 3);
    assert_eq!(decoded.frames, vec![frame(0x2, &[])]);
}
