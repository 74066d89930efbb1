//! Property tests for the frame codec

use proptest::prelude::*;
use serde_json::Value;

use sysex_bridge::protocol::codec::{pack_7bit, unpack_7bit};
use sysex_bridge::protocol::{Codec, Payload};

fn value() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<bool>().prop_map(Value::from),
        any::<i64>().prop_map(Value::from),
        "\\PC{0,12}".prop_map(Value::from),
    ]
}

fn payload() -> impl Strategy<Value = Payload> {
    prop::collection::btree_map("[a-z_]{1,8}", value(), 0..6)
        .prop_map(|m| m.into_iter().collect::<Payload>())
}

fn codec() -> Codec {
    Codec::default().with_max_encoded_payload(usize::MAX)
}

proptest! {
    #[test]
    fn prop_frame_body_is_seven_bit(id in 0u8..=0x7F, p in payload()) {
        let frame = codec().encode(id, Some(&p)).unwrap();
        prop_assert_eq!(frame[0], 0xF0);
        prop_assert_eq!(*frame.last().unwrap(), 0xF7);
        prop_assert!(frame[1..frame.len() - 1].iter().all(|&b| b <= 0x7F));
        prop_assert_eq!((frame.len() - 5) % 8, 0);
    }

    #[test]
    fn prop_decode_inverts_encode(id in 0u8..=0x7F, p in payload()) {
        let frame = codec().encode(id, Some(&p)).unwrap();
        let decoded = codec().decode(&frame).unwrap();
        prop_assert_eq!(decoded.command_id, id);
        prop_assert_eq!(decoded.payload, p);
    }

    #[test]
    fn prop_unpack_restores_arbitrary_bytes(raw in prop::collection::vec(any::<u8>(), 0..64)) {
        let packed = pack_7bit(&raw);
        prop_assert!(packed.iter().all(|&b| b <= 0x7F));
        let unpacked = unpack_7bit(&packed).unwrap();
        prop_assert_eq!(&unpacked[..raw.len()], &raw[..]);
        prop_assert!(unpacked[raw.len()..].iter().all(|&b| b == 0));
    }

    #[test]
    fn prop_decode_never_panics(bytes in prop::collection::vec(any::<u8>(), 0..48)) {
        let mut frame = vec![0xF0, 0x7D, 0x01];
        frame.extend(bytes);
        frame.push(0xF7);
        let _ = codec().decode(&frame);
    }
}
