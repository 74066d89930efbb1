//! Frame codec
//!
//! Pure functions, no I/O. The payload is compact ASCII JSON packed with an
//! 8-for-7 transform: every block of 7 raw bytes becomes one flag byte
//! (bit j set when raw byte j had its high bit set) followed by the 7 low
//! 7-bit values, zero-padded in the final block.

use serde_json::Value;
use tracing::trace;

use super::ascii::to_ascii_json;
use super::command::Command;
use super::Payload;
use crate::error::{DecodeError, EncodeError};
use crate::midi::{format_hex, SYSEX_END, SYSEX_START};

/// Vendor bytes following the SysEx start marker (non-commercial id 0x7D, product 0x01)
pub const DEFAULT_VENDOR_HEADER: [u8; 2] = [0x7D, 0x01];

/// Conservative limit for the encoded payload of one frame
pub const DEFAULT_MAX_ENCODED_PAYLOAD: usize = 240;

const BLOCK_DATA_LEN: usize = 7;
const BLOCK_LEN: usize = BLOCK_DATA_LEN + 1;

/// A decoded frame
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub command_id: u8,
    pub payload: Payload,
}

impl Frame {
    /// The known command for this frame's id, if any
    pub fn command(&self) -> Option<Command> {
        Command::from_id(self.command_id)
    }
}

/// Encoder/decoder bound to one vendor header and frame budget
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Codec {
    /// Start marker followed by the vendor header
    prefix: Vec<u8>,
    max_encoded_payload: usize,
}

impl Default for Codec {
    fn default() -> Self {
        Self::new(&DEFAULT_VENDOR_HEADER)
    }
}

impl Codec {
    /// Create a codec for the given vendor header bytes
    pub fn new(vendor_header: &[u8]) -> Self {
        let mut prefix = Vec::with_capacity(vendor_header.len() + 1);
        prefix.push(SYSEX_START);
        prefix.extend_from_slice(vendor_header);
        Self {
            prefix,
            max_encoded_payload: DEFAULT_MAX_ENCODED_PAYLOAD,
        }
    }

    /// Override the encoded payload budget
    pub fn with_max_encoded_payload(mut self, limit: usize) -> Self {
        self.max_encoded_payload = limit;
        self
    }

    /// Leading bytes every frame of this protocol starts with
    pub fn prefix(&self) -> &[u8] {
        &self.prefix
    }

    pub fn max_encoded_payload(&self) -> usize {
        self.max_encoded_payload
    }

    /// Shortest possible frame: prefix, command id, end marker
    pub fn min_frame_len(&self) -> usize {
        self.prefix.len() + 2
    }

    /// Cheap check used by the listener to filter bus traffic
    pub fn is_candidate(&self, data: &[u8]) -> bool {
        data.len() >= self.min_frame_len() && data.starts_with(&self.prefix)
    }

    /// Encode a command and optional payload into one frame
    ///
    /// A missing or empty payload produces a zero-length body.
    pub fn encode(&self, command_id: u8, payload: Option<&Payload>) -> Result<Vec<u8>, EncodeError> {
        if command_id > 0x7F {
            return Err(EncodeError::CommandIdOutOfRange(command_id));
        }

        let json = match payload {
            Some(p) if !p.is_empty() => to_ascii_json(p)?,
            _ => Vec::new(),
        };

        let body = pack_7bit(&json);
        if body.len() > self.max_encoded_payload {
            return Err(EncodeError::FrameTooLarge {
                len: body.len(),
                limit: self.max_encoded_payload,
            });
        }

        let mut frame = Vec::with_capacity(self.prefix.len() + body.len() + 2);
        frame.extend_from_slice(&self.prefix);
        frame.push(command_id);
        frame.extend_from_slice(&body);
        frame.push(SYSEX_END);

        trace!("Encoded 0x{:02X}: {} json bytes -> {} frame bytes", command_id, json.len(), frame.len());
        Ok(frame)
    }

    /// Encode into as many frames as the payload needs
    ///
    /// Multi-frame chunking is not part of the protocol yet, so this yields
    /// exactly one frame or fails with `FrameTooLarge`.
    pub fn encode_frames(
        &self,
        command_id: u8,
        payload: Option<&Payload>,
    ) -> Result<Vec<Vec<u8>>, EncodeError> {
        self.encode(command_id, payload).map(|frame| vec![frame])
    }

    /// Decode one frame
    pub fn decode(&self, bytes: &[u8]) -> Result<Frame, DecodeError> {
        if bytes.len() < self.min_frame_len()
            || !bytes.starts_with(&self.prefix)
            || bytes[bytes.len() - 1] != SYSEX_END
        {
            return Err(DecodeError::NotOurs);
        }

        let inner = &bytes[self.prefix.len()..bytes.len() - 1];
        if let Some(pos) = inner.iter().position(|&b| b > 0x7F) {
            return Err(DecodeError::HighBitInBody {
                offset: self.prefix.len() + pos,
                byte: inner[pos],
            });
        }

        let command_id = inner[0];
        let mut raw = unpack_7bit(&inner[1..])?;
        while raw.last() == Some(&0) {
            raw.pop();
        }

        if raw.is_empty() {
            return Ok(Frame {
                command_id,
                payload: Payload::new(),
            });
        }

        if std::str::from_utf8(&raw).is_err() {
            return Err(DecodeError::Utf8 { raw });
        }

        let value: Value = match serde_json::from_slice(&raw) {
            Ok(v) => v,
            Err(e) => {
                return Err(DecodeError::Json {
                    message: e.to_string(),
                    raw,
                })
            }
        };

        match value {
            Value::Object(payload) => Ok(Frame { command_id, payload }),
            _ => Err(DecodeError::NotAnObject { raw }),
        }
    }
}

/// Encode with the default vendor header and budget
pub fn encode(command_id: u8, payload: Option<&Payload>) -> Result<Vec<u8>, EncodeError> {
    Codec::default().encode(command_id, payload)
}

/// Decode with the default vendor header
pub fn decode(bytes: &[u8]) -> Result<Frame, DecodeError> {
    Codec::default().decode(bytes)
}

/// Apply the 8-for-7 transform
pub fn pack_7bit(raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(raw.len().div_ceil(BLOCK_DATA_LEN) * BLOCK_LEN);
    for chunk in raw.chunks(BLOCK_DATA_LEN) {
        let flags = chunk
            .iter()
            .enumerate()
            .fold(0u8, |acc, (j, &b)| if b & 0x80 != 0 { acc | (1 << j) } else { acc });
        out.push(flags);
        out.extend(chunk.iter().map(|&b| b & 0x7F));
        out.extend(std::iter::repeat(0).take(BLOCK_DATA_LEN - chunk.len()));
    }
    out
}

/// Reverse the 8-for-7 transform
///
/// A set flag bit restores the high bit of the matching data byte.
pub fn unpack_7bit(encoded: &[u8]) -> Result<Vec<u8>, DecodeError> {
    if encoded.len() % BLOCK_LEN != 0 {
        return Err(DecodeError::MalformedBlock {
            len: encoded.len(),
            raw: encoded.to_vec(),
        });
    }

    let mut out = Vec::with_capacity(encoded.len() / BLOCK_LEN * BLOCK_DATA_LEN);
    for block in encoded.chunks_exact(BLOCK_LEN) {
        let flags = block[0];
        for (j, &b) in block[1..].iter().enumerate() {
            if flags & (1 << j) != 0 {
                out.push(b | 0x80);
            } else {
                out.push(b);
            }
        }
    }

    if out.iter().any(|&b| b > 0x7F) {
        trace!("Restored high bits in payload: {}", format_hex(&out));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(v: Value) -> Payload {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn test_frame_layout() {
        let frame = encode(0x31, None).unwrap();
        assert_eq!(frame, vec![0xF0, 0x7D, 0x01, 0x31, 0xF7]);
    }

    #[test]
    fn test_empty_payload_has_empty_body() {
        let frame = encode(0x31, Some(&Payload::new())).unwrap();
        assert_eq!(frame.len(), 5);
        assert_eq!(decode(&frame).unwrap().payload, Payload::new());
    }

    #[test]
    fn test_body_is_whole_blocks() {
        // {"bpm":140} is 11 bytes -> two blocks
        let frame = encode(0x30, Some(&payload(json!({"bpm": 140})))).unwrap();
        let body = &frame[4..frame.len() - 1];
        assert_eq!(body.len(), 16);
        assert_eq!(body[0], 0);
        assert_eq!(&body[1..8], b"{\"bpm\":");
    }

    #[test]
    fn test_round_trip() {
        let p = payload(json!({"index": 1, "color": 65280, "request_id": 7}));
        let frame = encode(0x12, Some(&p)).unwrap();
        let decoded = decode(&frame).unwrap();
        assert_eq!(decoded.command_id, 0x12);
        assert_eq!(decoded.payload, p);
        assert_eq!(decoded.command(), Some(Command::SetChannelColor));
    }

    #[test]
    fn test_non_ascii_round_trip_is_lossless() {
        let p = payload(json!({"effect": "Fruity Réeverb 2", "unit": "°"}));
        let frame = encode(0x21, Some(&p)).unwrap();
        assert!(frame[1..frame.len() - 1].iter().all(|&b| b <= 0x7F));
        assert_eq!(decode(&frame).unwrap().payload, p);
    }

    #[test]
    fn test_pack_records_high_bits() {
        let packed = pack_7bit(&[0x41, 0xC3, 0xA9]);
        assert_eq!(packed[0], 0b0000_0110);
        assert_eq!(&packed[1..4], &[0x41, 0x43, 0x29]);
        assert_eq!(unpack_7bit(&packed).unwrap()[..3], [0x41, 0xC3, 0xA9]);
    }

    #[test]
    fn test_command_id_must_be_seven_bit() {
        assert!(matches!(
            encode(0x80, None),
            Err(EncodeError::CommandIdOutOfRange(0x80))
        ));
    }

    #[test]
    fn test_oversized_payload_rejected() {
        let codec = Codec::default().with_max_encoded_payload(16);
        let p = payload(json!({"name": "a much longer channel name"}));
        match codec.encode(0x11, Some(&p)) {
            Err(EncodeError::FrameTooLarge { len, limit }) => {
                assert_eq!(limit, 16);
                assert!(len > 16);
            }
            other => panic!("expected FrameTooLarge, got {:?}", other),
        }
    }

    #[test]
    fn test_foreign_sysex_is_not_ours() {
        // Universal device inquiry
        assert_eq!(decode(&[0xF0, 0x7E, 0x7F, 0x06, 0x01, 0xF7]), Err(DecodeError::NotOurs));
        // Missing end marker
        assert_eq!(decode(&[0xF0, 0x7D, 0x01, 0x31]), Err(DecodeError::NotOurs));
        // Too short
        assert_eq!(decode(&[0xF0, 0x7D, 0xF7]), Err(DecodeError::NotOurs));
        assert_eq!(decode(&[]), Err(DecodeError::NotOurs));
    }

    #[test]
    fn test_truncated_block_is_malformed() {
        let mut frame = encode(0x70, Some(&payload(json!({"ok": true})))).unwrap();
        // Drop one body byte before the end marker
        frame.remove(frame.len() - 2);
        assert!(matches!(
            decode(&frame),
            Err(DecodeError::MalformedBlock { len: 15, .. })
        ));
    }

    #[test]
    fn test_high_bit_in_body_rejected() {
        let frame = [0xF0, 0x7D, 0x01, 0x70, 0x00, 0x80, 0, 0, 0, 0, 0, 0, 0xF7];
        assert_eq!(
            decode(&frame),
            Err(DecodeError::HighBitInBody { offset: 5, byte: 0x80 })
        );
    }

    #[test]
    fn test_invalid_json_carries_raw_bytes() {
        let mut frame = vec![0xF0, 0x7D, 0x01, 0x70];
        frame.extend(pack_7bit(b"{oops"));
        frame.push(0xF7);
        match decode(&frame) {
            Err(DecodeError::Json { raw, .. }) => assert_eq!(raw, b"{oops"),
            other => panic!("expected Json error, got {:?}", other),
        }
    }

    #[test]
    fn test_non_object_json_rejected() {
        let mut frame = vec![0xF0, 0x7D, 0x01, 0x70];
        frame.extend(pack_7bit(b"[1,2]"));
        frame.push(0xF7);
        assert!(matches!(decode(&frame), Err(DecodeError::NotAnObject { .. })));
    }

    #[test]
    fn test_invalid_utf8_reported() {
        let mut frame = vec![0xF0, 0x7D, 0x01, 0x70];
        frame.extend(pack_7bit(&[b'{', 0xFF, b'}']));
        frame.push(0xF7);
        assert!(matches!(decode(&frame), Err(DecodeError::Utf8 { .. })));
    }

    #[test]
    fn test_custom_vendor_header() {
        let codec = Codec::new(&[0x00, 0x21, 0x09]);
        let frame = codec.encode(0x31, None).unwrap();
        assert_eq!(&frame[..4], &[0xF0, 0x00, 0x21, 0x09]);
        assert!(codec.is_candidate(&frame));
        assert_eq!(decode(&frame), Err(DecodeError::NotOurs));
        assert_eq!(codec.decode(&frame).unwrap().command_id, 0x31);
    }

    #[test]
    fn test_encode_frames_single_frame() {
        let frames = Codec::default().encode_frames(0x31, None).unwrap();
        assert_eq!(frames.len(), 1);
    }
}
