//! SysEx wire protocol
//!
//! Frames are `F0 <vendor header> <command id> <8-for-7 encoded JSON> F7`.
//! The JSON payload is always serialized ASCII-only so that every data byte
//! stays within the 7-bit range MIDI allows between the SysEx markers.

pub mod ascii;
pub mod codec;
pub mod command;

pub use codec::{decode, encode, Codec, Frame, DEFAULT_MAX_ENCODED_PAYLOAD, DEFAULT_VENDOR_HEADER};
pub use command::{Command, CommandGroup};

/// Ordered key/value payload carried by a frame
pub type Payload = serde_json::Map<String, serde_json::Value>;

/// Reserved payload key carrying the correlation id of an outgoing request
pub const REQUEST_ID_KEY: &str = "request_id";

/// Reserved payload key carrying the request id a response answers
pub const RESPONSE_TO_KEY: &str = "response_to";

/// True for keys used purely for correlation
pub fn is_reserved_key(key: &str) -> bool {
    key == REQUEST_ID_KEY || key == RESPONSE_TO_KEY
}

/// Read a correlation id from a payload field
///
/// Ids are 16-bit and never zero; anything else is treated as absent.
pub fn correlation_id(payload: &Payload, key: &str) -> Option<u16> {
    payload
        .get(key)
        .and_then(|v| v.as_u64())
        .and_then(|n| u16::try_from(n).ok())
        .filter(|&n| n != 0)
}
