//! Error taxonomy for the bridge
//!
//! Every failure that crosses a module boundary is one of these typed
//! errors. `BridgeError` is the discriminated outcome callers of the
//! dispatcher see: "could not send", "sent, no answer in time" and
//! "sent, remote rejected it" are distinct variants.

use std::time::Duration;
use thiserror::Error;

use crate::protocol::Payload;
use crate::transport::PortDirection;

/// Failure while turning a command and payload into a frame
#[derive(Error, Debug)]
pub enum EncodeError {
    #[error("failed to serialize payload: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("command id 0x{0:02X} does not fit in a 7-bit SysEx data byte")]
    CommandIdOutOfRange(u8),

    #[error("encoded payload is {len} bytes, frame budget is {limit}")]
    FrameTooLarge { len: usize, limit: usize },
}

/// Failure while turning received bytes back into a frame
///
/// `NotOurs` is the normal outcome for foreign SysEx traffic on the bus.
/// The other variants carry the offending bytes for diagnosis.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("not a frame of this protocol")]
    NotOurs,

    #[error("byte 0x{byte:02X} at offset {offset} has the high bit set")]
    HighBitInBody { offset: usize, byte: u8 },

    #[error("encoded body of {len} bytes is not a whole number of 8-byte blocks")]
    MalformedBlock { len: usize, raw: Vec<u8> },

    #[error("payload is not valid UTF-8 (raw: {})", hex::encode(.raw))]
    Utf8 { raw: Vec<u8> },

    #[error("payload is not valid JSON: {message} (raw: {})", hex::encode(.raw))]
    Json { message: String, raw: Vec<u8> },

    #[error("payload JSON is not an object (raw: {})", hex::encode(.raw))]
    NotAnObject { raw: Vec<u8> },
}

/// MIDI port failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("no {direction} port configured or discovered")]
    NoPort { direction: PortDirection },

    #[error("{direction} port '{name}' not found")]
    PortNotFound { direction: PortDirection, name: String },

    #[error("port '{name}' unavailable: {reason}")]
    PortUnavailable { name: String, reason: String },

    #[error("write to '{name}' failed: {reason}")]
    WriteFailed { name: String, reason: String },

    #[error("frame is missing its SysEx start or end marker")]
    MalformedFrame,

    #[error("MIDI backend error: {0}")]
    Backend(String),
}

/// Caller mistakes around request ids
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CorrelationError {
    #[error("request {0} is unknown or already completed")]
    UnknownRequest(u16),

    #[error("request {0} is already being waited on")]
    AlreadyWaiting(u16),

    #[error("all request ids are in use")]
    Exhausted,
}

/// Outcome of `FeedbackCorrelator::wait` other than a response
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WaitError {
    #[error("no response to request {request_id} within {waited:?}")]
    Timeout { request_id: u16, waited: Duration },

    #[error(transparent)]
    Correlation(#[from] CorrelationError),
}

/// Everything a dispatched command can end in besides success
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("could not encode command: {0}")]
    Encode(#[from] EncodeError),

    #[error("could not send command: {0}")]
    Transport(#[from] TransportError),

    #[error("no response to request {request_id} within {waited:?}")]
    Timeout { request_id: u16, waited: Duration },

    #[error(transparent)]
    Correlation(#[from] CorrelationError),

    #[error("host reported an error: {message}")]
    Remote { message: String, payload: Payload },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("could not decode frame: {0}")]
    Decode(#[from] DecodeError),
}

impl From<WaitError> for BridgeError {
    fn from(e: WaitError) -> Self {
        match e {
            WaitError::Timeout { request_id, waited } => BridgeError::Timeout { request_id, waited },
            WaitError::Correlation(c) => BridgeError::Correlation(c),
        }
    }
}

impl BridgeError {
    /// True when the bytes never left the process
    pub fn is_send_failure(&self) -> bool {
        matches!(
            self,
            BridgeError::Encode(_) | BridgeError::Transport(_) | BridgeError::InvalidArgument(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_error_shows_raw_hex() {
        let err = DecodeError::Utf8 { raw: vec![0xC3, 0x28] };
        assert!(err.to_string().contains("c328"));
    }

    #[test]
    fn test_wait_error_maps_to_bridge_error() {
        let timeout = WaitError::Timeout { request_id: 3, waited: Duration::from_millis(10) };
        assert!(matches!(
            BridgeError::from(timeout),
            BridgeError::Timeout { request_id: 3, .. }
        ));

        let unknown = WaitError::Correlation(CorrelationError::UnknownRequest(9));
        assert!(matches!(
            BridgeError::from(unknown),
            BridgeError::Correlation(CorrelationError::UnknownRequest(9))
        ));
    }

    #[test]
    fn test_send_failure_classification() {
        assert!(BridgeError::Transport(TransportError::MalformedFrame).is_send_failure());
        assert!(!BridgeError::Timeout { request_id: 1, waited: Duration::ZERO }.is_send_failure());
    }
}
