//! SysEx Bridge
//!
//! Request/response command channel to a DAW host over a pair of MIDI
//! ports. Commands travel as SysEx frames carrying compact JSON; the host
//! answers on the second port and responses are matched back to the waiting
//! caller by request id.

pub mod bridge;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod feedback;
pub mod midi;
pub mod protocol;
pub mod responder;
pub mod transport;

pub use bridge::Bridge;
pub use config::AppConfig;
pub use dispatcher::{Dispatcher, Reply, SelectMode, TransportAction};
pub use error::{BridgeError, CorrelationError, DecodeError, EncodeError, TransportError, WaitError};
pub use feedback::{FeedbackCorrelator, Response, ResponseStatus, Unsolicited, UnsolicitedKind};
pub use protocol::{Codec, Command, Frame, Payload};
pub use responder::{CommandHandler, Responder};
pub use transport::{FrameSink, MidiTransport};
