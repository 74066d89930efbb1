//! Host-side framing
//!
//! The DAW script on the other end of the cable decodes commands, runs them
//! and answers with RESPONSE_SUCCESS or RESPONSE_ERROR. `Responder` does the
//! framing half of that job around a `CommandHandler`, so the same protocol
//! code serves a real host, a simulator and the loopback tests.

use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{BridgeError, DecodeError};
use crate::protocol::{correlation_id, Codec, Command, Payload, REQUEST_ID_KEY, RESPONSE_TO_KEY};

/// Executes decoded commands on the host
pub trait CommandHandler: Send + Sync {
    /// Run `command` with its arguments (correlation keys already removed)
    ///
    /// `Err` carries the message sent back in RESPONSE_ERROR.
    fn handle(&self, command: Command, args: &Payload) -> Result<Payload, String>;
}

impl<F> CommandHandler for F
where
    F: Fn(Command, &Payload) -> Result<Payload, String> + Send + Sync,
{
    fn handle(&self, command: Command, args: &Payload) -> Result<Payload, String> {
        self(command, args)
    }
}

pub struct Responder<H> {
    codec: Codec,
    handler: H,
}

impl<H: CommandHandler> Responder<H> {
    pub fn new(codec: Codec, handler: H) -> Self {
        Self { codec, handler }
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// Answer one incoming frame
    ///
    /// Returns `Ok(None)` for foreign SysEx and for reply frames, which a
    /// host never answers.
    pub fn respond(&self, frame: &[u8]) -> Result<Option<Vec<u8>>, BridgeError> {
        let decoded = match self.codec.decode(frame) {
            Ok(f) => f,
            Err(DecodeError::NotOurs) => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut args = decoded.payload;
        let request_id = correlation_id(&args, REQUEST_ID_KEY);
        args.remove(REQUEST_ID_KEY);

        let result = match Command::from_id(decoded.command_id) {
            Some(c) if c.is_reply() => {
                debug!("Ignoring reply frame {}", c);
                return Ok(None);
            }
            Some(c) => {
                debug!("Handling {} (request {:?})", c, request_id);
                self.handler.handle(c, &args)
            }
            None => Err(format!("Unknown command ID: 0x{:02x}", decoded.command_id)),
        };

        let (command, reply) = match result {
            Ok(data) => (Command::ResponseSuccess, data),
            Err(message) => {
                warn!("Command 0x{:02X} failed: {}", decoded.command_id, message);
                (Command::ResponseError, error_payload(message))
            }
        };

        match self.codec.encode(command.id(), Some(&correlated(reply, request_id))) {
            Ok(frame) => Ok(Some(frame)),
            Err(e) if command == Command::ResponseSuccess => {
                // Caller is waiting on this id; an oversized answer still gets a reply
                warn!("Response to 0x{:02X} could not be encoded: {}", decoded.command_id, e);
                let reply = correlated(error_payload(format!("Response could not be encoded: {}", e)), request_id);
                Ok(Some(self.codec.encode(Command::ResponseError.id(), Some(&reply))?))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Build an unsolicited ASYNC_UPDATE frame
    pub fn async_update(&self, payload: &Payload) -> Result<Vec<u8>, BridgeError> {
        Ok(self.codec.encode(Command::AsyncUpdate.id(), Some(payload))?)
    }
}

fn error_payload(message: String) -> Payload {
    let mut p = Payload::new();
    p.insert("message".to_string(), Value::String(message));
    p
}

/// Swap the request's correlation key for `response_to`
fn correlated(mut reply: Payload, request_id: Option<u16>) -> Payload {
    reply.remove(REQUEST_ID_KEY);
    match request_id {
        Some(id) => {
            reply.insert(RESPONSE_TO_KEY.to_string(), Value::from(id));
        }
        None => {
            reply.remove(RESPONSE_TO_KEY);
        }
    }
    reply
}
