//! MIDI backend seam
//!
//! The transport only needs to list ports, open an output and open an input
//! with a byte callback. `MidirBackend` does that with midir; tests swap in
//! in-memory backends.

use midir::{Ignore, MidiInput, MidiInputConnection, MidiOutput, MidiOutputConnection};
use tracing::debug;

use super::PortDirection;
use crate::error::TransportError;

/// Callback invoked for every incoming MIDI message
pub type InputCallback = Box<dyn FnMut(&[u8]) + Send + 'static>;

/// An open output port
pub trait OutputConnection: Send {
    fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError>;
}

/// An open input port; dropping it closes the port
pub trait InputConnection {
    fn port_name(&self) -> &str;
}

/// Platform MIDI access
pub trait MidiBackend: Send + Sync {
    fn input_ports(&self) -> Result<Vec<String>, TransportError>;
    fn output_ports(&self) -> Result<Vec<String>, TransportError>;
    fn open_output(&self, port_name: &str) -> Result<Box<dyn OutputConnection>, TransportError>;
    fn open_input(
        &self,
        port_name: &str,
        callback: InputCallback,
    ) -> Result<Box<dyn InputConnection>, TransportError>;
}

/// midir-backed MIDI access
#[derive(Debug, Clone)]
pub struct MidirBackend {
    client_name: String,
}

impl MidirBackend {
    pub fn new(client_name: impl Into<String>) -> Self {
        Self {
            client_name: client_name.into(),
        }
    }

    fn midi_in(&self, suffix: &str) -> Result<MidiInput, TransportError> {
        MidiInput::new(&format!("{}-{}", self.client_name, suffix))
            .map_err(|e| TransportError::Backend(e.to_string()))
    }

    fn midi_out(&self, suffix: &str) -> Result<MidiOutput, TransportError> {
        MidiOutput::new(&format!("{}-{}", self.client_name, suffix))
            .map_err(|e| TransportError::Backend(e.to_string()))
    }
}

impl Default for MidirBackend {
    fn default() -> Self {
        Self::new("SysEx-Bridge")
    }
}

impl MidiBackend for MidirBackend {
    fn input_ports(&self) -> Result<Vec<String>, TransportError> {
        let midi_in = self.midi_in("Scanner")?;
        Ok(midi_in
            .ports()
            .iter()
            .filter_map(|p| midi_in.port_name(p).ok())
            .collect())
    }

    fn output_ports(&self) -> Result<Vec<String>, TransportError> {
        let midi_out = self.midi_out("Scanner")?;
        Ok(midi_out
            .ports()
            .iter()
            .filter_map(|p| midi_out.port_name(p).ok())
            .collect())
    }

    fn open_output(&self, port_name: &str) -> Result<Box<dyn OutputConnection>, TransportError> {
        let midi_out = self.midi_out("Out")?;

        let port = midi_out
            .ports()
            .into_iter()
            .find(|p| midi_out.port_name(p).map(|n| n == port_name).unwrap_or(false))
            .ok_or_else(|| TransportError::PortNotFound {
                direction: PortDirection::Output,
                name: port_name.to_string(),
            })?;

        let conn = midi_out
            .connect(&port, &self.client_name)
            .map_err(|e| TransportError::PortUnavailable {
                name: port_name.to_string(),
                reason: e.to_string(),
            })?;

        debug!("midir output connected: '{}'", port_name);
        Ok(Box::new(MidirOutput {
            conn,
            name: port_name.to_string(),
        }))
    }

    fn open_input(
        &self,
        port_name: &str,
        mut callback: InputCallback,
    ) -> Result<Box<dyn InputConnection>, TransportError> {
        let mut midi_in = self.midi_in("In")?;
        // SysEx is filtered out by default
        midi_in.ignore(Ignore::None);

        let port = midi_in
            .ports()
            .into_iter()
            .find(|p| midi_in.port_name(p).map(|n| n == port_name).unwrap_or(false))
            .ok_or_else(|| TransportError::PortNotFound {
                direction: PortDirection::Input,
                name: port_name.to_string(),
            })?;

        let conn = midi_in
            .connect(
                &port,
                &self.client_name,
                move |_timestamp, data, _| callback(data),
                (),
            )
            .map_err(|e| TransportError::PortUnavailable {
                name: port_name.to_string(),
                reason: e.to_string(),
            })?;

        debug!("midir input connected: '{}'", port_name);
        Ok(Box::new(MidirInput {
            _conn: conn,
            name: port_name.to_string(),
        }))
    }
}

struct MidirOutput {
    conn: MidiOutputConnection,
    name: String,
}

impl OutputConnection for MidirOutput {
    fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        self.conn.send(bytes).map_err(|e| TransportError::WriteFailed {
            name: self.name.clone(),
            reason: e.to_string(),
        })
    }
}

struct MidirInput {
    _conn: MidiInputConnection<()>,
    name: String,
}

impl InputConnection for MidirInput {
    fn port_name(&self) -> &str {
        &self.name
    }
}
