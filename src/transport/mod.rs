//! MIDI transport
//!
//! Owns one output port for outgoing frames and one listener thread for the
//! feedback input port. Port names are resolved once at construction.

pub mod backend;
pub mod discovery;
pub mod listener;

pub use backend::{InputCallback, InputConnection, MidiBackend, MidirBackend, OutputConnection};
pub use discovery::{resolve_ports, select_port, PortDirection, PortSelection};
pub use listener::{FrameCallback, Listener, ListenerSettings, ListenerState};

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::TransportError;
use crate::midi::{format_hex, is_sysex};

/// Anything frames can be written to
pub trait FrameSink: Send + Sync {
    fn send(&self, frame: &[u8]) -> Result<(), TransportError>;
}

/// Snapshot for status displays
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportStatus {
    pub output_port: Option<String>,
    pub input_port: Option<String>,
    pub output_open: bool,
    pub listener: ListenerState,
    pub frames_sent: u64,
    pub frames_received: u64,
}

pub struct MidiTransport {
    backend: Arc<dyn MidiBackend>,
    ports: PortSelection,
    output: Mutex<Option<Box<dyn OutputConnection>>>,
    listener: Listener,
    settings: ListenerSettings,
    prefix: Vec<u8>,
    frames_sent: AtomicU64,
    closed: AtomicBool,
}

impl MidiTransport {
    /// Create a transport for already-resolved ports
    ///
    /// `prefix` is the byte sequence the listener uses to pick frames of this
    /// protocol out of the input stream.
    pub fn new(
        backend: Arc<dyn MidiBackend>,
        ports: PortSelection,
        prefix: Vec<u8>,
        settings: ListenerSettings,
    ) -> Self {
        Self {
            backend,
            ports,
            output: Mutex::new(None),
            listener: Listener::new(),
            settings,
            prefix,
            frames_sent: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    pub fn output_port(&self) -> Option<&str> {
        self.ports.output.as_deref()
    }

    pub fn input_port(&self) -> Option<&str> {
        self.ports.input.as_deref()
    }

    pub fn backend(&self) -> &Arc<dyn MidiBackend> {
        &self.backend
    }

    /// Open the output port now instead of on the first send
    pub fn open_output(&self) -> Result<(), TransportError> {
        let name = self.output_name()?;
        let mut slot = self.output.lock();
        if slot.is_none() {
            *slot = Some(self.backend.open_output(name)?);
            info!("Opened MIDI output port '{}'", name);
        }
        Ok(())
    }

    pub fn is_output_open(&self) -> bool {
        self.output.lock().is_some()
    }

    /// Write one complete SysEx frame
    ///
    /// A failed write drops the connection, reopens once and retries.
    pub fn send(&self, frame: &[u8]) -> Result<(), TransportError> {
        if !is_sysex(frame) {
            return Err(TransportError::MalformedFrame);
        }
        let name = self.output_name()?;

        let mut slot = self.output.lock();
        let result = match self.write(&mut slot, name, frame) {
            Ok(()) => Ok(()),
            Err(first) => {
                warn!("Send on '{}' failed ({}), reopening and retrying", name, first);
                *slot = None;
                self.write(&mut slot, name, frame)
            }
        };

        match result {
            Ok(()) => {
                self.frames_sent.fetch_add(1, Ordering::Relaxed);
                debug!("TX {}", format_hex(frame));
                Ok(())
            }
            Err(e) => {
                *slot = None;
                Err(e)
            }
        }
    }

    fn write(
        &self,
        slot: &mut Option<Box<dyn OutputConnection>>,
        name: &str,
        frame: &[u8],
    ) -> Result<(), TransportError> {
        if slot.is_none() {
            *slot = Some(self.backend.open_output(name)?);
            info!("Opened MIDI output port '{}'", name);
        }
        match slot.as_mut() {
            Some(conn) => conn.send(frame),
            None => Err(TransportError::NoPort {
                direction: PortDirection::Output,
            }),
        }
    }

    fn output_name(&self) -> Result<&str, TransportError> {
        self.ports.output.as_deref().ok_or(TransportError::NoPort {
            direction: PortDirection::Output,
        })
    }

    /// Start the listener on the resolved input port
    pub fn start_listener(&self, on_frame: FrameCallback) -> Result<(), TransportError> {
        let name = self.ports.input.clone().ok_or(TransportError::NoPort {
            direction: PortDirection::Input,
        })?;
        self.closed.store(false, Ordering::SeqCst);
        self.listener.start(
            self.backend.clone(),
            name,
            self.prefix.clone(),
            self.settings.clone(),
            on_frame,
        )
    }

    pub fn stop_listener(&self) {
        self.listener.stop();
    }

    pub fn listener_state(&self) -> ListenerState {
        self.listener.state()
    }

    pub fn listener(&self) -> &Listener {
        &self.listener
    }

    pub fn status(&self) -> TransportStatus {
        TransportStatus {
            output_port: self.ports.output.clone(),
            input_port: self.ports.input.clone(),
            output_open: self.is_output_open(),
            listener: self.listener.state(),
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            frames_received: self.listener.frames_received(),
        }
    }

    /// Stop the listener and close the output; safe to call repeatedly
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.listener.stop();
        if self.output.lock().take().is_some() {
            info!("Closed MIDI output port");
        }
    }
}

impl FrameSink for MidiTransport {
    fn send(&self, frame: &[u8]) -> Result<(), TransportError> {
        MidiTransport::send(self, frame)
    }
}

impl Drop for MidiTransport {
    fn drop(&mut self) {
        self.close();
    }
}
