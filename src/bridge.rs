//! Session wiring
//!
//! One `Bridge` owns a transport, a correlator and a dispatcher built from
//! the same configuration, with the listener feeding the correlator.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::dispatcher::Dispatcher;
use crate::error::TransportError;
use crate::feedback::FeedbackCorrelator;
use crate::protocol::Codec;
use crate::transport::{resolve_ports, FrameCallback, MidiBackend, MidiTransport, MidirBackend};

pub struct Bridge {
    codec: Codec,
    transport: Arc<MidiTransport>,
    correlator: Arc<FeedbackCorrelator>,
    dispatcher: Dispatcher,
    shut_down: AtomicBool,
}

impl Bridge {
    /// Connect through the platform MIDI backend
    pub fn connect(config: &AppConfig) -> Result<Self, TransportError> {
        Self::with_backend(config, Arc::new(MidirBackend::default()))
    }

    /// Connect through the given backend
    ///
    /// Missing ports are not fatal: without an output every send fails with
    /// `NoPort`, without an input no responses can arrive.
    pub fn with_backend(config: &AppConfig, backend: Arc<dyn MidiBackend>) -> Result<Self, TransportError> {
        let codec = config.codec();
        let ports = resolve_ports(backend.as_ref(), &config.midi);

        let transport = Arc::new(MidiTransport::new(
            backend,
            ports,
            codec.prefix().to_vec(),
            config.listener_settings(),
        ));
        let correlator = Arc::new(FeedbackCorrelator::new(
            config.response_timeout(),
            config.protocol.unsolicited_capacity,
        ));

        if transport.output_port().is_some() {
            if let Err(e) = transport.open_output() {
                warn!("Output port not ready yet, will retry on first send: {}", e);
            }
        }

        if transport.input_port().is_some() {
            let on_frame: FrameCallback = {
                let correlator = correlator.clone();
                let codec = codec.clone();
                Arc::new(move |frame: Vec<u8>| correlator.on_raw_frame(&frame, &codec))
            };
            transport.start_listener(on_frame)?;
        }

        let dispatcher = Dispatcher::new(codec.clone(), correlator.clone(), transport.clone());
        info!(
            "Bridge ready (out: {}, in: {})",
            transport.output_port().unwrap_or("none"),
            transport.input_port().unwrap_or("none")
        );

        Ok(Self {
            codec,
            transport,
            correlator,
            dispatcher,
            shut_down: AtomicBool::new(false),
        })
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn correlator(&self) -> &Arc<FeedbackCorrelator> {
        &self.correlator
    }

    pub fn transport(&self) -> &Arc<MidiTransport> {
        &self.transport
    }

    pub fn codec(&self) -> &Codec {
        &self.codec
    }

    /// Stop the listener and close both ports; idempotent
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Shutting down bridge");
        self.transport.close();
        let pending = self.correlator.pending_count();
        if pending > 0 {
            warn!("{} request(s) still pending at shutdown", pending);
        }
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        self.shutdown();
    }
}
