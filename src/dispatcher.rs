//! Command dispatcher
//!
//! Public surface of the bridge. `execute` turns a command and its params
//! into a frame, sends it, and optionally waits for the host's answer. The
//! typed operations below validate their arguments before anything goes on
//! the wire.

use serde_json::{json, Value};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::BridgeError;
use crate::feedback::{FeedbackCorrelator, ResponseStatus};
use crate::protocol::{is_reserved_key, Codec, Command, Payload, REQUEST_ID_KEY};
use crate::transport::FrameSink;

/// Successful outcome of `execute`
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Fire-and-forget command left the process
    Sent,
    /// Host answered with RESPONSE_SUCCESS
    Success(Payload),
}

impl Reply {
    pub fn payload(&self) -> Option<&Payload> {
        match self {
            Reply::Sent => None,
            Reply::Success(p) => Some(p),
        }
    }

    pub fn into_payload(self) -> Payload {
        match self {
            Reply::Sent => Payload::new(),
            Reply::Success(p) => p,
        }
    }
}

/// Channel selection change, as the host expects it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SelectMode {
    #[default]
    Toggle,
    Deselect,
    Select,
}

impl SelectMode {
    pub fn value(self) -> i8 {
        match self {
            SelectMode::Toggle => -1,
            SelectMode::Deselect => 0,
            SelectMode::Select => 1,
        }
    }
}

impl FromStr for SelectMode {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "toggle" | "-1" => Ok(SelectMode::Toggle),
            "deselect" | "0" => Ok(SelectMode::Deselect),
            "select" | "1" => Ok(SelectMode::Select),
            other => Err(BridgeError::InvalidArgument(format!(
                "unknown select mode '{}' (toggle, select, deselect)",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportAction {
    Play,
    Stop,
    Record,
    TogglePlay,
}

impl TransportAction {
    pub fn as_str(self) -> &'static str {
        match self {
            TransportAction::Play => "play",
            TransportAction::Stop => "stop",
            TransportAction::Record => "record",
            TransportAction::TogglePlay => "toggle_play",
        }
    }
}

impl fmt::Display for TransportAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransportAction {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "play" => Ok(TransportAction::Play),
            "stop" => Ok(TransportAction::Stop),
            "record" => Ok(TransportAction::Record),
            "toggle_play" | "toggle" => Ok(TransportAction::TogglePlay),
            other => Err(BridgeError::InvalidArgument(format!(
                "unknown transport action '{}' (play, stop, record, toggle_play)",
                other
            ))),
        }
    }
}

const MAX_COLOR: u32 = 0xFF_FFFF;
const MIN_TEMPO: f64 = 20.0;
const MAX_TEMPO: f64 = 999.0;

fn check_range(name: &str, value: f64, min: f64, max: f64) -> Result<(), BridgeError> {
    if value.is_finite() && (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(BridgeError::InvalidArgument(format!(
            "{} must be between {} and {}, got {}",
            name, min, max, value
        )))
    }
}

fn params(value: Value) -> Payload {
    match value {
        Value::Object(map) => map,
        _ => Payload::new(),
    }
}

pub struct Dispatcher {
    codec: Codec,
    correlator: Arc<FeedbackCorrelator>,
    sink: Arc<dyn FrameSink>,
}

impl Dispatcher {
    pub fn new(codec: Codec, correlator: Arc<FeedbackCorrelator>, sink: Arc<dyn FrameSink>) -> Self {
        Self {
            codec,
            correlator,
            sink,
        }
    }

    pub fn correlator(&self) -> &Arc<FeedbackCorrelator> {
        &self.correlator
    }

    pub fn codec(&self) -> &Codec {
        &self.codec
    }

    /// Send `command` and, when `expect_response` is set, wait for its answer
    ///
    /// `timeout` falls back to the correlator default.
    pub fn execute(
        &self,
        command: Command,
        params: Option<Payload>,
        expect_response: bool,
        timeout: Option<Duration>,
    ) -> Result<Reply, BridgeError> {
        if command.is_reply() {
            return Err(BridgeError::InvalidArgument(format!(
                "{} is sent by the host, not the bridge",
                command
            )));
        }

        let mut payload = params.unwrap_or_default();
        if let Some(key) = payload.keys().find(|k| is_reserved_key(k)) {
            return Err(BridgeError::InvalidArgument(format!(
                "'{}' is reserved for correlation",
                key
            )));
        }

        if !expect_response {
            let frame = self.codec.encode(command.id(), Some(&payload))?;
            self.sink.send(&frame)?;
            info!("Sent {} (no response requested)", command);
            return Ok(Reply::Sent);
        }

        let request_id = self.correlator.register()?;
        payload.insert(REQUEST_ID_KEY.to_string(), Value::from(request_id));

        let sent = self
            .codec
            .encode(command.id(), Some(&payload))
            .map_err(BridgeError::from)
            .and_then(|frame| self.sink.send(&frame).map_err(BridgeError::from));
        if let Err(e) = sent {
            self.correlator.cancel(request_id);
            return Err(e);
        }
        debug!("Sent {} as request {}", command, request_id);

        let timeout = timeout.unwrap_or_else(|| self.correlator.default_timeout());
        let response = self.correlator.wait(request_id, timeout)?;

        match response.status {
            ResponseStatus::Success => Ok(Reply::Success(response.payload)),
            ResponseStatus::Error => Err(BridgeError::Remote {
                message: response.message().unwrap_or("unspecified error").to_string(),
                payload: response.payload,
            }),
        }
    }

    fn request(&self, command: Command, args: Value) -> Result<Payload, BridgeError> {
        info!("Dispatching {}", command.name());
        self.execute(command, Some(params(args)), true, None)
            .map(Reply::into_payload)
    }

    // Channel info

    pub fn get_channel_count(&self) -> Result<Payload, BridgeError> {
        self.request(Command::GetChannelCount, json!({}))
    }

    pub fn get_channel_names(&self) -> Result<Payload, BridgeError> {
        self.request(Command::GetChannelNames, json!({}))
    }

    pub fn get_channel_name(&self, index: u32) -> Result<Payload, BridgeError> {
        self.request(Command::GetChannelNameByIndex, json!({ "index": index }))
    }

    pub fn is_channel_selected(&self, index: u32) -> Result<Payload, BridgeError> {
        self.request(Command::IsChannelSelected, json!({ "index": index }))
    }

    // Channel control

    pub fn set_channel_color(&self, index: u32, color: u32) -> Result<Payload, BridgeError> {
        if color > MAX_COLOR {
            return Err(BridgeError::InvalidArgument(format!(
                "color 0x{:X} exceeds 0xFFFFFF",
                color
            )));
        }
        self.request(Command::SetChannelColor, json!({ "index": index, "color": color }))
    }

    pub fn select_channel(&self, index: u32, mode: SelectMode) -> Result<Payload, BridgeError> {
        self.request(Command::SelectChannel, json!({ "index": index, "value": mode.value() }))
    }

    pub fn get_channel_volume(&self, index: u32) -> Result<Payload, BridgeError> {
        self.request(Command::GetChannelVolume, json!({ "index": index }))
    }

    pub fn set_channel_volume(&self, index: u32, volume: f64) -> Result<Payload, BridgeError> {
        check_range("volume", volume, 0.0, 1.0)?;
        self.request(Command::SetChannelVolume, json!({ "index": index, "volume": volume }))
    }

    pub fn get_channel_pan(&self, index: u32) -> Result<Payload, BridgeError> {
        self.request(Command::GetChannelPan, json!({ "index": index }))
    }

    pub fn set_channel_pan(&self, index: u32, pan: f64) -> Result<Payload, BridgeError> {
        check_range("pan", pan, -1.0, 1.0)?;
        self.request(Command::SetChannelPan, json!({ "index": index, "pan": pan }))
    }

    pub fn is_channel_muted(&self, index: u32) -> Result<Payload, BridgeError> {
        self.request(Command::IsChannelMuted, json!({ "index": index }))
    }

    pub fn set_channel_mute(&self, index: u32, mute: bool) -> Result<Payload, BridgeError> {
        self.request(Command::SetChannelMute, json!({ "index": index, "mute": mute }))
    }

    pub fn is_channel_solo(&self, index: u32) -> Result<Payload, BridgeError> {
        self.request(Command::IsChannelSolo, json!({ "index": index }))
    }

    pub fn set_channel_solo(&self, index: u32, solo: bool) -> Result<Payload, BridgeError> {
        self.request(Command::SetChannelSolo, json!({ "index": index, "solo": solo }))
    }

    pub fn randomize_channel_colors(&self, selected_only: bool) -> Result<Payload, BridgeError> {
        self.request(Command::RandomizeColors, json!({ "selected_only": selected_only }))
    }

    // Transport

    pub fn control_transport(&self, action: TransportAction) -> Result<Payload, BridgeError> {
        self.request(Command::TransportControl, json!({ "action": action.as_str() }))
    }

    pub fn get_is_playing(&self) -> Result<Payload, BridgeError> {
        self.request(Command::GetIsPlaying, json!({}))
    }

    pub fn set_tempo(&self, bpm: f64) -> Result<Payload, BridgeError> {
        check_range("bpm", bpm, MIN_TEMPO, MAX_TEMPO)?;
        self.request(Command::SetTempo, json!({ "bpm": bpm }))
    }

    pub fn get_tempo(&self) -> Result<Payload, BridgeError> {
        self.request(Command::GetTempo, json!({}))
    }

    /// Patterns are numbered from 1
    pub fn select_pattern(&self, pattern: u32) -> Result<Payload, BridgeError> {
        if pattern == 0 {
            return Err(BridgeError::InvalidArgument(
                "pattern numbers start at 1".to_string(),
            ));
        }
        self.request(Command::SelectPattern, json!({ "pattern": pattern }))
    }

    pub fn get_current_pattern(&self) -> Result<Payload, BridgeError> {
        self.request(Command::GetCurrentPattern, json!({}))
    }

    // Mixer

    pub fn get_mixer_track_count(&self) -> Result<Payload, BridgeError> {
        self.request(Command::GetMixerTrackCount, json!({}))
    }

    pub fn get_mixer_level(&self, track: u32) -> Result<Payload, BridgeError> {
        self.request(Command::GetMixerLevel, json!({ "track": track }))
    }

    pub fn set_mixer_level(&self, track: u32, level: f64) -> Result<Payload, BridgeError> {
        check_range("level", level, 0.0, 1.0)?;
        self.request(Command::SetMixerLevel, json!({ "track": track, "level": level }))
    }

    pub fn add_audio_effect(&self, track: u32, effect: &str) -> Result<Payload, BridgeError> {
        let effect = effect.trim();
        if effect.is_empty() {
            return Err(BridgeError::InvalidArgument(
                "effect name must not be empty".to_string(),
            ));
        }
        self.request(Command::AddAudioEffect, json!({ "track": track, "effect": effect }))
    }
}
