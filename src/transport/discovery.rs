//! Port discovery
//!
//! Ports are configured by name substring. When the configured substring is
//! not present, a port from the same virtual-cable family (e.g. "IAC") is
//! used instead, as long as it is not the one claimed by the other
//! direction.

use std::fmt;
use tracing::{debug, error, info, warn};

use super::backend::MidiBackend;
use crate::config::MidiConfig;

/// Direction of a MIDI port, seen from the bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortDirection {
    Input,
    Output,
}

impl fmt::Display for PortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortDirection::Input => write!(f, "input"),
            PortDirection::Output => write!(f, "output"),
        }
    }
}

/// Concrete port names chosen for a session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortSelection {
    pub output: Option<String>,
    pub input: Option<String>,
}

fn contains_ci(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

/// Pick a port name from `available`
///
/// 1. first port containing `wanted`
/// 2. first port containing `family_marker` and none of `avoid`
/// 3. with `allow_alias`, first port containing `family_marker`
pub fn select_port(
    available: &[String],
    wanted: &str,
    family_marker: &str,
    avoid: &[&str],
    allow_alias: bool,
) -> Option<String> {
    if let Some(name) = available.iter().find(|n| contains_ci(n, wanted)) {
        return Some(name.clone());
    }

    if family_marker.is_empty() {
        return None;
    }

    let family: Vec<&String> = available
        .iter()
        .filter(|n| contains_ci(n, family_marker))
        .collect();

    if let Some(name) = family
        .iter()
        .find(|n| !avoid.iter().any(|a| !a.is_empty() && contains_ci(n, a)))
    {
        debug!("Falling back to '{}' for '{}'", name, wanted);
        return Some((*name).clone());
    }

    if allow_alias {
        return family.first().map(|n| (*n).clone());
    }

    None
}

/// Resolve both ports against what the backend currently lists
pub fn resolve_ports(backend: &dyn MidiBackend, midi: &MidiConfig) -> PortSelection {
    let outputs = backend.output_ports().unwrap_or_else(|e| {
        error!("Failed to list MIDI outputs: {}", e);
        Vec::new()
    });
    info!("Available MIDI outputs: {:?}", outputs);

    let output = select_port(
        &outputs,
        &midi.output_port,
        &midi.family_marker,
        &[&midi.input_port],
        midi.allow_alias,
    );
    match &output {
        Some(name) => info!("Selected MIDI output port: {}", name),
        None => warn!(
            "No MIDI output port matching '{}' or any '{}' fallback",
            midi.output_port, midi.family_marker
        ),
    }

    let inputs = backend.input_ports().unwrap_or_else(|e| {
        error!("Failed to list MIDI inputs: {}", e);
        Vec::new()
    });
    info!("Available MIDI inputs: {:?}", inputs);

    let mut avoid = vec![midi.output_port.as_str()];
    if let Some(name) = &output {
        avoid.push(name.as_str());
    }
    let input = select_port(
        &inputs,
        &midi.input_port,
        &midi.family_marker,
        &avoid,
        midi.allow_alias,
    );
    match &input {
        Some(name) => info!("Selected MIDI input port for feedback: {}", name),
        None => warn!(
            "No MIDI input port matching '{}' or any '{}' fallback, feedback disabled",
            midi.input_port, midi.family_marker
        ),
    }

    PortSelection { output, input }
}
