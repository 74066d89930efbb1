//! Command id namespace
//!
//! Ids are grouped in numeric bands: channel operations at 0x10, mixer
//! operations at 0x20, transport operations at 0x30, and the reserved reply
//! ids at 0x70 and above.

use std::fmt;

/// Namespace a command belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandGroup {
    Channel,
    Mixer,
    Transport,
    /// Host to bridge traffic: responses and async pushes
    Reply,
}

/// Every command id the protocol knows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Command {
    // Channel rack
    GetChannelNames = 0x10,
    GetChannelNameByIndex = 0x11,
    SetChannelColor = 0x12,
    RandomizeColors = 0x13,
    GetChannelCount = 0x14,
    IsChannelSelected = 0x15,
    SelectChannel = 0x16,
    GetChannelVolume = 0x17,
    SetChannelVolume = 0x18,
    GetChannelPan = 0x19,
    SetChannelPan = 0x1A,
    IsChannelMuted = 0x1B,
    SetChannelMute = 0x1C,
    IsChannelSolo = 0x1D,
    SetChannelSolo = 0x1E,

    // Mixer
    SetMixerLevel = 0x20,
    AddAudioEffect = 0x21,
    GetMixerTrackCount = 0x22,
    GetMixerLevel = 0x23,

    // Transport
    SetTempo = 0x30,
    GetTempo = 0x31,
    TransportControl = 0x32,
    GetIsPlaying = 0x33,
    SelectPattern = 0x34,
    GetCurrentPattern = 0x35,

    // Replies (host -> bridge)
    ResponseSuccess = 0x70,
    ResponseError = 0x71,
    AsyncUpdate = 0x7F,
}

impl Command {
    /// All commands in id order
    pub const ALL: [Command; 28] = [
        Command::GetChannelNames,
        Command::GetChannelNameByIndex,
        Command::SetChannelColor,
        Command::RandomizeColors,
        Command::GetChannelCount,
        Command::IsChannelSelected,
        Command::SelectChannel,
        Command::GetChannelVolume,
        Command::SetChannelVolume,
        Command::GetChannelPan,
        Command::SetChannelPan,
        Command::IsChannelMuted,
        Command::SetChannelMute,
        Command::IsChannelSolo,
        Command::SetChannelSolo,
        Command::SetMixerLevel,
        Command::AddAudioEffect,
        Command::GetMixerTrackCount,
        Command::GetMixerLevel,
        Command::SetTempo,
        Command::GetTempo,
        Command::TransportControl,
        Command::GetIsPlaying,
        Command::SelectPattern,
        Command::GetCurrentPattern,
        Command::ResponseSuccess,
        Command::ResponseError,
        Command::AsyncUpdate,
    ];

    /// Wire id
    pub fn id(self) -> u8 {
        self as u8
    }

    /// Look up a command by wire id
    pub fn from_id(id: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|c| c.id() == id)
    }

    /// Look up a command by its snake_case name (case-insensitive)
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim().to_ascii_lowercase();
        Self::ALL.iter().copied().find(|c| c.name() == name)
    }

    /// Stable snake_case name
    pub fn name(self) -> &'static str {
        match self {
            Command::GetChannelNames => "get_channel_names",
            Command::GetChannelNameByIndex => "get_channel_name",
            Command::SetChannelColor => "set_channel_color",
            Command::RandomizeColors => "randomize_colors",
            Command::GetChannelCount => "get_channel_count",
            Command::IsChannelSelected => "is_channel_selected",
            Command::SelectChannel => "select_channel",
            Command::GetChannelVolume => "get_channel_volume",
            Command::SetChannelVolume => "set_channel_volume",
            Command::GetChannelPan => "get_channel_pan",
            Command::SetChannelPan => "set_channel_pan",
            Command::IsChannelMuted => "is_channel_muted",
            Command::SetChannelMute => "set_channel_mute",
            Command::IsChannelSolo => "is_channel_solo",
            Command::SetChannelSolo => "set_channel_solo",
            Command::SetMixerLevel => "set_mixer_level",
            Command::AddAudioEffect => "add_audio_effect",
            Command::GetMixerTrackCount => "get_mixer_track_count",
            Command::GetMixerLevel => "get_mixer_level",
            Command::SetTempo => "set_tempo",
            Command::GetTempo => "get_tempo",
            Command::TransportControl => "transport_control",
            Command::GetIsPlaying => "get_is_playing",
            Command::SelectPattern => "select_pattern",
            Command::GetCurrentPattern => "get_current_pattern",
            Command::ResponseSuccess => "response_success",
            Command::ResponseError => "response_error",
            Command::AsyncUpdate => "async_update",
        }
    }

    /// Namespace, derived from the id band
    pub fn group(self) -> CommandGroup {
        match self.id() {
            0x10..=0x1F => CommandGroup::Channel,
            0x20..=0x2F => CommandGroup::Mixer,
            0x30..=0x3F => CommandGroup::Transport,
            _ => CommandGroup::Reply,
        }
    }

    /// True for the ids only the host sends
    pub fn is_reply(self) -> bool {
        self.group() == CommandGroup::Reply
    }

    /// True for RESPONSE_SUCCESS and RESPONSE_ERROR
    pub fn is_response(self) -> bool {
        matches!(self, Command::ResponseSuccess | Command::ResponseError)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:02X})", self.name(), self.id())
    }
}

impl From<Command> for u8 {
    fn from(c: Command) -> u8 {
        c.id()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_ids_are_unique_and_seven_bit() {
        let ids: HashSet<u8> = Command::ALL.iter().map(|c| c.id()).collect();
        assert_eq!(ids.len(), Command::ALL.len());
        assert!(ids.iter().all(|&id| id <= 0x7F));
    }

    #[test]
    fn test_lookup_by_id_and_name() {
        for cmd in Command::ALL {
            assert_eq!(Command::from_id(cmd.id()), Some(cmd));
            assert_eq!(Command::from_name(cmd.name()), Some(cmd));
        }
        assert_eq!(Command::from_id(0x00), None);
        assert_eq!(Command::from_name("SET_TEMPO"), Some(Command::SetTempo));
        assert_eq!(Command::from_name("explode"), None);
    }

    #[test]
    fn test_reserved_ids() {
        assert_eq!(Command::ResponseSuccess.id(), 0x70);
        assert_eq!(Command::ResponseError.id(), 0x71);
        assert_eq!(Command::AsyncUpdate.id(), 0x7F);
        assert!(Command::AsyncUpdate.is_reply());
        assert!(!Command::AsyncUpdate.is_response());
    }

    #[test]
    fn test_groups_follow_bands() {
        assert_eq!(Command::SetChannelColor.group(), CommandGroup::Channel);
        assert_eq!(Command::GetMixerLevel.group(), CommandGroup::Mixer);
        assert_eq!(Command::SetTempo.group(), CommandGroup::Transport);
        assert_eq!(Command::ResponseError.group(), CommandGroup::Reply);
    }
}
