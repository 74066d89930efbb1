//! MIDI byte helpers
//!
//! Just enough MIDI knowledge to tell SysEx apart from the rest of the
//! traffic on a shared bus and to describe foreign messages in logs.

/// System Exclusive start byte
pub const SYSEX_START: u8 = 0xF0;

/// System Exclusive end byte
pub const SYSEX_END: u8 = 0xF7;

/// True when `data` is one complete SysEx message
pub fn is_sysex(data: &[u8]) -> bool {
    data.len() >= 2 && data[0] == SYSEX_START && data[data.len() - 1] == SYSEX_END
}

/// Format MIDI bytes as hex string for debugging
pub fn format_hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Short human-readable description of a raw MIDI message
///
/// Used when logging traffic the bridge ignores.
pub fn describe(data: &[u8]) -> String {
    let Some(&status) = data.first() else {
        return "empty".to_string();
    };

    if status < 0x80 {
        return format!("running status {}", format_hex(data));
    }

    if status < 0xF0 {
        let channel = (status & 0x0F) + 1;
        let d1 = data.get(1).copied().unwrap_or(0) & 0x7F;
        let d2 = data.get(2).copied().unwrap_or(0) & 0x7F;
        return match status & 0xF0 {
            0x80 => format!("NoteOff ch:{} n:{} v:{}", channel, d1, d2),
            0x90 if d2 == 0 => format!("NoteOff ch:{} n:{} v:0", channel, d1),
            0x90 => format!("NoteOn ch:{} n:{} v:{}", channel, d1, d2),
            0xA0 => format!("PolyPressure ch:{} n:{} p:{}", channel, d1, d2),
            0xB0 => format!("CC ch:{} cc:{} v:{}", channel, d1, d2),
            0xC0 => format!("ProgramChange ch:{} p:{}", channel, d1),
            0xD0 => format!("ChannelPressure ch:{} p:{}", channel, d1),
            _ => format!("PitchBend ch:{} v:{}", channel, ((d2 as u16) << 7) | d1 as u16),
        };
    }

    match status {
        SYSEX_START => format!("SysEx {} bytes", data.len()),
        0xF8 => "TimingClock".to_string(),
        0xFA => "Start".to_string(),
        0xFB => "Continue".to_string(),
        0xFC => "Stop".to_string(),
        0xFE => "ActiveSensing".to_string(),
        other => format!("System 0x{:02X}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_sysex() {
        assert!(is_sysex(&[0xF0, 0x7D, 0x01, 0xF7]));
        assert!(!is_sysex(&[0xF0, 0x7D, 0x01]));
        assert!(!is_sysex(&[0x90, 60, 100]));
        assert!(!is_sysex(&[0xF0]));
    }

    #[test]
    fn test_format_hex() {
        assert_eq!(format_hex(&[0xF0, 0x7D, 0x01]), "F0 7D 01");
        assert_eq!(format_hex(&[]), "");
    }

    #[test]
    fn test_describe_channel_messages() {
        assert_eq!(describe(&[0x90, 60, 100]), "NoteOn ch:1 n:60 v:100");
        assert_eq!(describe(&[0x90, 60, 0]), "NoteOff ch:1 n:60 v:0");
        assert_eq!(describe(&[0xB2, 7, 100]), "CC ch:3 cc:7 v:100");
        assert_eq!(describe(&[0xE0, 0x00, 0x40]), "PitchBend ch:1 v:8192");
    }

    #[test]
    fn test_describe_system_messages() {
        assert_eq!(describe(&[0xF0, 0x43, 0x10, 0xF7]), "SysEx 4 bytes");
        assert_eq!(describe(&[0xF8]), "TimingClock");
        assert_eq!(describe(&[]), "empty");
    }
}
