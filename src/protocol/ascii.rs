//! ASCII-only compact JSON serialization
//!
//! serde_json writes non-ASCII characters verbatim as UTF-8. Those bytes
//! would carry the high bit onto the wire, so string fragments are escaped
//! as `\uXXXX` (surrogate pairs above the BMP) instead.

use serde::Serialize;
use serde_json::ser::Formatter;
use std::io;

/// Compact formatter that never emits a byte above 0x7F
///
/// All other formatting decisions use the trait's compact defaults.
#[derive(Debug, Default, Clone, Copy)]
pub struct AsciiFormatter;

impl Formatter for AsciiFormatter {
    fn write_string_fragment<W>(&mut self, writer: &mut W, fragment: &str) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        let mut start = 0;
        for (idx, ch) in fragment.char_indices() {
            if ch.is_ascii() {
                continue;
            }
            if start < idx {
                writer.write_all(fragment[start..idx].as_bytes())?;
            }
            let mut units = [0u16; 2];
            for unit in ch.encode_utf16(&mut units) {
                write!(writer, "\\u{:04x}", unit)?;
            }
            start = idx + ch.len_utf8();
        }
        if start < fragment.len() {
            writer.write_all(fragment[start..].as_bytes())?;
        }
        Ok(())
    }
}

/// Serialize `value` as compact, ASCII-only JSON bytes
pub fn to_ascii_json<T>(value: &T) -> Result<Vec<u8>, serde_json::Error>
where
    T: ?Sized + Serialize,
{
    let mut out = Vec::with_capacity(128);
    let mut ser = serde_json::Serializer::with_formatter(&mut out, AsciiFormatter);
    value.serialize(&mut ser)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_plain_ascii_matches_compact_output() {
        let value = json!({"index": 1, "name": "Kick", "on": true});
        let ours = to_ascii_json(&value).unwrap();
        let compact = serde_json::to_vec(&value).unwrap();
        assert_eq!(ours, compact);
    }

    #[test]
    fn test_non_ascii_is_escaped() {
        let value = json!({"name": "Caf\u{e9} 90\u{b0}"});
        let out = to_ascii_json(&value).unwrap();
        assert!(out.iter().all(|&b| b < 0x80));
        assert_eq!(
            String::from_utf8(out).unwrap(),
            r#"{"name":"Caf\u00e9 90\u00b0"}"#
        );
    }

    #[test]
    fn test_astral_plane_uses_surrogate_pair() {
        let value = json!("\u{1F3B9}");
        let out = to_ascii_json(&value).unwrap();
        assert_eq!(String::from_utf8(out.clone()).unwrap(), r#""\ud83c\udfb9""#);

        let back: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn test_control_characters_still_escaped() {
        let out = to_ascii_json(&json!("a\nb\"c")).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), r#""a\nb\"c""#);
    }
}
