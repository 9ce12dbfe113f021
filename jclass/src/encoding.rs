//! The modified UTF-8 codec used by `CONSTANT_Utf8_info` entries.
//!
//! Class files do not store standard UTF-8: the NUL code point uses the
//! two-byte form `0xC0 0x80`, and code points above U+FFFF are stored as six
//! bytes, a pair of three-byte sequences encoding the UTF-16 surrogates
//! ([JVMS §4.4.7](https://docs.oracle.com/javase/specs/jvms/se17/html/jvms-4.html#jvms-4.4.7)).

use crate::errors::{FormatCause, FormatError};

/// Decodes a modified UTF-8 byte sequence into a string.
pub fn decode_modified_utf8(bytes: &[u8]) -> Result<String, FormatError> {
    let mut out = String::with_capacity(bytes.len());
    let mut units: Vec<u16> = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        if b & 0b1000_0000 == 0 {
            // Single byte, '\u{0001}' to '\u{007F}'.
            units.push(b as u16);
            i += 1;
        } else if b & 0b1110_0000 == 0b1100_0000 {
            if i + 1 >= bytes.len() || bytes[i + 1] & 0b1100_0000 != 0b1000_0000 {
                return Err(malformed(i));
            }
            // Two bytes, NUL and '\u{0080}' to '\u{07FF}'.
            let unit = ((b as u16 & 0x1F) << 6) | (bytes[i + 1] as u16 & 0x3F);
            units.push(unit);
            i += 2;
        } else if b & 0b1111_0000 == 0b1110_0000 {
            if i + 2 >= bytes.len()
                || bytes[i + 1] & 0b1100_0000 != 0b1000_0000
                || bytes[i + 2] & 0b1100_0000 != 0b1000_0000
            {
                return Err(malformed(i));
            }
            // Three bytes, '\u{0800}' to '\u{FFFF}'. A pair of three-byte
            // sequences matching the surrogate pattern 0xED 0xA0..0xAF and
            // 0xED 0xB0..0xBF encodes one code point above U+FFFF; anything
            // else is an ordinary three-byte unit, surrogates included.
            let unit = ((b as u16 & 0x0F) << 12)
                | ((bytes[i + 1] as u16 & 0x3F) << 6)
                | (bytes[i + 2] as u16 & 0x3F);
            units.push(unit);
            i += 3;
        } else {
            return Err(malformed(i));
        }
    }

    for chunk in std::char::decode_utf16(units) {
        match chunk {
            Ok(c) => out.push(c),
            // An unpaired surrogate has no scalar value; the class file is
            // not something javac produced.
            Err(_) => {
                return Err(FormatError::new(
                    FormatCause::InvalidUtf8,
                    "unpaired surrogate in CONSTANT_Utf8",
                ))
            }
        }
    }

    Ok(out)
}

fn malformed(at: usize) -> FormatError {
    FormatError::new(
        FormatCause::InvalidUtf8,
        &format!("malformed modified UTF-8 at byte {at}"),
    )
}

/// Encodes a string back into the modified UTF-8 form.
pub fn encode_modified_utf8(input: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len());
    for unit in input.encode_utf16() {
        match unit {
            0x0001..=0x007F => out.push(unit as u8),
            // NUL and everything up to U+07FF take the two-byte form.
            0x0000 | 0x0080..=0x07FF => {
                out.push(0xC0 | (unit >> 6) as u8);
                out.push(0x80 | (unit & 0x3F) as u8);
            }
            _ => {
                out.push(0xE0 | (unit >> 12) as u8);
                out.push(0x80 | ((unit >> 6) & 0x3F) as u8);
                out.push(0x80 | (unit & 0x3F) as u8);
            }
        }
    }
    out
}

/// Expands a string into UTF-16 code units.
pub fn utf8_to_utf16(input: &str) -> Vec<u16> {
    input.encode_utf16().collect()
}

/// Collapses UTF-16 code units into a string, if every surrogate is paired.
pub fn utf16_to_utf8(units: &[u16]) -> Option<String> {
    char::decode_utf16(units.iter().copied())
        .collect::<Result<String, _>>()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_ascii() {
        let bytes = [0x66, 0x6F, 0x6F];
        assert_eq!(decode_modified_utf8(&bytes).unwrap(), "foo");
    }

    #[test]
    fn decode_embedded_nul() {
        let bytes = [0x66, 0x6F, 0xC0, 0x80, 0x6F];
        assert_eq!(decode_modified_utf8(&bytes).unwrap(), "fo\0o");
    }

    #[test]
    fn decode_two_byte_form() {
        // 'naïve'
        let bytes = [0x6E, 0x61, 0xC3, 0xAF, 0x76, 0x65];
        assert_eq!(decode_modified_utf8(&bytes).unwrap(), "na\u{EF}ve");
    }

    #[test]
    fn decode_three_byte_form() {
        let bytes = [0xE0, 0xBC, 0x80, 0xE1, 0x80, 0x80, 0xE2, 0xB2, 0x8A];
        assert_eq!(
            decode_modified_utf8(&bytes).unwrap(),
            "\u{F00}\u{1000}\u{2C8A}"
        );
    }

    #[test]
    fn decode_surrogate_pair_form() {
        // U+10437, stored as two three-byte surrogate sequences
        let bytes = [0xED, 0xA0, 0x81, 0xED, 0xB0, 0xB7];
        assert_eq!(decode_modified_utf8(&bytes).unwrap(), "\u{10437}");
    }

    #[test]
    fn decode_rejects_truncated_sequence() {
        assert!(decode_modified_utf8(&[0xC3]).is_err());
        assert!(decode_modified_utf8(&[0xE0, 0xBC]).is_err());
    }

    #[test]
    fn decode_rejects_four_byte_utf8() {
        // Standard UTF-8 for U+10437 is not legal in a class file.
        assert!(decode_modified_utf8(&[0xF0, 0x90, 0x90, 0xB7]).is_err());
    }

    #[test]
    fn encode_round_trips_decode() {
        for s in ["foo", "fo\0o", "na\u{EF}ve", "\u{F00}\u{1000}", "\u{10437}"] {
            let encoded = encode_modified_utf8(s);
            assert_eq!(decode_modified_utf8(&encoded).unwrap(), s);
        }
    }

    #[test]
    fn utf16_round_trips() {
        for s in ["foo", "", "\u{F1}", "\u{20AC}", "\u{10437}"] {
            let units = utf8_to_utf16(s);
            assert_eq!(utf16_to_utf8(&units).as_deref(), Some(s));
        }
        assert_eq!(utf8_to_utf16("\u{10437}"), vec![0xD801, 0xDC37]);
    }

    #[test]
    fn utf16_rejects_lone_surrogate() {
        assert_eq!(utf16_to_utf8(&[0xD801]), None);
    }
}
