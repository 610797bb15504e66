//! Text encodings used for every string the serializer transcodes.
//!
//! The encoding is injectable: anything implementing [`TextEncoding`] can be
//! handed to [`SerializerOptions`](crate::SerializerOptions). Four encodings
//! ship with the crate. [`Ascii`] is the default.

use std::fmt;

use bytes::{Buf, BufMut, BytesMut};

use crate::{FormatError, Result};

/// Converts between Rust strings and their byte representation in the stream.
pub trait TextEncoding: fmt::Debug + Send + Sync {
    fn name(&self) -> &'static str;

    /// Size in bytes of one code unit. A terminator is one all-zero code unit.
    fn unit_size(&self) -> usize {
        1
    }

    /// Appends the encoded form of `text` to `out`.
    fn encode(&self, text: &str, out: &mut BytesMut) -> Result<()>;

    /// Decodes a complete byte sequence.
    fn decode(&self, bytes: &[u8]) -> Result<String>;

    /// Total byte width of the character whose first code unit is `lead`.
    ///
    /// `lead` is exactly [`unit_size`](Self::unit_size) bytes long.
    fn char_width(&self, lead: &[u8]) -> Result<usize> {
        let _ = lead;
        Ok(self.unit_size())
    }
}

/// 7-bit ASCII. Characters outside the range are written as `?` and bytes
/// above `0x7F` decode as `?`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ascii;

impl TextEncoding for Ascii {
    fn name(&self) -> &'static str {
        "ascii"
    }

    fn encode(&self, text: &str, out: &mut BytesMut) -> Result<()> {
        out.reserve(text.len());
        for c in text.chars() {
            out.put_u8(if c.is_ascii() { c as u8 } else { b'?' });
        }
        Ok(())
    }

    fn decode(&self, bytes: &[u8]) -> Result<String> {
        Ok(bytes
            .iter()
            .map(|&b| if b.is_ascii() { b as char } else { '?' })
            .collect())
    }
}

/// ISO-8859-1. Characters above `U+00FF` are written as `?`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Latin1;

impl TextEncoding for Latin1 {
    fn name(&self) -> &'static str {
        "latin1"
    }

    fn encode(&self, text: &str, out: &mut BytesMut) -> Result<()> {
        out.reserve(text.len());
        for c in text.chars() {
            let code = c as u32;
            out.put_u8(if code <= 0xFF { code as u8 } else { b'?' });
        }
        Ok(())
    }

    fn decode(&self, bytes: &[u8]) -> Result<String> {
        Ok(bytes.iter().map(|&b| b as char).collect())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Utf8;

impl TextEncoding for Utf8 {
    fn name(&self) -> &'static str {
        "utf-8"
    }

    fn encode(&self, text: &str, out: &mut BytesMut) -> Result<()> {
        out.put_slice(text.as_bytes());
        Ok(())
    }

    fn decode(&self, bytes: &[u8]) -> Result<String> {
        String::from_utf8(bytes.to_vec())
            .map_err(|e| FormatError::InvalidData(format!("invalid UTF-8 text: {}", e)).into())
    }

    fn char_width(&self, lead: &[u8]) -> Result<usize> {
        match lead[0] {
            0x00..=0x7F => Ok(1),
            0xC0..=0xDF => Ok(2),
            0xE0..=0xEF => Ok(3),
            0xF0..=0xF7 => Ok(4),
            other => Err(FormatError::InvalidData(format!(
                "0x{:02X} cannot start a UTF-8 sequence",
                other
            ))
            .into()),
        }
    }
}

/// UTF-16, little-endian, without a byte order mark.
#[derive(Debug, Clone, Copy, Default)]
pub struct Utf16Le;

impl TextEncoding for Utf16Le {
    fn name(&self) -> &'static str {
        "utf-16le"
    }

    fn unit_size(&self) -> usize {
        2
    }

    fn encode(&self, text: &str, out: &mut BytesMut) -> Result<()> {
        out.reserve(text.len() * 2);
        for unit in text.encode_utf16() {
            out.put_u16_le(unit);
        }
        Ok(())
    }

    fn decode(&self, bytes: &[u8]) -> Result<String> {
        if bytes.len() % 2 != 0 {
            return Err(FormatError::InvalidData(format!(
                "UTF-16 text has an odd byte length ({})",
                bytes.len()
            ))
            .into());
        }
        let mut reader = bytes;
        let mut units = Vec::with_capacity(bytes.len() / 2);
        while reader.has_remaining() {
            units.push(reader.get_u16_le());
        }
        String::from_utf16(&units)
            .map_err(|e| FormatError::InvalidData(format!("invalid UTF-16 text: {}", e)).into())
    }

    fn char_width(&self, mut lead: &[u8]) -> Result<usize> {
        let unit = lead.get_u16_le();
        if (0xD800..=0xDBFF).contains(&unit) {
            Ok(4)
        } else {
            Ok(2)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoded(encoding: &dyn TextEncoding, text: &str) -> Vec<u8> {
        let mut out = BytesMut::new();
        encoding.encode(text, &mut out).unwrap();
        out.to_vec()
    }

    #[test]
    fn ascii_replaces_unrepresentable_characters() {
        assert_eq!(encoded(&Ascii, "aé"), b"a?".to_vec());
        assert_eq!(Ascii.decode(&[b'o', 0xE9]).unwrap(), "o?");
    }

    #[test]
    fn latin1_keeps_the_upper_half() {
        assert_eq!(encoded(&Latin1, "é€"), vec![0xE9, b'?']);
        assert_eq!(Latin1.decode(&[0xE9]).unwrap(), "é");
    }

    #[test]
    fn utf8_rejects_invalid_sequences() {
        assert!(Utf8.decode(&[0xC3]).is_err());
        assert!(Utf8.char_width(&[0x80]).is_err());
        assert_eq!(Utf8.char_width(&[0xF0]).unwrap(), 4);
    }

    #[test]
    fn utf16_surrogate_pairs_are_four_bytes_wide() {
        let bytes = encoded(&Utf16Le, "😀");
        assert_eq!(bytes.len(), 4);
        assert_eq!(Utf16Le.char_width(&bytes[..2]).unwrap(), 4);
        assert_eq!(Utf16Le.decode(&bytes).unwrap(), "😀");
        assert!(Utf16Le.decode(&bytes[..3]).is_err());
    }
}
