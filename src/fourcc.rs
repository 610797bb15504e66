use std::fmt;
use std::str::FromStr;

use crate::UsageError;

/// A four-byte identifier used both as a chunk name and as a dynamic type tag.
///
/// Two `FourCC` values are equal iff their four bytes are equal. The integer
/// form (`from_u32` / `to_u32`) uses little-endian byte order, so the first
/// character is the least significant byte, matching how the tag is laid out
/// in the stream.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct FourCC([u8; 4]);

impl FourCC {
    /// Builds a tag from its raw bytes.
    pub const fn new(bytes: [u8; 4]) -> Self {
        FourCC(bytes)
    }

    /// Builds a tag from a little-endian 32-bit value.
    pub const fn from_u32(value: u32) -> Self {
        FourCC(value.to_le_bytes())
    }

    pub const fn to_u32(self) -> u32 {
        u32::from_le_bytes(self.0)
    }

    pub const fn as_bytes(&self) -> &[u8; 4] {
        &self.0
    }

    pub const fn into_bytes(self) -> [u8; 4] {
        self.0
    }
}

impl From<[u8; 4]> for FourCC {
    fn from(bytes: [u8; 4]) -> Self {
        FourCC(bytes)
    }
}

impl From<&[u8; 4]> for FourCC {
    fn from(bytes: &[u8; 4]) -> Self {
        FourCC(*bytes)
    }
}

impl From<u32> for FourCC {
    fn from(value: u32) -> Self {
        FourCC::from_u32(value)
    }
}

/// Parses exactly four ASCII characters.
impl FromStr for FourCC {
    type Err = UsageError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let bytes = s.as_bytes();
        if !s.is_ascii() || bytes.len() != 4 {
            return Err(UsageError::InvalidFourCC(s.to_string()));
        }
        Ok(FourCC([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }
}

impl TryFrom<&str> for FourCC {
    type Error = UsageError;

    fn try_from(s: &str) -> std::result::Result<Self, Self::Error> {
        s.parse()
    }
}

impl fmt::Display for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &byte in &self.0 {
            if byte.is_ascii_graphic() || byte == b' ' {
                write!(f, "{}", byte as char)?;
            } else {
                write!(f, "\\x{:02X}", byte)?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FourCC(\"{}\")", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_four_ascii_characters() {
        let tag: FourCC = "HEAD".parse().unwrap();
        assert_eq!(tag, FourCC::new(*b"HEAD"));
        assert_eq!(tag.to_string(), "HEAD");
    }

    #[test]
    fn rejects_wrong_length_and_non_ascii() {
        assert!("HEA".parse::<FourCC>().is_err());
        assert!("HEADS".parse::<FourCC>().is_err());
        assert!("HÉA".parse::<FourCC>().is_err());
    }

    #[test]
    fn integer_form_is_little_endian() {
        let tag = FourCC::new(*b"ABCD");
        assert_eq!(tag.to_u32(), 0x4443_4241);
        assert_eq!(FourCC::from_u32(0x4443_4241), tag);
    }

    #[test]
    fn display_escapes_control_bytes() {
        let tag = FourCC::new([b'A', 0, b'B', 0xFF]);
        assert_eq!(tag.to_string(), "A\\x00B\\xFF");
    }
}
