//! Primitive transcoding over a seekable byte stream.
//!
//! [`ByteCodec`] reads or writes one primitive at a time with no framing and
//! no identity tracking. All fixed-width values are little-endian.

use std::io::{self, Read, Seek, SeekFrom, Write};
use std::sync::Arc;

use bytes::{Buf, BufMut, BytesMut};

use crate::encoding::TextEncoding;
use crate::{FormatError, FourCC, Result};

/// Largest number of bytes a 32-bit packed integer may occupy.
pub const MAX_PACKED_LEN: usize = 5;

/// Block size used when streaming raw regions and long strings.
pub const BLOCK_SIZE: usize = 8 * 1024;

/// The byte stream a [`Serializer`](crate::Serializer) is bound to.
///
/// Implemented for every `Read + Write + Seek` type, such as
/// `std::io::Cursor<Vec<u8>>` or `std::fs::File`. Wrap read-only sources in
/// [`ReadOnlyStream`].
pub trait Stream: Read + Write + Seek {}

impl<T: Read + Write + Seek> Stream for T {}

/// Adapts a `Read + Seek` source into a [`Stream`] whose writes fail.
#[derive(Debug)]
pub struct ReadOnlyStream<R>(pub R);

impl<R> ReadOnlyStream<R> {
    pub fn into_inner(self) -> R {
        self.0
    }
}

impl<R: Read> Read for ReadOnlyStream<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }
}

impl<R: Seek> Seek for ReadOnlyStream<R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.0.seek(pos)
    }
}

impl<R> Write for ReadOnlyStream<R> {
    fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "stream is read-only",
        ))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// How array, list, string and dictionary lengths are encoded.
///
/// The reader must use the same policy the writer used at the same point of
/// the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ArrayLengthPolicy {
    /// 7-bit packed integer, 1 to 5 bytes.
    #[default]
    Dynamic,
    /// One unsigned byte.
    Byte,
    /// Two bytes, unsigned.
    UShort,
    /// Four bytes, signed; negative lengths are rejected on read.
    Int,
}

impl ArrayLengthPolicy {
    /// Largest length this policy can represent.
    pub const fn max_length(self) -> u64 {
        match self {
            ArrayLengthPolicy::Dynamic | ArrayLengthPolicy::Int => i32::MAX as u64,
            ArrayLengthPolicy::Byte => u8::MAX as u64,
            ArrayLengthPolicy::UShort => u16::MAX as u64,
        }
    }
}

/// Converts a failed read into the crate error, keeping end-of-stream as a
/// format error.
fn read_error(error: io::Error, position: u64, needed: usize) -> crate::SerializerError {
    if error.kind() == io::ErrorKind::UnexpectedEof {
        FormatError::UnexpectedEndOfStream { position, needed }.into()
    } else {
        error.into()
    }
}

macro_rules! fixed_width {
    ($($write:ident, $read:ident, $ty:ty, $put:ident, $get:ident;)*) => {$(
        pub fn $write(&mut self, value: $ty) -> Result<()> {
            self.scratch.clear();
            self.scratch.$put(value);
            self.flush_scratch()
        }

        pub fn $read(&mut self) -> Result<$ty> {
            let mut buf = self.fill_scratch(std::mem::size_of::<$ty>())?;
            Ok(buf.$get())
        }
    )*};
}

/// Primitive reader/writer bound to one borrowed stream.
///
/// The codec tracks the stream position itself so that offsets are available
/// without a seek; only chunk backpatching and explicit skips move the
/// underlying stream cursor.
pub struct ByteCodec<'s> {
    stream: &'s mut dyn Stream,
    position: u64,
    scratch: BytesMut,
    text: BytesMut,
    encoding: Arc<dyn TextEncoding>,
    length_policy: ArrayLengthPolicy,
}

impl<'s> ByteCodec<'s> {
    pub fn new(
        stream: &'s mut dyn Stream,
        encoding: Arc<dyn TextEncoding>,
        length_policy: ArrayLengthPolicy,
    ) -> Result<Self> {
        let position = stream.stream_position()?;
        Ok(ByteCodec {
            stream,
            position,
            scratch: BytesMut::with_capacity(16),
            text: BytesMut::new(),
            encoding,
            length_policy,
        })
    }

    /// Current absolute offset in the stream.
    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn seek(&mut self, position: u64) -> Result<()> {
        self.position = self.stream.seek(SeekFrom::Start(position))?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.stream.flush()?;
        Ok(())
    }

    pub fn length_policy(&self) -> ArrayLengthPolicy {
        self.length_policy
    }

    pub fn set_length_policy(&mut self, policy: ArrayLengthPolicy) {
        self.length_policy = policy;
    }

    pub fn encoding(&self) -> &Arc<dyn TextEncoding> {
        &self.encoding
    }

    pub fn set_encoding(&mut self, encoding: Arc<dyn TextEncoding>) {
        self.encoding = encoding;
    }

    fn flush_scratch(&mut self) -> Result<()> {
        self.stream.write_all(&self.scratch)?;
        self.position += self.scratch.len() as u64;
        Ok(())
    }

    fn fill_scratch(&mut self, len: usize) -> Result<&[u8]> {
        self.scratch.clear();
        self.scratch.resize(len, 0);
        let position = self.position;
        self.stream
            .read_exact(&mut self.scratch)
            .map_err(|e| read_error(e, position, len))?;
        self.position += len as u64;
        Ok(&self.scratch[..])
    }

    fixed_width! {
        write_u8, read_u8, u8, put_u8, get_u8;
        write_i8, read_i8, i8, put_i8, get_i8;
        write_u16, read_u16, u16, put_u16_le, get_u16_le;
        write_i16, read_i16, i16, put_i16_le, get_i16_le;
        write_u32, read_u32, u32, put_u32_le, get_u32_le;
        write_i32, read_i32, i32, put_i32_le, get_i32_le;
        write_u64, read_u64, u64, put_u64_le, get_u64_le;
        write_i64, read_i64, i64, put_i64_le, get_i64_le;
        write_u128, read_u128, u128, put_u128_le, get_u128_le;
        write_i128, read_i128, i128, put_i128_le, get_i128_le;
        write_f32, read_f32, f32, put_f32_le, get_f32_le;
        write_f64, read_f64, f64, put_f64_le, get_f64_le;
    }

    pub fn write_bool(&mut self, value: bool) -> Result<()> {
        self.write_u8(value as u8)
    }

    /// Any non-zero byte reads as `true`.
    pub fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_u8()? != 0)
    }

    pub fn write_char(&mut self, value: char) -> Result<()> {
        self.write_u32(value as u32)
    }

    pub fn read_char(&mut self) -> Result<char> {
        let code = self.read_u32()?;
        char::from_u32(code).ok_or_else(|| {
            FormatError::InvalidData(format!("0x{:X} is not a Unicode scalar value", code)).into()
        })
    }

    pub fn write_fourcc(&mut self, tag: FourCC) -> Result<()> {
        self.write_bytes(tag.as_bytes())
    }

    pub fn read_fourcc(&mut self) -> Result<FourCC> {
        let mut bytes = [0u8; 4];
        self.read_bytes(&mut bytes)?;
        Ok(FourCC::new(bytes))
    }

    /// Writes a byte region, at most [`BLOCK_SIZE`] bytes per stream call.
    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        for block in bytes.chunks(BLOCK_SIZE) {
            self.stream.write_all(block)?;
            self.position += block.len() as u64;
        }
        Ok(())
    }

    /// Fills `bytes` from the stream, at most [`BLOCK_SIZE`] bytes per call.
    pub fn read_bytes(&mut self, bytes: &mut [u8]) -> Result<()> {
        for block in bytes.chunks_mut(BLOCK_SIZE) {
            let position = self.position;
            self.stream
                .read_exact(block)
                .map_err(|e| read_error(e, position, block.len()))?;
            self.position += block.len() as u64;
        }
        Ok(())
    }

    /// Writes `value` as a 7-bit packed integer, low groups first.
    pub fn write_packed_u32(&mut self, mut value: u32) -> Result<()> {
        self.scratch.clear();
        while value >= 0x80 {
            self.scratch.put_u8(value as u8 | 0x80);
            value >>= 7;
        }
        self.scratch.put_u8(value as u8);
        self.flush_scratch()
    }

    pub fn read_packed_u32(&mut self) -> Result<u32> {
        let start = self.position;
        let mut value = 0u32;
        for index in 0..MAX_PACKED_LEN {
            let byte = self.read_u8()?;
            let payload = (byte & 0x7F) as u32;
            // the fifth byte only carries the top four bits
            if index == MAX_PACKED_LEN - 1 && (byte & 0x80 != 0 || payload > 0x0F) {
                return Err(FormatError::MalformedPackedInteger { position: start }.into());
            }
            value |= payload << (7 * index);
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(FormatError::MalformedPackedInteger { position: start }.into())
    }

    /// Signed values are packed through their two's-complement bits, so
    /// negative numbers always take five bytes.
    pub fn write_packed_i32(&mut self, value: i32) -> Result<()> {
        self.write_packed_u32(value as u32)
    }

    pub fn read_packed_i32(&mut self) -> Result<i32> {
        Ok(self.read_packed_u32()? as i32)
    }

    /// Writes a collection or string length using the current policy.
    pub fn write_length(&mut self, length: usize) -> Result<()> {
        let limit = self.length_policy.max_length();
        if length as u64 > limit {
            return Err(FormatError::LengthOverflow {
                length: length as u64,
                limit,
            }
            .into());
        }
        match self.length_policy {
            ArrayLengthPolicy::Dynamic => self.write_packed_u32(length as u32),
            ArrayLengthPolicy::Byte => self.write_u8(length as u8),
            ArrayLengthPolicy::UShort => self.write_u16(length as u16),
            ArrayLengthPolicy::Int => self.write_i32(length as i32),
        }
    }

    pub fn read_length(&mut self) -> Result<usize> {
        let length = match self.length_policy {
            ArrayLengthPolicy::Dynamic => self.read_packed_u32()? as u64,
            ArrayLengthPolicy::Byte => self.read_u8()? as u64,
            ArrayLengthPolicy::UShort => self.read_u16()? as u64,
            ArrayLengthPolicy::Int => {
                let raw = self.read_i32()?;
                if raw < 0 {
                    return Err(
                        FormatError::InvalidData(format!("negative length {}", raw)).into()
                    );
                }
                raw as u64
            }
        };
        let limit = self.length_policy.max_length();
        if length > limit {
            return Err(FormatError::LengthOverflow { length, limit }.into());
        }
        usize::try_from(length).map_err(|_| FormatError::LengthOverflow { length, limit }.into())
    }

    fn encode_text(&mut self, text: &str) -> Result<BytesMut> {
        let mut buffer = std::mem::take(&mut self.text);
        buffer.clear();
        self.encoding.encode(text, &mut buffer)?;
        Ok(buffer)
    }

    /// Length-prefixed form: encoded byte length per policy, then the bytes.
    pub fn write_string(&mut self, text: &str) -> Result<()> {
        let buffer = self.encode_text(text)?;
        self.write_length(buffer.len())?;
        self.write_bytes(&buffer)?;
        self.text = buffer;
        Ok(())
    }

    pub fn read_string(&mut self) -> Result<String> {
        let len = self.read_length()?;
        let mut buffer = std::mem::take(&mut self.text);
        buffer.clear();
        // grow with the data actually present instead of trusting `len`
        let mut remaining = len;
        while remaining > 0 {
            let step = remaining.min(BLOCK_SIZE);
            let start = buffer.len();
            buffer.resize(start + step, 0);
            self.read_bytes(&mut buffer[start..])?;
            remaining -= step;
        }
        let text = self.encoding.decode(&buffer)?;
        self.text = buffer;
        Ok(text)
    }

    /// Null-terminated form: encoded bytes followed by one zero code unit.
    pub fn write_cstr(&mut self, text: &str) -> Result<()> {
        if text.contains('\0') {
            return Err(FormatError::InvalidData(
                "null-terminated string contains an embedded NUL".to_string(),
            )
            .into());
        }
        let unit = self.encoding.unit_size();
        let mut buffer = self.encode_text(text)?;
        buffer.put_bytes(0, unit);
        self.write_bytes(&buffer)?;
        self.text = buffer;
        Ok(())
    }

    pub fn read_cstr(&mut self) -> Result<String> {
        let unit = self.encoding.unit_size();
        let mut buffer = std::mem::take(&mut self.text);
        buffer.clear();
        loop {
            let start = buffer.len();
            buffer.resize(start + unit, 0);
            self.read_bytes(&mut buffer[start..])?;
            if buffer[start..].iter().all(|&b| b == 0) {
                buffer.truncate(start);
                break;
            }
        }
        let text = self.encoding.decode(&buffer)?;
        self.text = buffer;
        Ok(text)
    }

    /// Fixed-length form: exactly `chars` characters, no length on the wire.
    pub fn write_fixed_str(&mut self, text: &str, chars: usize) -> Result<()> {
        let actual = text.chars().count();
        if actual != chars {
            return Err(FormatError::LengthMismatch {
                expected: chars,
                actual,
            }
            .into());
        }
        let buffer = self.encode_text(text)?;
        self.write_bytes(&buffer)?;
        self.text = buffer;
        Ok(())
    }

    pub fn read_fixed_str(&mut self, chars: usize) -> Result<String> {
        let unit = self.encoding.unit_size();
        let mut buffer = std::mem::take(&mut self.text);
        buffer.clear();
        for _ in 0..chars {
            let start = buffer.len();
            buffer.resize(start + unit, 0);
            self.read_bytes(&mut buffer[start..])?;
            let width = self.encoding.char_width(&buffer[start..start + unit])?;
            if width > unit {
                buffer.resize(start + width, 0);
                self.read_bytes(&mut buffer[start + unit..])?;
            }
        }
        let text = self.encoding.decode(&buffer)?;
        self.text = buffer;
        Ok(text)
    }
}
