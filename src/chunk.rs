//! Named, length-framed regions of the stream.
//!
//! A chunk header is the 4-byte id followed by a little-endian `u32` holding
//! the byte length of the content that follows. Writers emit a zero
//! placeholder and backpatch it when the chunk is closed; readers validate
//! that exactly the declared number of bytes was consumed.

use crate::codec::ByteCodec;
use crate::{FormatError, FourCC, Mode, Result};

const INITIAL_FRAMES: usize = 4;

/// An open chunk as seen from the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    pub id: FourCC,
    /// Offset of the first content byte, just past the header.
    pub start_offset: u64,
    length: Option<u32>,
}

impl Chunk {
    /// Offset one past the last content byte. Only known while reading, or
    /// for a closed chunk.
    pub fn end_offset(&self) -> Option<u64> {
        self.length.map(|len| self.start_offset + len as u64)
    }

    pub fn length(&self) -> Option<u32> {
        self.length
    }
}

#[derive(Debug, Clone, Copy)]
struct Frame {
    id: FourCC,
    /// Offset of the 4-byte length field.
    length_offset: u64,
    /// Expected end offset; meaningful while reading.
    end: u64,
}

impl Frame {
    fn content_start(&self) -> u64 {
        self.length_offset + 4
    }
}

/// Strict LIFO stack of open chunks.
///
/// Frame slots are kept after a chunk closes so sibling chunks reuse them.
#[derive(Debug, Default)]
pub(crate) struct ChunkStack {
    frames: Vec<Frame>,
    depth: usize,
}

impl ChunkStack {
    pub fn new() -> Self {
        ChunkStack {
            frames: Vec::with_capacity(INITIAL_FRAMES),
            depth: 0,
        }
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    fn push(&mut self, frame: Frame) {
        if self.depth < self.frames.len() {
            self.frames[self.depth] = frame;
        } else {
            if self.frames.len() == self.frames.capacity() {
                self.frames.reserve(self.frames.len().max(INITIAL_FRAMES));
            }
            self.frames.push(frame);
        }
        self.depth += 1;
    }

    fn pop(&mut self) -> Result<Frame> {
        if self.depth == 0 {
            return Err(FormatError::UnbalancedChunk.into());
        }
        self.depth -= 1;
        Ok(self.frames[self.depth])
    }

    pub fn current(&self, mode: Mode) -> Option<Chunk> {
        let frame = self.frames[..self.depth].last()?;
        Some(Chunk {
            id: frame.id,
            start_offset: frame.content_start(),
            length: match mode {
                Mode::Read => Some((frame.end - frame.content_start()) as u32),
                Mode::Write => None,
            },
        })
    }

    /// Reads a header and checks its id, returning the frame it describes.
    fn read_header(codec: &mut ByteCodec<'_>, expected: FourCC) -> Result<Frame> {
        let actual = codec.read_fourcc()?;
        if actual != expected {
            return Err(FormatError::UnexpectedChunk { expected, actual }.into());
        }
        let length_offset = codec.position();
        let length = codec.read_u32()?;
        Ok(Frame {
            id: actual,
            length_offset,
            end: codec.position() + length as u64,
        })
    }

    pub fn begin(&mut self, codec: &mut ByteCodec<'_>, mode: Mode, id: FourCC) -> Result<()> {
        let frame = match mode {
            Mode::Write => {
                codec.write_fourcc(id)?;
                let length_offset = codec.position();
                codec.write_u32(0)?;
                Frame {
                    id,
                    length_offset,
                    end: 0,
                }
            }
            Mode::Read => Self::read_header(codec, id)?,
        };
        log::trace!(
            "begin chunk '{}' at {} (depth {})",
            id,
            frame.content_start(),
            self.depth
        );
        self.push(frame);
        Ok(())
    }

    pub fn end(&mut self, codec: &mut ByteCodec<'_>, mode: Mode) -> Result<Chunk> {
        let frame = self.pop()?;
        let end = codec.position();
        match mode {
            Mode::Write => {
                let size = end - frame.content_start();
                if size > u32::MAX as u64 {
                    return Err(FormatError::LengthOverflow {
                        length: size,
                        limit: u32::MAX as u64,
                    }
                    .into());
                }
                codec.seek(frame.length_offset)?;
                codec.write_u32(size as u32)?;
                codec.seek(end)?;
            }
            Mode::Read => {
                if end != frame.end {
                    return Err(FormatError::ChunkSizeMismatch {
                        id: frame.id,
                        expected: frame.end,
                        actual: end,
                    }
                    .into());
                }
            }
        }
        log::trace!("end chunk '{}' at {}", frame.id, end);
        Ok(Chunk {
            id: frame.id,
            start_offset: frame.content_start(),
            length: Some((end - frame.content_start()) as u32),
        })
    }

    /// Reads the next chunk id without consuming it.
    pub fn peek(codec: &mut ByteCodec<'_>) -> Result<FourCC> {
        let start = codec.position();
        let id = codec.read_fourcc();
        // a short read may have moved the stream past what was consumed
        codec.seek(start)?;
        id
    }

    /// Validates the next header and moves past the chunk's content.
    pub fn skip(codec: &mut ByteCodec<'_>, id: FourCC) -> Result<Chunk> {
        let frame = Self::read_header(codec, id)?;
        codec.seek(frame.end)?;
        log::trace!("skipped chunk '{}' ending at {}", id, frame.end);
        Ok(Chunk {
            id,
            start_offset: frame.content_start(),
            length: Some((frame.end - frame.content_start()) as u32),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::ArrayLengthPolicy;
    use crate::encoding::Ascii;
    use std::io::Cursor;
    use std::sync::Arc;

    #[test]
    fn sibling_chunks_reuse_frame_slots() {
        let mut stream = Cursor::new(Vec::new());
        let mut codec =
            ByteCodec::new(&mut stream, Arc::new(Ascii), ArrayLengthPolicy::Dynamic).unwrap();
        let mut stack = ChunkStack::new();
        for _ in 0..10 {
            stack.begin(&mut codec, Mode::Write, FourCC::new(*b"ITEM")).unwrap();
            codec.write_u8(1).unwrap();
            stack.end(&mut codec, Mode::Write).unwrap();
        }
        assert_eq!(stack.frames.len(), 1);
        assert_eq!(stack.depth(), 0);
    }

    #[test]
    fn deep_nesting_grows_the_frame_array() {
        let mut stream = Cursor::new(Vec::new());
        let mut codec =
            ByteCodec::new(&mut stream, Arc::new(Ascii), ArrayLengthPolicy::Dynamic).unwrap();
        let mut stack = ChunkStack::new();
        for _ in 0..20 {
            stack.begin(&mut codec, Mode::Write, FourCC::new(*b"NEST")).unwrap();
        }
        assert_eq!(stack.depth(), 20);
        assert!(stack.frames.capacity() >= 20);
        for _ in 0..20 {
            stack.end(&mut codec, Mode::Write).unwrap();
        }
        assert!(matches!(
            stack.end(&mut codec, Mode::Write),
            Err(crate::SerializerError::Format(FormatError::UnbalancedChunk))
        ));
    }

    #[test]
    fn backpatched_length_covers_only_the_content() {
        let mut stream = Cursor::new(Vec::new());
        {
            let mut codec =
                ByteCodec::new(&mut stream, Arc::new(Ascii), ArrayLengthPolicy::Dynamic).unwrap();
            let mut stack = ChunkStack::new();
            stack.begin(&mut codec, Mode::Write, FourCC::new(*b"BODY")).unwrap();
            codec.write_u16(0xBEEF).unwrap();
            let chunk = stack.end(&mut codec, Mode::Write).unwrap();
            assert_eq!(chunk.start_offset, 8);
            assert_eq!(chunk.end_offset(), Some(10));
        }
        assert_eq!(
            stream.into_inner(),
            vec![b'B', b'O', b'D', b'Y', 2, 0, 0, 0, 0xEF, 0xBE]
        );
    }

    #[test]
    fn failed_peek_leaves_the_position_in_step() {
        let mut stream = Cursor::new(vec![b'A', b'B']);
        let mut codec =
            ByteCodec::new(&mut stream, Arc::new(Ascii), ArrayLengthPolicy::Dynamic).unwrap();
        assert!(matches!(
            ChunkStack::peek(&mut codec),
            Err(crate::SerializerError::Format(FormatError::UnexpectedEndOfStream { position: 0, .. }))
        ));
        assert_eq!(codec.position(), 0);
        assert_eq!(codec.read_u8().unwrap(), b'A');
        assert_eq!(codec.position(), 1);
    }
}
