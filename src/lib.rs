//! # chunk-serializer
//!
//! A symmetric, chunked binary serializer.
//!
//! - One code path per type: [`Serializable::serialize`] writes or reads depending on the [`Mode`] of the [`Serializer`]
//! - Named, length-framed chunks with write-time backpatching and read-time validation
//! - Polymorphic values through a [`DynamicRegistry`] of 4-byte type tags
//! - Optional identity preservation for shared values, including cycles
//! - Configurable length encoding ([`ArrayLengthPolicy`]) and text encoding ([`TextEncoding`])
//! - Custom derive macro for ergonomic usage
//! - Feature-gated support for optional dependencies
//!
//! ## Attribute Macros
//!
//! `#[derive(Serializable)]` transcodes struct fields in declaration order and
//! fieldless enums through their discriminant. Behavior is tuned with:
//!
//! - `#[serial(chunk = "ABCD")]` — On a struct: frames its fields in a chunk named `ABCD`.
//! - `#[serial(skip)]` — The field is neither written nor read; it keeps its default on read.
//! - `#[serial(with = "path")]` — Transcodes the field with `path(&mut field, serializer)`.
//! - `#[serial(count = "other")]` — A `Vec`, `Box<[T]>`, array, set or map whose length is taken from the earlier field `other` instead of being written.
//! - `#[serial(cstr)]` — A `String` written null-terminated.
//! - `#[serial(fixed = N)]` — A `String` of exactly `N` characters, with no length on the wire.
//!
//! Fieldless enums use the width of their integer `#[repr(..)]` (`usize`/`isize` as 64 bits), `i32` by default.
//!
//! ## Feature Flags
//!
//! - `chrono` (default) — `NaiveDateTime` and `DateTime<Utc>` as 100 ns ticks since 0001-01-01.
//! - `uuid` (default) — `uuid::Uuid` as 16 bytes.
//! - `ulid` — `ulid::Ulid` as 16 bytes.
//! - `rust_decimal` — `rust_decimal::Decimal` as 16 bytes.
//! - `indexmap` — `IndexMap` and `IndexSet`.
//! - `ahash` — `AHashMap` and `AHashSet`.
//! - `smol_str` — `smol_str::SmolStr`.

extern crate self as chunk_serializer;

mod chunk;
pub mod codec;
pub mod core;
pub mod encoding;
mod features;
mod fourcc;
mod references;
mod registry;
mod serializer;
mod shared;

use bytes::Bytes;
use std::io::Cursor;

pub use chunk::Chunk;
pub use chunk_serializer_derive::Serializable;
pub use codec::{ArrayLengthPolicy, ByteCodec, ReadOnlyStream, Stream};
pub use crate::core::Dictionary;
pub use encoding::{Ascii, Latin1, TextEncoding, Utf16Le, Utf8};
pub use fourcc::FourCC;
pub use registry::{DynamicFn, DynamicRegistry};
pub use serializer::{Mode, Serializer, SerializerOptions};
pub use shared::{shared, Dynamic, Shared};

/// Errors that can occur while serializing or deserializing.
#[derive(Debug, thiserror::Error)]
pub enum SerializerError {
    /// The stream does not hold what the caller asked for.
    #[error(transparent)]
    Format(#[from] FormatError),
    /// The serializer was used incorrectly.
    #[error(transparent)]
    Usage(#[from] UsageError),
    /// The underlying stream failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SerializerError {
    pub fn is_format(&self) -> bool {
        matches!(self, SerializerError::Format(_))
    }

    pub fn is_usage(&self) -> bool {
        matches!(self, SerializerError::Usage(_))
    }
}

/// The result type used throughout this crate.
pub type Result<T> = std::result::Result<T, SerializerError>;

/// Corrupt or mismatched data.
#[derive(Debug, thiserror::Error)]
pub enum FormatError {
    #[error("Expected chunk '{expected}', found '{actual}'")]
    UnexpectedChunk { expected: FourCC, actual: FourCC },
    #[error("Chunk '{id}' should end at offset {expected}, but reading stopped at {actual}")]
    ChunkSizeMismatch { id: FourCC, expected: u64, actual: u64 },
    #[error("Chunk closed with no chunk open")]
    UnbalancedChunk,
    #[error("Malformed packed integer at offset {position}")]
    MalformedPackedInteger { position: u64 },
    #[error("Length {length} exceeds the limit of {limit}")]
    LengthOverflow { length: u64, limit: u64 },
    #[error("Expected {expected} elements, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },
    #[error("Backreference to offset {offset} does not match any value read so far")]
    UnresolvedReference { offset: u64 },
    #[error("Unknown dynamic type tag '{tag}'")]
    UnknownDynamicTag { tag: FourCC },
    #[error("Unexpected end of stream at offset {position}: {needed} more bytes needed")]
    UnexpectedEndOfStream { position: u64, needed: usize },
    #[error("Invalid data: {0}")]
    InvalidData(String),
}

/// Misuse of the serializer or the registry.
#[derive(Debug, thiserror::Error)]
pub enum UsageError {
    #[error("Tag '{tag}' is already bound to {existing}")]
    DuplicateTag { tag: FourCC, existing: &'static str },
    #[error("Type {type_name} is already bound to tag '{existing}'")]
    DuplicateType {
        type_name: &'static str,
        existing: FourCC,
    },
    #[error("Type {type_name} is not registered for dynamic serialization")]
    UnregisteredDynamicType { type_name: &'static str },
    #[error("Null value written while identity tracking is disabled")]
    NullNotAllowed,
    #[error("Value of type {type_name} was reached again while it was being serialized")]
    ReentrantValue { type_name: &'static str },
    #[error("Invalid FourCC {0:?}: expected exactly 4 ASCII characters")]
    InvalidFourCC(String),
    #[error("{operation} requires {required:?} mode")]
    WrongMode {
        operation: &'static str,
        required: Mode,
    },
}

/// Types that transcode themselves through a [`Serializer`].
///
/// The same implementation handles both directions: while writing, every
/// field is written; while reading, every field is overwritten in the same
/// order. Values are default-constructed before they are read into.
///
/// Most users should use `#[derive(Serializable)]` instead of a manual
/// implementation.
pub trait Serializable {
    fn serialize(&mut self, serializer: &mut Serializer<'_>) -> Result<()>;

    /// Transcodes consecutive elements. Byte slices override this to move
    /// whole blocks at once.
    #[doc(hidden)]
    fn serialize_slice(items: &mut [Self], serializer: &mut Serializer<'_>) -> Result<()>
    where
        Self: Sized,
    {
        for item in items {
            item.serialize(serializer)?;
        }
        Ok(())
    }
}

/// Convenience function to write a value into a fresh buffer.
///
/// # Example
/// ```rust
/// use chunk_serializer::{load_from_bytes, save_to_bytes, Serializable};
///
/// #[derive(Serializable, Default, PartialEq, Debug)]
/// struct MyStruct {
///     id: u32,
///     name: String,
/// }
///
/// let mut value = MyStruct { id: 42, name: "hello".to_string() };
/// let bytes = save_to_bytes(&mut value).unwrap();
/// let decoded: MyStruct = load_from_bytes(&bytes).unwrap();
/// assert_eq!(value, decoded);
/// ```
pub fn save_to_bytes<T: Serializable + ?Sized>(value: &mut T) -> Result<Bytes> {
    save_to_bytes_with(value, SerializerOptions::default(), DynamicRegistry::new())
}

/// Like [`save_to_bytes`], with explicit options and registry.
pub fn save_to_bytes_with<T: Serializable + ?Sized>(
    value: &mut T,
    options: SerializerOptions,
    registry: DynamicRegistry,
) -> Result<Bytes> {
    let mut stream = Cursor::new(Vec::new());
    Serializer::with_registry(&mut stream, Mode::Write, options, registry)?.save(value)?;
    Ok(Bytes::from(stream.into_inner()))
}

/// Convenience function to read a value from a buffer.
pub fn load_from_bytes<T: Serializable + Default>(bytes: &[u8]) -> Result<T> {
    load_from_bytes_with(bytes, SerializerOptions::default(), DynamicRegistry::new())
}

/// Like [`load_from_bytes`], with explicit options and registry.
pub fn load_from_bytes_with<T: Serializable + Default>(
    bytes: &[u8],
    options: SerializerOptions,
    registry: DynamicRegistry,
) -> Result<T> {
    let mut stream = ReadOnlyStream(Cursor::new(bytes));
    let mut serializer = Serializer::with_registry(&mut stream, Mode::Read, options, registry)?;
    serializer.load()
}
