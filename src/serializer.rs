//! The symmetric read/write façade.
//!
//! A [`Serializer`] is bound to one borrowed stream and one [`Mode`]. Every
//! `serialize*` method takes `&mut` to the value: in [`Mode::Write`] the value
//! is written, in [`Mode::Read`] it is overwritten with what the stream holds.
//! The same sequence of calls therefore encodes and decodes a format.
//!
//! ```rust
//! use chunk_serializer::{Mode, Result, Serializable, Serializer};
//! use std::io::Cursor;
//!
//! #[derive(Default, Debug, PartialEq)]
//! struct Header {
//!     version: u32,
//!     name: String,
//! }
//!
//! impl Serializable for Header {
//!     fn serialize(&mut self, s: &mut Serializer<'_>) -> Result<()> {
//!         s.begin_chunk(b"HEAD")?;
//!         s.serialize(&mut self.version)?;
//!         s.serialize(&mut self.name)?;
//!         s.end_chunk()?;
//!         Ok(())
//!     }
//! }
//!
//! let mut stream = Cursor::new(Vec::new());
//! let mut header = Header { version: 3, name: "demo".to_string() };
//! Serializer::new(&mut stream, Mode::Write).unwrap().save(&mut header).unwrap();
//!
//! stream.set_position(0);
//! let loaded: Header = Serializer::new(&mut stream, Mode::Read).unwrap().load().unwrap();
//! assert_eq!(loaded, header);
//! ```

use std::any::{type_name, Any};
use std::cell::RefCell;
use std::sync::Arc;

use crate::chunk::{Chunk, ChunkStack};
use crate::codec::{ArrayLengthPolicy, ByteCodec, Stream};
use crate::core::Dictionary;
use crate::encoding::{Ascii, TextEncoding};
use crate::references::{Instance, ReferenceTable, MARKER_BACKREF, MARKER_NULL, MARKER_VALUE};
use crate::registry::{DynamicFn, DynamicRegistry};
use crate::shared::address_of;
use crate::{
    shared, Dynamic, FormatError, FourCC, Result, Serializable, Shared, UsageError,
};

/// Largest number of collection elements materialized ahead of the data
/// that fills them.
const ITEM_BLOCK: usize = 4096;

/// Direction of a [`Serializer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    Read,
    Write,
}

/// Construction-time settings of a [`Serializer`].
#[derive(Debug, Clone)]
pub struct SerializerOptions {
    pub array_length_policy: ArrayLengthPolicy,
    pub text_encoding: Arc<dyn TextEncoding>,
    /// Starts with identity tracking enabled once.
    pub identity_tracking: bool,
}

impl Default for SerializerOptions {
    fn default() -> Self {
        SerializerOptions {
            array_length_policy: ArrayLengthPolicy::Dynamic,
            text_encoding: Arc::new(Ascii),
            identity_tracking: false,
        }
    }
}

impl SerializerOptions {
    pub fn with_array_length_policy(mut self, policy: ArrayLengthPolicy) -> Self {
        self.array_length_policy = policy;
        self
    }

    pub fn with_text_encoding(mut self, encoding: impl TextEncoding + 'static) -> Self {
        self.text_encoding = Arc::new(encoding);
        self
    }

    pub fn with_identity_tracking(mut self, enabled: bool) -> Self {
        self.identity_tracking = enabled;
        self
    }
}

/// Symmetric binary serializer bound to a borrowed stream.
///
/// Not thread-safe: chunk frames, reference tables and the stream position
/// are mutated by every call. The stream is flushed when the serializer is
/// dropped in write mode but never closed.
pub struct Serializer<'s> {
    codec: ByteCodec<'s>,
    mode: Mode,
    chunks: ChunkStack,
    references: ReferenceTable,
    registry: DynamicRegistry,
}

impl<'s> Serializer<'s> {
    pub fn new<S: Stream>(stream: &'s mut S, mode: Mode) -> Result<Self> {
        Self::with_options(stream, mode, SerializerOptions::default())
    }

    pub fn with_options<S: Stream>(stream: &'s mut S, mode: Mode, options: SerializerOptions) -> Result<Self> {
        Self::with_registry(stream, mode, options, DynamicRegistry::new())
    }

    /// Uses a prepared registry instead of a fresh built-in one.
    pub fn with_registry<S: Stream>(
        stream: &'s mut S,
        mode: Mode,
        options: SerializerOptions,
        registry: DynamicRegistry,
    ) -> Result<Self> {
        let codec = ByteCodec::new(stream, options.text_encoding, options.array_length_policy)?;
        let mut references = ReferenceTable::new();
        if options.identity_tracking {
            references.enable();
        }
        Ok(Serializer {
            codec,
            mode,
            chunks: ChunkStack::new(),
            references,
            registry,
        })
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: Mode) {
        self.mode = mode;
    }

    pub fn is_reading(&self) -> bool {
        self.mode == Mode::Read
    }

    pub fn is_writing(&self) -> bool {
        self.mode == Mode::Write
    }

    pub fn position(&self) -> u64 {
        self.codec.position()
    }

    pub fn array_length_policy(&self) -> ArrayLengthPolicy {
        self.codec.length_policy()
    }

    /// Affects every length transcoded after this call.
    pub fn set_array_length_policy(&mut self, policy: ArrayLengthPolicy) {
        self.codec.set_length_policy(policy);
    }

    pub fn text_encoding(&self) -> &Arc<dyn TextEncoding> {
        self.codec.encoding()
    }

    pub fn set_text_encoding(&mut self, encoding: Arc<dyn TextEncoding>) {
        self.codec.set_encoding(encoding);
    }

    /// Direct access to the primitive codec, for custom codecs.
    pub fn codec(&mut self) -> &mut ByteCodec<'s> {
        &mut self.codec
    }

    pub fn registry(&self) -> &DynamicRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut DynamicRegistry {
        &mut self.registry
    }

    /// Shortcut for [`DynamicRegistry::register`].
    pub fn register<T: Serializable + Default + Any>(&mut self, tag: impl Into<FourCC>) -> Result<()> {
        self.registry.register::<T>(tag)
    }

    /// Shortcut for [`DynamicRegistry::register_with`].
    pub fn register_with<T, R, W>(&mut self, tag: impl Into<FourCC>, read: R, write: W) -> Result<()>
    where
        T: Default + Any,
        R: Fn(&mut T, &mut Serializer<'_>) -> Result<()> + 'static,
        W: Fn(&mut T, &mut Serializer<'_>) -> Result<()> + 'static,
    {
        self.registry.register_with::<T, R, W>(tag, read, write)
    }

    pub fn identity_tracking_enabled(&self) -> bool {
        self.references.is_enabled()
    }

    /// Enables identity tracking. Calls nest; pair each with
    /// [`disable_identity_tracking`](Self::disable_identity_tracking).
    pub fn enable_identity_tracking(&mut self) {
        self.references.enable();
    }

    pub fn disable_identity_tracking(&mut self) {
        self.references.disable();
    }

    /// Runs `f` with identity tracking enabled one more level.
    pub fn with_identity_tracking<R>(&mut self, f: impl FnOnce(&mut Self) -> Result<R>) -> Result<R> {
        self.references.enable();
        let result = f(self);
        self.references.disable();
        result
    }

    /// Writes `value` in write mode, or replaces it with a freshly read value
    /// in read mode. Every primitive goes through here.
    pub fn transcode<T>(
        &mut self,
        value: &mut T,
        write: impl FnOnce(&mut ByteCodec<'s>, &T) -> Result<()>,
        read: impl FnOnce(&mut ByteCodec<'s>) -> Result<T>,
    ) -> Result<()> {
        match self.mode {
            Mode::Write => write(&mut self.codec, value),
            Mode::Read => {
                *value = read(&mut self.codec)?;
                Ok(())
            }
        }
    }

    pub fn serialize<T: Serializable + ?Sized>(&mut self, value: &mut T) -> Result<()> {
        value.serialize(self)
    }

    /// Transcodes a 32-bit value in packed 7-bit form.
    pub fn serialize_packed(&mut self, value: &mut i32) -> Result<()> {
        self.transcode(value, |c, v| c.write_packed_i32(*v), |c| c.read_packed_i32())
    }

    pub fn serialize_packed_u32(&mut self, value: &mut u32) -> Result<()> {
        self.transcode(value, |c, v| c.write_packed_u32(*v), |c| c.read_packed_u32())
    }

    /// Transcodes a collection length with the current policy.
    pub fn serialize_length(&mut self, length: &mut usize) -> Result<()> {
        self.transcode(length, |c, v| c.write_length(*v), |c| c.read_length())
    }

    /// Null-terminated string.
    pub fn serialize_cstr(&mut self, value: &mut String) -> Result<()> {
        self.transcode(value, |c, v| c.write_cstr(v), |c| c.read_cstr())
    }

    /// String of exactly `chars` characters; no length is transcoded.
    pub fn serialize_fixed_str(&mut self, value: &mut String, chars: usize) -> Result<()> {
        self.transcode(value, |c, v| c.write_fixed_str(v, chars), |c| c.read_fixed_str(chars))
    }

    /// Transcodes an exact-size byte region in bounded blocks.
    pub fn serialize_raw(&mut self, bytes: &mut [u8]) -> Result<()> {
        match self.mode {
            Mode::Write => self.codec.write_bytes(bytes),
            Mode::Read => self.codec.read_bytes(bytes),
        }
    }

    /// Count-elided list: exactly `count` elements, no length on the wire.
    ///
    /// # Errors
    /// [`FormatError::LengthMismatch`] when writing a list of another length.
    pub fn serialize_items<T: Serializable + Default>(&mut self, items: &mut Vec<T>, count: usize) -> Result<()> {
        match self.mode {
            Mode::Write => {
                if items.len() != count {
                    return Err(FormatError::LengthMismatch {
                        expected: count,
                        actual: items.len(),
                    }
                    .into());
                }
                T::serialize_slice(items, self)
            }
            Mode::Read => {
                items.clear();
                let mut remaining = count;
                while remaining > 0 {
                    let step = remaining.min(ITEM_BLOCK);
                    let start = items.len();
                    items.resize_with(start + step, T::default);
                    T::serialize_slice(&mut items[start..], self)?;
                    remaining -= step;
                }
                Ok(())
            }
        }
    }

    /// Count-elided region of a caller-owned slice. The slice is never
    /// resized, so its length must equal `count` in both modes.
    ///
    /// # Errors
    /// [`FormatError::LengthMismatch`] when the slice holds another number of
    /// elements.
    pub fn serialize_slice_items<T: Serializable>(&mut self, items: &mut [T], count: usize) -> Result<()> {
        if items.len() != count {
            return Err(FormatError::LengthMismatch {
                expected: count,
                actual: items.len(),
            }
            .into());
        }
        T::serialize_slice(items, self)
    }

    /// Count-elided boxed slice, read back with exactly `count` elements.
    pub fn serialize_boxed_items<T: Serializable + Default>(&mut self, items: &mut Box<[T]>, count: usize) -> Result<()> {
        let mut list = std::mem::take(items).into_vec();
        let result = self.serialize_items(&mut list, count);
        *items = list.into_boxed_slice();
        result
    }

    /// Count-elided set, transcoded in iteration order.
    pub fn serialize_set_items<C, T>(&mut self, set: &mut C, count: usize) -> Result<()>
    where
        C: Default + IntoIterator<Item = T> + Extend<T>,
        T: Serializable + Default,
    {
        let mut items: Vec<T> = std::mem::take(set).into_iter().collect();
        let result = self.serialize_items(&mut items, count);
        set.extend(items);
        result
    }

    /// Count-elided dictionary.
    pub fn serialize_map_items<M>(&mut self, map: &mut M, count: usize) -> Result<()>
    where
        M: Dictionary,
        M::Key: Serializable + Default,
        M::Value: Serializable + Default,
    {
        self.serialize_map_items_with(map, count, |k, s| k.serialize(s), |v, s| v.serialize(s))
    }

    /// Dictionary with a length prefix and custom key and value codecs.
    pub fn serialize_map_with<M, K, V>(&mut self, map: &mut M, key: K, value: V) -> Result<()>
    where
        M: Dictionary,
        M::Key: Default,
        M::Value: Default,
        K: FnMut(&mut M::Key, &mut Self) -> Result<()>,
        V: FnMut(&mut M::Value, &mut Self) -> Result<()>,
    {
        let mut len = map.entry_count();
        self.serialize_length(&mut len)?;
        self.serialize_map_items_with(map, len, key, value)
    }

    /// Count-elided dictionary with custom key and value codecs. Entries are
    /// interleaved: key, value, key, value.
    pub fn serialize_map_items_with<M, K, V>(&mut self, map: &mut M, count: usize, mut key: K, mut value: V) -> Result<()>
    where
        M: Dictionary,
        M::Key: Default,
        M::Value: Default,
        K: FnMut(&mut M::Key, &mut Self) -> Result<()>,
        V: FnMut(&mut M::Value, &mut Self) -> Result<()>,
    {
        match self.mode {
            Mode::Write => {
                if map.entry_count() != count {
                    return Err(FormatError::LengthMismatch {
                        expected: count,
                        actual: map.entry_count(),
                    }
                    .into());
                }
                let mut entries = map.take_entries();
                let result = entries.iter_mut().try_for_each(|(k, v)| {
                    key(k, self)?;
                    value(v, self)
                });
                for (k, v) in entries {
                    map.insert_entry(k, v);
                }
                result
            }
            Mode::Read => {
                map.clear_entries();
                for _ in 0..count {
                    let mut k = M::Key::default();
                    key(&mut k, self)?;
                    let mut v = M::Value::default();
                    value(&mut v, self)?;
                    map.insert_entry(k, v);
                }
                Ok(())
            }
        }
    }

    /// Writes the backreference for `address` if it was already written.
    fn write_backreference(&mut self, address: usize) -> Result<bool> {
        let Some(offset) = self.references.offset_of(address) else {
            return Ok(false);
        };
        self.codec.write_u8(MARKER_BACKREF)?;
        self.codec.write_packed_u32(offset as u32)?;
        Ok(true)
    }

    /// Records `address` at the current offset and writes the value marker.
    fn write_value_marker(&mut self, address: usize, pin: Box<dyn Any>) -> Result<()> {
        let offset = self.codec.position();
        if offset > u32::MAX as u64 {
            return Err(FormatError::LengthOverflow {
                length: offset,
                limit: u32::MAX as u64,
            }
            .into());
        }
        self.references.record_written(address, offset, pin);
        self.codec.write_u8(MARKER_VALUE)
    }

    fn read_backreference(&mut self) -> Result<&Instance> {
        let offset = self.codec.read_packed_u32()? as u64;
        self.references
            .resolve(offset)
            .ok_or_else(|| FormatError::UnresolvedReference { offset }.into())
    }

    fn serialize_cell<T: Serializable + ?Sized>(&mut self, cell: &RefCell<T>) -> Result<()> {
        let mut value = cell.try_borrow_mut().map_err(|_| UsageError::ReentrantValue {
            type_name: type_name::<T>(),
        })?;
        value.serialize(self)
    }

    /// Nullable shared value.
    ///
    /// With identity tracking enabled, a value reachable several times is
    /// written once and read back as one instance; cycles are safe. With
    /// tracking disabled, `None` cannot be written.
    pub fn serialize_shared<T: Serializable + Default + Any>(&mut self, slot: &mut Option<Shared<T>>) -> Result<()> {
        if !self.references.is_enabled() {
            return match self.mode {
                Mode::Write => match slot {
                    Some(value) => self.serialize_cell(value),
                    None => Err(UsageError::NullNotAllowed.into()),
                },
                Mode::Read => {
                    let value = shared(T::default());
                    self.serialize_cell(&value)?;
                    *slot = Some(value);
                    Ok(())
                }
            };
        }
        match self.mode {
            Mode::Write => {
                let Some(value) = slot else {
                    return self.codec.write_u8(MARKER_NULL);
                };
                let address = address_of(value);
                if self.write_backreference(address)? {
                    return Ok(());
                }
                self.write_value_marker(address, Box::new(value.clone()))?;
                self.serialize_cell(value)
            }
            Mode::Read => {
                let offset = self.codec.position();
                match self.codec.read_u8()? {
                    MARKER_NULL => {
                        *slot = None;
                        Ok(())
                    }
                    MARKER_BACKREF => {
                        let instance = self.read_backreference()?;
                        let value = instance.typed.downcast_ref::<Shared<T>>().cloned().ok_or_else(|| {
                            FormatError::InvalidData(format!(
                                "backreference to a {} where a {} was expected",
                                instance.dynamic.type_name(),
                                type_name::<T>()
                            ))
                        })?;
                        *slot = Some(value);
                        Ok(())
                    }
                    MARKER_VALUE => {
                        let value = shared(T::default());
                        // recorded before the body so cycles back to it resolve
                        self.references.record_read(
                            offset,
                            Instance {
                                dynamic: Dynamic::from_shared(value.clone()),
                                typed: Box::new(value.clone()),
                            },
                        );
                        self.serialize_cell(&value)?;
                        *slot = Some(value);
                        Ok(())
                    }
                    other => Err(invalid_marker(other, offset)),
                }
            }
        }
    }

    fn run_dynamic(&mut self, value: &Dynamic, codec: &DynamicFn) -> Result<()> {
        let mut cell = value.cell().try_borrow_mut().map_err(|_| UsageError::ReentrantValue {
            type_name: value.type_name(),
        })?;
        codec(&mut *cell, self)
    }

    fn write_dynamic_body(&mut self, value: &Dynamic) -> Result<()> {
        let (tag, writer) = self.registry.writer_for(value.type_id()).ok_or(
            UsageError::UnregisteredDynamicType {
                type_name: value.type_name(),
            },
        )?;
        log::trace!("dynamic {} as '{}'", value.type_name(), tag);
        self.codec.write_fourcc(tag)?;
        self.run_dynamic(value, &writer)
    }

    /// Reads a tag and default-constructs the registered type.
    fn read_dynamic_head(&mut self) -> Result<(Instance, DynamicFn)> {
        let tag = self.codec.read_fourcc()?;
        let (construct, reader) = self
            .registry
            .reader_for(tag)
            .ok_or(FormatError::UnknownDynamicTag { tag })?;
        Ok((construct(), reader))
    }

    /// Nullable value of a registered runtime type: `[tag][body]`, preceded
    /// by a reference marker while identity tracking is enabled.
    pub fn serialize_dynamic(&mut self, slot: &mut Option<Dynamic>) -> Result<()> {
        if !self.references.is_enabled() {
            return match self.mode {
                Mode::Write => match slot {
                    Some(value) => self.write_dynamic_body(value),
                    None => Err(UsageError::NullNotAllowed.into()),
                },
                Mode::Read => {
                    let (instance, reader) = self.read_dynamic_head()?;
                    self.run_dynamic(&instance.dynamic, &reader)?;
                    *slot = Some(instance.dynamic);
                    Ok(())
                }
            };
        }
        match self.mode {
            Mode::Write => {
                let Some(value) = slot else {
                    return self.codec.write_u8(MARKER_NULL);
                };
                let address = value.address();
                if self.write_backreference(address)? {
                    return Ok(());
                }
                self.write_value_marker(address, Box::new(value.clone()))?;
                self.write_dynamic_body(value)
            }
            Mode::Read => {
                let offset = self.codec.position();
                match self.codec.read_u8()? {
                    MARKER_NULL => {
                        *slot = None;
                        Ok(())
                    }
                    MARKER_BACKREF => {
                        *slot = Some(self.read_backreference()?.dynamic.clone());
                        Ok(())
                    }
                    MARKER_VALUE => {
                        let (instance, reader) = self.read_dynamic_head()?;
                        let value = instance.dynamic.clone();
                        self.references.record_read(offset, instance);
                        self.run_dynamic(&value, &reader)?;
                        *slot = Some(value);
                        Ok(())
                    }
                    other => Err(invalid_marker(other, offset)),
                }
            }
        }
    }

    /// Opens a chunk named `id`.
    ///
    /// # Errors
    /// [`FormatError::UnexpectedChunk`] when reading a chunk with another id.
    pub fn begin_chunk(&mut self, id: impl Into<FourCC>) -> Result<()> {
        self.chunks.begin(&mut self.codec, self.mode, id.into())
    }

    /// Closes the innermost chunk, backpatching its length when writing and
    /// checking it when reading.
    ///
    /// # Errors
    /// [`FormatError::ChunkSizeMismatch`] when the content read does not match
    /// the declared length, [`FormatError::UnbalancedChunk`] with no open chunk.
    pub fn end_chunk(&mut self) -> Result<Chunk> {
        self.chunks.end(&mut self.codec, self.mode)
    }

    /// Brackets `f` in a chunk named `id`.
    pub fn chunk<R>(&mut self, id: impl Into<FourCC>, f: impl FnOnce(&mut Self) -> Result<R>) -> Result<R> {
        self.begin_chunk(id)?;
        let result = f(self)?;
        self.end_chunk()?;
        Ok(result)
    }

    /// Innermost open chunk.
    pub fn current_chunk(&self) -> Option<Chunk> {
        self.chunks.current(self.mode)
    }

    pub fn chunk_depth(&self) -> usize {
        self.chunks.depth()
    }

    fn require_read(&self, operation: &'static str) -> Result<()> {
        if self.mode != Mode::Read {
            return Err(UsageError::WrongMode {
                operation,
                required: Mode::Read,
            }
            .into());
        }
        Ok(())
    }

    /// Id of the next chunk, without consuming it.
    pub fn peek_chunk_id(&mut self) -> Result<FourCC> {
        self.require_read("peek_chunk_id")?;
        ChunkStack::peek(&mut self.codec)
    }

    /// Moves past the next chunk, which must be named `id`.
    pub fn skip_chunk(&mut self, id: impl Into<FourCC>) -> Result<Chunk> {
        self.require_read("skip_chunk")?;
        ChunkStack::skip(&mut self.codec, id.into())
    }

    /// Writes `value` as a top-level object. The reference table is empty
    /// when it starts and released when it returns.
    pub fn save<T: Serializable + ?Sized>(&mut self, value: &mut T) -> Result<()> {
        self.mode = Mode::Write;
        self.references.clear();
        log::debug!("saving {} at offset {}", type_name::<T>(), self.codec.position());
        let result = value.serialize(self);
        self.references.clear();
        result?;
        self.codec.flush()
    }

    /// Reads a top-level object. The reference table is empty when it starts
    /// and released when it returns, so no loaded value is kept alive here.
    pub fn load<T: Serializable + Default>(&mut self) -> Result<T> {
        self.mode = Mode::Read;
        self.references.clear();
        log::debug!("loading {} at offset {}", type_name::<T>(), self.codec.position());
        let mut value = T::default();
        let result = value.serialize(self);
        self.references.clear();
        result.map(|()| value)
    }

    pub fn flush(&mut self) -> Result<()> {
        self.codec.flush()
    }
}

fn invalid_marker(marker: u8, offset: u64) -> crate::SerializerError {
    FormatError::InvalidData(format!("invalid reference marker {} at offset {}", marker, offset)).into()
}

impl Drop for Serializer<'_> {
    fn drop(&mut self) {
        if self.mode == Mode::Write {
            if let Err(e) = self.codec.flush() {
                log::warn!("failed to flush stream on drop: {}", e);
            }
        }
    }
}
