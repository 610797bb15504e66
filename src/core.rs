//! [`Serializable`] implementations for std types.
//!
//! Wire shapes:
//!
//! - Primitives: fixed width, little-endian. `usize`/`isize` travel as 64 bits.
//! - `String`: length (per [`ArrayLengthPolicy`](crate::ArrayLengthPolicy)) then the encoded bytes.
//! - `Vec<T>`, `Box<[T]>`, `[T; N]`, sets: length then the elements.
//! - Maps: length then key, value, key, value.
//! - `Shared<T>` and `Dynamic` go through the reference markers when identity
//!   tracking is enabled.

use std::any::Any;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::hash::{BuildHasher, Hash};

use crate::*;

// --- primitives ---
macro_rules! impl_primitive {
    ($($ty:ty => $write:ident, $read:ident;)*) => {$(
        impl Serializable for $ty {
            fn serialize(&mut self, serializer: &mut Serializer<'_>) -> Result<()> {
                serializer.transcode(self, |c, v| c.$write(*v), |c| c.$read())
            }
        }
    )*};
}

impl_primitive! {
    bool => write_bool, read_bool;
    i8 => write_i8, read_i8;
    i16 => write_i16, read_i16;
    u16 => write_u16, read_u16;
    i32 => write_i32, read_i32;
    u32 => write_u32, read_u32;
    i64 => write_i64, read_i64;
    u64 => write_u64, read_u64;
    i128 => write_i128, read_i128;
    u128 => write_u128, read_u128;
    f32 => write_f32, read_f32;
    f64 => write_f64, read_f64;
    char => write_char, read_char;
    FourCC => write_fourcc, read_fourcc;
}

/// Byte slices are moved as raw blocks.
impl Serializable for u8 {
    fn serialize(&mut self, serializer: &mut Serializer<'_>) -> Result<()> {
        serializer.transcode(self, |c, v| c.write_u8(*v), |c| c.read_u8())
    }

    fn serialize_slice(items: &mut [Self], serializer: &mut Serializer<'_>) -> Result<()> {
        serializer.serialize_raw(items)
    }
}

impl Serializable for usize {
    fn serialize(&mut self, serializer: &mut Serializer<'_>) -> Result<()> {
        serializer.transcode(
            self,
            |c, v| c.write_u64(*v as u64),
            |c| {
                let raw = c.read_u64()?;
                usize::try_from(raw).map_err(|_| {
                    FormatError::InvalidData(format!("{} does not fit in usize", raw)).into()
                })
            },
        )
    }
}

impl Serializable for isize {
    fn serialize(&mut self, serializer: &mut Serializer<'_>) -> Result<()> {
        serializer.transcode(
            self,
            |c, v| c.write_i64(*v as i64),
            |c| {
                let raw = c.read_i64()?;
                isize::try_from(raw).map_err(|_| {
                    FormatError::InvalidData(format!("{} does not fit in isize", raw)).into()
                })
            },
        )
    }
}

// --- String ---
/// Length-prefixed, in the serializer's text encoding.
impl Serializable for String {
    fn serialize(&mut self, serializer: &mut Serializer<'_>) -> Result<()> {
        serializer.transcode(self, |c, v| c.write_string(v), |c| c.read_string())
    }
}

// --- tuples ---
impl Serializable for () {
    fn serialize(&mut self, _serializer: &mut Serializer<'_>) -> Result<()> {
        Ok(())
    }
}

macro_rules! impl_tuple {
    ($($name:ident : $idx:tt),+) => {
        impl<$($name: Serializable),+> Serializable for ($($name,)+) {
            fn serialize(&mut self, serializer: &mut Serializer<'_>) -> Result<()> {
                $(self.$idx.serialize(serializer)?;)+
                Ok(())
            }
        }
    };
}

impl_tuple!(T0: 0);
impl_tuple!(T0: 0, T1: 1);
impl_tuple!(T0: 0, T1: 1, T2: 2);
impl_tuple!(T0: 0, T1: 1, T2: 2, T3: 3);

// --- sequences ---
impl<T: Serializable + Default> Serializable for Vec<T> {
    fn serialize(&mut self, serializer: &mut Serializer<'_>) -> Result<()> {
        let mut len = self.len();
        serializer.serialize_length(&mut len)?;
        serializer.serialize_items(self, len)
    }
}

/// Same wire shape as `Vec<T>`.
impl<T: Serializable + Default> Serializable for Box<[T]> {
    fn serialize(&mut self, serializer: &mut Serializer<'_>) -> Result<()> {
        let mut items = std::mem::take(self).into_vec();
        let result = items.serialize(serializer);
        *self = items.into_boxed_slice();
        result
    }
}

/// The length is written so the layout matches `Vec<T>`; on read it must
/// equal `N`.
impl<T: Serializable, const N: usize> Serializable for [T; N] {
    fn serialize(&mut self, serializer: &mut Serializer<'_>) -> Result<()> {
        let mut len = N;
        serializer.serialize_length(&mut len)?;
        if len != N {
            return Err(FormatError::LengthMismatch {
                expected: N,
                actual: len,
            }
            .into());
        }
        T::serialize_slice(self, serializer)
    }
}

/// Transcodes any set through a temporary list, in iteration order.
pub(crate) fn serialize_set<C, T>(set: &mut C, serializer: &mut Serializer<'_>) -> Result<()>
where
    C: Default + IntoIterator<Item = T> + Extend<T>,
    T: Serializable + Default,
{
    let mut items: Vec<T> = std::mem::take(set).into_iter().collect();
    let result = items.serialize(serializer);
    set.extend(items);
    result
}

impl<T, S> Serializable for HashSet<T, S>
where
    T: Serializable + Default + Eq + Hash,
    S: BuildHasher + Default,
{
    fn serialize(&mut self, serializer: &mut Serializer<'_>) -> Result<()> {
        serialize_set(self, serializer)
    }
}

impl<T: Serializable + Default + Ord> Serializable for BTreeSet<T> {
    fn serialize(&mut self, serializer: &mut Serializer<'_>) -> Result<()> {
        serialize_set(self, serializer)
    }
}

// --- dictionaries ---
/// A map the serializer can empty and refill.
///
/// Entries are taken out while they are written and inserted back afterwards,
/// so keys and values are transcoded through the same `&mut` path as
/// everything else.
pub trait Dictionary {
    type Key;
    type Value;

    fn entry_count(&self) -> usize;

    /// Removes every entry, in iteration order.
    fn take_entries(&mut self) -> Vec<(Self::Key, Self::Value)>;

    fn insert_entry(&mut self, key: Self::Key, value: Self::Value);

    fn clear_entries(&mut self);
}

impl<K: Eq + Hash, V, S: BuildHasher> Dictionary for HashMap<K, V, S> {
    type Key = K;
    type Value = V;

    fn entry_count(&self) -> usize {
        self.len()
    }

    fn take_entries(&mut self) -> Vec<(K, V)> {
        self.drain().collect()
    }

    fn insert_entry(&mut self, key: K, value: V) {
        self.insert(key, value);
    }

    fn clear_entries(&mut self) {
        self.clear();
    }
}

impl<K: Ord, V> Dictionary for BTreeMap<K, V> {
    type Key = K;
    type Value = V;

    fn entry_count(&self) -> usize {
        self.len()
    }

    fn take_entries(&mut self) -> Vec<(K, V)> {
        std::mem::take(self).into_iter().collect()
    }

    fn insert_entry(&mut self, key: K, value: V) {
        self.insert(key, value);
    }

    fn clear_entries(&mut self) {
        self.clear();
    }
}

/// Length-prefixed dictionary with the keys' and values' own codecs.
pub(crate) fn serialize_dictionary<M>(map: &mut M, serializer: &mut Serializer<'_>) -> Result<()>
where
    M: Dictionary,
    M::Key: Serializable + Default,
    M::Value: Serializable + Default,
{
    serializer.serialize_map_with(map, |k, s| k.serialize(s), |v, s| v.serialize(s))
}

impl<K, V, S> Serializable for HashMap<K, V, S>
where
    K: Serializable + Default + Eq + Hash,
    V: Serializable + Default,
    S: BuildHasher,
{
    fn serialize(&mut self, serializer: &mut Serializer<'_>) -> Result<()> {
        serialize_dictionary(self, serializer)
    }
}

impl<K: Serializable + Default + Ord, V: Serializable + Default> Serializable for BTreeMap<K, V> {
    fn serialize(&mut self, serializer: &mut Serializer<'_>) -> Result<()> {
        serialize_dictionary(self, serializer)
    }
}

// --- shared and dynamic values ---
/// Nullable only while identity tracking is enabled.
impl<T: Serializable + Default + Any> Serializable for Option<Shared<T>> {
    fn serialize(&mut self, serializer: &mut Serializer<'_>) -> Result<()> {
        serializer.serialize_shared(self)
    }
}

/// A null read into a non-nullable slot yields a fresh default value.
impl<T: Serializable + Default + Any> Serializable for Shared<T> {
    fn serialize(&mut self, serializer: &mut Serializer<'_>) -> Result<()> {
        let mut slot = Some(self.clone());
        serializer.serialize_shared(&mut slot)?;
        *self = slot.unwrap_or_else(|| shared(T::default()));
        Ok(())
    }
}

impl Serializable for Option<Dynamic> {
    fn serialize(&mut self, serializer: &mut Serializer<'_>) -> Result<()> {
        serializer.serialize_dynamic(self)
    }
}

impl Serializable for Dynamic {
    fn serialize(&mut self, serializer: &mut Serializer<'_>) -> Result<()> {
        let mut slot = Some(self.clone());
        serializer.serialize_dynamic(&mut slot)?;
        *self = slot.unwrap_or_default();
        Ok(())
    }
}
