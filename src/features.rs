#[cfg(feature = "ahash")]
use ahash::{AHashMap, AHashSet};
#[cfg(feature = "chrono")]
use chrono::{DateTime, NaiveDateTime, Utc};
#[cfg(feature = "indexmap")]
use indexmap::{IndexMap, IndexSet};
#[cfg(feature = "rust_decimal")]
use rust_decimal::Decimal;
#[cfg(feature = "smol_str")]
use smol_str::SmolStr;
#[cfg(feature = "ulid")]
use ulid::Ulid;
#[cfg(feature = "uuid")]
use uuid::Uuid;

#[allow(unused_imports)]
use crate::core::*;
#[allow(unused_imports)]
use crate::*;

/// Reads a 16-byte identifier or number.
#[allow(dead_code)]
fn read_16(codec: &mut ByteCodec<'_>) -> Result<[u8; 16]> {
    let mut bytes = [0u8; 16];
    codec.read_bytes(&mut bytes)?;
    Ok(bytes)
}

// --- IndexMap / IndexSet ---
/// Insertion order is preserved on the wire.
#[cfg(feature = "indexmap")]
impl<K, V, S> Dictionary for IndexMap<K, V, S>
where
    K: Eq + std::hash::Hash,
    S: std::hash::BuildHasher,
{
    type Key = K;
    type Value = V;

    fn entry_count(&self) -> usize {
        self.len()
    }

    fn take_entries(&mut self) -> Vec<(K, V)> {
        self.drain(..).collect()
    }

    fn insert_entry(&mut self, key: K, value: V) {
        self.insert(key, value);
    }

    fn clear_entries(&mut self) {
        self.clear();
    }
}

#[cfg(feature = "indexmap")]
impl<K, V, S> Serializable for IndexMap<K, V, S>
where
    K: Serializable + Default + Eq + std::hash::Hash,
    V: Serializable + Default,
    S: std::hash::BuildHasher,
{
    fn serialize(&mut self, serializer: &mut Serializer<'_>) -> Result<()> {
        serialize_dictionary(self, serializer)
    }
}

#[cfg(feature = "indexmap")]
impl<T, S> Serializable for IndexSet<T, S>
where
    T: Serializable + Default + Eq + std::hash::Hash,
    S: std::hash::BuildHasher + Default,
{
    fn serialize(&mut self, serializer: &mut Serializer<'_>) -> Result<()> {
        serialize_set(self, serializer)
    }
}

// --- DateTime ---
/// 100 ns ticks between 0001-01-01T00:00:00 and the Unix epoch.
#[cfg(feature = "chrono")]
const UNIX_EPOCH_TICKS: i64 = 621_355_968_000_000_000;
#[cfg(feature = "chrono")]
const TICKS_PER_SECOND: i64 = 10_000_000;
#[cfg(feature = "chrono")]
const NANOS_PER_TICK: u32 = 100;

/// Sub-tick precision is truncated.
#[cfg(feature = "chrono")]
fn to_ticks(value: &NaiveDateTime) -> Result<i64> {
    let utc = value.and_utc();
    utc.timestamp()
        .checked_mul(TICKS_PER_SECOND)
        .and_then(|t| t.checked_add((utc.timestamp_subsec_nanos() / NANOS_PER_TICK) as i64))
        .and_then(|t| t.checked_add(UNIX_EPOCH_TICKS))
        .ok_or_else(|| FormatError::InvalidData(format!("{} is out of the tick range", value)).into())
}

#[cfg(feature = "chrono")]
fn from_ticks(ticks: i64) -> Result<NaiveDateTime> {
    let since_epoch = ticks
        .checked_sub(UNIX_EPOCH_TICKS)
        .ok_or_else(|| FormatError::InvalidData(format!("tick count {} is out of range", ticks)))?;
    let seconds = since_epoch.div_euclid(TICKS_PER_SECOND);
    let nanos = since_epoch.rem_euclid(TICKS_PER_SECOND) as u32 * NANOS_PER_TICK;
    DateTime::from_timestamp(seconds, nanos)
        .map(|d| d.naive_utc())
        .ok_or_else(|| FormatError::InvalidData(format!("tick count {} is out of range", ticks)).into())
}

/// Encodes a `chrono::NaiveDateTime` as an `i64` tick count. No timezone is applied.
#[cfg(feature = "chrono")]
impl Serializable for NaiveDateTime {
    fn serialize(&mut self, serializer: &mut Serializer<'_>) -> Result<()> {
        serializer.transcode(
            self,
            |c, v| c.write_i64(to_ticks(v)?),
            |c| from_ticks(c.read_i64()?),
        )
    }
}

/// Same ticks as `NaiveDateTime`, read back as UTC.
#[cfg(feature = "chrono")]
impl Serializable for DateTime<Utc> {
    fn serialize(&mut self, serializer: &mut Serializer<'_>) -> Result<()> {
        serializer.transcode(
            self,
            |c, v| c.write_i64(to_ticks(&v.naive_utc())?),
            |c| Ok(from_ticks(c.read_i64()?)?.and_utc()),
        )
    }
}

// --- Decimal ---
#[cfg(feature = "rust_decimal")]
impl Serializable for Decimal {
    fn serialize(&mut self, serializer: &mut Serializer<'_>) -> Result<()> {
        serializer.transcode(
            self,
            |c, v| c.write_bytes(&Decimal::serialize(v)),
            |c| Ok(Decimal::deserialize(read_16(c)?)),
        )
    }
}

// --- UUID ---
/// RFC 4122 byte order.
#[cfg(feature = "uuid")]
impl Serializable for Uuid {
    fn serialize(&mut self, serializer: &mut Serializer<'_>) -> Result<()> {
        serializer.transcode(
            self,
            |c, v| c.write_bytes(v.as_bytes()),
            |c| Ok(Uuid::from_bytes(read_16(c)?)),
        )
    }
}

// --- ULID ---
#[cfg(feature = "ulid")]
impl Serializable for Ulid {
    fn serialize(&mut self, serializer: &mut Serializer<'_>) -> Result<()> {
        serializer.transcode(
            self,
            |c, v| c.write_bytes(&v.to_bytes()),
            |c| Ok(Ulid::from_bytes(read_16(c)?)),
        )
    }
}

// --- AHashMap / AHashSet ---
#[cfg(feature = "ahash")]
impl<K: Eq + std::hash::Hash, V> Dictionary for AHashMap<K, V> {
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

#[cfg(feature = "ahash")]
impl<K, V> Serializable for AHashMap<K, V>
where
    K: Serializable + Default + Eq + std::hash::Hash,
    V: Serializable + Default,
{
    fn serialize(&mut self, serializer: &mut Serializer<'_>) -> Result<()> {
        serialize_dictionary(self, serializer)
    }
}

#[cfg(feature = "ahash")]
impl<T: Serializable + Default + Eq + std::hash::Hash> Serializable for AHashSet<T> {
    fn serialize(&mut self, serializer: &mut Serializer<'_>) -> Result<()> {
        serialize_set(self, serializer)
    }
}

// --- SmolStr ---
/// Same wire form as `String`.
#[cfg(feature = "smol_str")]
impl Serializable for SmolStr {
    fn serialize(&mut self, serializer: &mut Serializer<'_>) -> Result<()> {
        serializer.transcode(
            self,
            |c, v| c.write_string(v.as_str()),
            |c| Ok(SmolStr::from(c.read_string()?)),
        )
    }
}
