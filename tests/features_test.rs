#[allow(unused_imports)]
use chunk_serializer::{load_from_bytes, save_to_bytes, Dynamic, FormatError, SerializerError};

#[cfg(feature = "uuid")]
#[test]
fn test_uuid_uses_rfc_byte_order() {
    use uuid::Uuid;
    let mut id = Uuid::parse_str("67e55044-10b1-426f-9247-bb680e5fe0c8").unwrap();
    let bytes = save_to_bytes(&mut id).unwrap();
    assert_eq!(&bytes[..], id.as_bytes());
    let decoded: Uuid = load_from_bytes(&bytes).unwrap();
    assert_eq!(decoded, id);
}

#[cfg(feature = "uuid")]
#[test]
fn test_uuid_builtin_tag() {
    use uuid::Uuid;
    let id = Uuid::new_v4();
    let mut value = Dynamic::new(id);
    let bytes = save_to_bytes(&mut value).unwrap();
    assert_eq!(&bytes[0..4], b"GID ");
    assert_eq!(bytes.len(), 4 + 16);
    let loaded: Dynamic = load_from_bytes(&bytes).unwrap();
    assert_eq!(loaded.get::<Uuid>(), Some(id));
}

#[cfg(feature = "chrono")]
#[test]
fn test_datetime_ticks() {
    use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
    let mut epoch = DateTime::from_timestamp(0, 0).unwrap().naive_utc();
    let bytes = save_to_bytes(&mut epoch).unwrap();
    assert_eq!(&bytes[..], &621_355_968_000_000_000i64.to_le_bytes());

    let mut value = NaiveDate::from_ymd_opt(1999, 12, 31)
        .unwrap()
        .and_hms_micro_opt(23, 59, 59, 999_999)
        .unwrap();
    let decoded: NaiveDateTime = load_from_bytes(&save_to_bytes(&mut value).unwrap()).unwrap();
    assert_eq!(decoded, value);

    let mut utc: DateTime<Utc> = value.and_utc();
    let bytes = save_to_bytes(&mut utc).unwrap();
    assert_eq!(bytes, save_to_bytes(&mut value).unwrap());
    let decoded: DateTime<Utc> = load_from_bytes(&bytes).unwrap();
    assert_eq!(decoded, utc);
}

#[cfg(feature = "chrono")]
#[test]
fn test_datetime_builtin_tag() {
    use chrono::{NaiveDate, NaiveDateTime};
    let value = NaiveDate::from_ymd_opt(2020, 6, 1)
        .unwrap()
        .and_hms_opt(8, 0, 0)
        .unwrap();
    let mut dynamic = Dynamic::new(value);
    let bytes = save_to_bytes(&mut dynamic).unwrap();
    assert_eq!(&bytes[0..4], b"DTM ");
    let loaded: Dynamic = load_from_bytes(&bytes).unwrap();
    assert_eq!(loaded.get::<NaiveDateTime>(), Some(value));

    let mut list = Dynamic::new(vec![value, value]);
    let bytes = save_to_bytes(&mut list).unwrap();
    assert_eq!(&bytes[0..4], b"DTML");
}

#[cfg(feature = "chrono")]
#[test]
fn test_out_of_range_ticks_are_rejected() {
    use chrono::NaiveDateTime;
    let err = load_from_bytes::<NaiveDateTime>(&i64::MIN.to_le_bytes()).unwrap_err();
    assert!(matches!(err, SerializerError::Format(FormatError::InvalidData(_))));
}

#[cfg(feature = "rust_decimal")]
#[test]
fn test_decimal_roundtrip() {
    use rust_decimal::Decimal;
    use std::str::FromStr;
    let mut value = Decimal::from_str("-1234.5678").unwrap();
    let bytes = save_to_bytes(&mut value).unwrap();
    assert_eq!(bytes.len(), 16);
    let decoded: Decimal = load_from_bytes(&bytes).unwrap();
    assert_eq!(decoded, value);
    assert_eq!(decoded.scale(), 4);
}

#[cfg(feature = "indexmap")]
#[test]
fn test_indexmap_preserves_insertion_order() {
    use indexmap::{IndexMap, IndexSet};
    let mut map: IndexMap<String, u8> = IndexMap::new();
    map.insert("z".to_string(), 1);
    map.insert("a".to_string(), 2);
    map.insert("m".to_string(), 3);
    let bytes = save_to_bytes(&mut map).unwrap();
    assert_eq!(map.len(), 3);
    let decoded: IndexMap<String, u8> = load_from_bytes(&bytes).unwrap();
    let keys: Vec<&str> = decoded.keys().map(|k| k.as_str()).collect();
    assert_eq!(keys, vec!["z", "a", "m"]);

    let mut set: IndexSet<u16> = [5, 1, 3].into_iter().collect();
    let bytes = save_to_bytes(&mut set).unwrap();
    assert_eq!(&bytes[..], &[3, 5, 0, 1, 0, 3, 0]);
    let decoded: IndexSet<u16> = load_from_bytes(&bytes).unwrap();
    assert_eq!(decoded.into_iter().collect::<Vec<_>>(), vec![5, 1, 3]);
}

#[cfg(feature = "ulid")]
#[test]
fn test_ulid_roundtrip() {
    use ulid::Ulid;
    let mut id = Ulid::from_parts(1_700_000_000_000, 42);
    let bytes = save_to_bytes(&mut id).unwrap();
    assert_eq!(&bytes[..], &id.to_bytes());
    let decoded: Ulid = load_from_bytes(&bytes).unwrap();
    assert_eq!(decoded, id);
}

#[cfg(feature = "ahash")]
#[test]
fn test_ahash_collections_roundtrip() {
    use ahash::{AHashMap, AHashSet};
    let mut map: AHashMap<u32, String> = AHashMap::new();
    map.insert(1, "one".to_string());
    map.insert(2, "two".to_string());
    let decoded: AHashMap<u32, String> = load_from_bytes(&save_to_bytes(&mut map).unwrap()).unwrap();
    assert_eq!(decoded, map);

    let mut set: AHashSet<i8> = [-1, 0, 1].into_iter().collect();
    let decoded: AHashSet<i8> = load_from_bytes(&save_to_bytes(&mut set).unwrap()).unwrap();
    assert_eq!(decoded, set);
}

#[cfg(feature = "smol_str")]
#[test]
fn test_smol_str_matches_string_layout() {
    use smol_str::SmolStr;
    let mut small = SmolStr::new("compact");
    let mut owned = "compact".to_string();
    let bytes = save_to_bytes(&mut small).unwrap();
    assert_eq!(bytes, save_to_bytes(&mut owned).unwrap());
    let decoded: SmolStr = load_from_bytes(&bytes).unwrap();
    assert_eq!(decoded, small);
}
