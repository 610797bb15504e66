use chunk_serializer::{
    FormatError, FourCC, Mode, Result, Serializable, Serializer, SerializerError, UsageError,
};
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64;
use std::io::Cursor;

fn write_head_and_data() -> Vec<u8> {
    let mut stream = Cursor::new(Vec::new());
    {
        let mut s = Serializer::new(&mut stream, Mode::Write).unwrap();
        s.begin_chunk(b"HEAD").unwrap();
        s.serialize_packed(&mut 42).unwrap();
        s.end_chunk().unwrap();

        s.begin_chunk(b"DATA").unwrap();
        s.serialize(&mut "ok".to_string()).unwrap();
        s.serialize(&mut vec![1i32, 2, 3]).unwrap();
        s.end_chunk().unwrap();
    }
    stream.into_inner()
}

#[test]
fn test_head_and_data_chunks() {
    let bytes = write_head_and_data();
    assert_eq!(&bytes[0..9], b"HEAD\x01\x00\x00\x00\x2a");
    assert_eq!(&bytes[9..13], b"DATA");
    assert_eq!(u32::from_le_bytes(bytes[13..17].try_into().unwrap()), 3 + 1 + 12);

    let mut stream = Cursor::new(bytes);
    let mut s = Serializer::new(&mut stream, Mode::Read).unwrap();
    let mut version = 0;
    let mut text = String::new();
    let mut values: Vec<i32> = Vec::new();

    s.begin_chunk(b"HEAD").unwrap();
    s.serialize_packed(&mut version).unwrap();
    s.end_chunk().unwrap();

    s.begin_chunk(b"DATA").unwrap();
    s.serialize(&mut text).unwrap();
    s.serialize(&mut values).unwrap();
    s.end_chunk().unwrap();

    assert_eq!(version, 42);
    assert_eq!(text, "ok");
    assert_eq!(values, vec![1, 2, 3]);
}

#[test]
fn test_closing_a_partially_read_chunk_fails() {
    let mut stream = Cursor::new(write_head_and_data());
    let mut s = Serializer::new(&mut stream, Mode::Read).unwrap();
    s.skip_chunk(b"HEAD").unwrap();

    s.begin_chunk(b"DATA").unwrap();
    let mut text = String::new();
    s.serialize(&mut text).unwrap();
    let mut len = 0;
    s.serialize_length(&mut len).unwrap();
    assert_eq!(len, 3);
    let mut first_two = vec![0i32; 2];
    for value in first_two.iter_mut() {
        s.serialize(value).unwrap();
    }
    let err = s.end_chunk().unwrap_err();
    assert!(matches!(
        err,
        SerializerError::Format(FormatError::ChunkSizeMismatch { expected: 33, actual: 29, .. })
    ));
}

#[test]
fn test_corrupted_length_is_detected() {
    let mut bytes = write_head_and_data();
    bytes[4] = 2;
    let mut stream = Cursor::new(bytes);
    let mut s = Serializer::new(&mut stream, Mode::Read).unwrap();
    s.begin_chunk(b"HEAD").unwrap();
    s.serialize_packed(&mut 0).unwrap();
    let err = s.end_chunk().unwrap_err();
    assert!(err.is_format());
    assert!(matches!(
        err,
        SerializerError::Format(FormatError::ChunkSizeMismatch { .. })
    ));
}

#[test]
fn test_unexpected_chunk_id() {
    let mut stream = Cursor::new(write_head_and_data());
    let mut s = Serializer::new(&mut stream, Mode::Read).unwrap();
    let err = s.begin_chunk(b"DATA").unwrap_err();
    match err {
        SerializerError::Format(FormatError::UnexpectedChunk { expected, actual }) => {
            assert_eq!(expected, FourCC::new(*b"DATA"));
            assert_eq!(actual, FourCC::new(*b"HEAD"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_unbalanced_end() {
    let mut stream = Cursor::new(Vec::new());
    let mut s = Serializer::new(&mut stream, Mode::Write).unwrap();
    let err = s.end_chunk().unwrap_err();
    assert!(matches!(err, SerializerError::Format(FormatError::UnbalancedChunk)));
}

#[test]
fn test_peek_and_skip() {
    let mut stream = Cursor::new(write_head_and_data());
    let mut s = Serializer::new(&mut stream, Mode::Read).unwrap();
    assert_eq!(s.peek_chunk_id().unwrap(), FourCC::new(*b"HEAD"));
    assert_eq!(s.position(), 0);

    let head = s.skip_chunk(b"HEAD").unwrap();
    assert_eq!(head.start_offset, 8);
    assert_eq!(head.end_offset(), Some(9));
    assert_eq!(s.peek_chunk_id().unwrap(), FourCC::new(*b"DATA"));

    let data = s.skip_chunk(b"DATA").unwrap();
    assert_eq!(data.length(), Some(16));
    assert_eq!(s.position(), 33);
}

#[test]
fn test_read_only_helpers_need_read_mode() {
    let mut stream = Cursor::new(Vec::new());
    let mut s = Serializer::new(&mut stream, Mode::Write).unwrap();
    let err = s.peek_chunk_id().unwrap_err();
    assert!(err.is_usage());
    assert!(matches!(
        err,
        SerializerError::Usage(UsageError::WrongMode { required: Mode::Read, .. })
    ));
}

#[test]
fn test_scoped_chunk_and_current_chunk() {
    let mut stream = Cursor::new(Vec::new());
    {
        let mut s = Serializer::new(&mut stream, Mode::Write).unwrap();
        s.chunk(b"OUTR", |s| {
            assert_eq!(s.chunk_depth(), 1);
            s.chunk(b"INNR", |s| {
                let current = s.current_chunk().unwrap();
                assert_eq!(current.id, FourCC::new(*b"INNR"));
                assert_eq!(current.start_offset, 16);
                s.serialize(&mut 7u16)
            })
        })
        .unwrap();
        assert_eq!(s.chunk_depth(), 0);
        assert!(s.current_chunk().is_none());
    }
    let bytes = stream.into_inner();
    assert_eq!(bytes.len(), 18);
    assert_eq!(&bytes[4..8], &10u32.to_le_bytes());
    assert_eq!(&bytes[12..16], &2u32.to_le_bytes());

    let mut stream = Cursor::new(bytes);
    let mut s = Serializer::new(&mut stream, Mode::Read).unwrap();
    let value = s
        .chunk(b"OUTR", |s| {
            s.chunk(b"INNR", |s| {
                assert_eq!(s.current_chunk().unwrap().length(), Some(2));
                let mut value = 0u16;
                s.serialize(&mut value)?;
                Ok(value)
            })
        })
        .unwrap();
    assert_eq!(value, 7);
}

#[derive(Default, Debug, PartialEq)]
struct Node {
    id: FourCC,
    payload: Vec<u8>,
    children: Vec<Node>,
}

impl Serializable for Node {
    fn serialize(&mut self, s: &mut Serializer<'_>) -> Result<()> {
        if s.is_reading() {
            self.id = s.peek_chunk_id()?;
        }
        s.begin_chunk(self.id)?;
        s.serialize(&mut self.payload)?;
        s.serialize(&mut self.children)?;
        s.end_chunk()?;
        Ok(())
    }
}

fn random_node(rng: &mut Pcg64, depth: usize) -> Node {
    let id: [u8; 4] = std::array::from_fn(|_| rng.gen_range(b'A'..=b'Z'));
    let payload = (0..rng.gen_range(0..40)).map(|_| rng.gen()).collect();
    let children = if depth == 0 {
        Vec::new()
    } else {
        (0..rng.gen_range(0..4))
            .map(|_| random_node(rng, depth - 1))
            .collect()
    };
    Node {
        id: FourCC::new(id),
        payload,
        children,
    }
}

#[test]
fn test_random_nested_chunks_roundtrip() {
    let mut rng = Pcg64::seed_from_u64(0x5EED);
    for _ in 0..20 {
        let mut tree = random_node(&mut rng, 4);
        let mut stream = Cursor::new(Vec::new());
        Serializer::new(&mut stream, Mode::Write)
            .unwrap()
            .save(&mut tree)
            .unwrap();

        stream.set_position(0);
        let decoded: Node = Serializer::new(&mut stream, Mode::Read)
            .unwrap()
            .load()
            .unwrap();
        assert_eq!(decoded, tree);
    }
}

#[test]
fn test_truncated_peek_keeps_position() {
    let mut stream = Cursor::new(b"HEA".to_vec());
    let mut s = Serializer::new(&mut stream, Mode::Read).unwrap();
    let err = s.peek_chunk_id().unwrap_err();
    assert!(matches!(
        err,
        SerializerError::Format(FormatError::UnexpectedEndOfStream { position: 0, needed: 4 })
    ));
    assert_eq!(s.position(), 0);
    let mut first = 0u8;
    s.serialize(&mut first).unwrap();
    assert_eq!(first, b'H');
}
