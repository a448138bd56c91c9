mod common;

use common::*;
use luacscope_lib::{Constant, ErrorKind, LuaStr, Proto, Value, decrypt, encrypt, parse};
use pretty_assertions::assert_eq;
use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};

/// A single-instruction chunk padded out to exactly `len` bytes with a
/// string constant.
fn padded_chunk(len: usize) -> Vec<u8> {
    (0..len)
        .map(|pad| {
            chunk_bytes(Proto {
                constants: vec![Constant::new(Value::ShortString(LuaStr(vec![b'x'; pad])))],
                ..minimal_proto()
            })
        })
        .find(|bytes| bytes.len() == len)
        .unwrap()
}

#[test]
fn round_trip_with_short_key() {
    let plain = padded_chunk(200);
    let sealed = encrypt(&plain, b"k3y").unwrap();
    assert_eq!(sealed.len(), 200);
    assert_ne!(sealed, plain);
    assert_eq!(decrypt(&sealed, b"k3y").unwrap(), plain);

    let wrong = decrypt(&sealed, b"key").unwrap();
    let span = parse(&plain).unwrap().main.code_span;
    assert_ne!(wrong[span.start..span.end], plain[span.start..span.end]);
}

#[test]
fn only_instruction_bytes_change() {
    let plain = chunk_bytes(sample_tree());
    let chunk = parse(&plain).unwrap();
    let sealed = encrypt(&plain, b"\xff").unwrap();
    assert_eq!(sealed.len(), plain.len());

    let mut in_code = vec![false; plain.len()];
    for (_, p) in chunk.main.walk() {
        in_code[p.code_span.start..p.code_span.end].fill(true);
    }
    for (i, (a, b)) in plain.iter().zip(&sealed).enumerate() {
        if in_code[i] {
            assert_eq!(*a ^ 0xff, *b, "byte {i}");
        } else {
            assert_eq!(a, b, "byte {i}");
        }
    }

    // Structure survives, only the words differ.
    let reparsed = parse(&sealed).unwrap();
    assert_eq!(reparsed.proto_count(), chunk.proto_count());
    assert_eq!(reparsed.main.constants, chunk.main.constants);
}

#[test]
fn key_restarts_in_each_proto() {
    let plain = chunk_bytes(sample_tree());
    let sealed = encrypt(&plain, b"abc").unwrap();
    for (_, p) in parse(&plain).unwrap().main.walk() {
        assert_eq!(sealed[p.code_span.start], plain[p.code_span.start] ^ b'a');
    }
}

#[test]
fn random_keys_round_trip() {
    let plain = chunk_bytes(sample_tree());
    let mut rng = StdRng::seed_from_u64(0x5eed);
    for _ in 0..32 {
        let mut key = vec![0u8; rng.gen_range(1..40)];
        rng.fill_bytes(&mut key);
        let sealed = encrypt(&plain, &key).unwrap();
        assert_eq!(decrypt(&sealed, &key).unwrap(), plain);
    }
}

#[test]
fn empty_key_is_missing() {
    let plain = chunk_bytes(minimal_proto());
    assert_eq!(encrypt(&plain, b"").unwrap_err().kind(), ErrorKind::MissingKey);
    assert_eq!(decrypt(&plain, b"").unwrap_err().kind(), ErrorKind::MissingKey);
}
