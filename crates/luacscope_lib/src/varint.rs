//! Lua 5.4 variable-length unsigned integers.
//!
//! Seven payload bits per byte, most significant group first. Every byte
//! but the last has its top bit clear; the last byte has it set. A single
//! `0x80` therefore encodes zero.

use crate::{LuacError, ProtoPath};

const PAYLOAD_MASK: u8 = 0x7f;
const LAST_BYTE: u8 = 0x80;

/// Largest accumulator value that can still take another 7-bit group.
const SHIFT_LIMIT: u64 = u64::MAX >> 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Fault {
    Truncated,
    Overflow,
}

/// Decodes starting at `buf[pos]`, returning the value and the number of
/// bytes consumed.
pub(crate) fn decode_at(buf: &[u8], pos: usize) -> Result<(u64, usize), Fault> {
    let mut x: u64 = 0;
    let mut i = pos;
    loop {
        let b = *buf.get(i).ok_or(Fault::Truncated)?;
        i += 1;
        if x > SHIFT_LIMIT {
            return Err(Fault::Overflow);
        }
        x = (x << 7) | u64::from(b & PAYLOAD_MASK);
        if b & LAST_BYTE != 0 {
            return Ok((x, i - pos));
        }
    }
}

/// Decodes one integer from the start of `bytes`.
pub fn decode(bytes: &[u8]) -> Result<(u64, usize), LuacError> {
    decode_at(bytes, 0).map_err(|fault| match fault {
        Fault::Truncated => LuacError::Truncated {
            field: "varint",
            offset: 0,
            path: ProtoPath::root(),
        },
        Fault::Overflow => LuacError::IntegerOverflow {
            field: "varint",
            offset: 0,
            path: ProtoPath::root(),
        },
    })
}

/// Appends the shortest encoding of `n` to `out`.
pub fn encode_into(out: &mut Vec<u8>, mut n: u64) {
    let mut buf = [0u8; 10];
    let mut len = 0;
    loop {
        buf[len] = (n & u64::from(PAYLOAD_MASK)) as u8;
        len += 1;
        n >>= 7;
        if n == 0 {
            break;
        }
    }
    buf[0] |= LAST_BYTE;
    out.extend(buf[..len].iter().rev());
}

pub fn encode(n: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(10);
    encode_into(&mut out, n);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;
    use rand::rngs::StdRng;
    use rand::{RngCore, SeedableRng};

    #[test]
    fn known_encodings() {
        assert_eq!(encode(0), vec![0x80]);
        assert_eq!(encode(1), vec![0x81]);
        assert_eq!(encode(127), vec![0xff]);
        assert_eq!(encode(128), vec![0x01, 0x80]);
        assert_eq!(encode(300), vec![0x02, 0xac]);
    }

    #[test]
    fn decode_reports_consumed_length() {
        assert_eq!(decode(&[0x02, 0xac, 0x55]).unwrap(), (300, 2));
        assert_eq!(decode(&[0x80]).unwrap(), (0, 1));
    }

    #[test]
    fn leading_zero_groups_are_accepted() {
        assert_eq!(decode(&[0x00, 0x00, 0x85]).unwrap(), (5, 3));
    }

    #[test]
    fn round_trip_random_values() {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        let mut values = vec![0, 1, 127, 128, u64::from(u32::MAX), u64::MAX - 1, u64::MAX];
        for _ in 0..2000 {
            let shift = rng.next_u32() % 64;
            values.push(rng.next_u64() >> shift);
        }
        for n in values {
            let enc = encode(n);
            assert_eq!(decode(&enc).unwrap(), (n, enc.len()), "value {n}");
        }
    }

    #[test]
    fn truncated_encodings_fail() {
        for n in [128u64, 300, 1 << 40, u64::MAX] {
            let enc = encode(n);
            for cut in 0..enc.len() {
                let err = decode(&enc[..cut]).unwrap_err();
                assert_eq!(err.kind(), ErrorKind::TruncatedInput, "value {n} cut at {cut}");
            }
        }
    }

    #[test]
    fn oversized_encoding_overflows() {
        // 2^64 needs ten groups with a leading 0b10.
        let mut bytes = vec![0x02];
        bytes.extend(std::iter::repeat_n(0x00, 8));
        bytes.push(0x80);
        let err = decode(&bytes).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IntegerOverflow);

        let mut max = vec![0x01];
        max.extend(std::iter::repeat_n(0x7f, 8));
        max.push(0xff);
        assert_eq!(decode(&max).unwrap().0, u64::MAX);
    }
}
