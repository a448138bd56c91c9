//! Cyclic-key XOR over instruction bytes.
//!
//! Only the instruction words of each prototype are touched; counts,
//! constants and debug info pass through, so the output parses with the
//! same structure as the input. The key index restarts at every
//! prototype's code span.

use crate::chunk::{Chunk, Span};
use crate::LuacError;

/// XORs `bytes` in place with `key` repeated from its first byte.
pub fn xor_span(bytes: &mut [u8], key: &[u8]) {
    for (b, k) in bytes.iter_mut().zip(key.iter().cycle()) {
        *b ^= k;
    }
}

/// Applies the cipher to every code span of `chunk`, which must have been
/// parsed from `buf`.
pub fn apply_in_place(buf: &mut [u8], chunk: &Chunk, key: &[u8]) -> Result<(), LuacError> {
    if key.is_empty() {
        return Err(LuacError::MissingKey);
    }
    let spans: Vec<Span> = chunk.main.iter().map(|p| p.code_span).collect();
    if let Some(span) = spans.iter().find(|s| s.end > buf.len()) {
        let path = chunk
            .main
            .walk()
            .into_iter()
            .find(|(_, p)| p.code_span == *span)
            .map(|(path, _)| path)
            .unwrap_or_default();
        return Err(LuacError::Format {
            field: "code",
            offset: span.start,
            path,
            message: format!("code span {}..{} lies outside the {}-byte buffer", span.start, span.end, buf.len()),
        });
    }
    let mut touched = 0;
    for span in &spans {
        xor_span(&mut buf[span.start..span.end], key);
        touched += span.len();
    }
    log::info!("ciphered {} instruction bytes across {} prototypes", touched, spans.len());
    Ok(())
}

fn apply(bytecode: &[u8], key: &[u8]) -> Result<Vec<u8>, LuacError> {
    if key.is_empty() {
        return Err(LuacError::MissingKey);
    }
    let chunk = crate::parse(bytecode)?;
    let mut out = bytecode.to_vec();
    apply_in_place(&mut out, &chunk, key)?;
    Ok(out)
}

pub fn encrypt(bytecode: &[u8], key: &[u8]) -> Result<Vec<u8>, LuacError> {
    apply(bytecode, key)
}

pub fn decrypt(bytecode: &[u8], key: &[u8]) -> Result<Vec<u8>, LuacError> {
    apply(bytecode, key)
}
