//! Decoder, instruction cipher and opcode-mapping inference for Lua 5.4
//! compiled chunks.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

pub mod chunk;
pub mod cipher;
pub mod instruction;
pub mod mapper;
pub mod opcodes;
mod reader;
pub mod varint;
pub mod writer;

pub use chunk::{
    AbsLineInfo, Chunk, Constant, Header, Layout, LocVar, LuaStr, Proto, ProtoIter, ProtoList, Source,
    Span, Upvalue, Value,
};
pub use instruction::{Decoded, Instruction, Operands};
pub use mapper::{Conflict, CountKind, CountMismatch, MappingReport, MappingSummary};
pub use opcodes::{NUM_OPCODES, OPCODE_INFO, OpArgs, OpInfo, OpMode};

/// Location of a prototype inside a chunk: the child indices walked from
/// the main function. The empty path is the main function itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ProtoPath(pub Vec<usize>);

impl ProtoPath {
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn child(&self, idx: usize) -> Self {
        let mut v = self.0.clone();
        v.push(idx);
        Self(v)
    }

    pub fn depth(&self) -> usize {
        self.0.len()
    }
}

impl fmt::Display for ProtoPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "root")?;
        for idx in &self.0 {
            write!(f, "/{idx}")?;
        }
        Ok(())
    }
}

/// Failure categories shared by parse errors and comparison diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    FormatError,
    TruncatedInput,
    IntegerOverflow,
    UnknownOpcode,
    MissingKey,
    CountMismatch,
    Conflict,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::FormatError => "FormatError",
            ErrorKind::TruncatedInput => "TruncatedInput",
            ErrorKind::IntegerOverflow => "IntegerOverflow",
            ErrorKind::UnknownOpcode => "UnknownOpcode",
            ErrorKind::MissingKey => "MissingKey",
            ErrorKind::CountMismatch => "CountMismatch",
            ErrorKind::Conflict => "Conflict",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error)]
pub enum LuacError {
    #[error("invalid {field} at offset {offset} in proto {path}: {message}")]
    Format {
        field: &'static str,
        offset: usize,
        path: ProtoPath,
        message: String,
    },

    #[error("unexpected end of input while reading {field} at offset {offset} in proto {path}")]
    Truncated {
        field: &'static str,
        offset: usize,
        path: ProtoPath,
    },

    #[error("variable-length integer too large for {field} at offset {offset} in proto {path}")]
    IntegerOverflow {
        field: &'static str,
        offset: usize,
        path: ProtoPath,
    },

    #[error("unknown opcode {opcode} (valid opcodes are 0..={max})", max = NUM_OPCODES - 1)]
    UnknownOpcode { opcode: u8 },

    #[error("cipher key is empty")]
    MissingKey,
}

impl LuacError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LuacError::Format { .. } => ErrorKind::FormatError,
            LuacError::Truncated { .. } => ErrorKind::TruncatedInput,
            LuacError::IntegerOverflow { .. } => ErrorKind::IntegerOverflow,
            LuacError::UnknownOpcode { .. } => ErrorKind::UnknownOpcode,
            LuacError::MissingKey => ErrorKind::MissingKey,
        }
    }

    /// Byte offset the error refers to, when it refers to input bytes.
    pub fn offset(&self) -> Option<usize> {
        match self {
            LuacError::Format { offset, .. }
            | LuacError::Truncated { offset, .. }
            | LuacError::IntegerOverflow { offset, .. } => Some(*offset),
            LuacError::UnknownOpcode { .. } | LuacError::MissingKey => None,
        }
    }

    pub fn path(&self) -> Option<&ProtoPath> {
        match self {
            LuacError::Format { path, .. }
            | LuacError::Truncated { path, .. }
            | LuacError::IntegerOverflow { path, .. } => Some(path),
            LuacError::UnknownOpcode { .. } | LuacError::MissingKey => None,
        }
    }

    pub fn field(&self) -> Option<&'static str> {
        match self {
            LuacError::Format { field, .. }
            | LuacError::Truncated { field, .. }
            | LuacError::IntegerOverflow { field, .. } => Some(field),
            LuacError::UnknownOpcode { .. } | LuacError::MissingKey => None,
        }
    }
}

/// Parses a complete Lua 5.4 chunk.
pub fn parse(bytecode: &[u8]) -> Result<Chunk, LuacError> {
    chunk::read_chunk(bytecode)
}

/// XORs every instruction byte of `bytecode` with the cyclic `key`.
pub fn encrypt(bytecode: &[u8], key: &[u8]) -> Result<Vec<u8>, LuacError> {
    cipher::encrypt(bytecode, key)
}

/// Inverse of [`encrypt`]; the transform is its own inverse.
pub fn decrypt(bytecode: &[u8], key: &[u8]) -> Result<Vec<u8>, LuacError> {
    cipher::decrypt(bytecode, key)
}

/// Parses both chunks and infers the opcode numbering of `shuffled`
/// relative to `standard`.
pub fn compare(standard: &[u8], shuffled: &[u8]) -> Result<MappingReport, LuacError> {
    let standard = parse(standard)?;
    let shuffled = parse(shuffled)?;
    Ok(mapper::map_opcodes(&standard.main, &shuffled.main))
}
