use byteorder::{ByteOrder, LittleEndian};

use crate::chunk::LuaStr;
use crate::varint::{self, Fault};
use crate::{LuacError, ProtoPath};

/// Byte cursor over a chunk. Tracks the path of the prototype being read
/// so every error can say where it happened.
pub(crate) struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
    path: Vec<usize>,
}

impl<'a> Reader<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self {
            buf,
            pos: 0,
            path: Vec::new(),
        }
    }

    pub(crate) fn pos(&self) -> usize {
        self.pos
    }

    pub(crate) fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    pub(crate) fn enter(&mut self, child: usize) {
        self.path.push(child);
    }

    pub(crate) fn leave(&mut self) {
        self.path.pop();
    }

    pub(crate) fn path(&self) -> ProtoPath {
        ProtoPath(self.path.clone())
    }

    pub(crate) fn truncated(&self, field: &'static str, offset: usize) -> LuacError {
        LuacError::Truncated {
            field,
            offset,
            path: self.path(),
        }
    }

    pub(crate) fn format_error(&self, field: &'static str, offset: usize, message: String) -> LuacError {
        LuacError::Format {
            field,
            offset,
            path: self.path(),
            message,
        }
    }

    pub(crate) fn get_u8(&mut self, field: &'static str) -> Result<u8, LuacError> {
        let v = *self.buf.get(self.pos).ok_or_else(|| self.truncated(field, self.pos))?;
        self.pos += 1;
        Ok(v)
    }

    pub(crate) fn get_bytes(&mut self, n: usize, field: &'static str) -> Result<&'a [u8], LuacError> {
        if self.remaining() < n {
            return Err(self.truncated(field, self.pos));
        }
        let s = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(s)
    }

    pub(crate) fn get_u32(&mut self, field: &'static str) -> Result<u32, LuacError> {
        Ok(LittleEndian::read_u32(self.get_bytes(4, field)?))
    }

    /// Signed little-endian integer of `width` bytes (4 or 8).
    pub(crate) fn get_integer(&mut self, width: u8, field: &'static str) -> Result<i64, LuacError> {
        let bytes = self.get_bytes(width as usize, field)?;
        Ok(match width {
            4 => i64::from(LittleEndian::read_i32(bytes)),
            _ => LittleEndian::read_i64(bytes),
        })
    }

    /// IEEE float of `width` bytes (4 or 8).
    pub(crate) fn get_number(&mut self, width: u8, field: &'static str) -> Result<f64, LuacError> {
        let bytes = self.get_bytes(width as usize, field)?;
        Ok(match width {
            4 => f64::from(LittleEndian::read_f32(bytes)),
            _ => LittleEndian::read_f64(bytes),
        })
    }

    pub(crate) fn get_varint(&mut self, field: &'static str) -> Result<u64, LuacError> {
        let start = self.pos;
        match varint::decode_at(self.buf, start) {
            Ok((v, len)) => {
                self.pos += len;
                Ok(v)
            }
            Err(Fault::Truncated) => Err(self.truncated(field, start)),
            Err(Fault::Overflow) => Err(LuacError::IntegerOverflow {
                field,
                offset: start,
                path: self.path(),
            }),
        }
    }

    /// Varint that must fit the narrower target type.
    fn get_varint_bounded(&mut self, limit: u64, field: &'static str) -> Result<u64, LuacError> {
        let start = self.pos;
        let v = self.get_varint(field)?;
        if v > limit {
            return Err(LuacError::IntegerOverflow {
                field,
                offset: start,
                path: self.path(),
            });
        }
        Ok(v)
    }

    pub(crate) fn get_size(&mut self, field: &'static str) -> Result<usize, LuacError> {
        Ok(self.get_varint_bounded(usize::MAX as u64, field)? as usize)
    }

    pub(crate) fn get_int(&mut self, field: &'static str) -> Result<u32, LuacError> {
        Ok(self.get_varint_bounded(i32::MAX as u64, field)? as u32)
    }

    /// Length-prefixed string; a zero prefix means no string at all.
    pub(crate) fn get_string(&mut self, field: &'static str) -> Result<Option<LuaStr>, LuacError> {
        let size = self.get_size(field)?;
        if size == 0 {
            return Ok(None);
        }
        let bytes = self.get_bytes(size - 1, field)?;
        Ok(Some(LuaStr(bytes.to_vec())))
    }
}
