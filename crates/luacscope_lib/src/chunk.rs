//! Lua 5.4 chunk layout: header validation and the recursive prototype
//! reader.

use std::fmt;
use std::mem;
use std::ops::{Deref, DerefMut};

use byteorder::{ByteOrder, LittleEndian};
use serde::{Serialize, Serializer};

use crate::instruction::Instruction;
use crate::reader::Reader;
use crate::{LuacError, ProtoPath};

pub const LUA_SIGNATURE: &[u8; 4] = b"\x1bLua";
pub const LUAC_VERSION: u8 = 0x54;
pub const LUAC_FORMAT: u8 = 0;
pub const LUAC_DATA: &[u8; 6] = b"\x19\x93\r\n\x1a\n";
pub const LUAC_INT: i64 = 0x5678;
pub const LUAC_NUM: f64 = 370.5;

/// Marker in the relative line table for an absolute checkpoint.
pub const ABSLINEINFO: i8 = -0x80;

// Constant tags, `makevariant(type, variant)` from lobject.h.
pub const LUA_VNIL: u8 = 0x00;
pub const LUA_VFALSE: u8 = 0x01;
pub const LUA_VTRUE: u8 = 0x11;
pub const LUA_VNUMINT: u8 = 0x03;
pub const LUA_VNUMFLT: u8 = 0x13;
pub const LUA_VSHRSTR: u8 = 0x04;
pub const LUA_VLNGSTR: u8 = 0x14;

const INSTRUCTION_SIZE: u8 = 4;

/// Half-open byte range `[start, end)` in the chunk a value was read from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Raw Lua string bytes. Lua strings need not be UTF-8.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct LuaStr(pub Vec<u8>);

impl LuaStr {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for LuaStr {
    fn from(s: &str) -> Self {
        Self(s.as_bytes().to_vec())
    }
}

impl fmt::Display for LuaStr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

impl Serialize for LuaStr {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&String::from_utf8_lossy(&self.0))
    }
}

/// Numeric widths declared by the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Layout {
    pub instruction_size: u8,
    pub integer_size: u8,
    pub number_size: u8,
}

impl Default for Layout {
    fn default() -> Self {
        Self {
            instruction_size: INSTRUCTION_SIZE,
            integer_size: 8,
            number_size: 8,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Header {
    pub version: u8,
    pub format: u8,
    pub layout: Layout,
    pub span: Span,
}

impl Header {
    pub fn is_official(&self) -> bool {
        self.format == LUAC_FORMAT
    }
}

impl Default for Header {
    fn default() -> Self {
        Self {
            version: LUAC_VERSION,
            format: LUAC_FORMAT,
            layout: Layout::default(),
            span: Span::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "value")]
pub enum Value {
    Nil,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    ShortString(LuaStr),
    LongString(LuaStr),
}

impl Value {
    pub fn tag(&self) -> u8 {
        match self {
            Value::Nil => LUA_VNIL,
            Value::Boolean(false) => LUA_VFALSE,
            Value::Boolean(true) => LUA_VTRUE,
            Value::Integer(_) => LUA_VNUMINT,
            Value::Float(_) => LUA_VNUMFLT,
            Value::ShortString(_) => LUA_VSHRSTR,
            Value::LongString(_) => LUA_VLNGSTR,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Integer(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v:?}"),
            Value::ShortString(s) | Value::LongString(s) => write!(f, "{:?}", s.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Constant {
    pub value: Value,
    pub span: Span,
}

impl Constant {
    pub fn new(value: Value) -> Self {
        Self {
            value,
            span: Span::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Upvalue {
    pub in_stack: bool,
    pub index: u8,
    pub kind: u8,
    pub span: Span,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LocVar {
    pub name: Option<LuaStr>,
    pub start_pc: u32,
    pub end_pc: u32,
    pub span: Span,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AbsLineInfo {
    pub pc: u32,
    pub line: u32,
    pub span: Span,
}

/// Source name of a prototype. Nested functions compiled from the same
/// file omit it and inherit their parent's.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub enum Source {
    Named(LuaStr),
    #[default]
    Inherited,
}

impl Source {
    pub fn name(&self) -> Option<&LuaStr> {
        match self {
            Source::Named(s) => Some(s),
            Source::Inherited => None,
        }
    }
}

/// Nested prototypes of a function. Dropping a list tears the subtree
/// down with an explicit stack, so nesting depth is bounded by memory
/// rather than by the call stack.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ProtoList(Vec<Proto>);

impl ProtoList {
    pub fn with_capacity(n: usize) -> Self {
        Self(Vec::with_capacity(n))
    }
}

impl Deref for ProtoList {
    type Target = Vec<Proto>;

    fn deref(&self) -> &Vec<Proto> {
        &self.0
    }
}

impl DerefMut for ProtoList {
    fn deref_mut(&mut self) -> &mut Vec<Proto> {
        &mut self.0
    }
}

impl From<Vec<Proto>> for ProtoList {
    fn from(v: Vec<Proto>) -> Self {
        Self(v)
    }
}

impl FromIterator<Proto> for ProtoList {
    fn from_iter<I: IntoIterator<Item = Proto>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a ProtoList {
    type Item = &'a Proto;
    type IntoIter = std::slice::Iter<'a, Proto>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl Drop for ProtoList {
    fn drop(&mut self) {
        let mut pending = mem::take(&mut self.0);
        while let Some(mut p) = pending.pop() {
            pending.append(&mut p.protos.0);
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Proto {
    pub source: Source,
    pub line_defined: u32,
    pub last_line_defined: u32,
    pub num_params: u8,
    pub is_vararg: u8,
    pub max_stack_size: u8,
    pub code: Vec<Instruction>,
    pub constants: Vec<Constant>,
    pub upvalues: Vec<Upvalue>,
    pub protos: ProtoList,
    pub line_info: Vec<i8>,
    pub abs_line_info: Vec<AbsLineInfo>,
    pub loc_vars: Vec<LocVar>,
    pub upvalue_names: Vec<Option<LuaStr>>,
    /// Whole prototype, from the source field to the last upvalue name.
    pub span: Span,
    /// Instruction words only, without the count prefix.
    pub code_span: Span,
}

impl Proto {
    pub fn has_varargs(&self) -> bool {
        self.is_vararg != 0
    }

    /// Byte range of instruction `pc`, if the proto was parsed from bytes.
    pub fn instruction_span(&self, pc: usize) -> Option<Span> {
        if pc >= self.code.len() {
            return None;
        }
        let start = self.code_span.start.checked_add(pc.checked_mul(INSTRUCTION_SIZE as usize)?)?;
        let end = start.checked_add(INSTRUCTION_SIZE as usize)?;
        (end <= self.code_span.end).then(|| Span::new(start, end))
    }

    /// Source line of instruction `pc`, rebuilt from the relative deltas
    /// and the nearest absolute checkpoint at or before it. `None` when
    /// debug info was stripped.
    pub fn line_at(&self, pc: usize) -> Option<u32> {
        if pc >= self.line_info.len() {
            return None;
        }
        let (mut base_pc, mut line) = match self.abs_line_info.iter().rev().find(|a| a.pc as usize <= pc) {
            Some(abs) => (abs.pc as i64, i64::from(abs.line)),
            None => (-1, i64::from(self.line_defined)),
        };
        while base_pc < pc as i64 {
            base_pc += 1;
            line += i64::from(self.line_info[base_pc as usize]);
        }
        u32::try_from(line).ok()
    }

    /// This prototype and all nested ones, depth-first, parents first.
    /// Every entry owns its full path; use [`Proto::iter`] when paths are
    /// not needed.
    pub fn walk(&self) -> Vec<(ProtoPath, &Proto)> {
        let mut out = Vec::new();
        let mut stack = vec![(Vec::new(), self)];
        while let Some((path, p)) = stack.pop() {
            for (idx, child) in p.protos.iter().enumerate().rev() {
                let mut child_path = path.clone();
                child_path.push(idx);
                stack.push((child_path, child));
            }
            out.push((ProtoPath(path), p));
        }
        out
    }

    /// Same order as [`Proto::walk`], without building paths.
    pub fn iter(&self) -> ProtoIter<'_> {
        ProtoIter { stack: vec![self] }
    }
}

pub struct ProtoIter<'a> {
    stack: Vec<&'a Proto>,
}

impl<'a> Iterator for ProtoIter<'a> {
    type Item = &'a Proto;

    fn next(&mut self) -> Option<&'a Proto> {
        let p = self.stack.pop()?;
        self.stack.extend(p.protos.iter().rev());
        Some(p)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Chunk {
    pub header: Header,
    /// Upvalue count of the main closure, stored between header and proto.
    pub upvalue_count: u8,
    pub main: Proto,
}

impl Chunk {
    pub fn proto_count(&self) -> usize {
        self.main.iter().count()
    }

    pub fn instruction_count(&self) -> usize {
        self.main.iter().map(|p| p.code.len()).sum()
    }

    pub fn find(&self, path: &ProtoPath) -> Option<&Proto> {
        path.0.iter().try_fold(&self.main, |p, &idx| p.protos.get(idx))
    }
}

pub(crate) fn read_header(r: &mut Reader<'_>) -> Result<Header, LuacError> {
    let start = r.pos();

    let signature = r.get_bytes(LUA_SIGNATURE.len(), "signature")?;
    if signature != LUA_SIGNATURE {
        return Err(r.format_error("signature", start, format!("expected {LUA_SIGNATURE:02x?}, found {signature:02x?}")));
    }

    let off = r.pos();
    let version = r.get_u8("version")?;
    if version != LUAC_VERSION {
        return Err(r.format_error(
            "version",
            off,
            format!("expected Lua {}.{} (0x{LUAC_VERSION:02x}), found 0x{version:02x}", LUAC_VERSION >> 4, LUAC_VERSION & 0xf),
        ));
    }

    let format = r.get_u8("format")?;
    if format != LUAC_FORMAT {
        log::warn!("non-standard chunk format byte {format}");
    }

    let off = r.pos();
    let data = r.get_bytes(LUAC_DATA.len(), "LUAC_DATA")?;
    if data != LUAC_DATA {
        return Err(r.format_error("LUAC_DATA", off, "conversion check bytes are corrupted".to_string()));
    }

    let off = r.pos();
    let instruction_size = r.get_u8("Instruction size")?;
    if instruction_size != INSTRUCTION_SIZE {
        return Err(r.format_error("Instruction size", off, format!("expected {INSTRUCTION_SIZE}, found {instruction_size}")));
    }
    let off = r.pos();
    let integer_size = r.get_u8("lua_Integer size")?;
    if !matches!(integer_size, 4 | 8) {
        return Err(r.format_error("lua_Integer size", off, format!("unsupported width {integer_size}")));
    }
    let off = r.pos();
    let number_size = r.get_u8("lua_Number size")?;
    if !matches!(number_size, 4 | 8) {
        return Err(r.format_error("lua_Number size", off, format!("unsupported width {number_size}")));
    }

    let off = r.pos();
    let check_int = r.get_integer(integer_size, "LUAC_INT")?;
    if check_int != LUAC_INT {
        return Err(r.format_error("LUAC_INT", off, format!("expected 0x{LUAC_INT:x}, found 0x{check_int:x} (endianness mismatch?)")));
    }
    let off = r.pos();
    let check_num = r.get_number(number_size, "LUAC_NUM")?;
    if check_num != LUAC_NUM {
        return Err(r.format_error("LUAC_NUM", off, format!("expected {LUAC_NUM}, found {check_num} (float format mismatch?)")));
    }

    Ok(Header {
        version,
        format,
        layout: Layout {
            instruction_size,
            integer_size,
            number_size,
        },
        span: Span::new(start, r.pos()),
    })
}

fn read_code(r: &mut Reader<'_>, p: &mut Proto) -> Result<(), LuacError> {
    let n = r.get_size("code count")?;
    let start = r.pos();
    let len = n
        .checked_mul(INSTRUCTION_SIZE as usize)
        .ok_or_else(|| r.truncated("code", start))?;
    let bytes = r.get_bytes(len, "code")?;
    p.code = bytes
        .chunks_exact(INSTRUCTION_SIZE as usize)
        .map(|w| Instruction(LittleEndian::read_u32(w)))
        .collect();
    p.code_span = Span::new(start, r.pos());
    log::trace!("{}: {} instructions at {}..{}", r.path(), n, start, r.pos());
    Ok(())
}

fn read_constants(r: &mut Reader<'_>, p: &mut Proto, layout: &Layout) -> Result<(), LuacError> {
    let n = r.get_size("constant count")?;
    p.constants = Vec::with_capacity(n.min(r.remaining()));
    for _ in 0..n {
        let start = r.pos();
        let tag = r.get_u8("constant tag")?;
        let value = match tag {
            LUA_VNIL => Value::Nil,
            LUA_VFALSE => Value::Boolean(false),
            LUA_VTRUE => Value::Boolean(true),
            LUA_VNUMINT => Value::Integer(r.get_integer(layout.integer_size, "integer constant")?),
            LUA_VNUMFLT => Value::Float(r.get_number(layout.number_size, "float constant")?),
            LUA_VSHRSTR | LUA_VLNGSTR => {
                let s = r
                    .get_string("string constant")?
                    .ok_or_else(|| r.format_error("string constant", start, "string constant has no body".to_string()))?;
                if tag == LUA_VSHRSTR {
                    Value::ShortString(s)
                } else {
                    Value::LongString(s)
                }
            }
            other => {
                return Err(r.format_error("constant tag", start, format!("unknown constant tag 0x{other:02x}")));
            }
        };
        p.constants.push(Constant {
            value,
            span: Span::new(start, r.pos()),
        });
    }
    Ok(())
}

fn read_upvalues(r: &mut Reader<'_>, p: &mut Proto) -> Result<(), LuacError> {
    let n = r.get_size("upvalue count")?;
    p.upvalues = Vec::with_capacity(n.min(r.remaining()));
    for _ in 0..n {
        let start = r.pos();
        let in_stack = r.get_u8("upvalue in_stack")? != 0;
        let index = r.get_u8("upvalue index")?;
        let kind = r.get_u8("upvalue kind")?;
        p.upvalues.push(Upvalue {
            in_stack,
            index,
            kind,
            span: Span::new(start, r.pos()),
        });
    }
    Ok(())
}


fn read_debug(r: &mut Reader<'_>, p: &mut Proto) -> Result<(), LuacError> {
    let n = r.get_size("line info count")?;
    p.line_info = r.get_bytes(n, "line info")?.iter().map(|&b| b as i8).collect();

    let n = r.get_size("abs line info count")?;
    p.abs_line_info = Vec::with_capacity(n.min(r.remaining()));
    for _ in 0..n {
        let start = r.pos();
        let pc = r.get_int("abs line info pc")?;
        let line = r.get_int("abs line info line")?;
        p.abs_line_info.push(AbsLineInfo {
            pc,
            line,
            span: Span::new(start, r.pos()),
        });
    }

    let n = r.get_size("local variable count")?;
    p.loc_vars = Vec::with_capacity(n.min(r.remaining()));
    for _ in 0..n {
        let start = r.pos();
        let name = r.get_string("local variable name")?;
        let start_pc = r.get_int("local variable start pc")?;
        let end_pc = r.get_int("local variable end pc")?;
        p.loc_vars.push(LocVar {
            name,
            start_pc,
            end_pc,
            span: Span::new(start, r.pos()),
        });
    }

    let n = r.get_size("upvalue name count")?;
    p.upvalue_names = Vec::with_capacity(n.min(r.remaining()));
    for _ in 0..n {
        p.upvalue_names.push(r.get_string("upvalue name")?);
    }
    Ok(())
}

/// A prototype whose nested functions are still being read.
struct Pending {
    proto: Proto,
    start: usize,
    children: usize,
}

/// Everything up to and including the nested-proto count.
fn begin_proto(r: &mut Reader<'_>, layout: &Layout) -> Result<Pending, LuacError> {
    let start = r.pos();
    let mut p = Proto {
        source: match r.get_string("source")? {
            Some(s) => Source::Named(s),
            None => Source::Inherited,
        },
        line_defined: r.get_int("line defined")?,
        last_line_defined: r.get_int("last line defined")?,
        num_params: r.get_u8("parameter count")?,
        is_vararg: r.get_u8("vararg flag")?,
        max_stack_size: r.get_u8("max stack size")?,
        ..Proto::default()
    };

    read_code(r, &mut p)?;
    read_constants(r, &mut p, layout)?;
    read_upvalues(r, &mut p)?;

    let children = r.get_size("proto count")?;
    p.protos = ProtoList::with_capacity(children.min(r.remaining()));
    Ok(Pending {
        proto: p,
        start,
        children,
    })
}

/// Debug info after the last nested proto.
fn finish_proto(r: &mut Reader<'_>, pending: &mut Pending) -> Result<(), LuacError> {
    let p = &mut pending.proto;
    read_debug(r, p)?;
    p.span = Span::new(pending.start, r.pos());
    log::debug!(
        "proto {} (lines {}-{}): {} instructions, {} constants, {} upvalues, {} children",
        r.path(),
        p.line_defined,
        p.last_line_defined,
        p.code.len(),
        p.constants.len(),
        p.upvalues.len(),
        p.protos.len()
    );
    Ok(())
}

/// Reads a prototype and everything nested in it. Parents waiting for
/// their children sit on an explicit stack, so deep nesting costs heap
/// rather than call stack.
pub(crate) fn read_proto(r: &mut Reader<'_>, layout: &Layout) -> Result<Proto, LuacError> {
    let mut parents: Vec<Pending> = Vec::new();
    let mut current = begin_proto(r, layout)?;
    loop {
        if current.proto.protos.len() < current.children {
            r.enter(current.proto.protos.len());
            let child = begin_proto(r, layout)?;
            parents.push(mem::replace(&mut current, child));
            continue;
        }
        finish_proto(r, &mut current)?;
        match parents.pop() {
            Some(mut parent) => {
                r.leave();
                parent.proto.protos.push(current.proto);
                current = parent;
            }
            None => return Ok(current.proto),
        }
    }
}

pub(crate) fn read_chunk(bytecode: &[u8]) -> Result<Chunk, LuacError> {
    let mut r = Reader::new(bytecode);
    let header = read_header(&mut r)?;
    let upvalue_count = r.get_u8("main upvalue count")?;
    let main = read_proto(&mut r, &header.layout)?;
    if r.remaining() != 0 {
        return Err(r.format_error("trailing data", r.pos(), format!("{} unexpected bytes after the main function", r.remaining())));
    }
    Ok(Chunk {
        header,
        upvalue_count,
        main,
    })
}
