//! Serializes a chunk back into the Lua 5.4 binary layout.
//!
//! Output uses the widths recorded in the chunk's header and the shortest
//! varint encodings, so `dump(parse(b)) == b` for anything `luac` emits.

use crate::chunk::{
    Chunk, Header, LUA_SIGNATURE, LUAC_DATA, LUAC_INT, LUAC_NUM, LuaStr, Proto, Source, Value,
};
use crate::varint;

pub fn dump(chunk: &Chunk) -> Vec<u8> {
    let mut out = Vec::new();
    write_header(&mut out, &chunk.header);
    out.push(chunk.upvalue_count);
    write_tree(&mut out, &chunk.main, &chunk.header);
    out
}

fn write_header(out: &mut Vec<u8>, h: &Header) {
    out.extend_from_slice(LUA_SIGNATURE);
    out.push(h.version);
    out.push(h.format);
    out.extend_from_slice(LUAC_DATA);
    out.push(h.layout.instruction_size);
    out.push(h.layout.integer_size);
    out.push(h.layout.number_size);
    write_integer(out, LUAC_INT, h.layout.integer_size);
    write_number(out, LUAC_NUM, h.layout.number_size);
}

fn write_integer(out: &mut Vec<u8>, v: i64, width: u8) {
    match width {
        4 => out.extend_from_slice(&(v as i32).to_le_bytes()),
        _ => out.extend_from_slice(&v.to_le_bytes()),
    }
}

fn write_number(out: &mut Vec<u8>, v: f64, width: u8) {
    match width {
        4 => out.extend_from_slice(&(v as f32).to_le_bytes()),
        _ => out.extend_from_slice(&v.to_le_bytes()),
    }
}

fn write_size(out: &mut Vec<u8>, n: usize) {
    varint::encode_into(out, n as u64);
}

fn write_string(out: &mut Vec<u8>, s: Option<&LuaStr>) {
    match s {
        None => write_size(out, 0),
        Some(s) => {
            write_size(out, s.len() + 1);
            out.extend_from_slice(s.as_bytes());
        }
    }
}

/// Pre-order: each proto's head, then its children, then its debug tail.
fn write_tree(out: &mut Vec<u8>, main: &Proto, h: &Header) {
    write_head(out, main, h);
    let mut stack = vec![(main, 0usize)];
    while let Some(top) = stack.last_mut() {
        let (p, next) = *top;
        match p.protos.get(next) {
            Some(child) => {
                top.1 += 1;
                write_head(out, child, h);
                stack.push((child, 0));
            }
            None => {
                write_debug(out, p);
                stack.pop();
            }
        }
    }
}

/// Everything up to and including the nested-proto count.
fn write_head(out: &mut Vec<u8>, p: &Proto, h: &Header) {
    match &p.source {
        Source::Named(s) => write_string(out, Some(s)),
        Source::Inherited => write_string(out, None),
    }
    write_size(out, p.line_defined as usize);
    write_size(out, p.last_line_defined as usize);
    out.push(p.num_params);
    out.push(p.is_vararg);
    out.push(p.max_stack_size);

    write_size(out, p.code.len());
    for ins in &p.code {
        out.extend_from_slice(&ins.0.to_le_bytes());
    }

    write_size(out, p.constants.len());
    for k in &p.constants {
        out.push(k.value.tag());
        match &k.value {
            Value::Nil | Value::Boolean(_) => {}
            Value::Integer(v) => write_integer(out, *v, h.layout.integer_size),
            Value::Float(v) => write_number(out, *v, h.layout.number_size),
            Value::ShortString(s) | Value::LongString(s) => write_string(out, Some(s)),
        }
    }

    write_size(out, p.upvalues.len());
    for uv in &p.upvalues {
        out.push(u8::from(uv.in_stack));
        out.push(uv.index);
        out.push(uv.kind);
    }

    write_size(out, p.protos.len());
}

fn write_debug(out: &mut Vec<u8>, p: &Proto) {
    write_size(out, p.line_info.len());
    out.extend(p.line_info.iter().map(|&d| d as u8));

    write_size(out, p.abs_line_info.len());
    for abs in &p.abs_line_info {
        write_size(out, abs.pc as usize);
        write_size(out, abs.line as usize);
    }

    write_size(out, p.loc_vars.len());
    for lv in &p.loc_vars {
        write_string(out, lv.name.as_ref());
        write_size(out, lv.start_pc as usize);
        write_size(out, lv.end_pc as usize);
    }

    write_size(out, p.upvalue_names.len());
    for name in &p.upvalue_names {
        write_string(out, name.as_ref());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::{Constant, Layout, LocVar, Upvalue};
    use crate::instruction::Instruction;
    use pretty_assertions::assert_eq;

    #[test]
    fn empty_main_function_layout() {
        let chunk = Chunk {
            main: Proto {
                source: Source::Named(LuaStr::from("=x")),
                is_vararg: 1,
                max_stack_size: 2,
                code: vec![Instruction::abc(71, 0, 1, 0, false)],
                ..Proto::default()
            },
            upvalue_count: 1,
            ..Chunk::default()
        };
        let bytes = dump(&chunk);
        let mut expected = bytes[..31].to_vec();
        expected.push(1); // main upvalue count
        expected.extend_from_slice(&[0x83, b'=', b'x']); // source
        expected.extend_from_slice(&[0x80, 0x80, 0, 1, 2]); // lines, params, vararg, stack
        expected.push(0x81);
        expected.extend_from_slice(&Instruction::abc(71, 0, 1, 0, false).0.to_le_bytes());
        expected.extend_from_slice(&[0x80; 4]); // constants, upvalues, protos, line info
        expected.extend_from_slice(&[0x80; 3]); // abs line info, locals, upvalue names
        assert_eq!(bytes, expected);
    }

    #[test]
    fn reparse_preserves_tree() {
        let child = Proto {
            line_defined: 4,
            last_line_defined: 6,
            num_params: 2,
            code: vec![Instruction::abc(0, 2, 0, 0, false), Instruction::abc(72, 2, 0, 0, false)],
            upvalues: vec![Upvalue {
                in_stack: true,
                index: 0,
                kind: 0,
                ..Upvalue::default()
            }],
            line_info: vec![1, -1],
            loc_vars: vec![LocVar {
                name: Some(LuaStr::from("a")),
                start_pc: 0,
                end_pc: 2,
                ..LocVar::default()
            }],
            upvalue_names: vec![Some(LuaStr::from("_ENV"))],
            ..Proto::default()
        };
        let main = Proto {
            source: Source::Named(LuaStr::from("@t.lua")),
            is_vararg: 1,
            code: vec![Instruction::abc(81, 0, 0, 0, false), Instruction::abx(79, 0, 0)],
            constants: vec![
                Constant::new(Value::Integer(-3)),
                Constant::new(Value::Float(0.25)),
                Constant::new(Value::Boolean(true)),
                Constant::new(Value::LongString(LuaStr::from("long"))),
            ],
            protos: vec![child].into(),
            ..Proto::default()
        };
        for layout in [
            Layout::default(),
            Layout {
                instruction_size: 4,
                integer_size: 4,
                number_size: 4,
            },
        ] {
            let chunk = Chunk {
                header: Header {
                    layout,
                    ..Header::default()
                },
                main: main.clone(),
                ..Chunk::default()
            };
            let bytes = dump(&chunk);
            let parsed = crate::parse(&bytes).unwrap();
            assert_eq!(parsed.main.protos[0].loc_vars[0].name, Some(LuaStr::from("a")));
            assert_eq!(parsed.main.constants[0].value, Value::Integer(-3));
            assert_eq!(parsed.main.constants[3].value, Value::LongString(LuaStr::from("long")));
            assert_eq!(parsed.main.protos[0].line_info, vec![1, -1]);
            assert_eq!(dump(&parsed), bytes);
        }
    }

    #[test]
    fn deep_nesting_round_trips() {
        let depth = 50_000;
        let mut main = Proto::default();
        for line in 0..depth {
            main = Proto {
                line_defined: line,
                protos: vec![main].into(),
                ..Proto::default()
            };
        }
        let chunk = Chunk {
            main,
            ..Chunk::default()
        };
        let bytes = dump(&chunk);
        let parsed = crate::parse(&bytes).unwrap();
        assert_eq!(parsed.proto_count(), depth as usize + 1);
        assert_eq!(dump(&parsed), bytes);
    }
}
