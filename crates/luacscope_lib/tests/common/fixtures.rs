use luacscope_lib::writer;
use luacscope_lib::{
    AbsLineInfo, Chunk, Constant, Instruction, LocVar, LuaStr, Proto, Source, Upvalue, Value,
};

pub const MOVE: u8 = 0;
pub const LOADI: u8 = 1;
pub const LOADK: u8 = 3;
pub const GETTABUP: u8 = 11;
pub const ADD: u8 = 34;
pub const CALL: u8 = 68;
pub const RETURN: u8 = 70;
pub const RETURN0: u8 = 71;
pub const RETURN1: u8 = 72;
pub const CLOSURE: u8 = 79;
pub const VARARGPREP: u8 = 81;

pub fn chunk_bytes(main: Proto) -> Vec<u8> {
    writer::dump(&Chunk {
        main,
        upvalue_count: 1,
        ..Chunk::default()
    })
}

/// The smallest real function: `RETURN0` and nothing else.
pub fn minimal_proto() -> Proto {
    Proto {
        source: Source::Named(LuaStr::from("=min")),
        max_stack_size: 2,
        code: vec![Instruction::abc(RETURN0, 0, 1, 0, false)],
        ..Proto::default()
    }
}

fn function(line: u32, code: Vec<Instruction>, children: Vec<Proto>) -> Proto {
    let n = code.len();
    Proto {
        line_defined: line,
        last_line_defined: line + 2,
        num_params: 1,
        max_stack_size: 3,
        code,
        upvalues: vec![Upvalue {
            in_stack: false,
            index: 0,
            kind: 0,
            ..Upvalue::default()
        }],
        protos: children.into(),
        line_info: vec![1; n],
        loc_vars: vec![LocVar {
            name: Some(LuaStr::from("x")),
            start_pc: 0,
            end_pc: n as u32,
            ..LocVar::default()
        }],
        upvalue_names: vec![Some(LuaStr::from("_ENV"))],
        ..Proto::default()
    }
}

/// Main function with two closures, the first of which nests a third.
pub fn sample_tree() -> Proto {
    let inner = function(
        3,
        vec![
            Instruction::abc(GETTABUP, 1, 0, 0, false),
            Instruction::abc(MOVE, 2, 0, 0, false),
            Instruction::abc(CALL, 1, 2, 1, false),
            Instruction::abc(RETURN0, 0, 1, 0, false),
        ],
        vec![],
    );
    let first = function(
        2,
        vec![
            Instruction::abx(CLOSURE, 1, 0),
            Instruction::abc(ADD, 1, 0, 0, false),
            Instruction::abc(RETURN1, 1, 0, 0, false),
        ],
        vec![inner],
    );
    let second = function(
        8,
        vec![Instruction::asbx(LOADI, 1, -12), Instruction::abc(RETURN1, 1, 0, 0, false)],
        vec![],
    );
    Proto {
        source: Source::Named(LuaStr::from("@sample.lua")),
        last_line_defined: 0,
        is_vararg: 1,
        max_stack_size: 4,
        code: vec![
            Instruction::abc(VARARGPREP, 0, 0, 0, false),
            Instruction::abx(CLOSURE, 0, 0),
            Instruction::abx(CLOSURE, 1, 1),
            Instruction::abx(LOADK, 2, 0),
            Instruction::abc(CALL, 0, 3, 1, false),
            Instruction::abc(RETURN, 0, 1, 1, true),
        ],
        constants: vec![
            Constant::new(Value::ShortString(LuaStr::from("hello"))),
            Constant::new(Value::Integer(42)),
            Constant::new(Value::Float(1.5)),
            Constant::new(Value::Nil),
            Constant::new(Value::Boolean(false)),
        ],
        upvalues: vec![Upvalue {
            in_stack: true,
            index: 0,
            kind: 0,
            ..Upvalue::default()
        }],
        protos: vec![first, second].into(),
        line_info: vec![0, 1, 1, 2, 0, 0],
        abs_line_info: vec![AbsLineInfo {
            pc: 0,
            line: 1,
            ..AbsLineInfo::default()
        }],
        upvalue_names: vec![Some(LuaStr::from("_ENV"))],
        ..Proto::default()
    }
}

/// Renumbers every opcode in the tree through `perm`.
pub fn renumber(p: &Proto, perm: &dyn Fn(u8) -> u8) -> Proto {
    Proto {
        code: p.code.iter().map(|i| i.with_opcode(perm(i.opcode()))).collect(),
        protos: p.protos.iter().map(|c| renumber(c, perm)).collect(),
        ..p.clone()
    }
}
