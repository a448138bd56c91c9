//! The 83 standard Lua 5.4 opcodes (`lopcodes.h` numbering).

use std::fmt;

use serde::Serialize;

use crate::LuacError;

pub const NUM_OPCODES: usize = 83;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum OpMode {
    #[serde(rename = "iABC")]
    IABC,
    #[serde(rename = "iABx")]
    IABx,
    #[serde(rename = "iAsBx")]
    IAsBx,
    #[serde(rename = "iAx")]
    IAx,
    #[serde(rename = "isJ")]
    IsJ,
}

impl fmt::Display for OpMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OpMode::IABC => "iABC",
            OpMode::IABx => "iABx",
            OpMode::IAsBx => "iAsBx",
            OpMode::IAx => "iAx",
            OpMode::IsJ => "isJ",
        };
        f.write_str(s)
    }
}

/// Register/operand fields an opcode actually reads. `Bx`, `sBx`, `Ax`
/// and `sJ` are implied by the mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OpArgs {
    pub a: bool,
    pub b: bool,
    pub c: bool,
    pub k: bool,
}

const fn args(a: bool, b: bool, c: bool, k: bool) -> OpArgs {
    OpArgs { a, b, c, k }
}

const NONE: OpArgs = args(false, false, false, false);
const A: OpArgs = args(true, false, false, false);
const AB: OpArgs = args(true, true, false, false);
const AC: OpArgs = args(true, false, true, false);
const AK: OpArgs = args(true, false, false, true);
const ABC: OpArgs = args(true, true, true, false);
const ABK: OpArgs = args(true, true, false, true);
const ABCK: OpArgs = args(true, true, true, true);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OpInfo {
    pub code: u8,
    pub name: &'static str,
    pub mode: OpMode,
    pub args: OpArgs,
}

const fn op(code: u8, name: &'static str, mode: OpMode, args: OpArgs) -> OpInfo {
    OpInfo { code, name, mode, args }
}

use OpMode::{IABC, IABx, IAsBx, IAx, IsJ};

pub static OPCODE_INFO: [OpInfo; NUM_OPCODES] = [
    op(0, "MOVE", IABC, AB),
    op(1, "LOADI", IAsBx, A),
    op(2, "LOADF", IAsBx, A),
    op(3, "LOADK", IABx, A),
    op(4, "LOADKX", IABx, A),
    op(5, "LOADFALSE", IABC, A),
    op(6, "LFALSESKIP", IABC, A),
    op(7, "LOADTRUE", IABC, A),
    op(8, "LOADNIL", IABC, AB),
    op(9, "GETUPVAL", IABC, AB),
    op(10, "SETUPVAL", IABC, AB),
    op(11, "GETTABUP", IABC, ABC),
    op(12, "GETTABLE", IABC, ABC),
    op(13, "GETI", IABC, ABC),
    op(14, "GETFIELD", IABC, ABC),
    op(15, "SETTABUP", IABC, ABCK),
    op(16, "SETTABLE", IABC, ABCK),
    op(17, "SETI", IABC, ABCK),
    op(18, "SETFIELD", IABC, ABCK),
    op(19, "NEWTABLE", IABC, ABCK),
    op(20, "SELF", IABC, ABCK),
    op(21, "ADDI", IABC, ABC),
    op(22, "ADDK", IABC, ABC),
    op(23, "SUBK", IABC, ABC),
    op(24, "MULK", IABC, ABC),
    op(25, "MODK", IABC, ABC),
    op(26, "POWK", IABC, ABC),
    op(27, "DIVK", IABC, ABC),
    op(28, "IDIVK", IABC, ABC),
    op(29, "BANDK", IABC, ABC),
    op(30, "BORK", IABC, ABC),
    op(31, "BXORK", IABC, ABC),
    op(32, "SHRI", IABC, ABC),
    op(33, "SHLI", IABC, ABC),
    op(34, "ADD", IABC, ABC),
    op(35, "SUB", IABC, ABC),
    op(36, "MUL", IABC, ABC),
    op(37, "MOD", IABC, ABC),
    op(38, "POW", IABC, ABC),
    op(39, "DIV", IABC, ABC),
    op(40, "IDIV", IABC, ABC),
    op(41, "BAND", IABC, ABC),
    op(42, "BOR", IABC, ABC),
    op(43, "BXOR", IABC, ABC),
    op(44, "SHL", IABC, ABC),
    op(45, "SHR", IABC, ABC),
    op(46, "MMBIN", IABC, ABC),
    op(47, "MMBINI", IABC, ABCK),
    op(48, "MMBINK", IABC, ABCK),
    op(49, "UNM", IABC, AB),
    op(50, "BNOT", IABC, AB),
    op(51, "NOT", IABC, AB),
    op(52, "LEN", IABC, AB),
    op(53, "CONCAT", IABC, AB),
    op(54, "CLOSE", IABC, A),
    op(55, "TBC", IABC, A),
    op(56, "JMP", IsJ, NONE),
    op(57, "EQ", IABC, ABK),
    op(58, "LT", IABC, ABK),
    op(59, "LE", IABC, ABK),
    op(60, "EQK", IABC, ABK),
    op(61, "EQI", IABC, ABCK),
    op(62, "LTI", IABC, ABCK),
    op(63, "LEI", IABC, ABCK),
    op(64, "GTI", IABC, ABCK),
    op(65, "GEI", IABC, ABCK),
    op(66, "TEST", IABC, AK),
    op(67, "TESTSET", IABC, ABK),
    op(68, "CALL", IABC, ABC),
    op(69, "TAILCALL", IABC, ABCK),
    op(70, "RETURN", IABC, ABCK),
    op(71, "RETURN0", IABC, A),
    op(72, "RETURN1", IABC, A),
    op(73, "FORLOOP", IABx, A),
    op(74, "FORPREP", IABx, A),
    op(75, "TFORPREP", IABx, A),
    op(76, "TFORCALL", IABC, AC),
    op(77, "TFORLOOP", IABx, A),
    op(78, "SETLIST", IABC, ABCK),
    op(79, "CLOSURE", IABx, A),
    op(80, "VARARG", IABC, AC),
    op(81, "VARARGPREP", IABC, A),
    op(82, "EXTRAARG", IAx, NONE),
];

pub fn opcode_info(op: u8) -> Result<&'static OpInfo, LuacError> {
    OPCODE_INFO
        .get(op as usize)
        .ok_or(LuacError::UnknownOpcode { opcode: op })
}

pub fn opcode_name(op: u8) -> Option<&'static str> {
    OPCODE_INFO.get(op as usize).map(|i| i.name)
}

/// iABC operand holding an excess-127 signed immediate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignedOperand {
    B,
    C,
}

pub fn signed_operand(op: u8) -> Option<SignedOperand> {
    match opcode_name(op)? {
        "ADDI" | "SHRI" | "SHLI" => Some(SignedOperand::C),
        "MMBINI" | "EQI" | "LTI" | "LEI" | "GTI" | "GEI" => Some(SignedOperand::B),
        _ => None,
    }
}

/// Case-insensitive lookup by mnemonic.
pub fn opcode_by_name(name: &str) -> Option<&'static OpInfo> {
    OPCODE_INFO.iter().find(|i| i.name.eq_ignore_ascii_case(name))
}
