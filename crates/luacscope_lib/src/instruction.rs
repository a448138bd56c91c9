//! 32-bit instruction words and their per-mode operand layout.
//!
//! ```text
//!         3 3 2 2 2 2 2 2 2 2 2 2 1 1 1 1 1 1 1 1 1 1 0 0 0 0 0 0 0 0 0 0
//!         1 0 9 8 7 6 5 4 3 2 1 0 9 8 7 6 5 4 3 2 1 0 9 8 7 6 5 4 3 2 1 0
//! iABC          C(8)     |      B(8)     |k|     A(8)      |   Op(7)     |
//! iABx                Bx(17)               |     A(8)      |   Op(7)     |
//! iAsBx              sBx (signed)(17)      |     A(8)      |   Op(7)     |
//! iAx                           Ax(25)                     |   Op(7)     |
//! isJ                           sJ (signed)(25)            |   Op(7)     |
//! ```

use std::fmt;

use serde::Serialize;

use crate::LuacError;
use crate::opcodes::{self, OpArgs, OpMode, SignedOperand};

const SIZE_OP: u32 = 7;
const SIZE_A: u32 = 8;
const SIZE_B: u32 = 8;
const SIZE_C: u32 = 8;
const SIZE_BX: u32 = SIZE_C + SIZE_B + 1;
const SIZE_AX: u32 = SIZE_BX + SIZE_A;

const POS_A: u32 = SIZE_OP;
const POS_K: u32 = POS_A + SIZE_A;
const POS_B: u32 = POS_K + 1;
const POS_C: u32 = POS_B + SIZE_B;
const POS_BX: u32 = POS_K;
const POS_AX: u32 = POS_A;

const fn mask(bits: u32) -> u32 {
    (1 << bits) - 1
}

pub const MAX_BX: u32 = mask(SIZE_BX);
pub const MAX_AX: u32 = mask(SIZE_AX);
pub const OFFSET_SC: i32 = (mask(SIZE_C) >> 1) as i32;
pub const OFFSET_SBX: i32 = (MAX_BX >> 1) as i32;
pub const OFFSET_SJ: i32 = (MAX_AX >> 1) as i32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Instruction(pub u32);

impl Instruction {
    pub fn opcode(self) -> u8 {
        (self.0 & mask(SIZE_OP)) as u8
    }

    fn field(self, pos: u32, bits: u32) -> u32 {
        (self.0 >> pos) & mask(bits)
    }

    pub fn a(self) -> u8 {
        self.field(POS_A, SIZE_A) as u8
    }

    pub fn b(self) -> u8 {
        self.field(POS_B, SIZE_B) as u8
    }

    pub fn c(self) -> u8 {
        self.field(POS_C, SIZE_C) as u8
    }

    pub fn k(self) -> bool {
        self.field(POS_K, 1) != 0
    }

    /// B read as a signed immediate.
    pub fn sb(self) -> i32 {
        i32::from(self.b()) - OFFSET_SC
    }

    /// C read as a signed immediate.
    pub fn sc(self) -> i32 {
        i32::from(self.c()) - OFFSET_SC
    }

    pub fn bx(self) -> u32 {
        self.field(POS_BX, SIZE_BX)
    }

    pub fn sbx(self) -> i32 {
        self.bx() as i32 - OFFSET_SBX
    }

    pub fn ax(self) -> u32 {
        self.field(POS_AX, SIZE_AX)
    }

    pub fn sj(self) -> i32 {
        self.ax() as i32 - OFFSET_SJ
    }

    /// Same operands, different opcode number.
    pub fn with_opcode(self, op: u8) -> Self {
        Self((self.0 & !mask(SIZE_OP)) | (u32::from(op) & mask(SIZE_OP)))
    }

    pub fn abc(op: u8, a: u8, b: u8, c: u8, k: bool) -> Self {
        Self(
            (u32::from(op) & mask(SIZE_OP))
                | (u32::from(a) << POS_A)
                | (u32::from(k) << POS_K)
                | (u32::from(b) << POS_B)
                | (u32::from(c) << POS_C),
        )
    }

    pub fn abx(op: u8, a: u8, bx: u32) -> Self {
        Self((u32::from(op) & mask(SIZE_OP)) | (u32::from(a) << POS_A) | ((bx & MAX_BX) << POS_BX))
    }

    pub fn asbx(op: u8, a: u8, sbx: i32) -> Self {
        Self::abx(op, a, sbx.wrapping_add(OFFSET_SBX) as u32)
    }

    pub fn ax_word(op: u8, ax: u32) -> Self {
        Self((u32::from(op) & mask(SIZE_OP)) | ((ax & MAX_AX) << POS_AX))
    }

    pub fn sj_word(op: u8, sj: i32) -> Self {
        Self::ax_word(op, sj.wrapping_add(OFFSET_SJ) as u32)
    }

    pub fn decode(self) -> Result<Decoded, LuacError> {
        let info = opcodes::opcode_info(self.opcode())?;
        let operands = match info.mode {
            OpMode::IABC => Operands::ABC {
                a: self.a(),
                b: self.b(),
                c: self.c(),
                k: self.k(),
            },
            OpMode::IABx => Operands::ABx { a: self.a(), bx: self.bx() },
            OpMode::IAsBx => Operands::AsBx { a: self.a(), sbx: self.sbx() },
            OpMode::IAx => Operands::Ax { ax: self.ax() },
            OpMode::IsJ => Operands::SJ { sj: self.sj() },
        };
        Ok(Decoded {
            op: info.code,
            name: info.name,
            args: info.args,
            operands,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "mode")]
pub enum Operands {
    #[serde(rename = "iABC")]
    ABC { a: u8, b: u8, c: u8, k: bool },
    #[serde(rename = "iABx")]
    ABx { a: u8, bx: u32 },
    #[serde(rename = "iAsBx")]
    AsBx { a: u8, sbx: i32 },
    #[serde(rename = "iAx")]
    Ax { ax: u32 },
    #[serde(rename = "isJ")]
    SJ { sj: i32 },
}

impl Operands {
    pub fn mode(&self) -> OpMode {
        match self {
            Operands::ABC { .. } => OpMode::IABC,
            Operands::ABx { .. } => OpMode::IABx,
            Operands::AsBx { .. } => OpMode::IAsBx,
            Operands::Ax { .. } => OpMode::IAx,
            Operands::SJ { .. } => OpMode::IsJ,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Decoded {
    pub op: u8,
    pub name: &'static str,
    #[serde(skip)]
    pub args: OpArgs,
    pub operands: Operands,
}

impl fmt::Display for Decoded {
    /// Mnemonic followed by the operands the opcode reads, `luac -l` style:
    /// `sB`/`sC` immediates print signed.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:<10}", self.name)?;
        let mut parts: Vec<String> = Vec::new();
        match self.operands {
            Operands::ABC { a, b, c, k } => {
                let signed = opcodes::signed_operand(self.op);
                let show = |v: u8, is_signed: bool| {
                    if is_signed {
                        (i32::from(v) - OFFSET_SC).to_string()
                    } else {
                        v.to_string()
                    }
                };
                if self.args.a {
                    parts.push(a.to_string());
                }
                if self.args.b {
                    parts.push(show(b, signed == Some(SignedOperand::B)));
                }
                if self.args.c {
                    parts.push(show(c, signed == Some(SignedOperand::C)));
                }
                if self.args.k && k {
                    parts.push("k".to_string());
                }
            }
            Operands::ABx { a, bx } => {
                parts.push(a.to_string());
                parts.push(bx.to_string());
            }
            Operands::AsBx { a, sbx } => {
                parts.push(a.to_string());
                parts.push(sbx.to_string());
            }
            Operands::Ax { ax } => parts.push(ax.to_string()),
            Operands::SJ { sj } => parts.push(sj.to_string()),
        }
        write!(f, " {}", parts.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    #[test]
    fn return0_word_from_luac() {
        // `RETURN0` as emitted by luac 5.4 for an empty chunk: A=0, B=1.
        let ins = Instruction(0x0001_0047);
        let d = ins.decode().unwrap();
        assert_eq!(d.name, "RETURN0");
        assert_eq!(d.operands, Operands::ABC { a: 0, b: 1, c: 0, k: false });
    }

    #[test]
    fn abc_fields_and_k_flag() {
        let ins = Instruction::abc(15, 3, 200, 17, true);
        assert_eq!(ins.opcode(), 15);
        let d = ins.decode().unwrap();
        assert_eq!(d.operands, Operands::ABC { a: 3, b: 200, c: 17, k: true });
        assert_eq!(d.to_string(), "SETTABUP   3 200 17 k");
    }

    #[test]
    fn signed_fields_use_excess_encoding() {
        let ins = Instruction::asbx(1, 2, -5);
        assert_eq!(ins.decode().unwrap().operands, Operands::AsBx { a: 2, sbx: -5 });
        assert_eq!(Instruction::asbx(1, 0, 0).bx(), OFFSET_SBX as u32);

        let jmp = Instruction::sj_word(56, -1_000_000);
        assert_eq!(jmp.decode().unwrap().operands, Operands::SJ { sj: -1_000_000 });
        assert_eq!(Instruction::sj_word(56, OFFSET_SJ + 1).sj(), OFFSET_SJ + 1);
    }

    #[test]
    fn wide_unsigned_fields() {
        let k = Instruction::abx(3, 255, MAX_BX);
        assert_eq!(k.decode().unwrap().operands, Operands::ABx { a: 255, bx: MAX_BX });
        let extra = Instruction::ax_word(82, MAX_AX);
        assert_eq!(extra.decode().unwrap().operands, Operands::Ax { ax: MAX_AX });
    }

    #[test]
    fn with_opcode_keeps_operands() {
        let ins = Instruction::abc(0, 1, 2, 3, false);
        let moved = ins.with_opcode(42);
        assert_eq!(moved.opcode(), 42);
        assert_eq!(moved.0 >> 7, ins.0 >> 7);
    }

    #[test]
    fn out_of_range_opcode_is_unknown() {
        let err = Instruction(0x0000_007f).decode().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownOpcode);
        assert!(Instruction(83).decode().is_err());
    }

    #[test]
    fn mode_follows_opcode() {
        for info in crate::OPCODE_INFO.iter() {
            let d = Instruction::abc(info.code, 1, 1, 1, false).decode().unwrap();
            assert_eq!(d.operands.mode(), info.mode, "{}", info.name);
        }
    }

    #[test]
    fn immediates_print_signed() {
        // ADDI R0 R0 1: C carries 1 + 127.
        let addi = Instruction::abc(21, 0, 0, 128, false);
        assert_eq!(addi.sc(), 1);
        assert_eq!(addi.decode().unwrap().to_string(), "ADDI       0 0 1");

        let eqi = Instruction::abc(61, 2, (OFFSET_SC - 3) as u8, 0, true);
        assert_eq!(eqi.sb(), -3);
        assert_eq!(eqi.decode().unwrap().to_string(), "EQI        2 -3 0 k");

        // Register operands stay unsigned.
        let add = Instruction::abc(34, 0, 200, 128, false);
        assert_eq!(add.decode().unwrap().to_string(), "ADD        0 200 128");
    }
}
