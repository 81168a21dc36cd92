//! Expansion of 16-bit compressed instructions into their 32-bit [`Instruction`] equivalents.
//!
//! Quadrant/funct3 slots whose meaning depends on XLEN (e.g. `c.jal` vs `c.addiw`, `c.flw` vs
//! `c.ld`, `c.fld` vs `c.lq`) are resolved from the [`IsaConfig`].

use crate::bits::{field, sext_imm};
use crate::config::{Extension, IsaConfig, Xlen};
use crate::instruction::{
    require, require_xlen, BranchCondition, DecodeError, FpFormat, Instruction, LoadWidth,
    RegImmOp, RegRegOp, RegShiftImmOp, StoreWidth,
};
use crate::registers::Specifier;

/// Returns `true` if the low bits of an instruction parcel mark a 16-bit instruction.
pub fn is_compressed(parcel: u16) -> bool {
    parcel & 0b11 != 0b11
}

/// Expands a compressed instruction.
///
/// The all-zero parcel is defined to be illegal.
pub fn decode(parcel: u16, isa: &IsaConfig) -> Result<Instruction, DecodeError> {
    require(isa, Extension::C)?;
    if parcel == 0 {
        return Err(DecodeError::IllegalInstruction);
    }
    let raw = parcel as u32;
    match (raw & 0b11, funct3(raw)) {
        (0b00, funct3) => quadrant_0(raw, funct3, isa),
        (0b01, funct3) => quadrant_1(raw, funct3, isa),
        (_, funct3) => quadrant_2(raw, funct3, isa),
    }
}

fn quadrant_0(raw: u32, funct3: u32, isa: &IsaConfig) -> Result<Instruction, DecodeError> {
    let rd = rd_prime(raw);
    let base = rs1_prime(raw);
    // Word offset: uimm[5:3|2|6]
    let word_offset = field(raw, 12, 10, 3) | field(raw, 6, 6, 2) | field(raw, 5, 5, 6);
    // Doubleword offset: uimm[5:3|7:6]
    let double_offset = field(raw, 12, 10, 3) | field(raw, 6, 5, 6);
    // Quadword offset: uimm[5:4|8|7:6]
    let quad_offset = field(raw, 12, 11, 4) | field(raw, 10, 10, 8) | field(raw, 6, 5, 6);
    let load = |width, offset: u32| {
        Ok(Instruction::Load {
            width,
            dest: rd,
            base,
            offset: offset as i32,
        })
    };
    let store = |width, offset: u32| {
        Ok(Instruction::Store {
            width,
            src: rd,
            base,
            offset: offset as i32,
        })
    };
    let fp_load = |format, offset: u32| {
        Ok(Instruction::FpLoad {
            format,
            dest: rd,
            base,
            offset: offset as i32,
        })
    };
    let fp_store = |format, offset: u32| {
        Ok(Instruction::FpStore {
            format,
            src: rd,
            base,
            offset: offset as i32,
        })
    };
    match funct3 {
        0b000 => {
            // c.addi4spn: nzuimm[5:4|9:6|2|3]
            let immediate = field(raw, 12, 11, 4)
                | field(raw, 10, 7, 6)
                | field(raw, 6, 6, 2)
                | field(raw, 5, 5, 3);
            if immediate == 0 {
                return Err(DecodeError::IllegalInstruction);
            }
            Ok(Instruction::OpImm {
                op: RegImmOp::Addi,
                dest: rd,
                src: Specifier::SP,
                immediate: immediate as i32,
            })
        }
        0b001 => match isa.xlen {
            Xlen::Rv128 => load(LoadWidth::Lq, quad_offset),
            _ => require(isa, Extension::D).and_then(|()| fp_load(FpFormat::Double, double_offset)),
        },
        0b010 => load(LoadWidth::Lw, word_offset),
        0b011 => match isa.xlen {
            Xlen::Rv32 => {
                require(isa, Extension::F).and_then(|()| fp_load(FpFormat::Single, word_offset))
            }
            _ => load(LoadWidth::Ld, double_offset),
        },
        0b101 => match isa.xlen {
            Xlen::Rv128 => store(StoreWidth::Sq, quad_offset),
            _ => {
                require(isa, Extension::D).and_then(|()| fp_store(FpFormat::Double, double_offset))
            }
        },
        0b110 => store(StoreWidth::Sw, word_offset),
        0b111 => match isa.xlen {
            Xlen::Rv32 => {
                require(isa, Extension::F).and_then(|()| fp_store(FpFormat::Single, word_offset))
            }
            _ => store(StoreWidth::Sd, double_offset),
        },
        // 0b100 is reserved
        _ => Err(DecodeError::IllegalInstruction),
    }
}

fn quadrant_1(raw: u32, funct3: u32, isa: &IsaConfig) -> Result<Instruction, DecodeError> {
    let rd = rd_full(raw);
    let imm6 = sext_imm(field(raw, 12, 12, 5) | field(raw, 6, 2, 0), 6);
    match funct3 {
        // c.addi, c.nop
        0b000 => Ok(Instruction::OpImm {
            op: RegImmOp::Addi,
            dest: rd,
            src: rd,
            immediate: imm6,
        }),
        0b001 => match isa.xlen {
            Xlen::Rv32 => Ok(Instruction::Jal {
                dest: Specifier::RA,
                offset: j_offset(raw),
            }),
            _ if rd == Specifier::X0 => Err(DecodeError::IllegalInstruction),
            _ => Ok(Instruction::OpImm {
                op: RegImmOp::Addiw,
                dest: rd,
                src: rd,
                immediate: imm6,
            }),
        },
        // c.li
        0b010 => Ok(Instruction::OpImm {
            op: RegImmOp::Addi,
            dest: rd,
            src: Specifier::X0,
            immediate: imm6,
        }),
        0b011 if rd == Specifier::SP => {
            // c.addi16sp: nzimm[9|4|6|8:7|5]
            let immediate = sext_imm(
                field(raw, 12, 12, 9)
                    | field(raw, 6, 6, 4)
                    | field(raw, 5, 5, 6)
                    | field(raw, 4, 3, 7)
                    | field(raw, 2, 2, 5),
                10,
            );
            if immediate == 0 {
                return Err(DecodeError::IllegalInstruction);
            }
            Ok(Instruction::OpImm {
                op: RegImmOp::Addi,
                dest: Specifier::SP,
                src: Specifier::SP,
                immediate,
            })
        }
        0b011 => {
            // c.lui: nzimm[17|16:12]
            if imm6 == 0 {
                return Err(DecodeError::IllegalInstruction);
            }
            Ok(Instruction::Lui {
                dest: rd,
                immediate: imm6 << 12,
            })
        }
        0b100 => arithmetic(raw, isa),
        0b101 => Ok(Instruction::Jal {
            dest: Specifier::X0,
            offset: j_offset(raw),
        }),
        _ => Ok(Instruction::Branch {
            condition: if funct3 == 0b110 {
                BranchCondition::Beq
            } else {
                BranchCondition::Bne
            },
            src1: rs1_prime(raw),
            src2: Specifier::X0,
            // offset[8|4:3|7:6|2:1|5]
            offset: sext_imm(
                field(raw, 12, 12, 8)
                    | field(raw, 11, 10, 3)
                    | field(raw, 6, 5, 6)
                    | field(raw, 4, 3, 1)
                    | field(raw, 2, 2, 5),
                9,
            ),
        }),
    }
}

/// `c.srli`, `c.srai`, `c.andi` and the register-register group of quadrant 1.
fn arithmetic(raw: u32, isa: &IsaConfig) -> Result<Instruction, DecodeError> {
    let rd = rs1_prime(raw);
    match field(raw, 11, 10, 0) {
        funct2 @ (0b00 | 0b01) => Ok(Instruction::OpShiftImm {
            op: if funct2 == 0b00 {
                RegShiftImmOp::Srli
            } else {
                RegShiftImmOp::Srai
            },
            dest: rd,
            src: rd,
            shift_amount: shift_amount(raw, isa)?,
        }),
        0b10 => Ok(Instruction::OpImm {
            op: RegImmOp::Andi,
            dest: rd,
            src: rd,
            immediate: sext_imm(field(raw, 12, 12, 5) | field(raw, 6, 2, 0), 6),
        }),
        _ => {
            let op = match (field(raw, 12, 12, 0), field(raw, 6, 5, 0)) {
                (0, 0b00) => RegRegOp::Sub,
                (0, 0b01) => RegRegOp::Xor,
                (0, 0b10) => RegRegOp::Or,
                (0, 0b11) => RegRegOp::And,
                (1, 0b00) => {
                    require_xlen(isa, Xlen::Rv64)?;
                    RegRegOp::Subw
                }
                (1, 0b01) => {
                    require_xlen(isa, Xlen::Rv64)?;
                    RegRegOp::Addw
                }
                _ => return Err(DecodeError::IllegalInstruction),
            };
            Ok(Instruction::Op {
                op,
                dest: rd,
                src1: rd,
                src2: rs2_prime(raw),
            })
        }
    }
}

fn quadrant_2(raw: u32, funct3: u32, isa: &IsaConfig) -> Result<Instruction, DecodeError> {
    let rd = rd_full(raw);
    let rs2 = Specifier::from_u5(field(raw, 6, 2, 0) as u8);
    // uimm[5|4:2|7:6]
    let word_load_offset = field(raw, 12, 12, 5) | field(raw, 6, 4, 2) | field(raw, 3, 2, 6);
    // uimm[5|4:3|8:6]
    let double_load_offset = field(raw, 12, 12, 5) | field(raw, 6, 5, 3) | field(raw, 4, 2, 6);
    // uimm[5|4|9:6]
    let quad_load_offset = field(raw, 12, 12, 5) | field(raw, 6, 6, 4) | field(raw, 5, 2, 6);
    // uimm[5:2|7:6]
    let word_store_offset = field(raw, 12, 9, 2) | field(raw, 8, 7, 6);
    // uimm[5:3|8:6]
    let double_store_offset = field(raw, 12, 10, 3) | field(raw, 9, 7, 6);
    // uimm[5:4|9:6]
    let quad_store_offset = field(raw, 12, 11, 4) | field(raw, 10, 7, 6);

    let load = |width, offset: u32| {
        if rd == Specifier::X0 {
            return Err(DecodeError::IllegalInstruction);
        }
        Ok(Instruction::Load {
            width,
            dest: rd,
            base: Specifier::SP,
            offset: offset as i32,
        })
    };
    let store = |width, offset: u32| {
        Ok(Instruction::Store {
            width,
            src: rs2,
            base: Specifier::SP,
            offset: offset as i32,
        })
    };
    let fp_load = |format, offset: u32| {
        Ok(Instruction::FpLoad {
            format,
            dest: rd,
            base: Specifier::SP,
            offset: offset as i32,
        })
    };
    let fp_store = |format, offset: u32| {
        Ok(Instruction::FpStore {
            format,
            src: rs2,
            base: Specifier::SP,
            offset: offset as i32,
        })
    };

    match funct3 {
        0b000 => Ok(Instruction::OpShiftImm {
            op: RegShiftImmOp::Slli,
            dest: rd,
            src: rd,
            shift_amount: shift_amount(raw, isa)?,
        }),
        0b001 => match isa.xlen {
            Xlen::Rv128 => load(LoadWidth::Lq, quad_load_offset),
            _ => require(isa, Extension::D)
                .and_then(|()| fp_load(FpFormat::Double, double_load_offset)),
        },
        0b010 => load(LoadWidth::Lw, word_load_offset),
        0b011 => match isa.xlen {
            Xlen::Rv32 => {
                require(isa, Extension::F)
                    .and_then(|()| fp_load(FpFormat::Single, word_load_offset))
            }
            _ => load(LoadWidth::Ld, double_load_offset),
        },
        0b100 => {
            let bit12 = field(raw, 12, 12, 0);
            match (bit12, rd == Specifier::X0, rs2 == Specifier::X0) {
                // c.jr
                (0, false, true) => Ok(Instruction::Jalr {
                    dest: Specifier::X0,
                    base: rd,
                    offset: 0,
                }),
                (0, true, true) => Err(DecodeError::IllegalInstruction),
                // c.mv
                (0, _, false) => Ok(Instruction::Op {
                    op: RegRegOp::Add,
                    dest: rd,
                    src1: Specifier::X0,
                    src2: rs2,
                }),
                (_, true, true) => Ok(Instruction::Ebreak),
                // c.jalr
                (_, false, true) => Ok(Instruction::Jalr {
                    dest: Specifier::RA,
                    base: rd,
                    offset: 0,
                }),
                // c.add
                (_, _, false) => Ok(Instruction::Op {
                    op: RegRegOp::Add,
                    dest: rd,
                    src1: rd,
                    src2: rs2,
                }),
            }
        }
        0b101 => match isa.xlen {
            Xlen::Rv128 => store(StoreWidth::Sq, quad_store_offset),
            _ => require(isa, Extension::D)
                .and_then(|()| fp_store(FpFormat::Double, double_store_offset)),
        },
        0b110 => store(StoreWidth::Sw, word_store_offset),
        _ => match isa.xlen {
            Xlen::Rv32 => require(isa, Extension::F)
                .and_then(|()| fp_store(FpFormat::Single, word_store_offset)),
            _ => store(StoreWidth::Sd, double_store_offset),
        },
    }
}

/// Shift amount of `c.slli`, `c.srli` and `c.srai`.
///
/// On RV32 `shamt[5]` must be clear. On RV128 a zero shift amount encodes a shift by 64.
fn shift_amount(raw: u32, isa: &IsaConfig) -> Result<u32, DecodeError> {
    let shamt = field(raw, 12, 12, 5) | field(raw, 6, 2, 0);
    match isa.xlen {
        Xlen::Rv32 if shamt >= 32 => Err(DecodeError::IllegalInstruction),
        Xlen::Rv128 if shamt == 0 => Ok(64),
        _ => Ok(shamt),
    }
}

/// `c.j`/`c.jal` offset: `offset[11|4|9:8|10|6|7|3:1|5]`.
fn j_offset(raw: u32) -> i32 {
    sext_imm(
        field(raw, 12, 12, 11)
            | field(raw, 11, 11, 4)
            | field(raw, 10, 9, 8)
            | field(raw, 8, 8, 10)
            | field(raw, 7, 7, 6)
            | field(raw, 6, 6, 7)
            | field(raw, 5, 3, 1)
            | field(raw, 2, 2, 5),
        12,
    )
}

fn funct3(raw: u32) -> u32 {
    field(raw, 15, 13, 0)
}

/// Full 5-bit `rd`/`rs1` field at bits `11:7`.
fn rd_full(raw: u32) -> Specifier {
    Specifier::from_u5(field(raw, 11, 7, 0) as u8)
}

/// 3-bit `rd'` field at bits `4:2`.
fn rd_prime(raw: u32) -> Specifier {
    Specifier::from_compressed(field(raw, 4, 2, 0) as u8)
}

/// 3-bit `rs1'` field at bits `9:7`.
fn rs1_prime(raw: u32) -> Specifier {
    Specifier::from_compressed(field(raw, 9, 7, 0) as u8)
}

/// 3-bit `rs2'` field at bits `4:2`.
fn rs2_prime(raw: u32) -> Specifier {
    rd_prime(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rv64() -> IsaConfig {
        IsaConfig::default()
    }

    fn x(index: u8) -> Specifier {
        Specifier::from_u5(index)
    }

    #[test]
    fn test_all_zero_is_illegal() {
        assert_eq!(Err(DecodeError::IllegalInstruction), decode(0x0000, &rv64()));
    }

    #[test]
    fn test_requires_c() {
        let isa = IsaConfig::parse("rv64ima").unwrap();
        assert_eq!(
            Err(DecodeError::ExtensionDisabled(Extension::C)),
            decode(0x4501, &isa)
        );
    }

    #[test]
    fn test_quadrant_1() {
        // c.li a0, 0
        assert_eq!(
            Ok(Instruction::OpImm {
                op: RegImmOp::Addi,
                dest: x(10),
                src: x(0),
                immediate: 0
            }),
            decode(0x4501, &rv64())
        );
        // c.addi sp, -16
        assert_eq!(
            Ok(Instruction::OpImm {
                op: RegImmOp::Addi,
                dest: x(2),
                src: x(2),
                immediate: -16
            }),
            decode(0x1141, &rv64())
        );
        // c.addi16sp sp, -64
        assert_eq!(
            Ok(Instruction::OpImm {
                op: RegImmOp::Addi,
                dest: x(2),
                src: x(2),
                immediate: -64
            }),
            decode(0x7139, &rv64())
        );
        // c.j -2
        assert_eq!(
            Ok(Instruction::Jal {
                dest: x(0),
                offset: -2
            }),
            decode(0xBFFD, &rv64())
        );
        // c.beqz a0, 8
        assert_eq!(
            Ok(Instruction::Branch {
                condition: BranchCondition::Beq,
                src1: x(10),
                src2: x(0),
                offset: 8
            }),
            decode(0xC501, &rv64())
        );
    }

    #[test]
    fn test_xlen_dependent_slots() {
        let rv32 = IsaConfig::parse("rv32imafc").unwrap();
        // 0x2001 is c.jal 0 on RV32 and c.addiw x0, 0 (reserved) on RV64
        assert_eq!(
            Ok(Instruction::Jal {
                dest: x(1),
                offset: 0
            }),
            decode(0x2001, &rv32)
        );
        assert_eq!(Err(DecodeError::IllegalInstruction), decode(0x2001, &rv64()));
        // c.ld a0, 8(a1) on RV64, c.flw fa0, 8(a1) on RV32
        assert_eq!(
            Ok(Instruction::Load {
                width: LoadWidth::Ld,
                dest: x(10),
                base: x(11),
                offset: 8
            }),
            decode(0x6588, &rv64())
        );
        assert!(matches!(
            decode(0x6588, &rv32),
            Ok(Instruction::FpLoad {
                format: FpFormat::Single,
                ..
            })
        ));
    }

    #[test]
    fn test_quadrant_2() {
        // c.mv a0, a1
        assert_eq!(
            Ok(Instruction::Op {
                op: RegRegOp::Add,
                dest: x(10),
                src1: x(0),
                src2: x(11)
            }),
            decode(0x852E, &rv64())
        );
        // c.jr ra
        assert_eq!(
            Ok(Instruction::Jalr {
                dest: x(0),
                base: x(1),
                offset: 0
            }),
            decode(0x8082, &rv64())
        );
        assert_eq!(Ok(Instruction::Ebreak), decode(0x9002, &rv64()));
        // c.sdsp ra, 8(sp)
        assert_eq!(
            Ok(Instruction::Store {
                width: StoreWidth::Sd,
                src: x(1),
                base: x(2),
                offset: 8
            }),
            decode(0xE406, &rv64())
        );
        // c.ldsp x0 is reserved
        assert_eq!(Err(DecodeError::IllegalInstruction), decode(0x6002, &rv64()));
    }

    #[test]
    fn test_shift_amount() {
        let rv32 = IsaConfig::parse("rv32imac").unwrap();
        // c.slli a0, 32
        assert_eq!(Err(DecodeError::IllegalInstruction), decode(0x1502, &rv32));
        assert_eq!(
            Ok(Instruction::OpShiftImm {
                op: RegShiftImmOp::Slli,
                dest: x(10),
                src: x(10),
                shift_amount: 32
            }),
            decode(0x1502, &rv64())
        );
    }

    #[test]
    fn test_is_compressed() {
        assert!(is_compressed(0x4501));
        assert!(!is_compressed(0x0513));
    }
}
