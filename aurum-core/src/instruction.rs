//! Decoding of 32-bit instructions.
//!
//! Decoding is driven by the major opcode (bits `6:0`), then by the `funct` fields in a fixed
//! order. Any field combination that is not explicitly matched is an illegal instruction, as are
//! instructions of extensions that are not enabled in the [`IsaConfig`].

use crate::bits::{field, sext_imm};
use crate::config::{Extension, IsaConfig, Xlen};
use crate::csr::CsrSpecifier;
use crate::registers::Specifier;
use thiserror::Error;

/// Data structure that can hold any supported instruction in its decoded form.
///
/// Compressed instructions expand into the same variants (see [`crate::compressed`]).
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Instruction {
    OpImm {
        op: RegImmOp,
        dest: Specifier,
        src: Specifier,
        immediate: i32,
    },
    OpShiftImm {
        op: RegShiftImmOp,
        dest: Specifier,
        src: Specifier,
        shift_amount: u32,
    },
    OpUnary {
        op: UnaryOp,
        dest: Specifier,
        src: Specifier,
    },
    Auipc {
        dest: Specifier,
        immediate: i32,
    },
    Lui {
        dest: Specifier,
        immediate: i32,
    },
    Op {
        op: RegRegOp,
        dest: Specifier,
        src1: Specifier,
        src2: Specifier,
    },
    Jal {
        dest: Specifier,
        offset: i32,
    },
    Jalr {
        dest: Specifier,
        base: Specifier,
        offset: i32,
    },
    Branch {
        condition: BranchCondition,
        src1: Specifier,
        src2: Specifier,
        offset: i32,
    },
    Load {
        width: LoadWidth,
        dest: Specifier,
        base: Specifier,
        offset: i32,
    },
    Store {
        width: StoreWidth,
        src: Specifier,
        base: Specifier,
        offset: i32,
    },
    Fence {
        predecessor: FenceOrderCombination,
        successor: FenceOrderCombination,
    },
    FenceI,
    Ecall,
    Ebreak,
    Sret,
    Mret,
    Dret,
    Wfi,
    SfenceVma {
        vaddr: Specifier,
        asid: Specifier,
    },
    Csr {
        op: CsrOp,
        dest: Specifier,
        source: CsrSource,
        csr: CsrSpecifier,
    },
    LoadReserved {
        width: AmoWidth,
        dest: Specifier,
        address: Specifier,
    },
    StoreConditional {
        width: AmoWidth,
        dest: Specifier,
        address: Specifier,
        src: Specifier,
    },
    Amo {
        op: AmoOp,
        width: AmoWidth,
        dest: Specifier,
        address: Specifier,
        src: Specifier,
    },
    FpLoad {
        format: FpFormat,
        dest: Specifier,
        base: Specifier,
        offset: i32,
    },
    FpStore {
        format: FpFormat,
        src: Specifier,
        base: Specifier,
        offset: i32,
    },
    FpFused {
        op: FusedOp,
        format: FpFormat,
        dest: Specifier,
        src1: Specifier,
        src2: Specifier,
        src3: Specifier,
        rounding: u8,
    },
    FpArith {
        op: FpArithOp,
        format: FpFormat,
        dest: Specifier,
        src1: Specifier,
        src2: Specifier,
        rounding: u8,
    },
    FpSqrt {
        format: FpFormat,
        dest: Specifier,
        src: Specifier,
        rounding: u8,
    },
    FpSignInject {
        op: SignInjectOp,
        format: FpFormat,
        dest: Specifier,
        src1: Specifier,
        src2: Specifier,
    },
    FpMinMax {
        op: MinMaxOp,
        format: FpFormat,
        dest: Specifier,
        src1: Specifier,
        src2: Specifier,
    },
    FpRound {
        format: FpFormat,
        dest: Specifier,
        src: Specifier,
        rounding: u8,
        /// `froundnx` raises the inexact flag, `fround` does not.
        exact: bool,
    },
    FpCompare {
        op: FpCompareOp,
        format: FpFormat,
        dest: Specifier,
        src1: Specifier,
        src2: Specifier,
    },
    FpClass {
        format: FpFormat,
        dest: Specifier,
        src: Specifier,
    },
    FpMoveToInt {
        format: FpFormat,
        dest: Specifier,
        src: Specifier,
    },
    FpMoveFromInt {
        format: FpFormat,
        dest: Specifier,
        src: Specifier,
    },
    FpToInt {
        format: FpFormat,
        int: IntFormat,
        dest: Specifier,
        src: Specifier,
        rounding: u8,
    },
    IntToFp {
        format: FpFormat,
        int: IntFormat,
        dest: Specifier,
        src: Specifier,
        rounding: u8,
    },
    FpConvert {
        to: FpFormat,
        from: FpFormat,
        dest: Specifier,
        src: Specifier,
        rounding: u8,
    },
    FpLoadImmediate {
        format: FpFormat,
        dest: Specifier,
        index: u8,
    },
    FcvtmodWD {
        dest: Specifier,
        src: Specifier,
    },
    VSetVl {
        dest: Specifier,
        avl: VectorAvl,
        vtype: VectorTypeSource,
    },
    VArith {
        op: VectorOp,
        dest: Specifier,
        src2: Specifier,
        operand: VectorOperand,
        masked: bool,
    },
    VLoad {
        element_bits: u32,
        dest: Specifier,
        base: Specifier,
        masked: bool,
    },
    VStore {
        element_bits: u32,
        src: Specifier,
        base: Specifier,
        masked: bool,
    },
    /// Andes GP-relative load (`lbgp`, `lhgp`, ...), addressed from `x3`.
    LoadGp {
        width: LoadWidth,
        dest: Specifier,
        offset: i32,
    },
    /// Andes GP-relative store (`sbgp`, `shgp`, ...), addressed from `x3`.
    StoreGp {
        width: StoreWidth,
        src: Specifier,
        offset: i32,
    },
    AddiGp {
        dest: Specifier,
        offset: i32,
    },
    /// Andes `lea.*`: `src1 + (src2 << shift)`, optionally zero-extending the low word of `src2`.
    Lea {
        shift: u32,
        zero_extend: bool,
        dest: Specifier,
        src1: Specifier,
        src2: Specifier,
    },
    FindByte {
        op: FindByteOp,
        dest: Specifier,
        src1: Specifier,
        src2: Specifier,
    },
    BitfieldExtract {
        signed: bool,
        dest: Specifier,
        src: Specifier,
        msb: u32,
        lsb: u32,
    },
    BranchImmediate {
        condition: ImmediateBranchCondition,
        src: Specifier,
        immediate: u32,
        offset: i32,
    },
    BranchBit {
        /// Branch if the bit is set (`bbs`) rather than clear (`bbc`).
        set: bool,
        src: Specifier,
        bit: u32,
        offset: i32,
    },
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum RegImmOp {
    Addi,
    Slti,
    Sltiu,
    Xori,
    Ori,
    Andi,
    Addiw,
    Addid,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum RegShiftImmOp {
    Slli,
    Srli,
    Srai,
    Slliw,
    Srliw,
    Sraiw,
    Sllid,
    Srlid,
    Sraid,
    SlliUw,
    Rori,
    Roriw,
    Bclri,
    Bseti,
    Binvi,
    Bexti,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum UnaryOp {
    Clz,
    Ctz,
    Cpop,
    Clzw,
    Ctzw,
    Cpopw,
    SextB,
    SextH,
    ZextH,
    OrcB,
    Rev8,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum RegRegOp {
    Add,
    Slt,
    Sltu,
    And,
    Or,
    Xor,
    Sll,
    Srl,
    Sub,
    Sra,
    Mul,
    Mulh,
    Mulhsu,
    Mulhu,
    Div,
    Divu,
    Rem,
    Remu,
    Addw,
    Subw,
    Sllw,
    Srlw,
    Sraw,
    Mulw,
    Divw,
    Divuw,
    Remw,
    Remuw,
    Addd,
    Subd,
    Slld,
    Srld,
    Srad,
    Muld,
    Divd,
    Divud,
    Remd,
    Remud,
    Sh1add,
    Sh2add,
    Sh3add,
    AddUw,
    Sh1addUw,
    Sh2addUw,
    Sh3addUw,
    Andn,
    Orn,
    Xnor,
    Min,
    Minu,
    Max,
    Maxu,
    Rol,
    Ror,
    Rolw,
    Rorw,
    Clmul,
    Clmulh,
    Clmulr,
    Bset,
    Bclr,
    Binv,
    Bext,
    CzeroEqz,
    CzeroNez,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum BranchCondition {
    Beq,
    Bne,
    Blt,
    Bltu,
    Bge,
    Bgeu,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum LoadWidth {
    Lb,
    Lh,
    Lw,
    Ld,
    Lq,
    Lbu,
    Lhu,
    Lwu,
    Ldu,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum StoreWidth {
    Sb,
    Sh,
    Sw,
    Sd,
    Sq,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct FenceOrderCombination {
    pub device_input: bool,
    pub device_output: bool,
    pub memory_reads: bool,
    pub memory_writes: bool,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum CsrOp {
    ReadWrite,
    ReadSet,
    ReadClear,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum CsrSource {
    Register(Specifier),
    /// 5-bit zero-extended immediate of the `csrr*i` forms.
    Immediate(u32),
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum AmoWidth {
    Word,
    Double,
    Quad,
}

impl AmoWidth {
    pub fn bytes(self) -> u64 {
        match self {
            Self::Word => 4,
            Self::Double => 8,
            Self::Quad => 16,
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum AmoOp {
    Swap,
    Add,
    Xor,
    And,
    Or,
    Min,
    Max,
    Minu,
    Maxu,
}

/// Scalar floating point formats. Quad precision is not supported.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum FpFormat {
    Half,
    Single,
    Double,
}

impl FpFormat {
    pub fn bits(self) -> u32 {
        match self {
            Self::Half => 16,
            Self::Single => 32,
            Self::Double => 64,
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum FusedOp {
    Madd,
    Msub,
    Nmsub,
    Nmadd,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum FpArithOp {
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum SignInjectOp {
    Sgnj,
    Sgnjn,
    Sgnjx,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum MinMaxOp {
    Min,
    Max,
    Minm,
    Maxm,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum FpCompareOp {
    Eq,
    Lt,
    Le,
    Ltq,
    Leq,
}

/// Integer operand of FP conversions.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum IntFormat {
    W,
    Wu,
    L,
    Lu,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum VectorAvl {
    Register(Specifier),
    Immediate(u32),
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum VectorTypeSource {
    Immediate(u32),
    Register(Specifier),
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum VectorOp {
    Add,
    Waddu,
    Wadd,
    WadduW,
    WaddW,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum VectorOperand {
    Vector(Specifier),
    Scalar(Specifier),
    Immediate(i32),
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum FindByteOp {
    Ffb,
    Ffzmism,
    Ffmism,
    Flmism,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ImmediateBranchCondition {
    Beqc,
    Bnec,
}

impl Instruction {
    pub fn decode(raw_instruction: u32, isa: &IsaConfig) -> Result<Self, DecodeError> {
        let raw = raw_instruction;
        #[allow(clippy::unusual_byte_groupings)]
        match raw & 0x7F {
            0b00_000_11 => decode_load(raw, isa),
            0b00_001_11 => decode_load_fp(raw, isa),
            0b00_010_11 => decode_custom_0(raw, isa),
            0b00_011_11 => decode_misc_mem(raw, isa),
            0b00_100_11 => decode_op_imm(raw, isa),
            0b00_101_11 => Ok(Self::Auipc {
                dest: rd(raw),
                immediate: u_imm(raw),
            }),
            0b00_110_11 => decode_op_imm_32(raw, isa),
            0b01_000_11 => decode_store(raw, isa),
            0b01_001_11 => decode_store_fp(raw, isa),
            0b01_010_11 => decode_custom_1(raw, isa),
            0b01_011_11 => decode_amo(raw, isa),
            0b01_100_11 => decode_op(raw, isa),
            0b01_101_11 => Ok(Self::Lui {
                dest: rd(raw),
                immediate: u_imm(raw),
            }),
            0b01_110_11 => decode_op_32(raw, isa),
            0b10_000_11 => decode_fused(raw, isa, FusedOp::Madd),
            0b10_001_11 => decode_fused(raw, isa, FusedOp::Msub),
            0b10_010_11 => decode_fused(raw, isa, FusedOp::Nmsub),
            0b10_011_11 => decode_fused(raw, isa, FusedOp::Nmadd),
            0b10_100_11 => decode_op_fp(raw, isa),
            0b10_101_11 => decode_op_v(raw, isa),
            0b10_110_11 => match isa.xlen {
                Xlen::Rv128 => decode_op_imm_64(raw),
                Xlen::Rv64 if isa.has(Extension::Xandes) => decode_custom_2(raw),
                _ => Err(DecodeError::UnsupportedOpcode(raw & 0x7F)),
            },
            0b11_000_11 => match b_funct(raw) {
                Some(condition) => Ok(Self::Branch {
                    condition,
                    src1: rs1(raw),
                    src2: rs2(raw),
                    offset: b_imm(raw),
                }),
                None => Err(DecodeError::IllegalInstruction),
            },
            0b11_001_11 if funct3(raw) == 0 => Ok(Self::Jalr {
                dest: rd(raw),
                base: rs1(raw),
                offset: i_imm(raw),
            }),
            0b11_011_11 => Ok(Self::Jal {
                dest: rd(raw),
                offset: j_imm(raw),
            }),
            0b11_100_11 => decode_system(raw),
            0b11_110_11 => match isa.xlen {
                Xlen::Rv128 => decode_op_64(raw),
                _ => Err(DecodeError::UnsupportedOpcode(raw & 0x7F)),
            },
            opcode => Err(DecodeError::UnsupportedOpcode(opcode)),
        }
    }

    /// Returns `true` if this is one of the trace marker instructions `xor x0, x0, x0` and
    /// `xor x0, x1, x1`, which are architectural no-ops.
    pub fn is_trace_marker(raw_instruction: u32) -> bool {
        raw_instruction == TRACE_START || raw_instruction == TRACE_STOP
    }
}

/// `xor x0, x0, x0`: starts a traced region.
pub const TRACE_START: u32 = 0x0000_4033;
/// `xor x0, x1, x1`: ends a traced region.
pub const TRACE_STOP: u32 = 0x0010_C033;

#[derive(Error, Debug, Clone, Eq, PartialEq)]
pub enum DecodeError {
    #[error("instruction has unsupported opcode {0:#04x}")]
    UnsupportedOpcode(u32),
    #[error("illegal instruction")]
    IllegalInstruction,
    #[error("instruction requires the {} extension", .0.name())]
    ExtensionDisabled(Extension),
    #[error("instruction is not available on {0}")]
    UnsupportedXlen(Xlen),
}

pub(crate) fn require(isa: &IsaConfig, extension: Extension) -> Result<(), DecodeError> {
    if isa.has(extension) {
        Ok(())
    } else {
        Err(DecodeError::ExtensionDisabled(extension))
    }
}

pub(crate) fn require_xlen(isa: &IsaConfig, minimum: Xlen) -> Result<(), DecodeError> {
    if isa.xlen >= minimum {
        Ok(())
    } else {
        Err(DecodeError::UnsupportedXlen(isa.xlen))
    }
}

fn decode_load(raw: u32, isa: &IsaConfig) -> Result<Instruction, DecodeError> {
    let width = match funct3(raw) {
        0b000 => LoadWidth::Lb,
        0b001 => LoadWidth::Lh,
        0b010 => LoadWidth::Lw,
        0b011 => {
            require_xlen(isa, Xlen::Rv64)?;
            LoadWidth::Ld
        }
        0b100 => LoadWidth::Lbu,
        0b101 => LoadWidth::Lhu,
        0b110 => {
            require_xlen(isa, Xlen::Rv64)?;
            LoadWidth::Lwu
        }
        _ => {
            require_xlen(isa, Xlen::Rv128)?;
            LoadWidth::Ldu
        }
    };
    Ok(Instruction::Load {
        width,
        dest: rd(raw),
        base: rs1(raw),
        offset: i_imm(raw),
    })
}

fn decode_store(raw: u32, isa: &IsaConfig) -> Result<Instruction, DecodeError> {
    let width = match funct3(raw) {
        0b000 => StoreWidth::Sb,
        0b001 => StoreWidth::Sh,
        0b010 => StoreWidth::Sw,
        0b011 => {
            require_xlen(isa, Xlen::Rv64)?;
            StoreWidth::Sd
        }
        0b100 => {
            require_xlen(isa, Xlen::Rv128)?;
            StoreWidth::Sq
        }
        _ => return Err(DecodeError::IllegalInstruction),
    };
    Ok(Instruction::Store {
        width,
        src: rs2(raw),
        base: rs1(raw),
        offset: s_imm(raw),
    })
}

fn decode_misc_mem(raw: u32, isa: &IsaConfig) -> Result<Instruction, DecodeError> {
    match funct3(raw) {
        0b000 => {
            // Unused fields of FENCE (fm, rd, rs1) are reserved for future use and must be
            // ignored, which also turns FENCE.TSO into a regular FENCE.
            let predecessor = FenceOrderCombination {
                device_input: (raw >> 27) & 0b1 == 1,
                device_output: (raw >> 26) & 0b1 == 1,
                memory_reads: (raw >> 25) & 0b1 == 1,
                memory_writes: (raw >> 24) & 0b1 == 1,
            };
            let successor = FenceOrderCombination {
                device_input: (raw >> 23) & 0b1 == 1,
                device_output: (raw >> 22) & 0b1 == 1,
                memory_reads: (raw >> 21) & 0b1 == 1,
                memory_writes: (raw >> 20) & 0b1 == 1,
            };
            Ok(Instruction::Fence {
                predecessor,
                successor,
            })
        }
        0b001 => Ok(Instruction::FenceI),
        0b010 => {
            require_xlen(isa, Xlen::Rv128)?;
            Ok(Instruction::Load {
                width: LoadWidth::Lq,
                dest: rd(raw),
                base: rs1(raw),
                offset: i_imm(raw),
            })
        }
        _ => Err(DecodeError::IllegalInstruction),
    }
}

fn decode_op_imm(raw: u32, isa: &IsaConfig) -> Result<Instruction, DecodeError> {
    let op = match funct3(raw) {
        0b000 => RegImmOp::Addi,
        0b010 => RegImmOp::Slti,
        0b011 => RegImmOp::Sltiu,
        0b100 => RegImmOp::Xori,
        0b110 => RegImmOp::Ori,
        0b111 => RegImmOp::Andi,
        funct3 => return decode_shift_imm(raw, isa, funct3),
    };
    Ok(Instruction::OpImm {
        op,
        dest: rd(raw),
        src: rs1(raw),
        immediate: i_imm(raw),
    })
}

/// OP-IMM with funct3 `001`/`101`: shifts, plus the Zbb/Zbs forms sharing their encoding.
fn decode_shift_imm(raw: u32, isa: &IsaConfig, funct3: u8) -> Result<Instruction, DecodeError> {
    let imm12 = raw >> 20;
    let shamt_mask = isa.xlen.shamt_mask();
    let unary = |op| {
        Ok(Instruction::OpUnary {
            op,
            dest: rd(raw),
            src: rs1(raw),
        })
    };
    match (funct3, imm12) {
        (0b001, 0x600) => return require(isa, Extension::Zbb).and_then(|()| unary(UnaryOp::Clz)),
        (0b001, 0x601) => return require(isa, Extension::Zbb).and_then(|()| unary(UnaryOp::Ctz)),
        (0b001, 0x602) => return require(isa, Extension::Zbb).and_then(|()| unary(UnaryOp::Cpop)),
        (0b001, 0x604) => {
            return require(isa, Extension::Zbb).and_then(|()| unary(UnaryOp::SextB))
        }
        (0b001, 0x605) => {
            return require(isa, Extension::Zbb).and_then(|()| unary(UnaryOp::SextH))
        }
        (0b101, 0x287) => return require(isa, Extension::Zbb).and_then(|()| unary(UnaryOp::OrcB)),
        (0b101, imm12) if imm12 == 0x680 | (isa.xlen.bits() - 8) => {
            return require(isa, Extension::Zbb).and_then(|()| unary(UnaryOp::Rev8))
        }
        _ => {}
    }
    let op = match (funct3, imm12 & !shamt_mask) {
        (0b001, 0x000) => RegShiftImmOp::Slli,
        (0b101, 0x000) => RegShiftImmOp::Srli,
        (0b101, 0x400) => RegShiftImmOp::Srai,
        (0b101, 0x600) => {
            require(isa, Extension::Zbb)?;
            RegShiftImmOp::Rori
        }
        (0b001, 0x480) => {
            require(isa, Extension::Zbs)?;
            RegShiftImmOp::Bclri
        }
        (0b001, 0x280) => {
            require(isa, Extension::Zbs)?;
            RegShiftImmOp::Bseti
        }
        (0b001, 0x680) => {
            require(isa, Extension::Zbs)?;
            RegShiftImmOp::Binvi
        }
        (0b101, 0x480) => {
            require(isa, Extension::Zbs)?;
            RegShiftImmOp::Bexti
        }
        _ => return Err(DecodeError::IllegalInstruction),
    };
    Ok(Instruction::OpShiftImm {
        op,
        dest: rd(raw),
        src: rs1(raw),
        shift_amount: imm12 & shamt_mask,
    })
}

fn decode_op_imm_32(raw: u32, isa: &IsaConfig) -> Result<Instruction, DecodeError> {
    require_xlen(isa, Xlen::Rv64)?;
    let (dest, src) = (rd(raw), rs1(raw));
    let imm12 = raw >> 20;
    let shift = |op, shift_amount| {
        Ok(Instruction::OpShiftImm {
            op,
            dest,
            src,
            shift_amount,
        })
    };
    match (funct3(raw), imm12) {
        (0b000, _) => Ok(Instruction::OpImm {
            op: RegImmOp::Addiw,
            dest,
            src,
            immediate: i_imm(raw),
        }),
        (0b001, 0x600..=0x602) => {
            require(isa, Extension::Zbb)?;
            let op = match imm12 {
                0x600 => UnaryOp::Clzw,
                0x601 => UnaryOp::Ctzw,
                _ => UnaryOp::Cpopw,
            };
            Ok(Instruction::OpUnary { op, dest, src })
        }
        (0b001, imm12) if imm12 >> 5 == 0 => shift(RegShiftImmOp::Slliw, imm12 & 0x1F),
        (0b001, imm12) if imm12 >> 6 == 0b10 => {
            require(isa, Extension::Zba)?;
            shift(RegShiftImmOp::SlliUw, imm12 & 0x3F)
        }
        (0b101, imm12) if imm12 >> 5 == 0 => shift(RegShiftImmOp::Srliw, imm12 & 0x1F),
        (0b101, imm12) if imm12 >> 5 == 0b0100000 => shift(RegShiftImmOp::Sraiw, imm12 & 0x1F),
        (0b101, imm12) if imm12 >> 5 == 0b0110000 => {
            require(isa, Extension::Zbb)?;
            shift(RegShiftImmOp::Roriw, imm12 & 0x1F)
        }
        _ => Err(DecodeError::IllegalInstruction),
    }
}

/// OP-IMM-64, only present on RV128.
fn decode_op_imm_64(raw: u32) -> Result<Instruction, DecodeError> {
    let (dest, src) = (rd(raw), rs1(raw));
    let imm12 = raw >> 20;
    let op = match (funct3(raw), imm12 >> 6) {
        (0b000, _) => {
            return Ok(Instruction::OpImm {
                op: RegImmOp::Addid,
                dest,
                src,
                immediate: i_imm(raw),
            })
        }
        (0b001, 0) => RegShiftImmOp::Sllid,
        (0b101, 0) => RegShiftImmOp::Srlid,
        (0b101, 0b010000) => RegShiftImmOp::Sraid,
        _ => return Err(DecodeError::IllegalInstruction),
    };
    Ok(Instruction::OpShiftImm {
        op,
        dest,
        src,
        shift_amount: imm12 & 0x3F,
    })
}

fn decode_op(raw: u32, isa: &IsaConfig) -> Result<Instruction, DecodeError> {
    let (funct7, funct3) = (funct7(raw), funct3(raw));
    if (funct7, funct3, u8::from(rs2(raw))) == (0b0000100, 0b100, 0)
        && isa.xlen == Xlen::Rv32
    {
        require(isa, Extension::Zbb)?;
        return Ok(Instruction::OpUnary {
            op: UnaryOp::ZextH,
            dest: rd(raw),
            src: rs1(raw),
        });
    }
    let (op, extension) = match (funct7, funct3) {
        (0b0000000, 0b000) => (RegRegOp::Add, None),
        (0b0000000, 0b001) => (RegRegOp::Sll, None),
        (0b0000000, 0b010) => (RegRegOp::Slt, None),
        (0b0000000, 0b011) => (RegRegOp::Sltu, None),
        (0b0000000, 0b100) => (RegRegOp::Xor, None),
        (0b0000000, 0b101) => (RegRegOp::Srl, None),
        (0b0000000, 0b110) => (RegRegOp::Or, None),
        (0b0000000, 0b111) => (RegRegOp::And, None),
        (0b0100000, 0b000) => (RegRegOp::Sub, None),
        (0b0100000, 0b101) => (RegRegOp::Sra, None),
        (0b0000001, 0b000) => (RegRegOp::Mul, Some(Extension::M)),
        (0b0000001, 0b001) => (RegRegOp::Mulh, Some(Extension::M)),
        (0b0000001, 0b010) => (RegRegOp::Mulhsu, Some(Extension::M)),
        (0b0000001, 0b011) => (RegRegOp::Mulhu, Some(Extension::M)),
        (0b0000001, 0b100) => (RegRegOp::Div, Some(Extension::M)),
        (0b0000001, 0b101) => (RegRegOp::Divu, Some(Extension::M)),
        (0b0000001, 0b110) => (RegRegOp::Rem, Some(Extension::M)),
        (0b0000001, 0b111) => (RegRegOp::Remu, Some(Extension::M)),
        (0b0010000, 0b010) => (RegRegOp::Sh1add, Some(Extension::Zba)),
        (0b0010000, 0b100) => (RegRegOp::Sh2add, Some(Extension::Zba)),
        (0b0010000, 0b110) => (RegRegOp::Sh3add, Some(Extension::Zba)),
        (0b0100000, 0b111) => (RegRegOp::Andn, Some(Extension::Zbb)),
        (0b0100000, 0b110) => (RegRegOp::Orn, Some(Extension::Zbb)),
        (0b0100000, 0b100) => (RegRegOp::Xnor, Some(Extension::Zbb)),
        (0b0000101, 0b100) => (RegRegOp::Min, Some(Extension::Zbb)),
        (0b0000101, 0b101) => (RegRegOp::Minu, Some(Extension::Zbb)),
        (0b0000101, 0b110) => (RegRegOp::Max, Some(Extension::Zbb)),
        (0b0000101, 0b111) => (RegRegOp::Maxu, Some(Extension::Zbb)),
        (0b0110000, 0b001) => (RegRegOp::Rol, Some(Extension::Zbb)),
        (0b0110000, 0b101) => (RegRegOp::Ror, Some(Extension::Zbb)),
        (0b0000101, 0b001) => (RegRegOp::Clmul, Some(Extension::Zbc)),
        (0b0000101, 0b011) => (RegRegOp::Clmulh, Some(Extension::Zbc)),
        (0b0000101, 0b010) => (RegRegOp::Clmulr, Some(Extension::Zbc)),
        (0b0010100, 0b001) => (RegRegOp::Bset, Some(Extension::Zbs)),
        (0b0100100, 0b001) => (RegRegOp::Bclr, Some(Extension::Zbs)),
        (0b0110100, 0b001) => (RegRegOp::Binv, Some(Extension::Zbs)),
        (0b0100100, 0b101) => (RegRegOp::Bext, Some(Extension::Zbs)),
        (0b0000111, 0b101) => (RegRegOp::CzeroEqz, Some(Extension::Zicond)),
        (0b0000111, 0b111) => (RegRegOp::CzeroNez, Some(Extension::Zicond)),
        _ => return Err(DecodeError::IllegalInstruction),
    };
    if let Some(extension) = extension {
        require(isa, extension)?;
    }
    Ok(Instruction::Op {
        op,
        dest: rd(raw),
        src1: rs1(raw),
        src2: rs2(raw),
    })
}

fn decode_op_32(raw: u32, isa: &IsaConfig) -> Result<Instruction, DecodeError> {
    require_xlen(isa, Xlen::Rv64)?;
    let (funct7, funct3) = (funct7(raw), funct3(raw));
    if (funct7, funct3, u8::from(rs2(raw))) == (0b0000100, 0b100, 0) {
        require(isa, Extension::Zbb)?;
        return Ok(Instruction::OpUnary {
            op: UnaryOp::ZextH,
            dest: rd(raw),
            src: rs1(raw),
        });
    }
    let (op, extension) = match (funct7, funct3) {
        (0b0000000, 0b000) => (RegRegOp::Addw, None),
        (0b0100000, 0b000) => (RegRegOp::Subw, None),
        (0b0000000, 0b001) => (RegRegOp::Sllw, None),
        (0b0000000, 0b101) => (RegRegOp::Srlw, None),
        (0b0100000, 0b101) => (RegRegOp::Sraw, None),
        (0b0000001, 0b000) => (RegRegOp::Mulw, Some(Extension::M)),
        (0b0000001, 0b100) => (RegRegOp::Divw, Some(Extension::M)),
        (0b0000001, 0b101) => (RegRegOp::Divuw, Some(Extension::M)),
        (0b0000001, 0b110) => (RegRegOp::Remw, Some(Extension::M)),
        (0b0000001, 0b111) => (RegRegOp::Remuw, Some(Extension::M)),
        (0b0000100, 0b000) => (RegRegOp::AddUw, Some(Extension::Zba)),
        (0b0010000, 0b010) => (RegRegOp::Sh1addUw, Some(Extension::Zba)),
        (0b0010000, 0b100) => (RegRegOp::Sh2addUw, Some(Extension::Zba)),
        (0b0010000, 0b110) => (RegRegOp::Sh3addUw, Some(Extension::Zba)),
        (0b0110000, 0b001) => (RegRegOp::Rolw, Some(Extension::Zbb)),
        (0b0110000, 0b101) => (RegRegOp::Rorw, Some(Extension::Zbb)),
        _ => return Err(DecodeError::IllegalInstruction),
    };
    if let Some(extension) = extension {
        require(isa, extension)?;
    }
    Ok(Instruction::Op {
        op,
        dest: rd(raw),
        src1: rs1(raw),
        src2: rs2(raw),
    })
}

/// OP-64, only present on RV128.
fn decode_op_64(raw: u32) -> Result<Instruction, DecodeError> {
    let op = match (funct7(raw), funct3(raw)) {
        (0b0000000, 0b000) => RegRegOp::Addd,
        (0b0100000, 0b000) => RegRegOp::Subd,
        (0b0000000, 0b001) => RegRegOp::Slld,
        (0b0000000, 0b101) => RegRegOp::Srld,
        (0b0100000, 0b101) => RegRegOp::Srad,
        (0b0000001, 0b000) => RegRegOp::Muld,
        (0b0000001, 0b100) => RegRegOp::Divd,
        (0b0000001, 0b101) => RegRegOp::Divud,
        (0b0000001, 0b110) => RegRegOp::Remd,
        (0b0000001, 0b111) => RegRegOp::Remud,
        _ => return Err(DecodeError::IllegalInstruction),
    };
    Ok(Instruction::Op {
        op,
        dest: rd(raw),
        src1: rs1(raw),
        src2: rs2(raw),
    })
}

fn decode_system(raw: u32) -> Result<Instruction, DecodeError> {
    let op = match funct3(raw) {
        0b000 => {
            if funct7(raw) == 0b0001001 && u8::from(rd(raw)) == 0 {
                return Ok(Instruction::SfenceVma {
                    vaddr: rs1(raw),
                    asid: rs2(raw),
                });
            }
            if u8::from(rd(raw)) != 0 || u8::from(rs1(raw)) != 0 {
                return Err(DecodeError::IllegalInstruction);
            }
            return match raw >> 20 {
                0x000 => Ok(Instruction::Ecall),
                0x001 => Ok(Instruction::Ebreak),
                0x102 => Ok(Instruction::Sret),
                0x302 => Ok(Instruction::Mret),
                0x7B2 => Ok(Instruction::Dret),
                0x105 => Ok(Instruction::Wfi),
                _ => Err(DecodeError::IllegalInstruction),
            };
        }
        0b001 | 0b101 => CsrOp::ReadWrite,
        0b010 | 0b110 => CsrOp::ReadSet,
        0b011 | 0b111 => CsrOp::ReadClear,
        _ => return Err(DecodeError::IllegalInstruction),
    };
    let source = if funct3(raw) & 0b100 == 0 {
        CsrSource::Register(rs1(raw))
    } else {
        CsrSource::Immediate((raw >> 15) & 0x1F)
    };
    Ok(Instruction::Csr {
        op,
        dest: rd(raw),
        source,
        csr: (raw >> 20) as CsrSpecifier,
    })
}

fn decode_amo(raw: u32, isa: &IsaConfig) -> Result<Instruction, DecodeError> {
    require(isa, Extension::A)?;
    let width = match funct3(raw) {
        0b010 => AmoWidth::Word,
        0b011 => {
            require_xlen(isa, Xlen::Rv64)?;
            AmoWidth::Double
        }
        0b100 => {
            require_xlen(isa, Xlen::Rv128)?;
            AmoWidth::Quad
        }
        _ => return Err(DecodeError::IllegalInstruction),
    };
    let (dest, address, src) = (rd(raw), rs1(raw), rs2(raw));
    let op = match raw >> 27 {
        0b00010 if u8::from(src) == 0 => {
            return Ok(Instruction::LoadReserved {
                width,
                dest,
                address,
            })
        }
        0b00011 => {
            return Ok(Instruction::StoreConditional {
                width,
                dest,
                address,
                src,
            })
        }
        0b00001 => AmoOp::Swap,
        0b00000 => AmoOp::Add,
        0b00100 => AmoOp::Xor,
        0b01100 => AmoOp::And,
        0b01000 => AmoOp::Or,
        0b10000 => AmoOp::Min,
        0b10100 => AmoOp::Max,
        0b11000 => AmoOp::Minu,
        0b11100 => AmoOp::Maxu,
        _ => return Err(DecodeError::IllegalInstruction),
    };
    Ok(Instruction::Amo {
        op,
        width,
        dest,
        address,
        src,
    })
}

/// Resolves the 2-bit `fmt` field, checking the matching extension is enabled.
fn fp_format(fmt: u32, isa: &IsaConfig) -> Result<FpFormat, DecodeError> {
    match fmt {
        0b00 => require(isa, Extension::F).map(|()| FpFormat::Single),
        0b01 => require(isa, Extension::D).map(|()| FpFormat::Double),
        0b10 => require(isa, Extension::Zfh).map(|()| FpFormat::Half),
        // Quad precision is not supported, even with `q` enabled.
        _ => Err(DecodeError::IllegalInstruction),
    }
}

/// Resolves the width field of FP loads/stores; `None` means a vector access.
fn fp_memory_format(funct3: u8, isa: &IsaConfig) -> Result<Option<FpFormat>, DecodeError> {
    match funct3 {
        0b001 => fp_format(0b10, isa).map(Some),
        0b010 => fp_format(0b00, isa).map(Some),
        0b011 => fp_format(0b01, isa).map(Some),
        0b000 | 0b101 | 0b110 | 0b111 => Ok(None),
        _ => Err(DecodeError::IllegalInstruction),
    }
}

/// Element width and mask flag of a unit-stride vector load/store.
fn vector_memory(raw: u32, isa: &IsaConfig) -> Result<(u32, bool), DecodeError> {
    require(isa, Extension::V)?;
    let nf_mew_mop = raw >> 26;
    let lumop = (raw >> 20) & 0x1F;
    if nf_mew_mop != 0 || lumop != 0 {
        return Err(DecodeError::IllegalInstruction);
    }
    let element_bits = match funct3(raw) {
        0b000 => 8,
        0b101 => 16,
        0b110 => 32,
        _ => 64,
    };
    Ok((element_bits, (raw >> 25) & 1 == 0))
}

fn decode_load_fp(raw: u32, isa: &IsaConfig) -> Result<Instruction, DecodeError> {
    match fp_memory_format(funct3(raw), isa)? {
        Some(format) => Ok(Instruction::FpLoad {
            format,
            dest: rd(raw),
            base: rs1(raw),
            offset: i_imm(raw),
        }),
        None => {
            let (element_bits, masked) = vector_memory(raw, isa)?;
            Ok(Instruction::VLoad {
                element_bits,
                dest: rd(raw),
                base: rs1(raw),
                masked,
            })
        }
    }
}

fn decode_store_fp(raw: u32, isa: &IsaConfig) -> Result<Instruction, DecodeError> {
    match fp_memory_format(funct3(raw), isa)? {
        Some(format) => Ok(Instruction::FpStore {
            format,
            src: rs2(raw),
            base: rs1(raw),
            offset: s_imm(raw),
        }),
        None => {
            let (element_bits, masked) = vector_memory(raw, isa)?;
            Ok(Instruction::VStore {
                element_bits,
                src: rd(raw),
                base: rs1(raw),
                masked,
            })
        }
    }
}

fn decode_fused(raw: u32, isa: &IsaConfig, op: FusedOp) -> Result<Instruction, DecodeError> {
    Ok(Instruction::FpFused {
        op,
        format: fp_format((raw >> 25) & 0b11, isa)?,
        dest: rd(raw),
        src1: rs1(raw),
        src2: rs2(raw),
        src3: Specifier::from_u5((raw >> 27) as u8),
        rounding: funct3(raw),
    })
}

fn decode_op_fp(raw: u32, isa: &IsaConfig) -> Result<Instruction, DecodeError> {
    let format = fp_format((raw >> 25) & 0b11, isa)?;
    let (dest, src1, src2) = (rd(raw), rs1(raw), rs2(raw));
    let rs2_field = u8::from(src2);
    let rounding = funct3(raw);
    let arith = |op| {
        Ok(Instruction::FpArith {
            op,
            format,
            dest,
            src1,
            src2,
            rounding,
        })
    };
    match raw >> 27 {
        0b00000 => arith(FpArithOp::Add),
        0b00001 => arith(FpArithOp::Sub),
        0b00010 => arith(FpArithOp::Mul),
        0b00011 => arith(FpArithOp::Div),
        0b01011 if rs2_field == 0 => Ok(Instruction::FpSqrt {
            format,
            dest,
            src: src1,
            rounding,
        }),
        0b00100 => {
            let op = match rounding {
                0b000 => SignInjectOp::Sgnj,
                0b001 => SignInjectOp::Sgnjn,
                0b010 => SignInjectOp::Sgnjx,
                _ => return Err(DecodeError::IllegalInstruction),
            };
            Ok(Instruction::FpSignInject {
                op,
                format,
                dest,
                src1,
                src2,
            })
        }
        0b00101 => {
            let op = match rounding {
                0b000 => MinMaxOp::Min,
                0b001 => MinMaxOp::Max,
                0b010 => {
                    require(isa, Extension::Zfa)?;
                    MinMaxOp::Minm
                }
                0b011 => {
                    require(isa, Extension::Zfa)?;
                    MinMaxOp::Maxm
                }
                _ => return Err(DecodeError::IllegalInstruction),
            };
            Ok(Instruction::FpMinMax {
                op,
                format,
                dest,
                src1,
                src2,
            })
        }
        0b01000 => match rs2_field {
            0b100 | 0b101 => {
                require(isa, Extension::Zfa)?;
                Ok(Instruction::FpRound {
                    format,
                    dest,
                    src: src1,
                    rounding,
                    exact: rs2_field == 0b101,
                })
            }
            from => {
                let from = fp_format(from as u32, isa)?;
                if from == format {
                    return Err(DecodeError::IllegalInstruction);
                }
                Ok(Instruction::FpConvert {
                    to: format,
                    from,
                    dest,
                    src: src1,
                    rounding,
                })
            }
        },
        0b10100 => {
            let op = match rounding {
                0b010 => FpCompareOp::Eq,
                0b001 => FpCompareOp::Lt,
                0b000 => FpCompareOp::Le,
                0b101 => {
                    require(isa, Extension::Zfa)?;
                    FpCompareOp::Ltq
                }
                0b100 => {
                    require(isa, Extension::Zfa)?;
                    FpCompareOp::Leq
                }
                _ => return Err(DecodeError::IllegalInstruction),
            };
            Ok(Instruction::FpCompare {
                op,
                format,
                dest,
                src1,
                src2,
            })
        }
        0b11000 => {
            if rs2_field == 0b01000 && format == FpFormat::Double && rounding == 0b001 {
                require(isa, Extension::Zfa)?;
                return Ok(Instruction::FcvtmodWD { dest, src: src1 });
            }
            Ok(Instruction::FpToInt {
                format,
                int: int_format(rs2_field, isa)?,
                dest,
                src: src1,
                rounding,
            })
        }
        0b11010 => Ok(Instruction::IntToFp {
            format,
            int: int_format(rs2_field, isa)?,
            dest,
            src: src1,
            rounding,
        }),
        0b11100 if rs2_field == 0 => match rounding {
            0b000 => {
                if format == FpFormat::Double {
                    require_xlen(isa, Xlen::Rv64)?;
                }
                Ok(Instruction::FpMoveToInt {
                    format,
                    dest,
                    src: src1,
                })
            }
            0b001 => Ok(Instruction::FpClass {
                format,
                dest,
                src: src1,
            }),
            _ => Err(DecodeError::IllegalInstruction),
        },
        0b11110 if rounding == 0 => match rs2_field {
            0 => {
                if format == FpFormat::Double {
                    require_xlen(isa, Xlen::Rv64)?;
                }
                Ok(Instruction::FpMoveFromInt {
                    format,
                    dest,
                    src: src1,
                })
            }
            1 => {
                require(isa, Extension::Zfa)?;
                Ok(Instruction::FpLoadImmediate {
                    format,
                    dest,
                    index: u8::from(src1),
                })
            }
            _ => Err(DecodeError::IllegalInstruction),
        },
        _ => Err(DecodeError::IllegalInstruction),
    }
}

fn int_format(rs2_field: u8, isa: &IsaConfig) -> Result<IntFormat, DecodeError> {
    match rs2_field {
        0 => Ok(IntFormat::W),
        1 => Ok(IntFormat::Wu),
        2 => require_xlen(isa, Xlen::Rv64).map(|()| IntFormat::L),
        3 => require_xlen(isa, Xlen::Rv64).map(|()| IntFormat::Lu),
        _ => Err(DecodeError::IllegalInstruction),
    }
}

fn decode_op_v(raw: u32, isa: &IsaConfig) -> Result<Instruction, DecodeError> {
    require(isa, Extension::V)?;
    let (dest, src1, src2) = (rd(raw), rs1(raw), rs2(raw));
    let funct3 = funct3(raw);
    if funct3 == 0b111 {
        let (avl, vtype) = if raw >> 31 == 0 {
            (VectorAvl::Register(src1), VectorTypeSource::Immediate((raw >> 20) & 0x7FF))
        } else if raw >> 30 == 0b11 {
            (
                VectorAvl::Immediate((raw >> 15) & 0x1F),
                VectorTypeSource::Immediate((raw >> 20) & 0x3FF),
            )
        } else if raw >> 25 == 0b1000000 {
            (VectorAvl::Register(src1), VectorTypeSource::Register(src2))
        } else {
            return Err(DecodeError::IllegalInstruction);
        };
        return Ok(Instruction::VSetVl { dest, avl, vtype });
    }
    let funct6 = raw >> 26;
    let masked = (raw >> 25) & 1 == 0;
    let operand = match funct3 {
        0b000 | 0b010 => VectorOperand::Vector(src1),
        0b100 | 0b110 => VectorOperand::Scalar(src1),
        0b011 => VectorOperand::Immediate(sext_imm((raw >> 15) & 0x1F, 5)),
        _ => return Err(DecodeError::IllegalInstruction),
    };
    let op = match (funct6, funct3) {
        (0b000000, 0b000 | 0b011 | 0b100) => VectorOp::Add,
        (0b110000, 0b010 | 0b110) => VectorOp::Waddu,
        (0b110001, 0b010 | 0b110) => VectorOp::Wadd,
        (0b110100, 0b010 | 0b110) => VectorOp::WadduW,
        (0b110101, 0b010 | 0b110) => VectorOp::WaddW,
        _ => return Err(DecodeError::IllegalInstruction),
    };
    Ok(Instruction::VArith {
        op,
        dest,
        src2,
        operand,
        masked,
    })
}

/// Andes custom-0: GP-relative byte accesses and `addigp`.
fn decode_custom_0(raw: u32, isa: &IsaConfig) -> Result<Instruction, DecodeError> {
    require(isa, Extension::Xandes)?;
    let load_offset = sext_imm(
        field(raw, 31, 31, 17)
            | field(raw, 16, 15, 15)
            | field(raw, 19, 17, 12)
            | field(raw, 20, 20, 11)
            | field(raw, 30, 21, 1)
            | field(raw, 14, 14, 0),
        18,
    );
    match (raw >> 12) & 0b11 {
        0b00 => Ok(Instruction::LoadGp {
            width: LoadWidth::Lb,
            dest: rd(raw),
            offset: load_offset,
        }),
        0b01 => Ok(Instruction::AddiGp {
            dest: rd(raw),
            offset: load_offset,
        }),
        0b10 => Ok(Instruction::LoadGp {
            width: LoadWidth::Lbu,
            dest: rd(raw),
            offset: load_offset,
        }),
        _ => Ok(Instruction::StoreGp {
            width: StoreWidth::Sb,
            src: rs2(raw),
            offset: sext_imm(
                field(raw, 31, 31, 17)
                    | field(raw, 16, 15, 15)
                    | field(raw, 19, 17, 12)
                    | field(raw, 7, 7, 11)
                    | field(raw, 30, 25, 5)
                    | field(raw, 11, 8, 1)
                    | field(raw, 14, 14, 0),
                18,
            ),
        }),
    }
}

/// Andes custom-1: GP-relative halfword, word and doubleword accesses.
fn decode_custom_1(raw: u32, isa: &IsaConfig) -> Result<Instruction, DecodeError> {
    require(isa, Extension::Xandes)?;
    let common = field(raw, 16, 15, 15) | field(raw, 19, 17, 12);
    let half_load = sext_imm(
        common | field(raw, 31, 31, 17) | field(raw, 20, 20, 11) | field(raw, 30, 21, 1),
        18,
    );
    let word_load = sext_imm(
        common
            | field(raw, 31, 31, 18)
            | field(raw, 21, 21, 17)
            | field(raw, 20, 20, 11)
            | field(raw, 30, 22, 2),
        19,
    );
    let store_common = common | field(raw, 7, 7, 11) | field(raw, 30, 25, 5);
    let load = |width, offset| {
        Ok(Instruction::LoadGp {
            width,
            dest: rd(raw),
            offset,
        })
    };
    let store = |width, offset| {
        Ok(Instruction::StoreGp {
            width,
            src: rs2(raw),
            offset,
        })
    };
    match funct3(raw) {
        0b000 => store(
            StoreWidth::Sh,
            sext_imm(
                store_common | field(raw, 31, 31, 17) | field(raw, 11, 8, 1),
                18,
            ),
        ),
        0b001 => load(LoadWidth::Lh, half_load),
        0b010 => load(LoadWidth::Lw, word_load),
        0b011 => {
            require_xlen(isa, Xlen::Rv64)?;
            load(
                LoadWidth::Ld,
                sext_imm(
                    common
                        | field(raw, 31, 31, 19)
                        | field(raw, 22, 21, 17)
                        | field(raw, 20, 20, 11)
                        | field(raw, 30, 23, 3),
                    20,
                ),
            )
        }
        0b100 => store(
            StoreWidth::Sw,
            sext_imm(
                store_common
                    | field(raw, 31, 31, 18)
                    | field(raw, 8, 8, 17)
                    | field(raw, 11, 9, 2),
                19,
            ),
        ),
        0b101 => load(LoadWidth::Lhu, half_load),
        0b110 => load(LoadWidth::Lwu, word_load),
        _ => {
            require_xlen(isa, Xlen::Rv64)?;
            store(
                StoreWidth::Sd,
                sext_imm(
                    store_common
                        | field(raw, 31, 31, 19)
                        | field(raw, 9, 8, 17)
                        | field(raw, 11, 10, 3),
                    20,
                ),
            )
        }
    }
}

/// Andes custom-2 (RV64 only): address generation, byte search, bitfield extraction and
/// compare-with-immediate branches.
fn decode_custom_2(raw: u32) -> Result<Instruction, DecodeError> {
    let (dest, src1, src2) = (rd(raw), rs1(raw), rs2(raw));
    let branch_offset = sext_imm(
        field(raw, 31, 31, 10) | field(raw, 29, 25, 5) | field(raw, 11, 8, 1),
        11,
    );
    match funct3(raw) {
        0b000 => {
            let lea = |shift, zero_extend| {
                Ok(Instruction::Lea {
                    shift,
                    zero_extend,
                    dest,
                    src1,
                    src2,
                })
            };
            let find = |op| {
                Ok(Instruction::FindByte {
                    op,
                    dest,
                    src1,
                    src2,
                })
            };
            match funct7(raw) {
                0x05 => lea(1, false),
                0x06 => lea(2, false),
                0x07 => lea(3, false),
                0x08 => lea(0, true),
                0x09 => lea(1, true),
                0x0A => lea(2, true),
                0x0B => lea(3, true),
                0x10 => find(FindByteOp::Ffb),
                0x11 => find(FindByteOp::Ffzmism),
                0x12 => find(FindByteOp::Ffmism),
                0x13 => find(FindByteOp::Flmism),
                _ => Err(DecodeError::IllegalInstruction),
            }
        }
        0b010 | 0b011 => Ok(Instruction::BitfieldExtract {
            signed: funct3(raw) == 0b011,
            dest,
            src: src1,
            msb: (raw >> 26) & 0x3F,
            lsb: (raw >> 20) & 0x3F,
        }),
        0b101 | 0b110 => Ok(Instruction::BranchImmediate {
            condition: if funct3(raw) == 0b101 {
                ImmediateBranchCondition::Beqc
            } else {
                ImmediateBranchCondition::Bnec
            },
            src: src1,
            immediate: field(raw, 30, 30, 6) | field(raw, 7, 7, 5) | field(raw, 24, 20, 0),
            offset: branch_offset,
        }),
        0b111 => Ok(Instruction::BranchBit {
            set: (raw >> 30) & 1 == 1,
            src: src1,
            bit: field(raw, 7, 7, 5) | field(raw, 24, 20, 0),
            offset: branch_offset,
        }),
        _ => Err(DecodeError::IllegalInstruction),
    }
}

/// Returns the 5-bit *rd* value for R-type, I-type, U-type, J-type instructions.
fn rd(raw_instruction: u32) -> Specifier {
    Specifier::from_u5(((raw_instruction >> 7) & 0x1F) as u8)
}

/// Returns the 5-bit *rs1* value for R-type, I-type, S-type, B-type instructions.
fn rs1(raw_instruction: u32) -> Specifier {
    Specifier::from_u5(((raw_instruction >> 15) & 0x1F) as u8)
}

/// Returns the 5-bit *rs2* value for R-type, S-type, B-type instructions.
fn rs2(raw_instruction: u32) -> Specifier {
    Specifier::from_u5(((raw_instruction >> 20) & 0x1F) as u8)
}

fn b_funct(raw_instruction: u32) -> Option<BranchCondition> {
    match funct3(raw_instruction) {
        0b000 => Some(BranchCondition::Beq),
        0b001 => Some(BranchCondition::Bne),
        0b100 => Some(BranchCondition::Blt),
        0b101 => Some(BranchCondition::Bge),
        0b110 => Some(BranchCondition::Bltu),
        0b111 => Some(BranchCondition::Bgeu),
        _ => None,
    }
}

/// Returns the 3-bit *funct3* value for R-type, I-type, S-type, B-type instructions.
fn funct3(raw_instruction: u32) -> u8 {
    ((raw_instruction >> 12) & 0b111) as u8
}

/// Returns the 7-bit *funct7* value for R-type instructions.
fn funct7(raw_instruction: u32) -> u8 {
    (raw_instruction >> 25) as u8
}

/// Returns the 12-bit I-immediate sign-extended to 32 bits.
fn i_imm(raw_instruction: u32) -> i32 {
    raw_instruction as i32 >> 20
}

/// Returns the 12-bit S-immediate sign-extended to 32 bits.
fn s_imm(raw_instruction: u32) -> i32 {
    let imm_11_5 = raw_instruction & 0xFE00_0000;
    let imm_4_0 = raw_instruction & 0x0000_0F80;
    (imm_11_5 | (imm_4_0 << 13)) as i32 >> 20
}

/// Returns the 13-bit B-immediate sign-extended to 32 bits.
fn b_imm(raw_instruction: u32) -> i32 {
    let imm_12 = raw_instruction & 0x8000_0000;
    let imm_10_5 = raw_instruction & 0x7E00_0000;
    let imm_4_1 = raw_instruction & 0x0000_0F00;
    let imm_11 = raw_instruction & 0x0000_0080;
    (imm_12 | (imm_11 << 23) | (imm_10_5 >> 1) | (imm_4_1 << 12)) as i32 >> 19
}

/// Returns the signed 32-bit U-immediate.
fn u_imm(raw_instruction: u32) -> i32 {
    (raw_instruction & 0xFFFF_F000) as i32
}

/// Returns the 21-bit J-immediate sign-extended to 32 bits.
fn j_imm(raw_instruction: u32) -> i32 {
    let imm_20 = raw_instruction & 0x8000_0000;
    let imm_10_1 = raw_instruction & 0x7FE0_0000;
    let imm_11 = raw_instruction & 0x0010_0000;
    let imm_19_12 = raw_instruction & 0x000F_F000;
    (imm_20 | (imm_19_12 << 11) | (imm_11 << 2) | (imm_10_1 >> 9)) as i32 >> 11
}
