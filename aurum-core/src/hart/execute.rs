use log::info;

use super::mmu::{AccessKind, Mmu};
use super::{Exception, ExecutionResult, Fault, Hart, Reservation};
use crate::bits::{self, w32, w64};
use crate::config::{Extension, Xlen};
use crate::csr::CsrSpecifier;
use crate::instruction::{
    AmoOp, AmoWidth, CsrOp, FenceOrderCombination, FindByteOp, ImmediateBranchCondition,
    LoadWidth, StoreWidth,
};
use crate::memory::PhysicalMemory;
use crate::registers::Specifier;
use crate::trace::{ControlFlow, JumpHint, LastWrite};
use crate::PrivilegeLevel;

/// SBI legacy extension ID of `sbi_shutdown`.
const SBI_SHUTDOWN: u128 = 8;

#[derive(Debug)]
pub(super) struct Executor<'a> {
    pub hart: &'a mut Hart,
    pub memory: &'a mut PhysicalMemory,
    /// Raw bits of the instruction, reported as tval of illegal instructions.
    pub raw: u32,
    /// Length of the instruction in bytes.
    pub length: u64,
}

impl<'a> Executor<'a> {
    /// Executes an `addi` instruction.
    ///
    /// Corresponds to the assembly instruction `addi dest src immediate`.
    ///
    /// > ADDI adds the sign-extended 12-bit immediate to register rs1. Arithmetic overflow is
    /// > ignored and the result is simply the low XLEN bits of the result. ADDI rd, rs1, 0 is used
    /// > to implement the MV rd, rs1 assembler pseudoinstruction.
    pub fn addi(&mut self, dest: Specifier, src: Specifier, immediate: i32) -> ExecutionResult {
        self.reg_imm_op(dest, src, immediate, |s, imm| s.wrapping_add(imm))
    }

    /// Executes a `slti` instruction.
    ///
    /// > SLTI (set less than immediate) places the value 1 in register rd if register rs1 is less
    /// > than the sign-extended immediate when both are treated as signed numbers, else 0 is
    /// > written to rd.
    pub fn slti(&mut self, dest: Specifier, src: Specifier, immediate: i32) -> ExecutionResult {
        self.reg_imm_op(dest, src, immediate, |s, imm| {
            ((s as i128) < (imm as i128)) as u128
        })
    }

    /// Executes a `sltiu` instruction.
    ///
    /// > SLTIU is similar but compares the values as unsigned numbers (i.e., the immediate is first
    /// > sign-extended to XLEN bits then treated as an unsigned number).
    pub fn sltiu(&mut self, dest: Specifier, src: Specifier, immediate: i32) -> ExecutionResult {
        let xlen = self.xlen();
        self.reg_imm_op(dest, src, immediate, |s, imm| {
            (xlen.zext(s) < xlen.zext(imm)) as u128
        })
    }

    pub fn andi(&mut self, dest: Specifier, src: Specifier, immediate: i32) -> ExecutionResult {
        self.reg_imm_op(dest, src, immediate, |s, imm| s & imm)
    }

    pub fn ori(&mut self, dest: Specifier, src: Specifier, immediate: i32) -> ExecutionResult {
        self.reg_imm_op(dest, src, immediate, |s, imm| s | imm)
    }

    pub fn xori(&mut self, dest: Specifier, src: Specifier, immediate: i32) -> ExecutionResult {
        self.reg_imm_op(dest, src, immediate, |s, imm| s ^ imm)
    }

    /// Executes an `addiw` instruction.
    ///
    /// > ADDIW is an RV64I instruction that adds the sign-extended 12-bit immediate to register
    /// > rs1 and produces the proper sign extension of a 32-bit result in rd.
    pub fn addiw(&mut self, dest: Specifier, src: Specifier, immediate: i32) -> ExecutionResult {
        self.reg_imm_op(dest, src, immediate, |s, imm| {
            sext32((s as u32).wrapping_add(imm as u32))
        })
    }

    /// Executes an `addid` instruction (RV128 only).
    pub fn addid(&mut self, dest: Specifier, src: Specifier, immediate: i32) -> ExecutionResult {
        self.reg_imm_op(dest, src, immediate, |s, imm| {
            sext64((s as u64).wrapping_add(imm as u64))
        })
    }

    /// Executes a `slli` instruction.
    ///
    /// > SLLI is a logical left shift (zeros are shifted into the lower bits).
    pub fn slli(&mut self, dest: Specifier, src: Specifier, shift_amount: u32) -> ExecutionResult {
        self.reg_shamt_op(dest, src, shift_amount, |s, shamt| s << shamt)
    }

    /// Executes a `srli` instruction.
    ///
    /// > SRLI is a logical right shift (zeros are shifted into the upper bits).
    pub fn srli(&mut self, dest: Specifier, src: Specifier, shift_amount: u32) -> ExecutionResult {
        let xlen = self.xlen();
        self.reg_shamt_op(dest, src, shift_amount, |s, shamt| xlen.zext(s) >> shamt)
    }

    /// Executes a `srai` instruction.
    ///
    /// > SRAI is an arithmetic right shift (the original sign bit is copied into the vacated upper
    /// > bits).
    pub fn srai(&mut self, dest: Specifier, src: Specifier, shift_amount: u32) -> ExecutionResult {
        self.reg_shamt_op(dest, src, shift_amount, |s, shamt| {
            ((s as i128) >> shamt) as u128
        })
    }

    pub fn slliw(&mut self, dest: Specifier, src: Specifier, shift_amount: u32) -> ExecutionResult {
        self.reg_shamt_op(dest, src, shift_amount, |s, shamt| sext32((s as u32) << shamt))
    }

    pub fn srliw(&mut self, dest: Specifier, src: Specifier, shift_amount: u32) -> ExecutionResult {
        self.reg_shamt_op(dest, src, shift_amount, |s, shamt| sext32((s as u32) >> shamt))
    }

    pub fn sraiw(&mut self, dest: Specifier, src: Specifier, shift_amount: u32) -> ExecutionResult {
        self.reg_shamt_op(dest, src, shift_amount, |s, shamt| {
            sext32(((s as i32) >> shamt) as u32)
        })
    }

    pub fn sllid(&mut self, dest: Specifier, src: Specifier, shift_amount: u32) -> ExecutionResult {
        self.reg_shamt_op(dest, src, shift_amount, |s, shamt| sext64((s as u64) << shamt))
    }

    pub fn srlid(&mut self, dest: Specifier, src: Specifier, shift_amount: u32) -> ExecutionResult {
        self.reg_shamt_op(dest, src, shift_amount, |s, shamt| sext64((s as u64) >> shamt))
    }

    pub fn sraid(&mut self, dest: Specifier, src: Specifier, shift_amount: u32) -> ExecutionResult {
        self.reg_shamt_op(dest, src, shift_amount, |s, shamt| {
            sext64(((s as i64) >> shamt) as u64)
        })
    }

    /// Executes a `slli.uw` instruction.
    ///
    /// > This instruction takes the least-significant word of rs1, zero-extends it, and shifts it
    /// > left by the immediate.
    pub fn slli_uw(
        &mut self,
        dest: Specifier,
        src: Specifier,
        shift_amount: u32,
    ) -> ExecutionResult {
        self.reg_shamt_op(dest, src, shift_amount, |s, shamt| (s as u32 as u128) << shamt)
    }

    pub fn rori(&mut self, dest: Specifier, src: Specifier, shift_amount: u32) -> ExecutionResult {
        let xlen = self.xlen();
        self.reg_shamt_op(dest, src, shift_amount, |s, shamt| bits::ror(xlen, s, shamt))
    }

    pub fn roriw(&mut self, dest: Specifier, src: Specifier, shift_amount: u32) -> ExecutionResult {
        self.reg_shamt_op(dest, src, shift_amount, |s, shamt| {
            sext32((s as u32).rotate_right(shamt))
        })
    }

    pub fn bclri(&mut self, dest: Specifier, src: Specifier, shift_amount: u32) -> ExecutionResult {
        self.reg_shamt_op(dest, src, shift_amount, |s, shamt| s & !(1 << shamt))
    }

    pub fn bseti(&mut self, dest: Specifier, src: Specifier, shift_amount: u32) -> ExecutionResult {
        self.reg_shamt_op(dest, src, shift_amount, |s, shamt| s | 1 << shamt)
    }

    pub fn binvi(&mut self, dest: Specifier, src: Specifier, shift_amount: u32) -> ExecutionResult {
        self.reg_shamt_op(dest, src, shift_amount, |s, shamt| s ^ 1 << shamt)
    }

    pub fn bexti(&mut self, dest: Specifier, src: Specifier, shift_amount: u32) -> ExecutionResult {
        self.reg_shamt_op(dest, src, shift_amount, |s, shamt| (s >> shamt) & 1)
    }

    /// Executes a `clz` instruction.
    ///
    /// > This instruction counts the number of 0's before the first 1, starting at the
    /// > most-significant bit (i.e., XLEN-1) and progressing to bit 0. Accordingly, if the input is
    /// > 0, the output is XLEN, and if the most-significant bit of the input is a 1, the output is
    /// > 0.
    pub fn clz(&mut self, dest: Specifier, src: Specifier) -> ExecutionResult {
        let xlen = self.xlen();
        self.unary_op(dest, src, |s| bits::clz(xlen, s))
    }

    pub fn ctz(&mut self, dest: Specifier, src: Specifier) -> ExecutionResult {
        let xlen = self.xlen();
        self.unary_op(dest, src, |s| bits::ctz(xlen, s))
    }

    pub fn cpop(&mut self, dest: Specifier, src: Specifier) -> ExecutionResult {
        let xlen = self.xlen();
        self.unary_op(dest, src, |s| bits::cpop(xlen, s))
    }

    pub fn clzw(&mut self, dest: Specifier, src: Specifier) -> ExecutionResult {
        self.unary_op(dest, src, |s| (s as u32).leading_zeros() as u128)
    }

    pub fn ctzw(&mut self, dest: Specifier, src: Specifier) -> ExecutionResult {
        self.unary_op(dest, src, |s| (s as u32).trailing_zeros() as u128)
    }

    pub fn cpopw(&mut self, dest: Specifier, src: Specifier) -> ExecutionResult {
        self.unary_op(dest, src, |s| (s as u32).count_ones() as u128)
    }

    pub fn sext_b(&mut self, dest: Specifier, src: Specifier) -> ExecutionResult {
        self.unary_op(dest, src, |s| s as i8 as i128 as u128)
    }

    pub fn sext_h(&mut self, dest: Specifier, src: Specifier) -> ExecutionResult {
        self.unary_op(dest, src, |s| s as i16 as i128 as u128)
    }

    pub fn zext_h(&mut self, dest: Specifier, src: Specifier) -> ExecutionResult {
        self.unary_op(dest, src, |s| s as u16 as u128)
    }

    /// Executes an `orc.b` instruction.
    ///
    /// > Combines the bits within each byte using bitwise logical OR. This sets the bits of each
    /// > byte in the result rd to all zeros if no bit within the respective byte of rs is set, or
    /// > to all ones if any bit within the respective byte of rs is set.
    pub fn orc_b(&mut self, dest: Specifier, src: Specifier) -> ExecutionResult {
        let xlen = self.xlen();
        self.unary_op(dest, src, |s| bits::orc_b(xlen, s))
    }

    pub fn rev8(&mut self, dest: Specifier, src: Specifier) -> ExecutionResult {
        let xlen = self.xlen();
        self.unary_op(dest, src, |s| bits::rev8(xlen, s))
    }

    /// Executes a `lui` instruction.
    ///
    /// > LUI (load upper immediate) is used to build 32-bit constants and uses the U-type format.
    /// > LUI places the U-immediate value in the top 20 bits of the destination register rd,
    /// > filling in the lowest 12 bits with zeros.
    ///
    /// Note that the bottom 12 bits of `immediate` need not be zero, they will always be discarded.
    pub fn lui(&mut self, dest: Specifier, immediate: i32) -> ExecutionResult {
        self.set_x(dest, (immediate & !0xFFF) as i128 as u128);
        self.advance()
    }

    /// Executes an `auipc` instruction.
    ///
    /// > AUIPC (add upper immediate to pc) is used to build pc-relative addresses and uses the
    /// > U-type format. AUIPC forms a 32-bit offset from the 20-bit U-immediate, filling in the
    /// > lowest 12 bits with zeros, adds this offset to the address of the AUIPC instruction, then
    /// > places the result in register rd.
    pub fn auipc(&mut self, dest: Specifier, immediate: i32) -> ExecutionResult {
        let pc = self.hart.registers.pc() as u128;
        self.set_x(dest, pc.wrapping_add((immediate & !0xFFF) as i128 as u128));
        self.advance()
    }

    /// Executes an `add` instruction.
    ///
    /// > ADD performs the addition of rs1 and rs2.
    pub fn add(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        self.reg_reg_op(dest, src1, src2, |s1, s2| s1.wrapping_add(s2))
    }

    /// Executes a `sub` instruction.
    ///
    /// > SUB performs the subtraction of rs2 from rs1.
    pub fn sub(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        self.reg_reg_op(dest, src1, src2, |s1, s2| s1.wrapping_sub(s2))
    }

    /// Executes a `slt` instruction.
    ///
    /// > SLT and SLTU perform signed and unsigned compares respectively, writing 1 to rd if
    /// > rs1 < rs2, 0 otherwise.
    pub fn slt(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        self.reg_reg_op(dest, src1, src2, |s1, s2| ((s1 as i128) < (s2 as i128)) as u128)
    }

    pub fn sltu(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        let xlen = self.xlen();
        self.reg_reg_op(dest, src1, src2, |s1, s2| {
            (xlen.zext(s1) < xlen.zext(s2)) as u128
        })
    }

    pub fn and(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        self.reg_reg_op(dest, src1, src2, |s1, s2| s1 & s2)
    }

    pub fn or(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        self.reg_reg_op(dest, src1, src2, |s1, s2| s1 | s2)
    }

    pub fn xor(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        self.reg_reg_op(dest, src1, src2, |s1, s2| s1 ^ s2)
    }

    /// Executes a `sll` instruction.
    ///
    /// > SLL, SRL, and SRA perform logical left, logical right, and arithmetic right shifts on the
    /// > value in register rs1 by the shift amount held in the lower 5 bits of register rs2.
    ///
    /// The shift amount uses the low log2(XLEN) bits of rs2.
    pub fn sll(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        let mask = self.xlen().shamt_mask();
        self.reg_reg_op(dest, src1, src2, |s1, s2| s1 << (s2 as u32 & mask))
    }

    pub fn srl(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        let xlen = self.xlen();
        let mask = xlen.shamt_mask();
        self.reg_reg_op(dest, src1, src2, |s1, s2| xlen.zext(s1) >> (s2 as u32 & mask))
    }

    pub fn sra(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        let mask = self.xlen().shamt_mask();
        self.reg_reg_op(dest, src1, src2, |s1, s2| {
            ((s1 as i128) >> (s2 as u32 & mask)) as u128
        })
    }

    pub fn mul(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        self.reg_reg_op(dest, src1, src2, |s1, s2| s1.wrapping_mul(s2))
    }

    /// Executes a `mulh` instruction.
    ///
    /// > MULH, MULHU, and MULHSU perform the same multiplication but return the upper XLEN bits of
    /// > the full 2×XLEN-bit product, for signed×signed, unsigned×unsigned, and signed rs1×unsigned
    /// > rs2 multiplication, respectively.
    pub fn mulh(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        let xlen = self.xlen();
        self.reg_reg_op(dest, src1, src2, |s1, s2| bits::mulh(xlen, s1, s2))
    }

    pub fn mulhsu(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        let xlen = self.xlen();
        self.reg_reg_op(dest, src1, src2, |s1, s2| bits::mulhsu(xlen, s1, s2))
    }

    pub fn mulhu(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        let xlen = self.xlen();
        self.reg_reg_op(dest, src1, src2, |s1, s2| bits::mulhu(xlen, s1, s2))
    }

    /// Executes a `div` instruction.
    ///
    /// > The quotient of division by zero has all bits set, and the remainder of division by zero
    /// > equals the dividend. Signed division overflow occurs only when the most-negative integer
    /// > is divided by -1. The quotient of a signed division with overflow is equal to the
    /// > dividend, and the remainder is zero.
    pub fn div(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        let xlen = self.xlen();
        self.reg_reg_op(dest, src1, src2, |s1, s2| bits::div(xlen, s1, s2))
    }

    pub fn divu(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        let xlen = self.xlen();
        self.reg_reg_op(dest, src1, src2, |s1, s2| bits::divu(xlen, s1, s2))
    }

    pub fn rem(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        let xlen = self.xlen();
        self.reg_reg_op(dest, src1, src2, |s1, s2| bits::rem(xlen, s1, s2))
    }

    pub fn remu(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        let xlen = self.xlen();
        self.reg_reg_op(dest, src1, src2, |s1, s2| bits::remu(xlen, s1, s2))
    }

    pub fn addw(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        self.reg_reg_op(dest, src1, src2, |s1, s2| {
            sext32((s1 as u32).wrapping_add(s2 as u32))
        })
    }

    pub fn subw(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        self.reg_reg_op(dest, src1, src2, |s1, s2| {
            sext32((s1 as u32).wrapping_sub(s2 as u32))
        })
    }

    pub fn sllw(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        self.reg_reg_op(dest, src1, src2, |s1, s2| sext32((s1 as u32) << (s2 & 0x1F)))
    }

    pub fn srlw(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        self.reg_reg_op(dest, src1, src2, |s1, s2| sext32((s1 as u32) >> (s2 & 0x1F)))
    }

    pub fn sraw(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        self.reg_reg_op(dest, src1, src2, |s1, s2| {
            sext32(((s1 as i32) >> (s2 & 0x1F)) as u32)
        })
    }

    pub fn mulw(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        self.reg_reg_op(dest, src1, src2, |s1, s2| {
            sext32((s1 as u32).wrapping_mul(s2 as u32))
        })
    }

    pub fn divw(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        self.reg_reg_op(dest, src1, src2, |s1, s2| sext32(w32::div(s1 as u32, s2 as u32)))
    }

    pub fn divuw(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        self.reg_reg_op(dest, src1, src2, |s1, s2| sext32(w32::divu(s1 as u32, s2 as u32)))
    }

    pub fn remw(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        self.reg_reg_op(dest, src1, src2, |s1, s2| sext32(w32::rem(s1 as u32, s2 as u32)))
    }

    pub fn remuw(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        self.reg_reg_op(dest, src1, src2, |s1, s2| sext32(w32::remu(s1 as u32, s2 as u32)))
    }

    pub fn addd(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        self.reg_reg_op(dest, src1, src2, |s1, s2| {
            sext64((s1 as u64).wrapping_add(s2 as u64))
        })
    }

    pub fn subd(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        self.reg_reg_op(dest, src1, src2, |s1, s2| {
            sext64((s1 as u64).wrapping_sub(s2 as u64))
        })
    }

    pub fn slld(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        self.reg_reg_op(dest, src1, src2, |s1, s2| sext64((s1 as u64) << (s2 & 0x3F)))
    }

    pub fn srld(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        self.reg_reg_op(dest, src1, src2, |s1, s2| sext64((s1 as u64) >> (s2 & 0x3F)))
    }

    pub fn srad(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        self.reg_reg_op(dest, src1, src2, |s1, s2| {
            sext64(((s1 as i64) >> (s2 & 0x3F)) as u64)
        })
    }

    pub fn muld(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        self.reg_reg_op(dest, src1, src2, |s1, s2| {
            sext64((s1 as u64).wrapping_mul(s2 as u64))
        })
    }

    pub fn divd(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        self.reg_reg_op(dest, src1, src2, |s1, s2| sext64(w64::div(s1 as u64, s2 as u64)))
    }

    pub fn divud(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        self.reg_reg_op(dest, src1, src2, |s1, s2| sext64(w64::divu(s1 as u64, s2 as u64)))
    }

    pub fn remd(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        self.reg_reg_op(dest, src1, src2, |s1, s2| sext64(w64::rem(s1 as u64, s2 as u64)))
    }

    pub fn remud(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        self.reg_reg_op(dest, src1, src2, |s1, s2| sext64(w64::remu(s1 as u64, s2 as u64)))
    }

    pub fn sh1add(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        self.reg_reg_op(dest, src1, src2, |s1, s2| (s1 << 1).wrapping_add(s2))
    }

    pub fn sh2add(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        self.reg_reg_op(dest, src1, src2, |s1, s2| (s1 << 2).wrapping_add(s2))
    }

    pub fn sh3add(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        self.reg_reg_op(dest, src1, src2, |s1, s2| (s1 << 3).wrapping_add(s2))
    }

    /// Executes an `add.uw` instruction.
    ///
    /// > This instruction performs an XLEN-wide addition between rs2 and the zero-extended
    /// > least-significant word of rs1.
    pub fn add_uw(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        self.reg_reg_op(dest, src1, src2, |s1, s2| (s1 as u32 as u128).wrapping_add(s2))
    }

    pub fn sh1add_uw(
        &mut self,
        dest: Specifier,
        src1: Specifier,
        src2: Specifier,
    ) -> ExecutionResult {
        self.reg_reg_op(dest, src1, src2, |s1, s2| {
            ((s1 as u32 as u128) << 1).wrapping_add(s2)
        })
    }

    pub fn sh2add_uw(
        &mut self,
        dest: Specifier,
        src1: Specifier,
        src2: Specifier,
    ) -> ExecutionResult {
        self.reg_reg_op(dest, src1, src2, |s1, s2| {
            ((s1 as u32 as u128) << 2).wrapping_add(s2)
        })
    }

    pub fn sh3add_uw(
        &mut self,
        dest: Specifier,
        src1: Specifier,
        src2: Specifier,
    ) -> ExecutionResult {
        self.reg_reg_op(dest, src1, src2, |s1, s2| {
            ((s1 as u32 as u128) << 3).wrapping_add(s2)
        })
    }

    pub fn andn(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        self.reg_reg_op(dest, src1, src2, |s1, s2| s1 & !s2)
    }

    pub fn orn(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        self.reg_reg_op(dest, src1, src2, |s1, s2| s1 | !s2)
    }

    pub fn xnor(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        self.reg_reg_op(dest, src1, src2, |s1, s2| !(s1 ^ s2))
    }

    pub fn min(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        self.reg_reg_op(dest, src1, src2, |s1, s2| (s1 as i128).min(s2 as i128) as u128)
    }

    pub fn minu(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        let xlen = self.xlen();
        self.reg_reg_op(dest, src1, src2, |s1, s2| xlen.zext(s1).min(xlen.zext(s2)))
    }

    pub fn max(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        self.reg_reg_op(dest, src1, src2, |s1, s2| (s1 as i128).max(s2 as i128) as u128)
    }

    pub fn maxu(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        let xlen = self.xlen();
        self.reg_reg_op(dest, src1, src2, |s1, s2| xlen.zext(s1).max(xlen.zext(s2)))
    }

    pub fn rol(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        let xlen = self.xlen();
        self.reg_reg_op(dest, src1, src2, |s1, s2| bits::rol(xlen, s1, s2 as u32))
    }

    pub fn ror(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        let xlen = self.xlen();
        self.reg_reg_op(dest, src1, src2, |s1, s2| bits::ror(xlen, s1, s2 as u32))
    }

    pub fn rolw(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        self.reg_reg_op(dest, src1, src2, |s1, s2| {
            sext32((s1 as u32).rotate_left(s2 as u32 & 0x1F))
        })
    }

    pub fn rorw(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        self.reg_reg_op(dest, src1, src2, |s1, s2| {
            sext32((s1 as u32).rotate_right(s2 as u32 & 0x1F))
        })
    }

    pub fn clmul(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        let xlen = self.xlen();
        self.reg_reg_op(dest, src1, src2, |s1, s2| bits::clmul(xlen, s1, s2))
    }

    pub fn clmulh(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        let xlen = self.xlen();
        self.reg_reg_op(dest, src1, src2, |s1, s2| bits::clmulh(xlen, s1, s2))
    }

    pub fn clmulr(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        let xlen = self.xlen();
        self.reg_reg_op(dest, src1, src2, |s1, s2| bits::clmulr(xlen, s1, s2))
    }

    pub fn bset(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        let mask = self.xlen().shamt_mask();
        self.reg_reg_op(dest, src1, src2, |s1, s2| s1 | 1 << (s2 as u32 & mask))
    }

    pub fn bclr(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        let mask = self.xlen().shamt_mask();
        self.reg_reg_op(dest, src1, src2, |s1, s2| s1 & !(1 << (s2 as u32 & mask)))
    }

    pub fn binv(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        let mask = self.xlen().shamt_mask();
        self.reg_reg_op(dest, src1, src2, |s1, s2| s1 ^ 1 << (s2 as u32 & mask))
    }

    pub fn bext(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        let mask = self.xlen().shamt_mask();
        self.reg_reg_op(dest, src1, src2, |s1, s2| (s1 >> (s2 as u32 & mask)) & 1)
    }

    /// Executes a `czero.eqz` instruction.
    ///
    /// > If rs2 contains the value zero, this instruction writes the value zero to rd. Otherwise,
    /// > this instruction copies the contents of rs1 to rd.
    pub fn czero_eqz(
        &mut self,
        dest: Specifier,
        src1: Specifier,
        src2: Specifier,
    ) -> ExecutionResult {
        self.reg_reg_op(dest, src1, src2, |s1, s2| if s2 == 0 { 0 } else { s1 })
    }

    pub fn czero_nez(
        &mut self,
        dest: Specifier,
        src1: Specifier,
        src2: Specifier,
    ) -> ExecutionResult {
        self.reg_reg_op(dest, src1, src2, |s1, s2| if s2 != 0 { 0 } else { s1 })
    }

    pub fn jal(&mut self, dest: Specifier, offset: i32) -> ExecutionResult {
        let target = self.pc_relative(offset);
        self.jump_op(dest, target, JumpHint::classify(dest, None))
    }

    /// Executes a `jalr` instruction.
    ///
    /// > The target address is obtained by adding the sign-extended 12-bit I-immediate to the
    /// > register rs1, then setting the least-significant bit of the result to zero.
    pub fn jalr(&mut self, dest: Specifier, base: Specifier, offset: i32) -> ExecutionResult {
        let target = self.address(base, offset) & !1;
        self.jump_op(dest, target, JumpHint::classify(dest, Some(base)))
    }

    pub fn beq(&mut self, src1: Specifier, src2: Specifier, offset: i32) -> ExecutionResult {
        self.cond_branch(src1, src2, offset, |s1, s2| s1 == s2)
    }

    pub fn bne(&mut self, src1: Specifier, src2: Specifier, offset: i32) -> ExecutionResult {
        self.cond_branch(src1, src2, offset, |s1, s2| s1 != s2)
    }

    pub fn blt(&mut self, src1: Specifier, src2: Specifier, offset: i32) -> ExecutionResult {
        self.cond_branch(src1, src2, offset, |s1, s2| (s1 as i128) < (s2 as i128))
    }

    pub fn bltu(&mut self, src1: Specifier, src2: Specifier, offset: i32) -> ExecutionResult {
        let xlen = self.xlen();
        self.cond_branch(src1, src2, offset, |s1, s2| xlen.zext(s1) < xlen.zext(s2))
    }

    pub fn bge(&mut self, src1: Specifier, src2: Specifier, offset: i32) -> ExecutionResult {
        self.cond_branch(src1, src2, offset, |s1, s2| (s1 as i128) >= (s2 as i128))
    }

    pub fn bgeu(&mut self, src1: Specifier, src2: Specifier, offset: i32) -> ExecutionResult {
        let xlen = self.xlen();
        self.cond_branch(src1, src2, offset, |s1, s2| xlen.zext(s1) >= xlen.zext(s2))
    }

    pub fn lb(&mut self, dest: Specifier, base: Specifier, offset: i32) -> ExecutionResult {
        self.load_op(dest, base, offset, |mmu, address| {
            mmu.read_u8(address).map(|value| value as i8 as i128 as u128)
        })
    }

    pub fn lbu(&mut self, dest: Specifier, base: Specifier, offset: i32) -> ExecutionResult {
        self.load_op(dest, base, offset, |mmu, address| {
            mmu.read_u8(address).map(u128::from)
        })
    }

    pub fn lh(&mut self, dest: Specifier, base: Specifier, offset: i32) -> ExecutionResult {
        self.load_op(dest, base, offset, |mmu, address| {
            mmu.read_u16(address).map(|value| value as i16 as i128 as u128)
        })
    }

    pub fn lhu(&mut self, dest: Specifier, base: Specifier, offset: i32) -> ExecutionResult {
        self.load_op(dest, base, offset, |mmu, address| {
            mmu.read_u16(address).map(u128::from)
        })
    }

    pub fn lw(&mut self, dest: Specifier, base: Specifier, offset: i32) -> ExecutionResult {
        self.load_op(dest, base, offset, |mmu, address| {
            mmu.read_u32(address).map(|value| value as i32 as i128 as u128)
        })
    }

    pub fn lwu(&mut self, dest: Specifier, base: Specifier, offset: i32) -> ExecutionResult {
        self.load_op(dest, base, offset, |mmu, address| {
            mmu.read_u32(address).map(u128::from)
        })
    }

    pub fn ld(&mut self, dest: Specifier, base: Specifier, offset: i32) -> ExecutionResult {
        self.load_op(dest, base, offset, |mmu, address| {
            mmu.read_u64(address).map(|value| value as i64 as i128 as u128)
        })
    }

    pub fn ldu(&mut self, dest: Specifier, base: Specifier, offset: i32) -> ExecutionResult {
        self.load_op(dest, base, offset, |mmu, address| {
            mmu.read_u64(address).map(u128::from)
        })
    }

    pub fn lq(&mut self, dest: Specifier, base: Specifier, offset: i32) -> ExecutionResult {
        self.load_op(dest, base, offset, |mmu, address| mmu.read_u128(address))
    }

    pub fn sb(&mut self, src: Specifier, base: Specifier, offset: i32) -> ExecutionResult {
        self.store_op(src, base, offset, |mmu, address, value| {
            mmu.write_u8(address, value as u8)
        })
    }

    pub fn sh(&mut self, src: Specifier, base: Specifier, offset: i32) -> ExecutionResult {
        self.store_op(src, base, offset, |mmu, address, value| {
            mmu.write_u16(address, value as u16)
        })
    }

    pub fn sw(&mut self, src: Specifier, base: Specifier, offset: i32) -> ExecutionResult {
        self.store_op(src, base, offset, |mmu, address, value| {
            mmu.write_u32(address, value as u32)
        })
    }

    pub fn sd(&mut self, src: Specifier, base: Specifier, offset: i32) -> ExecutionResult {
        self.store_op(src, base, offset, |mmu, address, value| {
            mmu.write_u64(address, value as u64)
        })
    }

    pub fn sq(&mut self, src: Specifier, base: Specifier, offset: i32) -> ExecutionResult {
        self.store_op(src, base, offset, |mmu, address, value| mmu.write_u128(address, value))
    }

    pub fn fence(
        &mut self,
        _predecessor: FenceOrderCombination,
        _successor: FenceOrderCombination,
    ) -> ExecutionResult {
        // Harts run one at a time and memory accesses complete immediately, so every fence is a
        // nop.
        self.advance()
    }

    pub fn fence_i(&mut self) -> ExecutionResult {
        self.advance()
    }

    /// Executes an `ecall` instruction.
    ///
    /// With `terminate_on_shutdown`, the legacy SBI shutdown call made from M-mode stops the hart
    /// instead of trapping, using a0 as the exit code.
    pub fn ecall(&mut self) -> ExecutionResult {
        let hart = &mut *self.hart;
        if hart.terminate_on_shutdown
            && hart.privilege == PrivilegeLevel::Machine
            && hart.registers.x(Specifier::A7) == SBI_SHUTDOWN
        {
            let code = hart.registers.x(Specifier::A0) as i64;
            info!("Hart {} powered off with exit code {code}", hart.id);
            hart.terminate = Some(code);
            hart.batch_ended = true;
            return self.advance();
        }
        Err(Fault::new(Exception::environment_call(hart.privilege), 0))
    }

    pub fn ebreak(&mut self) -> ExecutionResult {
        Err(Fault::new(Exception::Breakpoint, 0))
    }

    /// Executes an `sret` instruction.
    ///
    /// > When TSR=1, attempts to execute SRET while executing in S-mode will raise an
    /// > illegal-instruction exception.
    pub fn sret(&mut self) -> ExecutionResult {
        let privilege = self.hart.effective_csr_privilege();
        if privilege < PrivilegeLevel::Supervisor
            || (privilege == PrivilegeLevel::Supervisor && self.hart.status.tsr())
        {
            return Err(self.illegal());
        }
        self.hart.sret();
        self.hart.batch_ended = true;
        Ok(ControlFlow::Jump(JumpHint::None))
    }

    pub fn mret(&mut self) -> ExecutionResult {
        if self.hart.effective_csr_privilege() < PrivilegeLevel::Machine {
            return Err(self.illegal());
        }
        self.hart.mret();
        self.hart.batch_ended = true;
        Ok(ControlFlow::Jump(JumpHint::None))
    }

    pub fn dret(&mut self) -> ExecutionResult {
        if !self.hart.debug_mode {
            return Err(self.illegal());
        }
        self.hart.dret();
        self.hart.batch_ended = true;
        Ok(ControlFlow::Jump(JumpHint::None))
    }

    /// Executes a `wfi` instruction.
    ///
    /// > When TW=1, then if WFI is executed in any less-privileged mode, and it does not complete
    /// > within an implementation-specific, bounded time limit, the WFI instruction causes an
    /// > illegal-instruction exception.
    ///
    /// The time limit is zero, and `wfi` is never allowed in U-mode. Otherwise the hart powers
    /// down until an interrupt is pending.
    pub fn wfi(&mut self) -> ExecutionResult {
        let privilege = self.hart.effective_csr_privilege();
        if privilege == PrivilegeLevel::User
            || (privilege == PrivilegeLevel::Supervisor && self.hart.status.tw())
        {
            return Err(self.illegal());
        }
        let hart = &mut *self.hart;
        if !hart.interrupts.any_pending_enabled() {
            hart.power_down = true;
            hart.batch_ended = true;
        }
        self.advance()
    }

    /// Executes an `sfence.vma` instruction.
    ///
    /// All TLBs are flushed regardless of the address and ASID operands.
    pub fn sfence_vma(&mut self, _vaddr: Specifier, _asid: Specifier) -> ExecutionResult {
        let privilege = self.hart.effective_csr_privilege();
        if privilege < PrivilegeLevel::Supervisor
            || (privilege == PrivilegeLevel::Supervisor && self.hart.status.tvm())
        {
            return Err(self.illegal());
        }
        self.hart.flush_tlbs();
        self.hart.batch_ended = true;
        self.advance()
    }

    /// Executes one of the Zicsr instructions, `source` being rs1 or the zero-extended immediate.
    pub fn csr(
        &mut self,
        op: CsrOp,
        dest: Specifier,
        csr: CsrSpecifier,
        source: u128,
        source_is_zero: bool,
    ) -> ExecutionResult {
        self.hart
            .execute_csr(op, dest, csr, source, source_is_zero)
            .map_err(|exception| Fault::new(exception, self.raw as u64))?;
        self.advance()
    }

    /// Executes an `lr.w`, `lr.d` or `lr.q` instruction.
    ///
    /// > LR.W loads a word from the address in rs1, places the sign-extended value in rd, and
    /// > registers a reservation set—a set of bytes that subsumes the bytes in the addressed word.
    pub fn lr(&mut self, width: AmoWidth, dest: Specifier, address: Specifier) -> ExecutionResult {
        let address = self.address(address, 0);
        if address % width.bytes() != 0 {
            return Err(Fault::new(Exception::LoadAddressMisaligned, address));
        }
        let mut buf = [0u8; 16];
        let buf = &mut buf[..width.bytes() as usize];
        self.mmu().read(address, buf, AccessKind::Load)?;
        let value = sext_le(buf);
        self.hart.reservation = Some(Reservation {
            address,
            sequence: self.memory.store_sequence(),
        });
        self.set_x(dest, value);
        self.advance()
    }

    /// Executes an `sc.w`, `sc.d` or `sc.q` instruction.
    ///
    /// > SC.W conditionally writes a word in rs2 to the address in rs1: the SC.W succeeds only if
    /// > the reservation is still valid and the reservation set contains the bytes being written.
    /// > If the SC.W succeeds, the instruction writes the word in rs2 to memory, and it writes zero
    /// > to rd. If the SC.W fails, the instruction does not write to memory, and it writes a
    /// > nonzero value to rd. Regardless of success or failure, executing an SC.W instruction
    /// > invalidates any reservation held by this hart.
    pub fn sc(
        &mut self,
        width: AmoWidth,
        dest: Specifier,
        address: Specifier,
        src: Specifier,
    ) -> ExecutionResult {
        let address = self.address(address, 0);
        if address % width.bytes() != 0 {
            return Err(Fault::new(Exception::StoreOrAmoAddressMisaligned, address));
        }
        let reservation = self.hart.reservation.take();
        let valid = reservation
            == Some(Reservation {
                address,
                sequence: self.memory.store_sequence(),
            });
        if valid {
            let bytes = self.x(src).to_le_bytes();
            self.mmu().write(address, &bytes[..width.bytes() as usize])?;
        }
        self.set_x(dest, (!valid) as u128);
        self.advance()
    }

    /// Executes an AMO instruction.
    ///
    /// Both the load and the store are checked as a store, so a fault on either is reported as
    /// a store/AMO fault.
    pub fn amo(
        &mut self,
        op: AmoOp,
        width: AmoWidth,
        dest: Specifier,
        address: Specifier,
        src: Specifier,
    ) -> ExecutionResult {
        let address = self.address(address, 0);
        let size = width.bytes() as usize;
        if address % width.bytes() != 0 {
            return Err(Fault::new(Exception::StoreOrAmoAddressMisaligned, address));
        }
        let mut buf = [0u8; 16];
        self.mmu().read(address, &mut buf[..size], AccessKind::Store)?;
        let width_bits = size as u32 * 8;
        let old = sext_le(&buf[..size]);
        let operand = bits::sext(self.x(src), width_bits);
        let new = match op {
            AmoOp::Swap => operand,
            AmoOp::Add => old.wrapping_add(operand),
            AmoOp::Xor => old ^ operand,
            AmoOp::And => old & operand,
            AmoOp::Or => old | operand,
            AmoOp::Min => (old as i128).min(operand as i128) as u128,
            AmoOp::Max => (old as i128).max(operand as i128) as u128,
            AmoOp::Minu => bits::zext(old, width_bits).min(bits::zext(operand, width_bits)),
            AmoOp::Maxu => bits::zext(old, width_bits).max(bits::zext(operand, width_bits)),
        };
        self.mmu().write(address, &new.to_le_bytes()[..size])?;
        self.set_x(dest, old);
        self.advance()
    }

    /// Executes one of the Andes gp-relative loads (`lbgp`, `lhgp`, ...).
    pub fn load_gp(&mut self, width: LoadWidth, dest: Specifier, offset: i32) -> ExecutionResult {
        let op = match width {
            LoadWidth::Lb => Self::lb,
            LoadWidth::Lh => Self::lh,
            LoadWidth::Lw => Self::lw,
            LoadWidth::Ld => Self::ld,
            LoadWidth::Lq => Self::lq,
            LoadWidth::Lbu => Self::lbu,
            LoadWidth::Lhu => Self::lhu,
            LoadWidth::Lwu => Self::lwu,
            LoadWidth::Ldu => Self::ldu,
        };
        op(self, dest, Specifier::GP, offset)
    }

    /// Executes one of the Andes gp-relative stores (`sbgp`, `shgp`, ...).
    pub fn store_gp(&mut self, width: StoreWidth, src: Specifier, offset: i32) -> ExecutionResult {
        let op = match width {
            StoreWidth::Sb => Self::sb,
            StoreWidth::Sh => Self::sh,
            StoreWidth::Sw => Self::sw,
            StoreWidth::Sd => Self::sd,
            StoreWidth::Sq => Self::sq,
        };
        op(self, src, Specifier::GP, offset)
    }

    pub fn addi_gp(&mut self, dest: Specifier, offset: i32) -> ExecutionResult {
        self.addi(dest, Specifier::GP, offset)
    }

    /// Executes an Andes `lea.*` instruction: `rs1 + (rs2 << shift)`, where the `.ze` forms
    /// zero-extend the low word of rs2 first.
    pub fn lea(
        &mut self,
        shift: u32,
        zero_extend: bool,
        dest: Specifier,
        src1: Specifier,
        src2: Specifier,
    ) -> ExecutionResult {
        self.reg_reg_op(dest, src1, src2, |s1, s2| {
            let index = if zero_extend { s2 & 0xFFFF_FFFF } else { s2 };
            s1.wrapping_add(index << shift)
        })
    }

    /// Executes one of the Andes byte search instructions.
    ///
    /// The result is the index of the matching byte minus 8, or 0 if no byte matches.
    pub fn find_byte(
        &mut self,
        op: FindByteOp,
        dest: Specifier,
        src1: Specifier,
        src2: Specifier,
    ) -> ExecutionResult {
        self.reg_reg_op(dest, src1, src2, |s1, s2| {
            let a = (s1 as u64).to_le_bytes();
            let b = (s2 as u64).to_le_bytes();
            let found = match op {
                FindByteOp::Ffb => (0..8).find(|&i| a[i] == b[0]),
                FindByteOp::Ffzmism => (0..8).find(|&i| a[i] == 0 || a[i] != b[i]),
                FindByteOp::Ffmism => (0..8).find(|&i| a[i] != b[i]),
                FindByteOp::Flmism => (0..8).rev().find(|&i| a[i] != b[i]),
            };
            found.map_or(0, |i| (i as i128 - 8) as u128)
        })
    }

    /// Executes an Andes `bfoz`/`bfos` bit-field extract.
    ///
    /// Unverified against hardware for `msb == 0` and `msb < lsb`, where the field is inserted at
    /// `lsb` (or `msb`) instead of extracted.
    pub fn bitfield_extract(
        &mut self,
        signed: bool,
        dest: Specifier,
        src: Specifier,
        msb: u32,
        lsb: u32,
    ) -> ExecutionResult {
        self.unary_op(dest, src, |s| {
            let s = s as u64;
            let result = if signed {
                bfos(s, msb, lsb)
            } else {
                bfoz(s, msb, lsb)
            };
            result as i64 as i128 as u128
        })
    }

    /// Executes an Andes `beqc`/`bnec` instruction, comparing with a zero-extended 7-bit
    /// immediate.
    pub fn branch_immediate(
        &mut self,
        condition: ImmediateBranchCondition,
        src: Specifier,
        immediate: u32,
        offset: i32,
    ) -> ExecutionResult {
        let value = self.xlen().zext(self.x(src));
        let taken = match condition {
            ImmediateBranchCondition::Beqc => value == immediate as u128,
            ImmediateBranchCondition::Bnec => value != immediate as u128,
        };
        self.branch(taken, offset)
    }

    /// Executes an Andes `bbc`/`bbs` instruction, testing bit `bit` of rs1.
    pub fn branch_bit(
        &mut self,
        set: bool,
        src: Specifier,
        bit: u32,
        offset: i32,
    ) -> ExecutionResult {
        let taken = (self.x(src) >> bit) & 1 == set as u128;
        self.branch(taken, offset)
    }

    #[inline]
    pub(super) fn xlen(&self) -> Xlen {
        self.hart.isa.xlen
    }

    #[inline]
    pub(super) fn x(&self, specifier: Specifier) -> u128 {
        self.hart.registers.x(specifier)
    }

    /// Writes an `x` register, sign-extending from XLEN, and records the write.
    pub(super) fn set_x(&mut self, dest: Specifier, value: u128) {
        let value = self.xlen().sext(value);
        self.hart.registers.set_x(dest, value);
        if dest != Specifier::X0 {
            self.hart.write = LastWrite::Gpr {
                register: dest,
                value,
            };
        }
    }

    /// Moves the pc past this instruction.
    pub(super) fn advance(&mut self) -> ExecutionResult {
        let next = self.pc_relative(self.length as i32);
        self.hart.registers.set_pc(next);
        Ok(ControlFlow::Sequential)
    }

    pub(super) fn illegal(&self) -> Fault {
        Fault::new(Exception::IllegalInstruction, self.raw as u64)
    }

    pub(super) fn mmu(&mut self) -> Mmu<'_> {
        Mmu::new(self.hart, self.memory)
    }

    /// Effective address `base + offset`, wrapped to XLEN.
    pub(super) fn address(&self, base: Specifier, offset: i32) -> u64 {
        let address = self.x(base).wrapping_add(offset as i128 as u128);
        self.xlen().zext(address) as u64
    }

    fn pc_relative(&self, offset: i32) -> u64 {
        let pc = self.hart.registers.pc() as u128;
        self.xlen().zext(pc.wrapping_add(offset as i128 as u128)) as u64
    }

    /// Checks a control transfer target against IALIGN.
    ///
    /// > The JAL and JALR instructions will generate an instruction-address-misaligned exception
    /// > if the target address is not aligned to a four-byte boundary.
    fn check_target(&self, target: u64) -> Result<(), Fault> {
        if !self.hart.isa.has(Extension::C) && target & 0b11 != 0 {
            Err(Fault::new(Exception::InstructionAddressMisaligned, 0))
        } else {
            Ok(())
        }
    }

    #[inline]
    fn reg_imm_op<F>(
        &mut self,
        dest: Specifier,
        src: Specifier,
        immediate: i32,
        op: F,
    ) -> ExecutionResult
    where
        F: FnOnce(u128, u128) -> u128,
    {
        let result = op(self.x(src), immediate as i128 as u128);
        self.set_x(dest, result);
        self.advance()
    }

    #[inline]
    fn reg_shamt_op<F>(
        &mut self,
        dest: Specifier,
        src: Specifier,
        shift_amount: u32,
        op: F,
    ) -> ExecutionResult
    where
        F: FnOnce(u128, u32) -> u128,
    {
        let result = op(self.x(src), shift_amount);
        self.set_x(dest, result);
        self.advance()
    }

    #[inline]
    fn reg_reg_op<F>(
        &mut self,
        dest: Specifier,
        src1: Specifier,
        src2: Specifier,
        op: F,
    ) -> ExecutionResult
    where
        F: FnOnce(u128, u128) -> u128,
    {
        let result = op(self.x(src1), self.x(src2));
        self.set_x(dest, result);
        self.advance()
    }

    #[inline]
    fn unary_op<F>(&mut self, dest: Specifier, src: Specifier, op: F) -> ExecutionResult
    where
        F: FnOnce(u128) -> u128,
    {
        let result = op(self.x(src));
        self.set_x(dest, result);
        self.advance()
    }

    fn jump_op(&mut self, dest: Specifier, target: u64, hint: JumpHint) -> ExecutionResult {
        self.check_target(target)?;
        let link = self.pc_relative(self.length as i32);
        self.set_x(dest, link as u128);
        self.hart.registers.set_pc(target);
        Ok(ControlFlow::Jump(hint))
    }

    // Takes the branch if `predicate` returns `true`.
    fn cond_branch<P>(
        &mut self,
        src1: Specifier,
        src2: Specifier,
        offset: i32,
        predicate: P,
    ) -> ExecutionResult
    where
        P: FnOnce(u128, u128) -> bool,
    {
        let taken = predicate(self.x(src1), self.x(src2));
        self.branch(taken, offset)
    }

    fn branch(&mut self, taken: bool, offset: i32) -> ExecutionResult {
        if !taken {
            self.advance()?;
            return Ok(ControlFlow::BranchNotTaken);
        }
        let target = self.pc_relative(offset);
        self.check_target(target)?;
        self.hart.registers.set_pc(target);
        Ok(ControlFlow::BranchTaken)
    }

    #[inline]
    fn load_op<F>(
        &mut self,
        dest: Specifier,
        base: Specifier,
        offset: i32,
        op: F,
    ) -> ExecutionResult
    where
        F: FnOnce(&mut Mmu, u64) -> Result<u128, Fault>,
    {
        let address = self.address(base, offset);
        let value = op(&mut self.mmu(), address)?;
        self.set_x(dest, value);
        self.advance()
    }

    #[inline]
    fn store_op<F>(
        &mut self,
        src: Specifier,
        base: Specifier,
        offset: i32,
        op: F,
    ) -> ExecutionResult
    where
        F: FnOnce(&mut Mmu, u64, u128) -> Result<(), Fault>,
    {
        let address = self.address(base, offset);
        let value = self.x(src);
        op(&mut self.mmu(), address, value)?;
        self.advance()
    }
}

#[inline]
fn sext32(value: u32) -> u128 {
    value as i32 as i128 as u128
}

#[inline]
fn sext64(value: u64) -> u128 {
    value as i64 as i128 as u128
}

/// Sign-extends a little-endian value of up to 16 bytes.
fn sext_le(bytes: &[u8]) -> u128 {
    let mut buf = [0u8; 16];
    buf[..bytes.len()].copy_from_slice(bytes);
    bits::sext(u128::from_le_bytes(buf), bytes.len() as u32 * 8)
}

fn mask(bits: u32) -> u64 {
    if bits >= 64 {
        u64::MAX
    } else {
        (1 << bits) - 1
    }
}

/// All ones above bit `from` if `bit` is set.
fn sign_fill(bit: bool, from: u32) -> u64 {
    if bit {
        !mask(from)
    } else {
        0
    }
}

fn bfoz(s: u64, msb: u32, lsb: u32) -> u64 {
    if msb == 0 {
        (s & 1) << lsb
    } else if msb < lsb {
        (s & mask(lsb - msb + 1)) << msb
    } else {
        (s >> lsb) & mask(msb - lsb + 1)
    }
}

fn bfos(s: u64, msb: u32, lsb: u32) -> u64 {
    if msb == 0 {
        let field = (s & 1) << lsb;
        if lsb < 63 {
            field | sign_fill(s & 1 == 1, lsb + 1)
        } else {
            field
        }
    } else if msb < lsb {
        let lenm1 = lsb - msb;
        let field = (s & mask(lenm1 + 1)) << msb;
        if lsb < 63 {
            field | sign_fill((s >> lenm1) & 1 == 1, lsb + 1)
        } else {
            field
        }
    } else {
        let lenm1 = msb - lsb;
        (s >> lsb) & mask(lenm1 + 1) | sign_fill((s >> msb) & 1 == 1, lenm1 + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AddressRange, IsaConfig};
    use proptest::prelude::*;

    const RAM_BASE: u64 = 0x8000_0000;

    struct Fixture {
        hart: Hart,
        memory: PhysicalMemory,
    }

    impl Fixture {
        fn new(isa: &str) -> Self {
            let hart = Hart::new(0, &IsaConfig::parse(isa).unwrap(), RAM_BASE, false, true);
            let mut memory = PhysicalMemory::new(56);
            memory
                .add_ram(AddressRange::with_size(RAM_BASE, 0x1_0000).unwrap())
                .unwrap();
            Self { hart, memory }
        }

        fn executor(&mut self) -> Executor<'_> {
            Executor {
                hart: &mut self.hart,
                memory: &mut self.memory,
                raw: 0x1234_5678,
                length: 4,
            }
        }

        fn x(&self, index: u8) -> u128 {
            self.hart.registers.x(Specifier::from_u5(index))
        }

        fn set_x(&mut self, index: u8, value: u128) {
            let xlen = self.hart.isa.xlen;
            self.hart
                .registers
                .set_x(Specifier::from_u5(index), xlen.sext(value));
        }
    }

    fn r(index: u8) -> Specifier {
        Specifier::from_u5(index)
    }

    #[test]
    fn test_addi_scenario() {
        let mut f = Fixture::new("rv64gc");
        f.executor().addi(r(5), r(0), 5).unwrap();
        f.executor().addi(r(6), r(5), -3).unwrap();
        assert_eq!(5, f.x(5));
        assert_eq!(2, f.x(6));
        assert_eq!(RAM_BASE + 8, f.hart.registers.pc());
    }

    #[test]
    fn test_x0_is_never_written() {
        let mut f = Fixture::new("rv64gc");
        f.executor().addi(r(0), r(0), 5).unwrap();
        assert_eq!(0, f.x(0));
        assert_eq!(LastWrite::None, f.hart.write);
    }

    #[test]
    fn test_rv32_wraps_and_sign_extends() {
        let mut f = Fixture::new("rv32i");
        f.set_x(1, 0x7FFF_FFFF);
        f.executor().addi(r(2), r(1), 1).unwrap();
        assert_eq!(0xFFFF_FFFF_FFFF_FFFF_FFFF_FFFF_8000_0000, f.x(2));
        f.executor().srli(r(3), r(2), 31).unwrap();
        assert_eq!(1, f.x(3));
        f.executor().sltu(r(4), r(0), r(2)).unwrap();
        assert_eq!(1, f.x(4));
    }

    #[test]
    fn test_word_ops_sign_extend() {
        let mut f = Fixture::new("rv64gc");
        f.set_x(1, 0xFFFF_FFFF);
        f.executor().addiw(r(2), r(1), 1).unwrap();
        assert_eq!(0, f.x(2));
        f.executor().addw(r(3), r(1), r(0)).unwrap();
        assert_eq!(u128::MAX, f.x(3));
        f.set_x(4, 0x8000_0000);
        f.executor().sraiw(r(5), r(4), 4).unwrap();
        assert_eq!(0xFFFF_FFFF_F800_0000, f.x(5) as u64);
    }

    #[test]
    fn test_division_edge_cases() {
        let mut f = Fixture::new("rv64gc");
        f.set_x(1, 1234);
        f.executor().divu(r(2), r(1), r(0)).unwrap();
        f.executor().remu(r(3), r(1), r(0)).unwrap();
        assert_eq!(u64::MAX, f.x(2) as u64);
        assert_eq!(1234, f.x(3));
        f.set_x(4, 1 << 63);
        f.set_x(5, u64::MAX as u128);
        f.executor().div(r(6), r(4), r(5)).unwrap();
        f.executor().rem(r(7), r(4), r(5)).unwrap();
        assert_eq!(1 << 63, f.x(6) as u64);
        assert_eq!(0, f.x(7));
    }

    #[test]
    fn test_mulh() {
        let mut f = Fixture::new("rv64gc");
        f.set_x(1, u64::MAX as u128);
        f.executor().mulhu(r(2), r(1), r(1)).unwrap();
        assert_eq!(u64::MAX - 1, f.x(2) as u64);
        f.executor().mulh(r(3), r(1), r(1)).unwrap();
        assert_eq!(0, f.x(3));
    }

    #[test]
    fn test_bitmanip() {
        let mut f = Fixture::new("rv64gc_zba_zbb_zbs");
        f.set_x(1, 0x10);
        f.executor().clz(r(2), r(1)).unwrap();
        assert_eq!(59, f.x(2));
        f.executor().ctzw(r(3), r(0)).unwrap();
        assert_eq!(32, f.x(3));
        f.set_x(4, 0xFFFF_FFFF_0000_0001);
        f.executor().add_uw(r(5), r(4), r(1)).unwrap();
        assert_eq!(0x11, f.x(5));
        f.executor().bseti(r(6), r(0), 63).unwrap();
        assert_eq!(1 << 63, f.x(6) as u64);
        f.executor().rori(r(7), r(1), 4).unwrap();
        assert_eq!(1, f.x(7));
    }

    #[test]
    fn test_branches_and_hints() {
        let mut f = Fixture::new("rv64gc");
        assert_eq!(
            Ok(ControlFlow::BranchTaken),
            f.executor().beq(r(0), r(0), 0x40)
        );
        assert_eq!(RAM_BASE + 0x40, f.hart.registers.pc());
        assert_eq!(
            Ok(ControlFlow::BranchNotTaken),
            f.executor().bne(r(0), r(0), 0x40)
        );
        assert_eq!(RAM_BASE + 0x44, f.hart.registers.pc());
        assert_eq!(
            Ok(ControlFlow::Jump(JumpHint::Call)),
            f.executor().jal(Specifier::RA, -0x44)
        );
        assert_eq!(RAM_BASE, f.hart.registers.pc());
        assert_eq!(RAM_BASE + 0x48, f.x(1) as u64);
        assert_eq!(
            Ok(ControlFlow::Jump(JumpHint::Return)),
            f.executor().jalr(Specifier::X0, Specifier::RA, 0)
        );
        assert_eq!(RAM_BASE + 0x48, f.hart.registers.pc());
    }

    #[test]
    fn test_misaligned_jump_without_compressed() {
        let mut f = Fixture::new("rv64g");
        assert_eq!(
            Err(Fault::new(Exception::InstructionAddressMisaligned, 0)),
            f.executor().jal(Specifier::RA, 2)
        );
        assert_eq!(0, f.x(1));
        assert_eq!(RAM_BASE, f.hart.registers.pc());
        let mut f = Fixture::new("rv64gc");
        assert!(f.executor().jal(Specifier::RA, 2).is_ok());
    }

    #[test]
    fn test_loads_and_stores() {
        let mut f = Fixture::new("rv64gc");
        f.set_x(1, RAM_BASE as u128 + 0x100);
        f.set_x(2, 0x8081_8283_8485_8687);
        f.executor().sd(r(2), r(1), 0).unwrap();
        f.executor().lb(r(3), r(1), 0).unwrap();
        assert_eq!(0xFFFF_FFFF_FFFF_FF87, f.x(3) as u64);
        f.executor().lhu(r(4), r(1), 2).unwrap();
        assert_eq!(0x8485, f.x(4));
        f.executor().lw(r(5), r(1), 4).unwrap();
        assert_eq!(0xFFFF_FFFF_8081_8283, f.x(5) as u64);
        f.executor().lwu(r(6), r(1), 4).unwrap();
        assert_eq!(0x8081_8283, f.x(6));
    }

    #[test]
    fn test_load_fault_does_not_write() {
        let mut f = Fixture::new("rv64gc");
        f.set_x(3, 77);
        assert_eq!(
            Err(Fault::new(Exception::LoadAccessFault, 0x10)),
            f.executor().ld(r(3), r(0), 0x10)
        );
        assert_eq!(77, f.x(3));
        assert_eq!(RAM_BASE, f.hart.registers.pc());
    }

    #[test]
    fn test_reservation_invalidated_by_store() {
        let mut f = Fixture::new("rv64gc");
        f.set_x(1, RAM_BASE as u128 + 0x200);
        f.set_x(2, 42);
        f.executor().lr(AmoWidth::Double, r(3), r(1)).unwrap();
        f.executor().sd(r(2), r(1), 8).unwrap();
        f.executor().sc(AmoWidth::Double, r(4), r(1), r(2)).unwrap();
        assert_eq!(1, f.x(4));
        assert_eq!(Ok(0), f.memory.read_u64(RAM_BASE + 0x200));

        f.executor().lr(AmoWidth::Double, r(3), r(1)).unwrap();
        f.executor().sc(AmoWidth::Double, r(4), r(1), r(2)).unwrap();
        assert_eq!(0, f.x(4));
        assert_eq!(Ok(42), f.memory.read_u64(RAM_BASE + 0x200));
        // The reservation is gone after any sc.
        f.executor().sc(AmoWidth::Double, r(4), r(1), r(2)).unwrap();
        assert_eq!(1, f.x(4));
    }

    #[test]
    fn test_amo() {
        let mut f = Fixture::new("rv64gc");
        f.set_x(1, RAM_BASE as u128 + 0x300);
        f.memory.write_u32(RAM_BASE + 0x300, 0xFFFF_FFFE).unwrap();
        f.set_x(2, 5);
        f.executor()
            .amo(AmoOp::Add, AmoWidth::Word, r(3), r(1), r(2))
            .unwrap();
        assert_eq!(u128::MAX - 1, f.x(3));
        assert_eq!(Ok(3), f.memory.read_u32(RAM_BASE + 0x300));
        f.executor()
            .amo(AmoOp::Minu, AmoWidth::Word, r(3), r(1), r(2))
            .unwrap();
        assert_eq!(Ok(3), f.memory.read_u32(RAM_BASE + 0x300));
        f.set_x(1, RAM_BASE as u128 + 0x302);
        assert_eq!(
            Err(Fault::new(
                Exception::StoreOrAmoAddressMisaligned,
                RAM_BASE + 0x302
            )),
            f.executor().amo(AmoOp::Add, AmoWidth::Word, r(3), r(1), r(2))
        );
    }

    #[test]
    fn test_amo_load_fault_reported_as_store_fault() {
        let mut f = Fixture::new("rv64gc");
        assert_eq!(
            Err(Fault::new(Exception::StoreOrAmoAccessFault, 0)),
            f.executor().amo(AmoOp::Swap, AmoWidth::Double, r(3), r(0), r(2))
        );
    }

    #[test]
    fn test_wfi_privilege() {
        let mut f = Fixture::new("rv64gc");
        f.hart.privilege = PrivilegeLevel::User;
        assert_eq!(
            Err(Fault::new(Exception::IllegalInstruction, 0x1234_5678)),
            f.executor().wfi()
        );
        assert!(!f.hart.power_down);

        f.hart.privilege = PrivilegeLevel::Supervisor;
        assert_eq!(Ok(ControlFlow::Sequential), f.executor().wfi());
        assert!(f.hart.power_down);
    }

    #[test]
    fn test_ecall_and_privileged_checks() {
        let mut f = Fixture::new("rv64gc");
        assert_eq!(
            Err(Fault::new(Exception::EnvironmentCallFromMMode, 0)),
            f.executor().ecall()
        );
        f.hart.privilege = PrivilegeLevel::Supervisor;
        f.hart.status.set_tw(true);
        assert_eq!(
            Err(Fault::new(Exception::IllegalInstruction, 0x1234_5678)),
            f.executor().wfi()
        );
        assert_eq!(
            Err(Fault::new(Exception::IllegalInstruction, 0x1234_5678)),
            f.executor().mret()
        );
        assert_eq!(
            Err(Fault::new(Exception::IllegalInstruction, 0x1234_5678)),
            f.executor().dret()
        );
        f.hart.privilege = PrivilegeLevel::User;
        assert_eq!(
            Err(Fault::new(Exception::IllegalInstruction, 0x1234_5678)),
            f.executor().sfence_vma(r(0), r(0))
        );
    }

    #[test]
    fn test_andes_lea_and_find_byte() {
        let mut f = Fixture::new("rv64gc_xandes");
        f.set_x(1, 0x1000);
        f.set_x(2, 0xFFFF_FFFF_0000_0004);
        f.executor().lea(3, true, r(3), r(1), r(2)).unwrap();
        assert_eq!(0x1020, f.x(3));
        f.set_x(4, 0x0000_0000_0033_2211);
        f.set_x(5, 0x33);
        f.executor().find_byte(FindByteOp::Ffb, r(6), r(4), r(5)).unwrap();
        assert_eq!(-6i128 as u128, f.x(6));
        f.set_x(5, 0x44);
        f.executor().find_byte(FindByteOp::Ffb, r(6), r(4), r(5)).unwrap();
        assert_eq!(0, f.x(6));
        f.set_x(5, 0x0000_0000_0034_2211);
        f.executor().find_byte(FindByteOp::Ffmism, r(6), r(4), r(5)).unwrap();
        assert_eq!(-6i128 as u128, f.x(6));
        f.executor().find_byte(FindByteOp::Flmism, r(6), r(4), r(5)).unwrap();
        assert_eq!(-6i128 as u128, f.x(6));
        f.executor().find_byte(FindByteOp::Ffzmism, r(6), r(4), r(4)).unwrap();
        assert_eq!(-5i128 as u128, f.x(6));
    }

    #[test]
    fn test_andes_bitfield_extract() {
        assert_eq!(0xAB, bfoz(0x0000_0ABC, 11, 4));
        assert_eq!(0xFFFF_FFFF_FFFF_FFAB, bfos(0x0000_0ABC, 11, 4));
        assert_eq!(1 << 5, bfoz(1, 0, 5));
        assert_eq!(!0u64 << 5, bfos(1, 0, 5));
        assert_eq!(0b11 << 4, bfoz(0b11, 4, 5));
    }

    #[test]
    fn test_andes_branches() {
        let mut f = Fixture::new("rv64gc_xandes");
        f.set_x(1, 0x7F);
        assert_eq!(
            Ok(ControlFlow::BranchTaken),
            f.executor()
                .branch_immediate(ImmediateBranchCondition::Beqc, r(1), 0x7F, 0x10)
        );
        assert_eq!(
            Ok(ControlFlow::BranchNotTaken),
            f.executor().branch_bit(false, r(1), 6, 0x10)
        );
        assert_eq!(
            Ok(ControlFlow::BranchTaken),
            f.executor().branch_bit(true, r(1), 6, 0x10)
        );
        assert_eq!(RAM_BASE + 0x24, f.hart.registers.pc());
    }

    proptest! {
        #[test]
        fn test_narrow_store_load_round_trip(value in any::<u64>(), offset in 0u64..0x1000) {
            let mut f = Fixture::new("rv64gc");
            f.set_x(1, (RAM_BASE + offset * 8) as u128);
            f.set_x(2, value as u128);
            f.executor().sd(r(2), r(1), 0).unwrap();
            f.executor().ld(r(3), r(1), 0).unwrap();
            prop_assert_eq!(value, f.x(3) as u64);
            f.executor().sh(r(2), r(1), 0).unwrap();
            f.executor().lhu(r(4), r(1), 0).unwrap();
            prop_assert_eq!(value as u16 as u128, f.x(4));
        }
    }
}
