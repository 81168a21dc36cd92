//! F, D, Zfh and Zfa instructions, and the `fflags`/`frm`/`fcsr` CSRs.

use rustc_apfloat::ieee::{Double, Half, Single};
use rustc_apfloat::{Float, FloatConvert, Round, Status, StatusAnd};
use serde::{Deserialize, Serialize};

use super::execute::Executor;
use super::mmu::AccessKind;
use super::status::ExtensionContextStatus;
use super::{CsrReadResult, CsrWriteResult, ExecutionResult, Fault, Hart};
use crate::bits;
use crate::instruction::{
    FpArithOp, FpCompareOp, FpFormat, FusedOp, IntFormat, MinMaxOp, SignInjectOp,
};
use crate::registers::{self, Specifier};
use crate::trace::LastWrite;

/// Rounding mode field value selecting the dynamic rounding mode in `frm`.
const DYNAMIC_ROUNDING: u8 = 0b111;

/// Values loaded by `fli`, as single precision bit patterns. Entry 1 is replaced by the minimum
/// positive normal value of the destination format.
const FLI_TABLE: [u32; 32] = [
    0xBF80_0000,
    0x0080_0000,
    0x3780_0000,
    0x3800_0000,
    0x3B80_0000,
    0x3C00_0000,
    0x3D80_0000,
    0x3E00_0000,
    0x3E80_0000,
    0x3EA0_0000,
    0x3EC0_0000,
    0x3EE0_0000,
    0x3F00_0000,
    0x3F20_0000,
    0x3F40_0000,
    0x3F60_0000,
    0x3F80_0000,
    0x3FA0_0000,
    0x3FC0_0000,
    0x3FE0_0000,
    0x4000_0000,
    0x4020_0000,
    0x4040_0000,
    0x4080_0000,
    0x4100_0000,
    0x4180_0000,
    0x4300_0000,
    0x4380_0000,
    0x4700_0000,
    0x4780_0000,
    0x7F80_0000,
    0x7FC0_0000,
];

/// Floating point control and status state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(super) struct FpState {
    /// Accrued exception flags.
    fflags: u8,
    /// Dynamic rounding mode. May hold an invalid mode, which only faults when used.
    frm: u8,
}

#[cfg_attr(not(test), allow(dead_code))]
#[derive(Debug, Copy, Clone)]
pub enum Fflag {
    /// Inexact
    NX = 0,
    /// Underflow
    UF = 1,
    /// Overflow
    OF = 2,
    /// Divide by Zero
    DZ = 3,
    /// Invalid Operation
    NV = 4,
}

const fn status_to_bits(status: Status) -> u8 {
    status.bits().reverse_bits() >> 3
}

pub(super) trait FloatExt: Float {
    fn canonical_nan() -> Self {
        Self::from_bits(registers::canonical_nan(Self::BITS as u32))
    }

    fn canonicalise(self) -> Self {
        if self.is_nan() {
            Self::canonical_nan()
        } else {
            self
        }
    }

    fn sqrt_r(self, round: Round) -> StatusAnd<Self>;
}

impl FloatExt for Single {
    fn sqrt_r(self, round: Round) -> StatusAnd<Self> {
        let (StatusAnd { status, value }, _iterations) =
            ieee_apsqrt::sqrt_accurate(self.to_bits() as u32, round);
        status.and(Self::from_bits(value as u128))
    }
}

impl FloatExt for Double {
    fn sqrt_r(self, round: Round) -> StatusAnd<Self> {
        let (StatusAnd { status, value }, _iterations) =
            ieee_apsqrt::sqrt_accurate(self.to_bits() as u64, round);
        status.and(Self::from_bits(value as u128))
    }
}

impl FloatExt for Half {
    /// Single precision carries more than twice the bits of half precision, so rounding the
    /// single precision root again gives the correctly rounded half precision root.
    fn sqrt_r(self, round: Round) -> StatusAnd<Self> {
        let mut loses_info = false;
        let StatusAnd {
            status: widen_status,
            value: wide,
        }: StatusAnd<Single> = self.convert_r(Round::NearestTiesToEven, &mut loses_info);
        let StatusAnd {
            status: sqrt_status,
            value: root,
        } = wide.sqrt_r(round);
        let StatusAnd { status, value } = root.convert_r(round, &mut loses_info);
        (widen_status | sqrt_status | status).and(value)
    }
}

/// Runs `$body` with `$f` bound to the apfloat type of `$format`.
macro_rules! with_format {
    ($format:expr, $f:ident => $body:expr) => {
        match $format {
            FpFormat::Half => {
                type $f = Half;
                $body
            }
            FpFormat::Single => {
                type $f = Single;
                $body
            }
            FpFormat::Double => {
                type $f = Double;
                $body
            }
        }
    };
}

fn write_masked<T>(old: T, value: u128, mask: u128, width_mask: u128) -> u128
where
    T: Into<u128>,
{
    (old.into() & !mask | value & mask) & width_mask
}

impl Hart {
    pub(super) fn read_fflags(&self) -> CsrReadResult {
        Ok(self.fp.fflags as u128)
    }

    pub(super) fn write_fflags(&mut self, value: u128, mask: u128) -> CsrWriteResult {
        self.fp.fflags = write_masked(self.fp.fflags, value, mask, 0x1F) as u8;
        self.status.set_fs(ExtensionContextStatus::Dirty);
        Ok(())
    }

    pub(super) fn read_frm(&self) -> CsrReadResult {
        Ok(self.fp.frm as u128)
    }

    pub(super) fn write_frm(&mut self, value: u128, mask: u128) -> CsrWriteResult {
        self.fp.frm = write_masked(self.fp.frm, value, mask, 0b111) as u8;
        self.status.set_fs(ExtensionContextStatus::Dirty);
        Ok(())
    }

    /// > The fcsr register is a 32-bit read/write register that selects the dynamic rounding
    /// > mode for floating-point arithmetic operations and holds the accrued exception flags.
    pub(super) fn read_fcsr(&self) -> CsrReadResult {
        Ok((self.fp.frm as u128) << 5 | self.fp.fflags as u128)
    }

    pub(super) fn write_fcsr(&mut self, value: u128, mask: u128) -> CsrWriteResult {
        let fcsr = write_masked(self.read_fcsr()?, value, mask, 0xFF);
        self.fp.fflags = (fcsr & 0x1F) as u8;
        self.fp.frm = (fcsr >> 5) as u8;
        self.status.set_fs(ExtensionContextStatus::Dirty);
        Ok(())
    }
}

impl<'a> Executor<'a> {
    pub fn fp_load(
        &mut self,
        format: FpFormat,
        dest: Specifier,
        base: Specifier,
        offset: i32,
    ) -> ExecutionResult {
        self.check_fp()?;
        let address = self.address(base, offset);
        let mut buf = [0u8; 8];
        let buf = &mut buf[..format.bits() as usize / 8];
        self.mmu().read(address, buf, AccessKind::Load)?;
        let mut value = [0u8; 16];
        value[..buf.len()].copy_from_slice(buf);
        self.set_f(dest, format.bits(), u128::from_le_bytes(value));
        self.advance()
    }

    /// Stores the low bits of an `f` register without checking their NaN boxing.
    pub fn fp_store(
        &mut self,
        format: FpFormat,
        src: Specifier,
        base: Specifier,
        offset: i32,
    ) -> ExecutionResult {
        self.check_fp()?;
        let address = self.address(base, offset);
        let bytes = self.hart.f_registers.raw(src).to_le_bytes();
        self.mmu()
            .write(address, &bytes[..format.bits() as usize / 8])?;
        self.advance()
    }

    /// Executes one of `fmadd`, `fmsub`, `fnmsub` or `fnmadd`.
    ///
    /// > FMADD.S multiplies the values in rs1 and rs2, adds the value in rs3, and writes the final
    /// > result to rd. FMADD.S computes (rs1×rs2)+rs3.
    /// >
    /// > FMSUB.S multiplies the values in rs1 and rs2, subtracts the value in rs3, and writes the
    /// > final result to rd. FMSUB.S computes (rs1×rs2)-rs3.
    /// >
    /// > FNMSUB.S multiplies the values in rs1 and rs2, negates the product, adds the value in
    /// > rs3, and writes the final result to rd. FNMSUB.S computes -(rs1×rs2)+rs3.
    /// >
    /// > FNMADD.S multiplies the values in rs1 and rs2, negates the product, subtracts the value
    /// > in rs3, and writes the final result to rd. FNMADD.S computes -(rs1×rs2)-rs3.
    #[allow(clippy::too_many_arguments)]
    pub fn fp_fused(
        &mut self,
        op: FusedOp,
        format: FpFormat,
        dest: Specifier,
        src1: Specifier,
        src2: Specifier,
        src3: Specifier,
        rounding: u8,
    ) -> ExecutionResult {
        self.check_fp()?;
        let round = self.rounding_mode(rounding)?;
        with_format!(format, F => {
            let a: F = self.f(src1);
            let b: F = self.f(src2);
            let c: F = self.f(src3);
            let result = match op {
                FusedOp::Madd => a.mul_add_r(b, c, round),
                FusedOp::Msub => a.mul_add_r(b, -c, round),
                FusedOp::Nmsub => (-a).mul_add_r(b, c, round),
                FusedOp::Nmadd => (-a).mul_add_r(b, -c, round),
            };
            self.set_f_result(dest, result)
        })
    }

    pub fn fp_arith(
        &mut self,
        op: FpArithOp,
        format: FpFormat,
        dest: Specifier,
        src1: Specifier,
        src2: Specifier,
        rounding: u8,
    ) -> ExecutionResult {
        self.check_fp()?;
        let round = self.rounding_mode(rounding)?;
        with_format!(format, F => {
            let a: F = self.f(src1);
            let b: F = self.f(src2);
            let result = match op {
                FpArithOp::Add => a.add_r(b, round),
                FpArithOp::Sub => a.sub_r(b, round),
                FpArithOp::Mul => a.mul_r(b, round),
                FpArithOp::Div => a.div_r(b, round),
            };
            self.set_f_result(dest, result)
        })
    }

    pub fn fp_sqrt(
        &mut self,
        format: FpFormat,
        dest: Specifier,
        src: Specifier,
        rounding: u8,
    ) -> ExecutionResult {
        self.check_fp()?;
        let round = self.rounding_mode(rounding)?;
        with_format!(format, F => {
            let a: F = self.f(src);
            self.set_f_result(dest, a.sqrt_r(round))
        })
    }

    /// Executes one of `fsgnj`, `fsgnjn` or `fsgnjx`.
    ///
    /// > Sign-injection instructions do not set floating-point exception flags, nor do they
    /// > canonicalize NaNs.
    pub fn fp_sign_inject(
        &mut self,
        op: SignInjectOp,
        format: FpFormat,
        dest: Specifier,
        src1: Specifier,
        src2: Specifier,
    ) -> ExecutionResult {
        self.check_fp()?;
        let width = format.bits();
        let sign = 1u128 << (width - 1);
        let a = self.hart.f_registers.read(src1, width);
        let b = self.hart.f_registers.read(src2, width);
        let new_sign = match op {
            SignInjectOp::Sgnj => b & sign,
            SignInjectOp::Sgnjn => !b & sign,
            SignInjectOp::Sgnjx => (a ^ b) & sign,
        };
        self.set_f(dest, width, a & !sign | new_sign);
        self.advance()
    }

    /// Executes one of `fmin`, `fmax`, `fminm` or `fmaxm`.
    ///
    /// `fmin`/`fmax` return the other operand if exactly one is NaN, while the Zfa `fminm`/`fmaxm`
    /// return the canonical NaN if either is. Both order -0.0 below +0.0.
    pub fn fp_min_max(
        &mut self,
        op: MinMaxOp,
        format: FpFormat,
        dest: Specifier,
        src1: Specifier,
        src2: Specifier,
    ) -> ExecutionResult {
        self.check_fp()?;
        with_format!(format, F => {
            let a: F = self.f(src1);
            let b: F = self.f(src2);
            let cmp: fn(F, F) -> F = match op {
                MinMaxOp::Min | MinMaxOp::Minm => F::minimum,
                MinMaxOp::Max | MinMaxOp::Maxm => F::maximum,
            };
            let propagate_nan = matches!(op, MinMaxOp::Minm | MinMaxOp::Maxm);
            let result = match (a.is_nan(), b.is_nan()) {
                (false, false) => cmp(a, b),
                (true, true) => F::canonical_nan(),
                _ if propagate_nan => F::canonical_nan(),
                (true, false) => b,
                (false, true) => a,
            };
            if a.is_signaling() || b.is_signaling() {
                self.accrue(Status::INVALID_OP);
            }
            self.set_f(dest, F::BITS as u32, result.to_bits());
            self.advance()
        })
    }

    /// Executes a Zfa `fround` or `froundnx`, rounding to an integral value in the same format.
    ///
    /// Only `froundnx` raises the inexact flag.
    pub fn fp_round(
        &mut self,
        format: FpFormat,
        dest: Specifier,
        src: Specifier,
        rounding: u8,
        exact: bool,
    ) -> ExecutionResult {
        self.check_fp()?;
        let round = self.rounding_mode(rounding)?;
        with_format!(format, F => {
            let a: F = self.f(src);
            let result = if a.is_nan() {
                let status = if a.is_signaling() {
                    Status::INVALID_OP
                } else {
                    Status::OK
                };
                status.and(F::canonical_nan())
            } else if a.is_infinite() || a.is_zero() {
                Status::OK.and(a)
            } else {
                let StatusAnd { status, value } = a.round_to_integral(round);
                let status = if exact { status } else { status - Status::INEXACT };
                // Rounding never changes the sign, not even to zero.
                let value = if value.is_zero() && value.is_negative() != a.is_negative() {
                    -value
                } else {
                    value
                };
                status.and(value)
            };
            self.set_f_result(dest, result)
        })
    }

    /// Executes one of `feq`, `flt`, `fle`, `fltq` or `fleq`.
    ///
    /// > FEQ.S performs a quiet comparison: it only sets the invalid operation exception flag if
    /// > either input is a signaling NaN. FLT.S and FLE.S perform what the IEEE 754-2008 standard
    /// > refers to as signaling comparisons: that is, they set the invalid operation exception
    /// > flag if either input is NaN.
    pub fn fp_compare(
        &mut self,
        op: FpCompareOp,
        format: FpFormat,
        dest: Specifier,
        src1: Specifier,
        src2: Specifier,
    ) -> ExecutionResult {
        self.check_fp()?;
        with_format!(format, F => {
            let a: F = self.f(src1);
            let b: F = self.f(src2);
            let invalid = match op {
                FpCompareOp::Eq | FpCompareOp::Ltq | FpCompareOp::Leq => {
                    a.is_signaling() || b.is_signaling()
                }
                FpCompareOp::Lt | FpCompareOp::Le => a.is_nan() || b.is_nan(),
            };
            if invalid {
                self.accrue(Status::INVALID_OP);
            }
            let result = match op {
                FpCompareOp::Eq => a == b,
                FpCompareOp::Lt | FpCompareOp::Ltq => a < b,
                FpCompareOp::Le | FpCompareOp::Leq => a <= b,
            };
            self.set_x(dest, result as u128);
            self.advance()
        })
    }

    /// Executes an `fclass` instruction.
    ///
    /// Exactly one bit in `rd` will be set, all other bits are cleared. Does not set the
    /// floating-point exception flags.
    pub fn fp_class(
        &mut self,
        format: FpFormat,
        dest: Specifier,
        src: Specifier,
    ) -> ExecutionResult {
        self.check_fp()?;
        with_format!(format, F => {
            let a: F = self.f(src);
            let is_neg = a.is_negative();
            let class: u128 = match a {
                _ if a.is_neg_infinity() => 1,
                _ if is_neg && a.is_normal() => 1 << 1,
                _ if is_neg && a.is_denormal() => 1 << 2,
                _ if a.is_neg_zero() => 1 << 3,
                _ if a.is_pos_zero() => 1 << 4,
                _ if a.is_denormal() => 1 << 5,
                _ if a.is_normal() => 1 << 6,
                _ if a.is_pos_infinity() => 1 << 7,
                _ if a.is_signaling() => 1 << 8,
                _ => 1 << 9,
            };
            self.set_x(dest, class);
            self.advance()
        })
    }

    /// Executes `fmv.x.h`, `fmv.x.w` or `fmv.x.d`: the raw low bits of the `f` register,
    /// sign-extended.
    pub fn fp_move_to_int(
        &mut self,
        format: FpFormat,
        dest: Specifier,
        src: Specifier,
    ) -> ExecutionResult {
        self.check_fp()?;
        let value = bits::sext(self.hart.f_registers.raw(src), format.bits());
        self.set_x(dest, value);
        self.advance()
    }

    pub fn fp_move_from_int(
        &mut self,
        format: FpFormat,
        dest: Specifier,
        src: Specifier,
    ) -> ExecutionResult {
        self.check_fp()?;
        let value = self.x(src);
        self.set_f(dest, format.bits(), value);
        self.advance()
    }

    /// Executes one of the `fcvt.{w,wu,l,lu}.*` instructions.
    ///
    /// > If the rounded result is not representable in the destination format, it is clipped to
    /// > the nearest value and the invalid flag is set.
    ///
    /// NaN converts like positive infinity.
    pub fn fp_to_int(
        &mut self,
        format: FpFormat,
        int: IntFormat,
        dest: Specifier,
        src: Specifier,
        rounding: u8,
    ) -> ExecutionResult {
        self.check_fp()?;
        let round = self.rounding_mode(rounding)?;
        with_format!(format, F => {
            let a: F = self.f(src);
            let a = if a.is_nan() { F::INFINITY } else { a };
            let StatusAnd { status, value } = match int {
                IntFormat::W => a
                    .to_i128_r(32, round, &mut false)
                    .map(|v| v as i32 as i128 as u128),
                IntFormat::Wu => a
                    .to_u128_r(32, round, &mut false)
                    .map(|v| v as u32 as i32 as i128 as u128),
                IntFormat::L => a
                    .to_i128_r(64, round, &mut false)
                    .map(|v| v as i64 as i128 as u128),
                IntFormat::Lu => a
                    .to_u128_r(64, round, &mut false)
                    .map(|v| v as u64 as i64 as i128 as u128),
            };
            self.accrue(status);
            self.set_x(dest, value);
            self.advance()
        })
    }

    /// Executes one of the `fcvt.*.{w,wu,l,lu}` instructions.
    pub fn int_to_fp(
        &mut self,
        format: FpFormat,
        int: IntFormat,
        dest: Specifier,
        src: Specifier,
        rounding: u8,
    ) -> ExecutionResult {
        self.check_fp()?;
        let round = self.rounding_mode(rounding)?;
        let x = self.x(src);
        with_format!(format, F => {
            let result = match int {
                IntFormat::W => F::from_i128_r(x as i32 as i128, round),
                IntFormat::Wu => F::from_u128_r(x as u32 as u128, round),
                IntFormat::L => F::from_i128_r(x as i64 as i128, round),
                IntFormat::Lu => F::from_u128_r(x as u64 as u128, round),
            };
            self.set_f_result(dest, result)
        })
    }

    /// Converts between two floating point formats.
    pub fn fp_convert(
        &mut self,
        to: FpFormat,
        from: FpFormat,
        dest: Specifier,
        src: Specifier,
        rounding: u8,
    ) -> ExecutionResult {
        self.check_fp()?;
        let round = self.rounding_mode(rounding)?;
        with_format!(from, F => {
            let a: F = self.f(src);
            with_format!(to, T => {
                let mut loses_info = false;
                let result: StatusAnd<T> = a.convert_r(round, &mut loses_info);
                self.set_f_result(dest, result)
            })
        })
    }

    /// Executes a Zfa `fli` instruction, loading one of 32 constants.
    pub fn fp_load_immediate(
        &mut self,
        format: FpFormat,
        dest: Specifier,
        index: u8,
    ) -> ExecutionResult {
        self.check_fp()?;
        with_format!(format, F => {
            let value = if index == 1 {
                F::smallest_normalized()
            } else {
                let single = Single::from_bits(FLI_TABLE[index as usize & 0x1F] as u128);
                let converted: StatusAnd<F> =
                    single.convert_r(Round::NearestTiesToEven, &mut false);
                converted.value.canonicalise()
            };
            self.set_f(dest, F::BITS as u32, value.to_bits());
            self.advance()
        })
    }

    /// Executes the Zfa `fcvtmod.w.d` instruction.
    ///
    /// Rounds toward zero and writes the low 32 bits of the integer, sign-extended. Values
    /// outside the 32-bit range set the invalid flag instead of the inexact one, and NaNs and
    /// infinities give zero.
    pub fn fcvtmod_w_d(&mut self, dest: Specifier, src: Specifier) -> ExecutionResult {
        self.check_fp()?;
        let a: Double = self.f(src);
        let (value, status) = fcvtmod(a.to_bits() as u64);
        self.accrue(status);
        self.set_x(dest, value as i128 as u128);
        self.advance()
    }

    fn check_fp(&self) -> Result<(), Fault> {
        self.hart.check_fp_enabled().map_err(|_| self.illegal())
    }

    /// Decodes a rounding mode field, resolving the dynamic mode from `frm`.
    fn rounding_mode(&self, rounding: u8) -> Result<Round, Fault> {
        let mode = if rounding == DYNAMIC_ROUNDING {
            self.hart.fp.frm
        } else {
            rounding
        };
        match mode {
            0b000 => Ok(Round::NearestTiesToEven),
            0b001 => Ok(Round::TowardZero),
            0b010 => Ok(Round::TowardNegative),
            0b011 => Ok(Round::TowardPositive),
            0b100 => Ok(Round::NearestTiesToAway),
            _ => Err(self.illegal()),
        }
    }

    fn f<F: FloatExt>(&self, src: Specifier) -> F {
        F::from_bits(self.hart.f_registers.read(src, F::BITS as u32))
    }

    /// Writes a `width`-bit value to an `f` register, NaN-boxing it.
    fn set_f(&mut self, dest: Specifier, width: u32, value: u128) {
        self.hart.f_registers.write(dest, width, value);
        self.hart.status.set_fs(ExtensionContextStatus::Dirty);
        self.hart.write = LastWrite::Fpr {
            register: dest,
            value: self.hart.f_registers.raw(dest),
        };
    }

    fn set_f_result<F: FloatExt>(
        &mut self,
        dest: Specifier,
        result: StatusAnd<F>,
    ) -> ExecutionResult {
        let StatusAnd { status, value } = result.map(F::canonicalise);
        self.accrue(status);
        self.set_f(dest, F::BITS as u32, value.to_bits());
        self.advance()
    }

    fn accrue(&mut self, status: Status) {
        if status != Status::OK {
            self.hart.fp.fflags |= status_to_bits(status);
            self.hart.status.set_fs(ExtensionContextStatus::Dirty);
        }
    }
}

fn fcvtmod(bits: u64) -> (i32, Status) {
    let negative = bits >> 63 == 1;
    let exponent = ((bits >> 52) & 0x7FF) as i32;
    let fraction = bits & ((1 << 52) - 1);
    if exponent == 0x7FF {
        return (0, Status::INVALID_OP);
    }
    if exponent == 0 {
        let status = if fraction == 0 {
            Status::OK
        } else {
            Status::INEXACT
        };
        return (0, status);
    }

    let significand = fraction | 1 << 52;
    let shift = exponent - 1075;
    let (low, inexact, in_range) = if shift >= 0 {
        // At least 2^52, so never representable.
        let low = if shift < 32 {
            (significand << shift) as u32
        } else {
            0
        };
        (low, false, false)
    } else {
        let right = (-shift) as u32;
        let magnitude = significand.checked_shr(right).unwrap_or(0);
        let inexact = right >= 64 || significand & ((1 << right) - 1) != 0;
        let limit = (1u64 << 31) - 1 + negative as u64;
        (magnitude as u32, inexact, magnitude <= limit)
    };
    let value = if negative { low.wrapping_neg() } else { low } as i32;
    let status = if !in_range {
        Status::INVALID_OP
    } else if inexact {
        Status::INEXACT
    } else {
        Status::OK
    };
    (value, status)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hart::Exception;
    use crate::memory::PhysicalMemory;
    use crate::{AddressRange, IsaConfig};

    const RAM_BASE: u64 = 0x8000_0000;
    const RNE: u8 = 0;
    const RTZ: u8 = 1;
    const DYN: u8 = 7;

    struct Fixture {
        hart: Hart,
        memory: PhysicalMemory,
    }

    impl Fixture {
        fn new() -> Self {
            let isa = IsaConfig::parse("rv64gc_zfh_zfa").unwrap();
            let hart = Hart::new(0, &isa, RAM_BASE, false, false);
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
                raw: 0x53,
                length: 4,
            }
        }

        fn set_f32(&mut self, index: u8, value: f32) {
            self.hart
                .f_registers
                .write(r(index), 32, value.to_bits() as u128);
        }

        fn set_f64(&mut self, index: u8, value: f64) {
            self.hart
                .f_registers
                .write(r(index), 64, value.to_bits() as u128);
        }

        fn f32(&self, index: u8) -> u32 {
            self.hart.f_registers.read(r(index), 32) as u32
        }

        fn x(&self, index: u8) -> u128 {
            self.hart.registers.x(r(index))
        }

        fn fflags(&self) -> u8 {
            self.hart.fp.fflags
        }
    }

    fn r(index: u8) -> Specifier {
        Specifier::from_u5(index)
    }

    #[test]
    fn test_status_to_bits() {
        assert_eq!(0, status_to_bits(Status::OK));
        assert_eq!(1 << Fflag::NX as usize, status_to_bits(Status::INEXACT));
        assert_eq!(1 << Fflag::UF as usize, status_to_bits(Status::UNDERFLOW));
        assert_eq!(1 << Fflag::OF as usize, status_to_bits(Status::OVERFLOW));
        assert_eq!(1 << Fflag::DZ as usize, status_to_bits(Status::DIV_BY_ZERO));
        assert_eq!(1 << Fflag::NV as usize, status_to_bits(Status::INVALID_OP));
    }

    #[test]
    fn test_fadd_marks_fs_dirty() {
        let mut f = Fixture::new();
        f.set_f32(1, 1.0);
        f.set_f32(2, 2.0);
        f.executor()
            .fp_arith(FpArithOp::Add, FpFormat::Single, r(3), r(1), r(2), RNE)
            .unwrap();
        assert_eq!(3.0f32.to_bits(), f.f32(3));
        assert_eq!(0, f.fflags());
        assert_eq!(ExtensionContextStatus::Dirty, f.hart.status.fs());
        assert_eq!(
            0xFFFF_FFFF_0000_0000 | 3.0f32.to_bits() as u128,
            f.hart.f_registers.raw(r(3))
        );
    }

    #[test]
    fn test_division_by_zero_and_invalid() {
        let mut f = Fixture::new();
        f.set_f32(1, 1.0);
        f.set_f32(2, 0.0);
        f.executor()
            .fp_arith(FpArithOp::Div, FpFormat::Single, r(3), r(1), r(2), RNE)
            .unwrap();
        assert_eq!(f32::INFINITY.to_bits(), f.f32(3));
        assert_eq!(1 << Fflag::DZ as u8, f.fflags());
        f.executor()
            .fp_arith(FpArithOp::Div, FpFormat::Single, r(3), r(2), r(2), RNE)
            .unwrap();
        assert_eq!(0x7FC0_0000, f.f32(3));
        assert_eq!(1 << Fflag::DZ as u8 | 1 << Fflag::NV as u8, f.fflags());
    }

    #[test]
    fn test_improperly_boxed_input_is_canonical_nan() {
        let mut f = Fixture::new();
        f.hart.f_registers.write(r(1), 64, 1.0f32.to_bits() as u128);
        f.set_f32(2, 1.0);
        f.executor()
            .fp_arith(FpArithOp::Add, FpFormat::Single, r(3), r(1), r(2), RNE)
            .unwrap();
        assert_eq!(0x7FC0_0000, f.f32(3));
        assert_eq!(0, f.fflags());
    }

    #[test]
    fn test_fused() {
        let mut f = Fixture::new();
        f.set_f64(1, 2.0);
        f.set_f64(2, 3.0);
        f.set_f64(3, 1.0);
        f.executor()
            .fp_fused(FusedOp::Nmsub, FpFormat::Double, r(4), r(1), r(2), r(3), RNE)
            .unwrap();
        assert_eq!((-5.0f64).to_bits() as u128, f.hart.f_registers.raw(r(4)));
        f.executor()
            .fp_fused(FusedOp::Msub, FpFormat::Double, r(4), r(1), r(2), r(3), RNE)
            .unwrap();
        assert_eq!(5.0f64.to_bits() as u128, f.hart.f_registers.raw(r(4)));
    }

    #[test]
    fn test_min_max() {
        let mut f = Fixture::new();
        f.set_f32(1, -0.0);
        f.set_f32(2, 0.0);
        f.executor()
            .fp_min_max(MinMaxOp::Min, FpFormat::Single, r(3), r(1), r(2))
            .unwrap();
        assert_eq!((-0.0f32).to_bits(), f.f32(3));
        f.hart.f_registers.write(r(4), 32, 0x7FC0_0001);
        f.executor()
            .fp_min_max(MinMaxOp::Max, FpFormat::Single, r(3), r(4), r(2))
            .unwrap();
        assert_eq!(0.0f32.to_bits(), f.f32(3));
        assert_eq!(0, f.fflags());
        f.executor()
            .fp_min_max(MinMaxOp::Maxm, FpFormat::Single, r(3), r(4), r(2))
            .unwrap();
        assert_eq!(0x7FC0_0000, f.f32(3));
        // Signaling NaN
        f.hart.f_registers.write(r(5), 32, 0x7F80_0001);
        f.executor()
            .fp_min_max(MinMaxOp::Min, FpFormat::Single, r(3), r(5), r(2))
            .unwrap();
        assert_eq!(0.0f32.to_bits(), f.f32(3));
        assert_eq!(1 << Fflag::NV as u8, f.fflags());
    }

    #[test]
    fn test_compare_flags() {
        let mut f = Fixture::new();
        f.hart.f_registers.write(r(1), 32, 0x7FC0_0000);
        f.set_f32(2, 1.0);
        f.executor()
            .fp_compare(FpCompareOp::Eq, FpFormat::Single, r(10), r(1), r(2))
            .unwrap();
        assert_eq!(0, f.x(10));
        assert_eq!(0, f.fflags());
        f.executor()
            .fp_compare(FpCompareOp::Ltq, FpFormat::Single, r(10), r(1), r(2))
            .unwrap();
        assert_eq!(0, f.fflags());
        f.executor()
            .fp_compare(FpCompareOp::Lt, FpFormat::Single, r(10), r(1), r(2))
            .unwrap();
        assert_eq!(1 << Fflag::NV as u8, f.fflags());
        f.executor()
            .fp_compare(FpCompareOp::Le, FpFormat::Single, r(10), r(2), r(2))
            .unwrap();
        assert_eq!(1, f.x(10));
    }

    #[test]
    fn test_fclass() {
        let mut f = Fixture::new();
        let cases: [(u32, u128); 6] = [
            (f32::NEG_INFINITY.to_bits(), 1),
            ((-1.0f32).to_bits(), 1 << 1),
            ((-0.0f32).to_bits(), 1 << 3),
            (1, 1 << 5),
            (0x7F80_0001, 1 << 8),
            (0x7FC0_0000, 1 << 9),
        ];
        for (bits, class) in cases {
            f.hart.f_registers.write(r(1), 32, bits as u128);
            f.executor().fp_class(FpFormat::Single, r(10), r(1)).unwrap();
            assert_eq!(class, f.x(10));
        }
        assert_eq!(0, f.fflags());
    }

    #[test]
    fn test_fp_to_int() {
        let mut f = Fixture::new();
        f.hart.f_registers.write(r(1), 32, 0x7FC0_0000);
        f.executor()
            .fp_to_int(FpFormat::Single, IntFormat::W, r(10), r(1), RNE)
            .unwrap();
        assert_eq!(i32::MAX as u128, f.x(10));
        assert_eq!(1 << Fflag::NV as u8, f.fflags());

        let mut f = Fixture::new();
        f.set_f32(1, -1.0);
        f.executor()
            .fp_to_int(FpFormat::Single, IntFormat::Wu, r(10), r(1), RNE)
            .unwrap();
        assert_eq!(0, f.x(10));
        assert_eq!(1 << Fflag::NV as u8, f.fflags());

        let mut f = Fixture::new();
        f.set_f32(1, 1.5);
        f.executor()
            .fp_to_int(FpFormat::Single, IntFormat::L, r(10), r(1), RNE)
            .unwrap();
        assert_eq!(2, f.x(10));
        f.executor()
            .fp_to_int(FpFormat::Single, IntFormat::L, r(10), r(1), RTZ)
            .unwrap();
        assert_eq!(1, f.x(10));
        assert_eq!(1 << Fflag::NX as u8, f.fflags());

        let mut f = Fixture::new();
        f.set_f32(1, -2.0);
        f.executor()
            .fp_to_int(FpFormat::Single, IntFormat::W, r(10), r(1), RNE)
            .unwrap();
        assert_eq!(u128::MAX - 1, f.x(10));
    }

    #[test]
    fn test_int_to_fp_and_convert() {
        let mut f = Fixture::new();
        f.hart.registers.set_x(r(1), u128::MAX);
        f.executor()
            .int_to_fp(FpFormat::Double, IntFormat::W, r(2), r(1), RNE)
            .unwrap();
        assert_eq!((-1.0f64).to_bits() as u128, f.hart.f_registers.raw(r(2)));
        f.executor()
            .int_to_fp(FpFormat::Double, IntFormat::Wu, r(2), r(1), RNE)
            .unwrap();
        assert_eq!(
            4294967295.0f64.to_bits() as u128,
            f.hart.f_registers.raw(r(2))
        );
        f.set_f64(3, 0.1);
        f.executor()
            .fp_convert(FpFormat::Single, FpFormat::Double, r(4), r(3), RNE)
            .unwrap();
        assert_eq!(0.1f32.to_bits(), f.f32(4));
        assert_eq!(1 << Fflag::NX as u8, f.fflags());
    }

    #[test]
    fn test_sqrt() {
        let mut f = Fixture::new();
        f.set_f32(1, 4.0);
        f.executor().fp_sqrt(FpFormat::Single, r(2), r(1), RNE).unwrap();
        assert_eq!(2.0f32.to_bits(), f.f32(2));
        assert_eq!(0, f.fflags());
        // sqrt(2.0) in half precision
        f.hart.f_registers.write(r(3), 16, 0x4000);
        f.executor().fp_sqrt(FpFormat::Half, r(4), r(3), RNE).unwrap();
        assert_eq!(0x3DA8, f.hart.f_registers.read(r(4), 16));
        assert_eq!(1 << Fflag::NX as u8, f.fflags());
        f.set_f32(5, -1.0);
        f.executor().fp_sqrt(FpFormat::Single, r(6), r(5), RNE).unwrap();
        assert_eq!(0x7FC0_0000, f.f32(6));
        assert!(f.fflags() & 1 << Fflag::NV as u8 != 0);
    }

    #[test]
    fn test_sign_injection_keeps_payload() {
        let mut f = Fixture::new();
        f.hart.f_registers.write(r(1), 32, 0x7F80_0001);
        f.set_f32(2, -1.0);
        f.executor()
            .fp_sign_inject(SignInjectOp::Sgnj, FpFormat::Single, r(3), r(1), r(2))
            .unwrap();
        assert_eq!(0xFF80_0001, f.f32(3));
        f.executor()
            .fp_sign_inject(SignInjectOp::Sgnjx, FpFormat::Single, r(3), r(2), r(2))
            .unwrap();
        assert_eq!(1.0f32.to_bits(), f.f32(3));
        assert_eq!(0, f.fflags());
    }

    #[test]
    fn test_move_and_load_store() {
        let mut f = Fixture::new();
        f.hart.registers.set_x(r(1), 0xFFFF_FFFF_BF80_0000);
        f.executor()
            .fp_move_from_int(FpFormat::Single, r(2), r(1))
            .unwrap();
        assert_eq!((-1.0f32).to_bits(), f.f32(2));
        f.executor().fp_move_to_int(FpFormat::Single, r(3), r(2)).unwrap();
        assert_eq!(0xFFFF_FFFF_BF80_0000, f.x(3) as u64);

        f.hart.registers.set_x(r(4), RAM_BASE as u128 + 0x80);
        f.executor()
            .fp_store(FpFormat::Single, r(2), r(4), 0)
            .unwrap();
        assert_eq!(Ok(0xBF80_0000), f.memory.read_u32(RAM_BASE + 0x80));
        f.executor()
            .fp_load(FpFormat::Half, r(5), r(4), 2)
            .unwrap();
        assert_eq!(
            0xFFFF_FFFF_FFFF_BF80,
            f.hart.f_registers.raw(r(5))
        );
    }

    #[test]
    fn test_fli() {
        let mut f = Fixture::new();
        f.executor()
            .fp_load_immediate(FpFormat::Single, r(1), 16)
            .unwrap();
        assert_eq!(1.0f32.to_bits(), f.f32(1));
        f.executor()
            .fp_load_immediate(FpFormat::Double, r(1), 1)
            .unwrap();
        assert_eq!(0x0010_0000_0000_0000, f.hart.f_registers.raw(r(1)));
        f.executor()
            .fp_load_immediate(FpFormat::Half, r(1), 29)
            .unwrap();
        assert_eq!(0x7C00, f.hart.f_registers.read(r(1), 16));
        f.executor()
            .fp_load_immediate(FpFormat::Double, r(1), 31)
            .unwrap();
        assert_eq!(0x7FF8_0000_0000_0000, f.hart.f_registers.raw(r(1)));
        assert_eq!(0, f.fflags());
    }

    #[test]
    fn test_fround() {
        let mut f = Fixture::new();
        f.set_f64(1, 2.5);
        f.executor()
            .fp_round(FpFormat::Double, r(2), r(1), RNE, false)
            .unwrap();
        assert_eq!(2.0f64.to_bits() as u128, f.hart.f_registers.raw(r(2)));
        assert_eq!(0, f.fflags());
        f.executor()
            .fp_round(FpFormat::Double, r(2), r(1), RNE, true)
            .unwrap();
        assert_eq!(1 << Fflag::NX as u8, f.fflags());
        f.set_f64(3, -0.25);
        f.executor()
            .fp_round(FpFormat::Double, r(2), r(3), RNE, false)
            .unwrap();
        assert_eq!((-0.0f64).to_bits() as u128, f.hart.f_registers.raw(r(2)));
    }

    #[test]
    fn test_fcvtmod() {
        assert_eq!((5, Status::INVALID_OP), fcvtmod((4294967301.0f64).to_bits()));
        assert_eq!((-3, Status::INEXACT), fcvtmod((-3.7f64).to_bits()));
        assert_eq!((i32::MIN, Status::OK), fcvtmod((-2147483648.0f64).to_bits()));
        assert_eq!((i32::MIN, Status::INVALID_OP), fcvtmod((2147483648.0f64).to_bits()));
        assert_eq!((0, Status::INVALID_OP), fcvtmod(f64::NAN.to_bits()));
        assert_eq!((0, Status::INEXACT), fcvtmod((0.5f64).to_bits()));
    }

    #[test]
    fn test_dynamic_rounding_mode() {
        let mut f = Fixture::new();
        f.set_f32(1, 1.5);
        f.hart.write_frm(1, u128::MAX).unwrap();
        f.executor()
            .fp_to_int(FpFormat::Single, IntFormat::W, r(10), r(1), DYN)
            .unwrap();
        assert_eq!(1, f.x(10));
        f.hart.write_frm(5, u128::MAX).unwrap();
        assert_eq!(
            Err(Fault::new(Exception::IllegalInstruction, 0x53)),
            f.executor()
                .fp_to_int(FpFormat::Single, IntFormat::W, r(10), r(1), DYN)
        );
        // An invalid static mode is illegal too.
        assert_eq!(
            Err(Fault::new(Exception::IllegalInstruction, 0x53)),
            f.executor()
                .fp_to_int(FpFormat::Single, IntFormat::W, r(10), r(1), 5)
        );
    }

    #[test]
    fn test_fs_off_is_illegal() {
        let mut f = Fixture::new();
        f.hart.status.set_fs(ExtensionContextStatus::Off);
        assert_eq!(
            Err(Fault::new(Exception::IllegalInstruction, 0x53)),
            f.executor()
                .fp_arith(FpArithOp::Add, FpFormat::Single, r(3), r(1), r(2), RNE)
        );
    }

    #[test]
    fn test_fcsr_combines_frm_and_fflags() {
        let mut f = Fixture::new();
        f.hart.write_fcsr(0b011_10001, u128::MAX).unwrap();
        assert_eq!(Ok(0b10001), f.hart.read_fflags());
        assert_eq!(Ok(0b011), f.hart.read_frm());
        f.hart.write_fflags(0, 0b1).unwrap();
        assert_eq!(Ok(0b011_10000), f.hart.read_fcsr());
    }
}
