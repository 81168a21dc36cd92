//! Width-generic integer helpers.
//!
//! Every operation whose result depends on the operand width lives in one of the per-width
//! modules [`w32`], [`w64`] and [`w128`], generated by a single macro so the three stay
//! identical. The free functions at the bottom dispatch on [`Xlen`] and return the result in the
//! canonical sign-extended register form.

use crate::config::Xlen;

macro_rules! word_ops {
    ($($module:ident: $u:ty, $i:ty;)*) => {
        $(
            pub mod $module {
                const BITS: u32 = <$u>::BITS;
                const HALF: u32 = BITS / 2;
                const HALF_MASK: $u = (1 << HALF) - 1;

                /// Unsigned division; division by zero yields all ones.
                pub fn divu(a: $u, b: $u) -> $u {
                    if b == 0 {
                        <$u>::MAX
                    } else {
                        a / b
                    }
                }

                /// Unsigned remainder; division by zero yields the dividend.
                pub fn remu(a: $u, b: $u) -> $u {
                    if b == 0 {
                        a
                    } else {
                        a % b
                    }
                }

                /// Signed division; division by zero yields -1 and `MIN / -1` yields `MIN`.
                pub fn div(a: $u, b: $u) -> $u {
                    if b == 0 {
                        <$u>::MAX
                    } else {
                        (a as $i).wrapping_div(b as $i) as $u
                    }
                }

                /// Signed remainder; division by zero yields the dividend and `MIN % -1` is 0.
                pub fn rem(a: $u, b: $u) -> $u {
                    if b == 0 {
                        a
                    } else {
                        (a as $i).wrapping_rem(b as $i) as $u
                    }
                }

                /// High half of the unsigned double-width product.
                ///
                /// Computed from four half-width partial products so it needs no wider type.
                pub fn mulhu(a: $u, b: $u) -> $u {
                    let (a_lo, a_hi) = (a & HALF_MASK, a >> HALF);
                    let (b_lo, b_hi) = (b & HALF_MASK, b >> HALF);
                    let lo_lo = a_lo * b_lo;
                    let hi_lo = a_hi * b_lo;
                    let lo_hi = a_lo * b_hi;
                    let hi_hi = a_hi * b_hi;
                    let cross = (lo_lo >> HALF) + (hi_lo & HALF_MASK) + lo_hi;
                    hi_hi + (hi_lo >> HALF) + (cross >> HALF)
                }

                /// High half of the signed double-width product.
                pub fn mulh(a: $u, b: $u) -> $u {
                    let mut high = mulhu(a, b);
                    if (a as $i) < 0 {
                        high = high.wrapping_sub(b);
                    }
                    if (b as $i) < 0 {
                        high = high.wrapping_sub(a);
                    }
                    high
                }

                /// High half of the product of signed `a` and unsigned `b`.
                pub fn mulhsu(a: $u, b: $u) -> $u {
                    let high = mulhu(a, b);
                    if (a as $i) < 0 {
                        high.wrapping_sub(b)
                    } else {
                        high
                    }
                }

                pub fn clmul(a: $u, b: $u) -> $u {
                    (0..BITS)
                        .filter(|i| (b >> i) & 1 == 1)
                        .fold(0, |acc, i| acc ^ (a << i))
                }

                pub fn clmulh(a: $u, b: $u) -> $u {
                    (1..BITS)
                        .filter(|i| (b >> i) & 1 == 1)
                        .fold(0, |acc, i| acc ^ (a >> (BITS - i)))
                }

                pub fn clmulr(a: $u, b: $u) -> $u {
                    (0..BITS)
                        .filter(|i| (b >> i) & 1 == 1)
                        .fold(0, |acc, i| acc ^ (a >> (BITS - i - 1)))
                }

                /// Bitwise OR-combine within each byte: non-zero bytes become `0xFF`.
                pub fn orc_b(a: $u) -> $u {
                    (0..BITS / 8)
                        .map(|byte| byte * 8)
                        .filter(|shift| (a >> shift) & 0xFF != 0)
                        .fold(0, |acc, shift| acc | (0xFF << shift))
                }

                pub fn rev8(a: $u) -> $u {
                    a.swap_bytes()
                }
            }
        )*
    };
}

word_ops! {
    w32: u32, i32;
    w64: u64, i64;
    w128: u128, i128;
}

macro_rules! xlen_dispatch {
    ($($name:ident),* $(,)?) => {
        $(
            /// Applies the per-width operation of the same name at `xlen`, returning a
            /// sign-extended result.
            pub fn $name(xlen: Xlen, a: u128, b: u128) -> u128 {
                match xlen {
                    Xlen::Rv32 => w32::$name(a as u32, b as u32) as i32 as i128 as u128,
                    Xlen::Rv64 => w64::$name(a as u64, b as u64) as i64 as i128 as u128,
                    Xlen::Rv128 => w128::$name(a, b),
                }
            }
        )*
    };
}

xlen_dispatch!(div, divu, rem, remu, mulh, mulhu, mulhsu, clmul, clmulh, clmulr);

pub fn orc_b(xlen: Xlen, a: u128) -> u128 {
    match xlen {
        Xlen::Rv32 => w32::orc_b(a as u32) as i32 as i128 as u128,
        Xlen::Rv64 => w64::orc_b(a as u64) as i64 as i128 as u128,
        Xlen::Rv128 => w128::orc_b(a),
    }
}

pub fn rev8(xlen: Xlen, a: u128) -> u128 {
    match xlen {
        Xlen::Rv32 => w32::rev8(a as u32) as i32 as i128 as u128,
        Xlen::Rv64 => w64::rev8(a as u64) as i64 as i128 as u128,
        Xlen::Rv128 => w128::rev8(a),
    }
}

/// Count leading zeros within the low `xlen` bits.
pub fn clz(xlen: Xlen, a: u128) -> u128 {
    (xlen.zext(a).leading_zeros() - (128 - xlen.bits())) as u128
}

/// Count trailing zeros within the low `xlen` bits; a zero input yields `xlen`.
pub fn ctz(xlen: Xlen, a: u128) -> u128 {
    match xlen.zext(a) {
        0 => xlen.bits() as u128,
        value => value.trailing_zeros() as u128,
    }
}

pub fn cpop(xlen: Xlen, a: u128) -> u128 {
    xlen.zext(a).count_ones() as u128
}

pub fn rol(xlen: Xlen, a: u128, shamt: u32) -> u128 {
    let shamt = shamt & xlen.shamt_mask();
    match xlen {
        Xlen::Rv32 => (a as u32).rotate_left(shamt) as i32 as i128 as u128,
        Xlen::Rv64 => (a as u64).rotate_left(shamt) as i64 as i128 as u128,
        Xlen::Rv128 => a.rotate_left(shamt),
    }
}

pub fn ror(xlen: Xlen, a: u128, shamt: u32) -> u128 {
    rol(xlen, a, xlen.bits() - (shamt & xlen.shamt_mask()))
}

/// Sign-extends the low `bits` bits of `value`.
pub fn sext(value: u128, bits: u32) -> u128 {
    let shift = 128 - bits;
    (((value << shift) as i128) >> shift) as u128
}

/// Zero-extends the low `bits` bits of `value`.
pub fn zext(value: u128, bits: u32) -> u128 {
    if bits >= 128 {
        value
    } else {
        value & ((1 << bits) - 1)
    }
}

/// Extracts `raw[hi:lo]` and moves it to start at bit `dest_lo`.
///
/// Immediates of scattered encodings are assembled by OR-ing several of these together.
pub fn field(raw: u32, hi: u32, lo: u32, dest_lo: u32) -> u32 {
    let width = hi - lo + 1;
    let mask = if width == 32 { u32::MAX } else { (1 << width) - 1 };
    ((raw >> lo) & mask) << dest_lo
}

/// Sign-extends the low `bits` bits of a 32-bit immediate.
pub fn sext_imm(value: u32, bits: u32) -> i32 {
    let shift = 32 - bits;
    ((value << shift) as i32) >> shift
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_division_by_zero() {
        assert_eq!(u32::MAX, w32::divu(1234, 0));
        assert_eq!(1234, w32::remu(1234, 0));
        assert_eq!(u64::MAX, w64::divu(1234, 0));
        assert_eq!(1234, w64::remu(1234, 0));
        assert_eq!(u64::MAX, w64::div(1234, 0));
        assert_eq!(1234, w64::rem(1234, 0));
        assert_eq!(u128::MAX, w128::divu(7, 0));
    }

    #[test]
    fn test_signed_overflow() {
        let min = i32::MIN as u32;
        assert_eq!(min, w32::div(min, u32::MAX));
        assert_eq!(0, w32::rem(min, u32::MAX));
        let min = i128::MIN as u128;
        assert_eq!(min, w128::div(min, u128::MAX));
        assert_eq!(0, w128::rem(min, u128::MAX));
    }

    #[test]
    fn test_mulh_128() {
        // (2^127 - 1)^2 = 2^254 - 2^128 + 1
        let max = i128::MAX as u128;
        assert_eq!((1 << 126) - 1, w128::mulhu(max, max));
        assert_eq!(u128::MAX - 1, w128::mulhu(u128::MAX, u128::MAX));
        // -1 * -1 = 1
        assert_eq!(0, w128::mulh(u128::MAX, u128::MAX));
        // -1 * (2^128 - 1) = -(2^128 - 1)
        assert_eq!(u128::MAX, w128::mulhsu(u128::MAX, u128::MAX));
    }

    #[test]
    fn test_xlen_dispatch_sign_extends() {
        assert_eq!(u128::MAX, divu(Xlen::Rv32, 5, 0));
        assert_eq!(u128::MAX, mulhu(Xlen::Rv32, 0xFFFF_FFFF, 0xFFFF_FFFF) | 1);
        assert_eq!(0x7FFF_FFFF, mulhu(Xlen::Rv32, 0xFFFF_FFFF, 0x8000_0000));
    }

    #[test]
    fn test_clmul() {
        assert_eq!(0b1111, w32::clmul(0b101, 0b11));
        assert_eq!(1, w32::clmulh(1 << 31, 1 << 1));
        assert_eq!(1, w32::clmulr(1 << 31, 1));
        assert_eq!(1 << 31, w32::clmulr(1 << 31, 1 << 31));
    }

    #[test]
    fn test_orc_b_rev8() {
        assert_eq!(0xFF00_FFFF, w32::orc_b(0x0100_8001));
        assert_eq!(0x0807_0605_0403_0201, w64::rev8(0x0102_0304_0506_0708));
        assert_eq!(u128::MAX << 32 | 0xFF00_0000, orc_b(Xlen::Rv32, 0x1000_0000));
    }

    #[test]
    fn test_count_bits() {
        assert_eq!(32, clz(Xlen::Rv32, 0));
        assert_eq!(0, clz(Xlen::Rv32, u128::MAX));
        assert_eq!(63, clz(Xlen::Rv64, 1));
        assert_eq!(64, ctz(Xlen::Rv64, 0));
        assert_eq!(4, ctz(Xlen::Rv128, 0x10));
        assert_eq!(32, cpop(Xlen::Rv32, u128::MAX));
    }

    #[test]
    fn test_rotate() {
        assert_eq!(u128::MAX << 32 | 0x8000_0000, rol(Xlen::Rv32, 1, 31));
        assert_eq!(1, ror(Xlen::Rv32, 1, 0));
        assert_eq!(1 << 63 | (u128::MAX << 64), ror(Xlen::Rv64, 1, 1));
    }

    #[test]
    fn test_field_and_sext() {
        assert_eq!(0b101 << 4, field(0b1010_0000, 7, 5, 4));
        assert_eq!(-1, sext_imm(0xFFF, 12));
        assert_eq!(0x7FF, sext_imm(0x7FF, 12));
        assert_eq!(u128::MAX << 7, sext(0x80, 8));
        assert_eq!(u128::MAX, sext(0xFF, 8));
        assert_eq!(0x7F, sext(0x17F, 8));
        assert_eq!(0xFF, zext(u128::MAX, 8));
    }

    proptest! {
        #[test]
        fn test_mulhu_32(a: u32, b: u32) {
            prop_assert_eq!(((a as u64 * b as u64) >> 32) as u32, w32::mulhu(a, b));
        }

        #[test]
        fn test_mulhu_64(a: u64, b: u64) {
            prop_assert_eq!(((a as u128 * b as u128) >> 64) as u64, w64::mulhu(a, b));
        }

        #[test]
        fn test_mulh_64(a: i64, b: i64) {
            let expected = ((a as i128 * b as i128) >> 64) as u64;
            prop_assert_eq!(expected, w64::mulh(a as u64, b as u64));
        }

        #[test]
        fn test_mulhsu_64(a: i64, b: u64) {
            let expected = ((a as i128 * b as i128) >> 64) as u64;
            prop_assert_eq!(expected, w64::mulhsu(a as u64, b));
        }

        #[test]
        fn test_divu_zero(a: u64) {
            prop_assert_eq!(u64::MAX, w64::divu(a, 0));
            prop_assert_eq!(a, w64::remu(a, 0));
        }
    }
}
