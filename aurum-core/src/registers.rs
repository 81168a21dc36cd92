//! Architectural register files: integer (`x`), floating point (`f`) and vector (`v`).

use crate::config::Xlen;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fmt::Formatter;

/// The number of registers in each register file (indices start at `0`).
pub const LEN: u8 = 32;

/// A hart's general purpose registers and its `pc`.
///
/// Values are stored sign-extended to 128 bits, so the same storage serves every XLEN. Writes
/// re-canonicalize the value for the configured XLEN, which means readers never see stale upper
/// bits.
///
/// > For RV32I, the 32 x registers are each 32 bits wide, i.e., XLEN=32. Register x0 is hardwired
/// > with all bits equal to 0. General purpose registers x1–x31 hold values that various
/// > instructions interpret as a collection of Boolean values, or as two’s complement signed binary
/// > integers or unsigned binary integers.
///
/// It is not possible to get a mutable reference to an `x` register, since that would allow
/// unchecked writes to register `x0`.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct XRegisters {
    xlen: Xlen,
    x_registers: [u128; LEN as usize],
    pc: u64,
}

impl XRegisters {
    /// Returns a fresh set of all-zero registers.
    pub fn new(xlen: Xlen, initial_pc: u64) -> Self {
        let mut registers = Self {
            xlen,
            x_registers: [0; LEN as usize],
            pc: 0,
        };
        registers.set_pc(initial_pc);
        registers
    }

    pub fn xlen(&self) -> Xlen {
        self.xlen
    }

    /// Returns the value of an `x` register, sign-extended to 128 bits.
    pub fn x(&self, specifier: Specifier) -> u128 {
        self.x_registers[usize::from(specifier)]
    }

    /// Sets the value of an `x` register. Only the low XLEN bits of `value` are kept.
    ///
    /// Writes to register `x0` are ignored.
    pub fn set_x(&mut self, specifier: Specifier, value: u128) {
        self.replace_x(specifier, value);
    }

    /// Replaces the value of an `x` register, returning its old value.
    ///
    /// Writes to register `x0` are ignored.
    pub fn replace_x(&mut self, specifier: Specifier, value: u128) -> u128 {
        if specifier.0 == 0 {
            0 // Ignore writes to register `x0`
        } else {
            let value = self.xlen.sext(value);
            std::mem::replace(&mut self.x_registers[specifier.0 as usize], value)
        }
    }

    /// Returns the value of the `pc` register.
    pub fn pc(&self) -> u64 {
        self.pc
    }

    /// Sets the `pc`, truncated to 32 bits on RV32.
    ///
    /// RV128 program counters are limited to the low 64 bits.
    pub fn set_pc(&mut self, pc: u64) {
        self.pc = match self.xlen {
            Xlen::Rv32 => pc & 0xFFFF_FFFF,
            Xlen::Rv64 | Xlen::Rv128 => pc,
        };
    }
}

/// A hart's floating point registers.
///
/// Values narrower than FLEN are NaN-boxed: all bits above the value are ones. Reading a value
/// that is not correctly boxed for the requested width returns that width's canonical NaN.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct FRegisters {
    flen: u32,
    f_registers: [u128; LEN as usize],
}

impl FRegisters {
    pub fn new(flen: u32) -> Self {
        Self {
            flen,
            f_registers: [0; LEN as usize],
        }
    }

    pub fn flen(&self) -> u32 {
        self.flen
    }

    /// Returns the raw FLEN-wide contents of an `f` register.
    pub fn raw(&self, specifier: Specifier) -> u128 {
        self.f_registers[usize::from(specifier)]
    }

    /// Reads a `width`-bit value, checking its NaN boxing.
    pub fn read(&self, specifier: Specifier, width: u32) -> u128 {
        let raw = self.raw(specifier);
        if width >= self.flen {
            return raw;
        }
        let upper = low_mask(self.flen) & !low_mask(width);
        if raw & upper == upper {
            raw & low_mask(width)
        } else {
            canonical_nan(width)
        }
    }

    /// Writes a `width`-bit value, NaN-boxing it to FLEN.
    pub fn write(&mut self, specifier: Specifier, width: u32, value: u128) {
        let boxed = (value & low_mask(width)) | (low_mask(self.flen) & !low_mask(width));
        self.f_registers[usize::from(specifier)] = boxed;
    }
}

fn low_mask(bits: u32) -> u128 {
    if bits >= 128 {
        u128::MAX
    } else {
        (1 << bits) - 1
    }
}

/// Bit pattern of the canonical quiet NaN for a format of `width` bits.
pub fn canonical_nan(width: u32) -> u128 {
    match width {
        16 => 0x7E00,
        32 => 0x7FC0_0000,
        64 => 0x7FF8_0000_0000_0000,
        _ => 0x7FFF_8000_0000_0000_0000_0000_0000_0000,
    }
}

/// A hart's vector registers, `VLEN` bits each, stored as little-endian bytes.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct VRegisters {
    vlenb: usize,
    bytes: Vec<u8>,
}

impl VRegisters {
    pub fn new(vlen: u32) -> Self {
        let vlenb = vlen as usize / 8;
        Self {
            vlenb,
            bytes: vec![0; vlenb * LEN as usize],
        }
    }

    /// Width of one register in bytes.
    pub fn vlenb(&self) -> usize {
        self.vlenb
    }

    /// Bytes of a single register.
    pub fn register(&self, specifier: Specifier) -> &[u8] {
        let start = usize::from(specifier) * self.vlenb;
        &self.bytes[start..start + self.vlenb]
    }

    /// Reads element `index` of `width_bytes` bytes from the register group starting at `base`.
    ///
    /// Indices past the end of `base` continue into the following registers, which is how
    /// register groups (LMUL > 1) are laid out. Reads beyond `v31` return 0.
    pub fn element(&self, base: Specifier, width_bytes: usize, index: usize) -> u64 {
        let start = usize::from(base) * self.vlenb + index * width_bytes;
        match self.bytes.get(start..start + width_bytes) {
            Some(bytes) => {
                let mut buf = [0u8; 8];
                buf[..width_bytes].copy_from_slice(bytes);
                u64::from_le_bytes(buf)
            }
            None => 0,
        }
    }

    /// Writes element `index`; see [`element`](Self::element) for the layout.
    pub fn set_element(&mut self, base: Specifier, width_bytes: usize, index: usize, value: u64) {
        let start = usize::from(base) * self.vlenb + index * width_bytes;
        if let Some(bytes) = self.bytes.get_mut(start..start + width_bytes) {
            bytes.copy_from_slice(&value.to_le_bytes()[..width_bytes]);
        }
    }

    /// Returns mask bit `index` of `v0`-style mask register `specifier`.
    pub fn mask_bit(&self, specifier: Specifier, index: usize) -> bool {
        let byte = usize::from(specifier) * self.vlenb + index / 8;
        self.bytes
            .get(byte)
            .is_some_and(|value| (value >> (index % 8)) & 1 == 1)
    }
}

/// A register specifier. Can take values in the range `0..LEN`.
///
/// The same specifier type addresses `x`, `f` and `v` registers; which file is meant follows
/// from the instruction.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct Specifier(u8);

impl Specifier {
    /// Register `x0`, a.k.a. register `zero`, always returns `0` on read, and ignores any writes.
    pub const X0: Self = Specifier(0);
    /// Return address (`ra`), the standard link register.
    pub const RA: Self = Specifier(1);
    pub const SP: Self = Specifier(2);
    /// Global pointer, the base of the vendor GP-relative loads and stores.
    pub const GP: Self = Specifier(3);
    /// Alternate link register (`t0`).
    pub const T0: Self = Specifier(5);
    pub const A0: Self = Specifier(10);
    pub const A7: Self = Specifier(17);
    /// Vector register `v0`, the source of the mask for masked vector instructions.
    pub const V0: Self = Specifier(0);

    /// Create a register specifier from its index, returning `None` if `index > 31`.
    pub fn new<U: TryInto<u8>>(index: U) -> Option<Self> {
        let index = index.try_into().ok()?;
        (index < 32).then_some(Self(index))
    }

    /// Convert a 5-bit value into a register specifier.
    /// Panics if the value doesn't fit in 5 bits (`0..=31`).
    pub fn from_u5(value_u5: u8) -> Self {
        const_assert_eq!(LEN, 32);
        if value_u5 > 31 {
            panic!("out of range u5 used");
        }
        Self(value_u5)
    }

    /// Specifier of one of the eight registers `x8..=x15` addressable by compressed
    /// instructions.
    pub fn from_compressed(value_u3: u8) -> Self {
        Self::from_u5(8 + (value_u3 & 0b111))
    }

    /// `x1` and `x5` are the link registers of the return-address stack hints.
    pub fn is_link(self) -> bool {
        self == Self::RA || self == Self::T0
    }

    /// Return an iterator over all register specifier, starting at x0 up to x31.
    pub fn iter_all() -> impl Iterator<Item = Self> {
        (0..32).map(Self)
    }
}

impl From<Specifier> for u8 {
    fn from(value: Specifier) -> Self {
        value.0
    }
}

impl From<Specifier> for u32 {
    fn from(value: Specifier) -> Self {
        value.0 as u32
    }
}

impl From<Specifier> for usize {
    fn from(value: Specifier) -> Self {
        value.0 as usize
    }
}

impl fmt::Display for Specifier {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "x{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_to_zero() {
        let mut registers = XRegisters::new(Xlen::Rv64, 0);
        registers.set_x(Specifier::X0, 0xDEADBEEF);
        assert_eq!(0, registers.x(Specifier::X0));
        assert_eq!(0, registers.pc());
    }

    #[test]
    fn test_set_x() {
        let mut registers = XRegisters::new(Xlen::Rv64, 0);
        registers.set_x(Specifier::X0, 1);
        for i in 1..LEN {
            registers.set_x(Specifier::from_u5(i), i as u128 + 1);
        }
        assert_eq!(0, registers.x(Specifier::X0));
        for i in 1..LEN {
            assert_eq!(i as u128 + 1, registers.x(Specifier::from_u5(i)));
        }
    }

    #[test]
    fn test_replace_x() {
        let mut registers = XRegisters::new(Xlen::Rv32, 0);
        assert_eq!(0, registers.replace_x(Specifier::X0, 0));
        for i in 1..LEN {
            assert_eq!(0, registers.replace_x(Specifier::from_u5(i), i as u128));
        }
        for i in 1..LEN {
            assert_eq!(
                i as u128,
                registers.replace_x(Specifier::from_u5(i), i as u128 + 1)
            );
        }
    }

    #[test]
    fn test_set_x_canonicalizes() {
        let mut registers = XRegisters::new(Xlen::Rv32, 0);
        registers.set_x(Specifier::A0, 0x1_8000_0000);
        assert_eq!(u128::MAX << 32 | 0x8000_0000, registers.x(Specifier::A0));
        let mut registers = XRegisters::new(Xlen::Rv64, 0);
        registers.set_x(Specifier::A0, 0xFFFF_FFFF);
        assert_eq!(0xFFFF_FFFF, registers.x(Specifier::A0));
    }

    #[test]
    fn test_rv32_pc_truncated() {
        let mut registers = XRegisters::new(Xlen::Rv32, 0x1_0000_0004);
        assert_eq!(4, registers.pc());
        registers.set_pc(u64::MAX);
        assert_eq!(0xFFFF_FFFF, registers.pc());
    }

    #[test]
    fn test_nan_boxing() {
        let mut registers = FRegisters::new(64);
        let f1 = Specifier::from_u5(1);
        registers.write(f1, 32, 0x3F80_0000);
        assert_eq!(0xFFFF_FFFF_3F80_0000, registers.raw(f1));
        assert_eq!(0x3F80_0000, registers.read(f1, 32));
        registers.write(f1, 64, 0x3FF0_0000_0000_0000);
        assert_eq!(canonical_nan(32), registers.read(f1, 32));
        assert_eq!(canonical_nan(16), registers.read(f1, 16));
        registers.write(f1, 16, 0x3C00);
        assert_eq!(0x3C00, registers.read(f1, 16));
        assert_eq!(0xFFFF_FFFF_FFFF_3C00, registers.read(f1, 64));
    }

    #[test]
    fn test_vector_elements() {
        let mut registers = VRegisters::new(128);
        let v2 = Specifier::from_u5(2);
        registers.set_element(v2, 4, 5, 0xAABB_CCDD);
        // Element 5 of 4 bytes lives in the second register of the group.
        assert_eq!(&[0xDD, 0xCC, 0xBB, 0xAA], &registers.register(Specifier::from_u5(3))[4..8]);
        assert_eq!(0xAABB_CCDD, registers.element(v2, 4, 5));
        assert_eq!(0, registers.element(Specifier::from_u5(31), 8, 2));
        registers.set_element(Specifier::X0, 1, 0, 0b100);
        assert!(registers.mask_bit(Specifier::X0, 2));
        assert!(!registers.mask_bit(Specifier::X0, 1));
    }

    #[test]
    fn test_link_registers() {
        assert!(Specifier::RA.is_link());
        assert!(Specifier::T0.is_link());
        assert!(!Specifier::SP.is_link());
        assert_eq!(Specifier::from_u5(15), Specifier::from_compressed(7));
    }
}
