#[macro_use]
extern crate static_assertions;

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use thiserror::Error;

pub mod address_map;
pub mod address_range;
pub mod bits;
pub mod compressed;
pub mod config;
pub mod cosim;
pub mod csr;
pub mod driver;
pub mod hart;
pub mod instruction;
pub mod machine;
pub mod memory;
pub mod registers;
pub mod snapshot;
pub mod trace;

/// Re-export of [`AddressRange`] for convenience.
pub use address_range::AddressRange;
pub use config::{IsaConfig, MachineConfig, TraceConfig, Xlen};
pub use machine::Machine;

/// List of all possible privilege levels for RISC-V.
///
/// Same as [`PrivilegeLevel`] except that it allows specifying the reserved privilege level `2`.
/// This can be useful in case a minimum required privilege level is specified as a 2-bit value,
/// since that value itself may be a reserved privilege level.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd)]
pub enum RawPrivilegeLevel {
    User = 0,
    Supervisor = 1,
    /// Privilege level `0b10` is reserved in the base ISA. When using the hypervisor extension,
    /// this becomes the Hypervisor privilege level.
    Reserved = 2,
    Machine = 3,
}

impl RawPrivilegeLevel {
    /// Convert a 2-bit value into a [`RawPrivilegeLevel`].
    /// Panics if the value doesn't fit in 2 bits (`0..=3`).
    pub fn from_u2(value_u2: u8) -> Self {
        match value_u2 {
            0 => Self::User,
            1 => Self::Supervisor,
            2 => Self::Reserved,
            3 => Self::Machine,
            _ => panic!("out of range u2 used"),
        }
    }

    pub fn is_reserved(self) -> bool {
        matches!(self, Self::Reserved)
    }
}

impl fmt::Display for RawPrivilegeLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match *self {
            RawPrivilegeLevel::User => "U",
            RawPrivilegeLevel::Supervisor => "S",
            RawPrivilegeLevel::Reserved => "2",
            RawPrivilegeLevel::Machine => "M",
        })
    }
}

/// List of defined privilege levels for RISC-V.
///
/// A privilege level is always referenced by two bits, so only `0`, `1`, `2`, and `3` are valid
/// privilege levels. However, only levels `0`, `1`, and `3` are defined; level `2` is reserved
/// for the hypervisor extension, which is not simulated.
///
/// Debug mode is not a privilege level of its own here: a hart in debug mode runs at
/// [`PrivilegeLevel::Machine`] with its debug flag set.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub enum PrivilegeLevel {
    /// User/application (abbreviated `U`) is the lower privilege level.
    User = 0,
    /// Supervisor (abbreviated `S`) is an intermediate privilege level,
    /// that allows protection from OS.
    Supervisor = 1,
    // Level 2 is reserved
    /// Machine (abbreviated `M`) is the highest privilege level.
    /// It is the only mandatory privilege level for a RISC-V hardware platform.
    Machine = 3,
}

impl PrivilegeLevel {
    /// The 2-bit encoding used in `xPP` fields, `dcsr.prv`, and the trace output.
    pub fn as_u2(self) -> u8 {
        self as u8
    }
}

impl PartialEq<PrivilegeLevel> for RawPrivilegeLevel {
    fn eq(&self, other: &PrivilegeLevel) -> bool {
        *self as usize == *other as usize
    }
}

impl PartialEq<RawPrivilegeLevel> for PrivilegeLevel {
    fn eq(&self, other: &RawPrivilegeLevel) -> bool {
        *self as usize == *other as usize
    }
}

impl PartialOrd<PrivilegeLevel> for RawPrivilegeLevel {
    fn partial_cmp(&self, other: &PrivilegeLevel) -> Option<Ordering> {
        (*self as usize).partial_cmp(&(*other as usize))
    }
}

impl PartialOrd<RawPrivilegeLevel> for PrivilegeLevel {
    fn partial_cmp(&self, other: &RawPrivilegeLevel) -> Option<Ordering> {
        (*self as usize).partial_cmp(&(*other as usize))
    }
}

impl fmt::Display for PrivilegeLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match *self {
            PrivilegeLevel::User => "U",
            PrivilegeLevel::Supervisor => "S",
            PrivilegeLevel::Machine => "M",
        })
    }
}

impl From<PrivilegeLevel> for RawPrivilegeLevel {
    fn from(value: PrivilegeLevel) -> Self {
        match value {
            PrivilegeLevel::User => Self::User,
            PrivilegeLevel::Supervisor => Self::Supervisor,
            PrivilegeLevel::Machine => Self::Machine,
        }
    }
}

impl TryFrom<RawPrivilegeLevel> for PrivilegeLevel {
    type Error = ReservedPrivilegeLevelError;
    fn try_from(value: RawPrivilegeLevel) -> Result<Self, Self::Error> {
        match value {
            RawPrivilegeLevel::User => Ok(Self::User),
            RawPrivilegeLevel::Supervisor => Ok(Self::Supervisor),
            RawPrivilegeLevel::Reserved => Err(ReservedPrivilegeLevelError(value)),
            RawPrivilegeLevel::Machine => Ok(Self::Machine),
        }
    }
}

#[derive(Error, Debug)]
#[error("privilege level {0} is reserved")]
pub struct ReservedPrivilegeLevelError(RawPrivilegeLevel);

pub mod unit {
    //! Collection of the units in which memory can be addressed (in bytes).

    /// A _byte_ is 8 bits.
    pub const BYTE: u64 = 1;

    /// A _halfword_ is 16 bits (2 bytes).
    pub const HALFWORD: u64 = 2;

    /// A _word_ is 32 bits (4 bytes).
    pub const WORD: u64 = 4;

    /// A _doubleword_ is 64 bits (8 bytes).
    pub const DOUBLEWORD: u64 = 8;

    /// A _quadword_ is 128 bits (16 bytes).
    pub const QUADWORD: u64 = 16;

    /// Size of a base (non-super) page.
    pub const PAGE: u64 = 4096;
}

/// Power-of-two address alignment.
// Maintains the invariant that self.0 is a power of two.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Alignment(u64);

impl Alignment {
    /// Byte alignment is equivalent to no alignment.
    pub const BYTE: Self = Self(1);

    /// Halfword alignment means the address is a multiple of 2 (`address & 0b1 == 0`).
    pub const HALFWORD: Self = Self(2);

    /// Word alignment means the address is a multiple of 4 (`address & 0b11 == 0`).
    pub const WORD: Self = Self(4);

    /// Doubleword alignment means the address is a multiple of 8 (`address & 0b111 == 0`).
    pub const DOUBLEWORD: Self = Self(8);

    /// Quadword alignment means the address is a multiple of 16 (`address & 0b1111 == 0`).
    pub const QUADWORD: Self = Self(16);

    /// Creates the natural alignment for a unit of size `size`. Returns `None` if `size` is not a
    /// power of two.
    pub fn natural_for_size(size: u64) -> Option<Self> {
        size.is_power_of_two().then_some(Self(size))
    }

    /// Returns the alignment as a power of two.
    pub fn as_power_of_two(self) -> u64 {
        self.0
    }

    /// Returns `true` if `address` is aligned to this alignment.
    pub fn is_aligned(self, address: u64) -> bool {
        address & (self.0 - 1) == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_privilege_order() {
        assert!(PrivilegeLevel::User < PrivilegeLevel::Supervisor);
        assert!(PrivilegeLevel::Supervisor < PrivilegeLevel::Machine);
        assert!(RawPrivilegeLevel::Reserved < PrivilegeLevel::Machine);
        assert!(RawPrivilegeLevel::Reserved > PrivilegeLevel::Supervisor);
        assert_eq!(RawPrivilegeLevel::Machine, PrivilegeLevel::Machine);
    }

    #[test]
    fn test_reserved_privilege_level() {
        assert!(PrivilegeLevel::try_from(RawPrivilegeLevel::from_u2(2)).is_err());
        assert_eq!(
            PrivilegeLevel::Supervisor,
            PrivilegeLevel::try_from(RawPrivilegeLevel::from_u2(1)).unwrap()
        );
    }

    #[test]
    fn test_alignment() {
        assert!(Alignment::WORD.is_aligned(0x8000_0004));
        assert!(!Alignment::WORD.is_aligned(0x8000_0002));
        assert!(Alignment::BYTE.is_aligned(0x8000_0003));
        assert_eq!(Some(Alignment::DOUBLEWORD), Alignment::natural_for_size(8));
        assert_eq!(None, Alignment::natural_for_size(6));
    }
}
