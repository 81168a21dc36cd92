use bitvec::{field::BitField, order::Lsb0, view::BitView};
use serde::{Deserialize, Serialize};

use super::{CsrReadResult, CsrWriteResult, Hart};
use crate::config::Xlen;
use crate::{IsaConfig, PrivilegeLevel, RawPrivilegeLevel};

// Bits of mstatus that are visible through sstatus, apart from SD.
#[allow(clippy::identity_op)]
const SSTATUS_MASK: u64 = 0
    | (1 << idx::SIE)
    | (1 << idx::SPIE)
    | (1 << idx::UBE)
    | (1 << idx::SPP)
    | (0b11 << idx::VS)
    | (0b11 << idx::FS)
    | (0b11 << idx::XS)
    | (1 << idx::SUM)
    | (1 << idx::MXR)
    | (0b11 << idx::UXL);

/// Provides the mstatus, mstatush, and sstatus registers.
///
/// > The mstatus register is an MXLEN-bit read/write register [...]. The mstatus register keeps
/// > track of and controls the hart’s current operating state. A restricted view of mstatus appears
/// > as the sstatus register in the S-level ISA.
///
/// The register is stored in its RV64 layout. UXL and SXL always read as the hart's XLEN, all
/// endianness bits are fixed to little endian, and SD is derived from FS, VS and XS on read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Status {
    mstatus: u64,
    xlen: Xlen,
    /// FS is only writable when a floating point extension is present.
    fs_writable: bool,
    /// VS is only writable when the vector extension is present.
    vs_writable: bool,
}

impl Status {
    pub fn new(isa: &IsaConfig) -> Self {
        let mut status = Self {
            mstatus: 0,
            xlen: isa.xlen,
            fs_writable: isa.flen > 0,
            vs_writable: isa.vlen > 0,
        };
        status.reset();
        status
    }

    /// Resets to M-mode previous privilege with the FP and vector state Initial (if present).
    pub fn reset(&mut self) {
        self.mstatus = 0;
        self.set_mpp(RawPrivilegeLevel::Machine);
        if self.fs_writable {
            self.set_fs(ExtensionContextStatus::Initial);
        }
        if self.vs_writable {
            self.set_vs(ExtensionContextStatus::Initial);
        }
    }

    /// Returns `true` if the MIE (M-mode Interrupt Enable) bit is set.
    pub fn mie(&self) -> bool {
        self.mstatus.view_bits::<Lsb0>()[idx::MIE]
    }

    /// Sets the MIE (M-mode Interrupt Enable) bit to `value`.
    pub fn set_mie(&mut self, value: bool) {
        self.mstatus.view_bits_mut::<Lsb0>().set(idx::MIE, value);
    }

    /// Returns `true` if the SIE (S-mode Interrupt Enable) bit is set.
    pub fn sie(&self) -> bool {
        self.mstatus.view_bits::<Lsb0>()[idx::SIE]
    }

    /// Sets the SIE (S-mode Interrupt Enable) bit to `value`.
    pub fn set_sie(&mut self, value: bool) {
        self.mstatus.view_bits_mut::<Lsb0>().set(idx::SIE, value);
    }

    /// Returns `true` if the MPIE (M-mode Previous Interrupt Enable) bit is set.
    pub fn mpie(&self) -> bool {
        self.mstatus.view_bits::<Lsb0>()[idx::MPIE]
    }

    /// Sets the MPIE (M-mode Previous Interrupt Enable) bit to `value`.
    pub fn set_mpie(&mut self, value: bool) {
        self.mstatus.view_bits_mut::<Lsb0>().set(idx::MPIE, value);
    }

    /// Returns `true` if the SPIE (S-mode Previous Interrupt Enable) bit is set.
    pub fn spie(&self) -> bool {
        self.mstatus.view_bits::<Lsb0>()[idx::SPIE]
    }

    /// Sets the SPIE (S-mode Previous Interrupt Enable) bit to `value`.
    pub fn set_spie(&mut self, value: bool) {
        self.mstatus.view_bits_mut::<Lsb0>().set(idx::SPIE, value);
    }

    /// Returns the privilege level encoded by the MPP (M-mode Previous Privilege level) field.
    ///
    /// The MPP field is **WARL**, so it never holds the reserved level.
    pub fn mpp(&self) -> PrivilegeLevel {
        let raw = RawPrivilegeLevel::from_u2(
            self.mstatus.view_bits::<Lsb0>()[idx::MPP..(idx::MPP + 2)].load_le(),
        );
        PrivilegeLevel::try_from(raw).unwrap_or(PrivilegeLevel::User)
    }

    /// Sets the privilege level encoded by the MPP (M-mode Previous Privilege level) field to
    /// `value`.
    ///
    /// The MPP field is **WARL**.
    pub fn set_mpp(&mut self, value: RawPrivilegeLevel) {
        let Ok(value) = PrivilegeLevel::try_from(value) else {
            // MPP is a WARL field, so ignore illegal values.
            return;
        };
        self.mstatus.view_bits_mut::<Lsb0>()[idx::MPP..(idx::MPP + 2)].store_le(value.as_u2());
    }

    /// Returns the privilege level encoded by the SPP (S-mode Previous Privilege level) field.
    pub fn spp(&self) -> PrivilegeLevel {
        if self.mstatus.view_bits::<Lsb0>()[idx::SPP] {
            PrivilegeLevel::Supervisor
        } else {
            PrivilegeLevel::User
        }
    }

    /// Sets the privilege level encoded by the SPP (S-mode Previous Privilege level) field to
    /// `value`.
    ///
    /// The SPP field is **WARL**.
    pub fn set_spp(&mut self, value: RawPrivilegeLevel) {
        match PrivilegeLevel::try_from(value) {
            Ok(value) if value <= PrivilegeLevel::Supervisor => {
                let bit = value != PrivilegeLevel::User;
                self.mstatus.view_bits_mut::<Lsb0>().set(idx::SPP, bit);
            }
            _ => {} // SPP is a WARL field, so ignore illegal values.
        };
    }

    /// Returns `true` if the MPRV (Modify PRiVilege) bit is set.
    pub fn mprv(&self) -> bool {
        self.mstatus.view_bits::<Lsb0>()[idx::MPRV]
    }

    /// Sets the MPRV (Modify PRiVilege) bit to `value`.
    pub fn set_mprv(&mut self, value: bool) {
        self.mstatus.view_bits_mut::<Lsb0>().set(idx::MPRV, value);
    }

    /// Returns `true` if the MXR (Make eXecutable Readable) bit is set.
    pub fn mxr(&self) -> bool {
        self.mstatus.view_bits::<Lsb0>()[idx::MXR]
    }

    pub fn set_mxr(&mut self, value: bool) {
        self.mstatus.view_bits_mut::<Lsb0>().set(idx::MXR, value);
    }

    /// Returns `true` if the SUM (permit Supervisor User Memory access) bit is set.
    pub fn sum(&self) -> bool {
        self.mstatus.view_bits::<Lsb0>()[idx::SUM]
    }

    pub fn set_sum(&mut self, value: bool) {
        self.mstatus.view_bits_mut::<Lsb0>().set(idx::SUM, value);
    }

    /// Returns `true` if the TVM (Trap Virtual Memory) bit is set.
    pub fn tvm(&self) -> bool {
        self.mstatus.view_bits::<Lsb0>()[idx::TVM]
    }

    pub fn set_tvm(&mut self, value: bool) {
        self.mstatus.view_bits_mut::<Lsb0>().set(idx::TVM, value)
    }

    /// Returns `true` if the TW (Timeout Wait) bit is set.
    pub fn tw(&self) -> bool {
        self.mstatus.view_bits::<Lsb0>()[idx::TW]
    }

    pub fn set_tw(&mut self, value: bool) {
        self.mstatus.view_bits_mut::<Lsb0>().set(idx::TW, value)
    }

    /// Returns `true` if the TSR (Trap SRET) bit is set.
    pub fn tsr(&self) -> bool {
        self.mstatus.view_bits::<Lsb0>()[idx::TSR]
    }

    pub fn set_tsr(&mut self, value: bool) {
        self.mstatus.view_bits_mut::<Lsb0>().set(idx::TSR, value)
    }

    /// Returns the extension context status encoded by the FS (F extension Status) field.
    pub fn fs(&self) -> ExtensionContextStatus {
        ExtensionContextStatus::from_u2(
            self.mstatus.view_bits::<Lsb0>()[idx::FS..(idx::FS + 2)].load_le(),
        )
    }

    /// Sets the FS field. Without floating point registers, FS is read-only Off.
    pub fn set_fs(&mut self, value: ExtensionContextStatus) {
        if self.fs_writable {
            self.mstatus.view_bits_mut::<Lsb0>()[idx::FS..(idx::FS + 2)].store_le(value as u8);
        }
    }

    /// Returns the extension context status encoded by the VS (V extension Status) field.
    pub fn vs(&self) -> ExtensionContextStatus {
        ExtensionContextStatus::from_u2(
            self.mstatus.view_bits::<Lsb0>()[idx::VS..(idx::VS + 2)].load_le(),
        )
    }

    /// Sets the VS field. Without vector registers, VS is read-only Off.
    pub fn set_vs(&mut self, value: ExtensionContextStatus) {
        if self.vs_writable {
            self.mstatus.view_bits_mut::<Lsb0>()[idx::VS..(idx::VS + 2)].store_le(value as u8);
        }
    }

    /// Returns the extension context status encoded by the XS (X extension Status) field.
    ///
    /// There is no additional user-mode state, so this is always Off.
    pub fn xs(&self) -> ExtensionContextStatus {
        ExtensionContextStatus::from_u2(
            self.mstatus.view_bits::<Lsb0>()[idx::XS..(idx::XS + 2)].load_le(),
        )
    }

    /// Returns `true` if the SD (extension Status Dirty) bit reads as set.
    pub fn sd(&self) -> bool {
        use ExtensionContextStatus::Dirty;
        self.fs() == Dirty || self.vs() == Dirty || self.xs() == Dirty
    }

    /// Full XLEN-wide mstatus value as seen by software.
    fn value(&self) -> u128 {
        let mut value = self.mstatus as u128;
        match self.xlen {
            Xlen::Rv32 => value &= 0x7FFF_FFFF,
            Xlen::Rv64 | Xlen::Rv128 => {
                let mxl = self.xlen.mxl();
                value |= mxl << idx::UXL | mxl << idx::SXL;
            }
        }
        if self.sd() {
            value |= 1 << (self.xlen.bits() - 1);
        }
        value
    }
}

/// Bit indices into mstatus register.
mod idx {
    pub const SIE: usize = 1;
    pub const MIE: usize = 3;
    pub const SPIE: usize = 5;
    pub const UBE: usize = 6;
    pub const MPIE: usize = 7;
    pub const SPP: usize = 8;
    pub const VS: usize = 9;
    pub const MPP: usize = 11;
    pub const FS: usize = 13;
    pub const XS: usize = 15;
    pub const MPRV: usize = 17;
    pub const SUM: usize = 18;
    pub const MXR: usize = 19;
    pub const TVM: usize = 20;
    pub const TW: usize = 21;
    pub const TSR: usize = 22;
    pub const UXL: usize = 32;
    pub const SXL: usize = 34;
}

/// Possible values of the extension context status fields (FS, VS, XS) in the mstatus register.
///
/// > | Status | FS and VS Meaning | XS Meaning                   |
/// > | ------ | ----------------- | ---------------------------- |
/// > | 0      | Off               | All off                      |
/// > | 1      | Initial           | None dirty or clean, some on |
/// > | 2      | Clean             | None dirty, some clean       |
/// > | 3      | Dirty             | Some dirty                   |
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExtensionContextStatus {
    Off = 0,
    Initial = 1,
    Clean = 2,
    Dirty = 3,
}

impl ExtensionContextStatus {
    /// Convert a 2-bit value into an [`ExtensionContextStatus`].
    /// Panics if the value doesn't fit in 2 bits (`0..=3`).
    pub fn from_u2(value_u2: u8) -> Self {
        match value_u2 {
            0 => Self::Off,
            1 => Self::Initial,
            2 => Self::Clean,
            3 => Self::Dirty,
            _ => panic!("out of range u2 used"),
        }
    }
}

impl Hart {
    pub fn read_mstatus(&self) -> CsrReadResult {
        Ok(self.status.value())
    }

    pub fn write_mstatus(&mut self, value: u128, mask: u128) -> CsrWriteResult {
        let status = &mut self.status;

        let (value, mask) = (value as u64, mask as u64);
        let mask_bits = mask.view_bits::<Lsb0>();
        let updated = status.mstatus & !mask | value & mask;
        let updated_bits = updated.view_bits::<Lsb0>();

        // Update the fields using the relevant setters to treat WARL fields correctly.
        if mask_bits[idx::SIE] {
            status.set_sie(updated_bits[idx::SIE]);
        }
        if mask_bits[idx::MIE] {
            status.set_mie(updated_bits[idx::MIE]);
        }
        if mask_bits[idx::SPIE] {
            status.set_spie(updated_bits[idx::SPIE]);
        }
        if mask_bits[idx::MPIE] {
            status.set_mpie(updated_bits[idx::MPIE]);
        }
        if mask_bits[idx::SPP] {
            status.set_spp(RawPrivilegeLevel::from_u2(updated_bits[idx::SPP] as u8));
        }
        if mask_bits[idx::VS] | mask_bits[idx::VS + 1] {
            status.set_vs(ExtensionContextStatus::from_u2(
                updated_bits[idx::VS..(idx::VS + 2)].load_le(),
            ));
        }
        if mask_bits[idx::MPP] | mask_bits[idx::MPP + 1] {
            status.set_mpp(RawPrivilegeLevel::from_u2(
                updated_bits[idx::MPP..(idx::MPP + 2)].load_le(),
            ));
        }
        if mask_bits[idx::FS] | mask_bits[idx::FS + 1] {
            status.set_fs(ExtensionContextStatus::from_u2(
                updated_bits[idx::FS..(idx::FS + 2)].load_le(),
            ));
        }
        if mask_bits[idx::MPRV] {
            status.set_mprv(updated_bits[idx::MPRV]);
        }
        if mask_bits[idx::SUM] {
            status.set_sum(updated_bits[idx::SUM]);
        }
        if mask_bits[idx::MXR] {
            status.set_mxr(updated_bits[idx::MXR]);
        }
        if mask_bits[idx::TVM] {
            status.set_tvm(updated_bits[idx::TVM]);
        }
        if mask_bits[idx::TW] {
            status.set_tw(updated_bits[idx::TW]);
        }
        if mask_bits[idx::TSR] {
            status.set_tsr(updated_bits[idx::TSR]);
        }
        // Ignore read-only fields (UBE, XS, UXL, SXL, SD), and the remaining WPRI fields.
        Ok(())
    }

    /// RV32 only. The big-endian bits are hardwired to zero.
    pub fn read_mstatush(&self) -> CsrReadResult {
        Ok(0)
    }

    pub fn write_mstatush(&mut self, _value: u128, _mask: u128) -> CsrWriteResult {
        Ok(())
    }

    pub fn read_sstatus(&self) -> CsrReadResult {
        let sd = 1 << (self.isa.xlen.bits() - 1);
        Ok(self.status.value() & (SSTATUS_MASK as u128 | sd))
    }

    pub fn write_sstatus(&mut self, value: u128, mask: u128) -> CsrWriteResult {
        self.write_mstatus(value, mask & SSTATUS_MASK as u128)
    }
}
