//! Specifiers for all supported CSRs.
//! The hypervisor extension is not supported.

use crate::RawPrivilegeLevel;
use std::ops::RangeInclusive;

/// General 12-bit value representing a CSR specifier. Note that this can hold any 12-bit value,
/// even if the value represents an unsupported or non-existent CSR.
pub type CsrSpecifier = u16;

//
// Unprivileged floating-point CSRs (`0x001..=0x003`).
//
/// Floating-point accrued exceptions.
pub const FFLAGS: CsrSpecifier = 0x001;
/// Floating-point dynamic rounding mode.
pub const FRM: CsrSpecifier = 0x002;
/// Floating-point CSR ([`FRM`] + [`FFLAGS`]).
pub const FCSR: CsrSpecifier = 0x003;

//
// Unprivileged vector CSRs.
//
/// Vector start element index.
pub const VSTART: CsrSpecifier = 0x008;
/// Fixed-point saturate flag.
pub const VXSAT: CsrSpecifier = 0x009;
/// Fixed-point rounding mode.
pub const VXRM: CsrSpecifier = 0x00A;
/// Vector control and status ([`VXRM`] + [`VXSAT`]).
pub const VCSR: CsrSpecifier = 0x00F;
/// Vector length.
pub const VL: CsrSpecifier = 0xC20;
/// Vector data type register.
pub const VTYPE: CsrSpecifier = 0xC21;
/// VLEN/8 (vector register length in bytes).
pub const VLENB: CsrSpecifier = 0xC22;

//
// Unprivileged counters/timers (`0xC00..=0xC1F`, `0xC80..=0xC9F`).
//
/// Cycle counter for RDCYCLE instruction.
pub const CYCLE: CsrSpecifier = 0xC00;
/// Timer for RDTIME instruction.
pub const TIME: CsrSpecifier = 0xC01;
/// Instructions-retired counter for RDINSTRET instruction.
pub const INSTRET: CsrSpecifier = 0xC02;
/// Performance-monitoring counters 3 up to 31.
pub const HPMCOUNTER: RangeInclusive<CsrSpecifier> = 0xC03..=0xC1F;
/// Upper 32 bits of [`CYCLE`], RV32 only.
pub const CYCLEH: CsrSpecifier = 0xC80;
/// Upper 32 bits of [`TIME`], RV32 only.
pub const TIMEH: CsrSpecifier = 0xC81;
/// Upper 32 bits of [`INSTRET`], RV32 only.
pub const INSTRETH: CsrSpecifier = 0xC82;
/// Upper 32 bits of [`HPMCOUNTER`], RV32 only.
pub const HPMCOUNTERH: RangeInclusive<CsrSpecifier> = 0xC83..=0xC9F;

//
// Supervisor trap setup (`0x100..=0x10F`).
//
/// Supervisor status register.
pub const SSTATUS: CsrSpecifier = 0x100;
/// Supervisor interrupt-enable register.
pub const SIE: CsrSpecifier = 0x104;
/// Supervisor trap handler base address.
pub const STVEC: CsrSpecifier = 0x105;
/// Supervisor counter enable.
pub const SCOUNTEREN: CsrSpecifier = 0x106;
/// Supervisor environment configuration register.
pub const SENVCFG: CsrSpecifier = 0x10A;

//
// Supervisor trap handling (`0x140..=0x14F`).
//
/// Scratch register for supervisor trap handlers.
pub const SSCRATCH: CsrSpecifier = 0x140;
/// Supervisor exception program counter.
pub const SEPC: CsrSpecifier = 0x141;
/// Supervisor trap cause.
pub const SCAUSE: CsrSpecifier = 0x142;
/// Supervisor bad address or instruction.
pub const STVAL: CsrSpecifier = 0x143;
/// Supervisor interrupt pending.
pub const SIP: CsrSpecifier = 0x144;

//
// Supervisor protection and translation.
//
/// Supervisor address translation and protection.
pub const SATP: CsrSpecifier = 0x180;

//
// Machine information registers (`0xF11..=0xF15`).
//
/// Vendor ID.
pub const MVENDORID: CsrSpecifier = 0xF11;
/// Architecture ID.
pub const MARCHID: CsrSpecifier = 0xF12;
/// Implementation ID.
pub const MIMPID: CsrSpecifier = 0xF13;
/// Hardware thread ID.
pub const MHARTID: CsrSpecifier = 0xF14;
/// Pointer to configuration data structure.
pub const MCONFIGPTR: CsrSpecifier = 0xF15;

//
// Machine trap setup (`0x300..=0x306`, `0x310`).
//
/// Machine status register.
pub const MSTATUS: CsrSpecifier = 0x300;
/// ISA and extensions
pub const MISA: CsrSpecifier = 0x301;
/// Machine exception delegation register.
pub const MEDELEG: CsrSpecifier = 0x302;
/// Machine interrupt delegation register.
pub const MIDELEG: CsrSpecifier = 0x303;
/// Machine interrupt-enable register.
pub const MIE: CsrSpecifier = 0x304;
/// Machine trap-handler base address.
pub const MTVEC: CsrSpecifier = 0x305;
/// Machine counter enable.
pub const MCOUNTEREN: CsrSpecifier = 0x306;
/// Machine environment configuration register.
pub const MENVCFG: CsrSpecifier = 0x30A;
/// Additional machine status register, RV32 only.
pub const MSTATUSH: CsrSpecifier = 0x310;
/// Additional machine environment configuration register, RV32 only.
pub const MENVCFGH: CsrSpecifier = 0x31A;
/// Machine counter-inhibit register.
pub const MCOUNTINHIBIT: CsrSpecifier = 0x320;
/// Machine performance-monitoring event selectors 3 up to 31.
pub const MHPMEVENT: RangeInclusive<CsrSpecifier> = 0x323..=0x33F;

//
// Machine trap handling (`0x340..=0x34B`).
//
/// Scratch register for machine trap handlers.
pub const MSCRATCH: CsrSpecifier = 0x340;
/// Machine exception program counter.
pub const MEPC: CsrSpecifier = 0x341;
/// Machine trap cause.
pub const MCAUSE: CsrSpecifier = 0x342;
/// Machine bad address or instruction.
pub const MTVAL: CsrSpecifier = 0x343;
/// Machine interrupt pending.
pub const MIP: CsrSpecifier = 0x344;
/// Machine trap instruction (transformed).
pub const MTINST: CsrSpecifier = 0x34A;
/// Machine bad guest physical address.
pub const MTVAL2: CsrSpecifier = 0x34B;

//
// Physical memory protection. Implemented as zero-entry PMP: reads return 0, writes are ignored.
//
/// Physical memory protection configuration registers.
pub const PMPCFG: RangeInclusive<CsrSpecifier> = 0x3A0..=0x3AF;
/// Physical memory protection address registers.
pub const PMPADDR: RangeInclusive<CsrSpecifier> = 0x3B0..=0x3EF;

//
// Machine counters/timers (`0xB00..=0xB1F`, `0xB80..=0xB9F`).
//
/// Machine cycle counter.
pub const MCYCLE: CsrSpecifier = 0xB00;
/// Machine instructions-retired counter.
pub const MINSTRET: CsrSpecifier = 0xB02;
/// Machine performance-monitoring counters 3 up to 31.
pub const MHPMCOUNTER: RangeInclusive<CsrSpecifier> = 0xB03..=0xB1F;
/// Upper 32 bits of [`MCYCLE`], RV32 only.
pub const MCYCLEH: CsrSpecifier = 0xB80;
/// Upper 32 bits of [`MINSTRET`], RV32 only.
pub const MINSTRETH: CsrSpecifier = 0xB82;
/// Upper 32 bits of [`MHPMCOUNTER`], RV32 only.
pub const MHPMCOUNTERH: RangeInclusive<CsrSpecifier> = 0xB83..=0xB9F;

//
// Debug/trace trigger registers (shared with debug mode).
//
/// Debug/Trace trigger register select.
pub const TSELECT: CsrSpecifier = 0x7A0;
/// First Debug/Trace trigger data register.
pub const TDATA1: CsrSpecifier = 0x7A1;
/// Second Debug/Trace trigger data register.
pub const TDATA2: CsrSpecifier = 0x7A2;
/// Third Debug/Trace trigger data register.
pub const TDATA3: CsrSpecifier = 0x7A3;

//
// Debug mode registers. Only accessible while the hart is in debug mode.
//
/// Debug control and status register.
pub const DCSR: CsrSpecifier = 0x7B0;
/// Debug program counter.
pub const DPC: CsrSpecifier = 0x7B1;
/// Debug scratch register 0.
pub const DSCRATCH0: CsrSpecifier = 0x7B2;
/// Debug scratch register 1.
pub const DSCRATCH1: CsrSpecifier = 0x7B3;

/// Returns `true` if the specifier fits in 12 bits.
pub fn is_valid(specifier: CsrSpecifier) -> bool {
    specifier < 1 << 12
}

/// Returns `true` if this CSR only supports read access.
///
/// Requires [`is_valid(specifier)`](is_valid), otherwise the return value is undefined.
pub fn is_read_only(specifier: CsrSpecifier) -> bool {
    // The top two bits of a CSR specifier indicate whether the CSR is read-only (0b11) or
    // read/write (0b00, 0b01, 0b10)
    specifier >> 10 == 0b11
}

/// Returns the minimum required privilege level to access this CSR.
///
/// Requires [`is_valid(specifier)`](is_valid), otherwise the return value is undefined.
///
/// Note that this returns a [`RawPrivilegeLevel`], meaning the minimum required privilege level
/// may be a reserved level. This still has a defined meaning: only higher privilege levels are
/// allowed to access the CSR.
pub fn required_privilege_level(specifier: CsrSpecifier) -> RawPrivilegeLevel {
    // Bits `9:8` indicate the minimum required privilege level
    RawPrivilegeLevel::from_u2(((specifier >> 8) & 0b11) as u8)
}

/// Returns `true` for the CSRs reserved to debug mode (`0x7B0..=0x7BF`).
pub fn is_debug_only(specifier: CsrSpecifier) -> bool {
    (0x7B0..=0x7BF).contains(&specifier)
}

/// Returns `true` for the CSRs that only exist when XLEN is 32 (upper halves).
pub fn is_rv32_only(specifier: CsrSpecifier) -> bool {
    matches!(specifier, CYCLEH | TIMEH | INSTRETH | MCYCLEH | MINSTRETH | MSTATUSH | MENVCFGH)
        || HPMCOUNTERH.contains(&specifier)
        || MHPMCOUNTERH.contains(&specifier)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_only() {
        assert!(is_read_only(CYCLE));
        assert!(is_read_only(MHARTID));
        assert!(is_read_only(VLENB));
        assert!(!is_read_only(MSTATUS));
        assert!(!is_read_only(FCSR));
    }

    #[test]
    fn test_required_privilege_level() {
        assert_eq!(RawPrivilegeLevel::User, required_privilege_level(FFLAGS));
        assert_eq!(RawPrivilegeLevel::User, required_privilege_level(CYCLE));
        assert_eq!(RawPrivilegeLevel::Supervisor, required_privilege_level(SATP));
        assert_eq!(RawPrivilegeLevel::Machine, required_privilege_level(MEPC));
        assert_eq!(RawPrivilegeLevel::Machine, required_privilege_level(DCSR));
    }

    #[test]
    fn test_special_ranges() {
        assert!(is_debug_only(DPC));
        assert!(!is_debug_only(TSELECT));
        assert!(is_rv32_only(MSTATUSH));
        assert!(is_rv32_only(0xC9F));
        assert!(!is_rv32_only(MSTATUS));
    }
}
