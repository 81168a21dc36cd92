use bitvec::{field::BitField, order::Lsb0, view::BitView};
use log::debug;
use serde::{Deserialize, Serialize};

use super::{CsrReadResult, CsrWriteResult, Exception, Hart, Interrupt};
use crate::config::{Extension, Xlen};
use crate::{PrivilegeLevel, RawPrivilegeLevel};

/// Address execution continues at when entering debug mode.
pub const DEBUG_ROM_ENTRY: u64 = 0x800;

/// Registers written when taking a trap, for both M-mode and S-mode.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Trap {
    mscratch: u128,
    mepc: u64,
    pub mcause: Cause,
    mtval: u64,
    mtinst: u64,
    mtval2: u64,

    sscratch: u128,
    sepc: u64,
    pub scause: Cause,
    stval: u64,
}

/// Contents of an mcause or scause register.
///
/// The interrupt flag lives in the most significant bit, so its position depends on XLEN.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Cause(u128);

impl Cause {
    pub fn read(&self) -> u128 {
        self.0
    }

    pub fn write(&mut self, value: u128, mask: u128) {
        self.0 = self.0 & !mask | value & mask;
    }

    pub fn set(&mut self, cause: TrapCause, xlen: Xlen) {
        self.0 = match cause {
            TrapCause::Exception(exception) => exception.code() as u128,
            TrapCause::Interrupt(interrupt) => {
                1 << (xlen.bits() - 1) | interrupt.code() as u128
            }
        };
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum TrapCause {
    Exception(Exception),
    Interrupt(Interrupt),
}

impl From<Exception> for TrapCause {
    fn from(value: Exception) -> Self {
        Self::Exception(value)
    }
}

impl From<Interrupt> for TrapCause {
    fn from(value: Interrupt) -> Self {
        Self::Interrupt(value)
    }
}

/// Reason for entering debug mode, as reported in `dcsr.cause`.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[repr(u8)]
pub enum DebugCause {
    Ebreak = 1,
    Trigger = 2,
    HaltRequest = 3,
    Step = 4,
}

/// Core debug registers: dcsr, dpc, dscratch0, and dscratch1.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebugState {
    dcsr: u32,
    dpc: u64,
    dscratch0: u128,
    dscratch1: u128,
}

impl Default for DebugState {
    fn default() -> Self {
        Self::new()
    }
}

impl DebugState {
    /// Debug specification version 0.13 (`xdebugver` = 4), previous privilege M.
    const RESET_DCSR: u32 = 4 << 28 | 0b11;

    #[allow(clippy::identity_op)]
    const WRITABLE_MASK: u32 = 0
        | (0b11 << idx::PRV)
        | (1 << idx::STEP)
        | (1 << idx::STOPTIME)
        | (1 << idx::STOPCOUNT)
        | (1 << idx::STEPIE)
        | (1 << idx::EBREAKU)
        | (1 << idx::EBREAKS)
        | (1 << idx::EBREAKM);

    pub fn new() -> Self {
        Self {
            dcsr: Self::RESET_DCSR,
            dpc: 0,
            dscratch0: 0,
            dscratch1: 0,
        }
    }

    /// Returns `true` if `ebreak` executed at `privilege` enters debug mode instead of trapping.
    pub fn ebreak_enters_debug(&self, privilege: PrivilegeLevel) -> bool {
        let bits = self.dcsr.view_bits::<Lsb0>();
        match privilege {
            PrivilegeLevel::User => bits[idx::EBREAKU],
            PrivilegeLevel::Supervisor => bits[idx::EBREAKS],
            PrivilegeLevel::Machine => bits[idx::EBREAKM],
        }
    }

    /// Privilege level restored by `dret`.
    pub fn prv(&self) -> PrivilegeLevel {
        let prv = self.dcsr.view_bits::<Lsb0>()[idx::PRV..][..2].load_le();
        let raw = RawPrivilegeLevel::from_u2(prv);
        PrivilegeLevel::try_from(raw).unwrap_or(PrivilegeLevel::Machine)
    }

    fn enter(&mut self, cause: DebugCause, privilege: PrivilegeLevel, pc: u64) {
        let bits = self.dcsr.view_bits_mut::<Lsb0>();
        bits[idx::CAUSE..][..3].store_le(cause as u8);
        bits[idx::PRV..][..2].store_le(privilege.as_u2());
        self.dpc = pc;
    }

    pub fn read_dcsr(&self) -> u32 {
        self.dcsr
    }

    /// The prv field is **WARL** and keeps its value when written with the reserved level.
    pub fn write_dcsr(&mut self, value: u32, mask: u32) {
        let mut mask = mask & Self::WRITABLE_MASK;
        if RawPrivilegeLevel::from_u2(((value >> idx::PRV) & 0b11) as u8).is_reserved() {
            mask &= !(0b11 << idx::PRV);
        }
        self.dcsr = self.dcsr & !mask | value & mask;
    }
}

/// Bit indices into the dcsr register.
mod idx {
    pub const PRV: usize = 0;
    pub const STEP: usize = 2;
    pub const CAUSE: usize = 6;
    pub const STOPTIME: usize = 9;
    pub const STOPCOUNT: usize = 10;
    pub const STEPIE: usize = 11;
    pub const EBREAKU: usize = 12;
    pub const EBREAKS: usize = 13;
    pub const EBREAKM: usize = 15;
}

impl Hart {
    /// Raises `exception` with trap value `tval` on this hart.
    ///
    /// A breakpoint enters debug mode instead of trapping if dcsr says so for the current
    /// privilege level.
    pub fn take_exception(&mut self, exception: Exception, tval: u64) {
        if exception == Exception::Breakpoint
            && !self.debug_mode
            && self.debug.ebreak_enters_debug(self.privilege)
        {
            self.enter_debug_mode(DebugCause::Ebreak);
            return;
        }
        self.take_trap(exception.into(), tval);
    }

    pub fn take_interrupt(&mut self, interrupt: Interrupt) {
        self.take_trap(interrupt.into(), 0);
    }

    /// Performs the trap entry sequence.
    ///
    /// > By default, all traps at any privilege level are handled in machine mode [...]. To
    /// > increase performance, implementations can provide individual read/write bits within
    /// > medeleg and mideleg to indicate that certain exceptions and interrupts should be
    /// > processed directly by a lower privilege level.
    ///
    /// > Traps never transition from a more-privileged mode to a less-privileged mode.
    fn take_trap(&mut self, cause: TrapCause, tval: u64) {
        let pc = self.registers.pc();
        let delegate = self.privilege <= PrivilegeLevel::Supervisor
            && match cause {
                TrapCause::Exception(exception) => self.control.medeleg.should_delegate(exception),
                TrapCause::Interrupt(interrupt) => self.interrupts.should_delegate(interrupt),
            };
        let xlen = self.isa.xlen;
        let status = &mut self.status;
        let trap = &mut self.trap;

        let target = if delegate {
            debug!("Hart {} taking {cause:?} to S-mode at {pc:#x}", self.id);
            trap.sepc = pc;
            trap.scause.set(cause, xlen);
            trap.stval = tval;
            status.set_spie(status.sie());
            status.set_sie(false);
            status.set_spp(self.privilege.into());
            self.privilege = PrivilegeLevel::Supervisor;
            self.control.stvec.target(cause)
        } else {
            debug!("Hart {} taking {cause:?} to M-mode at {pc:#x}", self.id);
            trap.mepc = pc;
            trap.mcause.set(cause, xlen);
            trap.mtval = tval;
            trap.mtinst = 0;
            trap.mtval2 = 0;
            status.set_mpie(status.mie());
            status.set_mie(false);
            status.set_mpp(self.privilege.into());
            self.privilege = PrivilegeLevel::Machine;
            self.control.mtvec.target(cause)
        };
        self.flush_tlbs();
        self.registers.set_pc(target);
    }

    /// Enters debug mode, saving the current pc and privilege level in dpc and dcsr.
    pub fn enter_debug_mode(&mut self, cause: DebugCause) {
        let pc = self.registers.pc();
        debug!("Hart {} entering debug mode ({cause:?}) at {pc:#x}", self.id);
        self.debug.enter(cause, self.privilege, pc);
        self.debug_mode = true;
        self.privilege = PrivilegeLevel::Machine;
        self.flush_tlbs();
        self.registers.set_pc(DEBUG_ROM_ENTRY);
    }

    /// Returns from an M-mode trap handler.
    ///
    /// > An MRET or SRET instruction is used to return from a trap in M-mode or S-mode
    /// > respectively. When executing an xRET instruction, supposing xPP holds the value y, xIE is
    /// > set to xPIE; the privilege mode is changed to y; xPIE is set to 1; and xPP is set to the
    /// > least-privileged supported mode (U if U-mode is implemented, else M). If y≠M, xRET also
    /// > sets MPRV=0.
    pub fn mret(&mut self) {
        let status = &mut self.status;
        let mpp = status.mpp();
        status.set_mie(status.mpie());
        status.set_mpie(true);
        status.set_mpp(RawPrivilegeLevel::User);
        if mpp != PrivilegeLevel::Machine {
            status.set_mprv(false);
        }
        self.privilege = mpp;
        let mepc = self.epc(self.trap.mepc);
        self.flush_tlbs();
        self.registers.set_pc(mepc);
    }

    /// Returns from an S-mode trap handler. See [`mret`](Self::mret).
    pub fn sret(&mut self) {
        let status = &mut self.status;
        let spp = status.spp();
        status.set_sie(status.spie());
        status.set_spie(true);
        status.set_spp(RawPrivilegeLevel::User);
        status.set_mprv(false);
        self.privilege = spp;
        let sepc = self.epc(self.trap.sepc);
        self.flush_tlbs();
        self.registers.set_pc(sepc);
    }

    /// Leaves debug mode, restoring the pc from dpc and the privilege level from dcsr.
    pub fn dret(&mut self) {
        self.privilege = self.debug.prv();
        if self.privilege != PrivilegeLevel::Machine {
            self.status.set_mprv(false);
        }
        self.debug_mode = false;
        self.flush_tlbs();
        self.registers.set_pc(self.debug.dpc);
    }

    /// Applies the IALIGN view to an exception program counter.
    ///
    /// > If an implementation allows IALIGN to be either 16 or 32 (by changing CSR misa, for
    /// > example), then, whenever IALIGN=32, bit mepc[1] is masked on reads so that it appears to
    /// > be 0.
    fn epc(&self, epc: u64) -> u64 {
        if self.isa.has(Extension::C) {
            epc
        } else {
            epc & !0b10
        }
    }

    pub fn read_mscratch(&self) -> CsrReadResult {
        Ok(self.trap.mscratch)
    }

    pub fn write_mscratch(&mut self, value: u128, mask: u128) -> CsrWriteResult {
        let trap = &mut self.trap;
        trap.mscratch = trap.mscratch & !mask | value & mask;
        Ok(())
    }

    pub fn read_mepc(&self) -> CsrReadResult {
        Ok(self.epc(self.trap.mepc) as u128)
    }

    pub fn write_mepc(&mut self, value: u128, mask: u128) -> CsrWriteResult {
        let (value, mask) = (value as u64, mask as u64);
        let trap = &mut self.trap;
        trap.mepc = (trap.mepc & !mask | value & mask) & !0b1;
        Ok(())
    }

    pub fn read_mcause(&self) -> CsrReadResult {
        Ok(self.trap.mcause.read())
    }

    pub fn write_mcause(&mut self, value: u128, mask: u128) -> CsrWriteResult {
        self.trap.mcause.write(value, self.isa.xlen.zext(mask));
        Ok(())
    }

    pub fn read_mtval(&self) -> CsrReadResult {
        Ok(self.trap.mtval as u128)
    }

    pub fn write_mtval(&mut self, value: u128, mask: u128) -> CsrWriteResult {
        let trap = &mut self.trap;
        trap.mtval = trap.mtval & !(mask as u64) | value as u64 & mask as u64;
        Ok(())
    }

    pub fn read_mtinst(&self) -> CsrReadResult {
        Ok(self.trap.mtinst as u128)
    }

    pub fn write_mtinst(&mut self, value: u128, mask: u128) -> CsrWriteResult {
        let trap = &mut self.trap;
        trap.mtinst = trap.mtinst & !(mask as u64) | value as u64 & mask as u64;
        Ok(())
    }

    pub fn read_mtval2(&self) -> CsrReadResult {
        Ok(self.trap.mtval2 as u128)
    }

    pub fn write_mtval2(&mut self, value: u128, mask: u128) -> CsrWriteResult {
        let trap = &mut self.trap;
        trap.mtval2 = trap.mtval2 & !(mask as u64) | value as u64 & mask as u64;
        Ok(())
    }

    pub fn read_sscratch(&self) -> CsrReadResult {
        Ok(self.trap.sscratch)
    }

    pub fn write_sscratch(&mut self, value: u128, mask: u128) -> CsrWriteResult {
        let trap = &mut self.trap;
        trap.sscratch = trap.sscratch & !mask | value & mask;
        Ok(())
    }

    pub fn read_sepc(&self) -> CsrReadResult {
        Ok(self.epc(self.trap.sepc) as u128)
    }

    pub fn write_sepc(&mut self, value: u128, mask: u128) -> CsrWriteResult {
        let (value, mask) = (value as u64, mask as u64);
        let trap = &mut self.trap;
        trap.sepc = (trap.sepc & !mask | value & mask) & !0b1;
        Ok(())
    }

    pub fn read_scause(&self) -> CsrReadResult {
        Ok(self.trap.scause.read())
    }

    pub fn write_scause(&mut self, value: u128, mask: u128) -> CsrWriteResult {
        self.trap.scause.write(value, self.isa.xlen.zext(mask));
        Ok(())
    }

    pub fn read_stval(&self) -> CsrReadResult {
        Ok(self.trap.stval as u128)
    }

    pub fn write_stval(&mut self, value: u128, mask: u128) -> CsrWriteResult {
        let trap = &mut self.trap;
        trap.stval = trap.stval & !(mask as u64) | value as u64 & mask as u64;
        Ok(())
    }

    pub fn read_dcsr(&self) -> CsrReadResult {
        Ok(self.debug.read_dcsr() as u128)
    }

    pub fn write_dcsr(&mut self, value: u128, mask: u128) -> CsrWriteResult {
        self.debug.write_dcsr(value as u32, mask as u32);
        Ok(())
    }

    pub fn read_dpc(&self) -> CsrReadResult {
        Ok(self.debug.dpc as u128)
    }

    pub fn write_dpc(&mut self, value: u128, mask: u128) -> CsrWriteResult {
        let (value, mask) = (value as u64, mask as u64);
        let debug = &mut self.debug;
        debug.dpc = (debug.dpc & !mask | value & mask) & !0b1;
        Ok(())
    }

    pub fn read_dscratch0(&self) -> CsrReadResult {
        Ok(self.debug.dscratch0)
    }

    pub fn write_dscratch0(&mut self, value: u128, mask: u128) -> CsrWriteResult {
        let debug = &mut self.debug;
        debug.dscratch0 = debug.dscratch0 & !mask | value & mask;
        Ok(())
    }

    pub fn read_dscratch1(&self) -> CsrReadResult {
        Ok(self.debug.dscratch1)
    }

    pub fn write_dscratch1(&mut self, value: u128, mask: u128) -> CsrWriteResult {
        let debug = &mut self.debug;
        debug.dscratch1 = debug.dscratch1 & !mask | value & mask;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::IsaConfig;

    fn hart(isa: &str) -> Hart {
        Hart::new(0, &IsaConfig::parse(isa).unwrap(), 0x8000_0000, false, false)
    }

    #[test]
    fn test_trap_to_machine_mode() {
        let mut hart = hart("rv64gc");
        hart.write_mtvec(0x8000_1000, u128::MAX).unwrap();
        hart.status.set_mie(true);
        hart.privilege = PrivilegeLevel::User;
        hart.take_exception(Exception::IllegalInstruction, 0x1234);

        assert_eq!(PrivilegeLevel::Machine, hart.privilege);
        assert_eq!(0x8000_1000, hart.registers.pc());
        assert_eq!(Ok(0x8000_0000), hart.read_mepc());
        assert_eq!(Ok(2), hart.read_mcause());
        assert_eq!(Ok(0x1234), hart.read_mtval());
        assert_eq!(PrivilegeLevel::User, hart.status.mpp());
        assert!(hart.status.mpie());
        assert!(!hart.status.mie());
    }

    #[test]
    fn test_delegated_trap_and_sret() {
        let mut hart = hart("rv64gc");
        hart.write_stvec(0x8000_2000, u128::MAX).unwrap();
        hart.write_medeleg(1 << Exception::ENVIRONMENT_CALL_FROM_U_MODE, u128::MAX)
            .unwrap();
        hart.privilege = PrivilegeLevel::User;
        hart.status.set_sie(true);
        hart.take_exception(Exception::EnvironmentCallFromUMode, 0);

        assert_eq!(PrivilegeLevel::Supervisor, hart.privilege);
        assert_eq!(0x8000_2000, hart.registers.pc());
        assert_eq!(Ok(8), hart.read_scause());
        assert_eq!(PrivilegeLevel::User, hart.status.spp());
        assert!(!hart.status.sie());

        hart.write_sepc(0x8000_0004, u128::MAX).unwrap();
        hart.sret();
        assert_eq!(PrivilegeLevel::User, hart.privilege);
        assert_eq!(0x8000_0004, hart.registers.pc());
        assert!(hart.status.sie());
    }

    #[test]
    fn test_machine_mode_traps_never_delegate() {
        let mut hart = hart("rv64gc");
        hart.write_medeleg(u128::MAX, u128::MAX).unwrap();
        hart.take_exception(Exception::LoadPageFault, 0x10);
        assert_eq!(Ok(13), hart.read_mcause());
        assert_eq!(PrivilegeLevel::Machine, hart.privilege);
    }

    #[test]
    fn test_interrupt_cause_bit_and_vector() {
        let mut hart = hart("rv32imac");
        hart.write_mtvec(0x8000_0001, u128::MAX).unwrap();
        hart.take_interrupt(Interrupt::MachineTimerInterrupt);
        assert_eq!(Ok(0x8000_0007), hart.read_mcause());
        assert_eq!(0x8000_001C, hart.registers.pc());
    }

    #[test]
    fn test_mret_restores_state() {
        let mut hart = hart("rv64gc");
        hart.status.set_mpp(RawPrivilegeLevel::Supervisor);
        hart.status.set_mpie(true);
        hart.status.set_mprv(true);
        hart.write_mepc(0x8000_0100, u128::MAX).unwrap();
        hart.mret();
        assert_eq!(PrivilegeLevel::Supervisor, hart.privilege);
        assert_eq!(0x8000_0100, hart.registers.pc());
        assert!(hart.status.mie());
        assert!(!hart.status.mprv());
        assert_eq!(PrivilegeLevel::User, hart.status.mpp());
    }

    #[test]
    fn test_epc_masked_without_compressed() {
        let mut without_c = hart("rv64g");
        without_c.write_mepc(0x8000_0006, u128::MAX).unwrap();
        assert_eq!(Ok(0x8000_0004), without_c.read_mepc());
        let mut with_c = hart("rv64gc");
        with_c.write_mepc(0x8000_0007, u128::MAX).unwrap();
        assert_eq!(Ok(0x8000_0006), with_c.read_mepc());
    }

    #[test]
    fn test_ebreak_enters_debug_mode() {
        let mut hart = hart("rv64gc");
        hart.privilege = PrivilegeLevel::Supervisor;
        hart.write_dcsr(1 << idx::EBREAKS, 1 << idx::EBREAKS).unwrap();
        hart.take_exception(Exception::Breakpoint, 0);
        assert!(hart.debug_mode);
        assert_eq!(DEBUG_ROM_ENTRY, hart.registers.pc());
        assert_eq!(Ok(0x8000_0000), hart.read_dpc());
        let dcsr = hart.read_dcsr().unwrap() as u32;
        assert_eq!(1, (dcsr >> idx::CAUSE) & 0b111);
        assert_eq!(1, dcsr & 0b11);

        hart.dret();
        assert!(!hart.debug_mode);
        assert_eq!(PrivilegeLevel::Supervisor, hart.privilege);
        assert_eq!(0x8000_0000, hart.registers.pc());
    }

    #[test]
    fn test_dcsr_prv_warl() {
        let mut debug = DebugState::new();
        debug.write_dcsr(0b10, u32::MAX);
        assert_eq!(PrivilegeLevel::Machine, debug.prv());
        debug.write_dcsr(0b00, u32::MAX);
        assert_eq!(PrivilegeLevel::User, debug.prv());
        // xdebugver is read-only
        assert_eq!(4, debug.read_dcsr() >> 28);
    }
}
