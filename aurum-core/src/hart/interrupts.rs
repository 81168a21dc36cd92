use bitvec::{array::BitArray, field::BitField, order::Lsb0, view::BitView};
use serde::{Deserialize, Serialize};

use super::{CsrReadResult, CsrWriteResult, Hart, Interrupt};
use crate::PrivilegeLevel;

const SUPERVISOR_SOFTWARE_INTERRUPT: usize = Interrupt::SupervisorSoftwareInterrupt as usize;
const MACHINE_SOFTWARE_INTERRUPT: usize = Interrupt::MachineSoftwareInterrupt as usize;
const SUPERVISOR_TIMER_INTERRUPT: usize = Interrupt::SupervisorTimerInterrupt as usize;
const MACHINE_TIMER_INTERRUPT: usize = Interrupt::MachineTimerInterrupt as usize;
const SUPERVISOR_EXTERNAL_INTERRUPT: usize = Interrupt::SupervisorExternalInterrupt as usize;
const MACHINE_EXTERNAL_INTERRUPT: usize = Interrupt::MachineExternalInterrupt as usize;

#[allow(clippy::identity_op)]
const VALID_INTERRUPTS_MASK: u16 = 0
    | (1 << SUPERVISOR_SOFTWARE_INTERRUPT)
    | (1 << MACHINE_SOFTWARE_INTERRUPT)
    | (1 << SUPERVISOR_TIMER_INTERRUPT)
    | (1 << MACHINE_TIMER_INTERRUPT)
    | (1 << SUPERVISOR_EXTERNAL_INTERRUPT)
    | (1 << MACHINE_EXTERNAL_INTERRUPT);

#[allow(clippy::identity_op)]
const DELEGATABLE_INTERRUPTS_MASK: u16 = 0
    | (1 << SUPERVISOR_SOFTWARE_INTERRUPT)
    | (1 << SUPERVISOR_TIMER_INTERRUPT)
    | (1 << SUPERVISOR_EXTERNAL_INTERRUPT);

/// Interrupts in the order they are taken when several are pending and enabled at once.
const PRIORITY: [Interrupt; 6] = [
    Interrupt::MachineExternalInterrupt,
    Interrupt::MachineSoftwareInterrupt,
    Interrupt::MachineTimerInterrupt,
    Interrupt::SupervisorExternalInterrupt,
    Interrupt::SupervisorSoftwareInterrupt,
    Interrupt::SupervisorTimerInterrupt,
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Interrupts {
    /// Array of booleans, with for each bit index matching an interrupts's code a bool indicating
    /// whether handling that interrupt should be delegated to S-mode (if not triggered in M-mode).
    delegate: BitArray<[u16; 1], Lsb0>,

    /// Software-writable bit that is ORed with [`seip_external`] to become the SEIP field of the
    /// final [`mip`] register.
    seip_external: bool,
    /// External interrupt bit that is ORed with [`seip_internal`] to become the SEIP field of the
    /// final [`mip`] register.
    seip_internal: bool,

    /// The final mip register as visible from guest software. This means the SEIP field is
    /// recomputed each time [`seip_external`] or [`seip_internal`] changes.
    mip: BitArray<[u16; 1], Lsb0>,

    /// The mie register.
    mie: BitArray<[u16; 1], Lsb0>,
}

impl Default for Interrupts {
    fn default() -> Self {
        Self::new()
    }
}

impl Interrupts {
    pub fn new() -> Self {
        Self {
            delegate: BitArray::new([0x0000]),
            seip_external: false,
            seip_internal: false,
            mip: BitArray::new([0x0000]),
            mie: BitArray::new([0x0000]),
        }
    }

    pub fn should_delegate(&self, interrupt: Interrupt) -> bool {
        self.delegate[interrupt as usize]
    }

    /// Returns `true` if any interrupt is both pending and enabled, regardless of the global
    /// enable bits. This is the wake-up condition of `wfi`.
    pub fn any_pending_enabled(&self) -> bool {
        (self.mip & self.mie).any()
    }

    /// Indicate whether there is an M-level external interrupt pending (MEIP).
    ///
    /// Controlled by the PLIC.
    pub fn set_m_external(&mut self, value: bool) {
        self.mip.set(MACHINE_EXTERNAL_INTERRUPT, value);
    }

    /// Indicate whether there is an S-level external interrupt pending (SEIP).
    ///
    /// Controlled by the PLIC. Note that calling this with `false` does not mean the SEIP field
    /// will be set to `0`, since it is ORed with the (hidden) software-writable SEIP bit.
    pub fn set_s_external(&mut self, value: bool) {
        self.seip_external = value;
        self.mip.set(
            SUPERVISOR_EXTERNAL_INTERRUPT,
            self.seip_external | self.seip_internal,
        );
    }

    /// Indicate whether there is an M-level timer interrupt pending (MTIP).
    ///
    /// Controlled externally based on memory-mapped mtime and mtimecmp registers.
    pub fn set_m_timer(&mut self, value: bool) {
        self.mip.set(MACHINE_TIMER_INTERRUPT, value);
    }

    /// Indicate whether an M-level software interrupt is pending (MSIP).
    ///
    /// Controlled by accesses to memory-mapped control registers.
    pub fn set_m_soft(&mut self, value: bool) {
        self.mip.set(MACHINE_SOFTWARE_INTERRUPT, value);
    }

    /// Indicate that an S-level software interrupt is pending (SSIP).
    ///
    /// Note that it is not possible to clear this bit. That is only possible from guest code.
    pub fn set_s_soft(&mut self) {
        self.mip.set(SUPERVISOR_SOFTWARE_INTERRUPT, true);
    }
}

impl Hart {
    /// Returns the highest priority interrupt that is pending, enabled, and not masked by the
    /// current privilege level and global interrupt-enable bits.
    ///
    /// > An interrupt i will trap to M-mode (causing the privilege mode to change to M-mode) if all
    /// > of the following are true: (a) either the current privilege mode is M and the MIE bit in
    /// > the mstatus register is set, or the current privilege mode has less privilege than M-mode;
    /// > (b) bit i is set in both mip and mie; and (c) if register mideleg exists, bit i is not set
    /// > in mideleg.
    pub fn interrupt_to_take(&self) -> Option<Interrupt> {
        let interrupts = &self.interrupts;
        let pending = interrupts.mip & interrupts.mie;
        if !pending.any() {
            return None;
        }
        let privilege = self.privilege;
        let m_enabled = privilege < PrivilegeLevel::Machine || self.status.mie();
        let s_enabled = privilege < PrivilegeLevel::Supervisor
            || (privilege == PrivilegeLevel::Supervisor && self.status.sie());
        PRIORITY.into_iter().find(|&interrupt| {
            if !pending[interrupt as usize] {
                false
            } else if interrupts.should_delegate(interrupt) {
                s_enabled
            } else {
                m_enabled
            }
        })
    }

    pub fn read_mideleg(&self) -> CsrReadResult {
        Ok(self.interrupts.delegate.load_le::<u16>() as u128)
    }

    /// The mideleg register is **WARL**.
    pub fn write_mideleg(&mut self, value: u128, mask: u128) -> CsrWriteResult {
        let mideleg = &mut self.interrupts.delegate;
        let mask = mask as u16 & DELEGATABLE_INTERRUPTS_MASK;
        mideleg.store_le(mideleg.load_le::<u16>() & !mask | value as u16 & mask);
        Ok(())
    }

    pub fn read_mip(&self) -> CsrReadResult {
        Ok(self.interrupts.mip.load_le::<u16>() as u128)
    }

    pub fn write_mip(&mut self, value: u128, mask: u128) -> CsrWriteResult {
        let (value, mask) = (value as u16, mask as u16);
        let mask = mask.view_bits::<Lsb0>();
        let value = value.view_bits::<Lsb0>();

        // Writes to MEIP, MTIP, and MSIP are ignored. Their values are managed externally.

        let interrupts = &mut self.interrupts;

        if mask[SUPERVISOR_EXTERNAL_INTERRUPT] {
            interrupts.seip_internal = value[SUPERVISOR_EXTERNAL_INTERRUPT];
            interrupts.mip.set(
                SUPERVISOR_EXTERNAL_INTERRUPT,
                interrupts.seip_external | interrupts.seip_internal,
            );
        }

        if mask[SUPERVISOR_TIMER_INTERRUPT] {
            interrupts.mip.set(
                SUPERVISOR_TIMER_INTERRUPT,
                value[SUPERVISOR_TIMER_INTERRUPT],
            );
        }

        if mask[SUPERVISOR_SOFTWARE_INTERRUPT] {
            interrupts.mip.set(
                SUPERVISOR_SOFTWARE_INTERRUPT,
                value[SUPERVISOR_SOFTWARE_INTERRUPT],
            );
        }

        Ok(())
    }

    pub fn read_mie(&self) -> CsrReadResult {
        Ok(self.interrupts.mie.load_le::<u16>() as u128)
    }

    pub fn write_mie(&mut self, value: u128, mask: u128) -> CsrWriteResult {
        let mie = &mut self.interrupts.mie;
        let mask = mask as u16 & VALID_INTERRUPTS_MASK;
        mie.store_le(mie.load_le::<u16>() & !mask | value as u16 & mask);
        Ok(())
    }

    pub fn read_sip(&self) -> CsrReadResult {
        let interrupts = &self.interrupts;
        Ok((interrupts.mip & interrupts.delegate).load_le::<u16>() as u128)
    }

    pub fn write_sip(&mut self, value: u128, mask: u128) -> CsrWriteResult {
        // SEIP and STIP are read-only in sip, so writes to it are ignored.
        let interrupts = &mut self.interrupts;
        let writable = mask as u16 & interrupts.delegate.load_le::<u16>();
        if writable.view_bits::<Lsb0>()[SUPERVISOR_SOFTWARE_INTERRUPT] {
            interrupts.mip.set(
                SUPERVISOR_SOFTWARE_INTERRUPT,
                (value as u16).view_bits::<Lsb0>()[SUPERVISOR_SOFTWARE_INTERRUPT],
            );
        }
        Ok(())
    }

    pub fn read_sie(&self) -> CsrReadResult {
        let interrupts = &self.interrupts;
        Ok((interrupts.mie & interrupts.delegate).load_le::<u16>() as u128)
    }

    pub fn write_sie(&mut self, value: u128, mask: u128) -> CsrWriteResult {
        let interrupts = &mut self.interrupts;
        let delegate = interrupts.delegate.load_le::<u16>();
        // Since we are masking with `delegate`, it is not needed to also mask with
        // VALID_INTERRUPTS_MASK (or DELEGATABLE_INTERRUPTS_MASK).
        let mask = mask as u16 & delegate;
        let mie = &mut interrupts.mie;
        mie.store_le(mie.load_le::<u16>() & !mask | value as u16 & mask);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::IsaConfig;

    fn hart() -> Hart {
        Hart::new(0, &IsaConfig::parse("rv64gc").unwrap(), 0x8000_0000, false, false)
    }

    #[test]
    fn test_mip_write_ignores_machine_bits() {
        let mut hart = hart();
        hart.write_mip(0xFFFF, 0xFFFF).unwrap();
        assert_eq!(
            Ok(1 << SUPERVISOR_SOFTWARE_INTERRUPT
                | 1 << SUPERVISOR_TIMER_INTERRUPT
                | 1 << SUPERVISOR_EXTERNAL_INTERRUPT),
            hart.read_mip()
        );
    }

    #[test]
    fn test_seip_is_ored() {
        let mut hart = hart();
        hart.interrupts.set_s_external(true);
        hart.write_mip(0, 1 << SUPERVISOR_EXTERNAL_INTERRUPT).unwrap();
        assert_eq!(Ok(1 << SUPERVISOR_EXTERNAL_INTERRUPT), hart.read_mip());
        hart.interrupts.set_s_external(false);
        assert_eq!(Ok(0), hart.read_mip());
    }

    #[test]
    fn test_supervisor_view_is_masked_by_delegation() {
        let mut hart = hart();
        hart.write_mie(u128::MAX, u128::MAX).unwrap();
        assert_eq!(Ok(VALID_INTERRUPTS_MASK as u128), hart.read_mie());
        assert_eq!(Ok(0), hart.read_sie());
        hart.write_mideleg(u128::MAX, u128::MAX).unwrap();
        assert_eq!(Ok(DELEGATABLE_INTERRUPTS_MASK as u128), hart.read_mideleg());
        assert_eq!(Ok(DELEGATABLE_INTERRUPTS_MASK as u128), hart.read_sie());
    }

    #[test]
    fn test_interrupt_priority_and_enable() {
        let mut hart = hart();
        hart.write_mie(u128::MAX, u128::MAX).unwrap();
        hart.interrupts.set_m_timer(true);
        hart.interrupts.set_m_soft(true);
        // M-mode with MIE clear masks everything
        assert_eq!(None, hart.interrupt_to_take());
        hart.status.set_mie(true);
        assert_eq!(
            Some(Interrupt::MachineSoftwareInterrupt),
            hart.interrupt_to_take()
        );
        hart.interrupts.set_m_external(true);
        assert_eq!(
            Some(Interrupt::MachineExternalInterrupt),
            hart.interrupt_to_take()
        );
    }

    #[test]
    fn test_delegated_interrupt_not_taken_in_machine_mode() {
        let mut hart = hart();
        hart.write_mie(u128::MAX, u128::MAX).unwrap();
        hart.write_mideleg(u128::MAX, u128::MAX).unwrap();
        hart.write_mip(1 << SUPERVISOR_TIMER_INTERRUPT, u128::MAX).unwrap();
        hart.status.set_mie(true);
        hart.status.set_sie(true);
        assert_eq!(None, hart.interrupt_to_take());
        hart.privilege = PrivilegeLevel::Supervisor;
        assert_eq!(
            Some(Interrupt::SupervisorTimerInterrupt),
            hart.interrupt_to_take()
        );
        hart.status.set_sie(false);
        assert_eq!(None, hart.interrupt_to_take());
        hart.privilege = PrivilegeLevel::User;
        assert_eq!(
            Some(Interrupt::SupervisorTimerInterrupt),
            hart.interrupt_to_take()
        );
    }
}
