use bitvec::{field::BitField, order::Lsb0, view::BitView};
use log::warn;
use serde::{Deserialize, Serialize};

use super::{CsrReadResult, CsrWriteResult, Exception, Hart, TrapCause};
use crate::csr::CsrSpecifier;

/// Trap-related control registers that only hold configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Control {
    pub mtvec: Tvec,
    pub medeleg: Medeleg,
    pub mcounteren: Counteren,
    pub menvcfg: Envcfg,

    pub stvec: Tvec,
    pub scounteren: Counteren,
    pub senvcfg: Envcfg,
}

/// Trap Vector Base Address Register (mtvec and stvec).
///
/// > The mtvec register is an MXLEN-bit WARL read/write register that holds trap vector
/// > configuration, consisting of a vector base address (BASE) and a vector mode (MODE).
///
/// > When MODE=Direct, all traps into machine mode cause the pc to be set to the address in the
/// > BASE field. When MODE=Vectored, all synchronous exceptions into machine mode cause the pc to
/// > be set to the address in the BASE field, whereas interrupts cause the pc to be set to the
/// > address in the BASE field plus four times the interrupt cause number.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Tvec(u64);

impl Tvec {
    pub fn new() -> Self {
        Self(0x0000_0000)
    }

    pub fn read(&self) -> u64 {
        self.0
    }

    pub fn write(&mut self, value: u64, mask: u64) {
        let new_value = self.0 & !mask | value & mask;
        if new_value & 0b11 >= 2 {
            // Reserved MODE.
            // Since this is a WARL register, we can set the register to any legal value here.
            // Choose to preserve the old value.
        } else {
            self.0 = new_value;
        }
    }

    /// Returns the vector base address (stored in BASE field).
    pub fn base(&self) -> u64 {
        self.0.view_bits::<Lsb0>()[2..].load_le::<u64>() << 2
    }

    /// Returns the vector mode (stored in MODE field).
    pub fn mode(&self) -> VectorMode {
        match self.0.view_bits::<Lsb0>()[0] {
            false => VectorMode::Direct,
            true => VectorMode::Vectored,
        }
    }

    /// Returns the address a trap with `cause` jumps to.
    pub fn target(&self, cause: TrapCause) -> u64 {
        match (self.mode(), cause) {
            (VectorMode::Vectored, TrapCause::Interrupt(interrupt)) => {
                self.base().wrapping_add(4 * interrupt.code())
            }
            _ => self.base(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VectorMode {
    Direct,
    Vectored,
}

/// The medeleg register is **WARL**.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Medeleg(u64);

impl Medeleg {
    // Environment calls from M-mode can never be delegated.
    #[allow(clippy::identity_op)]
    const DELEGATABLE_EXCEPTIONS_MASK: u64 = 0
        | (1 << Exception::INSTRUCTION_ADDRESS_MISALIGNED)
        | (1 << Exception::INSTRUCTION_ACCESS_FAULT)
        | (1 << Exception::ILLEGAL_INSTRUCTION)
        | (1 << Exception::BREAKPOINT)
        | (1 << Exception::LOAD_ADDRESS_MISALIGNED)
        | (1 << Exception::LOAD_ACCESS_FAULT)
        | (1 << Exception::STORE_OR_AMO_ADDRESS_MISALIGNED)
        | (1 << Exception::STORE_OR_AMO_ACCESS_FAULT)
        | (1 << Exception::ENVIRONMENT_CALL_FROM_U_MODE)
        | (1 << Exception::ENVIRONMENT_CALL_FROM_S_MODE)
        | (1 << Exception::INSTRUCTION_PAGE_FAULT)
        | (1 << Exception::LOAD_PAGE_FAULT)
        | (1 << Exception::STORE_OR_AMO_PAGE_FAULT);

    pub fn read(&self) -> u64 {
        self.0
    }

    pub fn write(&mut self, value: u64, mask: u64) {
        let mask = mask & Self::DELEGATABLE_EXCEPTIONS_MASK;
        self.0 = self.0 & !mask | value & mask;
    }

    pub fn should_delegate(&self, exception: Exception) -> bool {
        self.0 & (1 << exception.code()) != 0
    }
}

/// Counter-Enable register (mcounteren and scounteren).
///
/// All fields of the register are **WARL**.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Counteren(u32);

impl Counteren {
    pub fn read(&self) -> u32 {
        self.0
    }

    pub fn write(&mut self, value: u32, mask: u32) {
        self.0 = self.0 & !mask | value & mask;
    }

    /// Returns `true` if the counter with index `n` (0 = cycle, 1 = time, 2 = instret, 3 to 31 =
    /// hpmcounterN) is enabled.
    pub fn enabled(&self, n: u32) -> bool {
        self.0.view_bits::<Lsb0>()[n as usize]
    }
}

/// Environment configuration register (menvcfg and senvcfg).
///
/// Only FIOM is implemented. Fences are always totally ordered here, so setting it has no effect
/// beyond being readable.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Envcfg(u64);

impl Envcfg {
    const FIOM: usize = 0;

    pub fn read(&self) -> u64 {
        self.0
    }

    pub fn write(&mut self, value: u64, mask: u64) {
        let mask = mask & (1 << Self::FIOM);
        self.0 = self.0 & !mask | value & mask;
    }

    pub fn fiom(&self) -> bool {
        self.0.view_bits::<Lsb0>()[Self::FIOM]
    }
}

impl Hart {
    pub fn read_mtvec(&self) -> CsrReadResult {
        Ok(self.control.mtvec.read() as u128)
    }

    pub fn write_mtvec(&mut self, value: u128, mask: u128) -> CsrWriteResult {
        let mask = self.isa.xlen.zext(mask) as u64;
        self.control.mtvec.write(value as u64, mask);
        Ok(())
    }

    pub fn read_stvec(&self) -> CsrReadResult {
        Ok(self.control.stvec.read() as u128)
    }

    pub fn write_stvec(&mut self, value: u128, mask: u128) -> CsrWriteResult {
        let mask = self.isa.xlen.zext(mask) as u64;
        self.control.stvec.write(value as u64, mask);
        Ok(())
    }

    pub fn read_medeleg(&self) -> CsrReadResult {
        Ok(self.control.medeleg.read() as u128)
    }

    pub fn write_medeleg(&mut self, value: u128, mask: u128) -> CsrWriteResult {
        self.control.medeleg.write(value as u64, mask as u64);
        Ok(())
    }

    pub fn read_mcounteren(&self) -> CsrReadResult {
        Ok(self.control.mcounteren.read() as u128)
    }

    pub fn write_mcounteren(&mut self, value: u128, mask: u128) -> CsrWriteResult {
        self.control.mcounteren.write(value as u32, mask as u32);
        Ok(())
    }

    pub fn read_scounteren(&self) -> CsrReadResult {
        Ok(self.control.scounteren.read() as u128)
    }

    pub fn write_scounteren(&mut self, value: u128, mask: u128) -> CsrWriteResult {
        self.control.scounteren.write(value as u32, mask as u32);
        Ok(())
    }

    pub fn read_menvcfg(&self) -> CsrReadResult {
        Ok(self.control.menvcfg.read() as u128)
    }

    pub fn write_menvcfg(&mut self, value: u128, mask: u128) -> CsrWriteResult {
        self.control.menvcfg.write(value as u64, mask as u64);
        Ok(())
    }

    /// RV32 only. Holds the upper bits of menvcfg, none of which are implemented.
    pub fn read_menvcfgh(&self) -> CsrReadResult {
        Ok(0)
    }

    pub fn write_menvcfgh(&mut self, _value: u128, _mask: u128) -> CsrWriteResult {
        Ok(())
    }

    pub fn read_senvcfg(&self) -> CsrReadResult {
        Ok(self.control.senvcfg.read() as u128)
    }

    pub fn write_senvcfg(&mut self, value: u128, mask: u128) -> CsrWriteResult {
        self.control.senvcfg.write(value as u64, mask as u64);
        Ok(())
    }

    /// The trigger module has no triggers: tselect reads back 0 and the tdata registers are
    /// hardwired to 0.
    pub fn read_trigger(&self, csr: CsrSpecifier) -> CsrReadResult {
        warn!("Read from unimplemented trigger CSR {csr:#05x}");
        Ok(0)
    }

    pub fn write_trigger(
        &mut self,
        csr: CsrSpecifier,
        _value: u128,
        _mask: u128,
    ) -> CsrWriteResult {
        warn!("Ignoring write to unimplemented trigger CSR {csr:#05x}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hart::Interrupt;

    #[test]
    fn test_tvec_reserved_mode_keeps_value() {
        let mut tvec = Tvec::new();
        tvec.write(0x8000_0101, u64::MAX);
        assert_eq!(0x8000_0101, tvec.read());
        tvec.write(0x8000_0202, u64::MAX);
        assert_eq!(0x8000_0101, tvec.read());
        tvec.write(0x8000_0203, u64::MAX);
        assert_eq!(0x8000_0101, tvec.read());
    }

    #[test]
    fn test_tvec_target() {
        let mut tvec = Tvec::new();
        tvec.write(0x8000_0000, u64::MAX);
        assert_eq!(
            0x8000_0000,
            tvec.target(Interrupt::MachineTimerInterrupt.into())
        );
        tvec.write(0x8000_0001, u64::MAX);
        assert_eq!(VectorMode::Vectored, tvec.mode());
        assert_eq!(
            0x8000_001C,
            tvec.target(Interrupt::MachineTimerInterrupt.into())
        );
        assert_eq!(0x8000_0000, tvec.target(Exception::IllegalInstruction.into()));
    }

    #[test]
    fn test_medeleg_warl() {
        let mut medeleg = Medeleg::default();
        medeleg.write(u64::MAX, u64::MAX);
        assert!(medeleg.should_delegate(Exception::IllegalInstruction));
        assert!(medeleg.should_delegate(Exception::EnvironmentCallFromUMode));
        assert!(!medeleg.should_delegate(Exception::EnvironmentCallFromMMode));
        assert_eq!(0xB3FF, medeleg.read());
    }

    #[test]
    fn test_envcfg_only_fiom() {
        let mut envcfg = Envcfg::default();
        envcfg.write(u64::MAX, u64::MAX);
        assert_eq!(1, envcfg.read());
        assert!(envcfg.fiom());
    }
}
