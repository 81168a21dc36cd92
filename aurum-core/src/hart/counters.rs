use bitvec::{order::Lsb0, view::BitView};
use serde::{Deserialize, Serialize};

use super::{CsrReadResult, CsrWriteResult, Exception, Hart};
use crate::csr::CsrSpecifier;
use crate::PrivilegeLevel;

/// Number of cycles per tick of the time CSR.
pub const CYCLES_PER_TIME_TICK: u64 = 16;

/// Collection of counter registers and associated read/write logic.
///
/// > The cycle, instret, and hpmcountern CSRs are read-only shadows of mcycle, minstret, and
/// > mhpmcountern, respectively. [...] Analogously, on RV32I the cycleh, instreth and
/// > hpmcounternh CSRs are read-only shadows of mcycleh, minstreth and mhpmcounternh,
/// > respectively.
///
/// The time CSR is derived from the cycle counter, since there is no memory-mapped mtime.
/// No hardware performance counters are implemented; they all read as zero.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Counters {
    mcycle: u64,
    minstret: u64,
    mcountinhibit: u32,
    skip_next_mcycle_increment: bool,
    skip_next_minstret_increment: bool,
}

impl Counters {
    // Bit indices for the fields of the mcountinhibit register.
    // Index 1 is a read-only zero bit.
    const CY: usize = 0;
    const IR: usize = 2;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn cycle(&self) -> u64 {
        self.mcycle
    }

    pub fn instret(&self) -> u64 {
        self.minstret
    }

    pub fn time(&self) -> u64 {
        self.mcycle / CYCLES_PER_TIME_TICK
    }

    pub fn increment_cycle(&mut self) {
        if self.skip_next_mcycle_increment {
            self.skip_next_mcycle_increment = false;
            return;
        }
        if !self.mcountinhibit.view_bits::<Lsb0>()[Self::CY] {
            self.mcycle = self.mcycle.wrapping_add(1);
        }
    }

    pub fn increment_instret(&mut self) {
        if self.skip_next_minstret_increment {
            self.skip_next_minstret_increment = false;
            return;
        }
        if !self.mcountinhibit.view_bits::<Lsb0>()[Self::IR] {
            self.minstret = self.minstret.wrapping_add(1);
        }
    }
}

impl Hart {
    /// Checks whether the unprivileged counter `csr` (cycle, time, instret, hpmcounterN, or
    /// their high halves) may be read at the current privilege level.
    ///
    /// > When the CY, TM, IR, or HPMn bit in the mcounteren register is clear, attempts to read the
    /// > cycle, time, instret, or hpmcountern register while executing in S-mode or U-mode will
    /// > cause an illegal-instruction exception. When one of these bits is set, access to the
    /// > corresponding register is permitted in the next implemented privilege mode.
    pub(super) fn check_counter_access(&self, csr: CsrSpecifier) -> Result<(), Exception> {
        let n = (csr & 0x1F) as u32;
        let privilege = self.effective_csr_privilege();
        let allowed = match privilege {
            PrivilegeLevel::Machine => true,
            PrivilegeLevel::Supervisor => self.control.mcounteren.enabled(n),
            PrivilegeLevel::User => {
                self.control.mcounteren.enabled(n) && self.control.scounteren.enabled(n)
            }
        };
        if allowed {
            Ok(())
        } else {
            Err(Exception::IllegalInstruction)
        }
    }

    pub fn read_mcycle(&self) -> CsrReadResult {
        Ok(self.counters.mcycle as u128)
    }

    pub fn write_mcycle(&mut self, value: u128, mask: u128) -> CsrWriteResult {
        let mask = self.isa.xlen.zext(mask) as u64;
        let counters = &mut self.counters;
        counters.mcycle = counters.mcycle & !mask | value as u64 & mask;
        counters.skip_next_mcycle_increment = true;
        Ok(())
    }

    pub fn read_mcycleh(&self) -> CsrReadResult {
        Ok((self.counters.mcycle >> 32) as u128)
    }

    pub fn write_mcycleh(&mut self, value: u128, mask: u128) -> CsrWriteResult {
        let mask = (mask as u32 as u64) << 32;
        let counters = &mut self.counters;
        counters.mcycle = counters.mcycle & !mask | ((value as u64) << 32) & mask;
        counters.skip_next_mcycle_increment = true;
        Ok(())
    }

    pub fn read_minstret(&self) -> CsrReadResult {
        Ok(self.counters.minstret as u128)
    }

    pub fn write_minstret(&mut self, value: u128, mask: u128) -> CsrWriteResult {
        let mask = self.isa.xlen.zext(mask) as u64;
        let counters = &mut self.counters;
        counters.minstret = counters.minstret & !mask | value as u64 & mask;
        counters.skip_next_minstret_increment = true;
        Ok(())
    }

    pub fn read_minstreth(&self) -> CsrReadResult {
        Ok((self.counters.minstret >> 32) as u128)
    }

    pub fn write_minstreth(&mut self, value: u128, mask: u128) -> CsrWriteResult {
        let mask = (mask as u32 as u64) << 32;
        let counters = &mut self.counters;
        counters.minstret = counters.minstret & !mask | ((value as u64) << 32) & mask;
        counters.skip_next_minstret_increment = true;
        Ok(())
    }

    pub fn read_time(&self) -> CsrReadResult {
        Ok(self.counters.time() as u128)
    }

    pub fn read_timeh(&self) -> CsrReadResult {
        Ok((self.counters.time() >> 32) as u128)
    }

    pub fn read_mcountinhibit(&self) -> CsrReadResult {
        Ok(self.counters.mcountinhibit as u128)
    }

    /// The mcountinhibit register is **WARL**.
    pub fn write_mcountinhibit(&mut self, value: u128, mask: u128) -> CsrWriteResult {
        // Only CY and IR are implemented; bit 1 is always read-only 0.
        let mask = mask as u32 & (1 << Counters::CY | 1 << Counters::IR);
        let counters = &mut self.counters;
        counters.mcountinhibit = counters.mcountinhibit & !mask | value as u32 & mask;
        Ok(())
    }

    /// Hardware performance counters and their event selectors are hardwired to zero.
    pub fn read_hpm(&self) -> CsrReadResult {
        Ok(0)
    }

    pub fn write_hpm(&mut self, _value: u128, _mask: u128) -> CsrWriteResult {
        // Writes are ignored
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::csr;
    use crate::IsaConfig;

    fn hart(isa: &str) -> Hart {
        Hart::new(0, &IsaConfig::parse(isa).unwrap(), 0x8000_0000, false, false)
    }

    #[test]
    fn test_write_skips_next_increment() {
        let mut hart = hart("rv64i");
        hart.write_mcycle(100, u128::MAX).unwrap();
        hart.counters.increment_cycle();
        assert_eq!(Ok(100), hart.read_mcycle());
        hart.counters.increment_cycle();
        assert_eq!(Ok(101), hart.read_mcycle());
    }

    #[test]
    fn test_rv32_halves() {
        let mut hart = hart("rv32i");
        hart.write_minstret(0xFFFF_FFFF, u128::MAX).unwrap();
        hart.write_minstreth(0x1, u128::MAX).unwrap();
        assert_eq!(Ok(0x1_FFFF_FFFF), hart.read_minstret());
        hart.counters.skip_next_minstret_increment = false;
        hart.counters.increment_instret();
        assert_eq!(Ok(0x2), hart.read_minstreth());
    }

    #[test]
    fn test_inhibit() {
        let mut hart = hart("rv64i");
        hart.write_mcountinhibit(0b111, u128::MAX).unwrap();
        assert_eq!(Ok(0b101), hart.read_mcountinhibit());
        hart.counters.increment_cycle();
        hart.counters.increment_instret();
        assert_eq!(0, hart.counters.cycle());
        assert_eq!(0, hart.counters.instret());
    }

    #[test]
    fn test_time_is_derived_from_cycles() {
        let mut hart = hart("rv64i");
        hart.write_mcycle(CYCLES_PER_TIME_TICK as u128 * 3 + 1, u128::MAX).unwrap();
        assert_eq!(Ok(3), hart.read_time());
    }

    #[test]
    fn test_counter_access_from_user_mode() {
        let mut hart = hart("rv64ima");
        hart.privilege = PrivilegeLevel::User;
        assert_eq!(
            Err(Exception::IllegalInstruction),
            hart.check_counter_access(csr::CYCLE)
        );
        hart.write_mcounteren(0b001, u128::MAX).unwrap();
        assert_eq!(
            Err(Exception::IllegalInstruction),
            hart.check_counter_access(csr::CYCLE)
        );
        hart.write_scounteren(0b001, u128::MAX).unwrap();
        assert_eq!(Ok(()), hart.check_counter_access(csr::CYCLE));
        assert_eq!(
            Err(Exception::IllegalInstruction),
            hart.check_counter_access(csr::INSTRET)
        );
        hart.privilege = PrivilegeLevel::Supervisor;
        assert_eq!(Ok(()), hart.check_counter_access(csr::CYCLE));
    }
}
