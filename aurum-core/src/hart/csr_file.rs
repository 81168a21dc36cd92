//! CSR read/write dispatch and the Zicsr instructions.

use log::{trace, warn};

use super::status::ExtensionContextStatus;
use super::{CsrReadResult, CsrWriteResult, Exception, Hart};
use crate::config::{Extension, Xlen};
use crate::csr::{self, CsrSpecifier};
use crate::instruction::CsrOp;
use crate::registers::Specifier;
use crate::trace::LastWrite;
use crate::PrivilegeLevel;

impl Hart {
    /// Privilege level CSR accesses are checked against. Debug mode has full access.
    pub(super) fn effective_csr_privilege(&self) -> PrivilegeLevel {
        if self.debug_mode {
            PrivilegeLevel::Machine
        } else {
            self.privilege
        }
    }

    /// Checks that `specifier` names an implemented CSR that may be accessed (and written, if
    /// `write` is set) at the current privilege level.
    ///
    /// > Attempts to access a non-existent CSR raise an illegal-instruction exception. Attempts to
    /// > access a CSR without appropriate privilege level raise illegal-instruction exceptions or,
    /// > as described in Section 21.6.1, virtual-instruction exceptions. Attempts to write a
    /// > read-only register raise an illegal-instruction exception.
    fn check_csr_access(&self, specifier: CsrSpecifier, write: bool) -> Result<(), Exception> {
        let privilege = self.effective_csr_privilege();
        if !csr::is_valid(specifier)
            || privilege < csr::required_privilege_level(specifier)
            || (write && csr::is_read_only(specifier))
            || (csr::is_debug_only(specifier) && !self.debug_mode)
            || (csr::is_rv32_only(specifier) && self.isa.xlen != Xlen::Rv32)
        {
            return Err(Exception::IllegalInstruction);
        }
        match specifier {
            csr::FFLAGS | csr::FRM | csr::FCSR => self.check_fp_enabled(),
            csr::VSTART | csr::VXSAT | csr::VXRM | csr::VCSR | csr::VL | csr::VTYPE
            | csr::VLENB => self.check_vector_enabled(),
            csr::SATP if privilege == PrivilegeLevel::Supervisor && self.status.tvm() => {
                Err(Exception::IllegalInstruction)
            }
            csr::CYCLE..=csr::INSTRETH => self.check_counter_access(specifier),
            specifier if csr::HPMCOUNTERH.contains(&specifier) => {
                self.check_counter_access(specifier)
            }
            _ => Ok(()),
        }
    }

    /// Reads a CSR as seen by a Zicsr instruction at the current privilege level.
    pub fn read_csr(&mut self, specifier: CsrSpecifier) -> CsrReadResult {
        self.check_csr_access(specifier, false)?;
        self.read_csr_unchecked(specifier)
    }

    /// Writes the bits of `value` selected by `mask` to a CSR.
    ///
    /// A failing write has no effect.
    pub fn write_csr(
        &mut self,
        specifier: CsrSpecifier,
        value: u128,
        mask: u128,
    ) -> CsrWriteResult {
        self.check_csr_access(specifier, true)?;
        self.write_csr_unchecked(specifier, value, mask)
    }

    fn read_csr_unchecked(&mut self, specifier: CsrSpecifier) -> CsrReadResult {
        match specifier {
            csr::FFLAGS => self.read_fflags(),
            csr::FRM => self.read_frm(),
            csr::FCSR => self.read_fcsr(),
            csr::VSTART => self.read_vstart(),
            csr::VXSAT => self.read_vxsat(),
            csr::VXRM => self.read_vxrm(),
            csr::VCSR => self.read_vcsr(),
            csr::VL => self.read_vl(),
            csr::VTYPE => self.read_vtype(),
            csr::VLENB => self.read_vlenb(),
            csr::CYCLE | csr::MCYCLE => {
                self.nondeterministic = true;
                self.read_mcycle()
            }
            csr::TIME => {
                self.nondeterministic = true;
                self.read_time()
            }
            csr::INSTRET | csr::MINSTRET => {
                self.nondeterministic = true;
                self.read_minstret()
            }
            csr::CYCLEH | csr::MCYCLEH => {
                self.nondeterministic = true;
                self.read_mcycleh()
            }
            csr::TIMEH => {
                self.nondeterministic = true;
                self.read_timeh()
            }
            csr::INSTRETH | csr::MINSTRETH => {
                self.nondeterministic = true;
                self.read_minstreth()
            }
            specifier
                if csr::HPMCOUNTER.contains(&specifier)
                    || csr::HPMCOUNTERH.contains(&specifier)
                    || csr::MHPMCOUNTER.contains(&specifier)
                    || csr::MHPMCOUNTERH.contains(&specifier)
                    || csr::MHPMEVENT.contains(&specifier) =>
            {
                self.read_hpm()
            }
            csr::SSTATUS => self.read_sstatus(),
            csr::SIE => self.read_sie(),
            csr::STVEC => self.read_stvec(),
            csr::SCOUNTEREN => self.read_scounteren(),
            csr::SENVCFG => self.read_senvcfg(),
            csr::SSCRATCH => self.read_sscratch(),
            csr::SEPC => self.read_sepc(),
            csr::SCAUSE => self.read_scause(),
            csr::STVAL => self.read_stval(),
            csr::SIP => self.read_sip(),
            csr::SATP => self.read_satp(),
            csr::MVENDORID | csr::MARCHID | csr::MIMPID | csr::MCONFIGPTR => Ok(0),
            csr::MHARTID => Ok(self.id as u128),
            csr::MSTATUS => self.read_mstatus(),
            csr::MISA => Ok(self.isa.misa()),
            csr::MEDELEG => self.read_medeleg(),
            csr::MIDELEG => self.read_mideleg(),
            csr::MIE => self.read_mie(),
            csr::MTVEC => self.read_mtvec(),
            csr::MCOUNTEREN => self.read_mcounteren(),
            csr::MENVCFG => self.read_menvcfg(),
            csr::MSTATUSH => self.read_mstatush(),
            csr::MENVCFGH => self.read_menvcfgh(),
            csr::MCOUNTINHIBIT => self.read_mcountinhibit(),
            csr::MSCRATCH => self.read_mscratch(),
            csr::MEPC => self.read_mepc(),
            csr::MCAUSE => self.read_mcause(),
            csr::MTVAL => self.read_mtval(),
            csr::MIP => self.read_mip(),
            csr::MTINST => self.read_mtinst(),
            csr::MTVAL2 => self.read_mtval2(),
            // No PMP entries are implemented.
            specifier if csr::PMPCFG.contains(&specifier) || csr::PMPADDR.contains(&specifier) => {
                Ok(0)
            }
            csr::TSELECT | csr::TDATA1 | csr::TDATA2 | csr::TDATA3 => self.read_trigger(specifier),
            csr::DCSR => self.read_dcsr(),
            csr::DPC => self.read_dpc(),
            csr::DSCRATCH0 => self.read_dscratch0(),
            csr::DSCRATCH1 => self.read_dscratch1(),
            _ => {
                trace!("Read from unimplemented CSR {specifier:#05x}");
                Err(Exception::IllegalInstruction)
            }
        }
    }

    fn write_csr_unchecked(
        &mut self,
        specifier: CsrSpecifier,
        value: u128,
        mask: u128,
    ) -> CsrWriteResult {
        match specifier {
            csr::FFLAGS => self.write_fflags(value, mask),
            csr::FRM => self.write_frm(value, mask),
            csr::FCSR => self.write_fcsr(value, mask),
            csr::VSTART => self.write_vstart(value, mask),
            csr::VXSAT => self.write_vxsat(value, mask),
            csr::VXRM => self.write_vxrm(value, mask),
            csr::VCSR => self.write_vcsr(value, mask),
            csr::MCYCLE => self.write_mcycle(value, mask),
            csr::MCYCLEH => self.write_mcycleh(value, mask),
            csr::MINSTRET => self.write_minstret(value, mask),
            csr::MINSTRETH => self.write_minstreth(value, mask),
            specifier
                if csr::MHPMCOUNTER.contains(&specifier)
                    || csr::MHPMCOUNTERH.contains(&specifier)
                    || csr::MHPMEVENT.contains(&specifier) =>
            {
                self.write_hpm(value, mask)
            }
            csr::SSTATUS => {
                self.write_sstatus(value, mask)?;
                self.flush_tlbs();
                self.batch_ended = true;
                Ok(())
            }
            csr::SIE => self.write_sie(value, mask),
            csr::STVEC => self.write_stvec(value, mask),
            csr::SCOUNTEREN => self.write_scounteren(value, mask),
            csr::SENVCFG => self.write_senvcfg(value, mask),
            csr::SSCRATCH => self.write_sscratch(value, mask),
            csr::SEPC => self.write_sepc(value, mask),
            csr::SCAUSE => self.write_scause(value, mask),
            csr::STVAL => self.write_stval(value, mask),
            csr::SIP => self.write_sip(value, mask),
            csr::SATP => {
                self.write_satp(value, mask)?;
                self.flush_tlbs();
                self.batch_ended = true;
                Ok(())
            }
            csr::MSTATUS => {
                self.write_mstatus(value, mask)?;
                self.flush_tlbs();
                self.batch_ended = true;
                Ok(())
            }
            csr::MISA => {
                // The set of extensions is fixed at construction.
                self.batch_ended = true;
                Ok(())
            }
            csr::MEDELEG => self.write_medeleg(value, mask),
            csr::MIDELEG => self.write_mideleg(value, mask),
            csr::MIE => self.write_mie(value, mask),
            csr::MTVEC => self.write_mtvec(value, mask),
            csr::MCOUNTEREN => self.write_mcounteren(value, mask),
            csr::MENVCFG => self.write_menvcfg(value, mask),
            csr::MSTATUSH => self.write_mstatush(value, mask),
            csr::MENVCFGH => self.write_menvcfgh(value, mask),
            csr::MCOUNTINHIBIT => self.write_mcountinhibit(value, mask),
            csr::MSCRATCH => self.write_mscratch(value, mask),
            csr::MEPC => self.write_mepc(value, mask),
            csr::MCAUSE => self.write_mcause(value, mask),
            csr::MTVAL => self.write_mtval(value, mask),
            csr::MIP => self.write_mip(value, mask),
            csr::MTINST => self.write_mtinst(value, mask),
            csr::MTVAL2 => self.write_mtval2(value, mask),
            specifier if csr::PMPCFG.contains(&specifier) || csr::PMPADDR.contains(&specifier) => {
                Ok(())
            }
            csr::TSELECT | csr::TDATA1 | csr::TDATA2 | csr::TDATA3 => {
                self.write_trigger(specifier, value, mask)
            }
            csr::DCSR => self.write_dcsr(value, mask),
            csr::DPC => self.write_dpc(value, mask),
            csr::DSCRATCH0 => self.write_dscratch0(value, mask),
            csr::DSCRATCH1 => self.write_dscratch1(value, mask),
            _ => {
                warn!("Write to unimplemented CSR {specifier:#05x}");
                Err(Exception::IllegalInstruction)
            }
        }
    }

    /// FP instructions and CSRs are illegal without F or while mstatus.FS is Off.
    pub(super) fn check_fp_enabled(&self) -> Result<(), Exception> {
        if self.isa.has(Extension::F) && self.status.fs() != ExtensionContextStatus::Off {
            Ok(())
        } else {
            Err(Exception::IllegalInstruction)
        }
    }

    /// Vector instructions and CSRs are illegal without V or while mstatus.VS is Off.
    pub(super) fn check_vector_enabled(&self) -> Result<(), Exception> {
        if self.isa.has(Extension::V) && self.status.vs() != ExtensionContextStatus::Off {
            Ok(())
        } else {
            Err(Exception::IllegalInstruction)
        }
    }

    /// Executes a Zicsr instruction, with `source` being the value of rs1 or the immediate.
    ///
    /// > If rd=x0, then the instruction shall not read the CSR and shall not cause any of the side
    /// > effects that might occur on a CSR read. [...] For both CSRRS and CSRRC, if rs1=x0, then
    /// > the instruction will not write to the CSR at all, and so shall not cause any of the side
    /// > effects that might otherwise occur on a CSR write.
    pub(super) fn execute_csr(
        &mut self,
        op: CsrOp,
        dest: Specifier,
        specifier: CsrSpecifier,
        source: u128,
        source_is_zero: bool,
    ) -> Result<(), Exception> {
        let (read, write) = match op {
            CsrOp::ReadWrite => (dest != Specifier::X0, true),
            CsrOp::ReadSet | CsrOp::ReadClear => (true, !source_is_zero),
        };
        self.check_csr_access(specifier, write)?;

        let old = if read {
            self.read_csr_unchecked(specifier)?
        } else {
            0
        };
        if write {
            let (value, mask) = match op {
                CsrOp::ReadWrite => (source, u128::MAX),
                CsrOp::ReadSet => (u128::MAX, source),
                CsrOp::ReadClear => (0, source),
            };
            self.write_csr_unchecked(specifier, value, mask)?;
        }
        if read {
            let value = self.isa.xlen.sext(old);
            self.registers.set_x(dest, value);
            if dest != Specifier::X0 {
                self.write = LastWrite::Gpr {
                    register: dest,
                    value,
                };
            }
        }
        if write && dest == Specifier::X0 {
            self.write = LastWrite::Csr {
                csr: specifier,
                value: self.read_csr_unchecked(specifier).unwrap_or_default(),
            };
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::IsaConfig;

    fn hart(isa: &str) -> Hart {
        Hart::new(3, &IsaConfig::parse(isa).unwrap(), 0x8000_0000, false, false)
    }

    #[test]
    fn test_machine_information() {
        let mut hart = hart("rv64gc");
        assert_eq!(Ok(3), hart.read_csr(csr::MHARTID));
        assert_eq!(Ok(0), hart.read_csr(csr::MVENDORID));
        assert_eq!(Ok(IsaConfig::parse("rv64gc").unwrap().misa()), hart.read_csr(csr::MISA));
        assert_eq!(
            Err(Exception::IllegalInstruction),
            hart.write_csr(csr::MHARTID, 0, u128::MAX)
        );
    }

    #[test]
    fn test_privilege_checks() {
        let mut hart = hart("rv64gc");
        hart.privilege = PrivilegeLevel::Supervisor;
        assert_eq!(Err(Exception::IllegalInstruction), hart.read_csr(csr::MSTATUS));
        assert!(hart.read_csr(csr::SSTATUS).is_ok());
        hart.status.set_tvm(true);
        assert_eq!(Err(Exception::IllegalInstruction), hart.read_csr(csr::SATP));
        hart.privilege = PrivilegeLevel::User;
        assert_eq!(Err(Exception::IllegalInstruction), hart.read_csr(csr::SSTATUS));
    }

    #[test]
    fn test_rv32_only_and_debug_only() {
        let mut rv64 = hart("rv64gc");
        assert_eq!(Err(Exception::IllegalInstruction), rv64.read_csr(csr::MCYCLEH));
        assert_eq!(Err(Exception::IllegalInstruction), rv64.read_csr(csr::DPC));
        let mut rv32 = hart("rv32gc");
        assert_eq!(Ok(0), rv32.read_csr(csr::MCYCLEH));
    }

    #[test]
    fn test_unimplemented_csr_is_illegal() {
        let mut hart = hart("rv64gc");
        assert_eq!(Err(Exception::IllegalInstruction), hart.read_csr(0x7C0));
    }

    #[test]
    fn test_fp_csr_requires_f() {
        let mut hart = hart("rv64ima");
        assert_eq!(Err(Exception::IllegalInstruction), hart.read_csr(csr::FCSR));
    }

    #[test]
    fn test_csrrs_with_x0_does_not_write() {
        let mut hart = hart("rv64gc");
        // Writing a read-only CSR is fine as long as nothing is written.
        assert_eq!(
            Ok(()),
            hart.execute_csr(CsrOp::ReadSet, Specifier::T0, csr::MHARTID, 0, true)
        );
        assert_eq!(3, hart.registers.x(Specifier::T0));
        assert_eq!(
            Err(Exception::IllegalInstruction),
            hart.execute_csr(CsrOp::ReadSet, Specifier::T0, csr::MHARTID, 1, false)
        );
    }

    #[test]
    fn test_csrrw_and_csrrc() {
        let mut hart = hart("rv64gc");
        hart.execute_csr(CsrOp::ReadWrite, Specifier::X0, csr::MSCRATCH, 0xF0F0, false)
            .unwrap();
        assert_eq!(
            LastWrite::Csr {
                csr: csr::MSCRATCH,
                value: 0xF0F0
            },
            hart.write
        );
        hart.execute_csr(CsrOp::ReadClear, Specifier::A0, csr::MSCRATCH, 0xF000, false)
            .unwrap();
        assert_eq!(0xF0F0, hart.registers.x(Specifier::A0));
        assert_eq!(Ok(0x00F0), hart.read_csr(csr::MSCRATCH));
    }

    #[test]
    fn test_status_write_ends_batch() {
        let mut hart = hart("rv64gc");
        hart.write_csr(csr::MSTATUS, 1 << 3, 1 << 3).unwrap();
        assert!(hart.batch_ended);
        assert!(hart.status.mie());
    }

    #[test]
    fn test_counter_read_is_nondeterministic() {
        let mut hart = hart("rv64gc");
        hart.read_csr(csr::CYCLE).unwrap();
        assert!(hart.nondeterministic);
    }
}
