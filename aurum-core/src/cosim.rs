//! Lock-step co-simulation against a hardware design under test (DUT).
//!
//! The DUT reports every instruction it retires; the model executes the same instruction and
//! compares the outcome. Values the model cannot know (device registers, counters, the timing of
//! interrupts) are taken from the DUT instead.

use crate::hart::{Exception, Interrupt};
use crate::machine::Machine;
use crate::memory::MemoryError;
use crate::trace::LastWrite;
use log::{error, warn};

/// Value returned by [`Cosim::step`] when the model and the DUT disagree.
pub const MISMATCH: i32 = 0x1FFF;

/// Drives a [`Machine`] one instruction at a time on behalf of a DUT.
#[derive(Debug)]
pub struct Cosim {
    machine: Machine,
}

impl Cosim {
    /// Puts all harts of `machine` in co-simulation mode, where interrupts are only taken when
    /// injected with [`raise_trap`](Self::raise_trap).
    pub fn new(mut machine: Machine) -> Self {
        for index in 0..machine.harts().len() {
            if let Some(hart) = machine.hart_mut(index) {
                hart.set_cosim(true);
            }
        }
        Self { machine }
    }

    pub fn machine(&self) -> &Machine {
        &self.machine
    }

    pub fn machine_mut(&mut self) -> &mut Machine {
        &mut self.machine
    }

    /// Executes one instruction on `hart` and, if `check` is set, compares it with what the DUT
    /// retired: its pc, its instruction bits, the value it wrote to a register and mstatus
    /// afterwards. Compressed instructions are reported by the DUT after expansion, so their bits
    /// are not compared.
    ///
    /// Returns `0` to continue. Otherwise the simulation ends: with `(exit_code << 1) | 1` when
    /// the guest shut down, or [`MISMATCH`] when the model diverged from the DUT.
    pub fn step(
        &mut self,
        hart: usize,
        dut_pc: u64,
        dut_insn: u32,
        dut_wdata: u64,
        dut_mstatus: u64,
        check: bool,
    ) -> i32 {
        let Some(state) = self.machine.hart(hart) else {
            error!("Co-simulation step for unknown hart {hart}");
            return MISMATCH;
        };
        if let Some(code) = state.terminated() {
            return exit_status(code);
        }

        self.machine.execute_hart(hart, 1);
        // A pending interrupt is taken without executing anything; the DUT reports the first
        // instruction of the handler.
        if self
            .machine
            .hart(hart)
            .is_some_and(|h| h.last_retired().is_none() && !h.is_powered_down())
        {
            self.machine.execute_hart(hart, 1);
        }

        let Some(state) = self.machine.hart_mut(hart) else {
            return MISMATCH;
        };
        if let Some(code) = state.terminated() {
            return exit_status(code);
        }
        let Some(record) = state.last_retired().cloned() else {
            if check {
                error!("Hart {hart} retired nothing, DUT retired pc {:#x}", dut_pc);
                return MISMATCH;
            }
            return 0;
        };

        // Take over values the model cannot reproduce.
        if record.nondeterministic {
            if let LastWrite::Gpr { register, .. } = record.write {
                let xlen = state.isa().xlen;
                state
                    .registers_mut()
                    .set_x(register, xlen.sext(dut_wdata as u128));
                return 0;
            }
        }
        if !check {
            return 0;
        }

        let mut matches = record.pc == dut_pc;
        if record.length == 4 {
            matches &= record.raw == dut_insn;
        }
        if let LastWrite::Gpr { value, .. } = record.write {
            matches &= value as u64 == dut_wdata;
        }
        let mstatus = state.read_mstatus().unwrap_or_default() as u64;
        matches &= mstatus == dut_mstatus;
        if matches {
            0
        } else {
            error!(
                "Hart {hart} mismatch: model pc {:#x} insn {:#010x} write {:?} \
                 mstatus {mstatus:#x}, DUT pc {:#x} insn {:#010x} wdata {:#x} mstatus {:#x}",
                record.pc, record.raw, record.write, dut_pc, dut_insn, dut_wdata, dut_mstatus
            );
            MISMATCH
        }
    }

    /// The DUT took a trap. A set most significant bit of `cause` marks an interrupt, otherwise
    /// `cause` is an exception code. The trap is taken by the next [`step`](Self::step).
    pub fn raise_trap(&mut self, hart: usize, cause: i64) {
        let Some(state) = self.machine.hart_mut(hart) else {
            warn!("Trap for unknown hart {hart}");
            return;
        };
        let code = cause as u64 & !(1 << 63);
        if cause < 0 {
            match Interrupt::from_code(code) {
                Some(interrupt) => state.set_pending_interrupt(interrupt),
                None => warn!("Ignoring unknown interrupt {code} raised by the DUT"),
            }
        } else {
            match Exception::from_code(code) {
                Some(exception) => state.set_pending_exception(exception),
                None => warn!("Ignoring unknown exception {code} raised by the DUT"),
            }
        }
    }

    /// Writes `size` bytes of `value` to physical memory, as another bus agent of the DUT did.
    ///
    /// All harts' cached translations of the page are dropped, not just those of the hart whose
    /// view triggered the override.
    pub fn override_mem(
        &mut self,
        _hart: usize,
        paddr: u64,
        size: usize,
        value: u64,
    ) -> Result<(), MemoryError> {
        let size = size.min(8);
        self.machine
            .write_physical(paddr, &value.to_le_bytes()[..size])
    }
}

fn exit_status(code: i64) -> i32 {
    ((code as i32) << 1) | 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MachineConfig;
    use crate::registers::Specifier;
    use crate::IsaConfig;

    const RAM_BASE: u64 = 0x8000_0000;
    /// `addi x5, x0, 5`
    const LI_T0_5: u32 = 0x0050_0293;
    /// `addi x6, x5, -3`
    const ADDI_T1: u32 = 0xFFD2_8313;
    /// `csrr x7, mcycle`
    const CSRR_MCYCLE: u32 = 0xB000_23F3;
    /// `addi a7, x0, 8`
    const LI_A7_8: u32 = 0x0080_0893;
    /// `addi a0, x0, 3`
    const LI_A0_3: u32 = 0x0030_0513;
    const ECALL: u32 = 0x0000_0073;

    fn cosim(program: &[u32]) -> Cosim {
        let mut machine = Machine::new(MachineConfig {
            isa: IsaConfig::parse("rv64gc").unwrap(),
            ram_size: 0x1_0000,
            ..Default::default()
        })
        .unwrap();
        let bytes: Vec<u8> = program.iter().flat_map(|insn| insn.to_le_bytes()).collect();
        machine.load(RAM_BASE, &bytes).unwrap();
        Cosim::new(machine)
    }

    fn mstatus(cosim: &Cosim) -> u64 {
        cosim.machine().hart(0).unwrap().read_mstatus().unwrap() as u64
    }

    fn x(cosim: &Cosim, index: u8) -> u128 {
        cosim
            .machine()
            .hart(0)
            .unwrap()
            .registers()
            .x(Specifier::from_u5(index))
    }

    #[test]
    fn test_matching_steps() {
        let mut cosim = cosim(&[LI_T0_5, ADDI_T1]);
        let mstatus = mstatus(&cosim);
        assert_eq!(0, cosim.step(0, RAM_BASE, LI_T0_5, 5, mstatus, true));
        assert_eq!(0, cosim.step(0, RAM_BASE + 4, ADDI_T1, 2, mstatus, true));
    }

    #[test]
    fn test_wrong_wdata_is_mismatch() {
        let mut cosim = cosim(&[LI_T0_5]);
        let mstatus = mstatus(&cosim);
        assert_eq!(
            MISMATCH,
            cosim.step(0, RAM_BASE, LI_T0_5, 6, mstatus, true)
        );
    }

    #[test]
    fn test_wrong_pc_is_mismatch() {
        let mut cosim = cosim(&[LI_T0_5]);
        let mstatus = mstatus(&cosim);
        assert_eq!(
            MISMATCH,
            cosim.step(0, RAM_BASE + 4, LI_T0_5, 5, mstatus, true)
        );
    }

    #[test]
    fn test_unchecked_step_continues() {
        let mut cosim = cosim(&[LI_T0_5]);
        assert_eq!(0, cosim.step(0, 0, 0, 0, 0, false));
        assert_eq!(5, x(&cosim, 5));
    }

    #[test]
    fn test_trapping_instruction_is_compared() {
        let mut reference = cosim(&[0]);
        assert_eq!(0, reference.step(0, 0, 0, 0, 0, false));
        let trapped = mstatus(&reference);

        let mut matching = cosim(&[0]);
        assert_eq!(0, matching.step(0, RAM_BASE, 0, 0, trapped, true));
        assert_eq!(0, matching.machine().hart(0).unwrap().counters().instret());

        let mut wrong_pc = cosim(&[0]);
        assert_eq!(MISMATCH, wrong_pc.step(0, RAM_BASE + 4, 0, 0, trapped, true));
    }

    #[test]
    fn test_counter_read_takes_dut_value() {
        let mut cosim = cosim(&[CSRR_MCYCLE]);
        assert_eq!(0, cosim.step(0, RAM_BASE, CSRR_MCYCLE, 12345, 0, true));
        assert_eq!(12345, x(&cosim, 7));
    }

    #[test]
    fn test_shutdown_exit_status() {
        let mut cosim = cosim(&[LI_A7_8, LI_A0_3, ECALL]);
        assert_eq!(0, cosim.step(0, 0, 0, 0, 0, false));
        assert_eq!(0, cosim.step(0, 0, 0, 0, 0, false));
        assert_eq!(7, cosim.step(0, 0, 0, 0, 0, false));
        assert_eq!(7, cosim.step(0, 0, 0, 0, 0, false));
    }

    #[test]
    fn test_raise_exception() {
        let mut cosim = cosim(&[LI_T0_5]);
        cosim.raise_trap(0, Exception::ILLEGAL_INSTRUCTION as i64);
        assert_eq!(
            Exception::ILLEGAL_INSTRUCTION as i32,
            cosim.machine().hart(0).unwrap().pending_exception()
        );
        cosim.step(0, 0, 0, 0, 0, false);
        // The injected exception replaced the instruction.
        assert_eq!(0, x(&cosim, 5));
        assert_eq!(-1, cosim.machine().hart(0).unwrap().pending_exception());
    }

    #[test]
    fn test_raise_interrupt() {
        let mut cosim = cosim(&[LI_T0_5]);
        cosim.raise_trap(0, i64::MIN | Interrupt::MachineTimerInterrupt.code() as i64);
        assert_eq!(7, cosim.machine().hart(0).unwrap().pending_interrupt());
    }

    #[test]
    fn test_override_mem() {
        let mut cosim = cosim(&[]);
        cosim
            .override_mem(0, RAM_BASE + 0x100, 2, 0xAABB_CCDD)
            .unwrap();
        assert_eq!(
            Ok(0xCCDD),
            cosim.machine_mut().memory_mut().read_u32(RAM_BASE + 0x100)
        );
    }
}
