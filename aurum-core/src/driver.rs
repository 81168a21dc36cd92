//! Runs all harts of a machine round-robin until the program finishes.

use crate::machine::Machine;
use crate::trace::{RetireRecord, TraceSink};
use log::info;
use std::io;

/// `xor x0, x0, x0`, which starts a macro-traced region.
pub const TRACE_START_MARKER: u32 = 0x0000_4033;
/// `xor x0, x1, x1`, which ends a macro-traced region.
pub const TRACE_STOP_MARKER: u32 = 0x0010_C033;

/// Why [`Driver::run`] returned.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum StopReason {
    /// A hart requested a shutdown.
    Terminated,
    /// Every hart is waiting for an interrupt that nothing will raise.
    AllWaiting,
    /// The configured instruction limit was reached.
    InstructionLimit,
    /// A traced region ended and the trace configuration asks to stop there.
    TraceStopped,
}

/// Outcome of a complete run.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct RunSummary {
    /// Instructions executed by all harts together.
    pub instructions: u64,
    /// Exit code requested by each hart, in hart order.
    pub exit_codes: Vec<Option<i64>>,
    pub reason: StopReason,
}

impl RunSummary {
    /// Process exit code: the first exit code a hart requested, or `0`.
    pub fn exit_code(&self) -> i64 {
        self.exit_codes.iter().flatten().copied().next().unwrap_or(0)
    }
}

/// Round-robin scheduler for the harts of a [`Machine`].
///
/// Each call to [`run_batch`](Self::run_batch) gives every hart a turn of up to `batch_size`
/// instructions. While instructions are being traced, turns shrink to a single instruction so
/// that every retired instruction reaches the trace sink.
pub struct Driver {
    machine: Machine,
    sink: Option<Box<dyn TraceSink>>,
    instructions: u64,
    next_heartbeat: Option<u64>,
    /// Inside a region delimited by the macro markers.
    macro_region: bool,
    /// Some region was traced during the previous batch.
    was_tracing: bool,
    last_asid: u64,
    stop: Option<StopReason>,
}

impl Driver {
    pub fn new(machine: Machine) -> Self {
        let next_heartbeat = machine.config().heartbeat.filter(|&period| period > 0);
        let last_asid = machine.hart(0).map_or(0, |hart| hart.satp_asid());
        Self {
            machine,
            sink: None,
            instructions: 0,
            next_heartbeat,
            macro_region: false,
            was_tracing: false,
            last_asid,
            stop: None,
        }
    }

    /// Sends traced instructions to `sink`.
    pub fn with_trace(mut self, sink: Box<dyn TraceSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn machine(&self) -> &Machine {
        &self.machine
    }

    pub fn machine_mut(&mut self) -> &mut Machine {
        &mut self.machine
    }

    pub fn into_machine(self) -> Machine {
        self.machine
    }

    /// Total number of instructions executed so far.
    pub fn instructions(&self) -> u64 {
        self.instructions
    }

    /// Gives every hart one turn. Returns `true` if the simulation should keep going.
    pub fn run_batch(&mut self) -> io::Result<bool> {
        if self.stop.is_some() {
            return Ok(false);
        }
        let tracing = self.tracing_active();
        if tracing != self.was_tracing && !self.macro_tracing() {
            self.region_changed(tracing)?;
            if self.stop.is_some() {
                return Ok(false);
            }
        }
        let budget = self.budget(tracing);
        let observe = tracing || self.macro_tracing();

        for index in 0..self.machine.harts().len() {
            let retired = self.machine.execute_hart(index, budget);
            self.instructions += retired;
            if observe {
                let record = self
                    .machine
                    .hart(index)
                    .and_then(|hart| hart.last_retired())
                    .cloned();
                if let Some(record) = record {
                    self.observe(&record, tracing)?;
                }
            }
        }

        self.heartbeat();
        self.log_asid_change();

        if let Some(max) = self.machine.config().max_instructions {
            if self.instructions >= max {
                info!("Reached the limit of {max} instructions");
                self.stop.get_or_insert(StopReason::InstructionLimit);
            }
        }
        if self.machine.exit_code().is_some() {
            self.stop.get_or_insert(StopReason::Terminated);
        } else if !self.machine.any_running() {
            info!("All harts are waiting for an interrupt");
            self.stop.get_or_insert(StopReason::AllWaiting);
        }
        Ok(self.stop.is_none())
    }

    /// Runs batches until the simulation stops.
    pub fn run(&mut self) -> io::Result<RunSummary> {
        while self.run_batch()? {}
        Ok(RunSummary {
            instructions: self.instructions,
            exit_codes: self.machine.harts().iter().map(|h| h.terminated()).collect(),
            reason: self.stop.unwrap_or(StopReason::AllWaiting),
        })
    }

    fn macro_tracing(&self) -> bool {
        self.machine.config().trace.macro_tracing
    }

    /// Returns `true` if the instructions of the coming batch are traced.
    fn tracing_active(&self) -> bool {
        let trace = &self.machine.config().trace;
        let exe_trace = trace
            .exe_trace_start
            .is_some_and(|start| self.instructions >= start);
        let in_range = trace.instruction_range.is_some_and(|(start, length)| {
            (start..start.saturating_add(length)).contains(&self.instructions)
        });
        exe_trace || in_range || self.macro_region
    }

    /// Instructions each hart may run in the coming batch.
    ///
    /// Batches end on the boundaries of instruction-number triggers and at the instruction limit.
    fn budget(&self, tracing: bool) -> u64 {
        let config = self.machine.config();
        let mut budget = if tracing || config.trace.macro_tracing {
            1
        } else {
            config.batch_size
        };
        let trace = &config.trace;
        let boundaries = [
            trace.exe_trace_start,
            trace.instruction_range.map(|(start, _)| start),
            trace
                .instruction_range
                .map(|(start, length)| start.saturating_add(length)),
            config.max_instructions,
        ];
        for boundary in boundaries.into_iter().flatten() {
            if boundary > self.instructions {
                budget = budget.min(boundary - self.instructions);
            }
        }
        budget.max(1)
    }

    fn observe(&mut self, record: &RetireRecord, tracing: bool) -> io::Result<()> {
        if self.macro_tracing() {
            match record.raw {
                TRACE_START_MARKER if !self.macro_region => {
                    self.macro_region = true;
                    return self.region_changed(true);
                }
                TRACE_STOP_MARKER if self.macro_region => {
                    self.macro_region = false;
                    return self.region_changed(false);
                }
                _ if !self.macro_region => return Ok(()),
                _ => {}
            }
        } else if !tracing {
            return Ok(());
        }
        match &mut self.sink {
            Some(sink) => sink.retired(record),
            None => Ok(()),
        }
    }

    fn region_changed(&mut self, tracing: bool) -> io::Result<()> {
        self.was_tracing = tracing;
        if tracing {
            info!("Trace start at instruction {}", self.instructions);
            if let Some(sink) = &mut self.sink {
                sink.region_started(self.instructions)?;
            }
        } else {
            info!("Trace stop at instruction {}", self.instructions);
            if let Some(sink) = &mut self.sink {
                sink.region_stopped(self.instructions)?;
            }
            if self.machine.config().trace.exit_on_stop {
                self.stop = Some(StopReason::TraceStopped);
            }
        }
        Ok(())
    }

    fn heartbeat(&mut self) {
        let Some(next) = self.next_heartbeat else {
            return;
        };
        if self.instructions < next {
            return;
        }
        let pc = self.machine.hart(0).map_or(0, |hart| hart.registers().pc());
        info!("Heartbeat: {} instructions, pc {pc:#x}", self.instructions);
        let period = self.machine.config().heartbeat.unwrap_or(next);
        self.next_heartbeat = Some((self.instructions / period + 1) * period);
    }

    fn log_asid_change(&mut self) {
        let Some(asid) = self.machine.hart(0).map(|hart| hart.satp_asid()) else {
            return;
        };
        if asid != self.last_asid {
            info!("Hart 0 switched from ASID {} to {asid}", self.last_asid);
            self.last_asid = asid;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MachineConfig, TraceConfig};
    use crate::IsaConfig;
    use std::cell::RefCell;
    use std::rc::Rc;

    const RAM_BASE: u64 = 0x8000_0000;
    /// `addi x5, x5, 1`
    const INC: u32 = 0x0012_8293;
    /// `jal x0, -4`
    const LOOP_BACK: u32 = 0xFFDF_F06F;
    /// `addi a7, x0, 8`
    const LI_A7_8: u32 = 0x0080_0893;
    /// `addi a0, x0, 3`
    const LI_A0_3: u32 = 0x0030_0513;
    const ECALL: u32 = 0x0000_0073;
    const WFI: u32 = 0x1050_0073;

    /// Records the pcs of traced instructions.
    #[derive(Default, Clone)]
    struct Collect(Rc<RefCell<Vec<u64>>>);

    impl TraceSink for Collect {
        fn retired(&mut self, record: &RetireRecord) -> io::Result<()> {
            self.0.borrow_mut().push(record.pc);
            Ok(())
        }
    }

    fn driver(config: MachineConfig, program: &[u32]) -> Driver {
        let mut machine = Machine::new(MachineConfig {
            isa: IsaConfig::parse("rv64gc").unwrap(),
            ram_size: 0x1_0000,
            ..config
        })
        .unwrap();
        let bytes: Vec<u8> = program.iter().flat_map(|insn| insn.to_le_bytes()).collect();
        machine.load(RAM_BASE, &bytes).unwrap();
        Driver::new(machine)
    }

    #[test]
    fn test_run_until_shutdown() {
        let mut driver = driver(
            MachineConfig::default(),
            &[INC, LI_A7_8, LI_A0_3, ECALL],
        );
        let summary = driver.run().unwrap();
        assert_eq!(StopReason::Terminated, summary.reason);
        assert_eq!(vec![Some(3)], summary.exit_codes);
        assert_eq!(3, summary.exit_code());
        assert_eq!(4, summary.instructions);
    }

    #[test]
    fn test_instruction_limit() {
        let config = MachineConfig {
            max_instructions: Some(25),
            batch_size: 10,
            ..Default::default()
        };
        let mut driver = driver(config, &[INC, LOOP_BACK]);
        let summary = driver.run().unwrap();
        assert_eq!(StopReason::InstructionLimit, summary.reason);
        assert_eq!(25, summary.instructions);
        assert_eq!(vec![None], summary.exit_codes);
        assert_eq!(0, summary.exit_code());
    }

    #[test]
    fn test_all_harts_waiting() {
        let config = MachineConfig {
            hart_count: 2,
            ..Default::default()
        };
        let mut driver = driver(config, &[WFI]);
        let summary = driver.run().unwrap();
        assert_eq!(StopReason::AllWaiting, summary.reason);
        assert_eq!(2, summary.instructions);
    }

    #[test]
    fn test_instruction_range_trace() {
        let config = MachineConfig {
            max_instructions: Some(20),
            trace: TraceConfig {
                instruction_range: Some((3, 4)),
                ..Default::default()
            },
            ..Default::default()
        };
        let collect = Collect::default();
        let mut driver =
            driver(config, &[INC, LOOP_BACK]).with_trace(Box::new(collect.clone()));
        driver.run().unwrap();
        // Instructions 3..7 alternate between the jump and the increment.
        assert_eq!(
            vec![RAM_BASE + 4, RAM_BASE, RAM_BASE + 4, RAM_BASE],
            *collect.0.borrow()
        );
    }

    #[test]
    fn test_trapping_instruction_is_traced_but_not_counted() {
        let config = MachineConfig {
            trace: TraceConfig {
                exe_trace_start: Some(0),
                ..Default::default()
            },
            ..Default::default()
        };
        let program = [
            0x0000_0317, // auipc t1, 0
            0x0103_0313, // addi t1, t1, 16
            0x3053_1073, // csrw mtvec, t1
            0x0000_0000, // illegal
            LI_A7_8,
            LI_A0_3,
            ECALL,
        ];
        let collect = Collect::default();
        let mut driver = driver(config, &program).with_trace(Box::new(collect.clone()));
        let summary = driver.run().unwrap();
        assert_eq!(StopReason::Terminated, summary.reason);
        assert_eq!(6, summary.instructions);
        assert_eq!(
            vec![RAM_BASE, RAM_BASE + 4, RAM_BASE + 8, RAM_BASE + 12, RAM_BASE + 16],
            collect.0.borrow()[..5]
        );
    }

    #[test]
    fn test_macro_trace_exit_on_stop() {
        let config = MachineConfig {
            trace: TraceConfig {
                macro_tracing: true,
                exit_on_stop: true,
                ..Default::default()
            },
            ..Default::default()
        };
        let program = [
            INC,
            TRACE_START_MARKER,
            INC,
            INC,
            TRACE_STOP_MARKER,
            INC,
            LOOP_BACK,
        ];
        let collect = Collect::default();
        let mut driver = driver(config, &program).with_trace(Box::new(collect.clone()));
        let summary = driver.run().unwrap();
        assert_eq!(StopReason::TraceStopped, summary.reason);
        assert_eq!(5, summary.instructions);
        assert_eq!(vec![RAM_BASE + 8, RAM_BASE + 12], *collect.0.borrow());
    }

    #[test]
    fn test_budget_stops_at_boundaries() {
        let config = MachineConfig {
            batch_size: 100,
            trace: TraceConfig {
                exe_trace_start: Some(30),
                ..Default::default()
            },
            ..Default::default()
        };
        let mut driver = driver(config, &[INC, LOOP_BACK]);
        assert_eq!(30, driver.budget(false));
        driver.run_batch().unwrap();
        assert_eq!(30, driver.instructions());
        assert!(driver.tracing_active());
        assert_eq!(1, driver.budget(true));
    }
}
