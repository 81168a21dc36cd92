//! Provides a simulatable RISC-V hart.

pub mod control;
pub mod counters;
mod csr_file;
mod execute;
mod float;
pub mod interrupts;
pub mod mmu;
pub mod status;
pub mod trap;
mod vector;

use crate::compressed;
use crate::instruction::{
    BranchCondition, CsrSource, Instruction, LoadWidth, RegImmOp, RegRegOp, RegShiftImmOp,
    StoreWidth, UnaryOp,
};
use crate::memory::PhysicalMemory;
use crate::registers::{FRegisters, VRegisters, XRegisters};
use crate::trace::{ControlFlow, LastWrite, RetireRecord};
use crate::{IsaConfig, PrivilegeLevel};
use control::Control;
use counters::Counters;
use execute::Executor;
use float::FpState;
use interrupts::Interrupts;
use log::trace;
use mmu::{Mmu, Satp, Tlbs};
use serde::{Deserialize, Serialize};
use status::Status;
use std::fmt;
use trap::{DebugState, Trap};
use vector::VectorState;

pub use trap::{DebugCause, TrapCause};

pub type CsrReadResult = Result<u128, Exception>;
pub type CsrWriteResult = Result<(), Exception>;

/// Outcome of executing one instruction: how it changed the pc, or the exception it raised.
pub type ExecutionResult = Result<ControlFlow, Fault>;

/// A load reservation registered by `lr`.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Reservation {
    /// Virtual address the reservation was made on.
    pub address: u64,
    /// Store sequence number of the physical memory when the reservation was made.
    pub sequence: u64,
}

/// RISC-V hardware thread.
///
/// > From the perspective of software running in a given execution environment, a hart is a
/// > resource that autonomously fetches and executes RISC-V instructions within that execution
/// > environment.
///
/// > The execution environment is responsible for ensuring the eventual forward progress of each of
/// > its harts. For a given hart, that responsibility is suspended while the hart is exercising a
/// > mechanism that explicitly waits for an event, such as the wait-for-interrupt instruction
/// > defined in Volume II of this specification; and that responsibility ends if the hart is
/// > terminated.
///
/// A hart does not own its memory; the [`Machine`](crate::Machine) lends the shared physical
/// memory to whichever hart is executing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hart {
    id: u64,
    isa: IsaConfig,
    misaligned_access: bool,
    terminate_on_shutdown: bool,

    registers: XRegisters,
    f_registers: FRegisters,
    v_registers: VRegisters,
    privilege: PrivilegeLevel,
    debug_mode: bool,

    status: Status,
    interrupts: Interrupts,
    control: Control,
    trap: Trap,
    debug: DebugState,
    counters: Counters,
    fp: FpState,
    vector: VectorState,
    satp: Satp,

    reservation: Option<Reservation>,
    pending_exception: Option<Exception>,
    pending_interrupt: Option<Interrupt>,
    /// In co-simulation mode interrupts are only taken when injected.
    cosim: bool,
    /// Set by `wfi`; the hart sleeps until an interrupt is pending and enabled.
    power_down: bool,
    /// Exit code requested through the SBI shutdown call.
    terminate: Option<i64>,

    #[serde(skip)]
    tlbs: Tlbs,
    #[serde(skip)]
    write: LastWrite,
    #[serde(skip)]
    nondeterministic: bool,
    #[serde(skip)]
    last: Option<RetireRecord>,
    #[serde(skip)]
    batch_ended: bool,
}

impl Hart {
    pub fn new(
        id: u64,
        isa: &IsaConfig,
        reset_vector: u64,
        misaligned_access: bool,
        terminate_on_shutdown: bool,
    ) -> Self {
        Self {
            id,
            isa: *isa,
            misaligned_access,
            terminate_on_shutdown,
            registers: XRegisters::new(isa.xlen, reset_vector),
            f_registers: FRegisters::new(isa.flen),
            v_registers: VRegisters::new(isa.vlen),
            privilege: PrivilegeLevel::Machine,
            debug_mode: false,
            status: Status::new(isa),
            interrupts: Interrupts::new(),
            control: Control::default(),
            trap: Trap::default(),
            debug: DebugState::new(),
            counters: Counters::new(),
            fp: FpState::default(),
            vector: VectorState::new(isa),
            satp: Satp::default(),
            reservation: None,
            pending_exception: None,
            pending_interrupt: None,
            cosim: false,
            power_down: false,
            terminate: None,
            tlbs: Tlbs::default(),
            write: LastWrite::None,
            nondeterministic: false,
            last: None,
            batch_ended: false,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn isa(&self) -> &IsaConfig {
        &self.isa
    }

    pub fn registers(&self) -> &XRegisters {
        &self.registers
    }

    pub fn registers_mut(&mut self) -> &mut XRegisters {
        &mut self.registers
    }

    pub fn f_registers(&self) -> &FRegisters {
        &self.f_registers
    }

    pub fn v_registers(&self) -> &VRegisters {
        &self.v_registers
    }

    pub fn privilege(&self) -> PrivilegeLevel {
        self.privilege
    }

    pub fn is_debug_mode(&self) -> bool {
        self.debug_mode
    }

    pub fn counters(&self) -> &Counters {
        &self.counters
    }

    /// External interrupt lines (MEIP, SEIP, MTIP, MSIP) are driven through this.
    pub fn interrupts_mut(&mut self) -> &mut Interrupts {
        &mut self.interrupts
    }

    pub fn is_powered_down(&self) -> bool {
        self.power_down
    }

    /// Returns the exit code if the program asked to shut down the machine.
    pub fn terminated(&self) -> Option<i64> {
        self.terminate
    }

    pub fn set_cosim(&mut self, cosim: bool) {
        self.cosim = cosim;
    }

    /// Record of the instruction retired by the most recent step, if any.
    pub fn last_retired(&self) -> Option<&RetireRecord> {
        self.last.as_ref()
    }

    /// Injects an exception to be raised instead of executing the next instruction.
    pub fn set_pending_exception(&mut self, exception: Exception) {
        self.pending_exception = Some(exception);
    }

    /// Injects an interrupt to be taken before the next instruction.
    pub fn set_pending_interrupt(&mut self, interrupt: Interrupt) {
        self.pending_interrupt = Some(interrupt);
    }

    /// Cause code of the injected exception, `-1` if there is none.
    pub fn pending_exception(&self) -> i32 {
        self.pending_exception.map_or(-1, |exception| exception.code() as i32)
    }

    /// Cause code of the injected interrupt, `-1` if there is none.
    pub fn pending_interrupt(&self) -> i32 {
        self.pending_interrupt.map_or(-1, |interrupt| interrupt.code() as i32)
    }

    /// Returns `true` if the hart must stop running its current batch: after traps, and after
    /// instructions that change how addresses are translated.
    pub fn batch_ended(&self) -> bool {
        self.batch_ended
    }

    /// Executes up to `budget` instructions, returning the number of instructions retired.
    ///
    /// The batch ends early when a trap is taken, when translation settings change, when the
    /// hart powers down, or when the program requests a shutdown.
    pub fn execute(&mut self, memory: &mut PhysicalMemory, budget: u64) -> u64 {
        self.batch_ended = false;
        self.last = None;
        if self.terminate.is_some() {
            return 0;
        }
        if self.power_down {
            if !self.interrupts.any_pending_enabled() && self.pending_interrupt.is_none() {
                return 0;
            }
            trace!("Hart {} woken up", self.id);
            self.power_down = false;
        }

        let mut retired = 0;
        while retired < budget && !self.batch_ended {
            if self.step(memory) {
                retired += 1;
            }
            if self.power_down || self.terminate.is_some() {
                break;
            }
        }
        retired
    }

    /// Executes a single instruction, or takes an interrupt.
    ///
    /// Returns `true` if an instruction was retired. An instruction that raised an exception
    /// other than an environment call is not retired, but [`last_retired`](Self::last_retired)
    /// still describes it.
    fn step(&mut self, memory: &mut PhysicalMemory) -> bool {
        self.last = None;
        self.counters.increment_cycle();

        if let Some(interrupt) = self.interrupt_to_service() {
            trace!(
                "Hart {} taking interrupt {} at {:#x}",
                self.id,
                interrupt.code(),
                self.registers.pc()
            );
            self.take_interrupt(interrupt);
            self.batch_ended = true;
            return false;
        }

        let mut record = RetireRecord::new(self.id, self.privilege, self.registers.pc());
        let result = match self.pending_exception.take() {
            Some(exception) => Err(Fault::new(exception, 0)),
            None => self.fetch_and_execute(memory, &mut record),
        };
        let retired = match result {
            Ok(control_flow) => {
                self.counters.increment_instret();
                record.control_flow = control_flow;
                true
            }
            Err(fault) => {
                // Environment calls count as retired.
                let retired = fault.exception.is_environment_call();
                if retired {
                    self.counters.increment_instret();
                }
                record.exception = Some((fault.exception.code(), fault.tval));
                record.control_flow = ControlFlow::Trap;
                self.take_exception(fault.exception, fault.tval);
                self.batch_ended = true;
                retired
            }
        };
        record.write = std::mem::take(&mut self.write);
        record.nondeterministic =
            std::mem::take(&mut self.nondeterministic) | memory.take_io_access();
        self.last = Some(record);
        retired
    }

    fn interrupt_to_service(&mut self) -> Option<Interrupt> {
        if self.debug_mode {
            None
        } else if self.cosim {
            self.pending_interrupt.take()
        } else {
            self.interrupt_to_take()
        }
    }

    /// "Independent instruction fetch unit"
    fn fetch_and_execute(
        &mut self,
        memory: &mut PhysicalMemory,
        record: &mut RetireRecord,
    ) -> ExecutionResult {
        let pc = self.registers.pc();
        let (raw, length) = Mmu::new(self, memory).fetch(pc)?;
        record.raw = raw;
        record.length = length;
        let instruction = if length == 2 {
            compressed::decode(raw as u16, &self.isa)
        } else {
            Instruction::decode(raw, &self.isa)
        }
        .map_err(|_| Fault::new(Exception::IllegalInstruction, raw as u64))?;
        self.execute_instruction(memory, instruction, raw, length)
    }

    /// Executes a decoded instruction.
    ///
    /// This only takes care of the instruction-specific operations, such as updating registers,
    /// memory, the `pc` register, and CSRs. Counters are not updated and exceptions are returned
    /// rather than taken.
    pub fn execute_instruction(
        &mut self,
        memory: &mut PhysicalMemory,
        instruction: Instruction,
        raw: u32,
        length: u64,
    ) -> ExecutionResult {
        let mut executor = Executor {
            hart: self,
            memory,
            raw,
            length,
        };
        match instruction {
            Instruction::OpImm {
                op,
                dest,
                src,
                immediate,
            } => {
                let op = match op {
                    RegImmOp::Addi => Executor::addi,
                    RegImmOp::Slti => Executor::slti,
                    RegImmOp::Sltiu => Executor::sltiu,
                    RegImmOp::Xori => Executor::xori,
                    RegImmOp::Ori => Executor::ori,
                    RegImmOp::Andi => Executor::andi,
                    RegImmOp::Addiw => Executor::addiw,
                    RegImmOp::Addid => Executor::addid,
                };
                op(&mut executor, dest, src, immediate)
            }
            Instruction::OpShiftImm {
                op,
                dest,
                src,
                shift_amount,
            } => {
                let op = match op {
                    RegShiftImmOp::Slli => Executor::slli,
                    RegShiftImmOp::Srli => Executor::srli,
                    RegShiftImmOp::Srai => Executor::srai,
                    RegShiftImmOp::Slliw => Executor::slliw,
                    RegShiftImmOp::Srliw => Executor::srliw,
                    RegShiftImmOp::Sraiw => Executor::sraiw,
                    RegShiftImmOp::Sllid => Executor::sllid,
                    RegShiftImmOp::Srlid => Executor::srlid,
                    RegShiftImmOp::Sraid => Executor::sraid,
                    RegShiftImmOp::SlliUw => Executor::slli_uw,
                    RegShiftImmOp::Rori => Executor::rori,
                    RegShiftImmOp::Roriw => Executor::roriw,
                    RegShiftImmOp::Bclri => Executor::bclri,
                    RegShiftImmOp::Bseti => Executor::bseti,
                    RegShiftImmOp::Binvi => Executor::binvi,
                    RegShiftImmOp::Bexti => Executor::bexti,
                };
                op(&mut executor, dest, src, shift_amount)
            }
            Instruction::OpUnary { op, dest, src } => {
                let op = match op {
                    UnaryOp::Clz => Executor::clz,
                    UnaryOp::Ctz => Executor::ctz,
                    UnaryOp::Cpop => Executor::cpop,
                    UnaryOp::Clzw => Executor::clzw,
                    UnaryOp::Ctzw => Executor::ctzw,
                    UnaryOp::Cpopw => Executor::cpopw,
                    UnaryOp::SextB => Executor::sext_b,
                    UnaryOp::SextH => Executor::sext_h,
                    UnaryOp::ZextH => Executor::zext_h,
                    UnaryOp::OrcB => Executor::orc_b,
                    UnaryOp::Rev8 => Executor::rev8,
                };
                op(&mut executor, dest, src)
            }
            Instruction::Auipc { dest, immediate } => executor.auipc(dest, immediate),
            Instruction::Lui { dest, immediate } => executor.lui(dest, immediate),
            Instruction::Op {
                op,
                dest,
                src1,
                src2,
            } => {
                let op = match op {
                    RegRegOp::Add => Executor::add,
                    RegRegOp::Slt => Executor::slt,
                    RegRegOp::Sltu => Executor::sltu,
                    RegRegOp::And => Executor::and,
                    RegRegOp::Or => Executor::or,
                    RegRegOp::Xor => Executor::xor,
                    RegRegOp::Sll => Executor::sll,
                    RegRegOp::Srl => Executor::srl,
                    RegRegOp::Sub => Executor::sub,
                    RegRegOp::Sra => Executor::sra,
                    RegRegOp::Mul => Executor::mul,
                    RegRegOp::Mulh => Executor::mulh,
                    RegRegOp::Mulhsu => Executor::mulhsu,
                    RegRegOp::Mulhu => Executor::mulhu,
                    RegRegOp::Div => Executor::div,
                    RegRegOp::Divu => Executor::divu,
                    RegRegOp::Rem => Executor::rem,
                    RegRegOp::Remu => Executor::remu,
                    RegRegOp::Addw => Executor::addw,
                    RegRegOp::Subw => Executor::subw,
                    RegRegOp::Sllw => Executor::sllw,
                    RegRegOp::Srlw => Executor::srlw,
                    RegRegOp::Sraw => Executor::sraw,
                    RegRegOp::Mulw => Executor::mulw,
                    RegRegOp::Divw => Executor::divw,
                    RegRegOp::Divuw => Executor::divuw,
                    RegRegOp::Remw => Executor::remw,
                    RegRegOp::Remuw => Executor::remuw,
                    RegRegOp::Addd => Executor::addd,
                    RegRegOp::Subd => Executor::subd,
                    RegRegOp::Slld => Executor::slld,
                    RegRegOp::Srld => Executor::srld,
                    RegRegOp::Srad => Executor::srad,
                    RegRegOp::Muld => Executor::muld,
                    RegRegOp::Divd => Executor::divd,
                    RegRegOp::Divud => Executor::divud,
                    RegRegOp::Remd => Executor::remd,
                    RegRegOp::Remud => Executor::remud,
                    RegRegOp::Sh1add => Executor::sh1add,
                    RegRegOp::Sh2add => Executor::sh2add,
                    RegRegOp::Sh3add => Executor::sh3add,
                    RegRegOp::AddUw => Executor::add_uw,
                    RegRegOp::Sh1addUw => Executor::sh1add_uw,
                    RegRegOp::Sh2addUw => Executor::sh2add_uw,
                    RegRegOp::Sh3addUw => Executor::sh3add_uw,
                    RegRegOp::Andn => Executor::andn,
                    RegRegOp::Orn => Executor::orn,
                    RegRegOp::Xnor => Executor::xnor,
                    RegRegOp::Min => Executor::min,
                    RegRegOp::Minu => Executor::minu,
                    RegRegOp::Max => Executor::max,
                    RegRegOp::Maxu => Executor::maxu,
                    RegRegOp::Rol => Executor::rol,
                    RegRegOp::Ror => Executor::ror,
                    RegRegOp::Rolw => Executor::rolw,
                    RegRegOp::Rorw => Executor::rorw,
                    RegRegOp::Clmul => Executor::clmul,
                    RegRegOp::Clmulh => Executor::clmulh,
                    RegRegOp::Clmulr => Executor::clmulr,
                    RegRegOp::Bset => Executor::bset,
                    RegRegOp::Bclr => Executor::bclr,
                    RegRegOp::Binv => Executor::binv,
                    RegRegOp::Bext => Executor::bext,
                    RegRegOp::CzeroEqz => Executor::czero_eqz,
                    RegRegOp::CzeroNez => Executor::czero_nez,
                };
                op(&mut executor, dest, src1, src2)
            }
            Instruction::Jal { dest, offset } => executor.jal(dest, offset),
            Instruction::Jalr { dest, base, offset } => executor.jalr(dest, base, offset),
            Instruction::Branch {
                condition,
                src1,
                src2,
                offset,
            } => {
                let op = match condition {
                    BranchCondition::Beq => Executor::beq,
                    BranchCondition::Bne => Executor::bne,
                    BranchCondition::Blt => Executor::blt,
                    BranchCondition::Bltu => Executor::bltu,
                    BranchCondition::Bge => Executor::bge,
                    BranchCondition::Bgeu => Executor::bgeu,
                };
                op(&mut executor, src1, src2, offset)
            }
            Instruction::Load {
                width,
                dest,
                base,
                offset,
            } => {
                let op = match width {
                    LoadWidth::Lb => Executor::lb,
                    LoadWidth::Lh => Executor::lh,
                    LoadWidth::Lw => Executor::lw,
                    LoadWidth::Ld => Executor::ld,
                    LoadWidth::Lq => Executor::lq,
                    LoadWidth::Lbu => Executor::lbu,
                    LoadWidth::Lhu => Executor::lhu,
                    LoadWidth::Lwu => Executor::lwu,
                    LoadWidth::Ldu => Executor::ldu,
                };
                op(&mut executor, dest, base, offset)
            }
            Instruction::Store {
                width,
                src,
                base,
                offset,
            } => {
                let op = match width {
                    StoreWidth::Sb => Executor::sb,
                    StoreWidth::Sh => Executor::sh,
                    StoreWidth::Sw => Executor::sw,
                    StoreWidth::Sd => Executor::sd,
                    StoreWidth::Sq => Executor::sq,
                };
                op(&mut executor, src, base, offset)
            }
            Instruction::Fence {
                predecessor,
                successor,
            } => executor.fence(predecessor, successor),
            Instruction::FenceI => executor.fence_i(),
            Instruction::Ecall => executor.ecall(),
            Instruction::Ebreak => executor.ebreak(),
            Instruction::Sret => executor.sret(),
            Instruction::Mret => executor.mret(),
            Instruction::Dret => executor.dret(),
            Instruction::Wfi => executor.wfi(),
            Instruction::SfenceVma { vaddr, asid } => executor.sfence_vma(vaddr, asid),
            Instruction::Csr {
                op,
                dest,
                source,
                csr,
            } => {
                let (value, source_is_zero) = match source {
                    CsrSource::Register(src) => {
                        (executor.hart.registers.x(src), u8::from(src) == 0)
                    }
                    CsrSource::Immediate(immediate) => (immediate as u128, immediate == 0),
                };
                executor.csr(op, dest, csr, value, source_is_zero)
            }
            Instruction::LoadReserved {
                width,
                dest,
                address,
            } => executor.lr(width, dest, address),
            Instruction::StoreConditional {
                width,
                dest,
                address,
                src,
            } => executor.sc(width, dest, address, src),
            Instruction::Amo {
                op,
                width,
                dest,
                address,
                src,
            } => executor.amo(op, width, dest, address, src),
            Instruction::FpLoad {
                format,
                dest,
                base,
                offset,
            } => executor.fp_load(format, dest, base, offset),
            Instruction::FpStore {
                format,
                src,
                base,
                offset,
            } => executor.fp_store(format, src, base, offset),
            Instruction::FpFused {
                op,
                format,
                dest,
                src1,
                src2,
                src3,
                rounding,
            } => executor.fp_fused(op, format, dest, src1, src2, src3, rounding),
            Instruction::FpArith {
                op,
                format,
                dest,
                src1,
                src2,
                rounding,
            } => executor.fp_arith(op, format, dest, src1, src2, rounding),
            Instruction::FpSqrt {
                format,
                dest,
                src,
                rounding,
            } => executor.fp_sqrt(format, dest, src, rounding),
            Instruction::FpSignInject {
                op,
                format,
                dest,
                src1,
                src2,
            } => executor.fp_sign_inject(op, format, dest, src1, src2),
            Instruction::FpMinMax {
                op,
                format,
                dest,
                src1,
                src2,
            } => executor.fp_min_max(op, format, dest, src1, src2),
            Instruction::FpRound {
                format,
                dest,
                src,
                rounding,
                exact,
            } => executor.fp_round(format, dest, src, rounding, exact),
            Instruction::FpCompare {
                op,
                format,
                dest,
                src1,
                src2,
            } => executor.fp_compare(op, format, dest, src1, src2),
            Instruction::FpClass { format, dest, src } => executor.fp_class(format, dest, src),
            Instruction::FpMoveToInt { format, dest, src } => {
                executor.fp_move_to_int(format, dest, src)
            }
            Instruction::FpMoveFromInt { format, dest, src } => {
                executor.fp_move_from_int(format, dest, src)
            }
            Instruction::FpToInt {
                format,
                int,
                dest,
                src,
                rounding,
            } => executor.fp_to_int(format, int, dest, src, rounding),
            Instruction::IntToFp {
                format,
                int,
                dest,
                src,
                rounding,
            } => executor.int_to_fp(format, int, dest, src, rounding),
            Instruction::FpConvert {
                to,
                from,
                dest,
                src,
                rounding,
            } => executor.fp_convert(to, from, dest, src, rounding),
            Instruction::FpLoadImmediate {
                format,
                dest,
                index,
            } => executor.fp_load_immediate(format, dest, index),
            Instruction::FcvtmodWD { dest, src } => executor.fcvtmod_w_d(dest, src),
            Instruction::VSetVl { dest, avl, vtype } => executor.vsetvl(dest, avl, vtype),
            Instruction::VArith {
                op,
                dest,
                src2,
                operand,
                masked,
            } => executor.varith(op, dest, src2, operand, masked),
            Instruction::VLoad {
                element_bits,
                dest,
                base,
                masked,
            } => executor.vload(element_bits, dest, base, masked),
            Instruction::VStore {
                element_bits,
                src,
                base,
                masked,
            } => executor.vstore(element_bits, src, base, masked),
            Instruction::LoadGp {
                width,
                dest,
                offset,
            } => executor.load_gp(width, dest, offset),
            Instruction::StoreGp { width, src, offset } => executor.store_gp(width, src, offset),
            Instruction::AddiGp { dest, offset } => executor.addi_gp(dest, offset),
            Instruction::Lea {
                shift,
                zero_extend,
                dest,
                src1,
                src2,
            } => executor.lea(shift, zero_extend, dest, src1, src2),
            Instruction::FindByte {
                op,
                dest,
                src1,
                src2,
            } => executor.find_byte(op, dest, src1, src2),
            Instruction::BitfieldExtract {
                signed,
                dest,
                src,
                msb,
                lsb,
            } => executor.bitfield_extract(signed, dest, src, msb, lsb),
            Instruction::BranchImmediate {
                condition,
                src,
                immediate,
                offset,
            } => executor.branch_immediate(condition, src, immediate, offset),
            Instruction::BranchBit {
                set,
                src,
                bit,
                offset,
            } => executor.branch_bit(set, src, bit, offset),
        }
    }
}

/// An exception together with the value written to xtval when it is taken.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Fault {
    pub exception: Exception,
    pub tval: u64,
}

impl Fault {
    pub fn new(exception: Exception, tval: u64) -> Self {
        Self { exception, tval }
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} (tval {:#x})", self.exception, self.tval)
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum Exception {
    /// Instruction address is not on a two- or four-byte aligned boundary in memory.
    InstructionAddressMisaligned,
    InstructionAccessFault,
    /// Generic exception used to communicate one of many possible scenarios:
    ///
    /// - Attempt to decode a reserved or disabled instruction.
    /// - Attempt to access a non-existent CSR.
    /// - Attempt to access a CSR without the appropriate privilege level.
    /// - Attempt to write to a read-only CSR.
    /// - Execution of a privileged instruction the current mode is not allowed to execute.
    IllegalInstruction,
    Breakpoint,
    LoadAddressMisaligned,
    LoadAccessFault,
    StoreOrAmoAddressMisaligned,
    StoreOrAmoAccessFault,
    EnvironmentCallFromUMode,
    EnvironmentCallFromSMode,
    EnvironmentCallFromMMode,
    InstructionPageFault,
    LoadPageFault,
    StoreOrAmoPageFault,
}

impl Exception {
    pub const INSTRUCTION_ADDRESS_MISALIGNED: usize = 0;
    pub const INSTRUCTION_ACCESS_FAULT: usize = 1;
    pub const ILLEGAL_INSTRUCTION: usize = 2;
    pub const BREAKPOINT: usize = 3;
    pub const LOAD_ADDRESS_MISALIGNED: usize = 4;
    pub const LOAD_ACCESS_FAULT: usize = 5;
    pub const STORE_OR_AMO_ADDRESS_MISALIGNED: usize = 6;
    pub const STORE_OR_AMO_ACCESS_FAULT: usize = 7;
    pub const ENVIRONMENT_CALL_FROM_U_MODE: usize = 8;
    pub const ENVIRONMENT_CALL_FROM_S_MODE: usize = 9;
    pub const ENVIRONMENT_CALL_FROM_M_MODE: usize = 11;
    pub const INSTRUCTION_PAGE_FAULT: usize = 12;
    pub const LOAD_PAGE_FAULT: usize = 13;
    pub const STORE_OR_AMO_PAGE_FAULT: usize = 15;

    const ALL: [Self; 14] = [
        Self::InstructionAddressMisaligned,
        Self::InstructionAccessFault,
        Self::IllegalInstruction,
        Self::Breakpoint,
        Self::LoadAddressMisaligned,
        Self::LoadAccessFault,
        Self::StoreOrAmoAddressMisaligned,
        Self::StoreOrAmoAccessFault,
        Self::EnvironmentCallFromUMode,
        Self::EnvironmentCallFromSMode,
        Self::EnvironmentCallFromMMode,
        Self::InstructionPageFault,
        Self::LoadPageFault,
        Self::StoreOrAmoPageFault,
    ];

    /// Returns the exception code (cause) for this exception.
    pub fn code(self) -> u64 {
        let code = match self {
            Self::InstructionAddressMisaligned => Self::INSTRUCTION_ADDRESS_MISALIGNED,
            Self::InstructionAccessFault => Self::INSTRUCTION_ACCESS_FAULT,
            Self::IllegalInstruction => Self::ILLEGAL_INSTRUCTION,
            Self::Breakpoint => Self::BREAKPOINT,
            Self::LoadAddressMisaligned => Self::LOAD_ADDRESS_MISALIGNED,
            Self::LoadAccessFault => Self::LOAD_ACCESS_FAULT,
            Self::StoreOrAmoAddressMisaligned => Self::STORE_OR_AMO_ADDRESS_MISALIGNED,
            Self::StoreOrAmoAccessFault => Self::STORE_OR_AMO_ACCESS_FAULT,
            Self::EnvironmentCallFromUMode => Self::ENVIRONMENT_CALL_FROM_U_MODE,
            Self::EnvironmentCallFromSMode => Self::ENVIRONMENT_CALL_FROM_S_MODE,
            Self::EnvironmentCallFromMMode => Self::ENVIRONMENT_CALL_FROM_M_MODE,
            Self::InstructionPageFault => Self::INSTRUCTION_PAGE_FAULT,
            Self::LoadPageFault => Self::LOAD_PAGE_FAULT,
            Self::StoreOrAmoPageFault => Self::STORE_OR_AMO_PAGE_FAULT,
        };
        code as u64
    }

    /// Returns the exception with cause `code`, if it is defined.
    pub fn from_code(code: u64) -> Option<Self> {
        Self::ALL.into_iter().find(|exception| exception.code() == code)
    }

    pub fn is_environment_call(self) -> bool {
        matches!(
            self,
            Self::EnvironmentCallFromUMode
                | Self::EnvironmentCallFromSMode
                | Self::EnvironmentCallFromMMode
        )
    }

    /// The environment call exception raised from `privilege`.
    pub fn environment_call(privilege: PrivilegeLevel) -> Self {
        match privilege {
            PrivilegeLevel::User => Self::EnvironmentCallFromUMode,
            PrivilegeLevel::Supervisor => Self::EnvironmentCallFromSMode,
            PrivilegeLevel::Machine => Self::EnvironmentCallFromMMode,
        }
    }
}

/// Interrupts, with their cause codes as discriminants (which are also their bit indices in mip
/// and mie).
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Interrupt {
    SupervisorSoftwareInterrupt = 1,
    MachineSoftwareInterrupt = 3,
    SupervisorTimerInterrupt = 5,
    MachineTimerInterrupt = 7,
    SupervisorExternalInterrupt = 9,
    MachineExternalInterrupt = 11,
}

impl Interrupt {
    /// Returns the exception code (cause) for this interrupt.
    pub fn code(self) -> u64 {
        self as u64
    }

    /// Returns the interrupt with cause `code`, if it is defined.
    pub fn from_code(code: u64) -> Option<Self> {
        match code {
            1 => Some(Self::SupervisorSoftwareInterrupt),
            3 => Some(Self::MachineSoftwareInterrupt),
            5 => Some(Self::SupervisorTimerInterrupt),
            7 => Some(Self::MachineTimerInterrupt),
            9 => Some(Self::SupervisorExternalInterrupt),
            11 => Some(Self::MachineExternalInterrupt),
            _ => None,
        }
    }
}
