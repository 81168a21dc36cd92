//! Per-instruction retirement metadata and the text execution trace.
//!
//! After every step a hart exposes a [`RetireRecord`] describing what the instruction did. Trace
//! sinks, the driver's region triggers and the co-simulation checker all consume these records.

use crate::csr::CsrSpecifier;
use crate::registers::Specifier;
use crate::PrivilegeLevel;
use std::io;
use std::io::Write;

/// The architectural register written by the most recent instruction.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub enum LastWrite {
    #[default]
    None,
    Gpr {
        register: Specifier,
        /// Register value, sign-extended to 128 bits.
        value: u128,
    },
    Fpr {
        register: Specifier,
        /// Raw (NaN-boxed) FLEN-wide value.
        value: u128,
    },
    Vector {
        register: Specifier,
        /// Contents of the register, least significant byte first.
        bytes: Vec<u8>,
    },
    Csr {
        csr: CsrSpecifier,
        value: u128,
    },
}

/// Return-address-stack hint of a jump.
///
/// Computed from the link registers `x1`/`x5` as destination and base.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub enum JumpHint {
    #[default]
    None,
    Call,
    Return,
    CallAndReturn,
}

impl JumpHint {
    /// Classifies a jump by its destination and (for `jalr`) base register.
    pub fn classify(dest: Specifier, base: Option<Specifier>) -> Self {
        let dest_link = dest.is_link();
        match base {
            Some(base) if base.is_link() => {
                if !dest_link {
                    Self::Return
                } else if dest != base {
                    Self::CallAndReturn
                } else {
                    Self::Call
                }
            }
            _ if dest_link => Self::Call,
            _ => Self::None,
        }
    }
}

/// How an instruction changed the program counter.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub enum ControlFlow {
    #[default]
    Sequential,
    BranchTaken,
    BranchNotTaken,
    Jump(JumpHint),
    Trap,
}

/// Everything the outside world gets to know about one executed instruction.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct RetireRecord {
    pub hart: u64,
    /// Privilege level the instruction executed at.
    pub privilege: Option<PrivilegeLevel>,
    pub pc: u64,
    /// Raw instruction bits; compressed instructions occupy the low 16 bits.
    pub raw: u32,
    /// Instruction length in bytes, `0` if fetching failed.
    pub length: u64,
    pub write: LastWrite,
    /// `(cause, tval)` if the instruction raised an exception.
    pub exception: Option<(u64, u64)>,
    pub control_flow: ControlFlow,
    /// The instruction read a value the outside world may see differently (device registers,
    /// counters).
    pub nondeterministic: bool,
}

impl RetireRecord {
    pub fn new(hart: u64, privilege: PrivilegeLevel, pc: u64) -> Self {
        Self {
            hart,
            privilege: Some(privilege),
            pc,
            ..Default::default()
        }
    }
}

/// Consumer of retired instructions.
pub trait TraceSink {
    fn retired(&mut self, record: &RetireRecord) -> io::Result<()>;

    /// Called when a traced region starts.
    fn region_started(&mut self, _instruction_count: u64) -> io::Result<()> {
        Ok(())
    }

    /// Called when a traced region ends.
    fn region_stopped(&mut self, _instruction_count: u64) -> io::Result<()> {
        Ok(())
    }
}

/// Writes one line per retired instruction:
///
/// ```text
/// 0 3 0x0000000080000000 (0x00500293) x 5 0x0000000000000005
/// ```
#[derive(Debug)]
pub struct TextTrace<W: Write> {
    out: W,
}

impl<W: Write> TextTrace<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> TraceSink for TextTrace<W> {
    fn retired(&mut self, record: &RetireRecord) -> io::Result<()> {
        let privilege = record.privilege.map_or(0, PrivilegeLevel::as_u2);
        let raw = if record.length == 2 {
            format!("0x{:04x}", record.raw & 0xFFFF)
        } else {
            format!("0x{:08x}", record.raw)
        };
        write!(
            self.out,
            "{} {} 0x{:016x} ({})",
            record.hart, privilege, record.pc, raw
        )?;
        if let Some((cause, tval)) = record.exception {
            write!(self.out, " exception {cause}, tval {tval:016x}")?;
        } else {
            match &record.write {
                LastWrite::Gpr { register, value } if u8::from(*register) > 0 => {
                    write!(self.out, " x{:2} 0x{:016x}", u8::from(*register), *value as u64)?
                }
                LastWrite::Fpr { register, value } => {
                    write!(self.out, " f{:2} 0x{:016x}", u8::from(*register), *value as u64)?
                }
                LastWrite::Vector { register, bytes } => {
                    write!(self.out, " v{:2} 0x", u8::from(*register))?;
                    for byte in bytes.iter().rev() {
                        write!(self.out, "{byte:02x}")?;
                    }
                }
                // CSR writes are not part of the trace format
                LastWrite::Gpr { .. } | LastWrite::Csr { .. } | LastWrite::None => {}
            }
        }
        writeln!(self.out)
    }

    fn region_started(&mut self, instruction_count: u64) -> io::Result<()> {
        writeln!(self.out, "# trace start at instruction {instruction_count}")
    }

    fn region_stopped(&mut self, instruction_count: u64) -> io::Result<()> {
        writeln!(self.out, "# trace stop at instruction {instruction_count}")
    }
}
