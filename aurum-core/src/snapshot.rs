//! Saving and restoring hart state.
//!
//! A snapshot holds the architectural state of one hart: registers, CSRs, privilege level and
//! reservation. TLB contents are not saved; a restored hart starts with empty TLBs.

use crate::hart::Hart;
use crate::machine::Machine;
use std::io::{Read, Write};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("could not encode or decode hart state: {0}")]
    Encoding(#[from] bincode::Error),
    #[error("machine has no hart {0}")]
    NoSuchHart(usize),
    #[error("snapshot of an {found} hart cannot replace an {expected} hart")]
    IsaMismatch { expected: String, found: String },
}

/// Writes the state of `hart` to `writer`.
pub fn save<W: Write>(hart: &Hart, writer: W) -> Result<(), SnapshotError> {
    bincode::serialize_into(writer, hart)?;
    Ok(())
}

/// Reads a hart saved with [`save`].
pub fn restore<R: Read>(reader: R) -> Result<Hart, SnapshotError> {
    Ok(bincode::deserialize_from(reader)?)
}

/// Saves hart `index` of `machine`.
pub fn save_hart<W: Write>(
    machine: &Machine,
    index: usize,
    writer: W,
) -> Result<(), SnapshotError> {
    let hart = machine.hart(index).ok_or(SnapshotError::NoSuchHart(index))?;
    save(hart, writer)
}

/// Replaces hart `index` of `machine` with a saved one. The ISA of the saved hart must match.
pub fn restore_hart<R: Read>(
    machine: &mut Machine,
    index: usize,
    reader: R,
) -> Result<(), SnapshotError> {
    let current = machine.hart(index).ok_or(SnapshotError::NoSuchHart(index))?;
    let hart = restore(reader)?;
    if hart.isa() != current.isa() {
        return Err(SnapshotError::IsaMismatch {
            expected: current.isa().to_string(),
            found: hart.isa().to_string(),
        });
    }
    machine
        .replace_hart(index, hart)
        .map(drop)
        .map_err(|_| SnapshotError::NoSuchHart(index))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MachineConfig;
    use crate::registers::Specifier;
    use crate::IsaConfig;

    const RAM_BASE: u64 = 0x8000_0000;

    fn machine(isa: &str) -> Machine {
        let mut machine = Machine::new(MachineConfig {
            isa: IsaConfig::parse(isa).unwrap(),
            ram_size: 0x1_0000,
            ..Default::default()
        })
        .unwrap();
        // addi x5, x0, 5; addi x6, x5, -3
        let program: Vec<u8> = [0x0050_0293u32, 0xFFD2_8313]
            .iter()
            .flat_map(|insn| insn.to_le_bytes())
            .collect();
        machine.load(RAM_BASE, &program).unwrap();
        machine
    }

    #[test]
    fn test_restore_resumes_execution() {
        let mut machine = machine("rv64gcv");
        machine.execute_hart(0, 1);
        let mut buf = Vec::new();
        save_hart(&machine, 0, &mut buf).unwrap();

        machine.execute_hart(0, 1);
        let finished = machine.hart(0).unwrap().registers().clone();

        restore_hart(&mut machine, 0, buf.as_slice()).unwrap();
        let hart = machine.hart(0).unwrap();
        assert_eq!(RAM_BASE + 4, hart.registers().pc());
        assert_eq!(0, hart.registers().x(Specifier::from_u5(6)));

        machine.execute_hart(0, 1);
        assert_eq!(&finished, machine.hart(0).unwrap().registers());
    }

    #[test]
    fn test_restore_rejects_other_isa() {
        let source = machine("rv64gc");
        let mut buf = Vec::new();
        save_hart(&source, 0, &mut buf).unwrap();
        let mut target = machine("rv32gc");
        assert!(matches!(
            restore_hart(&mut target, 0, buf.as_slice()),
            Err(SnapshotError::IsaMismatch { .. })
        ));
    }

    #[test]
    fn test_truncated_snapshot() {
        let source = machine("rv64gc");
        let mut buf = Vec::new();
        save_hart(&source, 0, &mut buf).unwrap();
        buf.truncate(buf.len() / 2);
        assert!(matches!(
            restore(buf.as_slice()),
            Err(SnapshotError::Encoding(_))
        ));
    }

    #[test]
    fn test_missing_hart() {
        let machine = machine("rv64gc");
        assert!(matches!(
            save_hart(&machine, 3, Vec::new()),
            Err(SnapshotError::NoSuchHart(3))
        ));
    }
}
