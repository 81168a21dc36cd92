//! Runs an architectural compliance test and dumps its signature.
//!
//! The test is an ELF file with `begin_signature` and `end_signature` symbols. It ends with an SBI
//! shutdown call (`a7 = 8`), after which the memory between the two symbols is written out as
//! one 32-bit word per line.

use aurum_core::driver::{Driver, StopReason};
use aurum_core::{IsaConfig, Machine, MachineConfig};
use clap::Parser;
use goblin::elf::program_header::PT_LOAD;
use goblin::elf::Elf;
use std::error::Error;
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// File to write the signature to.
    #[arg(long, short)]
    signature: Option<PathBuf>,
    #[arg(long, default_value = "rv64gc")]
    isa: IsaConfig,
    /// Give up after this many instructions.
    #[arg(long, default_value_t = 50_000_000)]
    max_instructions: u64,
    /// ELF file to run.
    elf: PathBuf,
}

/// Range of the signature in memory.
fn signature_range(elf: &Elf) -> Result<(u64, u64), Box<dyn Error>> {
    let mut start = None;
    let mut end = None;
    for sym in elf.syms.iter() {
        match elf.strtab.get_at(sym.st_name) {
            Some("begin_signature") => start = Some(sym.st_value),
            Some("end_signature") => end = Some(sym.st_value),
            _ => {}
        }
    }
    let start = start.ok_or("missing symbol `begin_signature`")?;
    let end = end.ok_or("missing symbol `end_signature`")?;
    if start % 4 != 0 || end % 4 != 0 || start > end {
        return Err(format!("invalid signature range {start:#x}..{end:#x}").into());
    }
    Ok((start, end))
}

fn main() -> Result<ExitCode, Box<dyn Error>> {
    let args = Args::parse();

    let mut buf = Vec::new();
    File::open(&args.elf)?.read_to_end(&mut buf)?;
    let elf = Elf::parse(&buf)?;

    let mut machine = Machine::new(MachineConfig {
        isa: args.isa,
        reset_vector: elf.entry,
        max_instructions: Some(args.max_instructions),
        ..Default::default()
    })?;
    for header in elf.program_headers.iter().filter(|h| h.p_type == PT_LOAD) {
        let data = buf
            .get(header.file_range())
            .ok_or("segment lies outside the file")?;
        machine.load(header.p_paddr, data)?;
    }

    let mut driver = Driver::new(machine);
    let summary = driver.run()?;
    if summary.reason != StopReason::Terminated {
        eprintln!(
            "Test did not shut down ({:?} after {} instructions)",
            summary.reason, summary.instructions
        );
        return Ok(ExitCode::FAILURE);
    }

    if let Some(path) = args.signature {
        let (start, end) = signature_range(&elf)?;
        let memory = driver.machine().memory();
        let mut file = BufWriter::new(File::create(path)?);
        for address in (start..end).step_by(4) {
            let mut word = [0u8; 4];
            memory.peek(address, &mut word)?;
            writeln!(file, "{:08x}", u32::from_le_bytes(word))?;
        }
        file.flush()?;
    }

    Ok(ExitCode::SUCCESS)
}
