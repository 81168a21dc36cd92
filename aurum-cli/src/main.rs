mod loader;

use aurum_core::config::{TraceConfig, DEFAULT_BATCH_SIZE};
use aurum_core::driver::Driver;
use aurum_core::trace::TextTrace;
use aurum_core::{snapshot, IsaConfig, Machine, MachineConfig};
use clap::Parser;
use loader::Image;
use log::info;
use std::error::Error;
use std::fs::File;
use std::io::{self, BufWriter, Read, Write};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(version, about = "RISC-V golden-reference simulator", long_about = None)]
struct Args {
    /// ISA string, e.g. `rv64gc_zba_zbb_zbs`.
    #[arg(long, default_value = "rv64gc")]
    isa: IsaConfig,
    /// Vector register width in bits, if `v` is enabled.
    #[arg(long)]
    vlen: Option<u32>,
    #[arg(long, default_value_t = 1)]
    harts: usize,
    #[arg(long, value_parser = parse_u64, default_value = "0x80000000")]
    ram_base: u64,
    /// RAM size in MiB.
    #[arg(long, default_value_t = 256)]
    ram_size: u64,
    /// Load the program as a flat binary at the start of RAM instead of as an ELF file.
    #[arg(long)]
    raw: bool,
    /// Stop after this many instructions.
    #[arg(long, value_parser = parse_u64)]
    max_instructions: Option<u64>,
    /// Log a heartbeat every this many instructions.
    #[arg(long, value_parser = parse_u64)]
    heartbeat: Option<u64>,
    /// Instructions a hart runs before the next hart gets its turn.
    #[arg(long, value_parser = parse_u64, default_value_t = DEFAULT_BATCH_SIZE)]
    batch_size: u64,
    /// Keep running when the program makes an SBI shutdown call.
    #[arg(long)]
    ignore_shutdown: bool,
    /// Raise address-misaligned exceptions instead of splitting misaligned accesses.
    #[arg(long)]
    strict_alignment: bool,
    /// Write the execution trace to this file (`-` for stdout).
    #[arg(long)]
    trace: Option<PathBuf>,
    /// Trace every instruction from this instruction number on.
    #[arg(long, value_parser = parse_u64)]
    exe_trace_start: Option<u64>,
    /// Trace the regions delimited by `xor x0, x0, x0` and `xor x0, x1, x1`.
    #[arg(long, conflicts_with = "trace_range")]
    macro_trace: bool,
    /// Trace `START:LENGTH` instructions.
    #[arg(long, value_parser = parse_range)]
    trace_range: Option<(u64, u64)>,
    /// Stop the simulation when a traced region ends.
    #[arg(long)]
    exit_on_trace_stop: bool,
    /// Restore hart 0 from this snapshot before running.
    #[arg(long)]
    restore: Option<PathBuf>,
    /// Save hart 0 to this snapshot after running.
    #[arg(long)]
    save: Option<PathBuf>,
    /// Increase logging verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
    /// Program to run.
    binary: PathBuf,
}

fn parse_u64(value: &str) -> Result<u64, String> {
    let value = value.replace('_', "");
    let result = match value.strip_prefix("0x") {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => value.parse(),
    };
    result.map_err(|e| format!("invalid number {value:?}: {e}"))
}

fn parse_range(value: &str) -> Result<(u64, u64), String> {
    let (start, length) = value
        .split_once(':')
        .ok_or_else(|| format!("expected START:LENGTH, got {value:?}"))?;
    Ok((parse_u64(start)?, parse_u64(length)?))
}

fn main() -> Result<ExitCode, Box<dyn Error>> {
    let args = Args::parse();

    stderrlog::new()
        .verbosity(1 + args.verbose as usize)
        .modules([module_path!(), "aurum_core"])
        .init()?;

    let mut buf = Vec::new();
    File::open(&args.binary)?.read_to_end(&mut buf)?;
    let image = if args.raw {
        Image::raw(&buf, args.ram_base)
    } else {
        Image::from_elf(&buf)?
    };

    let isa = match args.vlen {
        Some(vlen) => args.isa.with_vlen(vlen)?,
        None => args.isa,
    };
    let config = MachineConfig {
        isa,
        hart_count: args.harts,
        reset_vector: image.entry,
        ram_base: args.ram_base,
        ram_size: args.ram_size << 20,
        terminate_on_shutdown: !args.ignore_shutdown,
        misaligned_access: !args.strict_alignment,
        max_instructions: args.max_instructions,
        heartbeat: args.heartbeat,
        batch_size: args.batch_size,
        trace: TraceConfig {
            exe_trace_start: args.exe_trace_start,
            macro_tracing: args.macro_trace,
            instruction_range: args.trace_range,
            exit_on_stop: args.exit_on_trace_stop,
        },
        ..Default::default()
    };

    let mut machine = Machine::new(config)?;
    image.load_into(&mut machine)?;
    if let Some(path) = &args.restore {
        snapshot::restore_hart(&mut machine, 0, io::BufReader::new(File::open(path)?))?;
        info!("Restored hart 0 from {}", path.display());
    }

    let mut driver = Driver::new(machine);
    if let Some(path) = &args.trace {
        let out: Box<dyn Write> = if path.as_os_str() == "-" {
            Box::new(io::stdout().lock())
        } else {
            Box::new(BufWriter::new(File::create(path)?))
        };
        driver = driver.with_trace(Box::new(TextTrace::new(out)));
    }

    let summary = driver.run()?;
    info!(
        "Stopped after {} instructions ({:?})",
        summary.instructions, summary.reason
    );

    if let Some(path) = &args.save {
        snapshot::save_hart(driver.machine(), 0, BufWriter::new(File::create(path)?))?;
        info!("Saved hart 0 to {}", path.display());
    }

    let code = summary.exit_code();
    if code != 0 {
        eprintln!("Program exited with code {code}");
    }
    Ok(ExitCode::from(code as u8))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_u64() {
        assert_eq!(Ok(0x8000_0000), parse_u64("0x8000_0000"));
        assert_eq!(Ok(1000), parse_u64("1000"));
        assert!(parse_u64("0xZZ").is_err());
    }

    #[test]
    fn test_parse_range() {
        assert_eq!(Ok((100, 20)), parse_range("100:20"));
        assert!(parse_range("100").is_err());
    }

    #[test]
    fn test_args() {
        let args = Args::try_parse_from([
            "aurum",
            "--isa",
            "rv32imac",
            "--trace-range",
            "0x10:5",
            "-vv",
            "program.elf",
        ])
        .unwrap();
        assert_eq!(IsaConfig::parse("rv32imac").unwrap(), args.isa);
        assert_eq!(Some((16, 5)), args.trace_range);
        assert_eq!(2, args.verbose);
        assert_eq!(0x8000_0000, args.ram_base);
    }

    #[test]
    fn test_conflicting_trace_triggers() {
        let result = Args::try_parse_from([
            "aurum",
            "--macro-trace",
            "--trace-range",
            "0:5",
            "program.elf",
        ]);
        assert!(result.is_err());
    }
}
