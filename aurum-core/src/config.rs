//! Machine and ISA configuration.
//!
//! Everything here is resolved once, before the first instruction runs, and is afterwards only
//! ever read.

use crate::AddressRange;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Width of the integer registers and of the address space.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub enum Xlen {
    Rv32,
    Rv64,
    Rv128,
}

impl Xlen {
    pub fn bits(self) -> u32 {
        match self {
            Self::Rv32 => 32,
            Self::Rv64 => 64,
            Self::Rv128 => 128,
        }
    }

    /// The `MXL` encoding used in `misa`.
    pub fn mxl(self) -> u128 {
        match self {
            Self::Rv32 => 1,
            Self::Rv64 => 2,
            Self::Rv128 => 3,
        }
    }

    /// All-ones value of this width, zero-extended to 128 bits.
    pub fn mask(self) -> u128 {
        match self {
            Self::Rv32 => u32::MAX as u128,
            Self::Rv64 => u64::MAX as u128,
            Self::Rv128 => u128::MAX,
        }
    }

    /// Sign-extends the low XLEN bits of `value` to 128 bits.
    ///
    /// This is the canonical form in which integer registers are stored.
    pub fn sext(self, value: u128) -> u128 {
        match self {
            Self::Rv32 => value as i32 as i128 as u128,
            Self::Rv64 => value as i64 as i128 as u128,
            Self::Rv128 => value,
        }
    }

    /// Truncates `value` to its low XLEN bits.
    pub fn zext(self, value: u128) -> u128 {
        value & self.mask()
    }

    /// Mask applied to register-specified shift amounts.
    pub fn shamt_mask(self) -> u32 {
        self.bits() - 1
    }

    /// Returns `true` if the XLEN-wide value is negative when interpreted as signed.
    pub fn is_negative(self, value: u128) -> bool {
        (value >> (self.bits() - 1)) & 1 == 1
    }
}

impl fmt::Display for Xlen {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rv{}", self.bits())
    }
}

/// An optional ISA extension understood by the decoder.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum Extension {
    A,
    C,
    D,
    F,
    M,
    Q,
    V,
    Zba,
    Zbb,
    Zbc,
    Zbs,
    Zfa,
    Zfh,
    Zicond,
    /// Andes vendor extension (custom-0/1/2 opcodes).
    Xandes,
}

impl Extension {
    const ALL: [Self; 15] = [
        Self::A,
        Self::C,
        Self::D,
        Self::F,
        Self::M,
        Self::Q,
        Self::V,
        Self::Zba,
        Self::Zbb,
        Self::Zbc,
        Self::Zbs,
        Self::Zfa,
        Self::Zfh,
        Self::Zicond,
        Self::Xandes,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::A => "a",
            Self::C => "c",
            Self::D => "d",
            Self::F => "f",
            Self::M => "m",
            Self::Q => "q",
            Self::V => "v",
            Self::Zba => "zba",
            Self::Zbb => "zbb",
            Self::Zbc => "zbc",
            Self::Zbs => "zbs",
            Self::Zfa => "zfa",
            Self::Zfh => "zfh",
            Self::Zicond => "zicond",
            Self::Xandes => "xandes",
        }
    }

    fn from_letter(letter: char) -> Option<Self> {
        match letter {
            'a' => Some(Self::A),
            'c' => Some(Self::C),
            'd' => Some(Self::D),
            'f' => Some(Self::F),
            'm' => Some(Self::M),
            'q' => Some(Self::Q),
            'v' => Some(Self::V),
            _ => None,
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|extension| extension.name().len() > 1 && extension.name() == name)
    }

    fn is_single_letter(self) -> bool {
        self.name().len() == 1
    }

    /// Bit of this extension in `misa`, if it has one.
    fn misa_bit(self) -> Option<u32> {
        let letter = match self {
            Self::A => 'a',
            Self::C => 'c',
            Self::D => 'd',
            Self::F => 'f',
            Self::M => 'm',
            Self::Q => 'q',
            Self::V => 'v',
            Self::Xandes => 'x',
            _ => return None,
        };
        Some(letter as u32 - 'a' as u32)
    }
}

/// Set of enabled [`Extension`]s.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct Extensions(u32);

impl Extensions {
    pub fn contains(self, extension: Extension) -> bool {
        self.0 & (1 << extension as u32) != 0
    }

    pub fn insert(&mut self, extension: Extension) {
        self.0 |= 1 << extension as u32;
    }

    pub fn iter(self) -> impl Iterator<Item = Extension> {
        Extension::ALL
            .into_iter()
            .filter(move |extension| self.contains(*extension))
    }
}

impl FromIterator<Extension> for Extensions {
    fn from_iter<I: IntoIterator<Item = Extension>>(iter: I) -> Self {
        let mut extensions = Self::default();
        for extension in iter {
            extensions.insert(extension);
        }
        extensions
    }
}

/// Default vector register width when `v` is enabled.
pub const DEFAULT_VLEN: u32 = 128;

/// Resolved ISA: register widths and enabled extensions.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct IsaConfig {
    pub xlen: Xlen,
    /// Width of the FP registers, `0` when no FP extension is enabled.
    pub flen: u32,
    /// Width of each vector register, `0` when `v` is not enabled.
    pub vlen: u32,
    pub extensions: Extensions,
}

impl Default for IsaConfig {
    fn default() -> Self {
        // rv64gc
        Self::new(
            Xlen::Rv64,
            [Extension::M, Extension::A, Extension::F, Extension::D, Extension::C]
                .into_iter()
                .collect(),
        )
    }
}

impl IsaConfig {
    /// Creates a configuration with FLEN and VLEN derived from the extension set.
    pub fn new(xlen: Xlen, extensions: Extensions) -> Self {
        let flen = if extensions.contains(Extension::Q) {
            128
        } else if extensions.contains(Extension::D) {
            64
        } else if extensions.contains(Extension::F) {
            32
        } else {
            0
        };
        let vlen = if extensions.contains(Extension::V) {
            DEFAULT_VLEN
        } else {
            0
        };
        Self {
            xlen,
            flen,
            vlen,
            extensions,
        }
    }

    /// Parses an ISA string such as `rv64imafdcv_zba_zbb_zicond_xandes`.
    ///
    /// `g` expands to `imafd` and `b` to `zba_zbb_zbs`. `zicsr` and `zifencei` are always
    /// implemented and accepted silently.
    pub fn parse(isa: &str) -> Result<Self, ConfigError> {
        let lower = isa.to_ascii_lowercase();
        let (xlen, rest) = if let Some(rest) = lower.strip_prefix("rv32") {
            (Xlen::Rv32, rest)
        } else if let Some(rest) = lower.strip_prefix("rv64") {
            (Xlen::Rv64, rest)
        } else if let Some(rest) = lower.strip_prefix("rv128") {
            (Xlen::Rv128, rest)
        } else {
            return Err(ConfigError::InvalidIsaPrefix(isa.to_owned()));
        };

        let mut parts = rest.split('_');
        let letters = parts.next().unwrap_or_default();
        let mut extensions = Extensions::default();
        let mut chars = letters.chars();
        match chars.next() {
            Some('i') => {}
            Some('g') => {
                for extension in [Extension::M, Extension::A, Extension::F, Extension::D] {
                    extensions.insert(extension);
                }
            }
            _ => return Err(ConfigError::InvalidIsaPrefix(isa.to_owned())),
        }
        for letter in chars {
            match letter {
                'i' => {}
                'g' => {
                    for extension in [Extension::M, Extension::A, Extension::F, Extension::D] {
                        extensions.insert(extension);
                    }
                }
                'b' => {
                    for extension in [Extension::Zba, Extension::Zbb, Extension::Zbs] {
                        extensions.insert(extension);
                    }
                }
                _ => match Extension::from_letter(letter) {
                    Some(extension) => extensions.insert(extension),
                    None => return Err(ConfigError::UnknownExtension(letter.to_string())),
                },
            }
        }
        for name in parts.filter(|name| !name.is_empty()) {
            match name {
                "zicsr" | "zifencei" => {}
                _ => match Extension::from_name(name) {
                    Some(extension) => extensions.insert(extension),
                    None => return Err(ConfigError::UnknownExtension(name.to_owned())),
                },
            }
        }

        let config = Self::new(xlen, extensions);
        config.validate()?;
        Ok(config)
    }

    /// Returns a copy with a different vector register width.
    pub fn with_vlen(self, vlen: u32) -> Result<Self, ConfigError> {
        let config = Self { vlen, ..self };
        config.validate()?;
        Ok(config)
    }

    pub fn has(&self, extension: Extension) -> bool {
        self.extensions.contains(extension)
    }

    /// Checks the dependencies between extensions and the register widths.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let requires = [
            (Extension::D, Extension::F),
            (Extension::Q, Extension::D),
            (Extension::Zfh, Extension::F),
            (Extension::Zfa, Extension::F),
        ];
        for (extension, dependency) in requires {
            if self.has(extension) && !self.has(dependency) {
                return Err(ConfigError::MissingDependency {
                    extension: extension.name(),
                    dependency: dependency.name(),
                });
            }
        }
        if self.has(Extension::V) {
            if self.vlen < 32 || !self.vlen.is_power_of_two() {
                return Err(ConfigError::InvalidVlen(self.vlen));
            }
        } else if self.vlen != 0 {
            return Err(ConfigError::InvalidVlen(self.vlen));
        }
        Ok(())
    }

    /// Reset value of the `misa` CSR, XLEN bits wide.
    pub fn misa(&self) -> u128 {
        const I: u32 = 8;
        const S: u32 = 18;
        const U: u32 = 20;
        let letters = self
            .extensions
            .iter()
            .filter_map(Extension::misa_bit)
            .chain([I, S, U])
            .fold(0u128, |misa, bit| misa | 1 << bit);
        self.xlen.mxl() << (self.xlen.bits() - 2) | letters
    }
}

impl FromStr for IsaConfig {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for IsaConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}i", self.xlen)?;
        for extension in self.extensions.iter().filter(|e| e.is_single_letter()) {
            f.write_str(extension.name())?;
        }
        for extension in self.extensions.iter().filter(|e| !e.is_single_letter()) {
            write!(f, "_{}", extension.name())?;
        }
        Ok(())
    }
}

/// Conditions that switch instruction-level tracing on and off.
#[derive(Debug, Clone, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct TraceConfig {
    /// Trace every instruction once this many instructions have executed.
    pub exe_trace_start: Option<u64>,
    /// Trace the regions delimited by the `xor x0, x0, x0` / `xor x0, x1, x1` marker
    /// instructions.
    pub macro_tracing: bool,
    /// Trace `(start, length)`: from the `start`-th executed instruction, `length` instructions.
    pub instruction_range: Option<(u64, u64)>,
    /// Stop the simulation when a traced region ends.
    pub exit_on_stop: bool,
}

impl TraceConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.macro_tracing && self.instruction_range.is_some() {
            return Err(ConfigError::ConflictingTraceTriggers);
        }
        Ok(())
    }
}

/// Default number of instructions a hart runs before the driver moves on to the next hart.
pub const DEFAULT_BATCH_SIZE: u64 = 10_000;

/// Complete description of the simulated machine.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct MachineConfig {
    pub isa: IsaConfig,
    pub hart_count: usize,
    /// Width of physical addresses; accesses beyond it raise access faults.
    pub physical_address_bits: u32,
    /// Address to which each hart's PC register is reset.
    pub reset_vector: u64,
    pub ram_base: u64,
    pub ram_size: u64,
    /// Base of the region reserved for an interrupt controller.
    pub plic_base: u64,
    /// Base of the region reserved for a core-local interruptor.
    pub clint_base: u64,
    /// Treat an SBI shutdown `ecall` from M-mode as the end of the simulation.
    pub terminate_on_shutdown: bool,
    /// If `true`, misaligned loads and stores are performed byte by byte.
    /// If `false`, they raise address-misaligned exceptions.
    pub misaligned_access: bool,
    /// Stop successfully after this many instructions.
    pub max_instructions: Option<u64>,
    /// Emit a heartbeat log line every this many instructions.
    pub heartbeat: Option<u64>,
    pub batch_size: u64,
    pub trace: TraceConfig,
}

pub const PLIC_SIZE: u64 = 0x0400_0000;
pub const CLINT_SIZE: u64 = 0x000C_0000;

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            isa: IsaConfig::default(),
            hart_count: 1,
            physical_address_bits: 56,
            reset_vector: 0x8000_0000,
            ram_base: 0x8000_0000,
            ram_size: 256 << 20,
            plic_base: 0x0C00_0000,
            clint_base: 0x0200_0000,
            terminate_on_shutdown: true,
            misaligned_access: true,
            max_instructions: None,
            heartbeat: None,
            batch_size: DEFAULT_BATCH_SIZE,
            trace: TraceConfig::default(),
        }
    }
}

impl MachineConfig {
    pub fn ram_range(&self) -> Result<AddressRange, ConfigError> {
        if self.ram_size == 0 {
            return Err(ConfigError::EmptyRam);
        }
        AddressRange::with_size(self.ram_base, self.ram_size)
            .map_err(|_| ConfigError::RamOutOfRange(self.ram_base, self.ram_size))
    }

    pub fn plic_range(&self) -> Option<AddressRange> {
        AddressRange::with_size(self.plic_base, PLIC_SIZE).ok()
    }

    pub fn clint_range(&self) -> Option<AddressRange> {
        AddressRange::with_size(self.clint_base, CLINT_SIZE).ok()
    }

    /// Checks the whole configuration; nothing should be constructed from an invalid one.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.isa.validate()?;
        self.trace.validate()?;
        if self.hart_count == 0 {
            return Err(ConfigError::InvalidHartCount(self.hart_count));
        }
        if !(32..=64).contains(&self.physical_address_bits) {
            return Err(ConfigError::InvalidPhysicalAddressBits(
                self.physical_address_bits,
            ));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::InvalidBatchSize);
        }
        let ram = self.ram_range()?;
        if self.physical_address_bits < 64 && ram.end() >> self.physical_address_bits != 0 {
            return Err(ConfigError::RamOutOfRange(self.ram_base, self.ram_size));
        }
        for reserved in [self.plic_range(), self.clint_range()].into_iter().flatten() {
            if reserved.overlaps(ram) {
                return Err(ConfigError::RamOverlapsDevice(reserved));
            }
        }
        Ok(())
    }
}

#[derive(Error, Debug, Clone, Eq, PartialEq)]
pub enum ConfigError {
    #[error("ISA string {0:?} must start with rv32i, rv64i, rv128i or the g variants")]
    InvalidIsaPrefix(String),
    #[error("unknown ISA extension {0:?}")]
    UnknownExtension(String),
    #[error("extension {extension} requires extension {dependency}")]
    MissingDependency {
        extension: &'static str,
        dependency: &'static str,
    },
    #[error("VLEN {0} is not a power of two of at least 32, or v is not enabled")]
    InvalidVlen(u32),
    #[error("invalid hart count {0}")]
    InvalidHartCount(usize),
    #[error("physical address width of {0} bits is not supported")]
    InvalidPhysicalAddressBits(u32),
    #[error("RAM of size {1:#x} at {0:#x} does not fit in the physical address space")]
    RamOutOfRange(u64, u64),
    #[error("RAM size must be non-zero")]
    EmptyRam,
    #[error("RAM overlaps the device region {0}")]
    RamOverlapsDevice(AddressRange),
    #[error("macro tracing and instruction-range tracing cannot be enabled together")]
    ConflictingTraceTriggers,
    #[error("batch size must be non-zero")]
    InvalidBatchSize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_isa() {
        let isa = IsaConfig::parse("rv64imafdcv_zba_zbb_zbc_zbs_zfh_zfa_zicond_xandes").unwrap();
        assert_eq!(Xlen::Rv64, isa.xlen);
        assert_eq!(64, isa.flen);
        assert_eq!(DEFAULT_VLEN, isa.vlen);
        for extension in Extension::ALL {
            if extension != Extension::Q {
                assert!(isa.has(extension), "{extension:?} missing");
            }
        }
        assert!(!isa.has(Extension::Q));
    }

    #[test]
    fn test_parse_g() {
        let isa = IsaConfig::parse("RV32GC").unwrap();
        assert_eq!(Xlen::Rv32, isa.xlen);
        assert_eq!(IsaConfig::new(Xlen::Rv32, isa.extensions), isa);
        assert_eq!("rv32iacdfm", isa.to_string());
        assert_eq!(0, isa.vlen);
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(
            Err(ConfigError::InvalidIsaPrefix("rv16i".to_owned())),
            IsaConfig::parse("rv16i")
        );
        assert_eq!(
            Err(ConfigError::UnknownExtension("zzz".to_owned())),
            IsaConfig::parse("rv64i_zzz")
        );
        assert_eq!(
            Err(ConfigError::UnknownExtension("p".to_owned())),
            IsaConfig::parse("rv64ip")
        );
        assert_eq!(
            Err(ConfigError::MissingDependency {
                extension: "d",
                dependency: "f"
            }),
            IsaConfig::parse("rv64id")
        );
        assert!(IsaConfig::parse("rv64i_zicsr_zifencei").is_ok());
    }

    #[test]
    fn test_vlen() {
        let isa = IsaConfig::parse("rv64iv").unwrap();
        assert_eq!(256, isa.with_vlen(256).unwrap().vlen);
        assert_eq!(Err(ConfigError::InvalidVlen(96)), isa.with_vlen(96));
        assert_eq!(Err(ConfigError::InvalidVlen(16)), isa.with_vlen(16));
        let scalar = IsaConfig::parse("rv64i").unwrap();
        assert_eq!(Err(ConfigError::InvalidVlen(128)), scalar.with_vlen(128));
    }

    #[test]
    fn test_misa() {
        let isa = IsaConfig::parse("rv32imac").unwrap();
        let expected = 1 << 30 | 1 << 0 | 1 << 2 | 1 << 8 | 1 << 12 | 1 << 18 | 1 << 20;
        assert_eq!(expected, isa.misa());
        let isa = IsaConfig::parse("rv64i").unwrap();
        assert_eq!(2 << 62 | 1 << 8 | 1 << 18 | 1 << 20, isa.misa());
    }

    #[test]
    fn test_xlen_sext() {
        assert_eq!(u128::MAX << 31, Xlen::Rv32.sext(0x8000_0000));
        assert_eq!(u128::MAX, Xlen::Rv32.sext(0xFFFF_FFFF));
        assert_eq!(0x7FFF_FFFF, Xlen::Rv32.sext(0x1_7FFF_FFFF));
        assert_eq!(0xFFFF_FFFF, Xlen::Rv32.zext(u128::MAX));
        assert!(Xlen::Rv64.is_negative(1 << 63));
        assert!(!Xlen::Rv128.is_negative(1 << 63));
    }

    #[test]
    fn test_trace_triggers_conflict() {
        let trace = TraceConfig {
            macro_tracing: true,
            instruction_range: Some((10, 5)),
            ..Default::default()
        };
        assert_eq!(Err(ConfigError::ConflictingTraceTriggers), trace.validate());
    }

    #[test]
    fn test_machine_config_validate() {
        assert_eq!(Ok(()), MachineConfig::default().validate());
        let config = MachineConfig {
            hart_count: 0,
            ..Default::default()
        };
        assert_eq!(Err(ConfigError::InvalidHartCount(0)), config.validate());
        let config = MachineConfig {
            ram_base: 0x0C00_0000,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::RamOverlapsDevice(_))
        ));
        let config = MachineConfig {
            ram_size: 0,
            ..Default::default()
        };
        assert_eq!(Err(ConfigError::EmptyRam), config.validate());
    }
}
