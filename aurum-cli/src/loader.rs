//! Loading program images into the machine's RAM.

use aurum_core::memory::MemoryError;
use aurum_core::Machine;
use goblin::elf::header::EM_RISCV;
use goblin::elf::program_header::PT_LOAD;
use goblin::elf::Elf;
use log::debug;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("could not parse ELF file: {0}")]
    Elf(#[from] goblin::error::Error),
    #[error("ELF file is for machine {0}, not RISC-V")]
    NotRiscV(u16),
    #[error("segment at {0:#x} lies outside the file")]
    Truncated(u64),
    #[error("could not load {size:#x} bytes at {address:#x}: {source}")]
    Memory {
        address: u64,
        size: usize,
        #[source]
        source: MemoryError,
    },
}

/// A contiguous chunk of the program, at its physical address.
#[derive(Debug, Clone, Eq, PartialEq)]
struct Segment {
    address: u64,
    data: Vec<u8>,
}

/// A program ready to be copied into RAM.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Image {
    /// Address of the first instruction.
    pub entry: u64,
    segments: Vec<Segment>,
}

impl Image {
    /// Parses an ELF executable. Every `PT_LOAD` segment is placed at its physical address;
    /// the zero-filled tail of a segment is left to the zeroed RAM.
    pub fn from_elf(bytes: &[u8]) -> Result<Self, LoadError> {
        let elf = Elf::parse(bytes)?;
        if elf.header.e_machine != EM_RISCV {
            return Err(LoadError::NotRiscV(elf.header.e_machine));
        }
        let segments = elf
            .program_headers
            .iter()
            .filter(|header| header.p_type == PT_LOAD && header.p_filesz > 0)
            .map(|header| {
                let data = bytes
                    .get(header.file_range())
                    .ok_or(LoadError::Truncated(header.p_paddr))?;
                Ok(Segment {
                    address: header.p_paddr,
                    data: data.to_vec(),
                })
            })
            .collect::<Result<_, LoadError>>()?;
        Ok(Self {
            entry: elf.entry,
            segments,
        })
    }

    /// A flat binary placed at `address`, which is also where execution starts.
    pub fn raw(bytes: &[u8], address: u64) -> Self {
        Self {
            entry: address,
            segments: vec![Segment {
                address,
                data: bytes.to_vec(),
            }],
        }
    }

    pub fn load_into(&self, machine: &mut Machine) -> Result<(), LoadError> {
        for segment in &self.segments {
            debug!(
                "Loading segment [{:#010x}..{:#010x}]",
                segment.address,
                segment.address + segment.data.len() as u64
            );
            machine
                .load(segment.address, &segment.data)
                .map_err(|source| LoadError::Memory {
                    address: segment.address,
                    size: segment.data.len(),
                    source,
                })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aurum_core::MachineConfig;

    #[test]
    fn test_raw_image() {
        let mut machine = Machine::new(MachineConfig {
            ram_size: 0x1_0000,
            ..Default::default()
        })
        .unwrap();
        let image = Image::raw(&[0x93, 0x02, 0x50, 0x00], 0x8000_0000);
        assert_eq!(0x8000_0000, image.entry);
        image.load_into(&mut machine).unwrap();
        assert_eq!(
            Ok(0x0050_0293),
            machine.memory_mut().read_u32(0x8000_0000)
        );
    }

    #[test]
    fn test_image_outside_ram() {
        let mut machine = Machine::new(MachineConfig {
            ram_size: 0x1_0000,
            ..Default::default()
        })
        .unwrap();
        let image = Image::raw(&[0; 4], 0x1000);
        assert!(matches!(
            image.load_into(&mut machine),
            Err(LoadError::Memory {
                address: 0x1000,
                ..
            })
        ));
    }

    #[test]
    fn test_not_an_elf() {
        assert!(matches!(
            Image::from_elf(b"definitely not an ELF file, just some text"),
            Err(LoadError::Elf(_))
        ));
    }
}
