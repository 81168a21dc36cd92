//! Provides the simulated machine: a set of harts sharing one physical memory.

use crate::config::{ConfigError, MachineConfig};
use crate::hart::Hart;
use crate::memory::{Device, MemoryError, PhysicalMemory};
use crate::AddressRange;
use log::debug;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MachineError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("could not set up physical memory: {0}")]
    Memory(#[from] MemoryError),
}

/// RISC-V hardware platform: one or more harts and the physical memory they share.
///
/// > A RISC-V hardware platform can contain one or more RISC-V-compatible processing cores together
/// > with other non-RISC-V-compatible cores, fixed-function accelerators, various physical memory
/// > structures, I/O devices, and an interconnect structure to allow the components to communicate.
///
/// Harts are run one at a time. After each hart's turn, the physical pages it wrote are dropped
/// from the TLBs of all other harts, so no hart keeps using a stale cached translation.
#[derive(Debug)]
pub struct Machine {
    config: MachineConfig,
    harts: Vec<Hart>,
    memory: PhysicalMemory,
}

impl Machine {
    /// Validates `config` and builds a machine in its reset state, with zero-filled RAM.
    pub fn new(config: MachineConfig) -> Result<Self, MachineError> {
        config.validate()?;
        let mut memory = PhysicalMemory::new(config.physical_address_bits);
        memory.add_ram(config.ram_range()?)?;
        let harts = (0..config.hart_count as u64)
            .map(|id| {
                Hart::new(
                    id,
                    &config.isa,
                    config.reset_vector,
                    config.misaligned_access,
                    config.terminate_on_shutdown,
                )
            })
            .collect();
        debug!(
            "Created machine with {} {} harts",
            config.hart_count, config.isa
        );
        Ok(Self {
            config,
            harts,
            memory,
        })
    }

    pub fn config(&self) -> &MachineConfig {
        &self.config
    }

    pub fn harts(&self) -> &[Hart] {
        &self.harts
    }

    pub fn hart(&self, index: usize) -> Option<&Hart> {
        self.harts.get(index)
    }

    pub fn hart_mut(&mut self, index: usize) -> Option<&mut Hart> {
        self.harts.get_mut(index)
    }

    /// Replaces a hart, e.g. with one restored from a snapshot.
    ///
    /// Returns the hart that was replaced, or gives `hart` back if `index` is out of range.
    pub fn replace_hart(&mut self, index: usize, mut hart: Hart) -> Result<Hart, Hart> {
        match self.harts.get_mut(index) {
            Some(slot) => {
                hart.flush_tlbs();
                Ok(std::mem::replace(slot, hart))
            }
            None => Err(hart),
        }
    }

    pub fn memory(&self) -> &PhysicalMemory {
        &self.memory
    }

    /// Direct access to physical memory. Writes made through this are not seen by the harts'
    /// TLBs; use [`write_physical`](Self::write_physical) to modify memory behind their back.
    pub fn memory_mut(&mut self) -> &mut PhysicalMemory {
        &mut self.memory
    }

    /// Copies a program image into RAM, without counting as a store.
    pub fn load(&mut self, address: u64, data: &[u8]) -> Result<(), MemoryError> {
        debug!("Loading {} bytes at {address:#x}", data.len());
        self.memory.load(address, data)
    }

    pub fn attach_device(
        &mut self,
        range: AddressRange,
        device: Box<dyn Device>,
    ) -> Result<(), MemoryError> {
        self.memory.attach_device(range, device)
    }

    /// Writes physical memory on behalf of an agent other than a hart.
    pub fn write_physical(&mut self, address: u64, data: &[u8]) -> Result<(), MemoryError> {
        let result = self.memory.write(address, data);
        self.flush_written_pages(None);
        result
    }

    /// Runs hart `index` for at most `budget` instructions; see [`Hart::execute`].
    ///
    /// Returns the number of retired instructions, `0` if there is no such hart.
    pub fn execute_hart(&mut self, index: usize, budget: u64) -> u64 {
        let Some(hart) = self.harts.get_mut(index) else {
            return 0;
        };
        let retired = hart.execute(&mut self.memory, budget);
        self.flush_written_pages(Some(index));
        retired
    }

    /// Returns `true` if any hart is neither terminated nor waiting for an interrupt.
    pub fn any_running(&self) -> bool {
        self.harts
            .iter()
            .any(|hart| hart.terminated().is_none() && !hart.is_powered_down())
    }

    /// The first exit code requested by a hart through an SBI shutdown.
    pub fn exit_code(&self) -> Option<i64> {
        self.harts.iter().find_map(Hart::terminated)
    }

    /// Drains the memory's write log and flushes the written pages from the TLBs of every hart
    /// except `writer`.
    fn flush_written_pages(&mut self, writer: Option<usize>) {
        let pages = self.memory.take_written_pages();
        if pages.is_empty() || self.harts.len() == 1 && writer.is_some() {
            return;
        }
        for (index, hart) in self.harts.iter_mut().enumerate() {
            if Some(index) == writer {
                continue;
            }
            for &ppn in &pages {
                hart.flush_physical_page(ppn);
            }
        }
        debug!("Flushed {} written pages from remote TLBs", pages.len());
    }
}
