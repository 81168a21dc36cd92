//! Physical memory shared by all harts.
//!
//! The physical address space is an [`AddressMap`] of RAM regions and memory-mapped [`Device`]s.
//! Vacant addresses raise access faults. All values are serialized in little-endian byte order.

use crate::address_map::{AddressMap, AddressMapError};
use crate::unit::PAGE;
use crate::AddressRange;
use log::debug;
use std::fmt::Debug;
use thiserror::Error;

/// A memory-mapped device, addressed relative to the start of its region.
///
/// Devices are only ever invoked from loads and stores that hit their region, so any side effect
/// of a read (e.g. popping a FIFO) happens exactly once per architectural access.
pub trait Device: Debug {
    /// Reads `buf.len()` bytes starting at `offset`.
    fn read(&mut self, offset: u64, buf: &mut [u8]) -> Result<(), MemoryError>;

    /// Writes `buf` starting at `offset`.
    fn write(&mut self, offset: u64, buf: &[u8]) -> Result<(), MemoryError>;
}

#[derive(Debug)]
enum Region {
    Ram(Vec<u8>),
    Device(Box<dyn Device>),
}

macro_rules! access_fns {
    ( $( $read_fn:ident, $write_fn:ident => $u:ident ),* $(,)? ) => {
        $(
            /// Reads a little-endian value at a physical address.
            pub fn $read_fn(&mut self, address: u64) -> Result<$u, MemoryError> {
                let mut buf = [0u8; std::mem::size_of::<$u>()];
                self.read(address, &mut buf)?;
                Ok($u::from_le_bytes(buf))
            }

            /// Writes a little-endian value at a physical address.
            pub fn $write_fn(&mut self, address: u64, value: $u) -> Result<(), MemoryError> {
                self.write(address, &value.to_le_bytes())
            }
        )*
    };
}

#[derive(Debug)]
pub struct PhysicalMemory {
    regions: AddressMap<Region>,
    address_bits: u32,
    store_sequence: u64,
    written_pages: Vec<u64>,
    io_access: bool,
}

impl PhysicalMemory {
    /// Creates a physical address space of `address_bits` bits without any regions.
    pub fn new(address_bits: u32) -> Self {
        Self {
            regions: AddressMap::new(),
            address_bits,
            store_sequence: 0,
            written_pages: Vec::new(),
            io_access: false,
        }
    }

    /// Maps zero-initialized RAM at `range`.
    pub fn add_ram(&mut self, range: AddressRange) -> Result<(), MemoryError> {
        let size = range.size().ok_or(MemoryError::AccessFault(range.end()))?;
        debug!("Adding RAM at {range}");
        self.regions.insert(range, Region::Ram(vec![0; size]))?;
        Ok(())
    }

    /// Maps `device` at `range`.
    pub fn attach_device(
        &mut self,
        range: AddressRange,
        device: Box<dyn Device>,
    ) -> Result<(), MemoryError> {
        debug!("Attaching device at {range}");
        self.regions.insert(range, Region::Device(device))?;
        Ok(())
    }

    /// Returns `true` if all `size` bytes at `address` are RAM.
    pub fn is_ram(&self, address: u64, size: u64) -> bool {
        matches!(
            self.regions.range_value(address),
            (range, Some(Region::Ram(_))) if range.contains_span(address, size)
        )
    }

    /// Returns `true` if RAM or a single device backs every byte of the access.
    pub fn is_mapped(&self, address: u64, size: u64) -> bool {
        self.in_space(address, size)
            && matches!(
                self.regions.range_value(address),
                (range, Some(_)) if range.contains_span(address, size)
            )
    }

    /// Reads `buf.len()` bytes at `address`, performing device side effects.
    pub fn read(&mut self, address: u64, buf: &mut [u8]) -> Result<(), MemoryError> {
        let (range, region) = self.region_mut(address, buf.len() as u64)?;
        let offset = address - range.start();
        match region {
            Region::Ram(bytes) => {
                let offset = offset as usize;
                buf.copy_from_slice(&bytes[offset..offset + buf.len()]);
            }
            Region::Device(device) => {
                device.read(offset, buf)?;
                self.io_access = true;
            }
        }
        Ok(())
    }

    /// Writes `buf` at `address`.
    ///
    /// Every successful store bumps the store sequence number and records the written pages.
    pub fn write(&mut self, address: u64, buf: &[u8]) -> Result<(), MemoryError> {
        let (range, region) = self.region_mut(address, buf.len() as u64)?;
        let offset = address - range.start();
        match region {
            Region::Ram(bytes) => {
                let offset = offset as usize;
                bytes[offset..offset + buf.len()].copy_from_slice(buf);
            }
            Region::Device(device) => {
                device.write(offset, buf)?;
                self.io_access = true;
            }
        }
        self.store_sequence = self.store_sequence.wrapping_add(1);
        let last = address + buf.len().saturating_sub(1) as u64;
        for page in address / PAGE..=last / PAGE {
            if self.written_pages.last() != Some(&page) {
                self.written_pages.push(page);
            }
        }
        Ok(())
    }

    /// Side-effect free read of RAM; devices are never touched.
    pub fn peek(&self, address: u64, buf: &mut [u8]) -> Result<(), MemoryError> {
        match self.regions.range_value(address) {
            (range, Some(Region::Ram(bytes)))
                if range.contains_span(address, buf.len() as u64) =>
            {
                let offset = (address - range.start()) as usize;
                buf.copy_from_slice(&bytes[offset..offset + buf.len()]);
                Ok(())
            }
            _ => Err(MemoryError::AccessFault(address)),
        }
    }

    /// Copies a program image into RAM.
    ///
    /// Unlike [`write`](Self::write) this is not an architectural store: the store sequence and
    /// write log are left alone.
    pub fn load(&mut self, address: u64, data: &[u8]) -> Result<(), MemoryError> {
        match self.regions.range_value_mut(address) {
            Some((range, Region::Ram(bytes)))
                if range.contains_span(address, data.len() as u64) =>
            {
                let offset = (address - range.start()) as usize;
                bytes[offset..offset + data.len()].copy_from_slice(data);
                Ok(())
            }
            _ => Err(MemoryError::AccessFault(address)),
        }
    }

    /// Number of stores performed so far; used to validate load reservations.
    pub fn store_sequence(&self) -> u64 {
        self.store_sequence
    }

    /// Returns the physical page numbers written since the last call.
    pub fn take_written_pages(&mut self) -> Vec<u64> {
        std::mem::take(&mut self.written_pages)
    }

    /// Returns whether a device was accessed since the last call.
    pub fn take_io_access(&mut self) -> bool {
        std::mem::replace(&mut self.io_access, false)
    }

    /// Iterates over the RAM regions and their contents.
    pub fn ram_regions(&self) -> impl Iterator<Item = (AddressRange, &[u8])> {
        self.regions.iter().filter_map(|(range, region)| match region {
            Region::Ram(bytes) => Some((range, bytes.as_slice())),
            Region::Device(_) => None,
        })
    }

    access_fns! {
        read_u8, write_u8 => u8,
        read_u16, write_u16 => u16,
        read_u32, write_u32 => u32,
        read_u64, write_u64 => u64,
        read_u128, write_u128 => u128,
    }

    fn in_space(&self, address: u64, size: u64) -> bool {
        self.address_bits >= 64
            || address.checked_add(size.saturating_sub(1)).map(|last| last >> self.address_bits)
                == Some(0)
    }

    fn region_mut(
        &mut self,
        address: u64,
        size: u64,
    ) -> Result<(AddressRange, &mut Region), MemoryError> {
        if !self.in_space(address, size) {
            return Err(MemoryError::AccessFault(address));
        }
        match self.regions.range_value_mut(address) {
            Some((range, region)) if range.contains_span(address, size) => Ok((range, region)),
            _ => Err(MemoryError::AccessFault(address)),
        }
    }
}

#[derive(Error, Debug, Clone, Eq, PartialEq)]
pub enum MemoryError {
    /// No RAM or device backs (part of) the accessed bytes.
    #[error("no memory or device at physical address {0:#x}")]
    AccessFault(u64),
    /// A device rejected the size or offset of an access.
    #[error("access at device offset {0:#x} is not supported")]
    UnsupportedAccess(u64),
    #[error(transparent)]
    Map(#[from] AddressMapError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address_range;
    use proptest::prelude::*;

    const RAM_BASE: u64 = 0x8000_0000;

    fn memory() -> PhysicalMemory {
        let mut memory = PhysicalMemory::new(56);
        memory
            .add_ram(AddressRange::with_size(RAM_BASE, 0x4000).unwrap())
            .unwrap();
        memory
    }

    #[derive(Debug, Default)]
    struct Counter {
        reads: u64,
    }

    impl Device for Counter {
        fn read(&mut self, offset: u64, buf: &mut [u8]) -> Result<(), MemoryError> {
            if offset != 0 || buf.len() != 4 {
                return Err(MemoryError::UnsupportedAccess(offset));
            }
            self.reads += 1;
            buf.copy_from_slice(&(self.reads as u32).to_le_bytes());
            Ok(())
        }

        fn write(&mut self, offset: u64, _buf: &[u8]) -> Result<(), MemoryError> {
            Err(MemoryError::UnsupportedAccess(offset))
        }
    }

    #[test]
    fn test_vacant_access_faults() {
        let mut memory = memory();
        assert_eq!(Err(MemoryError::AccessFault(0x1000)), memory.read_u32(0x1000));
        // Straddling the end of RAM
        assert_eq!(
            Err(MemoryError::AccessFault(RAM_BASE + 0x3FFE)),
            memory.write_u32(RAM_BASE + 0x3FFE, 0)
        );
        assert_eq!(
            Err(MemoryError::AccessFault(1 << 56)),
            memory.read_u8(1 << 56)
        );
        assert!(memory.is_mapped(RAM_BASE + 0x3FFC, 4));
        assert!(!memory.is_mapped(RAM_BASE + 0x3FFE, 4));
        assert!(!memory.is_mapped(1 << 56, 1));
    }

    #[test]
    fn test_store_sequence_and_write_log() {
        let mut memory = memory();
        assert_eq!(0, memory.store_sequence());
        memory.write_u64(RAM_BASE + 0xFFC, 0x1122_3344_5566_7788).unwrap();
        memory.write_u8(RAM_BASE + 0x1001, 0).unwrap();
        assert_eq!(2, memory.store_sequence());
        assert_eq!(
            vec![RAM_BASE / PAGE, RAM_BASE / PAGE + 1],
            memory.take_written_pages()
        );
        assert!(memory.take_written_pages().is_empty());
        memory.load(RAM_BASE, &[1, 2, 3]).unwrap();
        assert_eq!(2, memory.store_sequence());
        assert_eq!(0x0003_0201, memory.read_u32(RAM_BASE).unwrap());
    }

    #[test]
    fn test_device_access() {
        let mut memory = memory();
        memory
            .attach_device(address_range![0x1000_0000, 0x1000_00FF], Box::<Counter>::default())
            .unwrap();
        assert!(!memory.take_io_access());
        assert_eq!(1, memory.read_u32(0x1000_0000).unwrap());
        assert_eq!(2, memory.read_u32(0x1000_0000).unwrap());
        assert!(memory.take_io_access());
        assert!(!memory.take_io_access());
        assert_eq!(
            Err(MemoryError::UnsupportedAccess(4)),
            memory.read_u32(0x1000_0004)
        );
        let mut buf = [0u8; 4];
        assert!(memory.peek(0x1000_0000, &mut buf).is_err());
        assert!(!memory.is_ram(0x1000_0000, 4));
        assert!(memory.is_ram(RAM_BASE, 4));
    }

    #[test]
    fn test_overlapping_regions_rejected() {
        let mut memory = memory();
        assert!(matches!(
            memory.add_ram(address_range![RAM_BASE + 0x3000, RAM_BASE + 0x4FFF]),
            Err(MemoryError::Map(_))
        ));
    }

    proptest! {
        #[test]
        fn test_narrow_store_round_trip(offset in 0u64..0x3FF0, value: u64) {
            let mut memory = memory();
            let address = RAM_BASE + offset;
            memory.write_u8(address, value as u8).unwrap();
            prop_assert_eq!(value as u8, memory.read_u8(address).unwrap());
            memory.write_u16(address, value as u16).unwrap();
            prop_assert_eq!(value as u16, memory.read_u16(address).unwrap());
            memory.write_u32(address, value as u32).unwrap();
            prop_assert_eq!(value as u32, memory.read_u32(address).unwrap());
            memory.write_u64(address, value).unwrap();
            prop_assert_eq!(value, memory.read_u64(address).unwrap());
        }
    }
}
