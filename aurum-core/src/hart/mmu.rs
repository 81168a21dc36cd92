//! Virtual memory: address translation, TLBs, and virtually-addressed loads, stores and fetches.

use serde::{Deserialize, Serialize};

use super::{CsrReadResult, CsrWriteResult, Exception, Fault, Hart};
use crate::compressed;
use crate::config::{Extension, Xlen};
use crate::memory::PhysicalMemory;
use crate::unit::PAGE;
use crate::{Alignment, PrivilegeLevel};

/// Number of entries in each of the direct-mapped TLBs.
const TLB_SIZE: usize = 256;

macro_rules! access_fns {
    ( $( $read_fn:ident, $write_fn:ident => $u:ident ),* $(,)? ) => {
        $(
            /// Loads a little-endian value from a virtual address.
            pub fn $read_fn(&mut self, address: u64) -> Result<$u, Fault> {
                let mut buf = [0u8; std::mem::size_of::<$u>()];
                self.read(address, &mut buf, AccessKind::Load)?;
                Ok($u::from_le_bytes(buf))
            }

            /// Stores a little-endian value to a virtual address.
            pub fn $write_fn(&mut self, address: u64, value: $u) -> Result<(), Fault> {
                self.write(address, &value.to_le_bytes())
            }
        )*
    };
}

/// The kind of memory access being translated, which decides the permission checked and the
/// exception raised on failure.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum AccessKind {
    Fetch,
    Load,
    Store,
}

impl AccessKind {
    fn misaligned(self) -> Exception {
        match self {
            Self::Fetch => Exception::InstructionAddressMisaligned,
            Self::Load => Exception::LoadAddressMisaligned,
            Self::Store => Exception::StoreOrAmoAddressMisaligned,
        }
    }

    fn access_fault(self) -> Exception {
        match self {
            Self::Fetch => Exception::InstructionAccessFault,
            Self::Load => Exception::LoadAccessFault,
            Self::Store => Exception::StoreOrAmoAccessFault,
        }
    }

    fn page_fault(self) -> Exception {
        match self {
            Self::Fetch => Exception::InstructionPageFault,
            Self::Load => Exception::LoadPageFault,
            Self::Store => Exception::StoreOrAmoPageFault,
        }
    }
}

/// Address translation scheme selected by the MODE field of satp.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum TranslationMode {
    Bare,
    Sv32,
    Sv39,
    Sv48,
}

impl TranslationMode {
    fn from_satp(xlen: Xlen, satp: u64) -> Option<Self> {
        match xlen {
            Xlen::Rv32 => match satp >> 31 {
                0 => Some(Self::Bare),
                _ => Some(Self::Sv32),
            },
            Xlen::Rv64 => match satp >> 60 {
                0 => Some(Self::Bare),
                8 => Some(Self::Sv39),
                9 => Some(Self::Sv48),
                _ => None,
            },
            Xlen::Rv128 => match satp >> 60 {
                0 => Some(Self::Bare),
                _ => None,
            },
        }
    }

    /// Returns (levels, PTE size in bytes, VPN bits per level).
    fn geometry(self) -> (u32, u64, u32) {
        match self {
            Self::Bare => (0, 0, 0),
            Self::Sv32 => (2, 4, 10),
            Self::Sv39 => (3, 8, 9),
            Self::Sv48 => (4, 8, 9),
        }
    }
}

/// Page table entry bits.
mod pte {
    pub const V: u64 = 1 << 0;
    pub const R: u64 = 1 << 1;
    pub const W: u64 = 1 << 2;
    pub const X: u64 = 1 << 3;
    pub const U: u64 = 1 << 4;
    pub const A: u64 = 1 << 6;
    pub const D: u64 = 1 << 7;
    pub const PPN_SHIFT: u32 = 10;
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
struct TlbEntry {
    vpn: u64,
    ppn: u64,
}

/// A direct-mapped translation cache for one kind of access.
#[derive(Debug, Clone)]
struct Tlb {
    entries: Vec<Option<TlbEntry>>,
}

impl Default for Tlb {
    fn default() -> Self {
        Self {
            entries: vec![None; TLB_SIZE],
        }
    }
}

impl Tlb {
    fn lookup(&self, vpn: u64) -> Option<u64> {
        match self.entries[vpn as usize % TLB_SIZE] {
            Some(entry) if entry.vpn == vpn => Some(entry.ppn),
            _ => None,
        }
    }

    fn insert(&mut self, vpn: u64, ppn: u64) {
        self.entries[vpn as usize % TLB_SIZE] = Some(TlbEntry { vpn, ppn });
    }

    fn flush(&mut self) {
        self.entries.fill(None);
    }

    fn flush_physical_page(&mut self, ppn: u64) {
        for entry in self.entries.iter_mut() {
            if entry.is_some_and(|entry| entry.ppn == ppn) {
                *entry = None;
            }
        }
    }
}

/// Separate TLBs for fetches, loads, and stores.
///
/// An entry is only inserted once every check for its kind of access has passed, including
/// setting the A and D bits, so a hit needs no further checks. Anything that changes the outcome
/// of those checks (satp, mstatus, the privilege level) flushes all of them.
#[derive(Debug, Clone, Default)]
pub struct Tlbs {
    fetch: Tlb,
    load: Tlb,
    store: Tlb,
}

impl Tlbs {
    fn get_mut(&mut self, kind: AccessKind) -> &mut Tlb {
        match kind {
            AccessKind::Fetch => &mut self.fetch,
            AccessKind::Load => &mut self.load,
            AccessKind::Store => &mut self.store,
        }
    }

    pub fn flush(&mut self) {
        self.fetch.flush();
        self.load.flush();
        self.store.flush();
    }

    /// Drops every translation to the physical page `ppn`.
    pub fn flush_physical_page(&mut self, ppn: u64) {
        self.fetch.flush_physical_page(ppn);
        self.load.flush_physical_page(ppn);
        self.store.flush_physical_page(ppn);
    }
}

/// The satp register, kept in its RV64 layout.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Satp(u64);

impl Hart {
    pub fn flush_tlbs(&mut self) {
        self.tlbs.flush();
    }

    /// Invalidates cached translations that point into a physical page written by another hart.
    pub fn flush_physical_page(&mut self, ppn: u64) {
        self.tlbs.flush_physical_page(ppn);
    }

    pub fn translation_mode(&self) -> TranslationMode {
        TranslationMode::from_satp(self.isa.xlen, self.satp.0).unwrap_or(TranslationMode::Bare)
    }

    /// Address space identifier currently in satp.
    pub fn satp_asid(&self) -> u64 {
        match self.isa.xlen {
            Xlen::Rv32 => (self.satp.0 >> 22) & 0x1FF,
            Xlen::Rv64 | Xlen::Rv128 => (self.satp.0 >> 44) & 0xFFFF,
        }
    }

    fn satp_ppn(&self) -> u64 {
        match self.isa.xlen {
            Xlen::Rv32 => self.satp.0 & 0x3F_FFFF,
            Xlen::Rv64 | Xlen::Rv128 => self.satp.0 & ((1 << 44) - 1),
        }
    }

    pub fn read_satp(&self) -> CsrReadResult {
        Ok(self.satp.0 as u128)
    }

    /// The satp register is **WARL**: writes selecting an unsupported MODE are ignored.
    pub fn write_satp(&mut self, value: u128, mask: u128) -> CsrWriteResult {
        let mask = self.isa.xlen.zext(mask) as u64;
        let updated = self.satp.0 & !mask | value as u64 & mask;
        if TranslationMode::from_satp(self.isa.xlen, updated).is_some() {
            self.satp = Satp(updated);
        }
        Ok(())
    }
}

/// Access wrapper around the physical memory to address it from this hart's point of view.
///
/// This takes into account the hart's current privilege level, its address translation mode,
/// and whether misaligned memory accesses are supported.
#[derive(Debug)]
pub struct Mmu<'a> {
    pub(super) hart: &'a mut Hart,
    pub(super) memory: &'a mut PhysicalMemory,
}

impl<'a> Mmu<'a> {
    pub fn new(hart: &'a mut Hart, memory: &'a mut PhysicalMemory) -> Self {
        Self { hart, memory }
    }

    access_fns! {
        read_u8, write_u8 => u8,
        read_u16, write_u16 => u16,
        read_u32, write_u32 => u32,
        read_u64, write_u64 => u64,
        read_u128, write_u128 => u128,
    }

    /// Fetches the instruction at `pc`, returning its raw bits and length in bytes.
    ///
    /// > Instructions are stored in memory as a sequence of 16-bit little-endian parcels,
    /// > regardless of memory system endianness. Parcels forming one instruction are stored at
    /// > increasing halfword addresses, with the lowest-addressed parcel holding the
    /// > lowest-numbered bits in the instruction specification.
    ///
    /// A compressed instruction is returned in the low 16 bits. The second parcel of a 32-bit
    /// instruction is only fetched when the first one says it is needed, so a fault on it
    /// reports the address of that second parcel.
    pub fn fetch(&mut self, pc: u64) -> Result<(u32, u64), Fault> {
        let alignment = if self.hart.isa.has(Extension::C) {
            Alignment::HALFWORD
        } else {
            Alignment::WORD
        };
        if !alignment.is_aligned(pc) {
            return Err(Fault::new(Exception::InstructionAddressMisaligned, pc));
        }
        let low = self.fetch_parcel(pc)?;
        if compressed::is_compressed(low) {
            return Ok((low as u32, 2));
        }
        let high_address = self.hart.isa.xlen.zext(pc as u128 + 2) as u64;
        let high = self.fetch_parcel(high_address)?;
        Ok((low as u32 | (high as u32) << 16, 4))
    }

    fn fetch_parcel(&mut self, address: u64) -> Result<u16, Fault> {
        let physical = self.translate_and_cache(address, AccessKind::Fetch)?;
        self.memory
            .read_u16(physical)
            .map_err(|_| Fault::new(Exception::InstructionAccessFault, address))
    }

    /// Reads `buf.len()` bytes from virtual address `address`.
    pub fn read(&mut self, address: u64, buf: &mut [u8], kind: AccessKind) -> Result<(), Fault> {
        let size = buf.len() as u64;
        if is_naturally_aligned(address, size) {
            let physical = self.translate_and_cache(address, kind)?;
            return self
                .memory
                .read(physical, buf)
                .map_err(|_| Fault::new(kind.access_fault(), address));
        }
        let physical = self.translate_misaligned(address, size, kind)?;
        for (byte, physical) in buf.iter_mut().zip(physical) {
            let mut tmp = [0u8];
            self.memory
                .read(physical, &mut tmp)
                .map_err(|_| Fault::new(kind.access_fault(), address))?;
            *byte = tmp[0];
        }
        Ok(())
    }

    /// Writes `buf` to virtual address `address`.
    pub fn write(&mut self, address: u64, buf: &[u8]) -> Result<(), Fault> {
        let kind = AccessKind::Store;
        let size = buf.len() as u64;
        if is_naturally_aligned(address, size) {
            let physical = self.translate_and_cache(address, kind)?;
            return self
                .memory
                .write(physical, buf)
                .map_err(|_| Fault::new(kind.access_fault(), address));
        }
        let physical = self.translate_misaligned(address, size, kind)?;
        if !physical.iter().all(|&byte| self.memory.is_mapped(byte, 1)) {
            return Err(Fault::new(kind.access_fault(), address));
        }
        for (byte, physical) in buf.iter().zip(physical) {
            self.memory
                .write(physical, &[*byte])
                .map_err(|_| Fault::new(kind.access_fault(), address))?;
        }
        Ok(())
    }

    /// Translates every byte of a misaligned access before any of them is performed, so a fault
    /// on a later page leaves memory untouched.
    fn translate_misaligned(
        &mut self,
        address: u64,
        size: u64,
        kind: AccessKind,
    ) -> Result<Vec<u64>, Fault> {
        if !self.hart.misaligned_access {
            return Err(Fault::new(kind.misaligned(), address));
        }
        let xlen = self.hart.isa.xlen;
        (0..size)
            .map(|offset| {
                let byte_address = xlen.zext(address as u128 + offset as u128) as u64;
                self.translate_and_cache(byte_address, kind)
                    .map_err(|fault| Fault::new(fault.exception, address))
            })
            .collect()
    }

    /// Privilege level whose permissions apply to an access of `kind`.
    ///
    /// > When MPRV=1, load and store memory addresses are translated and protected, and endianness
    /// > is applied, as though the current privilege mode were set to MPP. Instruction
    /// > address-translation and protection are unaffected by the setting of MPRV.
    fn effective_privilege(&self, kind: AccessKind) -> PrivilegeLevel {
        let hart = &*self.hart;
        if hart.debug_mode {
            PrivilegeLevel::Machine
        } else if kind != AccessKind::Fetch
            && hart.privilege == PrivilegeLevel::Machine
            && hart.status.mprv()
        {
            hart.status.mpp()
        } else {
            hart.privilege
        }
    }

    /// Maps a virtual byte address to the corresponding physical byte address.
    pub fn translate_and_cache(&mut self, address: u64, kind: AccessKind) -> Result<u64, Fault> {
        let privilege = self.effective_privilege(kind);
        let mode = self.hart.translation_mode();
        if privilege == PrivilegeLevel::Machine || mode == TranslationMode::Bare {
            return Ok(address);
        }

        let vpn = address / PAGE;
        let offset = address % PAGE;
        if let Some(ppn) = self.hart.tlbs.get_mut(kind).lookup(vpn) {
            return Ok(ppn * PAGE + offset);
        }

        let ppn = self.walk(address, kind, privilege, mode)?;
        self.hart.tlbs.get_mut(kind).insert(vpn, ppn);
        Ok(ppn * PAGE + offset)
    }

    /// Walks the page table, returning the physical page number `address` maps to.
    ///
    /// Sets the A bit (and the D bit for stores) of the leaf entry when needed.
    fn walk(
        &mut self,
        address: u64,
        kind: AccessKind,
        privilege: PrivilegeLevel,
        mode: TranslationMode,
    ) -> Result<u64, Fault> {
        let page_fault = Fault::new(kind.page_fault(), address);
        let access_fault = Fault::new(kind.access_fault(), address);
        let (levels, pte_size, vpn_bits) = mode.geometry();

        if mode != TranslationMode::Sv32 {
            // Bits above the virtual address width must all equal the top bit.
            let va_bits = 12 + levels * vpn_bits;
            let upper = (address as i64) >> (va_bits - 1);
            if upper != 0 && upper != -1 {
                return Err(page_fault);
            }
        }

        let status = &self.hart.status;
        let (sum, mxr) = (status.sum(), status.mxr());
        let mut table = self.hart.satp_ppn() * PAGE;
        for level in (0..levels).rev() {
            let index = (address >> (12 + level * vpn_bits)) & ((1 << vpn_bits) - 1);
            let pte_address = table + index * pte_size;
            let entry = match pte_size {
                4 => self.memory.read_u32(pte_address).map(u64::from),
                _ => self.memory.read_u64(pte_address),
            }
            .map_err(|_| access_fault)?;

            if entry & pte::V == 0 || (entry & pte::R == 0 && entry & pte::W != 0) {
                return Err(page_fault);
            }
            let ppn = match mode {
                TranslationMode::Sv32 => (entry >> pte::PPN_SHIFT) & 0x3F_FFFF,
                _ => (entry >> pte::PPN_SHIFT) & ((1 << 44) - 1),
            };
            if entry & (pte::R | pte::X) == 0 {
                // Pointer to the next level of the page table.
                if level == 0 {
                    return Err(page_fault);
                }
                table = ppn * PAGE;
                continue;
            }

            let user_page = entry & pte::U != 0;
            let privilege_ok = match privilege {
                PrivilegeLevel::User => user_page,
                PrivilegeLevel::Supervisor => !user_page || (sum && kind != AccessKind::Fetch),
                PrivilegeLevel::Machine => true,
            };
            let permission_ok = match kind {
                AccessKind::Fetch => entry & pte::X != 0,
                AccessKind::Load => entry & pte::R != 0 || (mxr && entry & pte::X != 0),
                AccessKind::Store => entry & pte::W != 0,
            };
            if !privilege_ok || !permission_ok {
                return Err(page_fault);
            }

            let superpage_bits = level * vpn_bits;
            let superpage_mask = (1 << superpage_bits) - 1;
            if ppn & superpage_mask != 0 {
                // Misaligned superpage
                return Err(page_fault);
            }

            let mut updated = entry | pte::A;
            if kind == AccessKind::Store {
                updated |= pte::D;
            }
            if updated != entry {
                match pte_size {
                    4 => self.memory.write_u32(pte_address, updated as u32),
                    _ => self.memory.write_u64(pte_address, updated),
                }
                .map_err(|_| access_fault)?;
            }

            return Ok(ppn | (address / PAGE) & superpage_mask);
        }
        Err(page_fault)
    }
}

fn is_naturally_aligned(address: u64, size: u64) -> bool {
    Alignment::natural_for_size(size).is_some_and(|alignment| alignment.is_aligned(address))
}
