//! The supported subset of the V extension: `vset{i}vl{i}`, integer adds, and unit-stride loads
//! and stores.

use serde::{Deserialize, Serialize};

use super::execute::Executor;
use super::mmu::AccessKind;
use super::status::ExtensionContextStatus;
use super::{CsrReadResult, CsrWriteResult, ExecutionResult, Fault, Hart};
use crate::bits;
use crate::config::IsaConfig;
use crate::instruction::{VectorAvl, VectorOp, VectorOperand, VectorTypeSource};
use crate::registers::Specifier;
use crate::trace::LastWrite;

/// Widest supported element, in bits.
const ELEN: u32 = 64;

/// Vector control state: `vl`, `vtype`, `vstart` and the fixed-point CSRs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(super) struct VectorState {
    vlen: u32,
    vl: u64,
    /// Raw vtype, without the vill bit.
    vtype: u64,
    vill: bool,
    vstart: u64,
    vxsat: bool,
    vxrm: u8,
}

impl VectorState {
    /// Creates the reset state, with `vill` set until the first valid `vsetvl`.
    pub fn new(isa: &IsaConfig) -> Self {
        Self {
            vlen: isa.vlen,
            vl: 0,
            vtype: 0,
            vill: true,
            vstart: 0,
            vxsat: false,
            vxrm: 0,
        }
    }
}

/// A decoded, valid vtype.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
struct VType {
    /// Selected element width in bits.
    sew: u32,
    /// Base-2 logarithm of the register group multiplier, from -3 to 3.
    lmul_log2: i32,
}

impl VType {
    /// Decodes a vtype value, returning `None` for settings that must set `vill`.
    ///
    /// > The vtype.vsew field is used to define the dynamic selected element width (SEW).
    /// > [...] For a given supported fractional LMUL setting, implementations must support SEW
    /// > settings between SEW_MIN and LMUL * ELEN, inclusive.
    fn decode(raw: u64, vlen: u32) -> Option<Self> {
        if raw >> 8 != 0 {
            return None;
        }
        let lmul_log2 = match raw & 0b111 {
            0b100 => return None,
            vlmul @ 0..=3 => vlmul as i32,
            vlmul => vlmul as i32 - 8,
        };
        let vsew = (raw >> 3) & 0b111;
        if vsew > 3 {
            return None;
        }
        let vtype = Self {
            sew: 8 << vsew,
            lmul_log2,
        };
        if lmul_log2 < 0 && vtype.sew > ELEN >> -lmul_log2 {
            return None;
        }
        (vtype.vlmax(vlen) > 0).then_some(vtype)
    }

    /// Maximum number of elements one instruction operates on.
    fn vlmax(self, vlen: u32) -> u64 {
        let group_bits = if self.lmul_log2 >= 0 {
            (vlen as u64) << self.lmul_log2
        } else {
            (vlen as u64) >> -self.lmul_log2
        };
        group_bits / self.sew as u64
    }
}

impl Hart {
    pub(super) fn read_vstart(&self) -> CsrReadResult {
        Ok(self.vector.vstart as u128)
    }

    /// Only the bits needed to index any element are kept.
    pub(super) fn write_vstart(&mut self, value: u128, mask: u128) -> CsrWriteResult {
        let limit = (self.vector.vlen as u128).saturating_sub(1);
        let vstart = self.vector.vstart as u128 & !mask | value & mask;
        self.vector.vstart = (vstart & limit) as u64;
        self.status.set_vs(ExtensionContextStatus::Dirty);
        Ok(())
    }

    pub(super) fn read_vxsat(&self) -> CsrReadResult {
        Ok(self.vector.vxsat as u128)
    }

    pub(super) fn write_vxsat(&mut self, value: u128, mask: u128) -> CsrWriteResult {
        let vxsat = self.vector.vxsat as u128 & !mask | value & mask;
        self.vector.vxsat = vxsat & 1 == 1;
        self.status.set_vs(ExtensionContextStatus::Dirty);
        Ok(())
    }

    pub(super) fn read_vxrm(&self) -> CsrReadResult {
        Ok(self.vector.vxrm as u128)
    }

    pub(super) fn write_vxrm(&mut self, value: u128, mask: u128) -> CsrWriteResult {
        let vxrm = self.vector.vxrm as u128 & !mask | value & mask;
        self.vector.vxrm = (vxrm & 0b11) as u8;
        self.status.set_vs(ExtensionContextStatus::Dirty);
        Ok(())
    }

    /// > The vxrm and vxsat separate CSRs can also be accessed via fields in the XLEN-bit
    /// > read/write vector control and status CSR, vcsr.
    pub(super) fn read_vcsr(&self) -> CsrReadResult {
        Ok((self.vector.vxrm as u128) << 1 | self.vector.vxsat as u128)
    }

    pub(super) fn write_vcsr(&mut self, value: u128, mask: u128) -> CsrWriteResult {
        let vcsr = self.read_vcsr()? & !mask | value & mask;
        self.vector.vxsat = vcsr & 1 == 1;
        self.vector.vxrm = ((vcsr >> 1) & 0b11) as u8;
        self.status.set_vs(ExtensionContextStatus::Dirty);
        Ok(())
    }

    pub(super) fn read_vl(&self) -> CsrReadResult {
        Ok(self.vector.vl as u128)
    }

    /// The vill bit is the most significant bit of vtype.
    pub(super) fn read_vtype(&self) -> CsrReadResult {
        if self.vector.vill {
            Ok(1 << (self.isa.xlen.bits() - 1))
        } else {
            Ok(self.vector.vtype as u128)
        }
    }

    pub(super) fn read_vlenb(&self) -> CsrReadResult {
        Ok(self.vector.vlen as u128 / 8)
    }
}

impl<'a> Executor<'a> {
    /// Executes a `vsetvli`, `vsetivli` or `vsetvl` instruction.
    ///
    /// > The application specifies the total number of elements to be processed (the application
    /// > vector length or AVL) as a candidate value for vl, and the hardware responds via a
    /// > general-purpose register with the (frequently smaller) number of elements that the
    /// > hardware will handle per iteration (stored in vl), based on the microarchitectural
    /// > implementation and the vtype setting.
    ///
    /// With rs1 = x0, the AVL is VLMAX if rd != x0 and the current vl otherwise.
    pub fn vsetvl(
        &mut self,
        dest: Specifier,
        avl: VectorAvl,
        vtype: VectorTypeSource,
    ) -> ExecutionResult {
        self.check_vector()?;
        let xlen = self.xlen();
        let raw_vtype = match vtype {
            VectorTypeSource::Immediate(immediate) => immediate as u64,
            VectorTypeSource::Register(src) => {
                u64::try_from(xlen.zext(self.x(src))).unwrap_or(u64::MAX)
            }
        };
        let avl = match avl {
            VectorAvl::Immediate(immediate) => immediate as u64,
            VectorAvl::Register(src) if src != Specifier::X0 => {
                u64::try_from(xlen.zext(self.x(src))).unwrap_or(u64::MAX)
            }
            VectorAvl::Register(_) if dest != Specifier::X0 => u64::MAX,
            VectorAvl::Register(_) => self.hart.vector.vl,
        };

        let state = &mut self.hart.vector;
        match VType::decode(raw_vtype, state.vlen) {
            Some(decoded) => {
                state.vtype = raw_vtype;
                state.vill = false;
                state.vl = avl.min(decoded.vlmax(state.vlen));
            }
            None => {
                state.vtype = 0;
                state.vill = true;
                state.vl = 0;
            }
        }
        state.vstart = 0;
        let vl = state.vl;
        self.hart.status.set_vs(ExtensionContextStatus::Dirty);
        self.set_x(dest, vl as u128);
        self.advance()
    }

    /// Executes `vadd` or one of the widening adds `vwaddu`, `vwadd`, `vwaddu.w`, `vwadd.w`.
    ///
    /// Masked-off and tail elements are left undisturbed.
    pub fn varith(
        &mut self,
        op: VectorOp,
        dest: Specifier,
        src2: Specifier,
        operand: VectorOperand,
        masked: bool,
    ) -> ExecutionResult {
        self.check_vector()?;
        let vtype = self.vtype()?;
        let sew = vtype.sew;
        let lmul_log2 = vtype.lmul_log2;
        let widening = op != VectorOp::Add;
        let wide_src2 = matches!(op, VectorOp::WadduW | VectorOp::WaddW);
        if widening && (sew * 2 > ELEN || lmul_log2 + 1 > 3) {
            return Err(self.illegal());
        }
        let dest_log2 = lmul_log2 + widening as i32;
        let src2_log2 = lmul_log2 + wide_src2 as i32;
        let mut aligned = is_group_aligned(dest, dest_log2) && is_group_aligned(src2, src2_log2);
        if let VectorOperand::Vector(src1) = operand {
            aligned &= is_group_aligned(src1, lmul_log2);
        }
        if !aligned || (masked && dest == Specifier::V0) {
            return Err(self.illegal());
        }

        let narrow_bytes = sew as usize / 8;
        let dest_bytes = if widening { narrow_bytes * 2 } else { narrow_bytes };
        let src2_bytes = if wide_src2 { narrow_bytes * 2 } else { narrow_bytes };
        let scalar = match operand {
            VectorOperand::Vector(_) => 0,
            VectorOperand::Scalar(src) => self.x(src) as u64,
            VectorOperand::Immediate(immediate) => immediate as i64 as u64,
        };

        for index in self.active_elements(masked) {
            let registers = &self.hart.v_registers;
            let a = registers.element(src2, src2_bytes, index) as u128;
            let b = match operand {
                VectorOperand::Vector(src1) => registers.element(src1, narrow_bytes, index),
                _ => scalar,
            } as u128;
            let result = match op {
                VectorOp::Add => a.wrapping_add(b),
                VectorOp::Waddu => bits::zext(a, sew) + bits::zext(b, sew),
                VectorOp::Wadd => bits::sext(a, sew).wrapping_add(bits::sext(b, sew)),
                VectorOp::WadduW => a.wrapping_add(bits::zext(b, sew)),
                VectorOp::WaddW => a.wrapping_add(bits::sext(b, sew)),
            };
            self.hart
                .v_registers
                .set_element(dest, dest_bytes, index, result as u64);
        }
        self.finish_vector_write(dest);
        self.advance()
    }

    /// Executes a unit-stride `vle<eew>.v` load.
    ///
    /// All active elements are read before any is written, so a faulting load leaves the
    /// destination group unchanged.
    pub fn vload(
        &mut self,
        element_bits: u32,
        dest: Specifier,
        base: Specifier,
        masked: bool,
    ) -> ExecutionResult {
        self.check_vector()?;
        self.check_memory_group(element_bits, dest, masked)?;
        let element_bytes = element_bits as usize / 8;
        let base_address = self.x(base);
        let mut loaded = Vec::new();
        for index in self.active_elements(masked) {
            let address = self.element_address(base_address, index, element_bytes);
            let mut buf = [0u8; 8];
            self.mmu()
                .read(address, &mut buf[..element_bytes], AccessKind::Load)?;
            loaded.push((index, u64::from_le_bytes(buf)));
        }
        for (index, value) in loaded {
            self.hart
                .v_registers
                .set_element(dest, element_bytes, index, value);
        }
        self.finish_vector_write(dest);
        self.advance()
    }

    /// Executes a unit-stride `vse<eew>.v` store.
    pub fn vstore(
        &mut self,
        element_bits: u32,
        src: Specifier,
        base: Specifier,
        masked: bool,
    ) -> ExecutionResult {
        self.check_vector()?;
        self.check_memory_group(element_bits, src, false)?;
        let element_bytes = element_bits as usize / 8;
        let base_address = self.x(base);
        for index in self.active_elements(masked) {
            let address = self.element_address(base_address, index, element_bytes);
            let value = self.hart.v_registers.element(src, element_bytes, index);
            self.mmu()
                .write(address, &value.to_le_bytes()[..element_bytes])?;
        }
        self.hart.vector.vstart = 0;
        self.advance()
    }

    fn check_vector(&self) -> Result<(), Fault> {
        self.hart.check_vector_enabled().map_err(|_| self.illegal())
    }

    /// The current vtype. Vector instructions other than `vsetvl` are illegal while vill is set.
    fn vtype(&self) -> Result<VType, Fault> {
        let state = &self.hart.vector;
        if state.vill {
            return Err(self.illegal());
        }
        VType::decode(state.vtype, state.vlen).ok_or_else(|| self.illegal())
    }

    /// Checks the effective group size of a unit-stride access of `element_bits` elements.
    fn check_memory_group(
        &self,
        element_bits: u32,
        register: Specifier,
        masked: bool,
    ) -> Result<(), Fault> {
        let vtype = self.vtype()?;
        let emul_log2 =
            element_bits.trailing_zeros() as i32 - vtype.sew.trailing_zeros() as i32
                + vtype.lmul_log2;
        if !(-3..=3).contains(&emul_log2)
            || !is_group_aligned(register, emul_log2)
            || (masked && register == Specifier::V0)
        {
            return Err(self.illegal());
        }
        Ok(())
    }

    /// Indices of the body elements from vstart to vl that are not masked off.
    fn active_elements(&self, masked: bool) -> Vec<usize> {
        let state = &self.hart.vector;
        let registers = &self.hart.v_registers;
        (state.vstart as usize..state.vl as usize)
            .filter(|&index| !masked || registers.mask_bit(Specifier::V0, index))
            .collect()
    }

    fn element_address(&self, base: u128, index: usize, element_bytes: usize) -> u64 {
        let offset = (index * element_bytes) as u128;
        self.xlen().zext(base.wrapping_add(offset)) as u64
    }

    fn finish_vector_write(&mut self, dest: Specifier) {
        self.hart.vector.vstart = 0;
        self.hart.status.set_vs(ExtensionContextStatus::Dirty);
        self.hart.write = LastWrite::Vector {
            register: dest,
            bytes: self.hart.v_registers.register(dest).to_vec(),
        };
    }
}

/// Register groups of more than one register must start at a multiple of their size.
fn is_group_aligned(register: Specifier, group_log2: i32) -> bool {
    group_log2 <= 0 || u8::from(register) % (1 << group_log2) == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hart::Exception;
    use crate::memory::PhysicalMemory;
    use crate::AddressRange;

    const RAM_BASE: u64 = 0x8000_0000;

    /// `e8, m1`
    const E8M1: u32 = 0b000_000;
    /// `e32, m1`
    const E32M1: u32 = 0b010_000;

    struct Fixture {
        hart: Hart,
        memory: PhysicalMemory,
    }

    impl Fixture {
        fn new() -> Self {
            let isa = IsaConfig::parse("rv64gcv").unwrap();
            let hart = Hart::new(0, &isa, RAM_BASE, false, false);
            let mut memory = PhysicalMemory::new(56);
            memory
                .add_ram(AddressRange::with_size(RAM_BASE, 0x1_0000).unwrap())
                .unwrap();
            Self { hart, memory }
        }

        fn executor(&mut self) -> Executor<'_> {
            Executor {
                hart: &mut self.hart,
                memory: &mut self.memory,
                raw: 0x57,
                length: 4,
            }
        }

        fn vsetivli(&mut self, avl: u32, vtype: u32) {
            self.executor()
                .vsetvl(
                    r(10),
                    VectorAvl::Immediate(avl),
                    VectorTypeSource::Immediate(vtype),
                )
                .unwrap();
        }

        fn element(&self, register: u8, bytes: usize, index: usize) -> u64 {
            self.hart.v_registers.element(r(register), bytes, index)
        }

        fn set_element(&mut self, register: u8, bytes: usize, index: usize, value: u64) {
            self.hart
                .v_registers
                .set_element(r(register), bytes, index, value);
        }
    }

    fn r(index: u8) -> Specifier {
        Specifier::from_u5(index)
    }

    fn illegal() -> ExecutionResult {
        Err(Fault::new(Exception::IllegalInstruction, 0x57))
    }

    #[test]
    fn test_vtype_decode() {
        assert_eq!(
            Some(VType {
                sew: 32,
                lmul_log2: 0
            }),
            VType::decode(E32M1 as u64, 128)
        );
        assert_eq!(4, VType::decode(E32M1 as u64, 128).unwrap().vlmax(128));
        // e8, mf8 on VLEN=128 has two elements.
        assert_eq!(2, VType::decode(0b000_101, 128).unwrap().vlmax(128));
        // e64, mf2 exceeds LMUL * ELEN.
        assert_eq!(None, VType::decode(0b011_111, 128));
        // Reserved vlmul and vsew
        assert_eq!(None, VType::decode(0b000_100, 128));
        assert_eq!(None, VType::decode(0b100_000, 128));
        assert_eq!(None, VType::decode(1 << 8, 128));
    }

    #[test]
    fn test_vsetvl_avl_rules() {
        let mut f = Fixture::new();
        f.vsetivli(10, E32M1);
        assert_eq!(4, f.hart.registers.x(r(10)));
        assert_eq!(Ok(E32M1 as u128), f.hart.read_vtype());
        assert_eq!(ExtensionContextStatus::Dirty, f.hart.status.vs());

        f.hart.registers.set_x(r(11), 3);
        f.executor()
            .vsetvl(
                r(12),
                VectorAvl::Register(r(11)),
                VectorTypeSource::Immediate(E8M1),
            )
            .unwrap();
        assert_eq!(3, f.hart.registers.x(r(12)));

        // rs1 = x0 and rd != x0 requests VLMAX.
        f.executor()
            .vsetvl(
                r(12),
                VectorAvl::Register(Specifier::X0),
                VectorTypeSource::Immediate(E8M1),
            )
            .unwrap();
        assert_eq!(16, f.hart.registers.x(r(12)));

        // rs1 = x0 and rd = x0 keeps vl.
        f.executor()
            .vsetvl(
                Specifier::X0,
                VectorAvl::Register(Specifier::X0),
                VectorTypeSource::Immediate(0b000_001),
            )
            .unwrap();
        assert_eq!(Ok(16), f.hart.read_vl());
    }

    #[test]
    fn test_reserved_vtype_sets_vill() {
        let mut f = Fixture::new();
        f.vsetivli(4, E8M1);
        f.hart.registers.set_x(r(5), 0b101_000);
        f.executor()
            .vsetvl(
                r(10),
                VectorAvl::Immediate(4),
                VectorTypeSource::Register(r(5)),
            )
            .unwrap();
        assert_eq!(0, f.hart.registers.x(r(10)));
        assert_eq!(Ok(1 << 63), f.hart.read_vtype());
        assert_eq!(
            illegal(),
            f.executor().varith(
                VectorOp::Add,
                r(1),
                r(2),
                VectorOperand::Vector(r(3)),
                false
            )
        );
    }

    #[test]
    fn test_vadd() {
        let mut f = Fixture::new();
        f.vsetivli(3, E8M1);
        for index in 0..4 {
            f.set_element(2, 1, index, 10 + index as u64);
            f.set_element(3, 1, index, 250);
        }
        f.executor()
            .varith(VectorOp::Add, r(1), r(2), VectorOperand::Vector(r(3)), false)
            .unwrap();
        assert_eq!(4, f.element(1, 1, 0));
        assert_eq!(6, f.element(1, 1, 2));
        // Tail is undisturbed.
        assert_eq!(0, f.element(1, 1, 3));

        f.executor()
            .varith(VectorOp::Add, r(4), r(2), VectorOperand::Immediate(-1), false)
            .unwrap();
        assert_eq!(9, f.element(4, 1, 0));
        assert_eq!(
            LastWrite::Vector {
                register: r(4),
                bytes: f.hart.v_registers.register(r(4)).to_vec(),
            },
            f.hart.write
        );
    }

    #[test]
    fn test_masked_vadd() {
        let mut f = Fixture::new();
        f.vsetivli(4, E8M1);
        f.set_element(0, 1, 0, 0b0101);
        f.hart.registers.set_x(r(5), 1);
        f.executor()
            .varith(VectorOp::Add, r(1), r(2), VectorOperand::Scalar(r(5)), true)
            .unwrap();
        assert_eq!(
            vec![1, 0, 1, 0],
            (0..4).map(|index| f.element(1, 1, index)).collect::<Vec<_>>()
        );
        assert_eq!(
            illegal(),
            f.executor()
                .varith(VectorOp::Add, r(0), r(2), VectorOperand::Scalar(r(5)), true)
        );
    }

    #[test]
    fn test_widening_adds() {
        let mut f = Fixture::new();
        f.vsetivli(2, E8M1);
        f.set_element(2, 1, 0, 0xFF);
        f.set_element(2, 1, 1, 0x7F);
        f.hart.registers.set_x(r(5), 1);
        f.executor()
            .varith(VectorOp::Waddu, r(4), r(2), VectorOperand::Scalar(r(5)), false)
            .unwrap();
        assert_eq!(0x100, f.element(4, 2, 0));
        assert_eq!(0x80, f.element(4, 2, 1));
        f.executor()
            .varith(VectorOp::Wadd, r(4), r(2), VectorOperand::Scalar(r(5)), false)
            .unwrap();
        assert_eq!(0, f.element(4, 2, 0));
        assert_eq!(0x80, f.element(4, 2, 1));
        // vwadd.wx: wide vs2 plus sign-extended narrow scalar
        f.hart.registers.set_x(r(5), 0xFF);
        f.executor()
            .varith(VectorOp::WaddW, r(6), r(4), VectorOperand::Scalar(r(5)), false)
            .unwrap();
        assert_eq!(0xFFFF, f.element(6, 2, 0));
        assert_eq!(0x7F, f.element(6, 2, 1));
        // Widening destination groups must be aligned.
        assert_eq!(
            illegal(),
            f.executor()
                .varith(VectorOp::Waddu, r(5), r(2), VectorOperand::Scalar(r(5)), false)
        );
    }

    #[test]
    fn test_widening_needs_room() {
        let mut f = Fixture::new();
        // e64, m1
        f.vsetivli(2, 0b011_000);
        assert_eq!(
            illegal(),
            f.executor()
                .varith(VectorOp::Waddu, r(4), r(2), VectorOperand::Scalar(r(5)), false)
        );
    }

    #[test]
    fn test_unit_stride_load_store() {
        let mut f = Fixture::new();
        f.vsetivli(4, E32M1);
        let base = RAM_BASE + 0x400;
        for index in 0..4 {
            f.memory
                .write_u32(base + index * 4, 0x1111_1111 * (index as u32 + 1))
                .unwrap();
        }
        f.hart.registers.set_x(r(5), base as u128);
        f.executor().vload(32, r(8), r(5), false).unwrap();
        assert_eq!(0x4444_4444, f.element(8, 4, 3));

        f.hart.registers.set_x(r(6), base as u128 + 0x100);
        f.executor().vstore(32, r(8), r(6), false).unwrap();
        assert_eq!(Ok(0x2222_2222), f.memory.read_u32(base + 0x104));
    }

    #[test]
    fn test_faulting_load_leaves_destination() {
        let mut f = Fixture::new();
        f.vsetivli(4, E32M1);
        // The last element is past the end of RAM.
        let base = RAM_BASE + 0x1_0000 - 12;
        f.hart.registers.set_x(r(5), base as u128);
        f.set_element(8, 4, 0, 0xAAAA);
        assert_eq!(
            Err(Fault::new(Exception::LoadAccessFault, base + 12)),
            f.executor().vload(32, r(8), r(5), false)
        );
        assert_eq!(0xAAAA, f.element(8, 4, 0));
    }

    #[test]
    fn test_vector_disabled() {
        let mut f = Fixture::new();
        f.hart.status.set_vs(ExtensionContextStatus::Off);
        assert_eq!(
            illegal(),
            f.executor().vsetvl(
                r(10),
                VectorAvl::Immediate(1),
                VectorTypeSource::Immediate(E8M1)
            )
        );
    }

    #[test]
    fn test_vcsr() {
        let mut f = Fixture::new();
        f.hart.write_vcsr(0b101, u128::MAX).unwrap();
        assert_eq!(Ok(1), f.hart.read_vxsat());
        assert_eq!(Ok(0b10), f.hart.read_vxrm());
        f.hart.write_vxsat(0, u128::MAX).unwrap();
        assert_eq!(Ok(0b100), f.hart.read_vcsr());
        assert_eq!(Ok(16), f.hart.read_vlenb());
    }
}
