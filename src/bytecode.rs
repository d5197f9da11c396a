//! PICA200 shader bytecode decoding.
//!
//! An instruction is one 32-bit word with the opcode in bits 26–31; the
//! remaining bits are interpreted through one of four views (`common`, `mad`,
//! `flow`, `setemit`) depending on the opcode. Swizzle patterns live in a
//! separate table indexed by `operand_desc_id`.

/// Raw selector value meaning "no swizzling" (components x,y,z,w in order).
pub const IDENTITY_SWIZZLE: u8 = 0x1b;
/// Destination mask with all four components enabled.
pub const FULL_DEST_MASK: u32 = 0xf;

#[inline]
fn bits(word: u32, lsb: u32, width: u32) -> u32 {
    (word >> lsb) & ((1 << width) - 1)
}

/// Shader opcodes, after folding the aliased encodings (`0x2E`/`0x2F` are
/// both CMP, `0x30..=0x37` MADI, `0x38..=0x3F` MAD).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpCode {
    Add,
    Dp3,
    Dp4,
    Dph,
    Ex2,
    Lg2,
    Mul,
    Sge,
    Slt,
    Flr,
    Max,
    Min,
    Rcp,
    Rsq,
    Mova,
    Mov,
    Dphi,
    Sgei,
    Slti,
    Nop,
    End,
    Breakc,
    Call,
    Callc,
    Callu,
    Ifu,
    Ifc,
    Loop,
    Emit,
    SetEmit,
    Jmpc,
    Jmpu,
    Cmp,
    Madi,
    Mad,
}

impl OpCode {
    /// Decode a 6-bit opcode field. Reserved encodings return `None`.
    pub fn from_raw(raw: u8) -> Option<OpCode> {
        use OpCode::*;
        Some(match raw {
            0x00 => Add,
            0x01 => Dp3,
            0x02 => Dp4,
            0x03 => Dph,
            0x05 => Ex2,
            0x06 => Lg2,
            0x08 => Mul,
            0x09 => Sge,
            0x0a => Slt,
            0x0b => Flr,
            0x0c => Max,
            0x0d => Min,
            0x0e => Rcp,
            0x0f => Rsq,
            0x12 => Mova,
            0x13 => Mov,
            0x18 => Dphi,
            0x1a => Sgei,
            0x1b => Slti,
            0x21 => Nop,
            0x22 => End,
            0x23 => Breakc,
            0x24 => Call,
            0x25 => Callc,
            0x26 => Callu,
            0x27 => Ifu,
            0x28 => Ifc,
            0x29 => Loop,
            0x2a => Emit,
            0x2b => SetEmit,
            0x2c => Jmpc,
            0x2d => Jmpu,
            0x2e | 0x2f => Cmp,
            0x30..=0x37 => Madi,
            0x38..=0x3f => Mad,
            _ => return None,
        })
    }

    /// True for the opcodes whose wide/narrow source operand positions are
    /// swapped ("i" suffix forms).
    pub fn src_inverted(self) -> bool {
        matches!(self, OpCode::Dphi | OpCode::Sgei | OpCode::Slti | OpCode::Madi)
    }

    pub fn is_mad(self) -> bool {
        matches!(self, OpCode::Mad | OpCode::Madi)
    }
}

/// Kind of a source register reference.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceKind {
    Input,
    Temporary,
    FloatUniform,
}

/// A source register reference: `0x00..=0x0F` input, `0x10..=0x1F`
/// temporary, `0x20..=0x7F` float uniform.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SourceRegister(u32);

impl SourceRegister {
    pub fn new(value: u32) -> Self {
        SourceRegister(value & 0x7f)
    }

    pub fn kind(self) -> SourceKind {
        match self.0 {
            0x00..=0x0f => SourceKind::Input,
            0x10..=0x1f => SourceKind::Temporary,
            _ => SourceKind::FloatUniform,
        }
    }

    pub fn index(self) -> u32 {
        match self.kind() {
            SourceKind::Input => self.0,
            SourceKind::Temporary => self.0 - 0x10,
            SourceKind::FloatUniform => self.0 - 0x20,
        }
    }
}

/// Kind of a destination register reference.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DestKind {
    Output,
    Temporary,
}

/// A destination register reference: `0x00..=0x0F` output, `0x10..=0x1F`
/// temporary.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DestRegister(u32);

impl DestRegister {
    pub fn new(value: u32) -> Self {
        DestRegister(value & 0x1f)
    }

    pub fn kind(self) -> DestKind {
        if self.0 < 0x10 {
            DestKind::Output
        } else {
            DestKind::Temporary
        }
    }

    pub fn index(self) -> u32 {
        self.0 & 0x0f
    }
}

/// Condition combiner for flow-control instructions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlowOp {
    Or,
    And,
    JustX,
    JustY,
}

/// Per-axis comparison performed by CMP.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompareOp {
    Equal,
    NotEqual,
    LessThan,
    LessEqual,
    GreaterThan,
    GreaterEqual,
}

impl CompareOp {
    fn from_raw(raw: u32) -> CompareOp {
        match raw {
            0 => CompareOp::Equal,
            1 => CompareOp::NotEqual,
            2 => CompareOp::LessThan,
            3 => CompareOp::LessEqual,
            4 => CompareOp::GreaterThan,
            5 => CompareOp::GreaterEqual,
            _ => {
                debug_assert!(false, "reserved compare op {raw}");
                CompareOp::Equal
            }
        }
    }
}

/// One instruction word.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Instruction(pub u32);

impl Instruction {
    pub fn opcode_raw(self) -> u8 {
        bits(self.0, 26, 6) as u8
    }

    pub fn opcode(self) -> Option<OpCode> {
        OpCode::from_raw(self.opcode_raw())
    }

    pub fn common(self) -> CommonView {
        CommonView(self.0)
    }

    pub fn mad(self) -> MadView {
        MadView(self.0)
    }

    pub fn flow(self) -> FlowView {
        FlowView(self.0)
    }

    pub fn setemit(self) -> SetEmitView {
        SetEmitView(self.0)
    }
}

/// Field view for the arithmetic formats.
#[derive(Clone, Copy)]
pub struct CommonView(u32);

impl CommonView {
    pub fn operand_desc_id(self) -> u32 {
        bits(self.0, 0, 7)
    }

    pub fn src2(self) -> SourceRegister {
        SourceRegister::new(bits(self.0, 7, 5))
    }

    pub fn src1(self) -> SourceRegister {
        SourceRegister::new(bits(self.0, 12, 7))
    }

    /// Wide second operand of the inverted ("i") format.
    pub fn src2i(self) -> SourceRegister {
        SourceRegister::new(bits(self.0, 7, 7))
    }

    /// Narrow first operand of the inverted ("i") format.
    pub fn src1i(self) -> SourceRegister {
        SourceRegister::new(bits(self.0, 14, 5))
    }

    pub fn address_register_index(self) -> u32 {
        bits(self.0, 19, 2)
    }

    pub fn dest(self) -> DestRegister {
        DestRegister::new(bits(self.0, 21, 5))
    }

    pub fn compare_op_x(self) -> CompareOp {
        CompareOp::from_raw(bits(self.0, 24, 3))
    }

    pub fn compare_op_y(self) -> CompareOp {
        CompareOp::from_raw(bits(self.0, 21, 3))
    }
}

/// Field view for MAD/MADI.
#[derive(Clone, Copy)]
pub struct MadView(u32);

impl MadView {
    pub fn operand_desc_id(self) -> u32 {
        bits(self.0, 0, 5)
    }

    pub fn src3(self) -> SourceRegister {
        SourceRegister::new(bits(self.0, 5, 5))
    }

    /// Wide third operand of MADI.
    pub fn src3i(self) -> SourceRegister {
        SourceRegister::new(bits(self.0, 5, 7))
    }

    /// Wide second operand of MAD.
    pub fn src2(self) -> SourceRegister {
        SourceRegister::new(bits(self.0, 10, 7))
    }

    pub fn src2i(self) -> SourceRegister {
        SourceRegister::new(bits(self.0, 12, 5))
    }

    pub fn src1(self) -> SourceRegister {
        SourceRegister::new(bits(self.0, 17, 5))
    }

    pub fn address_register_index(self) -> u32 {
        bits(self.0, 22, 2)
    }

    pub fn dest(self) -> DestRegister {
        DestRegister::new(bits(self.0, 24, 5))
    }
}

/// Field view for the flow-control formats.
#[derive(Clone, Copy)]
pub struct FlowView(u32);

impl FlowView {
    pub fn num_instructions(self) -> u32 {
        bits(self.0, 0, 8)
    }

    pub fn dest_offset(self) -> u32 {
        bits(self.0, 10, 12)
    }

    pub fn op(self) -> FlowOp {
        match bits(self.0, 22, 2) {
            0 => FlowOp::Or,
            1 => FlowOp::And,
            2 => FlowOp::JustX,
            _ => FlowOp::JustY,
        }
    }

    pub fn bool_uniform_id(self) -> u32 {
        bits(self.0, 22, 4)
    }

    pub fn int_uniform_id(self) -> u32 {
        bits(self.0, 22, 2)
    }

    pub fn refy(self) -> u32 {
        bits(self.0, 24, 1)
    }

    pub fn refx(self) -> u32 {
        bits(self.0, 25, 1)
    }
}

/// Field view for SETEMIT.
#[derive(Clone, Copy)]
pub struct SetEmitView(u32);

impl SetEmitView {
    pub fn winding(self) -> u32 {
        bits(self.0, 22, 1)
    }

    pub fn prim_emit(self) -> u32 {
        bits(self.0, 23, 1)
    }

    pub fn vertex_id(self) -> u32 {
        bits(self.0, 24, 2)
    }
}

/// One swizzle-pattern word: per-source component selection and negation
/// plus the destination write mask.
#[derive(Clone, Copy, Debug)]
pub struct SwizzlePattern(pub u32);

impl SwizzlePattern {
    /// The raw 4-bit destination mask. Component `i` (x = 0) maps to bit
    /// `3 - i`; prefer [`Self::dest_component_enabled`].
    pub fn dest_mask(self) -> u32 {
        bits(self.0, 0, 4)
    }

    pub fn dest_component_enabled(self, component: u32) -> bool {
        self.dest_mask() & (8 >> component) != 0
    }

    /// Whether source operand `src_num` (1-based) is negated.
    pub fn negate(self, src_num: u32) -> bool {
        let bit = match src_num {
            1 => 4,
            2 => 13,
            _ => 22,
        };
        bits(self.0, bit, 1) != 0
    }

    /// The 8-bit selector for source `src_num` (1-based); component 0's
    /// choice sits in the top two bits.
    pub fn raw_selector(self, src_num: u32) -> u8 {
        let lsb = match src_num {
            1 => 5,
            2 => 14,
            _ => 23,
        };
        bits(self.0, lsb, 8) as u8
    }

    /// The register component read into lane `component` for `src_num`.
    pub fn selector(self, src_num: u32, component: u32) -> u32 {
        (self.raw_selector(src_num) as u32 >> (6 - 2 * component)) & 3
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pattern(dest_mask: u32, sel1: u8, neg1: bool, sel2: u8, neg2: bool) -> SwizzlePattern {
        SwizzlePattern(
            dest_mask
                | (neg1 as u32) << 4
                | (sel1 as u32) << 5
                | (neg2 as u32) << 13
                | (sel2 as u32) << 14
                | (IDENTITY_SWIZZLE as u32) << 23,
        )
    }

    #[test]
    fn opcode_aliases_fold() {
        assert_eq!(OpCode::from_raw(0x2e), Some(OpCode::Cmp));
        assert_eq!(OpCode::from_raw(0x2f), Some(OpCode::Cmp));
        assert_eq!(OpCode::from_raw(0x33), Some(OpCode::Madi));
        assert_eq!(OpCode::from_raw(0x3c), Some(OpCode::Mad));
        assert_eq!(OpCode::from_raw(0x04), None);
        assert_eq!(OpCode::from_raw(0x1f), None);
    }

    #[test]
    fn source_register_banks() {
        let v3 = SourceRegister::new(0x03);
        let r5 = SourceRegister::new(0x15);
        let c40 = SourceRegister::new(0x20 + 40);
        assert_eq!((v3.kind(), v3.index()), (SourceKind::Input, 3));
        assert_eq!((r5.kind(), r5.index()), (SourceKind::Temporary, 5));
        assert_eq!((c40.kind(), c40.index()), (SourceKind::FloatUniform, 40));
    }

    #[test]
    fn common_view_fields() {
        // ADD o2, c8, r5.desc3, with a1-relative addressing.
        let word = 3 | (0x15 << 7) | (0x28 << 12) | (2 << 19) | (0x02 << 21);
        let instr = Instruction(word);
        assert_eq!(instr.opcode(), Some(OpCode::Add));
        let c = instr.common();
        assert_eq!(c.operand_desc_id(), 3);
        assert_eq!(c.src1(), SourceRegister::new(0x28));
        assert_eq!(c.src2(), SourceRegister::new(0x15));
        assert_eq!(c.address_register_index(), 2);
        assert_eq!(c.dest(), DestRegister::new(0x02));
        assert_eq!(c.dest().kind(), DestKind::Output);
    }

    #[test]
    fn flow_view_fields() {
        let word = (0x28 << 26) | (1 << 25) | (0 << 24) | (1 << 22) | (17 << 10) | 5;
        let f = Instruction(word).flow();
        assert_eq!(f.dest_offset(), 17);
        assert_eq!(f.num_instructions(), 5);
        assert_eq!(f.op(), FlowOp::And);
        assert_eq!((f.refx(), f.refy()), (1, 0));
    }

    #[test]
    fn swizzle_selectors() {
        let p = pattern(FULL_DEST_MASK, IDENTITY_SWIZZLE, false, 0b00_00_00_00, true);
        assert_eq!(p.raw_selector(1), IDENTITY_SWIZZLE);
        assert_eq!(p.selector(1, 0), 0);
        assert_eq!(p.selector(1, 3), 3);
        // src2 = xxxx, negated
        assert_eq!(p.raw_selector(2), 0);
        assert_eq!(p.selector(2, 2), 0);
        assert!(!p.negate(1));
        assert!(p.negate(2));
    }

    #[test]
    fn dest_mask_component_order() {
        // Bit 3 is x, bit 0 is w.
        let p = SwizzlePattern(0b1000);
        assert!(p.dest_component_enabled(0));
        assert!(!p.dest_component_enabled(3));
        let p = SwizzlePattern(0b0001);
        assert!(p.dest_component_enabled(3));
    }
}
