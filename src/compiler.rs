use dynasmrt::{AssemblyOffset, DynamicLabel};

use crate::arch::EmitCtx;
use crate::bytecode::{
    DestKind, Instruction, OpCode, SourceKind, SourceRegister, SwizzlePattern,
};
use crate::context::{
    bool_uniform_offset, float_uniform_offset, input_offset, int_uniform_offset, output_offset,
    temporary_offset, ProgramCode, SwizzleData, UnitState, Uniforms, MAX_PROGRAM_CODE_LENGTH,
    MAX_SHADER_SIZE,
};
use crate::intrinsics;

/// Operand register assignments (q1..q3).
const SRC1: u32 = 1;
const SRC2: u32 = 2;
const SRC3: u32 = 3;

/// A compiled shader. Owns the executable buffer containing the JIT'd code.
pub struct CompiledShader {
    buf: dynasmrt::ExecutableBuffer,
    entry: AssemblyOffset,
    code_size: usize,
    instruction_offsets: Vec<AssemblyOffset>,
    func: unsafe extern "C" fn(*const Uniforms, *mut UnitState, *const u8),
}

impl CompiledShader {
    /// Execute the shader starting at instruction `entry_pc`.
    pub(crate) fn run(&self, uniforms: &Uniforms, state: &mut UnitState, entry_pc: usize) {
        assert!(entry_pc < MAX_PROGRAM_CODE_LENGTH);
        let first_instr = self.buf.ptr(self.instruction_offsets[entry_pc]);
        unsafe { (self.func)(uniforms, state, first_instr) }
    }

    /// The raw executable code buffer.
    pub fn code(&self) -> &[u8] {
        &self.buf[..self.code_size]
    }

    /// Byte offset of the prologue within the code buffer.
    pub fn entry_offset(&self) -> usize {
        self.entry.0
    }
}

/// Compiler state threaded through every lowering.
struct Compiler<'a> {
    ectx: EmitCtx,
    program_code: &'a ProgramCode,
    swizzle_data: &'a SwizzleData,
    /// Cursor into the instruction stream; already advanced past the
    /// instruction being lowered.
    program_counter: usize,
    /// One forward-referable label per instruction offset.
    instruction_labels: Vec<DynamicLabel>,
    instruction_offsets: Vec<AssemblyOffset>,
    /// Instruction offsets at which a subroutine's logical end falls;
    /// sorted for binary search.
    return_offsets: Vec<u32>,
    loop_depth: u32,
    loop_break_labels: Vec<DynamicLabel>,
    log2_subroutine: DynamicLabel,
    exp2_subroutine: DynamicLabel,
}

/// Compile the whole program array into fresh executable memory.
pub(crate) fn compile_shader(
    program_code: &ProgramCode,
    swizzle_data: &SwizzleData,
) -> CompiledShader {
    let mut ectx = EmitCtx::new();
    let log2_subroutine = ectx.emit_log2_prelude();
    let exp2_subroutine = ectx.emit_exp2_prelude();
    let instruction_labels = (0..MAX_PROGRAM_CODE_LENGTH)
        .map(|_| ectx.new_label())
        .collect();

    let mut compiler = Compiler {
        ectx,
        program_code,
        swizzle_data,
        program_counter: 0,
        instruction_labels,
        instruction_offsets: vec![AssemblyOffset(0); MAX_PROGRAM_CODE_LENGTH],
        return_offsets: Vec::new(),
        loop_depth: 0,
        loop_break_labels: Vec::new(),
        log2_subroutine,
        exp2_subroutine,
    };

    compiler.find_return_offsets();

    let entry = compiler.ectx.offset();
    compiler.ectx.emit_prologue();
    compiler.compile_block(MAX_PROGRAM_CODE_LENGTH);

    let code_size = compiler.ectx.offset().0;
    assert!(
        code_size <= MAX_SHADER_SIZE,
        "compiled a shader that exceeds the allocated size"
    );
    log::debug!("compiled shader size={code_size}");

    let buf = compiler.ectx.finalize();
    let func: unsafe extern "C" fn(*const Uniforms, *mut UnitState, *const u8) =
        unsafe { core::mem::transmute(buf.ptr(entry)) };

    CompiledShader {
        buf,
        entry,
        code_size,
        instruction_offsets: compiler.instruction_offsets,
        func,
    }
}

impl<'a> Compiler<'a> {
    /// Record the logical return point of every CALL-family instruction
    /// (the instruction after the called block).
    fn find_return_offsets(&mut self) {
        self.return_offsets.clear();
        for word in self.program_code.iter() {
            let instr = Instruction(*word);
            if matches!(
                instr.opcode(),
                Some(OpCode::Call | OpCode::Callc | OpCode::Callu)
            ) {
                let f = instr.flow();
                self.return_offsets
                    .push(f.dest_offset() + f.num_instructions());
            }
        }
        self.return_offsets.sort_unstable();
    }

    fn compile_block(&mut self, end: usize) {
        while self.program_counter < end {
            self.compile_next_instr();
        }
    }

    fn compile_next_instr(&mut self) {
        let pc = self.program_counter;
        if self.return_offsets.binary_search(&(pc as u32)).is_ok() {
            self.ectx.emit_return_check(pc as u32);
        }

        self.instruction_offsets[pc] = self.ectx.offset();
        self.ectx.bind_label(self.instruction_labels[pc]);

        let instr = Instruction(self.program_code[pc]);
        self.program_counter += 1;

        match instr.opcode() {
            Some(opcode) => self.compile_instr(opcode, instr),
            None => log::error!(
                "unhandled instruction: 0x{:02x} (0x{:08x})",
                instr.opcode_raw(),
                instr.0
            ),
        }
    }

    fn compile_instr(&mut self, opcode: OpCode, instr: Instruction) {
        use OpCode::*;
        match opcode {
            Add => self.compile_add(instr),
            Dp3 => self.compile_dp3(instr),
            Dp4 => self.compile_dp4(instr),
            Dph | Dphi => self.compile_dph(opcode, instr),
            Ex2 => self.compile_ex2(instr),
            Lg2 => self.compile_lg2(instr),
            Mul => self.compile_mul(instr),
            Sge | Sgei => self.compile_sge(opcode, instr),
            Slt | Slti => self.compile_slt(opcode, instr),
            Flr => self.compile_flr(instr),
            Max => self.compile_max(instr),
            Min => self.compile_min(instr),
            Rcp => self.compile_rcp(instr),
            Rsq => self.compile_rsq(instr),
            Mova => self.compile_mova(instr),
            Mov => self.compile_mov(instr),
            Nop => {}
            End => self.ectx.emit_epilogue(),
            Breakc => self.compile_breakc(instr),
            Call => self.compile_call(instr),
            Callc => self.compile_callc(instr),
            Callu => self.compile_callu(instr),
            Ifu | Ifc => self.compile_if(opcode, instr),
            Loop => self.compile_loop(instr),
            Emit => self.compile_emit(),
            SetEmit => self.compile_setemit(instr),
            Jmpc | Jmpu => self.compile_jmp(opcode, instr),
            Cmp => self.compile_cmp(instr),
            Mad | Madi => self.compile_mad(opcode, instr),
        }
    }

    // ── Operand plumbing ─────────────────────────────────────────────

    /// Load one source operand into `dst`, applying address-register
    /// indexing, swizzle and negation as the instruction's descriptor asks.
    fn load_src(&mut self, instr: Instruction, src_num: u32, src_reg: SourceRegister, dst: u32) {
        let opcode = instr.opcode().expect("decoded instruction");
        let (operand_desc_id, offset_src, address_register_index) = if opcode.is_mad() {
            let m = instr.mad();
            let offset_src = if opcode.src_inverted() { 3 } else { 2 };
            (m.operand_desc_id(), offset_src, m.address_register_index())
        } else {
            let c = instr.common();
            let offset_src = if opcode.src_inverted() { 2 } else { 1 };
            (c.operand_desc_id(), offset_src, c.address_register_index())
        };

        if src_reg.kind() == SourceKind::FloatUniform
            && src_num == offset_src
            && address_register_index != 0
        {
            self.ectx
                .emit_load_uniform_indexed(address_register_index, src_reg.index(), dst);
        } else {
            let (from_uniforms, offset) = match src_reg.kind() {
                SourceKind::FloatUniform => (true, float_uniform_offset(src_reg.index())),
                SourceKind::Input => (false, input_offset(src_reg.index())),
                SourceKind::Temporary => (false, temporary_offset(src_reg.index())),
            };
            self.ectx.emit_load_vec(from_uniforms, offset, dst);
        }

        let pattern = SwizzlePattern(self.swizzle_data[operand_desc_id as usize]);
        self.ectx.emit_swizzle(dst, pattern.raw_selector(src_num));
        if pattern.negate(src_num) {
            self.ectx.emit_negate(dst);
        }
    }

    /// Write `src` back to the destination register under the write mask.
    fn store_dest(&mut self, instr: Instruction, src: u32) {
        let opcode = instr.opcode().expect("decoded instruction");
        let (operand_desc_id, dest) = if opcode.is_mad() {
            (instr.mad().operand_desc_id(), instr.mad().dest())
        } else {
            (instr.common().operand_desc_id(), instr.common().dest())
        };

        let pattern = SwizzlePattern(self.swizzle_data[operand_desc_id as usize]);
        let offset = match dest.kind() {
            DestKind::Output => output_offset(dest.index()),
            DestKind::Temporary => temporary_offset(dest.index()),
        };

        let mut lane_mask = 0u32;
        for lane in 0..4 {
            if pattern.dest_component_enabled(lane) {
                lane_mask |= 1 << lane;
            }
        }
        self.ectx.emit_store_dest(offset, lane_mask, src);
    }

    // ── Arithmetic lowerings ─────────────────────────────────────────

    fn compile_add(&mut self, instr: Instruction) {
        let c = instr.common();
        self.load_src(instr, 1, c.src1(), SRC1);
        self.load_src(instr, 2, c.src2(), SRC2);
        self.ectx.emit_add();
        self.store_dest(instr, SRC1);
    }

    fn compile_dp3(&mut self, instr: Instruction) {
        let c = instr.common();
        self.load_src(instr, 1, c.src1(), SRC1);
        self.load_src(instr, 2, c.src2(), SRC2);
        self.ectx.emit_sanitized_mul();
        self.ectx.emit_zero_w();
        self.ectx.emit_hsum_broadcast();
        self.store_dest(instr, SRC1);
    }

    fn compile_dp4(&mut self, instr: Instruction) {
        let c = instr.common();
        self.load_src(instr, 1, c.src1(), SRC1);
        self.load_src(instr, 2, c.src2(), SRC2);
        self.ectx.emit_sanitized_mul();
        self.ectx.emit_hsum_broadcast();
        self.store_dest(instr, SRC1);
    }

    fn compile_dph(&mut self, opcode: OpCode, instr: Instruction) {
        let c = instr.common();
        if opcode == OpCode::Dphi {
            self.load_src(instr, 1, c.src1i(), SRC1);
            self.load_src(instr, 2, c.src2i(), SRC2);
        } else {
            self.load_src(instr, 1, c.src1(), SRC1);
            self.load_src(instr, 2, c.src2(), SRC2);
        }
        // Homogeneous dot: src1.w reads as 1.0.
        self.ectx.emit_set_w_one();
        self.ectx.emit_sanitized_mul();
        self.ectx.emit_hsum_broadcast();
        self.store_dest(instr, SRC1);
    }

    fn compile_ex2(&mut self, instr: Instruction) {
        let c = instr.common();
        self.load_src(instr, 1, c.src1(), SRC1);
        let target = self.exp2_subroutine;
        self.ectx.emit_subroutine_call(target);
        self.store_dest(instr, SRC1);
    }

    fn compile_lg2(&mut self, instr: Instruction) {
        let c = instr.common();
        self.load_src(instr, 1, c.src1(), SRC1);
        let target = self.log2_subroutine;
        self.ectx.emit_subroutine_call(target);
        self.store_dest(instr, SRC1);
    }

    fn compile_mul(&mut self, instr: Instruction) {
        let c = instr.common();
        self.load_src(instr, 1, c.src1(), SRC1);
        self.load_src(instr, 2, c.src2(), SRC2);
        self.ectx.emit_sanitized_mul();
        self.store_dest(instr, SRC1);
    }

    fn compile_sge(&mut self, opcode: OpCode, instr: Instruction) {
        let c = instr.common();
        if opcode == OpCode::Sgei {
            self.load_src(instr, 1, c.src1i(), SRC1);
            self.load_src(instr, 2, c.src2i(), SRC2);
        } else {
            self.load_src(instr, 1, c.src1(), SRC1);
            self.load_src(instr, 2, c.src2(), SRC2);
        }
        self.ectx.emit_sge();
        self.store_dest(instr, SRC2);
    }

    fn compile_slt(&mut self, opcode: OpCode, instr: Instruction) {
        let c = instr.common();
        if opcode == OpCode::Slti {
            self.load_src(instr, 1, c.src1i(), SRC1);
            self.load_src(instr, 2, c.src2i(), SRC2);
        } else {
            self.load_src(instr, 1, c.src1(), SRC1);
            self.load_src(instr, 2, c.src2(), SRC2);
        }
        self.ectx.emit_slt();
        self.store_dest(instr, SRC1);
    }

    fn compile_flr(&mut self, instr: Instruction) {
        let c = instr.common();
        self.load_src(instr, 1, c.src1(), SRC1);
        self.ectx.emit_floor();
        self.store_dest(instr, SRC1);
    }

    fn compile_max(&mut self, instr: Instruction) {
        let c = instr.common();
        self.load_src(instr, 1, c.src1(), SRC1);
        self.load_src(instr, 2, c.src2(), SRC2);
        self.ectx.emit_ordered_max();
        self.store_dest(instr, SRC1);
    }

    fn compile_min(&mut self, instr: Instruction) {
        let c = instr.common();
        self.load_src(instr, 1, c.src1(), SRC1);
        self.load_src(instr, 2, c.src2(), SRC2);
        self.ectx.emit_ordered_min();
        self.store_dest(instr, SRC1);
    }

    fn compile_rcp(&mut self, instr: Instruction) {
        let c = instr.common();
        self.load_src(instr, 1, c.src1(), SRC1);
        self.ectx.emit_rcp();
        self.store_dest(instr, SRC1);
    }

    fn compile_rsq(&mut self, instr: Instruction) {
        let c = instr.common();
        self.load_src(instr, 1, c.src1(), SRC1);
        self.ectx.emit_rsq();
        self.store_dest(instr, SRC1);
    }

    fn compile_mova(&mut self, instr: Instruction) {
        let c = instr.common();
        let pattern = SwizzlePattern(self.swizzle_data[c.operand_desc_id() as usize]);
        let x_enabled = pattern.dest_component_enabled(0);
        let y_enabled = pattern.dest_component_enabled(1);
        if !x_enabled && !y_enabled {
            return;
        }
        self.load_src(instr, 1, c.src1(), SRC1);
        self.ectx.emit_mova(x_enabled, y_enabled);
    }

    fn compile_mov(&mut self, instr: Instruction) {
        let c = instr.common();
        self.load_src(instr, 1, c.src1(), SRC1);
        self.store_dest(instr, SRC1);
    }

    fn compile_cmp(&mut self, instr: Instruction) {
        let c = instr.common();
        self.load_src(instr, 1, c.src1(), SRC1);
        self.load_src(instr, 2, c.src2(), SRC2);
        self.ectx.emit_compare(c.compare_op_x(), c.compare_op_y());
    }

    fn compile_mad(&mut self, opcode: OpCode, instr: Instruction) {
        let m = instr.mad();
        self.load_src(instr, 1, m.src1(), SRC1);
        if opcode == OpCode::Madi {
            self.load_src(instr, 2, m.src2i(), SRC2);
            self.load_src(instr, 3, m.src3i(), SRC3);
        } else {
            self.load_src(instr, 2, m.src2(), SRC2);
            self.load_src(instr, 3, m.src3(), SRC3);
        }
        self.ectx.emit_sanitized_mul();
        self.ectx.emit_accumulate();
        self.store_dest(instr, SRC1);
    }

    // ── Control flow ─────────────────────────────────────────────────

    fn compile_breakc(&mut self, instr: Instruction) {
        debug_assert!(self.loop_depth > 0, "BREAKC must be inside a LOOP");
        if let Some(&break_label) = self.loop_break_labels.last() {
            let f = instr.flow();
            self.ectx.emit_flow_condition(f.refx(), f.refy(), f.op());
            self.ectx.branch_ne(break_label);
        }
    }

    fn compile_call(&mut self, instr: Instruction) {
        let f = instr.flow();
        let return_offset = f.dest_offset() + f.num_instructions();
        let target = self.instruction_labels[f.dest_offset() as usize];
        self.ectx.emit_call(return_offset, target);
    }

    fn compile_callc(&mut self, instr: Instruction) {
        let f = instr.flow();
        self.ectx.emit_flow_condition(f.refx(), f.refy(), f.op());
        let skip = self.ectx.new_label();
        self.ectx.branch_eq(skip);
        self.compile_call(instr);
        self.ectx.bind_label(skip);
    }

    fn compile_callu(&mut self, instr: Instruction) {
        let f = instr.flow();
        self.ectx
            .emit_bool_condition(bool_uniform_offset(f.bool_uniform_id()));
        let skip = self.ectx.new_label();
        self.ectx.branch_ne(skip);
        self.compile_call(instr);
        self.ectx.bind_label(skip);
    }

    fn compile_if(&mut self, opcode: OpCode, instr: Instruction) {
        let f = instr.flow();
        debug_assert!(
            f.dest_offset() as usize >= self.program_counter,
            "backwards if-statements not supported"
        );

        if opcode == OpCode::Ifu {
            self.ectx
                .emit_bool_condition(bool_uniform_offset(f.bool_uniform_id()));
        } else {
            self.ectx.emit_flow_condition(f.refx(), f.refy(), f.op());
        }

        let l_else = self.ectx.new_label();
        self.ectx.branch_eq(l_else);

        self.compile_block(f.dest_offset() as usize);

        if f.num_instructions() == 0 {
            self.ectx.bind_label(l_else);
            return;
        }

        let l_endif = self.ectx.new_label();
        self.ectx.branch(l_endif);
        self.ectx.bind_label(l_else);
        self.compile_block((f.dest_offset() + f.num_instructions()) as usize);
        self.ectx.bind_label(l_endif);
    }

    fn compile_loop(&mut self, instr: Instruction) {
        let f = instr.flow();
        debug_assert!(
            f.dest_offset() as usize >= self.program_counter,
            "backwards loops not supported"
        );
        debug_assert!(self.loop_depth < 1, "nested loops not supported");
        self.loop_depth += 1;

        self.ectx
            .emit_loop_init(int_uniform_offset(f.int_uniform_id()));

        let header = self.ectx.new_label();
        self.ectx.bind_label(header);
        let break_label = self.ectx.new_label();
        self.loop_break_labels.push(break_label);

        self.compile_block((f.dest_offset() + 1) as usize);
        self.ectx.emit_loop_step(header);

        self.ectx.bind_label(break_label);
        self.loop_break_labels.pop();
        self.loop_depth -= 1;
    }

    fn compile_jmp(&mut self, opcode: OpCode, instr: Instruction) {
        let f = instr.flow();
        if opcode == OpCode::Jmpc {
            self.ectx.emit_flow_condition(f.refx(), f.refy(), f.op());
        } else {
            self.ectx
                .emit_bool_condition(bool_uniform_offset(f.bool_uniform_id()));
        }

        // JMPU flips its branch sense on an odd num_instructions field.
        let inverted = opcode == OpCode::Jmpu && (f.num_instructions() & 1) == 1;
        let target = self.instruction_labels[f.dest_offset() as usize];
        if inverted {
            self.ectx.branch_eq(target);
        } else {
            self.ectx.branch_ne(target);
        }
    }

    fn compile_emit(&mut self) {
        self.ectx.emit_geometry_emit(
            intrinsics::pica_gs_emit as *const u8,
            intrinsics::pica_log_critical as *const u8,
            intrinsics::EXECUTE_EMIT_ON_VS.as_ptr() as *const u8,
        );
    }

    fn compile_setemit(&mut self, instr: Instruction) {
        let s = instr.setemit();
        self.ectx.emit_set_emitter_params(
            s.vertex_id(),
            s.prim_emit(),
            s.winding(),
            intrinsics::pica_log_critical as *const u8,
            intrinsics::EXECUTE_SETEMIT_ON_VS.as_ptr() as *const u8,
        );
    }
}
