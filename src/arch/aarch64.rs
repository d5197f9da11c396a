use dynasmrt::{dynasm, AssemblyOffset, DynamicLabel, DynasmApi, DynasmLabelApi};

use crate::bytecode::{CompareOp, FlowOp};
use crate::context::{STATE_ADDR, STATE_COND, STATE_EMITTER_PTR, STATE_OUTPUT};
use crate::context::{GS_PRIM_EMIT, GS_VERTEX_ID, GS_WINDING};

pub type Assembler = dynasmrt::aarch64::Assembler;

// Register assignments. Generated code pins the unit's hot state in
// registers for the whole run; everything else is scratch.
//
//   x9  = pointer to the uniform block                  (UNIFORMS)
//   x15 = pointer to the UnitState                      (STATE)
//   x10 = address register a0, sign-extended            (A0)
//   x11 = address register a1, sign-extended            (A1)
//   w12 = loop counter aL                               (LOOPCOUNT_REG)
//   w6  = remaining loop iterations                     (LOOPCOUNT)
//   w7  = per-iteration aL increment                    (LOOPINC)
//   x13 = x-component result of the last CMP            (COND0)
//   x14 = y-component result of the last CMP            (COND1)
//   q14 = constant splat of 1.0f                        (ONE)
//   x4, x5, q0, q4, q15 = scratch
//   q1, q2, q3 = swizzled source operands SRC1..SRC3

const fn gpr(n: u32) -> u64 {
    1 << n
}

const fn fpr(n: u32) -> u64 {
    1 << (32 + n)
}

const fn reg_range(first: u32, last: u32, vector: bool) -> u64 {
    let mut set = 0u64;
    let mut n = first;
    while n <= last {
        set |= if vector { fpr(n) } else { gpr(n) };
        n += 1;
    }
    set
}

/// Callee-saved registers of the AArch64 procedure call standard
/// (x19..x30, q8..q15). Pushed by the shader prologue, popped by `END`.
pub const ABI_ALL_CALLEE_SAVED: u64 = reg_range(19, 30, false) | reg_range(8, 15, true);

/// Caller-saved registers (x0..x17, q0..q7, q16..q31). x18 is the platform
/// register and is never touched.
pub const ABI_ALL_CALLER_SAVED: u64 =
    reg_range(0, 17, false) | reg_range(0, 7, true) | reg_range(16, 31, true);

/// Registers that must survive any call out of generated code: the pinned
/// pointers, cached unit state, loop variables and the ONE constant.
const PERSISTENT_REGS: u64 = gpr(6)
    | gpr(7)
    | gpr(9)
    | gpr(10)
    | gpr(11)
    | gpr(12)
    | gpr(13)
    | gpr(14)
    | gpr(15)
    | fpr(14);

/// The persistent registers a C callee is allowed to clobber. Far calls
/// bracket themselves with a push/pop of exactly this set (plus x30, which
/// the `blr` overwrites).
pub const fn persistent_caller_saved_regs() -> u64 {
    PERSISTENT_REGS & ABI_ALL_CALLER_SAVED
}

const LINK_REG: u64 = gpr(30);

fn frame_layout(set: u64, shadow: u32) -> (u32, Vec<u32>, Vec<u32>, u32) {
    let gprs: Vec<u32> = (0..32).filter(|&n| set & gpr(n) != 0).collect();
    let fprs: Vec<u32> = (0..32).filter(|&n| set & fpr(n) != 0).collect();
    let mut fpr_base = shadow + 8 * gprs.len() as u32;
    // q-register pairs need 16-byte offsets
    if fpr_base % 16 != 0 {
        fpr_base += 8;
    }
    let size = (fpr_base + 16 * fprs.len() as u32 + 15) & !15;
    (size, gprs, fprs, fpr_base)
}

/// Emission context: wraps the assembler. All lowering helpers live here so
/// the compiler proper never touches `dynasm!` directly.
pub struct EmitCtx {
    pub ops: Assembler,
}

impl EmitCtx {
    pub fn new() -> Self {
        EmitCtx {
            ops: Assembler::new().expect("failed to create assembler"),
        }
    }

    pub fn offset(&self) -> AssemblyOffset {
        self.ops.offset()
    }

    pub fn new_label(&mut self) -> DynamicLabel {
        self.ops.new_dynamic_label()
    }

    pub fn bind_label(&mut self, label: DynamicLabel) {
        dynasm!(self.ops
            ; .arch aarch64
            ; =>label
        );
    }

    /// Commit and finalize the assembler, returning the executable buffer.
    pub fn finalize(mut self) -> dynasmrt::ExecutableBuffer {
        self.ops.commit().expect("failed to commit assembly");
        match self.ops.finalize() {
            Ok(buf) => buf,
            Err(_) => panic!("failed to finalize assembly"),
        }
    }

    // ── ABI push/pop ─────────────────────────────────────────────────

    /// Store `set` below the stack pointer, with `shadow` spare bytes at
    /// the bottom of the frame. The frame stays 16-byte aligned.
    pub fn push_regs(&mut self, set: u64, shadow: u32) {
        let (size, gprs, fprs, fpr_base) = frame_layout(set, shadow);
        if size == 0 {
            return;
        }
        dynasm!(self.ops ; .arch aarch64 ; sub sp, sp, #size);

        let mut off = shadow;
        for pair in gprs.chunks(2) {
            match *pair {
                [a, b] => {
                    dynasm!(self.ops ; .arch aarch64 ; stp X(a), X(b), [sp, #off]);
                    off += 16;
                }
                [a] => {
                    dynasm!(self.ops ; .arch aarch64 ; str X(a), [sp, #off]);
                    off += 8;
                }
                _ => unreachable!(),
            }
        }
        let mut off = fpr_base;
        for pair in fprs.chunks(2) {
            match *pair {
                [a, b] => {
                    dynasm!(self.ops ; .arch aarch64 ; stp Q(a), Q(b), [sp, #off]);
                    off += 32;
                }
                [a] => {
                    dynasm!(self.ops ; .arch aarch64 ; str Q(a), [sp, #off]);
                    off += 16;
                }
                _ => unreachable!(),
            }
        }
    }

    /// Inverse of [`Self::push_regs`].
    pub fn pop_regs(&mut self, set: u64, shadow: u32) {
        let (size, gprs, fprs, fpr_base) = frame_layout(set, shadow);
        if size == 0 {
            return;
        }
        let mut off = shadow;
        for pair in gprs.chunks(2) {
            match *pair {
                [a, b] => {
                    dynasm!(self.ops ; .arch aarch64 ; ldp X(a), X(b), [sp, #off]);
                    off += 16;
                }
                [a] => {
                    dynasm!(self.ops ; .arch aarch64 ; ldr X(a), [sp, #off]);
                    off += 8;
                }
                _ => unreachable!(),
            }
        }
        let mut off = fpr_base;
        for pair in fprs.chunks(2) {
            match *pair {
                [a, b] => {
                    dynasm!(self.ops ; .arch aarch64 ; ldp Q(a), Q(b), [sp, #off]);
                    off += 32;
                }
                [a] => {
                    dynasm!(self.ops ; .arch aarch64 ; ldr Q(a), [sp, #off]);
                    off += 16;
                }
                _ => unreachable!(),
            }
        }
        dynasm!(self.ops ; .arch aarch64 ; add sp, sp, #size);
    }

    // ── Small utilities ──────────────────────────────────────────────

    fn emit_mov_w4(&mut self, value: u32) {
        let lo = value & 0xffff;
        let hi = value >> 16;
        dynasm!(self.ops
            ; .arch aarch64
            ; movz w4, #lo
            ; movk w4, #hi, LSL #16
        );
    }

    /// Load a 64-bit pointer into the given scratch register via movz/movk.
    fn emit_mov_ptr(&mut self, reg: u32, ptr: u64) {
        dynasm!(self.ops
            ; .arch aarch64
            ; movz X(reg), #(ptr & 0xffff) as u32
            ; movk X(reg), #((ptr >> 16) & 0xffff) as u32, LSL #16
            ; movk X(reg), #((ptr >> 32) & 0xffff) as u32, LSL #32
            ; movk X(reg), #((ptr >> 48) & 0xffff) as u32, LSL #48
        );
    }

    pub fn branch(&mut self, label: DynamicLabel) {
        dynasm!(self.ops ; .arch aarch64 ; b =>label);
    }

    pub fn branch_eq(&mut self, label: DynamicLabel) {
        dynasm!(self.ops ; .arch aarch64 ; b.eq =>label);
    }

    pub fn branch_ne(&mut self, label: DynamicLabel) {
        dynasm!(self.ops ; .arch aarch64 ; b.ne =>label);
    }

    // ── Prologue / epilogue ──────────────────────────────────────────

    /// Shader entry: save callee-saved state, plant the return-check
    /// sentinel, pin the argument pointers, load the cached unit state and
    /// jump to the caller-chosen first instruction (arg 3).
    pub fn emit_prologue(&mut self) {
        self.push_regs(ABI_ALL_CALLEE_SAVED, 16);
        dynasm!(self.ops
            ; .arch aarch64
            // All-ones sentinel in the return-check slot: no instruction
            // offset ever compares equal to it.
            ; mvn x4, xzr
            ; str x4, [sp]
            ; mov x9, x0
            ; mov x15, x1
            ; ldr w10, [x15, #STATE_ADDR]
            ; ldr w11, [x15, #(STATE_ADDR + 4)]
            ; ldr w12, [x15, #(STATE_ADDR + 8)]
            ; ldrb w13, [x15, #STATE_COND]
            ; ldrb w14, [x15, #(STATE_COND + 1)]
            ; movz w4, #0x3f80, LSL #16
            ; dup v14.s4, w4
            ; br x2
        );
    }

    /// `END`: write the cached condition/address registers back to the
    /// unit state, unwind the prologue frame and return to the host.
    pub fn emit_epilogue(&mut self) {
        dynasm!(self.ops
            ; .arch aarch64
            ; strb w13, [x15, #STATE_COND]
            ; strb w14, [x15, #(STATE_COND + 1)]
            ; str w10, [x15, #STATE_ADDR]
            ; str w11, [x15, #(STATE_ADDR + 4)]
            ; str w12, [x15, #(STATE_ADDR + 8)]
        );
        self.pop_regs(ABI_ALL_CALLEE_SAVED, 16);
        dynasm!(self.ops ; .arch aarch64 ; ret);
    }

    // ── Software return stack ────────────────────────────────────────

    /// Peek the return slot; if the caller expects to resume at `pc`,
    /// return to it, otherwise fall through.
    pub fn emit_return_check(&mut self, pc: u32) {
        let skip = self.new_label();
        dynasm!(self.ops
            ; .arch aarch64
            ; ldr x4, [sp]
            ; cmp x4, #pc
            ; b.ne =>skip
            ; ret
            ; =>skip
        );
    }

    /// `CALL` body: push the return offset onto the software return stack,
    /// branch-and-link to the target, release the slot afterwards.
    pub fn emit_call(&mut self, return_offset: u32, target: DynamicLabel) {
        dynasm!(self.ops
            ; .arch aarch64
            ; movz x4, #return_offset
            ; str x4, [sp, #-16]!
            ; bl =>target
            ; add sp, sp, #16
        );
    }

    /// Branch-and-link to an in-buffer subroutine (the transcendental
    /// preludes), sparing the link register the `CALL` lowering relies on.
    pub fn emit_subroutine_call(&mut self, target: DynamicLabel) {
        dynasm!(self.ops
            ; .arch aarch64
            ; str x30, [sp, #-16]!
            ; bl =>target
            ; ldr x30, [sp], #16
        );
    }

    // ── Condition evaluation ─────────────────────────────────────────

    /// Compare the cached CMP results against the reference bits; leaves
    /// the flags set so `eq` means "condition false".
    pub fn emit_flow_condition(&mut self, refx: u32, refy: u32, op: FlowOp) {
        // NXOR against the reference: (ref ^ 1) ^ cond is 1 iff they match.
        let nx = refx ^ 1;
        let ny = refy ^ 1;
        match op {
            FlowOp::Or => {
                dynasm!(self.ops
                    ; .arch aarch64
                    ; movz x4, #nx
                    ; movz x5, #ny
                    ; eor x4, x4, x13
                    ; eor x5, x5, x14
                    ; orr x4, x4, x5
                );
            }
            FlowOp::And => {
                dynasm!(self.ops
                    ; .arch aarch64
                    ; movz x4, #nx
                    ; movz x5, #ny
                    ; eor x4, x4, x13
                    ; eor x5, x5, x14
                    ; and x4, x4, x5
                );
            }
            FlowOp::JustX => {
                dynasm!(self.ops
                    ; .arch aarch64
                    ; movz x4, #nx
                    ; eor x4, x4, x13
                );
            }
            FlowOp::JustY => {
                dynasm!(self.ops
                    ; .arch aarch64
                    ; movz x4, #ny
                    ; eor x4, x4, x14
                );
            }
        }
        dynasm!(self.ops ; .arch aarch64 ; cmp x4, #0);
    }

    /// Load a boolean uniform and set flags (`ne` means the uniform is set).
    pub fn emit_bool_condition(&mut self, offset: u32) {
        dynasm!(self.ops
            ; .arch aarch64
            ; ldrb w4, [x9, #offset]
            ; cmp w4, #0
        );
    }

    // ── Operand load / writeback ─────────────────────────────────────

    /// Plain 16-byte operand load from the uniform block or the unit state.
    pub fn emit_load_vec(&mut self, from_uniforms: bool, offset: u32, dst: u32) {
        if from_uniforms {
            dynasm!(self.ops ; .arch aarch64 ; ldr Q(dst), [x9, #offset]);
        } else {
            dynasm!(self.ops ; .arch aarch64 ; ldr Q(dst), [x15, #offset]);
        }
    }

    /// Address-register-relative float uniform load.
    ///
    /// The effective offset is the address register's value iff it lies in
    /// [-128, 127], else 0; the summed index wraps at 128, and indices past
    /// the 96-entry bank read as (1,1,1,1).
    pub fn emit_load_uniform_indexed(&mut self, address_register_index: u32, base_index: u32, dst: u32) {
        let bank_out = self.new_label();
        // offset = ((addr + 128) <u 256) ? addr : 0
        match address_register_index {
            1 => dynasm!(self.ops
                ; .arch aarch64
                ; add w5, w10, #128
                ; cmp w5, #256
                ; csel w4, w10, wzr, lo
            ),
            2 => dynasm!(self.ops
                ; .arch aarch64
                ; add w5, w11, #128
                ; cmp w5, #256
                ; csel w4, w11, wzr, lo
            ),
            _ => dynasm!(self.ops
                ; .arch aarch64
                ; add w5, w12, #128
                ; cmp w5, #256
                ; csel w4, w12, wzr, lo
            ),
        }
        dynasm!(self.ops
            ; .arch aarch64
            ; add w4, w4, #base_index
            ; and w4, w4, #0x7f
            // Default to ONE; only indices inside the bank load memory.
            ; orr V(dst).b16, v14.b16, v14.b16
            ; cmp w4, #95
            ; b.gt =>bank_out
            ; lsl w4, w4, #4
            ; add x4, x9, x4
            ; ldr Q(dst), [x4]
            ; =>bank_out
        );
    }

    /// Permute the lanes of `dst` according to an 8-bit selector (component
    /// 0's choice in the top two bits). Identity selectors emit nothing.
    pub fn emit_swizzle(&mut self, dst: u32, selector: u8) {
        if selector == crate::bytecode::IDENTITY_SWIZZLE {
            return;
        }
        // One table byte per output byte: lane i reads bytes 4*sel(i)..+4.
        for lane in 0..4u32 {
            let sel = (selector as u32 >> (6 - 2 * lane)) & 3;
            let word = 0x03020100u32.wrapping_add(sel * 0x04040404);
            self.emit_mov_w4(word);
            match lane {
                0 => dynasm!(self.ops ; .arch aarch64 ; ins v0.s[0], w4),
                1 => dynasm!(self.ops ; .arch aarch64 ; ins v0.s[1], w4),
                2 => dynasm!(self.ops ; .arch aarch64 ; ins v0.s[2], w4),
                _ => dynasm!(self.ops ; .arch aarch64 ; ins v0.s[3], w4),
            }
        }
        match dst {
            1 => dynasm!(self.ops ; .arch aarch64 ; tbl v1.b16, {v1.b16}, v0.b16),
            2 => dynasm!(self.ops ; .arch aarch64 ; tbl v2.b16, {v2.b16}, v0.b16),
            _ => dynasm!(self.ops ; .arch aarch64 ; tbl v3.b16, {v3.b16}, v0.b16),
        }
    }

    /// Flip the sign bit of all four lanes.
    pub fn emit_negate(&mut self, dst: u32) {
        dynasm!(self.ops ; .arch aarch64 ; fneg V(dst).s4, V(dst).s4);
    }

    /// Masked destination writeback. `lane_mask` bit i enables lane i
    /// (x = 0); disabled lanes keep their previous value.
    pub fn emit_store_dest(&mut self, offset: u32, lane_mask: u32, src: u32) {
        if lane_mask == 0xf {
            dynasm!(self.ops ; .arch aarch64 ; str Q(src), [x15, #offset]);
            return;
        }
        let mut byte_mask = 0u32;
        for lane in 0..4 {
            if lane_mask & (1 << lane) != 0 {
                byte_mask |= 0xff << (8 * lane);
            }
        }
        dynasm!(self.ops ; .arch aarch64 ; ldr q0, [x15, #offset]);
        self.emit_mov_w4(byte_mask);
        dynasm!(self.ops
            ; .arch aarch64
            ; ins v15.s[0], w4
            // Widen each mask byte to a full lane: 8 -> 16 -> 32 bits.
            ; zip1 v15.b16, v15.b16, v15.b16
            ; zip1 v15.h8, v15.h8, v15.h8
            // Enabled lanes take the result, the rest keep the old value.
            ; bsl v15.b16, V(src).b16, v0.b16
            ; str q15, [x15, #offset]
        );
    }

    // ── Arithmetic bodies (operands in q1/q2/q3, result in q1 unless
    //    noted) ─────────────────────────────────────────────────────────

    pub fn emit_add(&mut self) {
        dynasm!(self.ops ; .arch aarch64 ; fadd v1.s4, v1.s4, v2.s4);
    }

    /// Multiply q1 by q2 with the 0 * inf = 0 rule.
    ///
    /// `fmulx` turns 0 * inf into 2.0 while `fmul` produces NaN; any lane
    /// where the two disagree bitwise is exactly such a case and is cleared.
    /// NaN operands yield the same quiet NaN from both and pass through.
    pub fn emit_sanitized_mul(&mut self) {
        dynasm!(self.ops
            ; .arch aarch64
            ; fmulx v0.s4, v1.s4, v2.s4
            ; fmul v1.s4, v1.s4, v2.s4
            ; cmeq v0.s4, v0.s4, v1.s4
            ; and v1.b16, v1.b16, v0.b16
        );
    }

    /// Accumulate q3 into q1 (the MAD tail).
    pub fn emit_accumulate(&mut self) {
        dynasm!(self.ops ; .arch aarch64 ; fadd v1.s4, v1.s4, v3.s4);
    }

    pub fn emit_zero_w(&mut self) {
        dynasm!(self.ops ; .arch aarch64 ; ins v1.s[3], wzr);
    }

    pub fn emit_set_w_one(&mut self) {
        dynasm!(self.ops ; .arch aarch64 ; ins v1.s[3], v14.s[0]);
    }

    /// Sum the four lanes of q1 and broadcast the result to all lanes.
    pub fn emit_hsum_broadcast(&mut self) {
        dynasm!(self.ops
            ; .arch aarch64
            ; faddp v1.s4, v1.s4, v1.s4
            ; faddp s1, v1.s2
            ; dup v1.s4, v1.s[0]
        );
    }

    /// max(q1, q2) with the second operand winning on NaN.
    pub fn emit_ordered_max(&mut self) {
        dynasm!(self.ops
            ; .arch aarch64
            ; fcmeq v0.s4, v1.s4, v1.s4
            ; fcmeq v4.s4, v2.s4, v2.s4
            ; and v0.b16, v0.b16, v4.b16
            ; fmax v1.s4, v1.s4, v2.s4
            ; bif v1.b16, v2.b16, v0.b16
        );
    }

    /// min(q1, q2) with the second operand winning on NaN.
    pub fn emit_ordered_min(&mut self) {
        dynasm!(self.ops
            ; .arch aarch64
            ; fcmeq v0.s4, v1.s4, v1.s4
            ; fcmeq v4.s4, v2.s4, v2.s4
            ; and v0.b16, v0.b16, v4.b16
            ; fmin v1.s4, v1.s4, v2.s4
            ; bif v1.b16, v2.b16, v0.b16
        );
    }

    /// (q1 >= q2) ? 1.0 : 0.0, result in q2.
    pub fn emit_sge(&mut self) {
        dynasm!(self.ops
            ; .arch aarch64
            ; fcmge v2.s4, v1.s4, v2.s4
            ; and v2.b16, v2.b16, v14.b16
        );
    }

    /// (q1 < q2) ? 1.0 : 0.0, result in q1.
    pub fn emit_slt(&mut self) {
        dynasm!(self.ops
            ; .arch aarch64
            ; fcmgt v1.s4, v2.s4, v1.s4
            ; and v1.b16, v1.b16, v14.b16
        );
    }

    pub fn emit_floor(&mut self) {
        dynasm!(self.ops ; .arch aarch64 ; frintm v1.s4, v1.s4);
    }

    /// Exact 1/x of lane 0, broadcast. The reciprocal estimate instruction
    /// is far too coarse (FRECPE(1.0) != 1.0), so divide.
    pub fn emit_rcp(&mut self) {
        dynasm!(self.ops
            ; .arch aarch64
            ; fdiv s1, s14, s1
            ; dup v1.s4, v1.s[0]
        );
    }

    /// Exact 1/sqrt(x) of lane 0, broadcast.
    pub fn emit_rsq(&mut self) {
        dynasm!(self.ops
            ; .arch aarch64
            ; fsqrt s1, s1
            ; fdiv s1, s14, s1
            ; dup v1.s4, v1.s[0]
        );
    }

    /// CMP: compare the x and y lanes of q1/q2 and latch 0/1 into the
    /// cached condition registers.
    pub fn emit_compare(&mut self, op_x: CompareOp, op_y: CompareOp) {
        dynasm!(self.ops ; .arch aarch64 ; fcmp s1, s2);
        self.emit_cset_cond0(op_x);
        dynasm!(self.ops
            ; .arch aarch64
            ; dup s0, v1.s[1]
            ; dup s4, v2.s[1]
            ; fcmp s0, s4
        );
        self.emit_cset_cond1(op_y);
    }

    fn emit_cset_cond0(&mut self, op: CompareOp) {
        match op {
            CompareOp::Equal => dynasm!(self.ops ; .arch aarch64 ; cset x13, eq),
            CompareOp::NotEqual => dynasm!(self.ops ; .arch aarch64 ; cset x13, ne),
            CompareOp::LessThan => dynasm!(self.ops ; .arch aarch64 ; cset x13, lt),
            CompareOp::LessEqual => dynasm!(self.ops ; .arch aarch64 ; cset x13, le),
            CompareOp::GreaterThan => dynasm!(self.ops ; .arch aarch64 ; cset x13, gt),
            CompareOp::GreaterEqual => dynasm!(self.ops ; .arch aarch64 ; cset x13, ge),
        }
    }

    fn emit_cset_cond1(&mut self, op: CompareOp) {
        match op {
            CompareOp::Equal => dynasm!(self.ops ; .arch aarch64 ; cset x14, eq),
            CompareOp::NotEqual => dynasm!(self.ops ; .arch aarch64 ; cset x14, ne),
            CompareOp::LessThan => dynasm!(self.ops ; .arch aarch64 ; cset x14, lt),
            CompareOp::LessEqual => dynasm!(self.ops ; .arch aarch64 ; cset x14, le),
            CompareOp::GreaterThan => dynasm!(self.ops ; .arch aarch64 ; cset x14, gt),
            CompareOp::GreaterEqual => dynasm!(self.ops ; .arch aarch64 ; cset x14, ge),
        }
    }

    /// MOVA: truncate q1's x/y lanes to integers and sign-extend them into
    /// the enabled address registers.
    pub fn emit_mova(&mut self, x_enabled: bool, y_enabled: bool) {
        dynasm!(self.ops
            ; .arch aarch64
            ; fcvtzs v1.s4, v1.s4
            ; umov x4, v1.d[0]
        );
        if x_enabled {
            dynasm!(self.ops ; .arch aarch64 ; sxtw x10, w4);
        }
        if y_enabled {
            dynasm!(self.ops
                ; .arch aarch64
                ; lsr x4, x4, #32
                ; sxtw x11, w4
            );
        }
    }

    // ── Loops ────────────────────────────────────────────────────────

    /// Unpack an integer uniform: aL = y, increment = z, iterations = x + 1.
    pub fn emit_loop_init(&mut self, offset: u32) {
        dynasm!(self.ops
            ; .arch aarch64
            ; ldr w6, [x9, #offset]
            ; lsr w12, w6, #8
            ; and w12, w12, #0xff
            ; lsr w7, w6, #16
            ; and w7, w7, #0xff
            ; uxtb w6, w6
            ; add w6, w6, #1
        );
    }

    /// Loop tail: step aL, count down, branch back while iterations remain.
    pub fn emit_loop_step(&mut self, header: DynamicLabel) {
        dynasm!(self.ops
            ; .arch aarch64
            ; add w12, w12, w7
            ; sub w6, w6, #1
            ; cmp w6, #0
            ; b.ne =>header
        );
    }

    // ── Geometry emitter call-outs ───────────────────────────────────

    fn emit_far_call(&mut self, f: *const u8) {
        self.emit_mov_ptr(8, f as u64);
        dynasm!(self.ops ; .arch aarch64 ; blr x8);
    }

    /// `EMIT`: hand the output registers to the host sink, or log if no
    /// emitter is attached.
    pub fn emit_geometry_emit(&mut self, emit_fn: *const u8, log_fn: *const u8, msg: *const u8) {
        let have_emitter = self.new_label();
        let end = self.new_label();
        let saved = persistent_caller_saved_regs() | LINK_REG;

        dynasm!(self.ops
            ; .arch aarch64
            ; ldr x4, [x15, #STATE_EMITTER_PTR]
            ; cmp x4, #0
            ; b.ne =>have_emitter
        );
        self.push_regs(saved, 0);
        self.emit_mov_ptr(0, msg as u64);
        self.emit_far_call(log_fn);
        self.pop_regs(saved, 0);
        self.branch(end);

        self.bind_label(have_emitter);
        self.push_regs(saved, 0);
        dynasm!(self.ops
            ; .arch aarch64
            ; mov x0, x4
            ; add x1, x15, #STATE_OUTPUT
        );
        self.emit_far_call(emit_fn);
        self.pop_regs(saved, 0);
        self.bind_label(end);
    }

    /// `SETEMIT`: store the vertex/primitive control bytes, or log if no
    /// emitter is attached.
    pub fn emit_set_emitter_params(
        &mut self,
        vertex_id: u32,
        prim_emit: u32,
        winding: u32,
        log_fn: *const u8,
        msg: *const u8,
    ) {
        let have_emitter = self.new_label();
        let end = self.new_label();
        let saved = persistent_caller_saved_regs() | LINK_REG;

        dynasm!(self.ops
            ; .arch aarch64
            ; ldr x4, [x15, #STATE_EMITTER_PTR]
            ; cmp x4, #0
            ; b.ne =>have_emitter
        );
        self.push_regs(saved, 0);
        self.emit_mov_ptr(0, msg as u64);
        self.emit_far_call(log_fn);
        self.pop_regs(saved, 0);
        self.branch(end);

        self.bind_label(have_emitter);
        dynasm!(self.ops
            ; .arch aarch64
            ; movz w5, #vertex_id
            ; strb w5, [x4, #GS_VERTEX_ID]
            ; movz w5, #prim_emit
            ; strb w5, [x4, #GS_PRIM_EMIT]
            ; movz w5, #winding
            ; strb w5, [x4, #GS_WINDING]
        );
        self.bind_label(end);
    }

    // ── Transcendental preludes ──────────────────────────────────────

    fn emit_pool(&mut self, label: DynamicLabel, words: &[u32]) {
        self.ops.align(16, 0);
        self.bind_label(label);
        for w in words {
            for b in w.to_le_bytes() {
                self.ops.push(b);
            }
        }
    }

    /// log2(x) on lane 0 of q1, broadcast to all lanes on exit.
    ///
    /// Range-reduces the mantissa into [1, 2) and evaluates a degree-4
    /// minimax polynomial fit for log2(x) / (x - 1); the unbiased exponent
    /// is added back at the end. NaN propagates; zero returns -inf and
    /// negative inputs the default quiet NaN.
    pub fn emit_log2_prelude(&mut self) -> DynamicLabel {
        let subroutine = self.new_label();
        let c0 = self.new_label();
        let c14 = self.new_label();
        let neg_inf = self.new_label();
        let qnan = self.new_label();
        let input_is_nan = self.new_label();
        let input_is_zero = self.new_label();
        let input_out_of_range = self.new_label();

        self.emit_pool(c0, &[0x3d74552f]);
        self.emit_pool(c14, &[0xbeee7397, 0x3fbd96dd, 0xc02153f6, 0x4038d96c]);
        self.emit_pool(neg_inf, &[0xff800000; 4]);
        self.emit_pool(qnan, &[0x7fc00000; 4]);

        // Cold handlers; the integer flags from the x <= 0 compare are
        // still live on entry.
        self.ops.align(4, 0);
        self.bind_label(input_out_of_range);
        dynasm!(self.ops
            ; .arch aarch64
            ; b.eq =>input_is_zero
            ; adr x4, =>qnan
            ; ldr q1, [x4]
            ; ret
            ; =>input_is_zero
            ; adr x4, =>neg_inf
            ; ldr q1, [x4]
            ; ret
        );

        self.bind_label(subroutine);
        dynasm!(self.ops
            ; .arch aarch64
            // NaN propagates untouched.
            ; fcmeq s0, s1, s1
            ; umov w4, v0.s[0]
            ; cmp w4, #0
            ; b.eq =>input_is_nan
            // x <= 0.0, compared on the raw bits: +0.0 is zero, negatives
            // are negative integers.
            ; umov w4, v1.s[0]
            ; cmp w4, #0
            ; b.le =>input_out_of_range
            // Split into mantissa m in [1, 2) and unbiased exponent e.
            ; mov w5, w4
            ; and w4, w4, #0x7f800000
            ; and w5, w5, #0x007fffff
            ; orr w5, w5, #0x3f800000
            ; ins v1.s[0], w5
            ; lsr w4, w4, #23
            ; sub w4, w4, #0x7f
            ; ins v4.s[0], w4
            ; scvtf s4, s4
            // p(m) = ((((c0*m + c1)*m + c2)*m + c3)*m + c4) * (m - 1)
            ; adr x4, =>c0
            ; ldr s0, [x4]
            ; adr x4, =>c14
            ; ldr q2, [x4]
            ; fmul s0, s0, s1
            ; fmla s0, s14, v2.s[0]
            ; fmul s0, s0, s1
            ; fmla s0, s14, v2.s[1]
            ; fmul s0, s0, s1
            ; fmla s0, s14, v2.s[2]
            ; fmul s0, s0, s1
            ; fsub s1, s1, s14
            ; fmla s0, s14, v2.s[3]
            ; fmul s0, s0, s1
            ; fadd s4, s0, s4
            ; ins v1.s[0], v4.s[0]
            ; =>input_is_nan
            ; dup v1.s4, v1.s[0]
            ; ret
        );

        subroutine
    }

    /// exp2(x) on lane 0 of q1, broadcast to all lanes on exit.
    ///
    /// Range-reduces x into [-0.5, 0.5) around the nearest integer n; 2^n
    /// is assembled directly in the exponent field and multiplied by a
    /// degree-4 minimax polynomial for the fraction. NaN propagates.
    pub fn emit_exp2_prelude(&mut self) -> DynamicLabel {
        let subroutine = self.new_label();
        let input_max = self.new_label();
        let input_min = self.new_label();
        let c0 = self.new_label();
        let half = self.new_label();
        let c1 = self.new_label();
        let c2 = self.new_label();
        let c3 = self.new_label();
        let c4 = self.new_label();
        let ret_label = self.new_label();

        self.emit_pool(input_max, &[0x43010000]);
        self.emit_pool(input_min, &[0xc2fdffff]);
        self.emit_pool(c0, &[0x3c5dbe69]);
        self.emit_pool(half, &[0x3f000000]);
        self.emit_pool(c1, &[0x3d5509f9]);
        self.emit_pool(c2, &[0x3e773cc5]);
        self.emit_pool(c3, &[0x3f3168b3]);
        self.emit_pool(c4, &[0x3f800016]);

        self.ops.align(4, 0);
        self.bind_label(subroutine);
        dynasm!(self.ops
            ; .arch aarch64
            ; fcmp s1, s1
            ; b.ne =>ret_label
            // Clamp so the integer part fits the exponent field.
            ; adr x4, =>input_max
            ; ldr s0, [x4]
            ; fmin s1, s1, s0
            ; adr x4, =>input_min
            ; ldr s0, [x4]
            ; fmax s1, s1, s0
            // n = round-to-nearest(x - 0.5); f = x - n in [-0.5, 0.5)
            ; adr x4, =>half
            ; ldr s0, [x4]
            ; fsub s0, s1, s0
            ; fcvtns s0, s0
            ; umov w4, v0.s[0]
            ; scvtf s0, w4
            ; add w4, w4, #0x7f
            ; fsub s1, s1, s0
            ; lsl w4, w4, #23
            ; ins v0.s[0], w4
            // p(f) = (((c0*f + c1)*f + c2)*f + c3)*f + c4
            ; adr x5, =>c0
            ; ldr s4, [x5]
            ; fmul s4, s1, s4
            ; adr x5, =>c1
            ; ldr s15, [x5]
            ; fadd s4, s4, s15
            ; fmul s4, s4, s1
            ; adr x5, =>c2
            ; ldr s15, [x5]
            ; fadd s4, s4, s15
            ; fmul s4, s4, s1
            ; adr x5, =>c3
            ; ldr s15, [x5]
            ; fadd s4, s4, s15
            ; fmul s1, s4, s1
            ; adr x5, =>c4
            ; ldr s15, [x5]
            ; fadd s1, s15, s1
            // Scale by 2^n.
            ; fmul s1, s1, s0
            ; =>ret_label
            ; dup v1.s4, v1.s[0]
            ; ret
        );

        subroutine
    }
}
