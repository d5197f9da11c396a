//! End-to-end tests: compile small shader programs and execute them.
//!
//! These run the generated machine code, so the whole file is gated on
//! AArch64 hosts; emission-only coverage lives in the crate's unit tests.
#![cfg(target_arch = "aarch64")]

use picajit::{GsEmitter, JitShader, ShaderSetup, UnitState};
use pretty_assertions::assert_eq;

const IDENTITY: u32 = 0x1b;
const END: u32 = 0x22 << 26;
const NOP: u32 = 0x21 << 26;

// Compare-op encodings.
const EQ: u32 = 0;
const NE: u32 = 1;
const GT: u32 = 4;

// Flow-condition combiners.
const JUST_X: u32 = 2;

// Source register encodings.
fn vreg(i: u32) -> u32 {
    i
}
fn treg(i: u32) -> u32 {
    0x10 + i
}
fn creg(i: u32) -> u32 {
    0x20 + i
}

// Destination register encodings.
fn oreg(i: u32) -> u32 {
    i
}
fn tdest(i: u32) -> u32 {
    0x10 + i
}

fn op(opcode: u32, dest: u32, src1: u32, src2: u32, desc: u32) -> u32 {
    (opcode << 26) | (dest << 21) | (src1 << 12) | (src2 << 7) | desc
}

fn op_idx(opcode: u32, dest: u32, src1: u32, addr_idx: u32, src2: u32, desc: u32) -> u32 {
    op(opcode, dest, src1, src2, desc) | (addr_idx << 19)
}

fn mad(dest: u32, src1: u32, src2: u32, src3: u32, desc: u32) -> u32 {
    (0x38 << 26) | (dest << 24) | (src1 << 17) | (src2 << 10) | (src3 << 5) | desc
}

/// Inverted ("i") common format: the wide, uniform-capable field moves to
/// the second operand and the first narrows to five bits.
fn op_inv(opcode: u32, dest: u32, src1i: u32, src2i: u32, desc: u32) -> u32 {
    (opcode << 26) | (dest << 21) | (src1i << 14) | (src2i << 7) | desc
}

/// MADI: the wide field is the third operand, the second narrows.
fn madi(dest: u32, src1: u32, src2i: u32, src3i: u32, desc: u32) -> u32 {
    (0x30 << 26) | (dest << 24) | (src1 << 17) | (src2i << 12) | (src3i << 5) | desc
}

fn madi_idx(dest: u32, src1: u32, src2i: u32, src3i: u32, addr_idx: u32, desc: u32) -> u32 {
    madi(dest, src1, src2i, src3i, desc) | (addr_idx << 22)
}

fn flow(opcode: u32, dest_offset: u32, num: u32) -> u32 {
    (opcode << 26) | (dest_offset << 10) | num
}

fn flow_cond(opcode: u32, dest_offset: u32, num: u32, cond_op: u32, refx: u32, refy: u32) -> u32 {
    flow(opcode, dest_offset, num) | (cond_op << 22) | (refy << 24) | (refx << 25)
}

fn flow_bool(opcode: u32, dest_offset: u32, num: u32, bool_id: u32) -> u32 {
    flow(opcode, dest_offset, num) | (bool_id << 22)
}

fn cmp(src1: u32, src2: u32, op_x: u32, op_y: u32, desc: u32) -> u32 {
    (0x2e << 26) | (op_x << 24) | (op_y << 21) | (src1 << 12) | (src2 << 7) | desc
}

fn mova(src1: u32, desc: u32) -> u32 {
    (0x12 << 26) | (src1 << 12) | desc
}

fn setemit(vertex_id: u32, prim_emit: u32, winding: u32) -> u32 {
    (0x2b << 26) | (vertex_id << 24) | (prim_emit << 23) | (winding << 22)
}

/// Build a swizzle word: write mask, then selector/negate for src1/src2.
fn sw(mask: u32, sel1: u32, neg1: bool, sel2: u32, neg2: bool) -> u32 {
    mask | (neg1 as u32) << 4
        | (sel1 << 5)
        | (neg2 as u32) << 13
        | (sel2 << 14)
        | (IDENTITY << 23)
}

fn sw_identity(mask: u32) -> u32 {
    sw(mask, IDENTITY, false, IDENTITY, false)
}

fn compile(program: &[u32], swizzles: &[u32]) -> (JitShader, ShaderSetup) {
    let mut setup = ShaderSetup::default();
    setup.swizzle_data[0] = sw_identity(0xf);
    for (i, &word) in swizzles.iter().enumerate() {
        setup.swizzle_data[i] = word;
    }
    setup.program_code[..program.len()].copy_from_slice(program);
    let mut jit = JitShader::new();
    jit.compile(&setup.program_code, &setup.swizzle_data);
    (jit, setup)
}

fn assert_rel(actual: f32, expected: f32, tol: f32) {
    let err = (actual - expected).abs() / expected.abs().max(f32::MIN_POSITIVE);
    assert!(
        err <= tol,
        "expected ~{expected}, got {actual} (rel err {err:e})"
    );
}

#[test]
fn add_produces_positive_zero() {
    let (jit, setup) = compile(&[op(0x00, oreg(0), vreg(0), vreg(1), 0), END], &[]);
    let mut state = UnitState::default();
    state.registers.input[0] = [1.0, 2.0, 0.5, -4.0];
    state.registers.input[1] = [-1.0, 1.0, 0.5, 4.0];
    jit.run(&setup, &mut state, 0);
    assert_eq!(state.registers.output[0], [0.0, 3.0, 1.0, 0.0]);
    assert_eq!(state.registers.output[0][0].to_bits(), 0);
}

#[test]
fn dp4_broadcasts_the_sum() {
    let (jit, setup) = compile(&[op(0x02, oreg(0), vreg(0), vreg(1), 0), END], &[]);
    let mut state = UnitState::default();
    state.registers.input[0] = [1.0, 1.0, 1.0, 1.0];
    state.registers.input[1] = [1.0, 1.0, 1.0, 1.0];
    jit.run(&setup, &mut state, 0);
    assert_eq!(state.registers.output[0], [4.0, 4.0, 4.0, 4.0]);
}

#[test]
fn dp3_ignores_w_dph_inserts_one() {
    let (jit, setup) = compile(
        &[
            op(0x01, oreg(0), vreg(0), vreg(1), 0),
            op(0x03, oreg(1), vreg(0), vreg(1), 0),
            END,
        ],
        &[],
    );
    let mut state = UnitState::default();
    state.registers.input[0] = [1.0, 2.0, 3.0, 999.0];
    state.registers.input[1] = [4.0, 5.0, 6.0, 7.0];
    jit.run(&setup, &mut state, 0);
    assert_eq!(state.registers.output[0], [32.0; 4]);
    assert_eq!(state.registers.output[1], [39.0; 4]);
}

#[test]
fn sanitized_mul_zero_times_infinity() {
    let (jit, setup) = compile(&[op(0x08, oreg(0), vreg(0), vreg(1), 0), END], &[]);
    let mut state = UnitState::default();
    state.registers.input[0] = [f32::INFINITY, f32::NAN, f32::INFINITY, 2.0];
    state.registers.input[1] = [0.0, 0.0, f32::INFINITY, 3.0];
    jit.run(&setup, &mut state, 0);
    let out = state.registers.output[0];
    assert_eq!(out[0], 0.0);
    assert!(out[1].is_nan());
    assert_eq!(out[2], f32::INFINITY);
    assert_eq!(out[3], 6.0);
}

#[test]
fn mad_multiplies_then_accumulates() {
    let (jit, setup) = compile(&[mad(oreg(0), vreg(0), vreg(1), vreg(2), 0), END], &[]);
    let mut state = UnitState::default();
    state.registers.input[0] = [2.0, 3.0, 4.0, 5.0];
    state.registers.input[1] = [10.0, 10.0, 10.0, 10.0];
    state.registers.input[2] = [1.0, 1.0, 1.0, 1.0];
    jit.run(&setup, &mut state, 0);
    assert_eq!(state.registers.output[0], [21.0, 31.0, 41.0, 51.0]);
}

#[test]
fn dphi_reads_the_uniform_through_the_wide_second_operand() {
    // c5 does not fit the non-inverted format's 5-bit src2 field.
    let (jit, mut setup) = compile(&[op_inv(0x18, oreg(0), vreg(0), creg(5), 0), END], &[]);
    setup.uniforms.f[5] = [4.0, 5.0, 6.0, 7.0];
    let mut state = UnitState::default();
    state.registers.input[0] = [1.0, 2.0, 3.0, 999.0];
    jit.run(&setup, &mut state, 0);
    // src1.w reads as 1.0: 4 + 10 + 18 + 7
    assert_eq!(state.registers.output[0], [39.0; 4]);
}

#[test]
fn sgei_and_slti_compare_against_the_wide_second_operand() {
    let (jit, mut setup) = compile(
        &[
            op_inv(0x1a, oreg(0), vreg(0), creg(6), 0), // SGEI
            op_inv(0x1b, oreg(1), vreg(0), creg(6), 0), // SLTI
            END,
        ],
        &[],
    );
    setup.uniforms.f[6] = [2.0, 5.0, 1.0, -1.0];
    let mut state = UnitState::default();
    state.registers.input[0] = [1.0, 5.0, 3.0, 0.0];
    jit.run(&setup, &mut state, 0);
    assert_eq!(state.registers.output[0], [0.0, 1.0, 1.0, 1.0]);
    assert_eq!(state.registers.output[1], [1.0, 0.0, 0.0, 0.0]);
}

#[test]
fn madi_takes_the_addend_from_the_wide_third_operand() {
    let (jit, mut setup) = compile(&[madi(oreg(0), vreg(0), vreg(1), creg(7), 0), END], &[]);
    setup.uniforms.f[7] = [1.0, 2.0, 3.0, 4.0];
    let mut state = UnitState::default();
    state.registers.input[0] = [2.0, 3.0, 4.0, 5.0];
    state.registers.input[1] = [10.0, 10.0, 10.0, 10.0];
    jit.run(&setup, &mut state, 0);
    assert_eq!(state.registers.output[0], [21.0, 32.0, 43.0, 54.0]);
}

#[test]
fn madi_applies_the_address_register_to_the_wide_operand() {
    // MOVA a1 <- v3.y, then MADI o0 <- v0 * v1 + c10[a1].
    let swizzles = [sw_identity(0xf), sw_identity(0b0100)];
    let (jit, mut setup) = compile(
        &[
            mova(vreg(3), 1),
            madi_idx(oreg(0), vreg(0), vreg(1), creg(10), 2, 0),
            END,
        ],
        &swizzles,
    );
    for i in 0..96 {
        setup.uniforms.f[i] = [i as f32, 100.0 + i as f32, 0.0, 1.0];
    }
    let mut state = UnitState::default();
    state.registers.input[0] = [2.0, 3.0, 4.0, 5.0];
    state.registers.input[1] = [10.0, 10.0, 10.0, 10.0];
    state.registers.input[3] = [0.0, 6.0, 0.0, 0.0];
    jit.run(&setup, &mut state, 0);
    // The addend is c16 = f[10 + 6].
    assert_eq!(state.registers.output[0], [36.0, 146.0, 40.0, 51.0]);
}

#[test]
fn mov_applies_swizzle_and_negation() {
    // desc1: reversed lanes; desc2: negated src1.
    let swizzles = [
        sw_identity(0xf),
        sw(0xf, 0xe4, false, IDENTITY, false),
        sw(0xf, IDENTITY, true, IDENTITY, false),
    ];
    let (jit, setup) = compile(
        &[
            op(0x13, oreg(0), vreg(0), 0, 1),
            op(0x13, oreg(1), vreg(0), 0, 2),
            END,
        ],
        &swizzles,
    );
    let mut state = UnitState::default();
    state.registers.input[0] = [1.0, 2.0, 3.0, 4.0];
    jit.run(&setup, &mut state, 0);
    assert_eq!(state.registers.output[0], [4.0, 3.0, 2.0, 1.0]);
    assert_eq!(state.registers.output[1], [-1.0, -2.0, -3.0, -4.0]);
}

#[test]
fn swizzle_followed_by_its_inverse_is_identity() {
    // Rotate left (y,z,w,x), then rotate right (w,x,y,z).
    let rotl = (1 << 6) | (2 << 4) | (3 << 2);
    let rotr = 3 << 6 | (1 << 2) | 2;
    let swizzles = [
        sw_identity(0xf),
        sw(0xf, rotl, false, IDENTITY, false),
        sw(0xf, rotr, false, IDENTITY, false),
    ];
    let (jit, setup) = compile(
        &[
            op(0x13, tdest(0), vreg(0), 0, 1),
            op(0x13, oreg(0), treg(0), 0, 2),
            END,
        ],
        &swizzles,
    );
    let mut state = UnitState::default();
    state.registers.input[0] = [1.0, 2.0, 3.0, 4.0];
    jit.run(&setup, &mut state, 0);
    assert_eq!(state.registers.output[0], [1.0, 2.0, 3.0, 4.0]);
}

#[test]
fn dest_mask_leaves_disabled_lanes_untouched() {
    // Enable x and z only (mask bits 3 and 1).
    let swizzles = [sw_identity(0xf), sw_identity(0b1010)];
    let (jit, setup) = compile(&[op(0x13, oreg(0), vreg(0), 0, 1), END], &swizzles);
    let mut state = UnitState::default();
    state.registers.input[0] = [1.0, 2.0, 3.0, 4.0];
    state.registers.output[0] = [9.0, 9.0, 9.0, 9.0];
    jit.run(&setup, &mut state, 0);
    assert_eq!(state.registers.output[0], [1.0, 9.0, 3.0, 9.0]);
}

#[test]
fn ordered_min_max_prefer_second_operand_on_nan() {
    let (jit, setup) = compile(
        &[
            op(0x0c, oreg(0), vreg(0), vreg(1), 0), // MAX
            op(0x0d, oreg(1), vreg(0), vreg(1), 0), // MIN
            END,
        ],
        &[],
    );
    let mut state = UnitState::default();
    state.registers.input[0] = [f32::NAN, 1.0, 5.0, -2.0];
    state.registers.input[1] = [7.0, f32::NAN, 3.0, -8.0];
    jit.run(&setup, &mut state, 0);
    let max = state.registers.output[0];
    let min = state.registers.output[1];
    // NaN in either slot resolves to the second operand.
    assert_eq!(max[0], 7.0);
    assert!(max[1].is_nan());
    assert_eq!(max[2], 5.0);
    assert_eq!(max[3], -2.0);
    assert_eq!(min[0], 7.0);
    assert!(min[1].is_nan());
    assert_eq!(min[2], 3.0);
    assert_eq!(min[3], -8.0);
}

#[test]
fn sge_and_slt_produce_masks_of_ones() {
    let (jit, setup) = compile(
        &[
            op(0x09, oreg(0), vreg(0), vreg(1), 0), // SGE
            op(0x0a, oreg(1), vreg(0), vreg(1), 0), // SLT
            END,
        ],
        &[],
    );
    let mut state = UnitState::default();
    state.registers.input[0] = [1.0, 5.0, 3.0, 0.0];
    state.registers.input[1] = [2.0, 5.0, 1.0, -1.0];
    jit.run(&setup, &mut state, 0);
    assert_eq!(state.registers.output[0], [0.0, 1.0, 1.0, 1.0]);
    assert_eq!(state.registers.output[1], [1.0, 0.0, 0.0, 0.0]);
}

#[test]
fn flr_rounds_toward_minus_infinity() {
    let (jit, setup) = compile(&[op(0x0b, oreg(0), vreg(0), 0, 0), END], &[]);
    let mut state = UnitState::default();
    state.registers.input[0] = [1.5, -1.5, 2.0, -0.1];
    jit.run(&setup, &mut state, 0);
    assert_eq!(state.registers.output[0], [1.0, -2.0, 2.0, -1.0]);
}

#[test]
fn rcp_and_rsq_are_exact_and_broadcast() {
    let (jit, setup) = compile(
        &[
            op(0x0e, oreg(0), vreg(0), 0, 0),
            op(0x0f, oreg(1), vreg(1), 0, 0),
            END,
        ],
        &[],
    );
    let mut state = UnitState::default();
    state.registers.input[0] = [4.0, 7.0, 8.0, 9.0];
    state.registers.input[1] = [16.0, 7.0, 8.0, 9.0];
    jit.run(&setup, &mut state, 0);
    assert_eq!(state.registers.output[0], [0.25; 4]);
    assert_eq!(state.registers.output[1], [0.25; 4]);
}

#[test]
fn lg2_exact_powers_and_edge_cases() {
    let (jit, setup) = compile(&[op(0x06, oreg(0), vreg(0), 0, 0), END], &[]);
    for (input, expected) in [(64.0f32, 6.0f32), (1.0, 0.0), (0.5, -1.0), (1024.0, 10.0)] {
        let mut state = UnitState::default();
        state.registers.input[0] = [input; 4];
        jit.run(&setup, &mut state, 0);
        assert_eq!(state.registers.output[0], [expected; 4], "lg2({input})");
    }

    let mut state = UnitState::default();
    state.registers.input[0] = [0.0; 4];
    jit.run(&setup, &mut state, 0);
    assert_eq!(state.registers.output[0], [f32::NEG_INFINITY; 4]);

    let mut state = UnitState::default();
    state.registers.input[0] = [-2.0; 4];
    jit.run(&setup, &mut state, 0);
    assert_eq!(state.registers.output[0][0].to_bits(), 0x7fc00000);

    let mut state = UnitState::default();
    state.registers.input[0] = [f32::NAN; 4];
    jit.run(&setup, &mut state, 0);
    assert!(state.registers.output[0][0].is_nan());
}

#[test]
fn ex2_approximates_powers_of_two() {
    let (jit, setup) = compile(&[op(0x05, oreg(0), vreg(0), 0, 0), END], &[]);
    for (input, expected) in [(6.0f32, 64.0f32), (0.0, 1.0), (-1.0, 0.5), (10.0, 1024.0)] {
        let mut state = UnitState::default();
        state.registers.input[0] = [input; 4];
        jit.run(&setup, &mut state, 0);
        let out = state.registers.output[0];
        assert_rel(out[0], expected, 1e-5);
        assert_eq!(out[0].to_bits(), out[3].to_bits(), "broadcast");
    }

    let mut state = UnitState::default();
    state.registers.input[0] = [f32::NAN; 4];
    jit.run(&setup, &mut state, 0);
    assert!(state.registers.output[0][0].is_nan());
}

#[test]
fn ex2_of_lg2_round_trips() {
    let (jit, setup) = compile(
        &[
            op(0x06, tdest(0), vreg(0), 0, 0),
            op(0x05, oreg(0), treg(0), 0, 0),
            END,
        ],
        &[],
    );
    for x in [9.5367431640625e-7f32, 0.037, 0.9, 2.5, 1000.0, 1048576.0] {
        let mut state = UnitState::default();
        state.registers.input[0] = [x; 4];
        jit.run(&setup, &mut state, 0);
        assert_rel(state.registers.output[0][0], x, 1e-4);
    }
}

#[test]
fn address_register_relative_uniform_fetch() {
    // MOVA a0.x <- v0.x, then MOV o0 <- c40[a0.x].
    let swizzles = [sw_identity(0xf), sw_identity(0b1000)];
    let (jit, mut setup) = compile(
        &[
            mova(vreg(0), 1),
            op_idx(0x13, oreg(0), creg(40), 1, 0, 0),
            END,
        ],
        &swizzles,
    );
    for i in 0..96 {
        setup.uniforms.f[i] = [i as f32, 100.0 + i as f32, 0.0, 1.0];
    }

    let cases: &[(f32, [f32; 4])] = &[
        (0.0, setup.uniforms.f[40]),
        (13.0, setup.uniforms.f[53]),
        (50.0, setup.uniforms.f[90]),
        (60.0, [1.0, 1.0, 1.0, 1.0]), // 100 banks out
        (128.0, setup.uniforms.f[40]), // offset out of range, clamps to 0
        (-40.0, setup.uniforms.f[0]),
        (-73.0, setup.uniforms.f[95]), // wraps to 95
    ];
    for &(input, expected) in cases {
        let mut state = UnitState::default();
        state.registers.input[0] = [input, 0.0, 0.0, 0.0];
        jit.run(&setup, &mut state, 0);
        assert_eq!(state.registers.output[0], expected, "a0 = {input}");
    }
}

#[test]
fn loop_iterates_and_steps_the_loop_counter() {
    // i0 = (count 1, start 5, inc 2): two iterations with aL = 5 then 7.
    let (jit, mut setup) = compile(
        &[
            flow(0x29, 1, 0), // LOOP, body is instruction 1
            op_idx(0x00, tdest(0), creg(0), 3, treg(0), 0),
            op(0x13, oreg(0), treg(0), 0, 0),
            END,
        ],
        &[],
    );
    setup.uniforms.i[0] = [1, 5, 2, 0];
    for i in 0..96 {
        setup.uniforms.f[i] = [i as f32, 2.0 * i as f32, 0.0, 0.0];
    }
    let mut state = UnitState::default();
    jit.run(&setup, &mut state, 0);
    // f[5] + f[7]
    assert_eq!(state.registers.output[0], [12.0, 24.0, 0.0, 0.0]);
}

#[test]
fn cmp_then_ifc_selects_the_right_arm() {
    let program = [
        cmp(vreg(0), vreg(1), GT, GT, 0),
        flow_cond(0x28, 3, 1, JUST_X, 1, 0),
        op(0x13, oreg(0), vreg(2), 0, 0), // then
        op(0x13, oreg(0), vreg(3), 0, 0), // else
        END,
    ];
    let (jit, setup) = compile(&program, &[]);

    let mut state = UnitState::default();
    state.registers.input[0] = [2.0; 4];
    state.registers.input[1] = [1.0; 4];
    state.registers.input[2] = [5.0; 4];
    state.registers.input[3] = [6.0; 4];
    jit.run(&setup, &mut state, 0);
    assert_eq!(state.registers.output[0], [5.0; 4]);

    let mut state = UnitState::default();
    state.registers.input[0] = [0.0; 4];
    state.registers.input[1] = [1.0; 4];
    state.registers.input[2] = [5.0; 4];
    state.registers.input[3] = [6.0; 4];
    jit.run(&setup, &mut state, 0);
    assert_eq!(state.registers.output[0], [6.0; 4]);
}

#[test]
fn ifu_branches_on_the_boolean_uniform() {
    let program = [
        flow_bool(0x27, 2, 1, 3),
        op(0x13, oreg(0), vreg(2), 0, 0), // then
        op(0x13, oreg(0), vreg(3), 0, 0), // else
        END,
    ];
    let (jit, mut setup) = compile(&program, &[]);

    for (b, expected) in [(1u8, 5.0f32), (0, 6.0)] {
        setup.uniforms.b[3] = b;
        let mut state = UnitState::default();
        state.registers.input[2] = [5.0; 4];
        state.registers.input[3] = [6.0; 4];
        jit.run(&setup, &mut state, 0);
        assert_eq!(state.registers.output[0], [expected; 4], "b3 = {b}");
    }
}

#[test]
fn call_runs_the_subroutine_and_returns() {
    let program = [
        flow(0x24, 3, 2),                 // CALL [3, 5)
        op(0x13, oreg(0), treg(0), 0, 0), // runs after the call returns
        END,
        op(0x13, tdest(0), vreg(1), 0, 0), // subroutine
        NOP,
        END, // return check fires here before falling through
    ];
    let (jit, setup) = compile(&program, &[]);
    let mut state = UnitState::default();
    state.registers.input[1] = [42.0, 1.0, 2.0, 3.0];
    jit.run(&setup, &mut state, 0);
    assert_eq!(state.registers.output[0], [42.0, 1.0, 2.0, 3.0]);
}

#[test]
fn callc_obeys_the_flow_condition() {
    for (refx, expected) in [(1u32, [42.0f32; 4]), (0, [0.0; 4])] {
        let program = [
            cmp(vreg(0), vreg(0), EQ, EQ, 0), // cond = (1, 1)
            flow_cond(0x25, 4, 1, JUST_X, refx, 0),
            op(0x13, oreg(0), treg(0), 0, 0),
            END,
            op(0x13, tdest(0), vreg(1), 0, 0),
            END,
        ];
        let (jit, setup) = compile(&program, &[]);
        let mut state = UnitState::default();
        state.registers.input[1] = [42.0; 4];
        jit.run(&setup, &mut state, 0);
        assert_eq!(state.registers.output[0], expected, "refx = {refx}");
    }
}

#[test]
fn callu_calls_when_the_uniform_is_clear() {
    let program = [
        flow_bool(0x26, 3, 1, 0),
        op(0x13, oreg(0), treg(0), 0, 0),
        END,
        op(0x13, tdest(0), vreg(1), 0, 0),
        END,
    ];
    let (jit, mut setup) = compile(&program, &[]);

    // The call executes on a clear uniform and is skipped on a set one.
    for (b, expected) in [(0u8, [42.0f32; 4]), (1, [0.0; 4])] {
        setup.uniforms.b[0] = b;
        let mut state = UnitState::default();
        state.registers.input[1] = [42.0; 4];
        jit.run(&setup, &mut state, 0);
        assert_eq!(state.registers.output[0], expected, "b0 = {b}");
    }
}

#[test]
fn jmpc_jumps_when_the_condition_holds() {
    let program = [
        cmp(vreg(0), vreg(1), GT, GT, 0),
        flow_cond(0x2c, 3, 0, JUST_X, 1, 0),
        op(0x13, oreg(0), vreg(2), 0, 0),
        END,
    ];
    let (jit, setup) = compile(&program, &[]);

    let mut state = UnitState::default();
    state.registers.input[0] = [2.0; 4];
    state.registers.input[1] = [1.0; 4];
    state.registers.input[2] = [5.0; 4];
    jit.run(&setup, &mut state, 0);
    assert_eq!(state.registers.output[0], [0.0; 4]); // jumped over the MOV

    let mut state = UnitState::default();
    state.registers.input[0] = [0.0; 4];
    state.registers.input[1] = [1.0; 4];
    state.registers.input[2] = [5.0; 4];
    jit.run(&setup, &mut state, 0);
    assert_eq!(state.registers.output[0], [5.0; 4]);
}

#[test]
fn jmpu_inverts_on_odd_num_instructions() {
    // num_instructions = 1 flips the branch sense: jump when clear.
    let program = [
        flow_bool(0x2d, 2, 1, 0),
        op(0x13, oreg(0), vreg(2), 0, 0),
        END,
    ];
    let (jit, mut setup) = compile(&program, &[]);

    for (b, expected) in [(0u8, [0.0f32; 4]), (1, [5.0; 4])] {
        setup.uniforms.b[0] = b;
        let mut state = UnitState::default();
        state.registers.input[2] = [5.0; 4];
        jit.run(&setup, &mut state, 0);
        assert_eq!(state.registers.output[0], expected, "b0 = {b}");
    }
}

#[test]
fn breakc_leaves_the_loop_early() {
    let program = [
        cmp(vreg(0), vreg(0), EQ, EQ, 0), // cond = (1, 1)
        flow(0x29, 3, 0),                 // LOOP, body [2, 4)
        op(0x00, tdest(0), vreg(1), treg(0), 0),
        flow_cond(0x23, 0, 0, JUST_X, 1, 0), // BREAKC on cond0
        op(0x13, oreg(0), treg(0), 0, 0),
        END,
    ];
    let (jit, mut setup) = compile(&program, &[]);
    setup.uniforms.i[0] = [9, 0, 1, 0]; // ten iterations if never broken
    let mut state = UnitState::default();
    state.registers.input[1] = [3.0; 4];
    jit.run(&setup, &mut state, 0);
    // One ADD ran before the break.
    assert_eq!(state.registers.output[0], [3.0; 4]);
}

#[test]
fn end_persists_condition_and_address_registers() {
    let swizzles = [sw_identity(0xf), sw_identity(0b1100)]; // MOVA x and y
    let program = [
        cmp(vreg(1), vreg(2), EQ, NE, 0),
        mova(vreg(0), 1),
        END,
    ];
    let (jit, setup) = compile(&program, &swizzles);
    let mut state = UnitState::default();
    state.registers.input[0] = [7.9, -3.2, 0.0, 0.0];
    state.registers.input[1] = [1.0, 1.0, 0.0, 0.0];
    state.registers.input[2] = [1.0, 1.0, 0.0, 0.0];
    jit.run(&setup, &mut state, 0);
    assert_eq!(state.address_registers, [7, -3, 0]);
    assert_eq!(state.conditional_code, [1, 0]);
}

#[test]
fn setemit_and_emit_feed_the_geometry_sink() {
    let program = [setemit(1, 1, 1), 0x2a << 26, END];
    let (jit, setup) = compile(&program, &[]);
    let mut emitter = GsEmitter::default();
    let mut state = UnitState::default();
    state.registers.output[0] = [1.0, 2.0, 3.0, 4.0];
    state.emitter_ptr = &mut emitter;
    jit.run(&setup, &mut state, 0);
    assert_eq!(emitter.vertex_id, 1);
    assert_eq!(emitter.prim_emit, 1);
    assert_eq!(emitter.winding, 1);
    assert_eq!(emitter.buffer[1][0], [1.0, 2.0, 3.0, 4.0]);
    assert_eq!(emitter.buffer[0][0], [0.0; 4]);
}

#[test]
fn emit_without_an_emitter_only_logs() {
    let program = [setemit(2, 1, 0), 0x2a << 26, END];
    let (jit, setup) = compile(&program, &[]);
    let mut state = UnitState::default();
    state.registers.output[0] = [1.0, 2.0, 3.0, 4.0];
    jit.run(&setup, &mut state, 0);
    // Execution continues past the disabled emitter paths.
    assert_eq!(state.registers.output[0], [1.0, 2.0, 3.0, 4.0]);
}

#[test]
fn entry_pc_selects_the_first_instruction() {
    let program = [
        op(0x13, oreg(0), vreg(0), 0, 0),
        op(0x13, oreg(1), vreg(0), 0, 0),
        END,
    ];
    let (jit, setup) = compile(&program, &[]);
    let mut state = UnitState::default();
    state.registers.input[0] = [8.0; 4];
    jit.run(&setup, &mut state, 1);
    assert_eq!(state.registers.output[0], [0.0; 4]); // skipped
    assert_eq!(state.registers.output[1], [8.0; 4]);
}
