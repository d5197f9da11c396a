//! Runtime state shared between the host and JIT-compiled shader code.
//!
//! Everything here is `#[repr(C)]` so field offsets are stable and can be
//! baked into generated loads/stores as immediates.

/// Maximum number of 32-bit instruction words in a shader program.
pub const MAX_PROGRAM_CODE_LENGTH: usize = 4096;
/// Maximum number of 32-bit swizzle-pattern words.
pub const MAX_SWIZZLE_DATA_LENGTH: usize = 4096;
/// Upper bound on the generated code size for one compiled shader. Sized
/// for the worst case: a MADI whose three sources all need the swizzle
/// table, relative addressing and negation runs to a few hundred bytes.
pub const MAX_SHADER_SIZE: usize = MAX_PROGRAM_CODE_LENGTH * 512;

pub type ProgramCode = [u32; MAX_PROGRAM_CODE_LENGTH];
pub type SwizzleData = [u32; MAX_SWIZZLE_DATA_LENGTH];

/// One shader register: four f32 lanes. The hardware stores these as 24-bit
/// floats externally; the host transcodes at the boundary and compiled code
/// only ever touches whole 32-bit lanes.
pub type Vec4 = [f32; 4];

/// Constant shader inputs, read-only to compiled code.
///
/// An integer uniform packs `[count, start, increment, pad]` bytes; boolean
/// uniforms are one byte each (0 or 1).
#[repr(C)]
pub struct Uniforms {
    pub f: [Vec4; 96],
    pub b: [u8; 16],
    pub i: [[u8; 4]; 4],
}

impl Default for Uniforms {
    fn default() -> Self {
        Uniforms {
            f: [[0.0; 4]; 96],
            b: [0; 16],
            i: [[0; 4]; 4],
        }
    }
}

/// The register files of one shader unit.
#[repr(C)]
pub struct Registers {
    pub input: [Vec4; 16],
    pub temporary: [Vec4; 16],
    pub output: [Vec4; 16],
}

/// Mutable per-invocation state of one shader unit.
///
/// Compiled code caches `conditional_code` and `address_registers` in host
/// registers for the duration of a run and writes them back at `END`.
/// `emitter_ptr` is null for vertex shaders; geometry shaders point it at a
/// live [`GsEmitter`] before running.
#[repr(C)]
pub struct UnitState {
    pub registers: Registers,
    pub conditional_code: [u8; 2],
    /// Two MOVA-set address offsets plus the loop counter (aL).
    pub address_registers: [i32; 3],
    pub emitter_ptr: *mut GsEmitter,
}

impl Default for UnitState {
    fn default() -> Self {
        UnitState {
            registers: Registers {
                input: [[0.0; 4]; 16],
                temporary: [[0.0; 4]; 16],
                output: [[0.0; 4]; 16],
            },
            conditional_code: [0; 2],
            address_registers: [0; 3],
            emitter_ptr: core::ptr::null_mut(),
        }
    }
}

/// Geometry-shader output sink. `SETE` stores the three control bytes;
/// `EMIT` copies the unit's output registers into `buffer[vertex_id]`.
#[repr(C)]
pub struct GsEmitter {
    pub buffer: [[Vec4; 16]; 3],
    pub vertex_id: u8,
    pub prim_emit: u8,
    pub winding: u8,
    pub output_mask: u32,
}

impl Default for GsEmitter {
    fn default() -> Self {
        GsEmitter {
            buffer: [[[0.0; 4]; 16]; 3],
            vertex_id: 0,
            prim_emit: 0,
            winding: 0,
            output_mask: 0,
        }
    }
}

/// Everything needed to compile and run one shader.
pub struct ShaderSetup {
    pub uniforms: Uniforms,
    pub program_code: ProgramCode,
    pub swizzle_data: SwizzleData,
}

impl Default for ShaderSetup {
    fn default() -> Self {
        ShaderSetup {
            uniforms: Uniforms::default(),
            program_code: [0; MAX_PROGRAM_CODE_LENGTH],
            swizzle_data: [0; MAX_SWIZZLE_DATA_LENGTH],
        }
    }
}

// Field offset constants for use from JIT code.
pub const UNIFORMS_F: u32 = core::mem::offset_of!(Uniforms, f) as u32;
pub const UNIFORMS_B: u32 = core::mem::offset_of!(Uniforms, b) as u32;
pub const UNIFORMS_I: u32 = core::mem::offset_of!(Uniforms, i) as u32;

pub const STATE_INPUT: u32 = core::mem::offset_of!(UnitState, registers.input) as u32;
pub const STATE_TEMPORARY: u32 = core::mem::offset_of!(UnitState, registers.temporary) as u32;
pub const STATE_OUTPUT: u32 = core::mem::offset_of!(UnitState, registers.output) as u32;
pub const STATE_COND: u32 = core::mem::offset_of!(UnitState, conditional_code) as u32;
pub const STATE_ADDR: u32 = core::mem::offset_of!(UnitState, address_registers) as u32;
pub const STATE_EMITTER_PTR: u32 = core::mem::offset_of!(UnitState, emitter_ptr) as u32;

pub const GS_VERTEX_ID: u32 = core::mem::offset_of!(GsEmitter, vertex_id) as u32;
pub const GS_PRIM_EMIT: u32 = core::mem::offset_of!(GsEmitter, prim_emit) as u32;
pub const GS_WINDING: u32 = core::mem::offset_of!(GsEmitter, winding) as u32;

pub const fn input_offset(index: u32) -> u32 {
    STATE_INPUT + index * 16
}

pub const fn temporary_offset(index: u32) -> u32 {
    STATE_TEMPORARY + index * 16
}

pub const fn output_offset(index: u32) -> u32 {
    STATE_OUTPUT + index * 16
}

pub const fn float_uniform_offset(index: u32) -> u32 {
    UNIFORMS_F + index * 16
}

pub const fn bool_uniform_offset(index: u32) -> u32 {
    UNIFORMS_B + index
}

pub const fn int_uniform_offset(index: u32) -> u32 {
    UNIFORMS_I + index * 4
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_files_are_vector_aligned() {
        // Emitted `ldr q` immediates require 16-byte multiples.
        assert_eq!(STATE_INPUT % 16, 0);
        assert_eq!(STATE_TEMPORARY % 16, 0);
        assert_eq!(STATE_OUTPUT % 16, 0);
        assert_eq!(UNIFORMS_F % 16, 0);
        assert_eq!(STATE_TEMPORARY - STATE_INPUT, 16 * 16);
        assert_eq!(STATE_OUTPUT - STATE_TEMPORARY, 16 * 16);
    }

    #[test]
    fn scalar_state_offsets() {
        assert_eq!(STATE_COND, 768);
        assert_eq!(STATE_ADDR % 4, 0);
        assert_eq!(bool_uniform_offset(3), UNIFORMS_B + 3);
        assert_eq!(int_uniform_offset(2), UNIFORMS_I + 8);
        assert_eq!(float_uniform_offset(95), 95 * 16);
    }
}
