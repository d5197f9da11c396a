//! A just-in-time compiler for the PICA200 vertex/geometry shader ISA,
//! targeting AArch64.
//!
//! Shader programs are streams of 32-bit instruction words operating on
//! 4-lane f32 registers, with a separate table of swizzle patterns. The
//! compiler lowers the whole program into one executable buffer, pinning the
//! unit's hot state (uniform/state pointers, address registers, loop and
//! condition state, a splat of 1.0) in host registers for the duration of a
//! run; see `arch::aarch64` for the convention.
//!
//! ```no_run
//! use picajit::{JitShader, ShaderSetup, UnitState};
//!
//! let mut setup = ShaderSetup::default();
//! setup.program_code[0] = 0x22 << 26; // END
//! let mut jit = JitShader::new();
//! jit.compile(&setup.program_code, &setup.swizzle_data);
//! let mut state = UnitState::default();
//! jit.run(&setup, &mut state, 0);
//! ```

pub mod arch;
pub mod bytecode;
pub mod compiler;
pub mod context;
pub mod intrinsics;
pub mod jit_debug;


pub use compiler::CompiledShader;
pub use context::{
    GsEmitter, ProgramCode, ShaderSetup, SwizzleData, UnitState, Uniforms,
    MAX_PROGRAM_CODE_LENGTH, MAX_SHADER_SIZE, MAX_SWIZZLE_DATA_LENGTH,
};

/// A shader JIT instance. Each `compile` replaces the previously compiled
/// program; `run` executes the current one.
#[derive(Default)]
pub struct JitShader {
    compiled: Option<CompiledShader>,
}

impl JitShader {
    pub fn new() -> Self {
        JitShader { compiled: None }
    }

    /// Compile `program_code` against `swizzle_data` into fresh executable
    /// memory. The inputs are only borrowed for the duration of the call.
    pub fn compile(&mut self, program_code: &ProgramCode, swizzle_data: &SwizzleData) {
        self.compiled = Some(compiler::compile_shader(program_code, swizzle_data));
    }

    /// Execute the compiled shader starting at instruction `entry_pc`,
    /// reading `setup.uniforms` and mutating `state`.
    ///
    /// Panics if `compile` has not been called. If `state.emitter_ptr` is
    /// non-null it must point at a live [`GsEmitter`].
    pub fn run(&self, setup: &ShaderSetup, state: &mut UnitState, entry_pc: u32) {
        let compiled = self.compiled.as_ref().expect("run called before compile");
        compiled.run(&setup.uniforms, state, entry_pc as usize);
    }

    /// The current compiled shader, if any.
    pub fn compiled(&self) -> Option<&CompiledShader> {
        self.compiled.as_ref()
    }

    /// Append this instance's code regions to the process perf map so
    /// sampling profilers can attribute time spent in generated code.
    pub fn register_perf_symbols(&self) -> std::io::Result<()> {
        let Some(compiled) = self.compiled.as_ref() else {
            return Ok(());
        };
        let code = compiled.code();
        let entry = compiled.entry_offset();
        let symbols = [
            jit_debug::JitSymbolEntry {
                name: "picajit::transcendental_preludes".into(),
                offset: 0,
                size: entry,
            },
            jit_debug::JitSymbolEntry {
                name: "picajit::shader_main".into(),
                offset: entry,
                size: code.len() - entry,
            },
        ];
        jit_debug::write_perf_map(code.as_ptr(), &symbols)
    }
}
