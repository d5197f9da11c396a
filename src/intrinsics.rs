//! Host functions invoked from generated code via far calls.
//!
//! Each takes pointer-sized arguments only; the emitter brackets every call
//! site with a push/pop of the pinned registers a C callee may clobber.

use core::ffi::{c_char, CStr};

use crate::context::{GsEmitter, Vec4};

pub static EXECUTE_EMIT_ON_VS: &CStr = c"Execute EMIT on VS";
pub static EXECUTE_SETEMIT_ON_VS: &CStr = c"Execute SETEMIT on VS";

/// Log a critical diagnostic from compiled code.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pica_log_critical(msg: *const c_char) {
    let msg = unsafe { CStr::from_ptr(msg) };
    log::error!("{}", msg.to_string_lossy());
}

/// Geometry-shader output sink: copy the unit's output registers into the
/// emitter's vertex buffer at the slot selected by the last SETEMIT.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pica_gs_emit(emitter: *mut GsEmitter, output: *const [Vec4; 16]) {
    let emitter = unsafe { &mut *emitter };
    let output = unsafe { &*output };
    let slot = (emitter.vertex_id as usize).min(emitter.buffer.len() - 1);
    emitter.buffer[slot] = *output;
}
