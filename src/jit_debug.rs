//! Profiler integration for JIT-compiled shaders.
//!
//! Sampling profilers resolve addresses in anonymous executable mappings
//! through `/tmp/perf-<pid>.map`; one line per symbol:
//! `<start-addr> <size> <name>`, all hex except the name.

use std::io::Write;

/// A symbol entry covering one region of a code buffer.
pub struct JitSymbolEntry {
    pub name: String,
    pub offset: usize,
    pub size: usize,
}

/// Append `symbols` (relative to `buf_base`) to this process's perf map.
pub fn write_perf_map(buf_base: *const u8, symbols: &[JitSymbolEntry]) -> std::io::Result<()> {
    let path = format!("/tmp/perf-{}.map", std::process::id());
    let mut f = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)?;
    for sym in symbols {
        let addr = buf_base as usize + sym.offset;
        writeln!(f, "{addr:x} {:x} {}", sym.size, sym.name)?;
    }
    Ok(())
}
