//! CLI command implementations.

pub mod debug;
pub mod eval_server;
pub mod run;

use anyhow::{bail, Context, Result};
use sable_engine::compiler::{compile, diagnostics, CompileError, CompileOptions, CompiledModule};
use std::path::Path;

/// Unit name derived from the script file stem.
pub fn unit_name(file: &Path) -> String {
    file.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "script".to_string())
}

/// Read and compile a script, rendering diagnostics to stderr on failure.
pub fn compile_script(file: &Path, options: &CompileOptions) -> Result<CompiledModule> {
    let source = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;
    match compile(&source, options) {
        Ok(module) => Ok(module),
        Err(CompileError::Diagnostics(diags)) => {
            diagnostics::emit_stderr(&options.file_path, &source, &diags);
            bail!("compilation failed with {} error(s)", diags.len());
        }
        Err(other) => Err(other.into()),
    }
}

/// Parse a `<file>:<line>` argument.
pub fn parse_file_line(arg: &str) -> Option<(&str, u32)> {
    let (file, line) = arg.rsplit_once(':')?;
    let line = line.parse().ok()?;
    if file.is_empty() {
        return None;
    }
    Some((file, line))
}
