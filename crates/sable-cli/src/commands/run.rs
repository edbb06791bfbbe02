//! `sable run` — compile and execute a script without the debugger.

use crate::commands::{compile_script, unit_name};
use anyhow::{anyhow, Context, Result};
use sable_engine::compiler::CompileOptions;
use sable_engine::vm::ModuleIsolate;
use std::path::Path;

pub fn execute(file: &Path) -> Result<()> {
    let unit = unit_name(file);
    let options = CompileOptions::plain(&unit, file.display().to_string());
    let module = compile_script(file, &options)?;

    let isolate = ModuleIsolate::load(unit.clone(), module);
    let entry = isolate
        .entry(&format!("{}.main", unit))
        .context("script must define 'function main()'")?;
    entry
        .invoke(&[])
        .map_err(|e| anyhow!("runtime error: {}", e))?;
    Ok(())
}
