//! Source compiler facade.
//!
//! Drives the pipeline lex → parse → resolve → (fold | rewrite) and yields a
//! [`CompiledModule`] ready to load into a module isolate. Instrumented
//! script compiles run at debug optimization so line mappings stay stable;
//! expression-evaluator compiles run at release optimization with constant
//! folding.

pub mod diagnostics;
mod emit;
mod fold;

pub use emit::{print_program, serialize_maps, EmittedModule};
pub use fold::fold_program;

use crate::parser::ast::{FunctionDecl, Item, Program};
use crate::parser::{resolve, Diagnostic, Parser};
use crate::rewriter::{rewrite, InstrumentationMaps, RewriteError};
use rustc_hash::FxHashMap;
use std::sync::Arc;
use thiserror::Error;

/// Optimization level for a compile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptLevel {
    /// No transformations beyond instrumentation; line mappings stay exact.
    Debug,
    /// Constant folding enabled.
    Release,
}

/// Per-compile configuration.
#[derive(Debug, Clone)]
pub struct CompileOptions {
    /// Unit name used as the qualification prefix for every method.
    pub unit_name: String,
    /// Path recorded in checkpoint maps and diagnostics.
    pub file_path: String,
    pub opt_level: OptLevel,
    /// Run the instrumenting rewriter and attach its maps.
    pub instrument: bool,
}

impl CompileOptions {
    /// A script compile under the debugger: debug opt, instrumented.
    pub fn script(unit_name: impl Into<String>, file_path: impl Into<String>) -> Self {
        Self {
            unit_name: unit_name.into(),
            file_path: file_path.into(),
            opt_level: OptLevel::Debug,
            instrument: true,
        }
    }

    /// A plain (non-debugged) script compile: release opt, no tracing.
    pub fn plain(unit_name: impl Into<String>, file_path: impl Into<String>) -> Self {
        Self {
            unit_name: unit_name.into(),
            file_path: file_path.into(),
            opt_level: OptLevel::Release,
            instrument: false,
        }
    }

    /// An expression-evaluator module compile: release opt, no tracing.
    pub fn expression(unit_name: impl Into<String>) -> Self {
        Self {
            unit_name: unit_name.into(),
            file_path: "<eval>".to_string(),
            opt_level: OptLevel::Release,
            instrument: false,
        }
    }
}

/// Compile failure carrying every diagnostic found.
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("compile failed: {}", diagnostics::summarize(.0))]
    Diagnostics(Vec<Diagnostic>),
    #[error(transparent)]
    Rewrite(#[from] RewriteError),
}

impl CompileError {
    /// The underlying diagnostics, if this failure carries any.
    pub fn diagnostics(&self) -> &[Diagnostic] {
        match self {
            CompileError::Diagnostics(d) => d,
            CompileError::Rewrite(_) => &[],
        }
    }
}

/// A compiled, loadable unit.
#[derive(Debug)]
pub struct CompiledModule {
    pub unit_name: String,
    pub file_path: String,
    pub program: Arc<Program>,
    /// Qualified name → declaration, for call dispatch and entry lookup.
    pub functions: FxHashMap<String, Arc<FunctionDecl>>,
    /// Present when the unit was compiled with instrumentation.
    pub maps: Option<Arc<InstrumentationMaps>>,
    /// Original source, kept for diagnostics rendering.
    pub source: String,
}

impl CompiledModule {
    /// Emit the artifact pair: (possibly instrumented) source text plus the
    /// serialized checkpoint map when one exists.
    pub fn emit(&self) -> EmittedModule {
        EmittedModule {
            unit_name: self.unit_name.clone(),
            source: print_program(&self.program),
            debug_map: self.maps.as_deref().map(serialize_maps),
        }
    }
}

/// Compile a source unit.
pub fn compile(source: &str, options: &CompileOptions) -> Result<CompiledModule, CompileError> {
    let (mut program, mut diags) = Parser::parse_source(source);
    if diags.is_empty() {
        diags.extend(resolve(&program));
    }
    if !diags.is_empty() {
        return Err(CompileError::Diagnostics(diags));
    }

    if options.opt_level == OptLevel::Release {
        fold_program(&mut program);
    }

    let maps = if options.instrument {
        let output = rewrite(&program, &options.unit_name, &options.file_path)?;
        program = output.program;
        Some(Arc::new(output.maps))
    } else {
        None
    };

    tracing::debug!(
        unit = %options.unit_name,
        instrumented = options.instrument,
        checkpoints = maps.as_ref().map(|m| m.checkpoints.len()).unwrap_or(0),
        "compiled unit"
    );

    let functions = index_functions(&program, &options.unit_name);
    Ok(CompiledModule {
        unit_name: options.unit_name.clone(),
        file_path: options.file_path.clone(),
        program: Arc::new(program),
        functions,
        maps,
        source: source.to_string(),
    })
}

fn index_functions(program: &Program, unit: &str) -> FxHashMap<String, Arc<FunctionDecl>> {
    let mut functions = FxHashMap::default();
    for item in &program.items {
        match item {
            Item::Function(f) => {
                functions.insert(format!("{}.{}", unit, f.name.name), Arc::new(f.clone()));
            }
            Item::Class(c) => {
                for m in &c.methods {
                    functions.insert(
                        format!("{}.{}.{}", unit, c.name.name, m.name.name),
                        Arc::new(m.clone()),
                    );
                }
            }
        }
    }
    functions
}
