//! Sable Language Engine
//!
//! This crate provides the complete Sable toolchain used by the debugger:
//! - **Parser**: lexer, parser, and name resolution (`parser` module)
//! - **Compiler**: compile facade, diagnostics, folding, emission (`compiler` module)
//! - **Rewriter**: statement instrumentation and checkpoint maps (`rewriter` module)
//! - **VM**: values, interpreter, module isolates, host binding (`vm` module)
//! - **Debug**: debugger engine and expression evaluator (`debug` module)
//!
//! # Example
//!
//! ```rust,ignore
//! use sable_engine::compiler::{compile, CompileOptions};
//! use sable_engine::debug::DebugEngine;
//! use sable_engine::vm::{install_host, ModuleIsolate};
//!
//! let source = r#"
//!     function main() {
//!         let x = 41;
//!         print(x + 1);
//!     }
//! "#;
//!
//! // Compile with instrumentation
//! let module = compile(source, &CompileOptions::script("demo", "demo.sbl")).unwrap();
//! let maps = module.maps.clone().unwrap();
//!
//! // Wire the engine in as the process-wide debug host
//! let (engine, pauses) = DebugEngine::new(maps);
//! engine.add_breakpoint(2);
//! install_host(engine.clone());
//!
//! // Run the script on its own thread; consume pause events from `pauses`.
//! let isolate = ModuleIsolate::load("demo", module);
//! let entry = isolate.entry("demo.main").unwrap();
//! std::thread::spawn(move || entry.invoke(&[]));
//! ```

#![warn(rust_2018_idioms)]

/// Parser module: lexer, parser, AST, and name resolution
pub mod parser;

/// Compiler module: facade, diagnostics, folding, and emission
pub mod compiler;

/// Rewriter module: statement instrumentation and checkpoint maps
pub mod rewriter;

/// VM module: values, interpreter, isolates, and the debug-host binding
pub mod vm;

/// Debug module: debugger engine and expression evaluator
pub mod debug;

pub use compiler::{compile, CompileError, CompileOptions, CompiledModule, OptLevel};
pub use debug::{DebugEngine, EvalError, ExpressionEvaluator, PauseEvent, ResumeMode};
pub use rewriter::{CheckpointId, InstrumentationMaps, SourceLoc};
pub use vm::{
    clear_host, install_host, DebugHost, EntryHandle, LoadError, ModuleIsolate, RuntimeError,
    Value,
};
