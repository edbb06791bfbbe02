//! Collectible module isolates.
//!
//! An isolate is a named container owning one loaded module. `unload()`
//! severs the owning reference, which makes the module unreachable from new
//! calls immediately; its memory is reclaimed once every outstanding callable
//! handle drops. Liveness is observable through a weak handle, which is what
//! the evaluator cache uses to verify that evicted entries actually release.

use crate::compiler::{compile, CompileOptions, CompiledModule, EmittedModule};
use crate::rewriter::InstrumentationMaps;
use crate::vm::interpreter::Interpreter;
use crate::vm::{RuntimeResult, Value};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use thiserror::Error;

/// Load/link failures.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("isolate '{0}' has been unloaded")]
    Unloaded(String),

    #[error("entrypoint '{0}' not found")]
    MissingEntry(String),

    #[error("malformed debug info: {0}")]
    DebugInfo(String),

    #[error(transparent)]
    Compile(#[from] crate::compiler::CompileError),
}

/// The unit owned by an isolate while it is loaded.
#[derive(Debug)]
pub struct LoadedModule {
    pub module: Arc<CompiledModule>,
}

/// A named, collectible loader scope. Two isolates loading the same bytes
/// are fully independent.
#[derive(Debug)]
pub struct ModuleIsolate {
    name: String,
    slot: Mutex<Option<Arc<LoadedModule>>>,
}

impl ModuleIsolate {
    /// Load a compiled module into a fresh isolate.
    pub fn load(name: impl Into<String>, module: CompiledModule) -> Arc<Self> {
        let name = name.into();
        tracing::trace!(isolate = %name, unit = %module.unit_name, "isolate loaded");
        Arc::new(Self {
            name,
            slot: Mutex::new(Some(Arc::new(LoadedModule {
                module: Arc::new(module),
            }))),
        })
    }

    /// Load an emitted artifact pair (instrumented source + checkpoint map).
    ///
    /// The debug-info stream is re-read once before the load fails; a second
    /// failure is fatal.
    pub fn load_emitted(
        name: impl Into<String>,
        emitted: &EmittedModule,
        options: &CompileOptions,
    ) -> Result<Arc<Self>, LoadError> {
        let mut module = compile(&emitted.source, options)?;
        if let Some(json) = &emitted.debug_map {
            let mut last_error = String::new();
            let mut maps: Option<InstrumentationMaps> = None;
            for attempt in 0..2 {
                match serde_json::from_str(json) {
                    Ok(parsed) => {
                        maps = Some(parsed);
                        break;
                    }
                    Err(e) => {
                        if attempt == 0 {
                            tracing::warn!(error = %e, "debug info parse failed, retrying");
                        }
                        last_error = e.to_string();
                    }
                }
            }
            match maps {
                Some(parsed) => module.maps = Some(Arc::new(parsed)),
                None => return Err(LoadError::DebugInfo(last_error)),
            }
        }
        Ok(Self::load(name, module))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Obtain a callable handle to a function by qualified name. The handle
    /// keeps the module alive independently of the isolate.
    pub fn entry(&self, qualified: &str) -> Result<EntryHandle, LoadError> {
        let slot = self.slot.lock();
        let loaded = slot
            .as_ref()
            .ok_or_else(|| LoadError::Unloaded(self.name.clone()))?;
        if !loaded.module.functions.contains_key(qualified) {
            return Err(LoadError::MissingEntry(qualified.to_string()));
        }
        Ok(EntryHandle {
            loaded: loaded.clone(),
            qualified: qualified.to_string(),
        })
    }

    /// The loaded module, while this isolate is still loaded.
    pub fn module(&self) -> Option<Arc<CompiledModule>> {
        self.slot.lock().as_ref().map(|l| l.module.clone())
    }

    /// Weak liveness handle: goes dead once the isolate is unloaded and all
    /// outstanding callable handles have dropped.
    pub fn weak(&self) -> Weak<LoadedModule> {
        match self.slot.lock().as_ref() {
            Some(loaded) => Arc::downgrade(loaded),
            None => Weak::new(),
        }
    }

    /// Sever the owning reference. New `entry()` calls fail from here on;
    /// reclamation completes when the last callable handle drops.
    pub fn unload(&self) {
        let released = self.slot.lock().take();
        if released.is_some() {
            tracing::trace!(isolate = %self.name, "isolate unloaded");
        }
    }

    pub fn is_unloaded(&self) -> bool {
        self.slot.lock().is_none()
    }
}

/// Callable handle to one entrypoint of a loaded module.
#[derive(Clone)]
pub struct EntryHandle {
    loaded: Arc<LoadedModule>,
    qualified: String,
}

impl EntryHandle {
    pub fn qualified(&self) -> &str {
        &self.qualified
    }

    pub fn module(&self) -> &Arc<CompiledModule> {
        &self.loaded.module
    }

    /// Invoke the entrypoint on the calling thread.
    pub fn invoke(&self, args: &[Value]) -> RuntimeResult<Value> {
        Interpreter::new(self.loaded.module.clone()).call(&self.qualified, args)
    }
}
