//! Sable runtime: boxed values, the tree-walking interpreter, collectible
//! module isolates, and the process-wide debug-host binding the injected
//! instrumentation API routes to.

pub mod host;
pub mod interpreter;
pub mod isolate;
pub mod value;

pub use host::{clear_host, current_host, install_host, DebugHost, LocalsPairs, LocalsProvider};
pub use interpreter::{Env, Interpreter, Scope};
pub use isolate::{EntryHandle, LoadError, LoadedModule, ModuleIsolate};
pub use value::{Closure, Value};

use thiserror::Error;

/// Script execution errors.
#[derive(Debug, Clone, Error)]
pub enum RuntimeError {
    /// Type error in a dynamically dispatched operation
    #[error("type error: {0}")]
    TypeError(String),

    /// Integer division or modulo by zero
    #[error("division by zero")]
    DivisionByZero,

    /// Variable lookup failure
    #[error("undefined variable '{0}'")]
    UndefinedVariable(String),

    /// Call target lookup failure
    #[error("unknown function '{0}'")]
    UnknownFunction(String),

    /// Call with the wrong number of arguments
    #[error("'{0}' takes {1} argument(s) but {2} were supplied")]
    ArityMismatch(String, usize, usize),

    /// Array index outside the valid range
    #[error("index {0} out of bounds (length {1})")]
    IndexOutOfBounds(i64, usize),

    /// Value used in call position is not callable
    #[error("value of type {0} is not callable")]
    NotCallable(&'static str),

    /// `throw` raised by the script
    #[error("{0}")]
    Thrown(String),

    /// Interpreter recursion limit exceeded
    #[error("stack overflow")]
    StackOverflow,
}

/// Script execution result.
pub type RuntimeResult<T> = Result<T, RuntimeError>;
