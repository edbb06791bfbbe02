//! Debugger runtime: the per-thread engine and the expression evaluator.

mod cache;
pub mod engine;
pub mod eval;

pub use engine::{
    DebugEngine, FrameSnapshot, PauseEvent, PauseId, PauseReason, ResumeMode,
};
pub use eval::{cache_key, sanitize_identifier, EvalError, ExpressionEvaluator};
