//! Expression evaluation against a paused frame's locals.
//!
//! Each distinct `(expression, ordered local names)` pair is compiled once
//! into a tiny module with a single entrypoint whose parameters are the
//! sanitized local names; invocation binds the current values positionally.
//! Compiled evaluators live in dedicated isolates tracked by the LRU cache.

use crate::compiler::{compile, CompileOptions};
use crate::debug::cache::{CacheEntry, EvalCache};
use crate::parser::{is_valid_identifier, token::Token};
use crate::vm::{LoadedModule, ModuleIsolate, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Weak;
use thiserror::Error;

/// Unit name of every synthesized evaluator module.
const EVAL_UNIT: &str = "__eval";

/// Entrypoint name inside a synthesized evaluator module.
const ENTRY_NAME: &str = "__evaluate";

/// Evaluation failure. Runtime faults inside the user expression are caught
/// and reported here, never propagated to the paused script thread.
#[derive(Debug, Clone, Error)]
pub enum EvalError {
    #[error("compile error: {0}")]
    Compile(String),

    #[error("{0}")]
    Runtime(String),
}

/// The expression evaluator with its compiled-artifact cache.
pub struct ExpressionEvaluator {
    cache: EvalCache,
    next_isolate: AtomicU64,
}

impl ExpressionEvaluator {
    /// Default cache capacity.
    pub const DEFAULT_CAPACITY: usize = 64;

    pub fn new(capacity: usize) -> Self {
        Self {
            cache: EvalCache::new(capacity),
            next_isolate: AtomicU64::new(1),
        }
    }

    /// Evaluate `expression` against the ordered locals of a paused frame.
    pub fn evaluate(
        &self,
        expression: &str,
        locals: &[(String, Value)],
    ) -> Result<Value, EvalError> {
        let names: Vec<&str> = locals.iter().map(|(n, _)| n.as_str()).collect();
        let key = cache_key(expression, &names);

        let callable = self.cache.get_or_insert(&key, || {
            let source = synthesize(expression, &sanitize_all(&names));
            tracing::debug!(%expression, locals = names.len(), "compiling evaluator");
            let module = compile(&source, &CompileOptions::expression(EVAL_UNIT))
                .map_err(|e| EvalError::Compile(e.to_string()))?;
            let isolate = ModuleIsolate::load(
                format!("eval-{}", self.next_isolate.fetch_add(1, Ordering::Relaxed)),
                module,
            );
            let callable = isolate
                .entry(&format!("{}.{}", EVAL_UNIT, ENTRY_NAME))
                .map_err(|e| EvalError::Compile(e.to_string()))?;
            Ok(CacheEntry {
                callable,
                weak: isolate.weak(),
                isolate,
            })
        })?;

        // Pair names positionally with their current values; run outside the
        // cache lock.
        let args: Vec<Value> = locals.iter().map(|(_, v)| v.clone()).collect();
        callable
            .invoke(&args)
            .map_err(|e| EvalError::Runtime(e.to_string()))
    }

    /// Number of live cache entries.
    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    /// Cache capacity.
    pub fn cache_capacity(&self) -> usize {
        self.cache.capacity()
    }

    /// Cached keys, most-recently-used first.
    pub fn cached_keys(&self) -> Vec<String> {
        self.cache.keys()
    }

    /// Liveness handle for the isolate behind a cached entry.
    pub fn cached_isolate(
        &self,
        expression: &str,
        local_names: &[&str],
    ) -> Option<Weak<LoadedModule>> {
        self.cache.entry_weak(&cache_key(expression, local_names))
    }
}

impl Default for ExpressionEvaluator {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

/// `expression + "|" + comma-join(names)`: same expression over the same
/// ordered names hits the same entry regardless of the concrete values.
pub fn cache_key(expression: &str, names: &[&str]) -> String {
    format!("{}|{}", expression, names.join(","))
}

/// Derive a safe Sable identifier from a local name: prefix an underscore
/// when the name starts with a non-letter, replace anything outside
/// `[A-Za-z0-9_]` with an underscore, and escape reserved words.
pub fn sanitize_identifier(name: &str) -> String {
    if name.is_empty() {
        return "_".to_string();
    }
    let mut out = String::with_capacity(name.len() + 1);
    let first = name.chars().next().expect("non-empty");
    if !(first.is_ascii_alphabetic() || first == '_') {
        out.push('_');
    }
    for c in name.chars() {
        if c.is_ascii_alphanumeric() || c == '_' {
            out.push(c);
        } else {
            out.push('_');
        }
    }
    if Token::is_reserved(&out) {
        out.insert(0, '_');
    }
    debug_assert!(is_valid_identifier(&out));
    out
}

fn sanitize_all(names: &[&str]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(names.len());
    for name in names {
        let mut ident = sanitize_identifier(name);
        // Sanitization can collide (`a-b` and `a_b`); keep parameters unique.
        while out.contains(&ident) {
            ident.push('_');
        }
        out.push(ident);
    }
    out
}

fn synthesize(expression: &str, idents: &[String]) -> String {
    format!(
        "function {}({}) {{\n    return ({});\n}}\n",
        ENTRY_NAME,
        idents.join(", "),
        expression
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn locals(pairs: &[(&str, Value)]) -> Vec<(String, Value)> {
        pairs
            .iter()
            .map(|(n, v)| (n.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_evaluates_against_locals() {
        let evaluator = ExpressionEvaluator::default();
        let frame = locals(&[("x", Value::Int(10)), ("y", Value::Int(4))]);
        assert_eq!(
            evaluator.evaluate("x * y + 2", &frame).unwrap(),
            Value::Int(42)
        );
    }

    #[test]
    fn test_dynamic_dispatch_on_values() {
        let evaluator = ExpressionEvaluator::default();
        let frame = locals(&[
            ("s", Value::Str("abc".into())),
            ("xs", Value::array(vec![Value::Int(7), Value::Int(8)])),
        ]);
        assert_eq!(evaluator.evaluate("s.len", &frame).unwrap(), Value::Int(3));
        assert_eq!(evaluator.evaluate("xs[1]", &frame).unwrap(), Value::Int(8));
        assert_eq!(
            evaluator.evaluate("s + xs.len", &frame).unwrap(),
            Value::Str("abc2".into())
        );
    }

    #[test]
    fn test_same_signature_hits_cache() {
        let evaluator = ExpressionEvaluator::default();
        let frame = locals(&[("x", Value::Int(1))]);
        evaluator.evaluate("x + 1", &frame).unwrap();
        assert_eq!(evaluator.cache_len(), 1);

        // Different value, same name list: same entry, new result.
        let frame = locals(&[("x", Value::Int(41))]);
        assert_eq!(
            evaluator.evaluate("x + 1", &frame).unwrap(),
            Value::Int(42)
        );
        assert_eq!(evaluator.cache_len(), 1);

        // Different name list: distinct entry.
        let frame = locals(&[("x", Value::Int(1)), ("y", Value::Int(2))]);
        evaluator.evaluate("x + 1", &frame).unwrap();
        assert_eq!(evaluator.cache_len(), 2);
    }

    #[test]
    fn test_runtime_fault_is_reported_not_propagated() {
        let evaluator = ExpressionEvaluator::default();
        let frame = locals(&[("x", Value::Int(1))]);
        let err = evaluator.evaluate("1 / 0", &frame).unwrap_err();
        let EvalError::Runtime(message) = err else {
            panic!("expected a runtime error");
        };
        assert!(message.contains("division by zero"));
        // The evaluator stays usable.
        assert_eq!(evaluator.evaluate("x", &frame).unwrap(), Value::Int(1));
    }

    #[test]
    fn test_compile_error_reported() {
        let evaluator = ExpressionEvaluator::default();
        let err = evaluator.evaluate("nosuchvar + 1", &[]).unwrap_err();
        assert!(matches!(err, EvalError::Compile(_)));
        assert!(err.to_string().contains("nosuchvar"));
    }

    #[test]
    fn test_sanitize_identifier() {
        assert_eq!(sanitize_identifier("abc"), "abc");
        assert_eq!(sanitize_identifier("1st"), "_1st");
        assert_eq!(sanitize_identifier("a-b"), "a_b");
        assert_eq!(sanitize_identifier("while"), "_while");
        assert_eq!(sanitize_identifier(""), "_");
    }

    #[test]
    fn test_odd_local_names_are_bound() {
        let evaluator = ExpressionEvaluator::default();
        // A local whose name can't appear in an expression still occupies
        // its positional slot without breaking compilation.
        let frame = locals(&[("odd-name", Value::Int(1)), ("x", Value::Int(5))]);
        assert_eq!(evaluator.evaluate("x * 2", &frame).unwrap(), Value::Int(10));
    }

    #[test]
    fn test_cache_key_shape() {
        assert_eq!(cache_key("a + b", &["a", "b"]), "a + b|a,b");
        assert_eq!(cache_key("a + b", &[]), "a + b|");
    }
}
