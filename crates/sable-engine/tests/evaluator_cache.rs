//! Evaluator cache behavior: LRU bounds, isolate release, fault reporting.

use sable_engine::debug::{EvalError, ExpressionEvaluator};
use sable_engine::vm::Value;

fn frame(pairs: &[(&str, Value)]) -> Vec<(String, Value)> {
    pairs
        .iter()
        .map(|(n, v)| (n.to_string(), v.clone()))
        .collect()
}

#[test]
fn s5_lru_eviction_releases_isolates() {
    let evaluator = ExpressionEvaluator::new(2);
    let locals = frame(&[("x", Value::Int(1))]);

    evaluator.evaluate("x + 1", &locals).unwrap();
    evaluator.evaluate("x + 2", &locals).unwrap();
    let e1_isolate = evaluator.cached_isolate("x + 1", &["x"]).unwrap();
    assert_eq!(evaluator.cache_len(), 2);

    // Third entry evicts the least recently used one (E1)…
    evaluator.evaluate("x + 3", &locals).unwrap();
    assert_eq!(evaluator.cache_len(), 2);
    assert!(
        e1_isolate.upgrade().is_none(),
        "evicted isolate must be reclaimed"
    );
    assert!(evaluator.cached_isolate("x + 1", &["x"]).is_none());

    // …then touching E2 makes E3 the next victim.
    evaluator.evaluate("x + 2", &locals).unwrap();
    evaluator.evaluate("x + 4", &locals).unwrap();
    assert_eq!(
        evaluator.cached_keys(),
        vec!["x + 4|x".to_string(), "x + 2|x".to_string()]
    );
}

#[test]
fn cache_key_ignores_values_but_not_names() {
    let evaluator = ExpressionEvaluator::new(8);

    let first = frame(&[("x", Value::Int(1))]);
    let second = frame(&[("x", Value::Int(100))]);
    assert_eq!(evaluator.evaluate("x * 2", &first).unwrap(), Value::Int(2));
    assert_eq!(
        evaluator.evaluate("x * 2", &second).unwrap(),
        Value::Int(200)
    );
    assert_eq!(evaluator.cache_len(), 1, "same expression, same names");

    let renamed = frame(&[("y", Value::Int(1)), ("x", Value::Int(3))]);
    assert_eq!(evaluator.evaluate("x * 2", &renamed).unwrap(), Value::Int(6));
    assert_eq!(evaluator.cache_len(), 2, "different name list, new entry");
}

#[test]
fn s6_runtime_fault_is_an_error_result() {
    let evaluator = ExpressionEvaluator::new(8);
    let locals = frame(&[("count", Value::Int(3))]);

    let err = evaluator.evaluate("1 / 0", &locals).unwrap_err();
    let EvalError::Runtime(message) = err else {
        panic!("expected runtime error, got {:?}", err)
    };
    assert!(message.contains("division by zero"));

    let err = evaluator.evaluate("count % 0", &locals).unwrap_err();
    assert!(err.to_string().contains("division by zero"));

    // The failing entries are cached like any other and stay invocable.
    assert_eq!(
        evaluator.evaluate("count + 1", &locals).unwrap(),
        Value::Int(4)
    );
}

#[test]
fn evaluates_rich_expressions_over_frame_locals() {
    let evaluator = ExpressionEvaluator::new(8);
    let locals = frame(&[
        ("name", Value::Str("sable".into())),
        ("xs", Value::array(vec![Value::Int(1), Value::Int(2), Value::Int(3)])),
        ("flag", Value::Bool(true)),
    ]);

    assert_eq!(
        evaluator.evaluate("name.len + xs.len", &locals).unwrap(),
        Value::Int(8)
    );
    assert_eq!(
        evaluator
            .evaluate("flag && xs[2] == 3", &locals)
            .unwrap(),
        Value::Bool(true)
    );
    assert_eq!(
        evaluator
            .evaluate("\"hello \" + name", &locals)
            .unwrap(),
        Value::Str("hello sable".into())
    );
}
