//! Checkpoint-map invariants over realistic sources.

use sable_engine::compiler::{compile, print_program, CompileOptions};
use sable_engine::rewriter::rewrite;

const SOURCE: &str = "\
function outer(n) {
    let total = 0;
    while (n > 0) {
        total = total + n;
        n = n - 1;
    }
    if (total > 10) {
        print(\"big\");
    } else {
        print(\"small\");
    }
    return total;
}
class Helper {
    function twice(x) {
        return x * 2;
    }
}
";

#[test]
fn ids_are_dense_and_partition_across_methods() {
    let module = compile(SOURCE, &CompileOptions::script("demo", "demo.sbl")).unwrap();
    let maps = module.maps.as_ref().unwrap();

    let ids: Vec<u32> = maps.checkpoints.keys().copied().collect();
    let expected: Vec<u32> = (1..=ids.len() as u32).collect();
    assert_eq!(ids, expected, "ids must be dense from 1");

    // Every id appears exactly once across all method lists.
    let mut all: Vec<u32> = maps.methods.values().flatten().copied().collect();
    all.sort_unstable();
    assert_eq!(all, expected, "method lists must partition the id space");

    // Per-method lists are strictly increasing.
    for (method, list) in &maps.methods {
        assert!(
            list.windows(2).all(|w| w[0] < w[1]),
            "{} has a non-increasing id list: {:?}",
            method,
            list
        );
    }
}

#[test]
fn lines_point_at_original_statements() {
    let module = compile(SOURCE, &CompileOptions::script("demo", "demo.sbl")).unwrap();
    let maps = module.maps.as_ref().unwrap();

    assert_eq!(maps.methods["demo.outer"], vec![1, 2, 3, 4, 5, 6, 7, 8]);
    assert_eq!(maps.methods["demo.Helper.twice"], vec![9]);

    let line = |id: u32| maps.checkpoints[&id].line;
    assert_eq!(line(1), 2); // let total = 0;
    assert_eq!(line(2), 3); // while (…)
    assert_eq!(line(3), 4); // total = total + n;
    assert_eq!(line(4), 5); // n = n - 1;
    assert_eq!(line(5), 7); // if (…)
    assert_eq!(line(6), 8); // print("big");
    assert_eq!(line(7), 10); // print("small");
    assert_eq!(line(8), 11); // return total;
    assert_eq!(line(9), 15); // return x * 2;

    for loc in maps.checkpoints.values() {
        assert_eq!(loc.file, "demo.sbl");
        assert!(loc.column >= 1);
    }
}

#[test]
fn second_rewrite_adds_no_wrappers() {
    let module = compile(SOURCE, &CompileOptions::script("demo", "demo.sbl")).unwrap();
    let once = print_program(&module.program);

    let again = rewrite(&module.program, "demo", "demo.sbl").unwrap();
    let twice = print_program(&again.program);

    assert_eq!(once, twice, "instrumented source must be a fixed point");
    assert!(again.maps.checkpoints.is_empty());

    let wrappers = once.matches("__push_frame").count();
    assert_eq!(wrappers, 2, "one wrapper per method");
}

#[test]
fn emitted_source_recompiles_and_runs() {
    let module = compile(
        "function main() { let a = 20; let b = 22; print(a + b); return a + b; }",
        &CompileOptions::script("demo", "demo.sbl"),
    )
    .unwrap();
    let emitted = module.emit();

    // The emitted artifact must be compilable as-is, and without a debug
    // host its instrumentation is inert.
    let reloaded = compile(
        &emitted.source,
        &CompileOptions {
            unit_name: "demo".into(),
            file_path: "demo.sbl".into(),
            opt_level: sable_engine::compiler::OptLevel::Debug,
            instrument: false,
        },
    )
    .unwrap();
    let isolate = sable_engine::vm::ModuleIsolate::load("demo-reload", reloaded);
    let value = isolate.entry("demo.main").unwrap().invoke(&[]).unwrap();
    assert_eq!(value, sable_engine::vm::Value::Int(42));
}
