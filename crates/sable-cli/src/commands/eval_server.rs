//! `sable eval-server` — out-of-process expression evaluator transport.
//!
//! The host delivers a synthesized evaluator module on stdin bracketed by
//! `---BEGIN-CODE---` and `---END-CODE---`, then this process compiles and
//! runs it under an OS-level timeout of the host's choosing. Exit codes:
//! 0 success, 1 empty input, 2 compilation error (details on stderr),
//! 3 runtime error.

use sable_engine::compiler::{compile, diagnostics, CompileError, CompileOptions};
use sable_engine::vm::{ModuleIsolate, Value};
use std::io::BufRead;

const BEGIN_MARKER: &str = "---BEGIN-CODE---";
const END_MARKER: &str = "---END-CODE---";

const UNIT: &str = "__eval_server";

pub fn execute() -> i32 {
    let stdin = std::io::stdin();
    let code = read_bracketed(stdin.lock());
    run(&code)
}

/// Collect the lines between the begin/end markers.
fn read_bracketed(reader: impl BufRead) -> String {
    let mut code = String::new();
    let mut inside = false;
    for line in reader.lines() {
        let Ok(line) = line else { break };
        match line.trim_end() {
            BEGIN_MARKER => inside = true,
            END_MARKER => break,
            _ if inside => {
                code.push_str(&line);
                code.push('\n');
            }
            _ => {}
        }
    }
    code
}

fn run(code: &str) -> i32 {
    if code.trim().is_empty() {
        return 1;
    }

    let module = match compile(code, &CompileOptions::expression(UNIT)) {
        Ok(module) => module,
        Err(CompileError::Diagnostics(diags)) => {
            eprint!("{}", diagnostics::render("<stdin>", code, &diags));
            return 2;
        }
        Err(other) => {
            eprintln!("{}", other);
            return 2;
        }
    };

    let isolate = ModuleIsolate::load(UNIT, module);
    let entry = [format!("{}.main", UNIT), format!("{}.__evaluate", UNIT)]
        .into_iter()
        .find_map(|name| isolate.entry(&name).ok());
    let Some(entry) = entry else {
        eprintln!("no entrypoint: define 'main' or '__evaluate'");
        return 2;
    };

    match entry.invoke(&[]) {
        Ok(Value::Null) => 0,
        Ok(value) => {
            println!("{}", value);
            0
        }
        Err(e) => {
            eprintln!("{}", e);
            3
        }
    }
}
