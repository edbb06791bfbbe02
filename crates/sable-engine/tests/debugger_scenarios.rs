//! End-to-end debugger scenarios: real scripts, instrumented and driven
//! through the process-wide host binding.
//!
//! The host binding is global, so every test here serializes on `GUARD`.

use crossbeam::channel::Receiver;
use parking_lot::Mutex;
use sable_engine::compiler::{compile, CompileOptions};
use sable_engine::debug::{DebugEngine, ExpressionEvaluator, PauseEvent, PauseReason, ResumeMode};
use sable_engine::vm::{clear_host, install_host, EntryHandle, ModuleIsolate, Value};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

static GUARD: Mutex<()> = Mutex::new(());

struct Session {
    engine: Arc<DebugEngine>,
    pauses: Receiver<PauseEvent>,
    entry: EntryHandle,
}

fn session(source: &str) -> Session {
    let module = compile(source, &CompileOptions::script("demo", "demo.sbl")).unwrap();
    let maps = module.maps.clone().unwrap();
    let (engine, pauses) = DebugEngine::new(maps);
    let isolate = ModuleIsolate::load("demo", module);
    let entry = isolate.entry("demo.main").unwrap();
    Session {
        engine,
        pauses,
        entry,
    }
}

fn start(session: &Session) -> JoinHandle<Result<Value, sable_engine::vm::RuntimeError>> {
    install_host(session.engine.clone());
    let entry = session.entry.clone();
    std::thread::spawn(move || entry.invoke(&[]))
}

fn recv(session: &Session) -> PauseEvent {
    session
        .pauses
        .recv_timeout(Duration::from_secs(5))
        .expect("expected a pause event")
}

fn assert_no_more_pauses(session: &Session) {
    assert!(
        session.pauses.try_recv().is_err(),
        "no further pauses expected"
    );
}

const S1_SOURCE: &str = "\
class Main {
    function run() {
        let a = 1;
        let b = a + 1;
        print(a + b);
    }
}
function main() { Main.run(); }
";

#[test]
fn s1_breakpoint_hit_with_locals() {
    let _guard = GUARD.lock();
    let s = session(S1_SOURCE);
    s.engine.add_breakpoint(2);

    let script = start(&s);
    let event = recv(&s);

    assert_eq!(event.frame.checkpoint_id, Some(2));
    assert_eq!(event.reason, PauseReason::Breakpoint(2));
    assert_eq!(event.frame.method_name, "demo.Main.run");
    let site = &s.engine.maps().checkpoints[&2];
    assert_eq!((site.line, site.column), (4, 9));
    assert_eq!(
        event.frame.locals,
        vec![("a".to_string(), Value::Int(1))],
        "only 'a' is in scope before the line-4 statement"
    );

    s.engine.resume(event.pause_id, ResumeMode::Continue);
    script.join().unwrap().unwrap();
    assert_no_more_pauses(&s);
    clear_host();
}

const CALLS_SOURCE: &str = "\
function a() {
    b();
    print(\"after\");
}
function b() {
    print(\"inside\");
}
function main() { a(); }
";

#[test]
fn s2_step_over_does_not_descend() {
    let _guard = GUARD.lock();
    let s = session(CALLS_SOURCE);
    // a: [1, 2], b: [3], main: [4]
    s.engine.add_breakpoint(1);

    let script = start(&s);
    let first = recv(&s);
    assert_eq!(first.frame.checkpoint_id, Some(1));
    assert_eq!(first.frame.method_name, "demo.a");
    let depth_in_a = first.depth;

    s.engine.resume(first.pause_id, ResumeMode::StepOver);
    let second = recv(&s);
    assert_eq!(second.frame.checkpoint_id, Some(2), "paused past the call");
    assert_eq!(second.frame.method_name, "demo.a");
    assert_eq!(second.depth, depth_in_a, "never paused inside b");

    s.engine.resume(second.pause_id, ResumeMode::Continue);
    script.join().unwrap().unwrap();
    assert_no_more_pauses(&s);
    clear_host();
}

#[test]
fn s3_step_out_returns_to_caller() {
    let _guard = GUARD.lock();
    let s = session(CALLS_SOURCE);
    s.engine.add_breakpoint(3);

    let script = start(&s);
    let first = recv(&s);
    assert_eq!(first.frame.method_name, "demo.b");
    let depth_in_b = first.depth;

    s.engine.resume(first.pause_id, ResumeMode::StepOut);
    let second = recv(&s);
    assert_eq!(second.frame.checkpoint_id, Some(2));
    assert_eq!(second.frame.method_name, "demo.a");
    assert_eq!(second.depth, depth_in_b - 1);

    s.engine.resume(second.pause_id, ResumeMode::Continue);
    script.join().unwrap().unwrap();
    clear_host();
}

#[test]
fn s4_step_over_at_last_statement_pauses_after_return() {
    let _guard = GUARD.lock();
    let s = session(CALLS_SOURCE);
    s.engine.add_breakpoint(3);

    let script = start(&s);
    let first = recv(&s);
    assert_eq!(first.frame.checkpoint_id, Some(3), "last statement of b");

    s.engine.resume(first.pause_id, ResumeMode::StepOver);
    let second = recv(&s);
    assert_eq!(
        second.frame.checkpoint_id,
        Some(2),
        "paused in the caller immediately after b returned"
    );
    assert_eq!(second.depth, first.depth - 1);

    s.engine.resume(second.pause_id, ResumeMode::Continue);
    script.join().unwrap().unwrap();
    clear_host();
}

#[test]
fn step_into_descends_into_callee() {
    let _guard = GUARD.lock();
    let s = session(CALLS_SOURCE);
    s.engine.add_breakpoint(1);

    let script = start(&s);
    let first = recv(&s);
    s.engine.resume(first.pause_id, ResumeMode::StepInto);

    let second = recv(&s);
    assert_eq!(second.frame.checkpoint_id, Some(3));
    assert_eq!(second.frame.method_name, "demo.b");
    assert_eq!(second.depth, first.depth + 1);

    s.engine.resume(second.pause_id, ResumeMode::Continue);
    script.join().unwrap().unwrap();
    clear_host();
}

const THROWS_SOURCE: &str = "\
function main() {
    try {
        boom();
    } catch (e) {
        print(e);
    }
    print(\"done\");
}
function boom() {
    throw \"kaboom\";
}
";

#[test]
fn frame_pops_on_exception_paths() {
    let _guard = GUARD.lock();
    let s = session(THROWS_SOURCE);
    // main: [1 try, 2 boom(), 3 print(e), 4 print(done)], boom: [5 throw]
    s.engine.add_breakpoint(4);

    let script = start(&s);
    let event = recv(&s);
    assert_eq!(event.frame.checkpoint_id, Some(4));
    assert_eq!(
        event.depth, 1,
        "boom's frame must be popped despite unwinding"
    );

    s.engine.resume(event.pause_id, ResumeMode::Continue);
    script.join().unwrap().unwrap();
    clear_host();
}

#[test]
fn s6_expression_fault_leaves_paused_thread_usable() {
    let _guard = GUARD.lock();
    let s = session(S1_SOURCE);
    let evaluator = ExpressionEvaluator::new(8);
    s.engine.add_breakpoint(2);

    let script = start(&s);
    let event = recv(&s);

    let err = evaluator
        .evaluate("1 / 0", &event.frame.locals)
        .unwrap_err();
    assert!(err.to_string().contains("division by zero"));

    // The paused frame is untouched: evaluation still works and the thread
    // still resumes.
    assert_eq!(
        evaluator.evaluate("a + 41", &event.frame.locals).unwrap(),
        Value::Int(42)
    );
    s.engine.resume(event.pause_id, ResumeMode::Continue);
    script.join().unwrap().unwrap();
    clear_host();
}

#[test]
fn two_script_threads_pause_and_resume_by_pause_id() {
    let _guard = GUARD.lock();
    let s = session(CALLS_SOURCE);
    s.engine.add_breakpoint(3);

    install_host(s.engine.clone());
    let spawn = |entry: EntryHandle| std::thread::spawn(move || entry.invoke(&[]));
    let w1 = spawn(s.entry.clone());
    let w2 = spawn(s.entry.clone());

    let first = recv(&s);
    let second = recv(&s);
    assert_ne!(first.thread_key, second.thread_key);
    assert_ne!(first.pause_id, second.pause_id);

    // Resume out of order to prove routing by pause id.
    s.engine.resume(second.pause_id, ResumeMode::Continue);
    s.engine.resume(first.pause_id, ResumeMode::Continue);
    w1.join().unwrap().unwrap();
    w2.join().unwrap().unwrap();
    clear_host();
}

#[test]
fn breakpoint_added_while_paused_takes_effect() {
    let _guard = GUARD.lock();
    let s = session(CALLS_SOURCE);
    s.engine.add_breakpoint(1);

    let script = start(&s);
    let first = recv(&s);
    // From the paused prompt: add a breakpoint in b, then continue.
    s.engine.add_breakpoint(3);
    s.engine.resume(first.pause_id, ResumeMode::Continue);

    let second = recv(&s);
    assert_eq!(second.frame.checkpoint_id, Some(3));
    assert_eq!(second.frame.method_name, "demo.b");

    s.engine.resume(second.pause_id, ResumeMode::Continue);
    script.join().unwrap().unwrap();
    clear_host();
}
