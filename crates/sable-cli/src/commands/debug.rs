//! `sable debug` — interactive source-level debugger.
//!
//! Compiles the script with instrumentation, installs the debugger engine as
//! the process-wide host, runs the script on its own thread, and drives a
//! REPL over the pause-event queue. Multiple script threads may be paused at
//! once; resume commands are routed by pause id.

use crate::commands::{compile_script, parse_file_line, unit_name};
use crate::output;
use anyhow::{Context, Result};
use crossbeam::channel::RecvTimeoutError;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use sable_engine::compiler::CompileOptions;
use sable_engine::debug::{
    DebugEngine, ExpressionEvaluator, PauseEvent, PauseReason, ResumeMode,
};
use sable_engine::rewriter::InstrumentationMaps;
use sable_engine::vm::{clear_host, install_host, ModuleIsolate};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

const PROMPT: &str = "sdb> ";
const PAUSED_PROMPT: &str = "dbg> ";

pub fn execute(file: &Path, eval_cache: usize, emit: Option<&Path>) -> Result<()> {
    let unit = unit_name(file);
    let options = CompileOptions::script(&unit, file.display().to_string());
    let module = compile_script(file, &options)?;

    if let Some(dir) = emit {
        let (code, map) = module.emit().write_to_dir(dir)?;
        println!("emitted {}", code.display());
        if let Some(map) = map {
            println!("emitted {}", map.display());
        }
    }

    let maps = module
        .maps
        .clone()
        .expect("script compile always carries instrumentation maps");
    let source_lines: Vec<String> = module.source.lines().map(str::to_string).collect();
    let (engine, pauses) = DebugEngine::new(maps.clone());
    let evaluator = ExpressionEvaluator::new(eval_cache);

    let isolate = ModuleIsolate::load(unit.clone(), module);
    let entry = isolate
        .entry(&format!("{}.main", unit))
        .context("script must define 'function main()'")?;

    let mut editor = DefaultEditor::new()?;
    println!(
        "Sable debugger — {} checkpoints in {} method(s). Type 'help' for commands.",
        maps.checkpoints.len(),
        maps.methods.len()
    );

    // Pre-run phase: breakpoint and map commands until `run`.
    loop {
        let line = match editor.readline(PROMPT) {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let _ = editor.add_history_entry(line);
        match prerun_command(line, &engine, &maps) {
            PrerunOutcome::Continue => {}
            PrerunOutcome::Run => break,
            PrerunOutcome::Quit => return Ok(()),
        }
    }

    install_host(engine.clone());
    let script = std::thread::spawn(move || entry.invoke(&[]));

    // Event loop: the pause queue is polled so a finished script is noticed
    // without starving pause handling.
    loop {
        match pauses.recv_timeout(Duration::from_millis(100)) {
            Ok(event) => {
                paused_prompt(&mut editor, &engine, &evaluator, &maps, &source_lines, &event)?
            }
            Err(RecvTimeoutError::Timeout) => {
                if script.is_finished() {
                    while let Ok(event) = pauses.try_recv() {
                        paused_prompt(&mut editor, &engine, &evaluator, &maps, &source_lines, &event)?;
                    }
                    break;
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    match script.join() {
        Ok(Ok(_)) => println!("program finished"),
        Ok(Err(e)) => output::print_error(&format!("script terminated: {}", e)),
        Err(_) => output::print_error("script thread panicked"),
    }
    clear_host();
    Ok(())
}

enum PrerunOutcome {
    Continue,
    Run,
    Quit,
}

fn prerun_command(line: &str, engine: &Arc<DebugEngine>, maps: &InstrumentationMaps) -> PrerunOutcome {
    let mut words = line.split_whitespace();
    match (words.next(), words.next(), words.next()) {
        (Some("map"), None, _) => print_map(maps),
        (Some("mapline"), Some(arg), None) => match resolve_line_arg(maps, arg) {
            Some(id) => print_site(maps, id),
            None => println!("no checkpoint matches {}", arg),
        },
        (Some("bp"), Some("add"), Some(id)) => match id.parse() {
            Ok(id) => {
                engine.add_breakpoint(id);
                println!("breakpoint added at #{}", id);
            }
            Err(_) => println!("usage: bp add <id>"),
        },
        (Some("bp"), Some("addline"), Some(arg)) => match resolve_line_arg(maps, arg) {
            Some(id) => {
                engine.add_breakpoint(id);
                print!("breakpoint added: ");
                print_site(maps, id);
            }
            None => println!("no checkpoint matches {}", arg),
        },
        (Some("bp"), Some("rm"), Some(id)) => match id.parse() {
            Ok(id) => {
                engine.remove_breakpoint(id);
                println!("breakpoint removed from #{}", id);
            }
            Err(_) => println!("usage: bp rm <id>"),
        },
        (Some("bp"), Some("list"), None) => {
            let ids = engine.breakpoints();
            if ids.is_empty() {
                println!("no breakpoints");
            }
            for id in ids {
                print_site(maps, id);
            }
        }
        (Some("run"), None, _) => return PrerunOutcome::Run,
        (Some("quit"), None, _) | (Some("q"), None, _) => return PrerunOutcome::Quit,
        (Some("help"), _, _) => {
            println!("  map                      list all checkpoints");
            println!("  mapline <file>:<line>    nearest checkpoint to a source line");
            println!("  bp add <id>              add a breakpoint");
            println!("  bp addline <file>:<line> add a breakpoint by source line");
            println!("  bp rm <id>               remove a breakpoint");
            println!("  bp list                  list breakpoints");
            println!("  run                      start the script");
            println!("  quit                     exit");
        }
        _ => println!("unknown command (try 'help')"),
    }
    PrerunOutcome::Continue
}

fn paused_prompt(
    editor: &mut DefaultEditor,
    engine: &Arc<DebugEngine>,
    evaluator: &ExpressionEvaluator,
    maps: &InstrumentationMaps,
    source_lines: &[String],
    event: &PauseEvent,
) -> Result<()> {
    let site = event
        .frame
        .checkpoint_id
        .and_then(|id| maps.checkpoints.get(&id));
    let location = site
        .map(|loc| format!("{}:{}:{}", loc.file, loc.line, loc.column))
        .unwrap_or_else(|| "<unknown>".to_string());
    let reason = match event.reason {
        PauseReason::Breakpoint(id) => format!("breakpoint #{}", id),
        PauseReason::Step => "step".to_string(),
    };
    output::print_banner(&format!(
        "paused [{}] at {} ({}) in {} -- thread {}, depth {}",
        event.pause_id, location, reason, event.frame.method_name, event.thread_key, event.depth
    ));
    if let Some((line, text)) = site.and_then(|loc| {
        let index = (loc.line as usize).checked_sub(1)?;
        Some((loc.line, source_lines.get(index)?))
    }) {
        println!("    {:>4} | {}", line, text.trim_end());
    }
    if let Some(diag) = &event.frame.diagnostic {
        output::print_error(&format!("locals unavailable: {}", diag));
    }
    for (name, value) in &event.frame.locals {
        println!("    {} = {}", name, value);
    }

    loop {
        let line = match editor.readline(PAUSED_PROMPT) {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => {
                std::process::exit(0);
            }
            Err(e) => return Err(e.into()),
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let _ = editor.add_history_entry(line);

        let (command, rest) = match line.split_once(' ') {
            Some((c, r)) => (c, r.trim()),
            None => (line, ""),
        };
        let mode = match command {
            "c" => Some(ResumeMode::Continue),
            "i" => Some(ResumeMode::StepInto),
            "o" => Some(ResumeMode::StepOver),
            "u" => Some(ResumeMode::StepOut),
            _ => None,
        };
        if let Some(mode) = mode {
            engine.resume(event.pause_id, mode);
            return Ok(());
        }
        match command {
            "e" if !rest.is_empty() => match evaluator.evaluate(rest, &event.frame.locals) {
                Ok(value) => println!("=> {}", value),
                Err(e) => output::print_error(&e.to_string()),
            },
            "b" => match rest.parse() {
                Ok(id) => {
                    engine.add_breakpoint(id);
                    println!("breakpoint added at #{}", id);
                }
                Err(_) => println!("usage: b <id>"),
            },
            "q" => std::process::exit(0),
            "help" => {
                println!("  c          continue");
                println!("  i          step into");
                println!("  o          step over");
                println!("  u          step out");
                println!("  e <expr>   evaluate an expression against the frame locals");
                println!("  b <id>     add a breakpoint");
                println!("  q          quit");
            }
            _ => println!("unknown command (try 'help')"),
        }
    }
}

fn resolve_line_arg(maps: &InstrumentationMaps, arg: &str) -> Option<u32> {
    let (file, line) = parse_file_line(arg)?;
    maps.resolve_line(file, line)
}

fn print_map(maps: &InstrumentationMaps) {
    for id in maps.checkpoints.keys() {
        print_site(maps, *id);
    }
}

fn print_site(maps: &InstrumentationMaps, id: u32) {
    if let Some(loc) = maps.checkpoints.get(&id) {
        let method = maps.method_of(id).unwrap_or("<unknown>");
        println!("  #{:<4} {}:{}:{}  ({})", id, loc.file, loc.line, loc.column, method);
    } else {
        println!("  #{:<4} <unknown>", id);
    }
}
