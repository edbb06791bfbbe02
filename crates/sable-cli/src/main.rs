//! Sable unified CLI tool
//!
//! Single command-line interface for running and debugging Sable scripts,
//! plus the out-of-process expression-evaluator transport.

mod commands;
mod output;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "sable")]
#[command(about = "Sable programming language toolchain")]
#[command(version)]
struct Cli {
    /// Enable engine debug logging (or set SABLE_LOG)
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a script
    #[command(alias = "r")]
    Run {
        /// Script file path
        file: PathBuf,
    },

    /// Debug a script interactively
    #[command(alias = "d")]
    Debug {
        /// Script file path
        file: PathBuf,
        /// Expression-evaluator cache capacity
        #[arg(long, default_value = "64")]
        eval_cache: usize,
        /// Write the instrumented source and checkpoint map into this directory
        #[arg(long)]
        emit: Option<PathBuf>,
    },

    /// Out-of-process expression evaluator: reads code bracketed by
    /// ---BEGIN-CODE--- / ---END-CODE--- on stdin
    EvalServer,
}

fn main() {
    let cli = Cli::parse();

    if cli.verbose || std::env::var_os("SABLE_LOG").is_some() {
        let filter = tracing_subscriber::EnvFilter::try_from_env("SABLE_LOG")
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("sable_engine=debug"));
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }

    let result = match cli.command {
        Commands::Run { file } => commands::run::execute(&file),
        Commands::Debug {
            file,
            eval_cache,
            emit,
        } => commands::debug::execute(&file, eval_cache, emit.as_deref()),
        Commands::EvalServer => {
            std::process::exit(commands::eval_server::execute());
        }
    };

    if let Err(e) = result {
        output::print_error(&format!("{:#}", e));
        std::process::exit(1);
    }
}
