//! Hydrogen CLI
//!
//! Command-line front end for the Hydrogen language: run a script file or
//! drop into a line-at-a-time REPL. Argument parsing and REPL UX are kept
//! deliberately thin — the embedding API in `hydrogen-runtime` is the real
//! surface this binary exercises.

use std::path::PathBuf;
use std::process;

use clap::{Parser as ClapParser, Subcommand};
use hydrogen_core::heap::deref;
use hydrogen_core::{HeapObject, HyValue};
use hydrogen_runtime::{HyConfig, HyState};

#[derive(ClapParser)]
#[command(name = "hydrogen")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Run Hydrogen scripts or start an interactive REPL", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a Hydrogen source file
    Run {
        /// Input .hy source file
        file: PathBuf,

        /// Dump each function's bytecode as it's compiled
        #[arg(long)]
        trace_bytecode: bool,
    },

    /// Start an interactive read-eval-print loop
    Repl {
        /// Dump each function's bytecode as it's compiled
        #[arg(long)]
        trace_bytecode: bool,
    },
}

fn main() {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run { file, trace_bytecode } => run_file(&file, trace_bytecode),
        Commands::Repl { trace_bytecode } => run_repl(trace_bytecode),
    }
}

fn config(trace_bytecode: bool) -> HyConfig {
    let mut config = user_config().unwrap_or_default();
    config.trace_bytecode = config.trace_bytecode || trace_bytecode;
    config
}

/// Reads `~/.hydrogen.toml` if it exists, following the `[hydrogen]`-table
/// convention `HyConfig::from_toml` expects. Absence or a parse error just
/// falls back to defaults — this is a convenience, not a contract.
fn user_config() -> Option<HyConfig> {
    let path = home::home_dir()?.join(".hydrogen.toml");
    let text = std::fs::read_to_string(path).ok()?;
    HyConfig::from_toml(&text).ok()
}

fn run_file(path: &PathBuf, trace_bytecode: bool) {
    let mut state = HyState::new(config(trace_bytecode));
    match state.run_file(path) {
        Ok(_) => {}
        Err(diag) => {
            eprintln!("{diag}");
            process::exit(1);
        }
    }
}

fn run_repl(trace_bytecode: bool) {
    let mut state = HyState::new(config(trace_bytecode));
    let mut editor = rustyline::DefaultEditor::new().unwrap_or_else(|e| {
        eprintln!("failed to start line editor: {e}");
        process::exit(1);
    });

    println!("Hydrogen {} — :quit to exit", env!("CARGO_PKG_VERSION"));
    loop {
        let line = match editor.readline("hy> ") {
            Ok(line) => line,
            Err(_) => break,
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == ":quit" || line == ":q" {
            break;
        }
        let _ = editor.add_history_entry(line);

        let source = format!("return {line}");
        match state.run_string(None, source) {
            Ok(value) => println!("{}", format_value(&state, value)),
            Err(diag) => eprintln!("{diag}"),
        }
    }
}

/// Renders a value for REPL output. Reaches into the heap directly (rather
/// than through a public accessor) since this is purely a display concern
/// local to the CLI, not part of the embedding contract.
fn format_value(state: &HyState, value: HyValue) -> String {
    if value.is_nil() {
        return "nil".to_string();
    }
    if value.is_bool() {
        return value.as_bool().to_string();
    }
    if value.is_num() {
        return value.as_f64().to_string();
    }
    if value.is_fn() {
        return format!("<function {}>", value.fn_index());
    }
    if value.is_native() {
        return format!("<native {}>", value.native_index());
    }
    if value.is_ptr() {
        // SAFETY: `value` came from this same state's heap.
        let obj = unsafe { deref(value) };
        return match obj {
            HeapObject::String(s) => format!("{:?}", s.contents),
            HeapObject::Array(a) => {
                let items: Vec<String> = a.contents.iter().map(|v| format_value(state, *v)).collect();
                format!("[{}]", items.join(", "))
            }
            HeapObject::Struct(s) => {
                let name = &state.program.structs[s.definition as usize].name;
                format!("<{name} instance>")
            }
            HeapObject::Method(_) => "<bound method>".to_string(),
            HeapObject::Closure(_) => "<closure>".to_string(),
        };
    }
    "<value>".to_string()
}
