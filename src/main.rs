//! tracker CLI entry point.
//!
//! Usage:
//!   tracker                        # Interactive REPL
//!   tracker -c <line>              # Execute one line and exit
//!   tracker script.scr [args...]   # Run a script with $0, $1, ... bound to args
//!   tracker --no-startup ...       # Skip startup.scr

use std::env;
use std::path::Path;
use std::process::ExitCode;

use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use tracker::ast::{Primitive, Value};
use tracker::builtinops::{find_builtin, get_builtin_ops};
use tracker::{Interpreter, SessionConfig};

fn main() -> ExitCode {
    // Initialize tracing (respects RUST_LOG env var)
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .init();

    let mut args: Vec<String> = env::args().skip(1).collect();
    let mut config = SessionConfig::default();
    if let Some(at) = args.iter().position(|arg| arg == "--no-startup") {
        args.remove(at);
        config.startup_script = None;
    }

    match args.first().map(String::as_str) {
        None => run_repl(config),

        Some("--help" | "-h") => {
            print_usage();
            ExitCode::SUCCESS
        }

        Some("--version" | "-V") => {
            println!("tracker {}", env!("CARGO_PKG_VERSION"));
            ExitCode::SUCCESS
        }

        Some("-c") => match args.get(1) {
            Some(line) => run_line(config, line),
            None => {
                eprintln!("-c requires a line to execute");
                ExitCode::FAILURE
            }
        },

        Some(path) if !path.starts_with('-') => run_script(config, Path::new(path), &args[1..]),

        Some(unknown) => {
            eprintln!("Unknown option: {unknown}");
            eprintln!("Run 'tracker --help' for usage.");
            ExitCode::FAILURE
        }
    }
}

fn print_usage() {
    println!(
        r#"tracker v{}

Usage:
  tracker                        Interactive REPL
  tracker -c <line>              Execute one line and exit
  tracker <script> [args...]     Run a script; args are bound to $0, $1, ...

Options:
  -c <line>                      Execute a line and exit
  --no-startup                   Do not run startup.scr first
  -h, --help                     Show this help
  -V, --version                  Show version

Examples:
  tracker -c 'print 6 * 7'
  tracker encounter.scr 12 "goblin"
"#,
        env!("CARGO_PKG_VERSION")
    );
}

fn outcome(succeeded: bool) -> ExitCode {
    if succeeded {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

/// Execute a single line and exit.
fn run_line(config: SessionConfig, line: &str) -> ExitCode {
    let mut interp = Interpreter::new(config);
    interp.run_startup();
    outcome(interp.dispatch_line(line))
}

/// Run a script file, aborting on its first failing line.
fn run_script(config: SessionConfig, path: &Path, args: &[String]) -> ExitCode {
    let mut interp = Interpreter::new(config);
    interp.run_startup();

    let args: Vec<Value> = args
        .iter()
        .map(|arg| Value::Primitive(Primitive::Text(arg.clone())))
        .collect();
    match interp.run_file(path, &args) {
        Ok(_) => ExitCode::SUCCESS,
        Err(err) => {
            interp.report_error(&err);
            ExitCode::FAILURE
        }
    }
}

fn run_repl(config: SessionConfig) -> ExitCode {
    let prompt = config.prompt.clone();
    let history = config.history_file.clone();
    let mut interp = Interpreter::new(config);

    let mut rl = match DefaultEditor::new() {
        Ok(rl) => rl,
        Err(err) => {
            eprintln!("Could not initialize REPL: {err}");
            return ExitCode::FAILURE;
        }
    };
    if let Some(history) = &history
        && let Err(err) = rl.load_history(history)
    {
        tracing::debug!(file = %history.display(), error = %err, "no history loaded");
    }

    println!("tracker {}", env!("CARGO_PKG_VERSION"));
    println!("Type :help for help, or Ctrl+D to exit.");
    println!();

    interp.run_startup();

    let mut code = ExitCode::SUCCESS;
    while interp.is_running() {
        match rl.readline(&prompt) {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                // Add the line to history
                let _ = rl.add_history_entry(line);

                match line {
                    ":help" => print_help(None),
                    ":quit" | ":exit" => break,
                    _ if line.starts_with(":help ") => print_help(Some(line[6..].trim())),
                    _ => {
                        interp.dispatch_line(line);
                    }
                }
            }

            Err(ReadlineError::Eof) | Err(ReadlineError::Interrupted) => break,
            Err(err) => {
                eprintln!("Error: {err}");
                code = ExitCode::FAILURE;
                break;
            }
        }
    }

    if let Some(history) = &history
        && let Err(err) = rl.save_history(history)
    {
        tracing::warn!(file = %history.display(), error = %err, "could not save history");
    }
    code
}

fn print_help(command: Option<&str>) {
    if let Some(name) = command {
        match find_builtin(name) {
            Some(op) => {
                println!("  {}", op.usage);
                if !op.synonyms.is_empty() {
                    println!("  also: {}", op.synonyms.join(", "));
                }
            }
            None => println!("No command named '{name}'."),
        }
        return;
    }

    println!("Every line is a command or expression followed by comma separated arguments:");
    println!("  set hp, 12          create party          set party.hp, hp * 2");
    println!("  for i, 1, 3, print(i)                     if hp > 10, \"fine\", \"hurt\"");
    println!();
    println!("Commands:");
    for op in get_builtin_ops() {
        println!("  {}", op.usage);
    }
    println!();
    println!("  :help <command>  Show one command");
    println!("  :quit            Exit the interpreter");
}
