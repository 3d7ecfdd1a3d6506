use std::fs;
use std::path::PathBuf;
use std::process;

use clap::{ArgAction, Parser, Subcommand};
use tracing::{info, Level};

use clearscript_compiler::{compile_with, parse_source, typeck, CompileError, CompileOptions};
use statescript::Line;
use statescript_vm::Vm;

#[derive(Parser)]
#[command(
    name = "clearscript",
    about = "ClearScript compiler: C-like source to StateScript"
)]
struct Cli {
    /// Log to stderr; repeat for more detail.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Compile a ClearScript source file to StateScript.
    Compile {
        /// Source file path
        file: PathBuf,
        /// Output file path. Defaults to the input with a .ss extension.
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Print the script instead of writing a file.
        #[arg(long, conflicts_with = "output")]
        stdout: bool,
        /// Skip the type checker.
        #[arg(long)]
        no_typecheck: bool,
    },
    /// Parse and type check without generating code.
    Check {
        /// Source file path
        file: PathBuf,
    },
    /// Dump the AST of a source file as JSON.
    Ast {
        /// Source file path
        file: PathBuf,
    },
    /// Compile, then run the script in the reference simulator.
    Trace {
        /// Source file path
        file: PathBuf,
        /// Maximum execution steps.
        #[arg(long, default_value = "100000")]
        max_steps: u64,
    },
    /// Print the compiler version.
    Version,
}

fn main() {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_max_level(level)
        .init();

    if let Err(e) = run(cli.command) {
        eprintln!("error: {e}");
        process::exit(1);
    }
}

fn run(command: Command) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Command::Compile {
            file,
            output,
            stdout,
            no_typecheck,
        } => {
            let source = fs::read_to_string(&file)?;
            let options = CompileOptions {
                typecheck: !no_typecheck,
            };
            let script = compile_with(&source, &options)?;
            if stdout {
                println!("{script}");
                return Ok(());
            }
            let out_path = output.unwrap_or_else(|| file.with_extension("ss"));
            fs::write(&out_path, script.to_string())?;
            info!(lines = script.lines.len(), "script written");
            println!("compiled {} -> {}", file.display(), out_path.display());
        }
        Command::Check { file } => {
            let source = fs::read_to_string(&file)?;
            let program = parse_source(&source)?;
            match typeck::check(&program) {
                Ok(()) => println!("{}: ok", file.display()),
                Err(CompileError::Type(errors)) => {
                    for error in &errors.0 {
                        eprintln!("{}: {error}", file.display());
                    }
                    return Err(format!("{} type error(s)", errors.0.len()).into());
                }
                Err(e) => return Err(e.into()),
            }
        }
        Command::Ast { file } => {
            let source = fs::read_to_string(&file)?;
            let program = parse_source(&source)?;
            let json = serde_json::to_string_pretty(&program)?;
            println!("{json}");
        }
        Command::Trace { file, max_steps } => {
            let source = fs::read_to_string(&file)?;
            let script = compile_with(&source, &CompileOptions::default())?;
            let mut vm = Vm::new(script)?;
            vm.set_max_steps(max_steps);
            vm.trace_enabled = true;

            let exit = vm.run()?;
            println!("exit: {exit:?} after {} steps", vm.step_count());

            println!("\n--- State ---");
            for (name, value) in vm.state() {
                println!("  {name} = {value}");
            }
            if !vm.events.is_empty() {
                println!("\n--- Events ---");
                for event in &vm.events {
                    println!("  {:04}: {event}", event.line);
                }
            }
            println!("\n--- Trace ({} lines) ---", vm.trace.len());
            for &ip in &vm.trace {
                if let Some(line @ (Line::Instr(_) | Line::Raw(_))) = vm.script().lines.get(ip) {
                    println!("  {ip:04}: {line}");
                }
            }
        }
        Command::Version => {
            println!("clearscript v{}", env!("CARGO_PKG_VERSION"));
        }
    }
    Ok(())
}
