use clap::{Parser, Subcommand, ValueEnum};
use regforge::parser::Parser as AsmParser;
use regforge::{Engine, ExecutionLimits, Program, RegForgeError, Result};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{error, info, Level};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Raise log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Assemble and run a program, printing the final registers
    Run {
        /// Source file, or - for stdin
        file: PathBuf,
        /// Abort after this many dispatched instructions
        #[arg(long)]
        max_steps: Option<u64>,
        /// Use the strict limit preset
        #[arg(long)]
        strict: bool,
        #[arg(long, value_enum, default_value_t = Format::Text)]
        format: Format,
        /// Also report dispatched steps and the final flag
        #[arg(long)]
        stats: bool,
    },
    /// Assemble only and print the program listing
    Check {
        /// Source file, or - for stdin
        file: PathBuf,
    },
    /// Assemble and print the program as JSON
    Dump {
        /// Source file, or - for stdin
        file: PathBuf,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum Format {
    Text,
    Json,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let level = match args.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    match execute(args.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn execute(command: Command) -> Result<()> {
    match command {
        Command::Run {
            file,
            max_steps,
            strict,
            format,
            stats,
        } => {
            let mut limits = if strict {
                ExecutionLimits::strict()
            } else {
                ExecutionLimits::default()
            };
            if let Some(steps) = max_steps {
                limits = limits.with_max_steps(steps);
            }

            let program = assemble(&file, limits.clone())?;
            let execution = Engine::with_limits(limits).execute(&program)?;
            info!(steps = execution.steps, "program halted");

            match (format, stats) {
                (Format::Text, false) => println!("{}", execution.registers),
                (Format::Text, true) => println!(
                    "{}\nsteps={} flag={:?}",
                    execution.registers, execution.steps, execution.flag
                ),
                (Format::Json, false) => {
                    println!("{}", serde_json::to_string(&execution.registers)?)
                }
                (Format::Json, true) => println!("{}", serde_json::to_string(&execution)?),
            }
        }
        Command::Check { file } => {
            let program = assemble(&file, ExecutionLimits::default())?;
            print!("{}", program);
        }
        Command::Dump { file } => {
            let program = assemble(&file, ExecutionLimits::default())?;
            println!("{}", serde_json::to_string_pretty(&program)?);
        }
    }
    Ok(())
}

fn assemble(file: &Path, limits: ExecutionLimits) -> Result<Program> {
    let source = read_source(file)?;
    info!("Assembling {}", file.display());
    AsmParser::with_limits(limits).parse(&source)
}

fn read_source(file: &Path) -> Result<String> {
    if file.as_os_str() == "-" {
        let mut source = String::new();
        std::io::stdin().read_to_string(&mut source)?;
        return Ok(source);
    }
    fs::read_to_string(file).map_err(|e| {
        RegForgeError::IoError(format!("Failed to read {}: {}", file.display(), e))
    })
}
