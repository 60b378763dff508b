mod commands;
mod report;

use anyhow::Context;
use clap::Parser;
use commands::{CommandTable, Shell};
use flayer_core::FlayerConfig;
use std::io::{self, BufRead, IsTerminal, Write};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG_FILE: &str = "flayer.toml";

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Cli {
    #[clap(short, long = "config", value_parser)]
    config_file: Option<PathBuf>,
    /// Log more (-v info, -vv debug)
    #[clap(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
    #[clap(long)]
    timeout_ms: Option<u64>,
    /// Target program to run under the tool
    #[clap(long)]
    program: Option<String>,
    /// A single shell command to run instead of reading commands from stdin
    command: Vec<String>,
    /// Arguments for the target program
    #[clap(last = true)]
    target_args: Vec<String>,
}

fn init_tracing(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("info"),
        _ => EnvFilter::new("debug"),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn load_config(path: Option<PathBuf>) -> Result<FlayerConfig, anyhow::Error> {
    match path {
        Some(config_path) => {
            info!(path = ?config_path, "Loading configuration");
            FlayerConfig::load_from_file(&config_path)
        }
        None => {
            let default_config_path = PathBuf::from(DEFAULT_CONFIG_FILE);
            if default_config_path.exists() {
                info!(path = ?default_config_path, "Loading default configuration");
                FlayerConfig::load_from_file(&default_config_path)
            } else {
                info!("No configuration file found, using built-in defaults");
                Ok(FlayerConfig::default())
            }
        }
    }
}

/// Reads commands line by line until EOF or `quit`. A failing command is
/// reported and the shell carries on.
fn run_interactive(
    table: &CommandTable,
    shell: &mut Shell,
    out: &mut dyn Write,
) -> Result<(), anyhow::Error> {
    let stdin = io::stdin();
    let show_prompt = stdin.is_terminal();
    let mut lines = stdin.lock().lines();
    loop {
        if show_prompt {
            write!(out, "flayer> ")?;
            out.flush()?;
        }
        let Some(line) = lines.next() else {
            break;
        };
        let line = line.context("Failed to read command from stdin")?;
        let words: Vec<&str> = line.split_whitespace().collect();
        if let Err(e) = table.dispatch(shell, &words, out) {
            eprintln!("Error: {e:#}");
        }
        if shell.should_quit() {
            break;
        }
    }
    Ok(())
}

fn main() -> Result<(), anyhow::Error> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config = load_config(cli.config_file)?;
    if let Some(timeout_ms) = cli.timeout_ms {
        config.runner.timeout_ms = timeout_ms;
    }
    if let Some(program) = cli.program {
        config.target.program = program;
    }
    if !cli.target_args.is_empty() {
        config.target.args = cli.target_args;
    }

    let table = CommandTable::new();
    let mut shell = Shell::new(config)?;
    let stdout = io::stdout();
    let mut out = stdout.lock();

    if cli.command.is_empty() {
        run_interactive(&table, &mut shell, &mut out)
    } else {
        let words: Vec<&str> = cli.command.iter().map(String::as_str).collect();
        table.dispatch(&mut shell, &words, &mut out)
    }
}
