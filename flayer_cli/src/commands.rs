//! The shell's command table and the state its commands act on.

use crate::report;
use anyhow::{Context as _, Result, anyhow, bail};
use flayer_core::{
    AlterationChange, AlterationTracker, BranchAction, ErrorCollection, ErrorEvent, FlayerConfig,
    FuzzFile, ParsedLog, RunHistory, Session, TaintSources, ToolRunner, full_command,
    parse_unique_id, read_error_log_file,
};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;
use std::time::Duration;
use tracing::info;

const DEFAULT_SNIPPET_RANGE: usize = 10;

/// State shared by all commands of one shell session.
pub struct Shell {
    pub config: FlayerConfig,
    pub alterations: AlterationTracker,
    pub runner: ToolRunner,
    /// Errors of the most recent run.
    pub errors: ErrorCollection,
    pub history: RunHistory,
    quit: bool,
}

impl Shell {
    pub fn new(config: FlayerConfig) -> Result<Self> {
        let runner = ToolRunner::new(Duration::from_millis(config.runner.timeout_ms))
            .context("Failed to set up the tool runner")?;
        Ok(Self {
            config,
            alterations: AlterationTracker::new(),
            runner,
            errors: ErrorCollection::new(),
            history: RunHistory::new(),
            quit: false,
        })
    }

    pub fn should_quit(&self) -> bool {
        self.quit
    }

    fn lookup(&self, id: &str) -> Result<&ErrorEvent> {
        let key = parse_unique_id(id).ok_or_else(|| anyhow!("'{id}' is not an error id"))?;
        self.errors
            .get(key)
            .ok_or_else(|| anyhow!("No error with id {id} in the last run"))
    }

    /// Makes `log` the current run and appends it to the history.
    fn record(&mut self, log: ParsedLog, out: &mut dyn Write) -> Result<()> {
        if let Some(warning) = &log.warning {
            writeln!(out, "Warning: the error log is incomplete, some errors may be missing ({warning})")?;
        }
        let count = log.errors.len();
        let index = self.history.push(log.errors.clone());
        self.errors = log.errors;
        info!(run = index, errors = count, "Run recorded");
        writeln!(out, "Run {index}: {count} errors")?;
        Ok(())
    }
}

/// What a handler gets besides the shell: the table (for `help`), the
/// usage line of the command being run, and the output stream.
pub struct Console<'a> {
    pub table: &'a CommandTable,
    pub usage: &'static str,
    pub out: &'a mut dyn Write,
}

impl Console<'_> {
    fn check_arity(&self, args: &[&str], min: usize, max: usize) -> Result<()> {
        if args.len() < min || args.len() > max {
            bail!("usage: {}", self.usage);
        }
        Ok(())
    }
}

pub type Handler = fn(&mut Shell, &[&str], &mut Console<'_>) -> Result<()>;

#[derive(Clone, Copy)]
pub struct Command {
    pub name: &'static str,
    pub usage: &'static str,
    pub help: &'static str,
    pub handler: Handler,
}

const COMMANDS: &[Command] = &[
    Command {
        name: "help",
        usage: "help [COMMAND]",
        help: "List commands, or describe one",
        handler: cmd_help,
    },
    Command {
        name: "about",
        usage: "about",
        help: "Describe what this shell does",
        handler: cmd_about,
    },
    Command {
        name: "banner",
        usage: "banner",
        help: "Show version and current settings",
        handler: cmd_banner,
    },
    Command {
        name: "summary",
        usage: "summary",
        help: "List the errors of the last run, grouped by kind",
        handler: cmd_summary,
    },
    Command {
        name: "details",
        usage: "details ID",
        help: "Show every field and frame of one error",
        handler: cmd_details,
    },
    Command {
        name: "snippet",
        usage: "snippet ID [RANGE]",
        help: "Show source lines around the error's innermost frame",
        handler: cmd_snippet,
    },
    Command {
        name: "taint",
        usage: "taint [FLAGS]",
        help: "Show or set taint sources (n = network, f/s = file)",
        handler: cmd_taint,
    },
    Command {
        name: "filter",
        usage: "filter [PREFIX|-]",
        help: "Show or set the file path prefix to taint ('-' clears it)",
        handler: cmd_filter,
    },
    Command {
        name: "command",
        usage: "command [PROG ARGS..]",
        help: "Show or set the target program and its arguments",
        handler: cmd_command,
    },
    Command {
        name: "run",
        usage: "run",
        help: "Run the target under the tool and collect its errors",
        handler: cmd_run,
    },
    Command {
        name: "load-log",
        usage: "load-log PATH",
        help: "Record the errors of an existing XML log as a run",
        handler: cmd_load_log,
    },
    Command {
        name: "errordiff",
        usage: "errordiff A B",
        help: "List errors of run B that did not occur in run A",
        handler: cmd_errordiff,
    },
    Command {
        name: "pasterrors",
        usage: "pasterrors",
        help: "List past runs",
        handler: cmd_pasterrors,
    },
    Command {
        name: "clearerrors",
        usage: "clearerrors",
        help: "Forget all past runs",
        handler: cmd_clearerrors,
    },
    Command {
        name: "alter",
        usage: "alter [ID|ADDR] [yes|no]",
        help: "List, set or remove forced branch outcomes",
        handler: cmd_alter,
    },
    Command {
        name: "save",
        usage: "save PATH",
        help: "Save settings and alterations to a session file",
        handler: cmd_save,
    },
    Command {
        name: "restore",
        usage: "restore PATH",
        help: "Load settings and alterations from a session file",
        handler: cmd_restore,
    },
    Command {
        name: "fuzz",
        usage: "fuzz SEED PATH [MAX_BYTES]",
        help: "Write a seeded pseudo-random input file",
        handler: cmd_fuzz,
    },
    Command {
        name: "quit",
        usage: "quit",
        help: "Leave the shell",
        handler: cmd_quit,
    },
];

/// Name to command lookup, built once at startup.
pub struct CommandTable {
    commands: BTreeMap<&'static str, Command>,
}

impl CommandTable {
    pub fn new() -> Self {
        Self {
            commands: COMMANDS.iter().map(|cmd| (cmd.name, *cmd)).collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Command> {
        self.commands.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Command> {
        self.commands.values()
    }

    /// Runs the command named by `words[0]` with the remaining words as
    /// arguments. An empty line does nothing.
    pub fn dispatch(&self, shell: &mut Shell, words: &[&str], out: &mut dyn Write) -> Result<()> {
        let Some((name, args)) = words.split_first() else {
            return Ok(());
        };
        let command = self
            .get(name)
            .ok_or_else(|| anyhow!("Unknown command '{name}', try 'help'"))?;
        let mut console = Console {
            table: self,
            usage: command.usage,
            out,
        };
        (command.handler)(shell, args, &mut console)
    }
}

impl Default for CommandTable {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_arg<T: std::str::FromStr>(value: &str, what: &str) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .parse()
        .with_context(|| format!("Invalid {what} '{value}'"))
}

fn cmd_help(_shell: &mut Shell, args: &[&str], console: &mut Console<'_>) -> Result<()> {
    console.check_arity(args, 0, 1)?;
    if let Some(name) = args.first() {
        let command = console
            .table
            .get(name)
            .ok_or_else(|| anyhow!("Unknown command '{name}'"))?;
        writeln!(console.out, "{}\n    {}", command.usage, command.help)?;
        return Ok(());
    }
    let table = console.table;
    for command in table.iter() {
        writeln!(console.out, "{:<28} {}", command.usage, command.help)?;
    }
    Ok(())
}

fn cmd_about(_shell: &mut Shell, args: &[&str], console: &mut Console<'_>) -> Result<()> {
    console.check_arity(args, 0, 0)?;
    writeln!(
        console.out,
        "flayer drives a taint-tracking Valgrind tool over a target program.\n\
         Each run reports the conditional jumps that depend on tainted input; \
         those branches can then be forced one way or the other with 'alter' \
         and the program run again to reach deeper code."
    )?;
    Ok(())
}

fn cmd_banner(shell: &mut Shell, args: &[&str], console: &mut Console<'_>) -> Result<()> {
    console.check_arity(args, 0, 0)?;
    let config = &shell.config;
    writeln!(console.out, "flayer {}", env!("CARGO_PKG_VERSION"))?;
    writeln!(
        console.out,
        "Command: {}",
        full_command(&config.tool, shell.alterations.alterations(), &config.target)
    )?;
    writeln!(console.out, "Taint sources: {}", describe_taint(config.tool.taint))?;
    writeln!(console.out, "Timeout: {:?}", shell.runner.timeout())?;
    writeln!(console.out, "Temporary directory: {}", shell.runner.tmp_dir().display())?;
    writeln!(console.out, "Runs recorded: {}", shell.history.len())?;
    Ok(())
}

fn cmd_summary(shell: &mut Shell, args: &[&str], console: &mut Console<'_>) -> Result<()> {
    console.check_arity(args, 0, 0)?;
    report::write_summary(console.out, &shell.errors)?;
    Ok(())
}

fn cmd_details(shell: &mut Shell, args: &[&str], console: &mut Console<'_>) -> Result<()> {
    console.check_arity(args, 1, 1)?;
    let error = shell.lookup(args[0])?;
    report::write_details(console.out, error)?;
    Ok(())
}

fn cmd_snippet(shell: &mut Shell, args: &[&str], console: &mut Console<'_>) -> Result<()> {
    console.check_arity(args, 1, 2)?;
    let range = match args.get(1) {
        Some(value) => parse_arg(value, "range")?,
        None => DEFAULT_SNIPPET_RANGE,
    };
    let error = shell.lookup(args[0])?;
    let frame = error
        .top_frame()
        .ok_or_else(|| anyhow!("Error {} has no debugging information", error.unique))?;
    report::write_snippet(console.out, frame, range)
}

fn cmd_taint(shell: &mut Shell, args: &[&str], console: &mut Console<'_>) -> Result<()> {
    console.check_arity(args, 0, 1)?;
    if let Some(flags) = args.first() {
        shell.config.tool.taint = TaintSources::parse(flags)?;
    }
    writeln!(console.out, "Taint sources: {}", describe_taint(shell.config.tool.taint))?;
    Ok(())
}

fn cmd_filter(shell: &mut Shell, args: &[&str], console: &mut Console<'_>) -> Result<()> {
    console.check_arity(args, 0, 1)?;
    match args.first() {
        Some(&"-") => shell.config.tool.file_filter.clear(),
        Some(prefix) => shell.config.tool.file_filter = prefix.to_string(),
        None => {}
    }
    let filter = &shell.config.tool.file_filter;
    if filter.is_empty() {
        writeln!(console.out, "File filter: none")?;
    } else {
        writeln!(console.out, "File filter: {filter}")?;
    }
    Ok(())
}

fn cmd_command(shell: &mut Shell, args: &[&str], console: &mut Console<'_>) -> Result<()> {
    if let Some((program, rest)) = args.split_first() {
        let target = &mut shell.config.target;
        target.program = program.to_string();
        target.args = rest.iter().map(|arg| arg.to_string()).collect();
    }
    writeln!(console.out, "Target: {}", shell.config.target.argv().join(" "))?;
    Ok(())
}

fn cmd_run(shell: &mut Shell, args: &[&str], console: &mut Console<'_>) -> Result<()> {
    console.check_arity(args, 0, 0)?;
    let report = shell.runner.run(
        &shell.config.tool,
        shell.alterations.alterations(),
        &shell.config.target,
    )?;
    writeln!(console.out, "Process {} finished: {:?}", report.pid, report.status)?;
    let log = report
        .collect()
        .with_context(|| format!("No usable error log at {}", report.log_path.display()))?;
    shell.record(log, console.out)
}

fn cmd_load_log(shell: &mut Shell, args: &[&str], console: &mut Console<'_>) -> Result<()> {
    console.check_arity(args, 1, 1)?;
    let log = read_error_log_file(Path::new(args[0]))?;
    shell.record(log, console.out)
}

fn cmd_errordiff(shell: &mut Shell, args: &[&str], console: &mut Console<'_>) -> Result<()> {
    console.check_arity(args, 2, 2)?;
    let run_a = parse_arg(args[0], "run number")?;
    let run_b = parse_arg(args[1], "run number")?;
    let new_errors = shell.history.error_diff(run_a, run_b)?;
    report::write_error_list(console.out, &new_errors)?;
    Ok(())
}

fn cmd_pasterrors(shell: &mut Shell, args: &[&str], console: &mut Console<'_>) -> Result<()> {
    console.check_arity(args, 0, 0)?;
    report::write_history(console.out, &shell.history)?;
    Ok(())
}

fn cmd_clearerrors(shell: &mut Shell, args: &[&str], console: &mut Console<'_>) -> Result<()> {
    console.check_arity(args, 0, 0)?;
    shell.history.clear();
    shell.errors = ErrorCollection::new();
    writeln!(console.out, "Error history cleared")?;
    Ok(())
}

fn parse_action(word: &str) -> Result<BranchAction> {
    match word {
        "yes" | "1" => Ok(BranchAction::Follow),
        "no" | "0" => Ok(BranchAction::Skip),
        _ => bail!("Branch action must be 'yes' or 'no', got '{word}'"),
    }
}

/// An id naming an error of the last run alters that error's branch;
/// anything else is taken as a raw instruction address.
fn cmd_alter(shell: &mut Shell, args: &[&str], console: &mut Console<'_>) -> Result<()> {
    console.check_arity(args, 0, 2)?;
    let Some(target) = args.first() else {
        report::write_alterations(console.out, &shell.alterations)?;
        return Ok(());
    };
    let action = args.get(1).map(|word| parse_action(word)).transpose()?;

    let change = match shell.lookup(target).ok().cloned() {
        Some(error) => shell.alterations.alter_error(&error, action)?,
        None => shell.alterations.alter_address(target, action, None)?,
    };
    match change {
        AlterationChange::Set { address, action } => {
            writeln!(console.out, "Branch at {address} set to {action}")?
        }
        AlterationChange::Removed { address } => {
            writeln!(console.out, "Alteration at {address} removed")?
        }
    }
    Ok(())
}

fn cmd_save(shell: &mut Shell, args: &[&str], console: &mut Console<'_>) -> Result<()> {
    console.check_arity(args, 1, 1)?;
    let session = Session {
        tool: shell.config.tool.clone(),
        target: shell.config.target.clone(),
        alterations: shell.alterations.clone(),
    };
    session.save(Path::new(args[0]))?;
    writeln!(console.out, "Session saved to {}", args[0])?;
    Ok(())
}

fn cmd_restore(shell: &mut Shell, args: &[&str], console: &mut Console<'_>) -> Result<()> {
    console.check_arity(args, 1, 1)?;
    let session = Session::load(Path::new(args[0]))?;
    shell.config.tool = session.tool;
    shell.config.target = session.target;
    shell.alterations = session.alterations;
    writeln!(console.out, "Session restored from {}", args[0])?;
    Ok(())
}

fn cmd_fuzz(_shell: &mut Shell, args: &[&str], console: &mut Console<'_>) -> Result<()> {
    console.check_arity(args, 2, 3)?;
    let seed = parse_arg(args[0], "seed")?;
    let mut fuzz = FuzzFile::new(seed);
    if let Some(max_bytes) = args.get(2) {
        fuzz = fuzz.with_max_bytes(parse_arg(max_bytes, "byte count")?);
    }
    let written = fuzz.write_file(Path::new(args[1]))?;
    writeln!(console.out, "Wrote {written} bytes to {}", args[1])?;
    Ok(())
}

fn cmd_quit(shell: &mut Shell, args: &[&str], console: &mut Console<'_>) -> Result<()> {
    console.check_arity(args, 0, 0)?;
    shell.quit = true;
    Ok(())
}

fn describe_taint(taint: TaintSources) -> String {
    let yes_no = |on: bool| if on { "yes" } else { "no" };
    format!(
        "{taint} (network: {}, file: {})",
        yes_no(taint.network),
        yes_no(taint.file)
    )
}
