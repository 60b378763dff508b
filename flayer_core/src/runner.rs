use crate::alteration::BranchAlterations;
use crate::args::format_arguments;
use crate::collection::{ParsedLog, read_error_log_file};
use crate::config::{TargetCommand, ToolConfig};
use crate::parser::ParseError;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tempfile::TempDir;
use thiserror::Error;
use tracing::{debug, info, warn};

const LOG_FILE_PREFIX: &str = "flayer";
const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("Tool executable not found at {0:?}; a full path is required")]
    ExecutableNotFound(PathBuf),
    #[error("Failed to create temporary directory: {0}")]
    TempDir(#[source] std::io::Error),
    #[error("Failed to create output file {path:?}: {source}")]
    OutputFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to spawn command '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Error waiting for child: {0}")]
    Wait(#[source] std::io::Error),
    #[error("Failed to kill timed-out process: {0}")]
    Kill(#[source] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Exited(i32),
    Signaled(i32),
    Timeout,
    Abnormal,
}

impl RunStatus {
    fn from_exit_status(status: ExitStatus) -> Self {
        if let Some(code) = status.code() {
            return RunStatus::Exited(code);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return RunStatus::Signaled(signal);
            }
        }
        RunStatus::Abnormal
    }
}

/// Where one run left its output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub pid: u32,
    pub status: RunStatus,
    pub log_path: PathBuf,
    pub stdout_path: PathBuf,
    pub stderr_path: PathBuf,
}

impl RunReport {
    /// Parses the XML error log this run produced.
    pub fn collect(&self) -> Result<ParsedLog, ParseError> {
        read_error_log_file(&self.log_path)
    }
}

/// Runs the analysis tool against a target, one run at a time.
///
/// Logs and captured output live in a private temporary directory that is
/// removed when the runner is dropped.
#[derive(Debug)]
pub struct ToolRunner {
    tmp_dir: TempDir,
    timeout: Duration,
}

impl ToolRunner {
    pub fn new(timeout: Duration) -> Result<Self, RunnerError> {
        Ok(Self {
            tmp_dir: TempDir::new().map_err(RunnerError::TempDir)?,
            timeout,
        })
    }

    pub fn tmp_dir(&self) -> &Path {
        self.tmp_dir.path()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Replaces the temporary directory with a fresh one. The old one and
    /// everything in it is deleted.
    pub fn reset_tmp_dir(&mut self) -> Result<(), RunnerError> {
        let fresh = TempDir::new().map_err(RunnerError::TempDir)?;
        let old = std::mem::replace(&mut self.tmp_dir, fresh);
        if let Err(e) = old.close() {
            warn!("Failed to remove old temporary directory: {e}");
        }
        Ok(())
    }

    /// Log file argument; the tool replaces `%p` with the target's pid.
    pub fn log_file_pattern(&self) -> PathBuf {
        self.tmp_dir.path().join(format!("{LOG_FILE_PREFIX}.%p"))
    }

    pub fn log_path_for(&self, pid: u32) -> PathBuf {
        self.tmp_dir.path().join(format!("{LOG_FILE_PREFIX}.{pid}"))
    }

    fn wait_with_timeout(&self, child: &mut Child) -> Result<RunStatus, RunnerError> {
        let start_time = Instant::now();

        loop {
            match child.try_wait() {
                Ok(Some(status)) => return Ok(RunStatus::from_exit_status(status)),
                Ok(None) => {
                    if start_time.elapsed() > self.timeout {
                        warn!(pid = child.id(), "Target timed out, killing...");
                        child.kill().map_err(RunnerError::Kill)?;
                        let _ = child.wait();
                        return Ok(RunStatus::Timeout);
                    }
                    std::thread::sleep(POLL_INTERVAL);
                }
                Err(e) => return Err(RunnerError::Wait(e)),
            }
        }
    }

    fn output_file(&self, name: &str) -> Result<(PathBuf, File), RunnerError> {
        let path = self.tmp_dir.path().join(name);
        let file = File::create(&path).map_err(|source| RunnerError::OutputFile {
            path: path.clone(),
            source,
        })?;
        Ok((path, file))
    }

    /// Runs `target` under the tool and waits for it to finish or time out.
    ///
    /// Stdin is closed; stdout and stderr are captured to files in the
    /// temporary directory, overwriting those of the previous run.
    pub fn run(
        &self,
        config: &ToolConfig,
        alterations: &BranchAlterations,
        target: &TargetCommand,
    ) -> Result<RunReport, RunnerError> {
        if !config.executable.is_file() {
            return Err(RunnerError::ExecutableNotFound(config.executable.clone()));
        }

        let mut config = config.clone();
        config.log_file = self.log_file_pattern().display().to_string();
        let tool_args = format_arguments(&config, alterations);

        let (stdout_path, stdout_file) = self.output_file("out")?;
        let (stderr_path, stderr_file) = self.output_file("err")?;

        let mut cmd = Command::new(&config.executable);
        cmd.args(&tool_args)
            .args(target.argv())
            .envs(&target.env)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout_file))
            .stderr(Stdio::from(stderr_file));

        debug!(executable = ?config.executable, args = ?tool_args, target = ?target.argv(), "Spawning tool");
        let mut child = cmd.spawn().map_err(|source| RunnerError::Spawn {
            command: config.executable.display().to_string(),
            source,
        })?;
        let pid = child.id();
        info!(pid, "Tool started");

        let status = self.wait_with_timeout(&mut child)?;
        info!(pid, ?status, "Tool finished");

        Ok(RunReport {
            pid,
            status,
            log_path: self.log_path_for(pid),
            stdout_path,
            stderr_path,
        })
    }
}
