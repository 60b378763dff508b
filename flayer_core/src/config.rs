use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Unknown taint source '{0}' (expected any of n, f, s)")]
    UnknownTaintFlag(char),
}

/// Which input channels the tool marks as tainted.
///
/// Written as a flag string: `n` for network reads, `f` for file reads and
/// `s` for standard input. The tool has no separate switch for stdin, so
/// `s` and `f` both enable file tainting.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(try_from = "String", into = "String")]
pub struct TaintSources {
    pub network: bool,
    pub file: bool,
}

impl TaintSources {
    pub fn parse(flags: &str) -> Result<Self, ConfigError> {
        let mut sources = TaintSources {
            network: false,
            file: false,
        };
        for ch in flags.chars() {
            match ch {
                'n' => sources.network = true,
                'f' | 's' => sources.file = true,
                other => return Err(ConfigError::UnknownTaintFlag(other)),
            }
        }
        Ok(sources)
    }
}

impl Default for TaintSources {
    fn default() -> Self {
        Self {
            network: true,
            file: true,
        }
    }
}

impl fmt::Display for TaintSources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.network {
            f.write_str("n")?;
        }
        if self.file {
            f.write_str("fs")?;
        }
        Ok(())
    }
}

impl TryFrom<String> for TaintSources {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<TaintSources> for String {
    fn from(value: TaintSources) -> Self {
        value.to_string()
    }
}

/// Settings passed to the analysis tool. Rendering them as command-line
/// arguments is done by [`crate::args::format_arguments`].
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct ToolConfig {
    #[serde(default = "default_executable")]
    pub executable: PathBuf,
    #[serde(default = "default_tool")]
    pub tool: String,
    #[serde(default = "default_true")]
    pub xml: bool,
    #[serde(default)]
    pub db_attach: bool,
    #[serde(default = "default_db_command")]
    pub db_command: String,
    #[serde(default)]
    pub taint: TaintSources,
    #[serde(default)]
    pub file_filter: String,
    /// Filled in by the runner for each run.
    #[serde(skip)]
    pub log_file: String,
}

fn default_tool() -> String {
    "flayer".to_string()
}

fn default_true() -> bool {
    true
}

fn default_db_command() -> String {
    "\"xterm -e \"gdb -nw %f %p\"\"".to_string()
}

/// `valgrind` from `PATH`, falling back to `/usr/bin/valgrind`.
pub fn default_executable() -> PathBuf {
    find_executable("valgrind").unwrap_or_else(|| PathBuf::from("/usr/bin/valgrind"))
}

/// Looks `name` up in the directories listed in `PATH`.
pub fn find_executable(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            executable: default_executable(),
            tool: default_tool(),
            xml: true,
            db_attach: false,
            db_command: default_db_command(),
            taint: TaintSources::default(),
            file_filter: String::new(),
            log_file: String::new(),
        }
    }
}

/// The program run under the tool. `env` is added to the inherited
/// environment rather than replacing it.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct TargetCommand {
    #[serde(default = "default_program")]
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

fn default_program() -> String {
    "/bin/true".to_string()
}

impl TargetCommand {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            env: BTreeMap::new(),
        }
    }

    /// Program followed by its arguments.
    pub fn argv(&self) -> Vec<String> {
        std::iter::once(self.program.clone())
            .chain(self.args.iter().cloned())
            .collect()
    }
}

impl Default for TargetCommand {
    fn default() -> Self {
        Self::new(default_program(), Vec::new())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct RunnerSettings {
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

pub fn default_timeout_ms() -> u64 {
    60_000
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct FlayerConfig {
    #[serde(default)]
    pub tool: ToolConfig,
    #[serde(default)]
    pub target: TargetCommand,
    #[serde(default)]
    pub runner: RunnerSettings,
}

impl FlayerConfig {
    pub fn load_from_file(path: &Path) -> Result<Self, anyhow::Error> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file at {:?}: {}", path, e))?;

        let config: FlayerConfig = toml::from_str(&content).map_err(|e| {
            anyhow::anyhow!("Failed to parse TOML from config file {:?}: {}", path, e)
        })?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn taint_flags_round_trip_through_display() {
        let all = TaintSources::parse("nfs").unwrap();
        assert!(all.network && all.file);
        assert_eq!(all.to_string(), "nfs");

        let stdin_only = TaintSources::parse("s").unwrap();
        assert!(!stdin_only.network);
        assert!(stdin_only.file);
        assert_eq!(stdin_only.to_string(), "fs");

        let none = TaintSources::parse("").unwrap();
        assert_eq!(none.to_string(), "");
    }

    #[test]
    fn unknown_taint_flag_is_rejected() {
        assert_eq!(
            TaintSources::parse("ne"),
            Err(ConfigError::UnknownTaintFlag('e'))
        );
    }

    #[test]
    fn loads_partial_toml_with_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[tool]
executable = "/opt/valgrind/bin/valgrind"
taint = "n"
file-filter = "/tmp/input"

[target]
program = "/usr/bin/file"
args = ["-b", "/tmp/input"]
env = {{ LANG = "C" }}
"#
        )
        .unwrap();

        let config = FlayerConfig::load_from_file(file.path()).unwrap();
        assert_eq!(
            config.tool.executable,
            PathBuf::from("/opt/valgrind/bin/valgrind")
        );
        assert_eq!(config.tool.tool, "flayer");
        assert!(config.tool.xml);
        assert!(config.tool.taint.network);
        assert!(!config.tool.taint.file);
        assert_eq!(config.tool.file_filter, "/tmp/input");
        assert_eq!(
            config.target.argv(),
            vec!["/usr/bin/file", "-b", "/tmp/input"]
        );
        assert_eq!(config.target.env.get("LANG").map(String::as_str), Some("C"));
        assert_eq!(config.runner.timeout_ms, default_timeout_ms());
    }

    #[test]
    fn rejects_unknown_fields_and_bad_taint() {
        let mut unknown = tempfile::NamedTempFile::new().unwrap();
        write!(unknown, "[tool]\nbogus = 1\n").unwrap();
        assert!(FlayerConfig::load_from_file(unknown.path()).is_err());

        let mut bad_taint = tempfile::NamedTempFile::new().unwrap();
        write!(bad_taint, "[tool]\ntaint = \"x\"\n").unwrap();
        assert!(FlayerConfig::load_from_file(bad_taint.path()).is_err());
    }

    #[test]
    fn missing_config_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = FlayerConfig::load_from_file(&dir.path().join("flayer.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
