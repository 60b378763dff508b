//! Rendering of [`ToolConfig`] into the tool's `--name=value` arguments.

use crate::alteration::BranchAlterations;
use crate::config::{TargetCommand, ToolConfig};

/// Quotes the way the tool's option parser expects: single quotes become
/// double quotes, then every double quote is backslash-escaped. This is not
/// shell escaping; arguments are passed to the tool directly.
pub fn escape_value(value: &str) -> String {
    value.replace('\'', "\"").replace('"', "\\\"")
}

fn yes_no(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}

fn format_alterations(alterations: &BranchAlterations) -> String {
    alterations
        .iter()
        .map(|(address, action)| format!("{}:{}", escape_value(address), action))
        .collect::<Vec<_>>()
        .join(",")
}

/// Tool arguments for `config` and the given branch alterations, in a fixed order.
pub fn format_arguments(config: &ToolConfig, alterations: &BranchAlterations) -> Vec<String> {
    let mut args = vec![
        format!("--tool={}", escape_value(&config.tool)),
        format!("--xml={}", yes_no(config.xml)),
        format!("--db-attach={}", yes_no(config.db_attach)),
        format!("--db-command={}", escape_value(&config.db_command)),
        format!("--alter-branch={}", format_alterations(alterations)),
        format!("--taint-file={}", yes_no(config.taint.file)),
        format!("--taint-network={}", yes_no(config.taint.network)),
        format!("--file-filter={}", escape_value(&config.file_filter)),
    ];
    if !config.log_file.is_empty() {
        args.push(format!("--log-file={}", escape_value(&config.log_file)));
    }
    args
}

/// The complete command line, for display.
pub fn full_command(
    config: &ToolConfig,
    alterations: &BranchAlterations,
    target: &TargetCommand,
) -> String {
    std::iter::once(config.executable.display().to_string())
        .chain(format_arguments(config, alterations))
        .chain(target.argv())
        .collect::<Vec<_>>()
        .join(" ")
}
