pub mod alteration;
pub mod args;
pub mod collection;
pub mod config;
pub mod diff;
pub mod fuzz;
pub mod history;
pub mod parser;
pub mod record;
pub mod runner;
pub mod session;

pub use alteration::{AlterationChange, AlterationError, AlterationTracker, BranchAction, BranchAlterations};
pub use args::{format_arguments, full_command};
pub use collection::{ErrorCollection, ParsedLog, parse_unique_id, read_error_log, read_error_log_file};
pub use config::{FlayerConfig, TaintSources, TargetCommand, ToolConfig};
pub use diff::diff;
pub use fuzz::{FuzzError, FuzzFile};
pub use history::{HistoryError, RunHistory};
pub use parser::{ErrorLogParser, ParseError, ParseOutcome, ParseWarning};
pub use record::{CountPair, ErrorEvent, Frame};
pub use runner::{RunReport, RunStatus, RunnerError, ToolRunner};
pub use session::{Session, SessionError};
