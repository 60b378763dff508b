use crate::alteration::AlterationTracker;
use crate::config::{TargetCommand, ToolConfig};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Session I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Session file {path:?} is not valid: {source}")]
    Format {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Everything needed to pick up work where it was left: tool settings,
/// target and branch alterations. Temporary files and past runs are not kept.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    pub tool: ToolConfig,
    pub target: TargetCommand,
    pub alterations: AlterationTracker,
}

impl Session {
    pub fn save(&self, path: &Path) -> Result<(), SessionError> {
        let io_err = |source| SessionError::Io {
            path: path.to_path_buf(),
            source,
        };
        let file = File::create(path).map_err(io_err)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, self).map_err(|source| SessionError::Format {
            path: path.to_path_buf(),
            source,
        })?;
        writer.flush().map_err(io_err)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, SessionError> {
        let file = File::open(path).map_err(|source| SessionError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_reader(BufReader::new(file)).map_err(|source| SessionError::Format {
            path: path.to_path_buf(),
            source,
        })
    }
}
