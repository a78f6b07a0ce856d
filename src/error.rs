use std::{error::Error as StdError, io, path::PathBuf};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModpackError {
    #[error("No such file {0:?}")]
    MissingFile(PathBuf),
    #[error("No modpack found at {0}")]
    NotFound(String),
    #[error("Error downloading {url}: {source}")]
    Transport {
        url: String,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },
    #[error("Request to {0} timed out")]
    Timeout(String),
    #[error("Server returned HTTP {status} for {url}")]
    HttpStatus { url: String, status: u16 },
    #[error("Could not process archive {path:?}: {reason}\nThe file may be corrupted, password-protected, or in an unsupported format")]
    InvalidArchive { path: PathBuf, reason: String },
    #[error("No installable files found in the archive")]
    NoEligibleEntries,
    #[error("{0} already exists")]
    EntryExists(String),
    #[error(transparent)]
    IoError(#[from] io::Error),
    #[error("Error parsing config: {0}")]
    ConfigError(#[from] json5::Error),
    #[error("Invalid part URL template '{0}': expected a {{N}} placeholder")]
    TemplateError(String),
    #[error("{0}")]
    MiscError(String),
}

impl ModpackError {
    /// Whether an error raised while copying one archive entry should abort the
    /// whole installation pass instead of being recorded against that entry.
    pub fn is_fatal_for_entry(&self) -> bool {
        matches!(self, ModpackError::InvalidArchive { .. })
    }

    /// Whether this error means the remote side could not be reached at all
    pub fn is_unreachable(&self) -> bool {
        matches!(
            self,
            ModpackError::Transport { .. } | ModpackError::Timeout(_)
        )
    }
}
