//! Error type for window-manager provider calls.
//!
//! Every variant means the same thing to the engine: the tool is unavailable
//! right now. The distinction only matters for logging.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProviderError {
    /// The executable does not exist at the resolved path
    #[error("executable not found: {}", .0.display())]
    Missing(PathBuf),

    /// The process could not be started
    #[error("failed to spawn {}: {source}", .path.display())]
    Spawn {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The process ran but reported failure
    #[error("{program} exited with {status}: {stderr}")]
    Exit {
        program: String,
        status: String,
        stderr: String,
    },

    /// The process did not finish in time and was killed
    #[error("{program} timed out after {seconds:.1}s")]
    Timeout { program: String, seconds: f64 },

    /// Textual output did not match the expected format
    #[error("unexpected {program} output: {message}")]
    Parse { program: String, message: String },

    /// Structured output was not valid JSON for the expected shape
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ProviderError {
    pub fn parse(program: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Parse {
            program: program.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ProviderError>;
