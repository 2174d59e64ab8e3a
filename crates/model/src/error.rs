//! Object model errors. All of them abort startup.

use std::path::PathBuf;

use thiserror::Error;

pub type ModelResult<T> = Result<T, ModelError>;

#[derive(Debug, Error)]
pub enum ModelError {
    /// Configured extension directory is missing or unreadable
    #[error("Object definition directory '{path}' is unavailable: {source}")]
    Directory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Definition file could not be read
    #[error("Failed to read object definitions '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Definition file is not valid JSON for the definition layout
    #[error("Malformed object definitions in '{origin}': {source}")]
    Parse {
        origin: String,
        #[source]
        source: serde_json::Error,
    },

    /// Extension directory holds no definitions
    #[error("No object definitions found in '{0}'")]
    Empty(PathBuf),

    /// Same object id defined twice by one source
    #[error("Object {id} is defined twice in '{origin}'")]
    Duplicate { id: u16, origin: String },

    /// Definition fails a structural check
    #[error("Object {id} in '{origin}' is invalid: {reason}")]
    Invalid { id: u16, origin: String, reason: String },
}
