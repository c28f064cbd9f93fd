//! Error types for native library extraction.

use std::path::PathBuf;

/// Errors raised while extracting or loading a bundled library.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The resource path or its file name is malformed.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The resource source has no entry at this path.
    #[error("Resource {path} was not found in {source_name}")]
    NotFound {
        /// Resource path that was requested.
        path: String,
        /// Description of the resource source that was searched.
        source_name: String,
    },

    /// Creating, writing or reading a stream failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The dynamic loader rejected the extracted file.
    #[error("Failed to load library {}: {source}", .path.display())]
    Load {
        /// Absolute path handed to the loader.
        path: PathBuf,
        /// Loader diagnostic.
        source: libloading::Error,
    },

    /// A loaded library does not export the requested symbol.
    #[error("Symbol {name} not found: {source}")]
    Symbol {
        /// Symbol name that was requested.
        name: String,
        /// Loader diagnostic.
        source: libloading::Error,
    },
}

/// Result type for extraction operations.
pub type Result<T> = std::result::Result<T, Error>;
