//! Error types and handling for the DAMDS matrix loader
//!
//! Every failure the loader can produce is a variant of [`Error`]. Nothing is
//! swallowed locally; the single exception is one retry of transient I/O in
//! the scratch manager (see [`Error::is_retryable`]).

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Main result type used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the loader
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid topology or configuration values
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration file could not be parsed
    #[error("Configuration file error: {0}")]
    ConfigFile(#[from] toml::de::Error),

    /// Matrix shape does not match its parameters or the file on disk
    #[error("Geometry error: {0}")]
    Geometry(String),

    /// A directory or file is missing, unreadable or not writable
    #[error("Path error: {path:?}: {reason}")]
    Path {
        /// Offending path
        path: PathBuf,
        /// What was wrong with it
        reason: String,
    },

    /// Underlying read or map failure
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Tile, node or thread outside what the caller owns or what exists
    #[error("Out of range: {0}")]
    OutOfRange(String),

    /// Staged bytes could not be interpreted as 16-bit entries
    #[error("Decode error: {0}")]
    Decode(String),

    /// A scratch lease was released more than once
    #[error("Scratch region {slot} released twice")]
    DoubleRelease {
        /// Slot index within the node's pool
        slot: usize,
    },

    /// The scratch directory can no longer back a region
    #[error("Scratch space exhausted in {dir:?}: {source}")]
    ScratchExhausted {
        /// Scratch directory
        dir: PathBuf,
        /// Error reported by the filesystem
        #[source]
        source: io::Error,
    },

    /// Write-once state was written a second time
    #[error("Already initialized: {0}")]
    AlreadyInitialized(String),
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a geometry error
    pub fn geometry(msg: impl Into<String>) -> Self {
        Self::Geometry(msg.into())
    }

    /// Create a path error
    pub fn path(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Path {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create an out-of-range error
    pub fn out_of_range(msg: impl Into<String>) -> Self {
        Self::OutOfRange(msg.into())
    }

    /// Create a decode error
    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    /// Create an already-initialized error
    pub fn already_initialized(what: impl Into<String>) -> Self {
        Self::AlreadyInitialized(what.into())
    }

    /// Check if this is a transient I/O error worth one more attempt
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
            ),
            _ => false,
        }
    }

    /// Check if this error is fatal at startup (bad inputs rather than bad luck)
    pub fn is_startup_error(&self) -> bool {
        matches!(
            self,
            Error::Config(_)
                | Error::ConfigFile(_)
                | Error::Geometry(_)
                | Error::Path { .. }
                | Error::AlreadyInitialized(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interrupted_io_is_retryable() {
        let err = Error::from(io::Error::new(io::ErrorKind::Interrupted, "signal"));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_not_found_io_is_not_retryable() {
        let err = Error::from(io::Error::new(io::ErrorKind::NotFound, "gone"));
        assert!(!err.is_retryable());
        assert!(!Error::decode("odd length").is_retryable());
    }

    #[test]
    fn test_startup_classification() {
        assert!(Error::config("threads").is_startup_error());
        assert!(Error::geometry("size").is_startup_error());
        assert!(!Error::DoubleRelease { slot: 0 }.is_startup_error());
    }
}
