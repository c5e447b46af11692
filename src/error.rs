//! Error types for the record page.
//!
//! `ValidationError` doubles as the user-facing message shown in the page's
//! error panel, so its `Display` text is what the user reads.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Form validation failures, one per field check.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Application file cannot be found: {0}")]
    ApplicationNotFound(String),

    #[error("Application file is not valid: {0}")]
    ApplicationNotFile(String),

    #[error("Application file is not executable: {0}")]
    ApplicationNotExecutable(String),

    #[error("Working directory folder cannot be found: {0}")]
    WorkingDirectoryNotFound(String),

    #[error("Working directory folder is not valid: {0}")]
    WorkingDirectoryNotDirectory(String),

    #[error("Working directory folder is not writable: {0}")]
    WorkingDirectoryNotWritable(String),

    #[error("Output file directory folder cannot be found: {0}")]
    OutputDirectoryNotFound(String),

    #[error("Output file directory folder is not valid: {0}")]
    OutputDirectoryNotDirectory(String),

    #[error("Output file directory folder is not writable: {0}")]
    OutputDirectoryNotWritable(String),

    #[error("Output file must end with {0}")]
    OutputMissingExtension(&'static str),
}

/// Application argument splitting errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ArgsError {
    #[error("Invalid application arguments: unterminated quote")]
    UnterminatedQuote,

    #[error("Invalid application arguments: trailing backslash")]
    TrailingEscape,
}

/// Configuration file loading errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("Invalid JSON in config: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("IO error during config operations: {0}")]
    IoError(#[from] io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_messages_name_the_offending_path() {
        let err = ValidationError::ApplicationNotExecutable("/tmp/app".to_string());
        assert_eq!(err.to_string(), "Application file is not executable: /tmp/app");

        let err = ValidationError::OutputMissingExtension(".data");
        assert_eq!(err.to_string(), "Output file must end with .data");
    }

    #[test]
    fn config_not_found_displays_path() {
        let err = ConfigError::FileNotFound(PathBuf::from("/etc/perfrec.json"));
        assert_eq!(err.to_string(), "Configuration file not found: /etc/perfrec.json");
    }
}
