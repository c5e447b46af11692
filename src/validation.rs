//! Filesystem checks behind the record page's path fields.
//!
//! Each validator reports the first failing condition only, in the order
//! existence, type, permission, extension.

use std::path::{Path, PathBuf};

use nix::unistd::{access, AccessFlags};

use crate::error::ValidationError;

pub const PERF_DATA_EXTENSION: &str = ".data";
pub const DEFAULT_OUTPUT_FILE: &str = "perf.data";

/// Turn user-entered text into a local path, accepting `file://` URLs.
pub fn local_path(text: &str) -> PathBuf {
    let text = text.trim();
    PathBuf::from(text.strip_prefix("file://").unwrap_or(text))
}

fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(path))
        .unwrap_or_else(|_| path.to_path_buf())
}

fn is_writable(path: &Path) -> bool {
    access(path, AccessFlags::W_OK).is_ok()
}

pub fn is_executable(path: &Path) -> bool {
    access(path, AccessFlags::X_OK).is_ok()
}

/// Resolve an application either as a path or by looking it up in `PATH`.
pub fn resolve_application(text: &str) -> PathBuf {
    let local = local_path(text);
    if local.exists() {
        return local;
    }
    which::which(text.trim()).unwrap_or(local)
}

pub fn validate_application(text: &str) -> Result<PathBuf, ValidationError> {
    let application = resolve_application(text);

    if !application.exists() {
        return Err(ValidationError::ApplicationNotFound(text.to_string()));
    }
    if !application.is_file() {
        return Err(ValidationError::ApplicationNotFile(text.to_string()));
    }
    if !is_executable(&application) {
        return Err(ValidationError::ApplicationNotExecutable(text.to_string()));
    }
    Ok(application)
}

pub fn validate_working_directory(text: &str) -> Result<PathBuf, ValidationError> {
    let folder = local_path(text);

    if !folder.exists() {
        return Err(ValidationError::WorkingDirectoryNotFound(text.to_string()));
    }
    if !folder.is_dir() {
        return Err(ValidationError::WorkingDirectoryNotDirectory(text.to_string()));
    }
    if !is_writable(&folder) {
        return Err(ValidationError::WorkingDirectoryNotWritable(text.to_string()));
    }
    Ok(folder)
}

/// Checks the folder the output file would be written into, then the
/// file's extension.
pub fn validate_output_file(text: &str) -> Result<PathBuf, ValidationError> {
    let file = absolute(&local_path(text));
    let folder = file
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("/"));
    let shown = folder.display().to_string();

    if !folder.exists() {
        return Err(ValidationError::OutputDirectoryNotFound(shown));
    }
    if !folder.is_dir() {
        return Err(ValidationError::OutputDirectoryNotDirectory(shown));
    }
    if !is_writable(&folder) {
        return Err(ValidationError::OutputDirectoryNotWritable(shown));
    }
    if !file.to_string_lossy().ends_with(PERF_DATA_EXTENSION) {
        return Err(ValidationError::OutputMissingExtension(PERF_DATA_EXTENSION));
    }
    Ok(file)
}

/// Appends `.data` unless the text already ends with it.
pub fn with_data_extension(text: &str) -> String {
    let text = text.trim();
    if text.ends_with(PERF_DATA_EXTENSION) {
        text.to_string()
    } else {
        format!("{}{}", text, PERF_DATA_EXTENSION)
    }
}

/// `<cwd>/perf.data`, falling back to a relative path if the cwd is gone.
pub fn default_output_file() -> PathBuf {
    std::env::current_dir()
        .map(|cwd| cwd.join(DEFAULT_OUTPUT_FILE))
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_OUTPUT_FILE))
}
