use std::path::{Path, PathBuf};

use clap::Parser;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::ConfigError;
use crate::perf::CallGraph;
use crate::validation::default_output_file;

/// Configure and launch perf record sessions
#[derive(Parser, Debug, Default)]
#[command(name = "perfrec", version, about)]
pub struct Cli {
    /// JSON file with default page settings
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Path to the perf executable (looked up in PATH otherwise)
    #[arg(long)]
    pub perf: Option<PathBuf>,

    /// Default output file
    #[arg(long)]
    pub output: Option<PathBuf>,

    /// Default working directory for launched applications
    #[arg(long)]
    pub working_dir: Option<PathBuf>,

    /// Command used to open finished recordings, e.g. "hotspot"
    #[arg(long)]
    pub viewer: Option<String>,

    /// Start in attach-to-process mode
    #[arg(long)]
    pub attach: bool,
}

/// Settings the record page starts with.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PageConfig {
    pub perf_path: Option<PathBuf>,
    pub viewer: Option<String>,
    pub output_file: Option<PathBuf>,
    pub working_directory: Option<PathBuf>,
    pub call_graph: CallGraph,
    pub event_type: Option<String>,
    #[serde(skip)]
    pub attach: bool,
}

impl PageConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.to_path_buf()));
        }
        let text = std::fs::read_to_string(path)?;
        let config = serde_json::from_str(&text)?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// File settings overridden by whatever was given on the command line.
    pub fn from_cli(cli: &Cli) -> Result<Self, ConfigError> {
        let mut config = match &cli.config {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };

        if cli.perf.is_some() {
            config.perf_path = cli.perf.clone();
        }
        if cli.output.is_some() {
            config.output_file = cli.output.clone();
        }
        if cli.working_dir.is_some() {
            config.working_directory = cli.working_dir.clone();
        }
        if cli.viewer.is_some() {
            config.viewer = cli.viewer.clone();
        }
        config.attach = cli.attach;
        Ok(config)
    }

    pub fn output_file(&self) -> PathBuf {
        self.output_file.clone().unwrap_or_else(default_output_file)
    }

    pub fn working_directory(&self) -> PathBuf {
        self.working_directory
            .clone()
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_point_at_cwd() {
        let config = PageConfig::default();
        assert_eq!(config.call_graph, CallGraph::Dwarf);
        assert_eq!(config.output_file(), default_output_file());
        assert_eq!(config.working_directory(), std::env::current_dir().unwrap());
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("perfrec.json");
        std::fs::write(&path, r#"{ "call_graph": "fp", "event_type": "cycles" }"#).unwrap();

        let config = PageConfig::load(&path).unwrap();
        assert_eq!(config.call_graph, CallGraph::FramePointer);
        assert_eq!(config.event_type.as_deref(), Some("cycles"));
        assert_eq!(config.perf_path, None);
    }

    #[test]
    fn missing_and_malformed_files_are_errors() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.json");
        assert!(matches!(PageConfig::load(&missing), Err(ConfigError::FileNotFound(_))));

        let bad = dir.path().join("bad.json");
        std::fs::write(&bad, "{ not json").unwrap();
        assert!(matches!(PageConfig::load(&bad), Err(ConfigError::InvalidJson(_))));
    }

    #[test]
    fn cli_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("perfrec.json");
        std::fs::write(&path, r#"{ "viewer": "hotspot", "perf_path": "/opt/perf" }"#).unwrap();

        let cli = Cli::try_parse_from([
            "perfrec",
            "--config",
            path.to_str().unwrap(),
            "--perf",
            "/usr/bin/perf",
            "--attach",
        ])
        .unwrap();
        let config = PageConfig::from_cli(&cli).unwrap();
        assert_eq!(config.perf_path, Some(PathBuf::from("/usr/bin/perf")));
        assert_eq!(config.viewer.as_deref(), Some("hotspot"));
        assert!(config.attach);
    }
}
