//! Configuration file handling.
//!
//! This module handles loading and merging configuration from
//! `.pulseline.toml` files.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::gate::GatePolicy;

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// External reasoning collaborator settings.
    #[serde(default)]
    pub collaborator: CollaboratorConfig,

    /// Quality gate thresholds.
    #[serde(default)]
    pub gate: GatePolicy,

    /// Analysis thresholds.
    #[serde(default)]
    pub analysis: AnalysisConfig,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Default output file path.
    #[serde(default = "default_output")]
    pub output: String,

    /// Enable verbose logging by default.
    #[serde(default)]
    pub verbose: bool,

    /// Directory holding standardized export files.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// Directory holding baselines and the decision log.
    #[serde(default = "default_memory_dir")]
    pub memory_dir: String,

    /// Maximum export file size in bytes.
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            output: default_output(),
            verbose: false,
            data_dir: default_data_dir(),
            memory_dir: default_memory_dir(),
            max_file_size: default_max_file_size(),
        }
    }
}

fn default_output() -> String {
    "pulseline_report.md".to_string()
}

fn default_data_dir() -> String {
    "data".to_string()
}

fn default_memory_dir() -> String {
    "memory".to_string()
}

fn default_max_file_size() -> u64 {
    10 * 1024 * 1024 // 10MB
}

/// External reasoning collaborator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollaboratorConfig {
    /// Model name the collaborator should use.
    #[serde(default = "default_model")]
    pub model: String,

    /// Collaborator API URL.
    #[serde(default = "default_url")]
    pub url: String,

    /// Temperature for generation. Kept low: replies must be records,
    /// not prose.
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
}

impl Default for CollaboratorConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            url: default_url(),
            temperature: default_temperature(),
            timeout_seconds: default_timeout(),
        }
    }
}

fn default_model() -> String {
    "llama3.2:latest".to_string()
}

fn default_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_temperature() -> f32 {
    0.1
}

fn default_timeout() -> u64 {
    120
}

/// Analysis thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Below-plan tolerance before a metric turns RED, in percent.
    #[serde(default = "default_status_tolerance")]
    pub status_tolerance_pct: f64,

    /// |z| above which an anomaly upgrades the report template.
    #[serde(default = "default_zscore_threshold")]
    pub zscore_flag_threshold: f64,

    /// Per-task timeout for dispatched channel and group work, seconds.
    #[serde(default = "default_task_timeout")]
    pub task_timeout_seconds: u64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            status_tolerance_pct: default_status_tolerance(),
            zscore_flag_threshold: default_zscore_threshold(),
            task_timeout_seconds: default_task_timeout(),
        }
    }
}

fn default_status_tolerance() -> f64 {
    5.0
}

fn default_zscore_threshold() -> f64 {
    2.0
}

fn default_task_timeout() -> u64 {
    120
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        let default_path = Path::new(".pulseline.toml");

        if default_path.exists() {
            Ok(Some(Self::load(default_path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// CLI arguments take precedence over config file settings.
    /// This method only overrides config when CLI provides explicit values.
    pub fn merge_with_args(&mut self, args: &crate::cli::Args) {
        // Collaborator settings - always override since they have defaults in CLI
        self.collaborator.model = args.model.clone();
        self.collaborator.url = args.collaborator_url.clone();

        // Timeout - only override if explicitly provided via CLI
        if let Some(timeout) = args.timeout {
            self.collaborator.timeout_seconds = timeout;
        }

        // Optional settings - only override if provided
        if let Some(ref data_dir) = args.data_dir {
            self.general.data_dir = data_dir.clone();
        }
        if let Some(ref memory_dir) = args.memory_dir {
            self.general.memory_dir = memory_dir.clone();
        }
        if let Some(ref output) = args.output {
            self.general.output = output.clone();
        }

        // Flags always override
        if args.verbose {
            self.general.verbose = true;
        }
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}
