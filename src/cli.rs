//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation and default values.

use clap::Parser;
use std::path::PathBuf;

use crate::models::{ComparisonType, DateRange, DecisionStatus, Geo};

/// Pulseline - deterministic control plane for marketing analytics
///
/// Route a natural-language request to the right channel analyses, gate
/// the input data, fan analysis out to an external reasoning
/// collaborator, and assemble a decision-ready report.
///
/// Examples:
///   pulseline "How did SEM perform last week?"
///   pulseline "Compare all channels" --comparison yoy --geo na
///   pulseline "Weekly numbers" --channels sem,display --format json
///   pulseline "SEM recap" --dry-run
///   pulseline --init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// Natural-language analysis request
    ///
    /// Routed through the keyword table first; unmatched queries are
    /// classified by the collaborator. Not required with --init-config
    /// or --resolve-decision.
    #[arg(
        value_name = "QUERY",
        required_unless_present_any = ["init_config", "resolve_decision"]
    )]
    pub query: Option<String>,

    /// Channels to analyze (comma-separated), bypassing keyword routing
    ///
    /// Example: --channels sem,display
    #[arg(long, value_name = "CHANNELS", value_delimiter = ',')]
    pub channels: Option<Vec<String>>,

    /// Reporting period as start/end ISO dates
    ///
    /// Example: --period 2026-02-10/2026-02-16. Overrides any dates in
    /// the query.
    #[arg(long, value_name = "START/END")]
    pub period: Option<DateRange>,

    /// Geo filter (na, intl, blended, all)
    #[arg(long, value_name = "GEO")]
    pub geo: Option<Geo>,

    /// Comparison basis (wow, mom, yoy)
    #[arg(long, value_name = "BASIS")]
    pub comparison: Option<ComparisonType>,

    /// Collaborator model to use
    ///
    /// Can also be set via PULSELINE_MODEL env var or .pulseline.toml.
    #[arg(short, long, default_value = "llama3.2:latest", env = "PULSELINE_MODEL")]
    pub model: String,

    /// Collaborator API endpoint URL
    #[arg(
        long,
        default_value = "http://localhost:11434",
        env = "PULSELINE_COLLABORATOR_URL"
    )]
    pub collaborator_url: String,

    /// Output file path for the report
    ///
    /// Defaults to the config file setting or pulseline_report.md.
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<String>,

    /// Output format (markdown, json)
    #[arg(long, default_value = "markdown", value_name = "FORMAT")]
    pub format: OutputFormat,

    /// Path to configuration file
    ///
    /// If not specified, looks for .pulseline.toml in the current directory
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Directory holding standardized export files
    #[arg(long, value_name = "DIR")]
    pub data_dir: Option<String>,

    /// Directory holding baselines and the decision log
    #[arg(long, value_name = "DIR")]
    pub memory_dir: Option<String>,

    /// Collaborator request timeout in seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Enable verbose logging output
    #[arg(short, long)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(short, long)]
    pub quiet: bool,

    /// Dry run: scan and classify without calling the collaborator
    ///
    /// Shows the resolved working set and discovered files, then exits.
    #[arg(long)]
    pub dry_run: bool,

    /// Record the outcome of a logged decision and exit
    ///
    /// Format: ID:STATUS, e.g. --resolve-decision 4:confirmed. Valid
    /// statuses: confirmed, partial, missed, reversed, declined.
    #[arg(long, value_name = "ID:STATUS")]
    pub resolve_decision: Option<String>,

    /// Generate a default .pulseline.toml configuration file
    #[arg(long)]
    pub init_config: bool,
}

/// Output format for the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Markdown format (default)
    #[default]
    Markdown,
    /// JSON format
    Json,
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        // Skip validation for --init-config
        if self.init_config {
            return Ok(());
        }

        if let Some(ref spec) = self.resolve_decision {
            let (id, status) = spec
                .split_once(':')
                .ok_or_else(|| format!("--resolve-decision expects ID:STATUS, got '{spec}'"))?;
            if id.trim().parse::<u64>().is_err() {
                return Err(format!("Decision id '{id}' is not a number"));
            }
            status.trim().parse::<DecisionStatus>()?;
            return Ok(());
        }

        if self.query.as_deref().unwrap_or("").trim().is_empty() {
            return Err("Query must not be empty".to_string());
        }

        // Collaborator URL is not needed for dry-run
        if !self.dry_run
            && !self.collaborator_url.starts_with("http://")
            && !self.collaborator_url.starts_with("https://")
        {
            return Err("Collaborator URL must start with 'http://' or 'https://'".to_string());
        }

        if let Some(ref channels) = self.channels {
            if channels.iter().any(|c| c.trim().is_empty()) {
                return Err("Channel list contains an empty entry".to_string());
            }
            for channel in channels {
                if crate::router::group_of(channel).is_none() {
                    return Err(format!(
                        "Unknown channel '{}'. Known channels: {}",
                        channel,
                        crate::router::known_channels().join(", ")
                    ));
                }
            }
        }

        // Check for conflicting options
        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        // Validate timeout if provided
        if let Some(timeout) = self.timeout {
            if timeout == 0 {
                return Err("Timeout must be at least 1 second".to_string());
            }
        }

        Ok(())
    }

    /// Returns the log level based on verbosity settings.
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_args() -> Args {
        Args {
            query: Some("How did SEM perform last week?".to_string()),
            channels: None,
            period: None,
            geo: None,
            comparison: None,
            model: "test".to_string(),
            collaborator_url: "http://localhost:11434".to_string(),
            output: None,
            format: OutputFormat::Markdown,
            config: None,
            data_dir: None,
            memory_dir: None,
            timeout: None,
            verbose: false,
            quiet: false,
            dry_run: false,
            resolve_decision: None,
            init_config: false,
        }
    }

    #[test]
    fn test_validation_empty_query() {
        let mut args = make_args();
        args.query = Some("   ".to_string());
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_validation_invalid_url() {
        let mut args = make_args();
        args.collaborator_url = "localhost:11434".to_string();
        assert!(args.validate().is_err());
        // Dry runs never reach the collaborator.
        args.dry_run = true;
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_validation_resolve_decision() {
        let mut args = make_args();
        args.query = None;
        args.resolve_decision = Some("4:confirmed".to_string());
        assert!(args.validate().is_ok());

        args.resolve_decision = Some("confirmed".to_string());
        assert!(args.validate().is_err());

        args.resolve_decision = Some("4:done".to_string());
        assert!(args.validate().is_err());

        // Decisions can only move to an outcome, never back to open.
        args.resolve_decision = Some("4:open".to_string());
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_validation_unknown_channel() {
        let mut args = make_args();
        args.channels = Some(vec!["sem".to_string(), "tiktok".to_string()]);
        let err = args.validate().unwrap_err();
        assert!(err.contains("tiktok"));
        assert!(err.contains("sem"));

        args.channels = Some(vec!["sem".to_string(), "display".to_string()]);
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_validation_conflicting_options() {
        let mut args = make_args();
        args.verbose = true;
        args.quiet = true;
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_log_level() {
        let mut args = make_args();
        assert_eq!(args.log_level(), tracing::Level::INFO);

        args.verbose = true;
        assert_eq!(args.log_level(), tracing::Level::DEBUG);

        args.verbose = false;
        args.quiet = true;
        assert_eq!(args.log_level(), tracing::Level::ERROR);
    }

    #[test]
    fn test_period_parses_from_cli_form() {
        let range: DateRange = "2026-02-10/2026-02-16".parse().unwrap();
        assert_eq!(range.to_string(), "2026-02-10/2026-02-16");
    }
}
