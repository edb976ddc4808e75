//! Domain error taxonomy.
//!
//! Gate-level failures become an itemized fix list and block the run;
//! task-level failures degrade coverage without aborting it.

use thiserror::Error;

/// Errors raised by the pipeline control plane.
#[derive(Debug, Clone, Error)]
pub enum PipelineError {
    /// Required columns missing or malformed in a standardized file.
    #[error("schema violation in {file}: {detail}")]
    SchemaViolation { file: String, detail: String },

    /// Missing rows or date coverage gaps in a standardized file.
    #[error("completeness gap in {file}: {detail}")]
    CompletenessGap { file: String, detail: String },

    /// Metric values outside configured sanity bounds.
    #[error("sanity violation in {file}: {detail}")]
    SanityViolation { file: String, detail: String },

    /// Two sources disagree beyond the variance threshold.
    #[error("cross-source conflict in {file}: {detail}")]
    CrossSourceConflict { file: String, detail: String },

    /// Input that cannot be resolved deterministically, e.g. a date
    /// range that parses two ways or not at all.
    #[error("ambiguous input: {0}")]
    AmbiguousInput(String),

    /// A file or channel identifier no rule or map recognizes.
    #[error("unrecognized source: {0}")]
    UnrecognizedSource(String),

    /// One channel analysis task failed; siblings are unaffected.
    #[error("channel task failed for '{channel}': {reason}")]
    ChannelTaskFailure { channel: String, reason: String },

    /// One group synthesis task failed; siblings are unaffected.
    #[error("group task failed for '{group}': {reason}")]
    GroupTaskFailure { group: String, reason: String },

    /// Baseline has fewer aggregated weeks than anomaly detection needs.
    /// Suppresses anomaly output for the metric, nothing else.
    #[error("baseline not established for {channel}/{metric}")]
    InsufficientBaseline { channel: String, metric: String },
}

/// Errors from the external reasoning collaborator transport.
#[derive(Debug, Error)]
pub enum CollabError {
    #[error("collaborator request timed out after {0}s")]
    Timeout(u64),

    #[error("cannot connect to collaborator at {0}")]
    Connect(String),

    #[error("collaborator API error {status}: {body}")]
    Api { status: u16, body: String },

    /// Reply received but it does not satisfy the record contract.
    #[error("invalid collaborator reply: {0}")]
    InvalidReply(String),
}

/// Errors from the baseline and decision store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("decision entry {0} not found")]
    DecisionNotFound(u64),

    /// Open is the only non-terminal state; everything else is final.
    #[error("decision entry {id} is already terminal ({status})")]
    TerminalTransition { id: u64, status: String },
}
