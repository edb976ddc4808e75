//! External reasoning collaborator interface.
//!
//! Every judgment step (preprocessing, intent classification, channel
//! analysis, synthesis, hypothesis generation, formatting) goes through
//! the [`Collaborator`] trait. The pipeline owns the structure; the
//! collaborator owns the reasoning. Each call takes a fully-specified
//! task record and must return a typed record, never free prose.

pub mod http;

use crate::error::CollabError;
use crate::gate::FileStats;
use crate::models::{
    Baseline, ChannelResult, ComparisonType, DateRange, Geo, GroupSynthesis, Hypothesis,
    PortfolioSynthesis, Template,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;

pub use http::HttpCollaborator;

/// Result of the preprocessing step: per-file statistics the quality
/// gate evaluates, plus free-form flags worth surfacing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Preprocessed {
    pub files: Vec<FileStats>,
    #[serde(default)]
    pub flags: Vec<String>,
}

/// Channel set named by the external classifier for a query no routing
/// rule matched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifiedIntent {
    pub channels: Vec<String>,
}

/// Work order for one channel analysis.
///
/// Self-contained by design: the collaborator gets everything it needs,
/// including baseline snapshots, so sibling tasks share no state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelTask {
    pub channel: String,
    pub group: String,
    pub geo: Geo,
    pub comparison_type: ComparisonType,
    pub date_range: Option<DateRange>,
    /// Export files scoped to this channel, relative to the data dir.
    pub data_files: Vec<String>,
    /// Baseline snapshot per metric, taken before fan-out.
    pub baselines: BTreeMap<String, Baseline>,
    /// All gate caveats for the run. A WARN anywhere in the input
    /// travels with every downstream record, not just the channel that
    /// owns the file.
    pub caveats: Vec<String>,
}

/// Work order for one group synthesis over its channels' results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupTask {
    pub group: String,
    pub channel_results: Vec<ChannelResult>,
}

/// Work order for hypothesis generation across all channel results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HypothesisTask {
    pub channel_results: Vec<ChannelResult>,
    pub group_syntheses: Vec<GroupSynthesis>,
}

/// Work order for the portfolio-level synthesis across groups.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioTask {
    pub group_syntheses: Vec<GroupSynthesis>,
    /// Channels requested but not analyzed, with the reason.
    pub unanalyzed: Vec<(String, String)>,
}

/// Work order for rendering the final output body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormatTask {
    pub template: Template,
    pub channel_results: Vec<ChannelResult>,
    pub group_syntheses: Vec<GroupSynthesis>,
    pub portfolio: Option<PortfolioSynthesis>,
    pub hypotheses: Vec<Hypothesis>,
    pub caveats: Vec<String>,
}

/// External reasoning collaborator.
///
/// Implementations must be shareable across concurrent tasks; the
/// scheduler fans channel and group calls out in parallel.
pub trait Collaborator: Send + Sync {
    /// Standardize raw export files and report per-file statistics.
    fn preprocess(
        &self,
        files: Vec<String>,
    ) -> impl Future<Output = Result<Preprocessed, CollabError>> + Send;

    /// Name a channel set for a query keyword routing could not place.
    fn classify_intent(
        &self,
        query: String,
    ) -> impl Future<Output = Result<ClassifiedIntent, CollabError>> + Send;

    /// Analyze one channel against its baselines.
    fn analyze_channel(
        &self,
        task: ChannelTask,
    ) -> impl Future<Output = Result<ChannelResult, CollabError>> + Send;

    /// Synthesize one group from its channels' results.
    fn synthesize_group(
        &self,
        task: GroupTask,
    ) -> impl Future<Output = Result<GroupSynthesis, CollabError>> + Send;

    /// Generate cross-channel hypotheses for notable metric moves.
    fn hypothesize(
        &self,
        task: HypothesisTask,
    ) -> impl Future<Output = Result<Vec<Hypothesis>, CollabError>> + Send;

    /// Synthesize the portfolio view across groups.
    fn synthesize_portfolio(
        &self,
        task: PortfolioTask,
    ) -> impl Future<Output = Result<PortfolioSynthesis, CollabError>> + Send;

    /// Render the report body for the selected template.
    fn format_output(
        &self,
        task: FormatTask,
    ) -> impl Future<Output = Result<String, CollabError>> + Send;
}
