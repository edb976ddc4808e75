//! Shared data model for the analytics control plane.
//!
//! These are the run-scoped values passed between stages and the
//! field-exact wire records exchanged with external collaborators.

use crate::kernel;
use chrono::NaiveDate;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Group action lists keep at most this many entries.
pub const GROUP_ACTION_CAP: usize = 3;
/// Portfolio action lists keep at most this many entries.
pub const PORTFOLIO_ACTION_CAP: usize = 5;
/// Hypothesis lists keep at most this many entries per run.
pub const HYPOTHESIS_CAP: usize = 15;

/// Re-exported kernel types so record consumers see one model module.
pub use crate::kernel::{Baseline, Direction, MetricStatus, WeekAggregate};

/// Geo scope of a run or record. `Na` and `Intl` are the two stored
/// segments; `Blended` is a derived view, never emitted without the
/// per-segment views first; `All` is a request scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "UPPERCASE")]
pub enum Geo {
    Na,
    Intl,
    Blended,
    All,
}

impl fmt::Display for Geo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Geo::Na => write!(f, "NA"),
            Geo::Intl => write!(f, "INTL"),
            Geo::Blended => write!(f, "BLENDED"),
            Geo::All => write!(f, "ALL"),
        }
    }
}

/// Period comparison basis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ComparisonType {
    /// Week over week (default).
    #[default]
    Wow,
    /// Month over month.
    Mom,
    /// Year over year.
    Yoy,
}

impl fmt::Display for ComparisonType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComparisonType::Wow => write!(f, "wow"),
            ComparisonType::Mom => write!(f, "mom"),
            ComparisonType::Yoy => write!(f, "yoy"),
        }
    }
}

/// Inclusive date range in the canonical calendar form.
///
/// Serialized as `YYYY-MM-DD/YYYY-MM-DD`; only the output boundary
/// reformats dates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.start, self.end)
    }
}

impl FromStr for DateRange {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (a, b) = s
            .split_once('/')
            .ok_or_else(|| format!("expected YYYY-MM-DD/YYYY-MM-DD, got '{s}'"))?;
        let start = NaiveDate::from_str(a.trim()).map_err(|e| e.to_string())?;
        let end = NaiveDate::from_str(b.trim()).map_err(|e| e.to_string())?;
        if end < start {
            return Err(format!("period end {end} precedes start {start}"));
        }
        Ok(DateRange { start, end })
    }
}

impl Serialize for DateRange {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for DateRange {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        DateRange::from_str(&s).map_err(D::Error::custom)
    }
}

/// Output template, selected by the router and possibly upgraded after
/// analysis when a large anomaly is present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Template {
    #[default]
    WeeklyReport,
    PeriodComparison,
    AnomalyAlert,
}

impl fmt::Display for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Template::WeeklyReport => write!(f, "weekly-report"),
            Template::PeriodComparison => write!(f, "period-comparison"),
            Template::AnomalyAlert => write!(f, "anomaly-alert"),
        }
    }
}

/// How the working set was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchKind {
    /// A routing-table keyword rule matched.
    Keyword,
    /// Channels were passed explicitly on the command line.
    Explicit,
    /// The external classification collaborator resolved the query.
    External,
}

/// Immutable per-run scope: channels, their groups, period, comparison
/// basis, geo filter, and selected template.
///
/// Invariant: every channel maps to exactly one group; group membership
/// comes from the static channel-to-group table, never from the query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkingSet {
    pub channels: Vec<String>,
    pub groups: BTreeMap<String, String>,
    pub date_range: Option<DateRange>,
    pub comparison_type: ComparisonType,
    pub geo: Geo,
    pub template: Template,
    pub match_kind: MatchKind,
}

impl WorkingSet {
    /// Group identifier for a channel in this working set.
    pub fn group_of(&self, channel: &str) -> Option<&str> {
        self.groups.get(channel).map(String::as_str)
    }

    /// Distinct groups covered by this working set, sorted.
    pub fn distinct_groups(&self) -> Vec<String> {
        let mut groups: Vec<String> = self.groups.values().cloned().collect();
        groups.sort();
        groups.dedup();
        groups
    }
}

// ---------------------------------------------------------------------------
// Quality gate records
// ---------------------------------------------------------------------------

/// Kind of a per-file quality check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CheckKind {
    Schema,
    Completeness,
    Sanity,
    CrossSource,
    ScreenshotCrossReference,
}

impl fmt::Display for CheckKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckKind::Schema => write!(f, "schema"),
            CheckKind::Completeness => write!(f, "completeness"),
            CheckKind::Sanity => write!(f, "sanity"),
            CheckKind::CrossSource => write!(f, "cross-source"),
            CheckKind::ScreenshotCrossReference => write!(f, "screenshot-cross-reference"),
        }
    }
}

/// Status of one check. Ordering is severity: `Fail > Warn > Pass`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CheckStatus {
    Pass,
    Warn,
    Fail,
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckStatus::Pass => write!(f, "PASS"),
            CheckStatus::Warn => write!(f, "WARN"),
            CheckStatus::Fail => write!(f, "FAIL"),
        }
    }
}

/// Result of one (file, check-kind) pair. Produced once per run by the
/// quality gate and never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileCheckResult {
    pub file: String,
    pub kind: CheckKind,
    pub status: CheckStatus,
    pub detail: String,
}

/// Run-level admission decision, derived deterministically from the set
/// of file check results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GateDecision {
    Pass,
    ProceedWithCaveats,
    Block,
}

impl fmt::Display for GateDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GateDecision::Pass => write!(f, "PASS"),
            GateDecision::ProceedWithCaveats => write!(f, "PROCEED_WITH_CAVEATS"),
            GateDecision::Block => write!(f, "BLOCK"),
        }
    }
}

// ---------------------------------------------------------------------------
// Channel analysis records
// ---------------------------------------------------------------------------

/// One metric line in a channel summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricSummary {
    pub metric: String,
    pub current: f64,
    pub prior: Option<f64>,
    pub delta: Option<f64>,
    pub delta_pct: Option<f64>,
    pub status: MetricStatus,
}

/// A ranked mover within a channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopMover {
    pub rank: u32,
    pub segment: String,
    pub metric: String,
    pub change_pct: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub likely_cause: Option<String>,
}

/// A baseline deviation flagged by channel analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Anomaly {
    pub metric: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub segment: Option<String>,
    pub z_score: f64,
    pub direction: String,
    pub value: f64,
    pub baseline_mean: f64,
}

/// Budget pacing block; null as a whole for non-budget channels.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetPacing {
    pub mtd_spend: f64,
    pub monthly_budget: f64,
    pub pacing_pct: f64,
    pub projected_month_end: f64,
    pub status: MetricStatus,
}

/// Output of one channel analysis task. Immutable after production;
/// owned by the scheduler until group synthesis and hypothesis consume it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelResult {
    pub channel: String,
    pub channel_group: String,
    pub geo: Geo,
    pub period: DateRange,
    pub comparison_type: ComparisonType,
    pub summary: Vec<MetricSummary>,
    pub top_movers: Vec<TopMover>,
    pub anomalies: Vec<Anomaly>,
    pub budget_pacing: Option<BudgetPacing>,
    #[serde(default)]
    pub data_quality_notes: Vec<String>,
    #[serde(default)]
    pub extended_metrics: BTreeMap<String, f64>,
}

// ---------------------------------------------------------------------------
// Synthesis records
// ---------------------------------------------------------------------------

/// Channel-mix entry: spend-based or volume-based economics, never both
/// populated, never zero substituted for null.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChannelMix {
    SpendBased {
        channel: String,
        spend: f64,
        spend_share: Option<f64>,
        roas: Option<f64>,
        efficiency: Option<f64>,
    },
    VolumeBased {
        channel: String,
        volume_metric: String,
        volume: f64,
        volume_share: Option<f64>,
    },
}

/// A cross-record conflict. Never auto-resolved: both values, their
/// variance, and a trust recommendation are always surfaced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contradiction {
    pub metric: String,
    pub source_a: String,
    pub value_a: f64,
    pub source_b: String,
    pub value_b: f64,
    pub variance_pct: Option<f64>,
    pub trust: String,
}

/// Category of a recommended action; priority breaks ICE-score ties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionCategory {
    Budget,
    Bidding,
    Creative,
    Landing,
    Tracking,
    Other,
}

impl ActionCategory {
    /// Declared tie-break order: lower ranks ahead.
    pub fn priority(&self) -> u8 {
        match self {
            ActionCategory::Budget => 0,
            ActionCategory::Bidding => 1,
            ActionCategory::Creative => 2,
            ActionCategory::Landing => 3,
            ActionCategory::Tracking => 4,
            ActionCategory::Other => 5,
        }
    }
}

/// An ICE-scored candidate action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    pub action: String,
    pub category: ActionCategory,
    pub impact: u8,
    pub confidence: u8,
    pub ease: u8,
    #[serde(default)]
    pub ice: u32,
    pub expected_outcome: String,
}

impl Action {
    /// Recompute the ICE score from its components.
    pub fn rescore(&mut self) {
        self.ice = kernel::ice(self.impact, self.confidence, self.ease);
    }
}

/// Rank candidate actions by ICE score descending; ties break by the
/// declared category priority, then by insertion order (stable sort).
pub fn rank_actions(actions: &mut [Action]) {
    for a in actions.iter_mut() {
        a.rescore();
    }
    actions.sort_by_key(|a| (std::cmp::Reverse(a.ice), a.category.priority()));
}

/// Group-level rollup figures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupSummary {
    pub total_spend: Option<f64>,
    pub total_revenue: f64,
    pub blended_roas: Option<f64>,
    pub channel_count: usize,
    pub channels_analyzed: Vec<String>,
    pub status: MetricStatus,
    pub top_issue: Option<String>,
    pub top_opportunity: Option<String>,
}

/// One group synthesis record; produced only for groups with two or
/// more analyzed channels in the run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupSynthesis {
    pub group: String,
    pub group_summary: GroupSummary,
    pub channel_mix: Vec<ChannelMix>,
    pub contradictions: Vec<Contradiction>,
    pub actions: Vec<Action>,
}

/// Attribution coverage across the run. Recomputed by the scheduler when
/// channel tasks fail so gaps are reflected, never silently dropped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributionCoverage {
    pub attributed_pct: f64,
    pub unattributed_channels: Vec<String>,
}

/// Per-group line of the portfolio budget-allocation table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupAllocation {
    pub group: String,
    pub spend: Option<f64>,
    pub spend_share: Option<f64>,
    pub revenue: f64,
    pub revenue_share: Option<f64>,
    pub roas: Option<f64>,
}

/// At most one per run; produced only when two or more groups have at
/// least one analyzed channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioSynthesis {
    pub groups: Vec<GroupAllocation>,
    pub attribution_coverage: AttributionCoverage,
    pub contradictions: Vec<Contradiction>,
    pub actions: Vec<Action>,
}

// ---------------------------------------------------------------------------
// Hypotheses
// ---------------------------------------------------------------------------

/// Confidence grade for a hypothesis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

impl Confidence {
    /// Eviction rank: higher survives list capping longer.
    pub fn rank(&self) -> u8 {
        match self {
            Confidence::Low => 1,
            Confidence::Medium => 2,
            Confidence::High => 3,
        }
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Confidence::High => write!(f, "HIGH"),
            Confidence::Medium => write!(f, "MEDIUM"),
            Confidence::Low => write!(f, "LOW"),
        }
    }
}

/// One explanation for a significant metric move (or a consolidated set
/// of correlated moves).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hypothesis {
    pub metric_move: String,
    pub channel: String,
    pub hypothesis: String,
    pub confidence: Confidence,
    #[serde(default)]
    pub supporting_evidence: Vec<String>,
    #[serde(default)]
    pub contradicting_evidence: Vec<String>,
}

// ---------------------------------------------------------------------------
// Decision ledger
// ---------------------------------------------------------------------------

/// Lifecycle of a logged decision. `Open` is the only non-terminal
/// state; transitions happen only by explicit external confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DecisionStatus {
    Open,
    Confirmed,
    Partial,
    Missed,
    Reversed,
    Declined,
}

impl DecisionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, DecisionStatus::Open)
    }
}

/// Parses outcome statuses only. `Open` is the state entries are born
/// in; it is never a recordable outcome, so it does not parse.
impl FromStr for DecisionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "confirmed" => Ok(DecisionStatus::Confirmed),
            "partial" => Ok(DecisionStatus::Partial),
            "missed" => Ok(DecisionStatus::Missed),
            "reversed" => Ok(DecisionStatus::Reversed),
            "declined" => Ok(DecisionStatus::Declined),
            other => Err(format!(
                "unknown decision status '{other}' (expected confirmed, partial, \
                 missed, reversed, or declined)"
            )),
        }
    }
}

impl fmt::Display for DecisionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecisionStatus::Open => write!(f, "Open"),
            DecisionStatus::Confirmed => write!(f, "Confirmed"),
            DecisionStatus::Partial => write!(f, "Partial"),
            DecisionStatus::Missed => write!(f, "Missed"),
            DecisionStatus::Reversed => write!(f, "Reversed"),
            DecisionStatus::Declined => write!(f, "Declined"),
        }
    }
}

/// One entry of the append-only decision ledger; persists across runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionLogEntry {
    pub id: u64,
    pub date: NaiveDate,
    pub source_run: String,
    pub action: String,
    pub expected_outcome: String,
    pub status: DecisionStatus,
}

// ---------------------------------------------------------------------------
// Run surface
// ---------------------------------------------------------------------------

/// Structured records produced by a completed run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunRecords {
    pub channels: Vec<ChannelResult>,
    pub groups: Vec<GroupSynthesis>,
    pub portfolio: Option<PortfolioSynthesis>,
    pub hypotheses: Vec<Hypothesis>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_status_severity_ordering() {
        assert!(CheckStatus::Pass < CheckStatus::Warn);
        assert!(CheckStatus::Warn < CheckStatus::Fail);
        assert_eq!(
            [CheckStatus::Warn, CheckStatus::Pass, CheckStatus::Fail]
                .into_iter()
                .max(),
            Some(CheckStatus::Fail)
        );
    }

    #[test]
    fn test_date_range_round_trip() {
        let range: DateRange = "2026-02-10/2026-02-16".parse().unwrap();
        assert_eq!(range.to_string(), "2026-02-10/2026-02-16");
        assert!("2026-02-16/2026-02-10".parse::<DateRange>().is_err());
        assert!("2026-02-10".parse::<DateRange>().is_err());
    }

    #[test]
    fn test_channel_mix_never_both_populated() {
        let spend = ChannelMix::SpendBased {
            channel: "sem".to_string(),
            spend: 1000.0,
            spend_share: Some(0.6),
            roas: Some(3.2),
            efficiency: Some(1.1),
        };
        let volume = ChannelMix::VolumeBased {
            channel: "seo".to_string(),
            volume_metric: "organic_clicks".to_string(),
            volume: 42_000.0,
            volume_share: Some(0.4),
        };

        let spend_json = serde_json::to_value(&spend).unwrap();
        assert!(spend_json.get("spend").is_some());
        assert!(spend_json.get("volume_metric").is_none());

        let volume_json = serde_json::to_value(&volume).unwrap();
        assert!(volume_json.get("volume_metric").is_some());
        assert!(volume_json.get("spend").is_none());
    }

    #[test]
    fn test_rank_actions_by_ice_then_category() {
        let mk = |name: &str, cat: ActionCategory, i, c, e| Action {
            action: name.to_string(),
            category: cat,
            impact: i,
            confidence: c,
            ease: e,
            ice: 0,
            expected_outcome: String::new(),
        };
        let mut actions = vec![
            mk("second", ActionCategory::Creative, 4, 3, 4), // 48
            mk("first", ActionCategory::Landing, 4, 3, 5),   // 60
            mk("tie-b", ActionCategory::Tracking, 3, 4, 2),  // 24
            mk("tie-a", ActionCategory::Budget, 4, 3, 2),    // 24
        ];
        rank_actions(&mut actions);
        let names: Vec<&str> = actions.iter().map(|a| a.action.as_str()).collect();
        assert_eq!(names, vec!["first", "second", "tie-a", "tie-b"]);
        assert_eq!(actions[0].ice, 60);
        assert_eq!(actions[1].ice, 48);
    }

    #[test]
    fn test_decision_status_parses_case_insensitively() {
        assert_eq!(
            "Confirmed".parse::<DecisionStatus>(),
            Ok(DecisionStatus::Confirmed)
        );
        assert_eq!(
            "declined".parse::<DecisionStatus>(),
            Ok(DecisionStatus::Declined)
        );
        assert!("done".parse::<DecisionStatus>().is_err());
        // Open is not a recordable outcome.
        assert!("open".parse::<DecisionStatus>().is_err());
    }

    #[test]
    fn test_decision_status_terminality() {
        assert!(!DecisionStatus::Open.is_terminal());
        for status in [
            DecisionStatus::Confirmed,
            DecisionStatus::Partial,
            DecisionStatus::Missed,
            DecisionStatus::Reversed,
            DecisionStatus::Declined,
        ] {
            assert!(status.is_terminal());
        }
    }

    #[test]
    fn test_gate_decision_wire_form() {
        assert_eq!(
            serde_json::to_string(&GateDecision::ProceedWithCaveats).unwrap(),
            "\"PROCEED_WITH_CAVEATS\""
        );
        assert_eq!(
            serde_json::to_string(&CheckKind::ScreenshotCrossReference).unwrap(),
            "\"screenshot-cross-reference\""
        );
    }

    #[test]
    fn test_working_set_distinct_groups() {
        let mut groups = BTreeMap::new();
        groups.insert("sem".to_string(), "paid".to_string());
        groups.insert("display".to_string(), "paid".to_string());
        groups.insert("seo".to_string(), "organic".to_string());
        let ws = WorkingSet {
            channels: vec!["sem".into(), "display".into(), "seo".into()],
            groups,
            date_range: None,
            comparison_type: ComparisonType::Wow,
            geo: Geo::All,
            template: Template::WeeklyReport,
            match_kind: MatchKind::Keyword,
        };
        assert_eq!(ws.distinct_groups(), vec!["organic", "paid"]);
        assert_eq!(ws.group_of("sem"), Some("paid"));
    }
}
