//! Data-quality gate.
//!
//! Evaluates per-file statistics into one `FileCheckResult` per
//! (file, check-kind) pair, rolls files up as worst-of, and derives the
//! run-level admission decision: any FAIL blocks the run, any WARN means
//! proceed with caveats, otherwise pass.

use crate::error::PipelineError;
use crate::models::{CheckKind, CheckStatus, FileCheckResult, GateDecision};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Policy thresholds for the gate. Values come from configuration, not
/// from the aggregation logic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatePolicy {
    /// Missing-row share at or above which completeness FAILs; anything
    /// above zero but below this is a WARN.
    #[serde(default = "default_completeness_fail_pct")]
    pub completeness_fail_pct: f64,

    /// A file FAILs sanity once it has more than this many violations.
    #[serde(default = "default_max_sanity_violations")]
    pub max_sanity_violations: usize,

    /// Cross-source disagreement above this is flagged, always as WARN.
    #[serde(default = "default_cross_source_warn_pct")]
    pub cross_source_warn_pct: f64,

    /// Screenshot-vs-primary disagreement above this is flagged, always
    /// as WARN; never silently resolved in favor of one source.
    #[serde(default = "default_screenshot_warn_pct")]
    pub screenshot_warn_pct: f64,
}

fn default_completeness_fail_pct() -> f64 {
    10.0
}

fn default_max_sanity_violations() -> usize {
    5
}

fn default_cross_source_warn_pct() -> f64 {
    5.0
}

fn default_screenshot_warn_pct() -> f64 {
    2.0
}

impl Default for GatePolicy {
    fn default() -> Self {
        Self {
            completeness_fail_pct: default_completeness_fail_pct(),
            max_sanity_violations: default_max_sanity_violations(),
            cross_source_warn_pct: default_cross_source_warn_pct(),
            screenshot_warn_pct: default_screenshot_warn_pct(),
        }
    }
}

/// Per-file statistics reported by the preprocess collaborator for one
/// standardized file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileStats {
    /// Standardized file name.
    pub file: String,
    /// Channel the file feeds, when the source was recognized.
    pub channel: Option<String>,
    /// Row count after standardization.
    pub rows: usize,
    /// Required columns absent from the file.
    #[serde(default)]
    pub missing_required_columns: Vec<String>,
    /// Share of expected rows missing, in percent.
    #[serde(default)]
    pub missing_row_pct: f64,
    /// Individual sanity-bound violations (metric outside configured bounds).
    #[serde(default)]
    pub sanity_violations: Vec<String>,
    /// Disagreement with a sibling source covering the same period, percent.
    #[serde(default)]
    pub cross_source_variance_pct: Option<f64>,
    /// Disagreement with the vendor screenshot reference, percent.
    #[serde(default)]
    pub screenshot_variance_pct: Option<f64>,
}

/// Everything the scheduler needs from the gate: every check result,
/// the decision, caveats for downstream records, and the fix list for a
/// blocked run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateReport {
    pub checks: Vec<FileCheckResult>,
    pub decision: GateDecision,
    pub caveats: Vec<String>,
    pub fix_list: Vec<String>,
}

impl GateReport {
    /// File-level status for one file: worst of its check results.
    pub fn file_status(&self, file: &str) -> Option<CheckStatus> {
        self.checks
            .iter()
            .filter(|c| c.file == file)
            .map(|c| c.status)
            .max()
    }
}

/// Evaluate the admission gate over all files touched by the run.
pub fn evaluate(files: &[FileStats], policy: &GatePolicy) -> GateReport {
    let mut checks = Vec::with_capacity(files.len() * 5);
    for stats in files {
        checks.extend(evaluate_file(stats, policy));
    }

    let decision = decide(&checks);
    let caveats = collect_caveats(&checks);
    let fix_list = collect_fix_list(&checks);

    match decision {
        GateDecision::Block => warn!(
            "quality gate BLOCK: {} failing checks across {} files",
            fix_list.len(),
            files.len()
        ),
        GateDecision::ProceedWithCaveats => {
            debug!("quality gate: proceeding with {} caveats", caveats.len())
        }
        GateDecision::Pass => debug!("quality gate: all checks passed"),
    }

    GateReport {
        checks,
        decision,
        caveats,
        fix_list,
    }
}

/// One result per check kind for a single file.
fn evaluate_file(stats: &FileStats, policy: &GatePolicy) -> Vec<FileCheckResult> {
    let mut results = Vec::with_capacity(5);
    let file = stats.file.clone();

    // Schema: unrecognized source or missing required columns are fatal
    // for the file.
    let schema = if stats.channel.is_none() {
        FileCheckResult {
            file: file.clone(),
            kind: CheckKind::Schema,
            status: CheckStatus::Fail,
            detail: format!("source not recognized from file name '{}'", stats.file),
        }
    } else if !stats.missing_required_columns.is_empty() {
        FileCheckResult {
            file: file.clone(),
            kind: CheckKind::Schema,
            status: CheckStatus::Fail,
            detail: format!(
                "missing required columns: {}",
                stats.missing_required_columns.join(", ")
            ),
        }
    } else {
        FileCheckResult {
            file: file.clone(),
            kind: CheckKind::Schema,
            status: CheckStatus::Pass,
            detail: "all required columns present".to_string(),
        }
    };
    results.push(schema);

    // Completeness: WARN below the fail threshold, FAIL at or above it.
    let completeness = if stats.missing_row_pct >= policy.completeness_fail_pct {
        FileCheckResult {
            file: file.clone(),
            kind: CheckKind::Completeness,
            status: CheckStatus::Fail,
            detail: format!("{:.1}% of expected rows missing", stats.missing_row_pct),
        }
    } else if stats.missing_row_pct > 0.0 {
        FileCheckResult {
            file: file.clone(),
            kind: CheckKind::Completeness,
            status: CheckStatus::Warn,
            detail: format!("{:.1}% of expected rows missing", stats.missing_row_pct),
        }
    } else {
        FileCheckResult {
            file: file.clone(),
            kind: CheckKind::Completeness,
            status: CheckStatus::Pass,
            detail: format!("all expected rows present ({} rows)", stats.rows),
        }
    };
    results.push(completeness);

    // Sanity: accumulates to FAIL past the violation budget.
    let violations = stats.sanity_violations.len();
    let sanity = if violations > policy.max_sanity_violations {
        FileCheckResult {
            file: file.clone(),
            kind: CheckKind::Sanity,
            status: CheckStatus::Fail,
            detail: format!(
                "{violations} sanity violations (limit {}): {}",
                policy.max_sanity_violations,
                stats.sanity_violations.join("; ")
            ),
        }
    } else if violations > 0 {
        FileCheckResult {
            file: file.clone(),
            kind: CheckKind::Sanity,
            status: CheckStatus::Warn,
            detail: format!(
                "{violations} sanity violations: {}",
                stats.sanity_violations.join("; ")
            ),
        }
    } else {
        FileCheckResult {
            file: file.clone(),
            kind: CheckKind::Sanity,
            status: CheckStatus::Pass,
            detail: "all sanity bounds satisfied".to_string(),
        }
    };
    results.push(sanity);

    // Cross-source and screenshot variance are flagged as WARN only;
    // the conflict is surfaced downstream, never resolved here.
    results.push(variance_check(
        &file,
        CheckKind::CrossSource,
        stats.cross_source_variance_pct,
        policy.cross_source_warn_pct,
        "sibling source",
    ));
    results.push(variance_check(
        &file,
        CheckKind::ScreenshotCrossReference,
        stats.screenshot_variance_pct,
        policy.screenshot_warn_pct,
        "vendor screenshot",
    ));

    results
}

fn variance_check(
    file: &str,
    kind: CheckKind,
    variance_pct: Option<f64>,
    threshold_pct: f64,
    reference: &str,
) -> FileCheckResult {
    match variance_pct {
        Some(v) if v > threshold_pct => FileCheckResult {
            file: file.to_string(),
            kind,
            status: CheckStatus::Warn,
            detail: format!(
                "{v:.1}% disagreement with {reference} (threshold {threshold_pct:.1}%); \
                 both values retained for downstream review"
            ),
        },
        Some(v) => FileCheckResult {
            file: file.to_string(),
            kind,
            status: CheckStatus::Pass,
            detail: format!("{v:.1}% disagreement with {reference}, within threshold"),
        },
        None => FileCheckResult {
            file: file.to_string(),
            kind,
            status: CheckStatus::Pass,
            detail: format!("no {reference} available for comparison"),
        },
    }
}

/// Run-level decision: monotonic in check severity.
fn decide(checks: &[FileCheckResult]) -> GateDecision {
    match checks.iter().map(|c| c.status).max() {
        Some(CheckStatus::Fail) => GateDecision::Block,
        Some(CheckStatus::Warn) => GateDecision::ProceedWithCaveats,
        _ => GateDecision::Pass,
    }
}

/// WARN details, carried on every downstream record of the run.
fn collect_caveats(checks: &[FileCheckResult]) -> Vec<String> {
    checks
        .iter()
        .filter(|c| c.status == CheckStatus::Warn)
        .map(|c| format!("{} [{}]: {}", c.file, c.kind, c.detail))
        .collect()
}

/// Itemized, actionable fix list for a blocked run, expressed through
/// the domain error taxonomy.
fn collect_fix_list(checks: &[FileCheckResult]) -> Vec<String> {
    checks
        .iter()
        .filter(|c| c.status == CheckStatus::Fail)
        .map(|c| {
            let err = match c.kind {
                CheckKind::Schema => PipelineError::SchemaViolation {
                    file: c.file.clone(),
                    detail: c.detail.clone(),
                },
                CheckKind::Completeness => PipelineError::CompletenessGap {
                    file: c.file.clone(),
                    detail: c.detail.clone(),
                },
                CheckKind::Sanity => PipelineError::SanityViolation {
                    file: c.file.clone(),
                    detail: c.detail.clone(),
                },
                CheckKind::CrossSource | CheckKind::ScreenshotCrossReference => {
                    PipelineError::CrossSourceConflict {
                        file: c.file.clone(),
                        detail: c.detail.clone(),
                    }
                }
            };
            err.to_string()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clean_stats(file: &str) -> FileStats {
        FileStats {
            file: file.to_string(),
            channel: Some("sem".to_string()),
            rows: 700,
            missing_required_columns: vec![],
            missing_row_pct: 0.0,
            sanity_violations: vec![],
            cross_source_variance_pct: None,
            screenshot_variance_pct: None,
        }
    }

    #[test]
    fn test_all_clean_passes() {
        let report = evaluate(&[clean_stats("google-ads_na.csv")], &GatePolicy::default());
        assert_eq!(report.decision, GateDecision::Pass);
        assert!(report.caveats.is_empty());
        assert!(report.fix_list.is_empty());
        assert_eq!(report.checks.len(), 5);
    }

    #[test]
    fn test_any_fail_blocks() {
        let mut bad = clean_stats("google-ads_na.csv");
        bad.missing_required_columns = vec!["Cost".to_string()];
        let report = evaluate(
            &[clean_stats("display_na.csv"), bad],
            &GatePolicy::default(),
        );
        assert_eq!(report.decision, GateDecision::Block);
        assert_eq!(report.fix_list.len(), 1);
        assert!(report.fix_list[0].contains("schema violation"));
        assert!(report.fix_list[0].contains("Cost"));
    }

    #[test]
    fn test_three_pass_one_warn_proceeds_with_caveats() {
        // Scenario: 3 clean files + 1 file with a completeness warning.
        let mut warned = clean_stats("affiliate_na.csv");
        warned.missing_row_pct = 4.0;
        let files = vec![
            clean_stats("google-ads_na.csv"),
            clean_stats("gsc_na.csv"),
            clean_stats("display_na.csv"),
            warned,
        ];
        let report = evaluate(&files, &GatePolicy::default());
        assert_eq!(report.decision, GateDecision::ProceedWithCaveats);
        assert_eq!(report.caveats.len(), 1);
        assert!(report.caveats[0].contains("affiliate_na.csv"));
        assert!(report.caveats[0].contains("4.0%"));
    }

    #[test]
    fn test_completeness_threshold_boundary() {
        let policy = GatePolicy::default();
        let mut at_threshold = clean_stats("a.csv");
        at_threshold.missing_row_pct = 10.0;
        assert_eq!(
            evaluate(&[at_threshold], &policy).decision,
            GateDecision::Block
        );

        let mut below = clean_stats("b.csv");
        below.missing_row_pct = 9.9;
        assert_eq!(
            evaluate(&[below], &policy).decision,
            GateDecision::ProceedWithCaveats
        );
    }

    #[test]
    fn test_sanity_violation_budget() {
        let policy = GatePolicy::default();
        let mut five = clean_stats("a.csv");
        five.sanity_violations = (0..5).map(|i| format!("ctr row {i}")).collect();
        assert_eq!(
            evaluate(&[five], &policy).decision,
            GateDecision::ProceedWithCaveats
        );

        let mut six = clean_stats("b.csv");
        six.sanity_violations = (0..6).map(|i| format!("ctr row {i}")).collect();
        assert_eq!(evaluate(&[six], &policy).decision, GateDecision::Block);
    }

    #[test]
    fn test_variance_checks_warn_never_fail() {
        let mut stats = clean_stats("google-ads_na.csv");
        stats.cross_source_variance_pct = Some(40.0);
        stats.screenshot_variance_pct = Some(25.0);
        let report = evaluate(&[stats], &GatePolicy::default());
        // Even extreme disagreement stays a WARN: surfaced, not resolved.
        assert_eq!(report.decision, GateDecision::ProceedWithCaveats);
        assert_eq!(report.caveats.len(), 2);
        assert!(report.caveats.iter().all(|c| c.contains("disagreement")));
    }

    #[test]
    fn test_unrecognized_source_fails_schema() {
        let mut stats = clean_stats("mystery.csv");
        stats.channel = None;
        let report = evaluate(&[stats], &GatePolicy::default());
        assert_eq!(report.decision, GateDecision::Block);
        assert_eq!(report.file_status("mystery.csv"), Some(CheckStatus::Fail));
    }
}
