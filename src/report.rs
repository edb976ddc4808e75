//! Markdown report generation.
//!
//! Wraps the collaborator-rendered body with run metadata, transcript,
//! coverage, and caveats. When the format stage failed, a plain
//! rendering of the run records stands in for the body; a degraded
//! report still beats no report.

use anyhow::{Context, Result};
use std::path::Path;

use crate::gate::GateReport;
use crate::models::{GateDecision, RunRecords};
use crate::pipeline::stage::{RunTranscript, StageOutcome};
use crate::pipeline::CompletedRun;

/// Generate the complete Markdown report for a completed run.
pub fn generate_markdown_report(run: &CompletedRun) -> String {
    let mut output = String::new();

    output.push_str("# Pulseline Report\n\n");
    output.push_str(&generate_metadata_section(run));
    output.push_str(&generate_transcript_section(&run.transcript));
    output.push_str(&generate_caveats_section(&run.gate));

    match &run.body {
        Some(body) => {
            output.push_str(body.trim_end());
            output.push('\n');
        }
        None => output.push_str(&generate_fallback_body(&run.records)),
    }

    output.push_str(&generate_footer());
    output
}

/// Generate the report for a run the quality gate blocked.
pub fn generate_block_report(transcript: &RunTranscript, gate: &GateReport) -> String {
    let mut output = String::new();

    output.push_str("# Pulseline Report: Blocked\n\n");
    output.push_str(&format!("- **Run:** {}\n", transcript.run_id));
    output.push_str(&format!(
        "- **Started:** {}\n",
        transcript.started.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    output.push_str("- **Gate Decision:** BLOCK\n\n");

    output.push_str("## Files\n\n");
    let mut files: Vec<&str> = gate.checks.iter().map(|c| c.file.as_str()).collect();
    files.sort();
    files.dedup();
    for file in files {
        if let Some(status) = gate.file_status(file) {
            output.push_str(&format!("- `{file}`: {status}\n"));
        }
    }
    output.push('\n');

    output.push_str("## Failing Checks\n\n");
    for check in gate
        .checks
        .iter()
        .filter(|c| c.status == crate::models::CheckStatus::Fail)
    {
        output.push_str(&format!(
            "- `{}` [{}] {}\n",
            check.file, check.kind, check.detail
        ));
    }
    output.push('\n');

    output.push_str("## Fix List\n\n");
    for (i, fix) in gate.fix_list.iter().enumerate() {
        output.push_str(&format!("{}. {}\n", i + 1, fix));
    }
    output.push('\n');

    output.push_str("No analysis was performed; rerun after the fix list is addressed.\n");
    output.push_str(&generate_footer());
    output
}

/// Serialize the full run as pretty JSON.
pub fn generate_json_report(run: &CompletedRun) -> Result<String> {
    let value = serde_json::json!({
        "run_id": run.run_id,
        "template": run.template,
        "working_set": run.working_set,
        "gate_decision": run.gate.decision,
        "caveats": run.gate.caveats,
        "transcript": run.transcript,
        "coverage": run.coverage,
        "unanalyzed": run.unanalyzed,
        "records": {
            "channels": run.records.channels,
            "groups": run.records.groups,
            "portfolio": run.records.portfolio,
            "hypotheses": run.records.hypotheses,
        },
        "body": run.body,
    });
    serde_json::to_string_pretty(&value).context("Failed to serialize run to JSON")
}

/// Write a report to disk.
pub fn write_report(path: &Path, content: &str) -> Result<()> {
    std::fs::write(path, content)
        .with_context(|| format!("Failed to write report to {}", path.display()))
}

fn generate_metadata_section(run: &CompletedRun) -> String {
    let mut section = String::new();

    section.push_str("## Metadata\n\n");
    section.push_str(&format!("- **Run:** {}\n", run.run_id));
    section.push_str(&format!(
        "- **Started:** {}\n",
        run.transcript.started.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    section.push_str(&format!("- **Template:** {}\n", run.template));
    section.push_str(&format!(
        "- **Channels:** {}\n",
        run.working_set.channels.join(", ")
    ));
    if let Some(range) = run.working_set.date_range {
        section.push_str(&format!("- **Period:** {range}\n"));
    }
    section.push_str(&format!(
        "- **Comparison:** {} | **Geo:** {}\n",
        run.working_set.comparison_type, run.working_set.geo
    ));
    section.push_str(&format!(
        "- **Gate Decision:** {}\n",
        match run.gate.decision {
            GateDecision::Pass => "PASS",
            GateDecision::ProceedWithCaveats => "PROCEED_WITH_CAVEATS",
            GateDecision::Block => "BLOCK",
        }
    ));
    section.push_str(&format!(
        "- **Coverage:** {:.0}% of requested channels\n",
        run.coverage.attributed_pct
    ));
    for (channel, reason) in &run.unanalyzed {
        section.push_str(&format!("  - not analyzed: `{channel}` ({reason})\n"));
    }
    section.push('\n');

    section
}

fn generate_transcript_section(transcript: &RunTranscript) -> String {
    let mut section = String::new();

    section.push_str("## Stage Transcript\n\n");
    for (stage, outcome) in &transcript.stages {
        let line = match outcome {
            StageOutcome::Completed => format!("- {stage}: completed\n"),
            StageOutcome::Skipped { reason } => format!("- {stage}: skipped ({reason})\n"),
            StageOutcome::Failed { error } => format!("- {stage}: **failed** ({error})\n"),
        };
        section.push_str(&line);
    }
    section.push('\n');

    section
}

fn generate_caveats_section(gate: &GateReport) -> String {
    if gate.caveats.is_empty() {
        return String::new();
    }

    let mut section = String::new();
    section.push_str("## Caveats\n\n");
    for caveat in &gate.caveats {
        section.push_str(&format!("- {caveat}\n"));
    }
    section.push('\n');

    section
}

/// Plain rendering of the run records, used when the collaborator could
/// not produce a body.
fn generate_fallback_body(records: &RunRecords) -> String {
    let mut body = String::new();

    body.push_str("## Channel Results\n\n");
    body.push_str("_Formatted rendering unavailable; raw records follow._\n\n");
    for result in &records.channels {
        body.push_str(&format!(
            "### {} ({}, {})\n\n",
            result.channel, result.channel_group, result.period
        ));
        body.push_str("| Metric | Current | Prior | Δ% | Status |\n");
        body.push_str("|---|---|---|---|---|\n");
        for entry in &result.summary {
            body.push_str(&format!(
                "| {} | {:.2} | {} | {} | {} |\n",
                entry.metric,
                entry.current,
                entry
                    .prior
                    .map(|v| format!("{v:.2}"))
                    .unwrap_or_else(|| "n/a".to_string()),
                entry
                    .delta_pct
                    .map(|v| format!("{v:+.1}"))
                    .unwrap_or_else(|| "n/a".to_string()),
                entry.status,
            ));
        }
        body.push('\n');
        for anomaly in &result.anomalies {
            body.push_str(&format!(
                "- anomaly: {} {} (z = {:+.1})\n",
                anomaly.metric, anomaly.direction, anomaly.z_score
            ));
        }
        for note in &result.data_quality_notes {
            body.push_str(&format!("- note: {note}\n"));
        }
        body.push('\n');
    }

    for group in &records.groups {
        body.push_str(&format!("### Group: {}\n\n", group.group));
        body.push_str(&format!(
            "- status {} across {} channels ({})\n",
            group.group_summary.status,
            group.group_summary.channel_count,
            group.group_summary.channels_analyzed.join(", ")
        ));
        for action in &group.actions {
            body.push_str(&format!(
                "- action (ICE {}): {} (expected: {})\n",
                action.ice, action.action, action.expected_outcome
            ));
        }
        body.push('\n');
    }

    if let Some(portfolio) = &records.portfolio {
        body.push_str("### Portfolio\n\n");
        for allocation in &portfolio.groups {
            body.push_str(&format!(
                "- {}: revenue {:.0}{}\n",
                allocation.group,
                allocation.revenue,
                allocation
                    .roas
                    .map(|r| format!(", ROAS {r:.2}"))
                    .unwrap_or_default()
            ));
        }
        for action in &portfolio.actions {
            body.push_str(&format!(
                "- action (ICE {}): {}\n",
                action.ice, action.action
            ));
        }
        body.push('\n');
    }

    if !records.hypotheses.is_empty() {
        body.push_str("### Hypotheses\n\n");
        for hypothesis in &records.hypotheses {
            body.push_str(&format!(
                "- [{:?}] {}: {}\n",
                hypothesis.confidence, hypothesis.metric_move, hypothesis.hypothesis
            ));
        }
        body.push('\n');
    }

    body
}

fn generate_footer() -> String {
    "\n---\n\n*Generated by Pulseline*\n".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        CheckKind, CheckStatus, ComparisonType, FileCheckResult, Geo, MatchKind, Template,
        WorkingSet,
    };
    use crate::pipeline::stage::Stage;
    use crate::models::AttributionCoverage;

    fn block_gate() -> GateReport {
        GateReport {
            checks: vec![FileCheckResult {
                file: "sem_w07.csv".to_string(),
                kind: CheckKind::Completeness,
                status: CheckStatus::Fail,
                detail: "40.0% of expected rows missing".to_string(),
            }],
            decision: GateDecision::Block,
            caveats: vec![],
            fix_list: vec!["completeness gap in sem_w07.csv: 40.0% of expected rows missing"
                .to_string()],
        }
    }

    fn completed_run() -> CompletedRun {
        let mut transcript = RunTranscript::new("run-test".to_string());
        transcript.record(Stage::Classify, StageOutcome::Completed);
        CompletedRun {
            run_id: "run-test".to_string(),
            transcript,
            working_set: WorkingSet {
                channels: vec!["sem".to_string()],
                groups: [("sem".to_string(), "paid".to_string())].into(),
                date_range: Some("2026-02-10/2026-02-16".parse().unwrap()),
                comparison_type: ComparisonType::Wow,
                geo: Geo::All,
                template: Template::WeeklyReport,
                match_kind: MatchKind::Keyword,
            },
            template: Template::WeeklyReport,
            gate: GateReport {
                checks: vec![],
                decision: GateDecision::Pass,
                caveats: vec![],
                fix_list: vec![],
            },
            records: RunRecords {
                channels: vec![],
                groups: vec![],
                portfolio: None,
                hypotheses: vec![],
            },
            coverage: AttributionCoverage {
                attributed_pct: 100.0,
                unattributed_channels: vec![],
            },
            unanalyzed: vec![],
            body: Some("## Executive Summary\n\nSteady week.".to_string()),
        }
    }

    #[test]
    fn test_markdown_report_wraps_body() {
        let report = generate_markdown_report(&completed_run());
        assert!(report.starts_with("# Pulseline Report"));
        assert!(report.contains("## Metadata"));
        assert!(report.contains("## Stage Transcript"));
        assert!(report.contains("Steady week."));
    }

    #[test]
    fn test_markdown_report_falls_back_without_body() {
        let mut run = completed_run();
        run.body = None;
        let report = generate_markdown_report(&run);
        assert!(report.contains("Formatted rendering unavailable"));
    }

    #[test]
    fn test_block_report_itemizes_fix_list() {
        let transcript = RunTranscript::new("run-test".to_string());
        let report = generate_block_report(&transcript, &block_gate());
        assert!(report.contains("# Pulseline Report: Blocked"));
        assert!(report.contains("1. completeness gap in sem_w07.csv"));
        assert!(report.contains("No analysis was performed"));
    }

    #[test]
    fn test_json_report_is_valid_json() {
        let json = generate_json_report(&completed_run()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["run_id"], "run-test");
        assert_eq!(value["gate_decision"], "PASS");
    }
}
