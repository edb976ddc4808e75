//! Nine-stage pipeline scheduler.
//!
//! The scheduler is the deterministic control plane of a run: it walks
//! the fixed stage sequence, fans channel and group work out to the
//! collaborator, enforces caps and cross-checks on everything that
//! comes back, and records one outcome per stage in the transcript.
//! Sibling task failures degrade coverage; they never abort the run.
//! Only a gate BLOCK or a failure before dispatch ends a run early.

pub mod stage;

use anyhow::Result;
use futures::future::join_all;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::collab::{
    ChannelTask, Collaborator, FormatTask, GroupTask, HypothesisTask, PortfolioTask, Preprocessed,
};
use crate::config::AnalysisConfig;
use crate::error::PipelineError;
use crate::gate::{self, GatePolicy, GateReport};
use crate::kernel;
use crate::models::{
    Action, AttributionCoverage, ChannelResult, ComparisonType, DateRange, Geo, Hypothesis,
    RunRecords, Template, WorkingSet, GROUP_ACTION_CAP, HYPOTHESIS_CAP, PORTFOLIO_ACTION_CAP,
};
use crate::router::{self, Classification};
use crate::scanner::DataFile;
use crate::store::MemoryStore;
use stage::{RunTranscript, Stage, StageOutcome};

/// Channel task results must agree with the kernel's own delta within
/// this many percentage points.
const DELTA_CROSS_CHECK_PP: f64 = 1.0;

/// One analysis request, as assembled by the CLI layer.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub query: String,
    /// Explicit channel list, bypassing keyword routing.
    pub channels: Option<Vec<String>>,
    pub period: Option<DateRange>,
    pub geo: Option<Geo>,
    pub comparison: Option<ComparisonType>,
    /// Export files discovered under the data directory.
    pub files: Vec<DataFile>,
}

/// Outcome of a run.
#[derive(Debug)]
pub enum RunResponse {
    /// Neither routing nor the external classifier could place the query.
    NoMatch { query: String, detail: String },
    /// The quality gate blocked the run; no analysis was performed.
    Blocked {
        transcript: RunTranscript,
        gate: GateReport,
    },
    Completed(Box<CompletedRun>),
}

/// Everything a completed run produced.
#[derive(Debug)]
pub struct CompletedRun {
    pub run_id: String,
    pub transcript: RunTranscript,
    pub working_set: WorkingSet,
    pub template: Template,
    pub gate: GateReport,
    pub records: RunRecords,
    pub coverage: AttributionCoverage,
    /// Requested channels that produced no result, with the reason.
    pub unanalyzed: Vec<(String, String)>,
    /// Rendered report body; `None` when the format stage failed and
    /// the report layer must fall back to its own rendering.
    pub body: Option<String>,
}

/// The pipeline scheduler. Owns the memory store for the duration of a
/// run: baseline snapshots are taken before fan-out and all writes
/// happen in the final stage.
pub struct Scheduler<C: Collaborator> {
    collaborator: C,
    store: MemoryStore,
    gate_policy: GatePolicy,
    analysis: AnalysisConfig,
}

impl<C: Collaborator> Scheduler<C> {
    pub fn new(
        collaborator: C,
        store: MemoryStore,
        gate_policy: GatePolicy,
        analysis: AnalysisConfig,
    ) -> Self {
        Self {
            collaborator,
            store,
            gate_policy,
            analysis,
        }
    }

    /// The memory store, for inspection after a run.
    pub fn store(&self) -> &MemoryStore {
        &self.store
    }

    /// Execute one run through all nine stages.
    pub async fn run(&mut self, request: RunRequest) -> Result<RunResponse> {
        let run_id = format!("run-{}", chrono::Utc::now().format("%Y%m%dT%H%M%SZ"));
        let mut transcript = RunTranscript::new(run_id.clone());
        info!("starting {run_id}: {}", request.query);

        // CLASSIFY
        let mut working_set = match self.classify(&request).await? {
            Ok(ws) => {
                transcript.record(Stage::Classify, StageOutcome::Completed);
                ws
            }
            Err(detail) => {
                transcript.record(
                    Stage::Classify,
                    StageOutcome::Failed {
                        error: detail.clone(),
                    },
                );
                return Ok(RunResponse::NoMatch {
                    query: request.query,
                    detail,
                });
            }
        };
        if let Some(geo) = request.geo {
            working_set.geo = geo;
        }
        if let Some(comparison) = request.comparison {
            working_set.comparison_type = comparison;
        }
        debug!("working set: {:?}", working_set.channels);

        // PREPROCESS
        let file_names: Vec<String> = request.files.iter().map(|f| f.path.clone()).collect();
        let preprocessed = match self.collaborator.preprocess(file_names).await {
            Ok(p) => {
                transcript.record(Stage::Preprocess, StageOutcome::Completed);
                p
            }
            Err(e) => {
                transcript.record(
                    Stage::Preprocess,
                    StageOutcome::Failed {
                        error: e.to_string(),
                    },
                );
                transcript.skip_remaining("preprocessing failed");
                return Err(e.into());
            }
        };

        // VALIDATE
        let gate = gate::evaluate(&preprocessed.files, &self.gate_policy);
        transcript.record(Stage::Validate, StageOutcome::Completed);
        if gate.decision == crate::models::GateDecision::Block {
            transcript.skip_remaining("input data blocked by quality gate");
            return Ok(RunResponse::Blocked { transcript, gate });
        }

        // DISPATCH
        let dispatch = self
            .dispatch_channels(&working_set, &preprocessed, &gate)
            .await;
        transcript.record(Stage::Dispatch, StageOutcome::Completed);

        // GROUP_SYNTHESIZE
        let (groups, group_failures, group_skips) =
            self.synthesize_groups(&working_set, &dispatch.results).await;
        if !group_skips.is_empty() && groups.is_empty() && group_failures.is_empty() {
            transcript.record(
                Stage::GroupSynthesize,
                StageOutcome::Skipped {
                    reason: group_skips.join("; "),
                },
            );
        } else {
            transcript.record(Stage::GroupSynthesize, StageOutcome::Completed);
        }
        for failure in &group_failures {
            warn!("{failure}");
        }

        // HYPOTHESIZE: single sequential step, after every channel and
        // group task has settled.
        let hypotheses = if dispatch.results.is_empty() {
            transcript.record(
                Stage::Hypothesize,
                StageOutcome::Skipped {
                    reason: "no channel results".to_string(),
                },
            );
            Vec::new()
        } else {
            match self
                .collaborator
                .hypothesize(HypothesisTask {
                    channel_results: dispatch.results.clone(),
                    group_syntheses: groups.clone(),
                })
                .await
            {
                Ok(mut hypotheses) => {
                    kernel::cap_list(&mut hypotheses, HYPOTHESIS_CAP, |h: &Hypothesis| {
                        h.confidence.rank()
                    });
                    transcript.record(Stage::Hypothesize, StageOutcome::Completed);
                    hypotheses
                }
                Err(e) => {
                    transcript.record(
                        Stage::Hypothesize,
                        StageOutcome::Failed {
                            error: e.to_string(),
                        },
                    );
                    Vec::new()
                }
            }
        };

        // TOP_SYNTHESIZE
        let coverage = self.coverage(&working_set, &dispatch);
        let groups_with_results = working_set
            .distinct_groups()
            .into_iter()
            .filter(|g| {
                dispatch
                    .results
                    .iter()
                    .any(|r| working_set.group_of(&r.channel) == Some(g.as_str()))
            })
            .count();
        let portfolio = if groups_with_results >= 2 {
            match self
                .collaborator
                .synthesize_portfolio(PortfolioTask {
                    group_syntheses: groups.clone(),
                    unanalyzed: dispatch.unanalyzed.clone(),
                })
                .await
            {
                Ok(mut portfolio) => {
                    // Coverage is the scheduler's call, not the
                    // collaborator's; failed and skipped channels must
                    // show up in it.
                    portfolio.attribution_coverage = coverage.clone();
                    crate::models::rank_actions(&mut portfolio.actions);
                    kernel::cap_list(&mut portfolio.actions, PORTFOLIO_ACTION_CAP, |a: &Action| {
                        a.confidence
                    });
                    transcript.record(Stage::TopSynthesize, StageOutcome::Completed);
                    Some(portfolio)
                }
                Err(e) => {
                    transcript.record(
                        Stage::TopSynthesize,
                        StageOutcome::Failed {
                            error: e.to_string(),
                        },
                    );
                    None
                }
            }
        } else {
            transcript.record(
                Stage::TopSynthesize,
                StageOutcome::Skipped {
                    reason: format!(
                        "portfolio view needs two analyzed groups, have {groups_with_results}"
                    ),
                },
            );
            None
        };

        // FORMAT
        let template = router::upgrade_template(
            working_set.template,
            &dispatch.results,
            self.analysis.zscore_flag_threshold,
        );
        let records = RunRecords {
            channels: dispatch.results.clone(),
            groups,
            portfolio,
            hypotheses,
        };
        let body = match self
            .collaborator
            .format_output(FormatTask {
                template,
                channel_results: records.channels.clone(),
                group_syntheses: records.groups.clone(),
                portfolio: records.portfolio.clone(),
                hypotheses: records.hypotheses.clone(),
                caveats: gate.caveats.clone(),
            })
            .await
        {
            Ok(body) => {
                transcript.record(Stage::Format, StageOutcome::Completed);
                Some(body)
            }
            Err(e) => {
                warn!("format stage failed, falling back to plain rendering: {e}");
                transcript.record(
                    Stage::Format,
                    StageOutcome::Failed {
                        error: e.to_string(),
                    },
                );
                None
            }
        };

        // MEMORY_UPDATE
        match self.update_memory(&run_id, &working_set, &records) {
            Ok(()) => transcript.record(Stage::MemoryUpdate, StageOutcome::Completed),
            Err(e) => {
                warn!("memory update failed: {e}");
                transcript.record(
                    Stage::MemoryUpdate,
                    StageOutcome::Failed {
                        error: e.to_string(),
                    },
                );
            }
        }

        Ok(RunResponse::Completed(Box::new(CompletedRun {
            run_id,
            transcript,
            working_set,
            template,
            gate,
            records,
            coverage,
            unanalyzed: dispatch.unanalyzed,
            body,
        })))
    }

    /// CLASSIFY stage: keyword routing first, external classifier for
    /// the remainder. `Err(detail)` means no-match, not a failure.
    async fn classify(&self, request: &RunRequest) -> Result<Result<WorkingSet, String>> {
        let classification = router::classify(
            &request.query,
            request.channels.as_deref(),
            request.period,
        )?;
        match classification {
            Classification::Resolved(ws) => Ok(Ok(ws)),
            Classification::PendingExternal { query, parsed } => {
                let intent = self.collaborator.classify_intent(query).await?;
                if intent.channels.is_empty() {
                    return Ok(Err("no channel could be named for this query".to_string()));
                }
                match router::resolve_external(&intent.channels, &parsed) {
                    Ok(ws) => Ok(Ok(ws)),
                    Err(PipelineError::UnrecognizedSource(channel)) => {
                        Ok(Err(format!("classifier named unknown channel '{channel}'")))
                    }
                    Err(e) => Err(e.into()),
                }
            }
        }
    }

    /// DISPATCH stage: fan channel tasks out concurrently, then vet
    /// every result before accepting it.
    async fn dispatch_channels(
        &self,
        working_set: &WorkingSet,
        preprocessed: &Preprocessed,
        gate: &GateReport,
    ) -> DispatchOutcome {
        let mut unanalyzed: Vec<(String, String)> = Vec::new();
        let mut tasks: Vec<ChannelTask> = Vec::new();

        for channel in &working_set.channels {
            let data_files: Vec<String> = preprocessed
                .files
                .iter()
                .filter(|f| f.channel.as_deref() == Some(channel.as_str()))
                .map(|f| f.file.clone())
                .collect();
            if data_files.is_empty() {
                unanalyzed.push((channel.clone(), "no data files for channel".to_string()));
                continue;
            }
            tasks.push(ChannelTask {
                channel: channel.clone(),
                group: working_set
                    .group_of(channel)
                    .unwrap_or_default()
                    .to_string(),
                geo: working_set.geo,
                comparison_type: working_set.comparison_type,
                date_range: working_set.date_range,
                data_files,
                baselines: self.store.channel_baselines(channel),
                caveats: gate.caveats.clone(),
            });
        }

        let task_timeout = Duration::from_secs(self.analysis.task_timeout_seconds);
        let calls = tasks.iter().map(|task| {
            let task = task.clone();
            async move { timeout(task_timeout, self.collaborator.analyze_channel(task)).await }
        });
        let replies = join_all(calls).await;

        let mut results = Vec::new();
        for (task, reply) in tasks.into_iter().zip(replies) {
            let outcome = match reply {
                Err(_) => Err(format!(
                    "timed out after {}s",
                    self.analysis.task_timeout_seconds
                )),
                Ok(Err(e)) => Err(e.to_string()),
                Ok(Ok(result)) => self.vet_channel_result(&task, result),
            };
            match outcome {
                Ok(result) => results.push(result),
                Err(reason) => {
                    let err = PipelineError::ChannelTaskFailure {
                        channel: task.channel.clone(),
                        reason: reason.clone(),
                    };
                    warn!("{err}");
                    unanalyzed.push((task.channel, reason));
                }
            }
        }

        DispatchOutcome {
            results,
            unanalyzed,
        }
    }

    /// Vet one channel result: identity, arithmetic cross-checks, and
    /// baseline discipline for anomalies. Status classification and
    /// z-scores are recomputed here; the collaborator's judgment stays,
    /// its arithmetic does not. Gate caveats are folded into the
    /// result's quality notes.
    fn vet_channel_result(
        &self,
        task: &ChannelTask,
        mut result: ChannelResult,
    ) -> Result<ChannelResult, String> {
        if result.channel != task.channel {
            return Err(format!(
                "result names channel '{}' but task was for '{}'",
                result.channel, task.channel
            ));
        }

        for entry in &mut result.summary {
            let (Some(prior), Some(reported)) = (entry.prior, entry.delta_pct) else {
                continue;
            };
            let expected = kernel::delta_pct(entry.current, prior);
            match expected {
                Some(expected) if (expected - reported).abs() <= DELTA_CROSS_CHECK_PP => {
                    entry.status = kernel::status(
                        expected,
                        kernel::direction_of(&entry.metric),
                        self.analysis.status_tolerance_pct,
                    );
                }
                _ => {
                    return Err(format!(
                        "delta_pct for '{}' reported as {reported:.2} but computes to {:?}",
                        entry.metric, expected
                    ));
                }
            }
        }

        // Anomalies require an established baseline; the retained ones
        // carry the kernel's z-score, not the reported one.
        let mut kept = Vec::new();
        for mut anomaly in std::mem::take(&mut result.anomalies) {
            match task.baselines.get(&anomaly.metric) {
                Some(baseline) if baseline.is_established() => {
                    match kernel::zscore(anomaly.value, baseline) {
                        Some(z) => {
                            anomaly.z_score = z;
                            kept.push(anomaly);
                        }
                        None => result.data_quality_notes.push(format!(
                            "anomaly on '{}' suppressed: baseline has zero variance",
                            anomaly.metric
                        )),
                    }
                }
                _ => {
                    let err = PipelineError::InsufficientBaseline {
                        channel: task.channel.clone(),
                        metric: anomaly.metric.clone(),
                    };
                    result
                        .data_quality_notes
                        .push(format!("anomaly suppressed: {err}"));
                }
            }
        }
        result.anomalies = kept;

        for caveat in &task.caveats {
            if !result.data_quality_notes.contains(caveat) {
                result.data_quality_notes.push(caveat.clone());
            }
        }

        Ok(result)
    }

    /// GROUP_SYNTHESIZE stage: one concurrent task per group that has
    /// at least two analyzed channels.
    async fn synthesize_groups(
        &self,
        working_set: &WorkingSet,
        results: &[ChannelResult],
    ) -> (
        Vec<crate::models::GroupSynthesis>,
        Vec<PipelineError>,
        Vec<String>,
    ) {
        let mut tasks = Vec::new();
        let mut skips = Vec::new();
        for group in working_set.distinct_groups() {
            let channel_results: Vec<ChannelResult> = results
                .iter()
                .filter(|r| working_set.group_of(&r.channel) == Some(group.as_str()))
                .cloned()
                .collect();
            if channel_results.len() < 2 {
                skips.push(format!(
                    "group '{group}' has {} analyzed channel(s), needs 2",
                    channel_results.len()
                ));
                continue;
            }
            tasks.push(GroupTask {
                group,
                channel_results,
            });
        }

        let task_timeout = Duration::from_secs(self.analysis.task_timeout_seconds);
        let calls = tasks.iter().map(|task| {
            let task = task.clone();
            async move { timeout(task_timeout, self.collaborator.synthesize_group(task)).await }
        });
        let replies = join_all(calls).await;

        let mut syntheses = Vec::new();
        let mut failures = Vec::new();
        for (task, reply) in tasks.into_iter().zip(replies) {
            match reply {
                Ok(Ok(mut synthesis)) => {
                    crate::models::rank_actions(&mut synthesis.actions);
                    kernel::cap_list(&mut synthesis.actions, GROUP_ACTION_CAP, |a: &Action| {
                        a.confidence
                    });
                    refine_channel_mix(&mut synthesis, &task.channel_results);
                    syntheses.push(synthesis);
                }
                Ok(Err(e)) => failures.push(PipelineError::GroupTaskFailure {
                    group: task.group,
                    reason: e.to_string(),
                }),
                Err(_) => failures.push(PipelineError::GroupTaskFailure {
                    group: task.group,
                    reason: format!("timed out after {}s", self.analysis.task_timeout_seconds),
                }),
            }
        }
        (syntheses, failures, skips)
    }

    /// Attribution coverage over the requested working set.
    fn coverage(&self, working_set: &WorkingSet, dispatch: &DispatchOutcome) -> AttributionCoverage {
        let requested = working_set.channels.len();
        let analyzed = dispatch.results.len();
        let attributed_pct = if requested == 0 {
            0.0
        } else {
            analyzed as f64 / requested as f64 * 100.0
        };
        AttributionCoverage {
            attributed_pct,
            unattributed_channels: dispatch
                .unanalyzed
                .iter()
                .map(|(channel, _)| channel.clone())
                .collect(),
        }
    }

    /// MEMORY_UPDATE stage: append this run's aggregates to the rolling
    /// baselines and log accepted actions as open decisions.
    fn update_memory(
        &mut self,
        run_id: &str,
        working_set: &WorkingSet,
        records: &RunRecords,
    ) -> Result<()> {
        let week_start = working_set
            .date_range
            .map(|r| r.start)
            .unwrap_or_else(current_week_start);

        for result in &records.channels {
            for entry in &result.summary {
                self.store
                    .append_week(&result.channel, &entry.metric, week_start, entry.current);
            }
        }

        let today = chrono::Utc::now().date_naive();
        let actions: Vec<&Action> = match &records.portfolio {
            Some(portfolio) => portfolio.actions.iter().collect(),
            None => records.groups.iter().flat_map(|g| &g.actions).collect(),
        };
        for action in actions {
            self.store
                .append_decision(today, run_id, &action.action, &action.expected_outcome);
        }

        self.store.save()
    }
}

struct DispatchOutcome {
    results: Vec<ChannelResult>,
    /// Requested channels without a result: skipped or failed, with reason.
    unanalyzed: Vec<(String, String)>,
}

/// Recompute channel-mix shares and efficiency from the group's own
/// records. Shares and ratios are kernel arithmetic; null stays null
/// when a denominator is zero or a revenue figure is absent.
fn refine_channel_mix(synthesis: &mut crate::models::GroupSynthesis, results: &[ChannelResult]) {
    use crate::models::ChannelMix;

    let total_spend: f64 = synthesis
        .channel_mix
        .iter()
        .filter_map(|m| match m {
            ChannelMix::SpendBased { spend, .. } => Some(*spend),
            ChannelMix::VolumeBased { .. } => None,
        })
        .sum();
    let mut volume_totals: std::collections::BTreeMap<String, f64> = Default::default();
    for entry in &synthesis.channel_mix {
        if let ChannelMix::VolumeBased {
            volume_metric,
            volume,
            ..
        } = entry
        {
            *volume_totals.entry(volume_metric.clone()).or_default() += volume;
        }
    }
    let total_revenue = synthesis.group_summary.total_revenue;

    for entry in &mut synthesis.channel_mix {
        match entry {
            ChannelMix::SpendBased {
                channel,
                spend,
                spend_share,
                efficiency,
                ..
            } => {
                *spend_share = kernel::ratio(*spend, total_spend);
                let revenue_share = channel_revenue(results, channel)
                    .and_then(|revenue| kernel::ratio(revenue, total_revenue));
                *efficiency = kernel::efficiency(revenue_share, *spend_share);
            }
            ChannelMix::VolumeBased {
                volume_metric,
                volume,
                volume_share,
                ..
            } => {
                let total = volume_totals.get(volume_metric).copied().unwrap_or(0.0);
                *volume_share = kernel::ratio(*volume, total);
            }
        }
    }
}

fn channel_revenue(results: &[ChannelResult], channel: &str) -> Option<f64> {
    results
        .iter()
        .find(|r| r.channel == channel)?
        .summary
        .iter()
        .find(|m| m.metric == "revenue")
        .map(|m| m.current)
}

/// Monday of the current week.
fn current_week_start() -> chrono::NaiveDate {
    use chrono::Datelike;
    let today = chrono::Utc::now().date_naive();
    today - chrono::Duration::days(today.weekday().num_days_from_monday() as i64)
}
