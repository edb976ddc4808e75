//! Pipeline stages and the run transcript.
//!
//! The stage sequence is fixed; a run visits every stage in order and
//! records one outcome per stage. Skips carry their reason so a
//! transcript reader can tell a conditional skip from a failure.

use serde::Serialize;
use std::fmt;

/// The fixed stage sequence of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    Classify,
    Preprocess,
    Validate,
    Dispatch,
    GroupSynthesize,
    Hypothesize,
    TopSynthesize,
    Format,
    MemoryUpdate,
}

impl Stage {
    /// All stages in execution order.
    pub const ALL: [Stage; 9] = [
        Stage::Classify,
        Stage::Preprocess,
        Stage::Validate,
        Stage::Dispatch,
        Stage::GroupSynthesize,
        Stage::Hypothesize,
        Stage::TopSynthesize,
        Stage::Format,
        Stage::MemoryUpdate,
    ];
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Classify => "CLASSIFY",
            Stage::Preprocess => "PREPROCESS",
            Stage::Validate => "VALIDATE",
            Stage::Dispatch => "DISPATCH",
            Stage::GroupSynthesize => "GROUP_SYNTHESIZE",
            Stage::Hypothesize => "HYPOTHESIZE",
            Stage::TopSynthesize => "TOP_SYNTHESIZE",
            Stage::Format => "FORMAT",
            Stage::MemoryUpdate => "MEMORY_UPDATE",
        };
        write!(f, "{name}")
    }
}

/// Outcome of one stage within a run.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StageOutcome {
    Completed,
    /// Conditional stage whose trigger did not hold, or a stage below a
    /// blocking gate decision.
    Skipped { reason: String },
    /// The stage ran and failed; whether the run continues depends on
    /// the stage.
    Failed { error: String },
}

/// Transcript of one pipeline run.
#[derive(Debug, Clone, Serialize)]
pub struct RunTranscript {
    pub run_id: String,
    pub started: chrono::DateTime<chrono::Utc>,
    pub stages: Vec<(Stage, StageOutcome)>,
}

impl RunTranscript {
    pub fn new(run_id: String) -> Self {
        Self {
            run_id,
            started: chrono::Utc::now(),
            stages: Vec::new(),
        }
    }

    pub fn record(&mut self, stage: Stage, outcome: StageOutcome) {
        self.stages.push((stage, outcome));
    }

    /// Mark every stage after the current position as skipped.
    pub fn skip_remaining(&mut self, reason: &str) {
        let visited = self.stages.len();
        for stage in Stage::ALL.iter().skip(visited) {
            self.stages.push((
                *stage,
                StageOutcome::Skipped {
                    reason: reason.to_string(),
                },
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_order_and_names() {
        assert_eq!(Stage::ALL.len(), 9);
        assert_eq!(Stage::ALL[0].to_string(), "CLASSIFY");
        assert_eq!(Stage::ALL[4].to_string(), "GROUP_SYNTHESIZE");
        assert_eq!(Stage::ALL[8].to_string(), "MEMORY_UPDATE");
    }

    #[test]
    fn test_skip_remaining_fills_transcript() {
        let mut transcript = RunTranscript::new("run-1".to_string());
        transcript.record(Stage::Classify, StageOutcome::Completed);
        transcript.record(Stage::Preprocess, StageOutcome::Completed);
        transcript.record(
            Stage::Validate,
            StageOutcome::Failed {
                error: "blocked".to_string(),
            },
        );
        transcript.skip_remaining("input data blocked");

        assert_eq!(transcript.stages.len(), 9);
        assert!(matches!(
            transcript.stages[3].1,
            StageOutcome::Skipped { .. }
        ));
        assert_eq!(transcript.stages[8].0, Stage::MemoryUpdate);
    }
}
