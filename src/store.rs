//! Baseline and decision memory store.
//!
//! Persists rolling per-channel-metric baselines and the append-only
//! decision ledger under the memory directory. The scheduler owns the
//! store: reads are taken as snapshots before fan-out and all writes
//! happen in the final pipeline stage, so concurrent tasks never touch
//! it.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::StoreError;
use crate::kernel::{Baseline, WeekAggregate, BASELINE_WINDOW_WEEKS};
use crate::models::{DecisionLogEntry, DecisionStatus};
use chrono::NaiveDate;

const BASELINES_FILE: &str = "baselines.json";
const DECISIONS_FILE: &str = "decisions.json";

/// On-disk shape of the decision ledger.
#[derive(Debug, Default, Serialize, Deserialize)]
struct DecisionLedger {
    next_id: u64,
    entries: Vec<DecisionLogEntry>,
}

/// Persistent memory for baselines and decisions.
pub struct MemoryStore {
    dir: PathBuf,
    /// Keyed by `channel::metric`.
    baselines: BTreeMap<String, Baseline>,
    ledger: DecisionLedger,
}

fn baseline_key(channel: &str, metric: &str) -> String {
    format!("{channel}::{metric}")
}

impl MemoryStore {
    /// Load the store from the memory directory. Missing files mean an
    /// empty store, not an error; a first run has no memory yet.
    pub fn load(dir: &Path) -> Result<Self> {
        let baselines = match fs::read_to_string(dir.join(BASELINES_FILE)) {
            Ok(content) => serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse {BASELINES_FILE}"))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {BASELINES_FILE}"));
            }
        };

        let ledger = match fs::read_to_string(dir.join(DECISIONS_FILE)) {
            Ok(content) => serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse {DECISIONS_FILE}"))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => DecisionLedger::default(),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {DECISIONS_FILE}"));
            }
        };

        debug!(
            "loaded memory: {} baselines, {} decisions",
            baselines.len(),
            ledger.entries.len()
        );
        Ok(Self {
            dir: dir.to_path_buf(),
            baselines,
            ledger,
        })
    }

    /// Persist both files. Runs once, at the end of the pipeline.
    pub fn save(&self) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create {}", self.dir.display()))?;

        let baselines = serde_json::to_string_pretty(&self.baselines)?;
        fs::write(self.dir.join(BASELINES_FILE), baselines)
            .with_context(|| format!("Failed to write {BASELINES_FILE}"))?;

        let decisions = serde_json::to_string_pretty(&self.ledger)?;
        fs::write(self.dir.join(DECISIONS_FILE), decisions)
            .with_context(|| format!("Failed to write {DECISIONS_FILE}"))?;

        info!(
            "saved memory: {} baselines, {} decisions",
            self.baselines.len(),
            self.ledger.entries.len()
        );
        Ok(())
    }

    /// Baseline snapshot for one channel metric; empty when none exists.
    pub fn baseline(&self, channel: &str, metric: &str) -> Baseline {
        self.baselines
            .get(&baseline_key(channel, metric))
            .cloned()
            .unwrap_or_default()
    }

    /// All baseline snapshots for one channel, keyed by metric.
    pub fn channel_baselines(&self, channel: &str) -> BTreeMap<String, Baseline> {
        let prefix = format!("{channel}::");
        self.baselines
            .iter()
            .filter_map(|(key, baseline)| {
                key.strip_prefix(&prefix)
                    .map(|metric| (metric.to_string(), baseline.clone()))
            })
            .collect()
    }

    /// Append one aggregated week to a channel metric's baseline.
    ///
    /// Re-running the same week replaces its value instead of appending
    /// a duplicate, and the window is evicted down to the trailing
    /// [`BASELINE_WINDOW_WEEKS`] weeks.
    pub fn append_week(&mut self, channel: &str, metric: &str, week_start: NaiveDate, value: f64) {
        let baseline = self
            .baselines
            .entry(baseline_key(channel, metric))
            .or_default();

        match baseline
            .weeks
            .iter_mut()
            .find(|w| w.week_start == week_start)
        {
            Some(existing) => existing.value = value,
            None => baseline.weeks.push(WeekAggregate { week_start, value }),
        }

        baseline.weeks.sort_by_key(|w| w.week_start);
        while baseline.weeks.len() > BASELINE_WINDOW_WEEKS {
            baseline.weeks.remove(0);
        }
    }

    /// Append a new decision entry, always in `Open` status. Returns
    /// the assigned id.
    pub fn append_decision(
        &mut self,
        date: NaiveDate,
        source_run: &str,
        action: &str,
        expected_outcome: &str,
    ) -> u64 {
        let id = self.ledger.next_id;
        self.ledger.next_id += 1;
        self.ledger.entries.push(DecisionLogEntry {
            id,
            date,
            source_run: source_run.to_string(),
            action: action.to_string(),
            expected_outcome: expected_outcome.to_string(),
            status: DecisionStatus::Open,
        });
        id
    }

    /// Move an open decision to an outcome status. Outcome statuses are
    /// terminal: entries never transition twice, and nothing is ever
    /// deleted from the ledger.
    pub fn update_decision_status(
        &mut self,
        id: u64,
        status: DecisionStatus,
    ) -> Result<(), StoreError> {
        let entry = self
            .ledger
            .entries
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or(StoreError::DecisionNotFound(id))?;

        if entry.status.is_terminal() {
            return Err(StoreError::TerminalTransition {
                id,
                status: format!("{:?}", entry.status),
            });
        }
        entry.status = status;
        Ok(())
    }

    /// Decision entries still awaiting an outcome.
    pub fn open_decisions(&self) -> Vec<&DecisionLogEntry> {
        self.ledger
            .entries
            .iter()
            .filter(|e| !e.status.is_terminal())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    #[test]
    fn test_load_missing_dir_is_empty() {
        let tmp = TempDir::new().unwrap();
        let store = MemoryStore::load(&tmp.path().join("never_written")).unwrap();
        assert!(!store.baseline("sem", "spend").is_established());
        assert!(store.open_decisions().is_empty());
    }

    #[test]
    fn test_append_week_and_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let mut store = MemoryStore::load(tmp.path()).unwrap();
        store.append_week("sem", "spend", date("2026-01-05"), 1000.0);
        store.append_week("sem", "spend", date("2026-01-12"), 1100.0);
        store.save().unwrap();

        let reloaded = MemoryStore::load(tmp.path()).unwrap();
        let baseline = reloaded.baseline("sem", "spend");
        assert_eq!(baseline.weeks.len(), 2);
        assert_eq!(baseline.weeks[1].value, 1100.0);
    }

    #[test]
    fn test_append_same_week_replaces() {
        let tmp = TempDir::new().unwrap();
        let mut store = MemoryStore::load(tmp.path()).unwrap();
        store.append_week("sem", "spend", date("2026-01-05"), 1000.0);
        store.append_week("sem", "spend", date("2026-01-05"), 1250.0);

        let baseline = store.baseline("sem", "spend");
        assert_eq!(baseline.weeks.len(), 1);
        assert_eq!(baseline.weeks[0].value, 1250.0);
    }

    #[test]
    fn test_window_evicts_oldest() {
        let tmp = TempDir::new().unwrap();
        let mut store = MemoryStore::load(tmp.path()).unwrap();
        let start = date("2026-01-05");
        for i in 0..10 {
            store.append_week(
                "sem",
                "clicks",
                start + chrono::Duration::weeks(i),
                100.0 + i as f64,
            );
        }

        let baseline = store.baseline("sem", "clicks");
        assert_eq!(baseline.weeks.len(), BASELINE_WINDOW_WEEKS);
        // The two oldest weeks are gone.
        assert_eq!(baseline.weeks[0].week_start, start + chrono::Duration::weeks(2));
        assert_eq!(baseline.weeks[0].value, 102.0);
    }

    #[test]
    fn test_channel_baselines_filters_by_channel() {
        let tmp = TempDir::new().unwrap();
        let mut store = MemoryStore::load(tmp.path()).unwrap();
        store.append_week("sem", "spend", date("2026-01-05"), 10.0);
        store.append_week("sem", "clicks", date("2026-01-05"), 20.0);
        store.append_week("seo", "clicks", date("2026-01-05"), 30.0);

        let sem = store.channel_baselines("sem");
        assert_eq!(sem.keys().collect::<Vec<_>>(), vec!["clicks", "spend"]);
    }

    #[test]
    fn test_decision_lifecycle() {
        let tmp = TempDir::new().unwrap();
        let mut store = MemoryStore::load(tmp.path()).unwrap();
        let id = store.append_decision(
            date("2026-02-16"),
            "run-2026-02-16",
            "Shift 10% display budget to sem brand campaigns",
            "ROAS +0.3 within two weeks",
        );
        assert_eq!(store.open_decisions().len(), 1);

        store
            .update_decision_status(id, DecisionStatus::Confirmed)
            .unwrap();
        assert!(store.open_decisions().is_empty());

        // Terminal entries never transition again.
        let err = store
            .update_decision_status(id, DecisionStatus::Reversed)
            .unwrap_err();
        assert!(matches!(err, StoreError::TerminalTransition { .. }));

        let err = store
            .update_decision_status(999, DecisionStatus::Confirmed)
            .unwrap_err();
        assert!(matches!(err, StoreError::DecisionNotFound(999)));
    }

    #[test]
    fn test_decision_ids_monotonic_across_reload() {
        let tmp = TempDir::new().unwrap();
        let mut store = MemoryStore::load(tmp.path()).unwrap();
        let first = store.append_decision(date("2026-02-16"), "run-a", "act", "out");
        store.save().unwrap();

        let mut reloaded = MemoryStore::load(tmp.path()).unwrap();
        let second = reloaded.append_decision(date("2026-02-23"), "run-b", "act", "out");
        assert!(second > first);
    }
}
