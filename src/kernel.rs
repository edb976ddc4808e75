//! Numeric analytics kernel.
//!
//! Pure, total functions shared by every pipeline stage: null-safe ratios,
//! baseline z-scores, threshold status classification, ICE scoring, and
//! list capping. This module depends on nothing else in the crate; every
//! other component depends on it.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Minimum aggregated weeks before a baseline supports anomaly detection.
pub const MIN_BASELINE_WEEKS: usize = 4;

/// Rolling baseline window: strictly the trailing eight weeks.
pub const BASELINE_WINDOW_WEEKS: usize = 8;

/// Plan-status classification for a metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MetricStatus {
    Green,
    Yellow,
    Red,
}

impl fmt::Display for MetricStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricStatus::Green => write!(f, "GREEN"),
            MetricStatus::Yellow => write!(f, "YELLOW"),
            MetricStatus::Red => write!(f, "RED"),
        }
    }
}

/// Whether a metric improves when it rises or when it falls.
///
/// Bounce rate and CPC are `LowerIsBetter`; revenue, CTR, and ROAS are
/// `HigherIsBetter`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    HigherIsBetter,
    LowerIsBetter,
}

/// One aggregated week of a channel metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeekAggregate {
    /// Monday of the aggregated week, canonical calendar form.
    pub week_start: chrono::NaiveDate,
    /// Aggregated metric value for that week.
    pub value: f64,
}

/// Rolling per-channel-metric baseline state.
///
/// Weeks are kept in ascending order; the store evicts the oldest entry
/// once the window exceeds [`BASELINE_WINDOW_WEEKS`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Baseline {
    pub weeks: Vec<WeekAggregate>,
}

impl Baseline {
    /// A baseline is established once it holds enough aggregated weeks
    /// to make a z-score meaningful.
    pub fn is_established(&self) -> bool {
        self.weeks.len() >= MIN_BASELINE_WEEKS
    }

    /// Mean of the retained week values.
    pub fn mean(&self) -> Option<f64> {
        if self.weeks.is_empty() {
            return None;
        }
        let sum: f64 = self.weeks.iter().map(|w| w.value).sum();
        Some(sum / self.weeks.len() as f64)
    }

    /// Population standard deviation of the retained week values.
    ///
    /// Population (divide by n), not sample: the window is the entire
    /// retained history, not a sample of a longer series.
    pub fn stddev(&self) -> Option<f64> {
        let mean = self.mean()?;
        let n = self.weeks.len() as f64;
        let var: f64 = self
            .weeks
            .iter()
            .map(|w| (w.value - mean).powi(2))
            .sum::<f64>()
            / n;
        Some(var.sqrt())
    }
}

/// Null-safe division. Returns `None` when the denominator is exactly
/// zero or either operand is non-finite; never returns NaN or Infinity.
pub fn ratio(numerator: f64, denominator: f64) -> Option<f64> {
    if denominator == 0.0 || !numerator.is_finite() || !denominator.is_finite() {
        return None;
    }
    let r = numerator / denominator;
    r.is_finite().then_some(r)
}

/// Percentage change from `prior` to `current`. `None` when prior is zero.
pub fn delta_pct(current: f64, prior: f64) -> Option<f64> {
    ratio(current - prior, prior.abs()).map(|r| r * 100.0)
}

/// Z-score of `value` against a rolling baseline.
///
/// Returns `None` when the baseline is not established (fewer than
/// [`MIN_BASELINE_WEEKS`] aggregated weeks) or has zero variance; callers
/// surface the former as a "baseline not established" note rather than
/// computing on insufficient history.
pub fn zscore(value: f64, baseline: &Baseline) -> Option<f64> {
    if !baseline.is_established() {
        return None;
    }
    let mean = baseline.mean()?;
    let sd = baseline.stddev()?;
    ratio(value - mean, sd)
}

/// Classify a metric's delta against plan.
///
/// GREEN on/above plan, YELLOW within `tolerance_pct` below plan, RED
/// beyond it. Direction-aware: for `LowerIsBetter` metrics a positive
/// delta is the shortfall.
pub fn status(delta_pct: f64, direction: Direction, tolerance_pct: f64) -> MetricStatus {
    let shortfall = match direction {
        Direction::HigherIsBetter => -delta_pct,
        Direction::LowerIsBetter => delta_pct,
    };
    if shortfall <= 0.0 {
        MetricStatus::Green
    } else if shortfall <= tolerance_pct {
        MetricStatus::Yellow
    } else {
        MetricStatus::Red
    }
}

/// Output share over input share (e.g. revenue share / spend share).
///
/// `None` when the input share is zero or either share is absent, as for
/// non-spend or non-volume channels. Never substitutes zero for null.
pub fn efficiency(output_share: Option<f64>, input_share: Option<f64>) -> Option<f64> {
    ratio(output_share?, input_share?)
}

/// Direction convention for the standard metric names. Cost-per-X and
/// bounce metrics improve downward; everything else improves upward.
pub fn direction_of(metric: &str) -> Direction {
    match metric {
        "cpc" | "cpm" | "cpa" | "acos" | "bounce_rate" | "cost_per_conversion" => {
            Direction::LowerIsBetter
        }
        _ => Direction::HigherIsBetter,
    }
}

/// ICE score: Impact x Confidence x Ease, each clamped to 1..=5.
pub fn ice(impact: u8, confidence: u8, ease: u8) -> u32 {
    let c = |v: u8| u32::from(v.clamp(1, 5));
    c(impact) * c(confidence) * c(ease)
}

/// Cap a list in place, evicting lowest-confidence items first and,
/// among equals, the oldest, until the limit holds.
///
/// `confidence_rank` maps an item to its confidence (higher survives
/// longer). Used for action lists (limits 3/5) and hypothesis lists (15).
pub fn cap_list<T>(list: &mut Vec<T>, limit: usize, confidence_rank: impl Fn(&T) -> u8) {
    while list.len() > limit {
        let evict = list
            .iter()
            .enumerate()
            .min_by_key(|(idx, item)| (confidence_rank(item), *idx))
            .map(|(idx, _)| idx);
        match evict {
            Some(idx) => {
                list.remove(idx);
            }
            None => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn baseline(values: &[f64]) -> Baseline {
        let start = NaiveDate::from_ymd_opt(2026, 1, 5).unwrap();
        Baseline {
            weeks: values
                .iter()
                .enumerate()
                .map(|(i, v)| WeekAggregate {
                    week_start: start + chrono::Duration::weeks(i as i64),
                    value: *v,
                })
                .collect(),
        }
    }

    #[test]
    fn test_ratio_zero_denominator_is_null() {
        assert_eq!(ratio(500.0, 0.0), None);
        assert_eq!(ratio(0.0, 0.0), None);
        assert_eq!(ratio(-3.0, 0.0), None);
    }

    #[test]
    fn test_ratio_never_nan_or_infinite() {
        assert_eq!(ratio(f64::NAN, 2.0), None);
        assert_eq!(ratio(1.0, f64::INFINITY), None);
        assert_eq!(ratio(f64::MAX, f64::MIN_POSITIVE), None); // overflows to inf
        assert_eq!(ratio(10.0, 4.0), Some(2.5));
    }

    #[test]
    fn test_delta_pct() {
        assert_eq!(delta_pct(110.0, 100.0), Some(10.0));
        assert_eq!(delta_pct(90.0, 100.0), Some(-10.0));
        assert_eq!(delta_pct(50.0, 0.0), None);
    }

    #[test]
    fn test_zscore_requires_four_weeks() {
        let short = baseline(&[10.0, 12.0, 11.0]);
        assert!(!short.is_established());
        assert_eq!(zscore(100.0, &short), None);

        let ok = baseline(&[10.0, 12.0, 11.0, 13.0]);
        assert!(ok.is_established());
        assert!(zscore(14.0, &ok).is_some());
    }

    #[test]
    fn test_zscore_zero_variance_is_null() {
        let flat = baseline(&[5.0, 5.0, 5.0, 5.0]);
        assert_eq!(zscore(9.0, &flat), None);
    }

    #[test]
    fn test_zscore_population_stddev() {
        // Values 2,4,4,4,5,5,7,9: mean 5, population stddev exactly 2.
        let b = baseline(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        assert_eq!(b.mean(), Some(5.0));
        assert_eq!(b.stddev(), Some(2.0));
        assert_eq!(zscore(9.0, &b), Some(2.0));
    }

    #[test]
    fn test_status_direction_aware() {
        assert_eq!(
            status(2.0, Direction::HigherIsBetter, 5.0),
            MetricStatus::Green
        );
        assert_eq!(
            status(-3.0, Direction::HigherIsBetter, 5.0),
            MetricStatus::Yellow
        );
        assert_eq!(
            status(-8.0, Direction::HigherIsBetter, 5.0),
            MetricStatus::Red
        );
        // Bounce rate falling is good.
        assert_eq!(
            status(-8.0, Direction::LowerIsBetter, 5.0),
            MetricStatus::Green
        );
        assert_eq!(
            status(4.0, Direction::LowerIsBetter, 5.0),
            MetricStatus::Yellow
        );
        assert_eq!(
            status(6.0, Direction::LowerIsBetter, 5.0),
            MetricStatus::Red
        );
    }

    #[test]
    fn test_direction_conventions() {
        assert_eq!(direction_of("cpc"), Direction::LowerIsBetter);
        assert_eq!(direction_of("bounce_rate"), Direction::LowerIsBetter);
        assert_eq!(direction_of("revenue"), Direction::HigherIsBetter);
        assert_eq!(direction_of("roas"), Direction::HigherIsBetter);
    }

    #[test]
    fn test_efficiency_null_rules() {
        assert_eq!(efficiency(Some(0.4), Some(0.2)), Some(2.0));
        assert_eq!(efficiency(Some(0.4), Some(0.0)), None);
        assert_eq!(efficiency(None, Some(0.2)), None);
        assert_eq!(efficiency(Some(0.4), None), None);
    }

    #[test]
    fn test_ice_score_and_clamp() {
        assert_eq!(ice(4, 3, 5), 60);
        assert_eq!(ice(0, 3, 9), 15); // clamped to 1 and 5
        assert_eq!(ice(5, 5, 5), 125);
    }

    #[test]
    fn test_cap_list_evicts_lowest_confidence_then_oldest() {
        let mut items = vec![("a", 3u8), ("b", 1), ("c", 2), ("d", 1), ("e", 3)];
        cap_list(&mut items, 3, |(_, conf)| *conf);
        // Both confidence-1 items go, oldest first.
        assert_eq!(
            items.iter().map(|(n, _)| *n).collect::<Vec<_>>(),
            vec!["a", "c", "e"]
        );

        let mut ties = vec![("x", 2u8), ("y", 2), ("z", 2)];
        cap_list(&mut ties, 2, |(_, conf)| *conf);
        assert_eq!(ties.iter().map(|(n, _)| *n).collect::<Vec<_>>(), vec!["y", "z"]);
    }

    #[test]
    fn test_cap_list_noop_under_limit() {
        let mut items = vec![1, 2];
        cap_list(&mut items, 15, |_| 1);
        assert_eq!(items, vec![1, 2]);
    }
}
