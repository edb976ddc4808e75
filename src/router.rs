//! Request routing and classification.
//!
//! An ordered keyword rule table maps a query to a channel working set;
//! the first matching rule wins. Queries no rule matches become a
//! tagged `PendingExternal` value and are resolved by the external
//! classification collaborator. Group membership always comes from the
//! static channel-to-group table, never from the query.

use crate::error::PipelineError;
use crate::models::{
    ChannelResult, ComparisonType, DateRange, Geo, MatchKind, Template, WorkingSet,
};
use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::str::FromStr;
use tracing::debug;

/// One routing rule: if any keyword appears in the query, the rule's
/// channels become the working set.
struct RouteRule {
    keywords: &'static [&'static str],
    channels: &'static [&'static str],
}

/// Ordered routing table; evaluation is first-match-wins, so the
/// all-channel rule sits below the single-channel rules.
const ROUTING_TABLE: &[RouteRule] = &[
    RouteRule {
        keywords: &[
            "sem",
            "google ads",
            "paid search",
            "cpc",
            "roas",
            "search ads",
            "adwords",
        ],
        channels: &["sem"],
    },
    RouteRule {
        keywords: &[
            "display",
            "programmatic",
            "dv360",
            "cpm",
            "banner",
            "viewability",
        ],
        channels: &["display"],
    },
    RouteRule {
        keywords: &["affiliate", "publisher", "commission", "epc", "partner"],
        channels: &["affiliate"],
    },
    RouteRule {
        keywords: &[
            "seo",
            "organic",
            "rankings",
            "search console",
            "crawl",
            "indexing",
            "core web vitals",
        ],
        channels: &["seo"],
    },
    RouteRule {
        keywords: &[
            "overall",
            "all channels",
            "mix",
            "compare channels",
            "blended",
            "paid media",
            "portfolio",
        ],
        channels: &["sem", "display", "affiliate", "seo"],
    },
    RouteRule {
        keywords: &["budget", "pacing", "spend"],
        channels: &["sem", "display", "affiliate"],
    },
];

/// Fixed, version-controlled channel-to-group membership table.
const CHANNEL_GROUPS: &[(&str, &str)] = &[
    ("sem", "paid"),
    ("display", "paid"),
    ("affiliate", "paid"),
    ("seo", "organic"),
];

/// Group for a channel, from the static membership table.
pub fn group_of(channel: &str) -> Option<&'static str> {
    CHANNEL_GROUPS
        .iter()
        .find(|(c, _)| *c == channel)
        .map(|(_, g)| *g)
}

/// All channels the routing layer knows about.
pub fn known_channels() -> Vec<&'static str> {
    CHANNEL_GROUPS.iter().map(|(c, _)| *c).collect()
}

/// Classification outcome: either a resolved working set, or a tagged
/// pending state awaiting the external classifier.
#[derive(Debug, Clone)]
pub enum Classification {
    Resolved(WorkingSet),
    /// No rule matched; the core performs no reasoning itself and waits
    /// for the collaborator to name a channel set.
    PendingExternal {
        query: String,
        parsed: ParsedQuery,
    },
}

/// Deterministic parse results extracted from the query regardless of
/// whether routing resolved.
#[derive(Debug, Clone)]
pub struct ParsedQuery {
    pub date_range: Option<DateRange>,
    pub comparison_type: ComparisonType,
    pub geo: Geo,
    pub template: Template,
}

/// Classify a request into a working set.
///
/// `explicit_channels` (from the command line) bypasses keyword routing
/// but still resolves groups through the static table.
pub fn classify(
    query: &str,
    explicit_channels: Option<&[String]>,
    explicit_period: Option<DateRange>,
) -> Result<Classification, PipelineError> {
    let query_lower = query.to_lowercase();
    let mut parsed = parse_query(&query_lower)?;
    if explicit_period.is_some() {
        parsed.date_range = explicit_period;
    }

    if let Some(channels) = explicit_channels {
        let ws = build_working_set(channels, &parsed, MatchKind::Explicit)?;
        return Ok(Classification::Resolved(ws));
    }

    for rule in ROUTING_TABLE {
        if rule.keywords.iter().any(|kw| query_lower.contains(kw)) {
            debug!("routing rule matched: channels {:?}", rule.channels);
            let channels: Vec<String> = rule.channels.iter().map(|c| c.to_string()).collect();
            let ws = build_working_set(&channels, &parsed, MatchKind::Keyword)?;
            return Ok(Classification::Resolved(ws));
        }
    }

    debug!("no routing rule matched; deferring to external classifier");
    Ok(Classification::PendingExternal {
        query: query.to_string(),
        parsed,
    })
}

/// Resolve a pending classification with the channel set named by the
/// external collaborator. Groups still come from the static table;
/// channels the table does not know are rejected.
pub fn resolve_external(
    channels: &[String],
    parsed: &ParsedQuery,
) -> Result<WorkingSet, PipelineError> {
    build_working_set(channels, parsed, MatchKind::External)
}

fn build_working_set(
    channels: &[String],
    parsed: &ParsedQuery,
    match_kind: MatchKind,
) -> Result<WorkingSet, PipelineError> {
    let mut groups = BTreeMap::new();
    let mut resolved = Vec::new();
    for channel in channels {
        let group = group_of(channel)
            .ok_or_else(|| PipelineError::UnrecognizedSource(channel.clone()))?;
        groups.insert(channel.clone(), group.to_string());
        resolved.push(channel.clone());
    }
    Ok(WorkingSet {
        channels: resolved,
        groups,
        date_range: parsed.date_range,
        comparison_type: parsed.comparison_type,
        geo: parsed.geo,
        template: parsed.template,
        match_kind,
    })
}

/// Parse comparison basis, geo filter, date range, and template from the
/// lowercased query text.
fn parse_query(query_lower: &str) -> Result<ParsedQuery, PipelineError> {
    Ok(ParsedQuery {
        date_range: parse_date_range(query_lower)?,
        comparison_type: parse_comparison_type(query_lower),
        geo: parse_geo(query_lower),
        template: select_template(query_lower),
    })
}

fn parse_comparison_type(query: &str) -> ComparisonType {
    if ["yoy", "year over year", "year-over-year", "vs last year"]
        .iter()
        .any(|kw| query.contains(kw))
    {
        ComparisonType::Yoy
    } else if ["mom", "month over month", "month-over-month", "vs last month"]
        .iter()
        .any(|kw| query.contains(kw))
    {
        ComparisonType::Mom
    } else {
        ComparisonType::Wow
    }
}

fn parse_geo(query: &str) -> Geo {
    if ["intl", "international", "non-us", "global"]
        .iter()
        .any(|kw| query.contains(kw))
    {
        return Geo::Intl;
    }
    let standalone_na = query
        .split(|c: char| !c.is_ascii_alphanumeric())
        .any(|word| word == "na");
    if standalone_na
        || ["north america", "us only", "domestic"]
            .iter()
            .any(|kw| query.contains(kw))
    {
        return Geo::Na;
    }
    Geo::All
}

/// Extract an explicit ISO date range from the query, e.g.
/// `2026-02-10 to 2026-02-16` or `2026-02-10/2026-02-16`. Exactly zero
/// or two date tokens are acceptable; anything else is ambiguous.
fn parse_date_range(query: &str) -> Result<Option<DateRange>, PipelineError> {
    let dates: Vec<NaiveDate> = query
        .split(|c: char| !(c.is_ascii_digit() || c == '-'))
        .filter(|tok| tok.len() == 10)
        .filter_map(|tok| NaiveDate::from_str(tok).ok())
        .collect();

    match dates.len() {
        0 => Ok(None),
        2 => {
            if dates[1] < dates[0] {
                return Err(PipelineError::AmbiguousInput(format!(
                    "date range ends ({}) before it starts ({})",
                    dates[1], dates[0]
                )));
            }
            Ok(Some(DateRange {
                start: dates[0],
                end: dates[1],
            }))
        }
        n => Err(PipelineError::AmbiguousInput(format!(
            "expected 0 or 2 date tokens in query, found {n}"
        ))),
    }
}

/// Keyword-based template selection; checked before analysis runs.
pub fn select_template(query_lower: &str) -> Template {
    // "anomal" covers anomaly/anomalies/anomalous; "compar" covers
    // compare/comparison/comparing.
    if ["anomal", "alert", "flag", "unusual"]
        .iter()
        .any(|kw| query_lower.contains(kw))
    {
        Template::AnomalyAlert
    } else if ["compar", "versus", " vs "]
        .iter()
        .any(|kw| query_lower.contains(kw))
    {
        Template::PeriodComparison
    } else {
        Template::WeeklyReport
    }
}

/// Refine the template once channel results exist: any anomaly with
/// |z| > `zscore_threshold` upgrades a default template to the alert.
pub fn upgrade_template(
    template: Template,
    results: &[ChannelResult],
    zscore_threshold: f64,
) -> Template {
    if template != Template::WeeklyReport {
        return template;
    }
    let spike = results
        .iter()
        .flat_map(|r| &r.anomalies)
        .any(|a| a.z_score.abs() > zscore_threshold);
    if spike {
        Template::AnomalyAlert
    } else {
        template
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Anomaly;

    fn resolved(query: &str) -> WorkingSet {
        match classify(query, None, None).unwrap() {
            Classification::Resolved(ws) => ws,
            Classification::PendingExternal { .. } => panic!("expected resolution: {query}"),
        }
    }

    #[test]
    fn test_single_channel_routing() {
        let ws = resolved("How did SEM perform last week?");
        assert_eq!(ws.channels, vec!["sem"]);
        assert_eq!(ws.group_of("sem"), Some("paid"));
        assert_eq!(ws.match_kind, MatchKind::Keyword);
    }

    #[test]
    fn test_first_match_wins() {
        // "cpc" (sem rule) appears before "viewability" (display rule)
        // in the table, so the sem rule takes the query.
        let ws = resolved("cpc and viewability review");
        assert_eq!(ws.channels, vec!["sem"]);
    }

    #[test]
    fn test_all_channel_routing() {
        let ws = resolved("Compare all channels this period");
        assert_eq!(ws.channels.len(), 4);
        assert_eq!(ws.distinct_groups(), vec!["organic", "paid"]);
        assert_eq!(ws.template, Template::PeriodComparison);
    }

    #[test]
    fn test_unmatched_query_is_pending_external() {
        let classification = classify("what happened yesterday", None, None).unwrap();
        assert!(matches!(
            classification,
            Classification::PendingExternal { .. }
        ));
    }

    #[test]
    fn test_explicit_channels_bypass_keywords() {
        let channels = vec!["sem".to_string(), "display".to_string()];
        let classification = classify("weekly numbers", Some(&channels), None).unwrap();
        let Classification::Resolved(ws) = classification else {
            panic!("expected resolution");
        };
        assert_eq!(ws.channels, vec!["sem", "display"]);
        assert_eq!(ws.match_kind, MatchKind::Explicit);
        assert_eq!(ws.distinct_groups(), vec!["paid"]);
    }

    #[test]
    fn test_unknown_channel_rejected() {
        let channels = vec!["podcast".to_string()];
        let err = classify("weekly", Some(&channels), None).unwrap_err();
        assert!(matches!(err, PipelineError::UnrecognizedSource(_)));
    }

    #[test]
    fn test_external_resolution_uses_static_groups() {
        let parsed = ParsedQuery {
            date_range: None,
            comparison_type: ComparisonType::Wow,
            geo: Geo::All,
            template: Template::WeeklyReport,
        };
        let ws = resolve_external(&["seo".to_string()], &parsed).unwrap();
        assert_eq!(ws.match_kind, MatchKind::External);
        assert_eq!(ws.group_of("seo"), Some("organic"));
    }

    #[test]
    fn test_comparison_and_geo_parsing() {
        let ws = resolved("sem yoy for international");
        assert_eq!(ws.comparison_type, ComparisonType::Yoy);
        assert_eq!(ws.geo, Geo::Intl);

        let ws = resolved("sem performance in NA");
        assert_eq!(ws.geo, Geo::Na);
        // "na" inside a longer word must not trigger the geo filter.
        let ws = resolved("sem dynamics review");
        assert_eq!(ws.geo, Geo::All);
    }

    #[test]
    fn test_date_range_parsing() {
        let ws = resolved("sem from 2026-02-10 to 2026-02-16");
        assert_eq!(
            ws.date_range.unwrap().to_string(),
            "2026-02-10/2026-02-16"
        );

        let err = classify("sem on 2026-02-10", None, None).unwrap_err();
        assert!(matches!(err, PipelineError::AmbiguousInput(_)));

        let err = classify("sem 2026-02-16 to 2026-02-10", None, None).unwrap_err();
        assert!(matches!(err, PipelineError::AmbiguousInput(_)));
    }

    #[test]
    fn test_template_selection() {
        assert_eq!(select_template("any anomalies?"), Template::AnomalyAlert);
        assert_eq!(
            select_template("sem versus display"),
            Template::PeriodComparison
        );
        assert_eq!(select_template("weekly recap"), Template::WeeklyReport);
    }

    #[test]
    fn test_template_upgrade_on_large_zscore() {
        let mut result = sample_channel_result();
        result.anomalies.push(Anomaly {
            metric: "clicks".to_string(),
            segment: None,
            z_score: -2.4,
            direction: "down".to_string(),
            value: 900.0,
            baseline_mean: 1400.0,
        });
        assert_eq!(
            upgrade_template(Template::WeeklyReport, &[result.clone()], 2.0),
            Template::AnomalyAlert
        );
        // Explicit template choices are never overridden.
        assert_eq!(
            upgrade_template(Template::PeriodComparison, &[result], 2.0),
            Template::PeriodComparison
        );
    }

    fn sample_channel_result() -> ChannelResult {
        ChannelResult {
            channel: "sem".to_string(),
            channel_group: "paid".to_string(),
            geo: Geo::Na,
            period: "2026-02-10/2026-02-16".parse().unwrap(),
            comparison_type: ComparisonType::Wow,
            summary: vec![],
            top_movers: vec![],
            anomalies: vec![],
            budget_pacing: None,
            data_quality_notes: vec![],
            extended_metrics: Default::default(),
        }
    }
}
