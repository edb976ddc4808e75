//! HTTP transport for the reasoning collaborator.
//!
//! Talks to an Ollama-compatible chat endpoint. Each pipeline task
//! becomes one chat call: a system prompt fixing the record contract,
//! a user prompt carrying the serialized task, and a strict parse of
//! the reply back into the typed record.

use super::{
    ChannelTask, ClassifiedIntent, Collaborator, FormatTask, GroupTask, HypothesisTask,
    PortfolioTask, Preprocessed,
};
use crate::error::CollabError;
use crate::models::{ChannelResult, GroupSynthesis, Hypothesis, PortfolioSynthesis};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Chat message for the collaborator API.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

/// Collaborator chat API request.
#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
    options: ChatOptions,
}

#[derive(Debug, Serialize)]
struct ChatOptions {
    temperature: f32,
}

/// Collaborator chat API response.
#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: String,
}

/// Reasoning collaborator over an Ollama-compatible HTTP API.
pub struct HttpCollaborator {
    client: reqwest::Client,
    url: String,
    model: String,
    temperature: f32,
    timeout_seconds: u64,
}

impl HttpCollaborator {
    pub fn new(url: String, model: String, temperature: f32, timeout_seconds: u64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .build()
            .unwrap_or_default();

        Self {
            client,
            url,
            model,
            temperature,
            timeout_seconds,
        }
    }

    /// Send one chat call and return the raw reply text.
    async fn chat(&self, system: &str, prompt: String) -> Result<String, CollabError> {
        let endpoint = format!("{}/api/chat", self.url);

        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: system.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: prompt,
                },
            ],
            stream: false,
            options: ChatOptions {
                temperature: self.temperature,
            },
        };

        let response = self
            .client
            .post(&endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    CollabError::Timeout(self.timeout_seconds)
                } else if e.is_connect() {
                    CollabError::Connect(self.url.clone())
                } else {
                    CollabError::InvalidReply(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(CollabError::Api { status, body });
        }

        let chat_response: ChatResponse = response
            .json()
            .await
            .map_err(|e| CollabError::InvalidReply(e.to_string()))?;

        debug!(
            "collaborator replied with {} chars",
            chat_response.message.content.len()
        );
        Ok(chat_response.message.content)
    }

    /// One task call: serialize the task, chat, parse the typed record.
    async fn call_typed<T: Serialize, R: DeserializeOwned>(
        &self,
        system: &str,
        instructions: &str,
        task: &T,
    ) -> Result<R, CollabError> {
        let payload = serde_json::to_string_pretty(task)
            .map_err(|e| CollabError::InvalidReply(e.to_string()))?;
        let prompt = format!("{instructions}\n\n=== TASK RECORD ===\n{payload}");
        let reply = self.chat(system, prompt).await?;
        parse_record(&reply)
    }
}

/// Extract and parse the JSON record from a collaborator reply.
///
/// Tolerates markdown code fences and surrounding prose but nothing
/// else; a reply without a parseable record is an [`CollabError::InvalidReply`].
fn parse_record<R: DeserializeOwned>(reply: &str) -> Result<R, CollabError> {
    let body = extract_json(reply)
        .ok_or_else(|| CollabError::InvalidReply("no JSON record in reply".to_string()))?;
    serde_json::from_str(body).map_err(|e| CollabError::InvalidReply(e.to_string()))
}

/// Slice out the outermost JSON value, stripping code fences and prose.
fn extract_json(reply: &str) -> Option<&str> {
    let trimmed = reply.trim();
    let inner = if let Some(rest) = trimmed.split_once("```") {
        // ```json\n...\n``` or bare ``` fences
        let after = rest.1;
        let after = after.strip_prefix("json").unwrap_or(after);
        after.split("```").next().unwrap_or(after)
    } else {
        trimmed
    };

    let start = inner.find(['{', '['])?;
    let open = inner.as_bytes()[start];
    let close = if open == b'{' { '}' } else { ']' };
    let end = inner.rfind(close)?;
    (end > start).then(|| &inner[start..=end])
}

const RECORD_SYSTEM_PROMPT: &str = "You are an analysis collaborator inside a deterministic \
marketing analytics pipeline. Reply with exactly one JSON value matching the requested record \
shape. No prose, no markdown, no fields beyond the shape. Use null for values that cannot be \
computed (for example a ratio with a zero denominator); never substitute zero.";

impl Collaborator for HttpCollaborator {
    async fn preprocess(&self, files: Vec<String>) -> Result<Preprocessed, CollabError> {
        let instructions = "Standardize the listed export files and report per-file statistics \
as {\"files\": [{\"file\", \"channel\", \"rows\", \"missing_required_columns\", \
\"missing_row_pct\", \"sanity_violations\", \"cross_source_variance_pct\", \
\"screenshot_variance_pct\"}], \"flags\": [..]}. Normalize dates to ISO-8601, currencies to \
account currency, and channel names to canonical form. Report gaps; never repair values.";
        self.call_typed(RECORD_SYSTEM_PROMPT, instructions, &files)
            .await
    }

    async fn classify_intent(&self, query: String) -> Result<ClassifiedIntent, CollabError> {
        let instructions = "Name the marketing channels this request concerns as \
{\"channels\": [..]} using only: sem, display, affiliate, seo. If the request concerns all \
channels, list all four.";
        self.call_typed(RECORD_SYSTEM_PROMPT, instructions, &query)
            .await
    }

    async fn analyze_channel(&self, task: ChannelTask) -> Result<ChannelResult, CollabError> {
        let instructions = "Analyze this channel for the period in the task record. Produce a \
ChannelResult record: {\"channel\", \"channel_group\", \"geo\", \"period\", \
\"comparison_type\", \"summary\" (metric/current/prior/delta/delta_pct/status), \
\"top_movers\", \"anomalies\" (only metrics with an established baseline), \"budget_pacing\" \
(null for non-spend channels), \"data_quality_notes\", \"extended_metrics\"}. Report NA and \
INTL segments before any blended view. delta must equal current minus prior, and delta_pct \
must equal delta over |prior| times 100.";
        self.call_typed(RECORD_SYSTEM_PROMPT, instructions, &task)
            .await
    }

    async fn synthesize_group(&self, task: GroupTask) -> Result<GroupSynthesis, CollabError> {
        let instructions = "Synthesize this channel group from its channel results. Produce a \
GroupSynthesis record: {\"group\", \"group_summary\", \"channel_mix\" (spend-based entries \
for spend channels, volume-based for the rest; never invent spend), \"contradictions\" \
(cross-channel metric conflicts with a trust call), \"actions\" (each with impact, \
confidence, ease scored 1-5 and an expected_outcome)}. Keep channel-level detail out of the \
summary; the channel records already carry it.";
        self.call_typed(RECORD_SYSTEM_PROMPT, instructions, &task)
            .await
    }

    async fn hypothesize(&self, task: HypothesisTask) -> Result<Vec<Hypothesis>, CollabError> {
        let instructions = "For each notable metric move across these results, produce a \
Hypothesis record: {\"metric_move\", \"channel\", \"hypothesis\", \"confidence\" \
(high/medium/low), \"supporting_evidence\", \"contradicting_evidence\"}. Reply with a JSON \
array. Evidence must cite the provided records; list contradicting evidence honestly or \
leave it empty.";
        self.call_typed(RECORD_SYSTEM_PROMPT, instructions, &task)
            .await
    }

    async fn synthesize_portfolio(
        &self,
        task: PortfolioTask,
    ) -> Result<PortfolioSynthesis, CollabError> {
        let instructions = "Synthesize the portfolio view across these group syntheses. \
Produce a PortfolioSynthesis record: {\"groups\" (per-group allocation and status), \
\"attribution_coverage\", \"contradictions\" (cross-group), \"actions\" (portfolio-level, \
scored 1-5 on impact/confidence/ease)}. Do not restate group detail the group records carry.";
        self.call_typed(RECORD_SYSTEM_PROMPT, instructions, &task)
            .await
    }

    async fn format_output(&self, task: FormatTask) -> Result<String, CollabError> {
        let instructions = match task.template {
            crate::models::Template::WeeklyReport => {
                "Render a weekly report in markdown from these records: executive summary, \
per-channel sections, group views, actions, hypotheses, caveats."
            }
            crate::models::Template::PeriodComparison => {
                "Render a period comparison in markdown from these records: side-by-side \
metric deltas per channel, group views, actions, caveats."
            }
            crate::models::Template::AnomalyAlert => {
                "Render an anomaly alert in markdown from these records: lead with the \
anomalies and their z-scores, then hypotheses, then supporting detail and caveats."
            }
        };
        let payload = serde_json::to_string_pretty(&task)
            .map_err(|e| CollabError::InvalidReply(e.to_string()))?;
        let system = "You are a report writer inside a marketing analytics pipeline. Write \
markdown grounded strictly in the supplied records; never invent numbers.";
        let prompt = format!("{instructions}\n\n=== TASK RECORD ===\n{payload}");
        let reply = self.chat(system, prompt).await?;
        if reply.trim().is_empty() {
            return Err(CollabError::InvalidReply("empty report body".to_string()));
        }
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_json_plain() {
        let reply = r#"{"channels": ["sem"]}"#;
        assert_eq!(extract_json(reply), Some(r#"{"channels": ["sem"]}"#));
    }

    #[test]
    fn test_extract_json_fenced() {
        let reply = "Here you go:\n```json\n{\"channels\": [\"seo\"]}\n```\nDone.";
        assert_eq!(extract_json(reply), Some("{\"channels\": [\"seo\"]}"));
    }

    #[test]
    fn test_extract_json_array() {
        let reply = "[{\"channel\": \"sem\"}]";
        assert_eq!(extract_json(reply), Some("[{\"channel\": \"sem\"}]"));
    }

    #[test]
    fn test_parse_record_rejects_prose() {
        let err = parse_record::<ClassifiedIntent>("I think SEM is doing well.").unwrap_err();
        assert!(matches!(err, CollabError::InvalidReply(_)));
    }

    #[test]
    fn test_parse_record_typed() {
        let intent: ClassifiedIntent =
            parse_record("```json\n{\"channels\": [\"sem\", \"display\"]}\n```").unwrap();
        assert_eq!(intent.channels, vec!["sem", "display"]);
    }
}
