//! The stream-json wire shapes emitted by the external coding-agent
//! subprocess (spec §6).
//!
//! Lifted directly from the teacher's `protocol::types::InboundEvent` and
//! friends, trimmed to the fields this crate actually reads (assistant text,
//! tool_use/tool-error entries, the terminal `result` record) — the
//! orchestrator reads only the shapes described in spec §4.7, not the full
//! raw Anthropic API streaming surface the teacher's interactive renderer
//! needs.

use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum InboundEvent {
    #[serde(rename = "system")]
    System(#[serde(default)] Value),
    #[serde(rename = "assistant")]
    Assistant(AssistantMessage),
    #[serde(rename = "user")]
    User(UserToolResult),
    #[serde(rename = "result")]
    Result(SessionResult),
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssistantMessage {
    pub message: AssistantMessageBody,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssistantMessageBody {
    #[serde(default)]
    pub content: Vec<AssistantContentBlock>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum AssistantContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        #[serde(default)]
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserToolResult {
    #[serde(default)]
    pub tool_use_result: Option<ToolUseResult>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ToolUseResult {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub is_error: bool,
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionResult {
    #[serde(default)]
    pub subtype: String,
    #[serde(default)]
    pub total_cost_usd: f64,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default)]
    pub result: String,
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub is_error: bool,
}

/// Parse one NDJSON line from the subprocess. A blank line yields `Ok(None)`.
pub fn parse_line(line: &str) -> Result<Option<InboundEvent>, serde_json::Error> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    serde_json::from_str(trimmed).map(Some)
}

/// Usage-limit detection: the agent reports this through a `result` record
/// whose subtype or message mentions a usage/rate limit rather than a
/// dedicated event type the wire contract defines (spec §4.7 step 6).
pub fn is_usage_limit(result: &SessionResult) -> bool {
    let haystacks = [result.subtype.as_str(), result.result.as_str()];
    haystacks.iter().any(|s| {
        let lower = s.to_lowercase();
        lower.contains("usage limit") || lower.contains("usage_limit") || lower.contains("rate limit")
    })
}
