//! Block-response adapter.
//!
//! Implements the Anthropic Messages API: system messages live in a
//! dedicated top-level `system` field rather than the message list, and the
//! response `content` is a list of typed blocks (text and tool-use
//! interleaved) that must be reassembled in document order.

use crate::pricing::PriceTable;
use crate::traits::{
    ChatRequest, ChatResponse, EmbeddingsRequest, EmbeddingsResponse, ProviderAdapter,
};
use crate::util::{from_reqwest, resolve_credential};
use relay_domain::capability::Provider;
use relay_domain::config::{CredentialConfig, PolicyConfig};
use relay_domain::error::{Error, Result};
use relay_domain::tool::{
    ContentPart, Message, MessageContent, Role, ToolCall, ToolChoice, ToolDefinition,
};
use relay_domain::usage::Usage;
use serde_json::Value;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Constants
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

const ANTHROPIC_VERSION: &str = "2023-06-01";

const DEFAULT_MAX_TOKENS: u32 = 4096;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Adapter struct
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A protocol adapter for the Anthropic Messages API.
pub struct AnthropicAdapter {
    base_url: String,
    credential: CredentialConfig,
    default_model: String,
    prices: PriceTable,
    client: reqwest::Client,
}

impl AnthropicAdapter {
    /// Create the adapter from the policy's `anthropic` block.
    pub fn from_policy(policy: &PolicyConfig) -> Result<Self> {
        let default_model = if policy.default_model.provider == Provider::Anthropic {
            policy.default_model.model.clone()
        } else {
            "claude-sonnet-4-20250514".to_string()
        };
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .map_err(from_reqwest)?;
        Ok(Self {
            base_url: policy.anthropic.base_url.trim_end_matches('/').to_string(),
            credential: policy.anthropic.credential.clone(),
            default_model,
            prices: PriceTable::new(policy.pricing.clone()),
            client,
        })
    }

    // ── Internal helpers ───────────────────────────────────────────

    fn effective_model(&self, req: &ChatRequest) -> String {
        req.model
            .clone()
            .unwrap_or_else(|| self.default_model.clone())
    }

    fn build_messages_body(&self, req: &ChatRequest) -> Value {
        // System messages are extracted out of the list into the dedicated
        // top-level field.
        let mut system_parts: Vec<String> = Vec::new();
        let mut api_messages: Vec<Value> = Vec::new();

        for msg in &req.messages {
            match msg.role {
                Role::System => system_parts.push(msg.content.extract_all_text()),
                Role::User => api_messages.push(serde_json::json!({
                    "role": "user",
                    "content": msg.content.extract_all_text(),
                })),
                Role::Assistant => api_messages.push(assistant_to_anthropic(msg)),
                // Tool results are user messages with tool_result blocks.
                Role::Tool => api_messages.push(tool_result_to_anthropic(msg)),
            }
        }

        let mut body = serde_json::json!({
            "model": self.effective_model(req),
            "messages": api_messages,
            "max_tokens": req.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        });

        if !system_parts.is_empty() {
            body["system"] = Value::String(system_parts.join("\n\n"));
        }
        if !req.tools.is_empty() {
            let tools: Vec<Value> = req.tools.iter().map(tool_to_anthropic).collect();
            body["tools"] = Value::Array(tools);
            body["tool_choice"] = tool_choice_to_wire(&req.tool_choice);
        }
        if let Some(temp) = req.temperature {
            body["temperature"] = serde_json::json!(temp);
        }
        body
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Message serialization helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn assistant_to_anthropic(msg: &Message) -> Value {
    let content: Vec<Value> = match &msg.content {
        MessageContent::Text(t) => vec![serde_json::json!({"type": "text", "text": t})],
        MessageContent::Parts(parts) => parts
            .iter()
            .filter_map(|p| match p {
                ContentPart::Text { text } => Some(serde_json::json!({
                    "type": "text",
                    "text": text,
                })),
                ContentPart::ToolUse { id, name, input } => Some(serde_json::json!({
                    "type": "tool_use",
                    "id": id,
                    "name": name,
                    "input": input,
                })),
                _ => None,
            })
            .collect(),
    };
    serde_json::json!({ "role": "assistant", "content": content })
}

fn tool_result_to_anthropic(msg: &Message) -> Value {
    let content: Vec<Value> = match &msg.content {
        MessageContent::Parts(parts) => parts
            .iter()
            .filter_map(|p| match p {
                ContentPart::ToolResult {
                    tool_use_id,
                    content,
                    is_error,
                    ..
                } => Some(serde_json::json!({
                    "type": "tool_result",
                    "tool_use_id": tool_use_id,
                    "content": content,
                    "is_error": is_error,
                })),
                _ => None,
            })
            .collect(),
        MessageContent::Text(t) => vec![serde_json::json!({
            "type": "tool_result",
            "tool_use_id": "",
            "content": t,
        })],
    };
    serde_json::json!({ "role": "user", "content": content })
}

fn tool_to_anthropic(tool: &ToolDefinition) -> Value {
    serde_json::json!({
        "name": tool.name,
        "description": tool.description,
        "input_schema": tool.parameters,
    })
}

// ── Tool-choice wire mapping ───────────────────────────────────────

/// Map the unified tool choice onto this wire's typed object.
pub fn tool_choice_to_wire(choice: &ToolChoice) -> Value {
    match choice {
        ToolChoice::Auto => serde_json::json!({"type": "auto"}),
        ToolChoice::None => serde_json::json!({"type": "none"}),
        ToolChoice::Tool(name) => serde_json::json!({"type": "tool", "name": name}),
    }
}

/// Parse the wire object back to the unified value. Unknown shapes read as
/// `Auto`, the wire's own default.
pub fn tool_choice_from_wire(v: &Value) -> ToolChoice {
    match v.get("type").and_then(|t| t.as_str()) {
        Some("none") => ToolChoice::None,
        Some("tool") => match v.get("name").and_then(|n| n.as_str()) {
            Some(name) => ToolChoice::Tool(name.to_string()),
            None => ToolChoice::Auto,
        },
        _ => ToolChoice::Auto,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Response deserialization
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn parse_messages_response(body: &Value, fallback_model: &str) -> ChatResponse {
    let empty = Vec::new();
    let blocks = body
        .get("content")
        .and_then(|v| v.as_array())
        .unwrap_or(&empty);

    // Walk the blocks once, in document order: text concatenates, tool_use
    // collects.
    let mut text_parts: Vec<String> = Vec::new();
    let mut tool_calls: Vec<ToolCall> = Vec::new();

    for block in blocks {
        match block.get("type").and_then(|v| v.as_str()).unwrap_or("") {
            "text" => {
                if let Some(t) = block.get("text").and_then(|v| v.as_str()) {
                    text_parts.push(t.to_string());
                }
            }
            "tool_use" => {
                let call_id = block
                    .get("id")
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .to_string();
                let tool_name = block
                    .get("name")
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .to_string();
                let arguments = block
                    .get("input")
                    .filter(|v| v.is_object())
                    .cloned()
                    .unwrap_or_else(|| Value::Object(Default::default()));
                tool_calls.push(ToolCall {
                    call_id,
                    tool_name,
                    arguments,
                });
            }
            _ => {}
        }
    }

    let model = body
        .get("model")
        .and_then(|v| v.as_str())
        .unwrap_or(fallback_model)
        .to_string();

    let finish_reason = body
        .get("stop_reason")
        .and_then(|v| v.as_str())
        .map(|s| match s {
            "end_turn" => "stop".to_string(),
            "tool_use" => "tool_calls".to_string(),
            other => other.to_string(),
        });

    let usage = body
        .get("usage")
        .map(|u| {
            Usage::new(
                u.get("input_tokens").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
                u.get("output_tokens").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
            )
        })
        .unwrap_or_default();

    ChatResponse {
        content: text_parts.join(""),
        provider: Provider::Anthropic,
        model,
        usage,
        cost_usd: 0.0, // filled in by the caller, which owns the price table
        tool_calls,
        finish_reason,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
impl ProviderAdapter for AnthropicAdapter {
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse> {
        let key = resolve_credential(Provider::Anthropic, &self.credential)?;
        let url = format!("{}/v1/messages", self.base_url);
        let model = self.effective_model(&req);
        let body = self.build_messages_body(&req);

        tracing::debug!(url = %url, model = %model, "anthropic chat request");

        let resp = self
            .client
            .post(&url)
            .header("x-api-key", key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(from_reqwest)?;

        let status = resp.status();
        let resp_text = resp.text().await.map_err(from_reqwest)?;

        if !status.is_success() {
            return Err(Error::Provider {
                provider: Provider::Anthropic.to_string(),
                status: status.as_u16(),
                body: resp_text,
            });
        }

        let resp_json: Value = serde_json::from_str(&resp_text)?;
        let mut parsed = parse_messages_response(&resp_json, &model);
        parsed.cost_usd = self.estimate_cost(&parsed.usage, &parsed.model);
        Ok(parsed)
    }

    async fn embeddings(&self, _req: EmbeddingsRequest) -> Result<EmbeddingsResponse> {
        // No embeddings endpoint on this wire; the policy routes embeddings
        // to the local sidecar or an OpenAI-compatible provider.
        Err(Error::ProviderUnavailable(
            "anthropic has no embeddings API; route embeddings to local_embeddings \
             or an OpenAI-compatible provider"
                .into(),
        ))
    }

    fn estimate_cost(&self, usage: &Usage, model: &str) -> f64 {
        self.prices.estimate(model, usage)
    }

    fn provider(&self) -> Provider {
        Provider::Anthropic
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
