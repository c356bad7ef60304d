//! OpenAI-compatible adapter.
//!
//! One struct covers both hosted families that share this wire format:
//! the standard bearer-token endpoint (`POST /v1/chat/completions` with
//! `Authorization: Bearer`) and the managed Azure deployment layout
//! (`/openai/deployments/{deployment}/chat/completions?api-version=…` with
//! a static `api-key` header and no `model` in the body).

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
// Adapter struct
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A protocol adapter for OpenAI-compatible chat completion endpoints.
pub struct OpenAiCompatAdapter {
    provider: Provider,
    base_url: String,
    credential: CredentialConfig,
    auth_header: String,
    auth_prefix: String,
    default_model: String,
    /// Azure deployment name; empty in standard mode.
    deployment: String,
    api_version: String,
    /// When true, uses the Azure URL pattern and omits `model` from the body.
    is_azure: bool,
    prices: PriceTable,
    client: reqwest::Client,
}

impl OpenAiCompatAdapter {
    /// The hosted bearer-token provider, from the policy's `openai` block.
    pub fn standard(policy: &PolicyConfig) -> Result<Self> {
        let default_model = if policy.default_model.provider == Provider::Openai {
            policy.default_model.model.clone()
        } else {
            "gpt-4o".to_string()
        };
        Ok(Self {
            provider: Provider::Openai,
            base_url: policy.openai.base_url.trim_end_matches('/').to_string(),
            credential: policy.openai.credential.clone(),
            auth_header: "Authorization".into(),
            auth_prefix: "Bearer ".into(),
            default_model,
            deployment: String::new(),
            api_version: String::new(),
            is_azure: false,
            prices: PriceTable::new(policy.pricing.clone()),
            client: build_client()?,
        })
    }

    /// The managed-deployment provider, from the policy's `azure` block.
    /// Azure uses the `api-key` header with no prefix.
    pub fn azure(policy: &PolicyConfig) -> Result<Self> {
        Ok(Self {
            provider: Provider::AzureOpenai,
            base_url: policy.azure.endpoint.trim_end_matches('/').to_string(),
            credential: policy.azure.credential.clone(),
            auth_header: "api-key".into(),
            auth_prefix: String::new(),
            default_model: policy.azure.deployment.clone(),
            deployment: policy.azure.deployment.clone(),
            api_version: policy.azure.api_version.clone(),
            is_azure: true,
            prices: PriceTable::new(policy.pricing.clone()),
            client: build_client()?,
        })
    }

    // ── Internal helpers ───────────────────────────────────────────

    fn effective_model(&self, req: &ChatRequest) -> String {
        req.model
            .clone()
            .unwrap_or_else(|| self.default_model.clone())
    }

    /// The chat completions URL for this mode. Azure embeds the deployment
    /// name in the path and versions via a query parameter; the routed model
    /// name is the deployment, falling back to the configured one.
    fn chat_url(&self, model: &str) -> String {
        if self.is_azure {
            let deployment = if model.is_empty() { &self.deployment } else { model };
            format!(
                "{}/openai/deployments/{}/chat/completions?api-version={}",
                self.base_url, deployment, self.api_version
            )
        } else {
            format!("{}/v1/chat/completions", self.base_url)
        }
    }

    fn build_chat_body(&self, req: &ChatRequest) -> Value {
        let messages: Vec<Value> = req.messages.iter().map(msg_to_openai).collect();

        let mut body = serde_json::json!({
            "messages": messages,
        });

        // Azure routes by deployment in the URL; the body must not name a
        // model. Standard mode requires it.
        if !self.is_azure {
            body["model"] = Value::String(self.effective_model(req));
        }

        if !req.tools.is_empty() {
            let tools: Vec<Value> = req.tools.iter().map(tool_to_openai).collect();
            body["tools"] = Value::Array(tools);
            body["tool_choice"] = tool_choice_to_openai(&req.tool_choice);
        }
        if let Some(temp) = req.temperature {
            body["temperature"] = serde_json::json!(temp);
        }
        if let Some(max) = req.max_tokens {
            body["max_tokens"] = serde_json::json!(max);
        }
        body
    }
}

fn build_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(60))
        .build()
        .map_err(from_reqwest)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Message serialization helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn role_to_str(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

fn msg_to_openai(msg: &Message) -> Value {
    match msg.role {
        Role::Tool => tool_result_to_openai(msg),
        Role::Assistant => assistant_to_openai(msg),
        _ => serde_json::json!({
            "role": role_to_str(msg.role),
            "content": msg.content.extract_all_text(),
        }),
    }
}

fn assistant_to_openai(msg: &Message) -> Value {
    let mut obj = serde_json::json!({"role": "assistant"});
    let mut text_parts: Vec<String> = Vec::new();
    let mut tool_calls: Vec<Value> = Vec::new();

    match &msg.content {
        MessageContent::Text(t) => text_parts.push(t.clone()),
        MessageContent::Parts(parts) => {
            for part in parts {
                match part {
                    ContentPart::Text { text } => text_parts.push(text.clone()),
                    ContentPart::ToolUse { id, name, input } => {
                        tool_calls.push(serde_json::json!({
                            "id": id,
                            "type": "function",
                            "function": {
                                "name": name,
                                "arguments": input.to_string(),
                            }
                        }));
                    }
                    _ => {}
                }
            }
        }
    }

    if text_parts.is_empty() {
        obj["content"] = Value::Null;
    } else {
        obj["content"] = Value::String(text_parts.join("\n"));
    }
    if !tool_calls.is_empty() {
        obj["tool_calls"] = Value::Array(tool_calls);
    }
    obj
}

fn tool_result_to_openai(msg: &Message) -> Value {
    if let MessageContent::Parts(parts) = &msg.content {
        for part in parts {
            if let ContentPart::ToolResult { tool_use_id, content, .. } = part {
                return serde_json::json!({
                    "role": "tool",
                    "tool_call_id": tool_use_id,
                    "content": content,
                });
            }
        }
    }
    serde_json::json!({
        "role": "tool",
        "tool_call_id": "",
        "content": msg.content.extract_all_text(),
    })
}

fn tool_to_openai(tool: &ToolDefinition) -> Value {
    serde_json::json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.parameters,
        }
    })
}

/// `auto`/`none` are plain strings on this wire; an explicit tool is a
/// typed function object.
fn tool_choice_to_openai(choice: &ToolChoice) -> Value {
    match choice {
        ToolChoice::Auto => Value::String("auto".into()),
        ToolChoice::None => Value::String("none".into()),
        ToolChoice::Tool(name) => serde_json::json!({
            "type": "function",
            "function": { "name": name }
        }),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Response deserialization
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn parse_chat_response(provider: Provider, body: &Value, fallback_model: &str) -> ChatResponse {
    let message = body
        .get("choices")
        .and_then(|v| v.as_array())
        .and_then(|arr| arr.first())
        .and_then(|choice| choice.get("message"))
        .cloned()
        .unwrap_or(Value::Null);

    let content = message
        .get("content")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();

    let mut tool_calls = Vec::new();
    if let Some(calls) = message.get("tool_calls").and_then(|v| v.as_array()) {
        for call in calls {
            let call_id = call
                .get("id")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string();
            let function = call.get("function").cloned().unwrap_or(Value::Null);
            let tool_name = function
                .get("name")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string();
            // Arguments arrive as a JSON-encoded string on this wire.
            let arguments = function
                .get("arguments")
                .and_then(|v| v.as_str())
                .and_then(|s| serde_json::from_str::<Value>(s).ok())
                .filter(|v| v.is_object())
                .unwrap_or_else(|| Value::Object(Default::default()));
            tool_calls.push(ToolCall {
                call_id,
                tool_name,
                arguments,
            });
        }
    }

    let model = body
        .get("model")
        .and_then(|v| v.as_str())
        .unwrap_or(fallback_model)
        .to_string();

    let finish_reason = body
        .get("choices")
        .and_then(|v| v.as_array())
        .and_then(|arr| arr.first())
        .and_then(|choice| choice.get("finish_reason"))
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    let usage = body
        .get("usage")
        .map(|u| {
            Usage::new(
                u.get("prompt_tokens").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
                u.get("completion_tokens")
                    .and_then(|v| v.as_u64())
                    .unwrap_or(0) as u32,
            )
        })
        .unwrap_or_default();

    ChatResponse {
        content,
        provider,
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
impl ProviderAdapter for OpenAiCompatAdapter {
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse> {
        let key = resolve_credential(self.provider, &self.credential)?;
        let model = self.effective_model(&req);
        let url = self.chat_url(&model);
        let body = self.build_chat_body(&req);

        tracing::debug!(provider = %self.provider, url = %url, model = %model, "chat request");

        let resp = self
            .client
            .post(&url)
            .header(&self.auth_header, format!("{}{}", self.auth_prefix, key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(from_reqwest)?;

        let status = resp.status();
        let resp_text = resp.text().await.map_err(from_reqwest)?;

        if !status.is_success() {
            return Err(Error::Provider {
                provider: self.provider.to_string(),
                status: status.as_u16(),
                body: resp_text,
            });
        }

        let resp_json: Value = serde_json::from_str(&resp_text)?;
        let mut parsed = parse_chat_response(self.provider, &resp_json, &model);
        parsed.cost_usd = self.estimate_cost(&parsed.usage, &parsed.model);
        Ok(parsed)
    }

    async fn embeddings(&self, req: EmbeddingsRequest) -> Result<EmbeddingsResponse> {
        let key = resolve_credential(self.provider, &self.credential)?;
        let url = if self.is_azure {
            format!(
                "{}/openai/deployments/{}/embeddings?api-version={}",
                self.base_url, self.deployment, self.api_version
            )
        } else {
            format!("{}/v1/embeddings", self.base_url)
        };

        let mut body = serde_json::json!({ "input": req.input });
        if !self.is_azure {
            body["model"] = Value::String(
                req.model
                    .clone()
                    .unwrap_or_else(|| "text-embedding-3-small".into()),
            );
        }

        let resp = self
            .client
            .post(&url)
            .header(&self.auth_header, format!("{}{}", self.auth_prefix, key))
            .json(&body)
            .send()
            .await
            .map_err(from_reqwest)?;

        let status = resp.status();
        let resp_text = resp.text().await.map_err(from_reqwest)?;
        if !status.is_success() {
            return Err(Error::Provider {
                provider: self.provider.to_string(),
                status: status.as_u16(),
                body: resp_text,
            });
        }

        let resp_json: Value = serde_json::from_str(&resp_text)?;
        let embeddings = resp_json
            .get("data")
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .map(|item| {
                        item.get("embedding")
                            .and_then(|v| v.as_array())
                            .map(|e| {
                                e.iter()
                                    .filter_map(|v| v.as_f64())
                                    .map(|f| f as f32)
                                    .collect()
                            })
                            .unwrap_or_default()
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(EmbeddingsResponse {
            embeddings,
            provider: self.provider,
        })
    }

    fn estimate_cost(&self, usage: &Usage, model: &str) -> f64 {
        self.prices.estimate(model, usage)
    }

    fn provider(&self) -> Provider {
        self.provider
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    fn azure_test_policy() -> PolicyConfig {
        let mut policy = PolicyConfig::default();
        policy.azure.endpoint = "https://acme.openai.azure.com".into();
        policy.azure.deployment = "gpt-4o-prod".into();
        policy
    }

    #[test]
    fn azure_url_embeds_deployment_and_version() {
        let adapter = OpenAiCompatAdapter::azure(&azure_test_policy()).unwrap();
        assert_eq!(
            adapter.chat_url(""),
            "https://acme.openai.azure.com/openai/deployments/gpt-4o-prod/chat/completions?api-version=2024-10-21"
        );
        // A routed model name overrides the configured deployment.
        assert_eq!(
            adapter.chat_url("gpt-4o-canary"),
            "https://acme.openai.azure.com/openai/deployments/gpt-4o-canary/chat/completions?api-version=2024-10-21"
        );
    }

    #[test]
    fn azure_body_omits_model_standard_includes_it() {
        let req = ChatRequest {
            messages: vec![Message::user("hi")],
            model: Some("gpt-4o".into()),
            ..Default::default()
        };

        let azure = OpenAiCompatAdapter::azure(&azure_test_policy()).unwrap();
        assert!(azure.build_chat_body(&req).get("model").is_none());

        let standard = OpenAiCompatAdapter::standard(&PolicyConfig::default()).unwrap();
        assert_eq!(standard.build_chat_body(&req)["model"], "gpt-4o");
    }

    #[test]
    fn azure_uses_api_key_header_without_prefix() {
        let adapter = OpenAiCompatAdapter::azure(&azure_test_policy()).unwrap();
        assert_eq!(adapter.auth_header, "api-key");
        assert!(adapter.auth_prefix.is_empty());

        let standard = OpenAiCompatAdapter::standard(&PolicyConfig::default()).unwrap();
        assert_eq!(standard.auth_header, "Authorization");
        assert_eq!(standard.auth_prefix, "Bearer ");
    }

    #[test]
    fn tool_choice_shapes_are_distinct() {
        assert_eq!(tool_choice_to_openai(&ToolChoice::Auto), "auto");
        assert_eq!(tool_choice_to_openai(&ToolChoice::None), "none");
        let explicit = tool_choice_to_openai(&ToolChoice::Tool("search".into()));
        assert_eq!(explicit["function"]["name"], "search");
    }

    #[test]
    fn parse_response_decodes_string_arguments() {
        let body = serde_json::json!({
            "model": "gpt-4o-2024-08-06",
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_abc",
                        "type": "function",
                        "function": { "name": "search", "arguments": "{\"q\": \"rust\"}" }
                    }]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": { "prompt_tokens": 12, "completion_tokens": 3 }
        });
        let resp = parse_chat_response(Provider::Openai, &body, "gpt-4o");
        assert_eq!(resp.tool_calls.len(), 1);
        assert_eq!(resp.tool_calls[0].call_id, "call_abc");
        assert_eq!(resp.tool_calls[0].arguments["q"], "rust");
        assert_eq!(resp.finish_reason.as_deref(), Some("tool_calls"));
        assert_eq!(resp.usage.total_tokens, 15);
    }

    #[test]
    fn malformed_arguments_decode_to_empty_object() {
        let body = serde_json::json!({
            "choices": [{
                "message": {
                    "tool_calls": [{
                        "id": "call_1",
                        "function": { "name": "search", "arguments": "{oops" }
                    }]
                }
            }]
        });
        let resp = parse_chat_response(Provider::Openai, &body, "gpt-4o");
        assert_eq!(resp.tool_calls[0].arguments, serde_json::json!({}));
    }

    #[test]
    fn assistant_round_trip_preserves_tool_use() {
        let msg = Message::assistant_tool_calls(
            "",
            &[ToolCall {
                call_id: "c1".into(),
                tool_name: "search".into(),
                arguments: serde_json::json!({"q": "x"}),
            }],
        );
        let wire = msg_to_openai(&msg);
        assert_eq!(wire["content"], Value::Null);
        assert_eq!(wire["tool_calls"][0]["id"], "c1");
        assert_eq!(
            wire["tool_calls"][0]["function"]["arguments"],
            "{\"q\":\"x\"}"
        );
    }
}
