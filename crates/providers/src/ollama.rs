//! Local inference adapter.
//!
//! Speaks the Ollama wire protocol: `POST /api/chat` for completions and
//! `POST /api/embeddings` for vectors. The same struct backs both the
//! local-inference provider and the local-embeddings sidecar (same wire
//! format, different policy identity). Local calls always cost zero.

use crate::traits::{
    ChatRequest, ChatResponse, EmbeddingsRequest, EmbeddingsResponse, ProviderAdapter,
};
use crate::util::from_reqwest;
use relay_domain::capability::Provider;
use relay_domain::config::PolicyConfig;
use relay_domain::error::{Error, Result};
use relay_domain::tool::{
    ContentPart, Message, MessageContent, Role, ToolCall, ToolChoice, ToolDefinition,
};
use relay_domain::usage::Usage;
use serde_json::Value;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Adapter struct
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A protocol adapter for a local Ollama-compatible inference server.
pub struct OllamaAdapter {
    provider: Provider,
    base_url: String,
    default_model: String,
    client: reqwest::Client,
}

impl OllamaAdapter {
    /// The local-inference adapter, from the policy's `ollama` block.
    pub fn from_policy(policy: &PolicyConfig) -> Result<Self> {
        let default_model = if policy.default_model.provider == Provider::Ollama {
            policy.default_model.model.clone()
        } else {
            "llama3.1".to_string()
        };
        Self::build(Provider::Ollama, &policy.ollama.base_url, default_model)
    }

    /// The local-embeddings sidecar, from the policy's `local_embeddings`
    /// block. Same wire protocol, separate policy identity.
    pub fn embeddings_sidecar(policy: &PolicyConfig) -> Result<Self> {
        Self::build(
            Provider::LocalEmbeddings,
            &policy.local_embeddings.base_url,
            policy.local_embeddings.model.clone(),
        )
    }

    fn build(provider: Provider, base_url: &str, default_model: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .map_err(from_reqwest)?;
        Ok(Self {
            provider,
            base_url: base_url.trim_end_matches('/').to_string(),
            default_model,
            client,
        })
    }

    fn effective_model(&self, model: Option<&str>) -> String {
        model
            .map(|m| m.to_string())
            .unwrap_or_else(|| self.default_model.clone())
    }

    fn build_chat_body(&self, req: &ChatRequest) -> Value {
        let messages: Vec<Value> = req.messages.iter().map(msg_to_ollama).collect();

        let mut body = serde_json::json!({
            "model": self.effective_model(req.model.as_deref()),
            "messages": messages,
            "stream": false,
        });

        if !req.tools.is_empty() {
            let tools: Vec<Value> = req.tools.iter().map(tool_to_ollama).collect();
            body["tools"] = Value::Array(tools);
            body["tool_choice"] = tool_choice_to_ollama(&req.tool_choice);
        }
        if req.temperature.is_some() || req.max_tokens.is_some() {
            let mut options = serde_json::Map::new();
            if let Some(temp) = req.temperature {
                options.insert("temperature".into(), serde_json::json!(temp));
            }
            if let Some(max) = req.max_tokens {
                options.insert("num_predict".into(), serde_json::json!(max));
            }
            body["options"] = Value::Object(options);
        }
        body
    }
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

fn msg_to_ollama(msg: &Message) -> Value {
    match msg.role {
        Role::Assistant => assistant_to_ollama(msg),
        Role::Tool => tool_result_to_ollama(msg),
        _ => serde_json::json!({
            "role": role_to_str(msg.role),
            "content": msg.content.extract_all_text(),
        }),
    }
}

fn assistant_to_ollama(msg: &Message) -> Value {
    let mut text_parts: Vec<String> = Vec::new();
    let mut tool_calls: Vec<Value> = Vec::new();

    match &msg.content {
        MessageContent::Text(t) => text_parts.push(t.clone()),
        MessageContent::Parts(parts) => {
            for part in parts {
                match part {
                    ContentPart::Text { text } => text_parts.push(text.clone()),
                    ContentPart::ToolUse { name, input, .. } => {
                        // Ollama's assistant tool calls carry no ids.
                        tool_calls.push(serde_json::json!({
                            "function": { "name": name, "arguments": input }
                        }));
                    }
                    _ => {}
                }
            }
        }
    }

    let mut obj = serde_json::json!({
        "role": "assistant",
        "content": text_parts.join("\n"),
    });
    if !tool_calls.is_empty() {
        obj["tool_calls"] = Value::Array(tool_calls);
    }
    obj
}

fn tool_result_to_ollama(msg: &Message) -> Value {
    if let MessageContent::Parts(parts) = &msg.content {
        for part in parts {
            if let ContentPart::ToolResult { tool_name, content, .. } = part {
                return serde_json::json!({
                    "role": "tool",
                    "tool_name": tool_name,
                    "content": content,
                });
            }
        }
    }
    serde_json::json!({
        "role": "tool",
        "content": msg.content.extract_all_text(),
    })
}

fn tool_to_ollama(tool: &ToolDefinition) -> Value {
    serde_json::json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.parameters,
        }
    })
}

fn tool_choice_to_ollama(choice: &ToolChoice) -> Value {
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
    let message = body.get("message").cloned().unwrap_or(Value::Null);

    let content = message
        .get("content")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();

    let mut tool_calls = Vec::new();
    if let Some(calls) = message.get("tool_calls").and_then(|v| v.as_array()) {
        for call in calls {
            let function = call.get("function").cloned().unwrap_or(Value::Null);
            let tool_name = function
                .get("name")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string();
            let arguments = parse_arguments(function.get("arguments"));
            // The wire format carries no call ids; synthesize one so tool
            // results can be correlated in the loop.
            tool_calls.push(ToolCall {
                call_id: format!("call_{}", uuid::Uuid::new_v4().simple()),
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

    let prompt_tokens = body
        .get("prompt_eval_count")
        .and_then(|v| v.as_u64())
        .unwrap_or(0) as u32;
    let completion_tokens = body.get("eval_count").and_then(|v| v.as_u64()).unwrap_or(0) as u32;

    let finish_reason = if tool_calls.is_empty() {
        Some("stop".to_string())
    } else {
        Some("tool_calls".to_string())
    };

    ChatResponse {
        content,
        provider,
        model,
        usage: Usage::new(prompt_tokens, completion_tokens),
        cost_usd: 0.0,
        tool_calls,
        finish_reason,
    }
}

/// Arguments may arrive as an object or a JSON-encoded string. Anything
/// unparseable decodes to an empty object.
fn parse_arguments(raw: Option<&Value>) -> Value {
    match raw {
        Some(Value::Object(map)) => Value::Object(map.clone()),
        Some(Value::String(s)) => match serde_json::from_str::<Value>(s) {
            Ok(Value::Object(map)) => Value::Object(map),
            _ => Value::Object(Default::default()),
        },
        _ => Value::Object(Default::default()),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
impl ProviderAdapter for OllamaAdapter {
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse> {
        let url = format!("{}/api/chat", self.base_url);
        let body = self.build_chat_body(&req);
        let model = self.effective_model(req.model.as_deref());

        tracing::debug!(provider = %self.provider, url = %url, model = %model, "ollama chat request");

        let resp = self
            .client
            .post(&url)
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
        Ok(parse_chat_response(self.provider, &resp_json, &model))
    }

    async fn embeddings(&self, req: EmbeddingsRequest) -> Result<EmbeddingsResponse> {
        let url = format!("{}/api/embeddings", self.base_url);
        let model = self.effective_model(req.model.as_deref());

        let mut embeddings = Vec::with_capacity(req.input.len());
        for text in &req.input {
            let body = serde_json::json!({ "model": model, "prompt": text });
            let resp = self
                .client
                .post(&url)
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
            let vector: Vec<f32> = resp_json
                .get("embedding")
                .and_then(|v| v.as_array())
                .map(|arr| {
                    arr.iter()
                        .filter_map(|v| v.as_f64())
                        .map(|f| f as f32)
                        .collect()
                })
                .unwrap_or_default();
            embeddings.push(vector);
        }

        Ok(EmbeddingsResponse {
            embeddings,
            provider: self.provider,
        })
    }

    /// Local inference is free by definition.
    fn estimate_cost(&self, _usage: &Usage, _model: &str) -> f64 {
        0.0
    }

    fn provider(&self) -> Provider {
        self.provider
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
