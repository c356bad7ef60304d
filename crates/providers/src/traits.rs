use relay_domain::capability::Provider;
use relay_domain::error::Result;
use relay_domain::tool::{Message, ToolCall, ToolChoice, ToolDefinition};
use relay_domain::usage::Usage;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request / Response types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A provider-agnostic chat completion request.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    /// The conversation messages to send.
    pub messages: Vec<Message>,
    /// Tool definitions the model may invoke.
    pub tools: Vec<ToolDefinition>,
    /// Unified tool-choice value; each adapter maps it to its own wire shape.
    pub tool_choice: ToolChoice,
    /// Sampling temperature. `None` lets the provider choose.
    pub temperature: Option<f32>,
    /// Maximum tokens in the response. `None` lets the provider choose.
    pub max_tokens: Option<u32>,
    /// Model identifier. When `None`, the adapter uses its configured default.
    pub model: Option<String>,
}

/// A provider-agnostic chat completion response.
#[derive(Debug, Clone)]
pub struct ChatResponse {
    /// Textual content of the response.
    pub content: String,
    /// The provider that actually produced the response — never the one
    /// originally requested, if the two differ.
    pub provider: Provider,
    /// The model that actually produced the response.
    pub model: String,
    /// Token usage for this call.
    pub usage: Usage,
    /// Estimated cost in USD. Always zero for local providers.
    pub cost_usd: f64,
    /// Tool calls emitted by the model, in document order.
    pub tool_calls: Vec<ToolCall>,
    /// The reason the model stopped generating (e.g. "stop", "tool_calls").
    pub finish_reason: Option<String>,
}

/// A request for text embeddings.
#[derive(Debug, Clone)]
pub struct EmbeddingsRequest {
    /// Input texts to embed.
    pub input: Vec<String>,
    /// Model to use. When `None`, the adapter uses its configured default.
    pub model: Option<String>,
}

/// An embeddings response.
#[derive(Debug, Clone)]
pub struct EmbeddingsResponse {
    /// One embedding vector per input text.
    pub embeddings: Vec<Vec<f32>>,
    /// The provider that produced the vectors.
    pub provider: Provider,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Core adapter trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Trait that every protocol adapter must implement.
///
/// Implementations translate between the unified types above and the wire
/// format of one provider family's HTTP API. Every call performs exactly one
/// request attempt; retries are the caller's responsibility.
#[async_trait::async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Send a chat completion request and wait for the full response.
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse>;

    /// Generate text embeddings.
    async fn embeddings(&self, req: EmbeddingsRequest) -> Result<EmbeddingsResponse>;

    /// Static per-model cost estimate in USD. Local adapters return 0.
    fn estimate_cost(&self, usage: &Usage, model: &str) -> f64;

    /// Which provider this adapter speaks for.
    fn provider(&self) -> Provider;
}
