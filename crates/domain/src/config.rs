use crate::capability::{Capability, ModelRef, Provider};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Routing policy
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The resolved configuration governing provider/model selection.
///
/// Constructed once per process (or per test) and treated as immutable
/// thereafter. Changing policy requires constructing a new `Router`; nothing
/// here is ever mutated in place during concurrent use.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Which class of providers the operator permits.
    #[serde(default)]
    pub mode: RouterMode,
    /// When true, a capability the default provider lacks is a hard error —
    /// no substitution is ever attempted.
    #[serde(default)]
    pub strict: bool,
    /// Provider/model used when no override applies.
    #[serde(default = "d_default_model")]
    pub default_model: ModelRef,
    /// Per-capability overrides. Explicit operator intent; checked before
    /// the default but after per-agent overrides.
    #[serde(default)]
    pub feature_overrides: HashMap<Capability, ModelRef>,
    /// Per-agent overrides. Authoritative: returned verbatim, no capability
    /// re-check.
    #[serde(default)]
    pub agent_overrides: HashMap<String, ModelRef>,
    /// Connection settings, one block per provider family.
    #[serde(default)]
    pub ollama: OllamaSettings,
    #[serde(default)]
    pub azure: AzureSettings,
    #[serde(default)]
    pub openai: OpenaiSettings,
    #[serde(default)]
    pub anthropic: AnthropicSettings,
    #[serde(default)]
    pub local_embeddings: LocalEmbeddingsSettings,
    /// Per-model pricing overrides (key = model name). Missing models fall
    /// back to the built-in price table.
    #[serde(default)]
    pub pricing: HashMap<String, ModelPricing>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            mode: RouterMode::default(),
            strict: false,
            default_model: d_default_model(),
            feature_overrides: HashMap::new(),
            agent_overrides: HashMap::new(),
            ollama: OllamaSettings::default(),
            azure: AzureSettings::default(),
            openai: OpenaiSettings::default(),
            anthropic: AnthropicSettings::default(),
            local_embeddings: LocalEmbeddingsSettings::default(),
            pricing: HashMap::new(),
        }
    }
}

impl PolicyConfig {
    /// Parse a policy from TOML text.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| Error::Config(format!("invalid policy TOML: {e}")))
    }

    /// Connection/credential settings for a cloud provider, or `None` for
    /// providers that carry no credential.
    pub fn credential_for(&self, provider: Provider) -> Option<&CredentialConfig> {
        match provider {
            Provider::AzureOpenai => Some(&self.azure.credential),
            Provider::Openai => Some(&self.openai.credential),
            Provider::Anthropic => Some(&self.anthropic.credential),
            Provider::Ollama | Provider::LocalEmbeddings => None,
        }
    }
}

/// Which providers the operator permits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RouterMode {
    /// Only local providers (and the local embeddings sidecar).
    LocalOnly,
    /// Only the managed-deployment cloud provider, plus local embeddings.
    ManagedCloudOnly,
    /// Anything goes; the matrix decides.
    #[default]
    Hybrid,
    /// Cloud providers preferred; local providers are skipped in fallback.
    CloudPreferred,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Per-provider connection settings
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Where a cloud credential comes from.
///
/// Precedence: `key` (plaintext, warn) then `env`. The env var is resolved
/// at validation time so a missing credential can be reported by name.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CredentialConfig {
    /// Direct key (for config-only setups; prefer `env`).
    #[serde(default)]
    pub key: Option<String>,
    /// Env var containing the key.
    #[serde(default)]
    pub env: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaSettings {
    #[serde(default = "d_ollama_url")]
    pub base_url: String,
}

impl Default for OllamaSettings {
    fn default() -> Self {
        Self { base_url: d_ollama_url() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AzureSettings {
    /// Resource endpoint, e.g. `https://my-resource.openai.azure.com`.
    #[serde(default)]
    pub endpoint: String,
    /// Deployment name embedded in the completions URL.
    #[serde(default)]
    pub deployment: String,
    #[serde(default = "d_azure_api_version")]
    pub api_version: String,
    #[serde(default = "d_azure_credential")]
    pub credential: CredentialConfig,
}

impl Default for AzureSettings {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            deployment: String::new(),
            api_version: d_azure_api_version(),
            credential: d_azure_credential(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenaiSettings {
    #[serde(default = "d_openai_url")]
    pub base_url: String,
    #[serde(default = "d_openai_credential")]
    pub credential: CredentialConfig,
}

impl Default for OpenaiSettings {
    fn default() -> Self {
        Self {
            base_url: d_openai_url(),
            credential: d_openai_credential(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicSettings {
    #[serde(default = "d_anthropic_url")]
    pub base_url: String,
    #[serde(default = "d_anthropic_credential")]
    pub credential: CredentialConfig,
}

impl Default for AnthropicSettings {
    fn default() -> Self {
        Self {
            base_url: d_anthropic_url(),
            credential: d_anthropic_credential(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalEmbeddingsSettings {
    #[serde(default = "d_ollama_url")]
    pub base_url: String,
    #[serde(default = "d_embed_model")]
    pub model: String,
}

impl Default for LocalEmbeddingsSettings {
    fn default() -> Self {
        Self {
            base_url: d_ollama_url(),
            model: d_embed_model(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Pricing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Pricing per million tokens for a specific model.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ModelPricing {
    /// Dollars per 1 million input (prompt) tokens.
    pub input_per_1m: f64,
    /// Dollars per 1 million output (completion) tokens.
    pub output_per_1m: f64,
}

impl ModelPricing {
    /// Calculate estimated cost in USD for the given token counts.
    pub fn estimate_cost(&self, input_tokens: u32, output_tokens: u32) -> f64 {
        (input_tokens as f64 * self.input_per_1m + output_tokens as f64 * self.output_per_1m)
            / 1_000_000.0
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_default_model() -> ModelRef {
    ModelRef::new(Provider::Ollama, "llama3.1")
}
fn d_ollama_url() -> String {
    "http://localhost:11434".into()
}
fn d_openai_url() -> String {
    "https://api.openai.com".into()
}
fn d_anthropic_url() -> String {
    "https://api.anthropic.com".into()
}
fn d_azure_api_version() -> String {
    "2024-10-21".into()
}
fn d_embed_model() -> String {
    "nomic-embed-text".into()
}
fn d_azure_credential() -> CredentialConfig {
    CredentialConfig { key: None, env: Some("AZURE_OPENAI_API_KEY".into()) }
}
fn d_openai_credential() -> CredentialConfig {
    CredentialConfig { key: None, env: Some("OPENAI_API_KEY".into()) }
}
fn d_anthropic_credential() -> CredentialConfig {
    CredentialConfig { key: None, env: Some("ANTHROPIC_API_KEY".into()) }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_pricing_estimate_cost() {
        let pricing = ModelPricing {
            input_per_1m: 2.50,
            output_per_1m: 10.00,
        };
        // 1000 input tokens @ $2.50/1M = $0.0025
        // 500 output tokens @ $10.00/1M = $0.005
        let cost = pricing.estimate_cost(1000, 500);
        assert!((cost - 0.0075).abs() < 1e-10);
    }

    #[test]
    fn default_mode_is_hybrid_and_not_strict() {
        let policy = PolicyConfig::default();
        assert_eq!(policy.mode, RouterMode::Hybrid);
        assert!(!policy.strict);
        assert_eq!(policy.default_model.provider, Provider::Ollama);
    }

    #[test]
    fn local_providers_carry_no_credential() {
        let policy = PolicyConfig::default();
        assert!(policy.credential_for(Provider::Ollama).is_none());
        assert!(policy.credential_for(Provider::LocalEmbeddings).is_none());
        assert!(policy.credential_for(Provider::Anthropic).is_some());
    }

    #[test]
    fn feature_override_deserializes_from_toml() {
        let policy = PolicyConfig::from_toml_str(
            r#"
            mode = "local_only"
            strict = true

            [feature_overrides.code-review]
            provider = "ollama"
            model = "qwen2.5-coder"
            "#,
        )
        .unwrap();
        assert_eq!(policy.mode, RouterMode::LocalOnly);
        assert!(policy.strict);
        let or = policy.feature_overrides.get(&Capability::CodeReview).unwrap();
        assert_eq!(or.provider, Provider::Ollama);
        assert_eq!(or.model, "qwen2.5-coder");
    }

    #[test]
    fn invalid_toml_is_a_config_error() {
        let err = PolicyConfig::from_toml_str("mode = \"nope\"").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
