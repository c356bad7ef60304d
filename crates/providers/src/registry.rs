//! Capability matrix and adapter registry.
//!
//! The capability matrix is static, read-only data: which provider supports
//! which capability, plus the per-provider facts the router's policy checks
//! need (credential requirement, locality, context window). The
//! [`AdapterRegistry`] holds the instantiated protocol adapters; adapters
//! that fail to initialize are logged and skipped so one bad endpoint
//! degrades one entry, not the whole registry.

use crate::anthropic::AnthropicAdapter;
use crate::ollama::OllamaAdapter;
use crate::openai_compat::OpenAiCompatAdapter;
use crate::traits::ProviderAdapter;
use relay_domain::capability::{Capability, Provider};
use relay_domain::config::PolicyConfig;
use relay_domain::error::Result;
use std::collections::HashMap;
use std::sync::Arc;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Capability matrix
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Static facts about one provider. Loaded once, never mutated.
#[derive(Debug, Clone, Copy)]
pub struct ProviderCapabilities {
    pub capabilities: &'static [Capability],
    pub requires_credential: bool,
    pub is_local: bool,
    pub is_free: bool,
    pub context_window_tokens: u32,
}

const OLLAMA_CAPS: ProviderCapabilities = ProviderCapabilities {
    capabilities: &[
        Capability::SimpleChat,
        Capability::ComplexChat,
        Capability::CodeReview,
        Capability::FunctionCalling,
        Capability::Embeddings,
    ],
    requires_credential: false,
    is_local: true,
    is_free: true,
    context_window_tokens: 32_768,
};

const AZURE_CAPS: ProviderCapabilities = ProviderCapabilities {
    capabilities: &[
        Capability::SimpleChat,
        Capability::ComplexChat,
        Capability::CodeReview,
        Capability::FunctionCalling,
        Capability::Vision,
        Capability::Embeddings,
        Capability::RealtimeVoice,
    ],
    requires_credential: true,
    is_local: false,
    is_free: false,
    context_window_tokens: 128_000,
};

const OPENAI_CAPS: ProviderCapabilities = ProviderCapabilities {
    capabilities: &[
        Capability::SimpleChat,
        Capability::ComplexChat,
        Capability::CodeReview,
        Capability::FunctionCalling,
        Capability::Vision,
        Capability::WebSearch,
        Capability::RealtimeVoice,
    ],
    requires_credential: true,
    is_local: false,
    is_free: false,
    context_window_tokens: 128_000,
};

const ANTHROPIC_CAPS: ProviderCapabilities = ProviderCapabilities {
    capabilities: &[
        Capability::SimpleChat,
        Capability::ComplexChat,
        Capability::CodeReview,
        Capability::FunctionCalling,
        Capability::Vision,
    ],
    requires_credential: true,
    is_local: false,
    is_free: false,
    context_window_tokens: 200_000,
};

const LOCAL_EMBEDDINGS_CAPS: ProviderCapabilities = ProviderCapabilities {
    capabilities: &[Capability::Embeddings],
    requires_credential: false,
    is_local: true,
    is_free: true,
    context_window_tokens: 8_192,
};

/// The static record for a provider.
pub fn capabilities_of(provider: Provider) -> &'static ProviderCapabilities {
    match provider {
        Provider::Ollama => &OLLAMA_CAPS,
        Provider::AzureOpenai => &AZURE_CAPS,
        Provider::Openai => &OPENAI_CAPS,
        Provider::Anthropic => &ANTHROPIC_CAPS,
        Provider::LocalEmbeddings => &LOCAL_EMBEDDINGS_CAPS,
    }
}

/// Pure membership test against the static matrix. Total: defined for every
/// (provider, capability) pair, never panics.
pub fn can_handle(provider: Provider, capability: Capability) -> bool {
    capabilities_of(provider).capabilities.contains(&capability)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// AdapterRegistry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Holds the instantiated protocol adapters, keyed by provider.
#[derive(Default)]
pub struct AdapterRegistry {
    adapters: HashMap<Provider, Arc<dyn ProviderAdapter>>,
}

impl AdapterRegistry {
    /// An empty registry. Tests insert fakes; production code uses
    /// [`AdapterRegistry::from_policy`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Build every adapter the policy describes.
    ///
    /// Adapters that fail to initialize are logged and skipped rather than
    /// aborting construction; a request routed to a missing adapter later
    /// surfaces as `ProviderUnavailable`.
    pub fn from_policy(policy: &PolicyConfig) -> Self {
        let mut registry = Self::new();

        let builders: [(Provider, Result<Arc<dyn ProviderAdapter>>); 5] = [
            (
                Provider::Ollama,
                OllamaAdapter::from_policy(policy).map(|a| Arc::new(a) as Arc<dyn ProviderAdapter>),
            ),
            (
                Provider::AzureOpenai,
                OpenAiCompatAdapter::azure(policy).map(|a| Arc::new(a) as Arc<dyn ProviderAdapter>),
            ),
            (
                Provider::Openai,
                OpenAiCompatAdapter::standard(policy).map(|a| Arc::new(a) as Arc<dyn ProviderAdapter>),
            ),
            (
                Provider::Anthropic,
                AnthropicAdapter::from_policy(policy).map(|a| Arc::new(a) as Arc<dyn ProviderAdapter>),
            ),
            (
                Provider::LocalEmbeddings,
                OllamaAdapter::embeddings_sidecar(policy).map(|a| Arc::new(a) as Arc<dyn ProviderAdapter>),
            ),
        ];

        for (provider, result) in builders {
            match result {
                Ok(adapter) => {
                    tracing::info!(provider = %provider, "registered protocol adapter");
                    registry.adapters.insert(provider, adapter);
                }
                Err(e) => {
                    tracing::warn!(
                        provider = %provider,
                        error = %e,
                        "failed to initialize protocol adapter, skipping"
                    );
                }
            }
        }

        registry
    }

    /// Register an adapter under its own provider id.
    pub fn insert(&mut self, adapter: Arc<dyn ProviderAdapter>) {
        self.adapters.insert(adapter.provider(), adapter);
    }

    /// Look up an adapter by provider.
    pub fn get(&self, provider: Provider) -> Option<Arc<dyn ProviderAdapter>> {
        self.adapters.get(&provider).cloned()
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }

    /// List registered providers in scan order.
    pub fn list_providers(&self) -> Vec<Provider> {
        Provider::ALL
            .into_iter()
            .filter(|p| self.adapters.contains_key(p))
            .collect()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
