//! Router policy integration tests — resolution, validation, and accounting
//! across fake adapters. No network, fully deterministic.

use relay_domain::capability::{Capability, ModelRef, Provider};
use relay_domain::config::{PolicyConfig, RouterMode};
use relay_domain::error::Error;
use relay_domain::tool::{Message, ToolChoice};
use relay_domain::usage::Usage;
use relay_providers::traits::{
    ChatRequest, ChatResponse, EmbeddingsRequest, EmbeddingsResponse, ProviderAdapter,
};
use relay_providers::{AdapterRegistry, Router};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Fake adapter
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// An in-process adapter that records call counts and answers with canned
/// content. Cost per call is fixed (0 for locals, like the real adapters).
struct FakeAdapter {
    provider: Provider,
    cost_per_call: f64,
    calls: AtomicU64,
}

impl FakeAdapter {
    fn new(provider: Provider, cost_per_call: f64) -> Arc<Self> {
        Arc::new(Self {
            provider,
            cost_per_call,
            calls: AtomicU64::new(0),
        })
    }

    fn call_count(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl ProviderAdapter for FakeAdapter {
    async fn chat(&self, req: ChatRequest) -> relay_domain::error::Result<ChatResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(ChatResponse {
            content: "ok".into(),
            provider: self.provider,
            model: req.model.unwrap_or_else(|| "fake".into()),
            usage: Usage::new(10, 5),
            cost_usd: self.cost_per_call,
            tool_calls: Vec::new(),
            finish_reason: Some("stop".into()),
        })
    }

    async fn embeddings(
        &self,
        req: EmbeddingsRequest,
    ) -> relay_domain::error::Result<EmbeddingsResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(EmbeddingsResponse {
            embeddings: vec![vec![0.0; 4]; req.input.len()],
            provider: self.provider,
        })
    }

    fn estimate_cost(&self, _usage: &Usage, _model: &str) -> f64 {
        self.cost_per_call
    }

    fn provider(&self) -> Provider {
        self.provider
    }
}

/// A registry of fakes for every provider, returning the fakes for
/// counter inspection.
fn fake_registry() -> (AdapterRegistry, Vec<Arc<FakeAdapter>>) {
    let mut registry = AdapterRegistry::new();
    let mut fakes = Vec::new();
    for provider in Provider::ALL {
        let cost = if relay_providers::capabilities_of(provider).is_local {
            0.0
        } else {
            0.01
        };
        let fake = FakeAdapter::new(provider, cost);
        registry.insert(fake.clone());
        fakes.push(fake);
    }
    (registry, fakes)
}

fn local_default_policy() -> PolicyConfig {
    PolicyConfig {
        default_model: ModelRef::new(Provider::Ollama, "m1"),
        ..Default::default()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Resolution precedence
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[test]
fn agent_override_beats_feature_override_and_default() {
    let mut policy = local_default_policy();
    policy.feature_overrides.insert(
        Capability::CodeReview,
        ModelRef::new(Provider::Openai, "gpt-4o"),
    );
    policy.agent_overrides.insert(
        "reviewer".into(),
        ModelRef::new(Provider::Anthropic, "claude-sonnet-4-20250514"),
    );
    let (registry, _) = fake_registry();
    let router = Router::new(registry, policy);

    let resolved = router
        .resolve(Capability::CodeReview, Some("reviewer"))
        .unwrap();
    assert_eq!(resolved.provider, Provider::Anthropic);

    // Without the agent, the feature override applies.
    let resolved = router.resolve(Capability::CodeReview, None).unwrap();
    assert_eq!(resolved.provider, Provider::Openai);

    // Without either, the capable default applies.
    let resolved = router.resolve(Capability::SimpleChat, None).unwrap();
    assert_eq!(resolved, ModelRef::new(Provider::Ollama, "m1"));
}

#[test]
fn agent_override_skips_capability_check() {
    // The sidecar supports nothing but embeddings, yet an explicit agent
    // override to it resolves verbatim.
    let mut policy = local_default_policy();
    policy.agent_overrides.insert(
        "embedder".into(),
        ModelRef::new(Provider::LocalEmbeddings, "nomic-embed-text"),
    );
    let (registry, _) = fake_registry();
    let router = Router::new(registry, policy);

    let resolved = router
        .resolve(Capability::ComplexChat, Some("embedder"))
        .unwrap();
    assert_eq!(resolved.provider, Provider::LocalEmbeddings);
}

#[test]
fn unknown_agent_falls_through_to_default() {
    let (registry, _) = fake_registry();
    let router = Router::new(registry, local_default_policy());
    let resolved = router
        .resolve(Capability::SimpleChat, Some("nobody"))
        .unwrap();
    assert_eq!(resolved.provider, Provider::Ollama);
}

#[test]
fn hybrid_fallback_is_deterministic() {
    // The default (local) provider lacks web-search; exactly one matrix
    // entry supports it under hybrid mode.
    let (registry, _) = fake_registry();
    let router = Router::new(registry, local_default_policy());
    let resolved = router.resolve(Capability::WebSearch, None).unwrap();
    assert_eq!(resolved.provider, Provider::Openai);
    assert_eq!(resolved.model, "gpt-4o");
}

#[test]
fn local_only_scan_finds_no_cloud_capability() {
    let mut policy = local_default_policy();
    policy.mode = RouterMode::LocalOnly;
    let (registry, _) = fake_registry();
    let router = Router::new(registry, policy);

    let err = router.resolve(Capability::Vision, None).unwrap_err();
    assert!(matches!(err, Error::NoProviderAvailable(_)));
}

#[test]
fn cloud_preferred_scan_skips_local_providers() {
    // Embeddings would normally fall to the local sidecar first in scan
    // order; cloud-preferred skips it and lands on Azure.
    let mut policy = PolicyConfig {
        default_model: ModelRef::new(Provider::Anthropic, "claude-sonnet-4-20250514"),
        ..Default::default()
    };
    policy.mode = RouterMode::CloudPreferred;
    policy.azure.deployment = "embed-prod".into();
    let (registry, _) = fake_registry();
    let router = Router::new(registry, policy);

    let resolved = router.resolve(Capability::Embeddings, None).unwrap();
    assert_eq!(resolved.provider, Provider::AzureOpenai);
    assert_eq!(resolved.model, "embed-prod");
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Strict mode
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn strict_local_only_raises_policy_violation_with_zero_calls() {
    // policy = {mode: local-only, strict: true, default: local/"m1"};
    // vision is cloud-only in the matrix.
    let mut policy = local_default_policy();
    policy.mode = RouterMode::LocalOnly;
    policy.strict = true;
    let (registry, fakes) = fake_registry();
    let router = Router::new(registry, policy);

    let err = router
        .chat_completion(vec![Message::user("describe this image")], Capability::Vision, None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::PolicyViolation(_)));

    // No adapter was touched and nothing was recorded.
    for fake in &fakes {
        assert_eq!(fake.call_count(), 0, "{} was called", fake.provider());
    }
    assert_eq!(router.stats().total_calls(), 0);
}

#[test]
fn strict_forbids_substitution_even_in_hybrid() {
    let mut policy = local_default_policy();
    policy.strict = true;
    let (registry, _) = fake_registry();
    let router = Router::new(registry, policy);

    // Hybrid mode would happily fall back to openai; strict forbids it.
    let err = router.resolve(Capability::WebSearch, None).unwrap_err();
    assert!(matches!(err, Error::PolicyViolation(_)));
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[test]
fn local_only_validate_rejects_every_cloud_provider() {
    let mut policy = local_default_policy();
    policy.mode = RouterMode::LocalOnly;
    let (registry, _) = fake_registry();
    let router = Router::new(registry, policy);

    for provider in [Provider::AzureOpenai, Provider::Openai, Provider::Anthropic] {
        let err = router.validate(provider).unwrap_err();
        assert!(matches!(err, Error::PolicyViolation(_)), "{provider}");
    }
    router.validate(Provider::Ollama).unwrap();
    router.validate(Provider::LocalEmbeddings).unwrap();
}

#[test]
fn managed_cloud_only_validate_allows_azure_and_sidecar() {
    let mut policy = PolicyConfig {
        default_model: ModelRef::new(Provider::AzureOpenai, "gpt-4o-prod"),
        ..Default::default()
    };
    policy.mode = RouterMode::ManagedCloudOnly;
    policy.azure.credential.key = Some("test-key".into());
    let (registry, _) = fake_registry();
    let router = Router::new(registry, policy);

    router.validate(Provider::AzureOpenai).unwrap();
    router.validate(Provider::LocalEmbeddings).unwrap();
    for provider in [Provider::Ollama, Provider::Openai, Provider::Anthropic] {
        let err = router.validate(provider).unwrap_err();
        assert!(matches!(err, Error::PolicyViolation(_)), "{provider}");
    }
}

#[test]
fn missing_credential_is_named_in_the_error() {
    let mut policy = PolicyConfig::default();
    policy.openai.credential.env = Some("RELAY_POLICY_TEST_NO_SUCH_KEY".into());
    let (registry, _) = fake_registry();
    let router = Router::new(registry, policy);

    let err = router.validate(Provider::Openai).unwrap_err();
    assert!(matches!(err, Error::ProviderUnavailable(_)));
    assert!(err.to_string().contains("RELAY_POLICY_TEST_NO_SUCH_KEY"));
}

#[test]
fn configured_key_passes_validation() {
    let mut policy = PolicyConfig::default();
    policy.anthropic.credential.key = Some("sk-ant-test".into());
    let (registry, _) = fake_registry();
    let router = Router::new(registry, policy);
    router.validate(Provider::Anthropic).unwrap();
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Accounting
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn local_calls_accumulate_zero_cost() {
    let (registry, _) = fake_registry();
    let router = Router::new(registry, local_default_policy());

    for _ in 0..25 {
        let resp = router
            .chat_completion(vec![Message::user("hi")], Capability::SimpleChat, None)
            .await
            .unwrap();
        assert_eq!(resp.provider, Provider::Ollama);
        assert_eq!(resp.cost_usd, 0.0);
    }

    let snapshot = router.stats();
    let local = snapshot.usage_for(Provider::Ollama);
    assert_eq!(local.calls, 25);
    assert_eq!(local.cost_usd, 0.0);

    let report = router.costs();
    assert_eq!(report.per_provider.get(&Provider::Ollama), Some(&0.0));
    // 25 local calls worth of estimated savings.
    assert!(report.estimated_savings_usd > 0.0);
}

#[tokio::test]
async fn cloud_calls_record_cost_and_response_names_actual_provider() {
    let mut policy = PolicyConfig {
        default_model: ModelRef::new(Provider::Openai, "gpt-4o"),
        ..Default::default()
    };
    policy.openai.credential.key = Some("sk-test".into());
    let (registry, fakes) = fake_registry();
    let router = Router::new(registry, policy);

    let resp = router
        .chat_completion(vec![Message::user("hi")], Capability::ComplexChat, None)
        .await
        .unwrap();
    assert_eq!(resp.provider, Provider::Openai);

    let openai_fake = fakes
        .iter()
        .find(|f| f.provider() == Provider::Openai)
        .unwrap();
    assert_eq!(openai_fake.call_count(), 1);

    let snapshot = router.stats();
    let usage = snapshot.usage_for(Provider::Openai);
    assert_eq!(usage.calls, 1);
    assert!((usage.cost_usd - 0.01).abs() < 1e-12);
    assert_eq!(usage.prompt_tokens, 10);
    assert_eq!(usage.completion_tokens, 5);
}

#[tokio::test]
async fn reset_stats_zeroes_everything() {
    let (registry, _) = fake_registry();
    let router = Router::new(registry, local_default_policy());
    router
        .chat_completion(vec![Message::user("hi")], Capability::SimpleChat, None)
        .await
        .unwrap();
    assert_eq!(router.stats().total_calls(), 1);

    router.reset_stats();
    assert_eq!(router.stats().total_calls(), 0);
    assert_eq!(router.costs().total_usd, 0.0);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool path and embeddings
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn chat_with_tools_soft_checks_the_matrix() {
    // Agent override points at the embeddings sidecar, which is not in the
    // function-calling row. The call proceeds anyway (warn, not error).
    let mut policy = local_default_policy();
    policy.agent_overrides.insert(
        "odd-agent".into(),
        ModelRef::new(Provider::LocalEmbeddings, "nomic-embed-text"),
    );
    let (registry, fakes) = fake_registry();
    let router = Router::new(registry, policy);

    let resp = router
        .chat_with_tools(
            vec![Message::user("hi")],
            Vec::new(),
            ToolChoice::Auto,
            Some("odd-agent"),
        )
        .await
        .unwrap();
    assert_eq!(resp.provider, Provider::LocalEmbeddings);

    let sidecar_fake = fakes
        .iter()
        .find(|f| f.provider() == Provider::LocalEmbeddings)
        .unwrap();
    assert_eq!(sidecar_fake.call_count(), 1);
}

#[tokio::test]
async fn embeddings_route_to_the_local_sidecar_by_default() {
    // The local default ollama/"m1" supports embeddings, so the default
    // serves them; a feature override pins the sidecar explicitly.
    let mut policy = local_default_policy();
    policy.feature_overrides.insert(
        Capability::Embeddings,
        ModelRef::new(Provider::LocalEmbeddings, "nomic-embed-text"),
    );
    let (registry, _) = fake_registry();
    let router = Router::new(registry, policy);

    let resp = router.embeddings(vec!["hello".into()], None).await.unwrap();
    assert_eq!(resp.provider, Provider::LocalEmbeddings);
    assert_eq!(resp.embeddings.len(), 1);
}
