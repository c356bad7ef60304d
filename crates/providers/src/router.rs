//! Policy-driven provider router.
//!
//! The router resolves a (provider, model) pair for each request from the
//! immutable policy and the static capability matrix, re-validates the
//! choice against mode restrictions and credential presence, dispatches to
//! the matching protocol adapter, and accounts usage and cost per provider.
//!
//! Resolution is a pure function of policy + matrix, so concurrent requests
//! need no lock; the usage counters are the only shared mutable state.

use crate::registry::{self, AdapterRegistry};
use crate::traits::{ChatRequest, ChatResponse, EmbeddingsRequest, EmbeddingsResponse};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use relay_domain::capability::{Capability, ModelRef, Provider};
use relay_domain::config::{PolicyConfig, RouterMode};
use relay_domain::error::{Error, Result};
use relay_domain::tool::{Message, ToolChoice, ToolDefinition};
use relay_domain::usage::Usage;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::time::Instant;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Savings estimate constants
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Assumed token volume of a typical call, used only for the savings figure.
const ASSUMED_TOKENS_PER_LOCAL_CALL: u64 = 1_500;

/// Reference cloud price in USD per million tokens, used only for the
/// savings figure.
const REFERENCE_CLOUD_USD_PER_1M: f64 = 10.0;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Usage accounting
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Per-provider accumulated usage.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ProviderUsage {
    pub calls: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub cost_usd: f64,
}

/// Additive per-provider counters, mutated only by the router around
/// successful dispatches.
#[derive(Default)]
pub struct UsageStats {
    per_provider: RwLock<HashMap<Provider, ProviderUsage>>,
    since: RwLock<Option<DateTime<Utc>>>,
}

impl UsageStats {
    fn record(&self, provider: Provider, usage: &Usage, cost_usd: f64) {
        {
            let mut since = self.since.write();
            if since.is_none() {
                *since = Some(Utc::now());
            }
        }
        let mut map = self.per_provider.write();
        let entry = map.entry(provider).or_default();
        entry.calls += 1;
        entry.prompt_tokens += usage.prompt_tokens as u64;
        entry.completion_tokens += usage.completion_tokens as u64;
        entry.cost_usd += cost_usd;
    }

    fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            since: *self.since.read(),
            per_provider: self.per_provider.read().clone(),
        }
    }

    fn reset(&self) {
        self.per_provider.write().clear();
        *self.since.write() = None;
    }
}

/// A point-in-time copy of the usage counters.
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    /// When the first recorded call happened (None if nothing recorded).
    pub since: Option<DateTime<Utc>>,
    pub per_provider: HashMap<Provider, ProviderUsage>,
}

impl StatsSnapshot {
    pub fn usage_for(&self, provider: Provider) -> ProviderUsage {
        self.per_provider.get(&provider).copied().unwrap_or_default()
    }

    pub fn total_calls(&self) -> u64 {
        self.per_provider.values().map(|u| u.calls).sum()
    }
}

/// Accumulated cost per provider plus the estimated cloud-cost savings from
/// local calls.
#[derive(Debug, Clone, Serialize)]
pub struct CostReport {
    pub per_provider: HashMap<Provider, f64>,
    pub total_usd: f64,
    /// Local call count × assumed per-call token volume × reference cloud
    /// unit price. A rough figure for dashboards, not an invoice.
    pub estimated_savings_usd: f64,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Router
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The routing-and-validation engine.
///
/// Holds an immutable [`PolicyConfig`] and the adapter registry; a policy
/// change requires constructing a new router.
pub struct Router {
    policy: PolicyConfig,
    adapters: AdapterRegistry,
    stats: UsageStats,
}

impl Router {
    /// Build from an already-constructed registry (the test path).
    pub fn new(adapters: AdapterRegistry, policy: PolicyConfig) -> Self {
        Self {
            policy,
            adapters,
            stats: UsageStats::default(),
        }
    }

    /// Build the registry from the policy and wrap it.
    pub fn from_policy(policy: PolicyConfig) -> Self {
        let adapters = AdapterRegistry::from_policy(&policy);
        Self::new(adapters, policy)
    }

    pub fn policy(&self) -> &PolicyConfig {
        &self.policy
    }

    // ── Resolution ─────────────────────────────────────────────────

    /// Resolve the (provider, model) pair for a capability.
    ///
    /// Precedence: agent override (verbatim, no capability re-check) →
    /// feature override → policy default if capable → strict failure →
    /// matrix scan in `Provider::ALL` order, filtered by the active mode.
    pub fn resolve(&self, capability: Capability, agent_id: Option<&str>) -> Result<ModelRef> {
        if let Some(id) = agent_id {
            if let Some(target) = self.policy.agent_overrides.get(id) {
                tracing::debug!(agent = id, target = %target, "agent override");
                return Ok(target.clone());
            }
        }

        if let Some(target) = self.policy.feature_overrides.get(&capability) {
            tracing::debug!(capability = %capability, target = %target, "feature override");
            return Ok(target.clone());
        }

        let default = &self.policy.default_model;
        if registry::can_handle(default.provider, capability) {
            return Ok(default.clone());
        }

        if self.policy.strict {
            return Err(Error::PolicyViolation(format!(
                "strict mode: default provider '{}' does not support '{}' \
                 and substitution is disabled",
                default.provider, capability
            )));
        }

        for provider in Provider::ALL {
            if !mode_permits(self.policy.mode, provider) {
                continue;
            }
            if registry::can_handle(provider, capability) {
                let target = ModelRef::new(provider, self.fallback_model(provider));
                tracing::debug!(
                    capability = %capability,
                    target = %target,
                    "matrix fallback"
                );
                return Ok(target);
            }
        }

        Err(Error::NoProviderAvailable(format!(
            "no provider supports '{}' under mode '{:?}'",
            capability, self.policy.mode
        )))
    }

    /// Re-assert mode restrictions and credential presence for a provider
    /// about to be dispatched to.
    pub fn validate(&self, provider: Provider) -> Result<()> {
        let caps = registry::capabilities_of(provider);

        match self.policy.mode {
            RouterMode::LocalOnly if !caps.is_local => {
                return Err(Error::PolicyViolation(format!(
                    "mode local-only forbids provider '{provider}'"
                )));
            }
            RouterMode::ManagedCloudOnly
                if !matches!(provider, Provider::AzureOpenai | Provider::LocalEmbeddings) =>
            {
                return Err(Error::PolicyViolation(format!(
                    "mode managed-cloud-only forbids provider '{provider}'"
                )));
            }
            _ => {}
        }

        if caps.requires_credential {
            let cred = self.policy.credential_for(provider).ok_or_else(|| {
                Error::ProviderUnavailable(format!("no credential block for '{provider}'"))
            })?;
            crate::util::resolve_credential(provider, cred)?;
        }

        Ok(())
    }

    // ── Dispatch ───────────────────────────────────────────────────

    /// Resolve, validate, dispatch, and account one chat completion.
    pub async fn chat_completion(
        &self,
        messages: Vec<Message>,
        capability: Capability,
        agent_id: Option<&str>,
    ) -> Result<ChatResponse> {
        let target = self.resolve(capability, agent_id)?;
        self.validate(target.provider)?;

        let req = ChatRequest {
            messages,
            model: Some(target.model.clone()),
            ..Default::default()
        };
        self.dispatch(target, capability, req).await
    }

    /// Same path as [`chat_completion`], fixed to the function-calling
    /// capability. A resolved provider outside the function-calling matrix
    /// row is allowed through with a warning — overrides are operator
    /// intent, and providers grow features faster than the static matrix.
    ///
    /// [`chat_completion`]: Router::chat_completion
    pub async fn chat_with_tools(
        &self,
        messages: Vec<Message>,
        tools: Vec<ToolDefinition>,
        tool_choice: ToolChoice,
        agent_id: Option<&str>,
    ) -> Result<ChatResponse> {
        let target = self.resolve(Capability::FunctionCalling, agent_id)?;
        self.validate(target.provider)?;

        if !registry::can_handle(target.provider, Capability::FunctionCalling) {
            tracing::warn!(
                provider = %target.provider,
                "provider is not listed as supporting function calling; proceeding anyway"
            );
        }

        let req = ChatRequest {
            messages,
            tools,
            tool_choice,
            model: Some(target.model.clone()),
            ..Default::default()
        };
        self.dispatch(target, Capability::FunctionCalling, req).await
    }

    /// Route an embeddings request through the same resolve/validate path.
    pub async fn embeddings(
        &self,
        input: Vec<String>,
        agent_id: Option<&str>,
    ) -> Result<EmbeddingsResponse> {
        let target = self.resolve(Capability::Embeddings, agent_id)?;
        self.validate(target.provider)?;

        let adapter = self.adapters.get(target.provider).ok_or_else(|| {
            Error::ProviderUnavailable(format!("no adapter registered for '{}'", target.provider))
        })?;
        let resp = adapter
            .embeddings(EmbeddingsRequest {
                input,
                model: Some(target.model.clone()),
            })
            .await?;
        self.stats.record(resp.provider, &Usage::default(), 0.0);
        Ok(resp)
    }

    async fn dispatch(
        &self,
        target: ModelRef,
        capability: Capability,
        req: ChatRequest,
    ) -> Result<ChatResponse> {
        let adapter = self.adapters.get(target.provider).ok_or_else(|| {
            Error::ProviderUnavailable(format!("no adapter registered for '{}'", target.provider))
        })?;

        let start = Instant::now();
        let resp = adapter.chat(req).await?;
        let duration_ms = start.elapsed().as_millis() as u64;

        tracing::info!(
            provider = %resp.provider,
            model = %resp.model,
            capability = %capability,
            duration_ms,
            prompt_tokens = resp.usage.prompt_tokens,
            completion_tokens = resp.usage.completion_tokens,
            cost_usd = resp.cost_usd,
            "chat completion"
        );

        self.stats.record(resp.provider, &resp.usage, resp.cost_usd);
        Ok(resp)
    }

    // ── Accounting ─────────────────────────────────────────────────

    /// A point-in-time snapshot of the per-provider counters.
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Accumulated cost per provider plus the estimated savings from
    /// serving calls locally instead of on a reference cloud provider.
    pub fn costs(&self) -> CostReport {
        let snapshot = self.stats.snapshot();

        let mut per_provider = HashMap::new();
        let mut total_usd = 0.0;
        let mut local_calls = 0u64;
        for (provider, usage) in &snapshot.per_provider {
            per_provider.insert(*provider, usage.cost_usd);
            total_usd += usage.cost_usd;
            if registry::capabilities_of(*provider).is_local {
                local_calls += usage.calls;
            }
        }

        let estimated_savings_usd = (local_calls * ASSUMED_TOKENS_PER_LOCAL_CALL) as f64
            * REFERENCE_CLOUD_USD_PER_1M
            / 1_000_000.0;

        CostReport {
            per_provider,
            total_usd,
            estimated_savings_usd,
        }
    }

    /// Clear the counters (tests).
    pub fn reset_stats(&self) {
        self.stats.reset();
    }

    // ── Internal helpers ───────────────────────────────────────────

    /// The model a matrix-fallback resolution uses for a provider the
    /// policy names no model for.
    fn fallback_model(&self, provider: Provider) -> String {
        if self.policy.default_model.provider == provider {
            return self.policy.default_model.model.clone();
        }
        match provider {
            Provider::Ollama => "llama3.1".into(),
            Provider::AzureOpenai => self.policy.azure.deployment.clone(),
            Provider::Openai => "gpt-4o".into(),
            Provider::Anthropic => "claude-sonnet-4-20250514".into(),
            Provider::LocalEmbeddings => self.policy.local_embeddings.model.clone(),
        }
    }
}

/// Whether the fallback scan may consider a provider under a mode.
fn mode_permits(mode: RouterMode, provider: Provider) -> bool {
    let caps = registry::capabilities_of(provider);
    match mode {
        RouterMode::LocalOnly => caps.is_local,
        RouterMode::ManagedCloudOnly => {
            matches!(provider, Provider::AzureOpenai | Provider::LocalEmbeddings)
        }
        RouterMode::Hybrid => true,
        RouterMode::CloudPreferred => !caps.is_local,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Process-wide accessor
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

static GLOBAL_ROUTER: OnceLock<Arc<Router>> = OnceLock::new();

/// Install a process-wide router. Returns false if one was already set.
/// A thin convenience for hosts that want a singleton; construction-by-hand
/// remains the primary API and the only one tests should use.
pub fn set_global(router: Arc<Router>) -> bool {
    GLOBAL_ROUTER.set(router).is_ok()
}

/// The process-wide router, if one was installed.
pub fn global() -> Option<Arc<Router>> {
    GLOBAL_ROUTER.get().cloned()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_permits_local_only_skips_cloud() {
        assert!(mode_permits(RouterMode::LocalOnly, Provider::Ollama));
        assert!(mode_permits(RouterMode::LocalOnly, Provider::LocalEmbeddings));
        assert!(!mode_permits(RouterMode::LocalOnly, Provider::Openai));
        assert!(!mode_permits(RouterMode::LocalOnly, Provider::AzureOpenai));
        assert!(!mode_permits(RouterMode::LocalOnly, Provider::Anthropic));
    }

    #[test]
    fn mode_permits_cloud_preferred_skips_local() {
        assert!(!mode_permits(RouterMode::CloudPreferred, Provider::Ollama));
        assert!(!mode_permits(
            RouterMode::CloudPreferred,
            Provider::LocalEmbeddings
        ));
        assert!(mode_permits(RouterMode::CloudPreferred, Provider::Anthropic));
    }

    #[test]
    fn mode_permits_managed_cloud_allows_embeddings_sidecar() {
        assert!(mode_permits(
            RouterMode::ManagedCloudOnly,
            Provider::AzureOpenai
        ));
        assert!(mode_permits(
            RouterMode::ManagedCloudOnly,
            Provider::LocalEmbeddings
        ));
        assert!(!mode_permits(RouterMode::ManagedCloudOnly, Provider::Openai));
    }

    #[test]
    fn hybrid_permits_everything() {
        for provider in Provider::ALL {
            assert!(mode_permits(RouterMode::Hybrid, provider));
        }
    }

    #[test]
    fn savings_math() {
        let router = Router::new(AdapterRegistry::new(), PolicyConfig::default());
        for _ in 0..4 {
            router.stats.record(Provider::Ollama, &Usage::new(10, 10), 0.0);
        }
        // 4 local calls x 1500 tokens x $10/1M = $0.06
        let report = router.costs();
        assert!((report.estimated_savings_usd - 0.06).abs() < 1e-10);
        assert_eq!(report.total_usd, 0.0);
    }

    #[test]
    fn reset_clears_counters() {
        let router = Router::new(AdapterRegistry::new(), PolicyConfig::default());
        router.stats.record(Provider::Openai, &Usage::new(100, 50), 0.01);
        assert_eq!(router.stats().total_calls(), 1);
        router.reset_stats();
        let snapshot = router.stats();
        assert_eq!(snapshot.total_calls(), 0);
        assert!(snapshot.since.is_none());
    }
}
