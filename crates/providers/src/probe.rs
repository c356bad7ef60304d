//! Local inference server probe.
//!
//! Health check, model listing, a best-effort GPU heuristic, and name-based
//! capability inference for models installed on the local server. The probe
//! never surfaces raw transport errors from `health_check`; an unreachable
//! server yields a structured report with a remediation hint.

use crate::util::from_reqwest;
use relay_domain::capability::Capability;
use relay_domain::config::PolicyConfig;
use relay_domain::error::{Error, Result};
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Constants
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Timeout for probe requests. Health checks should fail fast.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Timeout for model pulls, which download gigabytes.
const PULL_TIMEOUT: Duration = Duration::from_secs(1800);

/// Known model-name prefixes and the capabilities they imply. Longest
/// prefixes must come before their shorter siblings. Names that match no
/// row are assumed chat-only.
const KNOWN_MODEL_PREFIXES: &[(&str, &[Capability])] = &[
    ("qwen2.5-coder", &[Capability::SimpleChat, Capability::CodeReview, Capability::FunctionCalling]),
    ("qwen", &[Capability::SimpleChat, Capability::ComplexChat, Capability::FunctionCalling]),
    ("deepseek-coder", &[Capability::SimpleChat, Capability::CodeReview]),
    ("deepseek-r1", &[Capability::SimpleChat, Capability::ComplexChat, Capability::CodeReview]),
    ("codellama", &[Capability::SimpleChat, Capability::CodeReview]),
    ("codegemma", &[Capability::SimpleChat, Capability::CodeReview]),
    ("starcoder", &[Capability::CodeReview]),
    ("llama", &[Capability::SimpleChat, Capability::ComplexChat, Capability::FunctionCalling]),
    ("mistral", &[Capability::SimpleChat, Capability::ComplexChat, Capability::FunctionCalling]),
    ("mixtral", &[Capability::SimpleChat, Capability::ComplexChat, Capability::FunctionCalling]),
    ("gemma", &[Capability::SimpleChat, Capability::ComplexChat]),
    ("phi", &[Capability::SimpleChat]),
    ("llava", &[Capability::SimpleChat, Capability::Vision]),
    ("bakllava", &[Capability::SimpleChat, Capability::Vision]),
    ("moondream", &[Capability::SimpleChat, Capability::Vision]),
    ("nomic-embed", &[Capability::Embeddings]),
    ("mxbai-embed", &[Capability::Embeddings]),
    ("all-minilm", &[Capability::Embeddings]),
    ("snowflake-arctic-embed", &[Capability::Embeddings]),
];

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// HealthReport
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Outcome of a health check. Always produced, never an error.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub available: bool,
    /// Server version string, when reachable.
    pub version: Option<String>,
    /// Installed model names, when reachable.
    pub models: Vec<String>,
    /// Best-effort accelerator detection.
    pub gpu_detected: bool,
    /// Human-readable remediation hint, when unreachable.
    pub hint: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LocalServiceProbe
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Probes a local Ollama-compatible server over its management endpoints.
pub struct LocalServiceProbe {
    base_url: String,
    client: reqwest::Client,
}

impl LocalServiceProbe {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(PROBE_TIMEOUT)
            .build()
            .map_err(from_reqwest)?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn from_policy(policy: &PolicyConfig) -> Result<Self> {
        Self::new(&policy.ollama.base_url)
    }

    /// Contact the server's version endpoint and, on success, list installed
    /// models and detect accelerator availability. Connection failures and
    /// timeouts yield an unavailable report with a remediation hint.
    pub async fn health_check(&self) -> HealthReport {
        let url = format!("{}/api/version", self.base_url);
        let version = match self.get_json(&url).await {
            Ok(body) => body
                .get("version")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "local server health check failed");
                return HealthReport {
                    available: false,
                    version: None,
                    models: Vec::new(),
                    gpu_detected: false,
                    hint: Some(format!(
                        "local model server unreachable at {} — start it with \
                         `ollama serve` or point ollama.base_url at a running instance",
                        self.base_url
                    )),
                };
            }
        };

        let models = match self.list_models().await {
            Ok(models) => models,
            Err(e) => {
                tracing::warn!(error = %e, "model listing failed, reporting none");
                Vec::new()
            }
        };

        HealthReport {
            available: true,
            version,
            models,
            gpu_detected: self.gpu_available().await,
            hint: None,
        }
    }

    /// Installed model names from the tags endpoint.
    pub async fn list_models(&self) -> Result<Vec<String>> {
        let url = format!("{}/api/tags", self.base_url);
        let body = self.get_json(&url).await?;
        Ok(body
            .get("models")
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|m| m.get("name").and_then(|v| v.as_str()))
                    .map(|s| s.to_string())
                    .collect()
            })
            .unwrap_or_default())
    }

    /// Ask the server to pull a model. Blocks until the pull completes.
    pub async fn pull_model(&self, name: &str) -> Result<()> {
        let url = format!("{}/api/pull", self.base_url);
        let client = reqwest::Client::builder()
            .timeout(PULL_TIMEOUT)
            .build()
            .map_err(from_reqwest)?;

        tracing::info!(model = name, "pulling model");
        let resp = client
            .post(&url)
            .json(&serde_json::json!({ "name": name, "stream": false }))
            .send()
            .await
            .map_err(from_reqwest)?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.map_err(from_reqwest)?;
            return Err(Error::Provider {
                provider: "ollama".into(),
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }

    /// Best-effort GPU heuristic: a loaded model reporting nonzero
    /// accelerator memory wins; otherwise fall back to looking for an
    /// accelerator-management CLI on the search path.
    async fn gpu_available(&self) -> bool {
        let url = format!("{}/api/ps", self.base_url);
        match self.get_json(&url).await {
            Ok(body) => {
                let vram_in_use = body
                    .get("models")
                    .and_then(|v| v.as_array())
                    .map(|arr| {
                        arr.iter().any(|m| {
                            m.get("size_vram").and_then(|v| v.as_u64()).unwrap_or(0) > 0
                        })
                    })
                    .unwrap_or(false);
                if vram_in_use {
                    return true;
                }
                accelerator_cli_on_path()
            }
            Err(_) => accelerator_cli_on_path(),
        }
    }

    async fn get_json(&self, url: &str) -> Result<Value> {
        let resp = self.client.get(url).send().await.map_err(from_reqwest)?;
        let status = resp.status();
        let text = resp.text().await.map_err(from_reqwest)?;
        if !status.is_success() {
            return Err(Error::Provider {
                provider: "ollama".into(),
                status: status.as_u16(),
                body: text,
            });
        }
        Ok(serde_json::from_str(&text)?)
    }
}

/// Look for a known accelerator-management CLI anywhere on `PATH`.
fn accelerator_cli_on_path() -> bool {
    let Some(path) = std::env::var_os("PATH") else {
        return false;
    };
    for dir in std::env::split_paths(&path) {
        for cli in ["nvidia-smi", "rocm-smi"] {
            if dir.join(cli).is_file() {
                return true;
            }
        }
    }
    false
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Capability inference
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Infer what an installed model can do from its name.
///
/// The version tag (`llama3.1:8b-instruct` → `llama3.1`) is stripped, then
/// the base name is matched against the known-prefix table. Unrecognized
/// names are assumed chat-only.
pub fn infer_capabilities(model_name: &str) -> Vec<Capability> {
    let base = base_name(model_name);
    for (prefix, capabilities) in KNOWN_MODEL_PREFIXES {
        if base.starts_with(prefix) {
            return capabilities.to_vec();
        }
    }
    vec![Capability::SimpleChat]
}

/// Strip the `:tag` suffix from a model name.
fn base_name(model_name: &str) -> &str {
    model_name.split(':').next().unwrap_or(model_name)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
