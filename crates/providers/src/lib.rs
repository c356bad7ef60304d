pub mod anthropic;
pub mod ollama;
pub mod openai_compat;
pub mod probe;
pub mod registry;
pub mod router;
pub mod toolloop;
pub mod traits;
pub(crate) mod pricing;
pub(crate) mod util;

// Re-exports for convenience.
pub use registry::{can_handle, capabilities_of, AdapterRegistry, ProviderCapabilities};
pub use router::{CostReport, Router, StatsSnapshot, UsageStats};
pub use toolloop::{ToolExecutor, ToolLoop};
pub use traits::{
    ChatRequest, ChatResponse, EmbeddingsRequest, EmbeddingsResponse, ProviderAdapter,
};
