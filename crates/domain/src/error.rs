/// Shared error type used across all ModelRelay crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("timeout: {0}")]
    Timeout(String),

    /// The routing policy forbids the provider that would serve the request
    /// (strict mode, or a mode restriction at validation time).
    #[error("policy violation: {0}")]
    PolicyViolation(String),

    /// A provider exists but cannot be used right now — missing credential,
    /// unreachable local server, or no adapter registered for it.
    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// No provider in the capability matrix can serve the request under the
    /// active mode. A configuration problem, not a transient failure.
    #[error("no provider available: {0}")]
    NoProviderAvailable(String),

    /// Non-success response from a backend. Carries the HTTP status and the
    /// raw body; the router never retries on its own.
    #[error("provider {provider} returned HTTP {status}: {body}")]
    Provider {
        provider: String,
        status: u16,
        body: String,
    },

    /// A caller-supplied tool executor failed. The tool loop catches this
    /// per call and feeds it back to the model as text.
    #[error("tool execution: {0}")]
    ToolExecution(String),

    #[error("config: {0}")]
    Config(String),

    #[error("auth: {0}")]
    Auth(String),
}

pub type Result<T> = std::result::Result<T, Error>;
