//! Shared domain types for ModelRelay.
//!
//! Everything here is pure data: enumerations, the unified message/tool
//! model, the policy configuration, and the workspace-wide error type.
//! No I/O, no async.

pub mod capability;
pub mod config;
pub mod error;
pub mod tool;
pub mod usage;

pub use capability::{Capability, ModelRef, Provider};
pub use config::PolicyConfig;
pub use error::{Error, Result};
pub use tool::{ContentPart, Message, MessageContent, Role, ToolCall, ToolChoice, ToolDefinition};
pub use usage::Usage;
