//! Bounded tool-calling loop.
//!
//! Drives repeated router calls plus caller-supplied tool execution until
//! the model stops requesting tools or the iteration bound is hit. One
//! failing tool never aborts the loop; its error is fed back to the model
//! as a textual result.

use crate::router::Router;
use crate::traits::ChatResponse;
use relay_domain::error::Result;
use relay_domain::tool::{Message, ToolChoice, ToolDefinition};
use serde_json::Value;

/// Default iteration bound.
pub const DEFAULT_MAX_ITERATIONS: usize = 10;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Executor trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Caller-supplied tool execution: `(name, args) -> result text`.
///
/// The executor may suspend on I/O; the loop awaits it without blocking
/// other loop instances. Errors are caught per call and converted to text.
#[async_trait::async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(&self, name: &str, arguments: &Value) -> Result<String>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ToolLoop
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Drives the `awaiting_model → executing_tools → … → done` cycle.
pub struct ToolLoop<'r> {
    router: &'r Router,
    max_iterations: usize,
}

impl<'r> ToolLoop<'r> {
    pub fn new(router: &'r Router) -> Self {
        Self {
            router,
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }

    pub fn with_max_iterations(router: &'r Router, max_iterations: usize) -> Self {
        Self {
            router,
            max_iterations,
        }
    }

    /// Run the loop to completion.
    ///
    /// Returns the first response that carries no tool calls, or — once the
    /// iteration bound is reached — the last model response as-is, with a
    /// warning logged. Never loops unboundedly, never fails because a tool
    /// failed.
    pub async fn run(
        &self,
        mut messages: Vec<Message>,
        tools: Vec<ToolDefinition>,
        tool_choice: ToolChoice,
        executor: &dyn ToolExecutor,
        agent_id: Option<&str>,
    ) -> Result<ChatResponse> {
        let mut iterations = 0usize;

        loop {
            iterations += 1;
            tracing::debug!(iteration = iterations, "tool loop: awaiting model");

            let resp = self
                .router
                .chat_with_tools(
                    messages.clone(),
                    tools.clone(),
                    tool_choice.clone(),
                    agent_id,
                )
                .await?;

            if resp.tool_calls.is_empty() {
                return Ok(resp);
            }

            if iterations >= self.max_iterations {
                tracing::warn!(
                    max_iterations = self.max_iterations,
                    "tool loop iteration bound reached, returning last response"
                );
                return Ok(resp);
            }

            // Record the model's tool requests, then execute each one.
            messages.push(Message::assistant_tool_calls(&resp.content, &resp.tool_calls));

            for call in &resp.tool_calls {
                tracing::debug!(
                    tool = %call.tool_name,
                    call_id = %call.call_id,
                    "tool loop: executing tool"
                );
                let (result_text, is_error) =
                    match executor.execute(&call.tool_name, &call.arguments).await {
                        Ok(text) => (text, false),
                        Err(e) => {
                            tracing::warn!(
                                tool = %call.tool_name,
                                call_id = %call.call_id,
                                error = %e,
                                "tool execution failed, feeding error back to the model"
                            );
                            (format!("tool '{}' failed: {e}", call.tool_name), true)
                        }
                    };
                messages.push(Message::tool_result(
                    &call.call_id,
                    &call.tool_name,
                    result_text,
                    is_error,
                ));
            }
        }
    }
}
