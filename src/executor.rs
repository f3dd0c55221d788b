//! Tool execution with bounded retry and backoff.
//!
//! The [`ToolExecutor`] drives one [`ToolCall`] from Pending to a
//! terminal status using an injected [`ToolInvoker`]. Transient failures
//! (classified by error-message substring) are retried per
//! [`RetryPolicy`] with backoff and jitter; everything else fails fast.
//! Execution never returns an error: a terminal failure is ordinary data
//! on the call record.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;

use crate::error::PipelineError;
use crate::observability::{FIELD_CALL_ID, FIELD_TOOL_NAME, SPAN_TOOL_EXECUTE};
use crate::types::{RetryPolicy, ToolCall, ToolCallStatus};

/// Executes a named tool with structured parameters.
///
/// Implementations own their own timeouts; the executor's only time axis
/// is the retry/backoff policy. The error message of a rejection is
/// inspected for retryability classification.
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    /// Run the tool and return its structured result.
    async fn invoke(
        &self,
        name: &str,
        parameters: &serde_json::Value,
    ) -> Result<serde_json::Value, PipelineError>;
}

/// Drives tool calls to a terminal status under a [`RetryPolicy`].
pub struct ToolExecutor {
    invoker: Arc<dyn ToolInvoker>,
    policy: RetryPolicy,
}

impl ToolExecutor {
    /// Create an executor around an invoker and policy.
    pub fn new(invoker: Arc<dyn ToolInvoker>, policy: RetryPolicy) -> Self {
        Self { invoker, policy }
    }

    /// The policy this executor runs with.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Execute `call` until it reaches a terminal status.
    ///
    /// The attempt loop resumes from `call.retry_count`, so a record that
    /// was partially retried picks up where it left off, and
    /// `retry_count` / `retry_errors` grow monotonically for anyone
    /// observing the record mid-flight. A record that is already
    /// terminal is left untouched.
    pub async fn execute(&self, call: &mut ToolCall) {
        if call.is_terminal() {
            tracing::debug!(call_id = %call.id, status = %call.status, "skipping terminal call");
            return;
        }

        let span = tracing::info_span!(
            SPAN_TOOL_EXECUTE,
            { FIELD_TOOL_NAME } = %call.name,
            { FIELD_CALL_ID } = %call.id,
        );
        let _enter = span.enter();

        call.max_retries = self.policy.max_retries;

        for attempt in call.retry_count..=self.policy.max_retries {
            call.status = if attempt == 0 {
                ToolCallStatus::Executing
            } else {
                ToolCallStatus::Retrying
            };
            tracing::debug!(tool_name = %call.name, attempt, "invoking tool");

            match self.invoker.invoke(&call.name, &call.parameters).await {
                Ok(result) => {
                    call.result = Some(result);
                    call.status = ToolCallStatus::Completed;
                    call.end_time = Some(Utc::now());
                    tracing::info!(
                        tool_name = %call.name,
                        attempts = attempt + 1,
                        duration_secs = call.duration_secs().unwrap_or(0),
                        "tool call completed"
                    );
                    return;
                }
                Err(err) => {
                    let message = err.to_string();
                    call.retry_errors.push(message.clone());
                    call.retry_count = attempt;

                    let retryable = self.policy.is_retryable(&message);
                    if !retryable || attempt == self.policy.max_retries {
                        call.error = Some(format!(
                            "Failed after {} attempts. Last error: {message}",
                            attempt + 1
                        ));
                        call.status = ToolCallStatus::Failed;
                        call.end_time = Some(Utc::now());
                        tracing::warn!(
                            tool_name = %call.name,
                            attempts = attempt + 1,
                            retryable,
                            "tool call failed terminally"
                        );
                        return;
                    }

                    let delay = self.policy.delay_for_attempt(attempt);
                    tracing::debug!(
                        tool_name = %call.name,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "transient tool failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
