//! Core record and policy types for the tool-call pipeline.
//!
//! Provides [`ToolCall`] for tracking one tool invocation from detection
//! through terminal outcome, and [`RetryPolicy`] for controlling the
//! executor's backoff behavior.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default maximum retry attempts after the initial invocation.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default base delay for backoff in milliseconds.
pub const DEFAULT_BASE_DELAY_MS: u64 = 1000;

/// Default maximum delay in milliseconds (caps exponential growth).
pub const DEFAULT_MAX_DELAY_MS: u64 = 10_000;

/// Default error-message substrings treated as transient.
///
/// Matching is case-insensitive against the whole failure message.
pub const DEFAULT_RETRYABLE_ERRORS: &[&str] = &[
    "timeout",
    "timed out",
    "econnreset",
    "econnrefused",
    "etimedout",
    "socket hang up",
    "network",
    "rate limit",
    "429",
    "500",
    "502",
    "503",
];

/// Lifecycle state of a [`ToolCall`].
///
/// Transitions are monotonic: `Pending` → (`Executing` | `Retrying`)* →
/// (`Completed` | `Failed`). Once terminal, the record is immutable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallStatus {
    /// Parsed from the stream, not yet handed to the executor.
    Pending,
    /// First invocation attempt in flight.
    Executing,
    /// A later attempt in flight after at least one failure.
    Retrying,
    /// Invocation succeeded; `result` is set.
    Completed,
    /// All attempts exhausted or a non-retryable failure; `error` is set.
    Failed,
}

impl ToolCallStatus {
    /// Whether this status ends the record's lifecycle.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for ToolCallStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Executing => write!(f, "executing"),
            Self::Retrying => write!(f, "retrying"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// One tool invocation detected in the model's output stream.
///
/// Created with status [`Pending`](ToolCallStatus::Pending) when a complete
/// tool block is parsed; mutated only by the executor; immutable once
/// terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Session-unique identifier: `tool-<conversation>-<counter>`.
    pub id: String,
    /// The tool name requested by the model.
    pub name: String,
    /// Structured parameters (JSON object; `{}` when the block omits them).
    pub parameters: serde_json::Value,
    /// Current lifecycle state.
    pub status: ToolCallStatus,
    /// Success payload, present iff `Completed`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Terminal error message, present iff `Failed`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// When the call was parsed from the stream.
    pub start_time: DateTime<Utc>,
    /// When the call reached a terminal status.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    /// Index of the most recent attempt (0-based).
    pub retry_count: u32,
    /// Retry budget the executor ran (or will run) this call with.
    pub max_retries: u32,
    /// Failure messages from every attempt so far, in order.
    pub retry_errors: Vec<String>,
}

impl ToolCall {
    /// Create a freshly-parsed call awaiting execution.
    pub fn pending(
        id: impl Into<String>,
        name: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            parameters,
            status: ToolCallStatus::Pending,
            result: None,
            error: None,
            start_time: Utc::now(),
            end_time: None,
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_errors: Vec::new(),
        }
    }

    /// Whether the record has reached a terminal status.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Wall-clock duration from parse to terminal status, truncated to
    /// whole seconds. `None` until the call is terminal.
    pub fn duration_secs(&self) -> Option<u64> {
        let end = self.end_time?;
        let secs = (end - self.start_time).num_seconds();
        Some(secs.max(0) as u64)
    }
}

/// Retry policy for tool invocations.
///
/// Controls how many times a failed invocation is re-attempted, how long
/// to wait between attempts, and which failure messages count as
/// transient.
///
/// # Examples
///
/// ```
/// use murmur::types::RetryPolicy;
///
/// let policy = RetryPolicy::new()
///     .with_max_retries(2)
///     .with_base_delay_ms(500)
///     .with_exponential_backoff(false);
/// assert_eq!(policy.backoff_delay_ms(5), 500);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum retry attempts after the initial invocation.
    pub max_retries: u32,
    /// Base delay in milliseconds.
    pub base_delay_ms: u64,
    /// Maximum delay in milliseconds (caps exponential growth).
    pub max_delay_ms: u64,
    /// Double the delay each attempt when true; constant delay when false.
    pub exponential_backoff: bool,
    /// Substrings (matched case-insensitively) marking an error transient.
    pub retryable_errors: Vec<String>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            exponential_backoff: true,
            retryable_errors: DEFAULT_RETRYABLE_ERRORS
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
        }
    }
}

impl RetryPolicy {
    /// Create a policy with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum retry attempts.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the base delay in milliseconds.
    pub fn with_base_delay_ms(mut self, base_delay_ms: u64) -> Self {
        self.base_delay_ms = base_delay_ms;
        self
    }

    /// Set the maximum delay in milliseconds.
    pub fn with_max_delay_ms(mut self, max_delay_ms: u64) -> Self {
        self.max_delay_ms = max_delay_ms;
        self
    }

    /// Enable or disable exponential backoff.
    pub fn with_exponential_backoff(mut self, exponential: bool) -> Self {
        self.exponential_backoff = exponential;
        self
    }

    /// Replace the retryable error substrings.
    pub fn with_retryable_errors<I, S>(mut self, substrings: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.retryable_errors = substrings.into_iter().map(Into::into).collect();
        self
    }

    /// Pre-jitter delay for a given attempt (0-based), in milliseconds.
    ///
    /// Exponential: `min(base * 2^attempt, max)`. Constant: `base`.
    pub fn backoff_delay_ms(&self, attempt: u32) -> u64 {
        if self.exponential_backoff {
            let factor = 2u64.saturating_pow(attempt);
            self.base_delay_ms
                .saturating_mul(factor)
                .min(self.max_delay_ms)
        } else {
            self.base_delay_ms
        }
    }

    /// Sleep duration for a given attempt: pre-jitter delay plus up to
    /// 10% uniform jitter.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.backoff_delay_ms(attempt) as f64;
        let jitter = base * (rand::random::<f64>() * 0.1);
        Duration::from_millis((base + jitter) as u64)
    }

    /// Whether a failure message counts as transient under this policy.
    ///
    /// True iff the lower-cased message contains any configured substring
    /// (substrings are compared lower-cased as well).
    pub fn is_retryable(&self, error_message: &str) -> bool {
        let message = error_message.to_lowercase();
        self.retryable_errors
            .iter()
            .any(|s| message.contains(&s.to_lowercase()))
    }
}
