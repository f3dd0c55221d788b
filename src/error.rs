//! Error types for the tool-call pipeline.
//!
//! Each error variant carries a stable error code (SCREAMING_SNAKE_CASE)
//! that is included in the Display output and accessible via
//! [`PipelineError::code()`]. Codes are part of the public API contract
//! and will not change.

/// Stable error codes for programmatic error handling.
///
/// These codes never change and form part of the public API contract.
/// Use these for distinguishing errors rather than parsing Display output.
pub mod error_codes {
    /// The token stream source failed mid-turn.
    pub const STREAM_FAILED: &str = "STREAM_FAILED";

    /// A chat model request (follow-up or primary) failed.
    pub const MODEL_FAILED: &str = "MODEL_FAILED";

    /// Tool invocation failed.
    pub const TOOL_FAILED: &str = "TOOL_FAILED";

    /// Tool invocation or model request timed out.
    pub const TIMEOUT_ERROR: &str = "TIMEOUT_ERROR";

    /// The conversation history sink rejected a message.
    pub const HISTORY_FAILED: &str = "HISTORY_FAILED";
}

/// Errors produced by the pipeline.
///
/// Each variant includes a stable error code accessible via
/// [`PipelineError::code()`]. The Display impl formats as `[CODE] message`.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// The token stream source failed mid-turn.
    #[error("[{}] {}", error_codes::STREAM_FAILED, .0)]
    StreamError(String),

    /// A chat model request failed.
    #[error("[{}] {}", error_codes::MODEL_FAILED, .0)]
    ModelError(String),

    /// Tool invocation failed.
    #[error("[{}] {}", error_codes::TOOL_FAILED, .0)]
    ToolError(String),

    /// Tool invocation or model request timed out.
    #[error("[{}] {}", error_codes::TIMEOUT_ERROR, .0)]
    TimeoutError(String),

    /// The conversation history sink rejected a message.
    #[error("[{}] {}", error_codes::HISTORY_FAILED, .0)]
    HistoryError(String),
}

impl PipelineError {
    /// Returns the stable error code for this error.
    ///
    /// Codes are SCREAMING_SNAKE_CASE strings that remain stable across
    /// releases. Use these for programmatic error handling rather than
    /// parsing Display output.
    pub fn code(&self) -> &'static str {
        match self {
            Self::StreamError(_) => error_codes::STREAM_FAILED,
            Self::ModelError(_) => error_codes::MODEL_FAILED,
            Self::ToolError(_) => error_codes::TOOL_FAILED,
            Self::TimeoutError(_) => error_codes::TIMEOUT_ERROR,
            Self::HistoryError(_) => error_codes::HISTORY_FAILED,
        }
    }

    /// Returns the inner message without the code prefix.
    pub fn message(&self) -> &str {
        match self {
            Self::StreamError(m)
            | Self::ModelError(m)
            | Self::ToolError(m)
            | Self::TimeoutError(m)
            | Self::HistoryError(m) => m,
        }
    }
}

/// Convenience alias for pipeline results.
pub type Result<T> = std::result::Result<T, PipelineError>;
