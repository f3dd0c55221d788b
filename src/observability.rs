//! Structured tracing names and subscriber setup.
//!
//! Span and field names are defined once here so traces stay consistent
//! across the pipeline. The hierarchy:
//!
//! ```text
//! pipeline.turn
//!   └─> pipeline.tool.execute
//! ```

/// Span covering one full turn of a conversation.
pub const SPAN_TURN: &str = "pipeline.turn";

/// Span covering one tool execution (child of the turn span).
pub const SPAN_TOOL_EXECUTE: &str = "pipeline.tool.execute";

/// Conversation identifier field.
pub const FIELD_CONVERSATION_ID: &str = "conversation_id";

/// Tool name field.
pub const FIELD_TOOL_NAME: &str = "tool_name";

/// Tool call identifier field.
pub const FIELD_CALL_ID: &str = "call_id";

/// Initialize the process-wide tracing subscriber.
///
/// Respects `RUST_LOG`, defaulting to `info`, and writes to stderr so
/// stdout stays free for host IPC. Call once at startup; later calls are
/// ignored.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .try_init();
}
