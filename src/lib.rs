//! Murmur: streaming tool-call pipeline for a desktop voice assistant.
//!
//! This crate consumes an incremental token stream from a language
//! model, detects embedded tool-call directives mixed into the prose,
//! extracts and repairs them, executes them with bounded retry and
//! backoff, and feeds results back into the conversation — while
//! preserving exact incremental output to the user.
//!
//! # Architecture
//!
//! ```text
//! TokenStream ──> StreamToolParser ──┬──> display text (yielded immediately)
//!                                    └──> ToolCall ──> ToolExecutor
//!                                                        │
//!                          ConversationHistory <── outcome ──> ChatModel (follow-up)
//! ```
//!
//! The stream source, tool registry, history store, and model provider
//! are external collaborators behind narrow traits ([`model::ChatModel`],
//! [`executor::ToolInvoker`], [`history::ConversationHistory`]); this
//! crate owns only the parsing, retry, and orchestration logic in
//! between, plus the inline wire format:
//!
//! ```text
//! <tool>{"name": "<tool_name>", "parameters": { ... }}</tool>
//! ```

pub mod error;
pub mod executor;
pub mod history;
pub mod model;
pub mod observability;
pub mod parser;
pub mod turn;
pub mod types;

pub use error::{PipelineError, Result};
pub use executor::{ToolExecutor, ToolInvoker};
pub use history::{ConversationHistory, HistoryMessage, MemoryHistory};
pub use model::{ChatModel, ChatResponse, Message, Role, TokenStream};
pub use parser::{ProcessedFragment, StreamToolParser};
pub use turn::{FOLLOW_UP_SEPARATOR, INCOMPLETE_TOOL_NOTE, TurnEngine};
pub use types::{RetryPolicy, ToolCall, ToolCallStatus};
