//! Conversation history sink.
//!
//! The pipeline appends tool outcomes to an external, append-only
//! conversation record through the [`ConversationHistory`] trait.
//! Ordering matters: messages must be recorded in the order the pipeline
//! emits them. [`MemoryHistory`] is the in-process implementation used by
//! tests and embedding hosts without a persistent store.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::model::Role;

/// One entry in a conversation's history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryMessage {
    /// The conversation this entry belongs to.
    pub conversation_id: String,
    /// Who produced the entry.
    pub role: Role,
    /// The entry text.
    pub content: String,
    /// The tool that produced this entry, when role is [`Role::Tool`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    /// When the entry was recorded.
    pub timestamp: DateTime<Utc>,
}

impl HistoryMessage {
    /// Create an entry stamped with the current time.
    pub fn new(
        conversation_id: impl Into<String>,
        role: Role,
        content: impl Into<String>,
    ) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            role,
            content: content.into(),
            tool_name: None,
            timestamp: Utc::now(),
        }
    }

    /// Attach the originating tool name.
    pub fn with_tool_name(mut self, tool_name: impl Into<String>) -> Self {
        self.tool_name = Some(tool_name.into());
        self
    }
}

/// Append-only conversation record.
#[async_trait]
pub trait ConversationHistory: Send + Sync {
    /// Append one message. Implementations must preserve call order.
    async fn add_message(&self, message: HistoryMessage) -> Result<(), PipelineError>;
}

/// In-memory append-only history.
#[derive(Debug, Default)]
pub struct MemoryHistory {
    messages: Mutex<Vec<HistoryMessage>>,
}

impl MemoryHistory {
    /// Create an empty history.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all recorded messages, in insertion order.
    pub fn messages(&self) -> Vec<HistoryMessage> {
        self.messages
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Snapshot of one conversation's messages, in insertion order.
    pub fn for_conversation(&self, conversation_id: &str) -> Vec<HistoryMessage> {
        self.messages()
            .into_iter()
            .filter(|m| m.conversation_id == conversation_id)
            .collect()
    }
}

#[async_trait]
impl ConversationHistory for MemoryHistory {
    async fn add_message(&self, message: HistoryMessage) -> Result<(), PipelineError> {
        self.messages
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(message);
        Ok(())
    }
}
