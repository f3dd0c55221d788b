//! Chat model seam and conversation message types.
//!
//! The pipeline never talks to a provider directly: the primary turn and
//! every follow-up go through the [`ChatModel`] trait, and streamed
//! output arrives as a [`TokenStream`] of plain text fragments. Fragment
//! boundaries carry no meaning — a marker or JSON object may be split
//! anywhere.

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::Stream;
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// A boxed stream of text fragments from the model.
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String, PipelineError>> + Send>>;

/// The role of a message in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instructions.
    System,
    /// User input.
    User,
    /// Assistant (model) output.
    Assistant,
    /// Tool execution outcome.
    Tool,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::System => write!(f, "system"),
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
            Self::Tool => write!(f, "tool"),
        }
    }
}

/// A message sent to the chat model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Who sent this message.
    pub role: Role,
    /// The message text.
    pub content: String,
}

impl Message {
    /// Create a message with the given role.
    pub fn text(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    /// Create a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::text(Role::System, content)
    }

    /// Create a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::text(Role::User, content)
    }

    /// Create an assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::text(Role::Assistant, content)
    }
}

/// A non-streamed model response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatResponse {
    /// The generated text.
    pub content: String,
}

/// Trait for the language model backing a conversation.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// One-shot request, used for follow-up turns after tool execution.
    async fn invoke(&self, messages: &[Message]) -> Result<ChatResponse, PipelineError>;

    /// Streamed request, used for the primary turn.
    async fn stream(&self, messages: &[Message]) -> Result<TokenStream, PipelineError>;
}
