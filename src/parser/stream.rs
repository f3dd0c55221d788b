//! Incremental tool-block parser for a streamed model response.
//!
//! The [`StreamToolParser`] consumes arbitrary fragments of the model's
//! text output, separates pass-through display text from embedded tool
//! blocks, and emits a [`ToolCall`] for each block that parses. Markers
//! may be torn across fragment boundaries; no byte of input is ever lost
//! or duplicated, and behavior is identical for any re-fragmentation of
//! the same text.
//!
//! One parser instance belongs to one conversation. There is no shared
//! or global state: construct a fresh parser per conversation (or reuse
//! one across turns via [`reset()`](StreamToolParser::reset)).
//!
//! # Usage
//!
//! ```
//! use murmur::parser::StreamToolParser;
//!
//! let mut parser = StreamToolParser::new("conv-1");
//! let out = parser.process_fragment("Sure. <too");
//! assert_eq!(out.display_text, "Sure. ");
//!
//! let out = parser.process_fragment("l>{\"name\":\"ping\"}</tool>");
//! assert_eq!(out.completed_calls.len(), 1);
//! assert_eq!(out.completed_calls[0].name, "ping");
//! ```

use crate::parser::extract::parse_block;
use crate::parser::scan::{self, Marker, TOOL_CLOSE, TOOL_OPEN};
use crate::types::ToolCall;

/// Output of one [`process_fragment`](StreamToolParser::process_fragment)
/// step.
#[derive(Debug, Clone, Default)]
pub struct ProcessedFragment {
    /// Text safe to show the user immediately.
    pub display_text: String,
    /// Tool calls whose blocks completed in this fragment, in detection
    /// order, status Pending.
    pub completed_calls: Vec<ToolCall>,
    /// Best-effort reconstruction of a still-open block, for diagnostics
    /// and recovery only. Never shown to the user.
    pub pending_raw: Option<String>,
}

/// Per-conversation incremental parser state.
///
/// Holds a depth-indexed arena of block buffers (one per open block,
/// arbitrary nesting supported), a pending buffer for a possibly torn
/// marker, and the monotonic call-id counter. The arena and pending
/// buffer are both empty exactly when the parser is outside any block.
#[derive(Debug)]
pub struct StreamToolParser {
    conversation_id: String,
    /// Block content buffers, indexed by depth. `len()` is the current
    /// nesting depth; text routes to the last entry while non-empty.
    blocks: Vec<String>,
    /// Fragment tail that may be the start of a marker.
    pending: String,
    /// Next call sequence number. Survives `reset()` so ids stay unique
    /// for the life of the conversation.
    next_call: u64,
}

impl StreamToolParser {
    /// Create a parser for one conversation.
    pub fn new(conversation_id: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            blocks: Vec::new(),
            pending: String::new(),
            next_call: 0,
        }
    }

    /// Current block nesting depth.
    pub fn depth(&self) -> usize {
        self.blocks.len()
    }

    /// Process one fragment of the model's output.
    ///
    /// The fragment may split markers, JSON, or UTF-8 sequences at any
    /// byte boundary relative to the logical stream; the parser buffers
    /// whatever cannot be classified yet.
    pub fn process_fragment(&mut self, raw: &str) -> ProcessedFragment {
        let mut input = std::mem::take(&mut self.pending);
        input.push_str(raw);

        let mut out = ProcessedFragment::default();
        let mut cursor = 0;

        while let Some((at, marker)) = scan::find_marker(&input, cursor) {
            let before = &input[cursor..at];
            self.route_text(before, &mut out.display_text);
            cursor = at + marker.as_str().len();

            match marker {
                Marker::Open => self.blocks.push(String::new()),
                Marker::Close => match self.blocks.pop() {
                    Some(content) => self.close_block(content, &mut out),
                    // Close marker outside any block: literal text.
                    None => self.route_text(TOOL_CLOSE, &mut out.display_text),
                },
            }
        }

        let tail = &input[cursor..];
        let keep = scan::torn_marker_suffix(tail, self.depth() > 0);
        let (emit, hold) = tail.split_at(tail.len() - keep);
        self.route_text(emit, &mut out.display_text);
        self.pending.push_str(hold);

        out.pending_raw = self.pending_raw();
        out
    }

    /// True while the parser is inside a tool block, or holding pending
    /// content that plausibly is one.
    ///
    /// A pending buffer that is a strict prefix of `<tool>` does not
    /// count: a handful of characters like `<` or `<too` are almost
    /// always ordinary punctuation mid-stream.
    pub fn is_processing_tool(&self) -> bool {
        if !self.blocks.is_empty() {
            return true;
        }
        !self.pending.is_empty() && !scan::is_strict_open_prefix(&self.pending)
    }

    /// End the session. If a block is still open, returns its best-effort
    /// raw reconstruction (markers included) for recovery diagnostics.
    /// All state except the call counter is cleared.
    pub fn finalize(&mut self) -> Option<String> {
        let raw = self.pending_raw();
        self.reset();
        raw
    }

    /// Clear the block arena and pending buffer unconditionally. The
    /// call-id counter is preserved.
    pub fn reset(&mut self) {
        self.blocks.clear();
        self.pending.clear();
    }

    /// Route text to the innermost open block, or to display when no
    /// block is open.
    fn route_text(&mut self, text: &str, display: &mut String) {
        if text.is_empty() {
            return;
        }
        match self.blocks.last_mut() {
            Some(buffer) => buffer.push_str(text),
            None => display.push_str(text),
        }
    }

    /// Handle a just-closed block: extract a call, or degrade the whole
    /// block (markers included) back to literal text.
    fn close_block(&mut self, content: String, out: &mut ProcessedFragment) {
        match parse_block(&content) {
            Ok(parsed) => {
                let id = format!("tool-{}-{}", self.conversation_id, self.next_call);
                self.next_call += 1;
                out.completed_calls
                    .push(ToolCall::pending(id, parsed.name, parsed.parameters));
            }
            Err(err) => {
                tracing::warn!(
                    conversation_id = %self.conversation_id,
                    error = %err,
                    block_len = content.len(),
                    "tool block failed to parse, passing through as text"
                );
                let literal = format!("{TOOL_OPEN}{content}{TOOL_CLOSE}");
                self.route_text(&literal, &mut out.display_text);
            }
        }
    }

    /// Reconstruct the raw text of all open blocks plus the pending tail.
    fn pending_raw(&self) -> Option<String> {
        if self.blocks.is_empty() {
            return None;
        }
        let mut raw = String::new();
        for block in &self.blocks {
            raw.push_str(TOOL_OPEN);
            raw.push_str(block);
        }
        raw.push_str(&self.pending);
        Some(raw)
    }
}
