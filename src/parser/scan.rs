//! Marker scanning primitives for the inline tool-call wire format.
//!
//! The model embeds tool calls in its text output between the literal
//! markers `<tool>` and `</tool>`. Streaming can tear a marker across
//! fragment boundaries, so in addition to locating complete markers this
//! module detects a trailing fragment suffix that could still grow into
//! a marker.

/// Opening marker of a tool block.
pub const TOOL_OPEN: &str = "<tool>";

/// Closing marker of a tool block.
pub const TOOL_CLOSE: &str = "</tool>";

/// Which marker was matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marker {
    /// `<tool>`
    Open,
    /// `</tool>`
    Close,
}

impl Marker {
    /// The literal marker text.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => TOOL_OPEN,
            Self::Close => TOOL_CLOSE,
        }
    }
}

/// Find the earliest complete marker in `text` at or after byte offset
/// `from`. Returns the marker's byte offset and kind.
///
/// The two markers differ at their second byte, so they can never match
/// at the same position.
pub fn find_marker(text: &str, from: usize) -> Option<(usize, Marker)> {
    let haystack = &text[from..];
    let open = haystack.find(TOOL_OPEN).map(|i| i + from);
    let close = haystack.find(TOOL_CLOSE).map(|i| i + from);
    match (open, close) {
        (Some(o), Some(c)) if o < c => Some((o, Marker::Open)),
        (Some(_), Some(c)) => Some((c, Marker::Close)),
        (Some(o), None) => Some((o, Marker::Open)),
        (None, Some(c)) => Some((c, Marker::Close)),
        (None, None) => None,
    }
}

/// Length in bytes of the longest suffix of `text` that is a strict
/// prefix of a marker and could therefore complete in a later fragment.
///
/// `<tool>` is always a candidate; `</tool>` only when `inside_block` is
/// true (outside a block a torn close marker is ordinary text). Returns
/// 0 when the tail is safe to emit.
pub fn torn_marker_suffix(text: &str, inside_block: bool) -> usize {
    let bytes = text.as_bytes();
    let longest = TOOL_CLOSE.len() - 1;
    let max = longest.min(bytes.len());
    for k in (1..=max).rev() {
        let tail = &bytes[bytes.len() - k..];
        if TOOL_OPEN.len() > k && TOOL_OPEN.as_bytes().starts_with(tail) {
            return k;
        }
        if inside_block && TOOL_CLOSE.len() > k && TOOL_CLOSE.as_bytes().starts_with(tail) {
            return k;
        }
    }
    0
}

/// Whether `text` is a strict prefix of the opening marker (`<`, `<t`,
/// … `<tool`). Used by the meaningful-pending heuristic: such prefixes
/// are almost always ordinary punctuation and do not count as being
/// mid-tool-call.
pub fn is_strict_open_prefix(text: &str) -> bool {
    !text.is_empty() && text.len() < TOOL_OPEN.len() && TOOL_OPEN.starts_with(text)
}
