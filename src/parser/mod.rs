//! Incremental parsing of tool blocks embedded in streamed model text.
//!
//! The wire format between the model and this parser is an inline tag
//! pair carrying one JSON object:
//!
//! ```text
//! <tool>{"name": "<tool_name>", "parameters": { ... }}</tool>
//! ```
//!
//! # Architecture
//!
//! ```text
//! StreamToolParser (stream)
//!   +-- scan      — marker location, torn-marker suffix detection
//!   +-- extract   — block JSON parse + repair
//! ```
//!
//! Fragments go in; [`ProcessedFragment`]s come out, each carrying the
//! text that is already safe to display and any tool calls whose blocks
//! completed. Malformed blocks degrade to literal display text rather
//! than being dropped: the user always sees what the model produced.

pub mod extract;
pub mod scan;
pub mod stream;

pub use extract::{BlockParseError, ParsedBlock, parse_block};
pub use scan::{TOOL_CLOSE, TOOL_OPEN};
pub use stream::{ProcessedFragment, StreamToolParser};
