//! Tool block content extraction.
//!
//! A completed block holds one JSON object naming the tool and its
//! parameters. Streaming truncation leaves a well-known class of
//! artifacts (trailing backslashes, newlines, dangling commas), so a
//! failed parse gets one repair pass before the block is given up on.
//! Failure is an ordinary value: the caller degrades the block to
//! literal display text.

use serde_json::Value;

/// The structured content of a well-formed tool block.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedBlock {
    /// Tool name (non-empty).
    pub name: String,
    /// Parameters object; `{}` when the block omits the field.
    pub parameters: Value,
}

/// Why a block's content could not be extracted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BlockParseError {
    /// Content was not valid JSON, even after repair.
    #[error("tool block is not valid JSON: {0}")]
    InvalidJson(String),

    /// Content parsed but was not a JSON object.
    #[error("tool block is not a JSON object")]
    NotAnObject,

    /// The `name` field was absent, not a string, or empty.
    #[error("tool block is missing a non-empty 'name' field")]
    MissingName,

    /// The `parameters` field was present but not an object.
    #[error("tool block 'parameters' field is not an object")]
    ParametersNotObject,
}

/// Parse a block's raw content into a [`ParsedBlock`].
///
/// Pass 1 trims the content and strips trailing backslashes and line
/// breaks before parsing. Pass 2 runs only when pass 1 fails: trailing
/// commas before `}` / `]` are removed (outside string literals) and the
/// parse is retried. No further repair is attempted.
pub fn parse_block(content: &str) -> Result<ParsedBlock, BlockParseError> {
    let cleaned = clean_content(content);

    let value: Value = match serde_json::from_str(cleaned) {
        Ok(v) => v,
        Err(first_err) => {
            let repaired = strip_trailing_commas(cleaned);
            match serde_json::from_str(repaired.trim()) {
                Ok(v) => v,
                Err(_) => return Err(BlockParseError::InvalidJson(first_err.to_string())),
            }
        }
    };

    let obj = value.as_object().ok_or(BlockParseError::NotAnObject)?;

    let name = obj
        .get("name")
        .and_then(Value::as_str)
        .filter(|n| !n.is_empty())
        .ok_or(BlockParseError::MissingName)?
        .to_string();

    let parameters = match obj.get("parameters") {
        None => Value::Object(serde_json::Map::new()),
        Some(p) if p.is_object() => p.clone(),
        Some(_) => return Err(BlockParseError::ParametersNotObject),
    };

    Ok(ParsedBlock { name, parameters })
}

/// Trim whitespace and strip trailing backslash/newline truncation
/// artifacts.
fn clean_content(content: &str) -> &str {
    content
        .trim()
        .trim_end_matches(['\\', '\n', '\r'])
        .trim_end()
}

/// Remove commas that directly precede `}` or `]` (ignoring whitespace),
/// leaving string literals untouched.
fn strip_trailing_commas(content: &str) -> String {
    let chars: Vec<char> = content.chars().collect();
    let mut out = String::with_capacity(content.len());
    let mut in_string = false;
    let mut escaped = false;

    for (i, &c) in chars.iter().enumerate() {
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => {
                in_string = true;
                out.push(c);
            }
            ',' => {
                let next = chars[i + 1..].iter().copied().find(|ch| !ch.is_whitespace());
                if !matches!(next, Some('}') | Some(']')) {
                    out.push(c);
                }
            }
            _ => out.push(c),
        }
    }

    out
}
