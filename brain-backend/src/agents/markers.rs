//! Inline markers in model output
//!
//! `[TOOL: github.list_issues {"state": "open"}]` requests a gateway call and
//! `[MEMORY: key = value]` writes to working memory. Both are removed from the
//! text shown to the user.

use crate::models::WorkingMemory;
use crate::tools::ToolCall;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

static TOOL_HEAD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[TOOL:\s*([A-Za-z0-9_\-]+)\.([A-Za-z0-9_\-]+)\s*").unwrap());

static MEMORY_MARKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\[MEMORY:\s*([A-Za-z0-9_.\-]+)\s*=\s*([^\]\n]+?)\s*\]").unwrap()
});

static EXTRA_BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

#[derive(Debug, Default, Clone, PartialEq)]
pub struct ParsedOutput {
    /// Model text with markers removed
    pub text: String,
    /// Tool requests in the order they appeared
    pub tool_calls: Vec<ToolCall>,
    pub memory: WorkingMemory,
    /// Tool markers that could not be parsed, left in `text` verbatim
    pub malformed: Vec<String>,
}

pub fn parse_output(output: &str) -> ParsedOutput {
    let mut parsed = ParsedOutput::default();
    let without_tools = extract_tool_calls(output, &mut parsed);

    let text = MEMORY_MARKER.replace_all(&without_tools, |caps: &regex::Captures| {
        let key = caps[1].to_string();
        let raw = caps[2].trim();
        let value = serde_json::from_str::<Value>(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        parsed.memory.insert(key, value);
        ""
    });

    parsed.text = EXTRA_BLANK_LINES.replace_all(text.trim(), "\n\n").to_string();
    parsed
}

fn extract_tool_calls(output: &str, parsed: &mut ParsedOutput) -> String {
    let mut text = String::with_capacity(output.len());
    let mut cursor = 0;

    while let Some(caps) = TOOL_HEAD.captures(&output[cursor..]) {
        let Some(head) = caps.get(0) else { break };
        let start = cursor + head.start();
        let after_head = cursor + head.end();
        text.push_str(&output[cursor..start]);

        match parse_tool_tail(&output[after_head..]) {
            Some((params, consumed)) => {
                parsed
                    .tool_calls
                    .push(ToolCall::new(&caps[1], &caps[2], params));
                cursor = after_head + consumed;
            }
            None => {
                log::warn!("[MARKERS] Malformed tool marker: {}", &output[start..after_head]);
                parsed.malformed.push(output[start..after_head].trim().to_string());
                text.push_str(&output[start..after_head]);
                cursor = after_head;
            }
        }
    }

    text.push_str(&output[cursor..]);
    text
}

/// Parse optional JSON params followed by the closing bracket.
/// Returns the params and the number of bytes consumed.
fn parse_tool_tail(rest: &str) -> Option<(Value, usize)> {
    let (params, mut offset) = if rest.starts_with('{') {
        let mut stream = serde_json::Deserializer::from_str(rest).into_iter::<Value>();
        match stream.next() {
            Some(Ok(value @ Value::Object(_))) => (value, stream.byte_offset()),
            _ => return None,
        }
    } else {
        (Value::Object(Map::new()), 0)
    };

    let tail = &rest[offset..];
    let trimmed = tail.trim_start();
    offset += tail.len() - trimmed.len();
    if trimmed.starts_with(']') {
        Some((params, offset + 1))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tool_markers_with_nested_params() {
        let parsed = parse_output(
            r#"Checking now. [TOOL: github.list_issues {"labels": ["bug", "p1"], "filter": {"state": "open"}}] Done."#,
        );
        assert_eq!(parsed.tool_calls.len(), 1);
        assert_eq!(parsed.tool_calls[0].tool_name, "github");
        assert_eq!(parsed.tool_calls[0].method, "list_issues");
        assert_eq!(parsed.tool_calls[0].params["labels"], json!(["bug", "p1"]));
        assert_eq!(parsed.text, "Checking now.  Done.");
    }

    #[test]
    fn test_tool_marker_without_params() {
        let parsed = parse_output("[TOOL: filesystem.list_dir]\nHere you go.");
        assert_eq!(parsed.tool_calls[0].params, json!({}));
        assert_eq!(parsed.text, "Here you go.");
    }

    #[test]
    fn test_multiple_tool_markers_keep_order() {
        let parsed = parse_output(
            r#"[TOOL: github.list_issues {}] [TOOL: whatsapp.send_message {"to": "team"}]"#,
        );
        let names: Vec<_> = parsed.tool_calls.iter().map(|c| c.tool_name.as_str()).collect();
        assert_eq!(names, vec!["github", "whatsapp"]);
    }

    #[test]
    fn test_malformed_tool_marker_is_left_in_text() {
        let parsed = parse_output(r#"[TOOL: github.list_issues {"state": ] oops"#);
        assert!(parsed.tool_calls.is_empty());
        assert_eq!(parsed.malformed.len(), 1);
        assert!(parsed.text.contains("[TOOL: github.list_issues"));
    }

    #[test]
    fn test_memory_markers() {
        let parsed = parse_output(
            "Noted.\n[MEMORY: favorite_color = blue]\n[MEMORY: standup.hour = 9]",
        );
        assert_eq!(parsed.memory.get("favorite_color"), Some(&json!("blue")));
        assert_eq!(parsed.memory.get("standup.hour"), Some(&json!(9)));
        assert_eq!(parsed.text.lines().next(), Some("Noted."));
    }

    #[test]
    fn test_plain_text_passes_through() {
        let parsed = parse_output("  Nothing special here.  ");
        assert_eq!(parsed.text, "Nothing special here.");
        assert!(parsed.tool_calls.is_empty());
        assert!(parsed.memory.is_empty());
    }
}
