//! Human-readable conversation dumps.
//!
//! The renderer works over a closed value type rather than introspecting
//! arbitrary runtime structures, so it cannot fail on nesting depth or
//! unexpected shapes. `/dump` serializes every retained history entry and
//! overwrites a fixed log artifact in the working directory.

use std::fmt::Write as _;
use std::path::Path;

use anyhow::{Context, Result};
use serde_json::Value;

use crate::core::history::{Message, MessageHistory, RequestPart, ResponsePart};

/// File overwritten by each `/dump`.
pub const DUMP_FILE: &str = "dump.log";

/// Closed set of renderable values.
#[derive(Debug, Clone, PartialEq)]
pub enum DumpValue {
    Scalar(String),
    Sequence(Vec<DumpValue>),
    Mapping(Vec<(String, DumpValue)>),
    Record {
        name: String,
        fields: Vec<(String, DumpValue)>,
    },
}

impl DumpValue {
    pub fn scalar(value: impl Into<String>) -> Self {
        Self::Scalar(value.into())
    }

    /// Converts arbitrary JSON into the closed value set.
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => Self::scalar("null"),
            Value::Bool(b) => Self::scalar(b.to_string()),
            Value::Number(n) => Self::scalar(n.to_string()),
            Value::String(s) => Self::scalar(s.clone()),
            Value::Array(items) => Self::Sequence(items.iter().map(Self::from_json).collect()),
            Value::Object(map) => Self::Mapping(
                map.iter()
                    .map(|(k, v)| (k.clone(), Self::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Renders the value with two-space indentation per nesting level.
    pub fn render(&self, out: &mut String, indent: usize) {
        let pad = "  ".repeat(indent);
        match self {
            Self::Scalar(s) => {
                let _ = writeln!(out, "{pad}{s}");
            }
            Self::Sequence(items) => {
                for item in items {
                    let _ = writeln!(out, "{pad}-");
                    item.render(out, indent + 1);
                }
            }
            Self::Mapping(entries) => {
                for (key, value) in entries {
                    match value {
                        Self::Scalar(s) => {
                            let _ = writeln!(out, "{pad}{key}: {s}");
                        }
                        _ => {
                            let _ = writeln!(out, "{pad}{key}:");
                            value.render(out, indent + 1);
                        }
                    }
                }
            }
            Self::Record { name, fields } => {
                let _ = writeln!(out, "{pad}{name}:");
                for (key, value) in fields {
                    match value {
                        Self::Scalar(s) => {
                            let _ = writeln!(out, "{pad}  {key}: {s}");
                        }
                        _ => {
                            let _ = writeln!(out, "{pad}  {key}:");
                            value.render(out, indent + 2);
                        }
                    }
                }
            }
        }
    }
}

fn request_part_value(part: &RequestPart) -> DumpValue {
    match part {
        RequestPart::UserPrompt { content } => DumpValue::Record {
            name: "UserPrompt".to_string(),
            fields: vec![("content".to_string(), DumpValue::scalar(content.clone()))],
        },
        RequestPart::ToolReturn {
            tool_name,
            tool_call_id,
            content,
        } => DumpValue::Record {
            name: "ToolReturn".to_string(),
            fields: vec![
                ("tool_name".to_string(), DumpValue::scalar(tool_name.clone())),
                (
                    "tool_call_id".to_string(),
                    DumpValue::scalar(tool_call_id.clone()),
                ),
                ("content".to_string(), DumpValue::scalar(content.clone())),
            ],
        },
        RequestPart::Retry { message } => DumpValue::Record {
            name: "Retry".to_string(),
            fields: vec![("message".to_string(), DumpValue::scalar(message.clone()))],
        },
    }
}

fn response_part_value(part: &ResponsePart) -> DumpValue {
    match part {
        ResponsePart::Text { content } => DumpValue::Record {
            name: "Text".to_string(),
            fields: vec![("content".to_string(), DumpValue::scalar(content.clone()))],
        },
        ResponsePart::ToolCall {
            tool_name,
            tool_call_id,
            args,
        } => DumpValue::Record {
            name: "ToolCall".to_string(),
            fields: vec![
                ("tool_name".to_string(), DumpValue::scalar(tool_name.clone())),
                (
                    "tool_call_id".to_string(),
                    DumpValue::scalar(tool_call_id.clone()),
                ),
                ("args".to_string(), DumpValue::from_json(args)),
            ],
        },
    }
}

fn message_value(message: &Message) -> DumpValue {
    match message {
        Message::Request(request) => DumpValue::Record {
            name: "Request".to_string(),
            fields: vec![(
                "parts".to_string(),
                DumpValue::Sequence(request.parts.iter().map(request_part_value).collect()),
            )],
        },
        Message::Response(response) => DumpValue::Record {
            name: "Response".to_string(),
            fields: vec![(
                "parts".to_string(),
                DumpValue::Sequence(response.parts.iter().map(response_part_value).collect()),
            )],
        },
    }
}

/// Renders the full history as text.
pub fn render_history(history: &MessageHistory) -> String {
    let mut out = String::new();
    for (index, message) in history.iter().enumerate() {
        let _ = writeln!(out, "=== message {index} ===");
        message_value(message).render(&mut out, 0);
    }
    out
}

/// Writes the rendered history to `dump.log` under `dir`, overwriting any
/// previous dump.
pub fn write_dump(history: &MessageHistory, dir: &Path) -> Result<std::path::PathBuf> {
    let path = dir.join(DUMP_FILE);
    std::fs::write(&path, render_history(history))
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tempfile::tempdir;

    use super::*;
    use crate::core::history::{Request, Response};

    #[test]
    fn test_from_json_handles_nesting() {
        let value = DumpValue::from_json(&json!({
            "outer": {"inner": [1, {"deep": null}]},
        }));
        let mut out = String::new();
        value.render(&mut out, 0);
        assert!(out.contains("outer:"));
        assert!(out.contains("deep: null"));
    }

    #[test]
    fn test_render_scalar_mapping_inline() {
        let value = DumpValue::Mapping(vec![("key".to_string(), DumpValue::scalar("value"))]);
        let mut out = String::new();
        value.render(&mut out, 0);
        assert_eq!(out, "key: value\n");
    }

    #[test]
    fn test_write_dump_overwrites() {
        let dir = tempdir().unwrap();
        let mut history = MessageHistory::new();
        history.add_request(Request::user_prompt("first"));
        let path = write_dump(&history, dir.path()).unwrap();
        let first = std::fs::read_to_string(&path).unwrap();
        assert!(first.contains("first"));

        history.clear();
        history.add_request(Request::user_prompt("second"));
        write_dump(&history, dir.path()).unwrap();
        let second = std::fs::read_to_string(&path).unwrap();
        assert!(second.contains("second"));
        assert!(!second.contains("first"));
    }

    #[test]
    fn test_render_history_covers_all_part_kinds() {
        let mut history = MessageHistory::new();
        history.add_request(Request::user_prompt("hello"));
        history.add_response(Response {
            parts: vec![ResponsePart::ToolCall {
                tool_name: "search".to_string(),
                tool_call_id: "call-1".to_string(),
                args: json!({"query": "docs"}),
            }],
        });
        history.patch_on_error("cancelled");

        let out = render_history(&history);
        assert!(out.contains("UserPrompt"));
        assert!(out.contains("ToolCall"));
        assert!(out.contains("ToolReturn"));
        assert!(out.contains("query: docs"));
    }
}
