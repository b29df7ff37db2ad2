//! Conversation history for dendrite sessions.
//!
//! The history is an ordered log of `Request`/`Response` entries. Its one hard
//! invariant: no `Response` may remain the final entry while it contains a
//! tool call without a matching tool return, because the engine's remote
//! protocol rejects the next turn if any prior tool call is unanswered.
//! `patch_on_error` repairs the log on every non-success exit path.

use serde_json::Value;

/// Synthetic user prompt appended after a cancelled request.
pub const CANCELLATION_NOTE: &str = "Previous request cancelled by user";

/// Part of an outbound request entry.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestPart {
    /// Free-form user prompt text.
    UserPrompt { content: String },
    /// Outcome of an earlier tool call, paired by `tool_call_id`.
    ToolReturn {
        tool_name: String,
        tool_call_id: String,
        content: String,
    },
    /// The engine is retrying a failed tool call with a different approach.
    Retry { message: String },
}

/// Part of a model response entry.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponsePart {
    Text { content: String },
    ToolCall {
        tool_name: String,
        tool_call_id: String,
        args: Value,
    },
}

/// Outbound request: user prompts, tool returns, retry markers.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub parts: Vec<RequestPart>,
}

impl Request {
    pub fn user_prompt(content: impl Into<String>) -> Self {
        Self {
            parts: vec![RequestPart::UserPrompt {
                content: content.into(),
            }],
        }
    }
}

/// Model response: text and tool calls, in production order.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub parts: Vec<ResponsePart>,
}

/// One entry in the conversation log.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Request(Request),
    Response(Response),
}

/// Ordered conversation log with an optional immutable project guide.
#[derive(Debug, Default)]
pub struct MessageHistory {
    messages: Vec<Message>,
    project_guide: Option<String>,
}

impl MessageHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the project guide prepended to every engine view of the history.
    pub fn set_project_guide(&mut self, guide: Option<String>) {
        self.project_guide = guide;
    }

    /// Appends a request entry, preserving production order.
    pub fn add_request(&mut self, request: Request) {
        self.messages.push(Message::Request(request));
        tracing::debug!("added request to message history");
    }

    /// Appends a response entry, preserving production order.
    pub fn add_response(&mut self, response: Response) {
        self.messages.push(Message::Response(response));
        tracing::debug!("added response to message history");
    }

    /// Appends a synthetic user prompt noting that the previous request was
    /// cancelled, so the engine sees why the exchange stopped mid-turn.
    pub fn add_cancellation_note(&mut self) {
        self.add_request(Request::user_prompt(CANCELLATION_NOTE));
    }

    /// Repairs an unanswered tool call after an error or interrupt.
    ///
    /// If the last entry is a `Response` whose parts, scanned in reverse,
    /// contain a tool call, a synthetic tool return carrying `error_message`
    /// is appended as a new `Request`. Otherwise this is a no-op. Without the
    /// repair the next turn would be rejected for the unanswered call.
    pub fn patch_on_error(&mut self, error_message: &str) {
        let Some(Message::Response(last)) = self.messages.last() else {
            return;
        };

        let last_tool_call = last.parts.iter().rev().find_map(|part| match part {
            ResponsePart::ToolCall {
                tool_name,
                tool_call_id,
                ..
            } => Some((tool_name.clone(), tool_call_id.clone())),
            ResponsePart::Text { .. } => None,
        });

        if let Some((tool_name, tool_call_id)) = last_tool_call {
            self.add_request(Request {
                parts: vec![RequestPart::ToolReturn {
                    tool_name,
                    tool_call_id,
                    content: error_message.to_string(),
                }],
            });
        }
    }

    /// Removes all entries. The project guide survives.
    pub fn clear(&mut self) {
        self.messages.clear();
        tracing::debug!("cleared message history");
    }

    /// Returns a copy of the log for the engine, with the project guide
    /// prepended as a leading synthetic request. Stored history is untouched.
    pub fn for_engine(&self) -> Vec<Message> {
        let mut messages = self.messages.clone();
        if let Some(guide) = &self.project_guide {
            messages.insert(0, Message::Request(Request::user_prompt(guide.clone())));
        }
        messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Message> {
        self.messages.iter()
    }

    /// True if the final entry is a response containing a tool call with no
    /// matching tool return later in the log.
    pub fn has_unanswered_tool_call(&self) -> bool {
        let Some(Message::Response(last)) = self.messages.last() else {
            return false;
        };
        last.parts
            .iter()
            .any(|part| matches!(part, ResponsePart::ToolCall { .. }))
    }
}
