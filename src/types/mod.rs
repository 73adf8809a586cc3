//! Shared data structures every adapter translates into and out of.
//!
//! Values here are created per call and owned by the caller; adapters read them but
//! never mutate or persist them.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::LLMError;

/// Chat role understood by every backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    /// Wire name used by the OpenAI-compatible family.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }

    /// Capitalized label used when linearizing a conversation into a transcript.
    pub fn label(&self) -> &'static str {
        match self {
            Role::System => "System",
            Role::User => "User",
            Role::Assistant => "Assistant",
            Role::Tool => "Tool",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One conversation turn.
///
/// A [`Role::Tool`] message must carry `tool_call_id` referencing a [`ToolCall::id`]
/// emitted by a preceding assistant message. An assistant message with tool calls may
/// have empty `content`.
///
/// # Examples
///
/// ```
/// # use tsunagi_llm::types::{Message, Role, ToolCall};
/// let call = ToolCall::function("call_1", "read_file", r#"{"path":"a.txt"}"#);
/// let history = vec![
///     Message::system("You are terse."),
///     Message::user("Show me a.txt"),
///     Message::assistant_tool_calls("", vec![call]),
///     Message::tool_result("call_1", "read_file", "hello"),
/// ];
/// assert_eq!(history[3].role, Role::Tool);
/// assert_eq!(history[3].tool_call_id.as_deref(), Some("call_1"));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    #[serde(default)]
    pub content: String,
    /// Tool name for tool-result messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Invocations requested by an assistant turn, in order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// Identifier of the call a tool-result message answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    fn plain(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            name: None,
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, content)
    }

    /// Assistant turn that requested tool invocations.
    pub fn assistant_tool_calls(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls,
            ..Self::plain(Role::Assistant, content)
        }
    }

    /// Result of executing the tool call identified by `tool_call_id`.
    pub fn tool_result(
        tool_call_id: impl Into<String>,
        name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            name: Some(name.into()),
            tool_call_id: Some(tool_call_id.into()),
            ..Self::plain(Role::Tool, content)
        }
    }
}

/// Tool call categories. Only functions are declared by the supported backends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallKind {
    #[default]
    Function,
}

impl ToolCallKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolCallKind::Function => "function",
        }
    }
}

/// A complete tool invocation.
///
/// `arguments` is JSON object text. It is syntactically valid once the call is handed
/// to a caller; during streaming accumulation it only lives inside the accumulator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type", default)]
    pub kind: ToolCallKind,
    pub name: String,
    pub arguments: String,
}

impl ToolCall {
    pub fn function(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            kind: ToolCallKind::Function,
            name: name.into(),
            arguments: arguments.into(),
        }
    }

    /// Parses the argument text, falling back to an empty object.
    pub fn arguments_value(&self) -> Value {
        serde_json::from_str::<Value>(&self.arguments)
            .ok()
            .filter(Value::is_object)
            .unwrap_or_else(|| Value::Object(Default::default()))
    }
}

/// Declarative definition of a tool the model may call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Unique name exposed to the model.
    pub name: String,
    /// Natural-language description of the tool purpose.
    pub description: String,
    /// JSON Schema object describing the arguments.
    pub parameters: Value,
}

impl ToolDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

/// Outcome of a blocking tool-capable call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolResponse {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
    pub done: bool,
}

/// Event emitted by a text-only stream.
///
/// Exactly one event per call is terminal (`done == true` or `error.is_some()`), and
/// it is always the last one.
#[derive(Debug, Clone, Default)]
pub struct StreamEvent {
    pub text_delta: Option<String>,
    /// Full accumulated text, set on the successful terminal event.
    pub full_text: Option<String>,
    pub done: bool,
    pub error: Option<LLMError>,
}

impl StreamEvent {
    pub fn is_terminal(&self) -> bool {
        self.done || self.error.is_some()
    }
}

/// Event emitted by a tool-capable stream.
#[derive(Debug, Clone, Default)]
pub struct ToolStreamEvent {
    pub text_delta: Option<String>,
    pub full_text: Option<String>,
    /// Finalized tool calls, present only on the successful terminal event.
    pub tool_calls: Option<Vec<ToolCall>>,
    pub done: bool,
    pub error: Option<LLMError>,
}

impl ToolStreamEvent {
    pub fn delta(text: impl Into<String>) -> Self {
        Self {
            text_delta: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn finished(full_text: String, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            full_text: Some(full_text),
            tool_calls: Some(tool_calls),
            done: true,
            ..Default::default()
        }
    }

    pub fn failed(error: LLMError) -> Self {
        Self {
            error: Some(error),
            ..Default::default()
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.done || self.error.is_some()
    }
}

impl From<ToolStreamEvent> for StreamEvent {
    fn from(event: ToolStreamEvent) -> Self {
        StreamEvent {
            text_delta: event.text_delta,
            full_text: event.full_text,
            done: event.done,
            error: event.error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn message_serializes_without_empty_tool_fields() {
        let value = serde_json::to_value(Message::user("hi")).expect("serialize");
        assert_eq!(value, json!({"role": "user", "content": "hi"}));
    }

    #[test]
    fn tool_call_arguments_value_falls_back_to_empty_object() {
        let broken = ToolCall::function("c1", "grep", "{\"pattern\":");
        assert_eq!(broken.arguments_value(), json!({}));

        let scalar = ToolCall::function("c2", "grep", "42");
        assert_eq!(scalar.arguments_value(), json!({}));

        let ok = ToolCall::function("c3", "grep", r#"{"pattern":"foo"}"#);
        assert_eq!(ok.arguments_value(), json!({"pattern": "foo"}));
    }

    #[test]
    fn tool_stream_event_converts_to_text_event() {
        let event: StreamEvent =
            ToolStreamEvent::finished("done".to_string(), vec![ToolCall::function("a", "b", "{}")])
                .into();
        assert!(event.done);
        assert!(event.is_terminal());
        assert_eq!(event.full_text.as_deref(), Some("done"));

        let delta: StreamEvent = ToolStreamEvent::delta("x").into();
        assert!(!delta.is_terminal());
    }
}
