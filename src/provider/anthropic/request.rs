use serde_json::{Map, Value, json};

use crate::error::LLMError;
use crate::types::{Message, Role, ToolDefinition};

/// 构建 Anthropic Messages 请求体
pub(crate) fn build_anthropic_body(
    messages: &[Message],
    tools: &[ToolDefinition],
    model: &str,
    max_tokens: u32,
    stream: bool,
) -> Result<Value, LLMError> {
    let mut body = Map::new();
    body.insert("model".to_string(), Value::String(model.to_string()));
    body.insert("max_tokens".to_string(), Value::from(max_tokens));

    // system 折叠为顶层 system 其余进入 messages
    let mut system_texts = Vec::new();
    let mut converted = Vec::new();
    for message in messages {
        match message.role {
            Role::System => {
                if !message.content.is_empty() {
                    system_texts.push(message.content.as_str());
                }
            }
            _ => converted.push(convert_message(message)?),
        }
    }

    if converted.is_empty() {
        return Err(LLMError::Validation {
            message: "Anthropic Messages request requires at least one user/assistant message"
                .to_string(),
        });
    }
    if !system_texts.is_empty() {
        body.insert(
            "system".to_string(),
            Value::String(system_texts.join("\n\n")),
        );
    }
    body.insert("messages".to_string(), Value::Array(converted));

    if !tools.is_empty() {
        body.insert(
            "tools".to_string(),
            Value::Array(tools.iter().map(convert_tool).collect()),
        );
    }

    body.insert("stream".to_string(), Value::Bool(stream));
    Ok(Value::Object(body))
}

fn convert_message(message: &Message) -> Result<Value, LLMError> {
    let (role, blocks) = match message.role {
        // tool 结果作为 user 消息中的 tool_result 块回传
        Role::Tool => {
            let tool_use_id = message
                .tool_call_id
                .as_deref()
                .filter(|id| !id.is_empty())
                .ok_or_else(|| LLMError::Validation {
                    message: "tool message missing tool_call_id".to_string(),
                })?;
            (
                "user",
                vec![json!({
                    "type": "tool_result",
                    "tool_use_id": tool_use_id,
                    "content": message.content,
                })],
            )
        }
        Role::Assistant => {
            let mut blocks = Vec::with_capacity(message.tool_calls.len() + 1);
            if !message.content.is_empty() {
                blocks.push(text_block(&message.content));
            }
            for call in &message.tool_calls {
                blocks.push(json!({
                    "type": "tool_use",
                    "id": call.id,
                    "name": call.name,
                    "input": call.arguments_value(),
                }));
            }
            ("assistant", blocks)
        }
        _ => {
            let blocks = if message.content.is_empty() {
                Vec::new()
            } else {
                vec![text_block(&message.content)]
            };
            ("user", blocks)
        }
    };

    if blocks.is_empty() {
        return Err(LLMError::Validation {
            message: format!("{} message must contain at least one content block", message.role),
        });
    }

    Ok(json!({ "role": role, "content": blocks }))
}

fn text_block(text: &str) -> Value {
    json!({ "type": "text", "text": text })
}

fn convert_tool(tool: &ToolDefinition) -> Value {
    json!({
        "name": tool.name,
        "description": tool.description,
        "input_schema": tool.parameters,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ToolCall;

    #[test]
    fn system_messages_are_hoisted_and_joined() {
        let messages = vec![
            Message::system("You are terse."),
            Message::system("Answer in English."),
            Message::user("hi"),
        ];
        let body =
            build_anthropic_body(&messages, &[], "claude-sonnet-4-20250514", 1024, false)
                .expect("body");

        assert_eq!(body["system"], json!("You are terse.\n\nAnswer in English."));
        assert_eq!(body["max_tokens"], json!(1024));
        assert_eq!(body["stream"], json!(false));
        assert_eq!(
            body["messages"],
            json!([{"role": "user", "content": [{"type": "text", "text": "hi"}]}])
        );
    }

    #[test]
    fn tool_round_trip_uses_content_blocks() {
        let messages = vec![
            Message::user("find foo"),
            Message::assistant_tool_calls(
                "Searching.",
                vec![
                    ToolCall::function("t1", "grep", r#"{"pattern":"foo"}"#),
                    ToolCall::function("t2", "ls", "not json"),
                ],
            ),
            Message::tool_result("t1", "grep", "a.rs:1:foo"),
        ];
        let tools = vec![ToolDefinition::new(
            "grep",
            "Search files",
            json!({"type": "object"}),
        )];
        let body = build_anthropic_body(&messages, &tools, "m", 4096, true).expect("body");

        let assistant = &body["messages"][1];
        assert_eq!(assistant["role"], json!("assistant"));
        assert_eq!(
            assistant["content"],
            json!([
                {"type": "text", "text": "Searching."},
                {"type": "tool_use", "id": "t1", "name": "grep", "input": {"pattern": "foo"}},
                {"type": "tool_use", "id": "t2", "name": "ls", "input": {}}
            ])
        );

        let result = &body["messages"][2];
        assert_eq!(result["role"], json!("user"));
        assert_eq!(
            result["content"],
            json!([{"type": "tool_result", "tool_use_id": "t1", "content": "a.rs:1:foo"}])
        );

        assert_eq!(
            body["tools"],
            json!([{"name": "grep", "description": "Search files", "input_schema": {"type": "object"}}])
        );
    }

    #[test]
    fn assistant_without_text_omits_text_block() {
        let messages = vec![
            Message::user("go"),
            Message::assistant_tool_calls("", vec![ToolCall::function("t1", "grep", "{}")]),
        ];
        let body = build_anthropic_body(&messages, &[], "m", 16, false).expect("body");
        let content = body["messages"][1]["content"].as_array().expect("blocks");
        assert_eq!(content.len(), 1);
        assert_eq!(content[0]["type"], json!("tool_use"));
    }

    #[test]
    fn system_only_conversation_is_rejected() {
        let err = build_anthropic_body(&[Message::system("x")], &[], "m", 16, false)
            .expect_err("must fail");
        assert!(matches!(err, LLMError::Validation { .. }));
    }

    #[test]
    fn empty_user_message_is_rejected() {
        let err = build_anthropic_body(&[Message::user("")], &[], "m", 16, false)
            .expect_err("must fail");
        assert!(matches!(err, LLMError::Validation { .. }));
    }
}
