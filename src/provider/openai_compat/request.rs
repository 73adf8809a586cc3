use serde_json::{Map, Value, json};

use crate::error::LLMError;
use crate::types::{Message, Role, ToolCall, ToolDefinition};

/// Builds a Chat Completions request body.
pub(crate) fn build_openai_body(
    messages: &[Message],
    tools: &[ToolDefinition],
    model: &str,
    stream: bool,
) -> Result<Value, LLMError> {
    if messages.is_empty() {
        return Err(LLMError::Validation {
            message: "at least one message is required".to_string(),
        });
    }

    let mut body = Map::new();
    body.insert("model".to_string(), Value::String(model.to_string()));
    body.insert(
        "messages".to_string(),
        Value::Array(
            messages
                .iter()
                .map(convert_message)
                .collect::<Result<Vec<_>, _>>()?,
        ),
    );
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
    let mut obj = Map::new();
    obj.insert(
        "role".to_string(),
        Value::String(message.role.as_str().to_string()),
    );

    match message.role {
        Role::Tool => {
            let call_id = message
                .tool_call_id
                .clone()
                .filter(|id| !id.is_empty())
                .ok_or_else(|| LLMError::Validation {
                    message: "tool message missing tool_call_id".to_string(),
                })?;
            obj.insert("tool_call_id".to_string(), Value::String(call_id));
            if let Some(name) = &message.name {
                obj.insert("name".to_string(), Value::String(name.clone()));
            }
            obj.insert(
                "content".to_string(),
                Value::String(message.content.clone()),
            );
        }
        Role::Assistant if !message.tool_calls.is_empty() => {
            let content = if message.content.is_empty() {
                Value::Null
            } else {
                Value::String(message.content.clone())
            };
            obj.insert("content".to_string(), content);
            obj.insert(
                "tool_calls".to_string(),
                Value::Array(message.tool_calls.iter().map(convert_tool_call).collect()),
            );
        }
        _ => {
            obj.insert(
                "content".to_string(),
                Value::String(message.content.clone()),
            );
        }
    }

    Ok(Value::Object(obj))
}

fn convert_tool_call(call: &ToolCall) -> Value {
    json!({
        "id": call.id,
        "type": call.kind.as_str(),
        "function": {
            "name": call.name,
            "arguments": call.arguments
        }
    })
}

fn convert_tool(tool: &ToolDefinition) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.parameters
        }
    })
}
