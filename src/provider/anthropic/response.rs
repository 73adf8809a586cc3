use crate::error::LLMError;
use crate::types::{ToolCall, ToolResponse};

use super::types::AnthropicMessageResponse;

/// 将 Anthropic 非流式响应映射为统一结构
pub(crate) fn map_response(
    resp: AnthropicMessageResponse,
    provider: &'static str,
) -> Result<ToolResponse, LLMError> {
    if resp.kind.as_deref() == Some("error") || resp.error.is_some() {
        let message = resp
            .error
            .map(|error| error.describe())
            .unwrap_or_else(|| "unknown error".to_string());
        return Err(LLMError::provider(provider, message));
    }

    let mut text = String::new();
    let mut tool_calls = Vec::new();
    for block in resp.content {
        match block.kind.as_str() {
            "text" => text.push_str(block.text.as_deref().unwrap_or_default()),
            "tool_use" => {
                let input = block
                    .input
                    .unwrap_or_else(|| serde_json::Value::Object(Default::default()));
                let arguments = serde_json::to_string(&input).map_err(|err| {
                    LLMError::protocol(provider, format!("tool_use input not serializable: {err}"))
                })?;
                tool_calls.push(ToolCall::function(
                    block.id.unwrap_or_default(),
                    block.name.unwrap_or_default(),
                    arguments,
                ));
            }
            other => {
                tracing::debug!(provider, block = other, "ignoring content block");
            }
        }
    }

    tracing::debug!(
        provider,
        model = resp.model.as_deref().unwrap_or_default(),
        stop_reason = resp.stop_reason.as_deref().unwrap_or_default(),
        tool_calls = tool_calls.len(),
        "message finished"
    );

    Ok(ToolResponse {
        text,
        tool_calls,
        done: true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(body: &str) -> AnthropicMessageResponse {
        serde_json::from_str(body).expect("fixture should parse")
    }

    #[test]
    fn map_response_concatenates_text_and_collects_tool_use() {
        let resp = parse(
            r#"{
                "id": "msg_1",
                "type": "message",
                "role": "assistant",
                "model": "claude-sonnet-4-20250514",
                "content": [
                    {"type": "text", "text": "Let me "},
                    {"type": "thinking", "thinking": "hmm"},
                    {"type": "text", "text": "check."},
                    {"type": "tool_use", "id": "toolu_1", "name": "grep", "input": {"pattern": "foo"}}
                ],
                "stop_reason": "tool_use"
            }"#,
        );
        let mapped = map_response(resp, "anthropic").expect("map_response should succeed");
        assert_eq!(mapped.text, "Let me check.");
        assert_eq!(
            mapped.tool_calls,
            vec![ToolCall::function("toolu_1", "grep", r#"{"pattern":"foo"}"#)]
        );
        assert!(mapped.done);
    }

    #[test]
    fn tool_use_without_input_gets_empty_object() {
        let resp = parse(r#"{"content": [{"type": "tool_use", "id": "t", "name": "now"}]}"#);
        let mapped = map_response(resp, "anthropic").expect("map");
        assert_eq!(mapped.tool_calls[0].arguments, "{}");
    }

    #[test]
    fn error_body_is_a_provider_error() {
        let resp = parse(
            r#"{"type": "error", "error": {"type": "overloaded_error", "message": "Overloaded"}}"#,
        );
        match map_response(resp, "anthropic") {
            Err(LLMError::Provider { message, .. }) => {
                assert_eq!(message, "Overloaded (overloaded_error)")
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
