use crate::accumulator::finalize_arguments;
use crate::error::LLMError;
use crate::types::{ToolCall, ToolCallKind, ToolResponse};

use super::types::{OpenAiChatResponse, OpenAiToolCallResponse};

/// Maps a complete Chat Completions body onto the first choice.
pub(crate) fn map_response(
    resp: OpenAiChatResponse,
    provider: &'static str,
) -> Result<ToolResponse, LLMError> {
    if let Some(error) = resp.error {
        return Err(LLMError::provider(provider, error.describe()));
    }

    let choice = resp
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| LLMError::protocol(provider, "response contained no choices"))?;
    let message = choice
        .message
        .ok_or_else(|| LLMError::protocol(provider, "first choice carried no message"))?;

    let text = message
        .content
        .map(|content| content.into_text())
        .unwrap_or_default();
    let tool_calls = message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|call| convert_tool_call_response(call, provider))
        .collect::<Result<Vec<_>, _>>()?;

    tracing::debug!(
        provider,
        model = resp.model.as_deref().unwrap_or_default(),
        finish_reason = choice.finish_reason.as_deref().unwrap_or_default(),
        tool_calls = tool_calls.len(),
        "chat completion finished"
    );

    Ok(ToolResponse {
        text,
        tool_calls,
        done: true,
    })
}

fn convert_tool_call_response(
    call: OpenAiToolCallResponse,
    provider: &'static str,
) -> Result<ToolCall, LLMError> {
    if let Some(kind) = call.kind.as_deref() {
        if kind != ToolCallKind::Function.as_str() {
            return Err(LLMError::protocol(
                provider,
                format!("unsupported tool type {kind}"),
            ));
        }
    }
    let (name, arguments) = match call.function {
        Some(function) => (
            function.name.unwrap_or_default(),
            function.arguments.unwrap_or_default(),
        ),
        None => (String::new(), String::new()),
    };
    let arguments = finalize_arguments(provider, &name, arguments)?;
    Ok(ToolCall {
        id: call.id.unwrap_or_default(),
        kind: ToolCallKind::Function,
        name,
        arguments,
    })
}
