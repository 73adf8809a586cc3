use crate::accumulator::finalize_arguments;
use crate::error::LLMError;
use crate::provider::sse::SseHandler;
use crate::types::{ToolCall, ToolStreamEvent};

use super::types::{AnthropicBlockDelta, AnthropicStreamEvent};

/// Tool call whose `input_json_delta` fragments are still arriving.
struct OpenToolUse {
    id: String,
    name: String,
    arguments: String,
}

/// Content-block state machine for one streaming call.
///
/// Blocks are strictly sequential, so one open slot plus the list of closed calls is
/// enough; calls are reported in block-close order.
pub(crate) struct AnthropicStreamState {
    provider: &'static str,
    full_text: String,
    current: Option<OpenToolUse>,
    completed: Vec<ToolCall>,
}

impl AnthropicStreamState {
    pub(crate) fn new(provider: &'static str) -> Self {
        Self {
            provider,
            full_text: String::new(),
            current: None,
            completed: Vec::new(),
        }
    }

    fn close_current(&mut self) -> Result<(), LLMError> {
        if let Some(open) = self.current.take() {
            let arguments = finalize_arguments(self.provider, &open.name, open.arguments)?;
            self.completed.push(ToolCall::function(open.id, open.name, arguments));
        }
        Ok(())
    }
}

impl SseHandler for AnthropicStreamState {
    fn provider(&self) -> &'static str {
        self.provider
    }

    fn handle(&mut self, payload: &str, deltas: &mut Vec<String>) -> Option<ToolStreamEvent> {
        let event: AnthropicStreamEvent = match serde_json::from_str(payload) {
            Ok(event) => event,
            Err(err) => {
                tracing::debug!(
                    provider = self.provider,
                    error = %err,
                    "skipping unparseable stream event"
                );
                return None;
            }
        };

        match event {
            AnthropicStreamEvent::ContentBlockStart { content_block } => {
                // 上一个块缺少 content_block_stop 时先收尾
                if let Err(err) = self.close_current() {
                    return Some(ToolStreamEvent::failed(err));
                }
                if content_block.kind == "tool_use" {
                    self.current = Some(OpenToolUse {
                        id: content_block.id.unwrap_or_default(),
                        name: content_block.name.unwrap_or_default(),
                        arguments: String::new(),
                    });
                }
                None
            }
            AnthropicStreamEvent::ContentBlockDelta { delta } => {
                match delta {
                    AnthropicBlockDelta::TextDelta { text } => {
                        if !text.is_empty() {
                            self.full_text.push_str(&text);
                            deltas.push(text);
                        }
                    }
                    AnthropicBlockDelta::InputJsonDelta { partial_json } => {
                        if let Some(open) = self.current.as_mut() {
                            open.arguments.push_str(&partial_json);
                        }
                    }
                    AnthropicBlockDelta::Other => {}
                }
                None
            }
            AnthropicStreamEvent::ContentBlockStop {} => match self.close_current() {
                Ok(()) => None,
                Err(err) => Some(ToolStreamEvent::failed(err)),
            },
            AnthropicStreamEvent::MessageStop {} => {
                // 未收到 content_block_stop 的工具调用同样收尾
                if let Err(err) = self.close_current() {
                    return Some(ToolStreamEvent::failed(err));
                }
                Some(ToolStreamEvent::finished(
                    std::mem::take(&mut self.full_text),
                    std::mem::take(&mut self.completed),
                ))
            }
            AnthropicStreamEvent::Error { error } => Some(ToolStreamEvent::failed(
                LLMError::provider(self.provider, error.describe()),
            )),
            AnthropicStreamEvent::MessageStart {}
            | AnthropicStreamEvent::MessageDelta {}
            | AnthropicStreamEvent::Ping {}
            | AnthropicStreamEvent::Unknown => None,
        }
    }
}
