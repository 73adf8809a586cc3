use crate::accumulator::ToolCallAccumulator;
use crate::error::LLMError;
use crate::provider::sse::SseHandler;
use crate::types::ToolStreamEvent;

use super::types::OpenAiStreamChunk;

/// Delta-indexed streaming state for one call.
///
/// Text fragments are forwarded as they arrive; tool-call fragments go through the
/// accumulator until a choice reports a finish reason.
pub(crate) struct OpenAiStreamState {
    provider: &'static str,
    full_text: String,
    tool_calls: ToolCallAccumulator,
}

impl OpenAiStreamState {
    pub(crate) fn new(provider: &'static str) -> Self {
        Self {
            provider,
            full_text: String::new(),
            tool_calls: ToolCallAccumulator::new(),
        }
    }

    fn finish(&mut self) -> ToolStreamEvent {
        let full_text = std::mem::take(&mut self.full_text);
        match std::mem::take(&mut self.tool_calls).finalize(self.provider) {
            Ok(calls) => ToolStreamEvent::finished(full_text, calls),
            Err(err) => ToolStreamEvent::failed(err),
        }
    }
}

impl SseHandler for OpenAiStreamState {
    fn provider(&self) -> &'static str {
        self.provider
    }

    fn handle(&mut self, payload: &str, deltas: &mut Vec<String>) -> Option<ToolStreamEvent> {
        let chunk: OpenAiStreamChunk = match serde_json::from_str(payload) {
            Ok(chunk) => chunk,
            Err(err) => {
                tracing::debug!(
                    provider = self.provider,
                    error = %err,
                    "skipping unparseable stream chunk"
                );
                return None;
            }
        };

        if let Some(error) = chunk.error {
            return Some(ToolStreamEvent::failed(LLMError::provider(
                self.provider,
                error.describe(),
            )));
        }

        let choice = chunk.choices.into_iter().next()?;
        if let Some(delta) = choice.delta {
            if let Some(text) = delta.content.filter(|text| !text.is_empty()) {
                self.full_text.push_str(&text);
                deltas.push(text);
            }
            for (position, fragment) in delta.tool_calls.unwrap_or_default().into_iter().enumerate()
            {
                let (name, arguments) = match fragment.function {
                    Some(function) => (function.name, function.arguments),
                    None => (None, None),
                };
                self.tool_calls.add_fragment(
                    fragment.index.unwrap_or(position),
                    fragment.id.as_deref(),
                    fragment.kind.as_deref(),
                    name.as_deref(),
                    arguments.as_deref().unwrap_or_default(),
                );
            }
        }

        if choice.finish_reason.is_some() {
            return Some(self.finish());
        }
        None
    }
}
