//! Worker loop shared by every HTTP adapter that streams over server-sent events.

use crate::error::{LLMError, http_status_error};
use crate::http::{DynHttpTransport, HttpRequest};
use crate::stream::{EventSender, LineReader, collect_body_text, decode_data_line};
use crate::types::ToolStreamEvent;

/// Backend-specific interpretation of decoded payloads.
pub(crate) trait SseHandler: Send + 'static {
    fn provider(&self) -> &'static str;

    /// Consumes one payload, pushing text fragments to forward onto `deltas`.
    ///
    /// Returns the terminal event once the backend signals end of generation. Frames
    /// that fail to parse are skipped by the handler.
    fn handle(&mut self, payload: &str, deltas: &mut Vec<String>) -> Option<ToolStreamEvent>;

    /// Error reported when the transport ends before the terminal marker.
    fn on_eof(&mut self) -> LLMError {
        LLMError::StreamClosed {
            provider: self.provider(),
            message: "transport ended before the end-of-generation marker".to_string(),
        }
    }
}

/// Owns the streaming exchange for one call and emits exactly one terminal event.
///
/// On cancellation the transport is dropped and nothing further is emitted.
pub(crate) async fn drive<E, H>(
    transport: DynHttpTransport,
    request: HttpRequest,
    mut handler: H,
    sender: EventSender<E>,
) where
    E: From<ToolStreamEvent> + Send,
    H: SseHandler,
{
    let provider = handler.provider();

    let response = match sender.guard(transport.send_stream(request)).await {
        Err(_) => {
            tracing::debug!(provider, "stream cancelled while connecting");
            return;
        }
        Ok(Err(err)) => {
            let err = err.with_provider(provider);
            tracing::error!(provider, error = %err, "upstream stream request failed");
            sender.finish(ToolStreamEvent::failed(err).into()).await;
            return;
        }
        Ok(Ok(response)) => response,
    };

    if !response.is_success() {
        let status = response.status;
        let headers = response.headers;
        let err = match sender.guard(collect_body_text(response.body)).await {
            Err(_) => return,
            Ok(Ok(text)) => http_status_error(status, &headers, &text),
            Ok(Err(err)) => err.with_provider(provider),
        };
        tracing::warn!(provider, status, "upstream returned error");
        sender.finish(ToolStreamEvent::failed(err).into()).await;
        return;
    }

    let mut lines = LineReader::new(provider, response.body);
    let mut deltas = Vec::new();
    let terminal = loop {
        let line = match sender.guard(lines.next_line()).await {
            Err(_) => {
                tracing::debug!(provider, "stream cancelled by caller");
                return;
            }
            Ok(None) => break ToolStreamEvent::failed(handler.on_eof()),
            Ok(Some(Err(err))) => break ToolStreamEvent::failed(err.with_provider(provider)),
            Ok(Some(Ok(line))) => line,
        };
        let Some(payload) = decode_data_line(&line) else {
            continue;
        };
        let finished = handler.handle(payload, &mut deltas);
        for delta in deltas.drain(..) {
            if sender.send(ToolStreamEvent::delta(delta).into()).await.is_err() {
                tracing::debug!(provider, "stream cancelled by caller");
                return;
            }
        }
        if let Some(event) = finished {
            break event;
        }
    };

    drop(lines);
    sender.finish(terminal.into()).await;
}
