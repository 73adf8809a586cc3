use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures_core::Stream;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::error::LLMError;
use crate::http::HttpBodyStream;

const DATA_PREFIX: &str = "data:";
const DONE_SENTINEL: &str = "[DONE]";

/// Capacity of the queue between a streaming worker and its consumer.
pub const EVENT_QUEUE_CAPACITY: usize = 32;

/// Longest line [`LineReader`] buffers before giving up on the body.
pub const MAX_LINE_BYTES: usize = 4 * 1024 * 1024;

/// Extracts the data payload from one line of an incremental HTTP response.
///
/// Returns `None` for blank lines, lines without the `data:` prefix (comments,
/// `event:` names, heartbeats) and the `[DONE]` sentinel. Interpreting the payload is
/// left to the adapter.
///
/// # Examples
///
/// ```
/// use tsunagi_llm::stream::decode_data_line;
///
/// assert_eq!(decode_data_line("data: {\"a\":1}\n"), Some("{\"a\":1}"));
/// assert_eq!(decode_data_line("data: [DONE]\n"), None);
/// assert_eq!(decode_data_line(": heartbeat\n"), None);
/// ```
pub fn decode_data_line(line: &str) -> Option<&str> {
    let line = line.trim_end_matches(['\n', '\r']);
    let payload = line.strip_prefix(DATA_PREFIX)?;
    let payload = payload.strip_prefix(' ').unwrap_or(payload);
    if payload.trim().is_empty() || payload.trim() == DONE_SENTINEL {
        None
    } else {
        Some(payload)
    }
}

/// Splits an HTTP body stream into lines without their terminators.
pub struct LineReader {
    provider: &'static str,
    body: HttpBodyStream,
    buffer: Vec<u8>,
    max_line: usize,
    closed: bool,
}

impl LineReader {
    pub fn new(provider: &'static str, body: HttpBodyStream) -> Self {
        Self {
            provider,
            body,
            buffer: Vec::new(),
            max_line: MAX_LINE_BYTES,
            closed: false,
        }
    }

    pub fn with_max_line_bytes(mut self, max_line: usize) -> Self {
        self.max_line = max_line;
        self
    }

    /// Reads the next line, or `None` once the body is exhausted.
    ///
    /// A trailing fragment without a newline is returned as the final line. Invalid
    /// UTF-8 is replaced rather than failing the whole stream. A line longer than the
    /// configured limit is a protocol error and ends the body.
    pub async fn next_line(&mut self) -> Option<Result<String, LLMError>> {
        loop {
            if let Some(line) = Self::drain_line(&mut self.buffer) {
                return Some(Ok(String::from_utf8_lossy(&line).into_owned()));
            }
            if self.buffer.len() > self.max_line {
                let buffered = self.buffer.len();
                self.buffer = Vec::new();
                self.closed = true;
                return Some(Err(LLMError::protocol(
                    self.provider,
                    format!(
                        "stream line exceeds {} bytes without a newline ({buffered} buffered)",
                        self.max_line
                    ),
                )));
            }
            if self.closed {
                if self.buffer.is_empty() {
                    return None;
                }
                let rest: Vec<u8> = self.buffer.drain(..).collect();
                return Some(Ok(String::from_utf8_lossy(&rest).into_owned()));
            }
            match self.body.next().await {
                Some(Ok(bytes)) => self.buffer.extend_from_slice(&bytes),
                Some(Err(err)) => return Some(Err(err)),
                None => self.closed = true,
            }
        }
    }

    fn drain_line(buffer: &mut Vec<u8>) -> Option<Vec<u8>> {
        buffer.iter().position(|b| *b == b'\n').map(|pos| {
            let mut line: Vec<u8> = buffer.drain(..=pos).collect();
            if line.last() == Some(&b'\n') {
                line.pop();
            }
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            line
        })
    }
}

/// Reads a whole body, used for error responses delivered on a streaming request.
pub(crate) async fn collect_body_text(mut body: HttpBodyStream) -> Result<String, LLMError> {
    let mut bytes = Vec::new();
    while let Some(chunk) = body.next().await {
        bytes.extend_from_slice(&chunk?);
    }
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Creates the queue for one streaming call.
///
/// The worker's token is a child of `cancel`, so cancelling the caller's token or
/// dropping the returned [`EventStream`] both stop the worker.
pub(crate) fn event_channel<E>(cancel: &CancellationToken) -> (EventSender<E>, EventStream<E>) {
    let token = cancel.child_token();
    let (tx, rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
    let sender = EventSender {
        tx,
        cancel: token.clone(),
    };
    let stream = EventStream {
        rx,
        _guard: token.drop_guard(),
    };
    (sender, stream)
}

/// Worker side of a streaming call. Single producer.
pub(crate) struct EventSender<E> {
    tx: mpsc::Sender<E>,
    cancel: CancellationToken,
}

/// Returned when the consumer has withdrawn interest.
#[derive(Debug)]
pub(crate) struct Cancelled;

impl<E> EventSender<E> {
    /// Sends a non-terminal event unless the call was cancelled first.
    pub(crate) async fn send(&self, event: E) -> Result<(), Cancelled> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Cancelled),
            sent = self.tx.send(event) => sent.map_err(|_| Cancelled),
        }
    }

    /// Sends the terminal event. Consuming `self` closes the queue right after it.
    pub(crate) async fn finish(self, event: E) {
        if self.send(event).await.is_err() {
            tracing::debug!("consumer went away before the terminal event");
        }
    }

    /// Awaits `fut` unless cancellation fires first.
    pub(crate) async fn guard<F: Future>(&self, fut: F) -> Result<F::Output, Cancelled> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Cancelled),
            output = fut => Ok(output),
        }
    }
}

/// Consumer side of a streaming call.
///
/// The stream ends right after the terminal event. Ending without one means the call
/// was cancelled, never that it succeeded.
pub struct EventStream<E> {
    rx: mpsc::Receiver<E>,
    _guard: DropGuard,
}

impl<E> EventStream<E> {
    /// Waits for the next event.
    pub async fn recv(&mut self) -> Option<E> {
        self.rx.recv().await
    }
}

impl<E> Stream for EventStream<E> {
    type Item = E;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_recv(cx)
    }
}
