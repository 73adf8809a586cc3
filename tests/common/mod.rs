#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use futures_util::{StreamExt, stream};
use tsunagi_llm::LLMError;
use tsunagi_llm::http::{
    HttpBodyStream, HttpRequest, HttpResponse, HttpStreamResponse, HttpTransport,
};

/// In-memory transport that replays one scripted response and records requests.
pub struct ScriptedTransport {
    calls: AtomicUsize,
    requests: Mutex<Vec<HttpRequest>>,
    status: u16,
    headers: HashMap<String, String>,
    chunks: Vec<Vec<u8>>,
    hang_after_body: bool,
    connect_error: Option<LLMError>,
}

impl ScriptedTransport {
    pub fn ok(body: &str) -> Self {
        Self::with_status(200, body)
    }

    pub fn with_status(status: u16, body: &str) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
            status,
            headers: HashMap::new(),
            chunks: vec![body.as_bytes().to_vec()],
            hang_after_body: false,
            connect_error: None,
        }
    }

    /// Streams the given chunks verbatim, so lines may straddle chunk boundaries.
    pub fn chunked<I, S>(chunks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<[u8]>,
    {
        let mut transport = Self::ok("");
        transport.chunks = chunks.into_iter().map(|c| c.as_ref().to_vec()).collect();
        transport
    }

    pub fn failing(err: LLMError) -> Self {
        let mut transport = Self::ok("");
        transport.connect_error = Some(err);
        transport
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_string(), value.to_string());
        self
    }

    /// Keeps the body open after the scripted chunks, like a stalled backend.
    pub fn hanging(mut self) -> Self {
        self.hang_after_body = true;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> HttpRequest {
        self.requests
            .lock()
            .expect("requests lock")
            .last()
            .cloned()
            .expect("at least one request")
    }

    pub fn last_body(&self) -> serde_json::Value {
        serde_json::from_slice(&self.last_request().body).expect("request body is JSON")
    }

    fn record(&self, request: HttpRequest) -> Result<(), LLMError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().expect("requests lock").push(request);
        match &self.connect_error {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, LLMError> {
        self.record(request)?;
        Ok(HttpResponse {
            status: self.status,
            headers: self.headers.clone(),
            body: self.chunks.concat(),
        })
    }

    async fn send_stream(&self, request: HttpRequest) -> Result<HttpStreamResponse, LLMError> {
        self.record(request)?;
        let chunks = stream::iter(self.chunks.clone().into_iter().map(Ok::<_, LLMError>));
        let body: HttpBodyStream = if self.hang_after_body {
            Box::pin(chunks.chain(stream::pending()))
        } else {
            Box::pin(chunks)
        };
        Ok(HttpStreamResponse {
            status: self.status,
            headers: self.headers.clone(),
            body,
        })
    }
}

/// Renders JSON payloads as `data:` lines.
pub fn sse(payloads: &[&str]) -> String {
    payloads
        .iter()
        .map(|payload| format!("data: {payload}\n\n"))
        .collect()
}
