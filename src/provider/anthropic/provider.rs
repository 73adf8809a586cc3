use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::{LLMError, http_status_error};
use crate::http::{DynHttpTransport, build_stream_request, post_json_with_headers};
use crate::provider::{Provider, ToolProvider, sse};
use crate::stream::{EventStream, event_channel};
use crate::types::{Message, StreamEvent, ToolDefinition, ToolResponse, ToolStreamEvent};

use super::request::build_anthropic_body;
use super::response::map_response;
use super::stream::AnthropicStreamState;
use super::types::AnthropicMessageResponse;

pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";
pub const API_KEY_ENV: &str = "ANTHROPIC_API_KEY";
const DEFAULT_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Anthropic Messages Provider
pub struct AnthropicProvider {
    pub(crate) transport: DynHttpTransport,
    pub(crate) base_url: String,
    pub(crate) api_key: Option<String>,
    pub(crate) version: String,
    pub(crate) beta: Option<String>,
    pub(crate) model: String,
    pub(crate) max_tokens: u32,
    pub(crate) timeout: Option<Duration>,
    pub(crate) extra_headers: HashMap<String, String>,
}

impl AnthropicProvider {
    /// 使用默认 base_url 与 anthropic-version 创建 Provider
    pub fn new(transport: DynHttpTransport) -> Self {
        Self {
            transport,
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: None,
            version: DEFAULT_VERSION.to_string(),
            beta: None,
            model: DEFAULT_MODEL.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            timeout: None,
            extra_headers: HashMap::new(),
        }
    }

    /// 设置 API Key 空字符串视为未配置
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        let api_key = api_key.into();
        self.api_key = (!api_key.trim().is_empty()).then_some(api_key);
        self
    }

    /// 自定义 base_url 便于接入代理或兼容层
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// 自定义 Anthropic API 版本
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// 设置 anthropic-beta 头 支持逗号分隔的 beta 列表
    pub fn with_beta(mut self, beta: impl Into<String>) -> Self {
        self.beta = Some(beta.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_headers.insert(name.into(), value.into());
        self
    }

    pub(crate) fn endpoint(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        if base.ends_with("/v1") {
            format!("{base}/messages")
        } else {
            format!("{base}/v1/messages")
        }
    }

    fn build_headers(&self) -> Result<HashMap<String, String>, LLMError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or(LLMError::MissingCredential {
                provider: "anthropic",
                config_key: "api_key",
                env_var: API_KEY_ENV,
            })?;

        let mut headers = HashMap::new();
        headers.insert("x-api-key".to_string(), api_key.to_string());
        headers.insert("Accept".to_string(), "application/json".to_string());
        headers.insert("anthropic-version".to_string(), self.version.clone());
        if let Some(beta) = &self.beta {
            headers.insert("anthropic-beta".to_string(), beta.clone());
        }
        headers.extend(self.extra_headers.clone());
        Ok(headers)
    }

    fn prepare(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
        stream: bool,
    ) -> Result<(HashMap<String, String>, Value), LLMError> {
        let headers = self.build_headers()?;
        let body = build_anthropic_body(messages, tools, &self.model, self.max_tokens, stream)?;
        tracing::debug!(
            provider = self.name(),
            model = %self.model,
            stream,
            tools = tools.len(),
            "dispatching messages request"
        );
        Ok((headers, body))
    }

    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
    ) -> Result<ToolResponse, LLMError> {
        let (headers, body) = self.prepare(messages, tools, false)?;
        let response = post_json_with_headers(
            self.transport.as_ref(),
            self.endpoint(),
            headers,
            self.timeout,
            &body,
        )
        .await
        .map_err(|err| err.with_provider(self.name()))
        .inspect_err(|err| {
            tracing::error!(provider = self.name(), error = %err, "upstream request failed");
        })?;

        let status = response.status;
        let response_headers = response.headers.clone();
        let text = response.into_string()?;
        if !(200..300).contains(&status) {
            tracing::warn!(provider = self.name(), status, "upstream returned error");
            return Err(http_status_error(status, &response_headers, &text));
        }

        let parsed: AnthropicMessageResponse = serde_json::from_str(&text).map_err(|err| {
            LLMError::protocol(
                self.name(),
                format!("failed to parse Anthropic response: {err}"),
            )
        })?;
        map_response(parsed, self.name())
    }

    fn spawn_stream<E>(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
        cancel: CancellationToken,
    ) -> Result<EventStream<E>, LLMError>
    where
        E: From<ToolStreamEvent> + Send + 'static,
    {
        let (headers, body) = self.prepare(messages, tools, true)?;
        let request = build_stream_request(self.endpoint(), headers, self.timeout, &body)?;
        let (sender, events) = event_channel(&cancel);
        tokio::spawn(sse::drive(
            self.transport.clone(),
            request,
            AnthropicStreamState::new(self.name()),
            sender,
        ));
        Ok(events)
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    async fn generate(&self, messages: &[Message]) -> Result<String, LLMError> {
        Ok(self.complete(messages, &[]).await?.text)
    }

    async fn generate_streaming(
        &self,
        messages: &[Message],
        cancel: CancellationToken,
    ) -> Result<EventStream<StreamEvent>, LLMError> {
        self.spawn_stream(messages, &[], cancel)
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn name(&self) -> &'static str {
        "anthropic"
    }

    fn as_tool_provider(&self) -> Option<&dyn ToolProvider> {
        Some(self)
    }
}

#[async_trait]
impl ToolProvider for AnthropicProvider {
    async fn generate_with_tools(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
    ) -> Result<ToolResponse, LLMError> {
        self.complete(messages, tools).await
    }

    async fn generate_streaming_with_tools(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
        cancel: CancellationToken,
    ) -> Result<EventStream<ToolStreamEvent>, LLMError> {
        self.spawn_stream(messages, tools, cancel)
    }
}
