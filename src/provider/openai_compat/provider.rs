use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::{LLMError, http_status_error};
use crate::http::{DynHttpTransport, build_stream_request, post_json_with_headers};
use crate::provider::{Provider, ToolProvider, sse};
use crate::stream::{EventStream, event_channel};
use crate::types::{Message, StreamEvent, ToolDefinition, ToolResponse, ToolStreamEvent};

use super::request::build_openai_body;
use super::response::map_response;
use super::stream::OpenAiStreamState;
use super::types::OpenAiChatResponse;

const OPENROUTER_REFERER: &str = "https://github.com/tsunagi-llm/tsunagi";
const OPENROUTER_TITLE: &str = "tsunagi-llm";

/// Backends that speak the Chat Completions wire format.
///
/// They share request/response schema and accumulation strategy; only endpoint,
/// headers and credential source differ.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpenAiFlavor {
    /// api.openai.com
    OpenAi,
    /// OpenRouter routing proxy
    OpenRouter,
    /// LiteLLM unifying proxy, usually self-hosted
    LiteLlm,
}

impl OpenAiFlavor {
    pub fn name(&self) -> &'static str {
        match self {
            OpenAiFlavor::OpenAi => "openai",
            OpenAiFlavor::OpenRouter => "openrouter",
            OpenAiFlavor::LiteLlm => "litellm",
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            OpenAiFlavor::OpenAi => "https://api.openai.com/v1",
            OpenAiFlavor::OpenRouter => "https://openrouter.ai/api/v1",
            OpenAiFlavor::LiteLlm => "http://localhost:4000",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            OpenAiFlavor::OpenAi | OpenAiFlavor::LiteLlm => "gpt-4o",
            OpenAiFlavor::OpenRouter => "openai/gpt-4o",
        }
    }

    /// Environment variable consulted when no key is configured.
    pub fn api_key_env(&self) -> &'static str {
        match self {
            OpenAiFlavor::OpenAi => "OPENAI_API_KEY",
            OpenAiFlavor::OpenRouter => "OPENROUTER_API_KEY",
            OpenAiFlavor::LiteLlm => "LITELLM_API_KEY",
        }
    }

    /// Environment variable consulted when no base URL is configured.
    pub fn base_url_env(&self) -> Option<&'static str> {
        match self {
            OpenAiFlavor::LiteLlm => Some("LITELLM_BASE_URL"),
            _ => None,
        }
    }
}

/// OpenAI-compatible Chat Completions provider
pub struct OpenAiCompatProvider {
    pub(crate) transport: DynHttpTransport,
    pub(crate) flavor: OpenAiFlavor,
    pub(crate) base_url: String,
    pub(crate) api_key: Option<String>,
    pub(crate) model: String,
    pub(crate) timeout: Option<Duration>,
    pub(crate) extra_headers: HashMap<String, String>,
}

impl OpenAiCompatProvider {
    /// 创建带默认 base_url 与默认模型的 Provider
    pub fn new(transport: DynHttpTransport, flavor: OpenAiFlavor) -> Self {
        Self {
            transport,
            flavor,
            base_url: flavor.default_base_url().to_string(),
            api_key: None,
            model: flavor.default_model().to_string(),
            timeout: None,
            extra_headers: HashMap::new(),
        }
    }

    pub fn openai(transport: DynHttpTransport, api_key: impl Into<String>) -> Self {
        Self::new(transport, OpenAiFlavor::OpenAi).with_api_key(api_key)
    }

    pub fn openrouter(transport: DynHttpTransport, api_key: impl Into<String>) -> Self {
        Self::new(transport, OpenAiFlavor::OpenRouter).with_api_key(api_key)
    }

    pub fn litellm(transport: DynHttpTransport, api_key: impl Into<String>) -> Self {
        Self::new(transport, OpenAiFlavor::LiteLlm).with_api_key(api_key)
    }

    /// 设置 API Key 空字符串视为未配置
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        let api_key = api_key.into();
        self.api_key = (!api_key.trim().is_empty()).then_some(api_key);
        self
    }

    /// 自定义 base_url
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// 设置模型
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// 请求超时
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// 附加请求头 覆盖同名默认值
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_headers.insert(name.into(), value.into());
        self
    }

    pub fn flavor(&self) -> OpenAiFlavor {
        self.flavor
    }

    pub(crate) fn endpoint(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        if base.ends_with("/v1") {
            format!("{base}/chat/completions")
        } else {
            format!("{base}/v1/chat/completions")
        }
    }

    /// Fails before any transport use when no credential was resolved.
    fn build_headers(&self) -> Result<HashMap<String, String>, LLMError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or(LLMError::MissingCredential {
                provider: self.flavor.name(),
                config_key: "api_key",
                env_var: self.flavor.api_key_env(),
            })?;

        let mut headers = HashMap::new();
        headers.insert("Authorization".to_string(), format!("Bearer {api_key}"));
        headers.insert("Accept".to_string(), "application/json".to_string());
        if self.flavor == OpenAiFlavor::OpenRouter {
            headers.insert("HTTP-Referer".to_string(), OPENROUTER_REFERER.to_string());
            headers.insert("X-Title".to_string(), OPENROUTER_TITLE.to_string());
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
        let body = build_openai_body(messages, tools, &self.model, stream)?;
        tracing::debug!(
            provider = self.name(),
            model = %self.model,
            stream,
            tools = tools.len(),
            "dispatching chat completion"
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

        let parsed: OpenAiChatResponse = serde_json::from_str(&text).map_err(|err| {
            LLMError::protocol(self.name(), format!("failed to parse response: {err}"))
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
            OpenAiStreamState::new(self.name()),
            sender,
        ));
        Ok(events)
    }
}

#[async_trait]
impl Provider for OpenAiCompatProvider {
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
        self.flavor.name()
    }

    fn as_tool_provider(&self) -> Option<&dyn ToolProvider> {
        Some(self)
    }
}

#[async_trait]
impl ToolProvider for OpenAiCompatProvider {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::reqwest::default_dyn_transport;

    fn provider(flavor: OpenAiFlavor) -> OpenAiCompatProvider {
        OpenAiCompatProvider::new(default_dyn_transport().expect("transport"), flavor)
    }

    #[test]
    fn endpoint_joins_with_or_without_version_suffix() {
        assert_eq!(
            provider(OpenAiFlavor::OpenAi).endpoint(),
            "https://api.openai.com/v1/chat/completions"
        );
        assert_eq!(
            provider(OpenAiFlavor::OpenRouter).endpoint(),
            "https://openrouter.ai/api/v1/chat/completions"
        );
        assert_eq!(
            provider(OpenAiFlavor::LiteLlm).endpoint(),
            "http://localhost:4000/v1/chat/completions"
        );
        assert_eq!(
            provider(OpenAiFlavor::LiteLlm)
                .with_base_url("http://proxy:8080/")
                .endpoint(),
            "http://proxy:8080/v1/chat/completions"
        );
    }

    #[test]
    fn headers_differ_only_by_flavor_extras() {
        let openai = provider(OpenAiFlavor::OpenAi)
            .with_api_key("sk-1")
            .build_headers()
            .expect("headers");
        assert_eq!(openai.get("Authorization").map(String::as_str), Some("Bearer sk-1"));
        assert!(!openai.contains_key("HTTP-Referer"));

        let router = provider(OpenAiFlavor::OpenRouter)
            .with_api_key("or-1")
            .with_header("X-Title", "my-agent")
            .build_headers()
            .expect("headers");
        assert_eq!(router.get("HTTP-Referer").map(String::as_str), Some(OPENROUTER_REFERER));
        assert_eq!(router.get("X-Title").map(String::as_str), Some("my-agent"));
    }

    #[test]
    fn blank_api_key_counts_as_missing() {
        let err = provider(OpenAiFlavor::LiteLlm)
            .with_api_key("   ")
            .build_headers()
            .expect_err("must fail");
        match err {
            LLMError::MissingCredential { env_var, .. } => assert_eq!(env_var, "LITELLM_API_KEY"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn flavor_serializes_lowercase() {
        assert_eq!(
            serde_json::to_value(OpenAiFlavor::OpenRouter).expect("serialize"),
            serde_json::json!("openrouter")
        );
    }
}
