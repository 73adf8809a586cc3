use std::collections::HashMap;

use tokio_util::sync::CancellationToken;

use crate::error::LLMError;
use crate::provider::{DynProvider, ToolProvider};
use crate::stream::EventStream;
use crate::types::{Message, StreamEvent, ToolDefinition, ToolResponse, ToolStreamEvent};

/// LLM 调用入口 负责维护已注册的 Provider
pub struct LLMClient {
    providers: HashMap<String, DynProvider>,
    default_handle: Option<String>,
}

impl LLMClient {
    /// 创建 Builder 便于后续注册 Provider
    pub fn builder() -> LLMClientBuilder {
        LLMClientBuilder {
            providers: HashMap::new(),
            first_handle: None,
            default_handle: None,
        }
    }

    /// 按句柄获取 Provider
    pub fn provider(&self, handle: &str) -> Result<DynProvider, LLMError> {
        self.providers
            .get(handle)
            .cloned()
            .ok_or_else(|| unknown_handle(handle))
    }

    pub fn default_handle(&self) -> Option<&str> {
        self.default_handle.as_deref()
    }

    /// 默认 Provider 未显式指定时为第一个注册的句柄
    pub fn default_provider(&self) -> Result<DynProvider, LLMError> {
        let handle = self
            .default_handle
            .as_deref()
            .ok_or_else(|| LLMError::Validation {
                message: "no provider registered".to_string(),
            })?;
        self.provider(handle)
    }

    /// 获取支持工具调用的 Provider
    pub fn tool_provider(&self, handle: &str) -> Result<&dyn ToolProvider, LLMError> {
        self.providers
            .get(handle)
            .ok_or_else(|| unknown_handle(handle))?
            .as_tool_provider()
            .ok_or(LLMError::UnsupportedFeature {
                feature: "tool_calling",
            })
    }

    /// 发送同步请求
    pub async fn generate(&self, handle: &str, messages: &[Message]) -> Result<String, LLMError> {
        self.provider(handle)?.generate(messages).await
    }

    /// 发起流式请求
    pub async fn generate_streaming(
        &self,
        handle: &str,
        messages: &[Message],
        cancel: CancellationToken,
    ) -> Result<EventStream<StreamEvent>, LLMError> {
        self.provider(handle)?
            .generate_streaming(messages, cancel)
            .await
    }

    pub async fn generate_with_tools(
        &self,
        handle: &str,
        messages: &[Message],
        tools: &[ToolDefinition],
    ) -> Result<ToolResponse, LLMError> {
        self.tool_provider(handle)?
            .generate_with_tools(messages, tools)
            .await
    }

    pub async fn generate_streaming_with_tools(
        &self,
        handle: &str,
        messages: &[Message],
        tools: &[ToolDefinition],
        cancel: CancellationToken,
    ) -> Result<EventStream<ToolStreamEvent>, LLMError> {
        self.tool_provider(handle)?
            .generate_streaming_with_tools(messages, tools, cancel)
            .await
    }

    /// 返回当前已注册的句柄
    pub fn handles(&self) -> Vec<String> {
        self.providers.keys().cloned().collect()
    }

    /// 返回所有支持工具调用的句柄列表
    pub fn handles_supporting_tools(&self) -> Vec<String> {
        self.providers
            .iter()
            .filter(|(_, provider)| provider.as_tool_provider().is_some())
            .map(|(handle, _)| handle.clone())
            .collect()
    }
}

fn unknown_handle(handle: &str) -> LLMError {
    LLMError::Validation {
        message: format!("unknown model handle: {handle}"),
    }
}

/// 负责注册 Provider 的 Builder
pub struct LLMClientBuilder {
    providers: HashMap<String, DynProvider>,
    first_handle: Option<String>,
    default_handle: Option<String>,
}

impl LLMClientBuilder {
    /// 注册一个句柄对应的 Provider 同名句柄会被覆盖
    pub fn register_handle<S: Into<String>>(mut self, handle: S, provider: DynProvider) -> Self {
        let handle = handle.into();
        if self.first_handle.is_none() {
            self.first_handle = Some(handle.clone());
        }
        self.providers.insert(handle, provider);
        self
    }

    /// 指定默认句柄
    pub fn default_handle<S: Into<String>>(mut self, handle: S) -> Self {
        self.default_handle = Some(handle.into());
        self
    }

    /// 构建最终的 LLMClient
    ///
    /// Fails when the requested default handle was never registered.
    pub fn build(self) -> Result<LLMClient, LLMError> {
        if let Some(handle) = &self.default_handle {
            if !self.providers.contains_key(handle) {
                return Err(LLMError::InvalidConfig {
                    field: "default_handle".to_string(),
                    reason: format!("handle `{handle}` is not registered"),
                });
            }
        }
        Ok(LLMClient {
            providers: self.providers,
            default_handle: self.default_handle.or(self.first_handle),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;

    use super::*;
    use crate::provider::Provider;

    /// 简单的测试 Provider 只回显句柄名称
    struct DummyProvider {
        name: &'static str,
        tools: bool,
    }

    #[async_trait]
    impl Provider for DummyProvider {
        async fn generate(&self, _messages: &[Message]) -> Result<String, LLMError> {
            Ok(self.name.to_string())
        }

        async fn generate_streaming(
            &self,
            _messages: &[Message],
            _cancel: CancellationToken,
        ) -> Result<EventStream<StreamEvent>, LLMError> {
            Err(LLMError::UnsupportedFeature {
                feature: "dummy_stream",
            })
        }

        fn model_name(&self) -> &str {
            "dummy"
        }

        fn name(&self) -> &'static str {
            self.name
        }

        fn as_tool_provider(&self) -> Option<&dyn ToolProvider> {
            if self.tools { Some(self) } else { None }
        }
    }

    #[async_trait]
    impl ToolProvider for DummyProvider {
        async fn generate_with_tools(
            &self,
            _messages: &[Message],
            tools: &[ToolDefinition],
        ) -> Result<ToolResponse, LLMError> {
            Ok(ToolResponse {
                text: format!("{} tools", tools.len()),
                tool_calls: Vec::new(),
                done: true,
            })
        }

        async fn generate_streaming_with_tools(
            &self,
            _messages: &[Message],
            _tools: &[ToolDefinition],
            _cancel: CancellationToken,
        ) -> Result<EventStream<ToolStreamEvent>, LLMError> {
            Err(LLMError::UnsupportedFeature {
                feature: "dummy_stream",
            })
        }
    }

    fn dummy(name: &'static str, tools: bool) -> DynProvider {
        Arc::new(DummyProvider { name, tools })
    }

    #[tokio::test]
    async fn generate_routes_by_handle() {
        let client = LLMClient::builder()
            .register_handle("a", dummy("first", false))
            .register_handle("b", dummy("second", true))
            .build()
            .expect("client");

        let messages = [Message::user("hi")];
        assert_eq!(client.generate("b", &messages).await.expect("b"), "second");
        assert_eq!(client.default_handle(), Some("a"));
        assert_eq!(
            client
                .default_provider()
                .expect("default")
                .generate(&messages)
                .await
                .expect("generate"),
            "first"
        );
    }

    #[test]
    fn unknown_handle_is_a_validation_error() {
        let client = LLMClient::builder().build().expect("client");
        match client.provider("missing") {
            Err(LLMError::Validation { message }) => assert!(
                message.contains("missing"),
                "unexpected validation message: {message}"
            ),
            Err(other) => panic!("unexpected error type: {other:?}"),
            Ok(_) => panic!("expected an error"),
        }
        assert!(client.default_provider().is_err());
    }

    #[test]
    fn explicit_default_must_be_registered() {
        let err = LLMClient::builder()
            .register_handle("a", dummy("first", false))
            .default_handle("z")
            .build()
            .err()
            .expect("must fail");
        assert!(matches!(err, LLMError::InvalidConfig { .. }));
    }

    #[tokio::test]
    async fn tool_provider_requires_capability() {
        let client = LLMClient::builder()
            .register_handle("cli", dummy("cli", false))
            .register_handle("api", dummy("api", true))
            .default_handle("api")
            .build()
            .expect("client");

        assert!(matches!(
            client.tool_provider("cli"),
            Err(LLMError::UnsupportedFeature { .. })
        ));
        let tools = [ToolDefinition::new("t", "d", serde_json::json!({}))];
        let response = client
            .generate_with_tools("api", &[Message::user("hi")], &tools)
            .await
            .expect("tools");
        assert_eq!(response.text, "1 tools");
        assert_eq!(client.handles_supporting_tools(), vec!["api".to_string()]);

        let mut handles = client.handles();
        handles.sort();
        assert_eq!(handles, vec!["api".to_string(), "cli".to_string()]);
    }
}
