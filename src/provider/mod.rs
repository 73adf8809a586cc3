use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::LLMError;
use crate::stream::EventStream;
use crate::types::{Message, StreamEvent, ToolDefinition, ToolResponse, ToolStreamEvent};

pub mod anthropic;
pub mod openai_compat;
pub(crate) mod sse;
pub mod subprocess;

/// 统一的 Provider Trait 所有后端实现该接口即可接入
///
/// Provider values are immutable after construction and may serve concurrent calls;
/// every call allocates its own buffers and transport.
#[async_trait]
pub trait Provider: Send + Sync {
    /// 提交完整对话并等待完整文本
    async fn generate(&self, messages: &[Message]) -> Result<String, LLMError>;

    /// 以流式方式返回增量事件
    ///
    /// `Err` is reserved for failures detected before the worker starts, such as a
    /// missing credential. Later failures arrive as the terminal event's `error`.
    /// Cancelling `cancel` or dropping the returned stream stops the worker.
    async fn generate_streaming(
        &self,
        messages: &[Message],
        cancel: CancellationToken,
    ) -> Result<EventStream<StreamEvent>, LLMError>;

    /// 当前模型名称 仅用于展示
    fn model_name(&self) -> &str;

    /// 后端名称
    fn name(&self) -> &'static str;

    /// Tool-calling view of this provider, when the backend can declare tools.
    fn as_tool_provider(&self) -> Option<&dyn ToolProvider> {
        None
    }
}

/// Providers whose backend accepts tool declarations.
#[async_trait]
pub trait ToolProvider: Provider {
    async fn generate_with_tools(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
    ) -> Result<ToolResponse, LLMError>;

    async fn generate_streaming_with_tools(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
        cancel: CancellationToken,
    ) -> Result<EventStream<ToolStreamEvent>, LLMError>;
}

/// 线程安全 Provider
pub type DynProvider = Arc<dyn Provider>;
