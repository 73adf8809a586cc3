//! LLM 多后端统一调用库
//!
//! One request/response and streaming contract over OpenAI-compatible HTTP backends,
//! Anthropic Messages, and locally installed model CLIs.

pub mod accumulator;
pub mod client;
pub mod config;
pub mod error;
pub mod http;
pub mod provider;
pub mod stream;
pub mod types;

pub use accumulator::ToolCallAccumulator;
pub use client::LLMClient;
pub use config::{ProviderConfig, ProviderKind, build_client_from_configs, build_provider};
pub use error::{ErrorKind, LLMError};
pub use provider::anthropic::AnthropicProvider;
pub use provider::openai_compat::{OpenAiCompatProvider, OpenAiFlavor};
pub use provider::subprocess::{CliKind, SubprocessProvider};
pub use provider::{DynProvider, Provider, ToolProvider};
pub use stream::{EventStream, decode_data_line};
pub use types::*;
