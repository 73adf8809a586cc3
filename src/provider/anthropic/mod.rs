//! Anthropic Messages adapter with its content-block streaming state machine.

mod provider;
mod request;
mod response;
mod stream;
mod types;

pub use provider::{API_KEY_ENV, AnthropicProvider, DEFAULT_BASE_URL, DEFAULT_MODEL};
