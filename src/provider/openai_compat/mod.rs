//! Chat Completions family: OpenAI, OpenRouter and LiteLLM.

mod provider;
mod request;
mod response;
mod stream;
mod types;

pub use provider::{OpenAiCompatProvider, OpenAiFlavor};
