//! Chat-completions client used as the synthesis text generator.

mod client;
mod types;

pub use client::LlmClient;
pub use types::{ChatChoice, ChatCompletionRequest, ChatCompletionResponse, ChatMessage, Role, Usage};
