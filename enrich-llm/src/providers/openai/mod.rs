//! OpenAI-compatible chat completion provider

mod client;
mod completion;
mod types;

pub use client::OpenAIClient;
pub use completion::OpenAICompatibleModel;
