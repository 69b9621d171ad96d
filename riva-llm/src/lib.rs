//! Completion-service client for riva.
//!
//! Pure HTTP plus the bounded-retry reply orchestrator. This crate knows nothing
//! about webhooks or messaging channels; the channel name it receives is prompt
//! context only.

mod client;
mod error;
mod responder;
mod types;

pub use client::CompletionClient;
pub use error::{ErrorClass, LlmError, Result, classify};
pub use responder::{
    CONNECTIVITY_REPLY, CompletionBackend, EMPTY_PROMPT_REPLY, MISCONFIGURED_REPLY, PromptSettings,
    RATE_LIMITED_REPLY, Reply, Responder, RetryPolicy, UNINTELLIGIBLE_REPLY,
};
pub use types::{ChatMessage, GenerationRequest, Role};
