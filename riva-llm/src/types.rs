use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

/// One completion attempt as handed to a [`crate::CompletionBackend`].
///
/// `timeout` is the per-attempt deadline; the transport applies it to the
/// request and the retry driver enforces it around the whole call.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub prompt: String,
    pub system_instruction: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub timeout: Duration,
}
