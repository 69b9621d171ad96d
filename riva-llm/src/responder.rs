use crate::error::{ErrorClass, LlmError, Result, classify};
use crate::types::GenerationRequest;
use async_trait::async_trait;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;

/// Transport seam for the retry driver. The production implementation is
/// [`crate::CompletionClient`]; tests script this trait directly.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<String>;
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Deadline for one attempt; an attempt past it is cancelled and counts as
    /// a transient failure.
    pub attempt_timeout: Duration,
    pub backoff_base: Duration,
    /// Upper bound on the random addition to each backoff wait.
    pub jitter_cap: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            attempt_timeout: Duration::from_secs(15),
            backoff_base: Duration::from_millis(400),
            jitter_cap: Duration::from_millis(250),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PromptSettings {
    pub system_prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

pub const EMPTY_PROMPT_REPLY: &str =
    "I didn't catch any text in your message. Could you send it again?";
pub const RATE_LIMITED_REPLY: &str =
    "I'm handling too many requests right now. Please try again in a moment.";
pub const CONNECTIVITY_REPLY: &str =
    "I'm having a temporary connectivity issue. Please try again shortly.";
pub const MISCONFIGURED_REPLY: &str =
    "The assistant is unavailable right now due to a configuration issue. Please try again later.";
pub const UNINTELLIGIBLE_REPLY: &str =
    "I couldn't come up with an answer for that. Could you rephrase?";

/// What `respond` resolved to. Only completion content is worth caching;
/// fallback notices describe a moment in time, not an answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub text: String,
    pub from_completion: bool,
}

impl Reply {
    fn completion(text: String) -> Self {
        Self {
            text,
            from_completion: true,
        }
    }

    fn fallback(text: &str) -> Self {
        Self {
            text: text.to_string(),
            from_completion: false,
        }
    }
}

/// Drives completion attempts to a terminal reply.
///
/// Every path resolves to user-facing text; nothing escapes `respond` as an
/// error. Terminal states are either the trimmed completion content or one of
/// the fixed fallback strings above.
pub struct Responder {
    backend: Arc<dyn CompletionBackend>,
    policy: RetryPolicy,
    prompt: PromptSettings,
}

impl Responder {
    pub fn new(backend: Arc<dyn CompletionBackend>, policy: RetryPolicy, prompt: PromptSettings) -> Self {
        Self {
            backend,
            policy,
            prompt,
        }
    }

    #[tracing::instrument(level = "info", skip_all, fields(channel = channel_hint))]
    pub async fn respond(&self, text: &str, channel_hint: &str) -> Reply {
        let prompt = text.trim();
        if prompt.is_empty() {
            return Reply::fallback(EMPTY_PROMPT_REPLY);
        }

        let request = GenerationRequest {
            prompt: prompt.to_string(),
            system_instruction: format!(
                "{}\nYou are replying inside a {channel_hint} direct-message thread. Keep replies short and conversational.",
                self.prompt.system_prompt
            ),
            max_tokens: self.prompt.max_tokens,
            temperature: self.prompt.temperature,
            timeout: self.policy.attempt_timeout,
        };

        let mut attempt: u32 = 1;
        loop {
            let result = match tokio::time::timeout(
                self.policy.attempt_timeout,
                self.backend.generate(&request),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(LlmError::Timeout),
            };

            let error = match result {
                Ok(reply) => return Reply::completion(reply.trim().to_string()),
                Err(error) => error,
            };

            let exhausted = attempt >= self.policy.max_attempts;
            match classify(&error) {
                ErrorClass::NonRetryable => {
                    tracing::error!(%error, attempt, "completion request rejected; not retrying");
                    return Reply::fallback(MISCONFIGURED_REPLY);
                }
                ErrorClass::Empty => {
                    if exhausted {
                        return Reply::fallback(UNINTELLIGIBLE_REPLY);
                    }
                    tracing::debug!(attempt, "empty completion; retrying");
                }
                ErrorClass::RateLimited(retry_after) => {
                    if exhausted {
                        tracing::warn!(%error, attempt, "rate-limit retries exhausted");
                        return Reply::fallback(RATE_LIMITED_REPLY);
                    }
                    let delay = retry_after.unwrap_or_else(|| self.backoff_delay(attempt));
                    tracing::warn!(%error, attempt, ?delay, "completion rate limited; waiting before retry");
                    tokio::time::sleep(delay).await;
                }
                ErrorClass::Transient | ErrorClass::Timeout => {
                    if exhausted {
                        tracing::warn!(%error, attempt, "completion attempts exhausted");
                        return Reply::fallback(CONNECTIVITY_REPLY);
                    }
                    let delay = self.backoff_delay(attempt);
                    tracing::warn!(%error, attempt, ?delay, "transient completion failure; retrying with backoff");
                    tokio::time::sleep(delay).await;
                }
            }
            attempt += 1;
        }
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = self.policy.backoff_base.saturating_mul(attempt);
        let cap_ms = self.policy.jitter_cap.as_millis() as u64;
        if cap_ms == 0 {
            return base;
        }
        base + Duration::from_millis(rand::thread_rng().gen_range(0..=cap_ms))
    }
}
