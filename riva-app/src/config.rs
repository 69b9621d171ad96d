//! riva configuration loader.
//!
//! A TOML file plus environment overrides, loaded once at startup. Nothing
//! here mutates at runtime.

use riva_llm::{PromptSettings, RetryPolicy};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct RivaConfig {
    pub general: GeneralConfig,
    #[serde(default)]
    pub keys: KeysConfig,
    #[serde(default)]
    pub webhook: WebhookConfig,
    #[serde(default)]
    pub channels: ChannelsConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeneralConfig {
    pub model: String,
    pub system_prompt: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct KeysConfig {
    pub openai_api_key: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WebhookConfig {
    #[serde(default)]
    pub verify_token: String,
    /// App secret for X-Hub-Signature-256 verification. Absent means every
    /// signed POST is rejected (fail closed) unless `allow_unsigned` is set.
    #[serde(default)]
    pub app_secret: Option<String>,
    /// Local-debugging escape hatch: accept unsigned webhook posts.
    #[serde(default)]
    pub allow_unsigned: bool,
    #[serde(default)]
    pub debug_routes: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChannelsConfig {
    #[serde(default)]
    pub messenger: DirectChannelConfig,
    #[serde(default)]
    pub instagram: DirectChannelConfig,
    #[serde(default)]
    pub whatsapp: WhatsAppChannelConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DirectChannelConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub access_token: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WhatsAppChannelConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub access_token: String,
    #[serde(default)]
    pub phone_number_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    /// Minimum interval between completion calls for one sender.
    #[serde(default = "default_sender_cooldown_seconds")]
    pub sender_cooldown_seconds: u64,
    #[serde(default = "default_reply_cache_ttl_seconds")]
    pub reply_cache_ttl_seconds: u64,
    #[serde(default = "default_completion_attempts")]
    pub completion_attempts: u32,
    /// Per-attempt deadline for one completion call.
    #[serde(default = "default_completion_timeout_seconds")]
    pub completion_timeout_seconds: u64,
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,
    #[serde(default = "default_retry_jitter_ms")]
    pub retry_jitter_ms: u64,
    #[serde(default = "default_max_reply_tokens")]
    pub max_reply_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

fn default_sender_cooldown_seconds() -> u64 {
    10
}

fn default_reply_cache_ttl_seconds() -> u64 {
    15
}

fn default_completion_attempts() -> u32 {
    3
}

fn default_completion_timeout_seconds() -> u64 {
    15
}

fn default_retry_base_ms() -> u64 {
    400
}

fn default_retry_jitter_ms() -> u64 {
    250
}

fn default_max_reply_tokens() -> u32 {
    300
}

fn default_temperature() -> f32 {
    0.7
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            sender_cooldown_seconds: default_sender_cooldown_seconds(),
            reply_cache_ttl_seconds: default_reply_cache_ttl_seconds(),
            completion_attempts: default_completion_attempts(),
            completion_timeout_seconds: default_completion_timeout_seconds(),
            retry_base_ms: default_retry_base_ms(),
            retry_jitter_ms: default_retry_jitter_ms(),
            max_reply_tokens: default_max_reply_tokens(),
            temperature: default_temperature(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// Whole-request deadline; must cover the worst-case orchestrator run
    /// (attempts x per-attempt deadline plus backoff waits).
    #[serde(default = "default_http_timeout_seconds")]
    pub http_timeout_seconds: u64,
    #[serde(default = "default_http_max_in_flight")]
    pub http_max_in_flight: usize,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_http_timeout_seconds() -> u64 {
    90
}

fn default_http_max_in_flight() -> usize {
    256
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            http_timeout_seconds: default_http_timeout_seconds(),
            http_max_in_flight: default_http_max_in_flight(),
        }
    }
}

impl RivaConfig {
    pub async fn load(path: Option<PathBuf>) -> anyhow::Result<Self> {
        Ok(Self::load_with_path(path).await?.0)
    }

    pub async fn load_with_path(path: Option<PathBuf>) -> anyhow::Result<(Self, PathBuf)> {
        let path = path.unwrap_or_else(|| PathBuf::from("riva.toml"));
        let contents = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| anyhow::anyhow!("read config {}: {e}", path.display()))?;

        let mut cfg: RivaConfig = toml::from_str(&contents)
            .map_err(|e| anyhow::anyhow!("parse config {}: {e}", path.display()))?;

        cfg.apply_env_overrides();
        cfg.validate()?;
        Ok((cfg, path))
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("RIVA_MODEL") {
            if !v.trim().is_empty() {
                self.general.model = v;
            }
        }
        if let Ok(v) = std::env::var("OPENAI_API_KEY") {
            if !v.trim().is_empty() {
                self.keys.openai_api_key = Some(v);
            }
        }
        if let Ok(v) = std::env::var("VERIFY_TOKEN") {
            if !v.trim().is_empty() {
                self.webhook.verify_token = v;
            }
        }
        if let Ok(v) = std::env::var("META_APP_SECRET") {
            if !v.trim().is_empty() {
                self.webhook.app_secret = Some(v);
            }
        }
        if let Ok(v) = std::env::var("MESSENGER_ACCESS_TOKEN") {
            if !v.trim().is_empty() {
                self.channels.messenger.access_token = v;
                self.channels.messenger.enabled = true;
            }
        }
        if let Ok(v) = std::env::var("INSTAGRAM_ACCESS_TOKEN") {
            if !v.trim().is_empty() {
                self.channels.instagram.access_token = v;
                self.channels.instagram.enabled = true;
            }
        }
        if let Ok(v) = std::env::var("WHATSAPP_ACCESS_TOKEN") {
            if !v.trim().is_empty() {
                self.channels.whatsapp.access_token = v;
                self.channels.whatsapp.enabled = true;
            }
        }
        if let Ok(v) = std::env::var("WHATSAPP_PHONE_NUMBER_ID") {
            if !v.trim().is_empty() {
                self.channels.whatsapp.phone_number_id = v;
            }
        }
        if let Ok(v) = std::env::var("PORT") {
            if let Ok(port) = v.trim().parse::<u16>() {
                if let Ok(mut addr) = self.runtime.bind_addr.parse::<SocketAddr>() {
                    addr.set_port(port);
                    self.runtime.bind_addr = addr.to_string();
                }
            }
        }
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.general.model.trim().is_empty() {
            return Err(anyhow::anyhow!("general.model is required"));
        }
        if self
            .keys
            .openai_api_key
            .as_deref()
            .map(str::trim)
            .unwrap_or_default()
            .is_empty()
        {
            return Err(anyhow::anyhow!(
                "keys.openai_api_key (or env OPENAI_API_KEY) is required"
            ));
        }
        if self.webhook.verify_token.trim().is_empty() {
            return Err(anyhow::anyhow!(
                "webhook.verify_token (or env VERIFY_TOKEN) is required"
            ));
        }
        if self.limits.completion_attempts == 0 {
            return Err(anyhow::anyhow!("limits.completion_attempts must be >= 1"));
        }
        if self.channels.messenger.enabled && self.channels.messenger.access_token.trim().is_empty()
        {
            return Err(anyhow::anyhow!("channels.messenger.access_token is required"));
        }
        if self.channels.instagram.enabled && self.channels.instagram.access_token.trim().is_empty()
        {
            return Err(anyhow::anyhow!("channels.instagram.access_token is required"));
        }
        if self.channels.whatsapp.enabled {
            if self.channels.whatsapp.access_token.trim().is_empty() {
                return Err(anyhow::anyhow!("channels.whatsapp.access_token is required"));
            }
            if self.channels.whatsapp.phone_number_id.trim().is_empty() {
                return Err(anyhow::anyhow!(
                    "channels.whatsapp.phone_number_id is required"
                ));
            }
        }
        let worst_case = u64::from(self.limits.completion_attempts)
            * self.limits.completion_timeout_seconds;
        if self.runtime.http_timeout_seconds <= worst_case {
            return Err(anyhow::anyhow!(
                "runtime.http_timeout_seconds ({}) must exceed completion_attempts x completion_timeout_seconds ({worst_case})",
                self.runtime.http_timeout_seconds
            ));
        }
        if self.webhook.app_secret.is_none() && !self.webhook.allow_unsigned {
            tracing::warn!(
                "webhook.app_secret is not set; every signed webhook POST will be rejected"
            );
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> anyhow::Result<SocketAddr> {
        self.runtime
            .bind_addr
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid runtime.bind_addr {:?}: {e}", self.runtime.bind_addr))
    }

    pub fn sender_cooldown(&self) -> Duration {
        Duration::from_secs(self.limits.sender_cooldown_seconds)
    }

    pub fn reply_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.limits.reply_cache_ttl_seconds)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.limits.completion_attempts,
            attempt_timeout: Duration::from_secs(self.limits.completion_timeout_seconds),
            backoff_base: Duration::from_millis(self.limits.retry_base_ms),
            jitter_cap: Duration::from_millis(self.limits.retry_jitter_ms),
        }
    }

    pub fn prompt_settings(&self) -> PromptSettings {
        PromptSettings {
            system_prompt: self.general.system_prompt.clone(),
            max_tokens: self.limits.max_reply_tokens,
            temperature: self.limits.temperature,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_toml() -> &'static str {
        r#"
            [general]
            model = "gpt-4o-mini"
            system_prompt = "Reply briefly."

            [keys]
            openai_api_key = "sk-test"

            [webhook]
            verify_token = "letmein"
        "#
    }

    #[test]
    fn minimal_config_validates_with_defaults() {
        let cfg: RivaConfig = toml::from_str(minimal_toml()).expect("config should parse");
        cfg.validate().expect("minimal config should validate");
        assert_eq!(cfg.limits.sender_cooldown_seconds, 10);
        assert_eq!(cfg.limits.reply_cache_ttl_seconds, 15);
        assert_eq!(cfg.limits.completion_attempts, 3);
        assert_eq!(cfg.runtime.bind_addr, "0.0.0.0:3000");
    }

    #[test]
    fn enabled_channel_requires_its_token() {
        let toml = format!(
            "{}\n[channels.whatsapp]\nenabled = true\naccess_token = \"tok\"\n",
            minimal_toml()
        );
        let cfg: RivaConfig = toml::from_str(&toml).expect("config should parse");
        let err = cfg.validate().expect_err("missing phone_number_id should fail");
        assert!(err.to_string().contains("phone_number_id"));
    }

    #[test]
    fn http_timeout_must_cover_worst_case_orchestrator_run() {
        let toml = format!(
            "{}\n[runtime]\nhttp_timeout_seconds = 30\n",
            minimal_toml()
        );
        let cfg: RivaConfig = toml::from_str(&toml).expect("config should parse");
        let err = cfg.validate().expect_err("30s cannot cover 3 x 15s");
        assert!(err.to_string().contains("http_timeout_seconds"));
    }

    #[test]
    fn retry_policy_reflects_limits() {
        let cfg: RivaConfig = toml::from_str(minimal_toml()).expect("config should parse");
        let policy = cfg.retry_policy();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.attempt_timeout, Duration::from_secs(15));
        assert_eq!(policy.backoff_base, Duration::from_millis(400));
    }
}
