use crate::traits::ChannelAdapter;
use crate::types::{Channel, OutboundMessage};
use anyhow::{Result, anyhow};
use reqwest::Url;

const GRAPH_API_VERSION: &str = "v20.0";

/// Messenger and Instagram DM delivery via the page-scoped Graph Send API.
/// Both surfaces use the same `me/messages` call with a page access token;
/// only the token differs per surface.
#[derive(Clone)]
pub struct GraphDirectAdapter {
    http: reqwest::Client,
    channel: Channel,
    access_token: String,
}

impl GraphDirectAdapter {
    pub fn new(channel: Channel, access_token: &str) -> Result<Self> {
        if channel == Channel::Whatsapp {
            return Err(anyhow!(
                "whatsapp delivery goes through WhatsAppCloudAdapter, not the Send API"
            ));
        }
        let access_token = access_token.trim();
        if access_token.is_empty() {
            return Err(anyhow!("{channel} access token is required"));
        }
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            channel,
            access_token: access_token.to_string(),
        })
    }

    fn messages_url(&self) -> Result<Url> {
        Url::parse(&format!(
            "https://graph.facebook.com/{GRAPH_API_VERSION}/me/messages"
        ))
        .map_err(|e| anyhow!("invalid graph API URL: {e}"))
    }
}

#[async_trait::async_trait]
impl ChannelAdapter for GraphDirectAdapter {
    fn channel(&self) -> Channel {
        self.channel
    }

    async fn send(&self, recipient_id: &str, message: OutboundMessage) -> Result<()> {
        let to = recipient_id.trim();
        if to.is_empty() {
            return Err(anyhow!("recipient_id is required"));
        }
        let text = message.text.trim();
        if text.is_empty() {
            return Err(anyhow!("message text is empty"));
        }

        let url = self.messages_url()?;
        let payload = serde_json::json!({
            "recipient": { "id": to },
            "messaging_type": "RESPONSE",
            "message": { "text": text },
        });

        let response = self
            .http
            .post(url)
            .bearer_auth(&self.access_token)
            .json(&payload)
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(anyhow!(
                "{} send failed: status={} body={}",
                self.channel,
                status,
                body
            ));
        }
        tracing::debug!(channel = %self.channel, recipient = %to, "send ok");

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_whatsapp_and_blank_tokens() {
        assert!(GraphDirectAdapter::new(Channel::Whatsapp, "token").is_err());
        assert!(GraphDirectAdapter::new(Channel::Messenger, "   ").is_err());
        assert!(GraphDirectAdapter::new(Channel::Instagram, "token").is_ok());
    }
}
