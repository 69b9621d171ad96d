//! The per-event reply pipeline.
//!
//! One inbound message goes through: small-talk table, admission gate, reply
//! cache, completion orchestrator, delivery. Events inside one webhook batch
//! run sequentially in payload order; separate webhook deliveries run
//! concurrently and only meet in the admission maps.

use crate::admission::{AdmissionController, canned_reply};
use anyhow::Result;
use riva_channels::{Channel, ChannelAdapter, InboundMessage, OutboundMessage};
use riva_llm::Responder;
use std::collections::HashMap;
use std::sync::Arc;

pub const THROTTLED_REPLY: &str =
    "One message at a time, please. Give me a few seconds and try again.";

pub struct ReplyPipeline {
    admission: AdmissionController,
    responder: Responder,
    channels: HashMap<Channel, Arc<dyn ChannelAdapter>>,
}

impl ReplyPipeline {
    pub fn new(
        admission: AdmissionController,
        responder: Responder,
        channels: HashMap<Channel, Arc<dyn ChannelAdapter>>,
    ) -> Self {
        Self {
            admission,
            responder,
            channels,
        }
    }

    /// Resolve and deliver the reply for one inbound message. An error here is
    /// scoped to this event; siblings in the same batch keep processing.
    #[tracing::instrument(level = "info", skip_all, fields(channel = %inbound.channel, sender = %inbound.sender_id))]
    pub async fn handle_inbound(&self, inbound: &InboundMessage) -> Result<()> {
        let reply = self.reply_for(inbound).await;
        let adapter = self.channels.get(&inbound.channel).ok_or_else(|| {
            anyhow::anyhow!("channel {} is not configured for delivery", inbound.channel)
        })?;
        adapter
            .send(inbound.sender_id.as_str(), OutboundMessage::new(reply))
            .await
    }

    async fn reply_for(&self, inbound: &InboundMessage) -> String {
        if let Some(canned) = canned_reply(&inbound.text) {
            tracing::debug!("small-talk input answered from the canned table");
            return canned.to_string();
        }

        if !self.admission.try_admit(inbound.channel, &inbound.sender_id) {
            tracing::info!("sender inside cooldown window; sending wait notice");
            return THROTTLED_REPLY.to_string();
        }

        if let Some(cached) = self.admission.lookup_reply(&inbound.text) {
            tracing::debug!("reply cache hit");
            return cached;
        }

        let reply = self
            .responder
            .respond(&inbound.text, inbound.channel.as_str())
            .await;
        if reply.from_completion {
            self.admission.store_reply(&inbound.text, &reply.text);
        }
        reply.text
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use riva_llm::{CompletionBackend, GenerationRequest, PromptSettings, RetryPolicy};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct FixedBackend {
        reply: &'static str,
        calls: AtomicUsize,
    }

    impl FixedBackend {
        fn new(reply: &'static str) -> Arc<Self> {
            Arc::new(Self {
                reply,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CompletionBackend for FixedBackend {
        async fn generate(&self, _request: &GenerationRequest) -> riva_llm::Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.reply.to_string())
        }
    }

    #[derive(Default)]
    struct RecordingAdapter {
        channel: Option<Channel>,
        sent: Mutex<Vec<(String, String)>>,
        fail: bool,
    }

    impl RecordingAdapter {
        fn for_channel(channel: Channel) -> Arc<Self> {
            Arc::new(Self {
                channel: Some(channel),
                ..Self::default()
            })
        }

        fn failing(channel: Channel) -> Arc<Self> {
            Arc::new(Self {
                channel: Some(channel),
                fail: true,
                ..Self::default()
            })
        }

        fn sent(&self) -> Vec<(String, String)> {
            self.sent.lock().expect("sent lock").clone()
        }
    }

    #[async_trait]
    impl ChannelAdapter for RecordingAdapter {
        fn channel(&self) -> Channel {
            self.channel.unwrap_or(Channel::Messenger)
        }

        async fn send(&self, recipient_id: &str, message: OutboundMessage) -> Result<()> {
            if self.fail {
                return Err(anyhow::anyhow!("send rejected"));
            }
            self.sent
                .lock()
                .expect("sent lock")
                .push((recipient_id.to_string(), message.text));
            Ok(())
        }
    }

    fn inbound(channel: Channel, sender: &str, text: &str) -> InboundMessage {
        InboundMessage {
            channel,
            sender_id: sender.into(),
            text: text.to_string(),
            received_at: Utc::now(),
        }
    }

    fn pipeline_with(
        backend: Arc<FixedBackend>,
        adapters: Vec<Arc<RecordingAdapter>>,
    ) -> ReplyPipeline {
        let responder = Responder::new(
            backend,
            RetryPolicy {
                max_attempts: 3,
                attempt_timeout: Duration::from_secs(1),
                backoff_base: Duration::from_millis(1),
                jitter_cap: Duration::ZERO,
            },
            PromptSettings {
                system_prompt: "Reply briefly.".to_string(),
                max_tokens: 64,
                temperature: 0.7,
            },
        );
        let channels = adapters
            .into_iter()
            .map(|adapter| (adapter.channel(), adapter as Arc<dyn ChannelAdapter>))
            .collect();
        ReplyPipeline::new(
            AdmissionController::new(Duration::from_secs(10), Duration::from_secs(15)),
            responder,
            channels,
        )
    }

    #[tokio::test]
    async fn second_event_inside_cooldown_gets_wait_notice() {
        let backend = FixedBackend::new("here is your answer");
        let adapter = RecordingAdapter::for_channel(Channel::Messenger);
        let pipeline = pipeline_with(backend.clone(), vec![adapter.clone()]);

        let first = inbound(Channel::Messenger, "psid-42", "what's the weather?");
        let second = inbound(Channel::Messenger, "psid-42", "hello?? anyone??");
        pipeline.handle_inbound(&first).await.expect("first event");
        pipeline.handle_inbound(&second).await.expect("second event");

        let sent = adapter.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].1, "here is your answer");
        assert_eq!(sent[1].1, THROTTLED_REPLY);
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn cache_hit_skips_the_completion_service() {
        let backend = FixedBackend::new("cached answer");
        let adapter = RecordingAdapter::for_channel(Channel::Whatsapp);
        let pipeline = pipeline_with(backend.clone(), vec![adapter.clone()]);

        let first = inbound(Channel::Whatsapp, "393331234567", "Che ore sono?");
        let second = inbound(Channel::Whatsapp, "15551230000", "che ore sono?");
        pipeline.handle_inbound(&first).await.expect("first event");
        pipeline.handle_inbound(&second).await.expect("second event");

        let sent = adapter.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].1, "cached answer");
        assert_eq!(sent[1].1, "cached answer");
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn small_talk_skips_admission_and_completion() {
        let backend = FixedBackend::new("real answer");
        let adapter = RecordingAdapter::for_channel(Channel::Instagram);
        let pipeline = pipeline_with(backend.clone(), vec![adapter.clone()]);

        let greeting = inbound(Channel::Instagram, "17841400000000001", "ciao!");
        let question = inbound(Channel::Instagram, "17841400000000001", "how late are you open?");
        pipeline.handle_inbound(&greeting).await.expect("greeting");
        pipeline.handle_inbound(&question).await.expect("question");

        // The greeting burned no admission slot: the real question still went
        // through to the completion service.
        assert_eq!(backend.calls(), 1);
        assert_eq!(adapter.sent()[1].1, "real answer");
    }

    #[tokio::test]
    async fn delivery_failure_is_scoped_to_one_event() {
        let backend = FixedBackend::new("answer");
        let broken = RecordingAdapter::failing(Channel::Messenger);
        let healthy = RecordingAdapter::for_channel(Channel::Whatsapp);
        let pipeline = pipeline_with(backend.clone(), vec![broken, healthy.clone()]);

        let first = inbound(Channel::Messenger, "psid-42", "first question");
        let second = inbound(Channel::Whatsapp, "393331234567", "second question");
        assert!(pipeline.handle_inbound(&first).await.is_err());
        pipeline.handle_inbound(&second).await.expect("sibling event");

        assert_eq!(healthy.sent().len(), 1);
    }

    #[tokio::test]
    async fn unconfigured_channel_is_an_event_error() {
        let backend = FixedBackend::new("answer");
        let adapter = RecordingAdapter::for_channel(Channel::Messenger);
        let pipeline = pipeline_with(backend, vec![adapter]);

        let event = inbound(Channel::Whatsapp, "393331234567", "anyone home?");
        assert!(pipeline.handle_inbound(&event).await.is_err());
    }
}
