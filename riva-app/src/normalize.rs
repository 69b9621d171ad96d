//! Inbound event normalization.
//!
//! The three surfaces deliver two distinct envelope shapes: Messenger uses
//! `entry[].messaging[]` sender/message pairs, while Instagram and WhatsApp
//! arrive as `entry[].changes[].value.messages[]` and are told apart by whether
//! the `from` field reads like an E.164 phone number. Everything decodes with
//! defaults so partial or unknown shapes skip quietly instead of failing.

use chrono::Utc;
use riva_channels::{Channel, InboundMessage};
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
pub struct EventEnvelope {
    #[serde(default)]
    entry: Vec<EventEntry>,
}

#[derive(Debug, Default, Deserialize)]
struct EventEntry {
    #[serde(default)]
    messaging: Vec<DirectMessagingEvent>,
    #[serde(default)]
    changes: Vec<ValueChange>,
}

#[derive(Debug, Default, Deserialize)]
struct DirectMessagingEvent {
    #[serde(default)]
    sender: Option<EventPeer>,
    #[serde(default)]
    message: Option<DirectMessageBody>,
}

#[derive(Debug, Default, Deserialize)]
struct EventPeer {
    #[serde(default)]
    id: String,
}

#[derive(Debug, Default, Deserialize)]
struct DirectMessageBody {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ValueChange {
    #[serde(default)]
    value: ChangeValue,
}

#[derive(Debug, Default, Deserialize)]
struct ChangeValue {
    #[serde(default)]
    messages: Vec<PlatformMessage>,
}

#[derive(Debug, Default, Deserialize)]
struct PlatformMessage {
    #[serde(default)]
    from: String,
    #[serde(default)]
    text: Option<MessageText>,
}

#[derive(Debug, Default, Deserialize)]
struct MessageText {
    #[serde(default)]
    body: String,
}

/// Flatten one webhook envelope into canonical inbound messages, in payload
/// order. Sub-events without both a sender and non-empty text (attachments,
/// read receipts, delivery reports) yield nothing. Recomputed fresh per call.
pub fn normalize(envelope: &EventEnvelope) -> Vec<InboundMessage> {
    let mut inbound = Vec::new();
    for entry in &envelope.entry {
        if !entry.messaging.is_empty() {
            for event in &entry.messaging {
                inbound.extend(convert_direct_event(event));
            }
            continue;
        }
        for change in &entry.changes {
            for message in &change.value.messages {
                inbound.extend(convert_platform_message(message));
            }
        }
    }
    inbound
}

fn convert_direct_event(event: &DirectMessagingEvent) -> Option<InboundMessage> {
    let sender = event.sender.as_ref()?.id.trim();
    if sender.is_empty() {
        return None;
    }
    let text = event
        .message
        .as_ref()?
        .text
        .as_deref()
        .map(str::trim)
        .filter(|text| !text.is_empty())?;
    Some(InboundMessage {
        channel: Channel::Messenger,
        sender_id: sender.into(),
        text: text.to_string(),
        received_at: Utc::now(),
    })
}

fn convert_platform_message(message: &PlatformMessage) -> Option<InboundMessage> {
    let sender = message.from.trim();
    if sender.is_empty() {
        return None;
    }
    let text = message
        .text
        .as_ref()
        .map(|text| text.body.trim())
        .filter(|text| !text.is_empty())?;
    let channel = if is_e164_like(sender) {
        Channel::Whatsapp
    } else {
        Channel::Instagram
    };
    Some(InboundMessage {
        channel,
        sender_id: sender.into(),
        text: text.to_string(),
        received_at: Utc::now(),
    })
}

/// WhatsApp senders are E.164 phone numbers (optional `+`, 8-15 digits);
/// Instagram-scoped user ids are longer all-digit strings.
fn is_e164_like(id: &str) -> bool {
    let digits = id.strip_prefix('+').unwrap_or(id);
    (8..=15).contains(&digits.len()) && digits.bytes().all(|b| b.is_ascii_digit())
}
