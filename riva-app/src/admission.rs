//! Per-sender admission control and the shared reply cache.
//!
//! Both maps are process-wide and hit concurrently by every webhook handler;
//! DashMap's entry API supplies the per-key check-and-set atomicity, and
//! nothing here holds a lock across an await point.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use riva_channels::{Channel, SenderId};
use std::time::{Duration, Instant};

pub struct AdmissionController {
    cooldown: Duration,
    cache_ttl: Duration,
    throttle: DashMap<(Channel, SenderId), Instant>,
    replies: DashMap<String, CachedReply>,
}

struct CachedReply {
    reply: String,
    stored_at: Instant,
}

impl AdmissionController {
    pub fn new(cooldown: Duration, cache_ttl: Duration) -> Self {
        Self {
            cooldown,
            cache_ttl,
            throttle: DashMap::new(),
            replies: DashMap::new(),
        }
    }

    /// One completion call per sender per cooldown window. The stamp is taken
    /// at admission, not completion, so a call still in flight keeps blocking
    /// its sender. Atomic per key: of two simultaneous events for one sender,
    /// exactly one is admitted.
    pub fn try_admit(&self, channel: Channel, sender: &SenderId) -> bool {
        let now = Instant::now();
        match self.throttle.entry((channel, sender.clone())) {
            Entry::Occupied(mut entry) => {
                if now.duration_since(*entry.get()) >= self.cooldown {
                    entry.insert(now);
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(now);
                true
            }
        }
    }

    /// Cache lookup keyed by trimmed, lowercased text, shared across senders
    /// and channels. An entry whose age has reached the TTL counts as a miss
    /// (at exactly the TTL boundary it is already expired) and is dropped on
    /// read; there is no other eviction.
    pub fn lookup_reply(&self, text: &str) -> Option<String> {
        let key = cache_key(text);
        let ttl = self.cache_ttl;
        {
            let entry = self.replies.get(&key)?;
            if entry.stored_at.elapsed() < ttl {
                return Some(entry.reply.clone());
            }
        }
        self.replies
            .remove_if(&key, |_, cached| cached.stored_at.elapsed() >= ttl);
        None
    }

    pub fn store_reply(&self, text: &str, reply: &str) {
        self.replies.insert(
            cache_key(text),
            CachedReply {
                reply: reply.to_string(),
                stored_at: Instant::now(),
            },
        );
    }
}

fn cache_key(text: &str) -> String {
    text.trim().to_lowercase()
}

const GREETING_REPLY: &str = "Hi! Ask me anything and I'll do my best to help.";
const ACK_REPLY: &str = "\u{1F44D}";
const THANKS_REPLY: &str = "You're welcome!";

/// Non-substantive input answered from a fixed table: no admission slot, no
/// cache entry, no completion call.
pub fn canned_reply(text: &str) -> Option<&'static str> {
    let normalized = text
        .trim()
        .trim_end_matches(['!', '.', '?'])
        .to_lowercase();
    match normalized.as_str() {
        "hi" | "hello" | "hey" | "ciao" | "hola" | "yo" | "good morning" | "good evening" => {
            Some(GREETING_REPLY)
        }
        "ok" | "okay" | "k" | "kk" | "cool" | "great" | "nice" => Some(ACK_REPLY),
        "thanks" | "thank you" | "thx" | "ty" | "grazie" => Some(THANKS_REPLY),
        _ => is_emoji_only(text).then_some(ACK_REPLY),
    }
}

fn is_emoji_only(text: &str) -> bool {
    let trimmed = text.trim();
    !trimmed.is_empty()
        && trimmed
            .chars()
            .all(|c| c.is_whitespace() || (!c.is_ascii() && !c.is_alphanumeric()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Barrier};

    fn sender(id: &str) -> SenderId {
        SenderId::from(id)
    }

    #[test]
    fn admission_denies_inside_window_and_admits_after() {
        let controller =
            AdmissionController::new(Duration::from_millis(80), Duration::from_secs(15));
        let user = sender("user-1");

        assert!(controller.try_admit(Channel::Messenger, &user));
        assert!(!controller.try_admit(Channel::Messenger, &user));
        std::thread::sleep(Duration::from_millis(100));
        assert!(controller.try_admit(Channel::Messenger, &user));
    }

    #[test]
    fn admission_keys_are_per_channel_and_sender() {
        let controller =
            AdmissionController::new(Duration::from_secs(10), Duration::from_secs(15));

        assert!(controller.try_admit(Channel::Messenger, &sender("user-1")));
        assert!(controller.try_admit(Channel::Whatsapp, &sender("user-1")));
        assert!(controller.try_admit(Channel::Messenger, &sender("user-2")));
        assert!(!controller.try_admit(Channel::Messenger, &sender("user-1")));
    }

    #[test]
    fn concurrent_admission_admits_exactly_one() {
        let controller = Arc::new(AdmissionController::new(
            Duration::from_secs(10),
            Duration::from_secs(15),
        ));
        let barrier = Arc::new(Barrier::new(2));

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let controller = controller.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    controller.try_admit(Channel::Whatsapp, &SenderId::from("393331234567"))
                })
            })
            .collect();

        let admitted = handles
            .into_iter()
            .map(|handle| handle.join().expect("thread join"))
            .filter(|admitted| *admitted)
            .count();
        assert_eq!(admitted, 1);
    }

    #[test]
    fn cache_returns_verbatim_within_ttl_and_misses_after() {
        let controller =
            AdmissionController::new(Duration::from_secs(10), Duration::from_millis(50));

        controller.store_reply("  What's The Weather?  ", "Sunny, 25C.");
        assert_eq!(
            controller.lookup_reply("what's the weather?").as_deref(),
            Some("Sunny, 25C.")
        );

        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(controller.lookup_reply("what's the weather?"), None);
    }

    #[test]
    fn cache_key_is_case_insensitive_and_trimmed() {
        let controller =
            AdmissionController::new(Duration::from_secs(10), Duration::from_secs(15));
        controller.store_reply("Ciao Bella", "Ciao!");
        assert_eq!(
            controller.lookup_reply("  ciao bella ").as_deref(),
            Some("Ciao!")
        );
        assert_eq!(controller.lookup_reply("ciao"), None);
    }

    #[test]
    fn small_talk_table_catches_noise() {
        assert!(canned_reply("hi").is_some());
        assert!(canned_reply("  Hello!  ").is_some());
        assert!(canned_reply("thank you").is_some());
        assert!(canned_reply("ok.").is_some());
        assert!(canned_reply("\u{1F44D}").is_some());
        assert!(canned_reply("\u{1F602}\u{1F602}").is_some());
    }

    #[test]
    fn substantive_text_is_not_noise() {
        assert!(canned_reply("hi, can you check my order status?").is_none());
        assert!(canned_reply("what's the weather?").is_none());
        assert!(canned_reply("thanks to your help I broke prod").is_none());
    }
}
