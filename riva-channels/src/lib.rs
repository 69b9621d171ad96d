//! Channel adapters for riva.
//!
//! Adapters are pure outbound I/O: they turn a reply string into the
//! platform-specific send call. Inbound events arrive over webhooks and are
//! normalized in the app crate, so there is no receive side here.

mod graph;
mod traits;
mod types;
mod whatsapp;

pub use graph::GraphDirectAdapter;
pub use traits::ChannelAdapter;
pub use types::{Channel, InboundMessage, OutboundMessage, SenderId};
pub use whatsapp::WhatsAppCloudAdapter;
