//! Nostr relay WebSocket client.
//!
//! This crate provides:
//! - A WebSocket session with a single Nostr relay
//! - Message parsing (NIP-01 relay protocol)
//! - Subscription filters with tag queries
//! - Signature verification and deduplication of incoming events
//!
//! # Example
//!
//! ```rust,no_run
//! use nostr_client::{Filter, RelaySession, SessionEvent};
//!
//! #[tokio::main]
//! async fn main() {
//!     let session = RelaySession::new("wss://relay.damus.io").unwrap();
//!     let mut events = session.events();
//!
//!     session.connect().await.unwrap();
//!
//!     // Subscribe to the last 50 kind 1 notes tagged with the lobby room
//!     let filter = Filter::new()
//!         .kinds(vec![1])
//!         .room_refs(vec!["lobby".to_string()])
//!         .limit(50);
//!     session.subscribe(vec![filter]).await.unwrap();
//!
//!     while let Ok(event) = events.recv().await {
//!         match event {
//!             SessionEvent::Event(event) => {
//!                 println!("received event: {}", event.id);
//!             }
//!             SessionEvent::Eose => {
//!                 println!("got all stored events");
//!             }
//!             _ => {}
//!         }
//!     }
//! }
//! ```

mod error;
mod message;
mod relay;
mod subscription;

// Re-export main types
pub use error::{ClientError, Result};
pub use message::{ClientMessage, Filter, MessageError, RelayMessage};
pub use relay::{ConnectionState, RelaySession, SessionEvent};
pub use subscription::generate_subscription_id;

/// Default relay used when none is configured.
pub const DEFAULT_RELAY: &str = "wss://relay.damus.io";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_relay() {
        assert!(DEFAULT_RELAY.starts_with("wss://"));
        assert!(RelaySession::new(DEFAULT_RELAY).is_ok());
    }
}
