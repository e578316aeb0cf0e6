//! Chat state machine over a single Nostr relay.
//!
//! This crate combines:
//! - Identity management (generate, import, forget)
//! - One relay session at a time
//! - Public rooms (kind 1 notes tagged with a room name)
//! - Encrypted DMs (NIP-44 payloads in kind 4 events)
//!
//! # Example
//!
//! ```rust,no_run
//! use nostr_chat::{ChatEvent, ChatMode, ChatState};
//!
//! #[tokio::main]
//! async fn main() {
//!     let chat = ChatState::new();
//!     let mut events = chat.subscribe();
//!
//!     chat.generate_identity().await;
//!     chat.connect("wss://relay.damus.io").await.unwrap();
//!     chat.enter(ChatMode::Room("lobby".to_string())).await.unwrap();
//!
//!     chat.send("hello, lobby").await.unwrap();
//!
//!     while let Ok(event) = events.recv().await {
//!         match event {
//!             ChatEvent::Message(message) => {
//!                 println!("<{}> {}", message.author_short(), message.content);
//!             }
//!             ChatEvent::Disconnected => break,
//!             _ => {}
//!         }
//!     }
//! }
//! ```

mod message;
mod state;

pub use message::ChatMessage;
pub use state::{ChatError, ChatEvent, ChatMode, ChatState, parse_pubkey};

// Re-export useful types from dependencies
pub use nostr::Keypair;
pub use nostr_client::{ConnectionState, Filter, RelaySession};
