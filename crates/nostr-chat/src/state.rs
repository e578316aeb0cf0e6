//! Chat state management.
//!
//! This module provides the central state machine for chat, managing:
//! - User identity (keypair)
//! - The relay session
//! - The current conversation (public room or encrypted DM)
//! - Decoded messages

use crate::message::ChatMessage;
use nostr::{
    Event, EventTemplate, KIND_ENCRYPTED_DM, KIND_TEXT_NOTE, KeyError, Keypair, Nip01Error,
    Nip44Error, TAG_PUBKEY, TAG_ROOM, decrypt_from, encrypt_to, finalize_event,
};
use nostr_client::{ClientError, ConnectionState, Filter, RelaySession, SessionEvent};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock, broadcast};
use tracing::{info, warn};

/// How many stored events to request when entering a conversation.
const BACKLOG_LIMIT: u64 = 50;

/// Errors that can occur in chat state management.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("key error: {0}")]
    Key(#[from] KeyError),

    #[error("event signing error: {0}")]
    Event(#[from] Nip01Error),

    #[error("encryption error: {0}")]
    Encryption(#[from] Nip44Error),

    #[error("relay error: {0}")]
    Client(#[from] ClientError),

    #[error("no identity set")]
    NoIdentity,

    #[error("not connected")]
    NotConnected,

    #[error("message is empty")]
    EmptyMessage,

    #[error("invalid recipient: {0}")]
    InvalidRecipient(String),
}

/// The active conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatMode {
    /// A public room, identified by its "r" tag value.
    Room(String),
    /// An encrypted DM thread with one counterparty (x-only pubkey).
    Direct([u8; 32]),
}

impl Default for ChatMode {
    fn default() -> Self {
        ChatMode::Room("lobby".to_string())
    }
}

/// Events emitted by the chat state.
#[derive(Debug, Clone)]
pub enum ChatEvent {
    /// A new message arrived (or a sent message was echoed locally).
    Message(ChatMessage),
    /// Connected to the relay.
    Connected { url: String },
    /// The relay connection was closed or lost.
    Disconnected,
    /// The backlog of stored events has been delivered.
    Backlog,
    /// Human-readable notice from the relay.
    Notice(String),
    /// The relay acknowledged (or rejected) a published event.
    PublishAck {
        event_id: String,
        accepted: bool,
        message: String,
    },
    /// Error occurred.
    Error(String),
}

/// The main chat state.
pub struct ChatState {
    /// User's identity
    identity: Arc<RwLock<Option<Keypair>>>,
    /// Active relay session
    session: Arc<RwLock<Option<Arc<RelaySession>>>>,
    /// Active conversation
    mode: Arc<RwLock<ChatMode>>,
    /// Decoded messages for the active conversation, newest first
    messages: Arc<RwLock<Vec<ChatMessage>>>,
    /// Event broadcast channel
    events_tx: broadcast::Sender<ChatEvent>,
    /// Session event handler task
    handler_task: Arc<Mutex<Option<tokio::task::JoinHandle<()>>>>,
}

impl ChatState {
    /// Create a new chat state with no identity and no connection.
    pub fn new() -> Self {
        let (events_tx, _) = broadcast::channel(1000);

        Self {
            identity: Arc::new(RwLock::new(None)),
            session: Arc::new(RwLock::new(None)),
            mode: Arc::new(RwLock::new(ChatMode::default())),
            messages: Arc::new(RwLock::new(Vec::new())),
            events_tx,
            handler_task: Arc::new(Mutex::new(None)),
        }
    }

    /// Subscribe to chat events.
    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.events_tx.subscribe()
    }

    /// Generate a fresh identity, replacing any existing one.
    ///
    /// Messages decoded under the previous identity are cleared.
    pub async fn generate_identity(&self) -> String {
        let keypair = Keypair::generate();
        let pubkey = keypair.public_key_hex();
        info!("Identity generated: {}", pubkey);
        *self.identity.write().await = Some(keypair);
        self.messages.write().await.clear();
        pubkey
    }

    /// Import an identity from a 64-character hex secret key.
    pub async fn import_identity(&self, secret_hex: &str) -> Result<String, ChatError> {
        let keypair = Keypair::from_secret_hex(secret_hex)?;
        let pubkey = keypair.public_key_hex();
        info!("Identity imported: {}", pubkey);
        *self.identity.write().await = Some(keypair);
        self.messages.write().await.clear();
        Ok(pubkey)
    }

    /// Set the user's identity directly.
    pub async fn set_identity(&self, keypair: Keypair) {
        info!("Identity set: {}", keypair.public_key_hex());
        *self.identity.write().await = Some(keypair);
        self.messages.write().await.clear();
    }

    /// Forget the identity and all decoded messages.
    pub async fn clear_identity(&self) {
        *self.identity.write().await = None;
        self.messages.write().await.clear();
        info!("Identity cleared");
    }

    /// Get the user's identity, if set.
    pub async fn identity(&self) -> Option<Keypair> {
        self.identity.read().await.clone()
    }

    /// Get the user's public key hex.
    pub async fn pubkey(&self) -> Option<String> {
        self.identity.read().await.as_ref().map(|k| k.public_key_hex())
    }

    /// Check if identity is set.
    pub async fn has_identity(&self) -> bool {
        self.identity.read().await.is_some()
    }

    /// Get the active conversation.
    pub async fn mode(&self) -> ChatMode {
        self.mode.read().await.clone()
    }

    /// Get the decoded messages for the active conversation, newest first.
    pub async fn messages(&self) -> Vec<ChatMessage> {
        self.messages.read().await.clone()
    }

    /// Get the relay connection state.
    pub async fn connection_state(&self) -> ConnectionState {
        match self.session.read().await.as_ref() {
            Some(session) => session.state().await,
            None => ConnectionState::Disconnected,
        }
    }

    /// Check if connected to a relay.
    pub async fn is_connected(&self) -> bool {
        self.connection_state().await == ConnectionState::Connected
    }

    /// Connect to a relay, replacing any existing session.
    pub async fn connect(&self, url: &str) -> Result<(), ChatError> {
        self.disconnect().await;

        let session = Arc::new(RelaySession::new(url)?);
        session.connect().await?;

        let session_events = session.events();
        *self.session.write().await = Some(Arc::clone(&session));
        self.spawn_event_handler(session_events).await;

        let _ = self.events_tx.send(ChatEvent::Connected {
            url: session.url().to_string(),
        });
        Ok(())
    }

    /// Disconnect from the relay, if connected.
    pub async fn disconnect(&self) {
        if let Some(handle) = self.handler_task.lock().await.take() {
            handle.abort();
        }

        if let Some(session) = self.session.write().await.take() {
            if let Err(e) = session.disconnect().await {
                warn!("Error during disconnect: {}", e);
            }
            let _ = self.events_tx.send(ChatEvent::Disconnected);
        }
    }

    /// Enter a conversation: clears the message list and replaces the
    /// relay subscription with one matching the new mode.
    pub async fn enter(&self, mode: ChatMode) -> Result<(), ChatError> {
        let filters = self.filters_for(&mode).await?;

        let session = self.session.read().await.clone();
        let session = session.ok_or(ChatError::NotConnected)?;

        *self.mode.write().await = mode;
        self.messages.write().await.clear();
        session.subscribe(filters).await?;
        Ok(())
    }

    /// Build the subscription filter for a conversation.
    async fn filters_for(&self, mode: &ChatMode) -> Result<Vec<Filter>, ChatError> {
        match mode {
            ChatMode::Room(room) => Ok(vec![
                Filter::new()
                    .kinds(vec![KIND_TEXT_NOTE])
                    .room_refs(vec![room.clone()])
                    .limit(BACKLOG_LIMIT),
            ]),
            ChatMode::Direct(peer) => {
                let me = self.pubkey().await.ok_or(ChatError::NoIdentity)?;
                let peer_hex = hex::encode(peer);
                Ok(vec![
                    Filter::new()
                        .kinds(vec![KIND_ENCRYPTED_DM])
                        .authors(vec![me.clone(), peer_hex.clone()])
                        .pubkey_refs(vec![me, peer_hex])
                        .limit(BACKLOG_LIMIT),
                ])
            }
        }
    }

    /// Send a message in the active conversation.
    ///
    /// Room messages go out as plaintext kind 1 events tagged with the
    /// room; DMs are NIP-44 encrypted kind 4 events tagged with the
    /// recipient. The sent message is echoed into the local list
    /// immediately; the relay's OK arrives later as a
    /// [`ChatEvent::PublishAck`].
    ///
    /// Returns the event id.
    pub async fn send(&self, content: &str) -> Result<String, ChatError> {
        if content.trim().is_empty() {
            return Err(ChatError::EmptyMessage);
        }

        let identity = self.identity.read().await.clone();
        let keypair = identity.ok_or(ChatError::NoIdentity)?;

        let session = self.session.read().await.clone();
        let session = session.ok_or(ChatError::NotConnected)?;

        let mode = self.mode.read().await.clone();
        let template = match &mode {
            ChatMode::Room(room) => EventTemplate {
                created_at: unix_now(),
                kind: KIND_TEXT_NOTE,
                tags: vec![vec![TAG_ROOM.to_string(), room.clone()]],
                content: content.to_string(),
            },
            ChatMode::Direct(peer) => {
                let ciphertext = encrypt_to(content, keypair.private_key(), peer)?;
                EventTemplate {
                    created_at: unix_now(),
                    kind: KIND_ENCRYPTED_DM,
                    tags: vec![vec![TAG_PUBKEY.to_string(), hex::encode(peer)]],
                    content: ciphertext,
                }
            }
        };

        let event = finalize_event(&template, keypair.private_key())?;
        let event_id = event.id.clone();
        session.publish(&event).await?;

        // Local echo; the relay copy is deduplicated by id later.
        if let Some(msg) = Self::decode_event(&event, Some(&keypair)) {
            let inserted = {
                let mut messages = self.messages.write().await;
                Self::insert_message(&mut messages, msg.clone())
            };
            if inserted {
                let _ = self.events_tx.send(ChatEvent::Message(msg));
            }
        }

        Ok(event_id)
    }

    /// Spawn the session event handler task.
    async fn spawn_event_handler(&self, mut session_events: broadcast::Receiver<SessionEvent>) {
        let identity = Arc::clone(&self.identity);
        let messages = Arc::clone(&self.messages);
        let events_tx = self.events_tx.clone();

        let handle = tokio::spawn(async move {
            while let Ok(event) = session_events.recv().await {
                match event {
                    SessionEvent::Event(event) => {
                        let keypair = identity.read().await.clone();
                        let Some(msg) = Self::decode_event(&event, keypair.as_ref()) else {
                            continue;
                        };
                        let inserted = {
                            let mut msgs = messages.write().await;
                            Self::insert_message(&mut msgs, msg.clone())
                        };
                        if inserted {
                            let _ = events_tx.send(ChatEvent::Message(msg));
                        }
                    }
                    SessionEvent::Eose => {
                        let _ = events_tx.send(ChatEvent::Backlog);
                    }
                    SessionEvent::Notice(message) => {
                        let _ = events_tx.send(ChatEvent::Notice(message));
                    }
                    SessionEvent::PublishAck {
                        event_id,
                        accepted,
                        message,
                    } => {
                        let _ = events_tx.send(ChatEvent::PublishAck {
                            event_id,
                            accepted,
                            message,
                        });
                    }
                    SessionEvent::SubscriptionClosed(message) => {
                        let _ = events_tx.send(ChatEvent::Error(format!(
                            "subscription closed by relay: {}",
                            message
                        )));
                    }
                    SessionEvent::Disconnected => {
                        let _ = events_tx.send(ChatEvent::Disconnected);
                        break;
                    }
                }
            }
        });

        *self.handler_task.lock().await = Some(handle);
    }

    /// Decode an event into a displayable message.
    ///
    /// Room messages pass through as-is. DMs are decrypted with the local
    /// identity; for DMs we authored, the counterparty comes from the
    /// first "p" tag rather than the author field. Events that cannot be
    /// decoded are dropped.
    fn decode_event(event: &Event, keypair: Option<&Keypair>) -> Option<ChatMessage> {
        let mine = keypair.is_some_and(|k| k.public_key_hex() == event.pubkey);

        let content = match event.kind {
            KIND_TEXT_NOTE => event.content.clone(),
            KIND_ENCRYPTED_DM => {
                let keypair = keypair?;
                let counterparty = Self::dm_counterparty(event, mine)?;
                match decrypt_from(&event.content, keypair.private_key(), &counterparty) {
                    Ok(plaintext) => plaintext,
                    Err(e) => {
                        warn!("Failed to decrypt DM {}: {}", event.id, e);
                        return None;
                    }
                }
            }
            other => {
                warn!("Ignoring event {} with unexpected kind {}", event.id, other);
                return None;
            }
        };

        Some(ChatMessage {
            id: event.id.clone(),
            author: event.pubkey.clone(),
            created_at: event.created_at,
            content,
            mine,
        })
    }

    /// Resolve the other party of a DM event.
    fn dm_counterparty(event: &Event, mine: bool) -> Option<[u8; 32]> {
        let hex_key = if mine {
            event
                .tags
                .iter()
                .find(|tag| tag.len() >= 2 && tag[0] == TAG_PUBKEY)
                .map(|tag| tag[1].clone())?
        } else {
            event.pubkey.clone()
        };

        let bytes = hex::decode(&hex_key).ok()?;
        bytes.try_into().ok()
    }

    /// Insert a message keeping the list sorted newest first, with ties
    /// broken by id. Returns false if the id is already present.
    fn insert_message(messages: &mut Vec<ChatMessage>, msg: ChatMessage) -> bool {
        if messages.iter().any(|m| m.id == msg.id) {
            return false;
        }

        let pos = messages
            .iter()
            .position(|m| {
                msg.created_at > m.created_at
                    || (msg.created_at == m.created_at && msg.id < m.id)
            })
            .unwrap_or(messages.len());
        messages.insert(pos, msg);
        true
    }
}

impl Default for ChatState {
    fn default() -> Self {
        Self::new()
    }
}

/// Current unix time in seconds.
fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Parse a 64-character hex string into an x-only public key.
pub fn parse_pubkey(hex_str: &str) -> Result<[u8; 32], ChatError> {
    if hex_str.len() != 64 {
        return Err(ChatError::InvalidRecipient(format!(
            "expected 64 hex characters, got {}",
            hex_str.len()
        )));
    }
    let bytes = hex::decode(hex_str)
        .map_err(|e| ChatError::InvalidRecipient(format!("invalid hex: {}", e)))?;
    bytes
        .try_into()
        .map_err(|_| ChatError::InvalidRecipient("expected 32 bytes".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn keypair(fill: u8) -> Keypair {
        Keypair::from_secret_key(&[fill; 32]).unwrap()
    }

    fn room_event(author: &Keypair, room: &str, content: &str, created_at: u64) -> Event {
        let template = EventTemplate {
            created_at,
            kind: KIND_TEXT_NOTE,
            tags: vec![vec![TAG_ROOM.to_string(), room.to_string()]],
            content: content.to_string(),
        };
        finalize_event(&template, author.private_key()).unwrap()
    }

    fn dm_event(author: &Keypair, recipient: &Keypair, content: &str, created_at: u64) -> Event {
        let ciphertext =
            encrypt_to(content, author.private_key(), recipient.public_key()).unwrap();
        let template = EventTemplate {
            created_at,
            kind: KIND_ENCRYPTED_DM,
            tags: vec![vec![TAG_PUBKEY.to_string(), recipient.public_key_hex()]],
            content: ciphertext,
        };
        finalize_event(&template, author.private_key()).unwrap()
    }

    #[tokio::test]
    async fn test_new_state_has_no_identity() {
        let state = ChatState::new();
        assert!(!state.has_identity().await);
        assert!(state.pubkey().await.is_none());
        assert!(!state.is_connected().await);
    }

    #[tokio::test]
    async fn test_generate_and_clear_identity() {
        let state = ChatState::new();

        let pubkey = state.generate_identity().await;
        assert_eq!(pubkey.len(), 64);
        assert!(state.has_identity().await);
        assert_eq!(state.pubkey().await, Some(pubkey));

        state.clear_identity().await;
        assert!(!state.has_identity().await);
    }

    #[tokio::test]
    async fn test_import_identity() {
        let state = ChatState::new();

        let pubkey = state.import_identity(&"11".repeat(32)).await.unwrap();
        assert_eq!(
            pubkey,
            "4f355bdcb7cc0af728ef3cceb9615d90684bb5b2ca5f859ab0f0b704075871aa"
        );

        assert!(state.import_identity("tooshort").await.is_err());
    }

    #[tokio::test]
    async fn test_send_requires_identity_and_connection() {
        let state = ChatState::new();

        let result = state.send("hello").await;
        assert!(matches!(result, Err(ChatError::NoIdentity)));

        state.generate_identity().await;
        let result = state.send("hello").await;
        assert!(matches!(result, Err(ChatError::NotConnected)));

        let result = state.send("   ").await;
        assert!(matches!(result, Err(ChatError::EmptyMessage)));
    }

    #[tokio::test]
    async fn test_enter_requires_connection() {
        let state = ChatState::new();
        let result = state.enter(ChatMode::Room("lobby".to_string())).await;
        assert!(matches!(result, Err(ChatError::NotConnected)));
    }

    #[tokio::test]
    async fn test_direct_filter_requires_identity() {
        let state = ChatState::new();
        let result = state.filters_for(&ChatMode::Direct([0x22; 32])).await;
        assert!(matches!(result, Err(ChatError::NoIdentity)));
    }

    #[tokio::test]
    async fn test_room_filter_shape() {
        let state = ChatState::new();
        let filters = state
            .filters_for(&ChatMode::Room("lobby".to_string()))
            .await
            .unwrap();

        assert_eq!(filters.len(), 1);
        let filter = &filters[0];
        assert_eq!(filter.kinds, Some(vec![KIND_TEXT_NOTE]));
        assert_eq!(filter.limit, Some(BACKLOG_LIMIT));
        assert_eq!(filter.tags.get("#r"), Some(&vec!["lobby".to_string()]));
        assert!(filter.authors.is_none());
    }

    #[tokio::test]
    async fn test_direct_filter_shape() {
        let state = ChatState::new();
        state.set_identity(keypair(0x11)).await;
        let peer = *keypair(0x22).public_key();

        let filters = state.filters_for(&ChatMode::Direct(peer)).await.unwrap();

        assert_eq!(filters.len(), 1);
        let filter = &filters[0];
        let me = state.pubkey().await.unwrap();
        let peer_hex = hex::encode(peer);

        assert_eq!(filter.kinds, Some(vec![KIND_ENCRYPTED_DM]));
        assert_eq!(filter.limit, Some(BACKLOG_LIMIT));
        assert_eq!(
            filter.authors,
            Some(vec![me.clone(), peer_hex.clone()])
        );
        assert_eq!(filter.tags.get("#p"), Some(&vec![me, peer_hex]));
    }

    #[test]
    fn test_decode_room_event() {
        let alice = keypair(0x11);
        let event = room_event(&alice, "lobby", "hello room", 1700000000);

        let msg = ChatState::decode_event(&event, Some(&alice)).unwrap();
        assert_eq!(msg.content, "hello room");
        assert_eq!(msg.author, alice.public_key_hex());
        assert!(msg.mine);

        // Viewer without identity still sees room messages
        let msg = ChatState::decode_event(&event, None).unwrap();
        assert!(!msg.mine);
    }

    #[test]
    fn test_decode_dm_as_recipient() {
        let alice = keypair(0x11);
        let bob = keypair(0x22);
        let event = dm_event(&alice, &bob, "secret for bob", 1700000000);

        let msg = ChatState::decode_event(&event, Some(&bob)).unwrap();
        assert_eq!(msg.content, "secret for bob");
        assert_eq!(msg.author, alice.public_key_hex());
        assert!(!msg.mine);
    }

    #[test]
    fn test_decode_dm_as_author_uses_p_tag_counterparty() {
        let alice = keypair(0x11);
        let bob = keypair(0x22);
        let event = dm_event(&alice, &bob, "secret for bob", 1700000000);

        // Alice can read her own outgoing DM via the recipient's key in the p tag
        let msg = ChatState::decode_event(&event, Some(&alice)).unwrap();
        assert_eq!(msg.content, "secret for bob");
        assert!(msg.mine);
    }

    #[test]
    fn test_decode_dm_third_party_dropped() {
        let alice = keypair(0x11);
        let bob = keypair(0x22);
        let eve = keypair(0x33);
        let event = dm_event(&alice, &bob, "secret for bob", 1700000000);

        assert!(ChatState::decode_event(&event, Some(&eve)).is_none());
        assert!(ChatState::decode_event(&event, None).is_none());
    }

    #[test]
    fn test_decode_unexpected_kind_dropped() {
        let alice = keypair(0x11);
        let template = EventTemplate {
            created_at: 1700000000,
            kind: 7,
            tags: vec![],
            content: "+".to_string(),
        };
        let event = finalize_event(&template, alice.private_key()).unwrap();
        assert!(ChatState::decode_event(&event, Some(&alice)).is_none());
    }

    #[test]
    fn test_insert_message_sorted_and_deduped() {
        let alice = keypair(0x11);
        let mut messages = Vec::new();

        let older = ChatState::decode_event(
            &room_event(&alice, "lobby", "first", 1700000000),
            Some(&alice),
        )
        .unwrap();
        let newer = ChatState::decode_event(
            &room_event(&alice, "lobby", "second", 1700000100),
            Some(&alice),
        )
        .unwrap();

        assert!(ChatState::insert_message(&mut messages, older.clone()));
        assert!(ChatState::insert_message(&mut messages, newer.clone()));
        // Duplicate id is rejected
        assert!(!ChatState::insert_message(&mut messages, newer.clone()));

        assert_eq!(messages.len(), 2);
        // Newest first
        assert_eq!(messages[0].content, "second");
        assert_eq!(messages[1].content, "first");
    }

    #[test]
    fn test_insert_message_ties_broken_by_id() {
        let alice = keypair(0x11);
        let mut messages = Vec::new();

        let a = ChatState::decode_event(
            &room_event(&alice, "lobby", "a", 1700000000),
            Some(&alice),
        )
        .unwrap();
        let b = ChatState::decode_event(
            &room_event(&alice, "lobby", "b", 1700000000),
            Some(&alice),
        )
        .unwrap();

        ChatState::insert_message(&mut messages, a.clone());
        ChatState::insert_message(&mut messages, b.clone());

        let mut expected = [a.id, b.id];
        expected.sort();
        assert_eq!(messages[0].id, expected[0]);
        assert_eq!(messages[1].id, expected[1]);
    }

    #[test]
    fn test_parse_pubkey() {
        let hex_key = "4f355bdcb7cc0af728ef3cceb9615d90684bb5b2ca5f859ab0f0b704075871aa";
        let parsed = parse_pubkey(hex_key).unwrap();
        assert_eq!(hex::encode(parsed), hex_key);

        assert!(matches!(
            parse_pubkey("short"),
            Err(ChatError::InvalidRecipient(_))
        ));
        assert!(matches!(
            parse_pubkey(&"zz".repeat(32)),
            Err(ChatError::InvalidRecipient(_))
        ));
    }

    #[tokio::test]
    async fn test_identity_change_clears_messages() {
        let alice = keypair(0x11);
        let state = ChatState::new();
        state.set_identity(alice.clone()).await;

        {
            let mut messages = state.messages.write().await;
            let msg = ChatState::decode_event(
                &room_event(&alice, "lobby", "hello", 1700000000),
                Some(&alice),
            )
            .unwrap();
            ChatState::insert_message(&mut messages, msg);
        }
        assert_eq!(state.messages().await.len(), 1);

        state.generate_identity().await;
        assert!(state.messages().await.is_empty());
    }
}
