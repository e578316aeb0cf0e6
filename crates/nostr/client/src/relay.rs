//! Single relay session management.
//!
//! Provides an async WebSocket connection to one Nostr relay with a
//! background read loop. Incoming events are signature-verified,
//! deduplicated by id, and delivered through a broadcast channel.
//! At most one subscription is live at a time; subscribing again
//! closes the previous subscription first.

use crate::error::{ClientError, Result};
use crate::message::{ClientMessage, Filter, RelayMessage};
use crate::subscription::generate_subscription_id;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use nostr::{Event, verify_event};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, RwLock, broadcast};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use url::Url;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Disconnected
    Disconnected,
    /// Currently connecting
    Connecting,
    /// Connected and ready
    Connected,
}

/// Events delivered by a relay session to its subscribers.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A verified event matching the live subscription.
    Event(Event),
    /// End of stored events for the live subscription.
    Eose,
    /// Human-readable notice from the relay.
    Notice(String),
    /// Relay acknowledged (or rejected) a published event.
    PublishAck {
        event_id: String,
        accepted: bool,
        message: String,
    },
    /// The relay closed the live subscription.
    SubscriptionClosed(String),
    /// The connection was lost or closed.
    Disconnected,
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

/// A session with a single relay.
pub struct RelaySession {
    /// Relay URL
    url: Url,
    /// Connection state
    state: Arc<RwLock<ConnectionState>>,
    /// Write half of the WebSocket
    sink: Arc<Mutex<Option<WsSink>>>,
    /// Id of the one live subscription, if any
    live_subscription: Arc<Mutex<Option<String>>>,
    /// Event ids already delivered on the live subscription
    seen_ids: Arc<Mutex<HashSet<String>>>,
    /// Broadcast channel for session events
    events_tx: broadcast::Sender<SessionEvent>,
    /// Read loop task handle
    read_task: Arc<Mutex<Option<tokio::task::JoinHandle<()>>>>,
}

impl RelaySession {
    /// Create a new relay session (does not connect yet).
    pub fn new(url: &str) -> Result<Self> {
        let url = Url::parse(url)?;

        if url.scheme() != "ws" && url.scheme() != "wss" {
            return Err(ClientError::InvalidUrl(format!(
                "URL must use ws:// or wss:// scheme, got: {}",
                url.scheme()
            )));
        }

        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Ok(Self {
            url,
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            sink: Arc::new(Mutex::new(None)),
            live_subscription: Arc::new(Mutex::new(None)),
            seen_ids: Arc::new(Mutex::new(HashSet::new())),
            events_tx,
            read_task: Arc::new(Mutex::new(None)),
        })
    }

    /// Connect to the relay and start the background read loop.
    pub async fn connect(&self) -> Result<()> {
        {
            let mut state = self.state.write().await;
            if *state != ConnectionState::Disconnected {
                return Err(ClientError::AlreadyConnected);
            }
            *state = ConnectionState::Connecting;
        }

        info!("connecting to relay: {}", self.url);

        // No connect timeout; a hung attempt is recovered by the user
        // disconnecting and retrying.
        let ws_stream = match connect_async(self.url.as_str()).await {
            Ok((stream, _)) => stream,
            Err(e) => {
                *self.state.write().await = ConnectionState::Disconnected;
                return Err(ClientError::Connection(e.to_string()));
            }
        };

        let (sink, stream) = ws_stream.split();
        *self.sink.lock().await = Some(sink);
        *self.state.write().await = ConnectionState::Connected;

        info!("connected to relay: {}", self.url);

        self.start_read_loop(stream).await;
        Ok(())
    }

    /// Start the background read loop over the read half of the socket.
    async fn start_read_loop(&self, mut stream: SplitStream<WsStream>) {
        let state = Arc::clone(&self.state);
        let sink = Arc::clone(&self.sink);
        let live_subscription = Arc::clone(&self.live_subscription);
        let seen_ids = Arc::clone(&self.seen_ids);
        let events_tx = self.events_tx.clone();
        let url = self.url.to_string();

        let handle = tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                match frame {
                    Ok(Message::Text(text)) => {
                        Self::handle_text_frame(
                            text.as_str(),
                            &live_subscription,
                            &seen_ids,
                            &events_tx,
                        )
                        .await;
                    }
                    Ok(Message::Ping(data)) => {
                        let mut sink_guard = sink.lock().await;
                        if let Some(s) = sink_guard.as_mut() {
                            let _ = s.send(Message::Pong(data)).await;
                        }
                    }
                    Ok(Message::Close(_)) => {
                        info!("relay {} closed connection", url);
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!("WebSocket error from {}: {}", url, e);
                        break;
                    }
                }
            }

            *state.write().await = ConnectionState::Disconnected;
            sink.lock().await.take();
            live_subscription.lock().await.take();
            let _ = events_tx.send(SessionEvent::Disconnected);
        });

        *self.read_task.lock().await = Some(handle);
    }

    /// Handle one text frame from the relay.
    ///
    /// Events are dropped unless they belong to the live subscription,
    /// carry a valid signature, and have not been seen before.
    async fn handle_text_frame(
        text: &str,
        live_subscription: &Mutex<Option<String>>,
        seen_ids: &Mutex<HashSet<String>>,
        events_tx: &broadcast::Sender<SessionEvent>,
    ) {
        debug!("received: {}", text);

        let msg = match RelayMessage::from_json(text) {
            Ok(msg) => msg,
            Err(e) => {
                debug!("ignoring unparseable relay message: {}", e);
                return;
            }
        };

        match msg {
            RelayMessage::Event {
                subscription_id,
                event,
            } => {
                {
                    let live = live_subscription.lock().await;
                    if live.as_deref() != Some(subscription_id.as_str()) {
                        debug!("dropping event for stale subscription {}", subscription_id);
                        return;
                    }
                }

                match verify_event(&event) {
                    Ok(true) => {}
                    Ok(false) => {
                        warn!("dropping event {} with invalid signature", event.id);
                        return;
                    }
                    Err(e) => {
                        warn!("dropping unverifiable event {}: {}", event.id, e);
                        return;
                    }
                }

                if !seen_ids.lock().await.insert(event.id.clone()) {
                    debug!("dropping duplicate event {}", event.id);
                    return;
                }

                let _ = events_tx.send(SessionEvent::Event(event));
            }
            RelayMessage::Ok {
                event_id,
                success,
                message,
            } => {
                let _ = events_tx.send(SessionEvent::PublishAck {
                    event_id,
                    accepted: success,
                    message,
                });
            }
            RelayMessage::Eose { subscription_id } => {
                let live = live_subscription.lock().await;
                if live.as_deref() == Some(subscription_id.as_str()) {
                    let _ = events_tx.send(SessionEvent::Eose);
                }
            }
            RelayMessage::Closed {
                subscription_id,
                message,
            } => {
                let mut live = live_subscription.lock().await;
                if live.as_deref() == Some(subscription_id.as_str()) {
                    live.take();
                    let _ = events_tx.send(SessionEvent::SubscriptionClosed(message));
                }
            }
            RelayMessage::Notice { message } => {
                let _ = events_tx.send(SessionEvent::Notice(message));
            }
        }
    }

    /// Disconnect from the relay.
    pub async fn disconnect(&self) -> Result<()> {
        {
            let mut state = self.state.write().await;
            if *state == ConnectionState::Disconnected {
                return Ok(());
            }
            *state = ConnectionState::Disconnected;
        }

        if let Some(handle) = self.read_task.lock().await.take() {
            handle.abort();
        }

        if let Some(mut sink) = self.sink.lock().await.take() {
            let _ = sink.close().await;
        }

        self.live_subscription.lock().await.take();
        self.seen_ids.lock().await.clear();
        let _ = self.events_tx.send(SessionEvent::Disconnected);

        info!("disconnected from relay: {}", self.url);
        Ok(())
    }

    /// Get current connection state.
    pub async fn state(&self) -> ConnectionState {
        *self.state.read().await
    }

    /// Check if connected.
    pub async fn is_connected(&self) -> bool {
        *self.state.read().await == ConnectionState::Connected
    }

    /// Subscribe for new session events.
    ///
    /// Each call returns an independent receiver; events sent before the
    /// call are not replayed.
    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events_tx.subscribe()
    }

    /// Publish an event. The relay's OK response is delivered later as a
    /// [`SessionEvent::PublishAck`].
    pub async fn publish(&self, event: &Event) -> Result<()> {
        if !self.is_connected().await {
            return Err(ClientError::NotConnected);
        }

        let msg = ClientMessage::Event(event.clone()).to_json()?;
        self.send_text(msg)
            .await
            .map_err(|e| ClientError::PublishFailed(e.to_string()))
    }

    /// Replace the live subscription with a new one over `filters`.
    ///
    /// Closes the previous subscription (if any), clears the dedup set,
    /// and returns the new subscription id.
    pub async fn subscribe(&self, filters: Vec<Filter>) -> Result<String> {
        if !self.is_connected().await {
            return Err(ClientError::NotConnected);
        }

        if let Some(old_id) = self.live_subscription.lock().await.take() {
            debug!("closing previous subscription {}", old_id);
            let close = ClientMessage::Close {
                subscription_id: old_id,
            }
            .to_json()?;
            self.send_text(close).await?;
        }

        let subscription_id = generate_subscription_id();
        self.seen_ids.lock().await.clear();
        *self.live_subscription.lock().await = Some(subscription_id.clone());

        let req = ClientMessage::Req {
            subscription_id: subscription_id.clone(),
            filters,
        }
        .to_json()?;
        self.send_text(req).await?;

        Ok(subscription_id)
    }

    /// Close the live subscription, if any.
    pub async fn unsubscribe(&self) -> Result<()> {
        let Some(old_id) = self.live_subscription.lock().await.take() else {
            return Ok(());
        };
        self.seen_ids.lock().await.clear();

        let close = ClientMessage::Close {
            subscription_id: old_id,
        }
        .to_json()?;
        self.send_text(close).await
    }

    /// Id of the live subscription, if any.
    pub async fn live_subscription(&self) -> Option<String> {
        self.live_subscription.lock().await.clone()
    }

    /// Get relay URL.
    pub fn url(&self) -> &Url {
        &self.url
    }

    async fn send_text(&self, text: String) -> Result<()> {
        debug!("sending to {}: {}", self.url, text);

        let mut sink = self.sink.lock().await;
        match sink.as_mut() {
            Some(stream) => stream
                .send(Message::Text(text.into()))
                .await
                .map_err(|e| ClientError::WebSocket(e.to_string())),
            None => Err(ClientError::NotConnected),
        }
    }
}
