//! Hosted relay signaling over WebSocket
//!
//! Every peer joins a named room on the relay. The relay announces newcomers
//! to the room and forwards negotiation payloads between members. Messages
//! are JSON objects tagged by `event`:
//!
//! ```text
//! -> { "event": "room",   "id": "<local id>", "room": "<room>" }
//! <- { "event": "new",    "id": "<remote id>" }
//! -> { "event": "webrtc", "id": "<local id>", "to": "<remote id>", "data": { id, sdp, ice } }
//! <- { "event": "webrtc", "id": "<remote id>", "to": "<local id>", "data": { id, sdp, ice } }
//! ```

use super::{
    ConnectionErrorCallback, IncomingDataCallback, InitiateOfferCallback, Signaling,
    SignalingCallbacks, SignalingPayload,
};
use crate::{Error, Result};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Messages exchanged with the relay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum RelayMessage {
    /// Join a room
    Room {
        /// Local peer id
        id: String,
        /// Room name
        room: String,
    },

    /// A peer joined the room
    New {
        /// Remote peer id
        id: String,
    },

    /// Negotiation payload routed between two peers
    Webrtc {
        /// Sender peer id
        id: String,
        /// Recipient peer id
        to: String,
        /// Negotiation payload
        data: SignalingPayload,
    },
}

impl RelayMessage {
    /// Serialize to JSON string
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::SerializationError(e.to_string()))
    }

    /// Parse from JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| Error::SerializationError(format!("Invalid relay message: {}", e)))
    }
}

/// Signaling through a hosted WebSocket relay
pub struct RelaySignaling {
    /// Relay URL (ws:// or wss://)
    url: String,

    /// Room joined on prepare
    room: String,

    /// Local peer id
    id: String,

    /// Outgoing message sender (set once connected)
    tx: Mutex<Option<mpsc::UnboundedSender<Message>>>,

    /// Callback handlers
    callbacks: Arc<SignalingCallbacks>,
}

impl RelaySignaling {
    /// Create a relay backend with a random local id
    ///
    /// # Arguments
    ///
    /// * `url` - Relay WebSocket URL (ws:// or wss://)
    /// * `room` - Room to join
    pub fn new(url: &str, room: &str) -> Result<Self> {
        if !url.starts_with("ws://") && !url.starts_with("wss://") {
            return Err(Error::InvalidConfig(format!(
                "relay url must start with ws:// or wss://, got {}",
                url
            )));
        }

        Ok(Self {
            url: url.to_string(),
            room: room.to_string(),
            id: uuid::Uuid::new_v4().to_string(),
            tx: Mutex::new(None),
            callbacks: Arc::new(SignalingCallbacks::default()),
        })
    }

    /// Room this backend joins
    pub fn room(&self) -> &str {
        &self.room
    }

    /// Whether `prepare` has connected to the relay
    pub fn is_connected(&self) -> bool {
        self.tx
            .lock()
            .as_ref()
            .map(|tx| !tx.is_closed())
            .unwrap_or(false)
    }

    /// Register a handler for failed connections
    pub fn bind_connection_error(&self, callback: ConnectionErrorCallback) {
        self.callbacks.set_connection_error(callback);
    }

    fn send_message(&self, message: &RelayMessage) -> Result<()> {
        let text = message.to_json()?;
        let guard = self.tx.lock();
        let tx = guard
            .as_ref()
            .ok_or_else(|| Error::SignalingError("Relay signaling not connected".to_string()))?;

        tx.send(Message::Text(text))
            .map_err(|_| Error::SignalingError("Relay connection closed".to_string()))
    }

    /// Sender task: sends messages from channel to WebSocket
    async fn sender_task(
        mut write: futures::stream::SplitSink<WsStream, Message>,
        mut rx: mpsc::UnboundedReceiver<Message>,
    ) {
        while let Some(msg) = rx.recv().await {
            if let Err(e) = write.send(msg).await {
                error!("Failed to send relay message: {}", e);
                break;
            }
        }

        debug!("Relay sender task terminated");
    }

    /// Receiver task: receives messages from WebSocket and invokes callbacks
    async fn receiver_task(
        mut read: futures::stream::SplitStream<WsStream>,
        callbacks: Arc<SignalingCallbacks>,
    ) {
        while let Some(msg_result) = read.next().await {
            match msg_result {
                Ok(Message::Text(text)) => {
                    if let Err(e) = Self::handle_message(&text, &callbacks) {
                        warn!("Failed to handle relay message: {}", e);
                    }
                }
                Ok(Message::Close(_)) => {
                    info!("Relay connection closed");
                    break;
                }
                Err(e) => {
                    error!("Relay WebSocket error: {}", e);
                    break;
                }
                _ => {}
            }
        }

        debug!("Relay receiver task terminated");
    }

    fn handle_message(text: &str, callbacks: &SignalingCallbacks) -> Result<()> {
        match RelayMessage::from_json(text)? {
            RelayMessage::New { id } => {
                debug!("Relay announced peer {}", id);
                if !callbacks.initiate_offer(id) {
                    warn!("Relay announced a peer before an orchestrator was bound");
                }
            }
            RelayMessage::Webrtc { id, data, .. } => {
                debug!("Relay delivered {:?} from {}", data.sdp.kind, id);
                if !callbacks.incoming_data(data) {
                    warn!("Relay delivered a payload before an orchestrator was bound");
                }
            }
            RelayMessage::Room { room, .. } => {
                debug!("Ignoring room message for {}", room);
            }
        }

        Ok(())
    }
}

#[async_trait]
impl Signaling for RelaySignaling {
    fn local_id(&self) -> String {
        self.id.clone()
    }

    /// Connect to the relay and join the room
    async fn prepare(&self) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }

        info!("Connecting to relay: {}", self.url);

        let (ws_stream, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| Error::WebSocketError(format!("Failed to connect: {}", e)))?;

        let (write, read) = ws_stream.split();
        let (tx, rx) = mpsc::unbounded_channel();
        *self.tx.lock() = Some(tx);

        tokio::spawn(Self::sender_task(write, rx));
        tokio::spawn(Self::receiver_task(read, self.callbacks.clone()));

        self.send_message(&RelayMessage::Room {
            id: self.id.clone(),
            room: self.room.clone(),
        })?;

        info!("Joined relay room {} as {}", self.room, self.id);

        Ok(())
    }

    async fn send(&self, to: &str, payload: SignalingPayload) -> Result<()> {
        self.send_message(&RelayMessage::Webrtc {
            id: payload.id.clone(),
            to: to.to_string(),
            data: payload,
        })
    }

    fn bind_initiate_offer(&self, callback: InitiateOfferCallback) {
        self.callbacks.set_initiate_offer(callback);
    }

    fn bind_incoming_data(&self, callback: IncomingDataCallback) {
        self.callbacks.set_incoming_data(callback);
    }

    fn on_connection_error(&self, peer_id: &str) {
        self.callbacks.connection_error(peer_id.to_string());
    }
}
