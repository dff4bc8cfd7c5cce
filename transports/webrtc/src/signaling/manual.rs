//! Copy-paste signaling
//!
//! Each side shows its outgoing payload as JSON text; the user carries it to
//! the other side, which feeds it back in with [`ManualSignaling::apply_remote_text`].

use super::{
    ConnectionErrorCallback, IncomingDataCallback, InitiateOfferCallback, Signaling,
    SignalingCallbacks, SignalingPayload,
};
use crate::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, warn};

/// Callback receiving the JSON text that must reach the other side
pub type OutgoingTextCallback = Arc<dyn Fn(String) + Send + Sync>;

/// Signaling through payloads exchanged by hand
///
/// # Example
///
/// ```
/// use rtc_mesh::signaling::{ManualSignaling, SessionDescription, Signaling, SignalingPayload};
/// use std::sync::Arc;
///
/// # tokio_test::block_on(async {
/// let alice = ManualSignaling::new();
/// let bob = ManualSignaling::new();
/// bob.bind_incoming_data(Arc::new(|payload: SignalingPayload| {
///     assert_eq!(payload.sdp.kind, rtc_mesh::signaling::SdpKind::Offer);
/// }));
///
/// let offer = SignalingPayload::new(alice.local_id(), SessionDescription::offer("v=0"), vec![]);
/// alice.send(&bob.local_id(), offer).await.unwrap();
///
/// // The text is carried to the other side by hand
/// bob.apply_remote_text(&alice.text_to_send()).unwrap();
/// # });
/// ```
pub struct ManualSignaling {
    id: String,
    text_to_send: Mutex<String>,
    on_outgoing_text: Mutex<Option<OutgoingTextCallback>>,
    callbacks: SignalingCallbacks,
}

impl ManualSignaling {
    /// Create a backend with a random local id
    pub fn new() -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            text_to_send: Mutex::new(String::new()),
            on_outgoing_text: Mutex::new(None),
            callbacks: SignalingCallbacks::default(),
        }
    }

    /// Latest payload waiting to be copied to the other side
    pub fn text_to_send(&self) -> String {
        self.text_to_send.lock().clone()
    }

    /// Register a handler for outgoing payload text
    pub fn bind_outgoing_text(&self, callback: OutgoingTextCallback) {
        *self.on_outgoing_text.lock() = Some(callback);
    }

    /// Register a handler for failed connections
    pub fn bind_connection_error(&self, callback: ConnectionErrorCallback) {
        self.callbacks.set_connection_error(callback);
    }

    /// Start an offer addressed by this side's own id
    pub fn initiate(&self) {
        if !self.callbacks.initiate_offer(self.id.clone()) {
            warn!("Manual initiate called before an orchestrator was bound");
        }
    }

    /// Deliver a payload produced by the other side
    pub fn apply_remote_response(&self, payload: SignalingPayload) -> Result<()> {
        if self.callbacks.incoming_data(payload) {
            Ok(())
        } else {
            Err(Error::SignalingError(
                "No incoming data handler bound to manual signaling".to_string(),
            ))
        }
    }

    /// Deliver pasted JSON text produced by the other side
    pub fn apply_remote_text(&self, text: &str) -> Result<()> {
        let payload = SignalingPayload::from_json(text.trim())?;
        self.apply_remote_response(payload)
    }
}

impl Default for ManualSignaling {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Signaling for ManualSignaling {
    fn local_id(&self) -> String {
        self.id.clone()
    }

    async fn prepare(&self) -> Result<()> {
        Ok(())
    }

    async fn send(&self, to: &str, mut payload: SignalingPayload) -> Result<()> {
        payload.id = to.to_string();
        let text = payload.to_json()?;
        debug!("Manual signaling payload ready for {}", to);

        *self.text_to_send.lock() = text.clone();

        let callback = self.on_outgoing_text.lock().clone();
        if let Some(cb) = callback {
            cb(text);
        }

        Ok(())
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signaling::SessionDescription;

    #[test]
    fn test_ids_are_unique() {
        assert_ne!(ManualSignaling::new().local_id(), ManualSignaling::new().local_id());
    }

    #[test]
    fn test_initiate_uses_own_id() {
        let signaling = ManualSignaling::new();
        let requested = Arc::new(Mutex::new(None));
        let sink = requested.clone();
        signaling.bind_initiate_offer(Arc::new(move |id| *sink.lock() = Some(id)));

        signaling.initiate();
        assert_eq!(requested.lock().clone(), Some(signaling.local_id()));
    }

    #[tokio::test]
    async fn test_send_exposes_text_addressed_to_peer() {
        let signaling = ManualSignaling::new();
        let outgoing = Arc::new(Mutex::new(Vec::new()));
        let sink = outgoing.clone();
        signaling.bind_outgoing_text(Arc::new(move |text| sink.lock().push(text)));

        let payload = SignalingPayload::new(
            signaling.local_id(),
            SessionDescription::offer("v=0"),
            Vec::new(),
        );
        signaling.send("remote-1", payload).await.unwrap();

        let text = signaling.text_to_send();
        let parsed = SignalingPayload::from_json(&text).unwrap();
        assert_eq!(parsed.id, "remote-1");
        assert_eq!(*outgoing.lock(), vec![text]);
    }

    #[test]
    fn test_apply_remote_text() {
        let signaling = ManualSignaling::new();
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = received.clone();
        signaling.bind_incoming_data(Arc::new(move |payload| sink.lock().push(payload)));

        let text = SignalingPayload::new("a", SessionDescription::answer("v=0"), Vec::new())
            .to_json()
            .unwrap();
        signaling.apply_remote_text(&format!("  {}\n", text)).unwrap();

        assert_eq!(received.lock().len(), 1);
        assert!(signaling.apply_remote_text("garbage").is_err());
    }
}
