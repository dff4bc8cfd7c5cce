//! Same-process loopback signaling
//!
//! Lets one orchestrator negotiate with itself: offers go out to
//! `connection-answer-N` and come back addressed to `connection-offer-N`, so
//! the orchestrator holds both ends as two separate peer records.

use super::{
    ConnectionErrorCallback, IncomingDataCallback, InitiateOfferCallback, Signaling,
    SignalingCallbacks, SignalingPayload,
};
use crate::{Error, Result};
use async_trait::async_trait;
use tracing::debug;

const OFFER_PREFIX: &str = "connection-offer-";
const ANSWER_PREFIX: &str = "connection-answer-";
const LOCAL_ID: &str = "loopback";

/// Loopback signaling for a single process
#[derive(Default)]
pub struct LocalSignaling {
    callbacks: SignalingCallbacks,
}

impl LocalSignaling {
    /// Create a new loopback backend
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the bound orchestrator to open `connections` loopback connections
    pub fn initiate(&self, connections: usize) {
        for index in 1..=connections {
            if !self
                .callbacks
                .initiate_offer(format!("{}{}", ANSWER_PREFIX, index))
            {
                debug!("Loopback initiate called before an orchestrator was bound");
                return;
            }
        }
    }

    /// Register a handler for failed connections
    pub fn bind_connection_error(&self, callback: ConnectionErrorCallback) {
        self.callbacks.set_connection_error(callback);
    }
}

/// Map the address of one loopback end to the record id of the other
fn swap_loopback_id(to: &str) -> Option<String> {
    if let Some(index) = to.strip_prefix(ANSWER_PREFIX) {
        Some(format!("{}{}", OFFER_PREFIX, index))
    } else {
        to.strip_prefix(OFFER_PREFIX)
            .map(|index| format!("{}{}", ANSWER_PREFIX, index))
    }
}

#[async_trait]
impl Signaling for LocalSignaling {
    fn local_id(&self) -> String {
        LOCAL_ID.to_string()
    }

    async fn prepare(&self) -> Result<()> {
        Ok(())
    }

    async fn send(&self, to: &str, mut payload: SignalingPayload) -> Result<()> {
        if let Some(id) = swap_loopback_id(to) {
            payload.id = id;
        }

        debug!("Loopback delivering {:?} for {}", payload.sdp.kind, payload.id);

        if self.callbacks.incoming_data(payload) {
            Ok(())
        } else {
            Err(Error::SignalingError(
                "No incoming data handler bound to loopback signaling".to_string(),
            ))
        }
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
