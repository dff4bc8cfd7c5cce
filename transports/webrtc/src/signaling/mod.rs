//! Signaling capability and its backends
//!
//! An orchestrator only talks to signaling through [`Signaling`]. Backends:
//!
//! - [`LocalSignaling`]: same-process loopback, one orchestrator talks to itself
//! - [`ManualSignaling`]: payloads copied by hand between two processes
//! - [`RelaySignaling`]: JSON messages through a hosted WebSocket relay

pub mod local;
pub mod manual;
pub mod protocol;
pub mod relay;

pub use local::LocalSignaling;
pub use manual::ManualSignaling;
pub use protocol::{IceCandidate, SdpKind, SessionDescription, SignalingPayload};
pub use relay::RelaySignaling;

use crate::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;

/// Callback for requests to start an offer towards a peer id
pub type InitiateOfferCallback = Arc<dyn Fn(String) + Send + Sync>;

/// Callback for negotiation payloads arriving from a remote peer
pub type IncomingDataCallback = Arc<dyn Fn(SignalingPayload) + Send + Sync>;

/// Callback for peers whose connection failed or dropped
pub type ConnectionErrorCallback = Arc<dyn Fn(String) + Send + Sync>;

/// Signaling capability consumed by an orchestrator
#[async_trait]
pub trait Signaling: Send + Sync {
    /// Identifier of the local side
    fn local_id(&self) -> String;

    /// Resolve once the backend can send and receive
    async fn prepare(&self) -> Result<()>;

    /// Send a negotiation payload to `to`
    async fn send(&self, to: &str, payload: SignalingPayload) -> Result<()>;

    /// Register the handler for initiate-offer requests
    fn bind_initiate_offer(&self, callback: InitiateOfferCallback);

    /// Register the handler for incoming negotiation payloads
    fn bind_incoming_data(&self, callback: IncomingDataCallback);

    /// Notification that the connection to `peer_id` failed or dropped
    fn on_connection_error(&self, peer_id: &str);
}

/// Callback slots shared by the bundled backends
#[derive(Default)]
pub(crate) struct SignalingCallbacks {
    on_initiate_offer: Mutex<Option<InitiateOfferCallback>>,
    on_incoming_data: Mutex<Option<IncomingDataCallback>>,
    on_connection_error: Mutex<Option<ConnectionErrorCallback>>,
}

impl SignalingCallbacks {
    pub(crate) fn set_initiate_offer(&self, callback: InitiateOfferCallback) {
        *self.on_initiate_offer.lock() = Some(callback);
    }

    pub(crate) fn set_incoming_data(&self, callback: IncomingDataCallback) {
        *self.on_incoming_data.lock() = Some(callback);
    }

    pub(crate) fn set_connection_error(&self, callback: ConnectionErrorCallback) {
        *self.on_connection_error.lock() = Some(callback);
    }

    /// Returns false when nothing is bound
    pub(crate) fn initiate_offer(&self, peer_id: String) -> bool {
        let callback = self.on_initiate_offer.lock().clone();
        match callback {
            Some(cb) => {
                cb(peer_id);
                true
            }
            None => false,
        }
    }

    /// Returns false when nothing is bound
    pub(crate) fn incoming_data(&self, payload: SignalingPayload) -> bool {
        let callback = self.on_incoming_data.lock().clone();
        match callback {
            Some(cb) => {
                cb(payload);
                true
            }
            None => false,
        }
    }

    pub(crate) fn connection_error(&self, peer_id: String) {
        let callback = self.on_connection_error.lock().clone();
        if let Some(cb) = callback {
            cb(peer_id);
        }
    }
}
