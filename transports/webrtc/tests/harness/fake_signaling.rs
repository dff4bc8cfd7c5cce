//! In-memory signaling backend
//!
//! Records every payload sent and every connection error reported, and lets
//! tests raise the initiate-offer and incoming-data callbacks directly.

use async_trait::async_trait;
use parking_lot::Mutex;
use rtc_mesh::signaling::{
    IncomingDataCallback, InitiateOfferCallback, Signaling, SignalingPayload,
};
use rtc_mesh::{Error, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Signaling that never leaves the process
pub struct MemorySignaling {
    id: String,
    fail_prepare: bool,
    prepared: AtomicBool,
    sent: Mutex<Vec<(String, SignalingPayload)>>,
    errors: Mutex<Vec<String>>,
    on_initiate_offer: Mutex<Option<InitiateOfferCallback>>,
    on_incoming_data: Mutex<Option<IncomingDataCallback>>,
}

impl MemorySignaling {
    pub fn new(id: &str) -> Arc<Self> {
        Arc::new(Self::build(id, false))
    }

    /// Backend whose `prepare` fails
    pub fn unreachable(id: &str) -> Arc<Self> {
        Arc::new(Self::build(id, true))
    }

    fn build(id: &str, fail_prepare: bool) -> Self {
        Self {
            id: id.to_string(),
            fail_prepare,
            prepared: AtomicBool::new(false),
            sent: Mutex::new(Vec::new()),
            errors: Mutex::new(Vec::new()),
            on_initiate_offer: Mutex::new(None),
            on_incoming_data: Mutex::new(None),
        }
    }

    /// Raise initiate-offer as if `peer_id` was announced
    pub fn trigger_offer(&self, peer_id: &str) {
        let callback = self.on_initiate_offer.lock().clone();
        let callback = callback.expect("initiate-offer callback not bound");
        callback(peer_id.to_string());
    }

    /// Raise incoming-data as if `payload` arrived
    pub fn deliver(&self, payload: SignalingPayload) {
        let callback = self.on_incoming_data.lock().clone();
        let callback = callback.expect("incoming-data callback not bound");
        callback(payload);
    }

    /// Payloads sent so far as `(to, payload)`
    pub fn sent(&self) -> Vec<(String, SignalingPayload)> {
        self.sent.lock().clone()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().len()
    }

    /// Peer ids reported through `on_connection_error`
    pub fn errors(&self) -> Vec<String> {
        self.errors.lock().clone()
    }

    pub fn is_prepared(&self) -> bool {
        self.prepared.load(Ordering::SeqCst)
    }

    pub fn is_bound(&self) -> bool {
        self.on_initiate_offer.lock().is_some() && self.on_incoming_data.lock().is_some()
    }
}

#[async_trait]
impl Signaling for MemorySignaling {
    fn local_id(&self) -> String {
        self.id.clone()
    }

    async fn prepare(&self) -> Result<()> {
        if self.fail_prepare {
            return Err(Error::SignalingError("relay unreachable".to_string()));
        }
        self.prepared.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn send(&self, to: &str, payload: SignalingPayload) -> Result<()> {
        self.sent.lock().push((to.to_string(), payload));
        Ok(())
    }

    fn bind_initiate_offer(&self, callback: InitiateOfferCallback) {
        *self.on_initiate_offer.lock() = Some(callback);
    }

    fn bind_incoming_data(&self, callback: IncomingDataCallback) {
        *self.on_incoming_data.lock() = Some(callback);
    }

    fn on_connection_error(&self, peer_id: &str) {
        self.errors.lock().push(peer_id.to_string());
    }
}
