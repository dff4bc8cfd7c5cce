//! Mesh test harness
//!
//! Provides in-memory stand-ins for both capabilities an orchestrator
//! depends on, so negotiation and messaging can be exercised without
//! network I/O:
//! - [`FakeSessionFactory`] / [`FakeSession`] / [`FakeChannel`] for the transport
//! - [`MemorySignaling`] for signaling
//!
//! Basic usage pattern:
//!
//! 1. Create a factory (`auto()` negotiates on its own, `manual()` waits for
//!    injected events) and a `MemorySignaling`
//! 2. Build a `PeerOrchestrator` or `ConnectionPool` over them
//! 3. Drive it and inject events through the recorded sessions
//! 4. Wait for effects with [`eventually`]

#![allow(dead_code)]

pub mod fake_signaling;
pub mod fake_transport;

use std::time::Duration;

use parking_lot::Mutex;
use rtc_mesh::signaling::{IceCandidate, SessionDescription, SignalingPayload};
use std::sync::Arc;

pub use fake_signaling::MemorySignaling;
pub use fake_transport::{FakeChannel, FakeSession, FakeSessionFactory, REJECTED_CANDIDATE};

/// How long [`eventually`] waits before failing the test
pub const EVENTUALLY_TIMEOUT: Duration = Duration::from_secs(2);

/// Initialize logging once per test binary
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

/// Poll `check` until it holds, panicking after [`EVENTUALLY_TIMEOUT`]
pub async fn eventually<F>(what: &str, check: F)
where
    F: Fn() -> bool,
{
    let deadline = tokio::time::Instant::now() + EVENTUALLY_TIMEOUT;
    loop {
        if check() {
            return;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("timed out waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Give spawned tasks a chance to process already queued events
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

/// Remote offer from `peer_id` carrying `candidates`
pub fn remote_offer(peer_id: &str, candidates: &[&str]) -> SignalingPayload {
    SignalingPayload::new(
        peer_id,
        SessionDescription::offer("v=0\r\no=remote 0 0 IN IP4 127.0.0.1\r\n"),
        candidates.iter().map(|c| IceCandidate::new(*c)).collect(),
    )
}

/// Remote answer from `peer_id` carrying `candidates`
pub fn remote_answer(peer_id: &str, candidates: &[&str]) -> SignalingPayload {
    SignalingPayload::new(
        peer_id,
        SessionDescription::answer("v=0\r\no=remote 0 0 IN IP4 127.0.0.1\r\n"),
        candidates.iter().map(|c| IceCandidate::new(*c)).collect(),
    )
}

/// Ordered log fed by event handlers
#[derive(Clone, Default)]
pub struct Recorder {
    entries: Arc<Mutex<Vec<String>>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, entry: impl Into<String>) {
        self.entries.lock().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }
}
