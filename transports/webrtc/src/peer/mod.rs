//! Peer negotiation and lifecycle
//!
//! Handles offer/answer negotiation, candidate batching and data channel
//! lifecycle for every peer learned through one signaling backend.

pub mod orchestrator;
pub mod record;

pub use orchestrator::{PeerOrchestrator, SendReport};
pub use record::{PeerInfo, PeerRole, PeerState};
