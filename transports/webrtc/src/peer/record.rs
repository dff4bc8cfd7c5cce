//! Per-peer negotiation state

use crate::signaling::IceCandidate;
use crate::transport::{RtcChannel, RtcSession};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

/// Lifecycle of one peer id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    /// No record exists for the id
    Uninitialized,
    /// Session created, descriptions and candidates being exchanged
    Negotiating,
    /// Data channel open
    Open,
    /// Terminal connectivity state reached; the record is being dropped
    Closed,
}

impl fmt::Display for PeerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PeerState::Uninitialized => "uninitialized",
            PeerState::Negotiating => "negotiating",
            PeerState::Open => "open",
            PeerState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Which side of the negotiation the local end plays
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerRole {
    Offerer,
    Answerer,
}

/// Snapshot of one peer record
#[derive(Debug, Clone)]
pub struct PeerInfo {
    /// Peer identifier
    pub peer_id: String,

    /// Identifier of the underlying session instance
    pub connection_id: String,

    /// Negotiation role
    pub role: PeerRole,

    /// Current state
    pub state: PeerState,

    /// Whether the channel ever opened
    pub ever_connected: bool,

    /// Seconds since the record was created
    pub age_secs: u64,
}

pub(crate) struct PeerRecord {
    pub peer_id: String,
    pub connection_id: String,
    pub role: PeerRole,
    pub state: PeerState,
    pub session: Arc<dyn RtcSession>,
    pub channel: Option<Arc<dyn RtcChannel>>,
    pub candidate_cache: Vec<IceCandidate>,
    /// Set once the negotiation payload went out; later candidates are dropped
    pub payload_sent: bool,
    /// Sticky
    pub ever_connected: bool,
    /// Insertion order, used to broadcast in a stable order
    pub seq: u64,
    pub created_at: Instant,
}

impl PeerRecord {
    pub fn new(peer_id: &str, role: PeerRole, session: Arc<dyn RtcSession>, seq: u64) -> Self {
        Self {
            peer_id: peer_id.to_string(),
            connection_id: uuid::Uuid::new_v4().to_string(),
            role,
            state: PeerState::Negotiating,
            session,
            channel: None,
            candidate_cache: Vec::new(),
            payload_sent: false,
            ever_connected: false,
            seq,
            created_at: Instant::now(),
        }
    }

    /// Cache a local candidate unless the payload has already been sent
    ///
    /// Returns false when the candidate was dropped.
    pub fn cache_candidate(&mut self, candidate: IceCandidate) -> bool {
        if self.payload_sent {
            return false;
        }
        self.candidate_cache.push(candidate);
        true
    }

    /// Take the cached candidates for the one outbound payload
    ///
    /// Returns `None` if they were already taken.
    pub fn take_candidates(&mut self) -> Option<Vec<IceCandidate>> {
        if self.payload_sent {
            return None;
        }
        self.payload_sent = true;
        Some(std::mem::take(&mut self.candidate_cache))
    }

    pub fn mark_open(&mut self) {
        self.state = PeerState::Open;
        self.ever_connected = true;
    }

    /// Terminal; the record is about to be dropped
    pub fn mark_closed(&mut self) {
        self.state = PeerState::Closed;
    }

    /// Channel usable for sending, if open
    pub fn open_channel(&self) -> Option<Arc<dyn RtcChannel>> {
        if self.state == PeerState::Open {
            self.channel.clone()
        } else {
            None
        }
    }

    pub fn info(&self) -> PeerInfo {
        PeerInfo {
            peer_id: self.peer_id.clone(),
            connection_id: self.connection_id.clone(),
            role: self.role,
            state: self.state,
            ever_connected: self.ever_connected,
            age_secs: self.created_at.elapsed().as_secs(),
        }
    }
}
