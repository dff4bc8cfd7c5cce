//! Transport capability used by the orchestrator
//!
//! The orchestrator never touches a WebRTC stack directly. It asks a
//! [`SessionFactory`] for one [`RtcSession`] per remote peer and reacts to the
//! [`SessionEvent`]s that session emits. [`WebRtcSessionFactory`] is the
//! production implementation; tests plug in in-memory fakes.

pub mod webrtc_session;

pub use webrtc_session::WebRtcSessionFactory;

use crate::config::{DataChannelMode, MeshConfig};
use crate::signaling::{IceCandidate, SessionDescription};
use crate::Result;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Stream of events emitted by one session
pub type SessionEvents = mpsc::UnboundedReceiver<SessionEvent>;

/// Creates transport sessions
#[async_trait]
pub trait SessionFactory: Send + Sync {
    /// Create a session and the stream of its events
    async fn create_session(&self, config: &MeshConfig) -> Result<(Arc<dyn RtcSession>, SessionEvents)>;
}

/// One negotiated connection to a remote peer
#[async_trait]
pub trait RtcSession: Send + Sync {
    /// Produce a local offer
    async fn create_offer(&self) -> Result<SessionDescription>;

    /// Produce a local answer to the applied remote offer
    async fn create_answer(&self) -> Result<SessionDescription>;

    /// Apply a locally produced description
    async fn set_local_description(&self, description: SessionDescription) -> Result<()>;

    /// Apply the remote side's description
    async fn set_remote_description(&self, description: SessionDescription) -> Result<()>;

    /// Current local description, if one was applied
    async fn local_description(&self) -> Option<SessionDescription>;

    /// Apply one remote candidate
    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()>;

    /// Create a data channel; its events arrive on the session event stream
    async fn create_data_channel(&self, label: &str, mode: DataChannelMode) -> Result<Arc<dyn RtcChannel>>;

    /// Tear the session down
    async fn close(&self) -> Result<()>;
}

/// Data channel belonging to a session
#[async_trait]
pub trait RtcChannel: Send + Sync {
    /// Channel label
    fn label(&self) -> String;

    /// Send one text message
    async fn send_text(&self, text: &str) -> Result<()>;

    /// Close the channel
    async fn close(&self) -> Result<()>;
}

/// Events raised by a session and its data channel
pub enum SessionEvent {
    /// The session wants a (re)negotiation
    NegotiationNeeded,

    /// Local candidate discovered; `None` once gathering completed
    IceCandidate(Option<IceCandidate>),

    /// Remote side opened a data channel
    DataChannel(Arc<dyn RtcChannel>),

    /// Data channel is open
    ChannelOpened,

    /// Text message received on the data channel
    ChannelMessage(String),

    /// Data channel closed
    ChannelClosed,

    /// Session reached a terminal connectivity state
    ///
    /// Both an ICE `failed` state and a connection `disconnected` or `failed`
    /// state map here.
    PeerUnreachable {
        /// Transport state that triggered the event
        reason: String,
    },
}

impl fmt::Debug for SessionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionEvent::NegotiationNeeded => write!(f, "NegotiationNeeded"),
            SessionEvent::IceCandidate(Some(_)) => write!(f, "IceCandidate"),
            SessionEvent::IceCandidate(None) => write!(f, "IceGatheringComplete"),
            SessionEvent::DataChannel(channel) => write!(f, "DataChannel({})", channel.label()),
            SessionEvent::ChannelOpened => write!(f, "ChannelOpened"),
            SessionEvent::ChannelMessage(text) => write!(f, "ChannelMessage({} bytes)", text.len()),
            SessionEvent::ChannelClosed => write!(f, "ChannelClosed"),
            SessionEvent::PeerUnreachable { reason } => write!(f, "PeerUnreachable({})", reason),
        }
    }
}
