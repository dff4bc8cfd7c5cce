//! Multi-peer data channel mesh over WebRTC
//!
//! This crate connects an application to many remote peers through WebRTC
//! data channels and exposes them as one broadcast surface.
//!
//! # Features
//!
//! - **Pluggable signaling**: loopback, copy-paste and WebSocket relay backends
//!   behind one [`Signaling`] trait
//! - **Per-peer negotiation**: offer/answer with candidates batched into a
//!   single payload per negotiation round
//! - **Message framing**: large messages split into JSON frames and
//!   reassembled in any order, with an inactivity timeout
//! - **Connection pool**: one orchestrator per signaling backend, events
//!   merged and tagged with the originating peer id
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │  Application                                            │
//! │  ↓ send_message / on_open / on_message / on_close      │
//! │  ConnectionPool                                         │
//! │  └─ PeerOrchestrator (one per Signaling backend)        │
//! │     ├─ Signaling (local | manual | relay)              │
//! │     ├─ MessageFramer (split / reassemble)               │
//! │     └─ per-peer RtcSession + RtcChannel                 │
//! │        ↓                                                │
//! │  SessionFactory (webrtc-rs)                             │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use rtc_mesh::MeshConfig;
//!
//! let config = MeshConfig::default()
//!     .with_framing(true)
//!     .with_max_message_size_for_frame(1024);
//!
//! assert!(config.validate().is_ok());
//! assert_eq!(config.resolved_ice_servers().len(), 1);
//! ```
//!
//! ## Async Usage
//!
//! ```no_run
//! use rtc_mesh::{ConnectionPool, MeshConfig, RelaySignaling, WebRtcSessionFactory};
//! use std::sync::Arc;
//!
//! # async fn example() -> rtc_mesh::Result<()> {
//! let pool = ConnectionPool::new(Arc::new(WebRtcSessionFactory::new()), MeshConfig::default())?;
//! pool.on_message(|peer_id, message| println!("{}: {}", peer_id, message));
//!
//! let signaling = Arc::new(RelaySignaling::new("ws://localhost:3000", "lobby")?);
//! pool.connect(signaling).await?;
//!
//! pool.send_message("hello").await?;
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all)]

pub mod channels;
pub mod config;
pub mod error;
pub mod events;
pub mod peer;
pub mod pool;
pub mod signaling;
pub mod transport;

pub use channels::{MessageFramer, Reassembly};
pub use config::{DataChannelMode, IceServerConfig, MeshConfig};
pub use error::{Error, Result};
pub use peer::{PeerInfo, PeerOrchestrator, PeerRole, PeerState, SendReport};
pub use pool::ConnectionPool;
pub use signaling::{
    IceCandidate, LocalSignaling, ManualSignaling, RelaySignaling, SessionDescription, Signaling,
    SignalingPayload,
};
pub use transport::{RtcChannel, RtcSession, SessionEvent, SessionFactory, WebRtcSessionFactory};

/// Get the version of this crate
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
