//! Error types for the data channel mesh

/// Result type alias using the mesh Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in mesh operations
///
/// Every variant is scoped to a single peer, message or signaling backend.
/// Nothing here is fatal to an orchestrator or a pool.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid configuration parameter
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Signaling backend error
    #[error("Signaling error: {0}")]
    SignalingError(String),

    /// Peer not found
    #[error("Peer not found: {0}")]
    PeerNotFound(String),

    /// Peer connection (transport session) error
    #[error("Peer connection error: {0}")]
    PeerConnectionError(String),

    /// ICE candidate error
    #[error("ICE candidate error: {0}")]
    IceCandidateError(String),

    /// SDP negotiation error
    #[error("SDP negotiation error: {0}")]
    SdpError(String),

    /// Data channel error
    #[error("Data channel error: {0}")]
    DataChannelError(String),

    /// Frame rejected by the reassembler
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    /// Operation needs an async runtime that is not available
    #[error("Runtime error: {0}")]
    RuntimeError(String),

    /// WebRTC library error
    #[error("WebRTC error: {0}")]
    WebRtcError(String),
}
