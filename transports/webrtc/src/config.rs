//! Configuration types for the data channel mesh

use serde::{Deserialize, Serialize};

/// Label used for data channels when none is configured
pub const DEFAULT_CHANNEL_NAME: &str = "mesh-channel";

/// Public STUN server used when no ICE servers are configured
pub const DEFAULT_STUN_SERVER: &str = "stun:stun.l.google.com:19302";

/// Default maximum payload bytes carried by one frame
pub const DEFAULT_MAX_MESSAGE_SIZE_FOR_FRAME: usize = 15360;

/// Default inactivity timeout for a partially received message
pub const DEFAULT_FRAMES_TIMEOUT_MS: u64 = 5000;

/// Upper bound for a single frame (SCTP message size limit in browsers)
pub const MAX_FRAME_SIZE_LIMIT: usize = 256 * 1024;

/// Configuration shared by an orchestrator and the pool that owns it
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshConfig {
    /// Split outgoing messages into frames (default: false)
    ///
    /// When disabled, messages are sent verbatim over the data channel.
    pub use_framing: bool,

    /// Data channel label used when initiating offers
    pub channel_name: String,

    /// STUN/TURN servers (default STUN server is used when empty)
    pub ice_servers: Vec<IceServerConfig>,

    /// Maximum bytes of message content per frame (default: 15360)
    pub max_message_size_for_frame: usize,

    /// Inactivity timeout for partial messages in milliseconds (default: 5000)
    pub frames_timeout_ms: u64,

    /// Data channel mode (default: Reliable)
    pub data_channel_mode: DataChannelMode,
}

/// STUN or TURN server descriptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServerConfig {
    /// Server URLs (stun:, stuns:, turn: or turns:)
    pub urls: Vec<String>,

    /// Username for TURN authentication
    #[serde(default)]
    pub username: String,

    /// Credential for TURN authentication
    #[serde(default)]
    pub credential: String,
}

impl IceServerConfig {
    /// STUN server without credentials
    pub fn stun(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            username: String::new(),
            credential: String::new(),
        }
    }

    /// TURN server with credentials
    pub fn turn(
        url: impl Into<String>,
        username: impl Into<String>,
        credential: impl Into<String>,
    ) -> Self {
        Self {
            urls: vec![url.into()],
            username: username.into(),
            credential: credential.into(),
        }
    }

    fn is_turn(&self) -> bool {
        self.urls
            .iter()
            .any(|url| url.starts_with("turn:") || url.starts_with("turns:"))
    }
}

/// Data channel mode
///
/// Determines the reliability of message delivery. Framing assumes every
/// frame eventually arrives, so unreliable mode only suits unframed traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataChannelMode {
    /// Reliable, ordered delivery (default)
    Reliable,
    /// Unreliable, unordered delivery (low latency)
    Unreliable,
}

impl DataChannelMode {
    /// Get the ordered setting for webrtc-rs
    pub fn ordered(&self) -> bool {
        match self {
            DataChannelMode::Reliable => true,
            DataChannelMode::Unreliable => false,
        }
    }

    /// Get the max retransmits setting for webrtc-rs
    pub fn max_retransmits(&self) -> Option<u16> {
        match self {
            DataChannelMode::Reliable => None,      // Unlimited retransmits
            DataChannelMode::Unreliable => Some(0), // No retransmits
        }
    }
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            use_framing: false,
            channel_name: DEFAULT_CHANNEL_NAME.to_string(),
            ice_servers: Vec::new(),
            max_message_size_for_frame: DEFAULT_MAX_MESSAGE_SIZE_FOR_FRAME,
            frames_timeout_ms: DEFAULT_FRAMES_TIMEOUT_MS,
            data_channel_mode: DataChannelMode::Reliable,
        }
    }
}

impl MeshConfig {
    /// Validate configuration parameters
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `channel_name` is empty
    /// - `max_message_size_for_frame` is not in range 1-262144
    /// - `frames_timeout_ms` is zero
    /// - an ICE server has no URL, an unknown scheme, or is a TURN server
    ///   without credentials
    pub fn validate(&self) -> crate::Result<()> {
        use crate::Error;

        if self.channel_name.trim().is_empty() {
            return Err(Error::InvalidConfig(
                "channel_name must not be empty".to_string(),
            ));
        }

        if self.max_message_size_for_frame == 0
            || self.max_message_size_for_frame > MAX_FRAME_SIZE_LIMIT
        {
            return Err(Error::InvalidConfig(format!(
                "max_message_size_for_frame must be in range 1-{}, got {}",
                MAX_FRAME_SIZE_LIMIT, self.max_message_size_for_frame
            )));
        }

        if self.frames_timeout_ms == 0 {
            return Err(Error::InvalidConfig(
                "frames_timeout_ms must be greater than zero".to_string(),
            ));
        }

        for server in &self.ice_servers {
            if server.urls.is_empty() {
                return Err(Error::InvalidConfig(
                    "ICE server entry has no URLs".to_string(),
                ));
            }

            if let Some(url) = server.urls.iter().find(|url| !has_ice_scheme(url)) {
                return Err(Error::InvalidConfig(format!(
                    "ICE server URL must start with stun:, stuns:, turn: or turns:, got {}",
                    url
                )));
            }

            if server.is_turn() && (server.username.is_empty() || server.credential.is_empty()) {
                return Err(Error::InvalidConfig(format!(
                    "TURN server {} requires username and credential",
                    server.urls[0]
                )));
            }
        }

        Ok(())
    }

    /// ICE servers to hand to the transport
    ///
    /// Falls back to a single public STUN server when none are configured.
    pub fn resolved_ice_servers(&self) -> Vec<IceServerConfig> {
        if self.ice_servers.is_empty() {
            vec![IceServerConfig::stun(DEFAULT_STUN_SERVER)]
        } else {
            self.ice_servers.clone()
        }
    }

    /// Inactivity timeout for partially received messages
    pub fn frames_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.frames_timeout_ms)
    }

    /// Enable or disable message framing
    pub fn with_framing(mut self, use_framing: bool) -> Self {
        self.use_framing = use_framing;
        self
    }

    /// Set the data channel label
    pub fn with_channel_name(mut self, channel_name: &str) -> Self {
        self.channel_name = channel_name.to_string();
        self
    }

    /// Replace the ICE server list
    pub fn with_ice_servers(mut self, ice_servers: Vec<IceServerConfig>) -> Self {
        self.ice_servers = ice_servers;
        self
    }

    /// Set the maximum frame payload size
    pub fn with_max_message_size_for_frame(mut self, max_bytes: usize) -> Self {
        self.max_message_size_for_frame = max_bytes;
        self
    }

    /// Set the partial message inactivity timeout
    pub fn with_frames_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.frames_timeout_ms = timeout_ms;
        self
    }

    /// Set the data channel mode
    pub fn with_data_channel_mode(mut self, mode: DataChannelMode) -> Self {
        self.data_channel_mode = mode;
        self
    }
}

fn has_ice_scheme(url: &str) -> bool {
    ["stun:", "stuns:", "turn:", "turns:"]
        .iter()
        .any(|scheme| url.starts_with(scheme))
}
