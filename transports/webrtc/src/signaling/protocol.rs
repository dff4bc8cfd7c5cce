//! Negotiation payload exchanged through signaling backends
//!
//! The JSON shape matches what browsers produce for `RTCSessionDescription`
//! and `RTCIceCandidate.toJSON()`, so native and browser peers can share one
//! signaling backend:
//!
//! ```text
//! {
//!   "id": "peer-id",
//!   "sdp": { "type": "offer", "sdp": "v=0..." },
//!   "ice": [ { "candidate": "candidate:...", "sdpMid": "0", "sdpMLineIndex": 0 } ]
//! }
//! ```

use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Kind of session description
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    /// Offer from the initiating side
    Offer,
    /// Provisional answer
    Pranswer,
    /// Final answer
    Answer,
    /// Rollback of a pending description
    Rollback,
}

/// Session description produced by the transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    /// Description kind
    #[serde(rename = "type")]
    pub kind: SdpKind,

    /// Raw SDP text
    pub sdp: String,
}

impl SessionDescription {
    /// Offer description
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    /// Answer description
    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }

    /// Whether this description answers a local offer
    pub fn is_answer(&self) -> bool {
        self.kind == SdpKind::Answer
    }
}

/// Network candidate discovered by the transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    /// Candidate attribute line
    pub candidate: String,

    /// Media stream identification tag
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,

    /// Media line index
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_m_line_index: Option<u16>,

    /// ICE username fragment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    /// Candidate without media section hints
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_m_line_index: None,
            username_fragment: None,
        }
    }
}

/// One negotiation round sent to or received from a remote peer
///
/// Carries the full local description plus every candidate gathered before
/// it was finalized. `id` names the sender on the way out; backends may
/// rewrite it to address the peer record on the receiving side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalingPayload {
    /// Peer identifier being addressed
    pub id: String,

    /// Local or remote session description
    pub sdp: SessionDescription,

    /// Candidates gathered for this description
    #[serde(default)]
    pub ice: Vec<IceCandidate>,
}

impl SignalingPayload {
    /// Create a new payload
    pub fn new(id: impl Into<String>, sdp: SessionDescription, ice: Vec<IceCandidate>) -> Self {
        Self {
            id: id.into(),
            sdp,
            ice,
        }
    }

    /// Serialize to JSON string
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::SerializationError(e.to_string()))
    }

    /// Parse from JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| Error::SerializationError(format!("Invalid signaling payload: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_wire_format() {
        let payload = SignalingPayload::new(
            "peer-1",
            SessionDescription::offer("v=0"),
            vec![IceCandidate {
                candidate: "candidate:1 1 udp 2122260223 192.168.1.2 54321 typ host".to_string(),
                sdp_mid: Some("0".to_string()),
                sdp_m_line_index: Some(0),
                username_fragment: None,
            }],
        );

        let value: serde_json::Value = serde_json::from_str(&payload.to_json().unwrap()).unwrap();
        assert_eq!(value["id"], "peer-1");
        assert_eq!(value["sdp"]["type"], "offer");
        assert_eq!(value["sdp"]["sdp"], "v=0");
        assert_eq!(value["ice"][0]["sdpMid"], "0");
        assert_eq!(value["ice"][0]["sdpMLineIndex"], 0);
        assert!(value["ice"][0].get("usernameFragment").is_none());
    }

    #[test]
    fn test_parse_browser_payload() {
        let json = r#"{
            "id": "abc",
            "sdp": { "type": "answer", "sdp": "v=0\r\n" },
            "ice": [ { "candidate": "candidate:2", "sdpMid": "0", "sdpMLineIndex": 0, "usernameFragment": "u1" } ]
        }"#;

        let payload = SignalingPayload::from_json(json).unwrap();
        assert_eq!(payload.id, "abc");
        assert!(payload.sdp.is_answer());
        assert_eq!(payload.ice.len(), 1);
        assert_eq!(payload.ice[0].username_fragment.as_deref(), Some("u1"));
    }

    #[test]
    fn test_missing_ice_defaults_to_empty() {
        let json = r#"{ "id": "abc", "sdp": { "type": "offer", "sdp": "v=0" } }"#;
        let payload = SignalingPayload::from_json(json).unwrap();
        assert!(payload.ice.is_empty());
        assert!(!payload.sdp.is_answer());
    }

    #[test]
    fn test_invalid_payload() {
        assert!(SignalingPayload::from_json("{}").is_err());
        assert!(SignalingPayload::from_json(r#"{"id":"a","sdp":{"type":"bogus","sdp":""}}"#).is_err());
    }
}
