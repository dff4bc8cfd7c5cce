//! Transport sessions backed by webrtc-rs

use super::{RtcChannel, RtcSession, SessionEvent, SessionEvents, SessionFactory};
use crate::config::{DataChannelMode, MeshConfig};
use crate::signaling::{IceCandidate, SdpKind, SessionDescription};
use crate::{Error, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;

type EventSender = mpsc::UnboundedSender<SessionEvent>;

/// Creates webrtc-rs peer connections
#[derive(Debug, Default, Clone)]
pub struct WebRtcSessionFactory;

impl WebRtcSessionFactory {
    /// Create a new factory
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SessionFactory for WebRtcSessionFactory {
    #[instrument(skip(self, config))]
    async fn create_session(
        &self,
        config: &MeshConfig,
    ) -> Result<(Arc<dyn RtcSession>, SessionEvents)> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| Error::WebRtcError(format!("Failed to register codecs: {}", e)))?;

        let interceptor_registry =
            register_default_interceptors(Default::default(), &mut media_engine).map_err(|e| {
                Error::WebRtcError(format!("Failed to register interceptors: {}", e))
            })?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(interceptor_registry)
            .build();

        let ice_servers: Vec<RTCIceServer> = config
            .resolved_ice_servers()
            .into_iter()
            .map(|server| {
                #[allow(clippy::needless_update)]
                RTCIceServer {
                    urls: server.urls,
                    username: server.username,
                    credential: server.credential,
                    ..Default::default()
                }
            })
            .collect();

        let rtc_config = RTCConfiguration {
            ice_servers,
            ..Default::default()
        };

        let peer_connection =
            Arc::new(api.new_peer_connection(rtc_config).await.map_err(|e| {
                Error::WebRtcError(format!("Failed to create peer connection: {}", e))
            })?);

        let (tx, rx) = mpsc::unbounded_channel();
        bind_session_events(&peer_connection, &tx);

        debug!("Created webrtc-rs session");

        let session: Arc<dyn RtcSession> = Arc::new(WebRtcSession {
            peer_connection,
            events: tx,
        });

        Ok((session, rx))
    }
}

fn bind_session_events(peer_connection: &Arc<RTCPeerConnection>, tx: &EventSender) {
    let events = tx.clone();
    peer_connection.on_negotiation_needed(Box::new(move || {
        let events = events.clone();
        Box::pin(async move {
            let _ = events.send(SessionEvent::NegotiationNeeded);
        })
    }));

    let events = tx.clone();
    peer_connection.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
        let events = events.clone();
        Box::pin(async move {
            let candidate = match candidate {
                Some(candidate) => match candidate.to_json() {
                    Ok(init) => Some(from_rtc_candidate(init)),
                    Err(e) => {
                        warn!("Failed to serialize local ICE candidate: {}", e);
                        return;
                    }
                },
                None => None,
            };
            let _ = events.send(SessionEvent::IceCandidate(candidate));
        })
    }));

    // Firefox-style terminal signal
    let events = tx.clone();
    peer_connection.on_ice_connection_state_change(Box::new(move |state: RTCIceConnectionState| {
        let events = events.clone();
        Box::pin(async move {
            if let Some(reason) = ice_terminal_reason(state) {
                let _ = events.send(SessionEvent::PeerUnreachable {
                    reason: reason.to_string(),
                });
            }
        })
    }));

    // Chrome-style terminal signal
    let events = tx.clone();
    peer_connection.on_peer_connection_state_change(Box::new(
        move |state: RTCPeerConnectionState| {
            let events = events.clone();
            Box::pin(async move {
                if let Some(reason) = connection_terminal_reason(state) {
                    let _ = events.send(SessionEvent::PeerUnreachable {
                        reason: reason.to_string(),
                    });
                }
            })
        },
    ));

    let events = tx.clone();
    peer_connection.on_data_channel(Box::new(move |data_channel: Arc<RTCDataChannel>| {
        let events = events.clone();
        Box::pin(async move {
            info!("Remote data channel announced: {}", data_channel.label());
            // Announce the channel before any of its own events can be queued
            let channel: Arc<dyn RtcChannel> = Arc::new(WebRtcChannel {
                data_channel: Arc::clone(&data_channel),
            });
            let _ = events.send(SessionEvent::DataChannel(channel));
            bind_channel_events(&data_channel, &events);
        })
    }));
}

fn bind_channel_events(data_channel: &Arc<RTCDataChannel>, tx: &EventSender) {
    let events = tx.clone();
    data_channel.on_open(Box::new(move || {
        Box::pin(async move {
            let _ = events.send(SessionEvent::ChannelOpened);
        })
    }));

    let events = tx.clone();
    data_channel.on_message(Box::new(move |message: DataChannelMessage| {
        let events = events.clone();
        Box::pin(async move {
            match String::from_utf8(message.data.to_vec()) {
                Ok(text) => {
                    let _ = events.send(SessionEvent::ChannelMessage(text));
                }
                Err(e) => warn!("Dropping non UTF-8 data channel message: {}", e),
            }
        })
    }));

    let events = tx.clone();
    data_channel.on_close(Box::new(move || {
        let events = events.clone();
        Box::pin(async move {
            let _ = events.send(SessionEvent::ChannelClosed);
        })
    }));

    let label = data_channel.label().to_string();
    data_channel.on_error(Box::new(move |e: webrtc::Error| {
        warn!("Data channel {} error: {}", label, e);
        Box::pin(async {})
    }));
}

struct WebRtcSession {
    peer_connection: Arc<RTCPeerConnection>,
    events: EventSender,
}

#[async_trait]
impl RtcSession for WebRtcSession {
    async fn create_offer(&self) -> Result<SessionDescription> {
        let offer = self
            .peer_connection
            .create_offer(None)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to create offer: {}", e)))?;
        from_rtc_description(&offer)
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let answer = self
            .peer_connection
            .create_answer(None)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to create answer: {}", e)))?;
        from_rtc_description(&answer)
    }

    async fn set_local_description(&self, description: SessionDescription) -> Result<()> {
        self.peer_connection
            .set_local_description(to_rtc_description(description)?)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to set local description: {}", e)))
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()> {
        self.peer_connection
            .set_remote_description(to_rtc_description(description)?)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to set remote description: {}", e)))
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        let description = self.peer_connection.local_description().await?;
        from_rtc_description(&description).ok()
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        self.peer_connection
            .add_ice_candidate(to_rtc_candidate(candidate))
            .await
            .map_err(|e| Error::IceCandidateError(format!("Failed to add ICE candidate: {}", e)))
    }

    async fn create_data_channel(
        &self,
        label: &str,
        mode: DataChannelMode,
    ) -> Result<Arc<dyn RtcChannel>> {
        let init = RTCDataChannelInit {
            ordered: Some(mode.ordered()),
            max_retransmits: mode.max_retransmits(),
            ..Default::default()
        };

        let data_channel = self
            .peer_connection
            .create_data_channel(label, Some(init))
            .await
            .map_err(|e| Error::DataChannelError(format!("Failed to create data channel: {}", e)))?;

        bind_channel_events(&data_channel, &self.events);

        Ok(Arc::new(WebRtcChannel { data_channel }))
    }

    async fn close(&self) -> Result<()> {
        self.peer_connection.close().await.map_err(|e| {
            Error::PeerConnectionError(format!("Failed to close connection: {}", e))
        })
    }
}

struct WebRtcChannel {
    data_channel: Arc<RTCDataChannel>,
}

#[async_trait]
impl RtcChannel for WebRtcChannel {
    fn label(&self) -> String {
        self.data_channel.label().to_string()
    }

    async fn send_text(&self, text: &str) -> Result<()> {
        self.data_channel
            .send_text(text.to_string())
            .await
            .map(|_| ())
            .map_err(|e| Error::DataChannelError(format!("Failed to send message: {}", e)))
    }

    async fn close(&self) -> Result<()> {
        self.data_channel
            .close()
            .await
            .map_err(|e| Error::DataChannelError(format!("Failed to close data channel: {}", e)))
    }
}

fn to_rtc_description(description: SessionDescription) -> Result<RTCSessionDescription> {
    let kind = description.kind;
    let parsed = match kind {
        SdpKind::Offer => RTCSessionDescription::offer(description.sdp),
        SdpKind::Answer => RTCSessionDescription::answer(description.sdp),
        SdpKind::Pranswer => RTCSessionDescription::pranswer(description.sdp),
        SdpKind::Rollback => {
            return Err(Error::SdpError(
                "Rollback descriptions are not supported".to_string(),
            ))
        }
    };
    parsed.map_err(|e| Error::SdpError(format!("Failed to parse {:?} description: {}", kind, e)))
}

fn from_rtc_description(description: &RTCSessionDescription) -> Result<SessionDescription> {
    let kind = match description.sdp_type {
        RTCSdpType::Offer => SdpKind::Offer,
        RTCSdpType::Pranswer => SdpKind::Pranswer,
        RTCSdpType::Answer => SdpKind::Answer,
        RTCSdpType::Rollback => SdpKind::Rollback,
        RTCSdpType::Unspecified => {
            return Err(Error::SdpError(
                "Session description has no type".to_string(),
            ))
        }
    };

    Ok(SessionDescription {
        kind,
        sdp: description.sdp.clone(),
    })
}

/// Reason to give up on the peer for a terminal ICE state
fn ice_terminal_reason(state: RTCIceConnectionState) -> Option<&'static str> {
    match state {
        RTCIceConnectionState::Failed => Some("ice failed"),
        _ => None,
    }
}

/// Reason to give up on the peer for a terminal connection state
fn connection_terminal_reason(state: RTCPeerConnectionState) -> Option<&'static str> {
    match state {
        RTCPeerConnectionState::Disconnected => Some("connection disconnected"),
        RTCPeerConnectionState::Failed => Some("connection failed"),
        _ => None,
    }
}

fn to_rtc_candidate(candidate: IceCandidate) -> RTCIceCandidateInit {
    RTCIceCandidateInit {
        candidate: candidate.candidate,
        sdp_mid: candidate.sdp_mid,
        sdp_mline_index: candidate.sdp_m_line_index,
        username_fragment: candidate.username_fragment,
    }
}

fn from_rtc_candidate(candidate: RTCIceCandidateInit) -> IceCandidate {
    IceCandidate {
        candidate: candidate.candidate,
        sdp_mid: candidate.sdp_mid,
        sdp_m_line_index: candidate.sdp_mline_index,
        username_fragment: candidate.username_fragment,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states_map_to_unreachable() {
        assert_eq!(ice_terminal_reason(RTCIceConnectionState::Failed), Some("ice failed"));
        assert_eq!(
            connection_terminal_reason(RTCPeerConnectionState::Disconnected),
            Some("connection disconnected")
        );
        assert_eq!(
            connection_terminal_reason(RTCPeerConnectionState::Failed),
            Some("connection failed")
        );
    }

    #[test]
    fn test_transient_states_are_ignored() {
        for state in [
            RTCIceConnectionState::New,
            RTCIceConnectionState::Checking,
            RTCIceConnectionState::Connected,
            RTCIceConnectionState::Completed,
            RTCIceConnectionState::Disconnected,
            RTCIceConnectionState::Closed,
        ] {
            assert_eq!(ice_terminal_reason(state), None, "{:?}", state);
        }

        for state in [
            RTCPeerConnectionState::New,
            RTCPeerConnectionState::Connecting,
            RTCPeerConnectionState::Connected,
            RTCPeerConnectionState::Closed,
        ] {
            assert_eq!(connection_terminal_reason(state), None, "{:?}", state);
        }
    }

    #[test]
    fn test_candidate_conversion() {
        let candidate = IceCandidate {
            candidate: "candidate:1 1 udp 1 10.0.0.1 5000 typ host".to_string(),
            sdp_mid: Some("0".to_string()),
            sdp_m_line_index: Some(0),
            username_fragment: Some("frag".to_string()),
        };

        let init = to_rtc_candidate(candidate.clone());
        assert_eq!(init.sdp_mline_index, Some(0));
        assert_eq!(from_rtc_candidate(init), candidate);
    }

    #[test]
    fn test_rollback_description_rejected() {
        let description = SessionDescription {
            kind: SdpKind::Rollback,
            sdp: String::new(),
        };
        assert!(matches!(
            to_rtc_description(description),
            Err(Error::SdpError(_))
        ));
    }

    #[tokio::test]
    async fn test_offerer_session_produces_offer() {
        let factory = WebRtcSessionFactory::new();
        let (session, mut events) = factory
            .create_session(&MeshConfig::default())
            .await
            .unwrap();

        let channel = session
            .create_data_channel("test", DataChannelMode::Reliable)
            .await
            .unwrap();
        assert_eq!(channel.label(), "test");

        let offer = session.create_offer().await.unwrap();
        assert_eq!(offer.kind, SdpKind::Offer);
        assert!(offer.sdp.contains("webrtc-datachannel"));

        session.set_local_description(offer).await.unwrap();
        assert!(session.local_description().await.is_some());

        let first = tokio::time::timeout(std::time::Duration::from_secs(5), events.recv())
            .await
            .unwrap();
        assert!(first.is_some());

        session.close().await.unwrap();
    }
}
