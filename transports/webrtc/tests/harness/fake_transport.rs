//! In-memory transport sessions
//!
//! Sessions record every call made on them and expose their event sender so
//! tests can inject transport events. With `auto_negotiate` enabled a session
//! behaves like a quiet network: creating a channel requests negotiation and
//! applying a local description gathers one candidate and completes.

use async_trait::async_trait;
use parking_lot::Mutex;
use rtc_mesh::config::{DataChannelMode, MeshConfig};
use rtc_mesh::signaling::{IceCandidate, SdpKind, SessionDescription};
use rtc_mesh::transport::{RtcChannel, RtcSession, SessionEvent, SessionEvents, SessionFactory};
use rtc_mesh::{Error, Result};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Candidates containing this marker are rejected by `add_ice_candidate`
pub const REJECTED_CANDIDATE: &str = "invalid";

/// Name of the session call that currently fails, shared with every session
type FailingCall = Arc<Mutex<Option<String>>>;

/// Factory handing out [`FakeSession`]s
pub struct FakeSessionFactory {
    auto_negotiate: bool,
    failing: FailingCall,
    sessions: Mutex<Vec<Arc<FakeSession>>>,
}

impl FakeSessionFactory {
    /// Sessions that negotiate on their own
    pub fn auto() -> Arc<Self> {
        Arc::new(Self {
            auto_negotiate: true,
            failing: FailingCall::default(),
            sessions: Mutex::new(Vec::new()),
        })
    }

    /// Sessions that only emit what the test injects
    pub fn manual() -> Arc<Self> {
        Arc::new(Self {
            auto_negotiate: false,
            failing: FailingCall::default(),
            sessions: Mutex::new(Vec::new()),
        })
    }

    /// Make `call` fail on every session until [`Self::heal`]
    ///
    /// Recognised calls: `set_remote`, `create_answer`, `set_local`,
    /// `create_data_channel`.
    pub fn fail_on(&self, call: &str) {
        *self.failing.lock() = Some(call.to_string());
    }

    pub fn heal(&self) {
        *self.failing.lock() = None;
    }

    /// Every session created so far, in creation order
    pub fn sessions(&self) -> Vec<Arc<FakeSession>> {
        self.sessions.lock().clone()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn last_session(&self) -> Arc<FakeSession> {
        self.sessions
            .lock()
            .last()
            .cloned()
            .expect("no session created yet")
    }
}

#[async_trait]
impl SessionFactory for FakeSessionFactory {
    async fn create_session(
        &self,
        _config: &MeshConfig,
    ) -> Result<(Arc<dyn RtcSession>, SessionEvents)> {
        let (tx, rx) = mpsc::unbounded_channel();
        let session = Arc::new(FakeSession {
            index: self.sessions.lock().len(),
            auto_negotiate: self.auto_negotiate,
            failing: self.failing.clone(),
            events: tx,
            calls: Mutex::new(Vec::new()),
            local: Mutex::new(None),
            remote: Mutex::new(None),
            remote_candidates: Mutex::new(Vec::new()),
            channels: Mutex::new(Vec::new()),
            gathered: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        });
        self.sessions.lock().push(session.clone());

        let session: Arc<dyn RtcSession> = session;
        Ok((session, rx))
    }
}

/// Recording session with injectable events
pub struct FakeSession {
    index: usize,
    auto_negotiate: bool,
    failing: FailingCall,
    events: mpsc::UnboundedSender<SessionEvent>,
    calls: Mutex<Vec<String>>,
    local: Mutex<Option<SessionDescription>>,
    remote: Mutex<Option<SessionDescription>>,
    remote_candidates: Mutex<Vec<IceCandidate>>,
    channels: Mutex<Vec<Arc<FakeChannel>>>,
    gathered: AtomicUsize,
    closed: AtomicBool,
}

impl FakeSession {
    /// Inject a transport event
    pub fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    pub fn open(&self) {
        self.emit(SessionEvent::ChannelOpened);
    }

    pub fn unreachable(&self) {
        self.emit(SessionEvent::PeerUnreachable {
            reason: "connection failed".to_string(),
        });
    }

    pub fn receive(&self, text: &str) {
        self.emit(SessionEvent::ChannelMessage(text.to_string()));
    }

    pub fn local_candidate(&self, candidate: &str) {
        self.emit(SessionEvent::IceCandidate(Some(IceCandidate::new(candidate))));
    }

    pub fn gathering_complete(&self) {
        self.emit(SessionEvent::IceCandidate(None));
    }

    /// Announce a channel opened by the remote side
    pub fn announce_remote_channel(&self, label: &str) -> Arc<FakeChannel> {
        let channel = FakeChannel::new(label);
        self.channels.lock().push(channel.clone());
        let announced: Arc<dyn RtcChannel> = channel.clone();
        self.emit(SessionEvent::DataChannel(announced));
        channel
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn local(&self) -> Option<SessionDescription> {
        self.local.lock().clone()
    }

    pub fn remote(&self) -> Option<SessionDescription> {
        self.remote.lock().clone()
    }

    pub fn remote_candidates(&self) -> Vec<IceCandidate> {
        self.remote_candidates.lock().clone()
    }

    /// Channels created locally or announced, in order
    pub fn channels(&self) -> Vec<Arc<FakeChannel>> {
        self.channels.lock().clone()
    }

    pub fn channel(&self) -> Arc<FakeChannel> {
        self.channels
            .lock()
            .first()
            .cloned()
            .expect("session has no channel")
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().push(call.into());
    }

    fn check_failure(&self, call: &str) -> Result<()> {
        if self.failing.lock().as_deref() == Some(call) {
            return Err(Error::SdpError(format!("{} refused", call)));
        }
        Ok(())
    }

    fn description(&self, kind: SdpKind) -> SessionDescription {
        SessionDescription {
            kind,
            sdp: format!("v=0\r\no=fake {} 0 IN IP4 127.0.0.1\r\n", self.index),
        }
    }
}

#[async_trait]
impl RtcSession for FakeSession {
    async fn create_offer(&self) -> Result<SessionDescription> {
        self.record("create_offer");
        Ok(self.description(SdpKind::Offer))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        self.record("create_answer");
        self.check_failure("create_answer")?;
        if self.remote.lock().is_none() {
            return Err(Error::SdpError("no remote offer applied".to_string()));
        }
        Ok(self.description(SdpKind::Answer))
    }

    async fn set_local_description(&self, description: SessionDescription) -> Result<()> {
        self.record(format!("set_local:{:?}", description.kind));
        self.check_failure("set_local")?;
        *self.local.lock() = Some(description);

        if self.auto_negotiate {
            let n = self.gathered.fetch_add(1, Ordering::SeqCst);
            self.local_candidate(&format!(
                "candidate:{} 1 udp 2122260223 10.0.0.{} 5000 typ host",
                n,
                self.index + 1
            ));
            self.gathering_complete();
        }

        Ok(())
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()> {
        self.record(format!("set_remote:{:?}", description.kind));
        self.check_failure("set_remote")?;
        *self.remote.lock() = Some(description);
        Ok(())
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        self.local.lock().clone()
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        self.record(format!("add_ice:{}", candidate.candidate));
        if candidate.candidate.contains(REJECTED_CANDIDATE) {
            return Err(Error::IceCandidateError(format!(
                "rejected {}",
                candidate.candidate
            )));
        }
        self.remote_candidates.lock().push(candidate);
        Ok(())
    }

    async fn create_data_channel(
        &self,
        label: &str,
        _mode: DataChannelMode,
    ) -> Result<Arc<dyn RtcChannel>> {
        self.record(format!("create_data_channel:{}", label));
        self.check_failure("create_data_channel")?;
        let channel = FakeChannel::new(label);
        self.channels.lock().push(channel.clone());

        if self.auto_negotiate {
            self.emit(SessionEvent::NegotiationNeeded);
        }

        let channel: Arc<dyn RtcChannel> = channel;
        Ok(channel)
    }

    async fn close(&self) -> Result<()> {
        self.record("close");
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Recording data channel
pub struct FakeChannel {
    label: String,
    sent: Mutex<Vec<String>>,
    fail_sends: AtomicBool,
    closed: AtomicBool,
}

impl FakeChannel {
    pub fn new(label: &str) -> Arc<Self> {
        Arc::new(Self {
            label: label.to_string(),
            sent: Mutex::new(Vec::new()),
            fail_sends: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        })
    }

    /// Make every following send fail
    pub fn fail_sends(&self) {
        self.fail_sends.store(true, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RtcChannel for FakeChannel {
    fn label(&self) -> String {
        self.label.clone()
    }

    async fn send_text(&self, text: &str) -> Result<()> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(Error::DataChannelError("channel is broken".to_string()));
        }
        self.sent.lock().push(text.to_string());
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
