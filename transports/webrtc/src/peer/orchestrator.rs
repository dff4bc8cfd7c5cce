//! Per-signaling peer orchestration
//!
//! A [`PeerOrchestrator`] owns every peer record learned through one
//! [`Signaling`] backend. For each peer it drives offer/answer negotiation,
//! gathers local candidates into the single outbound payload, relays channel
//! messages through the framer and tears the record down when the transport
//! reports the peer unreachable.
//!
//! Transport events are consumed by one pump task per session. The pump only
//! holds a weak reference to the orchestrator and re-resolves the record by
//! peer id on every event, so events from a replaced or removed session are
//! ignored.

use super::record::{PeerInfo, PeerRecord, PeerRole, PeerState};
use crate::channels::{MessageFramer, Reassembly};
use crate::config::MeshConfig;
use crate::events::EventHandlers;
use crate::signaling::{SessionDescription, Signaling, SignalingPayload};
use crate::transport::{RtcChannel, RtcSession, SessionEvent, SessionEvents, SessionFactory};
use crate::{Error, Result};
use futures::future::join_all;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tracing::{debug, info, instrument, warn};

/// Outcome of one broadcast
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendReport {
    /// Peers with an open channel when the send started
    pub total_peers: usize,

    /// Peers that accepted every frame
    pub sent_count: usize,

    /// Peers where a send failed
    pub failed_peers: Vec<String>,

    /// Frames written to each peer (1 without framing)
    pub frames_per_peer: usize,
}

impl SendReport {
    /// Whether every targeted peer accepted the message
    pub fn all_sent(&self) -> bool {
        self.failed_peers.is_empty()
    }

    /// Fold another report into this one
    pub fn merge(&mut self, other: SendReport) {
        self.total_peers += other.total_peers;
        self.sent_count += other.sent_count;
        self.failed_peers.extend(other.failed_peers);
        self.frames_per_peer = self.frames_per_peer.max(other.frames_per_peer);
    }
}

#[derive(Default)]
struct PeerTable {
    records: HashMap<String, PeerRecord>,
    next_seq: u64,
}

impl PeerTable {
    fn insert(&mut self, peer_id: &str, role: PeerRole, session: Arc<dyn RtcSession>) -> String {
        let seq = self.next_seq;
        self.next_seq += 1;

        let record = PeerRecord::new(peer_id, role, session, seq);
        let connection_id = record.connection_id.clone();
        self.records.insert(peer_id.to_string(), record);
        connection_id
    }

    /// Record for `peer_id` only if it still belongs to `connection_id`
    fn current(&mut self, peer_id: &str, connection_id: &str) -> Option<&mut PeerRecord> {
        self.records
            .get_mut(peer_id)
            .filter(|record| record.connection_id == connection_id)
    }
}

struct Inner {
    local_id: String,
    config: MeshConfig,
    signaling: Arc<dyn Signaling>,
    factory: Arc<dyn SessionFactory>,
    peers: Mutex<PeerTable>,
    framer: MessageFramer,
    handlers: EventHandlers,
}

/// Owner of all peer state machines for one signaling backend
///
/// Cloning yields another handle to the same orchestrator.
#[derive(Clone)]
pub struct PeerOrchestrator {
    inner: Arc<Inner>,
}

impl PeerOrchestrator {
    /// Create an orchestrator and bind it to `signaling`
    ///
    /// # Errors
    ///
    /// Returns an error if `config` does not validate.
    pub fn new(
        signaling: Arc<dyn Signaling>,
        factory: Arc<dyn SessionFactory>,
        config: MeshConfig,
    ) -> Result<Self> {
        config.validate()?;

        let inner = Arc::new(Inner {
            local_id: signaling.local_id(),
            framer: MessageFramer::new(config.frames_timeout()),
            config,
            signaling: signaling.clone(),
            factory,
            peers: Mutex::new(PeerTable::default()),
            handlers: EventHandlers::new(),
        });

        let weak = Arc::downgrade(&inner);
        signaling.bind_initiate_offer(Arc::new(move |peer_id: String| {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            tokio::spawn(async move {
                let channel_name = inner.config.channel_name.clone();
                if let Err(e) = inner.initiate_offer(&peer_id, &channel_name).await {
                    warn!("Failed to initiate offer to {}: {}", peer_id, e);
                }
            });
        }));

        let weak = Arc::downgrade(&inner);
        signaling.bind_incoming_data(Arc::new(move |payload: SignalingPayload| {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            tokio::spawn(async move {
                let peer_id = payload.id.clone();
                if let Err(e) = inner.apply_remote(payload).await {
                    warn!("Failed to apply payload from {}: {}", peer_id, e);
                }
            });
        }));

        info!("Orchestrator ready for local id {}", inner.local_id);

        Ok(Self { inner })
    }

    /// Wait until the signaling backend can send and receive
    pub async fn prepare(&self) -> Result<()> {
        self.inner.signaling.prepare().await
    }

    /// Start negotiating with `peer_id` as the offering side
    ///
    /// Any existing record for the id is replaced by a fresh one.
    #[instrument(skip(self), fields(local_id = %self.inner.local_id))]
    pub async fn initiate_offer(&self, peer_id: &str, channel_name: &str) -> Result<()> {
        self.inner.initiate_offer(peer_id, channel_name).await
    }

    /// Apply a negotiation payload received from the peer named by `payload.id`
    ///
    /// # Errors
    ///
    /// Returns [`Error::PeerNotFound`] for an answer naming an unknown peer,
    /// or the transport error if a description cannot be applied. Candidates
    /// that fail to apply are logged and skipped.
    #[instrument(skip(self, payload), fields(peer_id = %payload.id))]
    pub async fn apply_remote(&self, payload: SignalingPayload) -> Result<()> {
        self.inner.apply_remote(payload).await
    }

    /// Send `message` to every peer with an open channel
    ///
    /// With framing enabled the message is split and every frame is written
    /// in order. Peers are served concurrently; a failing peer is logged and
    /// reported without affecting the others.
    pub async fn send_message(&self, message: &str) -> Result<SendReport> {
        self.inner.send_message(message).await
    }

    /// Close every channel and session and forget all peers
    pub async fn close(&self) {
        self.inner.close().await
    }

    /// Register a handler for channels opening
    pub fn on_open<F>(&self, handler: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.handlers.add_open(Arc::new(handler));
    }

    /// Register a handler for complete messages, called with `(peer_id, message)`
    pub fn on_message<F>(&self, handler: F)
    where
        F: Fn(&str, &str) + Send + Sync + 'static,
    {
        self.inner.handlers.add_message(Arc::new(handler));
    }

    /// Register a handler for previously opened connections being lost
    pub fn on_close<F>(&self, handler: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.handlers.add_close(Arc::new(handler));
    }

    pub fn local_id(&self) -> &str {
        &self.inner.local_id
    }

    pub fn config(&self) -> &MeshConfig {
        &self.inner.config
    }

    pub fn peer_count(&self) -> usize {
        self.inner.peers.lock().records.len()
    }

    pub fn has_peer(&self, peer_id: &str) -> bool {
        self.inner.peers.lock().records.contains_key(peer_id)
    }

    /// State of `peer_id`; `Uninitialized` when no record exists
    ///
    /// Removed records are forgotten entirely, so a torn-down id reads
    /// `Uninitialized` again.
    pub fn peer_state(&self, peer_id: &str) -> PeerState {
        self.inner
            .peers
            .lock()
            .records
            .get(peer_id)
            .map_or(PeerState::Uninitialized, |record| record.state)
    }

    /// Snapshot of every live record in creation order
    pub fn list_peers(&self) -> Vec<PeerInfo> {
        let peers = self.inner.peers.lock();
        let mut records: Vec<&PeerRecord> = peers.records.values().collect();
        records.sort_by_key(|record| record.seq);
        records.iter().map(|record| record.info()).collect()
    }

    /// Messages with frames still awaiting reassembly
    pub fn pending_frames(&self) -> usize {
        self.inner.framer.pending_count()
    }
}

impl Inner {
    async fn initiate_offer(self: &Arc<Self>, peer_id: &str, channel_name: &str) -> Result<()> {
        let (session, events) = self.factory.create_session(&self.config).await?;

        let (connection_id, replaced) = {
            let mut peers = self.peers.lock();
            let replaced = peers.records.remove(peer_id);
            let connection_id = peers.insert(peer_id, PeerRole::Offerer, session.clone());
            (connection_id, replaced)
        };

        if let Some(old) = replaced {
            debug!("Replacing existing record for {}", peer_id);
            close_record(old).await;
        }

        info!("Offering to peer {}", peer_id);
        self.spawn_event_pump(peer_id, &connection_id, events);

        let channel = match session
            .create_data_channel(channel_name, self.config.data_channel_mode)
            .await
        {
            Ok(channel) => channel,
            Err(e) => {
                self.abandon_negotiation(peer_id, &connection_id, &e).await;
                return Err(e);
            }
        };

        let mut peers = self.peers.lock();
        match peers.current(peer_id, &connection_id) {
            Some(record) => {
                if record.channel.is_none() {
                    record.channel = Some(channel);
                }
            }
            None => debug!("Record for {} gone before its channel was created", peer_id),
        }

        Ok(())
    }

    async fn apply_remote(self: &Arc<Self>, payload: SignalingPayload) -> Result<()> {
        let peer_id = payload.id.clone();

        let session = if payload.sdp.is_answer() {
            let session = self
                .peers
                .lock()
                .records
                .get(&peer_id)
                .map(|record| record.session.clone())
                .ok_or_else(|| Error::PeerNotFound(peer_id.clone()))?;

            debug!("Applying answer from {}", peer_id);
            session.set_remote_description(payload.sdp).await?;
            session
        } else {
            let (session, connection_id) = self.answerer_session(&peer_id).await?;

            debug!("Applying {:?} from {}", payload.sdp.kind, peer_id);
            if let Err(e) = answer_offer(session.as_ref(), payload.sdp).await {
                self.abandon_negotiation(&peer_id, &connection_id, &e).await;
                return Err(e);
            }
            session
        };

        for candidate in payload.ice {
            if let Err(e) = session.add_ice_candidate(candidate).await {
                warn!("Skipping remote candidate from {}: {}", peer_id, e);
            }
        }

        Ok(())
    }

    /// Session and connection id of the existing record for `peer_id`, or of
    /// a new answerer record
    async fn answerer_session(
        self: &Arc<Self>,
        peer_id: &str,
    ) -> Result<(Arc<dyn RtcSession>, String)> {
        if let Some(record) = self.peers.lock().records.get(peer_id) {
            return Ok((record.session.clone(), record.connection_id.clone()));
        }

        let (session, events) = self.factory.create_session(&self.config).await?;

        let inserted = {
            let mut peers = self.peers.lock();
            match peers
                .records
                .get(peer_id)
                .map(|record| (record.session.clone(), record.connection_id.clone()))
            {
                Some(existing) => Err(existing),
                None => Ok(peers.insert(peer_id, PeerRole::Answerer, session.clone())),
            }
        };

        let connection_id = match inserted {
            Ok(connection_id) => connection_id,
            Err(existing) => {
                // Lost a race with another payload for the same peer
                if let Err(e) = session.close().await {
                    debug!("Error closing surplus session for {}: {}", peer_id, e);
                }
                return Ok(existing);
            }
        };

        info!("Answering peer {}", peer_id);
        self.spawn_event_pump(peer_id, &connection_id, events);

        Ok((session, connection_id))
    }

    /// Remove a record whose negotiation step failed before the channel opened
    ///
    /// No transport event will ever tear such a record down, so it is
    /// treated like an unreachable peer that never connected.
    async fn abandon_negotiation(&self, peer_id: &str, connection_id: &str, error: &Error) {
        let record = {
            let mut peers = self.peers.lock();
            match peers.current(peer_id, connection_id) {
                Some(record) if record.state == PeerState::Negotiating => {}
                _ => return,
            }
            peers.records.remove(peer_id)
        };

        let Some(record) = record else {
            return;
        };

        warn!("Negotiation with {} failed: {}", peer_id, error);
        self.signaling.on_connection_error(peer_id);
        close_record(record).await;
    }

    fn spawn_event_pump(self: &Arc<Self>, peer_id: &str, connection_id: &str, events: SessionEvents) {
        tokio::spawn(run_event_pump(
            Arc::downgrade(self),
            peer_id.to_string(),
            connection_id.to_string(),
            events,
        ));
    }

    /// Handle one session event; returns true when the pump should stop
    async fn handle_event(&self, peer_id: &str, connection_id: &str, event: SessionEvent) -> Result<bool> {
        match event {
            SessionEvent::NegotiationNeeded => {
                let session = {
                    let mut peers = self.peers.lock();
                    let Some(record) = peers.current(peer_id, connection_id) else {
                        return Ok(true);
                    };
                    if record.role != PeerRole::Offerer {
                        debug!("Ignoring negotiation request on answering side of {}", peer_id);
                        return Ok(false);
                    }
                    record.session.clone()
                };

                let offer = session.create_offer().await?;
                session.set_local_description(offer).await?;
                debug!("Local offer applied for {}", peer_id);
            }

            SessionEvent::IceCandidate(Some(candidate)) => {
                let mut peers = self.peers.lock();
                let Some(record) = peers.current(peer_id, connection_id) else {
                    return Ok(true);
                };
                if !record.cache_candidate(candidate) {
                    debug!("Dropping late local candidate for {}", peer_id);
                }
            }

            SessionEvent::IceCandidate(None) => self.flush_payload(peer_id, connection_id).await?,

            SessionEvent::DataChannel(channel) => {
                let mut peers = self.peers.lock();
                let Some(record) = peers.current(peer_id, connection_id) else {
                    return Ok(true);
                };
                debug!("Peer {} opened channel {}", peer_id, channel.label());
                record.channel = Some(channel);
            }

            SessionEvent::ChannelOpened => {
                {
                    let mut peers = self.peers.lock();
                    let Some(record) = peers.current(peer_id, connection_id) else {
                        return Ok(true);
                    };
                    record.mark_open();
                }
                info!("Channel to {} is open", peer_id);
                self.handlers.emit_open();
            }

            SessionEvent::ChannelMessage(text) => {
                if self.peers.lock().current(peer_id, connection_id).is_none() {
                    debug!("Dropping message from a stale session of {}", peer_id);
                    return Ok(true);
                }
                self.relay_inbound(peer_id, &text);
            }

            SessionEvent::ChannelClosed => {
                debug!("Channel to {} closed", peer_id);
            }

            SessionEvent::PeerUnreachable { reason } => {
                self.tear_down(peer_id, connection_id, &reason).await;
                return Ok(true);
            }
        }

        Ok(false)
    }

    /// Send the single outbound payload once gathering completed
    async fn flush_payload(&self, peer_id: &str, connection_id: &str) -> Result<()> {
        let session = match self.peers.lock().current(peer_id, connection_id) {
            Some(record) => record.session.clone(),
            None => return Ok(()),
        };

        let Some(description) = session.local_description().await else {
            warn!("Gathering finished for {} without a local description", peer_id);
            return Ok(());
        };

        let candidates = {
            let mut peers = self.peers.lock();
            match peers.current(peer_id, connection_id).map(PeerRecord::take_candidates) {
                Some(Some(candidates)) => candidates,
                Some(None) => {
                    debug!("Negotiation payload for {} already sent", peer_id);
                    return Ok(());
                }
                None => return Ok(()),
            }
        };

        debug!(
            "Sending {:?} with {} candidates to {}",
            description.kind,
            candidates.len(),
            peer_id
        );

        let payload = SignalingPayload::new(self.local_id.clone(), description, candidates);
        self.signaling.send(peer_id, payload).await
    }

    fn relay_inbound(&self, peer_id: &str, text: &str) {
        if !self.config.use_framing {
            self.handlers.emit_message(peer_id, text);
            return;
        }

        match self.framer.reassemble(text) {
            Ok(Reassembly::Complete(message)) => self.handlers.emit_message(peer_id, &message),
            Ok(Reassembly::Incomplete) => {}
            Err(e) => warn!("Dropping frame from {}: {}", peer_id, e),
        }
    }

    async fn tear_down(&self, peer_id: &str, connection_id: &str, reason: &str) {
        let record = {
            let mut peers = self.peers.lock();
            if peers.current(peer_id, connection_id).is_none() {
                debug!("Ignoring {} from a stale session of {}", reason, peer_id);
                return;
            }
            peers.records.remove(peer_id)
        };

        let Some(record) = record else {
            return;
        };

        if record.ever_connected {
            info!("Connection to {} lost: {}", peer_id, reason);
            self.handlers.emit_close();
        } else {
            warn!("Negotiation with {} failed: {}", peer_id, reason);
        }

        self.signaling.on_connection_error(peer_id);
        close_record(record).await;
    }

    async fn send_message(&self, message: &str) -> Result<SendReport> {
        let frames = if self.config.use_framing {
            self.framer
                .split(message, self.config.max_message_size_for_frame)?
        } else {
            vec![message.to_string()]
        };

        let targets: Vec<(String, Arc<dyn RtcChannel>)> = {
            let peers = self.peers.lock();
            let mut open: Vec<&PeerRecord> = peers
                .records
                .values()
                .filter(|record| record.open_channel().is_some())
                .collect();
            open.sort_by_key(|record| record.seq);
            open.iter()
                .filter_map(|record| {
                    record
                        .open_channel()
                        .map(|channel| (record.peer_id.clone(), channel))
                })
                .collect()
        };

        let frames = &frames;
        let results = join_all(targets.iter().map(|(peer_id, channel)| async move {
            for frame in frames {
                if let Err(e) = channel.send_text(frame).await {
                    warn!("Send to {} failed: {}", peer_id, e);
                    return Err(peer_id.clone());
                }
            }
            Ok(())
        }))
        .await;

        let mut report = SendReport {
            total_peers: targets.len(),
            frames_per_peer: frames.len(),
            ..Default::default()
        };
        for result in results {
            match result {
                Ok(()) => report.sent_count += 1,
                Err(peer_id) => report.failed_peers.push(peer_id),
            }
        }

        Ok(report)
    }

    async fn close(&self) {
        let records: Vec<PeerRecord> = {
            let mut peers = self.peers.lock();
            peers.records.drain().map(|(_, record)| record).collect()
        };

        info!("Closing orchestrator {} ({} peers)", self.local_id, records.len());

        for record in records {
            close_record(record).await;
        }

        self.framer.clear();
    }
}

async fn run_event_pump(
    inner: Weak<Inner>,
    peer_id: String,
    connection_id: String,
    mut events: SessionEvents,
) {
    while let Some(event) = events.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };

        debug!("Peer {} event: {:?}", peer_id, event);

        match inner.handle_event(&peer_id, &connection_id, event).await {
            Ok(false) => {}
            Ok(true) => break,
            Err(e) => warn!("Error handling event for {}: {}", peer_id, e),
        }
    }

    debug!("Event pump for {} ({}) stopped", peer_id, connection_id);
}

/// Apply a remote offer and answer it locally
async fn answer_offer(session: &dyn RtcSession, offer: SessionDescription) -> Result<()> {
    session.set_remote_description(offer).await?;
    let answer = session.create_answer().await?;
    session.set_local_description(answer).await
}

/// Close the channel and session of a removed record, suppressing errors
async fn close_record(mut record: PeerRecord) {
    record.mark_closed();
    debug!("Record for {} is {}", record.peer_id, record.state);

    if let Some(channel) = record.channel {
        if let Err(e) = channel.close().await {
            debug!("Error closing channel to {}: {}", record.peer_id, e);
        }
    }

    if let Err(e) = record.session.close().await {
        debug!("Error closing session for {}: {}", record.peer_id, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_report_merge() {
        let mut report = SendReport {
            total_peers: 2,
            sent_count: 1,
            failed_peers: vec!["a".to_string()],
            frames_per_peer: 3,
        };
        report.merge(SendReport {
            total_peers: 1,
            sent_count: 1,
            failed_peers: Vec::new(),
            frames_per_peer: 3,
        });

        assert_eq!(report.total_peers, 3);
        assert_eq!(report.sent_count, 2);
        assert_eq!(report.failed_peers, vec!["a".to_string()]);
        assert!(!report.all_sent());
    }

    #[test]
    fn test_empty_report_is_all_sent() {
        assert!(SendReport::default().all_sent());
    }
}
