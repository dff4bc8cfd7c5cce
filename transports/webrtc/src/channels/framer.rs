//! Message framing for data channels
//!
//! Splits messages larger than one data channel send into ordered frames and
//! reassembles them on the receiving side. Frames travel as JSON:
//!
//! ```text
//! { "id": "<message id>", "framesNumber": 3, "currentFrame": 1, "data": "..." }
//! ```
//!
//! A partially received message is dropped once no frame for its id has
//! arrived within the configured timeout.

use crate::{Error, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// One frame of a logical message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameRecord {
    /// Identifier shared by every frame of one message
    pub id: String,

    /// Total number of frames of the message
    pub frames_number: u32,

    /// 1-based position of this frame
    pub current_frame: u32,

    /// This frame's slice of the message
    pub data: String,
}

impl FrameRecord {
    /// Serialize to the wire format
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::SerializationError(e.to_string()))
    }

    /// Parse from the wire format
    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw)
            .map_err(|e| Error::SerializationError(format!("Invalid frame: {}", e)))
    }
}

/// Outcome of feeding one frame to the reassembler
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reassembly {
    /// Every frame arrived; the joined message
    Complete(String),
    /// More frames are needed
    Incomplete,
}

/// Aborts the expiry task when dropped
struct ExpiryTimer(JoinHandle<()>);

impl Drop for ExpiryTimer {
    fn drop(&mut self) {
        self.0.abort();
    }
}

struct Assembly {
    frames_number: u32,
    frames: BTreeMap<u32, String>,
    generation: u64,
    timer: Option<ExpiryTimer>,
}

#[derive(Default)]
struct PendingAssemblies {
    assemblies: HashMap<String, Assembly>,
    next_generation: u64,
}

/// Splits and reassembles framed messages
///
/// Each framer owns its pending-assembly table; frames for different message
/// ids never contend with each other.
pub struct MessageFramer {
    pending: Arc<Mutex<PendingAssemblies>>,
    timeout: Duration,
}

impl MessageFramer {
    /// Create a framer that drops partial messages after `timeout` of inactivity
    pub fn new(timeout: Duration) -> Self {
        Self {
            pending: Arc::new(Mutex::new(PendingAssemblies::default())),
            timeout,
        }
    }

    /// Inactivity timeout for partial messages
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Split `message` into serialized frames of at most `max_frame_bytes`
    ///
    /// `frames_number = ceil(len / max)` and every frame but the last carries
    /// `floor(len / frames_number)` bytes; the last one takes the remainder.
    pub fn split(&self, message: &str, max_frame_bytes: usize) -> Result<Vec<String>> {
        frame_records(message, max_frame_bytes)?
            .iter()
            .map(FrameRecord::to_json)
            .collect()
    }

    /// Feed one serialized frame
    ///
    /// Restarts the inactivity timer of the frame's message id. Returns the
    /// joined message once every frame of that id has arrived.
    ///
    /// # Errors
    ///
    /// Malformed JSON, an out-of-range frame index, or a `framesNumber` that
    /// disagrees with earlier frames of the same id. Also fails when called
    /// outside a tokio runtime, which drives the inactivity timers.
    pub fn reassemble(&self, raw: &str) -> Result<Reassembly> {
        let runtime = Handle::try_current().map_err(|e| {
            Error::RuntimeError(format!("Frame reassembly needs a tokio runtime: {}", e))
        })?;
        let frame = FrameRecord::from_json(raw)?;

        if frame.frames_number == 0
            || frame.current_frame == 0
            || frame.current_frame > frame.frames_number
        {
            return Err(Error::InvalidFrame(format!(
                "frame {} of {} for message {}",
                frame.current_frame, frame.frames_number, frame.id
            )));
        }

        let mut pending = self.pending.lock();
        pending.next_generation += 1;
        let generation = pending.next_generation;

        let assembly = pending
            .assemblies
            .entry(frame.id.clone())
            .or_insert_with(|| Assembly {
                frames_number: frame.frames_number,
                frames: BTreeMap::new(),
                generation,
                timer: None,
            });

        if assembly.frames_number != frame.frames_number {
            return Err(Error::InvalidFrame(format!(
                "message {} declared {} frames, frame {} declares {}",
                frame.id, assembly.frames_number, frame.current_frame, frame.frames_number
            )));
        }

        // Replacing the timer aborts the previous one
        assembly.generation = generation;
        assembly.timer = Some(self.schedule_expiry(&runtime, frame.id.clone(), generation));

        if assembly.frames.insert(frame.current_frame, frame.data).is_some() {
            debug!(
                "Duplicate frame {} for message {} replaced",
                frame.current_frame, frame.id
            );
        }

        if assembly.frames.len() < assembly.frames_number as usize {
            return Ok(Reassembly::Incomplete);
        }

        let complete = pending.assemblies.remove(&frame.id);
        drop(pending);

        let message = complete
            .map(|assembly| assembly.frames.into_values().collect::<String>())
            .unwrap_or_default();

        Ok(Reassembly::Complete(message))
    }

    /// Number of messages waiting for more frames
    pub fn pending_count(&self) -> usize {
        self.pending.lock().assemblies.len()
    }

    /// Whether frames for `message_id` are waiting for completion
    pub fn is_pending(&self, message_id: &str) -> bool {
        self.pending.lock().assemblies.contains_key(message_id)
    }

    /// Drop every partial message and cancel its timer
    pub fn clear(&self) {
        self.pending.lock().assemblies.clear();
    }

    fn schedule_expiry(&self, runtime: &Handle, message_id: String, generation: u64) -> ExpiryTimer {
        let pending: Weak<Mutex<PendingAssemblies>> = Arc::downgrade(&self.pending);
        let timeout = self.timeout;

        ExpiryTimer(runtime.spawn(async move {
            tokio::time::sleep(timeout).await;

            let Some(pending) = pending.upgrade() else {
                return;
            };

            let expired = {
                let mut pending = pending.lock();
                match pending.assemblies.get(&message_id) {
                    // A newer frame re-armed the timer after this one fired
                    Some(assembly) if assembly.generation != generation => None,
                    Some(_) => pending.assemblies.remove(&message_id),
                    None => None,
                }
            };

            if let Some(assembly) = expired {
                warn!(
                    "Dropping message {}: {} of {} frames received before timeout",
                    message_id,
                    assembly.frames.len(),
                    assembly.frames_number
                );
            }
        }))
    }
}

impl Default for MessageFramer {
    fn default() -> Self {
        Self::new(Duration::from_millis(crate::config::DEFAULT_FRAMES_TIMEOUT_MS))
    }
}

impl Drop for MessageFramer {
    fn drop(&mut self) {
        self.clear();
    }
}

/// Split `message` into frame records without serializing them
///
/// Cut points are moved back to the nearest UTF-8 character boundary so every
/// frame carries a valid string; the number of frames never changes. An empty
/// message yields a single empty frame.
pub fn frame_records(message: &str, max_frame_bytes: usize) -> Result<Vec<FrameRecord>> {
    if max_frame_bytes == 0 {
        return Err(Error::InvalidConfig(
            "max_frame_bytes must be greater than zero".to_string(),
        ));
    }

    let id = uuid::Uuid::new_v4().to_string();
    let length = message.len();
    let frames_number = length.div_ceil(max_frame_bytes).max(1);
    let frame_size = length / frames_number;

    let frames_total = u32::try_from(frames_number).map_err(|_| {
        Error::InvalidFrame(format!("message of {} bytes needs too many frames", length))
    })?;

    let mut frames = Vec::with_capacity(frames_number);
    let mut start = 0;

    for index in 0..frames_number {
        let end = if index + 1 == frames_number {
            length
        } else {
            floor_char_boundary(message, (index + 1) * frame_size)
        };

        frames.push(FrameRecord {
            id: id.clone(),
            frames_number: frames_total,
            current_frame: index as u32 + 1,
            data: message[start..end].to_string(),
        });

        start = end;
    }

    Ok(frames)
}

fn floor_char_boundary(text: &str, mut index: usize) -> usize {
    if index >= text.len() {
        return text.len();
    }
    while !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}
