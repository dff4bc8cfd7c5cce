//! Application-facing channel events
//!
//! Each event kind keeps an ordered list of subscribers. Handlers run in
//! registration order; the list is snapshotted before dispatch so a handler
//! may register further handlers without deadlocking.

use parking_lot::Mutex;
use std::sync::Arc;

/// Called when a data channel opens
pub type OpenHandler = Arc<dyn Fn() + Send + Sync>;

/// Called with `(peer_id, message)` for every complete inbound message
pub type MessageHandler = Arc<dyn Fn(&str, &str) + Send + Sync>;

/// Called when a previously opened connection is lost
pub type CloseHandler = Arc<dyn Fn() + Send + Sync>;

/// Ordered subscriber lists for open, message and close events
#[derive(Default)]
pub struct EventHandlers {
    open: Mutex<Vec<OpenHandler>>,
    message: Mutex<Vec<MessageHandler>>,
    close: Mutex<Vec<CloseHandler>>,
}

impl EventHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_open(&self, handler: OpenHandler) {
        self.open.lock().push(handler);
    }

    pub fn add_message(&self, handler: MessageHandler) {
        self.message.lock().push(handler);
    }

    pub fn add_close(&self, handler: CloseHandler) {
        self.close.lock().push(handler);
    }

    pub fn emit_open(&self) {
        let handlers = self.open.lock().clone();
        for handler in handlers {
            handler();
        }
    }

    pub fn emit_message(&self, peer_id: &str, message: &str) {
        let handlers = self.message.lock().clone();
        for handler in handlers {
            handler(peer_id, message);
        }
    }

    pub fn emit_close(&self) {
        let handlers = self.close.lock().clone();
        for handler in handlers {
            handler();
        }
    }

    /// Total number of registered handlers
    pub fn len(&self) -> usize {
        self.open.lock().len() + self.message.lock().len() + self.close.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
