//! Connection pool spanning several signaling backends
//!
//! The pool creates one [`PeerOrchestrator`] per signaling backend, all
//! sharing the pool's configuration, and republishes their events through
//! its own handler lists.

use crate::config::MeshConfig;
use crate::events::EventHandlers;
use crate::peer::{PeerOrchestrator, SendReport};
use crate::signaling::Signaling;
use crate::transport::SessionFactory;
use crate::Result;
use futures::future::join_all;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{info, instrument};

/// Set of orchestrators broadcasting as one
pub struct ConnectionPool {
    factory: Arc<dyn SessionFactory>,
    config: MeshConfig,
    orchestrators: Mutex<Vec<PeerOrchestrator>>,
    handlers: Arc<EventHandlers>,
}

impl ConnectionPool {
    /// Create an empty pool
    ///
    /// # Errors
    ///
    /// Returns an error if `config` does not validate.
    pub fn new(factory: Arc<dyn SessionFactory>, config: MeshConfig) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            factory,
            config,
            orchestrators: Mutex::new(Vec::new()),
            handlers: Arc::new(EventHandlers::new()),
        })
    }

    /// Attach a signaling backend
    ///
    /// Builds an orchestrator bound to `signaling`, forwards its events to the
    /// pool's handlers and waits for the backend to become ready. The
    /// orchestrator stays in the pool until [`close`](Self::close).
    #[instrument(skip(self, signaling), fields(local_id = %signaling.local_id()))]
    pub async fn connect(&self, signaling: Arc<dyn Signaling>) -> Result<PeerOrchestrator> {
        let orchestrator =
            PeerOrchestrator::new(signaling, self.factory.clone(), self.config.clone())?;

        let handlers = self.handlers.clone();
        orchestrator.on_open(move || handlers.emit_open());
        let handlers = self.handlers.clone();
        orchestrator.on_message(move |peer_id, message| handlers.emit_message(peer_id, message));
        let handlers = self.handlers.clone();
        orchestrator.on_close(move || handlers.emit_close());

        orchestrator.prepare().await?;

        self.orchestrators.lock().push(orchestrator.clone());
        info!("Pool connected signaling {}", orchestrator.local_id());

        Ok(orchestrator)
    }

    /// Broadcast `message` through every orchestrator
    pub async fn send_message(&self, message: &str) -> Result<SendReport> {
        let orchestrators = self.connections();
        let results = join_all(
            orchestrators
                .iter()
                .map(|orchestrator| orchestrator.send_message(message)),
        )
        .await;

        let mut report = SendReport::default();
        for result in results {
            report.merge(result?);
        }

        Ok(report)
    }

    /// Close every orchestrator and release them
    pub async fn close(&self) {
        let orchestrators: Vec<PeerOrchestrator> = self.orchestrators.lock().drain(..).collect();
        info!("Closing pool with {} connections", orchestrators.len());

        for orchestrator in orchestrators {
            orchestrator.close().await;
        }
    }

    /// Orchestrators currently held, in connection order
    pub fn connections(&self) -> Vec<PeerOrchestrator> {
        self.orchestrators.lock().clone()
    }

    pub fn connection_count(&self) -> usize {
        self.orchestrators.lock().len()
    }

    pub fn config(&self) -> &MeshConfig {
        &self.config
    }

    /// Register a handler for channels opening on any orchestrator
    pub fn on_open<F>(&self, handler: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.handlers.add_open(Arc::new(handler));
    }

    /// Register a handler for messages, called with `(peer_id, message)`
    pub fn on_message<F>(&self, handler: F)
    where
        F: Fn(&str, &str) + Send + Sync + 'static,
    {
        self.handlers.add_message(Arc::new(handler));
    }

    /// Register a handler for lost connections on any orchestrator
    pub fn on_close<F>(&self, handler: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.handlers.add_close(Arc::new(handler));
    }
}
