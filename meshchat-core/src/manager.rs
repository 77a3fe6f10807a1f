//! Session manager: the thread-safe front of [`SessionCore`].
//!
//! Transport callbacks may arrive on any thread. Every event runs against the core under a single
//! lock, and the notifications it produces are queued before the lock is released, so observers
//! see changes in exactly the order they were applied. Transport calls are made outside the lock.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::config::{ConfigError, SessionConfig};
use crate::core::{Notification, OutboundAction, SessionCore};
use crate::identity::{Peer, PeerId};
use crate::observer::{Dispatcher, ObserverSet, SessionObserver, Subscription};
use crate::registry::ConnectionState;
use crate::transcript::{ResourceRef, Transcript, TranscriptId};
use crate::transfer::{TransferId, TransferOutcome};
use crate::transport::{Transport, TransportEvent};

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("invalid config: {0}")]
    Config(#[from] ConfigError),
    #[error("failed to start dispatch thread: {0}")]
    Dispatch(#[from] std::io::Error),
}

pub struct SessionManager<T: Transport> {
    service_type: String,
    core: Mutex<SessionCore>,
    transport: T,
    observers: ObserverSet,
    dispatcher: Dispatcher,
}

impl<T: Transport> SessionManager<T> {
    /// Create a session with a fresh local identity. Discovery is the transport's job: hand the
    /// returned manager to it as the sink for [`TransportEvent`]s.
    pub fn new(config: &SessionConfig, transport: T) -> Result<Self, SessionError> {
        config.validate()?;
        let local = Peer::new(PeerId::generate(), config.display_name.clone());
        let mut core = SessionCore::new(local.clone());
        core.set_transfer_timeout(config.transfer_timeout_ticks);
        let observers = ObserverSet::default();
        let dispatcher = Dispatcher::spawn(observers.clone())?;
        tracing::info!(
            "session created for {} (service type {})",
            local,
            config.service_type
        );
        Ok(Self {
            service_type: config.service_type.clone(),
            core: Mutex::new(core),
            transport,
            observers,
            dispatcher,
        })
    }

    /// Shorthand for [`SessionManager::new`] with default settings apart from the two names.
    pub fn initialize(
        display_name: &str,
        service_type: &str,
        transport: T,
    ) -> Result<Self, SessionError> {
        Self::new(&SessionConfig::new(display_name, service_type), transport)
    }

    fn lock(&self) -> MutexGuard<'_, SessionCore> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` against the core and queue its notifications while still holding the lock.
    fn apply(&self, f: impl FnOnce(&mut SessionCore) -> Vec<Notification>) {
        let mut core = self.lock();
        for notification in f(&mut core) {
            self.dispatcher.notify(notification);
        }
    }

    fn execute(&self, action: OutboundAction) {
        match action {
            OutboundAction::SendData { peers, bytes } => {
                if let Err(e) = self.transport.send_data(&peers, bytes) {
                    tracing::warn!("broadcast to {} peers failed: {}", peers.len(), e);
                }
            }
            OutboundAction::SendResource {
                peer,
                transfer_id,
                name,
                resource,
            } => {
                if let Err(e) = self
                    .transport
                    .send_resource(peer, transfer_id, &name, &resource)
                {
                    tracing::warn!("could not start {} to {}: {}", name, peer, e);
                    self.apply(|core| {
                        core.on_resource_transfer_finished(
                            peer,
                            transfer_id,
                            TransferOutcome::Failed {
                                reason: e.to_string(),
                            },
                        )
                    });
                }
            }
        }
    }

    /// Send text to every connected peer. Always returns the local transcript, even with nobody
    /// connected; observers are not notified of it.
    pub fn send_message(&self, text: &str) -> Transcript {
        let peers = self.lock().message_recipients();
        let (transcript, action) = SessionCore::build_message(text, peers);
        if let Some(action) = action {
            self.execute(action);
        }
        transcript
    }

    /// Send a resource to every connected peer. The returned transcript is the first snapshot;
    /// later ones arrive through [`SessionObserver::update_transcript`].
    pub fn send_resource(&self, resource: impl Into<ResourceRef>, name: &str) -> Transcript {
        let (transcript, actions) = self.lock().prepare_resource(resource.into(), name);
        for action in actions {
            self.execute(action);
        }
        transcript
    }

    pub fn on_peer_state_changed(&self, peer: Peer, state: ConnectionState) {
        self.apply(|core| core.on_peer_state_changed(peer, state));
    }

    pub fn on_peer_lost(&self, peer_id: PeerId) {
        self.apply(|core| core.on_peer_lost(peer_id));
    }

    pub fn on_data_received(&self, peer: Peer, bytes: &[u8]) {
        self.apply(|core| core.on_data_received(peer, bytes));
    }

    pub fn on_resource_transfer_started(&self, peer: Peer, name: &str, transfer_id: TransferId) {
        self.apply(|core| core.on_resource_transfer_started(peer, name, transfer_id));
    }

    pub fn on_resource_transfer_progress(
        &self,
        peer_id: PeerId,
        transfer_id: TransferId,
        fraction: f64,
    ) {
        self.apply(|core| core.on_resource_transfer_progress(peer_id, transfer_id, fraction));
    }

    pub fn on_resource_transfer_finished(
        &self,
        peer_id: PeerId,
        transfer_id: TransferId,
        outcome: TransferOutcome,
    ) {
        self.apply(|core| core.on_resource_transfer_finished(peer_id, transfer_id, outcome));
    }

    pub fn handle_event(&self, event: TransportEvent) {
        self.apply(|core| core.handle_event(event));
    }

    /// Advance the logical clock; call periodically (the host picks the period).
    pub fn tick(&self) {
        self.apply(|core| core.tick());
    }

    pub fn subscribe(&self, observer: Arc<dyn SessionObserver>) -> Subscription {
        self.observers.subscribe(observer)
    }

    /// Wait until every notification produced so far has reached the observers.
    pub async fn flush(&self) {
        self.dispatcher.flush().await;
    }

    pub fn local_peer(&self) -> Peer {
        self.lock().local_peer().clone()
    }

    pub fn service_type(&self) -> &str {
        &self.service_type
    }

    pub fn connected_peers(&self) -> Vec<Peer> {
        self.lock().registry().connected_peers()
    }

    pub fn peer_state(&self, peer_id: &PeerId) -> Option<ConnectionState> {
        self.lock().registry().state(peer_id)
    }

    /// Latest snapshot of an in-flight resource transcript.
    pub fn transcript(&self, id: &TranscriptId) -> Option<Transcript> {
        self.lock().transcript(id)
    }

    /// Number of unfinished transfer legs.
    pub fn active_transfers(&self) -> usize {
        self.lock().transfers().len()
    }
}
