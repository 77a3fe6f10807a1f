//! Transport contract consumed by the session manager.
//!
//! Discovery, connection setup, encryption and delivery all live behind this trait. The host
//! implements it over the platform mesh layer and feeds inbound activity back as
//! [`TransportEvent`]s.

use std::sync::Arc;

use crate::identity::{Peer, PeerId};
use crate::registry::ConnectionState;
use crate::transcript::ResourceRef;
use crate::transfer::{TransferId, TransferOutcome};

/// Outbound primitives. Implementations hand work off and return without waiting for delivery,
/// and must not call back into the session manager from inside these methods.
pub trait Transport: Send + Sync {
    /// Best-effort ordered delivery of one payload to each listed peer.
    fn send_data(&self, peers: &[PeerId], bytes: Vec<u8>) -> Result<(), TransportError>;

    /// Start a named resource transfer to one peer. Progress and the terminal outcome are reported
    /// later as [`TransportEvent::ResourceProgress`] / [`TransportEvent::ResourceFinished`] carrying
    /// the same `transfer_id`.
    fn send_resource(
        &self,
        peer: PeerId,
        transfer_id: TransferId,
        name: &str,
        resource: &ResourceRef,
    ) -> Result<(), TransportError>;
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn send_data(&self, peers: &[PeerId], bytes: Vec<u8>) -> Result<(), TransportError> {
        (**self).send_data(peers, bytes)
    }

    fn send_resource(
        &self,
        peer: PeerId,
        transfer_id: TransferId,
        name: &str,
        resource: &ResourceRef,
    ) -> Result<(), TransportError> {
        (**self).send_resource(peer, transfer_id, name, resource)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("peer {0} is not connected")]
    NotConnected(PeerId),
    #[error("resource unavailable: {0}")]
    ResourceUnavailable(ResourceRef),
    #[error("transport closed")]
    Closed,
    #[error("{0}")]
    Other(String),
}

/// Inbound events, as delivered by the transport's callback threads.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    PeerStateChanged {
        peer: Peer,
        state: ConnectionState,
    },
    /// Peer vanished from the mesh for good (not just a dropped connection).
    PeerLost {
        peer_id: PeerId,
    },
    DataReceived {
        peer: Peer,
        bytes: Vec<u8>,
    },
    ResourceStarted {
        peer: Peer,
        name: String,
        transfer_id: TransferId,
    },
    ResourceProgress {
        peer_id: PeerId,
        transfer_id: TransferId,
        fraction: f64,
    },
    ResourceFinished {
        peer_id: PeerId,
        transfer_id: TransferId,
        outcome: TransferOutcome,
    },
}

impl TransportEvent {
    /// Peer the event concerns. Events for one peer arrive in order; across peers they don't.
    pub fn peer_id(&self) -> PeerId {
        match self {
            TransportEvent::PeerStateChanged { peer, .. }
            | TransportEvent::DataReceived { peer, .. }
            | TransportEvent::ResourceStarted { peer, .. } => peer.id,
            TransportEvent::PeerLost { peer_id }
            | TransportEvent::ResourceProgress { peer_id, .. }
            | TransportEvent::ResourceFinished { peer_id, .. } => *peer_id,
        }
    }
}
