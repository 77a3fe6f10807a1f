//! Peer registry: one entry per remote peer with its connection state.

use std::collections::HashMap;

use crate::identity::{Peer, PeerId};

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum ConnectionState {
    NotConnected,
    Connecting,
    Connected,
}

/// Result of [`PeerRegistry::upsert`].
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum StateChange {
    /// Duplicate or stale transition; nothing changed.
    Unchanged,
    /// `from` is `None` on first sighting.
    Changed {
        from: Option<ConnectionState>,
        to: ConnectionState,
    },
}

struct PeerEntry {
    peer: Peer,
    state: ConnectionState,
}

/// Transitions run NotConnected -> Connecting -> Connected -> NotConnected per attempt.
/// A repeated state is a no-op, and Connecting after Connected is a stale event.
fn accepts(from: ConnectionState, to: ConnectionState) -> bool {
    match (from, to) {
        (a, b) if a == b => false,
        (ConnectionState::Connected, ConnectionState::Connecting) => false,
        _ => true,
    }
}

#[derive(Default)]
pub struct PeerRegistry {
    peers: HashMap<PeerId, PeerEntry>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or update a peer. Idempotent for repeated states.
    pub fn upsert(&mut self, peer: &Peer, state: ConnectionState) -> StateChange {
        match self.peers.get_mut(&peer.id) {
            Some(entry) => {
                if entry.peer.display_name != peer.display_name {
                    entry.peer.display_name.clone_from(&peer.display_name);
                }
                if !accepts(entry.state, state) {
                    return StateChange::Unchanged;
                }
                let from = entry.state;
                entry.state = state;
                StateChange::Changed {
                    from: Some(from),
                    to: state,
                }
            }
            None => {
                self.peers.insert(
                    peer.id,
                    PeerEntry {
                        peer: peer.clone(),
                        state,
                    },
                );
                StateChange::Changed {
                    from: None,
                    to: state,
                }
            }
        }
    }

    pub fn remove(&mut self, peer_id: &PeerId) -> Option<Peer> {
        self.peers.remove(peer_id).map(|e| e.peer)
    }

    pub fn get(&self, peer_id: &PeerId) -> Option<&Peer> {
        self.peers.get(peer_id).map(|e| &e.peer)
    }

    pub fn state(&self, peer_id: &PeerId) -> Option<ConnectionState> {
        self.peers.get(peer_id).map(|e| e.state)
    }

    /// Snapshot of peers in Connected state (not Connecting), ordered by ID.
    pub fn connected_peers(&self) -> Vec<Peer> {
        let mut out: Vec<Peer> = self
            .peers
            .values()
            .filter(|e| e.state == ConnectionState::Connected)
            .map(|e| e.peer.clone())
            .collect();
        out.sort_by_key(|p| p.id);
        out
    }

    pub fn connected_ids(&self) -> Vec<PeerId> {
        self.connected_peers().into_iter().map(|p| p.id).collect()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
