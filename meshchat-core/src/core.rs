//! Host-driven API: SessionCore receives transport events, returns notifications and actions.
//! No I/O and no locking; `SessionManager` wraps it for concurrent use.

use crate::identity::{Peer, PeerId};
use crate::registry::{ConnectionState, PeerRegistry, StateChange};
use crate::transcript::{ResourceRef, Transcript, TranscriptId, TransferStatus};
use crate::transfer::{TransferId, TransferOutcome, TransferTracker};
use crate::transport::TransportEvent;
use crate::wire;

/// Default idle time, in ticks, before an in-flight transfer is failed.
pub const DEFAULT_TRANSFER_TIMEOUT_TICKS: u64 = 30;

const PEER_DISCONNECTED: &str = "peer disconnected";

/// Main state machine. Host passes events; core returns what observers and the transport must see.
pub struct SessionCore {
    local: Peer,
    registry: PeerRegistry,
    transfers: TransferTracker,
    transfer_timeout_ticks: u64,
}

impl SessionCore {
    pub fn new(local: Peer) -> Self {
        Self {
            local,
            registry: PeerRegistry::new(),
            transfers: TransferTracker::new(),
            transfer_timeout_ticks: DEFAULT_TRANSFER_TIMEOUT_TICKS,
        }
    }

    /// Set idle timeout for transfers in ticks. 0 disables eviction.
    pub fn set_transfer_timeout(&mut self, ticks: u64) {
        self.transfer_timeout_ticks = ticks;
    }

    pub fn local_peer(&self) -> &Peer {
        &self.local
    }

    pub fn registry(&self) -> &PeerRegistry {
        &self.registry
    }

    pub fn transfers(&self) -> &TransferTracker {
        &self.transfers
    }

    /// Peers a text broadcast made now would reach.
    pub fn message_recipients(&self) -> Vec<PeerId> {
        self.registry.connected_ids()
    }

    /// Build the local echo for a text broadcast and, if anyone is connected, the send action.
    pub fn prepare_message(&self, text: &str) -> (Transcript, Option<OutboundAction>) {
        Self::build_message(text, self.message_recipients())
    }

    /// Stateless half of [`SessionCore::prepare_message`]: encodes `text` for `peers`.
    /// Needs no session state, so the manager runs it outside its lock.
    pub fn build_message(text: &str, peers: Vec<PeerId>) -> (Transcript, Option<OutboundAction>) {
        let transcript = Transcript::sent_message(text);
        if peers.is_empty() {
            tracing::debug!("no connected peers; message kept as local echo");
            return (transcript, None);
        }
        match wire::encode(text) {
            Ok(bytes) => (transcript, Some(OutboundAction::SendData { peers, bytes })),
            Err(e) => {
                tracing::warn!("message not sent: {}", e);
                (transcript, None)
            }
        }
    }

    /// Build the transcript for a resource send and register one leg per connected peer.
    /// With nobody connected the transcript is returned already Completed.
    pub fn prepare_resource(
        &mut self,
        resource: ResourceRef,
        name: &str,
    ) -> (Transcript, Vec<OutboundAction>) {
        let mut transcript = Transcript::sent_resource(name, resource.clone());
        let peers = self.registry.connected_ids();
        if peers.is_empty() {
            if let Some(r) = transcript.resource_mut() {
                r.progress = 1.0;
                r.status = TransferStatus::Completed;
            }
            tracing::debug!("no connected peers; resource {} not sent", name);
            return (transcript, Vec::new());
        }
        let mut actions = Vec::with_capacity(peers.len());
        for peer in peers {
            let transfer_id = TransferId::generate();
            if self.transfers.begin(peer, transfer_id, &transcript) {
                actions.push(OutboundAction::SendResource {
                    peer,
                    transfer_id,
                    name: name.to_string(),
                    resource: resource.clone(),
                });
            }
        }
        tracing::debug!(
            "sending resource {} to {} peers (transcript {})",
            name,
            actions.len(),
            transcript.id()
        );
        (transcript, actions)
    }

    /// Peer connection state changed. Leaving Connected (or Connecting) fails the peer's transfers.
    pub fn on_peer_state_changed(&mut self, peer: Peer, state: ConnectionState) -> Vec<Notification> {
        match self.registry.upsert(&peer, state) {
            StateChange::Unchanged => Vec::new(),
            StateChange::Changed { from, to } => {
                tracing::debug!("peer {} {:?} -> {:?}", peer, from, to);
                if to == ConnectionState::NotConnected {
                    self.fail_peer_transfers(peer.id)
                } else {
                    Vec::new()
                }
            }
        }
    }

    /// Peer permanently lost: fail its transfers and forget it.
    pub fn on_peer_lost(&mut self, peer_id: PeerId) -> Vec<Notification> {
        let notifications = self.fail_peer_transfers(peer_id);
        if let Some(peer) = self.registry.remove(&peer_id) {
            tracing::debug!("peer {} lost", peer);
        }
        notifications
    }

    /// Data payload from a peer. Malformed payloads are dropped.
    pub fn on_data_received(&mut self, peer: Peer, bytes: &[u8]) -> Vec<Notification> {
        match wire::decode(bytes) {
            Ok(text) => vec![Notification::Received(Transcript::received_message(
                peer, text,
            ))],
            Err(e) => {
                tracing::warn!("dropping payload from {}: {}", peer.id, e);
                Vec::new()
            }
        }
    }

    /// Inbound resource transfer started. Announced once; duplicate starts are dropped.
    pub fn on_resource_transfer_started(
        &mut self,
        peer: Peer,
        name: &str,
        transfer_id: TransferId,
    ) -> Vec<Notification> {
        let peer_id = peer.id;
        let transcript = Transcript::received_resource(peer, name);
        if !self.transfers.begin(peer_id, transfer_id, &transcript) {
            tracing::debug!("duplicate start for transfer {} from {}", transfer_id, peer_id);
            return Vec::new();
        }
        tracing::debug!("receiving {} from {} (transfer {})", name, peer_id, transfer_id);
        vec![Notification::Received(transcript)]
    }

    pub fn on_resource_transfer_progress(
        &mut self,
        peer_id: PeerId,
        transfer_id: TransferId,
        fraction: f64,
    ) -> Vec<Notification> {
        match self.transfers.progress(peer_id, transfer_id, fraction) {
            Some(t) => {
                tracing::trace!("transfer {} progress {:.3}", transfer_id, fraction);
                vec![Notification::Updated(t)]
            }
            None => Vec::new(),
        }
    }

    pub fn on_resource_transfer_finished(
        &mut self,
        peer_id: PeerId,
        transfer_id: TransferId,
        outcome: TransferOutcome,
    ) -> Vec<Notification> {
        if let TransferOutcome::Failed { reason } = &outcome {
            if self.transfers.contains(peer_id, transfer_id) {
                tracing::warn!("transfer {} with {} failed: {}", transfer_id, peer_id, reason);
            }
        }
        match self.transfers.finish(peer_id, transfer_id, outcome) {
            Some(t) => {
                if t.resource().map(|r| r.status) == Some(TransferStatus::Completed) {
                    tracing::info!("transfer complete (transcript {})", t.id());
                }
                vec![Notification::Updated(t)]
            }
            None => Vec::new(),
        }
    }

    /// Dispatch one transport event to the matching handler.
    pub fn handle_event(&mut self, event: TransportEvent) -> Vec<Notification> {
        match event {
            TransportEvent::PeerStateChanged { peer, state } => {
                self.on_peer_state_changed(peer, state)
            }
            TransportEvent::PeerLost { peer_id } => self.on_peer_lost(peer_id),
            TransportEvent::DataReceived { peer, bytes } => self.on_data_received(peer, &bytes),
            TransportEvent::ResourceStarted {
                peer,
                name,
                transfer_id,
            } => self.on_resource_transfer_started(peer, &name, transfer_id),
            TransportEvent::ResourceProgress {
                peer_id,
                transfer_id,
                fraction,
            } => self.on_resource_transfer_progress(peer_id, transfer_id, fraction),
            TransportEvent::ResourceFinished {
                peer_id,
                transfer_id,
                outcome,
            } => self.on_resource_transfer_finished(peer_id, transfer_id, outcome),
        }
    }

    /// Periodic tick: advance the clock and fail transfers that went quiet.
    pub fn tick(&mut self) -> Vec<Notification> {
        self.transfers.tick();
        let evicted = self.transfers.evict_stalled(self.transfer_timeout_ticks);
        if !evicted.is_empty() {
            tracing::warn!("evicted {} stalled transfers", evicted.len());
        }
        evicted.into_iter().map(Notification::Updated).collect()
    }

    /// Current snapshot of an in-flight resource transcript.
    pub fn transcript(&self, id: &TranscriptId) -> Option<Transcript> {
        self.transfers.transcript(id).cloned()
    }

    fn fail_peer_transfers(&mut self, peer_id: PeerId) -> Vec<Notification> {
        self.transfers
            .fail_peer(peer_id, PEER_DISCONNECTED)
            .into_iter()
            .map(Notification::Updated)
            .collect()
    }
}

/// Observer-facing notification.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// A brand-new unit of conversation.
    Received(Transcript),
    /// New snapshot of a previously announced resource transcript.
    Updated(Transcript),
}

impl Notification {
    pub fn transcript(&self) -> &Transcript {
        match self {
            Notification::Received(t) | Notification::Updated(t) => t,
        }
    }
}

/// Action for host to perform on the transport.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundAction {
    SendData {
        peers: Vec<PeerId>,
        bytes: Vec<u8>,
    },
    SendResource {
        peer: PeerId,
        transfer_id: TransferId,
        name: String,
        resource: ResourceRef,
    },
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, VecDeque};

    use rand::seq::SliceRandom;
    use rand::Rng;

    use super::*;
    use crate::transcript::{Direction, TranscriptKind};

    fn core() -> SessionCore {
        SessionCore::new(Peer::new(PeerId::generate(), "me"))
    }

    fn connected(core: &mut SessionCore, name: &str) -> Peer {
        let peer = Peer::new(PeerId::generate(), name);
        core.on_peer_state_changed(peer.clone(), ConnectionState::Connecting);
        core.on_peer_state_changed(peer.clone(), ConnectionState::Connected);
        peer
    }

    fn status(n: &Notification) -> TransferStatus {
        n.transcript().resource().unwrap().status
    }

    #[test]
    fn message_without_peers_is_local_echo() {
        let core = core();
        let (t, action) = core.prepare_message("hi");
        assert_eq!(t.direction(), Direction::Sent);
        assert_eq!(t.text(), Some("hi"));
        assert!(action.is_none());
    }

    #[test]
    fn message_fans_out_to_connected_only() {
        let mut core = core();
        let a = connected(&mut core, "a");
        let b = Peer::new(PeerId::generate(), "b");
        core.on_peer_state_changed(b.clone(), ConnectionState::Connecting);
        let (_, action) = core.prepare_message("hello");
        match action {
            Some(OutboundAction::SendData { peers, bytes }) => {
                assert_eq!(peers, vec![a.id]);
                assert_eq!(wire::decode(&bytes).unwrap(), "hello");
            }
            other => panic!("expected SendData, got {:?}", other),
        }
    }

    #[test]
    fn build_message_needs_no_session() {
        let peer = PeerId::generate();
        let (t, action) = SessionCore::build_message("hey", vec![peer]);
        assert_eq!(t.text(), Some("hey"));
        assert!(matches!(
            action,
            Some(OutboundAction::SendData { ref peers, .. }) if peers == &vec![peer]
        ));
        assert!(SessionCore::build_message("hey", Vec::new()).1.is_none());
        let huge = "x".repeat(wire::MAX_FRAME_LEN as usize + 1);
        let (t, action) = SessionCore::build_message(&huge, vec![peer]);
        assert_eq!(t.text().map(str::len), Some(huge.len()));
        assert!(action.is_none());
    }

    #[test]
    fn data_received_announces_message() {
        let mut core = core();
        let peer = connected(&mut core, "alice");
        let notes = core.on_data_received(peer.clone(), &wire::encode("hello").unwrap());
        assert_eq!(notes.len(), 1);
        match &notes[0] {
            Notification::Received(t) => {
                assert_eq!(t.direction(), Direction::Received);
                assert_eq!(t.peer(), Some(&peer));
                assert_eq!(t.text(), Some("hello"));
            }
            other => panic!("expected Received, got {:?}", other),
        }
    }

    #[test]
    fn malformed_data_dropped() {
        let mut core = core();
        let peer = connected(&mut core, "alice");
        assert!(core.on_data_received(peer, b"\x01\x02garbage").is_empty());
    }

    #[test]
    fn resource_without_peers_completes_immediately() {
        let mut core = core();
        let (t, actions) = core.prepare_resource("file:///tmp/a.png".into(), "a.png");
        assert!(actions.is_empty());
        let r = t.resource().unwrap();
        assert_eq!(r.status, TransferStatus::Completed);
        assert_eq!(r.progress, 1.0);
        assert!(core.transfers().is_empty());
    }

    #[test]
    fn resource_send_registers_leg_per_peer() {
        let mut core = core();
        connected(&mut core, "a");
        connected(&mut core, "b");
        let (t, actions) = core.prepare_resource("file:///tmp/a.png".into(), "a.png");
        assert_eq!(actions.len(), 2);
        assert_eq!(core.transfers().len(), 2);
        let r = t.resource().unwrap();
        assert_eq!(r.status, TransferStatus::InProgress);
        assert_eq!(r.progress, 0.0);
        assert_eq!(core.transcript(&t.id()).unwrap().id(), t.id());
    }

    #[test]
    fn two_peer_send_one_fails() {
        let mut core = core();
        connected(&mut core, "a");
        connected(&mut core, "b");
        let (t, actions) = core.prepare_resource("file:///tmp/a.png".into(), "a.png");
        let legs: Vec<(PeerId, TransferId)> = actions
            .iter()
            .map(|a| match a {
                OutboundAction::SendResource {
                    peer, transfer_id, ..
                } => (*peer, *transfer_id),
                other => panic!("unexpected {:?}", other),
            })
            .collect();

        let mut updates = Vec::new();
        updates.extend(core.on_resource_transfer_progress(legs[0].0, legs[0].1, 0.5));
        updates.extend(core.on_resource_transfer_finished(
            legs[0].0,
            legs[0].1,
            TransferOutcome::Completed { location: None },
        ));
        updates.extend(core.on_resource_transfer_finished(
            legs[1].0,
            legs[1].1,
            TransferOutcome::Failed {
                reason: "declined".into(),
            },
        ));

        assert!(updates
            .iter()
            .all(|n| matches!(n, Notification::Updated(u) if u.id() == t.id())));
        let failed: Vec<_> = updates
            .iter()
            .filter(|n| status(n) == TransferStatus::Failed)
            .collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(status(updates.last().unwrap()), TransferStatus::Failed);
        assert!(core.transfers().is_empty());
    }

    #[test]
    fn inbound_transfer_announced_once_then_updated() {
        let mut core = core();
        let peer = connected(&mut core, "alice");
        let tid = TransferId::generate();
        let first = core.on_resource_transfer_started(peer.clone(), "cat.jpg", tid);
        assert!(matches!(first.as_slice(), [Notification::Received(_)]));
        assert!(core
            .on_resource_transfer_started(peer.clone(), "cat.jpg", tid)
            .is_empty());
        let id = first[0].transcript().id();

        let upd = core.on_resource_transfer_progress(peer.id, tid, 0.4);
        assert!(matches!(upd.as_slice(), [Notification::Updated(t)] if t.id() == id));

        let done = core.on_resource_transfer_finished(
            peer.id,
            tid,
            TransferOutcome::Completed {
                location: Some("file:///inbox/cat.jpg".into()),
            },
        );
        assert_eq!(done.len(), 1);
        assert_eq!(status(&done[0]), TransferStatus::Completed);
        assert!(core
            .on_resource_transfer_progress(peer.id, tid, 0.9)
            .is_empty());
    }

    #[test]
    fn unknown_progress_is_noop() {
        let mut core = core();
        let peer = connected(&mut core, "alice");
        let tid = TransferId::generate();
        core.on_resource_transfer_started(peer.clone(), "cat.jpg", tid);
        assert!(core
            .on_resource_transfer_progress(peer.id, TransferId::generate(), 0.5)
            .is_empty());
        assert_eq!(core.transfers().len(), 1);
        let id = core
            .on_resource_transfer_progress(peer.id, tid, 0.1)
            .first()
            .map(|n| n.transcript().id())
            .unwrap();
        assert_eq!(
            core.transcript(&id).unwrap().resource().unwrap().progress,
            0.1
        );
    }

    #[test]
    fn disconnect_fails_in_flight_transfers() {
        let mut core = core();
        let a = connected(&mut core, "a");
        let b = connected(&mut core, "b");
        let (t, _) = core.prepare_resource("file:///tmp/a.png".into(), "a.png");
        let tid = TransferId::generate();
        core.on_resource_transfer_started(a.clone(), "in.png", tid);

        let notes = core.on_peer_state_changed(a.clone(), ConnectionState::NotConnected);
        // Inbound transfer from `a` fails outright; the outbound one only loses a leg.
        assert_eq!(notes.len(), 1);
        assert_eq!(status(&notes[0]), TransferStatus::Failed);
        assert!(core.transcript(&t.id()).is_some());

        let notes = core.on_peer_lost(b.id);
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].transcript().id(), t.id());
        assert_eq!(status(&notes[0]), TransferStatus::Failed);
        assert!(core.transfers().is_empty());
        assert!(core.registry().get(&b.id).is_none());
    }

    #[test]
    fn duplicate_connected_is_noop() {
        let mut core = core();
        let a = connected(&mut core, "a");
        assert!(core
            .on_peer_state_changed(a.clone(), ConnectionState::Connected)
            .is_empty());
        assert_eq!(core.registry().connected_peers().len(), 1);
    }

    #[test]
    fn tick_evicts_stalled_transfers() {
        let mut core = core();
        core.set_transfer_timeout(2);
        let peer = connected(&mut core, "alice");
        let tid = TransferId::generate();
        core.on_resource_transfer_started(peer.clone(), "big.bin", tid);
        assert!(core.tick().is_empty());
        assert!(core.tick().is_empty());
        let evicted = core.tick();
        assert_eq!(evicted.len(), 1);
        let r = evicted[0].transcript().resource().unwrap();
        assert_eq!(r.status, TransferStatus::Failed);
        assert_eq!(r.error.as_deref(), Some("timed out"));
        assert!(core.transfers().is_empty());
    }

    #[test]
    fn handle_event_dispatches() {
        let mut core = core();
        let peer = Peer::new(PeerId::generate(), "alice");
        core.handle_event(TransportEvent::PeerStateChanged {
            peer: peer.clone(),
            state: ConnectionState::Connected,
        });
        let notes = core.handle_event(TransportEvent::DataReceived {
            peer: peer.clone(),
            bytes: wire::encode("yo").unwrap(),
        });
        assert_eq!(notes[0].transcript().text(), Some("yo"));
        core.handle_event(TransportEvent::PeerLost { peer_id: peer.id });
        assert!(core.registry().is_empty());
    }

    /// Per-peer event script: connect, receive a resource with progress, chat, maybe disconnect.
    fn script(peer: &Peer, rng: &mut impl Rng) -> Vec<TransportEvent> {
        let tid = TransferId::generate();
        let mut events = vec![
            TransportEvent::PeerStateChanged {
                peer: peer.clone(),
                state: ConnectionState::Connecting,
            },
            TransportEvent::PeerStateChanged {
                peer: peer.clone(),
                state: ConnectionState::Connected,
            },
            TransportEvent::ResourceStarted {
                peer: peer.clone(),
                name: format!("{}.jpg", peer.display_name),
                transfer_id: tid,
            },
            TransportEvent::ResourceProgress {
                peer_id: peer.id,
                transfer_id: tid,
                fraction: 0.5,
            },
            TransportEvent::DataReceived {
                peer: peer.clone(),
                bytes: wire::encode(&peer.display_name).unwrap(),
            },
        ];
        if rng.gen_bool(0.5) {
            events.push(TransportEvent::ResourceFinished {
                peer_id: peer.id,
                transfer_id: tid,
                outcome: TransferOutcome::Completed { location: None },
            });
        }
        if rng.gen_bool(0.3) {
            events.push(TransportEvent::PeerStateChanged {
                peer: peer.clone(),
                state: ConnectionState::NotConnected,
            });
        }
        events
    }

    /// Shape of a notification stream for one peer, independent of random transcript IDs.
    fn shape(notes: &[Notification]) -> HashMap<PeerId, Vec<(bool, Option<TransferStatus>)>> {
        let mut out: HashMap<PeerId, Vec<_>> = HashMap::new();
        for n in notes {
            let t = n.transcript();
            let peer = t.peer().map(|p| p.id).unwrap();
            let entry = (
                matches!(n, Notification::Received(_)),
                match t.kind() {
                    TranscriptKind::Resource(r) => Some(r.status),
                    TranscriptKind::Message { .. } => None,
                },
            );
            out.entry(peer).or_default().push(entry);
        }
        out
    }

    #[test]
    fn interleaving_matches_sequential_application() {
        let mut rng = rand::thread_rng();
        for _ in 0..20 {
            let peers: Vec<Peer> = (0..6)
                .map(|i| Peer::new(PeerId::generate(), format!("peer{}", i)))
                .collect();
            let scripts: Vec<Vec<TransportEvent>> =
                peers.iter().map(|p| script(p, &mut rng)).collect();

            let mut sequential = core();
            let mut seq_notes = Vec::new();
            for events in &scripts {
                for e in events {
                    seq_notes.extend(sequential.handle_event(e.clone()));
                }
            }

            // Random merge that keeps each peer's own order.
            let mut queues: HashMap<PeerId, VecDeque<TransportEvent>> = HashMap::new();
            for e in scripts.iter().flatten() {
                queues.entry(e.peer_id()).or_default().push_back(e.clone());
            }
            assert_eq!(queues.len(), peers.len());
            let mut order: Vec<PeerId> = queues
                .iter()
                .flat_map(|(id, q)| std::iter::repeat(*id).take(q.len()))
                .collect();
            order.shuffle(&mut rng);
            let mut interleaved = core();
            let mut int_notes = Vec::new();
            for id in order {
                let e = queues.get_mut(&id).and_then(VecDeque::pop_front).unwrap();
                assert_eq!(e.peer_id(), id);
                int_notes.extend(interleaved.handle_event(e));
            }

            assert_eq!(
                sequential.registry().connected_ids(),
                interleaved.registry().connected_ids()
            );
            assert_eq!(sequential.transfers().len(), interleaved.transfers().len());
            for p in &peers {
                assert_eq!(
                    sequential.registry().state(&p.id),
                    interleaved.registry().state(&p.id)
                );
            }
            assert_eq!(shape(&seq_notes), shape(&int_notes));
        }
    }
}
