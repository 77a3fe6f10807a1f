//! Transcripts: the units of conversation shown to the user.
//!
//! A message transcript never changes after creation. A resource transcript is owned by the
//! transfer tracker while its transfer is in flight; observers receive snapshots of it by value
//! and correlate them through [`TranscriptId`].

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::identity::Peer;

/// Stable identity of a transcript across all of its snapshots.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct TranscriptId(Uuid);

impl TranscriptId {
    pub fn generate() -> Self {
        TranscriptId(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for TranscriptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Sent,
    Received,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum TransferStatus {
    InProgress,
    Completed,
    Failed,
}

impl TransferStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, TransferStatus::InProgress)
    }
}

/// Reference to a resource, as a URI string (`file:///…` for local files).
/// The session core never dereferences it; only the transport and the UI do.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct ResourceRef(String);

impl ResourceRef {
    pub fn new(uri: impl Into<String>) -> Self {
        ResourceRef(uri.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ResourceRef {
    fn from(uri: &str) -> Self {
        ResourceRef::new(uri)
    }
}

impl From<String> for ResourceRef {
    fn from(uri: String) -> Self {
        ResourceRef(uri)
    }
}

/// Progress and outcome of a named resource transfer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    pub name: String,
    /// Fraction complete in [0, 1].
    pub progress: f64,
    pub status: TransferStatus,
    /// Source for sent resources; resolved local copy once a received resource completes.
    pub location: Option<ResourceRef>,
    /// Failure detail when `status` is `Failed`.
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TranscriptKind {
    Message { text: String },
    Resource(ResourceDescriptor),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    id: TranscriptId,
    direction: Direction,
    /// Sender for received transcripts; `None` for ones sent to all peers.
    peer: Option<Peer>,
    kind: TranscriptKind,
}

impl Transcript {
    /// Local echo of a message broadcast to every connected peer.
    pub fn sent_message(text: impl Into<String>) -> Self {
        Self {
            id: TranscriptId::generate(),
            direction: Direction::Sent,
            peer: None,
            kind: TranscriptKind::Message { text: text.into() },
        }
    }

    pub fn received_message(from: Peer, text: impl Into<String>) -> Self {
        Self {
            id: TranscriptId::generate(),
            direction: Direction::Received,
            peer: Some(from),
            kind: TranscriptKind::Message { text: text.into() },
        }
    }

    pub fn sent_resource(name: impl Into<String>, source: ResourceRef) -> Self {
        Self {
            id: TranscriptId::generate(),
            direction: Direction::Sent,
            peer: None,
            kind: TranscriptKind::Resource(ResourceDescriptor {
                name: name.into(),
                progress: 0.0,
                status: TransferStatus::InProgress,
                location: Some(source),
                error: None,
            }),
        }
    }

    pub fn received_resource(from: Peer, name: impl Into<String>) -> Self {
        Self {
            id: TranscriptId::generate(),
            direction: Direction::Received,
            peer: Some(from),
            kind: TranscriptKind::Resource(ResourceDescriptor {
                name: name.into(),
                progress: 0.0,
                status: TransferStatus::InProgress,
                location: None,
                error: None,
            }),
        }
    }

    pub fn id(&self) -> TranscriptId {
        self.id
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn peer(&self) -> Option<&Peer> {
        self.peer.as_ref()
    }

    pub fn kind(&self) -> &TranscriptKind {
        &self.kind
    }

    /// Message text, if this is a message transcript.
    pub fn text(&self) -> Option<&str> {
        match &self.kind {
            TranscriptKind::Message { text } => Some(text),
            TranscriptKind::Resource(_) => None,
        }
    }

    /// Resource descriptor, if this is a resource transcript.
    pub fn resource(&self) -> Option<&ResourceDescriptor> {
        match &self.kind {
            TranscriptKind::Resource(r) => Some(r),
            TranscriptKind::Message { .. } => None,
        }
    }

    pub(crate) fn resource_mut(&mut self) -> Option<&mut ResourceDescriptor> {
        match &mut self.kind {
            TranscriptKind::Resource(r) => Some(r),
            TranscriptKind::Message { .. } => None,
        }
    }

    /// True for resource transcripts that reached Completed or Failed.
    pub fn is_terminal(&self) -> bool {
        self.resource().is_some_and(|r| r.status.is_terminal())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::PeerId;

    #[test]
    fn sent_message_has_no_peer() {
        let t = Transcript::sent_message("hi");
        assert_eq!(t.direction(), Direction::Sent);
        assert_eq!(t.text(), Some("hi"));
        assert!(t.peer().is_none());
        assert!(t.resource().is_none());
        assert!(!t.is_terminal());
    }

    #[test]
    fn received_resource_starts_in_progress() {
        let peer = Peer::new(PeerId::generate(), "bob");
        let t = Transcript::received_resource(peer.clone(), "photo.jpg");
        assert_eq!(t.peer(), Some(&peer));
        let r = t.resource().unwrap();
        assert_eq!(r.name, "photo.jpg");
        assert_eq!(r.progress, 0.0);
        assert_eq!(r.status, TransferStatus::InProgress);
        assert!(r.location.is_none());
    }

    #[test]
    fn sent_resource_keeps_source() {
        let t = Transcript::sent_resource("photo.jpg", "file:///tmp/photo.jpg".into());
        let r = t.resource().unwrap();
        assert_eq!(
            r.location.as_ref().map(ResourceRef::as_str),
            Some("file:///tmp/photo.jpg")
        );
    }

    #[test]
    fn snapshots_share_id() {
        let mut t = Transcript::received_resource(Peer::new(PeerId::generate(), "bob"), "a");
        let before = t.clone();
        t.resource_mut().unwrap().progress = 0.5;
        assert_eq!(before.id(), t.id());
        assert_ne!(before, t);
    }

    #[test]
    fn terminal_status() {
        assert!(!TransferStatus::InProgress.is_terminal());
        assert!(TransferStatus::Completed.is_terminal());
        assert!(TransferStatus::Failed.is_terminal());
    }
}
