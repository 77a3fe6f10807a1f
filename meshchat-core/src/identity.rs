//! Peer identity: opaque peer IDs supplied by the transport, plus display names.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum display name length in bytes (UTF-8). Longer names are rejected by the mesh layer.
pub const MAX_DISPLAY_NAME_LEN: usize = 63;

/// Peer ID: 16 opaque bytes assigned by the transport. Unique per participant for a session.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct PeerId([u8; 16]);

impl PeerId {
    /// Fresh random ID. Used for the local participant; remote IDs come from the transport.
    pub fn generate() -> Self {
        PeerId(Uuid::new_v4().into_bytes())
    }

    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        PeerId(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Uuid::from_bytes(self.0).hyphenated().fmt(f)
    }
}

/// A participant: ID plus the human-readable name it advertises.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct Peer {
    pub id: PeerId,
    pub display_name: String,
}

impl Peer {
    pub fn new(id: PeerId, display_name: impl Into<String>) -> Self {
        Self {
            id,
            display_name: display_name.into(),
        }
    }
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.display_name, self.id)
    }
}
