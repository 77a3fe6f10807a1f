//! Peer-session manager for ad-hoc group chat over a local mesh.
//! The host supplies a transport and feeds its events in; observers receive transcripts out.

pub mod config;
pub mod core;
pub mod identity;
pub mod manager;
pub mod observer;
pub mod protocol;
pub mod registry;
pub mod transcript;
pub mod transfer;
pub mod transport;
pub mod wire;

pub use crate::config::{ConfigError, SessionConfig};
pub use crate::core::{Notification, OutboundAction, SessionCore};
pub use crate::identity::{Peer, PeerId};
pub use crate::manager::{SessionError, SessionManager};
pub use crate::observer::{SessionObserver, Subscription};
pub use crate::protocol::{Message, PROTOCOL_VERSION};
pub use crate::registry::ConnectionState;
pub use crate::transcript::{
    Direction, ResourceDescriptor, ResourceRef, Transcript, TranscriptId, TranscriptKind,
    TransferStatus,
};
pub use crate::transfer::{TransferId, TransferOutcome};
pub use crate::transport::{Transport, TransportError, TransportEvent};
pub use crate::wire::{decode_frame, encode_frame, DecodeError, EncodeError};
