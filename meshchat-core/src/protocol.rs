//! Application payload carried over the transport's data channel.

use serde::{Deserialize, Serialize};

/// Current payload version. Peers drop payloads carrying any other version.
pub const PROTOCOL_VERSION: u8 = 1;

/// All application payload types. Encoding is bincode; framing is length-prefix (see wire module).
/// Resources travel over the transport's own named-transfer primitive, so text is the only variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    /// Chat text broadcast to every connected peer.
    Text { protocol_version: u8, text: String },
}

impl Message {
    /// Text message at the current protocol version.
    pub fn text(text: impl Into<String>) -> Self {
        Message::Text {
            protocol_version: PROTOCOL_VERSION,
            text: text.into(),
        }
    }
}
