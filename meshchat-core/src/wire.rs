//! Payload codec. Framing: length-prefix (4 bytes LE) + bincode `Message`.
//! The transport delivers each payload as one datagram, so a frame must fill the buffer exactly.

use crate::protocol::{Message, PROTOCOL_VERSION};

const LEN_SIZE: usize = 4;
/// Largest encoded payload accepted in either direction.
pub const MAX_FRAME_LEN: u32 = 16 * 1024 * 1024; // 16 MiB

/// Encode a message into a single frame: 4 bytes LE length + bincode payload.
pub fn encode_frame(msg: &Message) -> Result<Vec<u8>, EncodeError> {
    let payload = bincode::serialize(msg).map_err(EncodeError::Encode)?;
    if payload.len() > MAX_FRAME_LEN as usize {
        return Err(EncodeError::TooLarge(payload.len()));
    }
    let len = payload.len() as u32;
    let mut out = Vec::with_capacity(LEN_SIZE + payload.len());
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(&payload);
    Ok(out)
}

/// Error encoding a message into a frame (bincode or size limit).
#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("encode error: {0}")]
    Encode(#[from] bincode::Error),
    #[error("payload of {0} bytes exceeds frame limit")]
    TooLarge(usize),
}

/// Decode one frame occupying all of `bytes`.
pub fn decode_frame(bytes: &[u8]) -> Result<Message, DecodeError> {
    if bytes.len() < LEN_SIZE {
        return Err(DecodeError::Truncated);
    }
    let len = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
    if len > MAX_FRAME_LEN as usize {
        return Err(DecodeError::TooLarge);
    }
    let end = LEN_SIZE + len;
    if bytes.len() < end {
        return Err(DecodeError::Truncated);
    }
    if bytes.len() > end {
        return Err(DecodeError::TrailingBytes(bytes.len() - end));
    }
    let msg: Message = bincode::deserialize(&bytes[LEN_SIZE..end])?;
    Ok(msg)
}

/// Error decoding an inbound payload. Malformed or foreign payloads land here.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("payload truncated")]
    Truncated,
    #[error("frame too large")]
    TooLarge,
    #[error("{0} trailing bytes after frame")]
    TrailingBytes(usize),
    #[error("decode error: {0}")]
    Malformed(#[from] bincode::Error),
    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u8),
}

/// Encode chat text into the transport-ready byte form.
pub fn encode(text: &str) -> Result<Vec<u8>, EncodeError> {
    encode_frame(&Message::text(text))
}

/// Decode transport bytes back into chat text.
pub fn decode(bytes: &[u8]) -> Result<String, DecodeError> {
    match decode_frame(bytes)? {
        Message::Text {
            protocol_version,
            text,
        } => {
            if protocol_version != PROTOCOL_VERSION {
                return Err(DecodeError::UnsupportedVersion(protocol_version));
            }
            Ok(text)
        }
    }
}
