//! Echo message model
//!
//! The message is built once at startup. Besides the logical fields it keeps a
//! pre-encoded wire image (`header + body`) so that copy-once and zero-copy
//! strategies have something to copy from or borrow.

use serde::{Deserialize, Serialize};

/// Byte used to fill generated payloads
pub const FILL_CHAR: u8 = b'a';

/// Size of the binary header: message type (u32 BE) + body length (u32 BE)
pub const HEADER_LEN: usize = 8;

/// Message type tag written into the binary header
pub const ECHO_MESSAGE_TYPE: u32 = 0x4543_484F; // "ECHO"

/// Echo request payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EchoMessage {
    pub message_type: u32,
    pub payload: String,
    #[serde(skip)]
    image: Vec<u8>,
}

impl EchoMessage {
    /// Build a message whose payload is `size` fill characters
    pub fn filled(size: usize) -> Self {
        let payload = String::from_utf8(vec![FILL_CHAR; size]).unwrap_or_default();
        Self::with_payload(payload)
    }

    pub fn with_payload(payload: String) -> Self {
        let mut image = Vec::with_capacity(HEADER_LEN + payload.len());
        write_header(&mut image, ECHO_MESSAGE_TYPE, payload.len());
        image.extend_from_slice(payload.as_bytes());
        Self {
            message_type: ECHO_MESSAGE_TYPE,
            payload,
            image,
        }
    }

    /// Pre-encoded `header + body`
    pub fn image(&self) -> &[u8] {
        &self.image
    }

    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }
}

/// Append the binary header to `buf`
pub fn write_header(buf: &mut Vec<u8>, message_type: u32, body_len: usize) {
    buf.extend_from_slice(&message_type.to_be_bytes());
    buf.extend_from_slice(&(body_len as u32).to_be_bytes());
}
