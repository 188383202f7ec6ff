//! Serialization strategies
//!
//! Each strategy turns an [`EchoMessage`] into the wire buffer that every
//! virtual client pushes. The strategy is picked once by name at startup and
//! the buffer is built exactly once, so nothing here sits on the request path.

use std::borrow::Cow;
use std::str::FromStr;

use super::message::{write_header, EchoMessage, HEADER_LEN};
use crate::utils::{BenchmarkError, RespEncoder, Result};

/// Supported serialization strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SerializationStrategy {
    /// Raw payload bytes, no header
    #[default]
    Fill,
    /// Header + body, body staged through an owned `String`
    MallocBaseline,
    /// Header + body, body appended straight from the message bytes
    MallocNoStr,
    /// Header + body written into an exactly pre-sized buffer
    Memcpy,
    /// One copy of the pre-built message image
    SingleMemcpy,
    /// JSON document
    Json,
    /// RESP `ECHO <payload>` command
    Resp,
    /// Borrowed view of the pre-built message image
    ZeroCopy,
}

impl SerializationStrategy {
    /// Parse strategy from its configuration key (case-insensitive)
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "fill" | "none" => Some(Self::Fill),
            "malloc_baseline" => Some(Self::MallocBaseline),
            "malloc_no_str" => Some(Self::MallocNoStr),
            "memcpy" => Some(Self::Memcpy),
            "single_memcpy" => Some(Self::SingleMemcpy),
            "json" => Some(Self::Json),
            "resp" => Some(Self::Resp),
            "zero_copy" | "zerocopy" => Some(Self::ZeroCopy),
            _ => None,
        }
    }

    /// Configuration key
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fill => "fill",
            Self::MallocBaseline => "malloc_baseline",
            Self::MallocNoStr => "malloc_no_str",
            Self::Memcpy => "memcpy",
            Self::SingleMemcpy => "single_memcpy",
            Self::Json => "json",
            Self::Resp => "resp",
            Self::ZeroCopy => "zero_copy",
        }
    }

    /// Whether the produced buffer is allocated by this process
    pub fn allocates(&self) -> bool {
        !matches!(self, Self::ZeroCopy)
    }

    /// Build the outgoing buffer for `msg`
    pub fn serialize<'a>(&self, msg: &'a EchoMessage) -> Result<OutgoingPayload<'a>> {
        let body = msg.payload.as_bytes();
        let bytes: Cow<'a, [u8]> = match self {
            Self::Fill => Cow::Owned(body.to_vec()),
            Self::MallocBaseline => {
                let staged: String = msg.payload.clone();
                let mut buf = Vec::new();
                write_header(&mut buf, msg.message_type, staged.len());
                buf.extend_from_slice(staged.as_bytes());
                Cow::Owned(buf)
            }
            Self::MallocNoStr => {
                let mut buf = Vec::new();
                write_header(&mut buf, msg.message_type, body.len());
                buf.extend_from_slice(body);
                Cow::Owned(buf)
            }
            Self::Memcpy => {
                let mut buf = vec![0u8; HEADER_LEN + body.len()];
                buf[..4].copy_from_slice(&msg.message_type.to_be_bytes());
                buf[4..HEADER_LEN].copy_from_slice(&(body.len() as u32).to_be_bytes());
                buf[HEADER_LEN..].copy_from_slice(body);
                Cow::Owned(buf)
            }
            Self::SingleMemcpy => Cow::Owned(msg.image().to_vec()),
            Self::Json => Cow::Owned(serde_json::to_vec(msg).map_err(|e| {
                BenchmarkError::Config(format!("Failed to encode message as JSON: {}", e))
            })?),
            Self::Resp => {
                let mut encoder =
                    RespEncoder::with_capacity(RespEncoder::command_len(&[4, body.len()]));
                encoder.encode_command(&[b"ECHO", body]);
                Cow::Owned(encoder.into_bytes())
            }
            Self::ZeroCopy => Cow::Borrowed(msg.image()),
        };
        Ok(OutgoingPayload { bytes })
    }
}

impl FromStr for SerializationStrategy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| format!("Serialization strategy {} unknown.", s))
    }
}

impl std::fmt::Display for SerializationStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The pre-serialized buffer shared by every push
#[derive(Debug)]
pub struct OutgoingPayload<'a> {
    bytes: Cow<'a, [u8]>,
}

impl<'a> OutgoingPayload<'a> {
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// True when this process allocated the buffer (and must free it)
    pub fn is_owned(&self) -> bool {
        matches!(self.bytes, Cow::Owned(_))
    }

    /// Free the buffer if it is ours; returns the number of bytes freed
    pub fn release(self) -> usize {
        match self.bytes {
            Cow::Owned(buf) => buf.len(),
            Cow::Borrowed(_) => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workload::message::FILL_CHAR;

    const ALL: [SerializationStrategy; 8] = [
        SerializationStrategy::Fill,
        SerializationStrategy::MallocBaseline,
        SerializationStrategy::MallocNoStr,
        SerializationStrategy::Memcpy,
        SerializationStrategy::SingleMemcpy,
        SerializationStrategy::Json,
        SerializationStrategy::Resp,
        SerializationStrategy::ZeroCopy,
    ];

    #[test]
    fn test_parse_strategies() {
        assert_eq!(SerializationStrategy::parse("memcpy"), Some(SerializationStrategy::Memcpy));
        assert_eq!(
            SerializationStrategy::parse("MALLOC_BASELINE"),
            Some(SerializationStrategy::MallocBaseline)
        );
        assert_eq!(SerializationStrategy::parse("none"), Some(SerializationStrategy::Fill));
        for strategy in ALL {
            assert_eq!(SerializationStrategy::parse(strategy.as_str()), Some(strategy));
        }
    }

    #[test]
    fn test_unknown_strategy_message() {
        let err = "protobuf".parse::<SerializationStrategy>().unwrap_err();
        assert_eq!(err, "Serialization strategy protobuf unknown.");
    }

    #[test]
    fn test_codegen_strategies_unknown() {
        for name in ["protobuf", "protobytes", "capnproto", "flatbuffers"] {
            assert_eq!(SerializationStrategy::parse(name), None, "{}", name);
        }
    }

    #[test]
    fn test_fill_is_raw_payload() {
        let msg = EchoMessage::filled(32);
        let out = SerializationStrategy::Fill.serialize(&msg).unwrap();
        assert_eq!(out.len(), 32);
        assert!(out.as_bytes().iter().all(|&b| b == FILL_CHAR));
    }

    #[test]
    fn test_binary_baselines_agree() {
        let msg = EchoMessage::filled(100);
        let expected = msg.image().to_vec();
        for strategy in [
            SerializationStrategy::MallocBaseline,
            SerializationStrategy::MallocNoStr,
            SerializationStrategy::Memcpy,
            SerializationStrategy::SingleMemcpy,
            SerializationStrategy::ZeroCopy,
        ] {
            let out = strategy.serialize(&msg).unwrap();
            assert_eq!(out.as_bytes(), &expected[..], "{}", strategy);
        }
    }

    #[test]
    fn test_json_round_trip() {
        let msg = EchoMessage::filled(8);
        let out = SerializationStrategy::Json.serialize(&msg).unwrap();
        let decoded: EchoMessage = serde_json::from_slice(out.as_bytes()).unwrap();
        assert_eq!(decoded.payload, msg.payload);
        assert_eq!(decoded.message_type, msg.message_type);
    }

    #[test]
    fn test_resp_is_echo_command() {
        let msg = EchoMessage::filled(3);
        let out = SerializationStrategy::Resp.serialize(&msg).unwrap();
        assert_eq!(out.as_bytes(), b"*2\r\n$4\r\nECHO\r\n$3\r\naaa\r\n");
    }

    #[test]
    fn test_ownership_follows_strategy() {
        let msg = EchoMessage::filled(10);
        for strategy in ALL {
            let out = strategy.serialize(&msg).unwrap();
            assert_eq!(out.is_owned(), strategy.allocates(), "{}", strategy);
        }
        let borrowed = SerializationStrategy::ZeroCopy.serialize(&msg).unwrap();
        assert_eq!(borrowed.release(), 0);
        let owned = SerializationStrategy::Memcpy.serialize(&msg).unwrap();
        assert_eq!(owned.release(), 18);
    }
}
