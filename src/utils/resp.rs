//! Minimal RESP (Redis Serialization Protocol) encoder
//!
//! Used by the `resp` serialization strategy to frame the echo payload as an
//! `ECHO <payload>` command, the way a Valkey/Redis server would expect it.

/// RESP encoder with pre-allocated buffer
pub struct RespEncoder {
    buf: Vec<u8>,
}

impl RespEncoder {
    /// Create new encoder with specified capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    /// Exact encoded size of a command with the given argument lengths
    pub fn command_len(arg_lens: &[usize]) -> usize {
        let mut len = 1 + digits(arg_lens.len()) + 2;
        for &arg in arg_lens {
            len += 1 + digits(arg) + 2 + arg + 2;
        }
        len
    }

    /// Get encoded bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Take ownership of buffer
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    /// Encode a command as RESP array of bulk strings
    pub fn encode_command(&mut self, args: &[&[u8]]) {
        // *<count>\r\n
        self.buf.push(b'*');
        self.write_int(args.len() as i64);
        self.buf.extend_from_slice(b"\r\n");

        for arg in args {
            self.encode_bulk(arg);
        }
    }

    /// Encode a single bulk string: $<len>\r\n<data>\r\n
    pub fn encode_bulk(&mut self, data: &[u8]) {
        self.buf.push(b'$');
        self.write_int(data.len() as i64);
        self.buf.extend_from_slice(b"\r\n");
        self.buf.extend_from_slice(data);
        self.buf.extend_from_slice(b"\r\n");
    }

    #[inline]
    fn write_int(&mut self, value: i64) {
        let mut buffer = itoa::Buffer::new();
        let s = buffer.format(value);
        self.buf.extend_from_slice(s.as_bytes());
    }
}

fn digits(mut n: usize) -> usize {
    let mut d = 1;
    while n >= 10 {
        n /= 10;
        d += 1;
    }
    d
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_echo_command() {
        let mut encoder = RespEncoder::with_capacity(64);
        encoder.encode_command(&[b"ECHO", b"aaaa"]);
        assert_eq!(encoder.as_bytes(), b"*2\r\n$4\r\nECHO\r\n$4\r\naaaa\r\n");
    }

    #[test]
    fn test_encode_empty_bulk() {
        let mut encoder = RespEncoder::with_capacity(8);
        encoder.encode_bulk(b"");
        assert_eq!(encoder.as_bytes(), b"$0\r\n\r\n");
    }

    #[test]
    fn test_command_len_matches_encoding() {
        let payload = vec![b'a'; 1234];
        let mut encoder = RespEncoder::with_capacity(0);
        encoder.encode_command(&[b"ECHO", &payload]);
        assert_eq!(
            RespEncoder::command_len(&[4, payload.len()]),
            encoder.as_bytes().len()
        );
    }
}
