//! The native client's own WebSocket handling, separate from the server-side
//! parser in [`crate::framing`] and [`crate::handshake`]. The client never
//! receives masked frames from this server and trusts it completely, so its
//! downlink parser is deliberately minimal: it does not validate the FIN/
//! opcode byte or mask bit, and only the 16-bit extended length form is
//! understood (the 64-bit form never appears on this wire — the largest
//! frame this server ever emits is a `SPEECH_RLY` well under 64KiB). This
//! mirrors an explicit simplification upstream — safe only against a
//! matching server, not a standards-conforming one.

/// A fixed `Sec-WebSocket-Key`; the client never validates the server's
/// `Sec-WebSocket-Accept` in return, so any syntactically valid key will do.
pub const FIXED_CLIENT_KEY: &str = "dGhlIHNhbXBsZSBub25jZQ==";

pub fn build_request(host: &str) -> Vec<u8> {
    format!(
        "GET / HTTP/1.1\r\n\
         Host: {}\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Key: {}\r\n\
         Sec-WebSocket-Version: 13\r\n\
         \r\n",
        host, FIXED_CLIENT_KEY
    )
    .into_bytes()
}

/// Returns the offset just past the first `\r\n\r\n` in `bytes`, if present.
pub fn find_handshake_terminator(bytes: &[u8]) -> Option<usize> {
    bytes
        .windows(4)
        .position(|window| window == b"\r\n\r\n")
        .map(|pos| pos + 4)
}

const LEN_16_MARKER: u8 = 126;

/// A downlink frame as seen by the minimal client parser: byte 0 is ignored
/// and there is no mask handling, but the 16-bit extended length marker is
/// recognised so a large `SPEECH_RLY` relay doesn't get misread as a
/// 126-byte short-form frame.
pub struct ClientFrame {
    pub payload_start: usize,
    pub payload_len: usize,
    pub consumed: usize,
}

pub fn parse_client_frame(bytes: &[u8]) -> Option<ClientFrame> {
    if bytes.len() < 2 {
        return None;
    }

    let (payload_start, payload_len) = if bytes[1] == LEN_16_MARKER {
        if bytes.len() < 4 {
            return None;
        }
        let len = u16::from_be_bytes([bytes[2], bytes[3]]) as usize;
        (4, len)
    } else {
        (2, bytes[1] as usize)
    };

    let total = payload_start + payload_len;
    if bytes.len() < total {
        return None;
    }
    Some(ClientFrame {
        payload_start,
        payload_len,
        consumed: total,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framing;

    #[test]
    fn test_find_terminator() {
        let bytes = b"HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\n\r\nrest";
        let pos = find_handshake_terminator(bytes).unwrap();
        assert_eq!(&bytes[pos..], b"rest");
    }

    #[test]
    fn test_parse_client_frame_matches_server_emission() {
        let mut buf = Vec::new();
        framing::write_frame(&mut buf, b"ABC");
        let parsed = parse_client_frame(&buf).unwrap();
        assert_eq!(parsed.consumed, buf.len());
        assert_eq!(&buf[parsed.payload_start..parsed.payload_start + parsed.payload_len], b"ABC");
    }

    #[test]
    fn test_parse_client_frame_waits_for_full_payload() {
        let buf = [0x82, 5, 1, 2];
        assert!(parse_client_frame(&buf).is_none());
    }

    #[test]
    fn test_parse_client_frame_understands_extended_length() {
        let payload = vec![9u8; 200];
        let mut buf = Vec::new();
        framing::write_frame(&mut buf, &payload);

        let parsed = parse_client_frame(&buf).unwrap();
        assert_eq!(parsed.consumed, buf.len());
        assert_eq!(parsed.payload_len, 200);
        assert_eq!(&buf[parsed.payload_start..parsed.payload_start + parsed.payload_len], &payload[..]);
    }
}
