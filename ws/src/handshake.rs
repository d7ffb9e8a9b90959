use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use fv_buffer::{ErrorType, NetworkError, NetworkResult};
use sha1::{Digest, Sha1};

const GUID: &[u8] = b"258EAFA5-E914-47DA-95CA-C5AB0DC85B11";
const MAX_HEADER_BYTES: usize = 8192;
const MAX_LINE_BYTES: usize = 512;

/// Computes `Sec-WebSocket-Accept` for a given `Sec-WebSocket-Key`.
pub fn accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.as_bytes());
    hasher.update(GUID);
    STANDARD.encode(hasher.finalize())
}

pub struct HandshakeRequest {
    pub accept: String,
}

/// Scans `bytes` for a complete HTTP/1.x upgrade request terminated by an
/// empty line. Returns `Ok(None)` while more bytes are needed, the parsed
/// request and bytes consumed on success, or a protocol error if the
/// `Sec-WebSocket-Key` header is missing, duplicated, or a header line
/// exceeds the length this parser accepts.
pub fn try_parse_handshake(bytes: &[u8]) -> NetworkResult<Option<(HandshakeRequest, usize)>> {
    let terminator = find_subslice(bytes, b"\r\n\r\n");

    let end = match terminator {
        Some(end) => end,
        None => {
            if bytes.len() > MAX_HEADER_BYTES {
                return Err(NetworkError::Fatal(ErrorType::WebSocketViolation));
            }
            return Ok(None);
        }
    };

    let head = &bytes[..end];
    let mut key: Option<String> = None;

    for raw_line in head.split(|&b| b == b'\n') {
        let line = strip_trailing_cr(raw_line);
        if line.len() > MAX_LINE_BYTES {
            return Err(NetworkError::Fatal(ErrorType::WebSocketViolation));
        }
        if let Some(value) = header_value(line, b"sec-websocket-key") {
            if key.is_some() {
                return Err(NetworkError::Fatal(ErrorType::Protocol));
            }
            key = Some(value.trim().to_string());
        }
    }

    let key = key.ok_or(NetworkError::Fatal(ErrorType::Protocol))?;

    Ok(Some((
        HandshakeRequest {
            accept: accept_key(&key),
        },
        end + 4,
    )))
}

/// Whether `bytes` begins with the literal `GET` a server upgrade check probes for.
pub fn looks_like_http_get(bytes: &[u8]) -> bool {
    bytes.starts_with(b"GET")
}

pub fn build_response(accept: &str) -> Vec<u8> {
    format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {}\r\n\
         \r\n",
        accept
    )
    .into_bytes()
}

fn strip_trailing_cr(line: &[u8]) -> &[u8] {
    match line.split_last() {
        Some((&b'\r', rest)) => rest,
        _ => line,
    }
}

fn header_value<'a>(line: &'a [u8], name: &[u8]) -> Option<&'a str> {
    let colon = line.iter().position(|&b| b == b':')?;
    let (candidate, value) = line.split_at(colon);
    if candidate.len() != name.len() || !candidate.iter().zip(name).all(|(a, b)| a.eq_ignore_ascii_case(b)) {
        return None;
    }
    std::str::from_utf8(&value[1..]).ok()
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_accept_key() {
        // Scenario 5 of the testable properties: a fixed RFC 6455 sample key.
        assert_eq!(
            accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }

    #[test]
    fn test_parse_handshake_roundtrip() {
        let request = b"GET /ws HTTP/1.1\r\nHost: example.com\r\nSec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\r\n";
        let (parsed, consumed) = try_parse_handshake(request).unwrap().unwrap();
        assert_eq!(consumed, request.len());
        assert_eq!(parsed.accept, "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
    }

    #[test]
    fn test_parse_handshake_waits_for_terminator() {
        let request = b"GET /ws HTTP/1.1\r\nSec-WebSocket-Key: abc\r\n";
        assert_eq!(try_parse_handshake(request).unwrap(), None);
    }

    #[test]
    fn test_parse_handshake_missing_key_fails() {
        let request = b"GET /ws HTTP/1.1\r\nHost: example.com\r\n\r\n";
        assert!(try_parse_handshake(request).is_err());
    }

    #[test]
    fn test_parse_handshake_duplicate_key_fails() {
        let request = b"GET /ws HTTP/1.1\r\nSec-WebSocket-Key: a\r\nSec-WebSocket-Key: b\r\n\r\n";
        assert!(try_parse_handshake(request).is_err());
    }

    #[test]
    fn test_looks_like_http_get() {
        assert!(looks_like_http_get(b"GET / HTTP/1.1\r\n"));
        assert!(!looks_like_http_get(&[0x82, 0x00]));
    }
}
