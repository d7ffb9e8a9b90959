use byteorder::{BigEndian, ByteOrder};
use fv_buffer::{ErrorType, NetworkError, NetworkResult};

/// Largest header a binary frame with a 64-bit extended length and a mask key
/// can carry: 2 base bytes + 8 extended length bytes + 4 mask bytes.
pub const MAX_FRAME_HEADER: usize = 14;

const FIN_BINARY: u8 = 0x82;
const MASK_BIT: u8 = 0x80;
const LEN_16_MARKER: u8 = 126;
const LEN_64_MARKER: u8 = 127;

pub struct ParsedFrame {
    pub payload_start: usize,
    pub payload_len: usize,
    pub mask: Option<[u8; 4]>,
    /// Total bytes consumed from the input, header plus payload.
    pub consumed: usize,
}

/// Parses a single unfragmented binary frame (`0x82`) from the front of
/// `bytes`. `max_payload` is normally the read buffer's capacity minus
/// [`MAX_FRAME_HEADER`], so an oversized declared length fails fast instead
/// of waiting for bytes that will never fit.
pub fn parse_frame(bytes: &[u8], max_payload: usize) -> NetworkResult<Option<ParsedFrame>> {
    if bytes.len() < 2 {
        return Ok(None);
    }
    if bytes[0] != FIN_BINARY {
        return Err(NetworkError::Fatal(ErrorType::WebSocketViolation));
    }

    let second = bytes[1];
    let masked = second & MASK_BIT != 0;
    let len_field = second & !MASK_BIT;

    let mut offset = 2usize;
    let payload_len: usize;

    if len_field < LEN_16_MARKER {
        payload_len = len_field as usize;
    } else if len_field == LEN_16_MARKER {
        if bytes.len() < offset + 2 {
            return Ok(None);
        }
        payload_len = BigEndian::read_u16(&bytes[offset..offset + 2]) as usize;
        offset += 2;
    } else {
        debug_assert_eq!(len_field, LEN_64_MARKER);
        if bytes.len() < offset + 8 {
            return Ok(None);
        }
        payload_len = BigEndian::read_u64(&bytes[offset..offset + 8]) as usize;
        offset += 8;
    }

    let mask = if masked {
        if bytes.len() < offset + 4 {
            return Ok(None);
        }
        let mut key = [0u8; 4];
        key.copy_from_slice(&bytes[offset..offset + 4]);
        offset += 4;
        Some(key)
    } else {
        None
    };

    if payload_len > max_payload {
        return Err(NetworkError::Fatal(ErrorType::OversizedFrame));
    }

    let total = offset + payload_len;
    if bytes.len() < total {
        return Ok(None);
    }

    Ok(Some(ParsedFrame {
        payload_start: offset,
        payload_len,
        mask,
        consumed: total,
    }))
}

/// XORs `payload` with `mask`, repeating the 4-byte key; correct regardless
/// of host endianness since the key is applied byte-for-byte.
pub fn unmask(payload: &mut [u8], mask: [u8; 4]) {
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= mask[i % 4];
    }
}

/// Emits `payload` as a single unmasked binary frame. Most presence commands
/// are short enough for the one-byte length form; a `SPEECH`/`SPEECH_RLY`
/// command carrying a near-`MAX_SPEECH_SIZE` Opus packet plus its 20-byte
/// wire header can exceed 125 bytes, so the 16-bit extended form is used
/// above that threshold (payloads this crate emits never reach the 64-bit form).
pub fn write_frame(out: &mut Vec<u8>, payload: &[u8]) {
    out.push(FIN_BINARY);
    if payload.len() < LEN_16_MARKER as usize {
        out.push(payload.len() as u8);
    } else {
        assert!(payload.len() <= u16::MAX as usize, "frame payload too large for the 16-bit extended form");
        out.push(LEN_16_MARKER);
        let mut len_bytes = [0u8; 2];
        BigEndian::write_u16(&mut len_bytes, payload.len() as u16);
        out.extend_from_slice(&len_bytes);
    }
    out.extend_from_slice(payload);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_short_unmasked_frame() {
        let mut buf = Vec::new();
        write_frame(&mut buf, b"hello");
        let parsed = parse_frame(&buf, 1024).unwrap().unwrap();
        assert_eq!(parsed.consumed, buf.len());
        assert_eq!(parsed.mask, None);
        assert_eq!(&buf[parsed.payload_start..parsed.payload_start + parsed.payload_len], b"hello");
    }

    #[test]
    fn test_parse_masked_frame_and_unmask() {
        let payload = b"presence".to_vec();
        let mask = [0x11, 0x22, 0x33, 0x44];

        let mut buf = vec![FIN_BINARY, MASK_BIT | payload.len() as u8];
        buf.extend_from_slice(&mask);
        let mut masked_payload = payload.clone();
        unmask(&mut masked_payload, mask);
        buf.extend_from_slice(&masked_payload);

        let parsed = parse_frame(&buf, 1024).unwrap().unwrap();
        assert_eq!(parsed.mask, Some(mask));

        let mut recovered = buf[parsed.payload_start..parsed.payload_start + parsed.payload_len].to_vec();
        unmask(&mut recovered, parsed.mask.unwrap());
        assert_eq!(recovered, payload);
    }

    #[test]
    fn test_write_frame_uses_extended_length_above_short_form() {
        let payload = vec![5u8; 200];
        let mut buf = Vec::new();
        write_frame(&mut buf, &payload);

        assert_eq!(buf[1], LEN_16_MARKER);
        let parsed = parse_frame(&buf, 1024).unwrap().unwrap();
        assert_eq!(parsed.payload_len, 200);
        assert_eq!(parsed.consumed, buf.len());
    }

    #[test]
    fn test_parse_waits_for_more_bytes() {
        let buf = [FIN_BINARY];
        assert_eq!(parse_frame(&buf, 1024).unwrap().is_none(), true);
    }

    #[test]
    fn test_rejects_fragmented_or_non_binary_frames() {
        let buf = [0x81, 0x00]; // text frame, FIN set
        assert!(parse_frame(&buf, 1024).is_err());
    }

    #[test]
    fn test_rejects_oversized_declared_length() {
        let buf = [FIN_BINARY, LEN_16_MARKER, 0xff, 0xff];
        assert!(parse_frame(&buf, 10).is_err());
    }

    #[test]
    fn test_extended_16_bit_length() {
        let payload = vec![7u8; 300];
        let mut buf = vec![FIN_BINARY, LEN_16_MARKER];
        let mut len_bytes = [0u8; 2];
        BigEndian::write_u16(&mut len_bytes, payload.len() as u16);
        buf.extend_from_slice(&len_bytes);
        buf.extend_from_slice(&payload);

        let parsed = parse_frame(&buf, 1024).unwrap().unwrap();
        assert_eq!(parsed.payload_len, 300);
        assert_eq!(parsed.consumed, buf.len());
    }
}
