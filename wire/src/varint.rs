use byteorder::{BigEndian, ByteOrder};
use fv_buffer::{ErrorType, NetworkError, NetworkResult};

const U16_PREFIX: u8 = 0xfd;
const U32_PREFIX: u8 = 0xfe;
const U64_PREFIX: u8 = 0xff;

/// Appends the compact `var_int` encoding of `value` to `out`. Values below
/// `0xfd` are a single byte; larger values are prefixed by `0xfd`/`0xfe`/`0xff`
/// followed by the narrowest fixed-width big-endian encoding that holds them.
pub fn write_var_int(out: &mut Vec<u8>, value: u64) {
    if value < U16_PREFIX as u64 {
        out.push(value as u8);
    } else if value <= u16::MAX as u64 {
        out.push(U16_PREFIX);
        let mut buf = [0u8; 2];
        BigEndian::write_u16(&mut buf, value as u16);
        out.extend_from_slice(&buf);
    } else if value <= u32::MAX as u64 {
        out.push(U32_PREFIX);
        let mut buf = [0u8; 4];
        BigEndian::write_u32(&mut buf, value as u32);
        out.extend_from_slice(&buf);
    } else {
        out.push(U64_PREFIX);
        let mut buf = [0u8; 8];
        BigEndian::write_u64(&mut buf, value);
        out.extend_from_slice(&buf);
    }
}

/// Number of bytes `write_var_int` would produce for `value`, without writing.
pub fn var_int_len(value: u64) -> usize {
    if value < U16_PREFIX as u64 {
        1
    } else if value <= u16::MAX as u64 {
        3
    } else if value <= u32::MAX as u64 {
        5
    } else {
        9
    }
}

/// Reads a `var_int` from the front of `bytes`, returning the value and the
/// number of bytes consumed.
pub fn read_var_int(bytes: &[u8]) -> NetworkResult<(u64, usize)> {
    let prefix = *bytes
        .first()
        .ok_or(NetworkError::Fatal(ErrorType::Protocol))?;

    match prefix {
        U16_PREFIX => {
            let body = bytes
                .get(1..3)
                .ok_or(NetworkError::Fatal(ErrorType::Protocol))?;
            Ok((BigEndian::read_u16(body) as u64, 3))
        }
        U32_PREFIX => {
            let body = bytes
                .get(1..5)
                .ok_or(NetworkError::Fatal(ErrorType::Protocol))?;
            Ok((BigEndian::read_u32(body) as u64, 5))
        }
        U64_PREFIX => {
            let body = bytes
                .get(1..9)
                .ok_or(NetworkError::Fatal(ErrorType::Protocol))?;
            Ok((BigEndian::read_u64(body), 9))
        }
        small => Ok((small as u64, 1)),
    }
}

/// Appends a `var_int`-length-prefixed byte string.
pub fn write_var_str(out: &mut Vec<u8>, value: &[u8]) {
    write_var_int(out, value.len() as u64);
    out.extend_from_slice(value);
}

pub fn read_var_str(bytes: &[u8]) -> NetworkResult<(&[u8], usize)> {
    let (len, prefix_len) = read_var_int(bytes)?;
    let len = len as usize;
    let body = bytes
        .get(prefix_len..prefix_len + len)
        .ok_or(NetworkError::Fatal(ErrorType::Protocol))?;
    Ok((body, prefix_len + len))
}
