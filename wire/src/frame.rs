use byteorder::{BigEndian, ByteOrder};
use fv_buffer::{ErrorType, NetworkError, NetworkResult};

/// 4-byte magic, 12-byte zero-padded command name, 4-byte big-endian payload length.
pub const MAGIC: [u8; 4] = *b"FvB1";
pub const COMMAND_NAME_LEN: usize = 12;
pub const HEADER_LEN: usize = 4 + COMMAND_NAME_LEN + 4;

/// Commands a player's own state can carry at most; keeps `PLAYER_POSITION`
/// and friends well inside a single WebSocket short-form frame (<126 bytes).
pub const MAX_SPEECH_SIZE: usize = 255;

fn command_name(name: &str) -> [u8; COMMAND_NAME_LEN] {
    let bytes = name.as_bytes();
    assert!(bytes.len() <= COMMAND_NAME_LEN, "command name too long: {}", name);
    let mut out = [0u8; COMMAND_NAME_LEN];
    out[..bytes.len()].copy_from_slice(bytes);
    out
}

macro_rules! command_ids {
    ($($variant:ident => $name:expr),+ $(,)?) => {
        #[derive(Debug, Eq, PartialEq, Clone, Copy)]
        pub enum CommandId {
            $($variant,)+
        }

        impl CommandId {
            pub fn wire_name(self) -> [u8; COMMAND_NAME_LEN] {
                match self {
                    $(CommandId::$variant => command_name($name),)+
                }
            }

            pub fn from_wire_name(name: &[u8; COMMAND_NAME_LEN]) -> NetworkResult<CommandId> {
                $(if name == &command_name($name) {
                    return Ok(CommandId::$variant);
                })+
                Err(NetworkError::Fatal(ErrorType::Protocol))
            }
        }
    };
}

command_ids! {
    NewPlayer => "NEW_PLAYER",
    Reconnect => "RECONNECT",
    UpdatePosition => "UPDATE_POS",
    KeepAlive => "KEEPALIVE",
    Speech => "SPEECH",
    PlayerId => "PLAYER_ID",
    NPlayers => "N_PLAYERS",
    PlayerPosition => "PLAYERPOS",
    Consistent => "CONSISTENT",
    // Server-originated relay of another peer's SPEECH payload; §9's open
    // question on speech fan-out, resolved towards implementing it (see
    // DESIGN.md). Carries the sender's slot, renumbered per recipient the
    // same way PLAYER_POSITION is.
    SpeechRelay => "SPEECH_RLY",
}

/// A parsed frame header: command id and declared payload length.
#[derive(Debug, Eq, PartialEq, Clone, Copy)]
pub struct Header {
    pub command: CommandId,
    pub payload_len: u32,
}

/// Reads the command id out of a header without validating the magic.
pub fn get_message_id(header_bytes: &[u8; HEADER_LEN]) -> NetworkResult<CommandId> {
    let mut name = [0u8; COMMAND_NAME_LEN];
    name.copy_from_slice(&header_bytes[4..4 + COMMAND_NAME_LEN]);
    CommandId::from_wire_name(&name)
}

pub fn get_payload_length(header_bytes: &[u8; HEADER_LEN]) -> u32 {
    BigEndian::read_u32(&header_bytes[4 + COMMAND_NAME_LEN..])
}

/// Parses a complete header out of the front of `bytes`, validating the magic.
pub fn parse_header(bytes: &[u8]) -> NetworkResult<Header> {
    if bytes.len() < HEADER_LEN {
        return Err(NetworkError::Wait);
    }
    if bytes[..4] != MAGIC {
        return Err(NetworkError::Fatal(ErrorType::Protocol));
    }
    let mut header_bytes = [0u8; HEADER_LEN];
    header_bytes.copy_from_slice(&bytes[..HEADER_LEN]);

    Ok(Header {
        command: get_message_id(&header_bytes)?,
        payload_len: get_payload_length(&header_bytes),
    })
}

/// Writes the frame header (magic + command name + payload length) into `out`.
pub fn write_header(out: &mut Vec<u8>, command: CommandId, payload_len: u32) {
    out.extend_from_slice(&MAGIC);
    out.extend_from_slice(&command.wire_name());
    let mut len_bytes = [0u8; 4];
    BigEndian::write_u32(&mut len_bytes, payload_len);
    out.extend_from_slice(&len_bytes);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_name_roundtrip() {
        for id in [
            CommandId::NewPlayer,
            CommandId::Reconnect,
            CommandId::UpdatePosition,
            CommandId::KeepAlive,
            CommandId::Speech,
            CommandId::PlayerId,
            CommandId::NPlayers,
            CommandId::PlayerPosition,
            CommandId::Consistent,
            CommandId::SpeechRelay,
        ] {
            let name = id.wire_name();
            assert_eq!(CommandId::from_wire_name(&name).unwrap(), id);
        }
    }

    #[test]
    fn test_parse_header_roundtrip() {
        let mut buf = Vec::new();
        write_header(&mut buf, CommandId::UpdatePosition, 10);
        let header = parse_header(&buf).unwrap();
        assert_eq!(header.command, CommandId::UpdatePosition);
        assert_eq!(header.payload_len, 10);
    }

    #[test]
    fn test_parse_header_bad_magic() {
        let mut buf = Vec::new();
        write_header(&mut buf, CommandId::KeepAlive, 0);
        buf[0] = b'X';
        assert_eq!(
            parse_header(&buf),
            Err(NetworkError::Fatal(ErrorType::Protocol))
        );
    }

    #[test]
    fn test_parse_header_short_waits() {
        let buf = [0u8; 4];
        assert_eq!(parse_header(&buf), Err(NetworkError::Wait));
    }
}
