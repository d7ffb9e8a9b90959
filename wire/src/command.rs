use crate::frame::{self, CommandId, HEADER_LEN, MAX_SPEECH_SIZE};
use crate::varint;
use byteorder::{BigEndian, ByteOrder};
use fv_buffer::{Buffer, ErrorType, NetworkError, NetworkResult};

/// One fully-typed presence-protocol command, client- or server-originated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    NewPlayer,
    Reconnect { player_id: u64 },
    UpdatePosition { x: u32, y: u32, direction: u16 },
    KeepAlive,
    Speech { payload: Vec<u8> },
    PlayerId { id: u64 },
    NPlayers { count: u16 },
    PlayerPosition { slot: u16, x: u32, y: u32, direction: u16 },
    Consistent,
    SpeechRelay { slot: u16, payload: Vec<u8> },
}

impl Command {
    pub fn command_id(&self) -> CommandId {
        match self {
            Command::NewPlayer => CommandId::NewPlayer,
            Command::Reconnect { .. } => CommandId::Reconnect,
            Command::UpdatePosition { .. } => CommandId::UpdatePosition,
            Command::KeepAlive => CommandId::KeepAlive,
            Command::Speech { .. } => CommandId::Speech,
            Command::PlayerId { .. } => CommandId::PlayerId,
            Command::NPlayers { .. } => CommandId::NPlayers,
            Command::PlayerPosition { .. } => CommandId::PlayerPosition,
            Command::Consistent => CommandId::Consistent,
            Command::SpeechRelay { .. } => CommandId::SpeechRelay,
        }
    }

    fn write_payload(&self, out: &mut Vec<u8>) -> NetworkResult<()> {
        match self {
            Command::NewPlayer | Command::KeepAlive | Command::Consistent => {}
            Command::Reconnect { player_id } => write_u64(out, *player_id),
            Command::UpdatePosition { x, y, direction } => {
                write_u32(out, *x);
                write_u32(out, *y);
                write_u16(out, *direction);
            }
            Command::Speech { payload } => {
                if payload.len() > MAX_SPEECH_SIZE {
                    return Err(NetworkError::Fatal(ErrorType::OversizedFrame));
                }
                varint::write_var_str(out, payload);
            }
            Command::PlayerId { id } => write_u64(out, *id),
            Command::NPlayers { count } => write_u16(out, *count),
            Command::PlayerPosition { slot, x, y, direction } => {
                write_u16(out, *slot);
                write_u32(out, *x);
                write_u32(out, *y);
                write_u16(out, *direction);
            }
            Command::SpeechRelay { slot, payload } => {
                if payload.len() > MAX_SPEECH_SIZE {
                    return Err(NetworkError::Fatal(ErrorType::OversizedFrame));
                }
                write_u16(out, *slot);
                varint::write_var_str(out, payload);
            }
        }
        Ok(())
    }

    /// Serialises the full frame (header + payload) into `out`.
    pub fn encode(&self, out: &mut Vec<u8>) -> NetworkResult<()> {
        let mut payload = Vec::new();
        self.write_payload(&mut payload)?;
        frame::write_header(out, self.command_id(), payload.len() as u32);
        out.extend_from_slice(&payload);
        Ok(())
    }

    /// Serialises into a scratch vector and commits it to `buffer` only if the
    /// whole frame fits, matching the "atomic or untouched" write contract.
    pub fn try_write(&self, buffer: &mut Buffer) -> NetworkResult<()> {
        let mut encoded = Vec::new();
        self.encode(&mut encoded)?;
        if buffer.try_push(&encoded) {
            Ok(())
        } else {
            Err(NetworkError::Wait)
        }
    }

    /// Attempts to parse one complete frame from the front of `bytes`.
    /// Returns the command and the number of bytes consumed, or `Wait` if the
    /// buffer doesn't yet hold a full frame.
    pub fn try_decode(bytes: &[u8]) -> NetworkResult<(Command, usize)> {
        let header = frame::parse_header(bytes)?;
        let total = HEADER_LEN + header.payload_len as usize;
        if bytes.len() < total {
            return Err(NetworkError::Wait);
        }
        let payload = &bytes[HEADER_LEN..total];

        let command = match header.command {
            CommandId::NewPlayer => {
                expect_len(payload, 0)?;
                Command::NewPlayer
            }
            CommandId::Reconnect => Command::Reconnect {
                player_id: read_u64(payload)?,
            },
            CommandId::UpdatePosition => {
                expect_len(payload, 10)?;
                Command::UpdatePosition {
                    x: read_u32(&payload[0..4])?,
                    y: read_u32(&payload[4..8])?,
                    direction: read_u16(&payload[8..10])?,
                }
            }
            CommandId::KeepAlive => {
                expect_len(payload, 0)?;
                Command::KeepAlive
            }
            CommandId::Speech => {
                let (body, consumed) = varint::read_var_str(payload)?;
                if consumed != payload.len() || body.len() > MAX_SPEECH_SIZE {
                    return Err(NetworkError::Fatal(ErrorType::Protocol));
                }
                Command::Speech {
                    payload: body.to_vec(),
                }
            }
            CommandId::PlayerId => Command::PlayerId {
                id: read_u64(payload)?,
            },
            CommandId::NPlayers => Command::NPlayers {
                count: read_u16(payload)?,
            },
            CommandId::PlayerPosition => {
                expect_len(payload, 12)?;
                Command::PlayerPosition {
                    slot: read_u16(&payload[0..2])?,
                    x: read_u32(&payload[2..6])?,
                    y: read_u32(&payload[6..10])?,
                    direction: read_u16(&payload[10..12])?,
                }
            }
            CommandId::Consistent => {
                expect_len(payload, 0)?;
                Command::Consistent
            }
            CommandId::SpeechRelay => {
                let slot = read_u16(payload.get(0..2).ok_or(NetworkError::Fatal(ErrorType::Protocol))?)?;
                let (body, consumed) = varint::read_var_str(&payload[2..])?;
                if 2 + consumed != payload.len() || body.len() > MAX_SPEECH_SIZE {
                    return Err(NetworkError::Fatal(ErrorType::Protocol));
                }
                Command::SpeechRelay {
                    slot,
                    payload: body.to_vec(),
                }
            }
        };

        Ok((command, total))
    }
}

fn expect_len(payload: &[u8], len: usize) -> NetworkResult<()> {
    if payload.len() == len {
        Ok(())
    } else {
        Err(NetworkError::Fatal(ErrorType::Protocol))
    }
}

fn write_u16(out: &mut Vec<u8>, value: u16) {
    let mut buf = [0u8; 2];
    BigEndian::write_u16(&mut buf, value);
    out.extend_from_slice(&buf);
}

fn write_u32(out: &mut Vec<u8>, value: u32) {
    let mut buf = [0u8; 4];
    BigEndian::write_u32(&mut buf, value);
    out.extend_from_slice(&buf);
}

fn write_u64(out: &mut Vec<u8>, value: u64) {
    let mut buf = [0u8; 8];
    BigEndian::write_u64(&mut buf, value);
    out.extend_from_slice(&buf);
}

fn read_u16(bytes: &[u8]) -> NetworkResult<u16> {
    if bytes.len() != 2 {
        return Err(NetworkError::Fatal(ErrorType::Protocol));
    }
    Ok(BigEndian::read_u16(bytes))
}

fn read_u32(bytes: &[u8]) -> NetworkResult<u32> {
    if bytes.len() != 4 {
        return Err(NetworkError::Fatal(ErrorType::Protocol));
    }
    Ok(BigEndian::read_u32(bytes))
}

fn read_u64(bytes: &[u8]) -> NetworkResult<u64> {
    if bytes.len() != 8 {
        return Err(NetworkError::Fatal(ErrorType::Protocol));
    }
    Ok(BigEndian::read_u64(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(command: Command) {
        let mut encoded = Vec::new();
        command.encode(&mut encoded).unwrap();
        let (decoded, consumed) = Command::try_decode(&encoded).unwrap();
        assert_eq!(decoded, command);
        assert_eq!(consumed, encoded.len());
    }

    #[test]
    fn test_roundtrip_every_command() {
        roundtrip(Command::NewPlayer);
        roundtrip(Command::Reconnect {
            player_id: 0xDEAD_BEEF_CAFE_BABE,
        });
        roundtrip(Command::UpdatePosition {
            x: 100,
            y: 200,
            direction: 45,
        });
        roundtrip(Command::KeepAlive);
        roundtrip(Command::Speech {
            payload: vec![1, 2, 3, 4, 5],
        });
        roundtrip(Command::PlayerId { id: 42 });
        roundtrip(Command::NPlayers { count: 7 });
        roundtrip(Command::PlayerPosition {
            slot: 3,
            x: 1,
            y: 2,
            direction: 3,
        });
        roundtrip(Command::Consistent);
        roundtrip(Command::SpeechRelay {
            slot: 2,
            payload: vec![9, 9, 9],
        });
    }

    #[test]
    fn test_decode_waits_on_partial_frame() {
        let mut encoded = Vec::new();
        Command::UpdatePosition {
            x: 1,
            y: 2,
            direction: 3,
        }
        .encode(&mut encoded)
        .unwrap();

        let partial = &encoded[..encoded.len() - 1];
        assert_eq!(Command::try_decode(partial), Err(NetworkError::Wait));
    }

    #[test]
    fn test_speech_rejects_oversized_payload() {
        let command = Command::Speech {
            payload: vec![0u8; MAX_SPEECH_SIZE + 1],
        };
        let mut out = Vec::new();
        assert_eq!(
            command.encode(&mut out),
            Err(NetworkError::Fatal(ErrorType::OversizedFrame))
        );
    }

    #[test]
    fn test_try_write_leaves_buffer_untouched_on_overrun() {
        let mut buffer = Buffer::new(frame::HEADER_LEN + 2);
        let command = Command::UpdatePosition {
            x: 1,
            y: 2,
            direction: 3,
        };
        let result = command.try_write(&mut buffer);
        assert_eq!(result, Err(NetworkError::Wait));
        assert_eq!(buffer.len(), 0);
    }
}
