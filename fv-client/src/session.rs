//! The client side of the presence protocol state machine: the equivalent of
//! `fv_server::connection::Connection`, but driving a single outbound
//! connection instead of fanning in from many. Pure logic over `Read`/`Write`
//! so it can be driven by an in-memory stream in tests, same as the server's
//! `Connection<S: Transport>`.

use fv_bitset::BitSet;
use fv_buffer::{Buffer, ErrorType, NetworkError, NetworkResult, DEFAULT_CAPACITY};
use fv_voice::VoiceRecorder;
use fv_wire::Command;
use fv_ws::{client as ws_client, framing};
use std::io::{Read, Write};
use std::time::{Duration, Instant};

/// One peer other than the local player, as mirrored from the server's
/// renumbered `PLAYER_POSITION` stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PersonView {
    pub x: u32,
    pub y: u32,
    pub direction: u16,
}

/// Events surfaced to the network loop as commands are decoded off the wire.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// The server assigned (or reconfirmed) our identity; the caller should
    /// persist it so a future reconnect uses `RECONNECT` instead of `NEW_PLAYER`.
    PlayerId(u64),
    /// A `CONSISTENT` frame closed; the caller should read `players()` and
    /// `dirty_bits()` before calling `clear_dirty()`.
    Consistent,
    /// A relayed `SPEECH` packet from another peer, already renumbered to
    /// exclude our own slot.
    Speech { slot: u16, payload: Vec<u8> },
}

/// Drives one connection attempt's worth of protocol state. A fresh
/// `ClientSession` is created per TCP connection; `saved_id` is the one
/// piece of state a caller should carry across reconnects.
pub struct ClientSession {
    read_buf: Buffer,
    write_buf: Buffer,
    handshake_done: bool,
    said_hello: bool,
    saved_id: Option<u64>,
    local_dirty: bool,
    local_pos: (u32, u32, u16),
    players: Vec<PersonView>,
    dirty_bits: BitSet,
    last_write: Instant,
}

impl ClientSession {
    pub fn new(saved_id: Option<u64>, now: Instant) -> ClientSession {
        ClientSession {
            read_buf: Buffer::new(DEFAULT_CAPACITY),
            write_buf: Buffer::new(DEFAULT_CAPACITY),
            handshake_done: false,
            said_hello: false,
            saved_id,
            local_dirty: false,
            local_pos: (0, 0, 0),
            players: Vec::new(),
            dirty_bits: BitSet::new(),
            last_write: now,
        }
    }

    /// The hand-crafted minimal WebSocket upgrade request, pushed as the
    /// very first bytes sent once the socket becomes writable.
    pub fn handshake_request(host: &str) -> Vec<u8> {
        ws_client::build_request(host)
    }

    /// Queues raw bytes ahead of anything `fill_write_buf` would produce;
    /// used once per connection to send the handshake request itself.
    pub fn queue_raw(&mut self, bytes: &[u8]) -> bool {
        self.write_buf.try_push(bytes)
    }

    pub fn saved_id(&self) -> Option<u64> {
        self.saved_id
    }

    pub fn players(&self) -> &[PersonView] {
        &self.players
    }

    pub fn dirty_bits(&self) -> &BitSet {
        &self.dirty_bits
    }

    pub fn clear_dirty(&mut self) {
        self.dirty_bits.clear_all();
    }

    /// Called by the owner (UI/game thread, via a shared mutex in the real
    /// network loop) whenever the local player's position changes.
    pub fn mark_position_dirty(&mut self, x: u32, y: u32, direction: u16) {
        self.local_pos = (x, y, direction);
        self.local_dirty = true;
    }

    fn due_for_keep_alive(&self, now: Instant, keep_alive_secs: u64) -> bool {
        now.duration_since(self.last_write) >= Duration::from_secs(keep_alive_secs)
    }

    /// Whether the network loop should poll this session for writability:
    /// hello not yet sent, a dirty local position, buffered bytes still to
    /// flush, or keep-alive due. "Not connected yet" is the caller's concern
    /// (it polls for connect-completion separately).
    pub fn needs_write_poll(&self, now: Instant, keep_alive_secs: u64) -> bool {
        !self.said_hello || self.local_dirty || !self.write_buf.is_empty() || self.due_for_keep_alive(now, keep_alive_secs)
    }

    /// Implements §4.5's `fill_write_buf`: speech packets ahead of the
    /// regular sequence, then hello (`NEW_PLAYER`/`RECONNECT`), then a dirty
    /// `UPDATE_POSITION`, then `KEEP_ALIVE` if nothing else was sent and it's
    /// due. Stops the instant a command doesn't fit; the next writability
    /// event resumes.
    pub fn fill_write_buf(&mut self, recorder: Option<&VoiceRecorder>, now: Instant, keep_alive_secs: u64) -> NetworkResult<()> {
        if let Some(recorder) = recorder {
            while recorder.has_packet() {
                let packet = match recorder.get_packet() {
                    Some(packet) => packet,
                    None => break,
                };
                self.try_emit(&Command::Speech { payload: packet })?;
            }
        }

        if !self.said_hello {
            let command = match self.saved_id {
                Some(player_id) => Command::Reconnect { player_id },
                None => Command::NewPlayer,
            };
            self.try_emit(&command)?;
            self.said_hello = true;
        }

        if self.local_dirty {
            let (x, y, direction) = self.local_pos;
            self.try_emit(&Command::UpdatePosition { x, y, direction })?;
            self.local_dirty = false;
        }

        if self.write_buf.is_empty() && self.due_for_keep_alive(now, keep_alive_secs) {
            self.try_emit(&Command::KeepAlive)?;
        }

        Ok(())
    }

    fn try_emit(&mut self, command: &Command) -> NetworkResult<()> {
        let mut payload = Vec::new();
        command.encode(&mut payload)?;
        let mut framed = Vec::new();
        framing::write_frame(&mut framed, &payload);
        if self.write_buf.try_push(&framed) {
            Ok(())
        } else {
            Err(NetworkError::Wait)
        }
    }

    /// Flushes as much of the write buffer as the socket accepts right now,
    /// resetting the keep-alive clock whenever bytes actually go out.
    pub fn flush<S: Write>(&mut self, stream: &mut S, now: Instant) -> NetworkResult<()> {
        if self.write_buf.is_empty() {
            return Ok(());
        }
        let sent = self.write_buf.egress(stream)?;
        if sent > 0 {
            self.last_write = now;
        }
        Ok(())
    }

    /// Reads available bytes, consumes the handshake terminator if not yet
    /// seen, then decodes as many complete frames as the buffer holds.
    /// Per §4.5, bytes preceding the terminator are simply dropped (left
    /// unconsumed here to accumulate, since the handshake response is a few
    /// dozen bytes and always arrives well inside the read buffer).
    pub fn handle_read<S: Read>(&mut self, stream: &mut S) -> NetworkResult<Vec<ClientEvent>> {
        self.read_buf.ingress(stream)?;

        if !self.handshake_done {
            match ws_client::find_handshake_terminator(self.read_buf.read_slice()) {
                Some(consumed) => {
                    self.read_buf.move_head(consumed);
                    self.handshake_done = true;
                }
                None => return Ok(Vec::new()),
            }
        }

        let mut events = Vec::new();
        loop {
            let parsed = match ws_client::parse_client_frame(self.read_buf.read_slice()) {
                Some(parsed) => parsed,
                None => break,
            };

            let payload =
                self.read_buf.read_slice()[parsed.payload_start..parsed.payload_start + parsed.payload_len].to_vec();
            let consumed = parsed.consumed;
            self.read_buf.move_head(consumed);

            let (command, used) = Command::try_decode(&payload)?;
            if used != payload.len() {
                return Err(NetworkError::Fatal(ErrorType::Protocol));
            }

            self.apply(command, &mut events);
        }

        Ok(events)
    }

    fn apply(&mut self, command: Command, events: &mut Vec<ClientEvent>) {
        match command {
            Command::PlayerId { id } => {
                self.saved_id = Some(id);
                events.push(ClientEvent::PlayerId(id));
            }
            Command::NPlayers { count } => {
                self.players.resize(count as usize, PersonView::default());
                self.dirty_bits.set_length(count as usize);
            }
            Command::PlayerPosition { slot, x, y, direction } => {
                let slot = slot as usize;
                if slot < self.players.len() {
                    self.players[slot] = PersonView { x, y, direction };
                    self.dirty_bits.set(slot);
                }
            }
            Command::Consistent => {
                events.push(ClientEvent::Consistent);
            }
            Command::SpeechRelay { slot, payload } => {
                events.push(ClientEvent::Speech { slot, payload });
            }
            // The server never sends us NEW_PLAYER/RECONNECT/etc; matches
            // §4.4's "unknown id: ignore silently" applied symmetrically here.
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::io;

    struct MockStream {
        inbound: VecDeque<u8>,
        outbound: Vec<u8>,
    }

    impl MockStream {
        fn new() -> MockStream {
            MockStream {
                inbound: VecDeque::new(),
                outbound: Vec::new(),
            }
        }

        fn push_inbound(&mut self, bytes: &[u8]) {
            self.inbound.extend(bytes);
        }
    }

    impl Read for MockStream {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.inbound.is_empty() {
                return Err(io::ErrorKind::WouldBlock.into());
            }
            let count = buf.len().min(self.inbound.len());
            for slot in buf.iter_mut().take(count) {
                *slot = self.inbound.pop_front().unwrap();
            }
            Ok(count)
        }
    }

    impl Write for MockStream {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.outbound.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn server_frame(command: &Command) -> Vec<u8> {
        let mut payload = Vec::new();
        command.encode(&mut payload).unwrap();
        let mut framed = Vec::new();
        framing::write_frame(&mut framed, &payload);
        framed
    }

    fn decode_outbound(bytes: &[u8]) -> Vec<Command> {
        let mut bytes = bytes;
        let mut commands = Vec::new();
        while !bytes.is_empty() {
            let parsed = ws_client::parse_client_frame(bytes).unwrap();
            let payload = &bytes[parsed.payload_start..parsed.payload_start + parsed.payload_len];
            let (command, used) = Command::try_decode(payload).unwrap();
            assert_eq!(used, payload.len());
            commands.push(command);
            bytes = &bytes[parsed.consumed..];
        }
        commands
    }

    #[test]
    fn test_first_connect_sends_new_player() {
        let mut session = ClientSession::new(None, Instant::now());
        let mut stream = MockStream::new();

        session.fill_write_buf(None, Instant::now(), 60).unwrap();
        session.flush(&mut stream, Instant::now()).unwrap();

        let commands = decode_outbound(&stream.outbound);
        assert!(matches!(commands[0], Command::NewPlayer));
    }

    #[test]
    fn test_reconnect_uses_saved_id() {
        let mut session = ClientSession::new(Some(0xDEAD_BEEF_CAFE_BABE), Instant::now());
        let mut stream = MockStream::new();

        session.fill_write_buf(None, Instant::now(), 60).unwrap();
        session.flush(&mut stream, Instant::now()).unwrap();

        let commands = decode_outbound(&stream.outbound);
        assert!(matches!(
            commands[0],
            Command::Reconnect { player_id: 0xDEAD_BEEF_CAFE_BABE }
        ));
    }

    #[test]
    fn test_dirty_position_sent_once() {
        let mut session = ClientSession::new(Some(1), Instant::now());
        let mut stream = MockStream::new();
        let now = Instant::now();

        session.fill_write_buf(None, now, 60).unwrap(); // hello
        session.flush(&mut stream, now).unwrap();
        stream.outbound.clear();

        session.mark_position_dirty(10, 20, 30);
        session.fill_write_buf(None, now, 60).unwrap();
        session.flush(&mut stream, now).unwrap();

        let commands = decode_outbound(&stream.outbound);
        assert!(matches!(
            commands[0],
            Command::UpdatePosition { x: 10, y: 20, direction: 30 }
        ));

        stream.outbound.clear();
        session.fill_write_buf(None, now, 60).unwrap();
        session.flush(&mut stream, now).unwrap();
        assert!(stream.outbound.is_empty(), "position should only be sent once after going dirty");
    }

    #[test]
    fn test_keep_alive_fires_after_threshold() {
        let mut session = ClientSession::new(Some(1), Instant::now());
        let mut stream = MockStream::new();
        let t0 = Instant::now();

        session.fill_write_buf(None, t0, 60).unwrap();
        session.flush(&mut stream, t0).unwrap();
        stream.outbound.clear();

        let soon = t0 + Duration::from_secs(10);
        session.fill_write_buf(None, soon, 60).unwrap();
        session.flush(&mut stream, soon).unwrap();
        assert!(stream.outbound.is_empty(), "keep-alive shouldn't fire before the threshold");

        let later = t0 + Duration::from_secs(61);
        session.fill_write_buf(None, later, 60).unwrap();
        session.flush(&mut stream, later).unwrap();
        let commands = decode_outbound(&stream.outbound);
        assert!(matches!(commands[0], Command::KeepAlive));
    }

    #[test]
    fn test_consistent_frame_updates_players_and_dirty_bits() {
        let mut session = ClientSession::new(Some(1), Instant::now());
        let mut stream = MockStream::new();

        stream.push_inbound(b"HTTP/1.1 101 Switching Protocols\r\n\r\n");
        stream.push_inbound(&server_frame(&Command::PlayerId { id: 99 }));
        stream.push_inbound(&server_frame(&Command::NPlayers { count: 2 }));
        stream.push_inbound(&server_frame(&Command::PlayerPosition {
            slot: 0,
            x: 100,
            y: 200,
            direction: 45,
        }));
        stream.push_inbound(&server_frame(&Command::Consistent));

        let events = session.handle_read(&mut stream).unwrap();

        assert!(matches!(events[0], ClientEvent::PlayerId(99)));
        assert!(matches!(events[1], ClientEvent::Consistent));
        assert_eq!(session.players().len(), 2);
        assert_eq!(session.players()[0], PersonView { x: 100, y: 200, direction: 45 });
        assert!(session.dirty_bits().get(0));
        assert!(!session.dirty_bits().get(1));

        session.clear_dirty();
        assert!(!session.dirty_bits().any());
    }

    #[test]
    fn test_queue_raw_goes_out_ahead_of_fill_write_buf() {
        let mut session = ClientSession::new(None, Instant::now());
        let mut stream = MockStream::new();

        assert!(session.queue_raw(b"GET / HTTP/1.1\r\n\r\n"));
        session.fill_write_buf(None, Instant::now(), 60).unwrap();
        session.flush(&mut stream, Instant::now()).unwrap();

        assert!(stream.outbound.starts_with(b"GET / HTTP/1.1\r\n\r\n"));
    }

    #[test]
    fn test_bytes_before_terminator_wait() {
        let mut session = ClientSession::new(None, Instant::now());
        let mut stream = MockStream::new();
        stream.push_inbound(b"HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\n");

        let events = session.handle_read(&mut stream).unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn test_fill_write_buf_drains_voice_recorder_ahead_of_hello() {
        let recorder = VoiceRecorder::new(|| {}).unwrap();
        for _ in 0..13 {
            recorder.push_samples(&vec![5000i16; fv_voice::WINDOW_SAMPLES]);
        }
        assert!(recorder.has_packet());

        let mut session = ClientSession::new(Some(1), Instant::now());
        let mut stream = MockStream::new();
        session.fill_write_buf(Some(&recorder), Instant::now(), 60).unwrap();
        session.flush(&mut stream, Instant::now()).unwrap();

        let commands = decode_outbound(&stream.outbound);
        assert!(matches!(commands[0], Command::Speech { .. }));
        assert!(matches!(commands[1], Command::Reconnect { .. }));
    }
}
