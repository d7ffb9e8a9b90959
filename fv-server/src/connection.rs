//! Per-peer state machine: upgrade to WebSocket, decode presence commands,
//! maintain the dirty vector, and schedule outbound writes.

use fv_bitset::BitSet;
use fv_buffer::{Buffer, ErrorType, ErrorUtils, NetworkError, NetworkResult, DEFAULT_CAPACITY};
use fv_registry::{DirtyEvent, PlayerRegistry};
use fv_wire::Command;
use fv_ws::{framing, handshake};
use std::io::{Read, Write};
use std::net::SocketAddr;
use std::time::Instant;

/// Room the framer reserves so a fully-declared frame header can never
/// itself overrun the read buffer.
const MAX_PAYLOAD: usize = DEFAULT_CAPACITY - framing::MAX_FRAME_HEADER;

/// What `Connection` needs from its underlying socket. Kept separate from
/// `Read + Write` so the state machine can be driven by an in-memory stub in
/// tests instead of a real `TcpStream` (§8: scenarios are fed bytes
/// directly, no sockets opened in CI).
pub trait Transport: Read + Write {
    fn shutdown(&mut self);
}

impl Transport for mio::net::TcpStream {
    fn shutdown(&mut self) {
        let _ = self.shutdown(std::net::Shutdown::Both);
    }
}

/// One fully processed inbound command, tagged with the connection it came
/// from so the caller (the broadcast loop) can apply it against the
/// registry and fan out dirty events.
pub enum Inbound {
    NewPlayer,
    Reconnect { player_id: u64 },
    UpdatePosition { x: u32, y: u32, direction: u16 },
    KeepAlive,
    Speech { payload: Vec<u8> },
}

pub struct Connection<S: Transport> {
    pub stream: S,
    pub addr: SocketAddr,

    raw_in: Buffer,
    write_buf: Buffer,

    upgraded: bool,

    pub player_num: Option<usize>,
    dirty: BitSet,
    sent_player_id: bool,
    consistent: bool,
    last_sent_count: usize,

    pub last_update: Instant,
}

impl<S: Transport> Connection<S> {
    pub fn new(stream: S, addr: SocketAddr, now: Instant) -> Connection<S> {
        Connection {
            stream,
            addr,
            raw_in: Buffer::new(DEFAULT_CAPACITY),
            write_buf: Buffer::new(DEFAULT_CAPACITY),
            upgraded: false,
            player_num: None,
            dirty: BitSet::new(),
            sent_player_id: false,
            consistent: true,
            last_sent_count: 0,
            last_update: now,
        }
    }

    /// Marks the connection's own player dirty in every other connection's
    /// vector as well as its own bookkeeping when the registry reports a
    /// state change.
    pub fn mark_dirty(&mut self, event: DirtyEvent) {
        if self.player_num == Some(event.player_num) {
            return;
        }
        self.dirty.set(event.player_num);
        self.consistent = false;
    }

    /// Whether the next writability event should run `fill_write_buf`: bytes
    /// already queued, the id not yet announced, a dirty slot pending, or
    /// (per §3's invariant) the visible player count has moved since the
    /// last `N_PLAYERS` sent to this peer, even if nothing marked `dirty`.
    pub fn needs_write_poll(&self, registry: &PlayerRegistry) -> bool {
        if !self.write_buf.is_empty() {
            return true;
        }
        match self.player_num {
            None => false,
            Some(_) if !self.sent_player_id || !self.consistent => true,
            Some(_) => self.last_sent_count != visible_count(self.player_num, registry),
        }
    }

    /// Reads everything currently available off the socket and decodes as
    /// many complete commands as the bytes allow.
    pub fn read_commands(&mut self, now: Instant) -> NetworkResult<Vec<Inbound>> {
        let received = self.raw_in.ingress(&mut self.stream)?;
        if received > 0 {
            self.last_update = now;
        }

        if !self.upgraded {
            if !handshake::looks_like_http_get(self.raw_in.read_slice()) {
                if self.raw_in.len() > 0 {
                    return Err(NetworkError::Fatal(ErrorType::Protocol));
                }
                return Ok(Vec::new());
            }

            match handshake::try_parse_handshake(self.raw_in.read_slice())? {
                None => return Ok(Vec::new()),
                Some((request, consumed)) => {
                    let response = handshake::build_response(&request.accept);
                    if !self.write_buf.try_push(&response) {
                        return Err(NetworkError::Fatal(ErrorType::BufferOverrun));
                    }
                    self.raw_in.move_head(consumed);
                    self.upgraded = true;
                }
            }
        }

        let mut commands = Vec::new();
        loop {
            let parsed = match framing::parse_frame(self.raw_in.read_slice(), MAX_PAYLOAD)? {
                Some(parsed) => parsed,
                None => break,
            };

            let mut payload =
                self.raw_in.read_slice()[parsed.payload_start..parsed.payload_start + parsed.payload_len].to_vec();
            if let Some(mask) = parsed.mask {
                framing::unmask(&mut payload, mask);
            }
            let consumed = parsed.consumed;
            self.raw_in.move_head(consumed);

            let (command, used) = Command::try_decode(&payload)?;
            if used != payload.len() {
                return Err(NetworkError::Fatal(ErrorType::Protocol));
            }

            if let Some(inbound) = self.dispatch(command) {
                commands.push(inbound);
            }
        }

        Ok(commands)
    }

    fn dispatch(&mut self, command: Command) -> Option<Inbound> {
        match command {
            Command::NewPlayer => Some(Inbound::NewPlayer),
            Command::Reconnect { player_id } => Some(Inbound::Reconnect { player_id }),
            Command::UpdatePosition { x, y, direction } => Some(Inbound::UpdatePosition { x, y, direction }),
            Command::KeepAlive => Some(Inbound::KeepAlive),
            Command::Speech { payload } => Some(Inbound::Speech { payload }),
            // Server-originated commands arriving from a peer are a protocol
            // violation elsewhere, but silently ignoring unknowns here keeps
            // this switch forward-compatible, matching §4.4's "unknown id:
            // ignore silently".
            _ => None,
        }
    }

    pub fn bind_new_player(&mut self, num: usize, registry: &PlayerRegistry) {
        self.player_num = Some(num);
        self.sent_player_id = false;
        self.consistent = false;
        self.seed_dirty_existing(num, registry);
    }

    pub fn bind_reconnected_player(&mut self, num: usize, registry: &PlayerRegistry) {
        self.player_num = Some(num);
        self.sent_player_id = true;
        self.consistent = false;
        self.seed_dirty_existing(num, registry);
    }

    /// A freshly bound connection has sent nothing yet, so every other slot
    /// already in the registry needs to go out as `PLAYER_POSITION` before
    /// the first `CONSISTENT`; mirrors the original's dirty-player seeding
    /// on bind (`fv_buffer_set_length` + `memset` to `FV_PLAYER_STATE_ALL`).
    fn seed_dirty_existing(&mut self, own: usize, registry: &PlayerRegistry) {
        let total = registry.count();
        self.dirty.set_length(total);
        for slot in 0..total {
            if slot != own {
                self.dirty.set(slot);
            }
        }
    }

    /// Implements `fill_write_buf` from §4.4: player id, then player count,
    /// then one `PLAYER_POSITION` per dirty, non-self slot, then
    /// `CONSISTENT`. Stops (returning `Wait`) the instant a command no
    /// longer fits; the next writability event resumes where this left off.
    pub fn fill_write_buf(&mut self, registry: &PlayerRegistry) -> NetworkResult<()> {
        if let Some(num) = self.player_num {
            if !self.sent_player_id {
                let player = registry
                    .get_by_num(num)
                    .ok_or(NetworkError::Fatal(ErrorType::Protocol))?;
                self.try_emit(&Command::PlayerId { id: player.id })?;
                self.sent_player_id = true;
            }
        }

        let total = registry.count();
        let visible_count = visible_count(self.player_num, registry);

        // `consistent` alone isn't enough to skip the rest: a peer joining
        // elsewhere moves the visible count without touching this
        // connection's dirty vector, and that disagreement must still be
        // cleared per §3's invariant.
        if self.consistent && self.last_sent_count == visible_count {
            return Ok(());
        }

        if self.last_sent_count != visible_count {
            self.try_emit(&Command::NPlayers {
                count: visible_count as u16,
            })?;
            self.last_sent_count = visible_count;
        }

        self.dirty.set_length(total);

        for slot in self.dirty.iter_set().collect::<Vec<_>>() {
            if Some(slot) == self.player_num {
                self.dirty.clear_bit(slot);
                continue;
            }
            let player = match registry.get_by_num(slot) {
                Some(player) => player,
                None => {
                    self.dirty.clear_bit(slot);
                    continue;
                }
            };
            let renumbered = match self.player_num {
                Some(own) if slot > own => slot - 1,
                _ => slot,
            };
            self.try_emit(&Command::PlayerPosition {
                slot: renumbered as u16,
                x: player.x,
                y: player.y,
                direction: player.direction,
            })?;
            self.dirty.clear_bit(slot);
        }

        self.try_emit(&Command::Consistent)?;
        self.consistent = true;
        Ok(())
    }

    /// Queues a command outside the `fill_write_buf` sequence (speech
    /// relay); best-effort, dropped silently on overrun like any other
    /// speech packet per §7's "voice encode/decode error" handling.
    pub fn queue_immediate(&mut self, command: &Command) -> NetworkResult<()> {
        self.try_emit(command)
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

    /// Flushes as much of the write buffer as the socket accepts right now.
    pub fn flush(&mut self, now: Instant) -> NetworkResult<()> {
        if self.write_buf.is_empty() {
            return Ok(());
        }
        let sent = self.write_buf.egress(&mut self.stream)?;
        if sent > 0 {
            self.last_update = now;
        }
        Ok(())
    }

    pub fn shutdown(&mut self) {
        self.stream.shutdown();
    }
}

/// Treats any non-`Wait` error as the fatal close signal the server loop
/// folds into a disconnect; mirrors `ErrorUtils::has_failed` used throughout.
pub fn is_fatal<T>(result: &NetworkResult<T>) -> bool {
    result.has_failed()
}

/// Player count a peer should see: everyone but themselves once bound, or
/// everyone (there is no "themselves" yet) while still unbound.
fn visible_count(player_num: Option<usize>, registry: &PlayerRegistry) -> usize {
    match player_num {
        Some(_) => registry.count().saturating_sub(1),
        None => registry.count(),
    }
}
