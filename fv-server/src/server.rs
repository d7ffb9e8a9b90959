//! Single-threaded event loop: accept connections, dispatch inbound
//! commands against the player registry, and fan out dirty events and
//! speech relays to every other connection.

use crate::config::ServerConfig;
use crate::connection::{Connection, Inbound};
use fv_buffer::{ErrorUtils, NetworkError};
use fv_registry::{DirtyEvent, PlayerRegistry};
use fv_wire::Command;
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token};
use std::io;
use std::time::{Duration, Instant};

const LISTENER: Token = Token(usize::MAX);

/// The event loop only ever drives real sockets; tests exercise `Connection`
/// directly against an in-memory `Transport` instead of going through `Server`.
type PeerConnection = Connection<TcpStream>;

enum Outcome {
    None,
    Dirty(DirtyEvent),
    CloseSelf,
}

pub struct Server {
    listener: TcpListener,
    poll: Poll,
    events: Events,
    connections: Vec<Option<PeerConnection>>,
    free: Vec<usize>,
    registry: PlayerRegistry,
    config: ServerConfig,
    log: slog::Logger,
    start: Instant,
    last_sweep: Instant,
}

impl Server {
    pub fn new(config: ServerConfig, log: slog::Logger) -> io::Result<Server> {
        let addr = config
            .address
            .parse()
            .unwrap_or_else(|_| panic!("invalid listen address: {}", config.address));

        let mut listener = TcpListener::bind(addr)?;
        let poll = Poll::new()?;
        poll.registry().register(&mut listener, LISTENER, Interest::READABLE)?;

        let now = Instant::now();
        Ok(Server {
            listener,
            poll,
            events: Events::with_capacity(1024),
            connections: Vec::new(),
            free: Vec::new(),
            registry: PlayerRegistry::new(&log),
            config,
            log,
            start: now,
            last_sweep: now,
        })
    }

    pub fn run(&mut self) -> io::Result<()> {
        loop {
            self.poll_once(Some(Duration::from_millis(200)))?;
        }
    }

    /// One iteration of the event loop; exposed separately so tests can
    /// drive a bounded number of iterations.
    pub fn poll_once(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        self.poll.poll(&mut self.events, timeout)?;
        let now = Instant::now();

        let triggered: Vec<(Token, bool, bool)> = self
            .events
            .iter()
            .map(|event| (event.token(), event.is_readable(), event.is_writable()))
            .collect();

        for (token, readable, writable) in triggered {
            if token == LISTENER {
                if readable {
                    self.accept_all(now)?;
                }
                continue;
            }

            let index = token.0;
            if readable {
                self.handle_readable(index, now);
            }
            if writable && self.connections[index].is_some() {
                self.flush_writes(index, now);
            }
        }

        self.reschedule_writes(now);
        self.sweep_idle(now);

        Ok(())
    }

    fn accept_all(&mut self, now: Instant) -> io::Result<()> {
        loop {
            match self.listener.accept() {
                Ok((mut stream, addr)) => {
                    if self.active_count() >= self.config.max_connections {
                        drop(stream.shutdown(std::net::Shutdown::Both));
                        continue;
                    }

                    let index = match self.free.pop() {
                        Some(index) => index,
                        None => {
                            self.connections.push(None);
                            self.connections.len() - 1
                        }
                    };
                    let token = Token(index);
                    self.poll
                        .registry()
                        .register(&mut stream, token, Interest::READABLE | Interest::WRITABLE)?;
                    self.connections[index] = Some(PeerConnection::new(stream, addr, now));
                    slog::debug!(self.log, "connection accepted"; "context" => "accept", "addr" => %addr, "slot" => index);
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    fn active_count(&self) -> usize {
        self.connections.iter().filter(|c| c.is_some()).count()
    }

    fn handle_readable(&mut self, index: usize, now: Instant) {
        let commands_result = match self.connections[index].as_mut() {
            Some(connection) => connection.read_commands(now),
            None => return,
        };

        let mut close = false;
        let mut dirty_events = Vec::new();

        match commands_result {
            Ok(commands) => {
                for command in commands {
                    match self.apply(index, command, now) {
                        Outcome::Dirty(event) => dirty_events.push(event),
                        Outcome::CloseSelf => close = true,
                        Outcome::None => {}
                    }
                }
            }
            Err(NetworkError::Wait) => {}
            Err(err) => {
                slog::debug!(self.log, "read error, closing connection"; "context" => "handle_readable", "slot" => index, "err" => ?err);
                close = true;
            }
        }

        for event in dirty_events {
            self.broadcast_dirty(index, event);
        }

        if close {
            self.close_connection(index);
        }
    }

    fn apply(&mut self, index: usize, command: Inbound, now: Instant) -> Outcome {
        let ticks = self.ticks(now);

        match command {
            Inbound::NewPlayer => {
                let (num, _id) = self.registry.add_player(ticks);
                if let Some(connection) = self.connections[index].as_mut() {
                    connection.bind_new_player(num, &self.registry);
                }
                Outcome::None
            }
            Inbound::Reconnect { player_id } => match self.registry.bind_existing(player_id, ticks) {
                Some(num) => {
                    if let Some(connection) = self.connections[index].as_mut() {
                        connection.bind_reconnected_player(num, &self.registry);
                    }
                    Outcome::None
                }
                None => Outcome::CloseSelf,
            },
            Inbound::UpdatePosition { x, y, direction } => {
                let num = match self.connections[index].as_ref().and_then(|c| c.player_num) {
                    Some(num) => num,
                    None => return Outcome::CloseSelf,
                };
                match self.registry.update_position(num, x, y, direction, ticks) {
                    Some(event) => Outcome::Dirty(event),
                    None => Outcome::None,
                }
            }
            Inbound::KeepAlive => {
                if let Some(num) = self.connections[index].as_ref().and_then(|c| c.player_num) {
                    self.registry.touch(num, ticks);
                }
                Outcome::None
            }
            Inbound::Speech { payload } => {
                self.relay_speech(index, payload);
                Outcome::None
            }
        }
    }

    /// OR's the changed player's state into every other connection's dirty
    /// vector, per §4.3's "Dirty signal".
    fn broadcast_dirty(&mut self, origin: usize, event: DirtyEvent) {
        for (index, slot) in self.connections.iter_mut().enumerate() {
            if index == origin {
                continue;
            }
            if let Some(connection) = slot {
                connection.mark_dirty(event);
            }
        }
    }

    /// Resolves §9's open question: broadcasts `SPEECH_RLY(from_slot,
    /// payload)` to every other live connection, renumbering the sender's
    /// slot to exclude the recipient the same way `PLAYER_POSITION` does.
    fn relay_speech(&mut self, origin: usize, payload: Vec<u8>) {
        let from_slot = match self.connections[origin].as_ref().and_then(|c| c.player_num) {
            Some(slot) => slot,
            None => return,
        };

        for (index, slot) in self.connections.iter_mut().enumerate() {
            if index == origin {
                continue;
            }
            let connection = match slot {
                Some(connection) => connection,
                None => continue,
            };
            let recipient_own = connection.player_num;
            let renumbered = match recipient_own {
                Some(own) if from_slot > own => from_slot - 1,
                _ => from_slot,
            };
            let _ = connection.queue_immediate(&Command::SpeechRelay {
                slot: renumbered as u16,
                payload: payload.clone(),
            });
        }
    }

    fn flush_writes(&mut self, index: usize, now: Instant) {
        let result = match self.connections[index].as_mut() {
            Some(connection) => connection.flush(now),
            None => return,
        };
        if result.has_failed() {
            self.close_connection(index);
        }
    }

    /// Gives every connection with outstanding write work a chance to build
    /// its next batch of commands and flush them.
    fn reschedule_writes(&mut self, now: Instant) {
        let mut to_close = Vec::new();

        for index in 0..self.connections.len() {
            let needs = match self.connections[index].as_ref() {
                Some(connection) => connection.needs_write_poll(&self.registry),
                None => continue,
            };
            if !needs {
                continue;
            }

            let connection = self.connections[index].as_mut().unwrap();
            let fill_result = connection.fill_write_buf(&self.registry);
            if fill_result.has_failed() {
                to_close.push(index);
                continue;
            }

            let flush_result = connection.flush(now);
            if flush_result.has_failed() {
                to_close.push(index);
            }
        }

        for index in to_close {
            self.close_connection(index);
        }
    }

    fn sweep_idle(&mut self, now: Instant) {
        if now.duration_since(self.last_sweep) < Duration::from_secs(self.config.idle_sweep_secs) {
            return;
        }
        self.last_sweep = now;
        let ticks = self.ticks(now);
        let count = self.registry.count();
        for num in 0..count {
            if self.registry.is_collectible(num, ticks, self.config.idle_sweep_secs) {
                slog::trace!(self.log, "player collectible"; "context" => "sweep_idle", "num" => num);
            }
        }
    }

    fn close_connection(&mut self, index: usize) {
        if let Some(mut connection) = self.connections[index].take() {
            if let Some(num) = connection.player_num {
                self.registry.unref_player(num);
            }
            let _ = self.poll.registry().deregister(&mut connection.stream);
            connection.shutdown();
            self.free.push(index);
            slog::debug!(self.log, "connection closed"; "context" => "close_connection", "slot" => index);
        }
    }

    fn ticks(&self, now: Instant) -> u64 {
        now.duration_since(self.start).as_secs()
    }
}
