//! The native client's network thread: owns one socket, the read/write
//! buffers (via `ClientSession`), the address list, and drives reconnection,
//! keep-alive, and speech transmission. Mirrors `fv_server::server::Server`'s
//! single-threaded event-loop style, but drives a single outbound connection
//! instead of fanning in many inbound ones.

use crate::addresses::AddressList;
use crate::config::{self, ClientConfig};
use crate::session::{ClientEvent, ClientSession, PersonView};
use crate::shared::{HostQueue, SharedPosition};
use fv_audio::AudioMixer;
use fv_bitset::BitSet;
use fv_buffer::{ErrorUtils, NetworkError};
use fv_voice::VoiceRecorder;
use mio::net::TcpStream;
use mio::{Events, Interest, Poll, Token, Waker};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const STREAM_TOKEN: Token = Token(0);
const WAKE_TOKEN: Token = Token(usize::MAX);

/// Creates the `Poll` the network thread will run and a `Waker` the caller
/// can hand out to other threads before the network thread exists, so a
/// voice recorder's notify callback can hold a waker before the thread
/// that owns the matching `Poll` has even started.
pub fn new_poll_and_waker() -> io::Result<(Poll, Arc<Waker>)> {
    let poll = Poll::new()?;
    let waker = Arc::new(Waker::new(poll.registry(), WAKE_TOKEN)?);
    Ok((poll, waker))
}

/// The handle given to the UI/game thread: everything it needs to drive the
/// network thread without touching its internals.
#[derive(Clone)]
pub struct ClientHandle {
    position: SharedPosition,
    hosts: HostQueue,
    waker: Arc<Waker>,
}

impl ClientHandle {
    pub fn set_position(&self, x: u32, y: u32, direction: u16) {
        self.position.set(x, y, direction);
        let _ = self.waker.wake();
    }

    pub fn add_host<S: Into<String>>(&self, host: S) {
        self.hosts.push(host.into());
        let _ = self.waker.wake();
    }
}

/// Players visible to the local client, as last delivered in a consistent
/// frame; handed to the `on_consistent` callback.
pub type ConsistentView<'a> = (&'a [PersonView], &'a BitSet);

enum Phase {
    /// No socket; waiting for the address list's round wait / next entry.
    Idle,
    /// `connect()` issued; waiting for writability to learn the outcome.
    Connecting { stream: TcpStream, addr: SocketAddr },
    /// Connected and WebSocket-upgraded (or upgrading); protocol live.
    Connected { stream: TcpStream, session: ClientSession },
}

pub struct NetworkClient {
    poll: Poll,
    events: Events,
    phase: Phase,
    addresses: AddressList,
    hosts: HostQueue,
    position: SharedPosition,
    saved_id: Option<u64>,
    saved_id_path: String,
    keep_alive_secs: u64,
    recorder: Option<Arc<VoiceRecorder>>,
    mixer: Option<Arc<AudioMixer>>,
    on_consistent: Box<dyn Fn(ConsistentView) + Send>,
    log: slog::Logger,
}

impl NetworkClient {
    fn new(
        poll: Poll,
        config: ClientConfig,
        log: slog::Logger,
        recorder: Option<Arc<VoiceRecorder>>,
        mixer: Option<Arc<AudioMixer>>,
        position: SharedPosition,
        hosts: HostQueue,
        on_consistent: Box<dyn Fn(ConsistentView) + Send>,
    ) -> NetworkClient {
        let saved_id = config::load_saved_id(&config.saved_id_path);
        let mut addresses = AddressList::new(config::DEFAULT_PORT);
        for host in hosts.drain() {
            addresses.push_host(&host);
        }

        NetworkClient {
            poll,
            events: Events::with_capacity(128),
            phase: Phase::Idle,
            addresses,
            hosts,
            position,
            saved_id,
            saved_id_path: config.saved_id_path,
            keep_alive_secs: config.keep_alive_secs,
            recorder,
            mixer,
            on_consistent,
            log,
        }
    }

    /// Spawns the network thread and returns a handle the caller uses to
    /// push position updates and extra hosts in.
    #[allow(clippy::too_many_arguments)]
    pub fn spawn(
        poll: Poll,
        waker: Arc<Waker>,
        config: ClientConfig,
        log: slog::Logger,
        recorder: Option<Arc<VoiceRecorder>>,
        mixer: Option<Arc<AudioMixer>>,
        on_consistent: Box<dyn Fn(ConsistentView) + Send>,
    ) -> (ClientHandle, JoinHandle<()>) {
        let position = SharedPosition::new();
        let hosts = HostQueue::new();
        for host in &config.hosts {
            hosts.push(host.clone());
        }

        let handle = ClientHandle {
            position: position.clone(),
            hosts: hosts.clone(),
            waker,
        };

        let join = thread::spawn(move || {
            let mut client = NetworkClient::new(poll, config, log, recorder, mixer, position, hosts, on_consistent);
            client.run();
        });

        (handle, join)
    }

    pub fn run(&mut self) {
        loop {
            if let Err(err) = self.poll_once(Duration::from_millis(200)) {
                slog::warn!(self.log, "poll error"; "context" => "run", "err" => %err);
            }
        }
    }

    /// One iteration of the loop; exposed separately so tests can drive a
    /// bounded number of iterations against a fake clock-adjacent path.
    fn poll_once(&mut self, timeout: Duration) -> io::Result<()> {
        self.drain_hosts();

        let now = Instant::now();
        self.maybe_connect(now)?;

        self.poll.poll(&mut self.events, Some(timeout))?;
        let triggered: Vec<(Token, bool, bool, bool)> = self
            .events
            .iter()
            .map(|e| (e.token(), e.is_readable(), e.is_writable(), e.is_error()))
            .collect();

        for (token, readable, writable, errored) in triggered {
            if token == WAKE_TOKEN {
                continue;
            }
            if token == STREAM_TOKEN {
                self.handle_stream_event(Instant::now(), readable, writable, errored);
            }
        }

        self.drive_writes(Instant::now());
        Ok(())
    }

    fn drain_hosts(&mut self) {
        for host in self.hosts.drain() {
            self.addresses.push_host(&host);
        }
    }

    fn maybe_connect(&mut self, now: Instant) -> io::Result<()> {
        if !matches!(self.phase, Phase::Idle) {
            return Ok(());
        }
        let addr = match self.addresses.poll_next(now) {
            Some(addr) => addr,
            None => return Ok(()),
        };

        let mut stream = match TcpStream::connect(addr) {
            Ok(stream) => stream,
            Err(err) => {
                slog::debug!(self.log, "connect() failed synchronously"; "context" => "maybe_connect", "addr" => %addr, "err" => %err);
                self.addresses.backoff(now);
                return Ok(());
            }
        };
        self.poll
            .registry()
            .register(&mut stream, STREAM_TOKEN, Interest::READABLE | Interest::WRITABLE)?;
        slog::debug!(self.log, "connecting"; "context" => "maybe_connect", "addr" => %addr);
        self.phase = Phase::Connecting { stream, addr };
        Ok(())
    }

    fn handle_stream_event(&mut self, now: Instant, readable: bool, writable: bool, errored: bool) {
        let phase = std::mem::replace(&mut self.phase, Phase::Idle);

        match phase {
            Phase::Idle => {}
            Phase::Connecting { mut stream, addr } => {
                if errored || stream.take_error().ok().flatten().is_some() {
                    slog::debug!(self.log, "connect failed"; "context" => "handle_stream_event", "addr" => %addr);
                    self.fail_connection(stream, now);
                    return;
                }
                if writable {
                    self.addresses.reset_round_wait();
                    let mut session = ClientSession::new(self.saved_id, now);
                    let request = ClientSession::handshake_request(&addr.to_string());
                    if !session.queue_raw(&request) {
                        slog::warn!(self.log, "handshake request too large for write buffer"; "context" => "handle_stream_event");
                    }
                    slog::info!(self.log, "connected"; "context" => "handle_stream_event", "addr" => %addr);
                    self.phase = Phase::Connected { stream, session };
                } else {
                    self.phase = Phase::Connecting { stream, addr };
                }
            }
            Phase::Connected { mut stream, mut session } => {
                if errored {
                    self.fail_connection(stream, now);
                    return;
                }
                if readable {
                    match session.handle_read(&mut stream) {
                        Ok(events) => self.apply_events(events, &mut session),
                        Err(NetworkError::Wait) => {}
                        Err(_) => {
                            self.fail_connection(stream, now);
                            return;
                        }
                    }
                }
                let _ = session.flush(&mut stream, now);
                self.phase = Phase::Connected { stream, session };
            }
        }
    }

    fn apply_events(&mut self, events: Vec<ClientEvent>, session: &mut ClientSession) {
        for event in events {
            match event {
                ClientEvent::PlayerId(id) => {
                    self.saved_id = Some(id);
                    config::save_id(&self.saved_id_path, id);
                }
                ClientEvent::Consistent => {
                    (self.on_consistent)((session.players(), session.dirty_bits()));
                    session.clear_dirty();
                }
                ClientEvent::Speech { slot, payload } => {
                    if let Some(mixer) = &self.mixer {
                        let _ = mixer.add_packet(slot as u32, &payload);
                    }
                }
            }
        }
    }

    fn drive_writes(&mut self, now: Instant) {
        let phase = std::mem::replace(&mut self.phase, Phase::Idle);
        match phase {
            Phase::Connected { mut stream, mut session } => {
                if let Some((x, y, direction)) = self.position.take_if_dirty() {
                    session.mark_position_dirty(x, y, direction);
                }

                if session.needs_write_poll(now, self.keep_alive_secs) {
                    let recorder = self.recorder.as_deref();
                    match session.fill_write_buf(recorder, now, self.keep_alive_secs) {
                        Ok(()) | Err(NetworkError::Wait) => {}
                        Err(_) => {
                            self.fail_connection(stream, now);
                            return;
                        }
                    }
                    if session.flush(&mut stream, now).has_failed() {
                        self.fail_connection(stream, now);
                        return;
                    }
                }
                self.phase = Phase::Connected { stream, session };
            }
            other => self.phase = other,
        }
    }

    fn fail_connection(&mut self, mut stream: TcpStream, now: Instant) {
        let _ = self.poll.registry().deregister(&mut stream);
        self.addresses.backoff(now);
        self.phase = Phase::Idle;
    }
}
