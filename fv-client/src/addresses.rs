//! Address list with lazy resolution, round-robin cycling, and the
//! exponential round-wait backoff described in spec §4.5. Kept free of any
//! socket I/O so the cycling/backoff logic is unit-testable without a
//! network; only name resolution shells out to `ToSocketAddrs`.

use std::net::{SocketAddr, ToSocketAddrs};
use std::time::{Duration, Instant};

const INITIAL_ROUND_WAIT: Duration = Duration::from_millis(1000);
const MAX_ROUND_WAIT: Duration = Duration::from_millis(15000);

/// `DEFAULT_PORT` is unused directly here (callers already qualify a bare
/// host with one before pushing it), kept for symmetry with `config`.
fn split_host_port(name: &str, default_port: u16) -> String {
    if name.rsplit_once(':').is_some() {
        name.to_string()
    } else {
        format!("{}:{}", name, default_port)
    }
}

#[derive(Debug, Clone)]
enum Entry {
    Unresolved(String),
    Resolved(SocketAddr),
}

/// Ordered, append-only-until-resolved list of server addresses. Walks the
/// list round-robin; after a full pass with no successful connection the
/// caller is expected to have applied backoff via [`AddressList::poll_next`]
/// returning `None` until the current round wait elapses.
pub struct AddressList {
    entries: Vec<Entry>,
    cursor: usize,
    round_wait: Duration,
    next_allowed: Option<Instant>,
    default_port: u16,
}

impl AddressList {
    pub fn new(default_port: u16) -> AddressList {
        AddressList {
            entries: Vec::new(),
            cursor: 0,
            round_wait: INITIAL_ROUND_WAIT,
            next_allowed: None,
            default_port,
        }
    }

    /// Queues a host (bare name or `name:port`) for resolution. Mirrors the
    /// "addresses arrive via an API call; they join a queue" entry point;
    /// the caller is responsible for draining any cross-thread queue into
    /// this list before polling it.
    pub fn push_host(&mut self, host: &str) {
        self.entries.push(Entry::Unresolved(split_host_port(host, self.default_port)));
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Resets the round wait to its initial value; called on a successful
    /// connect per §4.5's "Connection attempt".
    pub fn reset_round_wait(&mut self) {
        self.round_wait = INITIAL_ROUND_WAIT;
        self.next_allowed = None;
    }

    /// Called on a failed/dropped connection; doubles the round wait
    /// (capped at 15s) so the *next* completed round waits longer, per
    /// §4.5's "Failure semantics".
    pub fn backoff(&mut self, now: Instant) {
        self.next_allowed = Some(now + self.round_wait);
        self.round_wait = (self.round_wait * 2).min(MAX_ROUND_WAIT);
    }

    /// Returns the next address to attempt, or `None` if the list is empty
    /// or the current round's backoff hasn't elapsed yet. Resolves
    /// unresolved entries lazily in place, splicing in one entry per
    /// resolved address family; unresolvable entries are dropped.
    pub fn poll_next(&mut self, now: Instant) -> Option<SocketAddr> {
        if self.entries.is_empty() {
            return None;
        }
        if let Some(at) = self.next_allowed {
            if now < at {
                return None;
            }
        }

        // Bounded by one full extra pass over the list: every iteration either
        // returns an address, removes an unresolvable entry, or wraps the
        // cursor (at most once without also shrinking the list).
        let mut wrapped_once = false;
        loop {
            if self.cursor >= self.entries.len() {
                if wrapped_once || self.entries.is_empty() {
                    return None;
                }
                wrapped_once = true;
                self.cursor = 0;
                self.on_round_complete(now);
                if let Some(at) = self.next_allowed {
                    if now < at {
                        return None;
                    }
                }
                continue;
            }

            match &self.entries[self.cursor] {
                Entry::Resolved(addr) => {
                    let addr = *addr;
                    self.cursor += 1;
                    return Some(addr);
                }
                Entry::Unresolved(name) => match name.to_socket_addrs() {
                    Ok(resolved) => {
                        let resolved: Vec<Entry> = resolved.map(Entry::Resolved).collect();
                        if resolved.is_empty() {
                            self.entries.remove(self.cursor);
                        } else {
                            self.entries.splice(self.cursor..self.cursor + 1, resolved);
                        }
                        // Don't advance the cursor; loop back to consume the
                        // entry we just replaced (or the one that slid into
                        // its place after removal).
                    }
                    Err(_) => {
                        self.entries.remove(self.cursor);
                    }
                },
            }
        }
    }

    fn on_round_complete(&mut self, now: Instant) {
        self.next_allowed = Some(now + self.round_wait);
        self.round_wait = (self.round_wait * 2).min(MAX_ROUND_WAIT);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_robin_over_resolved_entries() {
        let mut list = AddressList::new(9876);
        list.push_host("127.0.0.1:1001");
        list.push_host("127.0.0.1:1002");

        let now = Instant::now();
        let first = list.poll_next(now).unwrap();
        let second = list.poll_next(now).unwrap();
        assert_ne!(first, second);
        assert_eq!(first.port(), 1001);
        assert_eq!(second.port(), 1002);
    }

    #[test]
    fn test_wrap_applies_round_wait_backoff() {
        let mut list = AddressList::new(9876);
        list.push_host("127.0.0.1:1001");

        let t0 = Instant::now();
        assert!(list.poll_next(t0).is_some());
        // Second pass: wraps immediately (list len 1), applying the round wait.
        assert!(list.poll_next(t0).is_none(), "round wait should block an immediate retry");

        let t1 = t0 + INITIAL_ROUND_WAIT + Duration::from_millis(1);
        assert!(list.poll_next(t1).is_some());
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let mut list = AddressList::new(9876);
        list.push_host("127.0.0.1:1001");

        let mut now = Instant::now();
        list.backoff(now);
        assert_eq!(list.round_wait, INITIAL_ROUND_WAIT * 2);

        for _ in 0..10 {
            now += Duration::from_secs(60);
            list.backoff(now);
        }
        assert_eq!(list.round_wait, MAX_ROUND_WAIT);
    }

    #[test]
    fn test_reset_round_wait_on_success() {
        let mut list = AddressList::new(9876);
        list.backoff(Instant::now());
        list.backoff(Instant::now());
        assert!(list.round_wait > INITIAL_ROUND_WAIT);

        list.reset_round_wait();
        assert_eq!(list.round_wait, INITIAL_ROUND_WAIT);
        assert!(list.next_allowed.is_none());
    }

    #[test]
    fn test_empty_list_never_yields() {
        let mut list = AddressList::new(9876);
        assert!(list.poll_next(Instant::now()).is_none());
    }

    #[test]
    fn test_bare_host_gets_default_port() {
        let mut list = AddressList::new(9999);
        list.push_host("127.0.0.1");
        let addr = list.poll_next(Instant::now()).unwrap();
        assert_eq!(addr.port(), 9999);
    }
}
