//! Cross-thread state the UI/game thread writes and the network thread
//! drains: a mutex-protected local position and a queue of hosts to add.
//! `mio::Waker` serves as the wake-up signal, reusing the same mechanism
//! this crate's poll loop already depends on `mio` for.

use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, Default)]
struct Position {
    x: u32,
    y: u32,
    direction: u16,
    dirty: bool,
}

/// The local player's position, as last set by the UI/game thread. Cheap to
/// clone and share; the network thread drains it once per write cycle.
#[derive(Clone)]
pub struct SharedPosition {
    inner: Arc<Mutex<Position>>,
}

impl Default for SharedPosition {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedPosition {
    pub fn new() -> SharedPosition {
        SharedPosition {
            inner: Arc::new(Mutex::new(Position::default())),
        }
    }

    /// Called by the UI/game thread whenever the local player moves.
    pub fn set(&self, x: u32, y: u32, direction: u16) {
        let mut guard = self.inner.lock();
        *guard = Position { x, y, direction, dirty: true };
    }

    /// Drains the dirty flag; returns the new position only the first time
    /// it's observed after a `set`.
    pub fn take_if_dirty(&self) -> Option<(u32, u32, u16)> {
        let mut guard = self.inner.lock();
        if !guard.dirty {
            return None;
        }
        guard.dirty = false;
        Some((guard.x, guard.y, guard.direction))
    }
}

/// Queue of hosts to connect to, fed by the UI thread (or startup config)
/// and drained into the network thread's private `AddressList` once per
/// loop iteration.
#[derive(Clone, Default)]
pub struct HostQueue {
    inner: Arc<Mutex<Vec<String>>>,
}

impl HostQueue {
    pub fn new() -> HostQueue {
        HostQueue::default()
    }

    pub fn push(&self, host: String) {
        self.inner.lock().push(host);
    }

    /// Removes and returns every host queued since the last drain.
    pub fn drain(&self) -> Vec<String> {
        std::mem::take(&mut *self.inner.lock())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_position_reports_dirty_once() {
        let shared = SharedPosition::new();
        assert!(shared.take_if_dirty().is_none());

        shared.set(1, 2, 3);
        assert_eq!(shared.take_if_dirty(), Some((1, 2, 3)));
        assert!(shared.take_if_dirty().is_none());
    }

    #[test]
    fn test_host_queue_drains_and_empties() {
        let queue = HostQueue::new();
        queue.push("a.example.com".to_string());
        queue.push("b.example.com:1234".to_string());

        let drained = queue.drain();
        assert_eq!(drained, vec!["a.example.com", "b.example.com:1234"]);
        assert!(queue.drain().is_empty());
    }
}
