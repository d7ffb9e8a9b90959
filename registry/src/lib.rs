use std::collections::HashMap;

pub type PlayerId = u64;

/// Bits of `Player` state a connection's dirty vector can carry; currently
/// just position, but kept as a bitmask so new state groups slot in cleanly.
pub const STATE_POSITION: u8 = 0b0000_0001;

#[derive(Debug, Clone)]
pub struct Player {
    pub id: PlayerId,
    /// Stable for the life of the record; the slot index the wire protocol renumbers around.
    pub num: usize,
    pub x: u32,
    pub y: u32,
    pub direction: u16,
    ref_count: u32,
    last_update_time: u64,
}

impl Player {
    pub fn ref_count(&self) -> u32 {
        self.ref_count
    }

    pub fn last_update_time(&self) -> u64 {
        self.last_update_time
    }
}

/// Signals that `player_num`'s state changed by `mask`; the caller (the
/// server's connection table) is responsible for OR-ing this into every
/// other connection's dirty vector and clearing its `consistent` flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirtyEvent {
    pub player_num: usize,
    pub mask: u8,
}

/// Append-only, slot-indexed player store. Ids are looked up through a
/// hash index rather than the original's linear scan — an explicit
/// obvious-extension the upstream source itself flagged as a `FIXME`.
pub struct PlayerRegistry {
    players: Vec<Player>,
    by_id: HashMap<PlayerId, usize>,
    log: slog::Logger,
}

impl PlayerRegistry {
    pub fn new<'a, L: Into<Option<&'a slog::Logger>>>(log: L) -> PlayerRegistry {
        let log = match log.into() {
            Some(log) => log.new(slog::o!()),
            None => slog::Logger::root(slog::Discard, slog::o!()),
        };
        PlayerRegistry {
            players: Vec::new(),
            by_id: HashMap::new(),
            log,
        }
    }

    pub fn count(&self) -> usize {
        self.players.len()
    }

    /// Creates a new player record and returns its slot number and id.
    /// Ids are assigned a fresh random `u64` per connection; within-session
    /// uniqueness is all the protocol requires.
    pub fn add_player(&mut self, now: u64) -> (usize, PlayerId) {
        let id: PlayerId = rand::random();
        let num = self.players.len();

        self.players.push(Player {
            id,
            num,
            x: 0,
            y: 0,
            direction: 0,
            ref_count: 1,
            last_update_time: now,
        });
        self.by_id.insert(id, num);

        slog::trace!(self.log, "player added"; "context" => "add_player", "num" => num, "id" => id);
        (num, id)
    }

    pub fn get_by_id(&self, id: PlayerId) -> Option<&Player> {
        self.by_id.get(&id).map(|&num| &self.players[num])
    }

    pub fn get_by_num(&self, num: usize) -> Option<&Player> {
        self.players.get(num)
    }

    /// Binds an existing connection to `id`, bumping its reference count.
    /// Returns the slot number on success.
    pub fn bind_existing(&mut self, id: PlayerId, now: u64) -> Option<usize> {
        let num = *self.by_id.get(&id)?;
        let player = &mut self.players[num];
        player.ref_count += 1;
        player.last_update_time = now;
        slog::trace!(self.log, "player reconnected"; "context" => "bind_existing", "num" => num, "id" => id);
        Some(num)
    }

    pub fn ref_player(&mut self, num: usize) {
        if let Some(player) = self.players.get_mut(num) {
            player.ref_count += 1;
        }
    }

    pub fn unref_player(&mut self, num: usize) {
        if let Some(player) = self.players.get_mut(num) {
            player.ref_count = player.ref_count.saturating_sub(1);
        }
    }

    pub fn touch(&mut self, num: usize, now: u64) {
        if let Some(player) = self.players.get_mut(num) {
            player.last_update_time = now;
        }
    }

    pub fn update_position(&mut self, num: usize, x: u32, y: u32, direction: u16, now: u64) -> Option<DirtyEvent> {
        let player = self.players.get_mut(num)?;
        player.x = x;
        player.y = y;
        player.direction = direction;
        player.last_update_time = now;

        Some(DirtyEvent {
            player_num: num,
            mask: STATE_POSITION,
        })
    }

    /// Whether a record is a candidate for the idle sweep: unreferenced and
    /// untouched for at least `idle_threshold` seconds. Sweep policy
    /// (whether and how to actually remove records) is left to the caller.
    pub fn is_collectible(&self, num: usize, now: u64, idle_threshold: u64) -> bool {
        match self.players.get(num) {
            Some(player) => {
                player.ref_count == 0 && now.saturating_sub(player.last_update_time) >= idle_threshold
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_player_assigns_sequential_slots() {
        let mut registry = PlayerRegistry::new(None);
        let (num_a, id_a) = registry.add_player(0);
        let (num_b, id_b) = registry.add_player(0);

        assert_eq!(num_a, 0);
        assert_eq!(num_b, 1);
        assert_ne!(id_a, id_b);
        assert_eq!(registry.count(), 2);
    }

    #[test]
    fn test_get_by_id_and_num() {
        let mut registry = PlayerRegistry::new(None);
        let (num, id) = registry.add_player(10);

        assert_eq!(registry.get_by_id(id).unwrap().num, num);
        assert_eq!(registry.get_by_num(num).unwrap().id, id);
        assert!(registry.get_by_id(id + 1).is_none());
    }

    #[test]
    fn test_update_position_emits_dirty_event() {
        let mut registry = PlayerRegistry::new(None);
        let (num, _) = registry.add_player(0);

        let event = registry.update_position(num, 100, 200, 45, 5).unwrap();
        assert_eq!(event.player_num, num);
        assert_eq!(event.mask, STATE_POSITION);

        let player = registry.get_by_num(num).unwrap();
        assert_eq!((player.x, player.y, player.direction), (100, 200, 45));
        assert_eq!(player.last_update_time(), 5);
    }

    #[test]
    fn test_reconnect_bumps_ref_count() {
        let mut registry = PlayerRegistry::new(None);
        let (num, id) = registry.add_player(0);
        registry.unref_player(num);
        assert_eq!(registry.get_by_num(num).unwrap().ref_count(), 0);

        let rebound = registry.bind_existing(id, 1).unwrap();
        assert_eq!(rebound, num);
        assert_eq!(registry.get_by_num(num).unwrap().ref_count(), 1);
    }

    #[test]
    fn test_is_collectible() {
        let mut registry = PlayerRegistry::new(None);
        let (num, _) = registry.add_player(0);

        assert!(!registry.is_collectible(num, 1000, 60));

        registry.unref_player(num);
        assert!(!registry.is_collectible(num, 10, 60));
        assert!(registry.is_collectible(num, 61, 60));
    }

    #[test]
    fn test_bind_existing_unknown_id_returns_none() {
        let mut registry = PlayerRegistry::new(None);
        assert!(registry.bind_existing(0xDEAD_BEEF, 0).is_none());
    }
}
