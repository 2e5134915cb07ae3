//! Proximity-based recipient selection with a cached fast path
//!
//! For each source the router remembers the last computed recipient list.
//! The cache stays valid while the source has not moved, every cached
//! recipient's volume is within 0.01 of the cached value, and nobody new
//! has entered the 10-tile disc. Muted sources route to nobody, and audio
//! never crosses a level boundary.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use gridvoice_core::spatial;

use crate::player::Player;

const VOLUME_EPSILON: f32 = 0.01;

struct CacheEntry {
    level: String,
    pos: (u16, u16),
    recipients: Vec<(u32, f32)>,
}

#[derive(Default)]
pub struct SpatialRouter {
    cache: Mutex<HashMap<u32, CacheEntry>>,
}

impl SpatialRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Recipients of `source`'s audio with per-recipient volume.
    pub fn recipients(&self, source: &Player, players: &[Arc<Player>]) -> Vec<(u32, f32)> {
        if source.is_muted() {
            return Vec::new();
        }

        let source_pos = source.position();
        let origin = (source_pos.x, source_pos.y);

        let mut cache = self.cache.lock();
        if let Some(entry) = cache.get(&source.id) {
            if entry.level == source_pos.level
                && entry.pos == origin
                && Self::cache_still_valid(entry, source, players)
            {
                return entry.recipients.clone();
            }
        }

        let recipients = Self::compute(source, &source_pos.level, origin, players);
        cache.insert(
            source.id,
            CacheEntry {
                level: source_pos.level,
                pos: origin,
                recipients: recipients.clone(),
            },
        );
        recipients
    }

    fn cache_still_valid(entry: &CacheEntry, source: &Player, players: &[Arc<Player>]) -> bool {
        let (sx, sy) = entry.pos;

        // Every cached recipient must still exist, on the same level, at a
        // volume close to what was cached.
        for &(id, cached_volume) in &entry.recipients {
            let Some(player) = players.iter().find(|p| p.id == id) else {
                return false;
            };
            let pos = player.position();
            if pos.level != entry.level {
                return false;
            }
            let volume =
                spatial::volume(pos.x as i32 - sx as i32, pos.y as i32 - sy as i32);
            if (volume - cached_volume).abs() > VOLUME_EPSILON {
                return false;
            }
        }

        // Nobody outside the cached set may have entered the disc.
        for player in players {
            if player.id == source.id || entry.recipients.iter().any(|&(id, _)| id == player.id)
            {
                continue;
            }
            let pos = player.position();
            if pos.level != entry.level {
                continue;
            }
            if spatial::volume(pos.x as i32 - sx as i32, pos.y as i32 - sy as i32) > 0.0 {
                return false;
            }
        }

        true
    }

    fn compute(
        source: &Player,
        level: &str,
        (sx, sy): (u16, u16),
        players: &[Arc<Player>],
    ) -> Vec<(u32, f32)> {
        let mut recipients = Vec::new();
        for player in players {
            if player.id == source.id {
                continue;
            }
            let pos = player.position();
            if pos.level != level {
                continue;
            }
            let volume = spatial::volume(pos.x as i32 - sx as i32, pos.y as i32 - sy as i32);
            if volume > 0.0 {
                recipients.push((player.id, volume));
            }
        }
        recipients
    }

    /// Drop the cached list for one source (movement, disconnect).
    pub fn invalidate(&self, player_id: u32) {
        self.cache.lock().remove(&player_id);
    }

    /// Drop everything; used when membership changes.
    pub fn clear(&self) {
        self.cache.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player::Position;
    use tokio::sync::mpsc;

    fn player(id: u32, level: &str, x: u16, y: u16) -> Arc<Player> {
        let (tx, _rx) = mpsc::unbounded_channel();
        Player::new(
            id,
            format!("p{id}"),
            [id as u8; 32],
            Position {
                level: level.to_string(),
                x,
                y,
            },
            tx,
        )
    }

    #[test]
    fn adjacent_players_hear_at_full_volume() {
        let router = SpatialRouter::new();
        let a = player(1, "main", 5, 5);
        let b = player(2, "main", 6, 5);
        let players = vec![a.clone(), b.clone()];

        let recipients = router.recipients(&a, &players);
        assert_eq!(recipients, vec![(2, 1.0)]);
    }

    #[test]
    fn range_symmetry() {
        let router = SpatialRouter::new();
        let a = player(1, "main", 0, 0);
        let b = player(2, "main", 5, 0);
        let players = vec![a.clone(), b.clone()];

        let from_a = router.recipients(&a, &players);
        let from_b = router.recipients(&b, &players);
        assert_eq!(from_a.len(), 1);
        assert_eq!(from_b.len(), 1);
        assert!((from_a[0].1 - from_b[0].1).abs() < 1e-6);
    }

    #[test]
    fn distance_fade_scenario() {
        let router = SpatialRouter::new();
        let source = player(1, "main", 0, 0);
        let listener = player(2, "main", 5, 0);
        let players = vec![source.clone(), listener.clone()];

        let recipients = router.recipients(&source, &players);
        assert!((recipients[0].1 - 0.625).abs() < 1e-6);

        listener.set_position(8, 0);
        let recipients = router.recipients(&source, &players);
        assert!((recipients[0].1 - 0.25).abs() < 1e-6);

        listener.set_position(11, 0);
        assert!(router.recipients(&source, &players).is_empty());
    }

    #[test]
    fn muted_source_has_no_recipients() {
        let router = SpatialRouter::new();
        let a = player(1, "main", 5, 5);
        let b = player(2, "main", 6, 5);
        let players = vec![a.clone(), b];

        a.set_muted(true);
        assert!(router.recipients(&a, &players).is_empty());
        a.set_muted(false);
        assert_eq!(router.recipients(&a, &players).len(), 1);
    }

    #[test]
    fn cross_level_audio_never_routes() {
        let router = SpatialRouter::new();
        let a = player(1, "main", 5, 5);
        let b = player(2, "dungeon", 5, 5);
        let players = vec![a.clone(), b.clone()];

        assert!(router.recipients(&a, &players).is_empty());
        assert!(router.recipients(&b, &players).is_empty());
    }

    #[test]
    fn level_transition_empties_recipients() {
        let router = SpatialRouter::new();
        let a = player(1, "main", 5, 5);
        let b = player(2, "main", 6, 5);
        let players = vec![a.clone(), b.clone()];

        assert_eq!(router.recipients(&a, &players), vec![(2, 1.0)]);
        b.set_level("dungeon".into(), 10, 10);
        assert!(router.recipients(&a, &players).is_empty());
    }

    #[test]
    fn cache_invalidated_when_recipient_moves_enough() {
        let router = SpatialRouter::new();
        let a = player(1, "main", 0, 0);
        let b = player(2, "main", 5, 0);
        let players = vec![a.clone(), b.clone()];

        assert!((router.recipients(&a, &players)[0].1 - 0.625).abs() < 1e-6);
        b.set_position(6, 0);
        // 1 - 4/8 = 0.5, well beyond the 0.01 tolerance
        assert!((router.recipients(&a, &players)[0].1 - 0.5).abs() < 1e-6);
    }

    #[test]
    fn cache_invalidated_when_new_player_enters_disc() {
        let router = SpatialRouter::new();
        let a = player(1, "main", 0, 0);
        let b = player(2, "main", 3, 0);
        let c = player(3, "main", 50, 50);
        let players = vec![a.clone(), b, c.clone()];

        assert_eq!(router.recipients(&a, &players).len(), 1);
        c.set_position(0, 4);
        assert_eq!(router.recipients(&a, &players).len(), 2);
    }

    #[test]
    fn cache_invalidated_when_recipient_disconnects() {
        let router = SpatialRouter::new();
        let a = player(1, "main", 0, 0);
        let b = player(2, "main", 3, 0);

        assert_eq!(router.recipients(&a, &[a.clone(), b.clone()]).len(), 1);
        // b gone from the registry snapshot
        assert!(router.recipients(&a, &[a.clone()]).is_empty());
    }

    #[test]
    fn explicit_invalidation_forces_recompute() {
        let router = SpatialRouter::new();
        let a = player(1, "main", 0, 0);
        let b = player(2, "main", 3, 0);
        let players = vec![a.clone(), b.clone()];

        let first = router.recipients(&a, &players);
        router.invalidate(a.id);
        let second = router.recipients(&a, &players);
        assert_eq!(first, second);
    }
}
