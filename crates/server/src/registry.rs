//! Server-wide player registry
//!
//! The accepting task inserts, only the owning session's teardown removes.
//! Everyone else takes snapshots; the lock is never held across an await.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use gridvoice_protocol::Message;

use crate::player::Player;

#[derive(Default)]
pub struct PlayerRegistry {
    players: RwLock<HashMap<u32, Arc<Player>>>,
    next_id: AtomicU32,
}

impl PlayerRegistry {
    pub fn new() -> Self {
        Self {
            players: RwLock::new(HashMap::new()),
            next_id: AtomicU32::new(1),
        }
    }

    /// Allocate a process-local player id.
    pub fn allocate_id(&self) -> u32 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Insert a player unless one with the same public key is already
    /// connected. The check and insert are atomic under the write lock.
    pub fn try_insert(&self, player: Arc<Player>) -> bool {
        let mut players = self.players.write();
        if players
            .values()
            .any(|p| p.public_key == player.public_key)
        {
            return false;
        }
        players.insert(player.id, player);
        true
    }

    pub fn remove(&self, id: u32) -> Option<Arc<Player>> {
        self.players.write().remove(&id)
    }

    pub fn get(&self, id: u32) -> Option<Arc<Player>> {
        self.players.read().get(&id).cloned()
    }

    pub fn snapshot(&self) -> Vec<Arc<Player>> {
        self.players.read().values().cloned().collect()
    }

    pub fn count(&self) -> usize {
        self.players.read().len()
    }

    /// The full `WORLD_STATE` message for broadcast.
    pub fn world_state(&self) -> Message {
        Message::WorldState {
            players: self
                .players
                .read()
                .values()
                .map(|p| p.snapshot())
                .collect(),
        }
    }

    pub fn broadcast(&self, message: &Message) {
        for player in self.players.read().values() {
            player.send(message.clone());
        }
    }

    pub fn broadcast_except(&self, except_id: u32, message: &Message) {
        for player in self.players.read().values() {
            if player.id != except_id {
                player.send(message.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player::Position;
    use tokio::sync::mpsc;

    fn player_with_key(id: u32, key: [u8; 32]) -> Arc<Player> {
        let (tx, _rx) = mpsc::unbounded_channel();
        Player::new(
            id,
            format!("p{id}"),
            key,
            Position {
                level: "main".into(),
                x: 0,
                y: 0,
            },
            tx,
        )
    }

    #[test]
    fn ids_are_unique_and_monotonic() {
        let registry = PlayerRegistry::new();
        let a = registry.allocate_id();
        let b = registry.allocate_id();
        assert!(b > a);
    }

    #[test]
    fn duplicate_key_rejected_while_connected() {
        let registry = PlayerRegistry::new();
        assert!(registry.try_insert(player_with_key(1, [9u8; 32])));
        assert!(!registry.try_insert(player_with_key(2, [9u8; 32])));
        // After the first player leaves, the key may reconnect
        registry.remove(1);
        assert!(registry.try_insert(player_with_key(3, [9u8; 32])));
    }

    #[test]
    fn world_state_covers_everyone() {
        let registry = PlayerRegistry::new();
        registry.try_insert(player_with_key(1, [1u8; 32]));
        registry.try_insert(player_with_key(2, [2u8; 32]));
        match registry.world_state() {
            Message::WorldState { players } => assert_eq!(players.len(), 2),
            _ => unreachable!(),
        }
    }
}
