//! File-based identity and player-state storage
//!
//! ```text
//! <data_dir>/users/<name>/
//!   pub          # 32 raw bytes, Ed25519 public key
//!   state.json   # { "x": 10, "y": 5, "level": "main" }
//! ```
//!
//! Registration is first-seen-wins on the name; the `name -> key` binding
//! never changes afterwards. State writes go through a temp file plus
//! rename so a crash cannot leave a torn `state.json`.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Last known position of a player, persisted on disconnect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerState {
    pub x: u16,
    pub y: u16,
    pub level: String,
}

/// Registry of `name <-> public_key` bindings and per-player state.
pub struct IdentityStore {
    users_dir: PathBuf,
}

impl IdentityStore {
    pub fn open(data_dir: &Path) -> io::Result<Self> {
        let users_dir = data_dir.join("users");
        fs::create_dir_all(&users_dir)?;
        Ok(Self { users_dir })
    }

    fn user_dir(&self, name: &str) -> PathBuf {
        self.users_dir.join(name)
    }

    /// The registered key for a name, if any.
    pub fn public_key(&self, name: &str) -> Option<[u8; 32]> {
        let bytes = fs::read(self.user_dir(name).join("pub")).ok()?;
        bytes.try_into().ok()
    }

    /// Reverse lookup: the name registered for a key, if any.
    pub fn name_for_key(&self, public_key: &[u8; 32]) -> Option<String> {
        let entries = fs::read_dir(&self.users_dir).ok()?;
        for entry in entries.flatten() {
            if !entry.path().is_dir() {
                continue;
            }
            if let Ok(bytes) = fs::read(entry.path().join("pub")) {
                if bytes.as_slice() == public_key {
                    return entry.file_name().into_string().ok();
                }
            }
        }
        None
    }

    /// Register a new `name -> key` binding. Returns false when the name is
    /// already taken.
    pub fn register(&self, name: &str, public_key: &[u8; 32]) -> io::Result<bool> {
        let dir = self.user_dir(name);
        if dir.exists() {
            return Ok(false);
        }
        fs::create_dir_all(&dir)?;
        fs::write(dir.join("pub"), public_key)?;
        tracing::info!(%name, "registered new player identity");
        Ok(true)
    }

    /// Saved state for a registered player. Corrupt files read as absent.
    pub fn player_state(&self, name: &str) -> Option<PlayerState> {
        let data = fs::read(self.user_dir(name).join("state.json")).ok()?;
        serde_json::from_slice(&data).ok()
    }

    /// Persist a player's last known position, atomically.
    pub fn save_player_state(&self, name: &str, state: &PlayerState) -> io::Result<()> {
        let dir = self.user_dir(name);
        if !dir.exists() {
            return Ok(());
        }
        let json = serde_json::to_vec(state)?;
        let tmp = dir.join("state.json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, dir.join("state.json"))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (TempDir, IdentityStore) {
        let dir = TempDir::new().unwrap();
        let store = IdentityStore::open(dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn register_and_lookup() {
        let (_dir, store) = store();
        let key = [7u8; 32];
        assert!(store.register("alice", &key).unwrap());
        assert_eq!(store.public_key("alice"), Some(key));
        assert_eq!(store.name_for_key(&key).as_deref(), Some("alice"));
        assert_eq!(store.public_key("bob"), None);
        assert_eq!(store.name_for_key(&[8u8; 32]), None);
    }

    #[test]
    fn name_is_first_seen_wins() {
        let (_dir, store) = store();
        assert!(store.register("alice", &[1u8; 32]).unwrap());
        assert!(!store.register("alice", &[2u8; 32]).unwrap());
        assert_eq!(store.public_key("alice"), Some([1u8; 32]));
    }

    #[test]
    fn state_roundtrip() {
        let (_dir, store) = store();
        store.register("alice", &[1u8; 32]).unwrap();
        assert_eq!(store.player_state("alice"), None);

        let state = PlayerState {
            x: 12,
            y: 8,
            level: "dungeon".into(),
        };
        store.save_player_state("alice", &state).unwrap();
        assert_eq!(store.player_state("alice"), Some(state));
    }

    #[test]
    fn state_for_unregistered_player_is_not_written() {
        let (dir, store) = store();
        store
            .save_player_state(
                "ghost",
                &PlayerState {
                    x: 0,
                    y: 0,
                    level: "main".into(),
                },
            )
            .unwrap();
        assert!(!dir.path().join("users/ghost").exists());
    }

    #[test]
    fn corrupt_state_reads_as_absent() {
        let (dir, store) = store();
        store.register("alice", &[1u8; 32]).unwrap();
        std::fs::write(dir.path().join("users/alice/state.json"), b"not json").unwrap();
        assert_eq!(store.player_state("alice"), None);
    }
}
