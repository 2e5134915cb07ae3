//! Client-side view of the world
//!
//! Holds the current level grid, its tile set, the latest `WORLD_STATE`
//! snapshot, and the locally predicted position. Rendering front-ends read
//! this; the playback engine queries it for proximity volume.

use std::collections::HashMap;
use std::path::Path;

use gridvoice_core::level::Level;
use gridvoice_core::tiles::TileSet;
use gridvoice_protocol::PlayerSnapshot;

use crate::error::ClientError;

pub struct ClientWorld {
    pub level_name: String,
    pub level: Level,
    pub tiles: TileSet,
    /// Our locally predicted position
    pub x: u16,
    pub y: u16,
    /// Latest server snapshot of everyone, keyed by player id
    pub players: HashMap<u32, PlayerSnapshot>,
}

impl ClientWorld {
    pub fn new(level_name: String, level: Level, tiles: TileSet, x: u16, y: u16) -> Self {
        Self {
            level_name,
            level,
            tiles,
            x,
            y,
            players: HashMap::new(),
        }
    }

    pub fn is_walkable(&self, x: u16, y: u16) -> bool {
        self.level.is_walkable(x, y, &self.tiles)
    }

    pub fn apply_world_state(&mut self, players: Vec<PlayerSnapshot>) {
        self.players = players.into_iter().map(|p| (p.player_id, p)).collect();
    }

    pub fn remove_player(&mut self, player_id: u32) {
        self.players.remove(&player_id);
    }

    pub fn player_name(&self, player_id: u32) -> Option<&str> {
        self.players.get(&player_id).map(|p| p.name.as_str())
    }

    /// Swap in a freshly fetched level (door transition).
    pub fn switch_level(&mut self, name: String, level: Level, tiles: TileSet, x: u16, y: u16) {
        self.level_name = name;
        self.level = level;
        self.tiles = tiles;
        self.x = x;
        self.y = y;
    }
}

/// Load a materialized level directory: `level.txt` plus optional
/// `tiles.json` and `level.json`.
pub fn load_level_dir(dir: &Path) -> Result<(Level, TileSet), ClientError> {
    let grid = std::fs::read_to_string(dir.join("level.txt"))
        .map_err(|_| ClientError::Level("level.txt missing from level pack".into()))?;
    let mut level =
        Level::from_text(&grid).map_err(|e| ClientError::Level(format!("bad level.txt: {e}")))?;

    let tiles = match std::fs::read(dir.join("tiles.json")) {
        Ok(data) => TileSet::from_json(&data)
            .map_err(|e| ClientError::Level(format!("bad tiles.json: {e}")))?,
        Err(_) => TileSet::builtin(),
    };

    if let Ok(meta) = std::fs::read(dir.join("level.json")) {
        level
            .apply_metadata(&meta)
            .map_err(|e| ClientError::Level(format!("bad level.json: {e}")))?;
    }

    Ok((level, tiles))
}
