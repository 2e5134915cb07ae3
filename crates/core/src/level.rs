//! Level model: an ASCII tile grid plus door/stream metadata
//!
//! The on-disk form is a directory with `level.txt` (the grid), an optional
//! `tiles.json` and an optional `level.json` carrying doors and ambient
//! stream sources. `S` cells in the grid are collected as spawn points and
//! replaced with floor.

use std::collections::HashMap;

use serde::Deserialize;
use thiserror::Error;

use crate::tiles::TileSet;

#[derive(Debug, Error)]
pub enum LevelError {
    #[error("level is empty")]
    Empty,
    #[error("level grid is not ASCII")]
    NotAscii,
    #[error("level too large: {width}x{height}")]
    TooLarge { width: usize, height: usize },
    #[error("invalid level.json: {0}")]
    Meta(#[from] serde_json::Error),
    #[error("door at ({x}, {y}) is not on a door tile")]
    DoorOffDoorTile { x: u16, y: u16 },
    #[error("door tile at ({x}, {y}) has no door entry")]
    DoorTileWithoutEntry { x: u16, y: u16 },
    #[error("door at ({x}, {y}) targets unwalkable ({tx}, {ty})")]
    DoorTargetBlocked { x: u16, y: u16, tx: u16, ty: u16 },
    #[error("wire grid is {got} bytes, expected {expected}")]
    WireSize { got: usize, expected: usize },
}

/// A door or teleporter at a specific tile.
///
/// `target_level == None` means an intra-level teleporter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DoorInfo {
    pub target_level: Option<String>,
    pub target_x: u16,
    pub target_y: u16,
}

/// An ambient audio stream anchored to a tile.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamInfo {
    pub url: String,
    pub radius: u16,
}

#[derive(Debug, Deserialize)]
struct DoorRecord {
    x: u16,
    y: u16,
    #[serde(default)]
    target_level: Option<String>,
    target_x: u16,
    target_y: u16,
}

fn default_stream_radius() -> u16 {
    5
}

#[derive(Debug, Deserialize)]
struct StreamRecord {
    x: u16,
    y: u16,
    url: String,
    #[serde(default = "default_stream_radius")]
    radius: u16,
}

#[derive(Debug, Deserialize, Default)]
struct LevelMeta {
    #[serde(default)]
    doors: Vec<DoorRecord>,
    #[serde(default)]
    streams: Vec<StreamRecord>,
}

/// A parsed game level. Immutable after loading.
#[derive(Debug, Clone)]
pub struct Level {
    pub width: u16,
    pub height: u16,
    tiles: Vec<u8>,
    pub spawn_positions: Vec<(u16, u16)>,
    pub doors: HashMap<(u16, u16), DoorInfo>,
    pub streams: HashMap<(u16, u16), StreamInfo>,
}

impl Level {
    /// Parse a `level.txt` grid. Rows are padded to the widest line with
    /// void; `S` cells become spawn points on floor.
    pub fn from_text(content: &str) -> Result<Self, LevelError> {
        if !content.is_ascii() {
            return Err(LevelError::NotAscii);
        }
        let lines: Vec<&str> = content.trim_end_matches('\n').split('\n').collect();
        let height = lines.len();
        let width = lines.iter().map(|l| l.len()).max().unwrap_or(0);
        if width == 0 || height == 0 {
            return Err(LevelError::Empty);
        }
        if width > u16::MAX as usize || height > u16::MAX as usize {
            return Err(LevelError::TooLarge { width, height });
        }

        let mut tiles = Vec::with_capacity(width * height);
        let mut spawn_positions = Vec::new();
        for (y, line) in lines.iter().enumerate() {
            let row = line.as_bytes();
            for x in 0..width {
                let mut tile = *row.get(x).unwrap_or(&b' ');
                if tile == b'S' {
                    spawn_positions.push((x as u16, y as u16));
                    tile = b'.';
                }
                tiles.push(tile);
            }
        }

        Ok(Self {
            width: width as u16,
            height: height as u16,
            tiles,
            spawn_positions,
            doors: HashMap::new(),
            streams: HashMap::new(),
        })
    }

    /// Merge door and stream metadata from a `level.json` document.
    pub fn apply_metadata(&mut self, data: &[u8]) -> Result<(), LevelError> {
        let meta: LevelMeta = serde_json::from_slice(data)?;
        for door in meta.doors {
            self.doors.insert(
                (door.x, door.y),
                DoorInfo {
                    target_level: door.target_level,
                    target_x: door.target_x,
                    target_y: door.target_y,
                },
            );
        }
        for stream in meta.streams {
            self.streams.insert(
                (stream.x, stream.y),
                StreamInfo {
                    url: stream.url,
                    radius: stream.radius,
                },
            );
        }
        Ok(())
    }

    /// Rebuild a level from the wire form carried by `SERVER_HELLO`:
    /// `width * height` ASCII codes, row-major, no metadata.
    pub fn from_wire(width: u16, height: u16, tiles: &[u8]) -> Result<Self, LevelError> {
        let expected = width as usize * height as usize;
        if tiles.len() != expected {
            return Err(LevelError::WireSize {
                got: tiles.len(),
                expected,
            });
        }
        if !tiles.is_ascii() {
            return Err(LevelError::NotAscii);
        }
        Ok(Self {
            width,
            height,
            tiles: tiles.to_vec(),
            spawn_positions: Vec::new(),
            doors: HashMap::new(),
            streams: HashMap::new(),
        })
    }

    /// The grid as sent in `SERVER_HELLO`.
    pub fn wire_tiles(&self) -> &[u8] {
        &self.tiles
    }

    /// Tile character at a position; void for out-of-bounds.
    pub fn tile_at(&self, x: u16, y: u16) -> char {
        if x >= self.width || y >= self.height {
            return ' ';
        }
        self.tiles[y as usize * self.width as usize + x as usize] as char
    }

    pub fn in_bounds(&self, x: u16, y: u16) -> bool {
        x < self.width && y < self.height
    }

    pub fn is_walkable(&self, x: u16, y: u16, tiles: &TileSet) -> bool {
        self.in_bounds(x, y) && tiles.is_walkable(self.tile_at(x, y))
    }

    pub fn door_at(&self, x: u16, y: u16) -> Option<&DoorInfo> {
        self.doors.get(&(x, y))
    }

    /// Pick a spawn position: a random spawn cell when the level has them,
    /// otherwise the first walkable tile, otherwise the center.
    pub fn spawn_position(&self, tiles: &TileSet) -> (u16, u16) {
        if !self.spawn_positions.is_empty() {
            let idx = rand::random::<usize>() % self.spawn_positions.len();
            return self.spawn_positions[idx];
        }
        for y in 0..self.height {
            for x in 0..self.width {
                if self.is_walkable(x, y, tiles) {
                    return (x, y);
                }
            }
        }
        (self.width / 2, self.height / 2)
    }

    /// Check internal consistency against the level's tile set:
    /// every door entry sits on a door tile, every door tile has an entry,
    /// and intra-level destinations are in bounds and walkable. Cross-level
    /// destinations are checked by the registry once all levels are loaded.
    pub fn validate(&self, tiles: &TileSet) -> Result<(), LevelError> {
        for (&(x, y), door) in &self.doors {
            if !tiles.is_door(self.tile_at(x, y)) {
                return Err(LevelError::DoorOffDoorTile { x, y });
            }
            if door.target_level.is_none()
                && !self.is_walkable(door.target_x, door.target_y, tiles)
            {
                return Err(LevelError::DoorTargetBlocked {
                    x,
                    y,
                    tx: door.target_x,
                    ty: door.target_y,
                });
            }
        }
        for y in 0..self.height {
            for x in 0..self.width {
                if tiles.is_door(self.tile_at(x, y)) && !self.doors.contains_key(&(x, y)) {
                    return Err(LevelError::DoorTileWithoutEntry { x, y });
                }
            }
        }
        Ok(())
    }
}
