//! Tile definitions with visual and gameplay properties
//!
//! Levels ship a `tiles.json` describing every tile character; a built-in
//! table covers levels that do not. `blocks_sight` and `blocks_sound`
//! default to the inverse of `walkable` when a definition omits them.

use std::collections::HashMap;

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TileSetError {
    #[error("invalid tiles.json: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("tile key {0:?} is not a single character")]
    BadTileKey(String),
}

/// Definition for a tile type.
#[derive(Debug, Clone, PartialEq)]
pub struct TileDefinition {
    pub symbol: char,
    pub walkable: bool,
    pub color: String,
    pub name: String,
    pub walking_sound: Option<String>,
    pub nearby_sound: Option<String>,
    pub animation_colors: Vec<String>,
    pub blocks_sight: bool,
    pub blocks_sound: bool,
    pub is_door: bool,
    pub is_spawn: bool,
    pub render_char: Option<char>,
}

impl TileDefinition {
    fn from_raw(symbol: char, raw: RawTile) -> Self {
        Self {
            symbol,
            walkable: raw.walkable,
            blocks_sight: raw.blocks_sight.unwrap_or(!raw.walkable),
            blocks_sound: raw.blocks_sound.unwrap_or(!raw.walkable),
            color: raw.color,
            name: raw.name,
            walking_sound: raw.walking_sound,
            nearby_sound: raw.nearby_sound,
            animation_colors: raw.animation_colors.unwrap_or_default(),
            is_door: raw.is_door,
            is_spawn: raw.is_spawn,
            render_char: raw.render_char,
        }
    }

    fn simple(symbol: char, walkable: bool, color: &str, name: &str) -> Self {
        Self {
            symbol,
            walkable,
            color: color.to_string(),
            name: name.to_string(),
            walking_sound: None,
            nearby_sound: None,
            animation_colors: Vec::new(),
            blocks_sight: !walkable,
            blocks_sound: !walkable,
            is_door: false,
            is_spawn: false,
            render_char: None,
        }
    }
}

/// On-disk shape of a single `tiles.json` entry.
#[derive(Debug, Deserialize)]
struct RawTile {
    walkable: bool,
    color: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    walking_sound: Option<String>,
    #[serde(default)]
    nearby_sound: Option<String>,
    #[serde(default)]
    animation_colors: Option<Vec<String>>,
    #[serde(default)]
    blocks_sight: Option<bool>,
    #[serde(default)]
    blocks_sound: Option<bool>,
    #[serde(default)]
    is_door: bool,
    #[serde(default)]
    is_spawn: bool,
    #[serde(default)]
    render_char: Option<char>,
}

#[derive(Debug, Deserialize)]
struct RawDefault {
    symbol: char,
    walkable: bool,
    color: String,
}

#[derive(Debug, Deserialize)]
struct RawTilesFile {
    tiles: HashMap<String, RawTile>,
    default: RawDefault,
}

/// The tile table for one level.
#[derive(Debug, Clone)]
pub struct TileSet {
    tiles: HashMap<char, TileDefinition>,
    default: TileDefinition,
}

impl TileSet {
    /// Parse a `tiles.json` document.
    pub fn from_json(data: &[u8]) -> Result<Self, TileSetError> {
        let raw: RawTilesFile = serde_json::from_slice(data)?;
        let mut tiles = HashMap::with_capacity(raw.tiles.len());
        for (key, tile) in raw.tiles {
            let mut chars = key.chars();
            let symbol = match (chars.next(), chars.next()) {
                (Some(c), None) => c,
                _ => return Err(TileSetError::BadTileKey(key)),
            };
            tiles.insert(symbol, TileDefinition::from_raw(symbol, tile));
        }
        let default = TileDefinition::simple(
            raw.default.symbol,
            raw.default.walkable,
            &raw.default.color,
            "",
        );
        Ok(Self { tiles, default })
    }

    /// The built-in table used when a level ships no `tiles.json`.
    pub fn builtin() -> Self {
        let defs = [
            TileDefinition::simple('.', true, "white", "floor"),
            TileDefinition::simple('#', false, "bright_white", "wall"),
            TileDefinition::simple(' ', false, "black", "void"),
            TileDefinition {
                is_door: true,
                ..TileDefinition::simple('+', true, "yellow", "door")
            },
            TileDefinition {
                animation_colors: vec!["blue".into(), "cyan".into()],
                blocks_sight: false,
                ..TileDefinition::simple('~', false, "blue", "water")
            },
        ];
        Self {
            tiles: defs.into_iter().map(|t| (t.symbol, t)).collect(),
            default: TileDefinition::simple('.', true, "white", ""),
        }
    }

    /// Definition for a tile character, falling back to the default tile.
    pub fn get(&self, symbol: char) -> &TileDefinition {
        self.tiles.get(&symbol).unwrap_or(&self.default)
    }

    pub fn is_walkable(&self, symbol: char) -> bool {
        self.get(symbol).walkable
    }

    pub fn is_door(&self, symbol: char) -> bool {
        self.get(symbol).is_door
    }

    pub fn blocks_sound(&self, symbol: char) -> bool {
        self.get(symbol).blocks_sound
    }

    /// Iterate all explicitly defined tiles.
    pub fn iter(&self) -> impl Iterator<Item = &TileDefinition> {
        self.tiles.values()
    }
}
