//! Level registry: loading, validation, and content-addressed delivery
//!
//! On startup every subdirectory of the levels directory is loaded as one
//! level: `level.txt` (required), `tiles.json` and `level.json` (optional),
//! plus any asset files. Every regular file is hashed with SHA-256 so
//! clients can fetch exactly the files their cache is missing. Levels are
//! immutable after startup; readers need no synchronisation.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;

use bytes::Bytes;
use sha2::{Digest, Sha256};

use gridvoice_core::level::Level;
use gridvoice_core::tiles::TileSet;

use crate::error::ServerError;

/// The level every server must ship and every player starts on.
pub const MAIN_LEVEL: &str = "main";

/// One loaded level: the parsed grid plus the raw files it was built from.
pub struct LoadedLevel {
    pub level: Level,
    pub tiles: TileSet,
    /// `relative_path -> contents`, exactly the files served to clients
    pub files: HashMap<String, Bytes>,
    /// `relative_path -> (sha256_hex, size)`; keys mirror `files`
    pub manifest: BTreeMap<String, (String, u64)>,
}

pub struct LevelRegistry {
    levels: HashMap<String, LoadedLevel>,
}

impl LevelRegistry {
    /// Load every level directory. Fails when the directory is missing,
    /// a level is inconsistent, or there is no `main` level.
    pub fn load(levels_dir: &Path) -> Result<Self, ServerError> {
        if !levels_dir.is_dir() {
            return Err(ServerError::Levels(format!(
                "levels directory not found: {}",
                levels_dir.display()
            )));
        }

        let mut levels = HashMap::new();
        for entry in fs::read_dir(levels_dir)? {
            let entry = entry?;
            if !entry.path().is_dir() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            let loaded = Self::load_level(&entry.path())
                .map_err(|e| ServerError::Levels(format!("level '{name}': {e}")))?;
            tracing::info!(
                level = %name,
                width = loaded.level.width,
                height = loaded.level.height,
                doors = loaded.level.doors.len(),
                files = loaded.files.len(),
                "loaded level"
            );
            levels.insert(name, loaded);
        }

        if !levels.contains_key(MAIN_LEVEL) {
            return Err(ServerError::Levels(format!(
                "required level '{MAIN_LEVEL}' not found in {}",
                levels_dir.display()
            )));
        }

        let registry = Self { levels };
        registry.validate_cross_level_doors()?;
        Ok(registry)
    }

    fn load_level(dir: &Path) -> Result<LoadedLevel, ServerError> {
        let mut files = HashMap::new();
        let mut manifest = BTreeMap::new();
        collect_files(dir, dir, &mut files, &mut manifest)?;

        let grid = files
            .get("level.txt")
            .ok_or_else(|| ServerError::Levels("level.txt not found".into()))?;
        let grid = std::str::from_utf8(grid)
            .map_err(|_| ServerError::Levels("level.txt is not UTF-8".into()))?;
        let mut level = Level::from_text(grid)?;

        let tiles = match files.get("tiles.json") {
            Some(data) => TileSet::from_json(data)?,
            None => TileSet::builtin(),
        };
        if let Some(meta) = files.get("level.json") {
            level.apply_metadata(meta)?;
        }
        level.validate(&tiles)?;

        Ok(LoadedLevel {
            level,
            tiles,
            files,
            manifest,
        })
    }

    /// Doors that cross levels can only be checked once every level is
    /// loaded: the target level must exist and the landing tile must be
    /// walkable there.
    fn validate_cross_level_doors(&self) -> Result<(), ServerError> {
        for (name, loaded) in &self.levels {
            for (&(x, y), door) in &loaded.level.doors {
                let Some(target_name) = door.target_level.as_deref() else {
                    continue;
                };
                let Some(target) = self.levels.get(target_name) else {
                    return Err(ServerError::Levels(format!(
                        "level '{name}': door at ({x}, {y}) targets unknown level '{target_name}'"
                    )));
                };
                if !target
                    .level
                    .is_walkable(door.target_x, door.target_y, &target.tiles)
                {
                    return Err(ServerError::Levels(format!(
                        "level '{name}': door at ({x}, {y}) lands on unwalkable ({}, {}) in '{target_name}'",
                        door.target_x, door.target_y
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&LoadedLevel> {
        self.levels.get(name)
    }

    pub fn main_level(&self) -> &LoadedLevel {
        &self.levels[MAIN_LEVEL]
    }

    pub fn contains(&self, name: &str) -> bool {
        self.levels.contains_key(name)
    }

    /// The manifest served for `LEVEL_MANIFEST_REQUEST`; empty for unknown
    /// levels, which the client surfaces as a level error.
    pub fn manifest(&self, name: &str) -> BTreeMap<String, (String, u64)> {
        self.levels
            .get(name)
            .map(|l| l.manifest.clone())
            .unwrap_or_default()
    }

    /// Exactly the requested files that exist; unknown paths are skipped.
    pub fn files(&self, name: &str, paths: &[String]) -> Vec<(String, Bytes)> {
        let Some(loaded) = self.levels.get(name) else {
            return Vec::new();
        };
        paths
            .iter()
            .filter_map(|path| {
                loaded
                    .files
                    .get(path)
                    .map(|contents| (path.clone(), contents.clone()))
            })
            .collect()
    }

    /// Spawn position on a named level.
    pub fn spawn(&self, name: &str) -> Option<(u16, u16)> {
        let loaded = self.levels.get(name)?;
        Some(loaded.level.spawn_position(&loaded.tiles))
    }

    /// True when `(x, y)` is a walkable tile of a loaded level. Used to
    /// decide whether a persisted position is still usable.
    pub fn is_walkable(&self, level: &str, x: u16, y: u16) -> bool {
        self.levels
            .get(level)
            .is_some_and(|l| l.level.is_walkable(x, y, &l.tiles))
    }
}

fn collect_files(
    root: &Path,
    dir: &Path,
    files: &mut HashMap<String, Bytes>,
    manifest: &mut BTreeMap<String, (String, u64)>,
) -> Result<(), ServerError> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            collect_files(root, &path, files, manifest)?;
            continue;
        }
        if !path.is_file() {
            continue;
        }
        let relative = path
            .strip_prefix(root)
            .expect("walked path is under root")
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        let contents = fs::read(&path)?;
        let hash = hex::encode(Sha256::digest(&contents));
        manifest.insert(relative.clone(), (hash, contents.len() as u64));
        files.insert(relative, Bytes::from(contents));
    }
    Ok(())
}
