//! Core types shared by the gridvoice server and client
//!
//! This crate provides the foundational pieces used across the workspace:
//! - World constants (audio framing, proximity distances, network defaults)
//! - Tile definitions and `tiles.json` parsing
//! - Level model with `level.txt` / `level.json` parsing and validation
//! - The proximity volume curve used for spatial audio routing
//! - Ed25519 identity helpers for the challenge/response handshake

pub mod constants;
pub mod crypto;
pub mod level;
pub mod spatial;
pub mod tiles;

pub use level::{DoorInfo, Level, LevelError, StreamInfo};
pub use spatial::volume;
pub use tiles::{TileDefinition, TileSet, TileSetError};
