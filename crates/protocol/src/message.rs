//! Typed messages and the byte-level codec
//!
//! Each message type has a symmetric encode/decode pair; `decode(encode(m))`
//! yields `m` for every valid message. Decoders validate lengths before
//! allocating and never panic on malformed input.

use std::collections::BTreeMap;

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::ProtocolError;

/// Wire identifiers for every recognised message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    ServerHello = 0x02,
    PositionUpdate = 0x03,
    WorldState = 0x04,
    AudioFrame = 0x05,
    PlayerJoined = 0x06,
    PlayerLeft = 0x07,
    MuteStatus = 0x08,
    PositionAck = 0x09,
    LevelPackRequest = 0x10,
    LevelPackData = 0x11,
    DoorTransition = 0x12,
    LevelManifestRequest = 0x13,
    LevelManifest = 0x14,
    LevelFilesRequest = 0x15,
    LevelFilesData = 0x16,
    AuthChallenge = 0x20,
    AuthResponse = 0x21,
    AuthResult = 0x22,
    Ping = 0x30,
    Pong = 0x31,
    WebRtcOffer = 0x40,
    WebRtcAnswer = 0x41,
    WebRtcIce = 0x42,
    AudioTrackMap = 0x43,
}

impl TryFrom<u8> for MessageType {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, ProtocolError> {
        Ok(match value {
            0x02 => Self::ServerHello,
            0x03 => Self::PositionUpdate,
            0x04 => Self::WorldState,
            0x05 => Self::AudioFrame,
            0x06 => Self::PlayerJoined,
            0x07 => Self::PlayerLeft,
            0x08 => Self::MuteStatus,
            0x09 => Self::PositionAck,
            0x10 => Self::LevelPackRequest,
            0x11 => Self::LevelPackData,
            0x12 => Self::DoorTransition,
            0x13 => Self::LevelManifestRequest,
            0x14 => Self::LevelManifest,
            0x15 => Self::LevelFilesRequest,
            0x16 => Self::LevelFilesData,
            0x20 => Self::AuthChallenge,
            0x21 => Self::AuthResponse,
            0x22 => Self::AuthResult,
            0x30 => Self::Ping,
            0x31 => Self::Pong,
            0x40 => Self::WebRtcOffer,
            0x41 => Self::WebRtcAnswer,
            0x42 => Self::WebRtcIce,
            0x43 => Self::AudioTrackMap,
            other => return Err(ProtocolError::UnknownType(other)),
        })
    }
}

/// Authentication verdict carried by `AUTH_RESULT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AuthCode {
    Success = 0,
    NameTaken = 1,
    KeyMismatch = 2,
    InvalidSignature = 3,
    InvalidName = 4,
    AlreadyConnected = 5,
}

impl AuthCode {
    fn from_u8(value: u8) -> Result<Self, ProtocolError> {
        Ok(match value {
            0 => Self::Success,
            1 => Self::NameTaken,
            2 => Self::KeyMismatch,
            3 => Self::InvalidSignature,
            4 => Self::InvalidName,
            5 => Self::AlreadyConnected,
            _ => return Err(ProtocolError::Truncated("auth result code")),
        })
    }

    /// The user-facing explanation for a rejection.
    pub fn describe(&self) -> &'static str {
        match self {
            Self::Success => "authenticated",
            Self::NameTaken => "name is already taken by another player",
            Self::KeyMismatch => "your key is registered with a different name",
            Self::InvalidSignature => "authentication failed (invalid signature)",
            Self::InvalidName => "invalid name",
            Self::AlreadyConnected => "you are already connected to this server",
        }
    }
}

/// One player record inside `WORLD_STATE`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerSnapshot {
    pub player_id: u32,
    pub x: u16,
    pub y: u16,
    pub is_muted: bool,
    pub name: String,
    pub level: String,
}

/// A decoded wire message.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    ServerHello {
        player_id: u32,
        width: u16,
        height: u16,
        spawn_x: u16,
        spawn_y: u16,
        level_tiles: Bytes,
        level_name: String,
    },
    PositionUpdate {
        seq: u32,
        x: u16,
        y: u16,
    },
    WorldState {
        players: Vec<PlayerSnapshot>,
    },
    /// Legacy codec-framed audio; recognised but never sent.
    AudioFrame {
        player_id: u32,
        timestamp_ms: u32,
        volume: f32,
        opus: Bytes,
    },
    PlayerJoined {
        player_id: u32,
        name: String,
    },
    PlayerLeft {
        player_id: u32,
    },
    MuteStatus {
        muted: bool,
    },
    PositionAck {
        seq: u32,
        x: u16,
        y: u16,
    },
    /// Legacy unary level fetch.
    LevelPackRequest {
        level: String,
    },
    /// Legacy tarball reply; an empty payload means "not available".
    LevelPackData {
        data: Bytes,
    },
    DoorTransition {
        level: String,
        x: u16,
        y: u16,
    },
    LevelManifestRequest {
        level: String,
    },
    LevelManifest {
        manifest: BTreeMap<String, (String, u64)>,
    },
    LevelFilesRequest {
        level: String,
        paths: Vec<String>,
    },
    LevelFilesData {
        files: Vec<(String, Bytes)>,
    },
    AuthChallenge {
        nonce: [u8; 32],
    },
    AuthResponse {
        public_key: [u8; 32],
        signature: [u8; 64],
        name: String,
    },
    AuthResult {
        code: AuthCode,
    },
    Ping,
    Pong,
    WebRtcOffer {
        sdp: String,
    },
    WebRtcAnswer {
        sdp: String,
    },
    /// Legacy trickle-ICE exchange; candidates ride the SDP instead.
    WebRtcIce {
        sdp_mid: Option<String>,
        sdp_mline_index: u16,
        candidate: String,
    },
    AudioTrackMap {
        map: BTreeMap<String, u32>,
    },
}

impl Message {
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::ServerHello { .. } => MessageType::ServerHello,
            Message::PositionUpdate { .. } => MessageType::PositionUpdate,
            Message::WorldState { .. } => MessageType::WorldState,
            Message::AudioFrame { .. } => MessageType::AudioFrame,
            Message::PlayerJoined { .. } => MessageType::PlayerJoined,
            Message::PlayerLeft { .. } => MessageType::PlayerLeft,
            Message::MuteStatus { .. } => MessageType::MuteStatus,
            Message::PositionAck { .. } => MessageType::PositionAck,
            Message::LevelPackRequest { .. } => MessageType::LevelPackRequest,
            Message::LevelPackData { .. } => MessageType::LevelPackData,
            Message::DoorTransition { .. } => MessageType::DoorTransition,
            Message::LevelManifestRequest { .. } => MessageType::LevelManifestRequest,
            Message::LevelManifest { .. } => MessageType::LevelManifest,
            Message::LevelFilesRequest { .. } => MessageType::LevelFilesRequest,
            Message::LevelFilesData { .. } => MessageType::LevelFilesData,
            Message::AuthChallenge { .. } => MessageType::AuthChallenge,
            Message::AuthResponse { .. } => MessageType::AuthResponse,
            Message::AuthResult { .. } => MessageType::AuthResult,
            Message::Ping => MessageType::Ping,
            Message::Pong => MessageType::Pong,
            Message::WebRtcOffer { .. } => MessageType::WebRtcOffer,
            Message::WebRtcAnswer { .. } => MessageType::WebRtcAnswer,
            Message::WebRtcIce { .. } => MessageType::WebRtcIce,
            Message::AudioTrackMap { .. } => MessageType::AudioTrackMap,
        }
    }

    /// Encode the payload (everything after the type byte).
    pub fn encode_payload(&self) -> Bytes {
        let mut buf = BytesMut::new();
        match self {
            Message::ServerHello {
                player_id,
                width,
                height,
                spawn_x,
                spawn_y,
                level_tiles,
                level_name,
            } => {
                buf.put_u32(*player_id);
                buf.put_u16(*width);
                buf.put_u16(*height);
                buf.put_u16(*spawn_x);
                buf.put_u16(*spawn_y);
                buf.put_u16(level_tiles.len() as u16);
                buf.put_slice(level_tiles);
                buf.put_u8(level_name.len() as u8);
                buf.put_slice(level_name.as_bytes());
            }
            Message::PositionUpdate { seq, x, y } | Message::PositionAck { seq, x, y } => {
                buf.put_u32(*seq);
                buf.put_u16(*x);
                buf.put_u16(*y);
            }
            Message::WorldState { players } => {
                buf.put_u32(players.len() as u32);
                for p in players {
                    buf.put_u32(p.player_id);
                    buf.put_u16(p.x);
                    buf.put_u16(p.y);
                    buf.put_u8(p.is_muted as u8);
                    buf.put_u32(p.name.len() as u32);
                    buf.put_slice(p.name.as_bytes());
                    buf.put_u8(p.level.len() as u8);
                    buf.put_slice(p.level.as_bytes());
                }
            }
            Message::AudioFrame {
                player_id,
                timestamp_ms,
                volume,
                opus,
            } => {
                buf.put_u32(*player_id);
                buf.put_u32(*timestamp_ms);
                buf.put_u16((volume.clamp(0.0, 1.0) * 65535.0) as u16);
                buf.put_u16(opus.len() as u16);
                buf.put_slice(opus);
            }
            Message::PlayerJoined { player_id, name } => {
                buf.put_u32(*player_id);
                buf.put_u32(name.len() as u32);
                buf.put_slice(name.as_bytes());
            }
            Message::PlayerLeft { player_id } => buf.put_u32(*player_id),
            Message::MuteStatus { muted } => buf.put_u8(*muted as u8),
            Message::LevelPackRequest { level } | Message::LevelManifestRequest { level } => {
                buf.put_u16(level.len() as u16);
                buf.put_slice(level.as_bytes());
            }
            Message::LevelPackData { data } => {
                buf.put_u32(data.len() as u32);
                buf.put_slice(data);
            }
            Message::DoorTransition { level, x, y } => {
                buf.put_u16(level.len() as u16);
                buf.put_slice(level.as_bytes());
                buf.put_u16(*x);
                buf.put_u16(*y);
            }
            Message::LevelManifest { manifest } => {
                let json = serde_json::to_vec(manifest).unwrap_or_default();
                buf.put_u32(json.len() as u32);
                buf.put_slice(&json);
            }
            Message::LevelFilesRequest { level, paths } => {
                buf.put_u16(level.len() as u16);
                buf.put_slice(level.as_bytes());
                let json = serde_json::to_vec(paths).unwrap_or_default();
                buf.put_u32(json.len() as u32);
                buf.put_slice(&json);
            }
            Message::LevelFilesData { files } => {
                buf.put_u32(files.len() as u32);
                for (path, contents) in files {
                    buf.put_u16(path.len() as u16);
                    buf.put_slice(path.as_bytes());
                    buf.put_u32(contents.len() as u32);
                    buf.put_slice(contents);
                }
            }
            Message::AuthChallenge { nonce } => buf.put_slice(nonce),
            Message::AuthResponse {
                public_key,
                signature,
                name,
            } => {
                buf.put_slice(public_key);
                buf.put_slice(signature);
                buf.put_u16(name.len() as u16);
                buf.put_slice(name.as_bytes());
            }
            Message::AuthResult { code } => buf.put_u8(*code as u8),
            Message::Ping | Message::Pong => {}
            Message::WebRtcOffer { sdp } | Message::WebRtcAnswer { sdp } => {
                buf.put_u32(sdp.len() as u32);
                buf.put_slice(sdp.as_bytes());
            }
            Message::WebRtcIce {
                sdp_mid,
                sdp_mline_index,
                candidate,
            } => {
                let mid = sdp_mid.as_deref().unwrap_or("");
                buf.put_u16(mid.len() as u16);
                buf.put_slice(mid.as_bytes());
                buf.put_u16(*sdp_mline_index);
                buf.put_u32(candidate.len() as u32);
                buf.put_slice(candidate.as_bytes());
            }
            Message::AudioTrackMap { map } => {
                let json = serde_json::to_vec(map).unwrap_or_default();
                buf.put_u32(json.len() as u32);
                buf.put_slice(&json);
            }
        }
        buf.freeze()
    }

    /// Decode a payload for a known message type.
    pub fn decode(msg_type: MessageType, payload: &[u8]) -> Result<Self, ProtocolError> {
        let mut r = Reader::new(payload);
        let message = match msg_type {
            MessageType::ServerHello => {
                let player_id = r.u32("server hello")?;
                let width = r.u16("server hello")?;
                let height = r.u16("server hello")?;
                let spawn_x = r.u16("server hello")?;
                let spawn_y = r.u16("server hello")?;
                let tiles_len = r.u16("server hello")? as usize;
                let level_tiles = Bytes::copy_from_slice(r.take(tiles_len, "level tiles")?);
                let level_name = r.str_u8("level name")?;
                Message::ServerHello {
                    player_id,
                    width,
                    height,
                    spawn_x,
                    spawn_y,
                    level_tiles,
                    level_name,
                }
            }
            MessageType::PositionUpdate => Message::PositionUpdate {
                seq: r.u32("position update")?,
                x: r.u16("position update")?,
                y: r.u16("position update")?,
            },
            MessageType::PositionAck => Message::PositionAck {
                seq: r.u32("position ack")?,
                x: r.u16("position ack")?,
                y: r.u16("position ack")?,
            },
            MessageType::WorldState => {
                let count = r.u32("world state")?;
                let mut players = Vec::with_capacity(count.min(256) as usize);
                for _ in 0..count {
                    let player_id = r.u32("world state record")?;
                    let x = r.u16("world state record")?;
                    let y = r.u16("world state record")?;
                    let is_muted = r.u8("world state record")? != 0;
                    let name_len = r.u32("world state record")? as usize;
                    let name = r.str_exact(name_len, "player name")?;
                    let level_len = r.u8("world state record")? as usize;
                    let level = r.str_exact(level_len, "level name")?;
                    players.push(PlayerSnapshot {
                        player_id,
                        x,
                        y,
                        is_muted,
                        name,
                        level,
                    });
                }
                Message::WorldState { players }
            }
            MessageType::AudioFrame => {
                let player_id = r.u32("audio frame")?;
                let timestamp_ms = r.u32("audio frame")?;
                let volume = r.u16("audio frame")? as f32 / 65535.0;
                let opus_len = r.u16("audio frame")? as usize;
                let opus = Bytes::copy_from_slice(r.take(opus_len, "opus data")?);
                Message::AudioFrame {
                    player_id,
                    timestamp_ms,
                    volume,
                    opus,
                }
            }
            MessageType::PlayerJoined => {
                let player_id = r.u32("player joined")?;
                let name_len = r.u32("player joined")? as usize;
                let name = r.str_exact(name_len, "player name")?;
                Message::PlayerJoined { player_id, name }
            }
            MessageType::PlayerLeft => Message::PlayerLeft {
                player_id: r.u32("player left")?,
            },
            MessageType::MuteStatus => Message::MuteStatus {
                muted: r.u8("mute status")? != 0,
            },
            MessageType::LevelPackRequest => Message::LevelPackRequest {
                level: r.str_u16("level name")?,
            },
            MessageType::LevelPackData => {
                let len = r.u32("level pack")? as usize;
                Message::LevelPackData {
                    data: Bytes::copy_from_slice(r.take(len, "level pack")?),
                }
            }
            MessageType::DoorTransition => {
                let level = r.str_u16("target level")?;
                let x = r.u16("door transition")?;
                let y = r.u16("door transition")?;
                Message::DoorTransition { level, x, y }
            }
            MessageType::LevelManifestRequest => Message::LevelManifestRequest {
                level: r.str_u16("level name")?,
            },
            MessageType::LevelManifest => {
                let json = r.bytes_u32("manifest json")?;
                Message::LevelManifest {
                    manifest: serde_json::from_slice(json)?,
                }
            }
            MessageType::LevelFilesRequest => {
                let level = r.str_u16("level name")?;
                let json = r.bytes_u32("file list json")?;
                Message::LevelFilesRequest {
                    level,
                    paths: serde_json::from_slice(json)?,
                }
            }
            MessageType::LevelFilesData => {
                let count = r.u32("level files")?;
                let mut files = Vec::with_capacity(count.min(256) as usize);
                for _ in 0..count {
                    let path = r.str_u16("file path")?;
                    let len = r.u32("file contents")? as usize;
                    let contents = Bytes::copy_from_slice(r.take(len, "file contents")?);
                    files.push((path, contents));
                }
                Message::LevelFilesData { files }
            }
            MessageType::AuthChallenge => {
                let nonce: [u8; 32] = r
                    .take(32, "auth nonce")?
                    .try_into()
                    .map_err(|_| ProtocolError::Truncated("auth nonce"))?;
                Message::AuthChallenge { nonce }
            }
            MessageType::AuthResponse => {
                let public_key: [u8; 32] = r
                    .take(32, "public key")?
                    .try_into()
                    .map_err(|_| ProtocolError::Truncated("public key"))?;
                let signature: [u8; 64] = r
                    .take(64, "signature")?
                    .try_into()
                    .map_err(|_| ProtocolError::Truncated("signature"))?;
                let name = r.str_u16("player name")?;
                Message::AuthResponse {
                    public_key,
                    signature,
                    name,
                }
            }
            MessageType::AuthResult => Message::AuthResult {
                code: AuthCode::from_u8(r.u8("auth result")?)?,
            },
            MessageType::Ping => Message::Ping,
            MessageType::Pong => Message::Pong,
            MessageType::WebRtcOffer => Message::WebRtcOffer {
                sdp: r.str_u32("sdp offer")?,
            },
            MessageType::WebRtcAnswer => Message::WebRtcAnswer {
                sdp: r.str_u32("sdp answer")?,
            },
            MessageType::WebRtcIce => {
                let mid = r.str_u16("sdp mid")?;
                let sdp_mline_index = r.u16("ice candidate")?;
                let candidate = r.str_u32("ice candidate")?;
                Message::WebRtcIce {
                    sdp_mid: (!mid.is_empty()).then_some(mid),
                    sdp_mline_index,
                    candidate,
                }
            }
            MessageType::AudioTrackMap => {
                let json = r.bytes_u32("track map json")?;
                Message::AudioTrackMap {
                    map: serde_json::from_slice(json)?,
                }
            }
        };
        Ok(message)
    }
}

/// Bounds-checked cursor over a payload.
struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn take(&mut self, n: usize, what: &'static str) -> Result<&'a [u8], ProtocolError> {
        if self.buf.len() < n {
            return Err(ProtocolError::Truncated(what));
        }
        let (head, rest) = self.buf.split_at(n);
        self.buf = rest;
        Ok(head)
    }

    fn u8(&mut self, what: &'static str) -> Result<u8, ProtocolError> {
        Ok(self.take(1, what)?[0])
    }

    fn u16(&mut self, what: &'static str) -> Result<u16, ProtocolError> {
        let b = self.take(2, what)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u32(&mut self, what: &'static str) -> Result<u32, ProtocolError> {
        let b = self.take(4, what)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn str_exact(&mut self, len: usize, what: &'static str) -> Result<String, ProtocolError> {
        let bytes = self.take(len, what)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| ProtocolError::Utf8(what))
    }

    fn str_u8(&mut self, what: &'static str) -> Result<String, ProtocolError> {
        let len = self.u8(what)? as usize;
        self.str_exact(len, what)
    }

    fn str_u16(&mut self, what: &'static str) -> Result<String, ProtocolError> {
        let len = self.u16(what)? as usize;
        self.str_exact(len, what)
    }

    fn str_u32(&mut self, what: &'static str) -> Result<String, ProtocolError> {
        let len = self.u32(what)? as usize;
        self.str_exact(len, what)
    }

    fn bytes_u32(&mut self, what: &'static str) -> Result<&'a [u8], ProtocolError> {
        let len = self.u32(what)? as usize;
        self.take(len, what)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(message: Message) {
        let payload = message.encode_payload();
        let decoded = Message::decode(message.message_type(), &payload).unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn roundtrip_every_message_type() {
        roundtrip(Message::ServerHello {
            player_id: 7,
            width: 3,
            height: 2,
            spawn_x: 1,
            spawn_y: 1,
            level_tiles: Bytes::from_static(b"##.#.."),
            level_name: "main".into(),
        });
        roundtrip(Message::PositionUpdate { seq: 42, x: 10, y: 20 });
        roundtrip(Message::PositionAck {
            seq: 42,
            x: 10,
            y: 20,
        });
        roundtrip(Message::WorldState {
            players: vec![
                PlayerSnapshot {
                    player_id: 1,
                    x: 5,
                    y: 5,
                    is_muted: false,
                    name: "alice".into(),
                    level: "main".into(),
                },
                PlayerSnapshot {
                    player_id: 2,
                    x: 6,
                    y: 5,
                    is_muted: true,
                    name: "bob".into(),
                    level: "dungeon".into(),
                },
            ],
        });
        roundtrip(Message::WorldState { players: vec![] });
        roundtrip(Message::PlayerJoined {
            player_id: 3,
            name: "carol".into(),
        });
        roundtrip(Message::PlayerLeft { player_id: 3 });
        roundtrip(Message::MuteStatus { muted: true });
        roundtrip(Message::LevelPackRequest {
            level: "main".into(),
        });
        roundtrip(Message::LevelPackData {
            data: Bytes::from_static(b"tarball"),
        });
        roundtrip(Message::LevelPackData { data: Bytes::new() });
        roundtrip(Message::DoorTransition {
            level: "dungeon".into(),
            x: 10,
            y: 10,
        });
        roundtrip(Message::LevelManifestRequest {
            level: "main".into(),
        });
        roundtrip(Message::LevelManifest {
            manifest: [
                ("level.txt".to_string(), ("ab12".to_string(), 42u64)),
                ("tiles.json".to_string(), ("cd34".to_string(), 128u64)),
            ]
            .into_iter()
            .collect(),
        });
        roundtrip(Message::LevelFilesRequest {
            level: "main".into(),
            paths: vec!["tiles.json".into(), "assets/step.ogg".into()],
        });
        roundtrip(Message::LevelFilesData {
            files: vec![
                ("level.txt".into(), Bytes::from_static(b"###")),
                ("tiles.json".into(), Bytes::from_static(b"{}")),
            ],
        });
        roundtrip(Message::AuthChallenge { nonce: [9u8; 32] });
        roundtrip(Message::AuthResponse {
            public_key: [1u8; 32],
            signature: [2u8; 64],
            name: "alice".into(),
        });
        roundtrip(Message::AuthResult {
            code: AuthCode::NameTaken,
        });
        roundtrip(Message::Ping);
        roundtrip(Message::Pong);
        roundtrip(Message::WebRtcOffer {
            sdp: "v=0\r\no=- 0 0 IN IP4 127.0.0.1\r\n".into(),
        });
        roundtrip(Message::WebRtcAnswer { sdp: "v=0".into() });
        roundtrip(Message::WebRtcIce {
            sdp_mid: Some("0".into()),
            sdp_mline_index: 0,
            candidate: "candidate:1 1 udp 2130706431 127.0.0.1 54321 typ host".into(),
        });
        roundtrip(Message::WebRtcIce {
            sdp_mid: None,
            sdp_mline_index: 1,
            candidate: "candidate:2".into(),
        });
        roundtrip(Message::AudioTrackMap {
            map: [("0".to_string(), 1u32), ("1".to_string(), 5u32)]
                .into_iter()
                .collect(),
        });
    }

    #[test]
    fn roundtrip_randomized_payloads() {
        use rand::{Rng, SeedableRng};
        let mut rng = rand::rngs::StdRng::seed_from_u64(0x6472_6f67);
        for _ in 0..200 {
            let name: String = (0..rng.gen_range(1..=32))
                .map(|_| rng.gen_range(b'a'..=b'z') as char)
                .collect();
            let level: String = (0..rng.gen_range(1..=16))
                .map(|_| rng.gen_range(b'a'..=b'z') as char)
                .collect();
            roundtrip(Message::WorldState {
                players: (0..rng.gen_range(0..8))
                    .map(|i| PlayerSnapshot {
                        player_id: i,
                        x: rng.gen(),
                        y: rng.gen(),
                        is_muted: rng.gen(),
                        name: name.clone(),
                        level: level.clone(),
                    })
                    .collect(),
            });
            let mut nonce = [0u8; 32];
            rng.fill(&mut nonce[..]);
            roundtrip(Message::AuthChallenge { nonce });
            let mut signature = [0u8; 64];
            rng.fill(&mut signature[..]);
            let mut public_key = [0u8; 32];
            rng.fill(&mut public_key[..]);
            roundtrip(Message::AuthResponse {
                public_key,
                signature,
                name: name.clone(),
            });
            roundtrip(Message::PositionUpdate {
                seq: rng.gen(),
                x: rng.gen(),
                y: rng.gen(),
            });
        }
    }

    #[test]
    fn truncated_payloads_rejected() {
        assert!(Message::decode(MessageType::PositionUpdate, &[0, 0, 1]).is_err());
        assert!(Message::decode(MessageType::AuthChallenge, &[0u8; 31]).is_err());
        assert!(Message::decode(MessageType::AuthResponse, &[0u8; 95]).is_err());
        // String length prefix pointing past the end
        assert!(Message::decode(MessageType::LevelPackRequest, &[0xff, 0xff, b'a']).is_err());
        // World state record count larger than the data
        let mut payload = vec![0, 0, 0, 5];
        payload.extend_from_slice(&[0u8; 4]);
        assert!(Message::decode(MessageType::WorldState, &payload).is_err());
    }

    #[test]
    fn invalid_utf8_rejected() {
        let mut payload = vec![0, 4];
        payload.extend_from_slice(&[0xff, 0xfe, 0xfd, 0xfc]);
        assert!(matches!(
            Message::decode(MessageType::LevelPackRequest, &payload),
            Err(ProtocolError::Utf8(_))
        ));
    }

    #[test]
    fn unknown_type_is_recognisable() {
        let err = MessageType::try_from(0x7f).unwrap_err();
        assert!(err.is_unknown_type());
    }

    #[test]
    fn volume_quantisation_is_close() {
        let message = Message::AudioFrame {
            player_id: 1,
            timestamp_ms: 1000,
            volume: 0.625,
            opus: Bytes::from_static(&[1, 2, 3]),
        };
        let decoded = Message::decode(MessageType::AudioFrame, &message.encode_payload()).unwrap();
        match decoded {
            Message::AudioFrame { volume, .. } => assert!((volume - 0.625).abs() < 1e-4),
            _ => unreachable!(),
        }
    }
}
