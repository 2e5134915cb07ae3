//! Centralized constants shared by the server and client
//!
//! Values that appear on the wire or in timing-sensitive loops live here so
//! both ends of the protocol agree on them. Anything tunable per deployment
//! (bind address, directories) is a CLI flag instead.

/// Audio framing parameters
pub mod audio {
    use std::time::Duration;

    /// Sample rate in Hz (Opus native)
    pub const SAMPLE_RATE: u32 = 48_000;

    /// Mono voice
    pub const CHANNELS: u8 = 1;

    /// Samples per 20 ms frame at 48 kHz
    pub const FRAME_SIZE: usize = 960;

    /// Duration of one audio frame
    pub const FRAME_DURATION: Duration = Duration::from_millis(20);

    /// Opus encoder bitrate (bps)
    pub const OPUS_BITRATE: i32 = 24_000;

    /// Bound on the inbound/outbound per-session audio queues (~200 ms)
    pub const QUEUE_FRAMES: usize = 10;
}

/// Proximity audio distances, in tiles
pub mod proximity {
    /// Beyond this Euclidean distance, volume is 0
    pub const MAX_DISTANCE: f32 = 10.0;

    /// Within this distance, volume is 1.0
    pub const FULL_VOLUME_DISTANCE: f32 = 2.0;

    /// Largest squared distance still in range: `MAX_DISTANCE²` with
    /// integer grid coordinates
    pub const MAX_DISTANCE_SQ: u32 = 100;
}

/// Network defaults
pub mod net {
    /// Default signalling host
    pub const DEFAULT_HOST: &str = "127.0.0.1";

    /// Default signalling port
    pub const DEFAULT_PORT: u16 = 7777;

    /// Label of the reliable ordered data channel carrying game messages
    pub const DATA_CHANNEL_LABEL: &str = "game";

    /// Upper bound on a single wire frame; larger lengths are a protocol
    /// error and must be rejected before allocating
    pub const MAX_FRAME_LEN: u32 = 16 * 1024 * 1024;
}

/// Periodic task timing
pub mod timing {
    use std::time::Duration;

    /// Audio routing loop tick, aligned to the audio frame
    pub const ROUTING_TICK: Duration = Duration::from_millis(20);

    /// Renegotiation engine tick
    pub const RENEGOTIATION_TICK: Duration = Duration::from_millis(500);

    /// Keepalive ping interval per session
    pub const PING_INTERVAL: Duration = Duration::from_secs(10);

    /// A session with no PONG for this long is closed
    pub const PONG_TIMEOUT: Duration = Duration::from_secs(30);
}

/// Player name limits enforced during authentication
pub mod names {
    /// Maximum name length in bytes
    pub const MAX_NAME_LEN: usize = 32;
}
