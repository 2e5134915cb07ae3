//! WebRTC transport plumbing shared by the gridvoice server and client
//!
//! The server terminates one peer connection per player: one inbound audio
//! track (the player's microphone) and one outbound track per in-range
//! remote speaker, plus a reliable ordered data channel carrying game
//! messages. This crate owns the pieces both binaries need: media engine
//! construction, Opus encode/decode, and the queue-backed track wrappers.

mod codec;
mod engine;
mod error;
mod tracks;

pub use codec::{OpusDecoder, OpusEncoder};
pub use engine::{build_api, new_peer_connection, opus_codec_capability, RtcConfig};
pub use error::TransportError;
pub use tracks::{InboundAudioRelay, OutboundAudioTrack};
