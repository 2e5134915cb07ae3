//! gridvoice client library
//!
//! A headless client: it authenticates over TCP, pulls the level through
//! the content-addressed cache, brings up the peer connection and data
//! channel, predicts movement locally, and plays each nearby speaker
//! through its own drift-free ring-buffered stream. Terminal rendering and
//! OS audio backends plug in from the outside: rendering reads
//! [`world::ClientWorld`], audio implements [`playback::AudioSinkFactory`]
//! and feeds the microphone via [`session::ClientHandle`].

pub mod cache;
pub mod error;
pub mod identity;
pub mod playback;
pub mod prediction;
pub mod session;
pub mod world;

pub use error::ClientError;
pub use session::{ClientConfig, ClientHandle, GameClient};
