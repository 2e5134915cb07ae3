use thiserror::Error;

use gridvoice_core::level::LevelError;
use gridvoice_core::tiles::TileSetError;
use gridvoice_protocol::ProtocolError;
use gridvoice_transport::TransportError;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("level error: {0}")]
    Level(#[from] LevelError),
    #[error("tile set error: {0}")]
    TileSet(#[from] TileSetError),
    #[error("levels directory problem: {0}")]
    Levels(String),
    #[error("storage error: {0}")]
    Storage(#[from] std::io::Error),
    #[error("session closed: {0}")]
    SessionClosed(&'static str),
    #[error("webrtc error: {0}")]
    WebRtc(String),
}

impl From<webrtc::Error> for ServerError {
    fn from(e: webrtc::Error) -> Self {
        ServerError::WebRtc(e.to_string())
    }
}
