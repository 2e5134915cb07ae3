use thiserror::Error;

use gridvoice_protocol::{AuthCode, ProtocolError};
use gridvoice_transport::TransportError;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("connection failed: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("webrtc error: {0}")]
    WebRtc(String),
    #[error("authentication failed: {}", .0.describe())]
    Auth(AuthCode),
    #[error("level error: {0}")]
    Level(String),
    #[error("identity error: {0}")]
    Identity(String),
    #[error("connection lost")]
    ConnectionLost,
}

impl From<webrtc::Error> for ClientError {
    fn from(e: webrtc::Error) -> Self {
        ClientError::WebRtc(e.to_string())
    }
}
