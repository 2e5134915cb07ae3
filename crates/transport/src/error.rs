use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("peer connection failed: {0}")]
    Connection(String),
    #[error("media error: {0}")]
    Media(String),
    #[error("opus codec error: {0}")]
    Codec(String),
    #[error("transport closed")]
    Closed,
}

impl From<webrtc::Error> for TransportError {
    fn from(e: webrtc::Error) -> Self {
        TransportError::Connection(e.to_string())
    }
}

impl From<audiopus::Error> for TransportError {
    fn from(e: audiopus::Error) -> Self {
        TransportError::Codec(e.to_string())
    }
}
