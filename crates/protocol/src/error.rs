use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid frame length {0}")]
    BadLength(u32),
    #[error("frame of {0} bytes exceeds the maximum")]
    FrameTooLarge(u32),
    #[error("unknown message type 0x{0:02x}")]
    UnknownType(u8),
    #[error("truncated {0} payload")]
    Truncated(&'static str),
    #[error("invalid UTF-8 in {0}")]
    Utf8(&'static str),
    #[error("invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// Unknown message types are dropped by receivers instead of killing
    /// the session; everything else is fatal for the connection.
    pub fn is_unknown_type(&self) -> bool {
        matches!(self, ProtocolError::UnknownType(_))
    }
}
