//! Length-prefixed framing over streams and datagram-style channels
//!
//! TCP carries a stream of frames read with [`read_message`]; the data
//! channel delivers one whole frame per binary message, decoded with
//! [`decode_frame`].

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use gridvoice_core::constants::net::MAX_FRAME_LEN;

use crate::error::ProtocolError;
use crate::message::{Message, MessageType};

/// Encode a full frame: `[length][type][payload]`.
pub fn encode_frame(message: &Message) -> Bytes {
    let payload = message.encode_payload();
    let mut buf = BytesMut::with_capacity(5 + payload.len());
    buf.put_u32(1 + payload.len() as u32);
    buf.put_u8(message.message_type() as u8);
    buf.put_slice(&payload);
    buf.freeze()
}

/// Decode one complete frame, as delivered by the data channel.
///
/// Unknown message types surface as `ProtocolError::UnknownType`; callers
/// drop those without closing the session.
pub fn decode_frame(frame: &[u8]) -> Result<Message, ProtocolError> {
    if frame.len() < 5 {
        return Err(ProtocolError::BadLength(frame.len() as u32));
    }
    let length = u32::from_be_bytes([frame[0], frame[1], frame[2], frame[3]]);
    if length < 1 {
        return Err(ProtocolError::BadLength(length));
    }
    if length > MAX_FRAME_LEN {
        return Err(ProtocolError::FrameTooLarge(length));
    }
    if frame.len() as u64 != 4 + length as u64 {
        return Err(ProtocolError::BadLength(length));
    }
    let msg_type = MessageType::try_from(frame[4])?;
    Message::decode(msg_type, &frame[5..])
}

/// Read one message from a stream.
pub async fn read_message<R>(reader: &mut R) -> Result<Message, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    loop {
        match read_message_raw(reader).await? {
            Some(message) => return Ok(message),
            // Unknown type: payload already consumed, keep reading
            None => continue,
        }
    }
}

/// Read one frame; `None` means an unknown message type was skipped.
async fn read_message_raw<R>(reader: &mut R) -> Result<Option<Message>, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let length = reader.read_u32().await?;
    if length < 1 {
        return Err(ProtocolError::BadLength(length));
    }
    if length > MAX_FRAME_LEN {
        return Err(ProtocolError::FrameTooLarge(length));
    }
    let type_byte = reader.read_u8().await?;
    let mut payload = vec![0u8; length as usize - 1];
    reader.read_exact(&mut payload).await?;
    match MessageType::try_from(type_byte) {
        Ok(msg_type) => Ok(Some(Message::decode(msg_type, &payload)?)),
        Err(_) => Ok(None),
    }
}

/// Write one message to a stream and flush it.
pub async fn write_message<W>(writer: &mut W, message: &Message) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode_frame(message);
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}
