//! Length-prefixed framing shared by every local socket message.
//!
//! A frame is a 4-byte little-endian payload length followed by the payload. Readers
//! loop until the announced number of bytes has arrived.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::constants::codes;
use crate::constants::protocol::{FRAME_HEADER_SIZE, MAX_FRAME_SIZE};
use crate::error::{DapiError, Result};

/// Prefix `payload` with its little-endian length
pub fn encode_frame(payload: &[u8]) -> Result<Vec<u8>> {
    if payload.len() > MAX_FRAME_SIZE {
        return Err(DapiError::internal(codes::SOCKET_COMMUNICATION).with_extra(format!(
            "message of {} bytes exceeds the {} bytes limit",
            payload.len(),
            MAX_FRAME_SIZE
        )));
    }

    let mut frame = Vec::with_capacity(FRAME_HEADER_SIZE + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Split a complete frame held in memory (datagram sockets)
pub fn decode_frame(buffer: &[u8]) -> Result<&[u8]> {
    if buffer.len() < FRAME_HEADER_SIZE {
        return Err(DapiError::internal(codes::SOCKET_COMMUNICATION)
            .with_extra("truncated frame header"));
    }
    let (header, body) = buffer.split_at(FRAME_HEADER_SIZE);
    let size = announced_size(header)?;
    body.get(..size).ok_or_else(|| {
        DapiError::internal(codes::SOCKET_COMMUNICATION).with_extra(format!(
            "frame announces {size} bytes but only {} arrived",
            body.len()
        ))
    })
}

/// Write one frame
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode_frame(payload)?;
    // write_all reports a zero-byte write as WriteZero
    writer
        .write_all(&frame)
        .await
        .map_err(communication_error)?;
    writer.flush().await.map_err(communication_error)
}

/// Read one frame, waiting for the whole payload
pub async fn read_frame<R>(reader: &mut R) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; FRAME_HEADER_SIZE];
    reader
        .read_exact(&mut header)
        .await
        .map_err(communication_error)?;
    let size = announced_size(&header)?;

    let mut payload = vec![0u8; size];
    reader
        .read_exact(&mut payload)
        .await
        .map_err(communication_error)?;
    Ok(payload)
}

fn announced_size(header: &[u8]) -> Result<usize> {
    let mut bytes = [0u8; FRAME_HEADER_SIZE];
    bytes.copy_from_slice(&header[..FRAME_HEADER_SIZE]);
    let size = u32::from_le_bytes(bytes) as usize;
    if size > MAX_FRAME_SIZE {
        return Err(DapiError::internal(codes::SOCKET_COMMUNICATION)
            .with_extra(format!("announced frame size {size} exceeds limit")));
    }
    Ok(size)
}

fn communication_error(error: std::io::Error) -> DapiError {
    DapiError::internal(codes::SOCKET_COMMUNICATION).with_extra(error.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_is_little_endian_length() {
        let frame = encode_frame(b"hello").unwrap();
        assert_eq!(&frame[..4], &[5, 0, 0, 0]);
        assert_eq!(&frame[4..], b"hello");
    }

    #[test]
    fn test_decode_rejects_truncated_payload() {
        let mut frame = encode_frame(b"hello").unwrap();
        frame.truncate(6);
        let error = decode_frame(&frame).unwrap_err();
        assert_eq!(error.code(), Some(codes::SOCKET_COMMUNICATION));
    }

    #[tokio::test]
    async fn test_read_frame_waits_for_split_payload() {
        let (mut client, mut server) = tokio::io::duplex(8);
        let writer = tokio::spawn(async move {
            // Duplex capacity is smaller than the frame, forcing partial reads
            write_frame(&mut client, b"a payload longer than eight bytes")
                .await
                .unwrap();
        });

        let payload = read_frame(&mut server).await.unwrap();
        writer.await.unwrap();
        assert_eq!(payload, b"a payload longer than eight bytes");
    }

    #[tokio::test]
    async fn test_read_frame_on_closed_stream_is_communication_error() {
        let (client, mut server) = tokio::io::duplex(64);
        drop(client);
        let error = read_frame(&mut server).await.unwrap_err();
        assert_eq!(error.code(), Some(codes::SOCKET_COMMUNICATION));
    }
}
