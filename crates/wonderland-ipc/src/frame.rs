//! Wire framing
//!
//! Request:  `[u32 version][u32 payload length][payload]`
//! Response: `[u32 payload length][payload]`
//!
//! All integers are big-endian. Responses deliberately carry no version field.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Upper bound on a single read while assembling a payload
pub const READ_CHUNK_SIZE: usize = 4096;

/// Framing errors
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Connection closed mid-frame")]
    ConnectionClosed,

    #[error("Payload of {0} bytes does not fit a frame")]
    FrameTooLarge(usize),
}

pub type FrameResult<T> = Result<T, FrameError>;

/// Decoded request header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestHeader {
    pub version: u32,
    pub payload_len: u32,
}

impl RequestHeader {
    pub const LEN: usize = 8;

    pub fn decode(raw: [u8; Self::LEN]) -> Self {
        let mut buf = &raw[..];
        let version = buf.get_u32();
        let payload_len = buf.get_u32();
        Self {
            version,
            payload_len,
        }
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32(self.version);
        buf.put_u32(self.payload_len);
    }
}

/// Length prefix of a response frame
pub const RESPONSE_HEADER_LEN: usize = 4;

fn frame_len(payload: &[u8]) -> FrameResult<u32> {
    u32::try_from(payload.len()).map_err(|_| FrameError::FrameTooLarge(payload.len()))
}

/// Encode a request frame
pub fn encode_request(version: u32, payload: &[u8]) -> FrameResult<Bytes> {
    let header = RequestHeader {
        version,
        payload_len: frame_len(payload)?,
    };
    let mut buf = BytesMut::with_capacity(RequestHeader::LEN + payload.len());
    header.encode(&mut buf);
    buf.extend_from_slice(payload);
    Ok(buf.freeze())
}

/// Encode a response frame
pub fn encode_response(payload: &[u8]) -> FrameResult<Bytes> {
    let len = frame_len(payload)?;
    let mut buf = BytesMut::with_capacity(RESPONSE_HEADER_LEN + payload.len());
    buf.put_u32(len);
    buf.extend_from_slice(payload);
    Ok(buf.freeze())
}

/// Read a request header.
///
/// Returns `None` when the peer closed the connection before sending any
/// header byte. A close partway through the header is an error.
pub async fn read_header<R>(reader: &mut R) -> FrameResult<Option<RequestHeader>>
where
    R: AsyncRead + Unpin,
{
    let mut raw = [0u8; RequestHeader::LEN];
    let mut filled = 0;

    while filled < raw.len() {
        let n = reader.read(&mut raw[filled..]).await?;
        if n == 0 {
            return if filled == 0 {
                Ok(None)
            } else {
                Err(FrameError::ConnectionClosed)
            };
        }
        filled += n;
    }

    Ok(Some(RequestHeader::decode(raw)))
}

/// Read exactly `len` payload bytes, at most `READ_CHUNK_SIZE` per read.
pub async fn read_payload<R>(reader: &mut R, len: usize) -> FrameResult<Bytes>
where
    R: AsyncRead + Unpin,
{
    let mut payload = BytesMut::zeroed(len);
    let mut filled = 0;

    while filled < len {
        let end = len.min(filled + READ_CHUNK_SIZE);
        let n = reader.read(&mut payload[filled..end]).await?;
        if n == 0 {
            return Err(FrameError::ConnectionClosed);
        }
        filled += n;
    }

    Ok(payload.freeze())
}
