//! Binary codec for manager ↔ host frames.
//!
//! Wire format:
//! ```text
//! [version:1][kind:1][code:2][status:4][payload_len:4][seq:8][payload:N]
//! ```
//! Total header size: 20 bytes. All multi-byte integers are big-endian.

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::protocol::messages::{Frame, FrameKind, HEADER_SIZE, MAX_PAYLOAD_SIZE, PROTOCOL_VERSION};

/// Errors that can occur during frame encoding or decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The byte slice is shorter than the minimum required length.
    #[error("insufficient data: need at least {needed} bytes, got {available}")]
    InsufficientData { needed: usize, available: usize },

    /// The frame kind byte is not a recognized value.
    #[error("unknown frame kind: 0x{0:02X}")]
    UnknownFrameKind(u8),

    /// The protocol version in the header is not supported.
    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    /// The command code of a request is not recognized.
    #[error("unknown command code: 0x{0:04X}")]
    UnknownCode(u16),

    /// The payload could not be parsed.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// The announced payload exceeds [`MAX_PAYLOAD_SIZE`].
    #[error("payload too large: {0} bytes")]
    PayloadTooLarge(usize),

    /// Reading from the underlying stream failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Encodes a frame including its 20-byte header.
///
/// # Errors
///
/// Returns [`ProtocolError::PayloadTooLarge`] if the payload does not fit.
pub fn encode_frame(frame: &Frame) -> Result<Vec<u8>, ProtocolError> {
    if frame.payload.len() > MAX_PAYLOAD_SIZE {
        return Err(ProtocolError::PayloadTooLarge(frame.payload.len()));
    }
    let mut buf = Vec::with_capacity(HEADER_SIZE + frame.payload.len());
    buf.push(PROTOCOL_VERSION);
    buf.push(frame.kind as u8);
    buf.extend_from_slice(&frame.code.to_be_bytes());
    buf.extend_from_slice(&frame.status.to_be_bytes());
    buf.extend_from_slice(&(frame.payload.len() as u32).to_be_bytes());
    buf.extend_from_slice(&frame.seq.to_be_bytes());
    buf.extend_from_slice(&frame.payload);
    Ok(buf)
}

/// Decodes one frame from the start of `bytes`.
///
/// Returns the frame and the number of bytes consumed.
///
/// # Errors
///
/// Returns [`ProtocolError`] if the bytes are truncated or malformed.
pub fn decode_frame(bytes: &[u8]) -> Result<(Frame, usize), ProtocolError> {
    if bytes.len() < HEADER_SIZE {
        return Err(ProtocolError::InsufficientData {
            needed: HEADER_SIZE,
            available: bytes.len(),
        });
    }
    let header = parse_header(&bytes[..HEADER_SIZE])?;
    let total = HEADER_SIZE + header.payload_len;
    if bytes.len() < total {
        return Err(ProtocolError::InsufficientData {
            needed: total,
            available: bytes.len(),
        });
    }
    let frame = header.into_frame(bytes[HEADER_SIZE..total].to_vec());
    Ok((frame, total))
}

/// Reads exactly one frame from an async stream.
///
/// # Errors
///
/// Returns [`ProtocolError::Io`] on stream errors (including EOF) and the
/// other variants for malformed headers.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Frame, ProtocolError> {
    let mut header_bytes = [0u8; HEADER_SIZE];
    reader.read_exact(&mut header_bytes).await?;
    let header = parse_header(&header_bytes)?;
    let mut payload = vec![0u8; header.payload_len];
    if header.payload_len > 0 {
        reader.read_exact(&mut payload).await?;
    }
    Ok(header.into_frame(payload))
}

// ── Header parsing ────────────────────────────────────────────────────────────

struct Header {
    kind: FrameKind,
    code: u16,
    status: i32,
    payload_len: usize,
    seq: u64,
}

impl Header {
    fn into_frame(self, payload: Vec<u8>) -> Frame {
        Frame {
            kind: self.kind,
            code: self.code,
            status: self.status,
            seq: self.seq,
            payload,
        }
    }
}

fn parse_header(bytes: &[u8]) -> Result<Header, ProtocolError> {
    let version = bytes[0];
    if version != PROTOCOL_VERSION {
        return Err(ProtocolError::UnsupportedVersion(version));
    }
    let kind = FrameKind::try_from(bytes[1]).map_err(|_| ProtocolError::UnknownFrameKind(bytes[1]))?;
    let code = u16::from_be_bytes([bytes[2], bytes[3]]);
    let status = i32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    let payload_len = u32::from_be_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as usize;
    if payload_len > MAX_PAYLOAD_SIZE {
        return Err(ProtocolError::PayloadTooLarge(payload_len));
    }
    let mut seq = [0u8; 8];
    seq.copy_from_slice(&bytes[12..20]);
    Ok(Header {
        kind,
        code,
        status,
        payload_len,
        seq: u64::from_be_bytes(seq),
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
