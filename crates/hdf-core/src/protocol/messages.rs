//! Frame and request types of the manager ↔ host protocol.
//!
//! Every frame carries a fixed header and an opaque payload.  Requests put a
//! command code in the header and a `bincode`-encoded argument in the payload;
//! replies echo the request's sequence number and carry an `i32` status.

use serde::{de::DeserializeOwned, Serialize};

use super::codec::ProtocolError;
use crate::domain::device::{DeviceDescriptor, DeviceId};
use crate::domain::power::PowerState;

// ── Protocol constants ────────────────────────────────────────────────────────

/// Current protocol version byte.
pub const PROTOCOL_VERSION: u8 = 0x01;

/// Size of the frame header in bytes.
pub const HEADER_SIZE: usize = 20;

/// Largest payload a peer is allowed to announce.
pub const MAX_PAYLOAD_SIZE: usize = 1 << 20;

/// Command codes carried by request frames.
pub mod codes {
    /// Host → manager: the host is up.
    pub const ATTACH_HOST: u16 = 0x0001;
    /// Manager → host: add a device node.
    pub const ADD_DEVICE: u16 = 0x0101;
    /// Manager → host: remove a device node.
    pub const DEL_DEVICE: u16 = 0x0102;
    /// Manager → host: (re)start the host service.
    pub const START_SERVICE: u16 = 0x0103;
    /// Manager → host: propagate a power state.
    pub const PM_NOTIFY: u16 = 0x0104;
}

// ── Frames ────────────────────────────────────────────────────────────────────

/// Whether a frame asks for something or answers something.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameKind {
    Request = 0x01,
    Reply = 0x02,
}

impl TryFrom<u8> for FrameKind {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, ()> {
        match value {
            0x01 => Ok(FrameKind::Request),
            0x02 => Ok(FrameKind::Reply),
            _ => Err(()),
        }
    }
}

/// One unit on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub kind: FrameKind,
    /// Command code; zero in replies.
    pub code: u16,
    /// Call status; zero in requests.
    pub status: i32,
    /// Correlates a reply with its request.
    pub seq: u64,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn request(code: u16, seq: u64, payload: Vec<u8>) -> Self {
        Self {
            kind: FrameKind::Request,
            code,
            status: 0,
            seq,
            payload,
        }
    }

    pub fn reply(seq: u64, status: i32, payload: Vec<u8>) -> Self {
        Self {
            kind: FrameKind::Reply,
            code: 0,
            status,
            seq,
            payload,
        }
    }
}

// ── Requests ──────────────────────────────────────────────────────────────────

/// Decoded request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IpcRequest {
    AttachHost { host_id: u16 },
    AddDevice(DeviceDescriptor),
    DelDevice(DeviceId),
    StartService,
    PmNotify(PowerState),
}

impl IpcRequest {
    /// Command code for the frame header.
    pub fn code(&self) -> u16 {
        match self {
            IpcRequest::AttachHost { .. } => codes::ATTACH_HOST,
            IpcRequest::AddDevice(_) => codes::ADD_DEVICE,
            IpcRequest::DelDevice(_) => codes::DEL_DEVICE,
            IpcRequest::StartService => codes::START_SERVICE,
            IpcRequest::PmNotify(_) => codes::PM_NOTIFY,
        }
    }

    /// Encodes the request argument.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::MalformedPayload`] if serialization fails.
    pub fn encode_payload(&self) -> Result<Vec<u8>, ProtocolError> {
        match self {
            IpcRequest::AttachHost { host_id } => to_bytes(host_id),
            IpcRequest::AddDevice(descriptor) => encode_descriptor(descriptor),
            IpcRequest::DelDevice(device_id) => to_bytes(device_id),
            IpcRequest::StartService => Ok(Vec::new()),
            IpcRequest::PmNotify(state) => to_bytes(state),
        }
    }

    /// Decodes a request from its command code and payload.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::UnknownCode`] for codes outside [`codes`] and
    /// [`ProtocolError::MalformedPayload`] when the argument does not parse.
    pub fn decode(code: u16, payload: &[u8]) -> Result<Self, ProtocolError> {
        match code {
            codes::ATTACH_HOST => Ok(IpcRequest::AttachHost {
                host_id: from_bytes(payload)?,
            }),
            codes::ADD_DEVICE => decode_descriptor(payload).map(IpcRequest::AddDevice),
            codes::DEL_DEVICE => from_bytes(payload).map(IpcRequest::DelDevice),
            codes::START_SERVICE => Ok(IpcRequest::StartService),
            codes::PM_NOTIFY => from_bytes(payload).map(IpcRequest::PmNotify),
            other => Err(ProtocolError::UnknownCode(other)),
        }
    }
}

// ── Attribute serializer ──────────────────────────────────────────────────────

/// Serializes a device descriptor for the wire.
///
/// # Errors
///
/// Returns [`ProtocolError::MalformedPayload`] if serialization fails.
pub fn encode_descriptor(descriptor: &DeviceDescriptor) -> Result<Vec<u8>, ProtocolError> {
    to_bytes(descriptor)
}

/// Parses a device descriptor received from the wire.
///
/// # Errors
///
/// Returns [`ProtocolError::MalformedPayload`] if the bytes do not parse.
pub fn decode_descriptor(bytes: &[u8]) -> Result<DeviceDescriptor, ProtocolError> {
    from_bytes(bytes)
}

fn to_bytes<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, ProtocolError> {
    bincode::serialize(value).map_err(|e| ProtocolError::MalformedPayload(e.to_string()))
}

fn from_bytes<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, ProtocolError> {
    bincode::deserialize(bytes).map_err(|e| ProtocolError::MalformedPayload(e.to_string()))
}
