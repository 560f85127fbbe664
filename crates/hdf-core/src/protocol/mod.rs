//! Protocol module containing frame types and the binary codec.

pub mod codec;
pub mod messages;

pub use codec::{decode_frame, encode_frame, read_frame, ProtocolError};
pub use messages::*;
