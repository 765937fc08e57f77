//! Wire framing for the mesh transport: the fixed 10-byte header, MD5-based
//! checksum, and packet type discriminants shared by every datagram.

pub mod error;
pub mod frame;
pub mod types;

pub use error::{Result, WireError};
pub use frame::{checksum, Frame, HEADER_LEN, MAX_PAYLOAD_SIZE, PROTOCOL_VERSION};
pub use types::PacketType;
