use thiserror::Error;

#[derive(Error, Debug)]
pub enum WireError {
    #[error("frame shorter than the {0}-byte header")]
    TooShort(usize),
    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u8),
    #[error("unknown packet type byte {0:#04x}")]
    UnknownPacketType(u8),
    #[error("checksum mismatch: frame claims {expected:#010x}, computed {actual:#010x}")]
    ChecksumMismatch { expected: u32, actual: u32 },
    #[error("payload of {0} bytes exceeds the {1}-byte maximum for a single datagram")]
    PayloadTooLarge(usize, usize),
    #[error("payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, WireError>;
