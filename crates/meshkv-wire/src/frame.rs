use crate::error::{Result, WireError};
use crate::types::PacketType;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use md5::{Digest, Md5};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Only protocol version this implementation speaks. Frames carrying any
/// other value are dropped by the receive path rather than rejected here.
pub const PROTOCOL_VERSION: u8 = 1;

/// `version(1) + type(1) + seq(4) + checksum(4)`.
pub const HEADER_LEN: usize = 10;

/// Conservative UDP payload ceiling (IPv4, no fragmentation headroom).
pub const MAX_DATAGRAM_SIZE: usize = 65_507;

pub const MAX_PAYLOAD_SIZE: usize = MAX_DATAGRAM_SIZE - HEADER_LEN;

/// High 4 bytes of MD5(payload), read as a big-endian integer. Matches the
/// reference scheme of truncating `md5(payload).hexdigest()[:8]` to an int;
/// kept for wire compatibility even though a CRC would be cheaper and more
/// honest about the strength it provides.
pub fn checksum(payload: &[u8]) -> u32 {
    let mut hasher = Md5::new();
    hasher.update(payload);
    let digest = hasher.finalize();
    u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
}

/// A decoded datagram: header fields plus the raw (still-JSON) payload bytes.
#[derive(Debug, Clone)]
pub struct Frame {
    pub version: u8,
    pub packet_type: PacketType,
    pub seq: u32,
    pub payload: Bytes,
}

impl Frame {
    /// Serializes `payload` to JSON and packs it behind a frame header for
    /// `packet_type`/`seq`. Truncates oversized payloads to
    /// [`MAX_PAYLOAD_SIZE`] with the caller expected to log the truncation;
    /// a truncated payload will fail its own checksum at the receiver and
    /// be dropped, which is the intended "send failure" behavior.
    pub fn encode<T: Serialize>(
        packet_type: PacketType,
        seq: u32,
        payload: &T,
    ) -> Result<BytesMut> {
        let mut payload_bytes = serde_json::to_vec(payload)?;
        if payload_bytes.len() > MAX_PAYLOAD_SIZE {
            payload_bytes.truncate(MAX_PAYLOAD_SIZE);
        }
        let sum = checksum(&payload_bytes);

        let mut out = BytesMut::with_capacity(HEADER_LEN + payload_bytes.len());
        out.put_u8(PROTOCOL_VERSION);
        out.put_u8(packet_type.as_u8());
        out.put_u32(seq);
        out.put_u32(sum);
        out.put_slice(&payload_bytes);
        Ok(out)
    }

    /// Parses a received datagram. Returns `Err` for anything that should
    /// cause the caller to silently drop the datagram: short frames, an
    /// unsupported version, an unknown packet type, or a checksum mismatch.
    pub fn decode(data: &[u8]) -> Result<Frame> {
        if data.len() < HEADER_LEN {
            return Err(WireError::TooShort(HEADER_LEN));
        }

        let mut header = Bytes::copy_from_slice(&data[..HEADER_LEN]);
        let version = header.get_u8();
        if version != PROTOCOL_VERSION {
            return Err(WireError::UnsupportedVersion(version));
        }
        let packet_type = PacketType::try_from(header.get_u8())?;
        let seq = header.get_u32();
        let claimed_checksum = header.get_u32();

        let payload = &data[HEADER_LEN..];
        let actual_checksum = checksum(payload);
        if actual_checksum != claimed_checksum {
            return Err(WireError::ChecksumMismatch {
                expected: claimed_checksum,
                actual: actual_checksum,
            });
        }

        Ok(Frame {
            version,
            packet_type,
            seq,
            payload: Bytes::copy_from_slice(payload),
        })
    }

    /// Decodes the payload as JSON into `T`.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.payload)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn round_trips_header_and_payload() {
        let encoded = Frame::encode(PacketType::Heartbeat, 42, &json!({"node_id": "a"})).unwrap();
        let frame = Frame::decode(&encoded).unwrap();
        assert_eq!(frame.version, PROTOCOL_VERSION);
        assert_eq!(frame.packet_type, PacketType::Heartbeat);
        assert_eq!(frame.seq, 42);
        let value: serde_json::Value = frame.payload_as().unwrap();
        assert_eq!(value["node_id"], "a");
    }

    #[test]
    fn empty_payload_has_defined_checksum() {
        // MD5("") = d41d8cd98f00b204e9800998ecf8427e; high 4 bytes as a
        // big-endian u32 is the checksum a zero-length payload must produce.
        assert_eq!(checksum(b""), 0xd41d8cd9);

        let encoded = Frame::encode(PacketType::Ack, 0, &serde_json::Value::Null).unwrap();
        let frame = Frame::decode(&encoded).unwrap();
        assert_eq!(frame.packet_type, PacketType::Ack);
    }

    #[test]
    fn rejects_unknown_version() {
        let mut encoded = Frame::encode(PacketType::Data, 1, &json!(null)).unwrap();
        encoded[0] = 99;
        assert!(matches!(
            Frame::decode(&encoded),
            Err(WireError::UnsupportedVersion(99))
        ));
    }

    #[test]
    fn rejects_corrupted_payload() {
        let mut encoded = Frame::encode(PacketType::Data, 1, &json!({"x": 1})).unwrap();
        let last = encoded.len() - 1;
        encoded[last] ^= 0xFF;
        assert!(matches!(
            Frame::decode(&encoded),
            Err(WireError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn rejects_short_frame() {
        assert!(matches!(
            Frame::decode(&[0u8; 4]),
            Err(WireError::TooShort(HEADER_LEN))
        ));
    }
}
