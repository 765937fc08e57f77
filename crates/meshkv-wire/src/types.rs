use crate::error::WireError;

/// Discriminant carried in byte 1 of every frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketType {
    Data = 0,
    Ack = 1,
    SyncRequest = 2,
    SyncResponse = 3,
    Heartbeat = 4,
    Discovery = 5,
}

impl PacketType {
    pub const fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for PacketType {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(PacketType::Data),
            1 => Ok(PacketType::Ack),
            2 => Ok(PacketType::SyncRequest),
            3 => Ok(PacketType::SyncResponse),
            4 => Ok(PacketType::Heartbeat),
            5 => Ok(PacketType::Discovery),
            other => Err(WireError::UnknownPacketType(other)),
        }
    }
}
