use bytes::Bytes;
use std::net::SocketAddr;
use tokio::time::Instant;

/// An unacknowledged reliable send, tracked by the retransmission scanner.
#[derive(Debug, Clone)]
pub struct InFlight {
    pub packet: Bytes,
    pub first_send: Instant,
    pub last_send: Instant,
    pub retries: u32,
    pub addr: SocketAddr,
}

impl InFlight {
    pub fn new(packet: Bytes, addr: SocketAddr, now: Instant) -> Self {
        InFlight {
            packet,
            first_send: now,
            last_send: now,
            retries: 0,
            addr,
        }
    }
}
