//! Reliable-datagram transport: sequencing, checksummed framing,
//! acknowledgments, duplicate suppression, and exponential-backoff
//! retransmission layered over `tokio`'s UDP socket.

pub mod dedup;
pub mod error;
pub mod handler;
pub mod in_flight;
pub mod transport;

pub use error::{Result, TransportError};
pub use handler::Handler;
pub use transport::ReliableTransport;
pub use meshkv_wire::PacketType;

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    async fn bound_pair() -> (Arc<ReliableTransport>, SocketAddr, Arc<ReliableTransport>, SocketAddr) {
        let a = ReliableTransport::bind(0).unwrap();
        let b = ReliableTransport::bind(0).unwrap();
        let a_addr = a.local_addr().unwrap();
        let b_addr = b.local_addr().unwrap();
        a.start();
        b.start();
        (a, a_addr, b, b_addr)
    }

    #[tokio::test]
    async fn reliable_send_is_acked_and_dispatched_once() {
        let (a, a_addr, b, _b_addr) = bound_pair().await;
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);
        a.register_handler(
            PacketType::Heartbeat,
            Arc::new(move |_addr, _payload| {
                count_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );

        b.send_reliable(a_addr, PacketType::Heartbeat, &serde_json::json!({"node_id": "b"}))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(b.pending_count(), 0);

        a.stop().await;
        b.stop().await;
    }

    #[tokio::test]
    async fn duplicate_datagram_is_dispatched_once_but_still_acked() {
        let (a, a_addr, b, _b_addr) = bound_pair().await;
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);
        a.register_handler(
            PacketType::Heartbeat,
            Arc::new(move |_addr, _payload| {
                count_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );

        // Bypass the reliable-send seq counter: encode and send the same
        // frame twice by hand to simulate a retransmitted duplicate arriving
        // after its first ACK was lost in flight.
        let payload = serde_json::json!({"node_id": "b"});
        let frame = meshkv_wire::Frame::encode(PacketType::Heartbeat, 0, &payload).unwrap();
        let raw = b.raw_socket_for_tests();
        raw.send_to(&frame, a_addr).await.unwrap();
        raw.send_to(&frame, a_addr).await.unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        a.stop().await;
        b.stop().await;
    }

    #[tokio::test]
    async fn retransmission_succeeds_once_receiver_comes_online() {
        // Reserve a port with nothing bound to it yet, so the first
        // `send_reliable` reaches no socket and is silently lost — then bind
        // a real listener on that same port only after the first retry
        // timeout has already passed with no ACK.
        let probe = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        let target_port = probe.local_addr().unwrap().port();
        drop(probe);
        let target_addr: SocketAddr = ([127, 0, 0, 1], target_port).into();

        let a = ReliableTransport::bind(0).unwrap();
        a.start();

        a.send_reliable(
            target_addr,
            PacketType::Heartbeat,
            &serde_json::json!({"node_id": "a"}),
        )
        .await
        .unwrap();
        assert_eq!(a.pending_count(), 1);

        // First retry timeout is 500ms; wait past it while nothing listens.
        tokio::time::sleep(Duration::from_millis(650)).await;
        assert_eq!(a.pending_count(), 1, "send should still be unacked with no listener");

        let b = ReliableTransport::bind(target_port).unwrap();
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);
        b.register_handler(
            PacketType::Heartbeat,
            Arc::new(move |_addr, _payload| {
                count_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );
        b.start();

        // The second retry fires ~1000ms after the first; give it headroom.
        tokio::time::sleep(Duration::from_millis(1300)).await;

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(a.pending_count(), 0);

        a.stop().await;
        b.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn in_flight_entry_is_dropped_after_retries_exhausted() {
        let probe = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        let target_port = probe.local_addr().unwrap().port();
        drop(probe);
        let target_addr: SocketAddr = ([127, 0, 0, 1], target_port).into();

        let a = ReliableTransport::bind(0).unwrap();
        a.start();

        a.send_reliable(
            target_addr,
            PacketType::Heartbeat,
            &serde_json::json!({"node_id": "a"}),
        )
        .await
        .unwrap();
        assert_eq!(a.pending_count(), 1);

        // Nothing ever listens on target_addr, so every retry is lost too.
        // Backoff is 500ms, 1s, 2s, 4s, 8s, 8s (capped) — well under 25s of
        // virtual time for all MAX_RETRIES (5) attempts plus the give-up scan.
        tokio::time::advance(Duration::from_secs(25)).await;

        assert_eq!(a.pending_count(), 0);
        a.stop().await;
    }
}
