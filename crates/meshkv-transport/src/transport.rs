use crate::dedup::ReceivedSeqs;
use crate::error::{Result, TransportError};
use crate::handler::{Handler, HandlerRegistry};
use crate::in_flight::InFlight;
use bytes::Bytes;
use dashmap::DashMap;
use log::{debug, trace, warn};
use meshkv_wire::{Frame, PacketType};
use serde::Serialize;
use serde_json::{json, Value};
use socket2::{Domain, Socket, Type};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::time::{Duration, Instant};

const RETRANSMIT_SCAN_INTERVAL: Duration = Duration::from_millis(100);
const INITIAL_TIMEOUT: Duration = Duration::from_millis(500);
const MAX_TIMEOUT: Duration = Duration::from_secs(8);
const MAX_RETRIES: u32 = 5;
const RECV_BUF_SIZE: usize = 65_536;

/// Reliable-datagram transport: framing, checksums, ACKs, retransmission,
/// and per-peer duplicate suppression on top of a `tokio` UDP socket.
pub struct ReliableTransport {
    socket: Arc<UdpSocket>,
    next_seq: AtomicU32,
    in_flight: DashMap<u32, InFlight>,
    received: ReceivedSeqs,
    handlers: HandlerRegistry,
    running: Arc<AtomicBool>,
    tasks: std::sync::Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl ReliableTransport {
    /// Binds `0.0.0.0:port` with `SO_REUSEADDR` set, via a `socket2` builder
    /// converted into a `tokio::net::UdpSocket`.
    pub fn bind(port: u16) -> Result<Arc<Self>> {
        let addr: SocketAddr = ([0, 0, 0, 0], port).into();
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, None).map_err(|source| {
            TransportError::Bind {
                addr: addr.to_string(),
                source,
            }
        })?;
        socket.set_reuse_address(true).map_err(|source| TransportError::Bind {
            addr: addr.to_string(),
            source,
        })?;
        socket
            .set_nonblocking(true)
            .map_err(|source| TransportError::Bind {
                addr: addr.to_string(),
                source,
            })?;
        socket
            .bind(&addr.into())
            .map_err(|source| TransportError::Bind {
                addr: addr.to_string(),
                source,
            })?;

        let std_socket: std::net::UdpSocket = socket.into();
        let tokio_socket =
            UdpSocket::from_std(std_socket).map_err(|source| TransportError::Bind {
                addr: addr.to_string(),
                source,
            })?;

        debug!("reliable transport bound to {addr}");

        Ok(Arc::new(ReliableTransport {
            socket: Arc::new(tokio_socket),
            next_seq: AtomicU32::new(0),
            in_flight: DashMap::new(),
            received: ReceivedSeqs::new(),
            handlers: HandlerRegistry::new(),
            running: Arc::new(AtomicBool::new(false)),
            tasks: std::sync::Mutex::new(Vec::new()),
        }))
    }

    /// Installs `handler` for `packet_type`; overwrites any previous one.
    pub fn register_handler(&self, packet_type: PacketType, handler: Handler) {
        self.handlers.register(packet_type, handler);
    }

    /// Number of reliable sends awaiting an ACK.
    pub fn pending_count(&self) -> usize {
        self.in_flight.len()
    }

    /// The socket's bound local address, useful when `bind` was called with
    /// port `0` (tests, ephemeral-port nodes).
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    #[cfg(test)]
    pub(crate) fn raw_socket_for_tests(&self) -> Arc<UdpSocket> {
        Arc::clone(&self.socket)
    }

    fn next_seq(&self) -> u32 {
        self.next_seq.fetch_add(1, Ordering::Relaxed)
    }

    /// Sends `payload` once, tracking it for retransmission until ACKed or
    /// the retry budget is exhausted. Fails only if the initial socket send
    /// fails; silent loss afterward is recovered by the retransmission
    /// scanner or the next periodic sync, and is not surfaced as an error.
    pub async fn send_reliable<T: Serialize>(
        &self,
        addr: SocketAddr,
        packet_type: PacketType,
        payload: &T,
    ) -> Result<u32> {
        let seq = self.next_seq();
        let packet = self.encode_and_send(addr, packet_type, seq, payload).await?;
        self.in_flight
            .insert(seq, InFlight::new(packet, addr, Instant::now()));
        Ok(seq)
    }

    /// Sends `payload` once with no retransmission tracking.
    pub async fn send_unreliable<T: Serialize>(
        &self,
        addr: SocketAddr,
        packet_type: PacketType,
        payload: &T,
    ) -> Result<u32> {
        let seq = self.next_seq();
        self.encode_and_send(addr, packet_type, seq, payload).await?;
        Ok(seq)
    }

    async fn encode_and_send<T: Serialize>(
        &self,
        addr: SocketAddr,
        packet_type: PacketType,
        seq: u32,
        payload: &T,
    ) -> Result<Bytes> {
        let encoded = match Frame::encode(packet_type, seq, payload) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!("dropping oversized outbound {packet_type:?} to {addr}: {err}");
                return Err(TransportError::Send {
                    addr: addr.to_string(),
                    source: std::io::Error::other(err.to_string()),
                });
            }
        };
        self.socket
            .send_to(&encoded, addr)
            .await
            .map_err(|source| TransportError::Send {
                addr: addr.to_string(),
                source,
            })?;
        Ok(encoded.freeze())
    }

    async fn send_ack(&self, addr: SocketAddr, acked_seq: u32) {
        let seq = self.next_seq();
        let payload = json!({ "ack": acked_seq });
        if let Ok(encoded) = Frame::encode(PacketType::Ack, seq, &payload) {
            if let Err(err) = self.socket.send_to(&encoded, addr).await {
                warn!("failed to send ACK for seq {acked_seq} to {addr}: {err}");
            }
        }
    }

    /// Spawns the receive loop and retransmission scanner tasks. Idempotent
    /// against repeated calls is not guaranteed; callers start a transport
    /// exactly once.
    pub fn start(self: &Arc<Self>) {
        self.running.store(true, Ordering::SeqCst);

        let recv_transport = Arc::clone(self);
        let recv_task = tokio::spawn(async move { recv_transport.receive_loop().await });

        let retry_transport = Arc::clone(self);
        let retry_task = tokio::spawn(async move { retry_transport.retransmit_loop().await });

        self.tasks.lock().unwrap().extend([recv_task, retry_task]);
    }

    /// Stops background tasks, waiting up to one second for each to finish
    /// before aborting it. Pending retransmissions are abandoned.
    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        let tasks: Vec<_> = self.tasks.lock().unwrap().drain(..).collect();
        for task in tasks {
            let abort_handle = task.abort_handle();
            if tokio::time::timeout(Duration::from_secs(1), task).await.is_err() {
                warn!("transport task did not stop within 1s, aborting");
                abort_handle.abort();
            }
        }
    }

    async fn receive_loop(self: Arc<Self>) {
        let mut buf = vec![0u8; RECV_BUF_SIZE];
        while self.running.load(Ordering::SeqCst) {
            let recv = tokio::time::timeout(Duration::from_millis(100), self.socket.recv_from(&mut buf)).await;
            let (len, src) = match recv {
                Ok(Ok(pair)) => pair,
                Ok(Err(err)) => {
                    warn!("datagram receive error: {err}");
                    continue;
                }
                Err(_) => continue, // poll timeout, re-check `running`
            };
            self.handle_datagram(&buf[..len], src).await;
        }
    }

    async fn handle_datagram(&self, data: &[u8], src: SocketAddr) {
        let frame = match Frame::decode(data) {
            Ok(frame) => frame,
            Err(err) => {
                trace!("dropping datagram from {src}: {err}");
                return;
            }
        };

        if frame.packet_type == PacketType::Ack {
            if let Ok(body) = frame.payload_as::<Value>() {
                if let Some(acked) = body.get("ack").and_then(Value::as_u64) {
                    self.in_flight.remove(&(acked as u32));
                }
            }
            return;
        }

        if self.received.check_and_insert(src, frame.seq) {
            // Duplicate: re-ACK, don't dispatch.
            self.send_ack(src, frame.seq).await;
            return;
        }

        self.send_ack(src, frame.seq).await;

        match frame.payload_as::<Value>() {
            Ok(payload) => self.handlers.dispatch(frame.packet_type, src, payload),
            Err(err) => warn!("dropping undecodable payload from {src}: {err}"),
        }
    }

    async fn retransmit_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(RETRANSMIT_SCAN_INTERVAL);
        while self.running.load(Ordering::SeqCst) {
            ticker.tick().await;
            self.scan_in_flight().await;
        }
    }

    async fn scan_in_flight(&self) {
        let now = Instant::now();
        let mut to_retry = Vec::new();
        let mut to_drop = Vec::new();

        for entry in self.in_flight.iter() {
            let seq = *entry.key();
            let in_flight = entry.value();
            let timeout = std::cmp::min(
                INITIAL_TIMEOUT.saturating_mul(2u32.saturating_pow(in_flight.retries)),
                MAX_TIMEOUT,
            );
            if now.duration_since(in_flight.last_send) > timeout {
                if in_flight.retries >= MAX_RETRIES {
                    to_drop.push(seq);
                } else {
                    to_retry.push((seq, in_flight.packet.clone(), in_flight.addr));
                }
            }
        }

        for seq in to_drop {
            self.in_flight.remove(&seq);
            warn!("giving up on seq {seq} after {MAX_RETRIES} retries");
        }

        for (seq, packet, addr) in to_retry {
            if let Err(err) = self.socket.send_to(&packet, addr).await {
                warn!("retransmit of seq {seq} to {addr} failed: {err}");
                continue;
            }
            if let Some(mut entry) = self.in_flight.get_mut(&seq) {
                entry.retries += 1;
                entry.last_send = Instant::now();
            }
            debug!("retransmitted seq {seq} to {addr}");
        }
    }
}
