use meshkv_wire::PacketType;
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;

/// A dispatch callback invoked on the receive path for each accepted,
/// deduplicated inbound message of a given [`PacketType`]. Handlers are
/// infallible by type: any fallibility inside a handler must be caught and
/// logged by the handler body itself, so a bad message can never take down
/// the receive task (see the error-handling notes on [`PacketType::Data`]
/// handling in the crate root docs).
pub type Handler = Arc<dyn Fn(SocketAddr, Value) + Send + Sync>;

#[derive(Default)]
pub struct HandlerRegistry {
    inner: dashmap::DashMap<u8, Handler>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs `handler` for `packet_type`. Re-registering a type silently
    /// overwrites the previous handler, matching the reference behavior for
    /// this kind of programmer error.
    pub fn register(&self, packet_type: PacketType, handler: Handler) {
        self.inner.insert(packet_type.as_u8(), handler);
    }

    pub fn dispatch(&self, packet_type: PacketType, addr: SocketAddr, payload: Value) {
        if let Some(handler) = self.inner.get(&packet_type.as_u8()) {
            handler(addr, payload);
        }
    }
}
