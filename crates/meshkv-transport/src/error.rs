use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("failed to bind UDP socket on {addr}: {source}")]
    Bind { addr: String, source: io::Error },
    #[error("failed to send datagram to {addr}: {source}")]
    Send { addr: String, source: io::Error },
}

pub type Result<T> = std::result::Result<T, TransportError>;
