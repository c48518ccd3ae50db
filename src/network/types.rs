use chrono::{DateTime, Utc};
use std::net::SocketAddr;
use tokio::net::TcpStream;

/// An accepted connection on its way to the admission controller.
///
/// Generic over the stream so tests can drive the same path with in-memory
/// streams.
pub struct ConnectionRequest<S = TcpStream> {
    pub stream: S,
    pub client_addr: SocketAddr,
    pub timestamp: DateTime<Utc>,
}

impl<S> ConnectionRequest<S> {
    pub fn new(stream: S, client_addr: SocketAddr) -> Self {
        Self {
            stream,
            client_addr,
            timestamp: Utc::now(),
        }
    }
}
