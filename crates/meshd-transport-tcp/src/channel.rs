//! Socket-level configuration and connection establishment.
//!
//! Matches the `spark-transport-tcp` channel wrapper, trimmed to what a
//! line-oriented session needs: no pipeline binding, no backpressure
//! polling, no half-close choreography, just a stream plus its address
//! metadata and the one socket option this daemon cares about
//! (`SO_LINGER`, via `socket2`).

use std::net::SocketAddr;
use std::time::Duration;

use meshd_core::CoreError;
use socket2::SockRef;
use tokio::net::TcpStream;

/// Socket-level options applied once a connection is established.
#[derive(Clone, Copy, Debug, Default)]
pub struct TcpSocketConfig {
    linger: Option<Duration>,
}

impl TcpSocketConfig {
    pub const fn new() -> Self {
        Self { linger: None }
    }

    /// Sets `SO_LINGER`. `None` (the default) leaves the kernel's default
    /// close behavior in place.
    pub fn with_linger(mut self, linger: Option<Duration>) -> Self {
        self.linger = linger;
        self
    }

    pub fn linger(&self) -> Option<Duration> {
        self.linger
    }

    fn apply(&self, stream: &TcpStream) -> std::io::Result<()> {
        SockRef::from(stream).set_linger(self.linger)
    }
}

/// An accepted or dialed TCP connection with its address metadata already
/// resolved.
#[derive(Debug)]
pub struct TcpConnection {
    pub stream: TcpStream,
    pub local_addr: SocketAddr,
    pub peer_addr: SocketAddr,
}

impl TcpConnection {
    pub(crate) fn from_stream(stream: TcpStream, config: TcpSocketConfig) -> Result<Self, CoreError> {
        config.apply(&stream).map_err(CoreError::Transport)?;
        let local_addr = stream.local_addr().map_err(CoreError::Transport)?;
        let peer_addr = stream.peer_addr().map_err(CoreError::Transport)?;
        Ok(Self {
            stream,
            local_addr,
            peer_addr,
        })
    }

    /// Dials `addr`, the outbound half of a configured `<link>` (§3).
    pub async fn connect(addr: SocketAddr, config: TcpSocketConfig) -> Result<Self, CoreError> {
        let stream = TcpStream::connect(addr).await.map_err(CoreError::Transport)?;
        Self::from_stream(stream, config)
    }
}
