//! A thin wrapper over Tokio's `TcpListener` (§6 `<bind type="servers">`),
//! matching `spark-transport-tcp::TcpListener`: bind, accept, report the
//! bound address. This crate has no `CallContext` equivalent, so
//! cancellation/deadline handling threaded through `accept` upstream is
//! left to the caller's own `tokio::select!`.

use std::net::SocketAddr;

use meshd_core::CoreError;
use tokio::net::TcpListener as TokioTcpListener;

use crate::channel::{TcpConnection, TcpSocketConfig};

#[derive(Debug)]
pub struct TcpListener {
    inner: TokioTcpListener,
    local_addr: SocketAddr,
}

impl TcpListener {
    pub async fn bind(addr: SocketAddr) -> Result<Self, CoreError> {
        let inner = TokioTcpListener::bind(addr).await.map_err(CoreError::Transport)?;
        let local_addr = inner.local_addr().map_err(CoreError::Transport)?;
        Ok(Self { inner, local_addr })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub async fn accept(&self, config: TcpSocketConfig) -> Result<TcpConnection, CoreError> {
        let (stream, _) = self.inner.accept().await.map_err(CoreError::Transport)?;
        TcpConnection::from_stream(stream, config)
    }
}
