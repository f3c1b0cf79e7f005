//! Tokio TCP glue between real sockets and `meshd-core`'s transport-free
//! engine and session state machine.

mod channel;
mod listener;
mod session_io;

pub use channel::{TcpConnection, TcpSocketConfig};
pub use listener::TcpListener;
pub use session_io::{spawn_connection, SessionRegistry};
