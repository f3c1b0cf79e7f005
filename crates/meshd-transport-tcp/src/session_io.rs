//! Bridges real TCP sockets to the transport-free engine/session pair.
//!
//! One task per connection frames and parses lines off the wire and feeds
//! them in as [`EngineCommand`]s; a [`SessionRegistry`] shared by all of
//! them routes each outbound [`EngineEvent`] back to the one socket it
//! belongs to. This is exactly the split §9 anticipated under "Polymorphic
//! socket callbacks": the engine only ever deals in [`SessionId`]s, never
//! a socket type.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use meshd_core::burst::BURST_MARKER;
use meshd_core::engine::{EngineCommand, SessionId};
use meshd_core::session::{LinkSession, Role};
use meshd_proto::{parse_line, FrameError, LineFramer};
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::time::Instant;

use crate::channel::TcpConnection;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

fn next_session_id() -> SessionId {
    NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed)
}

enum OutboundMessage {
    Line(String),
    Close,
}

struct RegistryEntry {
    sender: mpsc::UnboundedSender<OutboundMessage>,
    /// Flips once this session's burst has started, so the reader loop
    /// stops enforcing the handshake deadline (§4.3's deadline only governs
    /// registration, not a live link).
    handshake_done: Arc<AtomicBool>,
}

/// The table the dispatcher uses to route an engine event to the
/// connection task that owns the matching socket. Cheap to clone; every
/// connection task and the dispatcher task share one instance.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    entries: Arc<AsyncMutex<HashMap<SessionId, RegistryEntry>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    async fn register(&self, session_id: SessionId) -> (mpsc::UnboundedReceiver<OutboundMessage>, Arc<AtomicBool>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handshake_done = Arc::new(AtomicBool::new(false));
        self.entries.lock().await.insert(
            session_id,
            RegistryEntry {
                sender: tx,
                handshake_done: Arc::clone(&handshake_done),
            },
        );
        (rx, handshake_done)
    }

    async fn unregister(&self, session_id: SessionId) {
        self.entries.lock().await.remove(&session_id);
    }

    /// Forwards one line to a session's socket. A no-op if the session has
    /// already closed out from under the caller.
    pub async fn send_line(&self, session_id: SessionId, line: String) {
        let entries = self.entries.lock().await;
        if let Some(entry) = entries.get(&session_id) {
            if line == BURST_MARKER {
                entry.handshake_done.store(true, Ordering::Relaxed);
            }
            let _ = entry.sender.send(OutboundMessage::Line(line));
        }
    }

    /// Requests that a session's socket be closed.
    pub async fn close(&self, session_id: SessionId) {
        let entries = self.entries.lock().await;
        if let Some(entry) = entries.get(&session_id) {
            let _ = entry.sender.send(OutboundMessage::Close);
        }
    }
}

/// Hands a freshly accepted or dialed connection off to its own reader and
/// writer tasks, registers a [`LinkSession`] with the engine, and (for
/// outbound connections) immediately reports it connected. Returns the
/// session id the caller should use to recognize this connection in
/// subsequent engine events.
///
/// `peer_label` is what the session is keyed on for credential lookup
/// (§4.3): for an outbound dial this must be the configured `<link>`
/// name being called, since that's what `LinkBlockSet::by_name` matches
/// against; for an inbound accept, the peer's address is all that's known
/// until its `SERVER` offer arrives, so that's what's passed.
pub async fn spawn_connection(
    connection: TcpConnection,
    role: Role,
    peer_label: String,
    commands: mpsc::Sender<EngineCommand>,
    registry: SessionRegistry,
    handshake_timeout: Duration,
) -> SessionId {
    let session_id = next_session_id();
    let (read_half, write_half) = tokio::io::split(connection.stream);
    let (outbound_rx, handshake_done) = registry.register(session_id).await;

    let session = if role == Role::Outbound {
        LinkSession::new_outbound(peer_label)
    } else {
        LinkSession::new_inbound(peer_label)
    };
    let _ = commands.send(EngineCommand::Register { session_id, session }).await;
    if role == Role::Outbound {
        let _ = commands.send(EngineCommand::Connected { session_id }).await;
    }

    tokio::spawn(writer_loop(write_half, outbound_rx));
    tokio::spawn(reader_loop(
        session_id,
        read_half,
        commands,
        handshake_done,
        handshake_timeout,
        registry,
    ));

    session_id
}

async fn writer_loop(mut write_half: WriteHalf<TcpStream>, mut outbound: mpsc::UnboundedReceiver<OutboundMessage>) {
    while let Some(message) = outbound.recv().await {
        match message {
            OutboundMessage::Line(line) => {
                if write_half.write_all(line.as_bytes()).await.is_err() {
                    break;
                }
                if write_half.write_all(b"\r\n").await.is_err() {
                    break;
                }
            }
            OutboundMessage::Close => {
                let _ = write_half.shutdown().await;
                break;
            }
        }
    }
}

async fn reader_loop(
    session_id: SessionId,
    mut read_half: ReadHalf<TcpStream>,
    commands: mpsc::Sender<EngineCommand>,
    handshake_done: Arc<AtomicBool>,
    handshake_timeout: Duration,
    registry: SessionRegistry,
) {
    let mut framer = LineFramer::new();
    let deadline = Instant::now() + handshake_timeout;
    let mut buf = [0u8; 4096];

    'reading: loop {
        tokio::select! {
            _ = tokio::time::sleep_until(deadline), if !handshake_done.load(Ordering::Relaxed) => {
                let _ = commands.send(EngineCommand::Timeout { session_id }).await;
                break 'reading;
            }
            read_result = read_half.read(&mut buf) => {
                match read_result {
                    Ok(0) | Err(_) => {
                        let _ = commands.send(EngineCommand::Closed { session_id }).await;
                        break 'reading;
                    }
                    Ok(n) => {
                        framer.push(&buf[..n]);
                        loop {
                            match framer.next_line() {
                                Ok(Some(line)) => match parse_line(&line) {
                                    Ok(message) => {
                                        let _ = commands.send(EngineCommand::Line { session_id, message }).await;
                                    }
                                    Err(err) => {
                                        tracing::warn!(session_id, %err, "malformed line; closing session");
                                        let _ = commands
                                            .send(EngineCommand::Malformed {
                                                session_id,
                                                reason: err.to_string(),
                                            })
                                            .await;
                                        break 'reading;
                                    }
                                },
                                Ok(None) => break,
                                Err(FrameError::FrameTooLong { seen, limit }) => {
                                    tracing::warn!(session_id, seen, limit, "peer exceeded the frame budget");
                                    let _ = commands.send(EngineCommand::Closed { session_id }).await;
                                    break 'reading;
                                }
                            }
                        }
                    }
                }
            }
        }
    }

    registry.unregister(session_id).await;
}
