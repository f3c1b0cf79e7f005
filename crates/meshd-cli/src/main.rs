//! The meshd link daemon binary.
//!
//! Wires the transport-free [`meshd_core::engine::Engine`] to real TCP
//! sockets and a TOML config file, and exposes the operator surface (§10.6)
//! as a line-oriented command prompt on stdin, about as much of "the
//! surrounding daemon's command dispatcher" as this crate can stand in for
//! without inventing client/channel machinery it does not own. Process-level
//! concerns (daemonization, signal handling beyond a plain Ctrl-C, log
//! sinks) stay out of scope; this binary only does enough of that to be
//! runnable standalone.

mod config_file;

use std::net::SocketAddr;
use std::time::Duration;

use config_file::TomlConfigurationSource;
use meshd_core::config::{self, ConfigurationSource};
use meshd_core::engine::{Engine, EngineCommand, EngineEvent, OperatorCommand, OperatorResponse};
use meshd_core::session::{LinkBlockSet, LocalIdentity, Role};
use meshd_transport_tcp::{spawn_connection, SessionRegistry, TcpConnection, TcpListener, TcpSocketConfig};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, oneshot};
use tracing_subscriber::EnvFilter;

/// Per-link handshake deadline (§5): "on the order of 10 seconds." The
/// configuration shape this crate reads (§6) carries no per-link override,
/// so one constant covers every session.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config_path = std::env::args().nth(1).unwrap_or_else(|| "meshd.toml".to_string());
    let resolved = config::resolve(&TomlConfigurationSource::new(&config_path).load()?)?;
    tracing::info!(
        name = %resolved.local.name,
        binds = resolved.binds.len(),
        links = resolved.links.len(),
        "loaded configuration"
    );

    let local = LocalIdentity {
        name: resolved.local.name,
        description: resolved.local.description,
    };
    let engine = Engine::new(local, LinkBlockSet::new(resolved.links));

    let (commands_tx, commands_rx) = mpsc::channel(256);
    let (events_tx, events_rx) = mpsc::channel(256);
    let registry = SessionRegistry::new();

    tokio::spawn(engine.run(commands_rx, events_tx));
    tokio::spawn(dispatch_events(events_rx, commands_tx.clone(), registry.clone()));

    for bind in resolved.binds {
        match bind_addr(&bind.address, bind.port) {
            Ok(addr) => match TcpListener::bind(addr).await {
                Ok(listener) => {
                    tracing::info!(%addr, "listening for server links");
                    tokio::spawn(accept_loop(listener, commands_tx.clone(), registry.clone()));
                }
                Err(err) => tracing::error!(%addr, %err, "failed to bind server listener; skipping"),
            },
            Err(err) => tracing::error!(address = %bind.address, port = bind.port, %err, "invalid bind address; skipping"),
        }
    }

    tokio::select! {
        _ = operator_prompt(commands_tx) => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received Ctrl-C; shutting down");
        }
    }

    Ok(())
}

/// Forwards every [`EngineEvent`] the actor produces to its effect: a write
/// or close goes through the [`SessionRegistry`]; a `Dial` request spawns a
/// fresh outbound connection attempt (§4.5 `CONNECT`).
async fn dispatch_events(
    mut events: mpsc::Receiver<EngineEvent>,
    commands: mpsc::Sender<EngineCommand>,
    registry: SessionRegistry,
) {
    while let Some(event) = events.recv().await {
        match event {
            EngineEvent::Send { session_id, line } => registry.send_line(session_id, line).await,
            EngineEvent::Close { session_id } => registry.close(session_id).await,
            EngineEvent::Dial { name, ip_addr, port } => {
                let commands = commands.clone();
                let registry = registry.clone();
                tokio::spawn(async move {
                    if let Err(err) = dial(&name, &ip_addr, port, commands, registry).await {
                        tracing::error!(%name, %ip_addr, port, %err, "outbound connect failed");
                    }
                });
            }
        }
    }
}

/// Resolves and dials one configured peer, handing the resulting socket off
/// to [`spawn_connection`] as an outbound session keyed on the link's
/// configured name (§4.3's credential lookup depends on that key).
async fn dial(
    name: &str,
    ip_addr: &str,
    port: u16,
    commands: mpsc::Sender<EngineCommand>,
    registry: SessionRegistry,
) -> anyhow::Result<()> {
    let addr = tokio::net::lookup_host((ip_addr, port))
        .await?
        .next()
        .ok_or_else(|| anyhow::anyhow!("{ip_addr}:{port} resolved to no addresses"))?;
    let connection = TcpConnection::connect(addr, TcpSocketConfig::new()).await?;
    spawn_connection(
        connection,
        Role::Outbound,
        name.to_string(),
        commands,
        registry,
        HANDSHAKE_TIMEOUT,
    )
    .await;
    Ok(())
}

/// Accepts connections for the lifetime of one listener, handing each off
/// to [`spawn_connection`] as an inbound session keyed on the peer's
/// address until its `SERVER` offer names it (§4.3).
async fn accept_loop(listener: TcpListener, commands: mpsc::Sender<EngineCommand>, registry: SessionRegistry) {
    loop {
        match listener.accept(TcpSocketConfig::new()).await {
            Ok(connection) => {
                let peer_label = connection.peer_addr.to_string();
                spawn_connection(
                    connection,
                    Role::Inbound,
                    peer_label,
                    commands.clone(),
                    registry.clone(),
                    HANDSHAKE_TIMEOUT,
                )
                .await;
            }
            Err(err) => {
                tracing::warn!(%err, "accept failed; listener continuing");
            }
        }
    }
}

/// A `*` bind address means "any interface" (§6); anything else must parse
/// as a concrete IP.
fn bind_addr(address: &str, port: u16) -> anyhow::Result<SocketAddr> {
    if address == "*" {
        return Ok(SocketAddr::from(([0, 0, 0, 0], port)));
    }
    Ok(SocketAddr::new(address.parse()?, port))
}

/// A minimal line-oriented stand-in for the surrounding daemon's operator
/// command dispatcher (§6, §10.6): `CONNECT`, `SQUIT`, `MAP`, `LUSERS`, and
/// `LINKS`, one per line of stdin, replies printed to stdout. Returns once
/// stdin reaches EOF.
async fn operator_prompt(commands: mpsc::Sender<EngineCommand>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) | Err(_) => return,
        };
        let Some(command) = parse_operator_line(&line) else {
            if !line.trim().is_empty() {
                println!("unrecognized operator command: {line}");
            }
            continue;
        };
        let (reply, rx) = oneshot::channel();
        if commands.send(EngineCommand::Operator { command, reply }).await.is_err() {
            return;
        }
        if let Ok(response) = rx.await {
            print_operator_response(response);
        }
    }
}

fn parse_operator_line(line: &str) -> Option<OperatorCommand> {
    let mut words = line.trim().splitn(2, char::is_whitespace);
    let verb = words.next()?.to_ascii_uppercase();
    let rest = words.next().unwrap_or("").trim().to_string();
    match verb.as_str() {
        "CONNECT" if !rest.is_empty() => Some(OperatorCommand::Connect(rest)),
        "SQUIT" if !rest.is_empty() => Some(OperatorCommand::Squit(rest)),
        "MAP" => Some(OperatorCommand::Map),
        "LUSERS" => Some(OperatorCommand::Lusers),
        "LINKS" => Some(OperatorCommand::Links),
        _ => None,
    }
}

fn print_operator_response(response: OperatorResponse) {
    match response {
        OperatorResponse::Connect(Ok(())) => println!("connecting"),
        OperatorResponse::Connect(Err(reason)) => println!("no matching server: {reason}"),
        OperatorResponse::Squit(Ok(())) => println!("squit issued"),
        OperatorResponse::Squit(Err(reason)) => println!("squit failed: {reason}"),
        OperatorResponse::Map(entries) => {
            for entry in entries {
                println!("{}{}", "  ".repeat(entry.depth), entry.name);
            }
        }
        OperatorResponse::Lusers(summary) => {
            println!(
                "{} server(s), {} user(s), {} oper(s)",
                summary.server_count, summary.user_count, summary.oper_count
            );
        }
        OperatorResponse::Links(entries) => {
            for entry in entries {
                println!("{} {} :{} {}", entry.name, entry.via, entry.hops, entry.description);
            }
        }
    }
}
