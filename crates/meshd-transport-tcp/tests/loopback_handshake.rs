//! Drives scenario 1 (§8, the two-node happy path) over a real loopback
//! TCP socket: real framing, real parsing, real `AsyncRead`/`AsyncWrite`,
//! nothing mocked. The pure-engine version of the same scenario lives in
//! `meshd-core`'s `tests/scenarios.rs`; this is its end-to-end counterpart.

use std::net::SocketAddr;
use std::time::Duration;

use meshd_core::engine::{Engine, EngineCommand, EngineEvent, OperatorCommand, OperatorResponse};
use meshd_core::session::{LinkBlock, LinkBlockSet, LocalIdentity, Role};
use meshd_transport_tcp::{spawn_connection, SessionRegistry, TcpConnection, TcpListener, TcpSocketConfig};
use tokio::sync::{mpsc, oneshot};

fn spawn_engine(local: LocalIdentity, blocks: LinkBlockSet) -> (mpsc::Sender<EngineCommand>, SessionRegistry) {
    let (commands_tx, commands_rx) = mpsc::channel(32);
    let (events_tx, mut events_rx) = mpsc::channel(32);
    let registry = SessionRegistry::new();

    let engine = Engine::new(local, blocks);
    tokio::spawn(engine.run(commands_rx, events_tx));

    let dispatch_registry = registry.clone();
    tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            match event {
                EngineEvent::Send { session_id, line } => dispatch_registry.send_line(session_id, line).await,
                EngineEvent::Close { session_id } => dispatch_registry.close(session_id).await,
                EngineEvent::Dial { .. } => {}
            }
        }
    });

    (commands_tx, registry)
}

async fn map_len(commands: &mpsc::Sender<EngineCommand>) -> usize {
    let (reply, rx) = oneshot::channel();
    commands
        .send(EngineCommand::Operator { command: OperatorCommand::Map, reply })
        .await
        .unwrap();
    match rx.await.unwrap() {
        OperatorResponse::Map(entries) => entries.len(),
        _ => unreachable!(),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn two_nodes_complete_handshake_and_burst_over_real_sockets() {
    let (b_commands, b_registry) = spawn_engine(
        LocalIdentity { name: "b.example".into(), description: "B".into() },
        LinkBlockSet::new(vec![LinkBlock {
            name: "a.example".into(),
            ip_addr: "127.0.0.1".into(),
            port: 0,
            send_pass: "r".into(),
            recv_pass: "s".into(),
        }]),
    );
    let (a_commands, a_registry) = spawn_engine(
        LocalIdentity { name: "a.example".into(), description: "A".into() },
        LinkBlockSet::new(vec![LinkBlock {
            name: "b.example".into(),
            ip_addr: "127.0.0.1".into(),
            port: 0,
            send_pass: "s".into(),
            recv_pass: "r".into(),
        }]),
    );

    let listener = TcpListener::bind("127.0.0.1:0".parse::<SocketAddr>().unwrap()).await.unwrap();
    let listen_addr = listener.local_addr();

    let accept_commands = b_commands.clone();
    let accept_registry = b_registry.clone();
    tokio::spawn(async move {
        let connection = listener.accept(TcpSocketConfig::new()).await.unwrap();
        let peer_label = connection.peer_addr.to_string();
        spawn_connection(connection, Role::Inbound, peer_label, accept_commands, accept_registry, Duration::from_secs(5)).await;
    });

    let outbound = TcpConnection::connect(listen_addr, TcpSocketConfig::new()).await.unwrap();
    spawn_connection(outbound, Role::Outbound, "b.example".to_string(), a_commands.clone(), a_registry, Duration::from_secs(5)).await;

    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(map_len(&a_commands).await, 2);
    assert_eq!(map_len(&b_commands).await, 2);
}
