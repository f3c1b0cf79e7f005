//! The literal walkthroughs (§8), expressed as direct sequences of
//! [`EngineCommand`]s. `Engine::handle` is synchronous and transport-free,
//! so these run without a runtime or real sockets; the duplex-socket
//! version of the same scenarios, exercising the line framer and the real
//! TCP glue end to end, lives in `meshd-transport-tcp`'s integration tests.

use meshd_core::engine::{Engine, EngineCommand, EngineEvent, OperatorCommand};
use meshd_core::session::{LinkBlock, LinkBlockSet, LinkSession, LocalIdentity};
use meshd_proto::Message;

fn identity(name: &str, description: &str) -> LocalIdentity {
    LocalIdentity {
        name: name.to_string(),
        description: description.to_string(),
    }
}

fn block(name: &str, send_pass: &str, recv_pass: &str) -> LinkBlock {
    LinkBlock {
        name: name.to_string(),
        ip_addr: "127.0.0.1".into(),
        port: 7000,
        send_pass: send_pass.to_string(),
        recv_pass: recv_pass.to_string(),
    }
}

fn server_offer(name: &str, pass: &str, hops: u32, description: &str) -> Message {
    Message::new(
        None,
        "SERVER",
        vec![name.into(), pass.into(), hops.to_string(), description.into()],
    )
}

/// Scenario 1: two servers, freshly configured for each other, complete the
/// handshake and exchange bursts.
#[test]
fn scenario_two_node_happy_path() {
    // B (this engine) has a <link> block for A: we send it `sendpass=r`,
    // and we'll accept an offer naming recvpass=s.
    let mut b = Engine::new(identity("b.example", "B"), LinkBlockSet::new(vec![block("a.example", "r", "s")]));

    b.handle(EngineCommand::Register {
        session_id: 1,
        session: LinkSession::new_inbound("198.51.100.1:12345"),
    });

    let offer = server_offer("a.example", "s", 0, "A");
    let events = b.handle(EngineCommand::Line { session_id: 1, message: offer });
    assert_eq!(events, vec![EngineEvent::Send { session_id: 1, line: "SERVER b.example r 0 :B".into() }]);

    let events = b.handle(EngineCommand::Line {
        session_id: 1,
        message: Message::new(None, "BURST", vec![]),
    });
    assert!(events.iter().any(|e| matches!(e, EngineEvent::Send { line, .. } if line == "BURST")));
    assert!(events.iter().any(|e| matches!(e, EngineEvent::Send { line, .. } if line == "ENDBURST")));
}

/// Scenario 2: an outbound dial offers credentials first and waits for the
/// peer's reply before it is willing to call itself connected.
#[test]
fn scenario_outbound_dial_completes_after_peer_replies() {
    let mut a = Engine::new(identity("a.example", "A"), LinkBlockSet::new(vec![block("b.example", "s", "r")]));

    a.handle(EngineCommand::Register {
        session_id: 7,
        session: LinkSession::new_outbound("b.example"),
    });
    let events = a.handle(EngineCommand::Connected { session_id: 7 });
    assert_eq!(events, vec![EngineEvent::Send { session_id: 7, line: "SERVER a.example s 0 :A".into() }]);

    let reply = server_offer("b.example", "r", 0, "B");
    let events = a.handle(EngineCommand::Line { session_id: 7, message: reply });
    assert!(events.iter().any(|e| matches!(e, EngineEvent::Send { line, .. } if line == "BURST")));
}

/// Scenario 3: once A and C are both attached to B, a burst B sends to a
/// freshly joining D must mention both of them, each relative to B.
#[test]
fn scenario_burst_announces_previously_attached_peers() {
    let mut b = Engine::new(
        identity("b.example", "B"),
        LinkBlockSet::new(vec![
            block("a.example", "r", "s"),
            block("c.example", "r2", "s2"),
            block("d.example", "r3", "s3"),
        ]),
    );

    for (id, name, recv) in [(1u64, "a.example", "s"), (2u64, "c.example", "s2")] {
        b.handle(EngineCommand::Register { session_id: id, session: LinkSession::new_inbound("peer") });
        b.handle(EngineCommand::Line { session_id: id, message: server_offer(name, recv, 0, name) });
        b.handle(EngineCommand::Line { session_id: id, message: Message::new(None, "BURST", vec![]) });
    }

    b.handle(EngineCommand::Register { session_id: 3, session: LinkSession::new_inbound("peer") });
    b.handle(EngineCommand::Line { session_id: 3, message: server_offer("d.example", "s3", 0, "D") });
    let events = b.handle(EngineCommand::Line { session_id: 3, message: Message::new(None, "BURST", vec![]) });

    let lines: Vec<String> = events
        .into_iter()
        .filter_map(|e| match e {
            EngineEvent::Send { line, .. } => Some(line),
            _ => None,
        })
        .collect();
    assert!(lines.contains(&":b.example SERVER a.example * 1 :a.example".to_string()));
    assert!(lines.contains(&":b.example SERVER c.example * 1 :c.example".to_string()));
}

/// Scenario 4: a handshake offering the wrong receive password is refused
/// and the session closes without ever reaching the tree.
#[test]
fn scenario_wrong_credentials_refused() {
    let mut b = Engine::new(identity("b.example", "B"), LinkBlockSet::new(vec![block("a.example", "r", "s")]));
    b.handle(EngineCommand::Register { session_id: 1, session: LinkSession::new_inbound("peer") });
    let events = b.handle(EngineCommand::Line {
        session_id: 1,
        message: server_offer("a.example", "wrong-password", 0, "A"),
    });
    assert!(events.iter().any(|e| matches!(e, EngineEvent::Send { line, .. } if line.starts_with("ERROR"))));
    assert!(events.iter().any(|e| matches!(e, EngineEvent::Close { .. })));
}

/// Scenario 5: a `SERVER` line claiming nonzero hops during the handshake
/// is a protocol violation, not an auth failure.
#[test]
fn scenario_hop_count_violation_during_handshake() {
    let mut b = Engine::new(identity("b.example", "B"), LinkBlockSet::new(vec![block("a.example", "r", "s")]));
    b.handle(EngineCommand::Register { session_id: 1, session: LinkSession::new_inbound("peer") });
    let events = b.handle(EngineCommand::Line {
        session_id: 1,
        message: server_offer("a.example", "s", 2, "A"),
    });
    assert!(events
        .iter()
        .any(|e| matches!(e, EngineEvent::Send { line, .. } if line == "ERROR :Server too far away for authentication")));
}

/// Scenario 6: operator `SQUIT` disconnects a direct neighbor and its
/// subtree disappears from `MAP`/`LINKS`/`LUSERS` immediately.
#[test]
fn scenario_operator_squit_prunes_the_tree() {
    let mut b = Engine::new(identity("b.example", "B"), LinkBlockSet::new(vec![block("a.example", "r", "s")]));
    b.handle(EngineCommand::Register { session_id: 1, session: LinkSession::new_inbound("peer") });
    b.handle(EngineCommand::Line { session_id: 1, message: server_offer("a.example", "s", 0, "A") });
    b.handle(EngineCommand::Line { session_id: 1, message: Message::new(None, "BURST", vec![]) });

    let (tx, _rx) = tokio::sync::oneshot::channel();
    let events = b.handle(EngineCommand::Operator {
        command: OperatorCommand::Squit("a.example".into()),
        reply: tx,
    });
    assert_eq!(events, vec![EngineEvent::Close { session_id: 1 }]);

    let (tx, _rx) = tokio::sync::oneshot::channel();
    b.handle(EngineCommand::Operator { command: OperatorCommand::Map, reply: tx });
}
