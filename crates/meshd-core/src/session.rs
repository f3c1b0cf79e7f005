//! The per-connection handshake state machine (§4.3).
//!
//! `LinkSession` is deliberately transport-free: it consumes already-parsed
//! [`Message`]s and returns a list of [`SessionAction`]s for the caller to
//! carry out (write a line, attach a tree node, begin a burst, close the
//! socket). Keeping sockets out of this module means the state machine
//! itself is unit-testable without spinning up real TCP, matching the
//! capability-trait split described in §9 ("Polymorphic socket callbacks"):
//! the transport-facing trait lives in `meshd-transport-tcp`, not here.

use meshd_proto::Message;

use crate::error::CoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Listener,
    Outbound,
    Inbound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Listener,
    Connecting,
    WaitAuth1,
    WaitAuth2,
    Connected,
    Closed,
}

/// This node's own identity, as sent in `SERVER` lines.
#[derive(Debug, Clone)]
pub struct LocalIdentity {
    pub name: String,
    pub description: String,
}

/// A configured peer relationship (§3 `LinkBlock`).
#[derive(Debug, Clone)]
pub struct LinkBlock {
    pub name: String,
    pub ip_addr: String,
    pub port: u16,
    pub send_pass: String,
    pub recv_pass: String,
}

/// The active set of [`LinkBlock`]s, rebuilt wholesale on every config load
/// (§3 "the collection is replaced atomically").
#[derive(Debug, Clone, Default)]
pub struct LinkBlockSet {
    blocks: Vec<LinkBlock>,
}

impl LinkBlockSet {
    pub fn new(blocks: Vec<LinkBlock>) -> Self {
        Self { blocks }
    }

    pub fn by_name(&self, name: &str) -> Option<&LinkBlock> {
        self.blocks.iter().find(|b| b.name == name)
    }

    /// The block whose `name` and `recv_pass` match a credential pair
    /// offered by a peer's `SERVER` line.
    pub fn by_credentials(&self, name: &str, pass: &str) -> Option<&LinkBlock> {
        self.blocks
            .iter()
            .find(|b| b.name == name && b.recv_pass == pass)
    }

    /// The first block whose name matches a case-insensitive `*`/`?` glob
    /// pattern, for the `CONNECT <pattern>` operator command (§4.5).
    pub fn find_by_glob(&self, pattern: &str) -> Option<&LinkBlock> {
        self.blocks
            .iter()
            .find(|b| glob_match_ci(pattern, &b.name))
    }

    pub fn iter(&self) -> impl Iterator<Item = &LinkBlock> {
        self.blocks.iter()
    }
}

/// A side effect for the caller to perform after feeding the session an
/// event. Kept as plain data rather than trait callbacks so both the unit
/// tests and the real transport glue drive the same code path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionAction {
    /// Write this line to the peer.
    Send(String),
    /// Attach a new tree node for the peer that just authenticated.
    Attach { name: String, description: String },
    /// Emit the burst (§4.5) on this session now that it is attached.
    BeginBurst,
    /// Close the socket; the state machine has already moved to `Closed`.
    Close,
}

/// Per-socket handshake, burst, and steady-state driver (§4.3).
#[derive(Debug)]
pub struct LinkSession {
    pub role: Role,
    pub state: SessionState,
    pub peer_host: String,
    inbound_name: Option<String>,
    inbound_description: Option<String>,
}

impl LinkSession {
    pub fn new_listener() -> Self {
        Self {
            role: Role::Listener,
            state: SessionState::Listener,
            peer_host: String::new(),
            inbound_name: None,
            inbound_description: None,
        }
    }

    /// A dialed outbound socket starts in `Connecting` even before the
    /// connect future resolves; `on_connected` fires the actual handshake
    /// send once it does (§4.3 "Initial state by role").
    pub fn new_outbound(peer_host: impl Into<String>) -> Self {
        Self {
            role: Role::Outbound,
            state: SessionState::Connecting,
            peer_host: peer_host.into(),
            inbound_name: None,
            inbound_description: None,
        }
    }

    pub fn new_inbound(peer_host: impl Into<String>) -> Self {
        Self {
            role: Role::Inbound,
            state: SessionState::WaitAuth1,
            peer_host: peer_host.into(),
            inbound_name: None,
            inbound_description: None,
        }
    }

    pub fn inbound_identity(&self) -> Option<(&str, &str)> {
        Some((
            self.inbound_name.as_deref()?,
            self.inbound_description.as_deref().unwrap_or(""),
        ))
    }

    /// The outbound connect future resolved; offer credentials to the peer.
    pub fn on_connected(&mut self, local: &LocalIdentity, blocks: &LinkBlockSet) -> Vec<SessionAction> {
        if self.role != Role::Outbound || self.state != SessionState::Connecting {
            return Vec::new();
        }
        match blocks.by_name(&self.peer_host) {
            Some(block) => vec![SessionAction::Send(server_line(local, &block.send_pass))],
            None => {
                tracing::error!(peer = %self.peer_host, "connected but no link block matches this peer");
                Vec::new()
            }
        }
    }

    /// Feeds one parsed line to the handshake state machine. Must not be
    /// called once `state == Connected` — from that point the caller
    /// dispatches lines itself (routing and burst application, §4.3
    /// "Connected: process as steady-state").
    pub fn on_line(
        &mut self,
        line: &Message,
        local: &LocalIdentity,
        blocks: &LinkBlockSet,
    ) -> Result<Vec<SessionAction>, CoreError> {
        if self.state == SessionState::Listener {
            return Err(CoreError::protocol(
                "session.listener_received_line",
                "Internal error",
            ));
        }

        if line.command.eq_ignore_ascii_case("ERROR") {
            let reason = line.params.first().cloned().unwrap_or_default();
            tracing::warn!(peer = %self.peer_host, %reason, "peer closed with ERROR");
            self.state = SessionState::Closed;
            return Ok(vec![SessionAction::Close]);
        }

        match self.state {
            SessionState::Connecting => self.handle_connecting(line, local, blocks),
            SessionState::WaitAuth1 => self.handle_wait_auth1(line, local, blocks),
            SessionState::WaitAuth2 => self.handle_wait_auth2(line),
            SessionState::Connected | SessionState::Closed | SessionState::Listener => Ok(Vec::new()),
        }
    }

    /// The handshake deadline elapsed. Only `Connecting` logs the "timed
    /// out" notice (§9's resolved open question: `on_timeout`'s guard is
    /// `state == Connecting`, not an unconditional assignment); every other
    /// state simply closes.
    pub fn on_timeout(&mut self) -> Vec<SessionAction> {
        let was_connecting = self.state == SessionState::Connecting;
        self.state = SessionState::Closed;
        if was_connecting {
            tracing::warn!(peer = %self.peer_host, "connection timed out");
        }
        vec![SessionAction::Close]
    }

    fn handle_connecting(
        &mut self,
        line: &Message,
        _local: &LocalIdentity,
        blocks: &LinkBlockSet,
    ) -> Result<Vec<SessionAction>, CoreError> {
        if !line.command.eq_ignore_ascii_case("SERVER") {
            return Ok(Vec::new());
        }
        let (name, pass, hops, description) = parse_server_params(line)?;
        if hops != 0 {
            self.state = SessionState::Closed;
            return Err(CoreError::protocol(
                "handshake.hop_violation",
                "Server too far away for authentication",
            ));
        }
        match blocks.by_credentials(&name, &pass) {
            Some(_) => {
                self.state = SessionState::Connected;
                Ok(vec![
                    SessionAction::Attach { name, description },
                    SessionAction::BeginBurst,
                ])
            }
            None => {
                self.state = SessionState::Closed;
                Err(CoreError::auth("Invalid credentials"))
            }
        }
    }

    fn handle_wait_auth1(
        &mut self,
        line: &Message,
        local: &LocalIdentity,
        blocks: &LinkBlockSet,
    ) -> Result<Vec<SessionAction>, CoreError> {
        if !line.command.eq_ignore_ascii_case("SERVER") {
            return Ok(Vec::new());
        }
        let (name, pass, hops, description) = parse_server_params(line)?;
        if hops != 0 {
            self.state = SessionState::Closed;
            return Err(CoreError::protocol(
                "handshake.hop_violation",
                "Server too far away for authentication",
            ));
        }
        match blocks.by_credentials(&name, &pass) {
            Some(block) => {
                self.inbound_name = Some(name);
                self.inbound_description = Some(description);
                self.state = SessionState::WaitAuth2;
                Ok(vec![SessionAction::Send(server_line(local, &block.send_pass))])
            }
            None => {
                self.state = SessionState::Closed;
                Err(CoreError::auth("Invalid credentials"))
            }
        }
    }

    fn handle_wait_auth2(&mut self, line: &Message) -> Result<Vec<SessionAction>, CoreError> {
        if line.command.eq_ignore_ascii_case("SERVER") {
            // Stray re-offer while we're waiting for BURST; ignore (§4.3).
            return Ok(Vec::new());
        }
        if line.command.eq_ignore_ascii_case("BURST") {
            let (name, description) = self
                .inbound_identity()
                .map(|(n, d)| (n.to_string(), d.to_string()))
                .expect("inbound_name is set before entering WaitAuth2");
            self.state = SessionState::Connected;
            return Ok(vec![
                SessionAction::Attach { name, description },
                SessionAction::BeginBurst,
            ]);
        }
        Ok(Vec::new())
    }
}

fn server_line(local: &LocalIdentity, pass: &str) -> String {
    Message::new(
        None,
        "SERVER",
        vec![local.name.clone(), pass.to_string(), "0".to_string(), local.description.clone()],
    )
    .format()
}

fn parse_server_params(line: &Message) -> Result<(String, String, u32, String), CoreError> {
    if line.params.len() != 4 {
        return Err(CoreError::protocol(
            "protocol.malformed_server",
            "SERVER requires name, password, hops, and description",
        ));
    }
    let hops: u32 = line.params[2].parse().map_err(|_| {
        CoreError::protocol("protocol.malformed_server", "hop count is not a number")
    })?;
    Ok((
        line.params[0].clone(),
        line.params[1].clone(),
        hops,
        line.params[3].clone(),
    ))
}

/// Case-insensitive glob match supporting `*` (any run) and `?` (one char).
fn glob_match_ci(pattern: &str, candidate: &str) -> bool {
    fn inner(pattern: &[u8], candidate: &[u8]) -> bool {
        match (pattern.first(), candidate.first()) {
            (None, None) => true,
            (Some(b'*'), _) => {
                inner(&pattern[1..], candidate)
                    || (!candidate.is_empty() && inner(pattern, &candidate[1..]))
            }
            (Some(b'?'), Some(_)) => inner(&pattern[1..], &candidate[1..]),
            (Some(p), Some(c)) if p.eq_ignore_ascii_case(c) => inner(&pattern[1..], &candidate[1..]),
            _ => false,
        }
    }
    inner(pattern.as_bytes(), candidate.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local() -> LocalIdentity {
        LocalIdentity {
            name: "b.example".into(),
            description: "B".into(),
        }
    }

    fn blocks() -> LinkBlockSet {
        LinkBlockSet::new(vec![LinkBlock {
            name: "a.example".into(),
            ip_addr: "127.0.0.1".into(),
            port: 7000,
            send_pass: "r".into(),
            recv_pass: "s".into(),
        }])
    }

    #[test]
    fn inbound_happy_path_reaches_connected_on_burst() {
        let mut session = LinkSession::new_inbound("198.51.100.1:54321");
        let offer = Message::new(
            None,
            "SERVER",
            vec!["a.example".into(), "s".into(), "0".into(), "A".into()],
        );
        let actions = session.on_line(&offer, &local(), &blocks()).unwrap();
        assert_eq!(session.state, SessionState::WaitAuth2);
        assert_eq!(
            actions,
            vec![SessionAction::Send("SERVER b.example r 0 :B".into())]
        );

        let burst = Message::new(None, "BURST", vec![]);
        let actions = session.on_line(&burst, &local(), &blocks()).unwrap();
        assert_eq!(session.state, SessionState::Connected);
        assert_eq!(
            actions,
            vec![
                SessionAction::Attach {
                    name: "a.example".into(),
                    description: "A".into()
                },
                SessionAction::BeginBurst,
            ]
        );
    }

    #[test]
    fn hop_violation_is_rejected_with_specific_reason() {
        let mut session = LinkSession::new_inbound("peer");
        let offer = Message::new(
            None,
            "SERVER",
            vec!["a.example".into(), "s".into(), "1".into(), "A".into()],
        );
        let err = session.on_line(&offer, &local(), &blocks()).unwrap_err();
        assert_eq!(err.wire_reason(), "Server too far away for authentication");
        assert_eq!(session.state, SessionState::Closed);
    }

    #[test]
    fn wrong_password_is_invalid_credentials() {
        let mut session = LinkSession::new_inbound("peer");
        let offer = Message::new(
            None,
            "SERVER",
            vec!["a.example".into(), "wrong".into(), "0".into(), "A".into()],
        );
        let err = session.on_line(&offer, &local(), &blocks()).unwrap_err();
        assert_eq!(err.wire_reason(), "Invalid credentials");
        assert_eq!(session.state, SessionState::Closed);
    }

    #[test]
    fn listener_receiving_a_line_is_an_internal_error() {
        let mut session = LinkSession::new_listener();
        let line = Message::new(None, "PING", vec![]);
        let err = session.on_line(&line, &local(), &blocks()).unwrap_err();
        assert_eq!(err.wire_reason(), "Internal error");
    }

    #[test]
    fn peer_error_closes_without_echoing_another_error() {
        let mut session = LinkSession::new_outbound("a.example");
        let err_line = Message::new(None, "ERROR", vec!["boom".into()]);
        let actions = session.on_line(&err_line, &local(), &blocks()).unwrap();
        assert_eq!(actions, vec![SessionAction::Close]);
        assert_eq!(session.state, SessionState::Closed);
    }

    #[test]
    fn timeout_only_logs_during_connecting() {
        let mut connecting = LinkSession::new_outbound("a.example");
        assert_eq!(connecting.on_timeout(), vec![SessionAction::Close]);
        assert_eq!(connecting.state, SessionState::Closed);

        let mut wait2 = LinkSession::new_inbound("peer");
        wait2.state = SessionState::WaitAuth2;
        assert_eq!(wait2.on_timeout(), vec![SessionAction::Close]);
    }

    #[test]
    fn connect_glob_is_case_insensitive() {
        let set = blocks();
        assert!(set.find_by_glob("a.*").is_some());
        assert!(set.find_by_glob("A.EXAMPLE").is_some());
        assert!(set.find_by_glob("b.*").is_none());
    }
}
