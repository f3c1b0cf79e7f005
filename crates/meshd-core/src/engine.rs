//! The single-owner actor that serializes every tree and session mutation
//! (§5, §10.1).
//!
//! `Engine` itself is synchronous and transport-free, exactly like
//! [`LinkSession`](crate::session::LinkSession): it consumes one
//! [`EngineCommand`] at a time and returns the [`EngineEvent`]s the caller
//! must carry out (write a line, close a socket, dial a new one, answer an
//! operator query). [`Engine::run`] is the thin actor loop around that pure
//! core, the only place this module touches `tokio`, so the state
//! transitions themselves stay unit-testable without a runtime.

use std::collections::HashMap;

use arc_swap::ArcSwap;
use meshd_proto::Message;
use tokio::sync::mpsc;

use crate::burst;
use crate::config::SpanningTreeConfig;
use crate::error::CoreError;
use crate::session::{LinkBlockSet, LinkSession, LocalIdentity, SessionAction, SessionState};
use crate::tree::{NodeId, ServerTree};

/// Identifies one socket-backed session. Assigned by the transport layer;
/// the engine treats it as an opaque handle.
pub type SessionId = u64;

/// Commands the engine accepts, one per inbound event from the transport
/// layer or an operator-command source (§10.6).
pub enum EngineCommand {
    /// A new socket exists and has been handed a fresh [`LinkSession`].
    Register {
        session_id: SessionId,
        session: LinkSession,
    },
    /// An outbound session's connect future resolved.
    Connected { session_id: SessionId },
    /// A line was framed and parsed off this session's socket.
    Line { session_id: SessionId, message: Message },
    /// A line was framed but failed to parse (§4.2), e.g. a prefix with no
    /// command. Always protocol-fatal.
    Malformed { session_id: SessionId, reason: String },
    /// This session's handshake deadline elapsed.
    Timeout { session_id: SessionId },
    /// The transport observed this socket close (EOF or I/O error).
    Closed { session_id: SessionId },
    /// A configuration reload replaced the active link blocks.
    ReloadConfig { config: SpanningTreeConfig },
    /// An operator command (§10.6), expecting a single reply.
    Operator {
        command: OperatorCommand,
        reply: ReplySender,
    },
}

/// A channel the caller can use to receive an [`OperatorResponse`]. Kept as
/// a trait object so `meshd-core` doesn't have to commit to `tokio::sync`
/// types inside `EngineCommand` beyond what `Engine::run` itself needs.
pub type ReplySender = tokio::sync::oneshot::Sender<OperatorResponse>;

/// Side effects for the caller to perform after one [`EngineCommand`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// Write this line to the named session's socket.
    Send { session_id: SessionId, line: String },
    /// Close the named session's socket.
    Close { session_id: SessionId },
    /// Dial a new outbound connection (from `CONNECT` or startup).
    Dial {
        name: String,
        ip_addr: String,
        port: u16,
    },
}

/// The four read-only operator commands plus `CONNECT` (§10.6). `SQUIT` and
/// `CONNECT` mutate the tree or trigger a dial; `MAP`/`LUSERS`/`LINKS` are
/// pure queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperatorCommand {
    Connect(String),
    Squit(String),
    Map,
    Lusers,
    Links,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapEntry {
    pub name: String,
    pub depth: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinksEntry {
    pub name: String,
    pub via: String,
    pub hops: usize,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LusersSummary {
    pub server_count: usize,
    pub user_count: u32,
    pub oper_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperatorResponse {
    Connect(Result<(), String>),
    Squit(Result<(), String>),
    Map(Vec<MapEntry>),
    Lusers(LusersSummary),
    Links(Vec<LinksEntry>),
}

pub struct Engine {
    local: LocalIdentity,
    tree: ServerTree<SessionId>,
    sessions: HashMap<SessionId, LinkSession>,
    attached: HashMap<SessionId, NodeId>,
    link_blocks: ArcSwap<LinkBlockSet>,
}

impl Engine {
    pub fn new(local: LocalIdentity, link_blocks: LinkBlockSet) -> Self {
        let tree = ServerTree::new(local.name.clone(), local.description.clone());
        Self {
            local,
            tree,
            sessions: HashMap::new(),
            attached: HashMap::new(),
            link_blocks: ArcSwap::from_pointee(link_blocks),
        }
    }

    /// The async actor loop: receives commands serially and forwards the
    /// events each one produces. Mutation only ever happens on whichever
    /// task owns this loop, satisfying §5's single-mutator requirement even
    /// though the surrounding runtime is multi-threaded.
    pub async fn run(mut self, mut commands: mpsc::Receiver<EngineCommand>, events: mpsc::Sender<EngineEvent>) {
        while let Some(command) = commands.recv().await {
            for event in self.handle(command) {
                if events.send(event).await.is_err() {
                    return;
                }
            }
        }
    }

    /// Processes one command and returns the events it produced. Pure aside
    /// from `&mut self`, so tests can drive it without a runtime.
    pub fn handle(&mut self, command: EngineCommand) -> Vec<EngineEvent> {
        match command {
            EngineCommand::Register { session_id, session } => {
                self.sessions.insert(session_id, session);
                Vec::new()
            }
            EngineCommand::Connected { session_id } => {
                let blocks = self.link_blocks.load_full();
                let Some(session) = self.sessions.get_mut(&session_id) else {
                    return Vec::new();
                };
                let actions = session.on_connected(&self.local, &blocks);
                self.apply_actions(session_id, actions)
            }
            EngineCommand::Line { session_id, message } => self.handle_line(session_id, message),
            EngineCommand::Malformed { session_id, reason } => {
                self.fail_session(session_id, CoreError::protocol("protocol.malformed_line", reason))
            }
            EngineCommand::Timeout { session_id } => {
                let Some(session) = self.sessions.get_mut(&session_id) else {
                    return Vec::new();
                };
                let actions = session.on_timeout();
                self.apply_actions(session_id, actions)
            }
            EngineCommand::Closed { session_id } => {
                self.detach(session_id);
                self.sessions.remove(&session_id);
                Vec::new()
            }
            EngineCommand::ReloadConfig { config } => {
                self.link_blocks
                    .store(std::sync::Arc::new(LinkBlockSet::new(config.links)));
                Vec::new()
            }
            EngineCommand::Operator { command, reply } => {
                let (events, response) = self.handle_operator(command);
                let _ = reply.send(response);
                events
            }
        }
    }

    fn handle_line(&mut self, session_id: SessionId, message: Message) -> Vec<EngineEvent> {
        let Some(session) = self.sessions.get(&session_id) else {
            return Vec::new();
        };
        if session.state == SessionState::Connected {
            return self.handle_steady_state_line(session_id, &message);
        }
        let blocks = self.link_blocks.load_full();
        let session = self.sessions.get_mut(&session_id).expect("checked above");
        match session.on_line(&message, &self.local, &blocks) {
            Ok(actions) => self.apply_actions(session_id, actions),
            Err(err) => self.fail_session(session_id, err),
        }
    }

    /// Dispatches a line on a session that has already completed its
    /// handshake (§4.3 "Connected: process as steady-state"). The only
    /// commands a minimal spanning-tree core understands at this layer are
    /// further `SERVER` announcements (burst or late joins) and `SQUIT`;
    /// anything else is logged and ignored rather than treated as an error,
    /// since a forward-compatible peer may send commands this core has no
    /// opinion on.
    fn handle_steady_state_line(&mut self, session_id: SessionId, message: &Message) -> Vec<EngineEvent> {
        if message.command.eq_ignore_ascii_case("SERVER") {
            match burst::parse_remote_announcement(message)
                .and_then(|announcement| burst::apply_remote_announcement(&mut self.tree, &announcement))
            {
                Ok(_) => Vec::new(),
                Err(err) => self.fail_session(session_id, err),
            }
        } else if message.command.eq_ignore_ascii_case("SQUIT") {
            if let Some(name) = message.params.first() {
                self.tree.find(name).map(|id| self.tree.remove(id));
            }
            Vec::new()
        } else {
            tracing::debug!(command = %message.command, "ignoring unrecognized steady-state command");
            Vec::new()
        }
    }

    fn apply_actions(&mut self, session_id: SessionId, actions: Vec<SessionAction>) -> Vec<EngineEvent> {
        let mut events = Vec::new();
        for action in actions {
            match action {
                SessionAction::Send(line) => events.push(EngineEvent::Send { session_id, line }),
                SessionAction::Attach { name, description } => {
                    match self.tree.add(self.tree.root(), name, description, Some(session_id)) {
                        Ok(node_id) => {
                            self.attached.insert(session_id, node_id);
                        }
                        Err(err) => {
                            events.extend(self.fail_session(session_id, err));
                        }
                    }
                }
                SessionAction::BeginBurst => {
                    if let Some(&node_id) = self.attached.get(&session_id) {
                        for line in burst::generate_burst_lines(&self.tree, node_id, &[]) {
                            events.push(EngineEvent::Send { session_id, line });
                        }
                    }
                }
                SessionAction::Close => {
                    events.push(EngineEvent::Close { session_id });
                    self.detach(session_id);
                    self.sessions.remove(&session_id);
                }
            }
        }
        events
    }

    /// Reports `err` to the peer when appropriate, closes the session, and
    /// tears down any tree state it had already attached (§7).
    fn fail_session(&mut self, session_id: SessionId, err: CoreError) -> Vec<EngineEvent> {
        let mut events = Vec::new();
        if err.is_protocol_fatal() {
            let line = Message::new(None, "ERROR", vec![err.wire_reason()]).format();
            events.push(EngineEvent::Send { session_id, line });
        }
        events.push(EngineEvent::Close { session_id });
        self.detach(session_id);
        self.sessions.remove(&session_id);
        events
    }

    /// Removes a session's tree node (and its whole subtree) if it had one
    /// attached. Safe to call more than once for the same session.
    fn detach(&mut self, session_id: SessionId) {
        if let Some(node_id) = self.attached.remove(&session_id) {
            let removed = self.tree.remove(node_id);
            if !removed.is_empty() {
                tracing::info!(session_id, removed = removed.len(), "session closed; subtree detached");
            }
        }
    }

    fn handle_operator(&mut self, command: OperatorCommand) -> (Vec<EngineEvent>, OperatorResponse) {
        match command {
            OperatorCommand::Connect(pattern) => {
                let blocks = self.link_blocks.load();
                match blocks.find_by_glob(&pattern) {
                    Some(block) => {
                        let event = EngineEvent::Dial {
                            name: block.name.clone(),
                            ip_addr: block.ip_addr.clone(),
                            port: block.port,
                        };
                        (vec![event], OperatorResponse::Connect(Ok(())))
                    }
                    None => (
                        Vec::new(),
                        OperatorResponse::Connect(Err(format!("no link block matches \"{pattern}\""))),
                    ),
                }
            }
            OperatorCommand::Squit(name) => match self.squit(&name) {
                Ok(event) => (vec![event], OperatorResponse::Squit(Ok(()))),
                Err(reason) => (Vec::new(), OperatorResponse::Squit(Err(reason))),
            },
            OperatorCommand::Map => (Vec::new(), OperatorResponse::Map(self.map_entries())),
            OperatorCommand::Lusers => (Vec::new(), OperatorResponse::Lusers(self.lusers_summary())),
            OperatorCommand::Links => (Vec::new(), OperatorResponse::Links(self.links_entries())),
        }
    }

    fn squit(&mut self, name: &str) -> Result<EngineEvent, String> {
        let root = self.tree.root();
        let node_id = self.tree.find(name).ok_or_else(|| format!("no such server: {name}"))?;
        if node_id == root {
            return Err("cannot SQUIT the local server".to_string());
        }
        let session_id = self
            .tree
            .node(node_id)
            .and_then(|n| n.socket)
            .ok_or_else(|| format!("{name} is not a directly connected server"))?;
        self.detach(session_id);
        self.sessions.remove(&session_id);
        Ok(EngineEvent::Close { session_id })
    }

    fn map_entries(&self) -> Vec<MapEntry> {
        self.tree
            .preorder()
            .filter_map(|id| {
                let node = self.tree.node(id)?;
                Some(MapEntry {
                    name: node.name.clone(),
                    depth: self.tree.depth(id),
                })
            })
            .collect()
    }

    fn links_entries(&self) -> Vec<LinksEntry> {
        let root = self.tree.root();
        self.tree
            .preorder()
            .filter(|&id| id != root)
            .filter_map(|id| {
                let node = self.tree.node(id)?;
                let via = self
                    .tree
                    .best_route_to(&node.name)
                    .and_then(|route_id| self.tree.node(route_id))
                    .map(|route_node| route_node.name.clone())
                    .unwrap_or_default();
                Some(LinksEntry {
                    name: node.name.clone(),
                    via,
                    hops: self.tree.depth(id),
                    description: node.description.clone(),
                })
            })
            .collect()
    }

    fn lusers_summary(&self) -> LusersSummary {
        let mut user_count = 0;
        let mut oper_count = 0;
        let mut server_count = 0;
        for id in self.tree.preorder() {
            let Some(node) = self.tree.node(id) else {
                continue;
            };
            server_count += 1;
            user_count += node.user_count;
            oper_count += node.oper_count;
        }
        LusersSummary {
            server_count,
            user_count,
            oper_count,
        }
    }
}
