//! Burst generation and ingestion (§4.5).
//!
//! Generating a burst walks the local tree; ingesting one turns a remote
//! `:<parent> SERVER <name> * <hops> :<description>` announcement back
//! into a tree mutation. Both directions are pure functions over
//! [`ServerTree`] so the engine can drive them without owning any
//! transport state.

use meshd_proto::Message;

use crate::error::CoreError;
use crate::tree::{NodeId, ServerTree};

pub const BURST_MARKER: &str = "BURST";
pub const ENDBURST_MARKER: &str = "ENDBURST";

/// Placeholder reserved by the wire format in the non-adjacent `SERVER`
/// announcement form; its meaning is undocumented upstream (§9 open
/// questions) so this crate only validates it is exactly `"*"`.
const RESERVED_PLACEHOLDER: &str = "*";

/// Builds the full line sequence emitted on a session once it reaches
/// `Connected` (§4.5): the `BURST` marker, one `SERVER` announcement per
/// other node in the tree (skipping the root, whose identity the peer
/// already learned during the handshake, and the peer itself), the
/// caller-supplied opaque user lines, and `ENDBURST`.
pub fn generate_burst_lines<S>(
    tree: &ServerTree<S>,
    peer: NodeId,
    user_lines: &[String],
) -> Vec<String> {
    let root = tree.root();
    let mut lines = Vec::with_capacity(user_lines.len() + 2);
    lines.push(BURST_MARKER.to_string());

    for id in tree.preorder() {
        if id == root || id == peer {
            continue;
        }
        let Some(node) = tree.node(id) else { continue };
        let Some(parent) = node.parent() else { continue };
        let Some(parent_node) = tree.node(parent) else {
            continue;
        };
        let hops = tree.depth(id);
        let line = Message::new(
            Some(parent_node.name.clone()),
            "SERVER",
            vec![
                node.name.clone(),
                RESERVED_PLACEHOLDER.to_string(),
                hops.to_string(),
                node.description.clone(),
            ],
        );
        lines.push(line.format());
    }

    lines.extend(user_lines.iter().cloned());
    lines.push(ENDBURST_MARKER.to_string());
    lines
}

/// A parsed non-adjacent `SERVER` announcement, as seen during burst
/// ingestion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteAnnouncement {
    pub parent_name: String,
    pub name: String,
    pub hops: u32,
    pub description: String,
}

/// Parses a `:<parent> SERVER <name> * <hops> :<description>` line.
pub fn parse_remote_announcement(message: &Message) -> Result<RemoteAnnouncement, CoreError> {
    let parent_name = message.source.clone().ok_or_else(|| {
        CoreError::protocol(
            "protocol.malformed_announcement",
            "non-adjacent SERVER announcement requires a source prefix",
        )
    })?;
    if message.params.len() != 4 {
        return Err(CoreError::protocol(
            "protocol.malformed_announcement",
            "SERVER announcement requires name, placeholder, hops, and description",
        ));
    }
    if message.params[1] != RESERVED_PLACEHOLDER {
        return Err(CoreError::protocol(
            "protocol.malformed_announcement",
            "SERVER announcement's reserved field must be \"*\"",
        ));
    }
    let hops: u32 = message.params[2].parse().map_err(|_| {
        CoreError::protocol(
            "protocol.malformed_announcement",
            "hop count is not a number",
        )
    })?;
    Ok(RemoteAnnouncement {
        parent_name,
        name: message.params[0].clone(),
        hops,
        description: message.params[3].clone(),
    })
}

/// Merges a [`RemoteAnnouncement`] into the local tree, attaching it under
/// the named parent (which, given burst lines arrive in the emitter's
/// pre-order, must already be known locally).
pub fn apply_remote_announcement<S>(
    tree: &mut ServerTree<S>,
    announcement: &RemoteAnnouncement,
) -> Result<NodeId, CoreError> {
    let parent = tree.find(&announcement.parent_name).ok_or_else(|| {
        CoreError::protocol(
            "protocol.unknown_parent",
            format!(
                "SERVER announcement names unknown parent {}",
                announcement.parent_name
            ),
        )
    })?;
    tree.add(
        parent,
        announcement.name.clone(),
        announcement.description.clone(),
        None,
    )
}
