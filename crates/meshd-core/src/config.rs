//! The abstract configuration reader (§6 "Configuration", §10.3).
//!
//! Modeled on `spark_core::configuration::ConfigurationSource`
//! (`spark-core/src/configuration/source.rs`): callers depend on a trait
//! that yields named, indexed key/value blocks, not on any particular file
//! format. This crate drops that source's profile/versioning/watch
//! machinery, since nothing here needs hot-reload or multi-environment
//! profiles, down to the one method the spanning-tree core actually calls.

use crate::error::CoreError;
use crate::session::LinkBlock;

/// One `<kind ...>` block from the configuration source, with its entries
/// in file order. `index` disambiguates repeated blocks of the same kind
/// (the second `<link>` block has `index == 1`), mirroring the original
/// design's indexed configuration blocks.
#[derive(Debug, Clone)]
pub struct ConfigBlock {
    pub kind: &'static str,
    pub index: usize,
    pub entries: Vec<(String, String)>,
}

impl ConfigBlock {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// An abstract source of configuration blocks. The spanning-tree core only
/// ever calls `load`; concrete backends (TOML file, environment, a remote
/// control plane) live outside this crate.
pub trait ConfigurationSource: Send + Sync {
    fn load(&self) -> Result<Vec<ConfigBlock>, CoreError>;
}

/// One `<bind type="servers" ...>` entry (§6).
#[derive(Debug, Clone)]
pub struct BindEntry {
    pub address: String,
    pub port: u16,
}

/// The local server's own identity, read from the `<server>` block.
#[derive(Debug, Clone)]
pub struct LocalServerConfig {
    pub name: String,
    pub description: String,
}

/// The fully parsed configuration the link manager needs: the local
/// identity, every listener to bind, and every peer relationship.
#[derive(Debug, Clone)]
pub struct SpanningTreeConfig {
    pub local: LocalServerConfig,
    pub binds: Vec<BindEntry>,
    pub links: Vec<LinkBlock>,
}

/// Extracts `<server>`, `<bind type="servers">`, and `<link>` blocks from a
/// generic block sequence (§4.5 "On startup and on reconfiguration").
/// Malformed or missing-field blocks are skipped with a logged
/// `ConfigError`-equivalent reason rather than failing the whole load,
/// matching §7's "log and continue" recovery policy for bind/link entries,
/// except a missing `<server>` block, which has no sensible default and is
/// fatal to loading.
pub fn resolve(blocks: &[ConfigBlock]) -> Result<SpanningTreeConfig, CoreError> {
    let local = blocks
        .iter()
        .find(|b| b.kind == "server")
        .ok_or_else(|| CoreError::config("missing <server> block"))
        .and_then(|block| {
            let name = block
                .get("name")
                .ok_or_else(|| CoreError::config("<server> block missing `name`"))?
                .to_string();
            let description = block.get("description").unwrap_or_default().to_string();
            Ok(LocalServerConfig { name, description })
        })?;

    let mut binds = Vec::new();
    for block in blocks.iter().filter(|b| b.kind == "bind") {
        if block.get("type") != Some("servers") {
            continue;
        }
        let address = block.get("address").unwrap_or("*").to_string();
        let Some(port) = block.get("port").and_then(|p| p.parse().ok()) else {
            tracing::warn!(index = block.index, "bind block has an invalid or missing port; skipping");
            continue;
        };
        binds.push(BindEntry { address, port });
    }

    let mut links = Vec::new();
    for block in blocks.iter().filter(|b| b.kind == "link") {
        let fields = (
            block.get("name"),
            block.get("ipaddr"),
            block.get("port").and_then(|p| p.parse::<u16>().ok()),
            block.get("sendpass"),
            block.get("recvpass"),
        );
        match fields {
            (Some(name), Some(ip_addr), Some(port), Some(send_pass), Some(recv_pass)) => {
                links.push(LinkBlock {
                    name: name.to_string(),
                    ip_addr: ip_addr.to_string(),
                    port,
                    send_pass: send_pass.to_string(),
                    recv_pass: recv_pass.to_string(),
                });
            }
            _ => {
                tracing::warn!(index = block.index, "link block is missing required fields; skipping");
            }
        }
    }

    Ok(SpanningTreeConfig {
        local,
        binds,
        links,
    })
}
