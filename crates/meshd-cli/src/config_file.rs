//! A concrete [`ConfigurationSource`] backed by a TOML file (§6, §10.3):
//!
//! ```toml
//! [server]
//! name = "a.example"
//! description = "A"
//!
//! [[bind]]
//! type = "servers"
//! address = "*"
//! port = 7000
//!
//! [[link]]
//! name = "b.example"
//! ipaddr = "127.0.0.1"
//! port = 7001
//! sendpass = "s"
//! recvpass = "r"
//! ```
//!
//! Parsed with `serde` into a typed document, then flattened into the
//! generic, stringly-typed [`ConfigBlock`] shape `meshd-core` consumes — the
//! file format is this crate's to choose, but the abstract reader's
//! contract (named, indexed key/value blocks) is not.

use std::path::{Path, PathBuf};

use meshd_core::config::{ConfigBlock, ConfigurationSource};
use meshd_core::CoreError;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct TomlDocument {
    server: ServerToml,
    #[serde(default)]
    bind: Vec<BindToml>,
    #[serde(default)]
    link: Vec<LinkToml>,
}

#[derive(Debug, Deserialize)]
struct ServerToml {
    name: String,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
struct BindToml {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default = "default_bind_address")]
    address: String,
    port: u16,
}

fn default_bind_address() -> String {
    "*".to_string()
}

#[derive(Debug, Deserialize)]
struct LinkToml {
    name: String,
    ipaddr: String,
    port: u16,
    sendpass: String,
    recvpass: String,
}

pub struct TomlConfigurationSource {
    path: PathBuf,
}

impl TomlConfigurationSource {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl ConfigurationSource for TomlConfigurationSource {
    fn load(&self) -> Result<Vec<ConfigBlock>, CoreError> {
        let text = std::fs::read_to_string(&self.path)
            .map_err(|err| CoreError::config(format!("reading {}: {err}", self.path.display())))?;
        let document: TomlDocument = toml::from_str(&text)
            .map_err(|err| CoreError::config(format!("parsing {}: {err}", self.path.display())))?;

        let mut blocks = Vec::with_capacity(1 + document.bind.len() + document.link.len());
        blocks.push(ConfigBlock {
            kind: "server",
            index: 0,
            entries: vec![
                ("name".to_string(), document.server.name),
                ("description".to_string(), document.server.description),
            ],
        });
        for (index, bind) in document.bind.into_iter().enumerate() {
            blocks.push(ConfigBlock {
                kind: "bind",
                index,
                entries: vec![
                    ("type".to_string(), bind.kind),
                    ("address".to_string(), bind.address),
                    ("port".to_string(), bind.port.to_string()),
                ],
            });
        }
        for (index, link) in document.link.into_iter().enumerate() {
            blocks.push(ConfigBlock {
                kind: "link",
                index,
                entries: vec![
                    ("name".to_string(), link.name),
                    ("ipaddr".to_string(), link.ipaddr),
                    ("port".to_string(), link.port.to_string()),
                    ("sendpass".to_string(), link.sendpass),
                    ("recvpass".to_string(), link.recvpass),
                ],
            });
        }
        Ok(blocks)
    }
}
