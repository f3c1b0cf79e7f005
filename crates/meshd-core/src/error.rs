use thiserror::Error;

/// The spanning-tree core's error taxonomy.
///
/// Each variant embeds a stable, dotted error code (`code()`), trimmed down
/// to a plain enum: this crate has no cross-cutting retry/backpressure
/// policy table to attach to each code, so a `CategoryMatrix`-style
/// indirection would only add ceremony (see DESIGN.md).
#[derive(Debug, Error)]
pub enum CoreError {
    /// A malformed line, illegal state transition, or hop-count violation.
    #[error("protocol violation: {reason}")]
    Protocol {
        code: &'static str,
        reason: String,
    },

    /// Credential mismatch during handshake, or an unrecognized server name.
    #[error("authentication failed: {reason}")]
    Auth { reason: String },

    /// The handshake did not complete inside its configured deadline.
    #[error("handshake timed out")]
    Timeout,

    /// A socket read or write failed.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// A bind or config-parse failure; the affected link/listener is simply
    /// absent rather than fatal to the daemon.
    #[error("configuration error: {reason}")]
    Config { reason: String },

    /// A burst or announcement named a server that already exists in the
    /// tree. Treated as a protocol error on the session that announced it.
    #[error("duplicate server name: {name}")]
    DuplicateName { name: String },
}

impl CoreError {
    pub fn protocol(code: &'static str, reason: impl Into<String>) -> Self {
        Self::Protocol {
            code,
            reason: reason.into(),
        }
    }

    pub fn auth(reason: impl Into<String>) -> Self {
        Self::Auth {
            reason: reason.into(),
        }
    }

    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }

    /// The stable, dotted error code for this variant. `Transport` has no
    /// fixed code of its own since it wraps an arbitrary `io::Error`.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Protocol { code, .. } => code,
            Self::Auth { .. } => "handshake.invalid_credentials",
            Self::Timeout => "handshake.timeout",
            Self::Transport(_) => "transport.io_error",
            Self::Config { .. } => "config.invalid",
            Self::DuplicateName { .. } => "protocol.duplicate_name",
        }
    }

    /// Whether this error should be reported to the peer as `ERROR
    /// :<reason>` before the session closes. Timeouts are the one kind that
    /// closes silently — the peer never proved it knew the password, so
    /// there is nothing to say to it (§7).
    pub fn is_protocol_fatal(&self) -> bool {
        !matches!(self, Self::Timeout)
    }

    /// The text to send as the `ERROR :<reason>` parameter, when
    /// [`is_protocol_fatal`](Self::is_protocol_fatal) is true.
    pub fn wire_reason(&self) -> String {
        match self {
            Self::Protocol { reason, .. } => reason.clone(),
            Self::Auth { reason } => reason.clone(),
            Self::Timeout => String::new(),
            Self::Transport(err) => err.to_string(),
            Self::Config { reason } => reason.clone(),
            Self::DuplicateName { name } => format!("Server {name} already exists"),
        }
    }
}
