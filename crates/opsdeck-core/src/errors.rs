use std::time::Duration;

/// Transport-level failures of a live stream. Every variant is terminal for
/// the session that owns the handle; none of them is retried.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    // Before the first byte
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    // Mid-stream
    #[error("stream interrupted: {0}")]
    Interrupted(String),
    #[error("stream closed by server before end")]
    ClosedByServer,
    #[error("idle timeout after {0:?}")]
    IdleTimeout(Duration),
}

impl StreamError {
    /// Whether the failure happened while establishing the connection,
    /// i.e. before any event could have been delivered.
    pub fn is_connect_phase(&self) -> bool {
        matches!(self, Self::Connect(_) | Self::Status { .. })
    }

    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Connect(_) => "connect",
            Self::Status { .. } => "status",
            Self::Interrupted(_) => "interrupted",
            Self::ClosedByServer => "closed_by_server",
            Self::IdleTimeout(_) => "idle_timeout",
        }
    }

    /// Map a non-success HTTP status to an error. The body is truncated so a
    /// proxy error page doesn't flood the log.
    pub fn from_status(status: u16, body: String) -> Self {
        const MAX_BODY: usize = 512;
        let body = if body.len() > MAX_BODY {
            let mut cut = MAX_BODY;
            while !body.is_char_boundary(cut) {
                cut -= 1;
            }
            format!("{}...", &body[..cut])
        } else {
            body
        };
        Self::Status { status, body }
    }
}
