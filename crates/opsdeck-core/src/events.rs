use serde::{Deserialize, Serialize};

use crate::errors::StreamError;

/// Name used by the SSE format when a frame carries no `event:` field.
pub const DEFAULT_EVENT_NAME: &str = "message";

/// Name of the terminal event; its payload is the exit/status code.
pub const END_EVENT: &str = "end";

/// One named event as delivered by a server-push channel.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelEvent {
    pub name: String,
    pub data: String,
}

impl ChannelEvent {
    pub fn new(name: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
        }
    }

    pub fn is_end(&self) -> bool {
        self.name == END_EVENT
    }
}

/// What a transport handle yields. Ordering contract:
///
/// Message* → (Failed)?
///
/// `Failed` is delivered at most once and nothing follows it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportEvent {
    Message(ChannelEvent),
    Failed(StreamError),
}

impl TransportEvent {
    pub fn message(name: impl Into<String>, data: impl Into<String>) -> Self {
        Self::Message(ChannelEvent::new(name, data))
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}
