use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use opsdeck_core::errors::StreamError;
use opsdeck_core::events::TransportEvent;
use opsdeck_core::ids::HandleId;

/// Opens receive-only, server-push channels.
///
/// `open` never blocks: connecting happens in the background and a failure
/// to connect arrives as the handle's single `Failed` event.
pub trait StreamTransport: Send + Sync {
    fn open(&self, url: &str) -> TransportHandle;
}

/// Consumer side of one open channel. Owns exactly one connection.
///
/// Yields `Message`s in arrival order, then at most one `Failed`, then
/// nothing. `close` releases the connection and is idempotent; dropping
/// the handle closes it too.
pub struct TransportHandle {
    id: HandleId,
    url: String,
    rx: mpsc::Receiver<TransportEvent>,
    cancel: CancellationToken,
    closed: bool,
    failed: bool,
}

impl TransportHandle {
    /// Create a connected pair: the feed for whoever produces events, the
    /// handle for whoever consumes them.
    pub fn channel(url: &str, capacity: usize) -> (TransportFeed, TransportHandle) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let cancel = CancellationToken::new();
        let feed = TransportFeed {
            tx,
            cancel: cancel.clone(),
        };
        let handle = TransportHandle {
            id: HandleId::new(),
            url: url.to_string(),
            rx,
            cancel,
            closed: false,
            failed: false,
        };
        (feed, handle)
    }

    pub fn id(&self) -> &HandleId {
        &self.id
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Next event, or `None` once closed or after the failure was delivered.
    ///
    /// A producer that goes away without reporting a failure counts as the
    /// server closing the stream.
    pub async fn next_event(&mut self) -> Option<TransportEvent> {
        if self.closed || self.failed {
            return None;
        }
        match self.rx.recv().await {
            Some(TransportEvent::Failed(err)) => {
                self.failed = true;
                Some(TransportEvent::Failed(err))
            }
            Some(event) => Some(event),
            None => {
                self.failed = true;
                Some(TransportEvent::Failed(StreamError::ClosedByServer))
            }
        }
    }

    /// Release the connection. Returns false if it was already closed.
    pub fn close(&mut self) -> bool {
        if self.closed {
            return false;
        }
        self.closed = true;
        self.cancel.cancel();
        self.rx.close();
        tracing::debug!(handle_id = %self.id, url = %self.url, "transport closed");
        true
    }
}

impl Drop for TransportHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for TransportHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportHandle")
            .field("id", &self.id)
            .field("url", &self.url)
            .field("closed", &self.closed)
            .field("failed", &self.failed)
            .finish()
    }
}

/// Producer side of one channel.
#[derive(Clone)]
pub struct TransportFeed {
    tx: mpsc::Sender<TransportEvent>,
    cancel: CancellationToken,
}

impl TransportFeed {
    /// Deliver an event. Returns false once the consumer closed the handle.
    pub async fn send(&self, event: TransportEvent) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        self.tx.send(event).await.is_ok()
    }

    /// Non-waiting variant; false when closed or the buffer is full.
    pub fn try_send(&self, event: TransportEvent) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        self.tx.try_send(event).is_ok()
    }

    pub async fn message(&self, name: &str, data: &str) -> bool {
        self.send(TransportEvent::message(name, data)).await
    }

    pub async fn fail(&self, error: StreamError) -> bool {
        self.send(TransportEvent::Failed(error)).await
    }

    /// Whether the consumer closed (or dropped) its handle.
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled() || self.tx.is_closed()
    }

    /// Resolves when the consumer closes the handle.
    pub async fn closed(&self) {
        self.cancel.cancelled().await;
    }
}
