use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::{Future, Stream, StreamExt};
use reqwest::Client;
use tracing::{debug, instrument, warn};

use opsdeck_core::errors::StreamError;
use opsdeck_core::events::{ChannelEvent, TransportEvent};

use crate::handle::{StreamTransport, TransportFeed, TransportHandle};
use crate::sse::SseDecoder;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_CHANNEL_CAPACITY: usize = 256;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransportConfig {
    pub connect_timeout: Duration,
    /// `None` waits on a silent stream indefinitely.
    pub idle_timeout: Option<Duration>,
    pub channel_capacity: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            idle_timeout: None,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

/// SSE over HTTP GET. Each `open` spawns one connection task onto the
/// current tokio runtime; the handle's `close` aborts it.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
    config: TransportConfig,
}

impl HttpTransport {
    pub fn new(config: TransportConfig) -> Result<Self, StreamError> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| StreamError::Connect(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }
}

impl StreamTransport for HttpTransport {
    fn open(&self, url: &str) -> TransportHandle {
        let (feed, handle) = TransportHandle::channel(url, self.config.channel_capacity);
        debug!(handle_id = %handle.id(), url, "opening stream");
        let _ = tokio::spawn(pump(
            self.client.clone(),
            url.to_string(),
            feed,
            self.config.idle_timeout,
        ));
        handle
    }
}

async fn connect(client: &Client, url: &str) -> Result<reqwest::Response, StreamError> {
    let resp = client
        .get(url)
        .header("accept", "text/event-stream")
        .header("cache-control", "no-cache")
        .send()
        .await
        .map_err(|e| StreamError::Connect(e.to_string()))?;

    if !resp.status().is_success() {
        let status = resp.status().as_u16();
        let body = resp.text().await.unwrap_or_default();
        return Err(StreamError::from_status(status, body));
    }
    Ok(resp)
}

#[instrument(skip_all, fields(url = %url))]
async fn pump(client: Client, url: String, feed: TransportFeed, idle: Option<Duration>) {
    let resp = tokio::select! {
        () = feed.closed() => {
            debug!("closed before connect finished");
            return;
        }
        result = connect(&client, &url) => match result {
            Ok(resp) => resp,
            Err(err) => {
                warn!(error_kind = err.error_kind(), error = %err, "stream connect failed");
                let _ = feed.fail(err).await;
                return;
            }
        },
    };

    let mut events = SseEventStream::new(resp.bytes_stream(), idle);
    loop {
        let next = tokio::select! {
            () = feed.closed() => return,
            next = events.next() => next,
        };
        match next {
            Some(Ok(event)) => {
                if !feed.send(TransportEvent::Message(event)).await {
                    return;
                }
            }
            Some(Err(err)) => {
                warn!(error_kind = err.error_kind(), error = %err, "stream failed");
                let _ = feed.fail(err).await;
                return;
            }
            None => {
                debug!("server closed stream");
                let _ = feed.fail(StreamError::ClosedByServer).await;
                return;
            }
        }
    }
}

type ByteStream = Pin<Box<dyn Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send>>;

/// Wraps a response byte stream and yields decoded SSE events.
/// With an idle timeout set, a stream silent for that long yields an error.
struct SseEventStream {
    inner: ByteStream,
    decoder: SseDecoder,
    pending: Vec<ChannelEvent>,
    idle_deadline: Option<Pin<Box<tokio::time::Sleep>>>,
    idle_duration: Option<Duration>,
    done: bool,
}

impl SseEventStream {
    fn new(
        byte_stream: impl Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send + 'static,
        idle_timeout: Option<Duration>,
    ) -> Self {
        Self {
            inner: Box::pin(byte_stream),
            decoder: SseDecoder::new(),
            pending: Vec::new(),
            idle_deadline: idle_timeout.map(|d| Box::pin(tokio::time::sleep(d))),
            idle_duration: idle_timeout,
            done: false,
        }
    }
}

impl Stream for SseEventStream {
    type Item = Result<ChannelEvent, StreamError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if !this.pending.is_empty() {
            return Poll::Ready(Some(Ok(this.pending.remove(0))));
        }
        if this.done {
            return Poll::Ready(None);
        }

        loop {
            match this.inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => {
                    if let (Some(deadline), Some(duration)) =
                        (this.idle_deadline.as_mut(), this.idle_duration)
                    {
                        deadline
                            .as_mut()
                            .reset(tokio::time::Instant::now() + duration);
                    }

                    this.pending.extend(this.decoder.feed(&bytes));
                    if !this.pending.is_empty() {
                        return Poll::Ready(Some(Ok(this.pending.remove(0))));
                    }
                }
                Poll::Ready(Some(Err(e))) => {
                    this.done = true;
                    return Poll::Ready(Some(Err(StreamError::Interrupted(e.to_string()))));
                }
                Poll::Ready(None) => {
                    this.done = true;
                    this.pending.extend(this.decoder.finish());
                    if !this.pending.is_empty() {
                        return Poll::Ready(Some(Ok(this.pending.remove(0))));
                    }
                    return Poll::Ready(None);
                }
                Poll::Pending => {
                    if let (Some(deadline), Some(duration)) =
                        (this.idle_deadline.as_mut(), this.idle_duration)
                    {
                        if deadline.as_mut().poll(cx).is_ready() {
                            this.done = true;
                            return Poll::Ready(Some(Err(StreamError::IdleTimeout(duration))));
                        }
                    }
                    return Poll::Pending;
                }
            }
        }
    }
}
