use std::collections::VecDeque;

use parking_lot::Mutex;

use opsdeck_core::events::TransportEvent;

use crate::handle::{StreamTransport, TransportFeed, TransportHandle};

const MOCK_CAPACITY: usize = 1024;

/// In-process transport for deterministic tests.
///
/// Each `open` pops the next pre-programmed script (if any) and queues it on
/// the new handle. The producer side is retained, so a channel stays open
/// until the test pushes a failure through [`MockTransport::feed`] or the
/// consumer closes it.
#[derive(Default)]
pub struct MockTransport {
    scripts: Mutex<VecDeque<Vec<TransportEvent>>>,
    opened: Mutex<Vec<String>>,
    feeds: Mutex<Vec<TransportFeed>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// One script per expected `open`, consumed in order.
    pub fn with_scripts(scripts: Vec<Vec<TransportEvent>>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            ..Self::default()
        }
    }

    /// Queue a script for the next `open` that finds none ahead of it.
    pub fn push_script(&self, events: Vec<TransportEvent>) {
        self.scripts.lock().push_back(events);
    }

    /// URLs passed to `open`, in call order.
    pub fn opened_urls(&self) -> Vec<String> {
        self.opened.lock().clone()
    }

    pub fn open_count(&self) -> usize {
        self.opened.lock().len()
    }

    /// Producer side of the `index`-th opened channel.
    pub fn feed(&self, index: usize) -> Option<TransportFeed> {
        self.feeds.lock().get(index).cloned()
    }

    /// Producer side of the most recently opened channel.
    pub fn last_feed(&self) -> Option<TransportFeed> {
        self.feeds.lock().last().cloned()
    }
}

impl StreamTransport for MockTransport {
    fn open(&self, url: &str) -> TransportHandle {
        let (feed, handle) = TransportHandle::channel(url, MOCK_CAPACITY);
        self.opened.lock().push(url.to_string());

        if let Some(script) = self.scripts.lock().pop_front() {
            for event in script {
                if !feed.try_send(event) {
                    tracing::warn!(url, "mock script exceeds channel capacity");
                    break;
                }
            }
        }

        self.feeds.lock().push(feed);
        handle
    }
}
