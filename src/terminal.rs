use std::io::Write;

use opsdeck_core::overlay::OverlaySink;

/// Paints the overlay onto stdout. The terminal scrolls on its own, so every
/// append is simply written and flushed.
#[derive(Debug, Default)]
pub struct TerminalSink;

impl TerminalSink {
    pub fn new() -> Self {
        Self
    }
}

impl OverlaySink for TerminalSink {
    fn on_show(&self, title: &str, text: &str) {
        let mut out = std::io::stdout().lock();
        let _ = writeln!(out, "== {title} ==");
        let _ = out.write_all(text.as_bytes());
        let _ = out.flush();
    }

    fn on_append(&self, chunk: &str) {
        let mut out = std::io::stdout().lock();
        let _ = out.write_all(chunk.as_bytes());
        let _ = out.flush();
    }

    fn on_hide(&self) {
        let mut out = std::io::stdout().lock();
        let _ = out.flush();
    }
}
