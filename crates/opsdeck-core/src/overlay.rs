//! The single output surface shared by every live stream.
//!
//! There is exactly one overlay per process. `show` replaces whatever it
//! displayed, `append` adds one newline-terminated line, `hide` clears and
//! hides it. Each `show` starts a new *generation*; the [`OverlayTarget`]
//! returned by `show` can only write while its generation is still the one
//! on screen, so a stream left running after its overlay was replaced or
//! dismissed writes nowhere.

use std::borrow::Cow;
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use serde::Serialize;

/// Front-end hook notified of every visible change, in order.
pub trait OverlaySink: Send + Sync {
    fn on_show(&self, title: &str, text: &str);
    fn on_append(&self, chunk: &str);
    fn on_hide(&self);
}

/// User inputs that dismiss the overlay. All of them only hide it; closing a
/// transport is the session's job.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DismissTrigger {
    CloseControl,
    EscapeKey,
    BackgroundClick,
}

/// Point-in-time copy of the overlay, for assertions and debugging.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct OverlaySnapshot {
    pub title: String,
    pub text: String,
    pub visible: bool,
    pub generation: u64,
}

#[derive(Default)]
struct OverlayState {
    title: String,
    initial_text: String,
    lines: Vec<String>,
    visible: bool,
    generation: u64,
    sink: Option<Arc<dyn OverlaySink>>,
}

impl OverlayState {
    fn push_line(&mut self, line: &str) {
        let line = normalize_line(line);
        if let Some(sink) = &self.sink {
            sink.on_append(&line);
        }
        self.lines.push(line.into_owned());
    }

    fn text(&self) -> String {
        let mut out = self.initial_text.clone();
        for line in &self.lines {
            out.push_str(line);
        }
        out
    }
}

static GLOBAL: OnceLock<OverlayRenderer> = OnceLock::new();

/// Owner of the overlay state. Cloning shares the same surface.
#[derive(Clone, Default)]
pub struct OverlayRenderer {
    state: Arc<Mutex<OverlayState>>,
}

impl OverlayRenderer {
    /// A fresh, hidden surface. Tests use this; the application uses
    /// [`OverlayRenderer::global`].
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide overlay.
    pub fn global() -> &'static OverlayRenderer {
        GLOBAL.get_or_init(OverlayRenderer::new)
    }

    /// Attach the front end that paints the overlay. Replaces any previous sink.
    pub fn set_sink(&self, sink: Arc<dyn OverlaySink>) {
        self.state.lock().sink = Some(sink);
    }

    /// Replace the displayed content and make the overlay visible.
    pub fn show(&self, title: &str, initial_text: &str) -> OverlayTarget {
        let mut state = self.state.lock();
        state.generation += 1;
        state.title = title.to_string();
        state.initial_text = initial_text.to_string();
        state.lines.clear();
        state.visible = true;
        if let Some(sink) = &state.sink {
            sink.on_show(title, initial_text);
        }
        tracing::debug!(generation = state.generation, title, "overlay shown");
        OverlayTarget {
            renderer: self.clone(),
            generation: state.generation,
        }
    }

    /// Append to whatever is on screen. No-op while hidden.
    pub fn append(&self, line: &str) -> bool {
        let mut state = self.state.lock();
        if !state.visible {
            return false;
        }
        state.push_line(line);
        true
    }

    /// Clear the accumulated text and hide the surface.
    pub fn hide(&self) {
        let mut state = self.state.lock();
        let was_visible = state.visible;
        state.generation += 1;
        state.visible = false;
        state.title.clear();
        state.initial_text.clear();
        state.lines.clear();
        if was_visible {
            if let Some(sink) = &state.sink {
                sink.on_hide();
            }
        }
    }

    pub fn dismiss(&self, trigger: DismissTrigger) {
        tracing::debug!(?trigger, "overlay dismissed");
        self.hide();
    }

    pub fn is_visible(&self) -> bool {
        self.state.lock().visible
    }

    pub fn title(&self) -> String {
        self.state.lock().title.clone()
    }

    /// Initial text followed by every appended line.
    pub fn text(&self) -> String {
        self.state.lock().text()
    }

    /// Only what was appended since the last `show`.
    pub fn body(&self) -> String {
        self.state.lock().lines.concat()
    }

    pub fn lines(&self) -> Vec<String> {
        self.state.lock().lines.clone()
    }

    /// The last `height` text lines, i.e. the view scrolled to the newest
    /// content.
    pub fn visible_lines(&self, height: usize) -> Vec<String> {
        let text = self.text();
        let all: Vec<&str> = text.lines().collect();
        let start = all.len().saturating_sub(height);
        all[start..].iter().map(|l| (*l).to_string()).collect()
    }

    pub fn snapshot(&self) -> OverlaySnapshot {
        let state = self.state.lock();
        OverlaySnapshot {
            title: state.title.clone(),
            text: state.text(),
            visible: state.visible,
            generation: state.generation,
        }
    }

    fn append_if_current(&self, generation: u64, line: &str) -> bool {
        let mut state = self.state.lock();
        if !state.visible || state.generation != generation {
            return false;
        }
        state.push_line(line);
        true
    }

    fn is_current(&self, generation: u64) -> bool {
        let state = self.state.lock();
        state.visible && state.generation == generation
    }
}

/// Append handle bound to one `show`. Goes inert once the overlay is
/// hidden or shown again.
#[derive(Clone)]
pub struct OverlayTarget {
    renderer: OverlayRenderer,
    generation: u64,
}

impl OverlayTarget {
    /// Returns false when the line was dropped because this showing is gone.
    pub fn append(&self, line: &str) -> bool {
        self.renderer.append_if_current(self.generation, line)
    }

    pub fn is_current(&self) -> bool {
        self.renderer.is_current(self.generation)
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl std::fmt::Debug for OverlayTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OverlayTarget")
            .field("generation", &self.generation)
            .finish()
    }
}

/// A line always ends with exactly the newline it brought, or one we add.
pub fn normalize_line(line: &str) -> Cow<'_, str> {
    if line.ends_with('\n') {
        Cow::Borrowed(line)
    } else {
        Cow::Owned(format!("{line}\n"))
    }
}
