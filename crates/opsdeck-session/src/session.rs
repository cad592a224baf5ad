use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, trace, warn, Instrument, Span};

use opsdeck_core::errors::StreamError;
use opsdeck_core::events::{ChannelEvent, TransportEvent};
use opsdeck_core::ids::{ResourceId, SessionId};
use opsdeck_core::overlay::{OverlayRenderer, OverlayTarget};
use opsdeck_transport::{StreamTransport, TransportHandle};

use crate::bindings::EventBindings;
use crate::call_sites::RefreshHook;

/// Appended when the transport fails.
pub const ERROR_BANNER: &str = "\n[error] connection interrupted";

/// Appended when the terminal `end` event arrives.
pub fn done_banner(exit: &str) -> String {
    format!("\n[done] exit={exit}")
}

/// Everything a call site decides about a session before it starts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionSpec {
    pub resource_id: ResourceId,
    /// Path plus optional query, appended to the base URL.
    pub endpoint: String,
    pub title: String,
    pub banner: String,
    pub bindings: EventBindings,
    pub refresh_on_end: bool,
}

impl SessionSpec {
    pub fn url(&self, base_url: &str) -> String {
        format!("{}{}", base_url.trim_end_matches('/'), self.endpoint)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TerminationReason {
    Ended { exit: String },
    Failed(StreamError),
    Cancelled,
}

impl TerminationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ended { .. } => "ended",
            Self::Failed(_) => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Process exit code: the `end` payload when numeric, 1 for failures and
    /// non-numeric payloads, 130 for cancellation.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Ended { exit } => exit.trim().parse().unwrap_or(1),
            Self::Failed(_) => 1,
            Self::Cancelled => 130,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Open,
    Terminated(TerminationReason),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionOutcome {
    pub session_id: SessionId,
    pub resource_id: ResourceId,
    pub reason: TerminationReason,
    pub events_received: usize,
}

impl SessionOutcome {
    pub fn exit_code(&self) -> i32 {
        self.reason.exit_code()
    }
}

/// One live stream: shows the overlay, opens the transport, renders each
/// bound event and closes the transport on `end`, failure or cancel.
///
/// Idle → Open → Terminated. Once terminated every further event is
/// dropped and the transport is never closed a second time.
pub struct StreamSession {
    id: SessionId,
    spec: SessionSpec,
    url: String,
    state: SessionState,
    target: Option<OverlayTarget>,
    handle: Option<TransportHandle>,
    refresh: Option<Arc<dyn RefreshHook>>,
    cancel: CancellationToken,
    events_received: usize,
    span: Span,
}

impl StreamSession {
    pub fn new(spec: SessionSpec, base_url: &str) -> Self {
        let id = SessionId::new();
        let url = spec.url(base_url);
        let span = info_span!(
            "stream_session",
            session_id = %id,
            resource_id = %spec.resource_id,
            endpoint = %spec.endpoint,
        );
        Self {
            id,
            spec,
            url,
            state: SessionState::Idle,
            target: None,
            handle: None,
            refresh: None,
            cancel: CancellationToken::new(),
            events_received: 0,
            span,
        }
    }

    /// Create and start in one step.
    pub fn open(
        spec: SessionSpec,
        base_url: &str,
        renderer: &OverlayRenderer,
        transport: &dyn StreamTransport,
    ) -> Self {
        let mut session = Self::new(spec, base_url);
        let _ = session.start(renderer, transport);
        session
    }

    pub fn with_refresh_hook(mut self, hook: Arc<dyn RefreshHook>) -> Self {
        self.refresh = Some(hook);
        self
    }

    /// Show the overlay with the banner, then open the transport.
    /// Returns false if the session was already started.
    pub fn start(&mut self, renderer: &OverlayRenderer, transport: &dyn StreamTransport) -> bool {
        let _entered = self.span.clone().entered();
        if self.state != SessionState::Idle {
            warn!(state = ?self.state, "session already started");
            return false;
        }
        self.target = Some(renderer.show(&self.spec.title, &self.spec.banner));
        self.handle = Some(transport.open(&self.url));
        self.state = SessionState::Open;
        info!(url = %self.url, "session opened");
        true
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn spec(&self) -> &SessionSpec {
        &self.spec
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn is_terminated(&self) -> bool {
        matches!(self.state, SessionState::Terminated(_))
    }

    pub fn handle(&self) -> Option<&TransportHandle> {
        self.handle.as_ref()
    }

    pub fn events_received(&self) -> usize {
        self.events_received
    }

    /// Token that cancels a running [`StreamSession::run`] from another task.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Apply one transport event. Events after termination are dropped.
    pub fn handle_event(&mut self, event: TransportEvent) {
        let _entered = self.span.clone().entered();
        if self.state != SessionState::Open {
            debug!(state = ?self.state, "dropping event, session not open");
            return;
        }
        match event {
            TransportEvent::Message(message) => self.on_message(message),
            TransportEvent::Failed(err) => self.on_failure(err),
        }
    }

    /// Close the transport without a banner. Returns false if the session
    /// had already terminated.
    pub fn cancel(&mut self) -> bool {
        let _entered = self.span.clone().entered();
        self.cancel.cancel();
        if self.is_terminated() {
            return false;
        }
        self.terminate(TerminationReason::Cancelled);
        true
    }

    /// Drive the session until it terminates.
    pub async fn run(&mut self) -> SessionOutcome {
        let span = self.span.clone();
        async {
            while self.state == SessionState::Open {
                let cancel = self.cancel.clone();
                let Some(handle) = self.handle.as_mut() else {
                    break;
                };
                let next = tokio::select! {
                    () = cancel.cancelled() => None,
                    event = handle.next_event() => Some(event),
                };
                match next {
                    Some(Some(event)) => self.handle_event(event),
                    Some(None) => {
                        debug!("handle closed outside the session");
                        self.terminate(TerminationReason::Cancelled);
                    }
                    None => {
                        let _ = self.cancel();
                    }
                }
            }
        }
        .instrument(span)
        .await;

        if let SessionState::Terminated(reason) = &self.state {
            return self.build_outcome(reason.clone());
        }
        warn!(session_id = %self.id, "run called on a session that was never started");
        self.state = SessionState::Terminated(TerminationReason::Cancelled);
        self.build_outcome(TerminationReason::Cancelled)
    }

    /// The final result, once terminated.
    pub fn outcome(&self) -> Option<SessionOutcome> {
        match &self.state {
            SessionState::Terminated(reason) => Some(self.build_outcome(reason.clone())),
            _ => None,
        }
    }

    fn on_message(&mut self, message: ChannelEvent) {
        self.events_received += 1;
        if message.is_end() {
            self.append(&done_banner(&message.data));
            self.terminate(TerminationReason::Ended {
                exit: message.data,
            });
            if self.spec.refresh_on_end {
                if let Some(hook) = &self.refresh {
                    hook.refresh(self.spec.resource_id);
                }
            }
            return;
        }
        match self.spec.bindings.rule_for(&message.name) {
            Some(rule) => {
                let line = rule.render(&message.data);
                self.append(&line);
            }
            None => debug!(event = %message.name, "unbound event ignored"),
        }
    }

    fn on_failure(&mut self, err: StreamError) {
        warn!(error_kind = err.error_kind(), error = %err, "stream failed");
        self.append(ERROR_BANNER);
        self.terminate(TerminationReason::Failed(err));
    }

    fn append(&self, line: &str) {
        if let Some(target) = &self.target {
            if !target.append(line) {
                trace!("overlay no longer shows this session, line dropped");
            }
        }
    }

    fn terminate(&mut self, reason: TerminationReason) {
        if let Some(handle) = self.handle.as_mut() {
            let _ = handle.close();
        }
        info!(
            reason = reason.as_str(),
            events = self.events_received,
            "session terminated"
        );
        self.state = SessionState::Terminated(reason);
    }

    fn build_outcome(&self, reason: TerminationReason) -> SessionOutcome {
        SessionOutcome {
            session_id: self.id.clone(),
            resource_id: self.spec.resource_id,
            reason,
            events_received: self.events_received,
        }
    }
}

impl std::fmt::Debug for StreamSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamSession")
            .field("id", &self.id)
            .field("url", &self.url)
            .field("state", &self.state)
            .finish()
    }
}
