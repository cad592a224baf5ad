//! End-to-end session tests: mock transport for the state machine, a real
//! HTTP SSE endpoint (wiremock) for the full path.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use proptest::prelude::*;
use tokio::time::timeout;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use opsdeck_core::errors::StreamError;
use opsdeck_core::events::TransportEvent;
use opsdeck_core::ids::ResourceId;
use opsdeck_core::overlay::{DismissTrigger, OverlayRenderer};
use opsdeck_session::{
    database_test, job_run, server_test, JobSummary, JobType, RefreshHook, SessionState,
    StreamSession, TerminationReason,
};
use opsdeck_transport::{HttpTransport, MockTransport, TransportConfig};

const TIMEOUT: Duration = Duration::from_secs(5);
const BASE: &str = "http://console.test";

#[derive(Default)]
struct RecordingHook(Mutex<Vec<ResourceId>>);

impl RefreshHook for RecordingHook {
    fn refresh(&self, resource: ResourceId) {
        self.0.lock().push(resource);
    }
}

fn bare_job(id: i64) -> JobSummary {
    JobSummary::new(ResourceId(id))
}

fn sse_body(frames: &[(&str, &str)]) -> String {
    frames
        .iter()
        .map(|(name, data)| format!("event:{name}\ndata:{data}\n\n"))
        .collect()
}

#[tokio::test]
async fn job_run_streams_to_done() {
    let renderer = OverlayRenderer::new();
    let transport = MockTransport::with_scripts(vec![vec![
        TransportEvent::message("meta", "jobId=7"),
        TransportEvent::message("stdout", "hello"),
        TransportEvent::message("end", "0"),
    ]]);
    let hook = Arc::new(RecordingHook::default());

    let mut session = StreamSession::new(job_run(&bare_job(7)), BASE).with_refresh_hook(hook.clone());
    assert!(session.start(&renderer, &transport));
    let outcome = timeout(TIMEOUT, session.run()).await.unwrap();

    assert_eq!(renderer.body(), "[meta] jobId=7\nhello\n\n[done] exit=0\n");
    assert_eq!(outcome.exit_code(), 0);
    assert!(session.handle().unwrap().is_closed());
    assert!(transport.feed(0).unwrap().is_closed());
    assert_eq!(*hook.0.lock(), vec![ResourceId(7)]);
    assert_eq!(
        transport.opened_urls(),
        vec!["http://console.test/api/cron/job/runOnce/7/stream"]
    );
}

#[tokio::test]
async fn transport_error_before_any_event() {
    let renderer = OverlayRenderer::new();
    let transport = MockTransport::with_scripts(vec![vec![TransportEvent::Failed(
        StreamError::Connect("connection refused".into()),
    )]]);

    let mut session = StreamSession::open(database_test(ResourceId(3)), BASE, &renderer, &transport);
    let outcome = timeout(TIMEOUT, session.run()).await.unwrap();

    assert_eq!(
        renderer.text(),
        "Connecting...\n\n[error] connection interrupted\n"
    );
    assert!(!renderer.text().contains("[done]"));
    assert!(matches!(outcome.reason, TerminationReason::Failed(StreamError::Connect(_))));
    assert_eq!(outcome.exit_code(), 1);
    assert!(session.handle().unwrap().is_closed());
}

#[test]
fn append_after_hide_is_dropped() {
    let renderer = OverlayRenderer::new();
    let _ = renderer.show("T", "B\n");
    renderer.hide();
    assert!(!renderer.append("X"));
    assert!(!renderer.is_visible());
    assert_eq!(renderer.text(), "");
}

#[test]
fn second_session_replaces_the_first() {
    let renderer = OverlayRenderer::new();
    let transport = MockTransport::new();

    let mut first = StreamSession::open(server_test(ResourceId(1), None), BASE, &renderer, &transport);
    first.handle_event(TransportEvent::message("stdout", "first output"));

    let mut second = StreamSession::open(database_test(ResourceId(2)), BASE, &renderer, &transport);
    second.handle_event(TransportEvent::message("stdout", "second output"));

    assert_eq!(renderer.title(), "Test database connection #2");
    assert_eq!(renderer.text(), "Connecting...\nsecond output\n");
    assert!(!first.handle().unwrap().is_closed());
    assert!(!transport.feed(0).unwrap().is_closed());
    assert_eq!(first.state(), &SessionState::Open);

    // The leaked first session can no longer write into the second overlay.
    first.handle_event(TransportEvent::message("stdout", "stray"));
    assert!(!renderer.text().contains("stray"));
}

#[tokio::test]
async fn dismiss_does_not_close_the_transport() {
    let renderer = OverlayRenderer::new();
    let transport = MockTransport::new();
    let mut session = StreamSession::open(server_test(ResourceId(4), None), BASE, &renderer, &transport);

    renderer.dismiss(DismissTrigger::BackgroundClick);
    let feed = transport.feed(0).unwrap();
    assert!(feed.message("stdout", "still running").await);
    assert!(feed.message("end", "0").await);

    let outcome = timeout(TIMEOUT, session.run()).await.unwrap();
    assert_eq!(outcome.reason, TerminationReason::Ended { exit: "0".into() });
    assert!(!renderer.is_visible());
    assert_eq!(renderer.text(), "");
}

#[tokio::test]
async fn error_and_stderr_render_inline_without_terminating() {
    let renderer = OverlayRenderer::new();
    let transport = MockTransport::with_scripts(vec![vec![
        TransportEvent::message("meta", "host=10.0.0.4"),
        TransportEvent::message("error", "auth failed"),
        TransportEvent::message("stderr", "warning: key"),
        TransportEvent::message("end", "255"),
    ]]);
    let mut session = StreamSession::open(server_test(ResourceId(4), None), BASE, &renderer, &transport);
    let outcome = timeout(TIMEOUT, session.run()).await.unwrap();

    assert_eq!(
        renderer.body(),
        "[meta] host=10.0.0.4\n[ERR] auth failed\n[ERR] warning: key\n\n[done] exit=255\n"
    );
    assert_eq!(outcome.exit_code(), 255);
}

#[tokio::test]
async fn job_run_over_http() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/cron/job/runOnce/7/stream"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(sse_body(&[
                    ("meta", "jobId=7"),
                    ("stdout", "hello"),
                    ("end", "0"),
                ])),
        )
        .expect(1)
        .mount(&server)
        .await;

    let renderer = OverlayRenderer::new();
    let transport = HttpTransport::new(TransportConfig::default()).unwrap();
    let job = JobSummary {
        name: Some("backup".into()),
        job_type: Some(JobType::Shell),
        ..bare_job(7)
    };
    let mut session = StreamSession::open(job_run(&job), &server.uri(), &renderer, &transport);
    let outcome = timeout(TIMEOUT, session.run()).await.unwrap();

    assert_eq!(outcome.reason, TerminationReason::Ended { exit: "0".into() });
    assert_eq!(renderer.title(), "Run once: #7 backup");
    assert_eq!(renderer.body(), "[meta] jobId=7\nhello\n\n[done] exit=0\n");
    assert!(renderer.text().starts_with("[meta] jobId=7\n[meta] type=SHELL\n"));
}

#[tokio::test]
async fn server_test_over_http_sends_cmd() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/servers/5/test/stream"))
        .and(query_param("cmd", "uname -a"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(sse_body(&[("stdout", "Linux"), ("end", "0")])),
        )
        .expect(1)
        .mount(&server)
        .await;

    let renderer = OverlayRenderer::new();
    let transport = HttpTransport::new(TransportConfig::default()).unwrap();
    let mut session = StreamSession::open(
        server_test(ResourceId(5), Some("uname -a")),
        &server.uri(),
        &renderer,
        &transport,
    );
    let outcome = timeout(TIMEOUT, session.run()).await.unwrap();

    assert_eq!(outcome.exit_code(), 0);
    assert_eq!(renderer.text(), "Connecting...\nLinux\n\n[done] exit=0\n");
}

#[tokio::test]
async fn stream_cut_before_end_shows_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/databases/3/test"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(sse_body(&[("meta", "url=jdbc:mysql://db"), ("stdout", "ok")])),
        )
        .mount(&server)
        .await;

    let renderer = OverlayRenderer::new();
    let transport = HttpTransport::new(TransportConfig::default()).unwrap();
    let mut session = StreamSession::open(database_test(ResourceId(3)), &server.uri(), &renderer, &transport);
    let outcome = timeout(TIMEOUT, session.run()).await.unwrap();

    assert_eq!(outcome.reason, TerminationReason::Failed(StreamError::ClosedByServer));
    assert_eq!(
        renderer.body(),
        "[meta] url=jdbc:mysql://db\nok\n\n[error] connection interrupted\n"
    );
}

#[tokio::test]
async fn not_found_is_a_transport_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let renderer = OverlayRenderer::new();
    let transport = HttpTransport::new(TransportConfig::default()).unwrap();
    let mut session = StreamSession::open(database_test(ResourceId(99)), &server.uri(), &renderer, &transport);
    let outcome = timeout(TIMEOUT, session.run()).await.unwrap();

    assert!(matches!(
        outcome.reason,
        TerminationReason::Failed(StreamError::Status { status: 404, .. })
    ));
    assert_eq!(renderer.body(), "\n[error] connection interrupted\n");
}

proptest! {
    #[test]
    fn bound_events_render_in_arrival_order(
        events in proptest::collection::vec(
            (prop::sample::select(vec!["meta", "stdout", "stderr"]), "[^\\n]{0,24}"),
            0..40,
        )
    ) {
        let renderer = OverlayRenderer::new();
        let transport = MockTransport::new();
        let spec = job_run(&bare_job(11));
        let bindings = spec.bindings.clone();
        let mut session = StreamSession::open(spec, BASE, &renderer, &transport);

        let mut expected = String::new();
        for (name, payload) in &events {
            session.handle_event(TransportEvent::message(*name, payload.as_str()));
            let rule = bindings.rule_for(name);
            prop_assert!(rule.is_some(), "{} is not bound for job runs", name);
            if let Some(rule) = rule {
                expected.push_str(&rule.render(payload));
                expected.push('\n');
            }
        }

        prop_assert_eq!(renderer.body(), expected);
        prop_assert_eq!(session.state(), &SessionState::Open);
        prop_assert_eq!(session.events_received(), events.len());
    }
}
