//! # opsdeck-session
//!
//! Composes a [`StreamTransport`](opsdeck_transport::StreamTransport) with
//! the overlay: one [`StreamSession`] per user action, built from a
//! [`SessionSpec`] supplied by one of the [`call_sites`].

pub mod bindings;
pub mod call_sites;
pub mod session;

pub use bindings::{EventBindings, RenderRule};
pub use call_sites::{database_test, job_run, server_test, JobSummary, JobType, RefreshHook};
pub use session::{
    done_banner, SessionOutcome, SessionSpec, SessionState, StreamSession, TerminationReason,
    ERROR_BANNER,
};
