//! The three places that start a live stream: running a job once, testing
//! a server connection and testing a database connection. Each one only
//! decides the endpoint, the event bindings and the banner.

use std::fmt;
use std::str::FromStr;

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::{Deserialize, Serialize};

use opsdeck_core::ids::ResourceId;

use crate::bindings::{EventBindings, RenderRule};
use crate::session::SessionSpec;

/// Characters a URI component may carry unescaped.
const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

const CONNECTING_BANNER: &str = "Connecting...\n";
const MISSING: &str = "-";

/// Called after a job run ends so the caller can reload its job list.
pub trait RefreshHook: Send + Sync {
    fn refresh(&self, resource: ResourceId);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobType {
    Shell,
    Sql,
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Shell => f.write_str("SHELL"),
            Self::Sql => f.write_str("SQL"),
        }
    }
}

impl FromStr for JobType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "SHELL" => Ok(Self::Shell),
            "SQL" => Ok(Self::Sql),
            other => Err(format!("unknown job type {other:?}, expected SHELL or SQL")),
        }
    }
}

/// What the job list knows about a job; feeds the run banner.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSummary {
    pub id: ResourceId,
    pub name: Option<String>,
    pub job_type: Option<JobType>,
    pub script_name: Option<String>,
    pub server_id: Option<i64>,
    pub database_id: Option<i64>,
    pub cron_expr: Option<String>,
}

impl JobSummary {
    pub fn new(id: impl Into<ResourceId>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    /// The metadata block shown before any output arrives. SQL jobs name
    /// their database, everything else its server.
    pub fn banner(&self) -> String {
        let job_type = self
            .job_type
            .map_or_else(|| MISSING.to_string(), |t| t.to_string());
        let target = match self.job_type {
            Some(JobType::Sql) => format!("[meta] databaseId={}", or_missing(self.database_id)),
            _ => format!("[meta] serverId={}", or_missing(self.server_id)),
        };
        let lines = [
            format!("[meta] jobId={}", self.id),
            format!("[meta] type={job_type}"),
            format!("[meta] script={}", or_missing(self.script_name.as_deref())),
            target,
            format!("[meta] cron={}", or_missing(self.cron_expr.as_deref())),
        ];
        format!("{}\n\n", lines.join("\n"))
    }
}

fn or_missing<T: fmt::Display>(value: Option<T>) -> String {
    value.map_or_else(|| MISSING.to_string(), |v| v.to_string())
}

/// Run a job once and watch its output. Reloads the job list when done.
pub fn job_run(job: &JobSummary) -> SessionSpec {
    SessionSpec {
        resource_id: job.id,
        endpoint: format!("/api/cron/job/runOnce/{}/stream", job.id),
        title: format!(
            "Run once: #{} {}",
            job.id,
            job.name.as_deref().unwrap_or(MISSING)
        ),
        banner: job.banner(),
        bindings: EventBindings::new()
            .bind("meta", RenderRule::Meta)
            .bind("stdout", RenderRule::Verbatim)
            .bind("stderr", RenderRule::Error),
        refresh_on_end: true,
    }
}

/// Test SSH connectivity to a server, optionally running `cmd` there.
pub fn server_test(id: ResourceId, cmd: Option<&str>) -> SessionSpec {
    let mut endpoint = format!("/api/servers/{id}/test/stream");
    if let Some(cmd) = cmd.filter(|c| !c.trim().is_empty()) {
        endpoint.push_str("?cmd=");
        endpoint.extend(utf8_percent_encode(cmd, COMPONENT));
    }
    SessionSpec {
        resource_id: id,
        endpoint,
        title: format!("Test connection #{id}"),
        banner: CONNECTING_BANNER.to_string(),
        bindings: EventBindings::new()
            .bind("meta", RenderRule::Meta)
            .bind("stdout", RenderRule::Verbatim)
            .bind("error", RenderRule::Error)
            .bind("stderr", RenderRule::Error),
        refresh_on_end: false,
    }
}

/// Test connectivity to a registered database.
pub fn database_test(id: ResourceId) -> SessionSpec {
    SessionSpec {
        resource_id: id,
        endpoint: format!("/api/databases/{id}/test"),
        title: format!("Test database connection #{id}"),
        banner: CONNECTING_BANNER.to_string(),
        bindings: EventBindings::new()
            .bind("meta", RenderRule::Meta)
            .bind("stdout", RenderRule::Verbatim)
            .bind("error", RenderRule::Error),
        refresh_on_end: false,
    }
}
