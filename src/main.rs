//! # opsdeck
//!
//! Watch a job run or a connectivity test live from the terminal.

#![deny(unsafe_code)]

mod terminal;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use opsdeck_core::ids::ResourceId;
use opsdeck_core::overlay::{DismissTrigger, OverlayRenderer};
use opsdeck_session::{
    database_test, job_run, server_test, JobSummary, JobType, RefreshHook, SessionSpec,
    StreamSession,
};
use opsdeck_settings::OpsdeckSettings;
use opsdeck_telemetry::{init_telemetry, TelemetryConfig};
use opsdeck_transport::{HttpTransport, TransportConfig};

use crate::terminal::TerminalSink;

/// Exit code for failures before any stream was opened.
const EXIT_SETUP_FAILED: u8 = 2;

/// Live output of ops console jobs and connectivity tests.
#[derive(Parser, Debug)]
#[command(name = "opsdeck", about = "Stream live job and connection-test output")]
struct Cli {
    /// Console base URL (overrides settings).
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// Settings file (default `~/.opsdeck/settings.json`).
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Log level: error, warn, info, debug or trace. RUST_LOG wins.
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Emit logs as JSON lines on stderr.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a cron job once and stream its output.
    RunJob {
        #[arg(value_parser = clap::value_parser!(i64).range(1..))]
        id: i64,
        #[arg(long)]
        name: Option<String>,
        /// SHELL or SQL.
        #[arg(long = "type")]
        job_type: Option<JobType>,
        /// Script name shown in the banner.
        #[arg(long)]
        script: Option<String>,
        #[arg(long)]
        server_id: Option<i64>,
        #[arg(long)]
        database_id: Option<i64>,
        #[arg(long)]
        cron: Option<String>,
    },
    /// Test the SSH connection to a registered server.
    TestServer {
        #[arg(value_parser = clap::value_parser!(i64).range(1..))]
        id: i64,
        /// Command to run once connected.
        #[arg(long)]
        cmd: Option<String>,
    },
    /// Test the connection to a registered database.
    TestDatabase {
        #[arg(value_parser = clap::value_parser!(i64).range(1..))]
        id: i64,
    },
}

impl Command {
    fn session_spec(self) -> SessionSpec {
        match self {
            Self::RunJob {
                id,
                name,
                job_type,
                script,
                server_id,
                database_id,
                cron,
            } => job_run(&JobSummary {
                id: ResourceId(id),
                name,
                job_type,
                script_name: script,
                server_id,
                database_id,
                cron_expr: cron,
            }),
            Self::TestServer { id, cmd } => server_test(ResourceId(id), cmd.as_deref()),
            Self::TestDatabase { id } => database_test(ResourceId(id)),
        }
    }
}

/// The job list lives in the console UI; from the terminal a refresh only
/// gets recorded.
struct LogRefresh;

impl RefreshHook for LogRefresh {
    fn refresh(&self, resource: ResourceId) {
        tracing::info!(resource_id = %resource, "job list refresh requested");
    }
}

fn load_settings(cli: &Cli) -> Result<OpsdeckSettings> {
    let mut settings = match &cli.settings {
        Some(path) => opsdeck_settings::load_settings_from_path(path)
            .with_context(|| format!("failed to load settings from {}", path.display()))?,
        None => opsdeck_settings::load_settings().context("failed to load settings")?,
    };
    if let Some(url) = &cli.base_url {
        settings.server.base_url.clone_from(url);
    }
    if let Some(level) = &cli.log_level {
        settings.logging.level.clone_from(level);
    }
    if cli.json_logs {
        settings.logging.json = true;
    }
    opsdeck_settings::loader::validate(&settings).context("invalid settings")?;
    Ok(settings)
}

fn transport_config(settings: &OpsdeckSettings) -> TransportConfig {
    TransportConfig {
        connect_timeout: settings.stream.connect_timeout(),
        idle_timeout: settings.stream.idle_timeout(),
        channel_capacity: settings.stream.channel_capacity,
    }
}

async fn stream(spec: SessionSpec, settings: &OpsdeckSettings) -> Result<i32> {
    let transport = HttpTransport::new(transport_config(settings))
        .context("failed to create HTTP transport")?;

    let renderer = OverlayRenderer::global();
    renderer.set_sink(Arc::new(TerminalSink::new()));

    let mut session = StreamSession::new(spec, &settings.server.base_url)
        .with_refresh_hook(Arc::new(LogRefresh));
    let _ = session.start(renderer, &transport);

    let cancel = session.cancel_token();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            renderer.dismiss(DismissTrigger::EscapeKey);
            cancel.cancel();
        }
    });

    let outcome = session.run().await;
    interrupt.abort();

    tracing::info!(
        session_id = %outcome.session_id,
        reason = outcome.reason.as_str(),
        events = outcome.events_received,
        "stream finished"
    );
    Ok(outcome.exit_code())
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let settings = load_settings(&cli)?;

    init_telemetry(&TelemetryConfig {
        json: settings.logging.json,
        ..TelemetryConfig::default().with_level_name(&settings.logging.level)
    });

    let spec = cli.command.session_spec();
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start tokio runtime")?;
    runtime.block_on(stream(spec, &settings))
}

fn main() -> ExitCode {
    match run() {
        Ok(code) => ExitCode::from(u8::try_from(code).unwrap_or(1)),
        Err(e) => {
            eprintln!("opsdeck: {e:#}");
            ExitCode::from(EXIT_SETUP_FAILED)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_job_flags_build_banner() {
        let cli = Cli::try_parse_from([
            "opsdeck", "run-job", "7", "--name", "backup", "--type", "sql", "--database-id", "12",
        ])
        .unwrap();
        let spec = cli.command.session_spec();
        assert_eq!(spec.endpoint, "/api/cron/job/runOnce/7/stream");
        assert_eq!(spec.title, "Run once: #7 backup");
        assert!(spec.banner.contains("[meta] type=SQL\n"));
        assert!(spec.banner.contains("[meta] databaseId=12\n"));
    }

    #[test]
    fn test_server_accepts_cmd_and_globals() {
        let cli = Cli::try_parse_from([
            "opsdeck", "test-server", "5", "--cmd", "uptime", "--base-url", "http://ops:9000",
            "--json-logs",
        ])
        .unwrap();
        assert_eq!(cli.base_url.as_deref(), Some("http://ops:9000"));
        assert!(cli.json_logs);
        assert_eq!(
            cli.command.session_spec().endpoint,
            "/api/servers/5/test/stream?cmd=uptime"
        );
    }

    #[test]
    fn ids_must_be_positive() {
        assert!(Cli::try_parse_from(["opsdeck", "test-database", "0"]).is_err());
        assert!(Cli::try_parse_from(["opsdeck", "test-database", "x"]).is_err());
    }

    #[test]
    fn flags_override_settings_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"server": {"baseUrl": "http://from-file:1"}, "stream": {"idleTimeoutMs": 2000}}"#,
        )
        .unwrap();
        let path_arg = path.to_string_lossy().into_owned();
        let cli = Cli::try_parse_from([
            "opsdeck", "--settings", path_arg.as_str(), "--base-url", "http://from-flag:2",
            "test-database", "3",
        ])
        .unwrap();

        let settings = load_settings(&cli).unwrap();
        assert_eq!(settings.server.base_url, "http://from-flag:2");
        let config = transport_config(&settings);
        assert_eq!(config.idle_timeout, Some(std::time::Duration::from_secs(2)));
    }

    #[test]
    fn bad_base_url_flag_is_rejected() {
        let cli = Cli::try_parse_from(["opsdeck", "--base-url", "ops:80", "test-database", "3"])
            .unwrap();
        assert!(load_settings(&cli).is_err());
    }
}
