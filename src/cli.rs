use crate::context::ClientContext;
use crate::engine::HttpTransport;
use crate::model::{
    ClientConfig, ClientEvent, FieldValue, JobRequest, SessionPhase, SessionSnapshot,
    UserIdentity,
};
use crate::orchestrator::{run_controller, ControllerOptions, JobController, UiCommand};
use crate::storage::SessionStore;
use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Output line routing for stdout/stderr writer.
enum OutputLine {
    Stdout(String),
    Stderr(String),
}

/// Spawn a blocking writer for stdout/stderr to avoid blocking async tasks.
fn spawn_output_writer() -> (
    mpsc::UnboundedSender<OutputLine>,
    tokio::task::JoinHandle<()>,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<OutputLine>();
    let handle = tokio::task::spawn_blocking(move || {
        let stdout = std::io::stdout();
        let stderr = std::io::stderr();
        let mut out = std::io::LineWriter::new(stdout.lock());
        let mut err = std::io::LineWriter::new(stderr.lock());

        while let Some(line) = rx.blocking_recv() {
            match line {
                OutputLine::Stdout(msg) => {
                    let _ = writeln!(out, "{}", msg);
                }
                OutputLine::Stderr(msg) => {
                    let _ = writeln!(err, "{}", msg);
                }
            }
        }

        let _ = out.flush();
        let _ = err.flush();
    });
    (tx, handle)
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser, Clone)]
#[command(
    name = "jobstream",
    version,
    about = "Run a document generation job and follow its progress live"
)]
pub struct Cli {
    /// Base URL of the job service
    #[arg(long, default_value = "http://localhost:8000")]
    pub base_url: String,

    /// Path of the job-stream endpoint
    #[arg(long, default_value = "/generate-srs-stream")]
    pub endpoint: String,

    /// Directory holding the resumable session state and the TUI log
    #[arg(long)]
    pub state_dir: Option<PathBuf>,

    /// Connect timeout (the stream itself is never timed out)
    #[arg(long, default_value = "10s")]
    pub connect_timeout: humantime::Duration,

    /// User-Agent header sent with job requests
    #[arg(long)]
    pub user_agent: Option<String>,

    /// Print the final session as JSON and exit (no TUI)
    #[arg(long)]
    pub json: bool,

    /// Print progress as text and exit when the job settles (no TUI)
    #[arg(long)]
    pub text: bool,

    /// Clear the persisted session and exit
    #[arg(long)]
    pub reset: bool,

    /// Do not resume an active session or restore a stored result on launch
    #[arg(long)]
    pub no_resume: bool,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// Main description of the system to document; starts a new job when given
    #[arg(long)]
    pub main: Option<String>,

    #[arg(long, default_value = "")]
    pub purpose: String,

    #[arg(long, default_value = "")]
    pub target: String,

    /// Key features (repeat or comma-separate)
    #[arg(long, value_delimiter = ',')]
    pub keys: Vec<String>,

    #[arg(long, value_delimiter = ',')]
    pub platforms: Vec<String>,

    #[arg(long, value_delimiter = ',')]
    pub integrations: Vec<String>,

    #[arg(long, value_delimiter = ',')]
    pub performance: Vec<String>,

    #[arg(long, value_delimiter = ',')]
    pub security: Vec<String>,

    #[arg(long, default_value = "")]
    pub storage: String,

    #[arg(long, default_value = "")]
    pub environment: String,

    #[arg(long, value_delimiter = ',')]
    pub language: Vec<String>,

    /// Account id attached to job requests
    #[arg(long)]
    pub user_id: Option<String>,

    /// Account name attached to job requests (defaults to "user")
    #[arg(long, requires = "user_id")]
    pub username: Option<String>,
}

impl Cli {
    pub fn is_tui(&self) -> bool {
        cfg!(feature = "tui") && !self.json && !self.text && !self.reset
    }
}

pub async fn run(args: Cli) -> Result<()> {
    if args.json && args.text {
        return Err(anyhow::anyhow!("--json and --text are mutually exclusive"));
    }

    let cfg = build_config(&args);
    if args.reset {
        SessionStore::open(&cfg.state_dir).reset();
        println!("Session cleared");
        return Ok(());
    }

    if args.is_tui() {
        #[cfg(feature = "tui")]
        {
            return crate::tui::run(args, cfg).await;
        }
    }

    run_headless(args, cfg).await
}

pub fn default_state_dir() -> PathBuf {
    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("jobstream")
}

/// Build a `ClientConfig` from CLI arguments.
pub fn build_config(args: &Cli) -> ClientConfig {
    ClientConfig {
        base_url: args.base_url.clone(),
        endpoint: args.endpoint.clone(),
        state_dir: args.state_dir.clone().unwrap_or_else(default_state_dir),
        connect_timeout: Duration::from(args.connect_timeout),
        user_agent: args
            .user_agent
            .clone()
            .unwrap_or_else(|| format!("jobstream/{}", env!("CARGO_PKG_VERSION"))),
    }
}

/// Build the job request from CLI arguments, if `--main` was given.
pub fn build_request(args: &Cli) -> Option<JobRequest> {
    let main = args.main.clone()?;
    Some(JobRequest {
        main,
        selected_purpose: args.purpose.clone(),
        selected_target: args.target.clone(),
        selected_keys: FieldValue::from_values(args.keys.clone()),
        selected_platforms: FieldValue::from_values(args.platforms.clone()),
        selected_integrations: FieldValue::from_values(args.integrations.clone()),
        selected_performance: FieldValue::from_values(args.performance.clone()),
        selected_security: FieldValue::from_values(args.security.clone()),
        selected_storage: args.storage.clone(),
        selected_environment: args.environment.clone(),
        selected_language: FieldValue::from_values(args.language.clone()),
        user_id: None,
        username: None,
    })
}

fn build_identity(args: &Cli) -> Option<UserIdentity> {
    let user_id = args.user_id.clone()?;
    Some(UserIdentity {
        user_id,
        username: args.username.clone().unwrap_or_else(|| "user".to_string()),
    })
}

/// Wire store, context, and transport into a controller.
pub(crate) fn build_controller(
    args: &Cli,
    cfg: &ClientConfig,
    event_tx: mpsc::UnboundedSender<ClientEvent>,
) -> Result<JobController> {
    let store = SessionStore::open(&cfg.state_dir);
    let context = ClientContext::init(build_identity(args), &store);
    let transport = HttpTransport::new(cfg).context("failed to build HTTP client")?;
    Ok(JobController::new(
        Arc::new(transport),
        store,
        context,
        event_tx,
    ))
}

/// Text and JSON modes: run one session to completion, printing as it goes.
async fn run_headless(args: Cli, cfg: ClientConfig) -> Result<()> {
    let (out_tx, out_handle) = spawn_output_writer();
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<ClientEvent>();
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<UiCommand>();

    let controller = build_controller(&args, &cfg, event_tx)?;
    let opts = ControllerOptions {
        resume: !args.no_resume,
        initial_request: build_request(&args),
        exit_when_settled: true,
    };
    let handle = tokio::spawn(run_controller(controller, opts, cmd_rx));

    // Ctrl-C stops watching but leaves the job resumable.
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = cmd_tx.send(UiCommand::Quit);
        }
    });

    let mut printed = 0usize;
    let mut last: Option<SessionSnapshot> = None;
    while let Some(ev) = event_rx.recv().await {
        match ev {
            ClientEvent::Snapshot(snap) => {
                if !args.json {
                    for line in progress_lines(&snap, &mut printed) {
                        let _ = out_tx.send(OutputLine::Stderr(line));
                    }
                }
                last = Some(*snap);
            }
            ClientEvent::Info(info) => {
                if !args.json {
                    let _ = out_tx.send(OutputLine::Stderr(info.to_message()));
                }
            }
        }
    }

    let phase = handle.await.context("controller task failed")??;
    ctrl_c.abort();

    let outcome = match (phase, last) {
        (None, _) => {
            let _ = out_tx.send(OutputLine::Stderr(
                "No active session to resume. Pass --main to start a job.".into(),
            ));
            Ok(())
        }
        (Some(SessionPhase::Cancelled), _) => {
            let _ = out_tx.send(OutputLine::Stderr(
                "Stopped; run again to resume the job.".into(),
            ));
            Ok(())
        }
        (Some(_), Some(snap)) => {
            if args.json {
                let json = serde_json::to_string_pretty(&snap)?;
                let _ = out_tx.send(OutputLine::Stdout(json));
            } else if let Some(bundle) = snap.state.result() {
                let summary = crate::text_summary::build_text_summary(bundle, &cfg.base_url);
                for line in summary.lines {
                    let _ = out_tx.send(OutputLine::Stdout(line));
                }
            }
            match snap.state.error() {
                Some(msg) => Err(anyhow::anyhow!("generation failed: {msg}")),
                None => Ok(()),
            }
        }
        (Some(_), None) => Ok(()),
    };

    drop(out_tx);
    let _ = out_handle.await;
    outcome
}

/// Lines for log messages not yet printed, plus a header on phase changes.
fn progress_lines(snap: &SessionSnapshot, printed: &mut usize) -> Vec<String> {
    let mut lines = Vec::new();
    let state = &snap.state;
    if state.messages.len() < *printed {
        *printed = 0;
    }
    match snap.phase {
        SessionPhase::Starting => lines.push("== Starting ==".to_string()),
        SessionPhase::Idle => lines.push("== Idle ==".to_string()),
        _ => {}
    }
    for msg in &state.messages[*printed..] {
        lines.push(format!(
            "[{}] {:>3.0}% {}",
            clock(),
            state.progress,
            msg
        ));
    }
    *printed = state.messages.len();
    if snap.phase == SessionPhase::Failed {
        if let Some(err) = state.error() {
            lines.push(format!("Error: {err}"));
        }
    }
    lines
}

fn clock() -> String {
    let now = time::OffsetDateTime::now_local().unwrap_or_else(|_| time::OffsetDateTime::now_utc());
    now.format(time::macros::format_description!("[hour]:[minute]:[second]"))
        .unwrap_or_else(|_| "--:--:--".into())
}
