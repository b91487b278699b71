use crate::engine::SessionState;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    pub base_url: String,
    pub endpoint: String,
    pub state_dir: PathBuf,
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    pub user_agent: String,
}

impl ClientConfig {
    /// Full URL of the job-stream endpoint.
    pub fn stream_url(&self) -> String {
        join_url(&self.base_url, &self.endpoint)
    }
}

fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// A job field that the backend accepts either as one string or a list of strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    One(String),
    Many(Vec<String>),
}

impl Default for FieldValue {
    fn default() -> Self {
        FieldValue::One(String::new())
    }
}

impl FieldValue {
    /// Collapse CLI values: a single value stays scalar, anything else becomes a list.
    pub fn from_values(mut values: Vec<String>) -> Self {
        if values.len() == 1 {
            FieldValue::One(values.remove(0))
        } else {
            FieldValue::Many(values)
        }
    }
}

/// Parameters of one generation job. Serialized verbatim into the request body
/// and into the session store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRequest {
    pub main: String,
    pub selected_purpose: String,
    pub selected_target: String,
    pub selected_keys: FieldValue,
    pub selected_platforms: FieldValue,
    pub selected_integrations: FieldValue,
    pub selected_performance: FieldValue,
    pub selected_security: FieldValue,
    pub selected_storage: String,
    pub selected_environment: String,
    pub selected_language: FieldValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

impl JobRequest {
    pub fn with_identity(mut self, identity: &UserIdentity) -> Self {
        self.user_id = Some(identity.user_id.clone());
        self.username = Some(identity.username.clone());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserIdentity {
    pub user_id: String,
    pub username: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Initiated,
    Processing,
    Completed,
    Error,
}

/// Documents produced by a completed job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultBundle {
    pub title: String,
    pub pdf_name: String,
    pub word_name: String,
    pub pdf_path: String,
    pub word_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Pdf,
    Word,
}

impl ResultBundle {
    pub fn document(&self, kind: DocumentKind) -> Option<DocumentPath> {
        match kind {
            DocumentKind::Pdf => DocumentPath::parse(&self.pdf_path),
            DocumentKind::Word => DocumentPath::parse(&self.word_path),
        }
    }

    /// Retrieval URL for one of the generated documents, if its path is well formed.
    pub fn download_url(&self, base_url: &str, kind: DocumentKind) -> Option<String> {
        let doc = self.document(kind)?;
        let route = match kind {
            DocumentKind::Pdf => "download-pdf",
            DocumentKind::Word => "download-word",
        };
        Some(join_url(
            base_url,
            &format!("{route}/{}/{}", doc.owner, doc.filename),
        ))
    }
}

/// A server-side document location of the form `<owner>/<category>/<filename>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentPath {
    pub owner: String,
    pub category: String,
    pub filename: String,
}

impl DocumentPath {
    pub fn parse(path: &str) -> Option<Self> {
        let mut parts = path.splitn(3, '/');
        let owner = parts.next()?;
        let category = parts.next()?;
        let filename = parts.next()?;
        if owner.is_empty() || category.is_empty() || filename.is_empty() || filename.contains('/')
        {
            return None;
        }
        Some(Self {
            owner: owner.to_string(),
            category: category.to_string(),
            filename: filename.to_string(),
        })
    }
}

/// Typed interpretation of one `data` frame.
///
/// The result bundle is present exactly when `status` is `Completed`. On the wire
/// the bundle fields sit flat next to `status` and `message`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "WireEvent", try_from = "WireEvent")]
pub struct StatusEvent {
    pub status: JobStatus,
    pub message: String,
    pub result: Option<ResultBundle>,
}

impl StatusEvent {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: JobStatus::Error,
            message: message.into(),
            result: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireEvent {
    status: JobStatus,
    message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pdf_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    word_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pdf_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    word_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
}

impl TryFrom<WireEvent> for StatusEvent {
    type Error = std::convert::Infallible;

    fn try_from(w: WireEvent) -> Result<Self, Self::Error> {
        // Bundle fields on non-completed events (e.g. an early `title`) are ignored.
        let result = (w.status == JobStatus::Completed).then(|| ResultBundle {
            title: w.title.unwrap_or_default(),
            pdf_name: w.pdf_name.unwrap_or_default(),
            word_name: w.word_name.unwrap_or_default(),
            pdf_path: w.pdf_path.unwrap_or_default(),
            word_path: w.word_path.unwrap_or_default(),
            text: w.text,
        });
        Ok(StatusEvent {
            status: w.status,
            message: w.message,
            result,
        })
    }
}

impl From<StatusEvent> for WireEvent {
    fn from(ev: StatusEvent) -> Self {
        let bundle = ev.result.unwrap_or_default();
        let completed = ev.status == JobStatus::Completed;
        let keep = |s: String| (completed).then_some(s);
        WireEvent {
            status: ev.status,
            message: ev.message,
            title: keep(bundle.title),
            pdf_name: keep(bundle.pdf_name),
            word_name: keep(bundle.word_name),
            pdf_path: keep(bundle.pdf_path),
            word_path: keep(bundle.word_path),
            text: bundle.text.filter(|_| completed),
        }
    }
}

/// Lifecycle of one controller session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionPhase {
    Idle,
    Starting,
    Streaming,
    Completed,
    Failed,
    Cancelled,
}

impl SessionPhase {
    pub fn is_finished(self) -> bool {
        matches!(
            self,
            SessionPhase::Completed | SessionPhase::Failed | SessionPhase::Cancelled
        )
    }
}

/// What presentation layers see after every observable transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub phase: SessionPhase,
    pub state: SessionState,
    /// True when this snapshot was rebuilt from a stored result on mount.
    #[serde(default)]
    pub restored: bool,
}

#[derive(Debug, Clone)]
pub enum ClientEvent {
    // Box to keep ClientEvent small; the state carries the whole message log.
    Snapshot(Box<SessionSnapshot>),
    Info(InfoEvent),
}

/// Structured info events emitted by the controller and consumed by UI/CLI layers.
#[derive(Debug, Clone)]
pub enum InfoEvent {
    Resuming { main: String },
    Cancelled,
    SessionCleared,
    /// The server closed the stream before reporting a result.
    StreamClosed,
    /// A new request was given while an earlier job was still in flight; the
    /// earlier job is resumed instead.
    RequestSkipped { main: String },
}

impl InfoEvent {
    /// Render a human-readable message for UI/CLI layers.
    pub fn to_message(&self) -> String {
        match self {
            InfoEvent::Resuming { main } => {
                format!("Resuming generation for \"{}\"", main)
            }
            InfoEvent::Cancelled => "Stopped watching; the job can be resumed".to_string(),
            InfoEvent::SessionCleared => "Session cleared".to_string(),
            InfoEvent::StreamClosed => "The service closed the stream without a result".to_string(),
            InfoEvent::RequestSkipped { main } => format!(
                "An earlier job is still running; \"{}\" was not started (press r to clear it)",
                main
            ),
        }
    }
}
