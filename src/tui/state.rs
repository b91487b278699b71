use crate::engine::SessionState;
use crate::model::{ClientEvent, InfoEvent, SessionPhase};
use ratatui::{
    style::Color,
    style::Style,
    text::{Line, Span},
};

pub struct UiState {
    pub tab: usize,
    pub phase: SessionPhase,
    pub info: String,
    pub session: SessionState,
    /// Result came from an earlier run rather than a live stream.
    pub restored: bool,
    /// A request was given on the command line, so `s` can start a job.
    pub can_start: bool,
    pub base_url: String,
}

impl Default for UiState {
    fn default() -> Self {
        Self {
            tab: 0,
            phase: SessionPhase::Idle,
            info: String::new(),
            session: SessionState::default(),
            restored: false,
            can_start: false,
            base_url: String::new(),
        }
    }
}

impl UiState {
    pub fn apply_event(&mut self, ev: ClientEvent) {
        match ev {
            ClientEvent::Snapshot(snap) => {
                let snap = *snap;
                self.phase = snap.phase;
                self.restored = snap.restored;
                self.session = snap.state;
                match snap.phase {
                    SessionPhase::Completed if self.restored => {
                        self.info = "Showing the result of an earlier run".into();
                    }
                    SessionPhase::Completed => self.info = "Generation complete".into(),
                    SessionPhase::Failed => self.info = "Generation failed".into(),
                    SessionPhase::Starting => self.info = "Connecting…".into(),
                    _ => {}
                }
            }
            ClientEvent::Info(info) => {
                // Cancellation has no snapshot of its own.
                if matches!(info, InfoEvent::Cancelled) && self.is_busy() {
                    self.phase = SessionPhase::Cancelled;
                }
                self.info = info.to_message();
            }
        }
    }

    pub fn is_busy(&self) -> bool {
        self.phase != SessionPhase::Idle && !self.phase.is_finished()
    }

    pub fn phase_label(&self) -> (&'static str, Color) {
        match self.phase {
            SessionPhase::Idle => ("Idle", Color::Gray),
            SessionPhase::Starting => ("Starting", Color::Yellow),
            SessionPhase::Streaming => ("Generating", Color::Yellow),
            SessionPhase::Completed => ("Completed", Color::Green),
            SessionPhase::Failed => ("Failed", Color::Red),
            SessionPhase::Cancelled => ("Stopped", Color::Gray),
        }
    }

    /// Gauge ratio in `0.0..=1.0`.
    pub fn ratio(&self) -> f64 {
        (self.session.progress / crate::engine::PROGRESS_MAX).clamp(0.0, 1.0)
    }
}

pub fn kv_line(label: &str, value: &str) -> Line<'static> {
    Line::from(vec![
        Span::styled(format!("{label}:"), Style::default().fg(Color::Gray)),
        Span::raw(" "),
        Span::raw(value.to_string()),
    ])
}
