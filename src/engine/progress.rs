//! Cumulative progress of one job session.

use crate::model::{JobStatus, ResultBundle, StatusEvent};
use serde::{Deserialize, Serialize};

/// Server-side phases a job normally reports: initiated, five processing steps, completed.
pub const EXPECTED_STEPS: u32 = 7;
/// Upper bound of the progress measure (percent).
pub const PROGRESS_MAX: f64 = 100.0;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    Result(ResultBundle),
    Error(String),
}

/// What an [`SessionState::apply`] call did to the outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Progress,
    /// This event set the outcome.
    Terminal,
    /// An outcome was already set; only the log changed.
    AfterTerminal,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionState {
    pub messages: Vec<String>,
    pub current_message: String,
    pub progress: f64,
    pub events_applied: u32,
    pub outcome: Option<Outcome>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// State shown for a result that was stored by an earlier run.
    pub fn restored(event: &StatusEvent) -> Self {
        let mut state = Self::new();
        state.apply(event);
        state.progress = PROGRESS_MAX;
        state
    }

    pub fn apply(&mut self, event: &StatusEvent) -> Applied {
        self.messages.push(event.message.clone());
        self.current_message = event.message.clone();

        if self.is_terminal() {
            return Applied::AfterTerminal;
        }

        self.events_applied += 1;
        let ratio = (f64::from(self.events_applied) / f64::from(EXPECTED_STEPS)).min(1.0);
        self.progress = self.progress.max(ratio * PROGRESS_MAX);

        match event.status {
            JobStatus::Completed => {
                self.outcome = Some(Outcome::Result(event.result.clone().unwrap_or_default()));
                self.progress = PROGRESS_MAX;
                Applied::Terminal
            }
            JobStatus::Error => {
                self.outcome = Some(Outcome::Error(event.message.clone()));
                Applied::Terminal
            }
            JobStatus::Initiated | JobStatus::Processing => Applied::Progress,
        }
    }

    /// Record a failure that did not come from the stream (transport, early close).
    /// Returns false if an outcome was already set.
    pub fn fail(&mut self, message: impl Into<String>) -> bool {
        if self.is_terminal() {
            return false;
        }
        let message = message.into();
        self.current_message = message.clone();
        self.outcome = Some(Outcome::Error(message));
        true
    }

    pub fn result(&self) -> Option<&ResultBundle> {
        match &self.outcome {
            Some(Outcome::Result(bundle)) => Some(bundle),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match &self.outcome {
            Some(Outcome::Error(msg)) => Some(msg),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.outcome.is_some()
    }
}
