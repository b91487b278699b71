use crate::error::{JobError, JobResult};
use crate::model::StatusEvent;

/// Parse the payload of a `data` frame into a [`StatusEvent`].
///
/// Fails with [`JobError::MalformedEvent`] when the payload is not JSON or has no
/// recognized `status`. Callers drop the frame and keep reading.
pub fn interpret(payload: &str) -> JobResult<StatusEvent> {
    serde_json::from_str::<StatusEvent>(payload.trim())
        .map_err(|e| JobError::MalformedEvent(format!("{e}: {}", preview(payload))))
}

fn preview(payload: &str) -> String {
    const MAX: usize = 80;
    match payload.char_indices().nth(MAX) {
        Some((idx, _)) => format!("{}…", &payload[..idx]),
        None => payload.to_string(),
    }
}
