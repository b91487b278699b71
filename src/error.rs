//! Error taxonomy for the streaming-job client.
//!
//! Only `Transport` failures reach the user as a failed session. The other
//! variants are recovered where they occur.

use thiserror::Error;

pub type JobResult<T> = std::result::Result<T, JobError>;

#[derive(Debug, Error)]
pub enum JobError {
    /// Outbound request failed, was rejected, or the body could not be read.
    #[error("transport: {0}")]
    Transport(String),

    /// A single data frame could not be interpreted as a status event.
    #[error("malformed event: {0}")]
    MalformedEvent(String),

    /// The caller cancelled the stream.
    #[error("stream aborted")]
    StreamAborted,

    /// The session store could not be read or written.
    #[error("persistence: {0}")]
    Persistence(String),
}

impl From<reqwest::Error> for JobError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

impl From<std::io::Error> for JobError {
    fn from(err: std::io::Error) -> Self {
        Self::Persistence(err.to_string())
    }
}
