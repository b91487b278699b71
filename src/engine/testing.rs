//! Scripted transport for driving sessions without a server.

use super::client::{ByteStream, JobTransport};
use crate::error::{JobError, JobResult};
use crate::model::{JobRequest, StatusEvent};
use bytes::Bytes;
use futures::future::BoxFuture;
use futures::{stream, FutureExt, StreamExt};
use std::sync::Mutex;

#[derive(Default)]
pub struct ScriptedTransport {
    chunks: Vec<Vec<u8>>,
    read_error: Option<String>,
    open_error: Option<String>,
    hang: bool,
    pub requests: Mutex<Vec<JobRequest>>,
}

impl ScriptedTransport {
    pub fn with_chunks<I, C>(chunks: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<Vec<u8>>,
    {
        Self {
            chunks: chunks.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    /// A stream of `data:` lines, one chunk per event, followed by a close line.
    pub fn with_events(events: &[StatusEvent]) -> Self {
        let mut chunks: Vec<Vec<u8>> = events
            .iter()
            .map(|ev| format!("data: {}\n\n", serde_json::to_string(ev).unwrap()).into_bytes())
            .collect();
        chunks.push(b"event: close\ndata: {}\n\n".to_vec());
        Self {
            chunks,
            ..Default::default()
        }
    }

    pub fn failing_open(message: &str) -> Self {
        Self {
            open_error: Some(message.to_string()),
            ..Default::default()
        }
    }

    /// Fail the body read after the scripted chunks.
    pub fn then_read_error(mut self, message: &str) -> Self {
        self.read_error = Some(message.to_string());
        self
    }

    /// Keep the body open after the scripted chunks.
    pub fn then_hang(mut self) -> Self {
        self.hang = true;
        self
    }

    pub fn opened(&self) -> Vec<JobRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl JobTransport for ScriptedTransport {
    fn open<'a>(&'a self, request: &'a JobRequest) -> BoxFuture<'a, JobResult<ByteStream>> {
        async move {
            self.requests.lock().unwrap().push(request.clone());
            if let Some(msg) = &self.open_error {
                return Err(JobError::Transport(msg.clone()));
            }
            let mut items: Vec<JobResult<Bytes>> = self
                .chunks
                .iter()
                .map(|c| Ok(Bytes::from(c.clone())))
                .collect();
            if let Some(msg) = &self.read_error {
                items.push(Err(JobError::Transport(msg.clone())));
            }
            let body = stream::iter(items);
            let body: ByteStream = if self.hang {
                body.chain(stream::pending()).boxed()
            } else {
                body.boxed()
            };
            Ok(body)
        }
        .boxed()
    }
}
