mod client;
mod frame;
mod interpret;
mod progress;
#[cfg(test)]
pub(crate) mod testing;

pub use client::{HttpTransport, JobTransport};
pub use frame::{FrameDecoder, ProtocolFrame};
pub use interpret::interpret;
pub use progress::{Applied, SessionState, EXPECTED_STEPS, PROGRESS_MAX};

use crate::context::ClientContext;
use crate::error::{JobError, JobResult};
use crate::model::{
    ClientEvent, InfoEvent, JobRequest, JobStatus, SessionPhase, SessionSnapshot, StatusEvent,
};
use crate::storage::SessionStore;
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::codec::FramedRead;
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Shown for any failure to reach or keep reading the job service.
pub const CONNECTION_ERROR: &str = "Failed to connect to generation service";

/// One run of the job stream: open, decode, interpret, aggregate, reconcile.
///
/// The store is written only when the stream ends: a terminal event, a failed
/// transport, or the server's close line. Cancellation leaves it untouched so
/// the next mount resumes the job.
pub struct JobSession {
    pub request: JobRequest,
    pub transport: Arc<dyn JobTransport>,
    pub store: SessionStore,
    pub context: ClientContext,
    pub event_tx: mpsc::UnboundedSender<ClientEvent>,
    pub cancel: CancellationToken,
}

impl JobSession {
    pub async fn run(self) -> SessionPhase {
        let mut state = SessionState::new();
        self.emit(SessionPhase::Starting, &state);

        match self.drive(&mut state).await {
            Ok(phase) => phase,
            Err(JobError::StreamAborted) => {
                debug!(main = %self.request.main, "job stream cancelled");
                SessionPhase::Cancelled
            }
            Err(e) => {
                warn!(error = %e, "job stream failed");
                state.fail(CONNECTION_ERROR);
                self.store.fail_session(CONNECTION_ERROR);
                self.context.track("generation_failed", CONNECTION_ERROR);
                self.emit(SessionPhase::Failed, &state);
                SessionPhase::Failed
            }
        }
    }

    /// Frames are applied strictly in the order the decoder yields them. The body
    /// stream is owned here and dropped on every return path.
    async fn drive(&self, state: &mut SessionState) -> JobResult<SessionPhase> {
        let body = tokio::select! {
            biased;
            () = self.cancel.cancelled() => return Err(JobError::StreamAborted),
            opened = self.transport.open(&self.request) => opened?,
        };
        self.emit(SessionPhase::Streaming, state);

        let reader = StreamReader::new(body.map(|chunk| chunk.map_err(std::io::Error::other)));
        let mut frames = FramedRead::new(reader, FrameDecoder::new());
        loop {
            let frame = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Err(JobError::StreamAborted),
                frame = frames.next() => frame,
            };
            // A body that ends without the close line is a dropped connection.
            let Some(frame) = frame else {
                return Err(JobError::Transport("body ended before the close event".into()));
            };
            let frame = frame.map_err(|e| JobError::Transport(e.to_string()))?;
            // Frames already buffered must not write to the store once cancelled.
            if self.cancel.is_cancelled() {
                return Err(JobError::StreamAborted);
            }

            match frame {
                ProtocolFrame::Data(payload) => {
                    let event = match interpret(&payload) {
                        Ok(event) => event,
                        Err(e) => {
                            warn!(error = %e, "dropping malformed frame");
                            continue;
                        }
                    };
                    if state.apply(&event) == Applied::Terminal {
                        return Ok(self.finish(state, &event));
                    }
                    self.emit(SessionPhase::Streaming, state);
                }
                ProtocolFrame::Close => return Ok(self.closed(state)),
                ProtocolFrame::Other(line) => {
                    debug!(line = %line, "ignoring non-data frame");
                }
            }
        }
    }

    fn finish(&self, state: &SessionState, event: &StatusEvent) -> SessionPhase {
        if event.status == JobStatus::Completed {
            let title = state.result().map(|r| r.title.as_str()).unwrap_or_default();
            info!(title, "job completed");
            self.store.complete_session(event);
            self.context.track("generation_completed", title);
            self.emit(SessionPhase::Completed, state);
            SessionPhase::Completed
        } else {
            warn!(message = %event.message, "job reported an error");
            self.store.fail_session(&event.message);
            self.context.track("generation_failed", &event.message);
            self.emit(SessionPhase::Failed, state);
            SessionPhase::Failed
        }
    }

    /// The server ended the stream without a result. Nothing is shown as an
    /// error; the session is no longer active so it is not resumed.
    fn closed(&self, state: &SessionState) -> SessionPhase {
        info!(events = state.events_applied, "server closed the stream without a result");
        self.store.end_session();
        self.context.track("generation_closed", &self.request.main);
        self.emit(SessionPhase::Idle, state);
        let _ = self.event_tx.send(ClientEvent::Info(InfoEvent::StreamClosed));
        SessionPhase::Idle
    }

    fn emit(&self, phase: SessionPhase, state: &SessionState) {
        let _ = self
            .event_tx
            .send(ClientEvent::Snapshot(Box::new(SessionSnapshot {
                phase,
                state: state.clone(),
                restored: false,
            })));
    }
}

#[cfg(test)]
mod tests {
    use super::testing::ScriptedTransport;
    use super::*;
    use crate::model::ResultBundle;
    use crate::storage::{MemoryKv, KEY_ACTIVE};

    struct Harness {
        kv: Arc<MemoryKv>,
        store: SessionStore,
        rx: mpsc::UnboundedReceiver<ClientEvent>,
        tx: mpsc::UnboundedSender<ClientEvent>,
    }

    impl Harness {
        fn new() -> Self {
            let kv = Arc::new(MemoryKv::default());
            let store = SessionStore::new(kv.clone());
            let (tx, rx) = mpsc::unbounded_channel();
            Self { kv, store, rx, tx }
        }

        fn session(&self, transport: ScriptedTransport, cancel: CancellationToken) -> JobSession {
            let request = JobRequest {
                main: "Clinic booking".into(),
                ..Default::default()
            };
            self.store.begin_session(&request);
            JobSession {
                request,
                transport: Arc::new(transport),
                store: self.store.clone(),
                context: ClientContext::init(None, &self.store),
                event_tx: self.tx.clone(),
                cancel,
            }
        }

        fn snapshots(&mut self) -> Vec<SessionSnapshot> {
            let mut out = Vec::new();
            while let Ok(ev) = self.rx.try_recv() {
                if let ClientEvent::Snapshot(s) = ev {
                    out.push(*s);
                }
            }
            out
        }
    }

    fn ev(status: JobStatus, message: &str) -> StatusEvent {
        StatusEvent {
            status,
            message: message.into(),
            result: (status == JobStatus::Completed).then(|| ResultBundle {
                title: "Clinic".into(),
                pdf_name: "Clinic.pdf".into(),
                pdf_path: "amy/pdfs/Clinic.pdf".into(),
                ..Default::default()
            }),
        }
    }

    #[tokio::test]
    async fn completed_stream_writes_result() {
        let mut h = Harness::new();
        let transport = ScriptedTransport::with_events(&[
            ev(JobStatus::Initiated, "Starting"),
            ev(JobStatus::Processing, "Generating"),
            ev(JobStatus::Completed, "Done"),
        ]);
        let phase = h.session(transport, CancellationToken::new()).run().await;
        assert_eq!(phase, SessionPhase::Completed);

        let snaps = h.snapshots();
        let phases: Vec<_> = snaps.iter().map(|s| s.phase).collect();
        assert_eq!(
            phases,
            [
                SessionPhase::Starting,
                SessionPhase::Streaming,
                SessionPhase::Streaming,
                SessionPhase::Streaming,
                SessionPhase::Completed,
            ]
        );
        let last = snaps.last().unwrap();
        assert_eq!(last.state.messages, ["Starting", "Generating", "Done"]);
        assert_eq!(last.state.progress, PROGRESS_MAX);

        assert_eq!(h.kv.raw(KEY_ACTIVE), None);
        assert_eq!(h.store.read_result().unwrap().message, "Done");
    }

    #[tokio::test]
    async fn malformed_frame_is_skipped() {
        let mut h = Harness::new();
        let transport = ScriptedTransport::with_chunks([
            "data: {\"status\":\"initiated\",\"message\":\"Starting\"}\n",
            "data: {not json\n",
            "data: {\"status\":\"completed\",\"message\":\"Done\",\"title\":\"T\"}\n",
        ]);
        let phase = h.session(transport, CancellationToken::new()).run().await;
        assert_eq!(phase, SessionPhase::Completed);
        let last = h.snapshots().pop().unwrap();
        assert_eq!(last.state.messages, ["Starting", "Done"]);
        assert_eq!(last.state.result().unwrap().title, "T");
    }

    #[tokio::test]
    async fn server_error_event_fails_session() {
        let mut h = Harness::new();
        let transport = ScriptedTransport::with_events(&[
            ev(JobStatus::Initiated, "Starting"),
            ev(JobStatus::Error, "LLM quota exceeded"),
            ev(JobStatus::Error, "second error"),
        ]);
        let phase = h.session(transport, CancellationToken::new()).run().await;
        assert_eq!(phase, SessionPhase::Failed);
        let last = h.snapshots().pop().unwrap();
        assert_eq!(last.phase, SessionPhase::Failed);
        assert_eq!(last.state.error(), Some("LLM quota exceeded"));

        let stored = h.store.load();
        assert!(!stored.active);
        assert_eq!(stored.result, Some(StatusEvent::error("LLM quota exceeded")));
    }

    #[tokio::test]
    async fn open_failure_is_terminal_with_generic_message() {
        let mut h = Harness::new();
        let transport = ScriptedTransport::failing_open("HTTP error! status: 502 Bad Gateway");
        let phase = h.session(transport, CancellationToken::new()).run().await;
        assert_eq!(phase, SessionPhase::Failed);

        let snaps = h.snapshots();
        assert_eq!(snaps.len(), 2);
        assert_eq!(snaps[1].state.error(), Some(CONNECTION_ERROR));
        assert!(!h.store.load().active);
    }

    #[tokio::test]
    async fn read_failure_is_terminal() {
        let mut h = Harness::new();
        let transport =
            ScriptedTransport::with_chunks(["data: {\"status\":\"initiated\",\"message\":\"s\"}\n"])
                .then_read_error("connection reset");
        let phase = h.session(transport, CancellationToken::new()).run().await;
        assert_eq!(phase, SessionPhase::Failed);
        let last = h.snapshots().pop().unwrap();
        assert_eq!(last.state.messages, ["s"]);
        assert_eq!(last.state.error(), Some(CONNECTION_ERROR));
    }

    #[tokio::test]
    async fn close_without_result_ends_quietly() {
        let mut h = Harness::new();
        let transport = ScriptedTransport::with_events(&[ev(JobStatus::Initiated, "Starting")]);
        let phase = h.session(transport, CancellationToken::new()).run().await;
        assert_eq!(phase, SessionPhase::Idle);

        let last = h.snapshots().pop().unwrap();
        assert_eq!(last.phase, SessionPhase::Idle);
        assert_eq!(last.state.messages, ["Starting"]);
        assert_eq!(last.state.error(), None);

        let stored = h.store.load();
        assert!(!stored.active);
        assert_eq!(stored.result, None);
    }

    #[tokio::test]
    async fn body_ending_without_close_is_a_transport_failure() {
        let mut h = Harness::new();
        let transport =
            ScriptedTransport::with_chunks(["data: {\"status\":\"initiated\",\"message\":\"s\"}\n"]);
        let phase = h.session(transport, CancellationToken::new()).run().await;
        assert_eq!(phase, SessionPhase::Failed);
        assert_eq!(
            h.snapshots().pop().unwrap().state.error(),
            Some(CONNECTION_ERROR)
        );
        assert!(!h.store.load().active);
    }

    #[tokio::test]
    async fn frames_before_close_in_one_chunk_are_applied() {
        let mut h = Harness::new();
        let transport = ScriptedTransport::with_chunks([concat!(
            "data: {\"status\":\"initiated\",\"message\":\"a\"}\n",
            "data: {\"status\":\"processing\",\"message\":\"b\"}\n",
            "event: close\n",
            "data: {\"status\":\"completed\",\"message\":\"late\"}\n",
        )]);
        let phase = h.session(transport, CancellationToken::new()).run().await;
        assert_eq!(phase, SessionPhase::Idle);
        let last = h.snapshots().pop().unwrap();
        assert_eq!(last.state.messages, ["a", "b"]);
        assert_eq!(last.state.result(), None);
        assert!(h.store.read_result().is_none());
    }

    #[tokio::test]
    async fn cancellation_keeps_session_resumable() {
        let mut h = Harness::new();
        let cancel = CancellationToken::new();
        let transport =
            ScriptedTransport::with_chunks(["data: {\"status\":\"initiated\",\"message\":\"s\"}\n"])
                .then_hang();
        let handle = tokio::spawn(h.session(transport, cancel.clone()).run());

        // Wait until the first event has been applied.
        loop {
            match h.rx.recv().await {
                Some(ClientEvent::Snapshot(s)) if !s.state.messages.is_empty() => break,
                Some(_) => continue,
                None => panic!("session ended early"),
            }
        }
        cancel.cancel();
        assert_eq!(handle.await.unwrap(), SessionPhase::Cancelled);

        assert!(h.snapshots().is_empty());
        assert!(h.store.read_active_request().is_some());
        assert_eq!(h.store.load().result, None);
    }

    #[tokio::test]
    async fn cancelled_before_open_never_connects() {
        let h = Harness::new();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let transport = Arc::new(ScriptedTransport::with_events(&[]));
        let mut session = h.session(ScriptedTransport::default(), cancel);
        session.transport = transport.clone();
        assert_eq!(session.run().await, SessionPhase::Cancelled);
        assert!(transport.opened().is_empty());
    }
}
