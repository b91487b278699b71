//! Job lifecycle controller.
//!
//! Owns start/cancel/reset orchestration, reconciles with the session store on
//! mount, and emits snapshots for presentation layers.

use crate::context::ClientContext;
use crate::engine::{JobSession, JobTransport, SessionState};
use crate::model::{ClientEvent, InfoEvent, JobRequest, SessionPhase, SessionSnapshot};
use crate::storage::SessionStore;
use anyhow::Result;
use std::sync::Arc;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Commands emitted by UI layers to control the job session.
#[derive(Debug, Clone)]
pub(crate) enum UiCommand {
    Start(Box<JobRequest>),
    Cancel,
    Reset,
    Quit,
}

/// What [`JobController::mount`] found in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MountOutcome {
    /// An in-flight job was found and its request re-issued.
    Resumed,
    /// A completed result was found, shown, and consumed.
    Restored,
    Fresh,
}

/// Internal handle for a running stream task.
struct RunCtx {
    cancel: CancellationToken,
    handle: Option<JoinHandle<SessionPhase>>,
}

pub(crate) struct JobController {
    transport: Arc<dyn JobTransport>,
    store: SessionStore,
    context: ClientContext,
    event_tx: UnboundedSender<ClientEvent>,
    run: Option<RunCtx>,
}

impl JobController {
    pub fn new(
        transport: Arc<dyn JobTransport>,
        store: SessionStore,
        context: ClientContext,
        event_tx: UnboundedSender<ClientEvent>,
    ) -> Self {
        Self {
            transport,
            store,
            context,
            event_tx,
            run: None,
        }
    }

    /// Reconcile with the store when a view comes up.
    pub fn mount(&mut self) -> MountOutcome {
        if let Some(request) = self.store.read_active_request() {
            info!(main = %request.main, "resuming active job");
            self.info(InfoEvent::Resuming {
                main: request.main.clone(),
            });
            self.context.track("generation_resumed", &request.main);
            // No resume-from-offset exists: the full request is sent again.
            let request = self.context.attach_identity(request);
            self.spawn(request);
            return MountOutcome::Resumed;
        }

        if let Some(event) = self.store.take_result() {
            debug!("restoring stored result");
            self.snapshot(SessionSnapshot {
                phase: SessionPhase::Completed,
                state: SessionState::restored(&event),
                restored: true,
            });
            return MountOutcome::Restored;
        }

        MountOutcome::Fresh
    }

    pub async fn start(&mut self, request: JobRequest) {
        if let Some(phase) = self.stop().await {
            debug!(?phase, "replaced running job");
        }
        let request = self.context.attach_identity(request);
        self.store.begin_session(&request);
        self.context.track("generation_started", &request.main);
        self.spawn(request);
    }

    /// Stop reading. The store keeps the session active so it can be resumed.
    pub fn cancel(&mut self) {
        if let Some(ctx) = &self.run {
            if !ctx.cancel.is_cancelled() {
                ctx.cancel.cancel();
                self.info(InfoEvent::Cancelled);
            }
        }
    }

    /// Back to idle from any state: cancel, forget the session, clear the store.
    pub async fn reset(&mut self) {
        self.stop().await;
        self.store.reset();
        self.snapshot(SessionSnapshot {
            phase: SessionPhase::Idle,
            state: SessionState::new(),
            restored: false,
        });
        self.info(InfoEvent::SessionCleared);
    }

    /// Cancel the running stream task and wait for it, so none of its store
    /// writes or snapshots land after this returns.
    async fn stop(&mut self) -> Option<SessionPhase> {
        let ctx = self.run.take()?;
        ctx.cancel.cancel();
        match ctx.handle?.await {
            Ok(phase) => Some(phase),
            Err(e) => {
                warn!(error = %e, "job stream task failed");
                None
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.run.as_ref().is_some_and(|ctx| ctx.handle.is_some())
    }

    /// Wait for the running stream task. Pending forever when nothing runs, so
    /// this can sit in a `select!` next to the command channel.
    pub async fn finished(&mut self) -> SessionPhase {
        if let Some(handle) = self.run.as_mut().and_then(|ctx| ctx.handle.as_mut()) {
            let phase = match handle.await {
                Ok(phase) => phase,
                Err(e) => {
                    warn!(error = %e, "job stream task failed");
                    SessionPhase::Failed
                }
            };
            self.run = None;
            return phase;
        }
        futures::future::pending().await
    }

    pub fn shutdown(&mut self) {
        if let Some(ctx) = self.run.take() {
            ctx.cancel.cancel();
        }
        self.context.teardown();
    }

    fn spawn(&mut self, request: JobRequest) {
        let cancel = CancellationToken::new();
        let session = JobSession {
            request,
            transport: self.transport.clone(),
            store: self.store.clone(),
            context: self.context.clone(),
            event_tx: self.event_tx.clone(),
            cancel: cancel.clone(),
        };
        let handle = tokio::spawn(session.run());
        self.run = Some(RunCtx {
            cancel,
            handle: Some(handle),
        });
    }

    fn snapshot(&self, snapshot: SessionSnapshot) {
        let _ = self
            .event_tx
            .send(ClientEvent::Snapshot(Box::new(snapshot)));
    }

    fn info(&self, info: InfoEvent) {
        let _ = self.event_tx.send(ClientEvent::Info(info));
    }
}

/// Options for a controller loop.
#[derive(Debug, Clone, Default)]
pub(crate) struct ControllerOptions {
    /// Reconcile with the store before anything else.
    pub resume: bool,
    /// Started when mount found nothing to resume or restore.
    pub initial_request: Option<JobRequest>,
    /// Return once the session settles instead of waiting for `Quit`.
    pub exit_when_settled: bool,
}

/// Drive a [`JobController`] from UI commands until quit.
pub(crate) async fn run_controller(
    mut controller: JobController,
    opts: ControllerOptions,
    mut cmd_rx: UnboundedReceiver<UiCommand>,
) -> Result<Option<SessionPhase>> {
    let mounted = if opts.resume {
        controller.mount()
    } else {
        MountOutcome::Fresh
    };
    match (mounted, opts.initial_request.clone()) {
        (MountOutcome::Fresh, Some(request)) => controller.start(request).await,
        (MountOutcome::Resumed, Some(request)) => {
            warn!(main = %request.main, "an earlier job is in flight; not starting the new one");
            controller.info(InfoEvent::RequestSkipped { main: request.main });
        }
        _ => {}
    }

    let mut last_phase = match mounted {
        MountOutcome::Restored => Some(SessionPhase::Completed),
        _ => None,
    };
    if opts.exit_when_settled && !controller.is_running() {
        controller.shutdown();
        return Ok(last_phase);
    }

    let mut quit_pending = false;
    let res = loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(UiCommand::Start(request)) => {
                        if !quit_pending {
                            controller.start(*request).await;
                        }
                    }
                    Some(UiCommand::Cancel) => controller.cancel(),
                    Some(UiCommand::Reset) => {
                        controller.reset().await;
                        last_phase = Some(SessionPhase::Idle);
                    }
                    // Quit waits for the stream task so the terminal state is settled.
                    Some(UiCommand::Quit) | None => {
                        quit_pending = true;
                        if controller.is_running() {
                            controller.cancel();
                        } else {
                            break Ok(last_phase);
                        }
                    }
                }
            }
            phase = controller.finished() => {
                debug!(?phase, "job stream settled");
                last_phase = Some(phase);
                if quit_pending || opts.exit_when_settled {
                    break Ok(last_phase);
                }
            }
        }
    };

    controller.shutdown();
    res
}
