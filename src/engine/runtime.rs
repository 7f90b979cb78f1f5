// src/engine/runtime.rs

use std::{sync::Arc, time::Duration};

use tokio::{
    sync::{broadcast, mpsc, oneshot, watch},
    time::{self, Instant},
};

use crate::{
    engine::{
        coordinator::SubmissionTicket,
        monitor::SignalKind,
        session::{AssessmentSession, PendingSubmission, SessionNotice},
    },
    error::AppError,
    models::{
        attempt::SubmitReceipt,
        log_event::{LogEvent, Visibility},
        question::Question,
        session::{FinalizeReason, SessionPhase, SessionView, SignalVerdict},
    },
    remote::AttemptApi,
    storage::JournalStore,
};

/// The only tick source of a session.
pub const TICK_INTERVAL: Duration = Duration::from_secs(1);

const COMMAND_CAPACITY: usize = 64;
const NOTICE_CAPACITY: usize = 128;

enum Command {
    Signal {
        kind: SignalKind,
        visibility: Option<Visibility>,
        reply: oneshot::Sender<SignalVerdict>,
    },
    SelectAnswer {
        question_id: String,
        option: String,
        reply: oneshot::Sender<Result<(), AppError>>,
    },
    Finalize {
        reason: FinalizeReason,
        reply: oneshot::Sender<bool>,
    },
    ResolveExit {
        confirm: bool,
        reply: oneshot::Sender<bool>,
    },
    View(oneshot::Sender<SessionView>),
    AuditLog(oneshot::Sender<Vec<LogEvent>>),
    Close(oneshot::Sender<SessionView>),
}

struct Settled {
    ticket: SubmissionTicket,
    result: Result<SubmitReceipt, AppError>,
}

/// Last state of a session whose runtime stopped after a successful submission.
#[derive(Debug, Clone)]
struct Finished {
    view: SessionView,
    audit: Vec<LogEvent>,
}

/// Collaborators a running session talks to.
#[derive(Clone)]
pub struct SessionContext {
    pub api: Arc<dyn AttemptApi>,
    pub journal: Arc<dyn JournalStore>,
    /// Candidate bearer token forwarded on submission.
    pub token: String,
}

/// Cheap, cloneable way to drive a running session.
#[derive(Clone)]
pub struct SessionHandle {
    attempt_id: Arc<str>,
    owner: Arc<str>,
    questions: Arc<[Question]>,
    commands: mpsc::Sender<Command>,
    notices: broadcast::Sender<SessionNotice>,
    finished: watch::Receiver<Option<Finished>>,
}

impl SessionHandle {
    pub fn attempt_id(&self) -> &str {
        &self.attempt_id
    }

    /// Subject of the token that started the session.
    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn questions(&self) -> &[Question] {
        &self.questions
    }

    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    /// Resolves once the runtime task has stopped.
    pub async fn stopped(&self) {
        self.commands.closed().await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionNotice> {
        self.notices.subscribe()
    }

    pub async fn signal(
        &self,
        kind: SignalKind,
        visibility: Option<Visibility>,
    ) -> Result<SignalVerdict, AppError> {
        self.request(|reply| Command::Signal {
            kind,
            visibility,
            reply,
        })
        .await
    }

    pub async fn select_answer(&self, question_id: &str, option: &str) -> Result<(), AppError> {
        self.request_or(
            |reply| Command::SelectAnswer {
                question_id: question_id.to_string(),
                option: option.to_string(),
                reply,
            },
            |_| Err(AppError::Conflict("Assessment already submitted".to_string())),
        )
        .await?
    }

    /// Returns `true` if this call started a submission, `false` if the guard dropped it.
    pub async fn finalize(&self, reason: FinalizeReason) -> Result<bool, AppError> {
        self.request_or(|reply| Command::Finalize { reason, reply }, |_| false)
            .await
    }

    pub async fn resolve_exit(&self, confirm: bool) -> Result<bool, AppError> {
        self.request_or(|reply| Command::ResolveExit { confirm, reply }, |_| false)
            .await
    }

    pub async fn view(&self) -> Result<SessionView, AppError> {
        self.request_or(Command::View, |finished| finished.view).await
    }

    pub async fn audit_log(&self) -> Result<Vec<LogEvent>, AppError> {
        self.request_or(Command::AuditLog, |finished| finished.audit)
            .await
    }

    /// Tears the session down. The runtime task exits afterwards.
    pub async fn close(&self) -> Result<SessionView, AppError> {
        self.request_or(Command::Close, |finished| finished.view)
            .await
    }

    /// Like `request`, but answers from the final snapshot once the
    /// runtime has stopped after a successful submission.
    async fn request_or<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
        finished: impl FnOnce(Finished) -> T,
    ) -> Result<T, AppError> {
        match self.request(make).await {
            Err(e) => self.finished.borrow().clone().map(finished).ok_or(e),
            done => done,
        }
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, AppError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(make(reply))
            .await
            .map_err(|_| self.closed())?;
        response.await.map_err(|_| self.closed())
    }

    fn closed(&self) -> AppError {
        AppError::NotFound(format!("Session {} is closed", self.attempt_id))
    }
}

/// Spawns the runtime task for a freshly opened session and starts it.
pub fn spawn(
    session: AssessmentSession,
    context: SessionContext,
    owner: &str,
    user_agent: Option<String>,
) -> SessionHandle {
    let (commands_tx, commands_rx) = mpsc::channel(COMMAND_CAPACITY);
    let (notices_tx, _) = broadcast::channel(NOTICE_CAPACITY);
    let (finished_tx, finished_rx) = watch::channel(None);

    let handle = SessionHandle {
        attempt_id: session.attempt_id().into(),
        owner: owner.into(),
        questions: session.questions(),
        commands: commands_tx,
        notices: notices_tx.clone(),
        finished: finished_rx,
    };

    let runtime = SessionRuntime {
        session,
        context,
        commands: commands_rx,
        notices: notices_tx,
        finished: finished_tx,
    };
    tokio::spawn(runtime.run(user_agent));

    handle
}

/// Single consumer of every event that can touch a session.
///
/// Commands, ticks and submission results are handled one at a time, so
/// the session never sees two events interleaved. Ordering between the
/// three sources is whatever order they become ready in.
struct SessionRuntime {
    session: AssessmentSession,
    context: SessionContext,
    commands: mpsc::Receiver<Command>,
    notices: broadcast::Sender<SessionNotice>,
    finished: watch::Sender<Option<Finished>>,
}

impl SessionRuntime {
    async fn run(mut self, user_agent: Option<String>) {
        let (settled_tx, mut settled_rx) = mpsc::channel::<Settled>(4);
        let mut ticker = time::interval_at(Instant::now() + TICK_INTERVAL, TICK_INTERVAL);

        let pending = self.session.start(user_agent);
        self.after_event(pending, &settled_tx).await;

        loop {
            let pending = tokio::select! {
                command = self.commands.recv() => {
                    let Some(command) = command else {
                        tracing::debug!("All handles of {} dropped", self.session.attempt_id());
                        self.session.close();
                        self.after_event(None, &settled_tx).await;
                        break;
                    };
                    match self.handle(command) {
                        Flow::Continue(pending) => pending,
                        Flow::Stop(reply) => {
                            self.after_event(None, &settled_tx).await;
                            let _ = reply.send(self.session.view());
                            break;
                        }
                    }
                }
                _ = ticker.tick(), if self.session.is_ticking() => self.session.on_tick(),
                Some(settled) = settled_rx.recv() => {
                    self.session.on_submission_settled(settled.ticket, settled.result);
                    if self.session.phase() == SessionPhase::Submitted {
                        self.after_event(None, &settled_tx).await;
                        self.finished.send_replace(Some(Finished {
                            view: self.session.view(),
                            audit: self.session.audit().events().to_vec(),
                        }));
                        break;
                    }
                    None
                }
            };

            self.after_event(pending, &settled_tx).await;
        }

        tracing::info!("Session runtime for {} stopped", self.session.attempt_id());
    }

    fn handle(&mut self, command: Command) -> Flow {
        let pending = match command {
            Command::Signal {
                kind,
                visibility,
                reply,
            } => {
                let (verdict, pending) = self.session.on_signal(kind, visibility);
                let _ = reply.send(verdict);
                pending
            }
            Command::SelectAnswer {
                question_id,
                option,
                reply,
            } => {
                let _ = reply.send(self.session.select_answer(&question_id, &option));
                None
            }
            Command::Finalize { reason, reply } => {
                let pending = self.session.finalize(reason);
                let _ = reply.send(pending.is_some());
                pending
            }
            Command::ResolveExit { confirm, reply } => {
                let pending = self.session.resolve_exit(confirm);
                let _ = reply.send(pending.is_some());
                pending
            }
            Command::View(reply) => {
                let _ = reply.send(self.session.view());
                None
            }
            Command::AuditLog(reply) => {
                let _ = reply.send(self.session.audit().events().to_vec());
                None
            }
            Command::Close(reply) => {
                self.session.close();
                return Flow::Stop(reply);
            }
        };
        Flow::Continue(pending)
    }

    /// Persists journal changes, publishes notices, then sends any new submission.
    /// The journal is flushed first so `SUBMITTED` is durable before the request leaves.
    async fn after_event(
        &mut self,
        pending: Option<PendingSubmission>,
        settled: &mpsc::Sender<Settled>,
    ) {
        if self.session.audit().has_unflushed() {
            self.session
                .audit_mut()
                .flush(self.context.journal.as_ref())
                .await;
        }

        for notice in self.session.drain_notices() {
            // No subscribers is fine.
            let _ = self.notices.send(notice);
        }

        if let Some(pending) = pending {
            self.dispatch(pending, settled.clone());
        }
    }

    fn dispatch(&self, pending: PendingSubmission, settled: mpsc::Sender<Settled>) {
        let api = Arc::clone(&self.context.api);
        let token = self.context.token.clone();
        let attempt_id = self.session.attempt_id().to_string();

        tokio::spawn(async move {
            let result = api.submit(&token, &attempt_id, &pending.request).await;
            if settled
                .send(Settled {
                    ticket: pending.ticket,
                    result,
                })
                .await
                .is_err()
            {
                tracing::debug!("Submission for {} settled after teardown", attempt_id);
            }
        });
    }
}

enum Flow {
    Continue(Option<PendingSubmission>),
    Stop(oneshot::Sender<SessionView>),
}
