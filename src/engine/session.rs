// src/engine/session.rs

use std::sync::Arc;

use serde::Serialize;

use crate::{
    config::SessionSettings,
    engine::{
        answers::AnswerStore,
        audit::AuditLog,
        coordinator::{SubmissionCoordinator, SubmissionTicket},
        countdown::Countdown,
        monitor::{ClassificationRegistry, IntegrityMonitor, SignalKind},
    },
    error::AppError,
    models::{
        attempt::{SubmitAnswersRequest, SubmitReceipt},
        log_event::{EventMetadata, EventType, LogEvent, Visibility},
        question::Question,
        session::{
            Destination, FinalizeReason, Notice, SessionPhase, SessionView, SignalVerdict,
        },
    },
};

/// Everything the page may want to react to, in the order it happened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionNotice {
    Started { remaining_seconds: u64 },
    RequestFullscreen,
    Tick { remaining_seconds: u64 },
    LowTimeBanner { visible: bool },
    Violation { event_type: EventType, violations: u32 },
    BlockNavigation,
    ExitPrompt { open: bool },
    SubmissionStarted { reason: FinalizeReason },
    Submitted { message: String },
    SubmissionFailed { message: String },
    Navigate { destination: Destination },
    Closed,
}

/// A submission the runtime must send, produced by a successful `finalize`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingSubmission {
    pub ticket: SubmissionTicket,
    pub request: SubmitAnswersRequest,
}

/// One candidate's live exam: the single owner of every piece of session state.
///
/// All mutation goes through the event-handling methods below. None of them
/// block; the only work handed back to the caller is a `PendingSubmission`.
#[derive(Debug)]
pub struct AssessmentSession {
    attempt_id: String,
    questions: Arc<[Question]>,
    countdown: Countdown,
    monitor: IntegrityMonitor,
    answers: AnswerStore,
    audit: AuditLog,
    coordinator: SubmissionCoordinator,
    environment: EventMetadata,
    exit_prompt: bool,
    notice: Option<Notice>,
    destination: Option<Destination>,
    outbox: Vec<SessionNotice>,
}

impl AssessmentSession {
    /// Builds a session from loaded data and whatever the journal still holds for it.
    pub fn open(
        attempt_id: &str,
        remaining_seconds: u64,
        questions: Vec<Question>,
        restored: Vec<LogEvent>,
        settings: &SessionSettings,
        registry: ClassificationRegistry,
    ) -> Self {
        Self {
            attempt_id: attempt_id.to_string(),
            questions: questions.into(),
            countdown: Countdown::new(remaining_seconds, settings),
            monitor: IntegrityMonitor::new(registry, settings.violation_limit),
            answers: AnswerStore::new(),
            audit: AuditLog::restore(attempt_id, restored),
            coordinator: SubmissionCoordinator::new(),
            environment: EventMetadata::default(),
            exit_prompt: false,
            notice: None,
            destination: None,
            outbox: Vec::new(),
        }
    }

    pub fn attempt_id(&self) -> &str {
        &self.attempt_id
    }

    pub fn questions(&self) -> Arc<[Question]> {
        Arc::clone(&self.questions)
    }

    pub fn phase(&self) -> SessionPhase {
        self.coordinator.phase()
    }

    pub fn is_ticking(&self) -> bool {
        self.countdown.is_running()
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    pub fn audit_mut(&mut self) -> &mut AuditLog {
        &mut self.audit
    }

    pub fn drain_notices(&mut self) -> Vec<SessionNotice> {
        std::mem::take(&mut self.outbox)
    }

    /// Starts the clock and the monitor.
    ///
    /// A reload of the same attempt replays its journal: the violation count
    /// carries over and `ASSESSMENT_STARTED` is not logged twice.
    pub fn start(&mut self, user_agent: Option<String>) -> Option<PendingSubmission> {
        if self.coordinator.phase() != SessionPhase::Loading {
            return None;
        }
        if let Some(agent) = user_agent {
            self.environment.user_agent = agent;
        }

        self.coordinator.activate();
        let limit_already_reached = self.monitor.restore(self.audit.events());

        if !self.audit.contains(EventType::AssessmentStarted) {
            self.record(EventType::AssessmentStarted, None);
        }

        self.countdown.start();
        tracing::info!(
            "Assessment {} started with {}s left ({} violations carried over)",
            self.attempt_id,
            self.countdown.remaining(),
            self.monitor.violations()
        );
        self.outbox.push(SessionNotice::Started {
            remaining_seconds: self.countdown.remaining(),
        });
        self.outbox.push(SessionNotice::RequestFullscreen);

        if self.countdown.is_expired() {
            return self.finalize(FinalizeReason::TimerExpired);
        }
        if limit_already_reached {
            return self.finalize(FinalizeReason::ViolationLimit);
        }
        None
    }

    /// One second passed.
    pub fn on_tick(&mut self) -> Option<PendingSubmission> {
        let outcome = self.countdown.tick()?;

        self.outbox.push(SessionNotice::Tick {
            remaining_seconds: outcome.remaining,
        });
        if outcome.banner_shown {
            tracing::info!("Assessment {} is running low on time", self.attempt_id);
            self.outbox
                .push(SessionNotice::LowTimeBanner { visible: true });
        }
        if outcome.banner_hidden {
            self.outbox
                .push(SessionNotice::LowTimeBanner { visible: false });
        }

        if outcome.expired {
            tracing::info!("Time is over for assessment {}", self.attempt_id);
            return self.finalize(FinalizeReason::TimerExpired);
        }
        None
    }

    /// Classifies a browser signal and tells the page what to do with it.
    pub fn on_signal(
        &mut self,
        kind: SignalKind,
        visibility: Option<Visibility>,
    ) -> (SignalVerdict, Option<PendingSubmission>) {
        self.environment.visibility_state = match kind {
            SignalKind::VisibilityHidden => Visibility::Hidden,
            SignalKind::VisibilityVisible => Visibility::Visible,
            _ => visibility.unwrap_or(self.environment.visibility_state),
        };

        let Some(observation) = self.monitor.observe(kind) else {
            if kind == SignalKind::FullscreenRejected {
                tracing::debug!(
                    "Fullscreen refused for assessment {}, continuing",
                    self.attempt_id
                );
            }
            let verdict = SignalVerdict {
                event_type: None,
                suppress: false,
                block_navigation: false,
                counted: false,
                violations: self.monitor.violations(),
            };
            return (verdict, None);
        };

        let rule = observation.rule;
        self.record(rule.event_type, None);

        if rule.counts_toward_limit {
            self.outbox.push(SessionNotice::Violation {
                event_type: rule.event_type,
                violations: observation.violations,
            });
        }

        if rule.block_navigation {
            self.exit_prompt = true;
            self.outbox.push(SessionNotice::BlockNavigation);
            self.outbox.push(SessionNotice::ExitPrompt { open: true });
        }

        let verdict = SignalVerdict {
            event_type: Some(rule.event_type),
            suppress: rule.suppress,
            block_navigation: rule.block_navigation,
            counted: rule.counts_toward_limit,
            violations: observation.violations,
        };

        let pending = if observation.limit_reached {
            tracing::warn!(
                "Violation limit reached for assessment {}",
                self.attempt_id
            );
            self.finalize(FinalizeReason::ViolationLimit)
        } else {
            None
        };

        (verdict, pending)
    }

    /// Records the candidate's choice for one question.
    pub fn select_answer(&mut self, question_id: &str, option: &str) -> Result<(), AppError> {
        if !self.coordinator.phase().accepts_finalize() {
            return Err(AppError::Conflict(
                "Answers can no longer be changed".to_string(),
            ));
        }
        if self.countdown.is_expired() {
            return Err(AppError::Conflict("Time is over".to_string()));
        }

        let question = self
            .questions
            .iter()
            .find(|q| q.id == question_id)
            .ok_or_else(|| AppError::BadRequest(format!("Unknown question '{}'", question_id)))?;

        if !question.has_option(option) {
            return Err(AppError::BadRequest(format!(
                "'{}' is not an option of question '{}'",
                option, question_id
            )));
        }

        self.answers.set_answer(question_id, option);
        self.record(EventType::AnswerSelected, Some(question_id));
        Ok(())
    }

    /// Single entry point for every submission trigger.
    /// Returns `None` when the guard drops the call.
    pub fn finalize(&mut self, reason: FinalizeReason) -> Option<PendingSubmission> {
        let ticket = self.coordinator.begin(reason)?;

        self.record(EventType::Submitted, None);
        self.notice = None;
        self.outbox.push(SessionNotice::SubmissionStarted { reason });
        tracing::info!(
            "Submitting assessment {} (reason {:?}, attempt {})",
            self.attempt_id,
            reason,
            ticket.attempt
        );

        Some(PendingSubmission {
            ticket,
            request: SubmitAnswersRequest {
                answers: self.answers.snapshot(),
            },
        })
    }

    /// Answers the exit prompt raised by back navigation.
    pub fn resolve_exit(&mut self, confirm: bool) -> Option<PendingSubmission> {
        if self.exit_prompt {
            self.exit_prompt = false;
            self.outbox.push(SessionNotice::ExitPrompt { open: false });
        }
        if confirm {
            return self.finalize(FinalizeReason::ExitConfirmed);
        }
        None
    }

    /// Applies the outcome of the outbound submission.
    pub fn on_submission_settled(
        &mut self,
        ticket: SubmissionTicket,
        result: Result<SubmitReceipt, AppError>,
    ) {
        if self.coordinator.phase() != SessionPhase::Submitting {
            tracing::debug!(
                "Ignoring late result of submission attempt {} for {}",
                ticket.attempt,
                self.attempt_id
            );
            return;
        }

        match result {
            Ok(receipt) => {
                tracing::info!(
                    "Assessment {} submitted ({:?}): {}",
                    self.attempt_id,
                    ticket.reason,
                    receipt.message
                );
                self.coordinator.succeed();
                self.audit.clear();
                self.teardown();
                self.notice = Some(Notice::success(receipt.message.clone()));
                self.destination = Some(Destination::Dashboard);
                self.outbox.push(SessionNotice::Submitted {
                    message: receipt.message,
                });
                self.outbox.push(SessionNotice::Navigate {
                    destination: Destination::Dashboard,
                });
            }
            Err(e) => {
                tracing::error!(
                    "Submission attempt {} for {} failed: {}",
                    ticket.attempt,
                    self.attempt_id,
                    e
                );
                self.coordinator.fail();
                let message = match &e {
                    AppError::Upstream(msg) if !msg.is_empty() => msg.clone(),
                    _ => "Submission failed".to_string(),
                };
                self.notice = Some(Notice::error(message.clone()));
                self.outbox.push(SessionNotice::SubmissionFailed { message });
            }
        }
    }

    /// Ends the session without submitting (page left, service shutting down).
    pub fn close(&mut self) {
        self.teardown();
        self.coordinator.redirect();
        self.outbox.push(SessionNotice::Closed);
    }

    fn teardown(&mut self) {
        self.countdown.stop();
        self.monitor.detach();
        self.exit_prompt = false;
    }

    fn record(&mut self, event_type: EventType, question_id: Option<&str>) {
        let mut event = LogEvent::new(event_type, &self.attempt_id, self.environment.clone());
        if let Some(id) = question_id {
            event = event.with_question(id);
        }
        self.audit.record(event);
    }

    fn submit_label(&self) -> &'static str {
        match self.coordinator.phase() {
            SessionPhase::Submitting => "Submitting...",
            _ if self.countdown.remaining() == 0 => "Time Over",
            _ => "Submit Assessment",
        }
    }

    pub fn view(&self) -> SessionView {
        SessionView {
            attempt_id: self.attempt_id.clone(),
            phase: self.coordinator.phase(),
            remaining_seconds: self.countdown.remaining(),
            display: self.countdown.display(),
            low_time_banner: self.countdown.banner_visible(),
            exit_prompt: self.exit_prompt,
            submit_label: self.submit_label(),
            submit_enabled: self.coordinator.phase().accepts_finalize(),
            violations: self.monitor.violations(),
            violation_limit: self.monitor.limit(),
            answered: self.answers.len(),
            notice: self.notice.clone(),
            destination: self.destination,
        }
    }
}
