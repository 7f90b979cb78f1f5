// src/engine/coordinator.rs

use crate::models::session::{FinalizeReason, SessionPhase};

/// Exactly-once gate around the final submission.
///
/// The guard is raised by `begin` and only lowered again by a failed
/// attempt. After a success it stays raised for the life of the session.
#[derive(Debug, Clone)]
pub struct SubmissionCoordinator {
    phase: SessionPhase,
    guard: bool,
    attempts: u32,
    in_flight: Option<FinalizeReason>,
}

/// Permission to send one submission. Returned by `begin` at most once per guard cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmissionTicket {
    pub reason: FinalizeReason,
    pub attempt: u32,
}

impl Default for SubmissionCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl SubmissionCoordinator {
    pub fn new() -> Self {
        Self {
            phase: SessionPhase::Loading,
            guard: false,
            attempts: 0,
            in_flight: None,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn is_guarded(&self) -> bool {
        self.guard
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn in_flight(&self) -> Option<FinalizeReason> {
        self.in_flight
    }

    pub fn activate(&mut self) {
        if self.phase == SessionPhase::Loading {
            self.phase = SessionPhase::Active;
        }
    }

    pub fn redirect(&mut self) {
        if !self.phase.is_terminal() {
            self.phase = SessionPhase::Redirected;
        }
    }

    /// Raises the guard and enters `Submitting`. `None` means the call is dropped.
    pub fn begin(&mut self, reason: FinalizeReason) -> Option<SubmissionTicket> {
        if self.guard || !self.phase.accepts_finalize() {
            tracing::debug!(
                "finalize({:?}) dropped in phase {:?}",
                reason,
                self.phase
            );
            return None;
        }

        self.guard = true;
        self.attempts += 1;
        self.in_flight = Some(reason);
        self.phase = SessionPhase::Submitting;

        Some(SubmissionTicket {
            reason,
            attempt: self.attempts,
        })
    }

    /// Records a confirmed submission. The guard stays raised.
    pub fn succeed(&mut self) {
        self.in_flight = None;
        self.phase = SessionPhase::Submitted;
    }

    /// Records a failed submission and lowers the guard for one more try.
    pub fn fail(&mut self) {
        self.in_flight = None;
        self.guard = false;
        self.phase = SessionPhase::FailedRetryable;
    }
}
