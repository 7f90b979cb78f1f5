// src/models/session.rs

use serde::{Deserialize, Serialize};

use crate::{
    engine::monitor::SignalKind,
    models::{
        log_event::{EventType, Visibility},
        question::Question,
    },
};

/// States of the session state machine.
/// `finalize` is the only way into `Submitting`, and only from `Active` or `FailedRetryable`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionPhase {
    Loading,
    Active,
    Submitting,
    Submitted,
    FailedRetryable,
    Redirected,
}

impl SessionPhase {
    pub fn accepts_finalize(self) -> bool {
        matches!(self, SessionPhase::Active | SessionPhase::FailedRetryable)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SessionPhase::Submitted | SessionPhase::Redirected)
    }
}

/// Which trigger asked for the final submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FinalizeReason {
    Manual,
    TimerExpired,
    ViolationLimit,
    ExitConfirmed,
}

/// Outcome of the session loader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryState {
    Active,
    AlreadySubmitted,
    /// The remote clock ran out without a completed submission.
    TimeElapsed,
}

/// Where the page should go next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Destination {
    Dashboard,
    AlreadySubmitted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Success,
    Error,
}

/// User-visible message (toast) produced by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl Notice {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Success,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            message: message.into(),
        }
    }
}

/// Everything the exam page needs to render the current state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub attempt_id: String,
    pub phase: SessionPhase,
    pub remaining_seconds: u64,
    /// Countdown formatted as `m:ss`.
    pub display: String,
    pub low_time_banner: bool,
    pub exit_prompt: bool,
    pub submit_label: &'static str,
    pub submit_enabled: bool,
    pub violations: u32,
    pub violation_limit: u32,
    pub answered: usize,
    pub notice: Option<Notice>,
    pub destination: Option<Destination>,
}

/// DTO for forwarding a browser signal.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalRequest {
    pub kind: SignalKind,
    #[serde(default)]
    pub visibility: Option<Visibility>,
}

/// What the page should do with the signal it just reported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalVerdict {
    pub event_type: Option<EventType>,
    /// Cancel the browser's default action (copy, paste, context menu).
    pub suppress: bool,
    /// Re-push the current location and show the exit prompt.
    pub block_navigation: bool,
    pub counted: bool,
    pub violations: u32,
}

/// DTO for answering the exit prompt.
#[derive(Debug, Clone, Deserialize)]
pub struct ExitRequest {
    pub confirm: bool,
}

/// Response of the start call.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartResponse {
    pub entry: EntryState,
    pub session: Option<SessionView>,
    pub questions: Vec<Question>,
    pub request_fullscreen: bool,
    pub destination: Option<Destination>,
}

/// Response of the submit and exit calls.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeResponse {
    /// `false` when another submission was already in flight or done.
    pub accepted: bool,
    pub session: SessionView,
}
