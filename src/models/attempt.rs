// src/models/attempt.rs

use serde::{Deserialize, Serialize};

/// Lifecycle of an attempt as the remote system reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttemptStatus {
    Active,
    Submitted,
    Expired,
}

impl AttemptStatus {
    /// `true` once the attempt can no longer accept answers.
    pub fn is_finished(self) -> bool {
        matches!(self, AttemptStatus::Submitted | AttemptStatus::Expired)
    }
}

/// Result of the one-time timer fetch.
/// `remaining_seconds` may be negative when the remote clock already ran out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerStatus {
    pub status: AttemptStatus,
    pub remaining_seconds: i64,
}

/// One entry of the outbound submission payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmittedAnswer {
    pub question_id: String,
    pub selected_option: String,
}

/// Body of `POST submit(attemptId)`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitAnswersRequest {
    pub answers: Vec<SubmittedAnswer>,
}

/// Confirmation returned by the remote system after a successful submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitReceipt {
    pub message: String,
}
