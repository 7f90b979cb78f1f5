// src/models/log_event.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Closed set of events recorded in the audit journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    AssessmentStarted,
    TabSwitch,
    WindowBlur,
    CopyAttempt,
    PasteAttempt,
    FullscreenExit,
    BackButtonAttempt,
    RightClick,
    AnswerSelected,
    Submitted,
}

/// Page visibility at the time an event was observed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    #[default]
    Visible,
    Hidden,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMetadata {
    pub user_agent: String,
    pub visibility_state: Visibility,
}

/// One record of the audit journal.
/// Timestamps serialize as ISO-8601 (RFC 3339).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEvent {
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    pub attempt_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question_id: Option<String>,
    pub metadata: EventMetadata,
}

impl LogEvent {
    pub fn new(event_type: EventType, attempt_id: &str, metadata: EventMetadata) -> Self {
        Self {
            event_type,
            timestamp: Utc::now(),
            attempt_id: attempt_id.to_string(),
            question_id: None,
            metadata,
        }
    }

    pub fn with_question(mut self, question_id: &str) -> Self {
        self.question_id = Some(question_id.to_string());
        self
    }
}
