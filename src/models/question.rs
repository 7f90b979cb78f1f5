// src/models/question.rs

use serde::{Deserialize, Serialize};
use validator::Validate;

/// A single multiple-choice question shown to the candidate.
/// The question set is loaded once and never changes during a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    pub id: String,

    /// The text content of the question.
    pub prompt: String,

    /// Ordered list of options (e.g., ["Option A", "Option B"]).
    pub options: Vec<String>,
}

impl Question {
    pub fn has_option(&self, option: &str) -> bool {
        self.options.iter().any(|o| o == option)
    }
}

/// DTO for selecting an answer.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SelectAnswerRequest {
    #[validate(length(min = 1, max = 128))]
    pub question_id: String,
    #[validate(length(min = 1, max = 500))]
    pub option: String,
}
