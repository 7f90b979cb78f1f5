// src/engine/answers.rs

use std::collections::BTreeMap;

use crate::models::attempt::SubmittedAnswer;

/// Current selection per question. Last write wins; no history is kept.
#[derive(Debug, Clone, Default)]
pub struct AnswerStore {
    selections: BTreeMap<String, String>,
}

impl AnswerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_answer(&mut self, question_id: &str, option: &str) {
        self.selections
            .insert(question_id.to_string(), option.to_string());
    }

    pub fn get(&self, question_id: &str) -> Option<&str> {
        self.selections.get(question_id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.selections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.selections.is_empty()
    }

    /// Answered questions only. Unanswered ones are omitted, not rejected.
    pub fn snapshot(&self) -> Vec<SubmittedAnswer> {
        self.selections
            .iter()
            .map(|(question_id, option)| SubmittedAnswer {
                question_id: question_id.clone(),
                selected_option: option.clone(),
            })
            .collect()
    }
}
