// src/engine/loader.rs

use crate::{
    error::AppError,
    models::{question::Question, session::EntryState},
    remote::AttemptApi,
};

/// Everything needed to decide whether (and how) a session starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedSession {
    pub entry: EntryState,
    pub remaining_seconds: u64,
    pub questions: Vec<Question>,
}

impl LoadedSession {
    fn terminal(entry: EntryState) -> Self {
        Self {
            entry,
            remaining_seconds: 0,
            questions: Vec::new(),
        }
    }
}

/// Fetches the attempt timer and, if the attempt is still live, the questions.
///
/// * A finished attempt resolves to `AlreadySubmitted` before anything else is fetched.
/// * A non-positive remaining time resolves to `TimeElapsed`.
/// * Any fetch failure is returned as-is; nothing is started.
pub async fn initialize(
    api: &dyn AttemptApi,
    token: &str,
    attempt_id: &str,
) -> Result<LoadedSession, AppError> {
    let timer = api.fetch_timer(token, attempt_id).await.map_err(|e| {
        tracing::error!("Failed to fetch timer for attempt {}: {}", attempt_id, e);
        e
    })?;

    if timer.status.is_finished() {
        tracing::info!(
            "Attempt {} is already {:?}, not starting a session",
            attempt_id,
            timer.status
        );
        return Ok(LoadedSession::terminal(EntryState::AlreadySubmitted));
    }

    if timer.remaining_seconds <= 0 {
        tracing::warn!(
            "Attempt {} has no time left but was never submitted",
            attempt_id
        );
        return Ok(LoadedSession::terminal(EntryState::TimeElapsed));
    }

    let questions = api.fetch_questions(token).await.map_err(|e| {
        tracing::error!("Failed to fetch questions for attempt {}: {}", attempt_id, e);
        e
    })?;

    Ok(LoadedSession {
        entry: EntryState::Active,
        remaining_seconds: timer.remaining_seconds.unsigned_abs(),
        questions,
    })
}
