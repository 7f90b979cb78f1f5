// src/engine/registry.rs

use std::{collections::HashMap, sync::Arc, time::Duration};

use tokio::{sync::Mutex, time};

use crate::{
    config::SessionSettings,
    engine::{
        audit::journal_key,
        loader,
        monitor::ClassificationRegistry,
        runtime::{self, SessionContext, SessionHandle},
        session::AssessmentSession,
    },
    error::AppError,
    models::session::{EntryState, SessionView},
    remote::AttemptApi,
    storage::JournalStore,
};

/// Who is asking to start a session, and with which credentials.
#[derive(Debug, Clone)]
pub struct StartRequest {
    pub attempt_id: String,
    pub owner: String,
    pub token: String,
    pub user_agent: Option<String>,
}

pub enum StartOutcome {
    /// A new runtime was spawned.
    Started(SessionHandle),
    /// The attempt already had a live runtime; no second tick source was created.
    Resumed(SessionHandle),
    /// The loader refused to start (already submitted, or no time left).
    Terminal(EntryState),
}

/// How long a session that finished with a successful submission stays
/// readable before the registry forgets it.
pub const FINISHED_RETENTION: Duration = Duration::from_secs(30);

/// Per-attempt entry. Its lock serializes starts of one attempt without
/// holding up any other attempt.
type Slot = Arc<Mutex<Option<SessionHandle>>>;

/// Live sessions of this process, keyed by attempt id.
#[derive(Clone)]
pub struct SessionRegistry {
    sessions: Arc<Mutex<HashMap<String, Slot>>>,
    api: Arc<dyn AttemptApi>,
    journal: Arc<dyn JournalStore>,
    settings: SessionSettings,
    classification: ClassificationRegistry,
}

impl SessionRegistry {
    pub fn new(
        api: Arc<dyn AttemptApi>,
        journal: Arc<dyn JournalStore>,
        settings: SessionSettings,
    ) -> Self {
        Self {
            sessions: Arc::new(Mutex::new(HashMap::new())),
            api,
            journal,
            settings,
            classification: ClassificationRegistry::default(),
        }
    }

    /// Replaces the signal classification table used by sessions started afterwards.
    pub fn with_classification(mut self, classification: ClassificationRegistry) -> Self {
        self.classification = classification;
        self
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Loads the attempt and spawns its runtime, or hands back the live one.
    ///
    /// Starts of the same attempt are serialized on its slot, so two
    /// concurrent starts cannot both spawn a runtime. The map itself is
    /// only locked long enough to find or create the slot.
    pub async fn start(&self, request: StartRequest) -> Result<StartOutcome, AppError> {
        let attempt_id = request.attempt_id.clone();
        let slot = {
            let mut sessions = self.sessions.lock().await;
            Arc::clone(sessions.entry(attempt_id.clone()).or_default())
        };

        let outcome = {
            let mut current = slot.lock().await;
            self.start_in_slot(&mut current, &slot, request).await
        };

        if !matches!(
            outcome,
            Ok(StartOutcome::Started(_) | StartOutcome::Resumed(_))
        ) {
            self.forget_if_idle(&attempt_id, &slot).await;
        }
        outcome
    }

    async fn start_in_slot(
        &self,
        current: &mut Option<SessionHandle>,
        slot: &Slot,
        request: StartRequest,
    ) -> Result<StartOutcome, AppError> {
        if let Some(existing) = current.as_ref().filter(|h| !h.is_closed()) {
            if existing.owner() != request.owner {
                return Err(AppError::Forbidden(
                    "Session belongs to another candidate".to_string(),
                ));
            }
            tracing::info!("Resuming live session {}", request.attempt_id);
            return Ok(StartOutcome::Resumed(existing.clone()));
        }
        // A stopped runtime is never resumed; the remote decides what comes next.
        *current = None;

        let loaded =
            loader::initialize(self.api.as_ref(), &request.token, &request.attempt_id).await?;
        if loaded.entry != EntryState::Active {
            return Ok(StartOutcome::Terminal(loaded.entry));
        }

        let restored = self
            .journal
            .load(&journal_key(&request.attempt_id))
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(
                    "Could not read journal of {}, starting empty: {}",
                    request.attempt_id,
                    e
                );
                Vec::new()
            });
        if !restored.is_empty() {
            tracing::info!(
                "Replaying {} journal events for {}",
                restored.len(),
                request.attempt_id
            );
        }

        let session = AssessmentSession::open(
            &request.attempt_id,
            loaded.remaining_seconds,
            loaded.questions,
            restored,
            &self.settings,
            self.classification.clone(),
        );
        let context = SessionContext {
            api: Arc::clone(&self.api),
            journal: Arc::clone(&self.journal),
            token: request.token,
        };
        let handle = runtime::spawn(session, context, &request.owner, request.user_agent);

        self.forget_when_stopped(request.attempt_id, Arc::clone(slot), handle.clone());
        *current = Some(handle.clone());
        Ok(StartOutcome::Started(handle))
    }

    /// Session of `attempt_id`, if `owner` is allowed to drive it.
    ///
    /// A session that finished with a successful submission is still
    /// returned for `FINISHED_RETENTION`; its handle answers from the final
    /// snapshot.
    pub async fn get(&self, attempt_id: &str, owner: &str) -> Result<SessionHandle, AppError> {
        let slot = self.slot(attempt_id).await?;
        let current = slot.lock().await;
        let handle = current.as_ref().ok_or_else(|| no_session(attempt_id))?;

        if handle.owner() != owner {
            return Err(AppError::Forbidden(
                "Session belongs to another candidate".to_string(),
            ));
        }
        Ok(handle.clone())
    }

    /// Tears down and forgets a session.
    pub async fn close(&self, attempt_id: &str, owner: &str) -> Result<SessionView, AppError> {
        let slot = self.slot(attempt_id).await?;
        let handle = {
            let mut current = slot.lock().await;
            match current.as_ref() {
                None => return Err(no_session(attempt_id)),
                Some(h) if h.owner() != owner => {
                    return Err(AppError::Forbidden(
                        "Session belongs to another candidate".to_string(),
                    ));
                }
                Some(_) => {}
            }
            current.take().ok_or_else(|| no_session(attempt_id))?
        };
        self.forget_if_idle(attempt_id, &slot).await;
        handle.close().await
    }

    pub async fn live_count(&self) -> usize {
        let slots: Vec<Slot> = self.sessions.lock().await.values().cloned().collect();
        let mut live = 0;
        for slot in slots {
            if slot.lock().await.as_ref().is_some_and(|h| !h.is_closed()) {
                live += 1;
            }
        }
        live
    }

    async fn slot(&self, attempt_id: &str) -> Result<Slot, AppError> {
        self.sessions
            .lock()
            .await
            .get(attempt_id)
            .cloned()
            .ok_or_else(|| no_session(attempt_id))
    }

    /// Drops the map entry once its runtime has stopped and the
    /// retention window has passed.
    fn forget_when_stopped(&self, attempt_id: String, slot: Slot, handle: SessionHandle) {
        let registry = self.clone();
        tokio::spawn(async move {
            handle.stopped().await;
            drop(handle);
            time::sleep(FINISHED_RETENTION).await;
            registry.forget_if_idle(&attempt_id, &slot).await;
        });
    }

    /// Removes `slot` from the map if it holds no running session and
    /// nobody but the map and the caller references it.
    async fn forget_if_idle(&self, attempt_id: &str, slot: &Slot) {
        let mut sessions = self.sessions.lock().await;
        let Some(entry) = sessions.get(attempt_id) else {
            return;
        };
        if !Arc::ptr_eq(entry, slot) || Arc::strong_count(slot) > 2 {
            return;
        }
        let idle = slot
            .try_lock()
            .map(|current| current.as_ref().is_none_or(SessionHandle::is_closed))
            .unwrap_or(false);
        if idle {
            sessions.remove(attempt_id);
            tracing::debug!("Forgot session {}", attempt_id);
        }
    }
}

fn no_session(attempt_id: &str) -> AppError {
    AppError::NotFound(format!("No live session for {}", attempt_id))
}
