// src/engine/audit.rs

use std::collections::VecDeque;

use crate::{
    models::log_event::{EventType, LogEvent},
    storage::JournalStore,
};

const JOURNAL_KEY_PREFIX: &str = "proctor_audit_log";

/// Journal key for one attempt. Keys never collide across attempts.
pub fn journal_key(attempt_id: &str) -> String {
    format!("{}:{}", JOURNAL_KEY_PREFIX, attempt_id)
}

/// Append-only event buffer of one session, mirrored into a `JournalStore`.
///
/// Recording is synchronous; persistence happens in `flush`, which the
/// runtime calls after every handled command. Events that failed to persist
/// stay queued and are retried on the next flush.
#[derive(Debug)]
pub struct AuditLog {
    key: String,
    events: Vec<LogEvent>,
    unflushed: VecDeque<LogEvent>,
    clear_pending: bool,
}

impl AuditLog {
    pub fn new(attempt_id: &str) -> Self {
        Self::restore(attempt_id, Vec::new())
    }

    /// Rebuilds the buffer from events already persisted for this attempt.
    pub fn restore(attempt_id: &str, events: Vec<LogEvent>) -> Self {
        Self {
            key: journal_key(attempt_id),
            events,
            unflushed: VecDeque::new(),
            clear_pending: false,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn record(&mut self, event: LogEvent) {
        tracing::debug!(
            "audit {:?} attempt={} question={:?}",
            event.event_type,
            event.attempt_id,
            event.question_id
        );
        self.unflushed.push_back(event.clone());
        self.events.push(event);
    }

    pub fn events(&self) -> &[LogEvent] {
        &self.events
    }

    pub fn contains(&self, event_type: EventType) -> bool {
        self.events.iter().any(|e| e.event_type == event_type)
    }

    pub fn count(&self, event_type: EventType) -> usize {
        self.events
            .iter()
            .filter(|e| e.event_type == event_type)
            .count()
    }

    /// Drops every event. Only valid after a successful submission.
    pub fn clear(&mut self) {
        self.events.clear();
        self.unflushed.clear();
        self.clear_pending = true;
    }

    pub fn has_unflushed(&self) -> bool {
        self.clear_pending || !self.unflushed.is_empty()
    }

    /// Writes pending changes to the store. Failures are logged and retried later.
    pub async fn flush(&mut self, store: &dyn JournalStore) {
        if self.clear_pending {
            match store.clear(&self.key).await {
                Ok(()) => self.clear_pending = false,
                Err(e) => {
                    tracing::warn!("Failed to clear journal {}: {}", self.key, e);
                    return;
                }
            }
        }

        while let Some(event) = self.unflushed.front() {
            if let Err(e) = store.append(&self.key, event).await {
                tracing::warn!(
                    "Failed to persist {:?} to journal {}: {}",
                    event.event_type,
                    self.key,
                    e
                );
                return;
            }
            self.unflushed.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::{error::AppError, models::log_event::EventMetadata, storage::MemoryJournal};

    fn event(event_type: EventType) -> LogEvent {
        LogEvent::new(event_type, "a1", EventMetadata::default())
    }

    /// Store that refuses writes until told otherwise.
    #[derive(Default)]
    struct FlakyJournal {
        inner: MemoryJournal,
        healthy: AtomicBool,
    }

    #[async_trait]
    impl JournalStore for FlakyJournal {
        async fn load(&self, key: &str) -> Result<Vec<LogEvent>, AppError> {
            self.inner.load(key).await
        }

        async fn append(&self, key: &str, event: &LogEvent) -> Result<(), AppError> {
            if !self.healthy.load(Ordering::SeqCst) {
                return Err(AppError::InternalServerError("disk full".to_string()));
            }
            self.inner.append(key, event).await
        }

        async fn clear(&self, key: &str) -> Result<(), AppError> {
            self.inner.clear(key).await
        }
    }

    #[test]
    fn test_journal_key_is_scoped_by_attempt() {
        assert_eq!(journal_key("abc"), "proctor_audit_log:abc");
        assert_ne!(journal_key("a"), journal_key("b"));
    }

    #[tokio::test]
    async fn test_flush_persists_in_order() {
        let store = MemoryJournal::new();
        let mut log = AuditLog::new("a1");
        log.record(event(EventType::AssessmentStarted));
        log.record(event(EventType::TabSwitch));
        assert!(log.has_unflushed());

        log.flush(&store).await;

        assert!(!log.has_unflushed());
        let stored = store.load(log.key()).await.unwrap();
        assert_eq!(stored, log.events().to_vec());
    }

    #[tokio::test]
    async fn test_failed_flush_is_retried() {
        let store = FlakyJournal::default();
        let mut log = AuditLog::new("a1");
        log.record(event(EventType::WindowBlur));

        log.flush(&store).await;
        assert!(log.has_unflushed());
        assert_eq!(log.events().len(), 1);

        store.healthy.store(true, Ordering::SeqCst);
        log.flush(&store).await;
        assert!(!log.has_unflushed());
        assert_eq!(store.load(log.key()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_clear_removes_persisted_events() {
        let store = MemoryJournal::new();
        let mut log = AuditLog::new("a1");
        log.record(event(EventType::Submitted));
        log.flush(&store).await;

        log.clear();
        log.flush(&store).await;

        assert!(log.events().is_empty());
        assert!(store.load(log.key()).await.unwrap().is_empty());
    }

    #[test]
    fn test_restore_keeps_previous_events() {
        let log = AuditLog::restore(
            "a1",
            vec![event(EventType::AssessmentStarted), event(EventType::TabSwitch)],
        );
        assert!(log.contains(EventType::AssessmentStarted));
        assert_eq!(log.count(EventType::TabSwitch), 1);
        assert!(!log.has_unflushed());
    }
}
