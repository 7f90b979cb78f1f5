// src/engine/monitor.rs

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::models::log_event::{EventType, LogEvent};

/// Raw browser signals forwarded by the exam page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    /// `visibilitychange` with the document hidden.
    VisibilityHidden,
    /// `visibilitychange` with the document visible again.
    VisibilityVisible,
    WindowBlur,
    Copy,
    Paste,
    ContextMenu,
    FullscreenExit,
    /// The browser refused the fullscreen request.
    FullscreenRejected,
    /// `popstate` from the back button.
    HistoryBack,
}

/// How one signal kind is classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassificationRule {
    pub event_type: EventType,
    pub counts_toward_limit: bool,
    pub suppress: bool,
    pub block_navigation: bool,
}

impl ClassificationRule {
    pub const fn violation(event_type: EventType) -> Self {
        Self {
            event_type,
            counts_toward_limit: true,
            suppress: false,
            block_navigation: false,
        }
    }

    pub const fn suppressed(mut self) -> Self {
        self.suppress = true;
        self
    }

    pub const fn not_counted(mut self) -> Self {
        self.counts_toward_limit = false;
        self
    }

    pub const fn blocks_navigation(mut self) -> Self {
        self.block_navigation = true;
        self
    }
}

/// Signal kind to classification table. Signals without a rule are ignored.
#[derive(Debug, Clone)]
pub struct ClassificationRegistry {
    rules: HashMap<SignalKind, ClassificationRule>,
}

impl Default for ClassificationRegistry {
    fn default() -> Self {
        Self::empty()
            .with_rule(
                SignalKind::VisibilityHidden,
                ClassificationRule::violation(EventType::TabSwitch),
            )
            .with_rule(
                SignalKind::WindowBlur,
                ClassificationRule::violation(EventType::WindowBlur),
            )
            .with_rule(
                SignalKind::Copy,
                ClassificationRule::violation(EventType::CopyAttempt).suppressed(),
            )
            .with_rule(
                SignalKind::Paste,
                ClassificationRule::violation(EventType::PasteAttempt).suppressed(),
            )
            .with_rule(
                SignalKind::FullscreenExit,
                ClassificationRule::violation(EventType::FullscreenExit),
            )
            .with_rule(
                SignalKind::HistoryBack,
                ClassificationRule::violation(EventType::BackButtonAttempt)
                    .not_counted()
                    .blocks_navigation(),
            )
            .with_rule(
                SignalKind::ContextMenu,
                ClassificationRule::violation(EventType::RightClick)
                    .not_counted()
                    .suppressed(),
            )
    }
}

impl ClassificationRegistry {
    pub fn empty() -> Self {
        Self {
            rules: HashMap::new(),
        }
    }

    /// Adds or replaces the rule for `kind`.
    pub fn with_rule(mut self, kind: SignalKind, rule: ClassificationRule) -> Self {
        self.rules.insert(kind, rule);
        self
    }

    pub fn classify(&self, kind: SignalKind) -> Option<&ClassificationRule> {
        self.rules.get(&kind)
    }

    /// Whether events of this type count toward the violation limit.
    pub fn counts(&self, event_type: EventType) -> bool {
        self.rules
            .values()
            .any(|rule| rule.event_type == event_type && rule.counts_toward_limit)
    }
}

/// Result of observing one classified signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Observation {
    pub rule: ClassificationRule,
    pub violations: u32,
    /// `true` exactly once: on the observation that first reaches the limit.
    pub limit_reached: bool,
}

/// Turns signals into violations and latches the limit crossing.
#[derive(Debug, Clone)]
pub struct IntegrityMonitor {
    registry: ClassificationRegistry,
    violations: u32,
    limit: u32,
    limit_latched: bool,
    attached: bool,
}

impl IntegrityMonitor {
    pub fn new(registry: ClassificationRegistry, limit: u32) -> Self {
        Self {
            registry,
            violations: 0,
            limit,
            limit_latched: false,
            attached: true,
        }
    }

    pub fn violations(&self) -> u32 {
        self.violations
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn is_attached(&self) -> bool {
        self.attached
    }

    /// Stops reacting to signals. Used when the session ends.
    pub fn detach(&mut self) {
        self.attached = false;
    }

    /// Rebuilds the counter from a restored journal.
    /// Returns `true` if the restored count already reaches the limit.
    pub fn restore(&mut self, events: &[LogEvent]) -> bool {
        let counted = events
            .iter()
            .filter(|e| self.registry.counts(e.event_type))
            .count();
        self.violations = u32::try_from(counted).unwrap_or(u32::MAX);
        self.check_limit()
    }

    /// Classifies a signal. `None` for unknown signals or once detached.
    pub fn observe(&mut self, kind: SignalKind) -> Option<Observation> {
        if !self.attached {
            return None;
        }

        let rule = *self.registry.classify(kind)?;
        let mut limit_reached = false;

        if rule.counts_toward_limit {
            self.violations = self.violations.saturating_add(1);
            tracing::warn!(
                "Integrity violation {:?} ({}/{})",
                rule.event_type,
                self.violations,
                self.limit
            );
            limit_reached = self.check_limit();
        }

        Some(Observation {
            rule,
            violations: self.violations,
            limit_reached,
        })
    }

    fn check_limit(&mut self) -> bool {
        if !self.limit_latched && self.violations >= self.limit {
            self.limit_latched = true;
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::log_event::EventMetadata;

    fn monitor() -> IntegrityMonitor {
        IntegrityMonitor::new(ClassificationRegistry::default(), 3)
    }

    #[test]
    fn test_three_distinct_violations_reach_limit_once() {
        let mut m = monitor();
        let first = m.observe(SignalKind::Copy).unwrap();
        let second = m.observe(SignalKind::VisibilityHidden).unwrap();
        let third = m.observe(SignalKind::WindowBlur).unwrap();
        let fourth = m.observe(SignalKind::Paste).unwrap();
        let fifth = m.observe(SignalKind::FullscreenExit).unwrap();

        assert!(!first.limit_reached);
        assert!(!second.limit_reached);
        assert!(third.limit_reached);
        assert!(!fourth.limit_reached);
        assert!(!fifth.limit_reached);
        assert_eq!(m.violations(), 5);
    }

    #[test]
    fn test_right_click_never_counts() {
        let mut m = monitor();
        for _ in 0..5 {
            let obs = m.observe(SignalKind::ContextMenu).unwrap();
            assert_eq!(obs.rule.event_type, EventType::RightClick);
            assert!(obs.rule.suppress);
            assert!(!obs.limit_reached);
        }
        assert_eq!(m.violations(), 0);
    }

    #[test]
    fn test_back_button_blocks_without_counting() {
        let mut m = monitor();
        let obs = m.observe(SignalKind::HistoryBack).unwrap();
        assert_eq!(obs.rule.event_type, EventType::BackButtonAttempt);
        assert!(obs.rule.block_navigation);
        assert_eq!(obs.violations, 0);
    }

    #[test]
    fn test_clipboard_is_suppressed_and_counted() {
        let mut m = monitor();
        let copy = m.observe(SignalKind::Copy).unwrap();
        let paste = m.observe(SignalKind::Paste).unwrap();
        assert!(copy.rule.suppress && paste.rule.suppress);
        assert_eq!(paste.violations, 2);
    }

    #[test]
    fn test_unclassified_signals_are_ignored() {
        let mut m = monitor();
        assert!(m.observe(SignalKind::VisibilityVisible).is_none());
        assert!(m.observe(SignalKind::FullscreenRejected).is_none());
        assert_eq!(m.violations(), 0);
    }

    #[test]
    fn test_detached_monitor_ignores_everything() {
        let mut m = monitor();
        m.detach();
        assert!(m.observe(SignalKind::Copy).is_none());
        assert_eq!(m.violations(), 0);
    }

    #[test]
    fn test_registry_is_extensible() {
        let registry = ClassificationRegistry::default().with_rule(
            SignalKind::VisibilityVisible,
            ClassificationRule::violation(EventType::TabSwitch).not_counted(),
        );
        let mut m = IntegrityMonitor::new(registry, 3);
        let obs = m.observe(SignalKind::VisibilityVisible).unwrap();
        assert_eq!(obs.rule.event_type, EventType::TabSwitch);
        assert_eq!(m.violations(), 0);
    }

    #[test]
    fn test_restore_counts_only_qualifying_events() {
        let meta = EventMetadata::default();
        let events = vec![
            LogEvent::new(EventType::AssessmentStarted, "a1", meta.clone()),
            LogEvent::new(EventType::TabSwitch, "a1", meta.clone()),
            LogEvent::new(EventType::RightClick, "a1", meta.clone()),
            LogEvent::new(EventType::BackButtonAttempt, "a1", meta.clone()),
            LogEvent::new(EventType::CopyAttempt, "a1", meta),
        ];
        let mut m = monitor();
        assert!(!m.restore(&events));
        assert_eq!(m.violations(), 2);

        // The next qualifying signal crosses the limit.
        assert!(m.observe(SignalKind::WindowBlur).unwrap().limit_reached);
    }

    #[test]
    fn test_restore_at_limit_latches() {
        let meta = EventMetadata::default();
        let events: Vec<LogEvent> = (0..3)
            .map(|_| LogEvent::new(EventType::WindowBlur, "a1", meta.clone()))
            .collect();
        let mut m = monitor();
        assert!(m.restore(&events));
        assert!(!m.observe(SignalKind::Copy).unwrap().limit_reached);
    }
}
