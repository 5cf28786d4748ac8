//! LED pattern engine (spec §1 out-of-scope collaborator). Activation is by
//! symbolic name; §4.3 and §4.6 name the patterns the core itself drives
//! (panic LED for fb-gate and compositor liveness timeouts).

use std::sync::Mutex;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LedPattern {
    /// fb-gate suspend watchdog (spec §4.3).
    PowerDownFailed,
    /// fb-gate resume watchdog (spec §4.3).
    PowerUpFailed,
    /// compositor mediator, `setUpdatesEnabled(false)` unanswered (spec §4.6).
    CompositorBlankFailed,
    /// compositor mediator, `setUpdatesEnabled(true)` unanswered (spec §4.6).
    CompositorUnblankFailed,
    /// compositor mediator, between SIGKILL and verified-dead (spec §4.6).
    CompositorKillInProgress,
}

pub trait LedEngine: Send + Sync {
    fn activate(&self, pattern: LedPattern);
    fn deactivate(&self, pattern: LedPattern);
}

/// Tracks which patterns are currently active; logs transitions instead of
/// driving real hardware. A device-specific engine would replace this with
/// writes to the sysfs LED class or a MCE-private LED daemon call.
#[derive(Default)]
pub struct LoggingLedEngine {
    active: Mutex<Vec<LedPattern>>,
}

impl LedEngine for LoggingLedEngine {
    fn activate(&self, pattern: LedPattern) {
        let mut active = self.active.lock().unwrap();
        if !active.contains(&pattern) {
            debug!(?pattern, "led pattern activated");
            active.push(pattern);
        }
    }

    fn deactivate(&self, pattern: LedPattern) {
        let mut active = self.active.lock().unwrap();
        if let Some(idx) = active.iter().position(|p| *p == pattern) {
            active.remove(idx);
            debug!(?pattern, "led pattern deactivated");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn activate_is_idempotent() {
        let engine = LoggingLedEngine::default();
        engine.activate(LedPattern::PowerDownFailed);
        engine.activate(LedPattern::PowerDownFailed);
        assert_eq!(engine.active.lock().unwrap().len(), 1);
    }

    #[test]
    fn deactivate_removes_only_the_named_pattern() {
        let engine = LoggingLedEngine::default();
        engine.activate(LedPattern::PowerDownFailed);
        engine.activate(LedPattern::CompositorKillInProgress);
        engine.deactivate(LedPattern::PowerDownFailed);
        let active = engine.active.lock().unwrap();
        assert_eq!(active.as_slice(), &[LedPattern::CompositorKillInProgress]);
    }
}
