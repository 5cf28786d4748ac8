//! Suspend policy oracle (C7, spec §4.7). A pure function over a snapshot of
//! blockers — no I/O, no bus access — so it can be exhaustively unit tested
//! in isolation, per spec §9 ("the suspend oracle is pure over this set plus
//! the configuration values — test it in isolation").

use crate::types::{AutosuspendPolicy, CallActivity, SuspendLevel, UiState};
use std::time::{Duration, Instant};

/// Everything the oracle needs to compute `allowed_level`. All fields are a
/// plain snapshot; callers re-evaluate on every input that could move the
/// result (bus events, timers, config changes).
#[derive(Debug, Clone, Copy)]
pub struct SuspendInputs {
    pub ringing_call: bool,
    pub call_activity: CallActivity,
    pub call_activity_changed_at: Instant,
    pub alarm_visible: bool,
    pub non_call_ui_exception: bool,
    pub system_state_is_user: bool,
    pub bootup_incomplete: bool,
    pub shutting_down: bool,
    pub update_in_progress: bool,
    pub module_unloading: bool,
    pub update_mode: bool,
    pub compositor_ui_state: UiState,
    pub autosuspend_policy: AutosuspendPolicy,
    pub now: Instant,
}

/// Computes `allowed_level` (spec §4.7): start from `LATE`, apply blockers
/// top-down, clamp downward only.
pub fn allowed_level(inputs: &SuspendInputs) -> SuspendLevel {
    let recent_call_change = inputs
        .now
        .saturating_duration_since(inputs.call_activity_changed_at)
        < inputs.call_activity.recency_window();

    let late_blocked = inputs.ringing_call
        || recent_call_change
        || inputs.alarm_visible
        || inputs.non_call_ui_exception
        || !inputs.system_state_is_user
        || inputs.bootup_incomplete
        || inputs.shutting_down
        || inputs.update_in_progress
        || matches!(inputs.autosuspend_policy, AutosuspendPolicy::EarlyOnly);

    let early_blocked = inputs.module_unloading
        || inputs.update_mode
        || inputs.compositor_ui_state != UiState::Disabled
        || matches!(inputs.autosuspend_policy, AutosuspendPolicy::Disabled);

    if !late_blocked {
        SuspendLevel::Late
    } else if !early_blocked {
        SuspendLevel::Early
    } else {
        SuspendLevel::On
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn baseline(now: Instant) -> SuspendInputs {
        SuspendInputs {
            ringing_call: false,
            call_activity: CallActivity::None,
            call_activity_changed_at: now - Duration::from_secs(3600),
            alarm_visible: false,
            non_call_ui_exception: false,
            system_state_is_user: true,
            bootup_incomplete: false,
            shutting_down: false,
            update_in_progress: false,
            module_unloading: false,
            update_mode: false,
            compositor_ui_state: UiState::Disabled,
            autosuspend_policy: AutosuspendPolicy::Enabled,
            now,
        }
    }

    #[test]
    fn nothing_blocking_allows_late() {
        let now = Instant::now();
        assert_eq!(allowed_level(&baseline(now)), SuspendLevel::Late);
    }

    #[test]
    fn ringing_call_blocks_late_but_not_early() {
        let now = Instant::now();
        let mut inputs = baseline(now);
        inputs.ringing_call = true;
        assert_eq!(allowed_level(&inputs), SuspendLevel::Early);
    }

    #[test]
    fn compositor_not_disabled_blocks_early_too() {
        let now = Instant::now();
        let mut inputs = baseline(now);
        inputs.ringing_call = true;
        inputs.compositor_ui_state = UiState::Enabled;
        assert_eq!(allowed_level(&inputs), SuspendLevel::On);
    }

    #[test]
    fn recent_active_call_change_blocks_late_for_sixty_seconds() {
        let now = Instant::now();
        let mut inputs = baseline(now);
        inputs.call_activity = CallActivity::Active;
        inputs.call_activity_changed_at = now - Duration::from_secs(59);
        assert_eq!(allowed_level(&inputs), SuspendLevel::Early);

        inputs.call_activity_changed_at = now - Duration::from_secs(61);
        assert_eq!(allowed_level(&inputs), SuspendLevel::Late);
    }

    #[test]
    fn early_only_policy_blocks_late_unconditionally() {
        let now = Instant::now();
        let mut inputs = baseline(now);
        inputs.autosuspend_policy = AutosuspendPolicy::EarlyOnly;
        assert_eq!(allowed_level(&inputs), SuspendLevel::Early);
    }

    #[test]
    fn disabled_policy_blocks_early_too() {
        let now = Instant::now();
        let mut inputs = baseline(now);
        inputs.autosuspend_policy = AutosuspendPolicy::Disabled;
        assert_eq!(allowed_level(&inputs), SuspendLevel::On);
    }

    #[test]
    fn shutting_down_blocks_late() {
        let now = Instant::now();
        let mut inputs = baseline(now);
        inputs.shutting_down = true;
        assert_eq!(allowed_level(&inputs), SuspendLevel::Early);
    }
}
