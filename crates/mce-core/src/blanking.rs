//! Blanking timer set (C5, spec §4.5). The arming policy (which of
//! DIM/OFF/LPM_OFF/PAUSE is armed) is a pure function over a snapshot of
//! inputs, mirroring [`crate::suspend::allowed_level`]'s isolation so the
//! precedence table can be tested without any timer machinery at all.

use crate::types::InhibitMode;
use mce_runtime::timer::TimerPool;
use std::time::{Duration, Instant};

/// Default blanking-pause period (spec §5 "Timeouts").
pub const DEFAULT_PAUSE_PERIOD: Duration = Duration::from_secs(60);
/// Bounded set size (spec §3 "Blanking-pause client set").
pub const MAX_PAUSE_CLIENTS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ArmedTimers {
    pub dim: bool,
    pub off: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct ArmingInputs {
    pub update_mode: bool,
    pub inhibit: InhibitMode,
    pub charger_connected: bool,
    pub call_exception: bool,
    pub ringing: bool,
    pub handset_route: bool,
    pub proximity_covered: bool,
    pub touch_lock: bool,
    pub blanking_pause_active: bool,
}

/// Arming policy for display == ON (spec §4.5 numbered precedence list).
pub fn evaluate(inputs: &ArmingInputs) -> ArmedTimers {
    if inputs.update_mode {
        return ArmedTimers::default();
    }
    if inputs.inhibit == InhibitMode::StayOn {
        return ArmedTimers::default();
    }
    if inputs.inhibit == InhibitMode::StayOnWithCharger && inputs.charger_connected {
        return ArmedTimers::default();
    }
    if inputs.call_exception && inputs.ringing {
        return ArmedTimers::default();
    }
    if inputs.call_exception && inputs.handset_route && inputs.proximity_covered {
        return ArmedTimers::default();
    }
    if inputs.call_exception {
        return ArmedTimers { dim: true, off: false };
    }
    if inputs.touch_lock {
        return ArmedTimers { dim: false, off: true };
    }
    if inputs.blanking_pause_active {
        return ArmedTimers { dim: false, off: false };
    }
    ArmedTimers { dim: true, off: false }
}

/// Once DIM is reached, whether OFF should also be armed (spec §4.5: "For
/// DIM: if inhibit is STAY_DIM (± charger condition) → no OFF; else arm
/// OFF").
pub fn evaluate_off_from_dim(inhibit: InhibitMode, charger_connected: bool) -> bool {
    match inhibit {
        InhibitMode::StayDim => false,
        InhibitMode::StayDimWithCharger if charger_connected => false,
        _ => true,
    }
}

/// Adaptive dimming (spec §4.5): every activity event while armed walks the
/// configured dim-timeout list one step further; the walk resets once
/// `adaptive_period` elapses with no activity.
pub struct AdaptiveDimWalker {
    schedule: Vec<Duration>,
    index: usize,
    last_activity: Option<Instant>,
    adaptive_period: Duration,
}

impl AdaptiveDimWalker {
    pub fn new(schedule: Vec<Duration>, adaptive_period: Duration) -> Self {
        Self {
            schedule,
            index: 0,
            last_activity: None,
            adaptive_period,
        }
    }

    /// Record an activity event and return the dim timeout to use next.
    pub fn on_activity(&mut self, now: Instant) -> Duration {
        if let Some(last) = self.last_activity {
            if now.saturating_duration_since(last) > self.adaptive_period {
                self.index = 0;
            } else if self.index + 1 < self.schedule.len() {
                self.index += 1;
            }
        }
        self.last_activity = Some(now);
        self.current()
    }

    pub fn current(&self) -> Duration {
        self.schedule
            .get(self.index)
            .copied()
            .unwrap_or(Duration::from_secs(30))
    }
}

/// Bounded set of bus-name owners currently holding a blanking pause (spec
/// §3). A client requesting pause repeatedly is idempotent; the pause
/// duration is bounded by the PAUSE timer regardless of request count.
#[derive(Default)]
pub struct PauseClients {
    owners: Vec<String>,
}

impl PauseClients {
    pub fn add(&mut self, owner: &str) {
        if !self.owners.iter().any(|o| o == owner) && self.owners.len() < MAX_PAUSE_CLIENTS {
            self.owners.push(owner.to_string());
        }
    }

    pub fn remove(&mut self, owner: &str) {
        self.owners.retain(|o| o != owner);
    }

    pub fn is_active(&self) -> bool {
        !self.owners.is_empty()
    }

    pub fn evict_all(&mut self) {
        self.owners.clear();
    }
}

/// One `TimerPool` per timer kind: the spec's "at most one of each armed"
/// means up to five concurrently active timers of *different* kinds, so
/// each kind gets its own single-slot pool.
#[derive(Default)]
pub struct BlankingTimers {
    pub dim: TimerPool,
    pub off: TimerPool,
    pub lpm_off: TimerPool,
    pub pause: TimerPool,
    pub adaptive: TimerPool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn baseline() -> ArmingInputs {
        ArmingInputs {
            update_mode: false,
            inhibit: InhibitMode::Off,
            charger_connected: false,
            call_exception: false,
            ringing: false,
            handset_route: false,
            proximity_covered: false,
            touch_lock: false,
            blanking_pause_active: false,
        }
    }

    #[test]
    fn default_policy_arms_dim_only() {
        assert_eq!(evaluate(&baseline()), ArmedTimers { dim: true, off: false });
    }

    #[test]
    fn update_mode_disarms_everything() {
        let mut inputs = baseline();
        inputs.update_mode = true;
        assert_eq!(evaluate(&inputs), ArmedTimers::default());
    }

    #[test]
    fn touch_lock_arms_off_instead_of_dim() {
        let mut inputs = baseline();
        inputs.touch_lock = true;
        assert_eq!(evaluate(&inputs), ArmedTimers { dim: false, off: true });
    }

    #[test]
    fn ringing_call_disarms_everything_even_with_touch_lock() {
        let mut inputs = baseline();
        inputs.touch_lock = true;
        inputs.call_exception = true;
        inputs.ringing = true;
        assert_eq!(evaluate(&inputs), ArmedTimers::default());
    }

    #[test]
    fn handset_call_with_proximity_covered_disarms_everything() {
        let mut inputs = baseline();
        inputs.call_exception = true;
        inputs.handset_route = true;
        inputs.proximity_covered = true;
        assert_eq!(evaluate(&inputs), ArmedTimers::default());
    }

    #[test]
    fn blanking_pause_suppresses_dim_but_is_not_full_disarm() {
        let mut inputs = baseline();
        inputs.blanking_pause_active = true;
        assert_eq!(evaluate(&inputs), ArmedTimers { dim: false, off: false });
    }

    #[test]
    fn stay_dim_inhibit_blocks_off_after_dim() {
        assert!(!evaluate_off_from_dim(InhibitMode::StayDim, false));
        assert!(evaluate_off_from_dim(InhibitMode::Off, false));
    }

    #[test]
    fn adaptive_walker_advances_on_repeated_activity_and_resets_after_gap() {
        let schedule = vec![
            Duration::from_secs(30),
            Duration::from_secs(60),
            Duration::from_secs(120),
        ];
        let mut walker = AdaptiveDimWalker::new(schedule, Duration::from_secs(300));
        let t0 = Instant::now();
        assert_eq!(walker.on_activity(t0), Duration::from_secs(30));
        assert_eq!(walker.on_activity(t0 + Duration::from_secs(10)), Duration::from_secs(60));
        assert_eq!(walker.on_activity(t0 + Duration::from_secs(20)), Duration::from_secs(120));
        // further activity does not walk past the last entry.
        assert_eq!(walker.on_activity(t0 + Duration::from_secs(30)), Duration::from_secs(120));
        // a long gap resets the walk.
        assert_eq!(walker.on_activity(t0 + Duration::from_secs(700)), Duration::from_secs(30));
    }

    #[test]
    fn pause_clients_are_idempotent_and_bounded() {
        let mut clients = PauseClients::default();
        for _ in 0..10 {
            clients.add("caller-a");
        }
        assert!(clients.is_active());
        clients.remove("caller-a");
        assert!(!clients.is_active());
    }
}
