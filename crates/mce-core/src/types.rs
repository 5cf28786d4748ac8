//! Shared data model (spec §3): display/system state, fade records, suspend
//! levels and the small flag sets the suspend oracle and blanking timer set
//! are pure functions over.

use bitflags::bitflags;
use std::fmt;
use std::time::{Duration, Instant};

/// Display state (spec §3). Stable values are valid *targets*; the transient
/// values only ever appear on the `display-state` bus channel while the DSM
/// has not finished a transition (spec §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DisplayState {
    Off,
    LpmOff,
    LpmOn,
    Dim,
    On,
    PowerUp,
    PowerDown,
    Undef,
}

impl DisplayState {
    pub fn is_stable(self) -> bool {
        matches!(
            self,
            Self::Off | Self::LpmOff | Self::LpmOn | Self::Dim | Self::On
        )
    }

    /// The externally visible "collapsed" state (spec §6, GLOSSARY): LPM_*
    /// collapses to `off`.
    pub fn collapsed(self) -> CollapsedState {
        match self {
            Self::On => CollapsedState::On,
            Self::Dim => CollapsedState::Dim,
            _ => CollapsedState::Off,
        }
    }
}

impl fmt::Display for DisplayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Off => "OFF",
            Self::LpmOff => "LPM_OFF",
            Self::LpmOn => "LPM_ON",
            Self::Dim => "DIM",
            Self::On => "ON",
            Self::PowerUp => "POWER_UP",
            Self::PowerDown => "POWER_DOWN",
            Self::Undef => "UNDEF",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollapsedState {
    On,
    Dim,
    Off,
}

impl fmt::Display for CollapsedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::On => "on",
            Self::Dim => "dim",
            Self::Off => "off",
        };
        write!(f, "{s}")
    }
}

/// Suspend level (spec §3, §4.7). `ON < EARLY < LATE`; a lower level is more
/// restrictive. Derives `Ord` so the oracle can clamp with `min`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SuspendLevel {
    On,
    Early,
    Late,
}

/// Fade class (spec §3, §4.4). Precedence is checked with `can_preempt`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FadeType {
    Idle,
    Default,
    Dimming,
    Als,
    Blank,
    Unblank,
}

impl FadeType {
    /// Whether a fade of type `self`, currently running, may be replaced by
    /// an incoming fade of type `incoming`.
    ///
    /// - `Blank` can never be cancelled.
    /// - `Unblank` accepts only another `Unblank` (a target adjustment).
    /// - `Dimming`/`Default` reject `Als`.
    /// - everything else is preemptible.
    pub fn can_preempt(self, incoming: FadeType) -> bool {
        match self {
            Self::Blank => false,
            Self::Unblank => incoming == Self::Unblank,
            Self::Dimming | Self::Default => incoming != Self::Als,
            Self::Idle | Self::Als => true,
        }
    }
}

/// A running (or just-completed) brightness fade (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FadeRecord {
    pub ty: FadeType,
    pub start_level: u32,
    pub end_level: u32,
    pub start_tick: Instant,
    pub end_tick: Instant,
}

impl FadeRecord {
    pub fn duration(&self) -> Duration {
        self.end_tick.saturating_duration_since(self.start_tick)
    }

    pub fn is_complete(&self, now: Instant) -> bool {
        now >= self.end_tick
    }

    /// Timestamp-based interpolation (spec §4.4 step 4): never step-counted,
    /// so timer jitter cannot cause overshoot.
    pub fn level_at(&self, now: Instant) -> u32 {
        if now <= self.start_tick {
            return self.start_level;
        }
        if now >= self.end_tick {
            return self.end_level;
        }
        let total = self.duration().as_millis().max(1) as i64;
        let elapsed = (now - self.start_tick).as_millis() as i64;
        let delta = self.end_level as i64 - self.start_level as i64;
        (self.start_level as i64 + (delta * elapsed) / total) as u32
    }
}

/// UI-side compositor state (spec §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UiState {
    Unknown,
    Disabled,
    Enabled,
    Error,
}

/// `inhibit_blank_mode` configuration key (spec §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InhibitMode {
    #[default]
    Off,
    StayOnWithCharger,
    StayDimWithCharger,
    StayOn,
    StayDim,
}

/// `use_autosuspend` configuration key (spec §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AutosuspendPolicy {
    Disabled,
    #[default]
    Enabled,
    EarlyOnly,
}

/// `display_off_override` configuration key (spec §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DisplayOffOverride {
    #[default]
    Disabled,
    UseLpm,
}

bitflags! {
    /// Transient UI overrides that alter timer and suspend policy
    /// (GLOSSARY: "exception state").
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ExceptionState: u32 {
        /// Call UI is showing (ringing or active).
        const CALL        = 0b0000_0001;
        /// The call is actively ringing (stronger than `CALL` alone).
        const RINGING      = 0b0000_0010;
        /// Alarm UI is ringing or visible.
        const ALARM        = 0b0000_0100;
        /// Non-call notification banner is showing.
        const NOTIFICATION = 0b0000_1000;
        /// Notification is lingering past its own timeout.
        const LINGER       = 0b0001_0000;
    }
}

/// Audio route relevant to the proximity-covered-during-call suspend/timer
/// exemption (spec §4.5 item 5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AudioRoute {
    #[default]
    Speaker,
    Handset,
}

/// Recency-tracked call activity state feeding the suspend oracle's "recent
/// call-state change" blocker (spec §4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CallActivity {
    #[default]
    None,
    Active,
    Other,
}

impl CallActivity {
    /// spec §4.7: 60s for ACTIVE, 5s otherwise.
    pub fn recency_window(self) -> Duration {
        match self {
            Self::Active => Duration::from_secs(60),
            _ => Duration::from_secs(5),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fade_record_interpolates_linearly() {
        let start = Instant::now();
        let record = FadeRecord {
            ty: FadeType::Default,
            start_level: 0,
            end_level: 100,
            start_tick: start,
            end_tick: start + Duration::from_millis(100),
        };
        assert_eq!(record.level_at(start), 0);
        assert_eq!(record.level_at(start + Duration::from_millis(50)), 50);
        assert_eq!(record.level_at(start + Duration::from_millis(200)), 100);
    }

    #[test]
    fn blank_cannot_be_preempted() {
        assert!(!FadeType::Blank.can_preempt(FadeType::Default));
        assert!(!FadeType::Blank.can_preempt(FadeType::Idle));
    }

    #[test]
    fn unblank_only_accepts_unblank() {
        assert!(FadeType::Unblank.can_preempt(FadeType::Unblank));
        assert!(!FadeType::Unblank.can_preempt(FadeType::Default));
    }

    #[test]
    fn dimming_rejects_als() {
        assert!(!FadeType::Dimming.can_preempt(FadeType::Als));
        assert!(FadeType::Dimming.can_preempt(FadeType::Default));
    }

    #[test]
    fn collapsed_state_merges_lpm_into_off() {
        assert_eq!(DisplayState::LpmOn.collapsed(), CollapsedState::Off);
        assert_eq!(DisplayState::LpmOff.collapsed(), CollapsedState::Off);
        assert_eq!(DisplayState::On.collapsed(), CollapsedState::On);
    }

    #[test]
    fn suspend_level_orders_as_on_lt_early_lt_late() {
        assert!(SuspendLevel::On < SuspendLevel::Early);
        assert!(SuspendLevel::Early < SuspendLevel::Late);
    }
}
