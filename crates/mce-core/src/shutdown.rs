//! Shutdown/system-state reducer (C9, spec §4.9). A monotonic latch: any of
//! the three shutdown bus signals, or system-state entering SHUTDOWN/REBOOT,
//! sets it; only re-entry to USER/ACTDEAD clears it. Consumed by the suspend
//! oracle, blanking logic, and the fb-holder teardown path (spec §4.3).

use mce_proto::SystemState;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    Normal,
    Thermal,
    BatteryEmpty,
}

#[derive(Default)]
pub struct ShutdownLatch {
    set: AtomicBool,
}

impl ShutdownLatch {
    pub fn is_set(&self) -> bool {
        self.set.load(Ordering::SeqCst)
    }

    /// Returns `true` if this call transitioned the latch from unset to set
    /// (callers use this to know whether to open the fb-holder handle, which
    /// must happen exactly once per shutdown episode).
    pub fn on_shutdown_signal(&self, signal: ShutdownSignal) -> bool {
        let was_set = self.set.swap(true, Ordering::SeqCst);
        if !was_set {
            info!(?signal, "shutdown latch set");
        }
        !was_set
    }

    /// Returns `true` if this call transitioned the latch from unset to set.
    pub fn on_system_state(&self, state: SystemState) -> bool {
        match state {
            SystemState::Shutdown | SystemState::Reboot => {
                let was_set = self.set.swap(true, Ordering::SeqCst);
                if !was_set {
                    info!(?state, "shutdown latch set by system state");
                }
                !was_set
            }
            SystemState::User | SystemState::ActDead => {
                let was_set = self.set.swap(false, Ordering::SeqCst);
                if was_set {
                    info!(?state, "shutdown latch cleared");
                }
                false
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latch_is_monotonic_until_user_reentry() {
        let latch = ShutdownLatch::default();
        assert!(latch.on_shutdown_signal(ShutdownSignal::Thermal));
        assert!(!latch.on_shutdown_signal(ShutdownSignal::Normal));
        assert!(latch.is_set());

        latch.on_system_state(SystemState::User);
        assert!(!latch.is_set());
    }

    #[test]
    fn system_state_shutdown_sets_latch() {
        let latch = ShutdownLatch::default();
        assert!(latch.on_system_state(SystemState::Shutdown));
        assert!(latch.is_set());
    }

    #[test]
    fn actdead_also_clears_latch() {
        let latch = ShutdownLatch::default();
        latch.on_shutdown_signal(ShutdownSignal::BatteryEmpty);
        latch.on_system_state(SystemState::ActDead);
        assert!(!latch.is_set());
    }

    #[test]
    fn boot_state_does_not_affect_latch() {
        let latch = ShutdownLatch::default();
        latch.on_shutdown_signal(ShutdownSignal::Normal);
        latch.on_system_state(SystemState::Boot);
        assert!(latch.is_set());
    }
}
