//! Compositor mediator (C6, spec §4.6). Starts an asynchronous
//! `setUpdatesEnabled` call and, while the reply is outstanding, drives the
//! liveness escalation chain: panic LED → core-dump signal → SIGKILL →
//! verify. A fresh request cancels whatever escalation was already running
//! for the previous request (spec §5 "Cancellation").

use crate::bus_transport::{BusTransport, PendingCall};
use crate::error::CompositorError;
use crate::led::{LedEngine, LedPattern};
use crate::types::UiState;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// Ramp-down schedule for the panic LED delay (spec §4.6 step 1).
const PANIC_DELAY_INITIAL: Duration = Duration::from_secs(15);
const PANIC_DELAY_FLOOR: Duration = Duration::from_millis(1500);
const PANIC_DELAY_DECAY: f64 = 0.75;

/// Fixed delays (spec §4.6 steps 3/4).
const KILL_DELAY: Duration = Duration::from_secs(25);
const VERIFY_DELAY: Duration = Duration::from_secs(5);

pub struct CompositorMediator {
    bus: Arc<dyn BusTransport>,
    led: Arc<dyn LedEngine>,
    ui_state: UiState,
    panic_delay: Duration,
    /// §6 configured delay; `0` disables the core-dump step.
    core_dump_delay: Duration,
    cancel_escalation: Option<oneshot::Sender<()>>,
    pending: Option<PendingCall>,
}

impl CompositorMediator {
    pub fn new(bus: Arc<dyn BusTransport>, led: Arc<dyn LedEngine>, core_dump_delay: Duration) -> Self {
        Self {
            bus,
            led,
            ui_state: UiState::Unknown,
            panic_delay: PANIC_DELAY_INITIAL,
            core_dump_delay,
            cancel_escalation: None,
            pending: None,
        }
    }

    pub fn ui_state(&self) -> UiState {
        self.ui_state
    }

    /// Start `setUpdatesEnabled(enabled)`, superseding any in-flight request.
    pub fn request(&mut self, enabled: bool, replies: tokio::sync::mpsc::Sender<UiState>) {
        if let Some(pending) = self.pending.take() {
            pending.cancel();
        }
        if let Some(cancel) = self.cancel_escalation.take() {
            let _ = cancel.send(());
        }
        self.ui_state = UiState::Unknown;

        let (pending, reply) = self.bus.call_set_updates_enabled(enabled);
        self.pending = Some(pending);

        let (cancel_tx, cancel_rx) = oneshot::channel();
        self.cancel_escalation = Some(cancel_tx);

        let escalation = Escalation {
            bus: Arc::clone(&self.bus),
            led: Arc::clone(&self.led),
            panic_delay: self.panic_delay,
            core_dump_delay: self.core_dump_delay,
            want_enabled: enabled,
        };
        tokio::spawn(escalation.run(reply, cancel_rx, replies));
    }

    /// Apply a `UiState` produced by the spawned [`Escalation`] task (read
    /// off the `replies` channel passed to [`Self::request`]). This is the
    /// production path; [`Self::on_reply`] exists for driving the same
    /// transition synchronously in tests.
    pub fn apply(&mut self, state: UiState) {
        self.ui_state = state;
        if state != UiState::Error {
            self.panic_delay = PANIC_DELAY_INITIAL;
        } else {
            self.panic_delay = (self.panic_delay.mul_f64(PANIC_DELAY_DECAY)).max(PANIC_DELAY_FLOOR);
        }
    }

    /// Called by the task in [`Escalation::run`] once it knows the outcome,
    /// via whatever channel the caller wired `replies` to. Kept separate so
    /// unit tests can drive the state transition without spawning a task.
    pub fn on_reply(&mut self, result: Result<(), CompositorError>, requested: bool) {
        self.pending = None;
        match result {
            Ok(()) => {
                self.ui_state = if requested { UiState::Enabled } else { UiState::Disabled };
                self.panic_delay = PANIC_DELAY_INITIAL;
                self.led.deactivate(LedPattern::CompositorBlankFailed);
                self.led.deactivate(LedPattern::CompositorUnblankFailed);
                self.led.deactivate(LedPattern::CompositorKillInProgress);
            }
            Err(CompositorError::Cancelled) => {
                debug!("compositor call superseded");
            }
            Err(err) => {
                warn!(?err, "compositor call failed");
                self.ui_state = UiState::Error;
                self.panic_delay = (self.panic_delay.mul_f64(PANIC_DELAY_DECAY)).max(PANIC_DELAY_FLOOR);
            }
        }
    }
}

struct Escalation {
    bus: Arc<dyn BusTransport>,
    led: Arc<dyn LedEngine>,
    panic_delay: Duration,
    core_dump_delay: Duration,
    want_enabled: bool,
}

impl Escalation {
    /// Races the compositor's reply against the four escalation deadlines
    /// (spec §4.6, scenario §8.3: 15s/30s/55s/60s from request start). Any
    /// step returns as soon as the reply arrives or the request is
    /// superseded; only a truly silent compositor walks the full chain.
    async fn run(
        self,
        reply: futures::future::BoxFuture<'static, Result<(), CompositorError>>,
        mut cancel: oneshot::Receiver<()>,
        replies: tokio::sync::mpsc::Sender<UiState>,
    ) {
        let panic_pattern = if self.want_enabled {
            LedPattern::CompositorUnblankFailed
        } else {
            LedPattern::CompositorBlankFailed
        };
        let start = tokio::time::Instant::now();
        tokio::pin!(reply);

        macro_rules! race_until {
            ($deadline:expr) => {
                tokio::select! {
                    _ = &mut cancel => return,
                    result = &mut reply => {
                        self.finish(result, &replies, panic_pattern).await;
                        return;
                    }
                    _ = tokio::time::sleep_until(start + $deadline) => {}
                }
            };
        }

        race_until!(self.panic_delay);
        self.led.activate(panic_pattern);
        info!(delay = ?self.panic_delay, "compositor unresponsive, panic LED activated");

        if self.core_dump_delay.is_zero() {
            // Core-dump step disabled; still wait on reply/cancel indefinitely
            // (bounded upstream by the 120s method-call timeout).
            tokio::select! {
                _ = &mut cancel => { self.led.deactivate(panic_pattern); return; }
                result = &mut reply => { self.finish(result, &replies, panic_pattern).await; return; }
            }
        }

        race_until!(self.core_dump_delay);
        if let Some(pid) = self.bus.compositor_pid() {
            if !ptrace_attached(pid as libc::pid_t) {
                // Safety: pid was just resolved as the current compositor
                // bus-name owner; sending SIGXCPU+SIGCONT to elicit a core
                // dump is the documented recovery action (spec §4.6 step 2).
                unsafe {
                    libc::kill(pid as libc::pid_t, libc::SIGXCPU);
                    libc::kill(pid as libc::pid_t, libc::SIGCONT);
                }
                info!(pid, "sent SIGXCPU+SIGCONT to unresponsive compositor");
            }
        }

        race_until!(self.core_dump_delay + KILL_DELAY);
        if let Some(pid) = self.bus.compositor_pid() {
            // Safety: see above.
            unsafe {
                libc::kill(pid as libc::pid_t, libc::SIGKILL);
            }
            info!(pid, "sent SIGKILL to unresponsive compositor");
            self.led.activate(LedPattern::CompositorKillInProgress);
        }

        race_until!(self.core_dump_delay + KILL_DELAY + VERIFY_DELAY);
        if !self.bus.compositor_present() {
            info!("verified compositor is gone");
        }
        self.led.deactivate(LedPattern::CompositorKillInProgress);
        self.led.deactivate(panic_pattern);

        // Compositor never replied and is still a bus peer; fall back to
        // treating it as absent so the DSM can make forward progress
        // (spec §8 scenario 3: "mediator returns to unknown").
        let _ = replies.send(UiState::Unknown).await;
    }

    async fn finish(
        &self,
        result: Result<(), CompositorError>,
        replies: &tokio::sync::mpsc::Sender<UiState>,
        panic_pattern: LedPattern,
    ) {
        self.led.deactivate(panic_pattern);
        self.led.deactivate(LedPattern::CompositorKillInProgress);
        let state = match result {
            Ok(()) if self.want_enabled => UiState::Enabled,
            Ok(()) => UiState::Disabled,
            Err(CompositorError::Cancelled) => return,
            Err(_) => UiState::Error,
        };
        let _ = replies.send(state).await;
    }
}

/// `PTRACE_ATTACH`/`PTRACE_DETACH` probe (spec §4.6 step 2): if attaching
/// fails with `EPERM`, something (a debugger) already holds the process.
fn ptrace_attached(pid: libc::pid_t) -> bool {
    // Safety: PTRACE_ATTACH/PTRACE_DETACH take only a pid, no memory is
    // touched on either side of the call.
    unsafe {
        if libc::ptrace(libc::PTRACE_ATTACH, pid, std::ptr::null_mut::<libc::c_void>(), std::ptr::null_mut::<libc::c_void>()) != 0 {
            return true;
        }
        libc::ptrace(libc::PTRACE_DETACH, pid, std::ptr::null_mut::<libc::c_void>(), std::ptr::null_mut::<libc::c_void>());
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::led::LoggingLedEngine;

    struct StubBus;
    impl BusTransport for StubBus {
        fn call_set_updates_enabled(
            &self,
            _enabled: bool,
        ) -> (PendingCall, futures::future::BoxFuture<'static, Result<(), CompositorError>>) {
            unimplemented!("driven directly via on_reply in these tests")
        }
        fn compositor_pid(&self) -> Option<u32> {
            None
        }
        fn compositor_present(&self) -> bool {
            false
        }
        fn emit_display_status_ind(&self, _collapsed_state: &str) {}
        fn emit_fader_opacity_ind(&self, _percent: u8, _duration_ms: u32) {}
    }

    #[test]
    fn successful_ack_sets_enabled_and_resets_panic_delay() {
        let mut mediator = CompositorMediator::new(Arc::new(StubBus), Arc::new(LoggingLedEngine::default()), Duration::from_secs(30));
        mediator.panic_delay = PANIC_DELAY_FLOOR;
        mediator.on_reply(Ok(()), true);
        assert_eq!(mediator.ui_state(), UiState::Enabled);
        assert_eq!(mediator.panic_delay, PANIC_DELAY_INITIAL);
    }

    #[test]
    fn failure_sets_error_state_and_decays_panic_delay_toward_floor() {
        let mut mediator = CompositorMediator::new(Arc::new(StubBus), Arc::new(LoggingLedEngine::default()), Duration::from_secs(30));
        mediator.on_reply(Err(CompositorError::MethodFailed("timeout".into())), false);
        assert_eq!(mediator.ui_state(), UiState::Error);
        assert!(mediator.panic_delay < PANIC_DELAY_INITIAL);
        assert!(mediator.panic_delay >= PANIC_DELAY_FLOOR);
    }

    #[test]
    fn cancelled_reply_leaves_ui_state_untouched() {
        let mut mediator = CompositorMediator::new(Arc::new(StubBus), Arc::new(LoggingLedEngine::default()), Duration::from_secs(30));
        mediator.ui_state = UiState::Enabled;
        mediator.on_reply(Err(CompositorError::Cancelled), true);
        assert_eq!(mediator.ui_state(), UiState::Enabled);
    }
}
