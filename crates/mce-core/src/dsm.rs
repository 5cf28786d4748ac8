//! Display state machine (C8, spec §4.8). Twenty fine-grained phases drive
//! the visible `(current, target)` pair; a single cooperative async function
//! walks the phase graph, `.await`-ing exactly at the four suspension points
//! spec §5 names (`WAIT_FADE_TO_TARGET/BLACK`, `WAIT_SUSPEND/RESUME`,
//! `RENDERER_WAIT_START/STOP`) and running every other phase to completion
//! before looping — the async equivalent of "runs to fixpoint, then yields".

use crate::brightness::BrightnessEngine;
use crate::compositor::CompositorMediator;
use crate::fb::FbGate;
use crate::types::{DisplayState, FadeType, SuspendLevel, UiState};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::{mpsc, watch};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DsmPhase {
    Unset,
    RendererInitStart,
    RendererWaitStart,
    EnterPowerOn,
    StayPowerOn,
    LeavePowerOn,
    RendererInitStop,
    RendererWaitStop,
    WaitFadeToBlack,
    WaitFadeToTarget,
    InitSuspend,
    WaitSuspend,
    EnterPowerOff,
    StayPowerOff,
    LeavePowerOff,
    InitResume,
    WaitResume,
    EnterLogicalOff,
    StayLogicalOff,
    LeaveLogicalOff,
}

/// Display wake-lock: single reference per process (spec §5 "Shared
/// resources"). Acquired whenever the DSM schedules a rethink, released only
/// once `STAY_POWER_OFF` is reached under LATE-allowed conditions.
#[derive(Default)]
pub struct DisplayWakeLock {
    held: AtomicU32,
}

impl DisplayWakeLock {
    pub fn acquire(&self) {
        self.held.fetch_add(1, Ordering::SeqCst);
    }

    pub fn release(&self) {
        self.held.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| {
            Some(v.saturating_sub(1))
        })
        .ok();
    }

    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::SeqCst) != 0
    }
}

/// Effectors and inputs the fixpoint loop reads/drives. `suspend_level` and
/// `fb_started` are supplied by the caller (the suspend oracle C7 and the
/// wiring in `mced`) rather than recomputed here — the DSM only needs the
/// result, not the predicates behind it.
pub struct DisplayStateMachine {
    pub phase: DsmPhase,
    pub current: DisplayState,
    target: watch::Receiver<DisplayState>,
    display_state_tx: watch::Sender<DisplayState>,
    compositor: CompositorMediator,
    compositor_replies: mpsc::Receiver<UiState>,
    compositor_available: watch::Receiver<bool>,
    fb: FbGate,
    brightness: BrightnessEngine,
    wake_lock: Arc<DisplayWakeLock>,
    suspend_level: watch::Receiver<SuspendLevel>,
    reannounce: watch::Receiver<bool>,
    touch_lock: watch::Receiver<bool>,
    resume_level: u32,
}

impl DisplayStateMachine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        target: watch::Receiver<DisplayState>,
        display_state_tx: watch::Sender<DisplayState>,
        compositor: CompositorMediator,
        compositor_replies: mpsc::Receiver<UiState>,
        compositor_available: watch::Receiver<bool>,
        fb: FbGate,
        brightness: BrightnessEngine,
        wake_lock: Arc<DisplayWakeLock>,
        suspend_level: watch::Receiver<SuspendLevel>,
        reannounce: watch::Receiver<bool>,
        touch_lock: watch::Receiver<bool>,
    ) -> Self {
        Self {
            phase: DsmPhase::Unset,
            current: DisplayState::Undef,
            target,
            display_state_tx,
            compositor,
            compositor_replies,
            compositor_available,
            fb,
            brightness,
            wake_lock,
            suspend_level,
            reannounce,
            touch_lock,
            resume_level: 1,
        }
    }

    fn want(&self) -> DisplayState {
        *self.target.borrow()
    }

    fn publish_transient(&self, state: DisplayState) {
        let _ = self.display_state_tx.send(state);
    }

    fn publish_stable(&mut self, state: DisplayState) {
        self.current = state;
        let _ = self.display_state_tx.send(state);
        debug!(%state, "display state committed");
    }

    fn needs_power(state: DisplayState) -> bool {
        matches!(state, DisplayState::On | DisplayState::Dim | DisplayState::LpmOn)
    }

    /// Drives the fixpoint loop forever. Each iteration runs phases to
    /// completion until one of the four suspension points is reached, then
    /// `.await`s there; on wake it resumes the same phase loop.
    pub async fn run(mut self) -> ! {
        loop {
            self.step_to_fixpoint().await;
        }
    }

    async fn step_to_fixpoint(&mut self) {
        loop {
            match self.phase {
                DsmPhase::Unset => {
                    if self.want() != DisplayState::Undef {
                        self.wake_lock.acquire();
                        self.phase = DsmPhase::RendererInitStart;
                    } else {
                        return;
                    }
                }
                DsmPhase::RendererInitStart => {
                    if !*self.compositor_available.borrow() {
                        self.phase = DsmPhase::WaitFadeToTarget;
                    } else {
                        let (tx, rx) = mpsc::channel(1);
                        self.compositor.request(true, tx);
                        self.compositor_replies = rx;
                        self.phase = DsmPhase::RendererWaitStart;
                        return;
                    }
                }
                DsmPhase::RendererWaitStart => {
                    match self.compositor_replies.recv().await {
                        Some(UiState::Enabled) => self.phase = DsmPhase::WaitFadeToTarget,
                        _ => self.phase = DsmPhase::RendererInitStart,
                    }
                }
                DsmPhase::WaitFadeToTarget => {
                    if matches!(self.current, DisplayState::On | DisplayState::Dim) {
                        self.phase = DsmPhase::EnterPowerOn;
                    } else {
                        let target = self.want();
                        let level = if target == DisplayState::Dim { self.resume_level / 2 } else { self.resume_level };
                        let _ = self.brightness.set_fade(FadeType::Unblank, level.max(1), 90).await;
                        self.phase = DsmPhase::EnterPowerOn;
                    }
                }
                DsmPhase::EnterPowerOn => {
                    let target = self.want();
                    self.publish_stable(target);
                    self.phase = DsmPhase::StayPowerOn;
                }
                DsmPhase::StayPowerOn => {
                    let reannounce = *self.reannounce.borrow();
                    if self.want() != self.current || reannounce {
                        self.phase = DsmPhase::LeavePowerOn;
                    } else {
                        return;
                    }
                }
                DsmPhase::LeavePowerOn => {
                    self.publish_transient(DisplayState::PowerDown);
                    // Pre-commit the resume level now so the first frame
                    // after a future resume has a valid level (spec §4.8
                    // "Brightness coupling").
                    self.resume_level = self.brightness.current().max(1);
                    if Self::needs_power(self.want()) {
                        self.phase = DsmPhase::RendererInitStart;
                    } else {
                        self.phase = DsmPhase::WaitFadeToBlack;
                    }
                }
                DsmPhase::WaitFadeToBlack => {
                    let _ = self.brightness.set_fade(FadeType::Blank, 0, 100).await;
                    self.phase = DsmPhase::RendererInitStop;
                }
                DsmPhase::RendererInitStop => {
                    if !*self.compositor_available.borrow() {
                        self.phase = DsmPhase::EnterLogicalOff;
                    } else {
                        let (tx, rx) = mpsc::channel(1);
                        self.compositor.request(false, tx);
                        self.compositor_replies = rx;
                        self.phase = DsmPhase::RendererWaitStop;
                        return;
                    }
                }
                DsmPhase::RendererWaitStop => {
                    match self.compositor_replies.recv().await {
                        Some(UiState::Disabled) => self.phase = DsmPhase::InitSuspend,
                        _ => self.phase = DsmPhase::RendererInitStop,
                    }
                }
                DsmPhase::InitSuspend => {
                    let allowed = *self.suspend_level.borrow();
                    if allowed >= SuspendLevel::Early {
                        self.phase = DsmPhase::WaitSuspend;
                        return;
                    } else {
                        self.phase = DsmPhase::EnterLogicalOff;
                    }
                }
                DsmPhase::WaitSuspend => {
                    if self.fb.power_down().await.is_ok() {
                        self.phase = DsmPhase::EnterPowerOff;
                    }
                }
                DsmPhase::EnterPowerOff => {
                    let target = self.want();
                    self.publish_stable(target);
                    self.phase = DsmPhase::StayPowerOff;
                }
                DsmPhase::StayPowerOff => {
                    let allowed = *self.suspend_level.borrow();
                    if self.want() != self.current || allowed < SuspendLevel::Early {
                        self.phase = DsmPhase::LeavePowerOff;
                        continue;
                    }
                    if allowed == SuspendLevel::Late {
                        self.wake_lock.release();
                    } else {
                        self.wake_lock.acquire();
                    }
                    return;
                }
                DsmPhase::LeavePowerOff => {
                    let allowed = *self.suspend_level.borrow();
                    if Self::needs_power(self.want()) || allowed < SuspendLevel::Early {
                        self.phase = DsmPhase::InitResume;
                    } else {
                        self.phase = DsmPhase::EnterLogicalOff;
                    }
                }
                DsmPhase::InitResume => {
                    self.phase = DsmPhase::WaitResume;
                }
                DsmPhase::WaitResume => {
                    if self.fb.power_up().await.is_ok() {
                        if self.brightness.current() == 0 {
                            let _ = self.brightness.set_fade(FadeType::Unblank, 1, 0).await;
                        }
                        self.phase = DsmPhase::RendererInitStart;
                    } else if !Self::needs_power(self.want()) {
                        self.phase = DsmPhase::EnterLogicalOff;
                    }
                }
                DsmPhase::EnterLogicalOff => {
                    self.phase = DsmPhase::StayLogicalOff;
                }
                DsmPhase::StayLogicalOff => {
                    let allowed = *self.suspend_level.borrow();
                    if self.want() != self.current || allowed >= SuspendLevel::Early {
                        self.phase = DsmPhase::LeaveLogicalOff;
                    } else if *self.reannounce.borrow() && *self.compositor_available.borrow() {
                        self.phase = DsmPhase::RendererInitStop;
                    } else {
                        return;
                    }
                }
                DsmPhase::LeaveLogicalOff => {
                    if self.want() != self.current {
                        self.phase = DsmPhase::RendererInitStart;
                    } else {
                        self.phase = DsmPhase::InitSuspend;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus_transport::{BusTransport, PendingCall};
    use crate::error::CompositorError;
    use crate::fb::NoopBackend;
    use crate::led::LoggingLedEngine;
    use std::time::Duration;

    struct NoopBus;
    impl BusTransport for NoopBus {
        fn call_set_updates_enabled(
            &self,
            _enabled: bool,
        ) -> (PendingCall, futures::future::BoxFuture<'static, Result<(), CompositorError>>) {
            unimplemented!()
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

    fn machine() -> DisplayStateMachine {
        let (_target_tx, target_rx) = watch::channel(DisplayState::Undef);
        let (display_state_tx, _display_state_rx) = watch::channel(DisplayState::Undef);
        let (_replies_tx, replies_rx) = mpsc::channel(1);
        let (_avail_tx, avail_rx) = watch::channel(false);
        let (_susp_tx, susp_rx) = watch::channel(SuspendLevel::Late);
        let (_re_tx, re_rx) = watch::channel(false);
        let (_tl_tx, tl_rx) = watch::channel(false);
        let bus = Arc::new(NoopBus);
        let led = Arc::new(LoggingLedEngine::default());
        DisplayStateMachine::new(
            target_rx,
            display_state_tx,
            CompositorMediator::new(bus.clone(), led.clone(), Duration::from_secs(30)),
            replies_rx,
            avail_rx,
            FbGate::new(Arc::new(NoopBackend), led, None, None),
            BrightnessEngine::new(Arc::new(crate::brightness_curve::SysfsBrightnessCurve::probe("/nonexistent")), bus),
            Arc::new(DisplayWakeLock::default()),
            susp_rx,
            re_rx,
            tl_rx,
        )
    }

    #[test]
    fn unset_phase_is_idle_while_target_is_undef() {
        let dsm = machine();
        assert_eq!(dsm.phase, DsmPhase::Unset);
        assert_eq!(dsm.current, DisplayState::Undef);
    }

    #[tokio::test(start_paused = true)]
    async fn first_want_acquires_wake_lock_and_moves_past_unset() {
        let (target_tx, target_rx) = watch::channel(DisplayState::Undef);
        let mut dsm = machine();
        dsm.target = target_rx;
        target_tx.send(DisplayState::On).unwrap();
        dsm.step_to_fixpoint().await;
        assert_ne!(dsm.phase, DsmPhase::Unset);
        assert!(dsm.wake_lock.is_held());
    }
}
