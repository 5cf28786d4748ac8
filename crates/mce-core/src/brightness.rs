//! Brightness engine (C4, spec §4.4).
//!
//! Timestamp-interpolated fader: the armed [`FadeRecord`] carries absolute
//! start/end instants so timer jitter cannot produce overshoot (§4.4 step 4).
//! While any fade timer is armed, process scheduling is elevated to
//! `SCHED_FIFO` at mid-priority; elevations are ref-counted because two
//! overlapping fades (one superseding another before the first timer drops)
//! must not restore the prior class until both have let go (§4.4 step 5).

use crate::brightness_curve::BrightnessCurve;
use crate::bus_transport::BusTransport;
use crate::types::{FadeRecord, FadeType};
use futures::StreamExt;
use mce_runtime::timer::TimerPool;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Minimum timer tick (§4.4 step 3/4): below this, or within one level of
/// target, writes go out immediately with no timer.
const MIN_TICK: Duration = Duration::from_millis(4);
const MIN_TICK_MULTIPLE: u32 = 3;
const STEPS: u32 = 32;
const SCHED_FIFO_PRIORITY: i32 = 20;

struct SchedElevation {
    refs: AtomicU32,
    previous: std::sync::Mutex<Option<(i32, libc::sched_param)>>,
}

impl SchedElevation {
    fn new() -> Self {
        Self {
            refs: AtomicU32::new(0),
            previous: std::sync::Mutex::new(None),
        }
    }

    fn acquire(&self) {
        if self.refs.fetch_add(1, Ordering::SeqCst) == 0 {
            self.elevate();
        }
    }

    fn release(&self) {
        if self.refs.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.restore();
        }
    }

    fn elevate(&self) {
        // Safety: sched_getparam/sched_setscheduler operate on the calling
        // process (pid 0) and only touch the scheduling class, never memory.
        unsafe {
            let policy = libc::sched_getscheduler(0);
            let mut param: libc::sched_param = std::mem::zeroed();
            libc::sched_getparam(0, &mut param);
            *self.previous.lock().unwrap() = Some((policy, param));

            let mut fifo_param: libc::sched_param = std::mem::zeroed();
            fifo_param.sched_priority = SCHED_FIFO_PRIORITY;
            if libc::sched_setscheduler(0, libc::SCHED_FIFO, &fifo_param) != 0 {
                warn!("failed to elevate scheduling class for brightness fade, degrading silently");
            }
        }
    }

    fn restore(&self) {
        if let Some((policy, param)) = self.previous.lock().unwrap().take() {
            // Safety: see `elevate`.
            unsafe {
                libc::sched_setscheduler(0, policy, &param);
            }
        }
    }
}

/// RAII guard releasing one reference to the process-wide scheduling
/// elevation when a fade's timer loop exits.
struct ElevationGuard(Arc<SchedElevation>);

impl Drop for ElevationGuard {
    fn drop(&mut self) {
        self.0.release();
    }
}

pub struct BrightnessEngine {
    curve: Arc<dyn BrightnessCurve>,
    bus: Arc<dyn BusTransport>,
    timers: TimerPool,
    elevation: Arc<SchedElevation>,
    current: u32,
    max: u32,
    running: Option<FadeRecord>,
}

impl BrightnessEngine {
    pub fn new(curve: Arc<dyn BrightnessCurve>, bus: Arc<dyn BusTransport>) -> Self {
        let max = curve.max_level();
        Self {
            curve,
            bus,
            timers: TimerPool::new(),
            elevation: Arc::new(SchedElevation::new()),
            current: 0,
            max,
            running: None,
        }
    }

    pub fn current(&self) -> u32 {
        self.current
    }

    pub fn max(&self) -> u32 {
        self.max
    }

    /// `on = min(max*0.30, on/2)` clamped to ≥ 1, plus the fader-opacity
    /// signal when hardware dimming alone would not be perceptible (§4.4).
    pub fn dim_level(&self, on_level: u32) -> u32 {
        let dim = ((self.max as f64 * 0.30).min(on_level as f64 / 2.0)) as u32;
        let dim = dim.max(1);
        if on_level.saturating_sub(dim) < (self.max as f64 * 0.10) as u32 {
            self.bus.emit_fader_opacity_ind(50, 0);
        }
        dim
    }

    /// §4.4 algorithm. Returns once the fade has either completed
    /// immediately (no timer needed) or been armed; callers that need to
    /// know about completion poll [`Self::is_complete`].
    pub async fn set_fade(&mut self, ty: FadeType, target_level: u32, duration_ms: u32) -> Result<(), FadeRejected> {
        let target_level = target_level.clamp(0, self.max);

        if let Some(running) = &self.running {
            if !running.ty.can_preempt(ty) {
                return Err(FadeRejected);
            }
        }

        if self.current == target_level {
            self.cancel();
            return Ok(());
        }

        let delta = (self.current as i64 - target_level as i64).unsigned_abs() as u32;
        let effective_duration = Duration::from_millis(duration_ms as u64);
        if delta <= 1 || effective_duration < MIN_TICK * MIN_TICK_MULTIPLE {
            self.write_immediate(target_level);
            return Ok(());
        }

        let now = Instant::now();
        let record = FadeRecord {
            ty,
            start_level: self.current,
            end_level: target_level,
            start_tick: now,
            end_tick: now + effective_duration,
        };
        self.running = Some(record);
        self.arm_timer(record, effective_duration).await;
        Ok(())
    }

    fn write_immediate(&mut self, level: u32) {
        if let Err(err) = self.curve.write_level(level) {
            warn!(?err, "failed to write brightness level");
        }
        self.current = level;
        self.running = None;
    }

    async fn arm_timer(&mut self, record: FadeRecord, duration: Duration) {
        self.elevation.acquire();
        let _guard = ElevationGuard(Arc::clone(&self.elevation));

        let tick = (duration / STEPS).max(MIN_TICK);
        let mut watch = self.timers.periodic(tick, tick).await;
        loop {
            match watch.next().await {
                Some(()) => {
                    let now = Instant::now();
                    let level = record.level_at(now);
                    if let Err(err) = self.curve.write_level(level) {
                        warn!(?err, "failed to write interpolated brightness level");
                    }
                    self.current = level;
                    if record.is_complete(now) {
                        self.running = None;
                        self.timers.cancel();
                        return;
                    }
                }
                None => {
                    self.running = None;
                    return;
                }
            }
        }
    }

    pub fn cancel(&mut self) {
        self.timers.cancel();
        self.running = None;
    }

    pub fn is_complete(&self, now: Instant) -> bool {
        self.running.map(|r| r.is_complete(now)).unwrap_or(true)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FadeRejected;

impl std::fmt::Display for FadeRejected {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "fade rejected: ongoing fade does not permit preemption")
    }
}

impl std::error::Error for FadeRejected {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brightness_curve::BrightnessCurveError;
    use std::sync::Mutex as StdMutex;

    struct FakeCurve {
        max: u32,
        written: StdMutex<Vec<u32>>,
    }

    impl BrightnessCurve for FakeCurve {
        fn max_level(&self) -> u32 {
            self.max
        }
        fn write_level(&self, level: u32) -> Result<(), BrightnessCurveError> {
            self.written.lock().unwrap().push(level);
            Ok(())
        }
        fn set_hw_fading(&self, _enabled: bool) {}
    }

    struct NoopBus;
    impl BusTransport for NoopBus {
        fn call_set_updates_enabled(
            &self,
            _enabled: bool,
        ) -> (crate::bus_transport::PendingCall, futures::future::BoxFuture<'static, Result<(), crate::error::CompositorError>>) {
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

    #[tokio::test(start_paused = true)]
    async fn tiny_delta_writes_immediately_without_timer() {
        let curve = Arc::new(FakeCurve { max: 100, written: StdMutex::new(vec![]) });
        let mut engine = BrightnessEngine::new(curve.clone(), Arc::new(NoopBus));
        engine.set_fade(FadeType::Default, 1, 250).await.unwrap();
        assert_eq!(curve.written.lock().unwrap().as_slice(), &[1]);
    }

    #[test]
    fn dim_level_is_never_below_one() {
        let curve = Arc::new(FakeCurve { max: 100, written: StdMutex::new(vec![]) });
        let engine = BrightnessEngine::new(curve, Arc::new(NoopBus));
        assert_eq!(engine.dim_level(1), 1);
    }

    #[test]
    fn blank_fade_rejects_als_preemption() {
        let curve = Arc::new(FakeCurve { max: 100, written: StdMutex::new(vec![]) });
        let mut engine = BrightnessEngine::new(curve, Arc::new(NoopBus));
        engine.running = Some(FadeRecord {
            ty: FadeType::Blank,
            start_level: 50,
            end_level: 0,
            start_tick: Instant::now(),
            end_tick: Instant::now() + Duration::from_millis(100),
        });
        let result = futures::executor::block_on(engine.set_fade(FadeType::Als, 10, 100));
        assert!(result.is_err());
    }
}
