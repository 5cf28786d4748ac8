//! Frame-buffer power gate (C3, spec §4.3).
//!
//! Three interchangeable backends are selected once at init by probing the
//! device (`FbBackend` trait); a dedicated reader task blocks on the kernel's
//! `wait_for_fb_wake`/`wait_for_fb_sleep` notification paths and forwards a
//! one-byte event to the scheduler, mirroring the teacher's
//! `wait::OwnedWaitHandle` pattern (a blocking-by-nature kernel primitive
//! wrapped so the rest of the crate only ever sees an async event feed). If
//! no reader task can be started the gate degrades to synchronous mode: the
//! backend call itself is assumed to complete the transition.

use crate::error::FbError;
use crate::led::{LedEngine, LedPattern};
use mce_runtime::timer::TimerPool;
use std::fs::OpenOptions;
use std::io::Read;
use std::os::fd::{AsRawFd, RawFd};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tracing::{error, warn};

/// 1-second watchdog before the panic LED activates (spec §4.3).
const WATCHDOG: Duration = Duration::from_secs(1);

/// Minimum and maximum grace period the fb holder keeps the device open
/// across process exit (spec §4.3: "≥ 0.5 s and ≥ 6 s since shutdown start").
const HOLDER_MIN_GRACE: Duration = Duration::from_millis(500);
const HOLDER_SINCE_SHUTDOWN: Duration = Duration::from_secs(6);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FbFact {
    Awake,
    Suspended,
}

/// A single backend call. Implementations may block briefly (an ioctl) but
/// must not themselves wait for the kernel-side transition to finish — that
/// is the reader task's job.
pub trait FbBackend: Send + Sync {
    fn power_up(&self) -> Result<(), FbError>;
    fn power_down(&self) -> Result<(), FbError>;

    /// The open frame-buffer file descriptor, if this backend holds one.
    /// Used by the shutdown path (C9) to fork [`spawn_holder`] so the panel
    /// stays powered across this process's own exit.
    fn raw_fd(&self) -> Option<RawFd> {
        None
    }
}

/// Direct `FBIOBLANK` ioctl against an open frame-buffer device file.
pub struct IoctlBackend {
    fd: RawFd,
}

// From <linux/fb.h>.
const FB_BLANK_UNBLANK: i32 = 0;
const FB_BLANK_POWERDOWN: i32 = 4;
const FBIOBLANK: libc::c_ulong = 0x4611;

impl IoctlBackend {
    pub fn open(device: impl Into<PathBuf>) -> Result<Self, FbError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(device.into())
            .map_err(FbError::Ioctl)?;
        // Leak the fd deliberately: the device stays open for the process
        // lifetime (and beyond, via the holder fork in `spawn_holder`).
        let fd = file.as_raw_fd();
        std::mem::forget(file);
        Ok(Self { fd })
    }
}

impl FbBackend for IoctlBackend {
    fn power_up(&self) -> Result<(), FbError> {
        ioctl_blank(self.fd, FB_BLANK_UNBLANK)
    }

    fn power_down(&self) -> Result<(), FbError> {
        ioctl_blank(self.fd, FB_BLANK_POWERDOWN)
    }

    fn raw_fd(&self) -> Option<RawFd> {
        Some(self.fd)
    }
}

fn ioctl_blank(fd: RawFd, mode: i32) -> Result<(), FbError> {
    // Safety: fd is a valid, open frame-buffer device file for the lifetime
    // of `IoctlBackend`; FBIOBLANK takes an integer mode, not a pointed-to
    // struct, so passing `mode` by value is the documented call shape.
    let ret = unsafe { libc::ioctl(fd, FBIOBLANK as _, mode as libc::c_long) };
    if ret < 0 {
        Err(FbError::Ioctl(std::io::Error::last_os_error()))
    } else {
        Ok(())
    }
}

/// No-op backend for platforms where the compositor (or firmware) owns
/// panel power entirely; the gate still runs the watchdog/reader-task
/// plumbing so the rest of the DSM is unaffected by the choice of backend.
#[derive(Default)]
pub struct NoopBackend;

impl FbBackend for NoopBackend {
    fn power_up(&self) -> Result<(), FbError> {
        Ok(())
    }

    fn power_down(&self) -> Result<(), FbError> {
        Ok(())
    }
}

pub struct FbGate {
    backend: Arc<dyn FbBackend>,
    led: Arc<dyn LedEngine>,
    timers: Mutex<TimerPool>,
    events: mpsc::Receiver<FbFact>,
    /// `None` when no reader task is running: the gate then treats a
    /// completed backend call as an immediate, synchronous fact update
    /// (spec §4.3: "the ioctl/HAL call is assumed to complete the
    /// transition").
    reader_present: bool,
}

impl FbGate {
    /// `wake_path`/`sleep_path` are the kernel notification files; pass
    /// `None` for either (or both) to run without a reader task.
    pub fn new(
        backend: Arc<dyn FbBackend>,
        led: Arc<dyn LedEngine>,
        wake_path: Option<PathBuf>,
        sleep_path: Option<PathBuf>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(8);
        let reader_present = wake_path.is_some() || sleep_path.is_some();
        if let Some(path) = wake_path {
            spawn_reader(path, FbFact::Awake, tx.clone());
        }
        if let Some(path) = sleep_path {
            spawn_reader(path, FbFact::Suspended, tx);
        }
        Self {
            backend,
            led,
            timers: Mutex::new(TimerPool::default()),
            events: rx,
            reader_present,
        }
    }

    /// The backend's open frame-buffer fd, if any (see [`FbBackend::raw_fd`]).
    pub fn raw_fd(&self) -> Option<RawFd> {
        self.backend.raw_fd()
    }

    /// Power the panel up and wait for the fact to settle, activating the
    /// resume panic LED if the kernel has not reported awake after
    /// [`WATCHDOG`].
    pub async fn power_up(&mut self) -> Result<(), FbError> {
        self.backend.power_up()?;
        self.wait_for(FbFact::Awake, LedPattern::PowerUpFailed).await
    }

    pub async fn power_down(&mut self) -> Result<(), FbError> {
        self.backend.power_down()?;
        self.wait_for(FbFact::Suspended, LedPattern::PowerDownFailed)
            .await
    }

    async fn wait_for(&mut self, want: FbFact, watchdog_pattern: LedPattern) -> Result<(), FbError> {
        if !self.reader_present {
            return Ok(());
        }

        let watch = {
            let mut timers = self.timers.lock().await;
            timers.oneshot(WATCHDOG).await
        };
        tokio::pin!(watch);

        loop {
            tokio::select! {
                fact = self.events.recv() => {
                    match fact {
                        Some(fact) if fact == want => {
                            self.led.deactivate(watchdog_pattern);
                            return Ok(());
                        }
                        Some(_) => continue,
                        None => return Err(FbError::Timeout),
                    }
                }
                _ = &mut watch => {
                    warn!(?watchdog_pattern, "frame buffer transition watchdog expired");
                    self.led.activate(watchdog_pattern);
                    // Keep waiting; the LED stays lit until the kernel
                    // eventually reports the fact or the process exits.
                    let fact = self.events.recv().await;
                    match fact {
                        Some(fact) if fact == want => {
                            self.led.deactivate(watchdog_pattern);
                            return Ok(());
                        }
                        Some(_) => continue,
                        None => return Err(FbError::Timeout),
                    }
                }
            }
        }
    }
}

fn spawn_reader(path: PathBuf, fact: FbFact, tx: mpsc::Sender<FbFact>) {
    // These kernel files block on read until the transition occurs; they
    // cannot be driven by a non-blocking poll, so the read happens on a
    // blocking-pool thread exactly as the teacher's Windows threadpool wait
    // callback runs off the async executor.
    tokio::task::spawn_blocking(move || loop {
        let mut file = match std::fs::File::open(&path) {
            Ok(file) => file,
            Err(err) => {
                warn!(?err, path = %path.display(), "failed to open kernel notification path");
                return;
            }
        };
        let mut buf = [0u8; 1];
        match file.read(&mut buf) {
            Ok(_) => {
                if tx.blocking_send(fact).is_err() {
                    return;
                }
            }
            Err(err) => {
                error!(?err, path = %path.display(), "kernel notification read failed");
                return;
            }
        }
    });
}

/// Fork a detached process that holds the frame-buffer device open across
/// this process's exit, per spec §4.3: keeps the panel powered for a short
/// grace period after shutdown so the last frame does not visibly glitch.
///
/// # Safety
/// Must be called before any additional threads that are not fork-safe are
/// spawned, and only once, from the shutdown path (C9) when the shutting-down
/// latch is first set.
pub unsafe fn spawn_holder(fb_fd: RawFd) {
    let grace = HOLDER_MIN_GRACE.max(HOLDER_SINCE_SHUTDOWN);
    match libc::fork() {
        -1 => {
            warn!("failed to fork frame buffer holder process");
        }
        0 => {
            // Child: close stdin/stdout (and the fb fd if it happens to
            // alias one of them) but keep stderr open, per spec.
            for fd in 0..2 {
                if fd != fb_fd {
                    libc::close(fd);
                }
            }
            libc::sleep(grace.as_secs() as libc::c_uint);
            libc::_exit(0);
        }
        _child_pid => {
            // Parent continues its own teardown; the child is left to be
            // reaped by init once it exits.
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn synchronous_mode_returns_immediately_without_reader() {
        let mut gate = FbGate::new(Arc::new(NoopBackend), Arc::new(crate::led::LoggingLedEngine::default()), None, None);
        gate.power_up().await.unwrap();
        gate.power_down().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn waits_for_matching_fact_from_reader() {
        let (tx, rx) = mpsc::channel(8);
        let led = Arc::new(crate::led::LoggingLedEngine::default());
        let mut gate = FbGate {
            backend: Arc::new(NoopBackend),
            led: led.clone(),
            timers: Mutex::new(TimerPool::default()),
            events: rx,
            reader_present: true,
        };
        tokio::spawn(async move {
            tx.send(FbFact::Awake).await.unwrap();
        });
        gate.power_up().await.unwrap();
    }
}
