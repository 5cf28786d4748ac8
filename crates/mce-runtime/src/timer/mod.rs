//! Oneshot and periodic timers.
//!
//! This is the non-Windows analogue of the teacher's threadpool-timer
//! wrapper: timers are plain futures/streams built on `tokio::time`, and a
//! `TimerPool` enforces the same "only one timer outstanding, rearming waits
//! for the previous one to finish" contract the blanking timer set and
//! brightness fader both rely on (spec §4.4, §4.5).

use crate::futures::{FuturesExt, Signal, StreamExt, Watch};
use futures::Stream;
use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};
use tokio::time::{self, Instant, Sleep};
use tracing::warn;

/// A single-slot pool of timers: arming a new timer while a previous one is
/// still outstanding waits for it to signal completion first.
#[derive(Default)]
pub struct TimerPool {
    armed: Option<Signal>,
}

impl TimerPool {
    pub fn new() -> Self {
        Self { armed: None }
    }

    /// Arm a oneshot timer that fires once after `duration`.
    pub async fn oneshot(&mut self, duration: Duration) -> Watch<OneshotTimer> {
        self.wait_previous().await;
        let (signal, watch) = OneshotTimer::new(duration).watch();
        self.armed = Some(signal);
        watch
    }

    /// Arm a periodic timer, first firing after `due` and then every `period`.
    pub async fn periodic(&mut self, due: Duration, period: Duration) -> Watch<PeriodicTimer> {
        self.wait_previous().await;
        let (signal, watch) = PeriodicTimer::new(due, period).watch();
        self.armed = Some(signal);
        watch
    }

    /// Forget the current timer slot. Callers are expected to drop the
    /// `Watch` they were handed themselves; this only releases the pool's
    /// bookkeeping so the next `oneshot`/`periodic` call does not block.
    pub fn cancel(&mut self) {
        self.armed = None;
    }

    async fn wait_previous(&mut self) {
        if let Some(signal) = self.armed.take() {
            warn!("waiting for previous timer to finish before rearming");
            signal.await;
        }
    }
}

#[derive(Debug)]
#[must_use = "futures do nothing unless you `.await` or poll them"]
pub struct OneshotTimer {
    sleep: Pin<Box<Sleep>>,
}

impl OneshotTimer {
    fn new(duration: Duration) -> Self {
        Self {
            sleep: Box::pin(time::sleep(duration)),
        }
    }
}

impl Future for OneshotTimer {
    type Output = ();
    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.sleep.as_mut().poll(cx)
    }
}

#[derive(Debug)]
#[must_use = "streams do nothing unless polled"]
pub struct PeriodicTimer {
    interval: time::Interval,
}

impl PeriodicTimer {
    fn new(due: Duration, period: Duration) -> Self {
        Self {
            interval: time::interval_at(Instant::now() + due, period),
        }
    }
}

impl Stream for PeriodicTimer {
    type Item = ();
    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.interval.poll_tick(cx).map(|_| Some(()))
    }
}
