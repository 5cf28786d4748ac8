//! timer

use crate::timer::TimerPool;
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn oneshot_fires_after_duration() {
    let mut pool = TimerPool::new();
    let watch = pool.oneshot(Duration::from_millis(50)).await;
    let start = tokio::time::Instant::now();
    watch.await;
    assert!(tokio::time::Instant::now() - start >= Duration::from_millis(50));
}

#[tokio::test(start_paused = true)]
async fn rearming_waits_for_previous_timer() {
    let mut pool = TimerPool::new();
    let first = pool.oneshot(Duration::from_millis(10)).await;

    // Drive the first timer to completion in the background.
    let driver = tokio::spawn(first);

    // Arming a second timer should not deadlock: it waits for the pool's
    // bookkeeping signal, which only resolves once `first` is awaited.
    tokio::time::advance(Duration::from_millis(10)).await;
    driver.await.unwrap();
    let second = pool.oneshot(Duration::from_millis(5)).await;
    second.await;
}

#[tokio::test(start_paused = true)]
async fn periodic_ticks_repeatedly() {
    use futures::StreamExt;

    let mut pool = TimerPool::new();
    let mut stream = pool
        .periodic(Duration::from_millis(10), Duration::from_millis(10))
        .await;

    for _ in 0..3 {
        tokio::time::advance(Duration::from_millis(10)).await;
        assert!(stream.next().await.is_some());
    }
}
