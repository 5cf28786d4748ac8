//! futures

use crate::futures::{FuturesExt as TestFuturesExt, StreamExt as TestStreamExt};
use futures::{future::poll_fn, stream::poll_fn as poll_next_fn, FutureExt, StreamExt};
use std::{
    sync::atomic::{AtomicBool, AtomicU8, Ordering},
    task::Poll,
};

#[test]
fn test_watch_future() {
    let waker = futures::task::noop_waker_ref();
    let mut cx = std::task::Context::from_waker(waker);

    let ready = AtomicBool::new(false);
    let mock = poll_fn(|_cx| match ready.load(Ordering::SeqCst) {
        true => Poll::Ready(42),
        false => Poll::Pending,
    });

    let (mut signal, mut fut) = mock.watch();

    assert!(fut.poll_unpin(&mut cx).is_pending());
    assert!(signal.poll_unpin(&mut cx).is_pending());

    ready.store(true, Ordering::SeqCst);
    assert!(signal.poll_unpin(&mut cx).is_pending());
    assert_eq!(Poll::Ready(42), fut.poll_unpin(&mut cx));
    assert_eq!(Poll::Ready(()), signal.poll_unpin(&mut cx));
}

#[test]
fn test_watch_stream() {
    let waker = futures::task::noop_waker_ref();
    let mut cx = std::task::Context::from_waker(waker);

    let ready = AtomicU8::new(0);
    let mock = poll_next_fn(|_cx| match ready.load(Ordering::SeqCst) {
        0 => Poll::Pending,
        1 => Poll::Ready(Some(42)),
        _ => Poll::Ready(None),
    });

    let (mut signal, mut st) = mock.watch();

    assert!(st.poll_next_unpin(&mut cx).is_pending());
    assert!(signal.poll_unpin(&mut cx).is_pending());

    ready.store(1, Ordering::SeqCst);
    assert_eq!(Poll::Ready(Some(42)), st.poll_next_unpin(&mut cx));
    assert_eq!(Poll::Pending, signal.poll_unpin(&mut cx));

    ready.store(2, Ordering::SeqCst);
    assert!(signal.poll_unpin(&mut cx).is_pending());
    assert_eq!(Poll::Ready(None), st.poll_next_unpin(&mut cx));
    assert_eq!(Poll::Ready(()), signal.poll_unpin(&mut cx));
}

#[test]
#[should_panic(expected = "must not be polled after it returned")]
fn test_watch_future_panics_after_ready() {
    let waker = futures::task::noop_waker_ref();
    let mut cx = std::task::Context::from_waker(waker);
    let (_signal, mut fut) = poll_fn(|_cx| Poll::Ready(())).watch();
    let _ = fut.poll_unpin(&mut cx);
    let _ = fut.poll_unpin(&mut cx);
}
