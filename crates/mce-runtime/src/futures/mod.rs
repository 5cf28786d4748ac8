//! trait

use futures::Stream;
use std::future::Future;
mod watch;

pub use watch::{Signal, Watch};

impl<T: ?Sized> FuturesExt for T where T: Future {}

impl<T: ?Sized> StreamExt for T where T: Stream {}

pub trait FuturesExt: Future {
    /// Split into a `Signal` that resolves once `self` completes, and a
    /// `Watch` wrapper that drives `self` to completion. Used to find out
    /// whether a fade/timer started earlier is still running before
    /// superseding it.
    fn watch(self) -> (Signal, Watch<Self>)
    where
        Self: Sized,
    {
        Watch::future(self)
    }
}

pub trait StreamExt: Stream {
    fn watch(self) -> (Signal, Watch<Self>)
    where
        Self: Sized,
    {
        Watch::stream(self)
    }
}
