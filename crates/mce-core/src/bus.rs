//! Event bus (C1, spec §4.1).
//!
//! A `Channel<T>` is a topic: publishing runs a chain of *input filters*
//! (each may veto/clip the proposed value) in registration order, commits the
//! filtered result as the cached value, then runs *output triggers* against
//! it. Dispatch is synchronous: a trigger may publish to other channels but
//! must not publish back to the channel it was invoked from — that is
//! detected and turned into a panic rather than a silent infinite loop,
//! mirroring how a misbehaving callback in the teacher's message dispatch
//! would hang the single dispatcher thread instead of corrupting state.

use parking_lot::Mutex;
use std::fmt;

type Filter<T> = Box<dyn Fn(T) -> T + Send + Sync>;
type Trigger<T> = Box<dyn Fn(&T) + Send + Sync>;

struct Inner<T> {
    value: T,
    publishing: bool,
}

pub struct Channel<T> {
    inner: Mutex<Inner<T>>,
    filters: Mutex<Vec<Filter<T>>>,
    triggers: Mutex<Vec<Trigger<T>>>,
}

impl<T> fmt::Debug for Channel<T>
where
    T: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("value", &self.inner.lock().value)
            .finish()
    }
}

impl<T> Channel<T>
where
    T: Clone + Send + 'static,
{
    pub fn new(initial: T) -> Self {
        Self {
            inner: Mutex::new(Inner {
                value: initial,
                publishing: false,
            }),
            filters: Mutex::new(Vec::new()),
            triggers: Mutex::new(Vec::new()),
        }
    }

    /// Register an input filter. Filters run in registration order; each
    /// receives the value the previous filter produced.
    pub fn add_filter<F>(&self, filter: F)
    where
        F: Fn(T) -> T + Send + Sync + 'static,
    {
        self.filters.lock().push(Box::new(filter));
    }

    /// Register an output trigger, invoked after a publication commits.
    pub fn add_trigger<F>(&self, trigger: F)
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.triggers.lock().push(Box::new(trigger));
    }

    /// The last committed value.
    pub fn get(&self) -> T {
        self.inner.lock().value.clone()
    }

    /// Run the proposed value through the filter chain, commit it, then run
    /// triggers. Returns the value that was actually committed (which may
    /// differ from `proposed` if a filter clipped it).
    ///
    /// # Panics
    /// Panics if called re-entrantly from one of this channel's own triggers.
    pub fn publish(&self, proposed: T) -> T {
        {
            let mut guard = self.inner.lock();
            if guard.publishing {
                panic!("re-entrant publish to the same channel during its own dispatch");
            }
            guard.publishing = true;
        }

        let filtered = {
            let filters = self.filters.lock();
            filters.iter().fold(proposed, |value, filter| filter(value))
        };

        {
            let mut guard = self.inner.lock();
            guard.value = filtered.clone();
            guard.publishing = false;
        }

        let triggers = self.triggers.lock();
        for trigger in triggers.iter() {
            trigger(&filtered);
        }

        filtered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI32, Ordering};
    use std::sync::Arc;

    #[test]
    fn filters_run_in_order_and_can_clip() {
        let channel = Channel::new(0i32);
        channel.add_filter(|v| v.min(10));
        channel.add_filter(|v| v.max(0));

        assert_eq!(channel.publish(20), 10);
        assert_eq!(channel.publish(-5), 0);
        assert_eq!(channel.get(), 0);
    }

    #[test]
    fn triggers_observe_the_committed_value() {
        let channel = Channel::new(0i32);
        let seen = Arc::new(AtomicI32::new(-1));
        let seen2 = Arc::clone(&seen);
        channel.add_filter(|v| v.min(5));
        channel.add_trigger(move |v| seen2.store(*v, Ordering::SeqCst));

        channel.publish(42);
        assert_eq!(seen.load(Ordering::SeqCst), 5);
    }

    #[test]
    #[should_panic(expected = "re-entrant publish")]
    fn reentrant_publish_to_self_panics() {
        let channel = Arc::new(Channel::new(0i32));
        let inner = Arc::clone(&channel);
        channel.add_trigger(move |_v| {
            inner.publish(1);
        });
        channel.publish(1);
    }
}
