use std::fmt;
use std::sync::atomic::{AtomicIsize, Ordering};
use std::sync::Arc;

use super::WaitNode;
use crate::preempt::CriticalSection;
use parking_lot::Mutex;

/// Waits for a collection of processes or threads to finish.
///
/// The counter is raised with [`add`] before the work starts, every worker
/// calls [`done`] when it finishes, and [`wait`] blocks until the counter
/// drops to zero. Clones share the same counter.
///
/// # Panics
///
/// A counter that goes negative is a program error: it is logged and the
/// whole process aborts.
///
/// # Examples
///
/// ```
/// use gorun::go;
/// use gorun::sync::WaitGroup;
///
/// let wg = WaitGroup::new();
///
/// for _ in 0..4 {
///     wg.add(1);
///     let wg = wg.clone();
///     go!(move || {
///         // Do some work.
///         wg.done();
///     });
/// }
///
/// // Block until all processes have finished their work.
/// wg.wait();
/// ```
///
/// [`add`]: WaitGroup::add
/// [`done`]: WaitGroup::done
/// [`wait`]: WaitGroup::wait
#[derive(Clone, Default)]
pub struct WaitGroup {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    count: AtomicIsize,
    waiters: Mutex<Vec<Arc<WaitNode>>>,
}

impl WaitGroup {
    /// Creates a new wait group with a zero counter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `delta`, which may be negative, to the counter.
    ///
    /// When the counter reaches zero every current waiter is released.
    pub fn add(&self, delta: isize) {
        let _cs = CriticalSection::enter();
        let count = self.inner.count.fetch_add(delta, Ordering::AcqRel) + delta;
        if count < 0 {
            error!("negative WaitGroup counter");
            std::process::abort();
        }
        if count == 0 {
            let waiters = std::mem::take(&mut *self.inner.waiters.lock());
            for w in waiters {
                w.notify();
            }
        }
    }

    /// Decrements the counter by one.
    pub fn done(&self) {
        self.add(-1);
    }

    /// Blocks until the counter is zero.
    pub fn wait(&self) {
        if self.count() == 0 {
            return;
        }
        let _cs = CriticalSection::enter();
        let node = WaitNode::current();
        {
            let mut waiters = self.inner.waiters.lock();
            // the release to zero drains under this lock
            if self.count() == 0 {
                return;
            }
            waiters.push(node.clone());
        }
        node.wait();
    }

    /// The current counter value.
    pub fn count(&self) -> isize {
        self.inner.count.load(Ordering::Acquire)
    }
}

impl fmt::Debug for WaitGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WaitGroup")
            .field("count", &self.count())
            .finish()
    }
}
