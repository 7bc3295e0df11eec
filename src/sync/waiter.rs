use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::park::{block, submit};
use crate::process_impl::{try_current, Process};
use parking_lot::{Condvar, Mutex};

thread_local! { static THREAD_PARK: Arc<ThreadPark> = Arc::new(ThreadPark::new()); }

#[derive(Debug)]
#[allow(clippy::mutex_atomic)]
pub struct ThreadPark {
    lock: Mutex<bool>,
    cvar: Condvar,
}

#[allow(clippy::mutex_atomic)]
impl ThreadPark {
    fn new() -> Self {
        ThreadPark {
            lock: Mutex::new(false),
            cvar: Condvar::new(),
        }
    }

    fn park(&self) {
        let mut guard = self.lock.lock();
        while !*guard {
            self.cvar.wait(&mut guard);
        }
        // must clear the status
        *guard = false;
    }

    fn unpark(&self) {
        let mut guard = self.lock.lock();
        if !*guard {
            *guard = true;
            self.cvar.notify_one();
        }
    }
}

/// Whoever runs the blocking call: a process, or a plain thread that
/// falls back to a condition variable.
#[derive(Clone)]
pub enum Waiter {
    Process(Process),
    Thread(Arc<ThreadPark>),
}

impl Waiter {
    pub fn current() -> Waiter {
        match try_current() {
            Some(p) => Waiter::Process(p),
            None => Waiter::Thread(THREAD_PARK.with(Arc::clone)),
        }
    }

    #[inline]
    pub fn wake(&self) {
        match self {
            Waiter::Process(p) => submit(p),
            Waiter::Thread(t) => t.unpark(),
        }
    }

    // only ever called by the waiter itself
    #[inline]
    fn park(&self) {
        match self {
            Waiter::Process(_) => block(),
            Waiter::Thread(t) => t.park(),
        }
    }
}

impl fmt::Debug for Waiter {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Waiter::Process(p) => write!(f, "Waiter({:?})", p),
            Waiter::Thread(_) => f.write_str("Waiter(thread)"),
        }
    }
}

/// One entry of a wait queue, notified at most once.
#[derive(Debug)]
pub struct WaitNode {
    waiter: Waiter,
    notified: AtomicBool,
}

impl WaitNode {
    pub fn new(waiter: Waiter) -> Self {
        WaitNode {
            waiter,
            notified: AtomicBool::new(false),
        }
    }

    pub fn current() -> Arc<Self> {
        Arc::new(WaitNode::new(Waiter::current()))
    }

    pub fn notify(&self) {
        self.notified.store(true, Ordering::Release);
        self.waiter.wake();
    }

    pub fn is_notified(&self) -> bool {
        self.notified.load(Ordering::Acquire)
    }

    /// park until notified, spurious wakes are absorbed here
    pub fn wait(&self) {
        while !self.is_notified() {
            self.waiter.park();
        }
    }
}
