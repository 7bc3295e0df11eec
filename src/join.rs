use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use crate::preempt::CriticalSection;
use crate::process_impl::Process;
use crate::sync::WaitNode;
use crossbeam::atomic::AtomicCell;
use parking_lot::Mutex;

type PanicSlot = Arc<AtomicCell<Option<Box<dyn Any + Send>>>>;

pub struct Join {
    // the process or thread that is waiting for this join handler
    waiter: Mutex<Option<Arc<WaitNode>>>,
    // set once the host process is finished
    done: AtomicBool,
    // the only place that could set the panic error, must be
    // ready before the trigger
    panic: PanicSlot,
}

// this is the join resource type
impl Join {
    pub fn new(panic: PanicSlot) -> Self {
        Join {
            waiter: Mutex::new(None),
            done: AtomicBool::new(false),
            panic,
        }
    }

    // set the panic for the process
    pub fn set_panic_data(&self, panic: Box<dyn Any + Send>) {
        self.panic.swap(Some(panic));
    }

    pub fn trigger(&self) {
        self.done.store(true, Ordering::Release);
        let waiter = self.waiter.lock().take();
        if let Some(w) = waiter {
            w.notify();
        }
    }

    fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    fn wait(&self) {
        if self.is_done() {
            return;
        }
        let _cs = CriticalSection::enter();
        let node = WaitNode::current();
        {
            let mut waiter = self.waiter.lock();
            // re-check under the lock, trigger takes the waiter with it held
            if self.is_done() {
                return;
            }
            *waiter = Some(node.clone());
        }
        node.wait();
    }
}

/// A join handle to a process
pub struct JoinHandle<T> {
    process: Process,
    join: Arc<Join>,
    packet: Arc<AtomicCell<Option<T>>>,
    panic: PanicSlot,
}

/// create a JoinHandle
pub fn make_join_handle<T>(
    process: Process,
    join: Arc<Join>,
    packet: Arc<AtomicCell<Option<T>>>,
    panic: PanicSlot,
) -> JoinHandle<T> {
    JoinHandle {
        process,
        join,
        packet,
        panic,
    }
}

impl<T> JoinHandle<T> {
    /// Extracts a handle to the underlying process
    pub fn process(&self) -> &Process {
        &self.process
    }

    /// return true if the process is finished
    pub fn is_done(&self) -> bool {
        self.join.is_done()
    }

    /// block until the process is finished
    pub fn wait(&self) {
        self.join.wait();
    }

    /// Join the process, returning the result it produced.
    pub fn join(self) -> thread::Result<T> {
        self.join.wait();

        // take the result
        self.packet.take().ok_or_else(|| {
            self.panic
                .take()
                .unwrap_or_else(|| Box::new("process exited without a result"))
        })
    }
}

impl<T> fmt::Debug for JoinHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.pad("JoinHandle { .. }")
    }
}
