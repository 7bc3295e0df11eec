//! The block / submit handshake between a process and its wakers.
//!
//! A blocking process yields with [`Block`]; the worker stores the suspended
//! context on the record and moves `Running -> Blocked`. A waker calls
//! [`submit`], which moves the record to `Runnable` and re-queues the context
//! if it was already stored. A waker that arrives before the context is stored
//! turns `Running -> Runnable` instead, and the parking worker re-queues the
//! process itself. Exactly one side enqueues.

use std::sync::atomic::Ordering;

use crate::preempt::{CriticalSection, SignalMask};
use crate::process_impl::{process_of, EventSource, Process, ProcessImpl, Status};
use crate::scheduler::get_scheduler;
use crate::yield_now::yield_with;

pub(crate) struct Block;

impl EventSource for Block {
    fn subscribe(&self, co: ProcessImpl) {
        let process = process_of(&co).clone();
        park(&process, co);
    }
}

/// store the suspended context, unless a submit already raced in
pub(crate) fn park(process: &Process, co: ProcessImpl) {
    let inner = process.inner();
    *inner.parked.lock() = Some(co);
    if inner
        .status
        .compare_exchange(
            Status::Running as u8,
            Status::Blocked as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        )
        .is_err()
    {
        // woken before it got parked, run it again
        let co = inner.parked.lock().take();
        if let Some(co) = co {
            get_scheduler().schedule(co);
        }
    }
}

/// suspend the current process until somebody submits it
///
/// wakeups may be spurious, callers re-check their condition
pub(crate) fn block() {
    let _cs = CriticalSection::enter();
    yield_with(&Block);
}

/// make a process runnable, idempotent under races
pub(crate) fn submit(process: &Process) {
    let _mask = SignalMask::block();
    let _cs = CriticalSection::enter();

    let inner = process.inner();
    let mut cur = inner.status.load(Ordering::Acquire);
    loop {
        match Status::from(cur) {
            Status::Running | Status::Blocked => {}
            // already queued, finished, or not ours to schedule
            _ => return,
        }
        match inner.status.compare_exchange_weak(
            cur,
            Status::Runnable as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => break,
            Err(s) => cur = s,
        }
    }

    if cur == Status::Blocked as u8 {
        let co = inner.parked.lock().take();
        match co {
            Some(co) => get_scheduler().schedule(co),
            None => warn!("{:?} was blocked without a parked context", process),
        }
    }
}
