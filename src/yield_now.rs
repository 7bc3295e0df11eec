use std::thread;

use crate::preempt::CriticalSection;
use crate::process_impl::{is_process, process_of, EventSource, EventSubscriber, ProcessImpl};
use crate::process_impl::Status;
use crate::scheduler::get_scheduler;
use generator::co_yield_with;

struct Yield;

impl EventSource for Yield {
    fn subscribe(&self, co: ProcessImpl) {
        // just repush the process to the ready list
        process_of(&co).set_status(Status::Runnable);
        get_scheduler().schedule(co);
    }
}

/// switch out of the current process and hand it to `resource`
///
/// it's ok to pass a ref of an object on the process stack, the stack
/// is left untouched until the process is resumed
#[inline]
pub fn yield_with<T: EventSource + 'static>(resource: &T) {
    let es = EventSubscriber::new(resource);
    co_yield_with(es);
}

/// give up the worker, the process is queued behind every runnable one
#[inline]
pub fn yield_now() {
    if !is_process() {
        return thread::yield_now();
    }
    let _cs = CriticalSection::enter();
    yield_with(&Yield);
}
