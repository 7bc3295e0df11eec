use std::thread;
use std::time::Duration;

use crate::park::{park, submit};
use crate::preempt::CriticalSection;
use crate::process_impl::{process_of, try_current, EventSource, Process, ProcessImpl};
use crate::scheduler::get_scheduler;
use crate::timer;
use crate::yield_now::yield_with;

struct Hangup {
    when: u64,
}

impl EventSource for Hangup {
    // register the process to its timer heap, then park it
    fn subscribe(&self, co: ProcessImpl) {
        let process = process_of(&co).clone();
        let sched = get_scheduler();
        let (_, earliest) = sched
            .timer_heap(process.born_on())
            .put(process.clone(), self.when);
        if earliest {
            // idle workers may be sleeping past the new deadline
            sched.wake_idle();
        }
        park(&process, co);
    }
}

/// park the current process until the deadline or an early submit
///
/// a timer still pending after the wake is dropped
pub(crate) fn hangup_once(process: &Process, when: u64) {
    let _cs = CriticalSection::enter();
    yield_with(&Hangup { when });
    get_scheduler()
        .timer_heap(process.born_on())
        .cancel_entry(process);
}

/// park the current process until the monotonic deadline passed
pub(crate) fn hangup_until(when: u64) {
    match try_current() {
        Some(process) => {
            while timer::now() < when {
                hangup_once(&process, when);
            }
        }
        None => {
            let now = timer::now();
            if when > now {
                thread::sleep(Duration::from_nanos(when - now));
            }
        }
    }
}

/// cut short a pending hangup, returns false if the timer already fired
pub(crate) fn interrupt(process: &Process) -> bool {
    let canceled = get_scheduler()
        .timer_heap(process.born_on())
        .cancel_entry(process);
    if canceled {
        submit(process);
    }
    canceled
}

/// block the current process for at least `dur`
///
/// In a thread context this is `thread::sleep`.
pub fn hangup(dur: Duration) {
    hangup_until(timer::deadline_after(dur));
}
