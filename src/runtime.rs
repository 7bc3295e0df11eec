//! Runtime statistics and teardown.
use crate::scheduler::get_scheduler;

/// Number of processes spawned and not yet exited.
pub fn num_processes() -> usize {
    get_scheduler().live()
}

/// Number of worker threads.
///
/// Every worker is a thread spawned by the runtime. The thread that first
/// uses the runtime is not one of them; it blocks on channels and locks like
/// any other plain thread.
pub fn num_workers() -> usize {
    get_scheduler().workers_len()
}

/// Logs the runtime figures at `info` level.
pub fn dump() {
    let sched = get_scheduler();
    info!(
        "processes={} workers={} queued={} pooled={}",
        sched.live(),
        sched.workers_len(),
        sched.queued(),
        sched.pool.len()
    );
}

/// Stops the preempter and every worker.
///
/// Processes still runnable or blocked never run again, and the runtime can
/// not be restarted. Calling it twice is harmless.
pub fn shutdown() {
    get_scheduler().shutdown();
}
