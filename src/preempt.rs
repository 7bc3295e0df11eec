//! Critical sections and signal driven preemption.
//!
//! A preempter thread samples the workers. A worker that has been running the
//! same dispatch for a whole interval gets `SIGURG`. The handler runs on the
//! stack of the interrupted process, so switching out of the handler suspends
//! the process with the kernel signal frame, and every register it saved, still
//! on that stack. Resuming the process on any worker returns from the handler
//! and the signal return restores the interrupted state.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::local::get_process_local;
use crate::process_impl::{process_of, try_current, EventSource, Process, ProcessImpl};
use crate::process_impl::{ResumeKind, Status};
use crate::scheduler::{get_scheduler, Scheduler};
use crate::yield_now::yield_with;
use parking_lot::{Condvar, Mutex};

static ENABLED: AtomicBool = AtomicBool::new(false);

/// Keeps the current process from being preempted while alive.
///
/// Nesting is fine, the counter lives on the process record so it follows the
/// process across workers. In a thread context it does nothing.
pub(crate) struct CriticalSection {
    process: Option<Process>,
}

impl CriticalSection {
    #[inline]
    pub fn enter() -> Self {
        let process = try_current();
        if let Some(p) = &process {
            p.inner().critical.fetch_add(1, Ordering::SeqCst);
        }
        CriticalSection { process }
    }
}

impl Drop for CriticalSection {
    #[inline]
    fn drop(&mut self) {
        if let Some(p) = &self.process {
            p.inner().critical.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

/// Blocks the preemption signal on this thread while alive.
pub(crate) struct SignalMask {
    old: Option<imp::Mask>,
}

impl SignalMask {
    #[inline]
    pub fn block() -> Self {
        let old = if ENABLED.load(Ordering::Relaxed) {
            imp::block()
        } else {
            None
        };
        SignalMask { old }
    }
}

impl Drop for SignalMask {
    #[inline]
    fn drop(&mut self) {
        if let Some(old) = self.old.take() {
            imp::restore(&old);
        }
    }
}

struct Preempt;

impl EventSource for Preempt {
    fn subscribe(&self, co: ProcessImpl) {
        // the kernel blocked the signal for the handler on this thread
        imp::unblock();
        process_of(&co).set_status(Status::Runnable);
        get_scheduler().schedule(co);
    }
}

// runs inside the signal handler, on the interrupted stack
//
// true if the process was switched out
fn preempt_current() -> bool {
    let local = match get_process_local() {
        Some(local) => local,
        None => return false,
    };
    let process = unsafe { local.as_ref() }.process();
    let inner = process.inner();
    if inner.critical.load(Ordering::SeqCst) != 0
        || !inner.preemptible.swap(false, Ordering::SeqCst)
    {
        return false;
    }

    process.set_resume_kind(ResumeKind::Preempted);
    let errno = imp::errno();
    yield_with(&Preempt);
    // possibly on another worker now
    imp::set_errno(errno);
    process.set_resume_kind(ResumeKind::Normal);
    inner.preemptible.store(true, Ordering::SeqCst);
    true
}

/// called on each worker thread before it dispatches
pub(crate) fn prepare_worker() -> usize {
    imp::unblock();
    imp::thread_id()
}

/// The sampling thread.
pub(crate) struct Preempter {
    stop: Arc<(Mutex<bool>, Condvar)>,
    thread: Option<thread::JoinHandle<()>>,
}

impl Preempter {
    pub fn start(sched: &'static Scheduler, interval: Duration) -> io::Result<Preempter> {
        imp::install()?;
        ENABLED.store(true, Ordering::Release);

        let stop = Arc::new((Mutex::new(false), Condvar::new()));
        let their_stop = stop.clone();
        let thread = thread::Builder::new()
            .name("gorun-preempter".to_owned())
            .spawn(move || run(sched, interval, &their_stop))?;

        info!("preempter started, interval={:?}", interval);
        Ok(Preempter {
            stop,
            thread: Some(thread),
        })
    }

    pub fn stop(mut self) {
        {
            let (lock, cvar) = &*self.stop;
            *lock.lock() = true;
            cvar.notify_one();
        }
        if let Some(t) = self.thread.take() {
            let _ = t.join();
        }
        ENABLED.store(false, Ordering::Release);
        info!("preempter stopped");
    }
}

fn run(sched: &Scheduler, interval: Duration, stop: &(Mutex<bool>, Condvar)) {
    let (lock, cvar) = stop;
    let mut seen = vec![0u64; sched.workers_len()];
    let mut stopped = lock.lock();
    loop {
        cvar.wait_for(&mut stopped, interval);
        if *stopped {
            break;
        }
        for (id, last) in seen.iter_mut().enumerate() {
            let (tid, busy, ticks) = sched.worker_state(id);
            // only a worker stuck in the same dispatch since the last sample
            if busy && tid != 0 && ticks == *last {
                if let Err(e) = imp::kick(tid) {
                    warn!("failed to preempt worker {}: {}", id, e);
                }
            }
            *last = ticks;
        }
    }
}

cfg_if::cfg_if! {
    if #[cfg(all(unix, any(target_arch = "x86_64", target_arch = "aarch64")))] {
        mod imp {
            use std::io;

            use nix::errno::Errno;
            use nix::sys::pthread::{pthread_kill, pthread_self, Pthread};
            use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, SigmaskHow, Signal};

            const PREEMPT_SIGNAL: Signal = Signal::SIGURG;

            pub type Mask = SigSet;

            extern "C" fn on_signal(
                _sig: libc::c_int,
                _info: *mut libc::siginfo_t,
                _ctx: *mut libc::c_void,
            ) {
                let _ = super::preempt_current();
            }

            fn preempt_set() -> SigSet {
                let mut set = SigSet::empty();
                set.add(PREEMPT_SIGNAL);
                set
            }

            pub fn install() -> io::Result<()> {
                // no SA_ONSTACK, the handler must run on the process stack
                let action = SigAction::new(
                    SigHandler::SigAction(on_signal),
                    SaFlags::SA_SIGINFO | SaFlags::SA_RESTART,
                    SigSet::empty(),
                );
                unsafe { signal::sigaction(PREEMPT_SIGNAL, &action) }?;
                Ok(())
            }

            pub fn thread_id() -> usize {
                pthread_self() as usize
            }

            pub fn kick(tid: usize) -> io::Result<()> {
                pthread_kill(tid as Pthread, PREEMPT_SIGNAL)?;
                Ok(())
            }

            pub fn unblock() {
                let set = preempt_set();
                let _ = signal::pthread_sigmask(SigmaskHow::SIG_UNBLOCK, Some(&set), None);
            }

            pub fn block() -> Option<Mask> {
                let set = preempt_set();
                let mut old = SigSet::empty();
                signal::pthread_sigmask(SigmaskHow::SIG_BLOCK, Some(&set), Some(&mut old))
                    .ok()
                    .map(|_| old)
            }

            pub fn restore(old: &Mask) {
                let _ = signal::pthread_sigmask(SigmaskHow::SIG_SETMASK, Some(old), None);
            }

            pub fn errno() -> i32 {
                Errno::last_raw()
            }

            pub fn set_errno(v: i32) {
                Errno::set_raw(v);
            }
        }
    } else {
        // cooperative scheduling only
        mod imp {
            use std::io;

            pub type Mask = ();

            pub fn install() -> io::Result<()> {
                Err(io::Error::new(
                    io::ErrorKind::Unsupported,
                    "preemption is not supported on this target",
                ))
            }

            pub fn thread_id() -> usize {
                0
            }

            pub fn kick(_tid: usize) -> io::Result<()> {
                Ok(())
            }

            pub fn unblock() {}

            pub fn block() -> Option<Mask> {
                None
            }

            pub fn restore(_old: &Mask) {}

            pub fn errno() -> i32 {
                0
            }

            pub fn set_errno(_v: i32) {}
        }
    }
}
