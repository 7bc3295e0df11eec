use std::cell::Cell;
use std::ptr;
use std::sync::atomic::{fence, AtomicBool, AtomicPtr, AtomicU64, AtomicUsize, Ordering};
use std::sync::Once;
use std::thread;
use std::time::Duration;

use crate::config::config;
use crate::park::submit;
use crate::pool::ProcessPool;
use crate::preempt::{self, Preempter};
use crate::process_impl::{process_of, run_process, Process, ProcessImpl, Status};
use crate::timer::{self, TimerHeap};
use crossbeam::utils::{Backoff, CachePadded};
use gorun_queue::Queue;
use parking_lot::{Condvar, Mutex};

// worker id of the current thread, only workers have one
thread_local! { static WORKER_ID: Cell<usize> = const { Cell::new(!1) }; }

#[inline]
pub(crate) fn worker_id() -> Option<usize> {
    let id = WORKER_ID.with(Cell::get);
    if id == !1 {
        None
    } else {
        Some(id)
    }
}

static SCHED: AtomicPtr<Scheduler> = AtomicPtr::new(ptr::null_mut());

#[inline(never)]
fn init_scheduler() {
    let cfg = config();
    let workers = cfg.get_workers().max(1);
    let sched: &'static Scheduler = Box::leak(Scheduler::new(workers));
    SCHED.store(sched as *const _ as *mut _, Ordering::Release);

    let cores = if cfg.get_pin_workers() {
        core_affinity::get_core_ids().unwrap_or_default()
    } else {
        Vec::new()
    };

    let mut threads = sched.threads.lock();
    for id in 0..workers {
        let core = if cores.is_empty() {
            None
        } else {
            Some(cores[id % cores.len()])
        };
        let spawned = thread::Builder::new()
            .name(format!("gorun-worker-{}", id))
            .spawn(move || {
                if let Some(core) = core {
                    if !core_affinity::set_for_current(core) {
                        warn!("worker {} failed to pin to {:?}", id, core);
                    }
                }
                let s = unsafe { &*SCHED.load(Ordering::Acquire) };
                s.run_worker(id);
            });
        match spawned {
            Ok(t) => threads.push(t),
            Err(e) => panic!("failed to spawn worker {}: {}", id, e),
        }
    }
    drop(threads);

    if cfg.get_preempt() {
        match Preempter::start(sched, cfg.get_preempt_interval()) {
            Ok(p) => *sched.preempter.lock() = Some(p),
            Err(e) => warn!("preemption disabled: {}", e),
        }
    }
    debug!("scheduler started with {} workers", workers);
}

#[inline]
pub fn get_scheduler() -> &'static Scheduler {
    let sched = SCHED.load(Ordering::Acquire);
    if !sched.is_null() {
        return unsafe { &*sched };
    }
    static ONCE: Once = Once::new();
    ONCE.call_once(init_scheduler);
    unsafe { &*SCHED.load(Ordering::Acquire) }
}

struct Worker {
    // raw pthread id, 0 until the thread is up
    tid: AtomicUsize,
    busy: AtomicBool,
    // bumped on every dispatch, lets the preempter spot a long run
    ticks: AtomicU64,
    timers: TimerHeap<Process>,
}

pub struct Scheduler {
    run_queue: Queue<ProcessImpl>,
    workers: Vec<CachePadded<Worker>>,
    idle_lock: Mutex<()>,
    idle_cvar: Condvar,
    idle: AtomicUsize,
    stopping: AtomicBool,
    threads: Mutex<Vec<thread::JoinHandle<()>>>,
    preempter: Mutex<Option<Preempter>>,
    pub(crate) live: AtomicUsize,
    pub pool: ProcessPool,
}

impl Scheduler {
    pub fn new(workers: usize) -> Box<Self> {
        let workers = (0..workers)
            .map(|id| {
                CachePadded::new(Worker {
                    tid: AtomicUsize::new(0),
                    busy: AtomicBool::new(false),
                    ticks: AtomicU64::new(0),
                    timers: TimerHeap::new(id),
                })
            })
            .collect();

        Box::new(Scheduler {
            run_queue: Queue::with_capacity(config().get_run_queue_capacity()),
            workers,
            idle_lock: Mutex::new(()),
            idle_cvar: Condvar::new(),
            idle: AtomicUsize::new(0),
            stopping: AtomicBool::new(false),
            threads: Mutex::new(Vec::new()),
            preempter: Mutex::new(None),
            live: AtomicUsize::new(0),
            pool: ProcessPool::new(),
        })
    }

    /// put the process to the run queue so that next time it can be scheduled
    #[inline]
    pub fn schedule(&self, co: ProcessImpl) {
        let mut co = co;
        let backoff = Backoff::new();
        while let Err(back) = self.run_queue.push(co) {
            co = back;
            backoff.snooze();
        }
        // pairs with the fence in park_worker
        fence(Ordering::SeqCst);
        if self.idle.load(Ordering::Relaxed) > 0 {
            let _guard = self.idle_lock.lock();
            self.idle_cvar.notify_one();
        }
    }

    /// wake every idle worker so that they recompute their sleep
    #[inline]
    pub fn wake_idle(&self) {
        fence(Ordering::SeqCst);
        if self.idle.load(Ordering::Relaxed) > 0 {
            let _guard = self.idle_lock.lock();
            self.idle_cvar.notify_all();
        }
    }

    #[inline]
    pub(crate) fn timer_heap(&self, worker: usize) -> &TimerHeap<Process> {
        &self.workers[worker % self.workers.len()].timers
    }

    // submit every process whose hangup expired
    fn poll_timers(&self) {
        let now = timer::now();
        for w in self.workers.iter() {
            if w.timers.next_deadline() > now {
                continue;
            }
            for p in w.timers.poll(now) {
                submit(&p);
            }
        }
    }

    fn next_deadline(&self) -> u64 {
        self.workers
            .iter()
            .map(|w| w.timers.next_deadline())
            .min()
            .unwrap_or(u64::MAX)
    }

    /// expired timers first, then one process from the run queue
    fn get_work(&self) -> Option<ProcessImpl> {
        self.poll_timers();
        let co = self.run_queue.pop()?;
        let status = &process_of(&co).inner().status;
        if let Err(s) = status.compare_exchange(
            Status::Runnable as u8,
            Status::Running as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            warn!(
                "dispatching {:?} in state {:?}",
                process_of(&co),
                Status::from(s)
            );
            process_of(&co).set_status(Status::Running);
        }
        Some(co)
    }

    // sleep until work is queued or the earliest timer is due
    fn park_worker(&self) {
        let mut guard = self.idle_lock.lock();
        self.idle.fetch_add(1, Ordering::Relaxed);
        fence(Ordering::SeqCst);
        if self.run_queue.is_empty() && !self.stopping.load(Ordering::Acquire) {
            let next = self.next_deadline();
            if next == u64::MAX {
                self.idle_cvar.wait(&mut guard);
            } else {
                let now = timer::now();
                if next > now {
                    self.idle_cvar
                        .wait_for(&mut guard, Duration::from_nanos(next - now));
                }
            }
        }
        self.idle.fetch_sub(1, Ordering::Relaxed);
    }

    fn run_worker(&self, id: usize) {
        WORKER_ID.with(|w| w.set(id));
        let worker = &self.workers[id];
        worker.tid.store(preempt::prepare_worker(), Ordering::Release);
        info!("worker {} started", id);

        while !self.stopping.load(Ordering::Acquire) {
            match self.get_work() {
                Some(co) => {
                    worker.ticks.fetch_add(1, Ordering::Relaxed);
                    worker.busy.store(true, Ordering::Release);
                    run_process(co);
                    worker.busy.store(false, Ordering::Release);
                }
                None => self.park_worker(),
            }
        }
        info!("worker {} stopped", id);
    }

    /// (pthread id, busy, dispatch ticks) of a worker
    pub(crate) fn worker_state(&self, id: usize) -> (usize, bool, u64) {
        let w = &self.workers[id];
        (
            w.tid.load(Ordering::Acquire),
            w.busy.load(Ordering::Acquire),
            w.ticks.load(Ordering::Relaxed),
        )
    }

    pub fn workers_len(&self) -> usize {
        self.workers.len()
    }

    pub fn live(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    pub fn queued(&self) -> usize {
        self.run_queue.len()
    }

    /// stop the preempter and the workers, processes still queued never run
    pub fn shutdown(&self) {
        if self.stopping.swap(true, Ordering::AcqRel) {
            return;
        }
        let preempter = self.preempter.lock().take();
        if let Some(p) = preempter {
            p.stop();
        }
        {
            let _guard = self.idle_lock.lock();
            self.idle_cvar.notify_all();
        }

        let me = thread::current().id();
        let threads: Vec<_> = self.threads.lock().drain(..).collect();
        for t in threads {
            // a worker can not wait for itself
            if t.thread().id() != me {
                let _ = t.join();
            }
        }
        info!("scheduler stopped");
    }
}
