//! `gorun` Configuration interface
//!
//! Values live in process-wide atomics. They are read when the scheduler
//! starts, so they must be set before the first process is spawned.

use std::env;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Once;
use std::time::Duration;

// default stack size, in usize words
const DEFAULT_STACK_SIZE: usize = 0x2000;
const DEFAULT_POOL_CAPACITY: usize = 1000;
const DEFAULT_RUN_QUEUE_CAPACITY: usize = 1 << 18;
const DEFAULT_PREEMPT_INTERVAL_US: usize = 10_000;

const ENV_WORKERS: &str = "GORUN_WORKERS";
const ENV_PREEMPT: &str = "GORUN_PREEMPT";

static WORKERS: AtomicUsize = AtomicUsize::new(0);
static STACK_SIZE: AtomicUsize = AtomicUsize::new(DEFAULT_STACK_SIZE);
static POOL_CAPACITY: AtomicUsize = AtomicUsize::new(DEFAULT_POOL_CAPACITY);
static RUN_QUEUE_CAPACITY: AtomicUsize = AtomicUsize::new(DEFAULT_RUN_QUEUE_CAPACITY);
static PREEMPT_INTERVAL_US: AtomicUsize = AtomicUsize::new(DEFAULT_PREEMPT_INTERVAL_US);
static PREEMPT: AtomicBool = AtomicBool::new(false);
static PIN_WORKERS: AtomicBool = AtomicBool::new(true);

/// `gorun` Configuration type
pub struct Config;

fn parse_flag(v: &str) -> bool {
    matches!(
        v.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "on" | "yes"
    )
}

/// get the runtime configuration instance
pub fn config() -> Config {
    static ONCE: Once = Once::new();
    ONCE.call_once(|| {
        WORKERS.store(num_cpus::get(), Ordering::Release);

        match env::var(ENV_WORKERS).map(|v| v.trim().parse::<usize>()) {
            Ok(Ok(n)) if n > 0 => {
                info!("{}={}", ENV_WORKERS, n);
                WORKERS.store(n, Ordering::Release);
            }
            Ok(_) => warn!("ignore invalid {}", ENV_WORKERS),
            Err(_) => {}
        }

        if let Ok(v) = env::var(ENV_PREEMPT) {
            let on = parse_flag(&v);
            info!("{}={}", ENV_PREEMPT, on);
            PREEMPT.store(on, Ordering::Release);
        }
    });

    Config
}

/// the config should be called at the program beginning
///
/// successive call would not take effect for that the scheduler
/// is already started
impl Config {
    /// set the worker thread number
    ///
    /// if you pass 0 to it, the number of logical cpus is used. All of them
    /// are spawned threads, the calling thread never runs processes itself
    pub fn set_workers(&self, workers: usize) -> &Self {
        let workers = if workers == 0 { num_cpus::get() } else { workers };
        info!("set workers={:?}", workers);
        WORKERS.store(workers, Ordering::Release);
        self
    }

    /// get the worker thread number
    pub fn get_workers(&self) -> usize {
        WORKERS.load(Ordering::Acquire)
    }

    /// set the process pool capacity, 0 disables recycling
    pub fn set_pool_capacity(&self, capacity: usize) -> &Self {
        info!("set pool capacity={:?}", capacity);
        POOL_CAPACITY.store(capacity, Ordering::Release);
        self
    }

    /// get the process pool capacity
    pub fn get_pool_capacity(&self) -> usize {
        POOL_CAPACITY.load(Ordering::Acquire)
    }

    /// set default process stack size in usize
    ///
    /// if you pass 0 to it, will use internal default
    pub fn set_stack_size(&self, size: usize) -> &Self {
        let size = if size == 0 { DEFAULT_STACK_SIZE } else { size };
        info!("set stack size={:?}", size);
        STACK_SIZE.store(size, Ordering::Release);
        self
    }

    /// get the default process stack size
    pub fn get_stack_size(&self) -> usize {
        STACK_SIZE.load(Ordering::Acquire)
    }

    /// set the global run queue capacity, rounded up to a power of two
    pub fn set_run_queue_capacity(&self, capacity: usize) -> &Self {
        info!("set run queue capacity={:?}", capacity);
        RUN_QUEUE_CAPACITY.store(capacity, Ordering::Release);
        self
    }

    pub fn get_run_queue_capacity(&self) -> usize {
        RUN_QUEUE_CAPACITY.load(Ordering::Acquire)
    }

    /// enable or disable signal based preemption
    ///
    /// without it a process only gives up its worker at a runtime call
    pub fn set_preempt(&self, enable: bool) -> &Self {
        info!("set preempt={:?}", enable);
        PREEMPT.store(enable, Ordering::Release);
        self
    }

    pub fn get_preempt(&self) -> bool {
        PREEMPT.load(Ordering::Acquire)
    }

    /// set how often the preempter samples the workers
    pub fn set_preempt_interval(&self, interval: Duration) -> &Self {
        let us = (interval.as_micros() as usize).max(1);
        info!("set preempt interval={:?}", interval);
        PREEMPT_INTERVAL_US.store(us, Ordering::Release);
        self
    }

    pub fn get_preempt_interval(&self) -> Duration {
        Duration::from_micros(PREEMPT_INTERVAL_US.load(Ordering::Acquire) as u64)
    }

    /// pin each worker thread to one logical cpu
    pub fn set_pin_workers(&self, pin: bool) -> &Self {
        info!("set pin workers={:?}", pin);
        PIN_WORKERS.store(pin, Ordering::Release);
        self
    }

    pub fn get_pin_workers(&self) -> bool {
        PIN_WORKERS.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::parse_flag;

    #[test]
    fn env_flags() {
        assert!(parse_flag("1"));
        assert!(parse_flag(" TRUE "));
        assert!(parse_flag("on"));
        assert!(!parse_flag("0"));
        assert!(!parse_flag(""));
        assert!(!parse_flag("nope"));
    }
}
