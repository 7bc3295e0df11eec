use crate::config::config;
use crate::process_impl::ProcessImpl;
use crossbeam::queue::SegQueue as Queue;
use generator::Gn;

/// the raw process pool, with stack and register prepared
/// you need to take care of the local storage
pub struct ProcessPool {
    // the pool must support mpmc operation!
    pool: Queue<ProcessImpl>,
}

impl ProcessPool {
    fn create_dummy_process() -> ProcessImpl {
        Gn::new_opt(config().get_stack_size(), move || {
            unreachable!("dummy process should never be called");
        })
    }

    pub fn new() -> Self {
        ProcessPool { pool: Queue::new() }
    }

    /// get a raw process from the pool
    #[inline]
    pub fn get(&self) -> ProcessImpl {
        match self.pool.pop() {
            Some(co) => co,
            None => Self::create_dummy_process(),
        }
    }

    /// put a finished process back so its stack can be reused
    #[inline]
    pub fn put(&self, co: ProcessImpl) {
        // discard the co if the pool is full
        if self.pool.len() >= config().get_pool_capacity() {
            return;
        }
        self.pool.push(co);
    }

    pub fn len(&self) -> usize {
        self.pool.len()
    }
}
