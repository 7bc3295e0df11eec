use std::ptr::NonNull;
use std::sync::Arc;

use crate::join::Join;
use crate::process_impl::Process;

/// per process record, attached to the generator as its local data
pub struct ProcessLocal {
    // current process handle
    process: Process,
    // when panic happens, we need to trigger the join here
    join: Arc<Join>,
}

impl ProcessLocal {
    /// create process local data
    pub fn new(process: Process, join: Arc<Join>) -> Box<Self> {
        Box::new(ProcessLocal { process, join })
    }

    pub fn process(&self) -> &Process {
        &self.process
    }

    pub fn join(&self) -> &Join {
        &self.join
    }
}

// get the process local data, none when called from a plain thread
#[inline]
pub fn get_process_local() -> Option<NonNull<ProcessLocal>> {
    let ptr = generator::get_local_data();
    #[allow(clippy::cast_ptr_alignment)]
    NonNull::new(ptr as *mut ProcessLocal)
}
