//! Blocking synchronization that works from processes and plain threads.
//!
//! A blocked process gives its worker back; a blocked thread waits on a
//! condition variable.

mod mutex;
mod poison;
mod wait_group;
mod waiter;

pub use self::mutex::{Mutex, MutexGuard};
pub use self::wait_group::WaitGroup;
pub(crate) use self::waiter::{WaitNode, Waiter};
