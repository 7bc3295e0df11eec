//! Spawning and controlling processes.
pub use crate::join::JoinHandle;
pub use crate::process_impl::{current, is_process, spawn, wait_children, Builder, Process, Status};
pub use crate::sleep::hangup;
pub use crate::yield_now::yield_now;
