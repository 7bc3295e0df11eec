//! Lock-free queues backing the gorun scheduler.
//!
//! Only one shape is needed: a bounded multi-producer multi-consumer ring
//! that every worker pops from and every submitter pushes onto.

pub mod mpmc_bounded;

pub use mpmc_bounded::Queue;
