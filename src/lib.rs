//! # Go style processes for Rust
//!
//! gorun runs lightweight stackful processes on a fixed set of worker
//! threads, M:N style. Processes talk over channels, wait with `select`,
//! sleep on a timer heap and synchronize with a mutex or a wait group. A long
//! running process can be preempted by a signal so it does not starve the
//! others on its worker.
//!
//! ## Features
//!
//! * Stackful processes based on the `generator` crate
//! * One global run queue served by a configurable number of workers
//! * Buffered and rendezvous channels with `select`
//! * Per-worker timer heaps, `after` and `Ticker`
//! * Optional signal driven preemption
//! * Mutex and wait group usable from processes and plain threads
//! * Cancellation contexts
//! * Panics in a process are reported through its join handle
//!
//! ```
//! use gorun::{go, Channel};
//!
//! let jobs = Channel::new(5);
//! let results = Channel::new(5);
//! for _ in 0..3 {
//!     let (jobs, results) = (jobs.clone(), results.clone());
//!     go!(move || {
//!         for j in jobs.iter() {
//!             results.send(j * 2).unwrap();
//!         }
//!     });
//! }
//! for j in 1..=5 {
//!     jobs.send(j).unwrap();
//! }
//! jobs.close();
//! let mut got: Vec<i32> = (0..5).map(|_| results.recv().unwrap()).collect();
//! got.sort();
//! assert_eq!(got, vec![2, 4, 6, 8, 10]);
//! ```

#[macro_use]
#[doc(hidden)]
extern crate log;

#[macro_use]
mod macros;
mod config;
mod join;
mod local;
mod park;
mod pool;
mod preempt;
mod process_impl;
mod scheduler;
mod sleep;
mod yield_now;

pub mod chan;
pub mod context;
pub mod process;
pub mod runtime;
pub mod select;
pub mod sync;
pub mod time;
pub mod timer;

pub use chan::Channel;
pub use config::{config, Config};
pub use context::Context;
pub use select::{select, Case};
