//! Choose one ready case among several channel operations.
//!
//! ```
//! use gorun::{select, Case, Channel};
//!
//! let a = Channel::new(1);
//! let b: Channel<i32> = Channel::new(1);
//! a.send(7).unwrap();
//!
//! let mut from_a = None;
//! let mut from_b = None;
//! let mut cases = [Case::recv(&a, &mut from_a), Case::recv(&b, &mut from_b)];
//! assert_eq!(select(&mut cases), 0);
//! drop(cases);
//! assert_eq!(from_a, Some(7));
//! ```
use std::fmt;
use std::sync::mpsc::{TryRecvError, TrySendError};

use crate::chan::Channel;
use crate::preempt::CriticalSection;
use crate::yield_now::yield_now;
use smallvec::SmallVec;

// the non-blocking half of a case
trait Poll {
    /// true once the operation completed
    fn poll(&mut self) -> bool;
}

struct RecvCase<'a, T> {
    chan: &'a Channel<T>,
    slot: &'a mut Option<T>,
}

impl<T> Poll for RecvCase<'_, T> {
    fn poll(&mut self) -> bool {
        match self.chan.try_recv() {
            Ok(v) => {
                *self.slot = Some(v);
                true
            }
            // a closed channel is always ready, with nothing in the slot
            Err(TryRecvError::Disconnected) => {
                *self.slot = None;
                true
            }
            Err(TryRecvError::Empty) => false,
        }
    }
}

struct SendCase<'a, T> {
    chan: &'a Channel<T>,
    value: Option<T>,
}

impl<T> Poll for SendCase<'_, T> {
    fn poll(&mut self) -> bool {
        let v = match self.value.take() {
            Some(v) => v,
            None => return true,
        };
        match self.chan.try_send(v) {
            Ok(()) => true,
            // a closed channel never accepts, keep the value for the next round
            Err(TrySendError::Disconnected(v)) | Err(TrySendError::Full(v)) => {
                self.value = Some(v);
                false
            }
        }
    }
}

/// One arm of a [`select`].
pub struct Case<'a> {
    // None for the default case
    op: Option<Box<dyn Poll + 'a>>,
}

impl<'a> Case<'a> {
    /// Ready when `chan` has a value, stored into `slot`, or is closed, which
    /// leaves `slot` empty.
    pub fn recv<T: 'a>(chan: &'a Channel<T>, slot: &'a mut Option<T>) -> Case<'a> {
        Case {
            op: Some(Box::new(RecvCase { chan, slot })),
        }
    }

    /// Ready when `chan` accepts `value` without blocking.
    ///
    /// A closed channel never accepts, so this case is never chosen once the
    /// channel is closed.
    pub fn send<T: 'a>(chan: &'a Channel<T>, value: T) -> Case<'a> {
        Case {
            op: Some(Box::new(SendCase {
                chan,
                value: Some(value),
            })),
        }
    }

    /// Chosen when no other case is ready.
    pub fn default_case() -> Case<'a> {
        Case { op: None }
    }

    pub fn is_default(&self) -> bool {
        self.op.is_none()
    }
}

impl fmt::Debug for Case<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.is_default() {
            f.write_str("Case(default)")
        } else {
            f.write_str("Case(op)")
        }
    }
}

/// Blocks until one case completes and returns its index.
///
/// Cases are tried in a random order fixed for the call, so no case starves
/// the others. With a default case the call never blocks. With no case at
/// all and no default the caller is parked for good.
pub fn select(cases: &mut [Case]) -> usize {
    let mut order: SmallVec<[usize; 8]> = (0..cases.len()).collect();
    fastrand::shuffle(&mut order);
    let default = cases.iter().position(Case::is_default);

    loop {
        {
            let _cs = CriticalSection::enter();
            for &i in order.iter() {
                if let Some(op) = cases[i].op.as_mut() {
                    if op.poll() {
                        return i;
                    }
                }
            }
        }
        if let Some(i) = default {
            return i;
        }
        yield_now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_when_nothing_ready() {
        let ch: Channel<u8> = Channel::new(0);
        let mut slot = None;
        let mut cases = [Case::recv(&ch, &mut slot), Case::default_case()];
        assert_eq!(select(&mut cases), 1);
    }

    #[test]
    fn send_case_fills_buffer() {
        let ch = Channel::new(1);
        let mut cases = [Case::default_case(), Case::send(&ch, 5)];
        assert_eq!(select(&mut cases), 1);
        // full now, only the default remains ready
        let mut cases = [Case::send(&ch, 6), Case::default_case()];
        assert_eq!(select(&mut cases), 1);
        assert_eq!(ch.recv(), Ok(5));
    }

    #[test]
    fn send_on_closed_channel_is_never_chosen() {
        let ch = Channel::new(1);
        ch.close();
        let mut cases = [Case::send(&ch, 42), Case::default_case()];
        for _ in 0..100 {
            assert_eq!(select(&mut cases), 1);
        }
        assert!(ch.is_empty());
    }

    #[test]
    fn closed_channel_is_ready() {
        let ch: Channel<u8> = Channel::new(0);
        ch.close();
        let mut slot = Some(1);
        let mut cases = [Case::recv(&ch, &mut slot)];
        assert_eq!(select(&mut cases), 0);
        drop(cases);
        assert_eq!(slot, None);
    }

    #[test]
    fn blocks_until_a_process_sends() {
        let a: Channel<u32> = Channel::new(0);
        let b = Channel::new(0);
        let tx = b.clone();
        go!(move || {
            crate::process::hangup(std::time::Duration::from_millis(20));
            tx.send(9).unwrap();
        });
        let mut from_a = None;
        let mut from_b = None;
        let mut cases = [Case::recv(&a, &mut from_a), Case::recv(&b, &mut from_b)];
        assert_eq!(select(&mut cases), 1);
        drop(cases);
        assert_eq!(from_b, Some(9));
        assert_eq!(from_a, None);
    }
}
