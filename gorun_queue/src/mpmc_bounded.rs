// Copyright (c) 2010-2011 Dmitry Vyukov. All rights reserved.
// Redistribution and use in source and binary forms, with or without
// modification, are permitted provided that the following conditions are met:
//
//    1. Redistributions of source code must retain the above copyright notice,
//       this list of conditions and the following disclaimer.
//
//    2. Redistributions in binary form must reproduce the above copyright
//       notice, this list of conditions and the following disclaimer in the
//       documentation and/or other materials provided with the distribution.
//
// THIS SOFTWARE IS PROVIDED BY DMITRY VYUKOV "AS IS" AND ANY EXPRESS OR IMPLIED
// WARRANTIES, INCLUDING, BUT NOT LIMITED TO, THE IMPLIED WARRANTIES OF
// MERCHANTABILITY AND FITNESS FOR A PARTICULAR PURPOSE ARE DISCLAIMED. IN NO EVENT
// SHALL DMITRY VYUKOV OR CONTRIBUTORS BE LIABLE FOR ANY DIRECT, INDIRECT,
// INCIDENTAL, SPECIAL, EXEMPLARY, OR CONSEQUENTIAL DAMAGES (INCLUDING, BUT NOT
// LIMITED TO, PROCUREMENT OF SUBSTITUTE GOODS OR SERVICES; LOSS OF USE, DATA, OR
// PROFITS; OR BUSINESS INTERRUPTION) HOWEVER CAUSED AND ON ANY THEORY OF
// LIABILITY, WHETHER IN CONTRACT, STRICT LIABILITY, OR TORT (INCLUDING NEGLIGENCE
// OR OTHERWISE) ARISING IN ANY WAY OUT OF THE USE OF THIS SOFTWARE, EVEN IF
// ADVISED OF THE POSSIBILITY OF SUCH DAMAGE.
//
// The views and conclusions contained in the software and documentation are
// those of the authors and should not be interpreted as representing official
// policies, either expressed or implied, of Dmitry Vyukov.
//

//! Bounded MPMC ring after Dmitry Vyukov's design.
//!
//! <http://www.1024cores.net/home/lock-free-algorithms/queues/bounded-mpmc-queue>
//!
//! Every slot carries a sequence number. A producer may claim slot `pos`
//! only when its sequence equals `pos`, a consumer only when it equals
//! `pos + 1`. A full ring makes `push` hand the value back instead of
//! blocking, so callers choose their own back-off.

use std::cell::UnsafeCell;
use std::cmp;
use std::fmt;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering::{Acquire, Relaxed, Release};
use std::sync::Arc;

use crossbeam_utils::CachePadded;

struct Node<T> {
    sequence: AtomicUsize,
    value: Option<T>,
}

struct State<T> {
    enqueue_pos: CachePadded<AtomicUsize>,
    buffer: Box<[UnsafeCell<Node<T>>]>,
    dequeue_pos: CachePadded<AtomicUsize>,
    mask: usize,
}

unsafe impl<T: Send> Send for State<T> {}
unsafe impl<T: Send> Sync for State<T> {}

/// A fixed capacity lock-free queue shared by cloning.
pub struct Queue<T> {
    state: Arc<State<T>>,
}

impl<T: Send> State<T> {
    fn with_capacity(capacity: usize) -> State<T> {
        // the slot index is taken with a mask, round up to a power of two
        let capacity = cmp::max(capacity, 2).next_power_of_two();
        let buffer = (0..capacity)
            .map(|i| {
                UnsafeCell::new(Node {
                    sequence: AtomicUsize::new(i),
                    value: None,
                })
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();
        State {
            buffer,
            mask: capacity - 1,
            enqueue_pos: AtomicUsize::new(0).into(),
            dequeue_pos: AtomicUsize::new(0).into(),
        }
    }

    fn push(&self, value: T) -> Result<(), T> {
        let mask = self.mask;
        let mut pos = self.enqueue_pos.load(Relaxed);
        loop {
            let node = unsafe { &mut *((self.buffer[pos & mask]).get()) };
            let seq = node.sequence.load(Acquire);

            match seq.cmp(&pos) {
                cmp::Ordering::Equal => {
                    match self
                        .enqueue_pos
                        .compare_exchange_weak(pos, pos + 1, Relaxed, Relaxed)
                    {
                        Ok(_) => {
                            node.value = Some(value);
                            node.sequence.store(pos + 1, Release);
                            return Ok(());
                        }
                        Err(enqueue_pos) => pos = enqueue_pos,
                    }
                }
                // the consumer of the previous lap has not released this slot
                cmp::Ordering::Less => return Err(value),
                cmp::Ordering::Greater => pos = self.enqueue_pos.load(Relaxed),
            }
        }
    }

    fn pop(&self) -> Option<T> {
        let mask = self.mask;
        let mut pos = self.dequeue_pos.load(Relaxed);
        loop {
            let node = unsafe { &mut *((self.buffer[pos & mask]).get()) };
            let seq = node.sequence.load(Acquire);

            match seq.cmp(&(pos + 1)) {
                cmp::Ordering::Equal => {
                    match self
                        .dequeue_pos
                        .compare_exchange_weak(pos, pos + 1, Relaxed, Relaxed)
                    {
                        Ok(_) => {
                            let value = node.value.take();
                            node.sequence.store(pos + mask + 1, Release);
                            return value;
                        }
                        Err(dequeue_pos) => pos = dequeue_pos,
                    }
                }
                cmp::Ordering::Less => return None,
                cmp::Ordering::Greater => pos = self.dequeue_pos.load(Relaxed),
            }
        }
    }

    fn len(&self) -> usize {
        loop {
            let tail = self.enqueue_pos.load(Acquire);
            let head = self.dequeue_pos.load(Acquire);
            // a consistent snapshot needs the tail to be stable across the head read
            if self.enqueue_pos.load(Acquire) == tail {
                return tail.wrapping_sub(head).min(self.mask + 1);
            }
        }
    }
}

impl<T: Send> Queue<T> {
    /// Creates a queue holding at least `capacity` values.
    ///
    /// The capacity is rounded up to the next power of two, with a minimum of 2.
    pub fn with_capacity(capacity: usize) -> Queue<T> {
        Queue {
            state: Arc::new(State::with_capacity(capacity)),
        }
    }

    /// Pushes a value, handing it back when the ring is full.
    pub fn push(&self, value: T) -> Result<(), T> {
        self.state.push(value)
    }

    /// Pops the oldest value, if any.
    pub fn pop(&self) -> Option<T> {
        self.state.pop()
    }

    /// Number of queued values. Only a hint under concurrent access.
    pub fn len(&self) -> usize {
        self.state.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.state.mask + 1
    }
}

impl<T: Send> Clone for Queue<T> {
    fn clone(&self) -> Queue<T> {
        Queue {
            state: self.state.clone(),
        }
    }
}

impl<T: Send> fmt::Debug for Queue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Queue")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::Queue;
    use std::sync::mpsc::channel;
    use std::thread;

    #[test]
    fn capacity_rounds_up() {
        assert_eq!(Queue::<u8>::with_capacity(0).capacity(), 2);
        assert_eq!(Queue::<u8>::with_capacity(5).capacity(), 8);
        assert_eq!(Queue::<u8>::with_capacity(1 << 18).capacity(), 1 << 18);
    }

    #[test]
    fn fifo_and_full() {
        let q = Queue::with_capacity(4);
        assert!(q.is_empty());
        for i in 0..4 {
            q.push(i).unwrap();
        }
        assert_eq!(q.len(), 4);
        assert_eq!(q.push(4), Err(4));
        assert_eq!(q.pop(), Some(0));
        q.push(4).unwrap();
        let rest: Vec<_> = std::iter::from_fn(|| q.pop()).collect();
        assert_eq!(rest, vec![1, 2, 3, 4]);
        assert_eq!(q.pop(), None);
    }

    #[test]
    fn many_producers_many_consumers() {
        const PRODUCERS: usize = 4;
        const CONSUMERS: usize = 4;
        const MSGS: usize = 10_000;

        let q = Queue::with_capacity(64);
        let (tx, rx) = channel();

        for p in 0..PRODUCERS {
            let q = q.clone();
            thread::spawn(move || {
                for i in 0..MSGS {
                    let mut v = p * MSGS + i;
                    while let Err(back) = q.push(v) {
                        v = back;
                        thread::yield_now();
                    }
                }
            });
        }

        for _ in 0..CONSUMERS {
            let q = q.clone();
            let tx = tx.clone();
            thread::spawn(move || {
                let mut sum = 0usize;
                for _ in 0..(PRODUCERS * MSGS / CONSUMERS) {
                    loop {
                        if let Some(v) = q.pop() {
                            sum += v;
                            break;
                        }
                        thread::yield_now();
                    }
                }
                tx.send(sum).unwrap();
            });
        }
        drop(tx);

        let total: usize = rx.iter().sum();
        let n = PRODUCERS * MSGS;
        assert_eq!(total, n * (n - 1) / 2);
        assert!(q.is_empty());
    }
}
