//! Go style channels.
//!
//! A channel has a fixed capacity, zero meaning every send meets a receive.
//! Blocked senders and receivers queue in arrival order. Closing wakes every
//! blocked party: receivers see [`RecvError`], senders get their value back
//! in a [`SendError`]. Values already buffered are still delivered after
//! close.
//!
//! The error types are the `std::sync::mpsc` ones.
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{RecvError, SendError, TryRecvError, TrySendError};
use std::sync::Arc;

use crate::preempt::CriticalSection;
use crate::sync::{WaitNode, Waiter};
use parking_lot::Mutex;

/// a blocked sender or receiver, with the value in flight
struct Handoff<T> {
    node: WaitNode,
    value: Mutex<Option<T>>,
    ok: AtomicBool,
}

impl<T> Handoff<T> {
    fn new(value: Option<T>) -> Arc<Self> {
        Arc::new(Handoff {
            node: WaitNode::new(Waiter::current()),
            value: Mutex::new(value),
            ok: AtomicBool::new(false),
        })
    }

    fn take(&self) -> Option<T> {
        self.value.lock().take()
    }

    fn put(&self, v: T) {
        *self.value.lock() = Some(v);
    }

    fn finish(&self, ok: bool) {
        self.ok.store(ok, Ordering::Release);
        self.node.notify();
    }

    // park until finished, true if the transfer happened
    fn wait(&self) -> bool {
        self.node.wait();
        self.ok.load(Ordering::Acquire)
    }
}

struct State<T> {
    buf: VecDeque<T>,
    cap: usize,
    closed: bool,
    sendq: VecDeque<Arc<Handoff<T>>>,
    recvq: VecDeque<Arc<Handoff<T>>>,
}

impl<T> State<T> {
    fn try_send(&mut self, v: T) -> Result<(), TrySendError<T>> {
        if self.closed {
            return Err(TrySendError::Disconnected(v));
        }
        if let Some(r) = self.recvq.pop_front() {
            r.put(v);
            r.finish(true);
            return Ok(());
        }
        if self.buf.len() < self.cap {
            self.buf.push_back(v);
            return Ok(());
        }
        Err(TrySendError::Full(v))
    }

    fn try_recv(&mut self) -> Result<T, TryRecvError> {
        if let Some(v) = self.buf.pop_front() {
            // refill the freed slot from the oldest blocked sender
            if let Some(s) = self.sendq.pop_front() {
                if let Some(sv) = s.take() {
                    self.buf.push_back(sv);
                }
                s.finish(true);
            }
            return Ok(v);
        }
        if self.closed {
            return Err(TryRecvError::Disconnected);
        }
        // only a rendezvous channel has senders waiting on an empty buffer
        if let Some(s) = self.sendq.pop_front() {
            let v = s.take();
            s.finish(true);
            if let Some(v) = v {
                return Ok(v);
            }
        }
        Err(TryRecvError::Empty)
    }
}

/// A multi-producer multi-consumer channel, cloned to share.
pub struct Channel<T> {
    state: Arc<Mutex<State<T>>>,
}

impl<T> Clone for Channel<T> {
    fn clone(&self) -> Self {
        Channel {
            state: self.state.clone(),
        }
    }
}

impl<T> Channel<T> {
    /// Creates a channel buffering up to `cap` values.
    ///
    /// # Examples
    ///
    /// ```
    /// use gorun::Channel;
    ///
    /// let ch = Channel::new(2);
    /// ch.send(1).unwrap();
    /// ch.send(2).unwrap();
    /// assert_eq!(ch.recv(), Ok(1));
    /// assert_eq!(ch.recv(), Ok(2));
    /// ```
    pub fn new(cap: usize) -> Channel<T> {
        Channel {
            state: Arc::new(Mutex::new(State {
                buf: VecDeque::with_capacity(cap),
                cap,
                closed: false,
                sendq: VecDeque::new(),
                recvq: VecDeque::new(),
            })),
        }
    }

    /// Sends a value, blocking while the channel is full.
    ///
    /// Fails, handing the value back, if the channel is closed before the
    /// value was taken.
    pub fn send(&self, v: T) -> Result<(), SendError<T>> {
        let _cs = CriticalSection::enter();
        let handoff = {
            let mut state = self.state.lock();
            match state.try_send(v) {
                Ok(()) => return Ok(()),
                Err(TrySendError::Disconnected(v)) => return Err(SendError(v)),
                Err(TrySendError::Full(v)) => {
                    let h = Handoff::new(Some(v));
                    state.sendq.push_back(h.clone());
                    h
                }
            }
        };

        if handoff.wait() {
            return Ok(());
        }
        match handoff.take() {
            Some(v) => Err(SendError(v)),
            None => Ok(()),
        }
    }

    /// Receives a value, blocking while the channel is empty.
    ///
    /// Fails once the channel is closed and drained.
    pub fn recv(&self) -> Result<T, RecvError> {
        let _cs = CriticalSection::enter();
        let handoff = {
            let mut state = self.state.lock();
            match state.try_recv() {
                Ok(v) => return Ok(v),
                Err(TryRecvError::Disconnected) => return Err(RecvError),
                Err(TryRecvError::Empty) => {
                    let h = Handoff::new(None);
                    state.recvq.push_back(h.clone());
                    h
                }
            }
        };

        if handoff.wait() {
            handoff.take().ok_or(RecvError)
        } else {
            Err(RecvError)
        }
    }

    /// Sends without blocking.
    pub fn try_send(&self, v: T) -> Result<(), TrySendError<T>> {
        let _cs = CriticalSection::enter();
        self.state.lock().try_send(v)
    }

    /// Receives without blocking.
    pub fn try_recv(&self) -> Result<T, TryRecvError> {
        let _cs = CriticalSection::enter();
        self.state.lock().try_recv()
    }

    /// Closes the channel, waking every blocked sender and receiver.
    ///
    /// Closing twice is a no-op.
    pub fn close(&self) {
        let _cs = CriticalSection::enter();
        let (senders, receivers) = {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            (
                std::mem::take(&mut state.sendq),
                std::mem::take(&mut state.recvq),
            )
        };
        for r in receivers {
            r.finish(false);
        }
        for s in senders {
            s.finish(false);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Number of buffered values.
    pub fn len(&self) -> usize {
        self.state.lock().buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.state.lock().cap
    }

    /// Receives until the channel is closed and drained.
    pub fn iter(&self) -> Iter<'_, T> {
        Iter { chan: self }
    }
}

impl<T> fmt::Debug for Channel<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Channel")
            .field("len", &state.buf.len())
            .field("cap", &state.cap)
            .field("closed", &state.closed)
            .finish()
    }
}

/// Blocking iterator over the values of a [`Channel`].
pub struct Iter<'a, T> {
    chan: &'a Channel<T>,
}

impl<T> Iterator for Iter<'_, T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        self.chan.recv().ok()
    }
}

impl<'a, T> IntoIterator for &'a Channel<T> {
    type Item = T;
    type IntoIter = Iter<'a, T>;

    fn into_iter(self) -> Iter<'a, T> {
        self.iter()
    }
}
