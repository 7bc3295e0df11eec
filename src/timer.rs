//! Timer min-heap with O(log n) cancellation.
//!
//! Every entry records its own heap index, so removal of an arbitrary entry
//! does not need a search. Each insertion hands out a fresh token from a
//! per-heap counter; the token is reset to [`FIRED`] when the entry leaves the
//! heap by expiry or cancellation, which makes a late cancel a no-op.

use std::fmt;
use std::sync::atomic::{AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use smallvec::SmallVec;

/// token of an entry that is not in any heap
pub const FIRED: i64 = -1;

/// monotonic nanoseconds since the runtime clock was first read
pub fn now() -> u64 {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    EPOCH.get_or_init(Instant::now).elapsed().as_nanos() as u64
}

/// the deadline `dur` from now, saturating far in the future
pub fn deadline_after(dur: Duration) -> u64 {
    let dur = u64::try_from(dur.as_nanos()).unwrap_or(u64::MAX);
    now().saturating_add(dur)
}

/// The timer bookkeeping an entry carries.
pub struct TimerSlot {
    when: AtomicU64,
    index: AtomicUsize,
    token: AtomicI64,
}

impl TimerSlot {
    pub fn new() -> Self {
        TimerSlot {
            when: AtomicU64::new(0),
            index: AtomicUsize::new(0),
            token: AtomicI64::new(FIRED),
        }
    }

    /// the deadline of the last insertion
    pub fn when(&self) -> u64 {
        self.when.load(Ordering::Acquire)
    }

    pub fn token(&self) -> i64 {
        self.token.load(Ordering::Acquire)
    }

    /// true while the entry sits in a heap
    pub fn is_pending(&self) -> bool {
        self.token() != FIRED
    }
}

impl Default for TimerSlot {
    fn default() -> Self {
        TimerSlot::new()
    }
}

impl fmt::Debug for TimerSlot {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("TimerSlot")
            .field("when", &self.when())
            .field("token", &self.token())
            .finish()
    }
}

/// Anything that can sit in a [`TimerHeap`].
pub trait TimerEntry {
    fn timer_slot(&self) -> &TimerSlot;
}

/// A registration returned by [`TimerHeap::put`].
#[derive(Debug)]
pub struct Timer<T> {
    entry: T,
    token: i64,
}

impl<T> Timer<T> {
    pub fn entry(&self) -> &T {
        &self.entry
    }

    pub fn token(&self) -> i64 {
        self.token
    }
}

struct HeapState<T> {
    entries: Vec<T>,
    next_token: i64,
}

#[inline]
fn when_of<T: TimerEntry>(e: &T) -> u64 {
    e.timer_slot().when.load(Ordering::Relaxed)
}

impl<T: TimerEntry> HeapState<T> {
    #[inline]
    fn set_index(&self, i: usize) {
        self.entries[i]
            .timer_slot()
            .index
            .store(i, Ordering::Relaxed);
    }

    fn swap(&mut self, a: usize, b: usize) {
        self.entries.swap(a, b);
        self.set_index(a);
        self.set_index(b);
    }

    fn sift_up(&mut self, mut i: usize) {
        while i > 0 {
            let parent = (i - 1) / 2;
            if when_of(&self.entries[i]) >= when_of(&self.entries[parent]) {
                break;
            }
            self.swap(i, parent);
            i = parent;
        }
    }

    fn sift_down(&mut self, mut i: usize) {
        let len = self.entries.len();
        loop {
            let left = 2 * i + 1;
            if left >= len {
                break;
            }
            let right = left + 1;
            let mut min = left;
            if right < len && when_of(&self.entries[right]) < when_of(&self.entries[left]) {
                min = right;
            }
            if when_of(&self.entries[min]) >= when_of(&self.entries[i]) {
                break;
            }
            self.swap(i, min);
            i = min;
        }
    }

    // move the last element into the hole, then restore the order around it
    fn remove_at(&mut self, i: usize) -> Option<T> {
        let last = self.entries.len().checked_sub(1)?;
        if i > last {
            return None;
        }
        self.entries.swap(i, last);
        let removed = self.entries.pop();
        if i < self.entries.len() {
            self.set_index(i);
            if i > 0 && when_of(&self.entries[i]) < when_of(&self.entries[(i - 1) / 2]) {
                self.sift_up(i);
            } else {
                self.sift_down(i);
            }
        }
        removed
    }

    fn peek_when(&self) -> u64 {
        self.entries.first().map_or(u64::MAX, when_of)
    }
}

/// Binary min-heap of entries keyed by their deadline.
pub struct TimerHeap<T> {
    state: Mutex<HeapState<T>>,
    // earliest deadline, u64::MAX when empty, readable without the lock
    next: AtomicU64,
}

impl<T: TimerEntry + Clone> TimerHeap<T> {
    /// Creates an empty heap. `seed` keeps tokens of different heaps apart.
    pub fn new(seed: usize) -> Self {
        TimerHeap {
            state: Mutex::new(HeapState {
                entries: Vec::new(),
                next_token: ((seed & 0x3ff) as i64) << 53,
            }),
            next: AtomicU64::new(u64::MAX),
        }
    }

    /// Inserts `entry` to fire at `when`.
    ///
    /// The flag is true when the entry became the earliest one.
    pub fn put(&self, entry: T, when: u64) -> (Timer<T>, bool) {
        let mut state = self.state.lock();
        let token = state.next_token;
        state.next_token += 1;

        let slot = entry.timer_slot();
        debug_assert!(!slot.is_pending(), "entry is already in a timer heap");
        slot.when.store(when, Ordering::Relaxed);
        slot.token.store(token, Ordering::Release);

        let i = state.entries.len();
        state.entries.push(entry.clone());
        state.set_index(i);
        state.sift_up(i);

        let earliest = entry.timer_slot().index.load(Ordering::Relaxed) == 0;
        self.next.store(state.peek_when(), Ordering::Release);
        (Timer { entry, token }, earliest)
    }

    /// Removes the registration. False if it already fired or was canceled.
    pub fn cancel(&self, timer: &Timer<T>) -> bool {
        self.cancel_token(&timer.entry, timer.token)
    }

    /// Removes whatever registration `entry` currently has.
    pub fn cancel_entry(&self, entry: &T) -> bool {
        let mut state = self.state.lock();
        let token = entry.timer_slot().token();
        if token == FIRED {
            return false;
        }
        self.remove_locked(&mut state, entry, token)
    }

    fn cancel_token(&self, entry: &T, token: i64) -> bool {
        let mut state = self.state.lock();
        self.remove_locked(&mut state, entry, token)
    }

    fn remove_locked(&self, state: &mut HeapState<T>, entry: &T, token: i64) -> bool {
        let slot = entry.timer_slot();
        if slot
            .token
            .compare_exchange(token, FIRED, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        let i = slot.index.load(Ordering::Relaxed);
        state.remove_at(i);
        self.next.store(state.peek_when(), Ordering::Release);
        true
    }

    /// Pops every entry whose deadline is not after `now`, earliest first.
    pub fn poll(&self, now: u64) -> SmallVec<[T; 8]> {
        let mut fired = SmallVec::new();
        if self.next_deadline() > now {
            return fired;
        }
        let mut state = self.state.lock();
        while state.peek_when() <= now {
            match state.remove_at(0) {
                Some(e) => {
                    e.timer_slot().token.store(FIRED, Ordering::Release);
                    fired.push(e);
                }
                None => break,
            }
        }
        self.next.store(state.peek_when(), Ordering::Release);
        fired
    }

    /// The earliest deadline, `u64::MAX` when the heap is empty.
    #[inline]
    pub fn next_deadline(&self) -> u64 {
        self.next.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> fmt::Debug for TimerHeap<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("TimerHeap")
            .field("next", &self.next.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[derive(Clone)]
    struct Entry(Arc<(usize, TimerSlot)>);

    impl Entry {
        fn new(id: usize) -> Self {
            Entry(Arc::new((id, TimerSlot::new())))
        }
        fn id(&self) -> usize {
            self.0 .0
        }
    }

    impl TimerEntry for Entry {
        fn timer_slot(&self) -> &TimerSlot {
            &self.0 .1
        }
    }

    fn check_heap(heap: &TimerHeap<Entry>) {
        let state = heap.state.lock();
        for (i, e) in state.entries.iter().enumerate() {
            assert_eq!(e.timer_slot().index.load(Ordering::Relaxed), i);
            if i > 0 {
                assert!(when_of(&state.entries[(i - 1) / 2]) <= when_of(e));
            }
        }
    }

    #[test]
    fn tokens_are_seeded_per_heap() {
        let a = TimerHeap::new(0);
        let b = TimerHeap::new(3);
        let (ta, _) = a.put(Entry::new(0), 10);
        let (tb, _) = b.put(Entry::new(1), 10);
        assert_eq!(ta.token(), 0);
        assert_eq!(tb.token(), 3 << 53);
        let (ta2, _) = a.put(Entry::new(2), 10);
        assert_eq!(ta2.token(), 1);
    }

    #[test]
    fn earliest_flag() {
        let heap = TimerHeap::new(0);
        assert!(heap.put(Entry::new(0), 50).1);
        assert!(!heap.put(Entry::new(1), 70).1);
        assert!(heap.put(Entry::new(2), 10).1);
        assert_eq!(heap.next_deadline(), 10);
    }

    #[test]
    fn remove_in_the_middle_keeps_order() {
        let heap = TimerHeap::new(0);
        let mut timers = Vec::new();
        for (i, when) in [40u64, 10, 90, 30, 70, 20, 60, 80, 50].iter().enumerate() {
            timers.push(heap.put(Entry::new(i), *when).0);
        }
        check_heap(&heap);
        assert!(heap.cancel(&timers[3]));
        assert!(heap.cancel(&timers[0]));
        check_heap(&heap);
        assert!(!heap.cancel(&timers[3]));

        let order: Vec<_> = heap.poll(u64::MAX).iter().map(Entry::id).collect();
        assert_eq!(order, vec![1, 5, 8, 6, 4, 7, 2]);
        assert!(heap.is_empty());
        assert_eq!(heap.next_deadline(), u64::MAX);
    }

    #[test]
    fn cancel_entry_uses_current_token() {
        let heap = TimerHeap::new(1);
        let e = Entry::new(0);
        heap.put(e.clone(), 5);
        assert!(heap.cancel_entry(&e));
        assert!(!heap.cancel_entry(&e));
        heap.put(e.clone(), 5);
        assert_eq!(heap.poll(5).len(), 1);
        assert!(!heap.cancel_entry(&e));
    }
}
