use std::sync::Arc;
use std::time::{Duration, Instant};

use gorun::time::{after, Ticker};
use gorun::timer::{self, TimerEntry, TimerHeap, TimerSlot};
use gorun::{go, select, Case, Channel};

#[test]
fn after_as_a_select_timeout() {
    let never: Channel<u8> = Channel::new(0);
    // the first runtime call also starts the workers, time it too
    let start = Instant::now();
    let timeout = after(Duration::from_millis(20));
    let mut v = None;
    let mut fired = None;
    let mut cases = [Case::recv(&never, &mut v), Case::recv(&timeout, &mut fired)];
    assert_eq!(select(&mut cases), 1);
    drop(cases);
    assert!(fired.is_some());
    assert!(start.elapsed() >= Duration::from_millis(20));
}

#[test]
fn ticker_from_a_process() {
    let h = go!(|| {
        let ticker = Ticker::new(Duration::from_millis(10));
        let start = Instant::now();
        for _ in 0..5 {
            ticker.recv();
        }
        ticker.stop();
        start.elapsed()
    });
    assert!(h.join().unwrap() >= Duration::from_millis(40));
}

#[test]
fn stopped_ticker_goes_quiet() {
    let ticker = Ticker::new(Duration::from_millis(5));
    ticker.recv();
    ticker.stop();
    ticker.stop();
    let _ = ticker.chan().try_recv();
    gorun::process::hangup(Duration::from_millis(30));
    assert!(ticker.chan().try_recv().is_err());
}

#[derive(Clone)]
struct Entry(Arc<(u32, TimerSlot)>);

impl TimerEntry for Entry {
    fn timer_slot(&self) -> &TimerSlot {
        &self.0 .1
    }
}

#[test]
fn heap_polls_only_due_entries() {
    let heap = TimerHeap::new(0);
    let entries: Vec<_> = (0..6)
        .map(|i| Entry(Arc::new((i, TimerSlot::new()))))
        .collect();
    for (e, when) in entries.iter().zip([30u64, 10, 50, 20, 60, 40]) {
        heap.put(e.clone(), when);
    }
    assert_eq!(heap.len(), 6);
    assert!(heap.cancel_entry(&entries[3]));

    let due: Vec<u32> = heap.poll(35).iter().map(|e| e.0 .0).collect();
    assert_eq!(due, vec![1, 0]);
    assert_eq!(heap.next_deadline(), 40);
    for e in &entries[..2] {
        assert_eq!(e.timer_slot().token(), timer::FIRED);
        assert!(!e.timer_slot().is_pending());
    }
    assert!(entries[5].timer_slot().is_pending());
    assert_eq!(heap.poll(u64::MAX).len(), 3);
    assert!(heap.is_empty());
}
