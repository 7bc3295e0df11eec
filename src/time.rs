//! One-shot and periodic timers delivered over channels.
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::chan::Channel;
use crate::join::JoinHandle;
use crate::process_impl::{current, spawn_detached};
use crate::sleep::{hangup_once, hangup_until, interrupt};
use crate::timer;

/// Returns a channel that receives the current time once `dur` elapsed.
///
/// ```
/// use std::time::{Duration, Instant};
///
/// let start = Instant::now();
/// let fired = gorun::time::after(Duration::from_millis(10)).recv().unwrap();
/// assert!(fired - start >= Duration::from_millis(10));
/// ```
pub fn after(dur: Duration) -> Channel<Instant> {
    let chan = Channel::new(1);
    let tx = chan.clone();
    let deadline = timer::deadline_after(dur);
    spawn_detached(move || {
        hangup_until(deadline);
        let _ = tx.try_send(Instant::now());
    });
    chan
}

/// Delivers the time on a channel once per period.
///
/// Ticks are dropped while the receiver lags behind, the channel never
/// holds more than one. The tick schedule does not drift with the receiver.
pub struct Ticker {
    chan: Channel<Instant>,
    stopped: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl Ticker {
    /// # Panics
    ///
    /// Panics if `period` is zero.
    pub fn new(period: Duration) -> Ticker {
        assert!(!period.is_zero(), "non-positive interval for Ticker::new");
        let chan = Channel::new(1);
        let stopped = Arc::new(AtomicBool::new(false));

        let tx = chan.clone();
        let their_stopped = stopped.clone();
        let step = u64::try_from(period.as_nanos()).unwrap_or(u64::MAX);
        let handle = spawn_detached(move || {
            let me = current();
            let mut next = timer::now().saturating_add(step);
            while !their_stopped.load(Ordering::Acquire) {
                hangup_once(&me, next);
                if their_stopped.load(Ordering::Acquire) {
                    break;
                }
                let now = timer::now();
                if now < next {
                    continue;
                }
                let _ = tx.try_send(Instant::now());
                // skip the periods already missed
                while next <= now {
                    next = next.saturating_add(step);
                }
            }
            trace!("ticker {} stopped", me.id());
        });

        Ticker {
            chan,
            stopped,
            handle,
        }
    }

    /// The channel the ticks arrive on.
    pub fn chan(&self) -> &Channel<Instant> {
        &self.chan
    }

    /// Blocks until the next tick.
    pub fn recv(&self) -> Instant {
        match self.chan.recv() {
            Ok(t) => t,
            // the tick channel is never closed
            Err(_) => Instant::now(),
        }
    }

    /// Stops the ticker, no more ticks are sent after this returns.
    ///
    /// A tick already buffered stays readable.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        // wake it now instead of at the next period
        interrupt(self.handle.process());
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for Ticker {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Ticker")
            .field("process", self.handle.process())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}
