use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use gorun::{config, go, runtime};

#[test]
fn shutdown_is_terminal() {
    config().set_workers(2);

    assert_eq!(go!(|| 1 + 1).join().unwrap(), 2);
    assert_eq!(runtime::num_workers(), 2);

    runtime::shutdown();
    runtime::shutdown();

    let ran = Arc::new(AtomicBool::new(false));
    let their_ran = ran.clone();
    let h = go!(move || their_ran.store(true, Ordering::SeqCst));
    thread::sleep(Duration::from_millis(50));
    assert!(!ran.load(Ordering::SeqCst));
    assert!(!h.is_done());
    runtime::dump();
}
