use std::env;
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

use gorun::process;
use gorun::go;
use gorun::sync::{Mutex, WaitGroup};

fn count_with(procs: usize) {
    const ROUNDS: usize = 1000;
    let counter = Arc::new(Mutex::new(0usize));
    let wg = WaitGroup::new();
    for _ in 0..procs {
        wg.add(1);
        let counter = counter.clone();
        let wg = wg.clone();
        go!(move || {
            for i in 0..ROUNDS {
                *counter.lock().unwrap() += 1;
                if i % 100 == 0 {
                    process::yield_now();
                }
            }
            wg.done();
        });
    }
    wg.wait();
    assert_eq!(*counter.lock().unwrap(), procs * ROUNDS);
}

#[test]
fn mutex_one_process() {
    count_with(1);
}

#[test]
fn mutex_ten_processes() {
    count_with(10);
}

#[test]
fn mutex_hundred_processes() {
    count_with(100);
}

#[test]
fn mutex_held_across_hangup() {
    let m = Arc::new(Mutex::new(Vec::new()));
    let wg = WaitGroup::new();
    for i in 0..5 {
        wg.add(1);
        let m = m.clone();
        let wg = wg.clone();
        go!(move || {
            let mut v = m.lock().unwrap();
            v.push(i);
            process::hangup(Duration::from_millis(5));
            v.push(i);
            drop(v);
            wg.done();
        });
    }
    wg.wait();
    let v = m.lock().unwrap();
    // no one got in between a push pair
    for pair in v.chunks(2) {
        assert_eq!(pair[0], pair[1]);
    }
}

#[test]
fn wait_group_from_a_process() {
    let j = go!(|| {
        let wg = WaitGroup::new();
        wg.add(3);
        for _ in 0..3 {
            let wg = wg.clone();
            go!(move || {
                process::hangup(Duration::from_millis(10));
                wg.done();
            });
        }
        wg.wait();
        wg.count()
    });
    assert_eq!(j.join().unwrap(), 0);
}

const ABORT_CHILD: &str = "GORUN_TEST_ABORT_CHILD";

#[test]
fn wait_group_negative_counter_aborts() {
    if env::var_os(ABORT_CHILD).is_some() {
        let wg = WaitGroup::new();
        wg.add(1);
        wg.done();
        // one too many
        wg.done();
        unreachable!("negative counter did not abort");
    }

    let exe = env::current_exe().unwrap();
    let status = Command::new(exe)
        .args([
            "wait_group_negative_counter_aborts",
            "--exact",
            "--test-threads=1",
        ])
        .env(ABORT_CHILD, "1")
        .status()
        .unwrap();
    assert!(!status.success());

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        assert_eq!(status.signal(), Some(libc::SIGABRT));
    }
}
