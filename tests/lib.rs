use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use gorun::process::{self, yield_now, Status};
use gorun::{go, runtime, Channel};

#[test]
fn one_process() {
    let j = go!(move || {
        println!("hello, process");
    });
    j.join().unwrap();
}

#[test]
fn process_result() {
    let j = go!(move || {
        println!("hello, process");
        100
    });

    assert_eq!(j.join().unwrap(), 100);
}

#[test]
fn multi_yield() {
    let count = Arc::new(AtomicUsize::new(0));
    let handles: Vec<_> = (0..10)
        .map(|_| {
            let count = count.clone();
            go!(move || {
                for _ in 0..10 {
                    count.fetch_add(1, Ordering::Relaxed);
                    yield_now();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(count.load(Ordering::Relaxed), 100);
}

#[test]
fn yield_in_thread_context() {
    assert!(!process::is_process());
    yield_now();
}

#[test]
fn current_process() {
    let j = go!(|| {
        let me = process::current();
        assert!(process::is_process());
        assert_eq!(me.status(), Status::Running);
        me.id()
    });
    let id = j.process().id();
    assert_eq!(j.join().unwrap(), id);
}

#[test]
fn builder_name_and_stack() {
    let b = process::Builder::new()
        .name("big".to_owned())
        .stack_size(0x10000);
    let j = go!(b, || {
        let me = process::current();
        (me.name().map(str::to_owned), me.stack_size())
    })
    .unwrap();
    assert_eq!(j.join().unwrap(), (Some("big".to_owned()), 0x10000));
}

#[test]
fn panic_is_reported_by_join() {
    let j = go!(|| {
        panic!("boom");
    });
    let err = j.join().unwrap_err();
    assert_eq!(err.downcast_ref::<&str>(), Some(&"boom"));

    // the runtime keeps going
    assert_eq!(go!(|| 1).join().unwrap(), 1);
}

#[test]
fn joined_process_is_dead() {
    let j = go!(|| ());
    j.wait();
    assert!(j.is_done());
    assert_eq!(j.process().status(), Status::Dead);
}

#[test]
fn hangup_waits_at_least() {
    let j = go!(|| {
        let start = Instant::now();
        process::hangup(Duration::from_millis(30));
        start.elapsed()
    });
    assert!(j.join().unwrap() >= Duration::from_millis(30));

    let start = Instant::now();
    process::hangup(Duration::from_millis(10));
    assert!(start.elapsed() >= Duration::from_millis(10));
}

#[test]
fn many_sleepers_wake_in_order() {
    let out = Channel::new(10);
    for i in (0..10u64).rev() {
        let out = out.clone();
        go!(move || {
            process::hangup(Duration::from_millis(20 + i * 20));
            out.send(i).unwrap();
        });
    }
    let got: Vec<u64> = (0..10).map(|_| out.recv().unwrap()).collect();
    assert_eq!(got, (0..10).collect::<Vec<_>>());
}

#[test]
fn wait_children_returns_after_last_child() {
    const K: usize = 8;
    let j = go!(|| {
        let finished = Arc::new(AtomicUsize::new(0));
        for i in 0..K {
            let finished = finished.clone();
            go!(move || {
                process::hangup(Duration::from_millis(5 * (i as u64 + 1)));
                finished.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(process::current().live_children(), K);
        process::wait_children();
        let seen = finished.load(Ordering::SeqCst);
        // a second wait with no children left returns at once
        process::wait_children();
        (seen, process::current().live_children())
    });
    assert_eq!(j.join().unwrap(), (K, 0));
}

#[test]
fn wait_children_counts_only_direct_children() {
    let j = go!(|| {
        let grandchild_done = Arc::new(AtomicUsize::new(0));
        let g = grandchild_done.clone();
        go!(move || {
            go!(move || {
                process::hangup(Duration::from_millis(50));
                g.fetch_add(1, Ordering::SeqCst);
            });
        });
        process::wait_children();
        grandchild_done.load(Ordering::SeqCst)
    });
    assert_eq!(j.join().unwrap(), 0);
}

#[test]
fn wait_children_in_thread_is_noop() {
    process::wait_children();
}

#[test]
fn jobs_and_results() {
    let jobs = Channel::new(5);
    let results = Channel::new(5);

    for w in 1..=3 {
        let jobs = jobs.clone();
        let results = results.clone();
        go!(move || {
            for j in jobs.iter() {
                println!("worker {} started job {}", w, j);
                process::hangup(Duration::from_millis(10));
                results.send(j * 2).unwrap();
            }
        });
    }

    for j in 1..=5 {
        jobs.send(j).unwrap();
    }
    jobs.close();

    let mut got: Vec<i32> = (0..5).map(|_| results.recv().unwrap()).collect();
    got.sort_unstable();
    assert_eq!(got, vec![2, 4, 6, 8, 10]);
}

#[test]
fn runtime_stats() {
    assert!(runtime::num_workers() >= 1);
    let gate = Channel::new(0);
    let rx = gate.clone();
    let j = go!(move || rx.recv().unwrap());
    thread::sleep(Duration::from_millis(20));
    assert!(runtime::num_processes() >= 1);
    runtime::dump();
    gate.send(()).unwrap();
    j.join().unwrap();
}
