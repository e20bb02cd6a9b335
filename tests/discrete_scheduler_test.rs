//! End-to-end scenarios for the discrete scheduler

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use eventide::{
    DiscreteEventScheduler, DiscreteSchedulerConfig, EventScheduler, SchedulerStatus,
};

fn paused() -> DiscreteEventScheduler {
    DiscreteEventScheduler::new_paused(DiscreteSchedulerConfig::default())
}

#[test]
fn test_priority_ordering_scenario() {
    let scheduler = paused();
    let order: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

    for (delay, label) in [(3.0, "A"), (2.0, "B"), (0.0, "C")] {
        let order = order.clone();
        scheduler
            .do_in(delay, label, move || order.lock().push(label))
            .unwrap();
    }
    scheduler.run_until_time(3.0).unwrap();

    assert_eq!(*order.lock(), vec!["C", "B", "A"]);
    assert_eq!(scheduler.now(), 3.0);
}

#[test]
fn test_cancel_mid_queue_scenario() {
    let scheduler = paused();
    let order: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

    let handle = {
        let order = order.clone();
        scheduler
            .do_in(10.0, "X", move || order.lock().push("X"))
            .unwrap()
            .unwrap()
    };
    {
        let order = order.clone();
        scheduler
            .do_in(20.0, "Y", move || order.lock().push("Y"))
            .unwrap();
    }
    handle.cancel();

    assert_eq!(scheduler.queue_size(), 2);
    scheduler.run_until_time(30.0).unwrap();
    assert_eq!(*order.lock(), vec!["Y"]);
    assert_eq!(scheduler.queue_size(), 0);
}

#[test]
fn test_daemon_interleaving_scenario() {
    let scheduler = paused();
    let order: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

    for (time, label, daemon) in [(50.0, "A", false), (20.0, "D20", true), (60.0, "D60", true)] {
        let order = order.clone();
        scheduler
            .do_at_boxed(time, label, daemon, Box::new(move || order.lock().push(label)))
            .unwrap();
    }
    assert!(!scheduler.has_only_daemon_events());

    scheduler.run_until_time(55.0).unwrap();
    assert_eq!(*order.lock(), vec!["D20", "A"]);
    assert!(scheduler.has_only_daemon_events());
}

#[test]
fn test_bounded_run_exactness() {
    let scheduler = paused();
    let ran: Arc<Mutex<Vec<f64>>> = Arc::new(Mutex::new(Vec::new()));

    for time in [1.0, 4.0, 7.0, 7.5, 12.0] {
        let ran = ran.clone();
        scheduler
            .do_at(time, "timed", move || ran.lock().push(time))
            .unwrap();
    }
    scheduler.run_for_duration(7.5).unwrap();

    assert_eq!(scheduler.now(), 7.5);
    assert_eq!(*ran.lock(), vec![1.0, 4.0, 7.0, 7.5]);
    assert!(scheduler.is_paused());
    assert_eq!(scheduler.queue_size(), 1);
}

#[test]
fn test_now_is_monotone_across_run() {
    let scheduler = paused();
    let samples: Arc<Mutex<Vec<f64>>> = Arc::new(Mutex::new(Vec::new()));

    for time in [9.0, 3.0, 6.0, 3.0, 14.0] {
        let samples = samples.clone();
        let observer = scheduler.clone();
        scheduler
            .do_at(time, "sample", move || samples.lock().push(observer.now()))
            .unwrap();
    }
    scheduler.run_until_time(20.0).unwrap();

    let observed = samples.lock();
    assert!(
        observed.windows(2).all(|pair| pair[0] <= pair[1]),
        "now() went backwards: {observed:?}"
    );
    assert_eq!(scheduler.now(), 20.0);
}

#[test]
fn test_submissions_from_other_threads_land_in_order() {
    let scheduler = paused();
    let count = Arc::new(AtomicUsize::new(0));

    let threads: Vec<_> = (0..4)
        .map(|worker| {
            let scheduler = scheduler.clone();
            let count = count.clone();
            std::thread::spawn(move || {
                for i in 0..25 {
                    let count = count.clone();
                    scheduler
                        .do_at((worker * 25 + i) as f64, "worker event", move || {
                            count.fetch_add(1, Ordering::SeqCst);
                        })
                        .unwrap();
                }
            })
        })
        .collect();
    for thread in threads {
        thread.join().unwrap();
    }

    assert_eq!(scheduler.queue_size(), 100);
    scheduler.run_until_time(100.0).unwrap();
    assert_eq!(count.load(Ordering::SeqCst), 100);
}

#[test]
fn test_stop_from_event_body_halts_the_run() {
    let scheduler = paused();
    let order: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

    {
        let order = order.clone();
        scheduler
            .do_at(1.0, "first", move || order.lock().push("first"))
            .unwrap();
    }
    {
        let stopper = scheduler.clone();
        scheduler
            .do_at(2.0, "stopper", move || stopper.stop())
            .unwrap();
    }
    {
        let order = order.clone();
        scheduler
            .do_at(3.0, "never", move || order.lock().push("never"))
            .unwrap();
    }
    scheduler.run_until_time(10.0).unwrap();

    assert_eq!(*order.lock(), vec!["first"]);
    assert!(scheduler.is_stopped());
    assert_eq!(scheduler.status(), SchedulerStatus::Stopped);
    assert!(scheduler.do_now("silent", || {}).unwrap().is_none());
}

#[test]
fn test_do_now_runs_before_later_timed_work() {
    let scheduler = paused();
    let order: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

    {
        let order = order.clone();
        scheduler
            .do_at(5.0, "later", move || order.lock().push("later"))
            .unwrap();
    }
    {
        let inner = scheduler.clone();
        let order = order.clone();
        scheduler
            .do_at(1.0, "spawner", move || {
                order.lock().push("spawner");
                let order = order.clone();
                inner
                    .do_now("immediate", move || order.lock().push("immediate"))
                    .unwrap();
            })
            .unwrap();
    }
    scheduler.run_until_time(10.0).unwrap();

    assert_eq!(*order.lock(), vec!["spawner", "immediate", "later"]);
}
