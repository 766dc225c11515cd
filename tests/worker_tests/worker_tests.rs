//! Tests for Worker and WorkerPool
//!
//! These tests verify:
//! - The cooperative loop runs while work is available
//! - Errors are reported and do not end the loop
//! - Suspend time keeps an idle worker alive
//! - Pool stop joins every thread
//! - Pool stop gives up on a stuck worker after its timeout

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use netfront::worker::{Work, Worker, WorkerPool, WorkerState};
use netfront::{NetfrontError, Result};

// =============================================================================
// Helper Work Implementations
// =============================================================================

/// Fails every other iteration until switched off
struct Flaky {
    running: AtomicBool,
    iterations: AtomicUsize,
    errors: AtomicUsize,
}

impl Flaky {
    fn new() -> Self {
        Self {
            running: AtomicBool::new(true),
            iterations: AtomicUsize::new(0),
            errors: AtomicUsize::new(0),
        }
    }
}

impl Work for Flaky {
    type Item = usize;

    fn is_work_available(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn next_work(&self) -> Option<usize> {
        Some(self.iterations.fetch_add(1, Ordering::SeqCst))
    }

    fn do_work(&self, item: Option<usize>) -> Result<()> {
        thread::sleep(Duration::from_millis(1));
        match item {
            Some(n) if n % 2 == 1 => Err(NetfrontError::Shutdown(format!("iteration {}", n))),
            _ => Ok(()),
        }
    }

    fn on_error(&self, _err: &NetfrontError) {
        self.errors.fetch_add(1, Ordering::SeqCst);
    }
}

/// Never has work; idles with a suspend time until told to stop
struct Idle {
    wakeups: AtomicUsize,
}

impl Work for Idle {
    type Item = ();

    fn is_work_available(&self) -> bool {
        false
    }

    fn next_work(&self) -> Option<()> {
        None
    }

    fn do_work(&self, _item: Option<()>) -> Result<()> {
        Ok(())
    }

    fn suspend_time(&self) -> Option<Duration> {
        self.wakeups.fetch_add(1, Ordering::SeqCst);
        Some(Duration::from_millis(1))
    }
}

// =============================================================================
// Worker Tests
// =============================================================================

#[test]
fn test_errors_reported_and_loop_continues() {
    let work = Arc::new(Flaky::new());
    let mut worker = Worker::spawn("flaky", Arc::clone(&work), false).unwrap();

    while work.errors.load(Ordering::SeqCst) < 3 {
        thread::sleep(Duration::from_millis(1));
    }
    assert!(worker.is_alive());

    work.running.store(false, Ordering::SeqCst);
    worker.join().unwrap();
    assert_eq!(worker.state(), WorkerState::Stopped);
}

#[test]
fn test_idle_worker_suspends_until_stopped() {
    let work = Arc::new(Idle {
        wakeups: AtomicUsize::new(0),
    });
    let mut worker = Worker::spawn("idle", Arc::clone(&work), true).unwrap();

    while work.wakeups.load(Ordering::SeqCst) < 3 {
        thread::sleep(Duration::from_millis(1));
    }
    assert_eq!(worker.state(), WorkerState::Running);
    assert!(worker.is_background());

    worker.request_stop();
    worker.join().unwrap();
    assert!(!worker.is_alive());
}

#[test]
fn test_worker_thread_is_named() {
    let work = Arc::new(Flaky::new());
    work.running.store(false, Ordering::SeqCst);
    let mut worker = Worker::spawn("named-worker", work, false).unwrap();

    assert_eq!(worker.name(), "named-worker");
    worker.join().unwrap();
}

// =============================================================================
// Pool Tests
// =============================================================================

#[test]
fn test_pool_starts_and_stops_all_workers() {
    let work = Arc::new(Idle {
        wakeups: AtomicUsize::new(0),
    });
    let mut pool = WorkerPool::new();
    pool.spawn_many("pool", 8, work, false).unwrap();

    assert_eq!(pool.len(), 8);
    assert_eq!(pool.alive(), 8);
    assert_eq!(pool.workers()[3].name(), "pool-3");

    let errors = pool.stop_all(|| {}, Duration::from_millis(1), Duration::from_secs(5));
    assert!(errors.is_empty());
    assert!(pool.is_empty());
    assert_eq!(pool.alive(), 0);
}

#[test]
fn test_pool_stop_nudges_blocked_workers() {
    // Workers block on a channel until nudged
    struct Blocking {
        running: AtomicBool,
        rx: crossbeam::channel::Receiver<()>,
    }

    impl Work for Blocking {
        type Item = ();

        fn is_work_available(&self) -> bool {
            self.running.load(Ordering::SeqCst)
        }

        fn next_work(&self) -> Option<()> {
            None
        }

        fn do_work(&self, _item: Option<()>) -> Result<()> {
            let _ = self.rx.recv();
            Ok(())
        }
    }

    let (tx, rx) = crossbeam::channel::unbounded();
    let work = Arc::new(Blocking {
        running: AtomicBool::new(true),
        rx,
    });
    let mut pool = WorkerPool::new();
    pool.spawn_many("blocked", 4, Arc::clone(&work), false).unwrap();

    work.running.store(false, Ordering::SeqCst);
    let errors = pool.stop_all(
        || {
            let _ = tx.send(());
        },
        Duration::from_millis(1),
        Duration::from_secs(5),
    );

    assert!(errors.is_empty());
    assert_eq!(pool.alive(), 0);
}

#[test]
fn test_pool_stop_detaches_stuck_worker_after_timeout() {
    // Ignores wakes: stays inside do_work until released
    struct Stuck {
        entered: crossbeam::channel::Sender<()>,
        release: crossbeam::channel::Receiver<()>,
    }

    impl Work for Stuck {
        type Item = ();

        fn is_work_available(&self) -> bool {
            true
        }

        fn next_work(&self) -> Option<()> {
            None
        }

        fn do_work(&self, _item: Option<()>) -> Result<()> {
            let _ = self.entered.try_send(());
            let _ = self.release.recv_timeout(Duration::from_secs(10));
            Ok(())
        }
    }

    let (entered_tx, entered_rx) = crossbeam::channel::bounded(1);
    let (release_tx, release_rx) = crossbeam::channel::bounded(1);
    let work = Arc::new(Stuck {
        entered: entered_tx,
        release: release_rx,
    });
    let mut pool = WorkerPool::new();
    pool.spawn_many("stuck", 1, work, false).unwrap();
    entered_rx.recv_timeout(Duration::from_secs(2)).unwrap();

    let started = Instant::now();
    let errors = pool.stop_all(|| {}, Duration::from_millis(1), Duration::from_millis(100));

    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(errors.len(), 1);
    assert!(matches!(errors[0], NetfrontError::Shutdown(_)));
    assert!(pool.is_empty());

    let _ = release_tx.send(());
}
