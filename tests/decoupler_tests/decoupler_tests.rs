//! Tests for Decoupler
//!
//! These tests verify:
//! - Buffering while no receiver is registered
//! - FIFO order across the first-registration flush
//! - Broadcast to every registered receiver
//! - Unregistration during active dispatch
//! - Stop semantics
//! - Producers never wait on slow receivers

use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam::channel;
use netfront::{Decoupler, Receiver};

const TIMEOUT: Duration = Duration::from_secs(2);

// =============================================================================
// Helper Functions
// =============================================================================

/// A receiver that forwards every item into a channel the test can read
fn forwarding_receiver<T: Send + 'static>() -> (Arc<dyn Receiver<T>>, channel::Receiver<T>) {
    let (tx, rx) = channel::unbounded();
    let receiver: Arc<dyn Receiver<T>> = Arc::new(move |item: T| {
        let _ = tx.send(item);
    });
    (receiver, rx)
}

fn collect<T>(rx: &channel::Receiver<T>, count: usize) -> Vec<T> {
    (0..count)
        .map(|_| rx.recv_timeout(TIMEOUT).expect("item not delivered in time"))
        .collect()
}

// =============================================================================
// Buffering Tests
// =============================================================================

#[test]
fn test_items_buffered_without_receiver() {
    let decoupler = Decoupler::<u32>::new().unwrap();

    decoupler.add(1);
    decoupler.add(2);
    decoupler.add(3);

    assert_eq!(decoupler.pending_len(), 3);
}

#[test]
fn test_buffered_items_flushed_in_order_on_registration() {
    let decoupler = Decoupler::<&'static str>::new().unwrap();
    decoupler.add("first");
    decoupler.add("second");

    let (receiver, rx) = forwarding_receiver();
    decoupler.register_receiver(receiver);

    assert_eq!(collect(&rx, 2), vec!["first", "second"]);
    assert_eq!(decoupler.pending_len(), 0);
}

#[test]
fn test_flush_then_live_items_keep_fifo() {
    let decoupler = Decoupler::<u32>::new().unwrap();
    for i in 0..50 {
        decoupler.add(i);
    }

    let (receiver, rx) = forwarding_receiver();
    decoupler.register_receiver(receiver);

    for i in 50..100 {
        decoupler.add(i);
    }

    assert_eq!(collect(&rx, 100), (0..100).collect::<Vec<_>>());
}

#[test]
fn test_buffer_refills_after_last_receiver_leaves() {
    let decoupler = Decoupler::<u32>::new().unwrap();
    let (first, first_rx) = forwarding_receiver();
    decoupler.register_receiver(Arc::clone(&first));
    decoupler.add(1);
    assert_eq!(collect(&first_rx, 1), vec![1]);

    decoupler.unregister_receiver(&first);
    decoupler.add(2);
    assert_eq!(decoupler.pending_len(), 1);

    let (second, second_rx) = forwarding_receiver();
    decoupler.register_receiver(second);
    assert_eq!(collect(&second_rx, 1), vec![2]);
    assert!(first_rx.try_recv().is_err());
}

// =============================================================================
// Fan-out Tests
// =============================================================================

#[test]
fn test_every_receiver_gets_every_item() {
    let decoupler = Decoupler::<u32>::new().unwrap();
    let (a, a_rx) = forwarding_receiver();
    let (b, b_rx) = forwarding_receiver();
    decoupler.register_receiver(a);
    decoupler.register_receiver(b);

    decoupler.add(10);
    decoupler.add(20);

    assert_eq!(collect(&a_rx, 2), vec![10, 20]);
    assert_eq!(collect(&b_rx, 2), vec![10, 20]);
}

#[test]
fn test_flush_reaches_all_receivers_present() {
    let decoupler = Decoupler::<u32>::new().unwrap();
    decoupler.add(7);

    let (a, a_rx) = forwarding_receiver();
    decoupler.register_receiver(a);
    assert_eq!(collect(&a_rx, 1), vec![7]);

    // The buffer is empty now; a later registration gets nothing old
    let (b, b_rx) = forwarding_receiver();
    decoupler.register_receiver(b);
    decoupler.add(8);
    assert_eq!(collect(&a_rx, 1), vec![8]);
    assert_eq!(collect(&b_rx, 1), vec![8]);
}

// =============================================================================
// Unregistration Tests
// =============================================================================

#[test]
fn test_unregister_during_dispatch() {
    let decoupler = Decoupler::<u32>::new().unwrap();

    let (entered_tx, entered_rx) = channel::bounded::<()>(1);
    let (release_tx, release_rx) = channel::bounded::<()>(1);
    let (blocked_tx, blocked_rx) = channel::unbounded::<u32>();

    // Blocks inside its first delivery until the test releases it
    let blocking: Arc<dyn Receiver<u32>> = Arc::new(move |item: u32| {
        let _ = entered_tx.try_send(());
        let _ = release_rx.recv_timeout(TIMEOUT);
        let _ = blocked_tx.send(item);
    });
    let (observer, observer_rx) = forwarding_receiver();

    decoupler.register_receiver(Arc::clone(&blocking));
    decoupler.register_receiver(observer);

    decoupler.add(1);
    entered_rx.recv_timeout(TIMEOUT).unwrap();

    assert!(decoupler.unregister_receiver(&blocking));
    decoupler.add(2);
    release_tx.send(()).unwrap();

    // In-flight item completes; the one added after unregistering does not arrive
    assert_eq!(collect(&blocked_rx, 1), vec![1]);
    assert_eq!(collect(&observer_rx, 2), vec![1, 2]);
    assert!(blocked_rx.try_recv().is_err());
}

#[test]
fn test_unregister_unknown_receiver() {
    let decoupler = Decoupler::<u32>::new().unwrap();
    let (receiver, _rx) = forwarding_receiver();

    assert!(!decoupler.unregister_receiver(&receiver));
}

// =============================================================================
// Stop Tests
// =============================================================================

#[test]
fn test_stop_discards_buffered_items() {
    let decoupler = Decoupler::<u32>::new().unwrap();
    decoupler.add(1);
    decoupler.add(2);

    decoupler.stop();

    let (receiver, rx) = forwarding_receiver();
    decoupler.register_receiver(receiver);
    decoupler.add(3);

    assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    assert_eq!(decoupler.pending_len(), 0);
    assert_eq!(decoupler.receiver_count(), 0);
}

#[test]
fn test_stop_twice_is_harmless() {
    let decoupler = Decoupler::<u32>::new().unwrap();
    decoupler.stop();
    decoupler.stop();
    assert!(decoupler.is_stopped());
}

// =============================================================================
// Producer Isolation Tests
// =============================================================================

#[test]
fn test_slow_receiver_does_not_block_add() {
    let decoupler = Decoupler::<u32>::new().unwrap();
    let (done_tx, done_rx) = channel::unbounded();
    let slow: Arc<dyn Receiver<u32>> = Arc::new(move |item: u32| {
        std::thread::sleep(Duration::from_millis(50));
        let _ = done_tx.send(item);
    });
    decoupler.register_receiver(slow);

    let started = Instant::now();
    for i in 0..10 {
        decoupler.add(i);
    }
    assert!(started.elapsed() < Duration::from_millis(100));

    assert_eq!(collect(&done_rx, 10), (0..10).collect::<Vec<_>>());
}

#[test]
fn test_panicking_receiver_does_not_stop_dispatch() {
    let decoupler = Decoupler::<u32>::new().unwrap();
    let faulty: Arc<dyn Receiver<u32>> = Arc::new(|item: u32| {
        if item == 1 {
            panic!("receiver failure");
        }
    });
    let (observer, rx) = forwarding_receiver();
    decoupler.register_receiver(faulty);
    decoupler.register_receiver(observer);

    decoupler.add(1);
    decoupler.add(2);

    assert_eq!(collect(&rx, 2), vec![1, 2]);
}

#[test]
fn test_concurrent_producers_deliver_everything() {
    let decoupler = Arc::new(Decoupler::<u32>::new().unwrap());
    let (receiver, rx) = forwarding_receiver();
    decoupler.register_receiver(receiver);

    let producers: Vec<_> = (0..4)
        .map(|p| {
            let decoupler = Arc::clone(&decoupler);
            std::thread::spawn(move || {
                for i in 0..250 {
                    decoupler.add(p * 1000 + i);
                }
            })
        })
        .collect();
    for producer in producers {
        producer.join().unwrap();
    }

    let mut items = collect(&rx, 1000);
    items.sort_unstable();
    items.dedup();
    assert_eq!(items.len(), 1000);
}
