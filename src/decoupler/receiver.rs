//! Receiver trait
//!
//! Consumers of decoupled items. Receivers are compared by pointer identity,
//! so unregistering needs the same `Arc` that was registered.

use std::sync::Arc;

/// An application-registered consumer of items.
///
/// `receive` runs on the decoupler's dispatch thread. A receiver may block;
/// doing so delays only the deliveries queued behind it.
pub trait Receiver<T>: Send + Sync {
    fn receive(&self, item: T);
}

impl<T, F> Receiver<T> for F
where
    F: Fn(T) + Send + Sync,
{
    fn receive(&self, item: T) {
        self(item)
    }
}

/// True if both handles point at the same receiver
pub(crate) fn same_receiver<T>(a: &Arc<dyn Receiver<T>>, b: &Arc<dyn Receiver<T>>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}
