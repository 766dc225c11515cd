//! Worker Module
//!
//! Cooperative "repeat while work is available" threads.
//!
//! ## Responsibilities
//! - Describe a unit of repeatable work through the [`Work`] trait
//! - Run it on named OS threads with `Running → Stopping → Stopped` states
//! - Report per-iteration errors without ending the loop
//!
//! ## Loop
//! ```text
//! while state == Running:
//!     if work.is_work_available():
//!         work.do_work(work.next_work())      // Err → work.on_error()
//!     else if let Some(d) = work.suspend_time():
//!         sleep(d)
//!     else:
//!         break
//! ```

mod pool;

use std::time::Duration;

use crate::error::{NetfrontError, Result};

pub use pool::{Worker, WorkerPool, WorkerState};

/// A source of repeatable work driven by a [`Worker`]
pub trait Work: Send + Sync + 'static {
    /// Item handed from `next_work` to `do_work`; use `()` when there is none
    type Item: Send;

    /// Whether the loop should run another iteration now
    fn is_work_available(&self) -> bool;

    /// Obtain the next work item, if the work has one
    fn next_work(&self) -> Option<Self::Item>;

    /// Perform one iteration
    fn do_work(&self, item: Option<Self::Item>) -> Result<()>;

    /// How long to sleep when no work is available. `None` ends the loop.
    fn suspend_time(&self) -> Option<Duration> {
        None
    }

    /// Called with every error `do_work` returns
    fn on_error(&self, err: &NetfrontError) {
        tracing::warn!("Worker iteration failed: {}", err);
    }
}
