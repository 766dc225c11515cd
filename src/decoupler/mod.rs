//! Decoupler Module
//!
//! Asynchronous fan-out mailbox between producers (worker threads) and
//! application receivers.
//!
//! ## Responsibilities
//! - Accept items from any thread without blocking the producer
//! - Buffer items while no receiver is registered
//! - Flush the buffer, in order, on the first registration
//! - Deliver every later item to all receivers registered at `add` time
//!
//! ## Dispatch Model
//! ```text
//!  add() ──┐                        ┌──▶ receiver A
//!  add() ──┼──▶ [lock] ──▶ jobs ──▶ dispatch thread ──▶ receiver B
//!  add() ──┘      │
//!                 └──▶ pending (no receivers yet)
//! ```

mod queue;
mod receiver;

pub use queue::Decoupler;
pub use receiver::Receiver;
