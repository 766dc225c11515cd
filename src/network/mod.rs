//! Network Module
//!
//! TCP/UDP front-end.
//!
//! ## Architecture
//! - One poller thread funnels readiness from a shared `mio::Poll`
//! - Worker pool accepts streams and receives datagrams
//! - Connections queued through the decoupler to receivers

mod listener;
mod multiplexer;
mod server;

pub use listener::Listener;
pub use multiplexer::{Multiplexer, Readiness};
pub use server::{ConnectionReceiver, Server, ServerState};
