//! # netfront
//!
//! A protocol-agnostic connection front-end with:
//! - One TCP listener and one UDP socket bound to the same address/port
//! - A single readiness multiplexer shared by a pool of worker threads
//! - A decoupling fan-out queue between I/O threads and application receivers
//! - Independent read/write views for every accepted stream
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │            TCP listener + UDP socket (same port)            │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │ readiness (mio)
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                 Poller thread (funnel)                      │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │ readiness batches
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │           Worker pool (accept / receive_from)               │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │ Arc<Connection>
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │          Decoupler (buffer until a receiver exists)         │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │ dispatch thread
//!          ┌────────────┴────────────┐
//!          ▼                         ▼
//!   ┌─────────────┐          ┌─────────────┐
//!   │  Receiver   │   ...    │  Receiver   │
//!   └─────────────┘          └─────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod connection;
pub mod decoupler;
pub mod network;
pub mod worker;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{NetfrontError, Result};
pub use config::{Hooks, ServerConfig};
pub use connection::{Connection, DatagramConnection, StreamConnection};
pub use decoupler::{Decoupler, Receiver};
pub use network::{Server, ServerState};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of netfront
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
