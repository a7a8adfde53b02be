//! TCP transport layer.
//!
//! Every session to the device is a [`Transport`]: a socket framed into
//! lines, greeted with `WELCOME`, one command in flight at a time.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────┐                         ┌──────────────┐
//! │  Session             │                         │  Device      │
//! │                      │   notification (1)      │              │
//! │  NotificationReader ─┼────────────────────────►│  :44077      │
//! │  ConnectionPool     ─┼──── pooled (0..n) ─────►│              │
//! │  BackgroundStrategy ─┼──── dedicated (0..n) ──►│              │
//! └──────────────────────┘                         └──────────────┘
//!          all sessions hold a permit from one SessionBudget
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `budget` | Device-wide session ceiling |
//! | `connection` | Framed line transport |
//! | `dedicated` | One-shot connections for background work |
//! | `pool` | Command connection pool with idle eviction |

// ============================================================================
// Submodules
// ============================================================================

/// Device-wide session ceiling.
pub mod budget;

/// Framed line transport over TCP.
pub mod connection;

/// One-shot connections for background work.
pub mod dedicated;

/// Command connection pool.
pub mod pool;

// ============================================================================
// Re-exports
// ============================================================================

pub use budget::{SessionBudget, SessionPermit};
pub use connection::{Transport, TransportConfig};
pub use dedicated::{BackgroundStrategy, OperationClass, Route};
pub use pool::{ConnectionPool, FrameSink, PoolConfig, PoolStats, PooledConnection};
