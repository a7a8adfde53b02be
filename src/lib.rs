//! madVR Envy - Async client library for the Envy IP control protocol.
//!
//! The Envy video processor accepts a small number of simultaneous TCP
//! sessions on its control port and drops sessions that stay idle for 60
//! seconds. This library keeps one long-lived session for unsolicited
//! notifications, sends commands over a small pool of short-lived
//! sessions, and runs background polling on dedicated sessions so it never
//! competes with user commands.
//!
//! # Architecture
//!
//! - **Notification link**: one session, read continuously, heartbeat to
//!   stay under the device idle ceiling
//! - **Command pool**: connections reused within a 10 second idle window,
//!   then closed
//! - **Background work**: power probes and status refresh on their own
//!   sessions, never pooled
//! - **Wake**: Wake-on-LAN over UDP, out of band
//!
//! Every session draws a permit from one budget, so the device ceiling
//! holds no matter how the work is interleaved.
//!
//! # Quick Start
//!
//! ```no_run
//! use madvr_client::{Command, Result, Session, SessionEvent};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let session = Session::builder()
//!         .host("192.168.1.50")
//!         .mac("01:02:03:04:05:06")
//!         .build()?;
//!
//!     session.subscribe(|event| {
//!         if let SessionEvent::StatusUpdated { status } = event {
//!             println!("{}", status.to_json());
//!         }
//!     });
//!
//!     session.open_connection().await?;
//!     session.send_command(Command::key_press("MENU")?).await?;
//!     session.close_connection().await;
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`session`] | [`Session`] facade, builder, options and events |
//! | [`protocol`] | Line frames, commands, replies, notifications, status |
//! | [`transport`] | Connections, pool, session budget, dedicated strategy |
//! | [`wake`] | Wake-on-LAN |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Type-safe ID wrappers |

// ============================================================================
// Modules
// ============================================================================

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Type-safe identifiers for connections and subscriptions.
pub mod identifiers;

/// Device line protocol.
pub mod protocol;

/// Device session facade.
///
/// Use [`Session::builder()`] to create a session.
pub mod session;

/// TCP transport layer.
pub mod transport;

/// Wake-on-LAN.
pub mod wake;

// ============================================================================
// Re-exports
// ============================================================================

// Session types
pub use session::{
    EventHandler, Session, SessionBuilder, SessionEvent, SessionOptions, SessionState,
};

// Protocol types
pub use protocol::{Command, DeviceStatus, Frame, Notification, Reply};

// Transport types
pub use transport::{OperationClass, PoolStats};

// Wake types
pub use wake::{MacAddress, WakeTarget};

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::{ConnectionId, SubscriptionId};
