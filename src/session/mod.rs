//! Device session.
//!
//! A [`Session`] is the public face of the crate: it opens the
//! notification connection, routes commands through the pool, runs the
//! background poller and wakes the device.
//!
//! # Components
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Session`] | Session facade |
//! | [`SessionBuilder`] | Fluent configuration builder |
//! | [`SessionOptions`] | Timing, sizing and background settings |
//! | [`SessionEvent`] | Events delivered to subscribers |
//! | [`SessionState`] | Connection state machine |
//! | [`NotificationReader`] | Read loop for the notification connection |

// ============================================================================
// Submodules
// ============================================================================

/// Fluent builder for sessions.
pub mod builder;

/// Session facade.
pub mod core;

/// Session state and subscriber events.
pub mod events;

/// Session options.
pub mod options;

/// Background probe and refresh tasks.
mod poller;

/// FIFO command queue.
mod queue;

/// Notification read loop.
pub mod reader;

// ============================================================================
// Re-exports
// ============================================================================

pub use builder::SessionBuilder;
pub use core::Session;
pub use events::{EventHandler, SessionEvent, SessionState};
pub use options::{DEFAULT_PORT, DEVICE_IDLE_CEILING, SessionOptions};
pub use reader::{NotificationReader, ReaderConfig, ReaderExit};
