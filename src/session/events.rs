//! Session state and subscriber events.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::Serialize;
use tracing::trace;

use crate::identifiers::SubscriptionId;
use crate::protocol::{DeviceStatus, Notification};

// ============================================================================
// SessionState
// ============================================================================

/// Connection state of a [`Session`](super::Session).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No notification connection.
    #[default]
    Disconnected,
    /// `open_connection` in progress.
    Connecting,
    /// Notification connection up.
    Connected,
    /// Wake signal sent, waiting for the device to answer.
    PoweringOn,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::PoweringOn => "powering-on",
        })
    }
}

// ============================================================================
// SessionEvent
// ============================================================================

/// Event delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    /// The session state changed.
    StateChanged {
        /// Previous state.
        from: SessionState,
        /// New state.
        to: SessionState,
    },
    /// A line of device output, in wire order.
    Notification {
        /// The classified line.
        notification: Notification,
    },
    /// The device status changed.
    StatusUpdated {
        /// Status after the change.
        status: DeviceStatus,
    },
    /// The device power state changed.
    PowerChanged {
        /// `true` if the device is now on.
        is_on: bool,
    },
    /// The notification connection was lost.
    Disconnected {
        /// What ended the connection.
        reason: String,
    },
    /// A power-on attempt finished.
    PowerOnComplete {
        /// `true` if the device answered within the power-on window.
        reachable: bool,
    },
}

// ============================================================================
// Subscribers
// ============================================================================

/// Subscriber callback.
///
/// Runs on the task that produced the event; keep it short.
pub type EventHandler = Arc<dyn Fn(&SessionEvent) + Send + Sync>;

/// Registry of subscriber callbacks.
#[derive(Default)]
pub(crate) struct Subscribers {
    handlers: RwLock<FxHashMap<SubscriptionId, EventHandler>>,
}

impl Subscribers {
    /// Registers a handler.
    pub(crate) fn subscribe(&self, handler: EventHandler) -> SubscriptionId {
        let id = SubscriptionId::next();
        self.handlers.write().insert(id, handler);
        trace!(subscription = %id, "Subscribed");
        id
    }

    /// Removes a handler. Returns `false` if it was not registered.
    pub(crate) fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.handlers.write().remove(&id).is_some()
    }

    /// Number of registered handlers.
    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.handlers.read().len()
    }

    /// Delivers `event` to every handler in subscription order.
    ///
    /// Handlers run outside the registry lock, so they may subscribe or
    /// unsubscribe.
    pub(crate) fn emit(&self, event: &SessionEvent) {
        let mut snapshot: Vec<(SubscriptionId, EventHandler)> = self
            .handlers
            .read()
            .iter()
            .map(|(id, handler)| (*id, Arc::clone(handler)))
            .collect();
        snapshot.sort_unstable_by_key(|(id, _)| *id);

        for (_, handler) in snapshot {
            handler(event);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
