//! Background work on dedicated connections.
//!
//! None of these tasks touch the command pool, so a slow device never
//! starves user commands of connections.
//!
//! | Task | Cadence | Connection |
//! |------|---------|------------|
//! | [`run`] power probe | `probe_interval` | dedicated, opened and closed |
//! | [`run`] status refresh | `poll_interval`, only while on | dedicated, one per batch |
//! | [`watch_power_on`] | `probe_interval` until `power_on_window` elapses | dedicated |
//! | [`fetch_device_info`] | once after open | pooled |

// ============================================================================
// Imports
// ============================================================================

use std::sync::{Arc, Weak};

use tokio::time::{Instant, MissedTickBehavior, interval_at, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::protocol::Command;
use crate::transport::{ConnectionPool, OperationClass};

use super::core::SessionInner;
use super::events::SessionState;

// ============================================================================
// Poller
// ============================================================================

/// Probes power and refreshes status until cancelled or the session drops.
pub(crate) async fn run(inner: Weak<SessionInner>, cancel: CancellationToken) {
    let Some(first) = inner.upgrade() else {
        return;
    };
    let probe_every = first.options.probe_interval;
    let poll_every = first.options.poll_interval;
    drop(first);

    let mut probe = interval_at(Instant::now() + probe_every, probe_every);
    probe.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut poll = interval_at(Instant::now() + poll_every, poll_every);
    poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

    debug!("Background poller started");

    tokio::select! {
        () = cancel.cancelled() => {}
        () = async {
            loop {
                tokio::select! {
                    _ = probe.tick() => {
                        let Some(inner) = inner.upgrade() else { break };
                        probe_power(&inner).await;
                    }
                    _ = poll.tick() => {
                        let Some(inner) = inner.upgrade() else { break };
                        refresh_status(&inner).await;
                    }
                }
            }
        } => {}
    }

    debug!("Background poller stopped");
}

async fn probe_power(inner: &Arc<SessionInner>) {
    if inner.state() == SessionState::PoweringOn {
        return;
    }

    match inner.strategy.probe().await {
        Ok(()) => inner.set_power(true),
        Err(e) if e.is_connect_error() => {
            debug!(error = %e, "Power probe unanswered");
            inner.set_power(false);
        }
        Err(e) => trace!(error = %e, "Power probe inconclusive"),
    }
}

async fn refresh_status(inner: &Arc<SessionInner>) {
    if !inner.is_on() || inner.state() == SessionState::PoweringOn {
        return;
    }

    match inner
        .strategy
        .run_batch(OperationClass::Poll, &Command::refresh_queries())
        .await
    {
        Ok(frames) => {
            trace!(count = frames.len(), "Status refreshed");
            for frame in frames {
                inner.handle_frame(frame);
            }
        }
        Err(e) => debug!(error = %e, "Status refresh failed"),
    }
}

// ============================================================================
// Power-On Watch
// ============================================================================

/// Probes until the device answers or the power-on window closes.
pub(crate) async fn watch_power_on(inner: Weak<SessionInner>, cancel: CancellationToken) {
    let Some(first) = inner.upgrade() else {
        return;
    };
    let step = first.options.probe_interval;
    let deadline = Instant::now() + first.options.power_on_window;
    drop(first);

    let reachable = tokio::select! {
        () = cancel.cancelled() => return,
        reachable = async {
            loop {
                let Some(inner) = inner.upgrade() else { return None };
                if inner.strategy.probe().await.is_ok() {
                    return Some(true);
                }
                drop(inner);

                let now = Instant::now();
                if now >= deadline {
                    return Some(false);
                }
                sleep(step.min(deadline - now)).await;
            }
        } => reachable,
    };

    if let (Some(reachable), Some(inner)) = (reachable, inner.upgrade()) {
        inner.finish_power_on(reachable);
    }
}

// ============================================================================
// Initial Fetch
// ============================================================================

/// Runs the refresh queries once over the pool.
pub(crate) async fn fetch_device_info(
    inner: Weak<SessionInner>,
    pool: ConnectionPool,
    cancel: CancellationToken,
) {
    tokio::select! {
        () = cancel.cancelled() => {}
        () = async {
            for command in Command::refresh_queries() {
                let Some(inner) = inner.upgrade() else { return };
                match pool.send_command(&command, inner.options.reply_timeout).await {
                    Ok(reply) => {
                        if let Some(data) = reply.data() {
                            inner.handle_frame(data.clone());
                        }
                    }
                    Err(e) if e.is_connection_error() => {
                        debug!(command = %command, error = %e, "Device info fetch aborted");
                        return;
                    }
                    Err(e) => debug!(command = %command, error = %e, "Device info query failed"),
                }
            }
        } => {}
    }
}
