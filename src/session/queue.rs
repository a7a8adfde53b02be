//! FIFO command queue.
//!
//! Fire-and-forget commands are queued and sent one at a time over the
//! pool by a task that lives as long as the session is open.
//!
//! | Outcome | Queue |
//! |---------|-------|
//! | reply received | data line folded into the status |
//! | device answers `ERROR` | command dropped, logged at `warn` |
//! | connection or slot failure | command kept at the front, retried after `probe_interval`; power commands are dropped |

// ============================================================================
// Imports
// ============================================================================

use std::collections::VecDeque;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::protocol::Command;
use crate::transport::ConnectionPool;

use super::core::SessionInner;
use super::events::SessionState;

// ============================================================================
// CommandQueue
// ============================================================================

/// Pending commands in send order.
#[derive(Default)]
pub(crate) struct CommandQueue {
    pending: Mutex<VecDeque<Command>>,
    ready: Notify,
}

impl CommandQueue {
    /// Appends `command`. Returns the queue length afterwards.
    pub(crate) fn push(&self, command: Command) -> usize {
        let len = {
            let mut pending = self.pending.lock();
            pending.push_back(command);
            pending.len()
        };
        self.ready.notify_one();
        len
    }

    /// Puts `command` back at the head.
    fn requeue(&self, command: Command) {
        self.pending.lock().push_front(command);
    }

    /// Drops every pending command. Returns how many were dropped.
    pub(crate) fn clear(&self) -> usize {
        let mut pending = self.pending.lock();
        let count = pending.len();
        pending.clear();
        count
    }

    pub(crate) fn len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Waits for the next command.
    async fn next(&self) -> Command {
        loop {
            let ready = self.ready.notified();
            tokio::pin!(ready);
            ready.as_mut().enable();

            if let Some(command) = self.pending.lock().pop_front() {
                return command;
            }
            ready.await;
        }
    }
}

// ============================================================================
// Drain Task
// ============================================================================

/// Sends queued commands in order until cancelled or the session drops.
pub(crate) async fn process(
    inner: Weak<SessionInner>,
    queue: Arc<CommandQueue>,
    pool: ConnectionPool,
    cancel: CancellationToken,
) {
    let Some(first) = inner.upgrade() else {
        return;
    };
    let wait = first.options.reply_timeout;
    let backoff = first.options.probe_interval;
    drop(first);

    debug!("Command queue started");

    tokio::select! {
        () = cancel.cancelled() => {}
        () = async {
            loop {
                let command = queue.next().await;
                let Some(inner) = inner.upgrade() else { break };

                if inner.state() == SessionState::PoweringOn {
                    queue.requeue(command);
                    drop(inner);
                    sleep(backoff).await;
                    continue;
                }

                match pool.send_command(&command, wait).await {
                    Ok(reply) => {
                        trace!(command = %command, "Queued command sent");
                        if let Some(data) = reply.data() {
                            inner.handle_frame(data.clone());
                        }
                    }
                    Err(e) if e.is_connection_error() || e.is_recoverable() => {
                        if command.is_power_command() {
                            warn!(command = %command, error = %e, "Dropping queued power command");
                        } else {
                            debug!(command = %command, error = %e, "Queued command deferred");
                            queue.requeue(command);
                        }
                        drop(inner);
                        sleep(backoff).await;
                    }
                    Err(e) => warn!(command = %command, error = %e, "Queued command failed"),
                }
            }
        } => {}
    }

    debug!(pending = queue.len(), "Command queue stopped");
}

// ============================================================================
// Tests
// ============================================================================
