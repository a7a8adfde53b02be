//! Background task connection strategy.
//!
//! Scheduled work (polling, power-on probing) must neither wait behind user
//! commands for a pooled slot nor have its replies mistaken for theirs. It
//! runs on a dedicated connection that is opened, used, and closed within
//! one operation, and never enters the pool.
//!
//! | Operation | Route |
//! |-----------|-------|
//! | [`OperationClass::UserCommand`] | [`Route::Pooled`] |
//! | [`OperationClass::DirectCommand`] | [`Route::Dedicated`] |
//! | [`OperationClass::Poll`] | [`Route::Dedicated`] |
//! | [`OperationClass::PowerProbe`] | [`Route::Dedicated`] |
//! | [`OperationClass::Wake`] | [`Route::OutOfBand`] |

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use tokio::time::timeout;
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::protocol::{Command, Frame, Reply};

use super::budget::{SessionBudget, SessionPermit};
use super::connection::{Transport, TransportConfig, as_millis};

// ============================================================================
// Routing
// ============================================================================

/// Kinds of device work, by who issues them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationClass {
    /// Command issued by the calling application.
    UserCommand,
    /// User command that bypasses the pool.
    DirectCommand,
    /// Scheduled status refresh.
    Poll,
    /// Reachability check, e.g. while waiting for power-on.
    PowerProbe,
    /// Wake-on-LAN broadcast.
    Wake,
}

/// Where an operation runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Route {
    /// Shared command pool.
    Pooled,
    /// Connection opened and closed for this operation alone.
    Dedicated,
    /// No TCP session at all.
    OutOfBand,
}

impl OperationClass {
    /// Returns the route for this class.
    #[inline]
    #[must_use]
    pub const fn route(self) -> Route {
        match self {
            Self::UserCommand => Route::Pooled,
            Self::DirectCommand | Self::Poll | Self::PowerProbe => Route::Dedicated,
            Self::Wake => Route::OutOfBand,
        }
    }
}

// ============================================================================
// BackgroundStrategy
// ============================================================================

/// Runs background operations on one-shot connections.
#[derive(Debug, Clone)]
pub struct BackgroundStrategy {
    addr: String,
    transport: TransportConfig,
    budget: SessionBudget,
    reply_timeout: Duration,
}

impl BackgroundStrategy {
    /// Creates a strategy for the device at `addr`.
    #[must_use]
    pub fn new(
        addr: impl Into<String>,
        transport: TransportConfig,
        budget: SessionBudget,
        reply_timeout: Duration,
    ) -> Self {
        Self {
            addr: addr.into(),
            transport,
            budget,
            reply_timeout,
        }
    }

    /// Opens a session and closes it again.
    ///
    /// Success means the device is up and answering on its control port.
    ///
    /// # Errors
    ///
    /// Any connect error, or [`Error::Timeout`] if no session slot frees up.
    pub async fn probe(&self) -> Result<()> {
        let (mut transport, _permit) = self.open(OperationClass::PowerProbe).await?;
        transport.close().await;
        Ok(())
    }

    /// Runs `commands` in order on one dedicated connection.
    ///
    /// Returns every frame read: reply data lines and unsolicited lines,
    /// in arrival order. A command the device rejects is skipped; any
    /// connection error aborts the batch.
    ///
    /// # Errors
    ///
    /// Any connect error, or the first error that invalidates the
    /// connection.
    pub async fn run_batch(&self, class: OperationClass, commands: &[Command]) -> Result<Vec<Frame>> {
        let (mut transport, _permit) = self.open(class).await?;
        let mut frames = Vec::new();
        let mut failure = None;

        for command in commands {
            match transport
                .exchange(command, self.reply_timeout, &mut frames)
                .await
            {
                Ok(reply) => {
                    frames.extend(reply.into_frames().into_iter().filter(|f| f.title() != "OK"));
                }
                Err(e) if !e.invalidates_connection() => {
                    debug!(command = %command, error = %e, "Background command skipped");
                }
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }

        transport.close().await;
        match failure {
            Some(e) => Err(e),
            None => Ok(frames),
        }
    }

    /// Sends one command on its own connection and closes it.
    ///
    /// Lines that are not part of the reply are appended to `unsolicited`.
    ///
    /// # Errors
    ///
    /// Any connect error, [`Error::CommandRejected`], or any exchange error.
    pub async fn send_once(
        &self,
        command: &Command,
        unsolicited: &mut Vec<Frame>,
    ) -> Result<Reply> {
        let (mut transport, _permit) = self.open(OperationClass::DirectCommand).await?;
        let result = transport
            .exchange(command, self.reply_timeout, unsolicited)
            .await;
        transport.close().await;
        result
    }

    async fn open(&self, class: OperationClass) -> Result<(Transport, SessionPermit)> {
        debug_assert_eq!(class.route(), Route::Dedicated);

        let wait = self.transport.connect_timeout;
        let permit = match timeout(wait, self.budget.acquire()).await {
            Ok(permit) => permit?,
            Err(_) => return Err(Error::timeout("dedicated session slot", as_millis(wait))),
        };

        let transport = Transport::connect(&self.addr, &self.transport).await?;
        trace!(conn_id = %transport.id(), ?class, "Dedicated connection opened");
        Ok((transport, permit))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_routes() {
        assert_eq!(OperationClass::UserCommand.route(), Route::Pooled);
        assert_eq!(OperationClass::DirectCommand.route(), Route::Dedicated);
        assert_eq!(OperationClass::Poll.route(), Route::Dedicated);
        assert_eq!(OperationClass::PowerProbe.route(), Route::Dedicated);
        assert_eq!(OperationClass::Wake.route(), Route::OutOfBand);
    }

    #[tokio::test]
    async fn test_probe_without_slot_times_out() {
        let budget = SessionBudget::new(1);
        let _held = budget.try_acquire().expect("slot");

        let config = TransportConfig {
            connect_timeout: Duration::from_millis(20),
            ..TransportConfig::default()
        };
        let strategy = BackgroundStrategy::new("127.0.0.1:1", config, budget, Duration::from_secs(1));

        let err = strategy.probe().await.unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));
    }
}
