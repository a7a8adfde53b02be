//! Notification reader task.
//!
//! Owns the single long-lived connection for unsolicited device output and
//! hands every frame, in wire order, to a sink. The reader never
//! reconnects: when the link dies it returns [`ReaderExit::Lost`] and the
//! session decides what to do.
//!
//! | Event | Action |
//! |-------|--------|
//! | frame received | forward to sink, reset silence counter |
//! | read timeout | count; `max_silent_reads` in a row ends the loop |
//! | heartbeat due | write `Heartbeat` |
//! | EOF / reset / oversize line | end the loop |
//! | cancelled | say `Bye`, close, end the loop |

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::time::{Instant, Interval, MissedTickBehavior, interval_at, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::protocol::{Frame, HEARTBEAT};
use crate::transport::connection::as_millis;
use crate::transport::{FrameSink, SessionPermit, Transport};

// ============================================================================
// ReaderConfig
// ============================================================================

/// Reader timing.
#[derive(Debug, Clone)]
pub struct ReaderConfig {
    /// Silence counted as one missed read.
    pub read_timeout: Duration,
    /// Consecutive missed reads that end the loop.
    pub max_silent_reads: u32,
    /// Keep-alive interval, if any.
    pub heartbeat: Option<Duration>,
}

// ============================================================================
// ReaderExit
// ============================================================================

/// Why the reader stopped.
#[derive(Debug)]
pub enum ReaderExit {
    /// Stopped on request.
    Cancelled,
    /// The connection failed or went silent.
    Lost(Error),
}

// ============================================================================
// NotificationReader
// ============================================================================

/// Reads the notification connection until cancelled or the link dies.
pub struct NotificationReader<S = TcpStream> {
    transport: Transport<S>,
    /// Released when the reader finishes, after the socket is closed.
    _permit: Option<SessionPermit>,
    config: ReaderConfig,
}

impl<S> NotificationReader<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Creates a reader over an already greeted transport.
    #[must_use]
    pub fn new(transport: Transport<S>, permit: Option<SessionPermit>, config: ReaderConfig) -> Self {
        Self {
            transport,
            _permit: permit,
            config,
        }
    }

    /// Runs the read loop.
    pub async fn run(mut self, cancel: CancellationToken, sink: FrameSink) -> ReaderExit {
        let conn_id = self.transport.id();
        let read_timeout = self.config.read_timeout;
        let mut silent = 0u32;
        let mut silence_deadline = Instant::now() + read_timeout;
        let mut heartbeat = self.config.heartbeat.map(|period| {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });

        info!(conn_id = %conn_id, "Notification reader started");

        let exit = loop {
            tokio::select! {
                biased;

                () = cancel.cancelled() => break ReaderExit::Cancelled,

                result = self.transport.next_frame() => match result {
                    Ok(frame) => {
                        silent = 0;
                        silence_deadline = Instant::now() + read_timeout;
                        sink(frame);
                    }
                    Err(e) => break ReaderExit::Lost(e),
                },

                () = sleep_until(silence_deadline) => {
                    silent += 1;
                    silence_deadline = Instant::now() + read_timeout;
                    debug!(conn_id = %conn_id, silent, "No notification within read timeout");
                    if silent >= self.config.max_silent_reads {
                        break ReaderExit::Lost(Error::read_timeout(as_millis(read_timeout)));
                    }
                }

                () = next_tick(&mut heartbeat) => {
                    if let Err(e) = self.send_heartbeat().await {
                        break ReaderExit::Lost(e);
                    }
                }
            }
        };

        match &exit {
            ReaderExit::Cancelled => debug!(conn_id = %conn_id, "Notification reader cancelled"),
            ReaderExit::Lost(e) => warn!(conn_id = %conn_id, error = %e, "Notification link lost"),
        }

        self.transport.close().await;
        exit
    }

    async fn send_heartbeat(&mut self) -> Result<()> {
        self.transport.write_frame(Frame::new(HEARTBEAT)).await
    }
}

async fn next_tick(heartbeat: &mut Option<Interval>) {
    match heartbeat {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

// ============================================================================
// Tests
// ============================================================================
