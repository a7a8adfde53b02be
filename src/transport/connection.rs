//! Framed line transport over one TCP session.
//!
//! A [`Transport`] owns a socket wrapped in the [`LineCodec`] and exposes
//! read-one-frame / write-one-frame primitives, each bounded by a timeout.
//!
//! # Lifecycle
//!
//! 1. `Transport::connect` - TCP connect, then wait for the `WELCOME` banner
//! 2. `read_frame` / `write_frame` / `exchange` - one command in flight
//! 3. `close` - best-effort `Bye`, then shutdown; safe to call repeatedly
//!
//! Any error that [invalidates the connection](Error::invalidates_connection)
//! marks the transport broken. A broken transport is closed without `Bye`
//! and must not be reused.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::io::ErrorKind;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{Instant, timeout};
use tokio_util::codec::Framed;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::ConnectionId;
use crate::protocol::{
    Command, DEFAULT_MAX_FRAME_LEN, Frame, LineCodec, MatchOutcome, Reply, ReplyMatcher,
    WELCOME_MARKER,
};

// ============================================================================
// Constants
// ============================================================================

/// Time allowed for the courtesy `Bye` and socket shutdown.
const CLOSE_GRACE: Duration = Duration::from_millis(250);

// ============================================================================
// TransportConfig
// ============================================================================

/// Timeouts and limits applied to every transport.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// TCP connect timeout.
    pub connect_timeout: Duration,
    /// Time allowed for the `WELCOME` banner after connecting.
    pub handshake_timeout: Duration,
    /// Time allowed for one frame write, flush included.
    pub write_timeout: Duration,
    /// Maximum accepted line length.
    pub max_frame_len: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(1),
            handshake_timeout: Duration::from_secs(2),
            write_timeout: Duration::from_secs(2),
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }
}

// ============================================================================
// Transport
// ============================================================================

/// One framed TCP session to the device.
pub struct Transport<S = TcpStream> {
    id: ConnectionId,
    peer: String,
    framed: Option<Framed<S, LineCodec>>,
    write_timeout: Duration,
    broken: bool,
    created_at: Instant,
    last_used: Instant,
}

impl<S> fmt::Debug for Transport<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("open", &self.framed.is_some())
            .field("broken", &self.broken)
            .finish_non_exhaustive()
    }
}

impl Transport<TcpStream> {
    /// Connects to `addr` and waits for the device greeting.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectTimeout`] if the TCP connect does not finish in time
    /// - [`Error::ConnectRefused`] if nothing listens at `addr`
    /// - [`Error::Connect`] for other socket errors or a missing greeting
    pub async fn connect(addr: &str, config: &TransportConfig) -> Result<Self> {
        let stream = match timeout(config.connect_timeout, TcpStream::connect(addr)).await {
            Err(_) => {
                return Err(Error::connect_timeout(addr, as_millis(config.connect_timeout)));
            }
            Ok(Err(e)) => return Err(Error::from_connect_io(addr, &e)),
            Ok(Ok(stream)) => stream,
        };

        if let Err(e) = stream.set_nodelay(true) {
            warn!(addr = %addr, error = %e, "Failed to set TCP_NODELAY");
        }

        let mut transport = Self::from_stream(stream, addr, config);

        match transport.handshake(config.handshake_timeout).await {
            Ok(banner) => {
                debug!(conn_id = %transport.id, addr = %addr, banner = %banner, "Connected");
                Ok(transport)
            }
            Err(e) => {
                transport.close().await;
                Err(Error::connect(addr, format!("handshake failed: {e}")))
            }
        }
    }
}

impl<S> Transport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Wraps an already connected stream. No greeting is read.
    #[must_use]
    pub fn from_stream(stream: S, peer: impl Into<String>, config: &TransportConfig) -> Self {
        let now = Instant::now();
        Self {
            id: ConnectionId::next(),
            peer: peer.into(),
            framed: Some(Framed::new(
                stream,
                LineCodec::with_max_length(config.max_frame_len),
            )),
            write_timeout: config.write_timeout,
            broken: false,
            created_at: now,
            last_used: now,
        }
    }

    /// Reads the first frame and checks that it is the device greeting.
    ///
    /// # Errors
    ///
    /// Any [`read_frame`](Self::read_frame) error, or [`Error::Protocol`] if
    /// the first line is not a greeting.
    pub async fn handshake(&mut self, wait: Duration) -> Result<Frame> {
        let frame = self.read_frame(wait).await?;
        if frame.as_str().contains(WELCOME_MARKER) {
            Ok(frame)
        } else {
            self.broken = true;
            Err(Error::protocol(format!("expected greeting, got {:?}", frame.as_str())))
        }
    }

    /// Reads one frame.
    ///
    /// # Errors
    ///
    /// - [`Error::ReadTimeout`] if no complete frame arrives within `wait`
    /// - [`Error::ConnectionClosed`] on EOF, reset, or after `close`
    /// - [`Error::Protocol`] if the line exceeds the frame limit
    pub async fn read_frame(&mut self, wait: Duration) -> Result<Frame> {
        match timeout(wait, self.next_frame()).await {
            Ok(result) => result,
            Err(_) => Err(self.poison(Error::read_timeout(as_millis(wait)))),
        }
    }

    /// Waits for the next frame with no deadline.
    ///
    /// Cancel-safe: a partial line stays buffered if the future is dropped.
    ///
    /// # Errors
    ///
    /// Same as [`read_frame`](Self::read_frame), minus the timeout.
    pub async fn next_frame(&mut self) -> Result<Frame> {
        let framed = self.framed.as_mut().ok_or(Error::ConnectionClosed)?;

        let result = match framed.next().await {
            None => Err(Error::ConnectionClosed),
            Some(result) => result.map_err(closed_on_reset),
        };

        match result {
            Ok(frame) => {
                trace!(conn_id = %self.id, frame = %frame, "<<");
                self.last_used = Instant::now();
                Ok(frame)
            }
            Err(e) => Err(self.poison(e)),
        }
    }

    /// Writes one frame and flushes it.
    ///
    /// # Errors
    ///
    /// - [`Error::WriteTimeout`] if the write does not finish in time
    /// - [`Error::ConnectionClosed`] if the peer is gone or after `close`
    /// - [`Error::InvalidArgument`] if the frame cannot be encoded; the
    ///   connection stays usable in that case
    pub async fn write_frame(&mut self, frame: Frame) -> Result<()> {
        let framed = self.framed.as_mut().ok_or(Error::ConnectionClosed)?;
        let wait = self.write_timeout;

        trace!(conn_id = %self.id, frame = %frame, ">>");

        let result = match timeout(wait, framed.send(frame)).await {
            Err(_) => Err(Error::write_timeout(as_millis(wait))),
            Ok(result) => result.map_err(closed_on_reset),
        };

        match result {
            Ok(()) => {
                self.last_used = Instant::now();
                Ok(())
            }
            Err(e) => Err(self.poison(e)),
        }
    }

    /// Writes `command` and reads until its reply is complete.
    ///
    /// Lines that do not belong to the reply are appended to `unsolicited`
    /// in arrival order, whether or not the exchange succeeds.
    ///
    /// # Errors
    ///
    /// - [`Error::CommandRejected`] if the device answers `ERROR`
    /// - [`Error::ReadTimeout`] if the reply is not complete within `wait`
    /// - any [`write_frame`](Self::write_frame) / [`read_frame`](Self::read_frame) error
    pub async fn exchange(
        &mut self,
        command: &Command,
        wait: Duration,
        unsolicited: &mut Vec<Frame>,
    ) -> Result<Reply> {
        let deadline = Instant::now() + wait;
        let mut matcher = ReplyMatcher::new(command);

        self.write_frame(command.to_frame()).await?;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(self.poison(Error::read_timeout(as_millis(wait))));
            }

            let frame = self.read_frame(remaining).await?;
            match matcher.accept(frame) {
                MatchOutcome::Pending => {}
                MatchOutcome::Complete(reply) => return Ok(reply),
                MatchOutcome::Rejected(reason) => {
                    return Err(Error::command_rejected(command.verb(), reason));
                }
                MatchOutcome::Unrelated(frame) => unsolicited.push(frame),
            }
        }
    }

    /// Closes the session. Idempotent.
    ///
    /// A healthy transport says `Bye` first; errors during close are ignored.
    pub async fn close(&mut self) {
        let Some(mut framed) = self.framed.take() else {
            return;
        };

        if !self.broken {
            let _ = timeout(CLOSE_GRACE, framed.send(Command::bye().to_frame())).await;
        }
        let _ = timeout(CLOSE_GRACE, framed.get_mut().shutdown()).await;

        debug!(conn_id = %self.id, peer = %self.peer, broken = self.broken, "Connection closed");
    }

    fn poison(&mut self, err: Error) -> Error {
        if err.invalidates_connection() && !self.broken {
            self.broken = true;
            debug!(conn_id = %self.id, error = %err, "Connection marked unusable");
        }
        err
    }
}

// ============================================================================
// Transport - Accessors
// ============================================================================

impl<S> Transport<S> {
    /// Returns the connection ID.
    #[inline]
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Returns the peer address.
    #[inline]
    #[must_use]
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Returns `true` if the session is open and has not failed.
    #[inline]
    #[must_use]
    pub fn is_usable(&self) -> bool {
        self.framed.is_some() && !self.broken
    }

    /// Returns when the session was opened.
    #[inline]
    #[must_use]
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Returns when a frame was last read or written.
    #[inline]
    #[must_use]
    pub fn last_used(&self) -> Instant {
        self.last_used
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Converts a duration to whole milliseconds for error reporting.
#[inline]
pub(crate) fn as_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Maps peer resets to [`Error::ConnectionClosed`].
fn closed_on_reset(err: Error) -> Error {
    match err {
        Error::Io(ref io)
            if matches!(
                io.kind(),
                ErrorKind::ConnectionReset
                    | ErrorKind::ConnectionAborted
                    | ErrorKind::BrokenPipe
                    | ErrorKind::UnexpectedEof
            ) =>
        {
            Error::ConnectionClosed
        }
        other => other,
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use tokio_test::io::Builder;

    fn config() -> TransportConfig {
        TransportConfig::default()
    }

    #[tokio::test]
    async fn test_handshake_and_split_frame() {
        let mock = Builder::new()
            .read(b"WELCOME to Envy v1.1.3\r\n")
            .read(b"Incoming")
            .read(b"SignalInfo 3840x2160 23.976p 2D 422 10bit HDR10 2020 TV 16:9\r\n")
            .build();
        let mut transport = Transport::from_stream(mock, "mock", &config());

        let banner = transport.handshake(Duration::from_secs(1)).await.expect("handshake");
        assert!(banner.as_str().starts_with("WELCOME"));

        let frame = transport.read_frame(Duration::from_secs(1)).await.expect("frame");
        assert_eq!(frame.title(), "IncomingSignalInfo");

        let err = transport.read_frame(Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, Error::ConnectionClosed));
        assert!(!transport.is_usable());
    }

    #[tokio::test]
    async fn test_handshake_rejects_other_banner() {
        let mock = Builder::new().read(b"HELLO\r\n").build();
        let mut transport = Transport::from_stream(mock, "mock", &config());

        let err = transport.handshake(Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, Error::Protocol { .. }));
        assert!(!transport.is_usable());
    }

    #[tokio::test]
    async fn test_exchange_query_collects_unsolicited() {
        let mock = Builder::new()
            .write(b"GetMacAddress\r\n")
            .read(b"OK\r\nKeyPress MENU\r\n")
            .read(b"MacAddress 01-02-03-04-05-06\r\n")
            .build();
        let mut transport = Transport::from_stream(mock, "mock", &config());
        let command = Command::new("GetMacAddress").expect("command");
        let mut unsolicited = Vec::new();

        let reply = transport
            .exchange(&command, Duration::from_secs(1), &mut unsolicited)
            .await
            .expect("reply");

        assert_eq!(
            reply.data().map(Frame::as_str),
            Some("MacAddress 01-02-03-04-05-06")
        );
        assert_eq!(unsolicited, vec![Frame::new("KeyPress MENU")]);
        assert!(transport.is_usable());
    }

    #[tokio::test]
    async fn test_exchange_error_keeps_connection_usable() {
        let mock = Builder::new()
            .write(b"KeyPress BOGUS\r\n")
            .read(b"ERROR \"unknown key\"\r\n")
            .build();
        let mut transport = Transport::from_stream(mock, "mock", &config());
        let command = Command::key_press("BOGUS").expect("command");

        let err = transport
            .exchange(&command, Duration::from_secs(1), &mut Vec::new())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::CommandRejected { .. }));
        assert!(transport.is_usable());
    }

    #[tokio::test(start_paused = true)]
    async fn test_exchange_updates_last_used() {
        let mock = Builder::new()
            .write(b"KeyPress MENU\r\n")
            .read(b"OK\r\n")
            .build();
        let mut transport = Transport::from_stream(mock, "mock", &config());
        let opened = transport.created_at();
        assert_eq!(transport.last_used(), opened);

        tokio::time::advance(Duration::from_secs(2)).await;
        let command = Command::key_press("MENU").expect("command");
        transport
            .exchange(&command, Duration::from_secs(1), &mut Vec::new())
            .await
            .expect("reply");

        assert_eq!(transport.created_at(), opened);
        assert!(transport.last_used() - opened >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_timeout_poisons() {
        let mock = Builder::new().wait(Duration::from_secs(5)).build();
        let mut transport = Transport::from_stream(mock, "mock", &config());

        let err = transport
            .read_frame(Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ReadTimeout { timeout_ms: 100 }));
        assert!(!transport.is_usable());
    }

    #[tokio::test]
    async fn test_close_says_bye_once() {
        let mock = Builder::new().write(b"Bye\r\n").build();
        let mut transport = Transport::from_stream(mock, "mock", &config());

        transport.close().await;
        transport.close().await;

        assert!(!transport.is_usable());
        let err = transport.write_frame(Frame::new("OK")).await.unwrap_err();
        assert!(matches!(err, Error::ConnectionClosed));
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr").to_string();
        drop(listener);

        let err = Transport::connect(&addr, &config()).await.unwrap_err();
        assert!(err.is_connect_error());
    }
}
