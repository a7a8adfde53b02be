//! Command connection pool.
//!
//! Short-lived connections for user commands. A connection is reused while
//! its idle window has not elapsed; every reuse restarts the window, so a
//! burst of commands keeps one socket alive while a lone idle socket closes
//! quickly.
//!
//! # Ownership
//!
//! The idle list inside one mutex is the single authority over who owns a
//! connection:
//!
//! | Holder | Meaning |
//! |--------|---------|
//! | entry in `idle` | idle, its timer may evict it |
//! | [`PooledConnection`] | in use by exactly one caller |
//!
//! `acquire` and the idle timer both remove entries under the lock, so
//! only one of them can ever win a given connection.
//!
//! # Limits
//!
//! - `max_open` - pool share of the device ceiling; `acquire` waits when reached
//! - `max_pooled` - optional hard cap; `acquire` fails with
//!   [`Error::PoolExhausted`] when reached
//! - every connection also holds a [`SessionPermit`] from the shared budget

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::Notify;
use tokio::task::AbortHandle;
use tokio::time::{Instant, sleep, sleep_until};
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::ConnectionId;
use crate::protocol::{Command, Frame, Reply};

use super::budget::{SessionBudget, SessionPermit};
use super::connection::{Transport, TransportConfig, as_millis};

// ============================================================================
// Types
// ============================================================================

/// Receives lines read on a pooled connection that were not part of a reply.
pub type FrameSink = Arc<dyn Fn(Frame) + Send + Sync>;

// ============================================================================
// PoolConfig
// ============================================================================

/// Pool settings.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Device address, `host:port`.
    pub addr: String,
    /// Per-connection timeouts.
    pub transport: TransportConfig,
    /// Idle time after which an unused connection is closed.
    pub idle_window: Duration,
    /// Pool share of the device session ceiling.
    pub max_open: usize,
    /// Optional hard cap on pooled connections.
    pub max_pooled: Option<usize>,
    /// How long `acquire` may wait for a free slot.
    pub acquire_wait: Duration,
}

impl PoolConfig {
    /// Returns the effective connection limit.
    #[inline]
    #[must_use]
    pub fn limit(&self) -> usize {
        self.max_pooled
            .map_or(self.max_open, |cap| cap.min(self.max_open))
    }

    /// Returns the hard cap if it is the binding limit.
    fn binding_cap(&self) -> Option<usize> {
        self.max_pooled.filter(|cap| *cap <= self.max_open)
    }
}

// ============================================================================
// PoolStats
// ============================================================================

/// Snapshot of pool occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Connections open or being opened.
    pub open: usize,
    /// Connections waiting in the idle list.
    pub idle: usize,
}

impl PoolStats {
    /// Connections currently held by callers.
    #[inline]
    #[must_use]
    pub fn in_use(&self) -> usize {
        self.open.saturating_sub(self.idle)
    }
}

// ============================================================================
// Internal State
// ============================================================================

/// A live connection with its session slot.
#[derive(Debug)]
struct Slot {
    transport: Transport,
    /// Dropped after `transport`, i.e. after the socket is gone.
    _permit: SessionPermit,
}

struct IdleEntry {
    slot: Slot,
    epoch: u64,
    expires_at: Instant,
    timer: AbortHandle,
}

#[derive(Default)]
struct PoolState {
    /// Idle + in use + being opened.
    open: usize,
    /// Most recently released last.
    idle: Vec<IdleEntry>,
    next_epoch: u64,
    closed: bool,
}

impl Drop for PoolState {
    fn drop(&mut self) {
        for entry in &self.idle {
            entry.timer.abort();
        }
    }
}

enum Claim {
    Idle(Slot),
    Reserved,
    Full,
}

struct PoolShared {
    config: PoolConfig,
    budget: SessionBudget,
    state: Mutex<PoolState>,
    released: Notify,
    sink: RwLock<Option<FrameSink>>,
}

// ============================================================================
// ConnectionPool
// ============================================================================

/// Pool of command connections to one device.
///
/// Cheap to clone; clones share the same connections.
#[derive(Clone)]
pub struct ConnectionPool {
    shared: Arc<PoolShared>,
}

impl ConnectionPool {
    /// Creates an empty pool. No connection is opened until first use.
    #[must_use]
    pub fn new(config: PoolConfig, budget: SessionBudget) -> Self {
        Self {
            shared: Arc::new(PoolShared {
                config,
                budget,
                state: Mutex::new(PoolState::default()),
                released: Notify::new(),
                sink: RwLock::new(None),
            }),
        }
    }

    /// Sets the receiver for unsolicited lines seen on pooled connections.
    pub fn set_unsolicited_sink(&self, sink: FrameSink) {
        *self.shared.sink.write() = Some(sink);
    }

    /// Returns current occupancy.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let state = self.shared.state.lock();
        PoolStats {
            open: state.open,
            idle: state.idle.len(),
        }
    }

    /// Returns the pool settings.
    #[inline]
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }

    /// Returns `true` after [`close_all`](Self::close_all).
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().closed
    }
}

// ============================================================================
// ConnectionPool - Acquire / Release
// ============================================================================

impl ConnectionPool {
    /// Takes a connection for exclusive use.
    ///
    /// Prefers the most recently released idle connection; otherwise opens
    /// a new one if the pool limit allows, otherwise waits for a release.
    ///
    /// # Errors
    ///
    /// - [`Error::PoolExhausted`] if the hard cap is reached and nothing is idle
    /// - [`Error::Timeout`] if no connection frees up within the acquire wait
    /// - [`Error::ConnectionClosed`] if the pool has been closed
    /// - any connect error from [`Transport::connect`]
    pub async fn acquire(&self) -> Result<PooledConnection> {
        let shared = &self.shared;
        let deadline = Instant::now() + shared.config.acquire_wait;

        loop {
            let released = shared.released.notified();
            tokio::pin!(released);
            released.as_mut().enable();

            match self.claim()? {
                Claim::Idle(slot) => {
                    trace!(conn_id = %slot.transport.id(), "Reusing idle connection");
                    return Ok(PooledConnection::new(Arc::clone(shared), slot, true));
                }
                Claim::Reserved => return self.open_reserved(deadline).await,
                Claim::Full => {}
            }

            trace!("Pool full, waiting for a release");
            tokio::select! {
                () = &mut released => {}
                () = sleep_until(deadline) => {
                    return Err(Error::timeout(
                        "pool acquire",
                        as_millis(shared.config.acquire_wait),
                    ));
                }
            }
        }
    }

    /// Returns a connection to the idle list and starts its idle timer.
    ///
    /// A connection that failed is discarded instead.
    pub fn release(&self, mut connection: PooledConnection) {
        let Some(slot) = connection.slot.take() else {
            return;
        };

        if !slot.transport.is_usable() {
            trace!(conn_id = %slot.transport.id(), "Discarding unusable connection");
            self.shared.discard(slot);
            return;
        }

        let shared = &self.shared;
        let idle_window = shared.config.idle_window;
        let mut state = shared.state.lock();

        if state.closed {
            drop(state);
            shared.discard(slot);
            return;
        }

        let epoch = state.next_epoch;
        state.next_epoch += 1;

        let timer = tokio::spawn(idle_timer(Arc::downgrade(shared), epoch, idle_window));
        trace!(conn_id = %slot.transport.id(), epoch, "Connection idle");

        state.idle.push(IdleEntry {
            slot,
            epoch,
            expires_at: Instant::now() + idle_window,
            timer: timer.abort_handle(),
        });
        drop(state);

        shared.released.notify_one();
    }

    /// Closes every idle connection and refuses further acquires.
    ///
    /// Connections still in use are closed when their holder drops or
    /// releases them.
    pub async fn close_all(&self) {
        let drained: Vec<IdleEntry> = {
            let mut state = self.shared.state.lock();
            state.closed = true;
            let drained: Vec<IdleEntry> = state.idle.drain(..).collect();
            state.open -= drained.len();
            drained
        };

        let count = drained.len();
        for mut entry in drained {
            entry.timer.abort();
            entry.slot.transport.close().await;
        }

        self.shared.released.notify_waiters();
        debug!(closed = count, "Pool closed");
    }

    /// Looks for an idle connection or reserves room for a new one.
    fn claim(&self) -> Result<Claim> {
        let config = &self.shared.config;
        let now = Instant::now();
        let mut state = self.shared.state.lock();

        if state.closed {
            return Err(Error::ConnectionClosed);
        }

        while let Some(entry) = state.idle.pop() {
            entry.timer.abort();
            if entry.expires_at > now && entry.slot.transport.is_usable() {
                return Ok(Claim::Idle(entry.slot));
            }
            // Expired but the timer has not run yet.
            state.open -= 1;
            trace!(
                conn_id = %entry.slot.transport.id(),
                idle_ms = as_millis(entry.slot.transport.last_used().elapsed()),
                "Dropping expired connection"
            );
            tokio::spawn(close_slot(entry.slot));
        }

        if state.open < config.limit() {
            state.open += 1;
            return Ok(Claim::Reserved);
        }

        match config.binding_cap() {
            Some(max) => Err(Error::PoolExhausted { max }),
            None => Ok(Claim::Full),
        }
    }

    async fn open_reserved(&self, deadline: Instant) -> Result<PooledConnection> {
        let shared = &self.shared;
        let reservation = Reservation {
            shared: Arc::clone(shared),
            armed: true,
        };

        let permit = tokio::select! {
            permit = shared.budget.acquire() => permit?,
            () = sleep_until(deadline) => {
                return Err(Error::timeout(
                    "session slot",
                    as_millis(shared.config.acquire_wait),
                ));
            }
        };

        let transport = Transport::connect(&shared.config.addr, &shared.config.transport).await?;
        reservation.disarm();

        debug!(conn_id = %transport.id(), "Opened pooled connection");
        let slot = Slot {
            transport,
            _permit: permit,
        };
        Ok(PooledConnection::new(Arc::clone(shared), slot, false))
    }
}

// ============================================================================
// ConnectionPool - Commands
// ============================================================================

impl ConnectionPool {
    /// Sends one command on a pooled connection and returns its reply.
    ///
    /// A connection that fails with [`Error::ConnectionClosed`] after being
    /// reused from the idle list is retried once on another connection,
    /// since the device may have dropped it while it sat idle.
    ///
    /// # Errors
    ///
    /// Any [`acquire`](Self::acquire) or [`Transport::exchange`] error.
    pub async fn send_command(&self, command: &Command, wait: Duration) -> Result<Reply> {
        let mut retried = false;

        loop {
            let mut connection = self.acquire().await?;
            let reused = connection.is_reused();
            let mut unsolicited = Vec::new();

            let result = connection
                .transport_mut()?
                .exchange(command, wait, &mut unsolicited)
                .await;
            self.forward(unsolicited);

            match result {
                Ok(reply) => {
                    self.release(connection);
                    return Ok(reply);
                }
                Err(Error::ConnectionClosed) if reused && !retried => {
                    debug!(command = %command, "Stale pooled connection, retrying once");
                    drop(connection);
                    retried = true;
                }
                Err(e) => {
                    if e.invalidates_connection() {
                        warn!(command = %command, error = %e, "Pooled connection failed");
                        drop(connection);
                    } else {
                        self.release(connection);
                    }
                    return Err(e);
                }
            }
        }
    }

    fn forward(&self, frames: Vec<Frame>) {
        if frames.is_empty() {
            return;
        }
        let sink = self.shared.sink.read().clone();
        match sink {
            Some(sink) => {
                for frame in frames {
                    sink(frame);
                }
            }
            None => trace!(count = frames.len(), "Dropping unsolicited frames"),
        }
    }
}

// ============================================================================
// PoolShared
// ============================================================================

impl PoolShared {
    /// Forgets a connection that will not return to the idle list.
    fn discard(&self, slot: Slot) {
        drop(slot);
        self.state.lock().open -= 1;
        self.released.notify_one();
    }
}

// ============================================================================
// Reservation
// ============================================================================

/// Undoes a `Claim::Reserved` unless the connection was opened.
struct Reservation {
    shared: Arc<PoolShared>,
    armed: bool,
}

impl Reservation {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if self.armed {
            self.shared.state.lock().open -= 1;
            self.shared.released.notify_one();
        }
    }
}

// ============================================================================
// Idle Timer
// ============================================================================

async fn idle_timer(shared: Weak<PoolShared>, epoch: u64, wait: Duration) {
    sleep(wait).await;

    let Some(shared) = shared.upgrade() else {
        return;
    };

    let evicted = {
        let mut state = shared.state.lock();
        match state.idle.iter().position(|entry| entry.epoch == epoch) {
            Some(index) => {
                let entry = state.idle.remove(index);
                state.open -= 1;
                Some(entry.slot)
            }
            // Claimed by acquire first.
            None => None,
        }
    };

    if let Some(slot) = evicted {
        let transport = &slot.transport;
        debug!(
            conn_id = %transport.id(),
            age_ms = as_millis(transport.created_at().elapsed()),
            idle_ms = as_millis(transport.last_used().elapsed()),
            "Idle window elapsed, closing connection"
        );
        close_slot(slot).await;
        shared.released.notify_one();
    }
}

async fn close_slot(mut slot: Slot) {
    slot.transport.close().await;
}

// ============================================================================
// PooledConnection
// ============================================================================

/// A connection checked out of the pool.
///
/// Hand it back with [`ConnectionPool::release`]. Dropping it instead
/// discards the connection.
pub struct PooledConnection {
    shared: Arc<PoolShared>,
    slot: Option<Slot>,
    reused: bool,
}

impl fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("id", &self.id())
            .field("reused", &self.reused)
            .finish_non_exhaustive()
    }
}

impl PooledConnection {
    fn new(shared: Arc<PoolShared>, slot: Slot, reused: bool) -> Self {
        Self {
            shared,
            slot: Some(slot),
            reused,
        }
    }

    /// Returns the connection ID.
    #[must_use]
    pub fn id(&self) -> Option<ConnectionId> {
        self.slot.as_ref().map(|slot| slot.transport.id())
    }

    /// Returns `true` if the connection came from the idle list.
    #[inline]
    #[must_use]
    pub fn is_reused(&self) -> bool {
        self.reused
    }

    /// Returns the underlying transport.
    ///
    /// # Errors
    ///
    /// [`Error::ConnectionClosed`] if the connection was already handed back.
    pub fn transport_mut(&mut self) -> Result<&mut Transport> {
        self.slot
            .as_mut()
            .map(|slot| &mut slot.transport)
            .ok_or(Error::ConnectionClosed)
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take() {
            trace!(conn_id = %slot.transport.id(), "Pooled connection dropped");
            self.shared.discard(slot);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn config(max_open: usize, max_pooled: Option<usize>) -> PoolConfig {
        PoolConfig {
            addr: "127.0.0.1:1".to_string(),
            transport: TransportConfig::default(),
            idle_window: Duration::from_secs(10),
            max_open,
            max_pooled,
            acquire_wait: Duration::from_millis(50),
        }
    }

    #[test]
    fn test_limit() {
        assert_eq!(config(2, None).limit(), 2);
        assert_eq!(config(2, Some(1)).limit(), 1);
        assert_eq!(config(2, Some(5)).limit(), 2);
    }

    #[test]
    fn test_binding_cap() {
        assert_eq!(config(2, Some(1)).binding_cap(), Some(1));
        assert_eq!(config(2, Some(2)).binding_cap(), Some(2));
        assert_eq!(config(2, Some(3)).binding_cap(), None);
        assert_eq!(config(2, None).binding_cap(), None);
    }

    #[tokio::test]
    async fn test_zero_cap_is_exhausted() {
        let pool = ConnectionPool::new(config(2, Some(0)), SessionBudget::new(4));
        let err = pool.acquire().await.unwrap_err();
        assert!(matches!(err, Error::PoolExhausted { max: 0 }));
        assert_eq!(pool.stats().open, 0);
    }

    #[tokio::test]
    async fn test_zero_share_times_out() {
        let pool = ConnectionPool::new(config(0, None), SessionBudget::new(4));
        let err = pool.acquire().await.unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_failed_connect_releases_reservation() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr").to_string();
        drop(listener);

        let mut cfg = config(1, None);
        cfg.addr = addr;
        let budget = SessionBudget::new(4);
        let pool = ConnectionPool::new(cfg, budget.clone());

        let err = pool.acquire().await.unwrap_err();
        assert!(err.is_connect_error());
        assert_eq!(pool.stats().open, 0);
        assert_eq!(budget.in_use(), 0);
    }

    /// Greets every session and keeps it open until the client leaves.
    async fn greeting_listener() -> (String, Arc<std::sync::atomic::AtomicUsize>) {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr").to_string();
        let accepted = Arc::new(AtomicUsize::new(0));

        tokio::spawn({
            let accepted = Arc::clone(&accepted);
            async move {
                while let Ok((mut stream, _)) = listener.accept().await {
                    accepted.fetch_add(1, Ordering::SeqCst);
                    tokio::spawn(async move {
                        let _ = stream.write_all(b"WELCOME to Envy\r\n").await;
                        let mut buf = [0u8; 256];
                        while matches!(stream.read(&mut buf).await, Ok(n) if n > 0) {}
                    });
                }
            }
        });

        (addr, accepted)
    }

    #[tokio::test]
    async fn test_claim_drops_entry_past_its_window() {
        use std::sync::atomic::Ordering;

        let (addr, accepted) = greeting_listener().await;
        let mut cfg = config(1, None);
        cfg.addr = addr;
        let budget = SessionBudget::new(4);
        let pool = ConnectionPool::new(cfg, budget.clone());

        let first = pool.acquire().await.expect("acquire");
        let first_id = first.id();
        pool.release(first);
        assert_eq!(budget.in_use(), 1);

        // Stop the idle timer so only `claim` can see the expiry.
        pool.shared.state.lock().idle[0].timer.abort();
        tokio::time::pause();
        tokio::time::advance(Duration::from_secs(11)).await;

        assert!(matches!(pool.claim().expect("claim"), Claim::Reserved));
        assert_eq!(pool.stats().idle, 0);
        drop(Reservation {
            shared: Arc::clone(&pool.shared),
            armed: true,
        });
        assert_eq!(pool.stats().open, 0);

        while budget.in_use() > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        tokio::time::resume();

        let second = pool.acquire().await.expect("acquire");
        assert!(!second.is_reused());
        assert_ne!(second.id(), first_id);
        assert_eq!(accepted.load(Ordering::SeqCst), 2);
        assert_eq!(pool.stats().open, 1);
        assert_eq!(budget.in_use(), 1);
        drop(second);
    }

    #[tokio::test]
    async fn test_closed_pool_refuses() {
        let pool = ConnectionPool::new(config(2, None), SessionBudget::new(4));
        pool.close_all().await;
        assert!(pool.is_closed());
        assert!(matches!(
            pool.acquire().await.unwrap_err(),
            Error::ConnectionClosed
        ));
    }
}
