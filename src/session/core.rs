//! Device session facade.
//!
//! [`Session`] is the public entry point. It owns the notification
//! connection, the command pool and the background poller, tracks the
//! session state and the device status, and fans events out to
//! subscribers.
//!
//! # State Machine
//!
//! ```text
//!                open_connection                 link lost / close_connection
//! Disconnected ───────────────► Connecting ──► Connected ────────────► Disconnected
//!      │                             │ failure
//!      │ power_on                    └──────────► Disconnected
//!      ▼
//! PoweringOn ── probe answered / window elapsed ──► Connected or Disconnected
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::identifiers::SubscriptionId;
use crate::protocol::{Command, DeviceStatus, Frame, Notification, Reply};
use crate::transport::connection::as_millis;
use crate::transport::{
    BackgroundStrategy, ConnectionPool, FrameSink, OperationClass, PoolStats, Route,
    SessionBudget, Transport,
};
use crate::wake::{MacAddress, WakeTarget, send_magic_packet};

use super::builder::SessionBuilder;
use super::events::{EventHandler, SessionEvent, SessionState, Subscribers};
use super::options::SessionOptions;
use super::poller;
use super::queue::{self, CommandQueue};
use super::reader::{NotificationReader, ReaderConfig, ReaderExit};

// ============================================================================
// Runtime
// ============================================================================

/// Resources that exist between `open_connection` and `close_connection`.
struct Runtime {
    pool: ConnectionPool,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

/// A running power-on watch.
struct PowerWatch {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

// ============================================================================
// SessionInner
// ============================================================================

pub(crate) struct SessionInner {
    host: String,
    pub(super) addr: String,
    pub(super) options: SessionOptions,
    configured_mac: Option<MacAddress>,
    budget: SessionBudget,
    pub(super) strategy: BackgroundStrategy,
    state: RwLock<SessionState>,
    status: RwLock<DeviceStatus>,
    link_up: AtomicBool,
    subscribers: Subscribers,
    queue: Arc<CommandQueue>,
    runtime: Mutex<Option<Runtime>>,
    power_watch: Mutex<Option<PowerWatch>>,
    /// Serializes open and close.
    lifecycle: tokio::sync::Mutex<()>,
    /// Parent of every task token; cancelled when the last handle drops.
    shutdown: CancellationToken,
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

// ============================================================================
// Session
// ============================================================================

/// Client session for one device.
///
/// Cheap to clone; clones share the same connections and state. Background
/// tasks stop when the last clone is dropped.
///
/// # Example
///
/// ```no_run
/// use madvr_client::{Command, Result, Session};
///
/// # async fn example() -> Result<()> {
/// let session = Session::builder().host("192.168.1.50").build()?;
/// session.subscribe(|event| println!("{event:?}"));
///
/// session.open_connection().await?;
/// session.send_command(Command::key_press("MENU")?).await?;
/// session.close_connection().await;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    /// Creates a builder.
    #[inline]
    #[must_use]
    pub fn builder() -> SessionBuilder {
        SessionBuilder::new()
    }

    /// Creates a session from validated parts.
    pub(crate) fn from_parts(
        host: String,
        addr: String,
        options: SessionOptions,
        configured_mac: Option<MacAddress>,
    ) -> Self {
        let budget = SessionBudget::new(options.session_ceiling);
        let strategy = BackgroundStrategy::new(
            addr.clone(),
            options.transport_config(),
            budget.clone(),
            options.reply_timeout,
        );

        Self {
            inner: Arc::new(SessionInner {
                host,
                addr,
                options,
                configured_mac,
                budget,
                strategy,
                state: RwLock::new(SessionState::Disconnected),
                status: RwLock::new(DeviceStatus::default()),
                link_up: AtomicBool::new(false),
                subscribers: Subscribers::default(),
                queue: Arc::new(CommandQueue::default()),
                runtime: Mutex::new(None),
                power_watch: Mutex::new(None),
                lifecycle: tokio::sync::Mutex::new(()),
                shutdown: CancellationToken::new(),
            }),
        }
    }
}

// ============================================================================
// Session - Lifecycle
// ============================================================================

impl Session {
    /// Opens the notification connection and starts background work.
    ///
    /// Does nothing if the session is already connected. A session whose
    /// notification link was lost is torn down and reopened.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectTimeout`] / [`Error::ConnectRefused`] / [`Error::Connect`]
    ///   if the device is unreachable or does not greet
    /// - [`Error::Timeout`] if every session slot is taken
    pub async fn open_connection(&self) -> Result<()> {
        let inner = &self.inner;
        let _guard = inner.lifecycle.lock().await;

        if inner.runtime.lock().is_some() && inner.link_up.load(Ordering::Acquire) {
            debug!(addr = %inner.addr, "Session already open");
            return Ok(());
        }

        inner.teardown().await;
        inner.update_state(|_| Some(SessionState::Connecting));

        match inner.connect().await {
            Ok(()) => {
                info!(addr = %inner.addr, "Session open");
                Ok(())
            }
            Err(e) => {
                warn!(addr = %inner.addr, error = %e, "Failed to open session");
                inner.teardown().await;
                Err(e)
            }
        }
    }

    /// Closes every connection and stops all background tasks.
    ///
    /// Idempotent and safe after a failed or partial open.
    pub async fn close_connection(&self) {
        let inner = &self.inner;
        let _guard = inner.lifecycle.lock().await;

        inner.stop_power_watch().await;
        inner.teardown().await;
        info!(addr = %inner.addr, "Session closed");
    }
}

// ============================================================================
// Session - Commands
// ============================================================================

impl Session {
    /// Sends a command on a pooled connection and returns the reply.
    ///
    /// Data lines of `Get*` replies also update the device status.
    ///
    /// # Errors
    ///
    /// - [`Error::DevicePoweringOn`] while a power-on is in progress
    /// - [`Error::ConnectionClosed`] if the session is not open
    /// - [`Error::CommandRejected`] if the device answers `ERROR`
    /// - any pool or connection error
    pub async fn send_command(&self, command: Command) -> Result<Reply> {
        let inner = &self.inner;
        debug_assert_eq!(OperationClass::UserCommand.route(), Route::Pooled);

        if inner.state() == SessionState::PoweringOn {
            return Err(Error::DevicePoweringOn {
                command: command.verb().to_string(),
            });
        }

        let pool = inner.pool().ok_or(Error::ConnectionClosed)?;
        let reply = pool.send_command(&command, inner.options.reply_timeout).await?;

        if let Some(data) = reply.data() {
            inner.handle_frame(data.clone());
        }
        Ok(reply)
    }

    /// Sends a command on a connection of its own, bypassing the pool.
    ///
    /// Works whether or not the session is open. The connection is closed
    /// as soon as the reply arrives; data lines and any unrelated lines
    /// read meanwhile update the device status.
    ///
    /// # Errors
    ///
    /// - [`Error::DevicePoweringOn`] while a power-on is in progress
    /// - [`Error::Timeout`] if no session slot frees up
    /// - [`Error::CommandRejected`] if the device answers `ERROR`
    /// - any connect or connection error
    pub async fn send_direct(&self, command: Command) -> Result<Reply> {
        let inner = &self.inner;
        debug_assert_eq!(OperationClass::DirectCommand.route(), Route::Dedicated);

        if inner.state() == SessionState::PoweringOn {
            return Err(Error::DevicePoweringOn {
                command: command.verb().to_string(),
            });
        }

        let mut unsolicited = Vec::new();
        let result = inner.strategy.send_once(&command, &mut unsolicited).await;
        for frame in unsolicited {
            inner.handle_frame(frame);
        }

        let reply = result?;
        if let Some(data) = reply.data() {
            inner.handle_frame(data.clone());
        }
        Ok(reply)
    }

    /// Queues a command to be sent in order by the session's queue task.
    ///
    /// Returns the number of commands waiting, including this one. A
    /// command that fails on a broken connection is retried; one the
    /// device rejects is dropped.
    ///
    /// # Errors
    ///
    /// - [`Error::DevicePoweringOn`] while a power-on is in progress
    /// - [`Error::ConnectionClosed`] if the session is not open
    pub fn enqueue(&self, command: Command) -> Result<usize> {
        let inner = &self.inner;

        if inner.state() == SessionState::PoweringOn {
            return Err(Error::DevicePoweringOn {
                command: command.verb().to_string(),
            });
        }
        if inner.runtime.lock().is_none() {
            return Err(Error::ConnectionClosed);
        }

        debug!(command = %command, "Command queued");
        Ok(inner.queue.push(command))
    }

    /// Drops every queued command that has not been sent yet.
    ///
    /// Returns how many were dropped.
    pub fn clear_queue(&self) -> usize {
        let dropped = self.inner.queue.clear();
        debug!(dropped, "Command queue cleared");
        dropped
    }

    /// Parses tokens into a command and sends it.
    ///
    /// Accepts `["KeyPress", "MENU"]` as well as `["KeyPress, MENU"]`.
    ///
    /// # Errors
    ///
    /// Any [`Command::parse`] error, or any [`send_command`](Self::send_command) error.
    pub async fn send<I, S>(&self, tokens: I) -> Result<Reply>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let command = Command::parse(tokens)?;
        self.send_command(command).await
    }
}

// ============================================================================
// Session - Power
// ============================================================================

impl Session {
    /// Sends a Wake-on-LAN packet and watches for the device to come up.
    ///
    /// The MAC address is chosen in this order: learned from the device,
    /// configured on the builder, `mac`. While the watch runs the state is
    /// [`SessionState::PoweringOn`]; a [`SessionEvent::PowerOnComplete`]
    /// event reports the outcome.
    ///
    /// # Errors
    ///
    /// - [`Error::NoWakeCapability`] if no MAC address is known
    /// - [`Error::Io`] if the packet cannot be sent
    pub async fn power_on(&self, mac: Option<MacAddress>) -> Result<()> {
        let inner = &self.inner;
        debug_assert_eq!(OperationClass::Wake.route(), Route::OutOfBand);

        let mac = WakeTarget::resolve(inner.learned_mac(), inner.configured_mac, mac).mac()?;
        send_magic_packet(mac, inner.options.wake_target).await?;
        info!(mac = %mac, target = %inner.options.wake_target, "Wake signal sent");

        inner.stop_power_watch().await;
        inner.update_state(|_| Some(SessionState::PoweringOn));

        let cancel = inner.shutdown.child_token();
        let task = tokio::spawn(poller::watch_power_on(
            Arc::downgrade(&self.inner),
            cancel.clone(),
        ));
        *inner.power_watch.lock() = Some(PowerWatch { cancel, task });
        Ok(())
    }

    /// Powers the device off (or to standby) and closes the session.
    ///
    /// # Errors
    ///
    /// Any [`send_command`](Self::send_command) error; the session stays
    /// open in that case.
    pub async fn power_off(&self, standby: bool) -> Result<()> {
        let command = if standby {
            Command::standby()
        } else {
            Command::power_off()
        };

        self.send_command(command).await?;
        self.inner.set_power(false);
        self.close_connection().await;
        Ok(())
    }

    /// Returns `true` if the device accepts a session right now.
    ///
    /// Uses a dedicated connection, never the pool.
    pub async fn is_device_reachable(&self) -> bool {
        match self.inner.strategy.probe().await {
            Ok(()) => true,
            Err(e) => {
                debug!(addr = %self.inner.addr, error = %e, "Device not reachable");
                false
            }
        }
    }
}

// ============================================================================
// Session - Subscriptions
// ============================================================================

impl Session {
    /// Registers an event handler.
    ///
    /// Handlers run synchronously on the task that produced the event, in
    /// subscription order.
    pub fn subscribe<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        let handler: EventHandler = Arc::new(handler);
        self.inner.subscribers.subscribe(handler)
    }

    /// Removes an event handler. Returns `false` if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.subscribers.unsubscribe(id)
    }
}

// ============================================================================
// Session - Accessors
// ============================================================================

impl Session {
    /// Returns the device host.
    #[inline]
    #[must_use]
    pub fn host(&self) -> &str {
        &self.inner.host
    }

    /// Returns the device address, `host:port`.
    #[inline]
    #[must_use]
    pub fn addr(&self) -> &str {
        &self.inner.addr
    }

    /// Returns the session options.
    #[inline]
    #[must_use]
    pub fn options(&self) -> &SessionOptions {
        &self.inner.options
    }

    /// Returns the current session state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.inner.state()
    }

    /// Returns a snapshot of the device status.
    #[must_use]
    pub fn status(&self) -> DeviceStatus {
        self.inner.status.read().clone()
    }

    /// Returns `true` if the device is believed to be on.
    #[must_use]
    pub fn is_on(&self) -> bool {
        self.inner.status.read().is_on
    }

    /// Returns `true` while the notification connection is up.
    #[must_use]
    pub fn is_notification_link_up(&self) -> bool {
        self.inner.link_up.load(Ordering::Acquire)
    }

    /// Returns the number of queued commands not yet sent.
    #[must_use]
    pub fn queued_commands(&self) -> usize {
        self.inner.queue.len()
    }

    /// Returns pool occupancy, if the session is open.
    #[must_use]
    pub fn pool_stats(&self) -> Option<PoolStats> {
        self.inner.pool().map(|pool| pool.stats())
    }

    /// Returns the number of sessions currently open to the device.
    #[must_use]
    pub fn open_sessions(&self) -> usize {
        self.inner.budget.in_use()
    }

    /// Returns the highest number of simultaneous sessions so far.
    #[must_use]
    pub fn peak_sessions(&self) -> usize {
        self.inner.budget.peak()
    }
}

// ============================================================================
// SessionInner - Lifecycle
// ============================================================================

impl SessionInner {
    /// Opens the notification link, the pool and the background tasks.
    async fn connect(self: &Arc<Self>) -> Result<()> {
        let options = &self.options;
        let wait = options.connect_timeout;

        let permit = match timeout(wait, self.budget.acquire()).await {
            Ok(permit) => permit?,
            Err(_) => return Err(Error::timeout("notification session slot", as_millis(wait))),
        };
        let transport = Transport::connect(&self.addr, &options.transport_config()).await?;

        let cancel = self.shutdown.child_token();
        let sink = self.frame_sink();
        let pool = ConnectionPool::new(options.pool_config(&self.addr), self.budget.clone());
        pool.set_unsolicited_sink(Arc::clone(&sink));

        let reader = NotificationReader::new(
            transport,
            Some(permit),
            ReaderConfig {
                read_timeout: options.read_timeout,
                max_silent_reads: options.max_silent_reads,
                heartbeat: options.heartbeat_interval,
            },
        );

        self.link_up.store(true, Ordering::Release);
        self.set_power(true);
        self.update_state(|_| Some(SessionState::Connected));

        let weak = Arc::downgrade(self);
        let mut tasks = vec![
            tokio::spawn(supervise_reader(weak.clone(), reader, cancel.clone(), sink)),
            tokio::spawn(queue::process(
                weak.clone(),
                Arc::clone(&self.queue),
                pool.clone(),
                cancel.clone(),
            )),
        ];

        if options.background_tasks {
            tasks.push(tokio::spawn(poller::run(weak.clone(), cancel.clone())));
        }
        if options.fetch_info_on_open {
            tasks.push(tokio::spawn(poller::fetch_device_info(
                weak,
                pool.clone(),
                cancel.clone(),
            )));
        }

        *self.runtime.lock() = Some(Runtime {
            pool,
            cancel,
            tasks,
        });
        Ok(())
    }

    /// Stops tasks, closes the pool and marks the session disconnected.
    async fn teardown(&self) {
        let runtime = self.runtime.lock().take();

        if let Some(runtime) = runtime {
            runtime.cancel.cancel();
            for task in runtime.tasks {
                if let Err(e) = task.await {
                    error!(error = %e, "Session task ended abnormally");
                }
            }
            runtime.pool.close_all().await;
        }

        let dropped = self.queue.clear();
        if dropped > 0 {
            debug!(dropped, "Command queue cleared");
        }

        self.link_up.store(false, Ordering::Release);
        self.update_state(|state| {
            (state != SessionState::Disconnected).then_some(SessionState::Disconnected)
        });
    }

    async fn stop_power_watch(&self) {
        let watch = self.power_watch.lock().take();
        if let Some(watch) = watch {
            watch.cancel.cancel();
            let _ = watch.task.await;
        }
    }

    /// Called when the notification reader stops on its own.
    fn on_link_lost(&self, err: &Error) {
        self.link_up.store(false, Ordering::Release);
        self.update_state(|state| match state {
            SessionState::PoweringOn | SessionState::Disconnected => None,
            _ => Some(SessionState::Disconnected),
        });
        self.emit(&SessionEvent::Disconnected {
            reason: err.to_string(),
        });
    }

    /// Called by the power-on watch when it finishes.
    pub(super) fn finish_power_on(&self, reachable: bool) {
        if reachable {
            self.set_power(true);
        }

        let next = if self.link_up.load(Ordering::Acquire) {
            SessionState::Connected
        } else {
            SessionState::Disconnected
        };
        self.update_state(|state| (state == SessionState::PoweringOn).then_some(next));

        info!(reachable, "Power-on finished");
        self.emit(&SessionEvent::PowerOnComplete { reachable });
    }
}

// ============================================================================
// SessionInner - State
// ============================================================================

impl SessionInner {
    pub(super) fn state(&self) -> SessionState {
        *self.state.read()
    }

    /// Applies `f` to the current state and announces any change.
    fn update_state(&self, f: impl FnOnce(SessionState) -> Option<SessionState>) {
        let change = {
            let mut state = self.state.write();
            let from = *state;
            match f(from) {
                Some(to) if to != from => {
                    *state = to;
                    Some((from, to))
                }
                _ => None,
            }
        };

        if let Some((from, to)) = change {
            info!(from = %from, to = %to, "Session state changed");
            self.emit(&SessionEvent::StateChanged { from, to });
        }
    }

    /// Records the device power state.
    pub(super) fn set_power(&self, is_on: bool) {
        let snapshot = {
            let mut status = self.status.write();
            if status.is_on == is_on {
                return;
            }
            if is_on {
                status.is_on = true;
            } else {
                status.mark_off();
            }
            status.clone()
        };

        debug!(is_on, "Device power changed");
        self.emit(&SessionEvent::PowerChanged { is_on });
        self.emit(&SessionEvent::StatusUpdated { status: snapshot });
    }

    /// Classifies one line of device output and folds it into the status.
    pub(super) fn handle_frame(&self, frame: Frame) {
        let notification = Notification::classify(&frame);

        let applied = {
            let mut status = self.status.write();
            let was_on = status.is_on;
            status
                .apply(&notification)
                .map(|changed| (changed, was_on, status.clone()))
        };

        self.emit(&SessionEvent::Notification {
            notification: notification.clone(),
        });

        match applied {
            Ok((changed, was_on, status)) => {
                if notification.is_power_event() && was_on {
                    info!(event = %frame, "Device powering down");
                    self.emit(&SessionEvent::PowerChanged { is_on: false });
                }
                if changed {
                    self.emit(&SessionEvent::StatusUpdated { status });
                }
            }
            Err(e) => warn!(frame = %frame, error = %e, "Dropping malformed status line"),
        }
    }

    fn emit(&self, event: &SessionEvent) {
        self.subscribers.emit(event);
    }

    fn pool(&self) -> Option<ConnectionPool> {
        self.runtime.lock().as_ref().map(|runtime| runtime.pool.clone())
    }

    pub(super) fn is_on(&self) -> bool {
        self.status.read().is_on
    }

    fn learned_mac(&self) -> Option<MacAddress> {
        self.status
            .read()
            .mac_address
            .as_deref()
            .and_then(|mac| mac.parse().ok())
    }

    fn frame_sink(self: &Arc<Self>) -> FrameSink {
        let weak = Arc::downgrade(self);
        Arc::new(move |frame: Frame| {
            if let Some(inner) = weak.upgrade() {
                inner.handle_frame(frame);
            }
        })
    }
}

// ============================================================================
// Tasks
// ============================================================================

async fn supervise_reader(
    inner: Weak<SessionInner>,
    reader: NotificationReader,
    cancel: CancellationToken,
    sink: FrameSink,
) {
    if let ReaderExit::Lost(e) = reader.run(cancel, sink).await
        && let Some(inner) = inner.upgrade()
    {
        inner.on_link_lost(&e);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    fn session() -> Session {
        Session::builder()
            .host("127.0.0.1")
            .port(1)
            .options(SessionOptions::new().with_connect_timeout(Duration::from_millis(200)))
            .build()
            .expect("session")
    }

    #[tokio::test]
    async fn test_send_before_open_is_closed() {
        let session = session();
        let err = session.send_command(Command::power_off()).await.unwrap_err();
        assert!(matches!(err, Error::ConnectionClosed));
    }

    #[tokio::test]
    async fn test_failed_open_leaves_disconnected() {
        let session = session();
        let states = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&states);
        session.subscribe(move |event| {
            if let SessionEvent::StateChanged { to, .. } = event {
                seen.lock().push(*to);
            }
        });

        assert!(session.open_connection().await.is_err());
        assert_eq!(session.state(), SessionState::Disconnected);
        assert_eq!(session.open_sessions(), 0);
        assert_eq!(
            *states.lock(),
            vec![SessionState::Connecting, SessionState::Disconnected]
        );

        session.close_connection().await;
        session.close_connection().await;
        assert_eq!(session.state(), SessionState::Disconnected);
    }

    #[tokio::test]
    async fn test_power_on_without_mac() {
        let session = session();
        let err = session.power_on(None).await.unwrap_err();
        assert!(matches!(err, Error::NoWakeCapability));
        assert_eq!(session.state(), SessionState::Disconnected);
    }

    #[tokio::test]
    async fn test_power_event_clears_status_keeps_mac() {
        let session = session();
        let inner = &session.inner;
        inner.set_power(true);
        inner.handle_frame(Frame::new("MacAddress 01-02-03-04-05-06"));
        inner.handle_frame(Frame::new("Temperatures 80 57 41 45"));

        let powered = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&powered);
        session.subscribe(move |event| {
            if let SessionEvent::PowerChanged { is_on } = event {
                seen.lock().push(*is_on);
            }
        });

        inner.handle_frame(Frame::new("Standby"));

        let status = session.status();
        assert!(!status.is_on);
        assert!(status.temperatures.is_none());
        assert_eq!(status.mac_address.as_deref(), Some("01-02-03-04-05-06"));
        assert_eq!(*powered.lock(), vec![false]);
        assert_eq!(
            inner.learned_mac(),
            Some(MacAddress::new([1, 2, 3, 4, 5, 6]))
        );
    }

    #[tokio::test]
    async fn test_malformed_status_is_dropped() {
        let session = session();
        let updates = Arc::new(Mutex::new(0usize));
        let seen = Arc::clone(&updates);
        session.subscribe(move |event| {
            if matches!(event, SessionEvent::StatusUpdated { .. }) {
                *seen.lock() += 1;
            }
        });

        session.inner.handle_frame(Frame::new("Temperatures hot"));
        assert_eq!(*updates.lock(), 0);
        assert!(session.status().temperatures.is_none());
    }

    #[tokio::test]
    async fn test_powering_on_rejects_commands() {
        let session = session();
        session
            .inner
            .update_state(|_| Some(SessionState::PoweringOn));

        let err = session
            .send_command(Command::key_press("MENU").expect("command"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DevicePoweringOn { .. }));
    }
}
