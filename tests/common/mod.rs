//! In-process fake device for integration tests.
//!
//! Greets every session with `WELCOME`, answers commands the way the
//! hardware does, and counts sessions so tests can check the ceiling.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use madvr_client::{Session, SessionEvent, SessionOptions};

// ============================================================================
// FakeDevice
// ============================================================================

pub const TEMPERATURES: &str = "Temperatures 80 57 41 45";
pub const MAC_ADDRESS: &str = "MacAddress 01-02-03-04-05-06";
pub const INCOMING_SIGNAL: &str =
    "IncomingSignalInfo 3840x2160 23.976p 2D 422 10bit HDR10 2020 TV 16:9";

enum Push {
    Line(String),
    Raw(String),
    Kick,
}

#[derive(Default)]
struct DeviceState {
    current: AtomicUsize,
    peak: AtomicUsize,
    total: AtomicUsize,
    received: Mutex<Vec<String>>,
    /// Open sessions in accept order.
    sessions: Mutex<Vec<(usize, mpsc::UnboundedSender<Push>)>>,
}

pub struct FakeDevice {
    port: u16,
    state: Arc<DeviceState>,
    accept: JoinHandle<()>,
}

impl FakeDevice {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("addr").port();
        let state = Arc::new(DeviceState::default());

        let accept = tokio::spawn({
            let state = Arc::clone(&state);
            async move {
                while let Ok((stream, _)) = listener.accept().await {
                    tokio::spawn(serve(stream, Arc::clone(&state)));
                }
            }
        });

        Self {
            port,
            state,
            accept,
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Sessions open right now.
    pub fn current(&self) -> usize {
        self.state.current.load(Ordering::SeqCst)
    }

    /// Most sessions open at once.
    pub fn peak(&self) -> usize {
        self.state.peak.load(Ordering::SeqCst)
    }

    /// Sessions accepted so far.
    pub fn total(&self) -> usize {
        self.state.total.load(Ordering::SeqCst)
    }

    /// Every line received, in order, across all sessions.
    pub fn received(&self) -> Vec<String> {
        self.state.received.lock().clone()
    }

    /// Sends a line on the oldest open session.
    pub fn notify(&self, line: &str) {
        self.push_oldest(Push::Line(line.to_string()));
    }

    /// Writes bytes on the oldest open session without a line ending.
    pub fn notify_raw(&self, bytes: &str) {
        self.push_oldest(Push::Raw(bytes.to_string()));
    }

    /// Drops the oldest open session.
    pub fn kick_oldest(&self) {
        self.push_oldest(Push::Kick);
    }

    /// Drops the most recently accepted open session.
    pub fn kick_newest(&self) {
        let sessions = self.state.sessions.lock();
        let (_, tx) = sessions.last().expect("no open session");
        tx.send(Push::Kick).ok().expect("session gone");
    }

    /// Closes the listener; open sessions stay up.
    pub async fn stop_accepting(&self) {
        self.accept.abort();
        while !self.accept.is_finished() {
            tokio::task::yield_now().await;
        }
    }

    /// Waits until `current()` equals `expected`.
    pub async fn wait_for_current(&self, expected: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.current() != expected {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("expected {expected} sessions, have {}", self.current()));
    }

    fn push_oldest(&self, push: Push) {
        let sessions = self.state.sessions.lock();
        let (_, tx) = sessions.first().expect("no open session");
        tx.send(push).ok().expect("session gone");
    }
}

impl Drop for FakeDevice {
    fn drop(&mut self) {
        self.accept.abort();
    }
}

async fn serve(stream: TcpStream, state: Arc<DeviceState>) {
    let index = state.total.fetch_add(1, Ordering::SeqCst);
    let now = state.current.fetch_add(1, Ordering::SeqCst) + 1;
    state.peak.fetch_max(now, Ordering::SeqCst);

    let (tx, mut pushes) = mpsc::unbounded_channel();
    state.sessions.lock().push((index, tx));

    let (read, mut write) = stream.into_split();
    let mut lines = BufReader::new(read).lines();
    let mut said_bye = false;

    if write.write_all(b"WELCOME to Envy v1.6.2.0\r\n").await.is_ok() {
        loop {
            tokio::select! {
                line = lines.next_line() => {
                    let Ok(Some(line)) = line else { break };
                    state.received.lock().push(line.clone());

                    if line == "Bye" {
                        said_bye = true;
                        state.current.fetch_sub(1, Ordering::SeqCst);
                        let _ = write.write_all(b"OK\r\n").await;
                        break;
                    }
                    if write.write_all(answer(&line).as_bytes()).await.is_err() {
                        break;
                    }
                }
                push = pushes.recv() => match push {
                    Some(Push::Line(line)) => {
                        let _ = write.write_all(format!("{line}\r\n").as_bytes()).await;
                    }
                    Some(Push::Raw(bytes)) => {
                        let _ = write.write_all(bytes.as_bytes()).await;
                    }
                    Some(Push::Kick) | None => break,
                },
            }
        }
    }

    if !said_bye {
        state.current.fetch_sub(1, Ordering::SeqCst);
    }
    state.sessions.lock().retain(|(i, _)| *i != index);
}

fn answer(line: &str) -> String {
    let verb = line.split(' ').next().unwrap_or_default();
    match verb {
        "GetTemperatures" => format!("OK\r\n{TEMPERATURES}\r\n"),
        "GetMacAddress" => format!("OK\r\n{MAC_ADDRESS}\r\n"),
        "GetIncomingSignalInfo" => format!("OK\r\n{INCOMING_SIGNAL}\r\n"),
        v if v.starts_with("Get") => "ERROR\r\n".to_string(),
        "ActivateProfile" => "ERROR \"unknown profile\"\r\n".to_string(),
        _ => "OK\r\n".to_string(),
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Options with background work off, so session counts are predictable.
pub fn quiet_options() -> SessionOptions {
    SessionOptions::new()
        .with_background_tasks(false)
        .with_fetch_info_on_open(false)
}

pub fn session_for(device: &FakeDevice, options: SessionOptions) -> Session {
    Session::builder()
        .host("127.0.0.1")
        .port(device.port())
        .options(options)
        .build()
        .expect("session")
}

/// Forwards every session event into a channel.
pub fn events(session: &Session) -> mpsc::UnboundedReceiver<SessionEvent> {
    let (tx, rx) = mpsc::unbounded_channel();
    session.subscribe(move |event| {
        let _ = tx.send(event.clone());
    });
    rx
}

/// Waits for the first event matching `pred`.
pub async fn wait_event<F>(rx: &mut mpsc::UnboundedReceiver<SessionEvent>, pred: F) -> SessionEvent
where
    F: Fn(&SessionEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let event = rx.recv().await.expect("event channel closed");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

/// Waits until `check` returns `true`.
pub async fn eventually<F>(what: &str, check: F)
where
    F: Fn() -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {what}"));
}
