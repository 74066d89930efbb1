//! Input listener
//!
//! A dedicated thread owns the input connection. The backend callback only
//! filters by leading bytes and queues; all frame handling happens on the
//! listener thread, which also watches the port and reopens it if it
//! disappears.

use crossbeam::channel::{self, RecvTimeoutError};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

use super::backend::{InputCallback, InputConnection, MidiBackend};
use crate::config::ListenerConfig;
use crate::error::TransportError;
use crate::midi::{describe, format_hex};

/// Lifecycle of the listener thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl ListenerState {
    fn as_u8(self) -> u8 {
        match self {
            ListenerState::Stopped => 0,
            ListenerState::Starting => 1,
            ListenerState::Running => 2,
            ListenerState::Stopping => 3,
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            1 => ListenerState::Starting,
            2 => ListenerState::Running,
            3 => ListenerState::Stopping,
            _ => ListenerState::Stopped,
        }
    }
}

/// Timing and retry knobs for the listener
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerSettings {
    pub poll_interval: Duration,
    pub open_retries: u32,
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
    pub reopen_attempts: u32,
    pub health_check_interval: Duration,
    pub queue_capacity: usize,
}

impl Default for ListenerSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(20),
            open_retries: 5,
            retry_base_delay: Duration::from_millis(250),
            retry_max_delay: Duration::from_millis(4000),
            reopen_attempts: 5,
            health_check_interval: Duration::from_millis(1000),
            queue_capacity: 256,
        }
    }
}

impl From<&ListenerConfig> for ListenerSettings {
    fn from(cfg: &ListenerConfig) -> Self {
        Self {
            poll_interval: Duration::from_millis(cfg.poll_interval_ms),
            open_retries: cfg.open_retries,
            retry_base_delay: Duration::from_millis(cfg.retry_base_delay_ms),
            retry_max_delay: Duration::from_millis(cfg.retry_max_delay_ms),
            reopen_attempts: cfg.reopen_attempts,
            health_check_interval: Duration::from_millis(cfg.health_check_interval_ms),
            ..Self::default()
        }
    }
}

impl ListenerSettings {
    /// Delay after the given failed attempt (1-based), doubling up to the cap
    pub fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        self.retry_base_delay
            .saturating_mul(1u32 << shift)
            .min(self.retry_max_delay)
    }
}

/// Receives every candidate frame, on the listener thread
pub type FrameCallback = Arc<dyn Fn(Vec<u8>) + Send + Sync>;

struct Shared {
    state: AtomicU8,
    stop: AtomicBool,
    frames_received: AtomicU64,
    last_error: Mutex<Option<TransportError>>,
}

impl Shared {
    fn set_state(&self, state: ListenerState) {
        self.state.store(state.as_u8(), Ordering::SeqCst);
    }

    fn stopping(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }
}

/// Owner handle for the listener thread
pub struct Listener {
    shared: Arc<Shared>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Default for Listener {
    fn default() -> Self {
        Self::new()
    }
}

impl Listener {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: AtomicU8::new(ListenerState::Stopped.as_u8()),
                stop: AtomicBool::new(false),
                frames_received: AtomicU64::new(0),
                last_error: Mutex::new(None),
            }),
            handle: Mutex::new(None),
        }
    }

    pub fn state(&self) -> ListenerState {
        ListenerState::from_u8(self.shared.state.load(Ordering::SeqCst))
    }

    /// Most recent open failure, if any
    pub fn last_error(&self) -> Option<TransportError> {
        self.shared.last_error.lock().clone()
    }

    pub fn frames_received(&self) -> u64 {
        self.shared.frames_received.load(Ordering::Relaxed)
    }

    /// Spawn the listener thread; no-op if it is already active
    ///
    /// `prefix` is the leading byte sequence a frame must start with to be
    /// queued at all.
    pub fn start(
        &self,
        backend: Arc<dyn MidiBackend>,
        port_name: String,
        prefix: Vec<u8>,
        settings: ListenerSettings,
        on_frame: FrameCallback,
    ) -> Result<(), TransportError> {
        let mut handle = self.handle.lock();

        if matches!(self.state(), ListenerState::Starting | ListenerState::Running) {
            debug!("Listener already active on '{}'", port_name);
            return Ok(());
        }

        // Reap a thread that ended on its own
        if let Some(old) = handle.take() {
            let _ = old.join();
        }

        self.shared.stop.store(false, Ordering::SeqCst);
        *self.shared.last_error.lock() = None;
        self.shared.set_state(ListenerState::Starting);

        let shared = self.shared.clone();
        let spawned = thread::Builder::new()
            .name("sysex-listener".to_string())
            .spawn(move || run(shared, backend, port_name, prefix, settings, on_frame));

        match spawned {
            Ok(h) => {
                *handle = Some(h);
                Ok(())
            }
            Err(e) => {
                self.shared.set_state(ListenerState::Stopped);
                Err(TransportError::Backend(format!("failed to spawn listener thread: {}", e)))
            }
        }
    }

    /// Stop the thread and wait for it; idempotent
    pub fn stop(&self) {
        let mut handle = self.handle.lock();

        self.shared.stop.store(true, Ordering::SeqCst);
        let _ = self.shared.state.compare_exchange(
            ListenerState::Running.as_u8(),
            ListenerState::Stopping.as_u8(),
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
        let _ = self.shared.state.compare_exchange(
            ListenerState::Starting.as_u8(),
            ListenerState::Stopping.as_u8(),
            Ordering::SeqCst,
            Ordering::SeqCst,
        );

        if let Some(h) = handle.take() {
            if h.join().is_err() {
                error!("Listener thread panicked");
            }
        }
        self.shared.set_state(ListenerState::Stopped);
    }

    /// Poll until the listener reaches `state` or `timeout` elapses
    pub fn wait_for_state(&self, state: ListenerState, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.state() == state {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(2));
        }
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(
    shared: Arc<Shared>,
    backend: Arc<dyn MidiBackend>,
    port_name: String,
    prefix: Vec<u8>,
    settings: ListenerSettings,
    on_frame: FrameCallback,
) {
    let (tx, rx) = channel::bounded::<Vec<u8>>(settings.queue_capacity.max(1));

    let make_callback = || -> InputCallback {
        let tx = tx.clone();
        let prefix = prefix.clone();
        Box::new(move |data: &[u8]| {
            if data.starts_with(&prefix) {
                if tx.try_send(data.to_vec()).is_err() {
                    warn!("Listener queue full, dropping frame");
                }
            } else {
                trace!("Ignoring MIDI: {}", describe(data));
            }
        })
    };

    let mut conn = match open_with_retries(
        &shared,
        backend.as_ref(),
        &port_name,
        &settings,
        settings.open_retries,
        &make_callback,
    ) {
        Some(c) => Some(c),
        None => {
            shared.set_state(ListenerState::Stopped);
            return;
        }
    };

    // Stop may have been requested while the port was opening
    let _ = shared.state.compare_exchange(
        ListenerState::Starting.as_u8(),
        ListenerState::Running.as_u8(),
        Ordering::SeqCst,
        Ordering::SeqCst,
    );
    info!("Listening for feedback on '{}'", port_name);

    let mut last_check = Instant::now();
    while !shared.stopping() {
        match rx.recv_timeout(settings.poll_interval) {
            Ok(frame) => {
                shared.frames_received.fetch_add(1, Ordering::Relaxed);
                debug!("RX {}", format_hex(&frame));
                on_frame(frame);
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }

        if last_check.elapsed() < settings.health_check_interval {
            continue;
        }
        last_check = Instant::now();

        if port_listed(backend.as_ref(), &port_name) {
            continue;
        }

        warn!("Input port '{}' disappeared, reopening", port_name);
        drop(conn.take());
        conn = open_with_retries(
            &shared,
            backend.as_ref(),
            &port_name,
            &settings,
            settings.reopen_attempts,
            &make_callback,
        );
        if conn.is_none() {
            break;
        }
        info!("Input port '{}' reopened", port_name);
    }

    if let Some(c) = conn.take() {
        debug!("Closing input port '{}'", c.port_name());
    }
    shared.set_state(ListenerState::Stopped);
    info!("Listener on '{}' stopped", port_name);
}

fn open_with_retries(
    shared: &Shared,
    backend: &dyn MidiBackend,
    port_name: &str,
    settings: &ListenerSettings,
    attempts: u32,
    make_callback: &dyn Fn() -> InputCallback,
) -> Option<Box<dyn InputConnection>> {
    let attempts = attempts.max(1);
    for attempt in 1..=attempts {
        if shared.stopping() {
            return None;
        }

        match backend.open_input(port_name, make_callback()) {
            Ok(conn) => return Some(conn),
            Err(e) => {
                warn!(
                    "Opening input '{}' failed (attempt {}/{}): {}",
                    port_name, attempt, attempts, e
                );
                *shared.last_error.lock() = Some(e);
                if attempt < attempts {
                    sleep_unless_stopped(shared, settings.backoff(attempt), settings.poll_interval);
                }
            }
        }
    }

    error!("Giving up on input '{}' after {} attempts", port_name, attempts);
    None
}

fn sleep_unless_stopped(shared: &Shared, total: Duration, slice: Duration) {
    let deadline = Instant::now() + total;
    let slice = slice.max(Duration::from_millis(1));
    while !shared.stopping() {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        thread::sleep(slice.min(deadline - now));
    }
}

fn port_listed(backend: &dyn MidiBackend, port_name: &str) -> bool {
    match backend.input_ports() {
        Ok(ports) => ports.iter().any(|p| p == port_name),
        Err(e) => {
            // A failed listing is not evidence the port is gone
            debug!("Port listing failed during health check: {}", e);
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::backend::OutputConnection;
    use crate::transport::PortDirection;
    use std::sync::atomic::AtomicUsize;

    /// Backend whose input port can be made to vanish and whose callback can
    /// be driven from the test
    #[derive(Default)]
    struct FakeInputBackend {
        listed: AtomicBool,
        openable: AtomicBool,
        opens: AtomicUsize,
        callback: Mutex<Option<InputCallback>>,
    }

    struct FakeInput;

    impl InputConnection for FakeInput {
        fn port_name(&self) -> &str {
            "Fake In"
        }
    }

    impl FakeInputBackend {
        fn new(available: bool) -> Arc<Self> {
            let b = Self::default();
            b.listed.store(available, Ordering::SeqCst);
            b.openable.store(available, Ordering::SeqCst);
            Arc::new(b)
        }

        fn inject(&self, bytes: &[u8]) {
            if let Some(cb) = self.callback.lock().as_mut() {
                cb(bytes);
            }
        }
    }

    impl MidiBackend for FakeInputBackend {
        fn input_ports(&self) -> Result<Vec<String>, TransportError> {
            if self.listed.load(Ordering::SeqCst) {
                Ok(vec!["Fake In".to_string()])
            } else {
                Ok(vec![])
            }
        }

        fn output_ports(&self) -> Result<Vec<String>, TransportError> {
            Ok(vec![])
        }

        fn open_output(&self, name: &str) -> Result<Box<dyn OutputConnection>, TransportError> {
            Err(TransportError::PortNotFound {
                direction: PortDirection::Output,
                name: name.to_string(),
            })
        }

        fn open_input(
            &self,
            name: &str,
            callback: InputCallback,
        ) -> Result<Box<dyn InputConnection>, TransportError> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            if !self.openable.load(Ordering::SeqCst) {
                return Err(TransportError::PortNotFound {
                    direction: PortDirection::Input,
                    name: name.to_string(),
                });
            }
            *self.callback.lock() = Some(callback);
            Ok(Box::new(FakeInput))
        }
    }

    fn fast_settings() -> ListenerSettings {
        ListenerSettings {
            poll_interval: Duration::from_millis(5),
            open_retries: 3,
            retry_base_delay: Duration::from_millis(5),
            retry_max_delay: Duration::from_millis(10),
            reopen_attempts: 2,
            health_check_interval: Duration::from_millis(20),
            queue_capacity: 16,
        }
    }

    fn collecting() -> (FrameCallback, channel::Receiver<Vec<u8>>) {
        let (tx, rx) = channel::unbounded();
        let cb: FrameCallback = Arc::new(move |frame| {
            let _ = tx.send(frame);
        });
        (cb, rx)
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let s = ListenerSettings::default();
        assert_eq!(s.backoff(1), Duration::from_millis(250));
        assert_eq!(s.backoff(2), Duration::from_millis(500));
        assert_eq!(s.backoff(4), Duration::from_millis(2000));
        assert_eq!(s.backoff(5), Duration::from_millis(4000));
        assert_eq!(s.backoff(30), Duration::from_millis(4000));
    }

    #[test]
    fn test_forwards_only_matching_frames() {
        let backend = FakeInputBackend::new(true);
        let listener = Listener::new();
        let (cb, rx) = collecting();

        listener
            .start(backend.clone(), "Fake In".into(), vec![0xF0, 0x7D, 0x01], fast_settings(), cb)
            .unwrap();
        assert!(listener.wait_for_state(ListenerState::Running, Duration::from_secs(2)));

        backend.inject(&[0x90, 60, 100]);
        backend.inject(&[0xF0, 0x7E, 0x7F, 0x06, 0x01, 0xF7]);
        backend.inject(&[0xF0, 0x7D, 0x01, 0x70, 0xF7]);

        let frame = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(frame, vec![0xF0, 0x7D, 0x01, 0x70, 0xF7]);
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
        assert_eq!(listener.frames_received(), 1);

        listener.stop();
        assert_eq!(listener.state(), ListenerState::Stopped);
    }

    #[test]
    fn test_unavailable_port_ends_stopped() {
        let backend = FakeInputBackend::new(false);
        let listener = Listener::new();
        let (cb, _rx) = collecting();

        listener
            .start(backend.clone(), "Fake In".into(), vec![0xF0], fast_settings(), cb)
            .unwrap();
        assert!(listener.wait_for_state(ListenerState::Stopped, Duration::from_secs(2)));
        assert_eq!(backend.opens.load(Ordering::SeqCst), 3);
        assert!(matches!(
            listener.last_error(),
            Some(TransportError::PortNotFound { .. })
        ));
    }

    #[test]
    fn test_stop_is_idempotent() {
        let backend = FakeInputBackend::new(true);
        let listener = Listener::new();
        listener.stop();

        let (cb, _rx) = collecting();
        listener
            .start(backend, "Fake In".into(), vec![0xF0], fast_settings(), cb)
            .unwrap();
        assert!(listener.wait_for_state(ListenerState::Running, Duration::from_secs(2)));

        let started = Instant::now();
        listener.stop();
        listener.stop();
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(listener.state(), ListenerState::Stopped);
    }

    #[test]
    fn test_vanished_port_is_reopened() {
        let backend = FakeInputBackend::new(true);
        let listener = Listener::new();
        let (cb, _rx) = collecting();

        listener
            .start(backend.clone(), "Fake In".into(), vec![0xF0], fast_settings(), cb)
            .unwrap();
        assert!(listener.wait_for_state(ListenerState::Running, Duration::from_secs(2)));
        assert_eq!(backend.opens.load(Ordering::SeqCst), 1);

        // Port drops out of the listing but can still be opened
        backend.listed.store(false, Ordering::SeqCst);
        let deadline = Instant::now() + Duration::from_secs(2);
        while backend.opens.load(Ordering::SeqCst) < 2 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(backend.opens.load(Ordering::SeqCst) >= 2);
        assert_eq!(listener.state(), ListenerState::Running);
        listener.stop();
    }

    #[test]
    fn test_gives_up_when_port_cannot_be_reopened() {
        let backend = FakeInputBackend::new(true);
        let listener = Listener::new();
        let (cb, _rx) = collecting();

        listener
            .start(backend.clone(), "Fake In".into(), vec![0xF0], fast_settings(), cb)
            .unwrap();
        assert!(listener.wait_for_state(ListenerState::Running, Duration::from_secs(2)));

        backend.openable.store(false, Ordering::SeqCst);
        backend.listed.store(false, Ordering::SeqCst);
        assert!(listener.wait_for_state(ListenerState::Stopped, Duration::from_secs(2)));
        // 1 initial open + 2 reopen attempts
        assert_eq!(backend.opens.load(Ordering::SeqCst), 3);
    }
}
