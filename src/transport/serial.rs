//! Serial link to the kiosk controller.
//!
//! Opening waits a short settle delay first so a lock left behind by a
//! previous session can clear. Busy, locked and permission failures are
//! retried with a linearly growing backoff; anything else fails at once.
//! The link never reconnects on its own once open.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_serial::{SerialPortBuilderExt, SerialStream};

use crate::error::{Error, Result, is_transient};
use crate::protocol::FrameDecoder;
use crate::transport::{Link, LinkFuture, LinkSignal, LinkState, StateCell, notify};

/// Default baud rate of the controller.
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Default delay before the first open attempt.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(500);

/// Default backoff unit; attempt `n` waits `n` units before the next one.
pub const DEFAULT_RETRY_UNIT: Duration = Duration::from_secs(1);

/// Default number of open attempts.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Default delay before each write.
pub const DEFAULT_SEND_DELAY: Duration = Duration::from_millis(100);

/// Configuration for the serial link.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Serial port path (e.g., "/dev/ttyUSB0" or "COM3").
    pub port: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Delay before the first open attempt.
    pub settle_delay: Duration,
    /// Backoff unit between open attempts.
    pub retry_unit: Duration,
    /// Maximum number of open attempts.
    pub max_attempts: u32,
    /// Delay before each write.
    pub send_delay: Duration,
}

impl SerialConfig {
    /// Creates a new serial configuration with default settings.
    #[must_use]
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            baud_rate: DEFAULT_BAUD_RATE,
            settle_delay: DEFAULT_SETTLE_DELAY,
            retry_unit: DEFAULT_RETRY_UNIT,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            send_delay: DEFAULT_SEND_DELAY,
        }
    }

    /// Sets the baud rate.
    #[must_use]
    pub const fn baud_rate(mut self, rate: u32) -> Self {
        self.baud_rate = rate;
        self
    }

    /// Sets the settle delay.
    #[must_use]
    pub const fn settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    /// Sets the retry backoff unit.
    #[must_use]
    pub const fn retry_unit(mut self, unit: Duration) -> Self {
        self.retry_unit = unit;
        self
    }

    /// Sets the maximum number of open attempts (at least one).
    #[must_use]
    pub const fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = if attempts == 0 { 1 } else { attempts };
        self
    }

    /// Sets the delay before each write.
    #[must_use]
    pub const fn send_delay(mut self, delay: Duration) -> Self {
        self.send_delay = delay;
        self
    }

    /// Backoff after failed attempt number `attempt` (1-based).
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.retry_unit.saturating_mul(attempt)
    }
}

/// Opens the port described by a configuration.
type Opener = fn(&SerialConfig) -> tokio_serial::Result<SerialStream>;

fn open_port(config: &SerialConfig) -> tokio_serial::Result<SerialStream> {
    tokio_serial::new(&config.port, config.baud_rate).open_native_async()
}

/// Returns the link to `Idle` if an open attempt is dropped before it finishes.
struct OpeningGuard<'a> {
    state: &'a StateCell,
    armed: bool,
}

impl<'a> OpeningGuard<'a> {
    const fn new(state: &'a StateCell) -> Self {
        Self { state, armed: true }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for OpeningGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.state.set(LinkState::Idle);
        }
    }
}

#[derive(Default)]
struct Session {
    writer: Option<WriteHalf<SerialStream>>,
    read_task: Option<JoinHandle<()>>,
}

/// Serial link to the controller.
pub struct SerialLink {
    config: SerialConfig,
    state: StateCell,
    session: Arc<Mutex<Session>>,
    signals: mpsc::Sender<LinkSignal>,
    opener: Opener,
}

impl SerialLink {
    /// Creates a new, unconnected serial link.
    #[must_use]
    pub fn new(config: SerialConfig, signals: mpsc::Sender<LinkSignal>) -> Self {
        Self::with_opener(config, signals, open_port)
    }

    fn with_opener(
        config: SerialConfig,
        signals: mpsc::Sender<LinkSignal>,
        opener: Opener,
    ) -> Self {
        Self {
            config,
            state: StateCell::new(),
            session: Arc::new(Mutex::new(Session::default())),
            signals,
            opener,
        }
    }

    /// Returns the link configuration.
    #[must_use]
    pub const fn config(&self) -> &SerialConfig {
        &self.config
    }

    async fn open(&self) -> Result<SerialStream> {
        tokio::time::sleep(self.config.settle_delay).await;

        let mut attempt = 1;
        loop {
            tracing::info!(
                "opening {} at {} baud (attempt {}/{})",
                self.config.port,
                self.config.baud_rate,
                attempt,
                self.config.max_attempts
            );

            match (self.opener)(&self.config) {
                Ok(stream) => return Ok(stream),
                Err(e) if is_transient(&e) && attempt < self.config.max_attempts => {
                    let backoff = self.config.backoff(attempt);
                    tracing::warn!(
                        "{} is busy ({}), retrying in {:?}",
                        self.config.port,
                        e,
                        backoff
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(source) => {
                    return Err(Error::LinkOpen {
                        path: self.config.port.clone(),
                        attempts: attempt,
                        source,
                    });
                }
            }
        }
    }
}

impl std::fmt::Debug for SerialLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialLink")
            .field("config", &self.config)
            .field("state", &self.state.get())
            .finish_non_exhaustive()
    }
}

/// Reads until the device closes the port, forwarding each frame.
async fn read_loop(
    mut reader: ReadHalf<SerialStream>,
    session: Arc<Mutex<Session>>,
    state: StateCell,
    signals: mpsc::Sender<LinkSignal>,
) {
    let mut decoder = FrameDecoder::new();
    let mut buf = [0u8; 1024];

    let fault = loop {
        match reader.read(&mut buf).await {
            Ok(0) => break None,
            Ok(n) => {
                tracing::trace!("received {} bytes", n);
                for frame in decoder.feed(&buf[..n]) {
                    tracing::trace!("frame: {}", frame);
                    if signals.send(LinkSignal::Frame(frame)).await.is_err() {
                        tracing::debug!("frame receiver dropped");
                        return;
                    }
                }
            }
            Err(e) => break Some(e),
        }
    };
    decoder.clear();

    session.lock().await.writer = None;

    // A local disconnect owns the close notification.
    if state.transition(LinkState::Open, LinkState::Idle).is_err() {
        return;
    }
    if let Some(e) = fault {
        tracing::error!("serial read error: {}", e);
        notify(&signals, LinkSignal::Fault(e.to_string())).await;
    }
    tracing::info!("serial port closed");
    notify(&signals, LinkSignal::Closed).await;
}

impl Link for SerialLink {
    fn connect(&self) -> LinkFuture<'_, ()> {
        Box::pin(async move {
            if let Err(current) = self.state.transition(LinkState::Idle, LinkState::Opening) {
                tracing::warn!("connect ignored: link is {}", current);
                return Ok(());
            }
            let guard = OpeningGuard::new(&self.state);

            let stream = match self.open().await {
                Ok(stream) => stream,
                Err(e) => {
                    drop(guard);
                    tracing::error!("{}", e);
                    notify(&self.signals, LinkSignal::Fault(e.to_string())).await;
                    return Err(e);
                }
            };

            let (reader, writer) = tokio::io::split(stream);
            let mut session = self.session.lock().await;
            session.writer = Some(writer);

            // Opened must reach the consumer before the first frame.
            self.state.set(LinkState::Open);
            notify(&self.signals, LinkSignal::Opened).await;

            session.read_task = Some(tokio::spawn(read_loop(
                reader,
                Arc::clone(&self.session),
                self.state.clone(),
                self.signals.clone(),
            )));
            guard.disarm();

            tracing::info!("connected to {}", self.config.port);
            Ok(())
        })
    }

    fn disconnect(&self) -> LinkFuture<'_, ()> {
        Box::pin(async move {
            if let Err(current) = self.state.transition(LinkState::Open, LinkState::Closing) {
                tracing::warn!("disconnect ignored: link is {}", current);
                return Ok(());
            }

            tracing::info!("disconnecting from {}", self.config.port);
            {
                let mut session = self.session.lock().await;
                if let Some(task) = session.read_task.take() {
                    task.abort();
                }
                session.writer = None;
            }

            self.state.set(LinkState::Idle);
            notify(&self.signals, LinkSignal::Closed).await;
            Ok(())
        })
    }

    fn send(&self, payload: Bytes) -> LinkFuture<'_, ()> {
        Box::pin(async move {
            if !self.is_connected() {
                tracing::warn!("dropping {} byte payload: not connected", payload.len());
                return Err(Error::NotConnected);
            }

            tokio::time::sleep(self.config.send_delay).await;

            let mut session = self.session.lock().await;
            let Some(writer) = session.writer.as_mut() else {
                tracing::warn!("dropping {} byte payload: link closed", payload.len());
                return Err(Error::NotConnected);
            };

            tracing::trace!("sending {} bytes", payload.len());
            let written = match writer.write_all(&payload).await {
                Ok(()) => writer.flush().await,
                Err(e) => Err(e),
            };
            if let Err(e) = &written {
                tracing::warn!("serial write failed: {}", e);
            }
            written.map_err(Error::Io)
        })
    }

    fn state(&self) -> LinkState {
        self.state.get()
    }
}

/// Lists available serial ports.
///
/// # Errors
///
/// Returns an error if the port list cannot be retrieved.
pub fn list_ports() -> Result<Vec<String>> {
    let ports = tokio_serial::available_ports().map_err(Error::Serial)?;
    Ok(ports.into_iter().map(|p| p.port_name).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicU32, Ordering};

    use tokio_serial::ErrorKind;

    const MISSING_PORT: &str = "/dev/recycle-bridge-missing-tty";

    #[test]
    fn test_serial_config_defaults() {
        let config = SerialConfig::new("/dev/ttyUSB0");
        assert_eq!(config.port, "/dev/ttyUSB0");
        assert_eq!(config.baud_rate, DEFAULT_BAUD_RATE);
        assert_eq!(config.max_attempts, DEFAULT_MAX_ATTEMPTS);
    }

    #[test]
    fn test_serial_config_builder() {
        let config = SerialConfig::new("/dev/ttyUSB0")
            .baud_rate(115_200)
            .settle_delay(Duration::from_millis(10))
            .max_attempts(0)
            .send_delay(Duration::ZERO);
        assert_eq!(config.baud_rate, 115_200);
        assert_eq!(config.settle_delay, Duration::from_millis(10));
        assert_eq!(config.max_attempts, 1);
        assert_eq!(config.send_delay, Duration::ZERO);
    }

    #[test]
    fn test_backoff_is_linear() {
        let config = SerialConfig::new("/dev/ttyUSB0").retry_unit(Duration::from_millis(250));
        assert_eq!(config.backoff(1), Duration::from_millis(250));
        assert_eq!(config.backoff(2), Duration::from_millis(500));
        assert_eq!(config.backoff(4), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_port_fails_without_retry() {
        let (tx, mut rx) = mpsc::channel(8);
        let link = SerialLink::new(SerialConfig::new(MISSING_PORT), tx);

        let err = link.connect().await.unwrap_err();
        assert!(matches!(err, Error::LinkOpen { attempts: 1, .. }));
        assert_eq!(link.state(), LinkState::Idle);
        assert!(matches!(rx.recv().await, Some(LinkSignal::Fault(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_open_in_flight() {
        let (tx, mut rx) = mpsc::channel(8);
        let link = SerialLink::new(SerialConfig::new(MISSING_PORT), tx);

        let (first, second) = tokio::join!(link.connect(), link.connect());

        // One call made the attempt; the other was turned away immediately.
        assert_ne!(first.is_err(), second.is_err());
        assert!(matches!(rx.recv().await, Some(LinkSignal::Fault(_))));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_connect_returns_to_idle() {
        let (tx, mut rx) = mpsc::channel(8);
        let link = SerialLink::new(SerialConfig::new(MISSING_PORT), tx);

        // Gives up during the settle delay.
        let cancelled = tokio::time::timeout(Duration::from_millis(100), link.connect()).await;
        assert!(cancelled.is_err());
        assert_eq!(link.state(), LinkState::Idle);

        let err = link.connect().await.unwrap_err();
        assert!(matches!(err, Error::LinkOpen { attempts: 1, .. }));
        assert_eq!(link.state(), LinkState::Idle);
        assert!(matches!(rx.recv().await, Some(LinkSignal::Fault(_))));
    }

    static BUSY_ATTEMPTS: AtomicU32 = AtomicU32::new(0);

    fn busy_port(_: &SerialConfig) -> tokio_serial::Result<SerialStream> {
        BUSY_ATTEMPTS.fetch_add(1, Ordering::SeqCst);
        Err(tokio_serial::Error::new(
            ErrorKind::Io(std::io::ErrorKind::ResourceBusy),
            "Device or resource busy",
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn test_busy_port_retries_with_linear_backoff() {
        let (tx, mut rx) = mpsc::channel(8);
        let config = SerialConfig::new("/dev/ttyUSB0")
            .settle_delay(Duration::ZERO)
            .retry_unit(Duration::from_secs(1))
            .max_attempts(4);
        let link = SerialLink::with_opener(config, tx, busy_port);

        let start = tokio::time::Instant::now();
        let err = link.connect().await.unwrap_err();
        let elapsed = start.elapsed();

        assert!(matches!(err, Error::LinkOpen { attempts: 4, .. }));
        assert_eq!(BUSY_ATTEMPTS.load(Ordering::SeqCst), 4);
        // 1s + 2s + 3s between the four attempts.
        assert!(elapsed >= Duration::from_secs(6), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_secs(7), "elapsed {elapsed:?}");
        assert_eq!(link.state(), LinkState::Idle);

        assert!(matches!(rx.recv().await, Some(LinkSignal::Fault(_))));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_send_while_disconnected_is_dropped() {
        let (tx, _rx) = mpsc::channel(8);
        let link = SerialLink::new(SerialConfig::new(MISSING_PORT), tx);

        let err = link.send(Bytes::from_static(b"{}")).await.unwrap_err();
        assert!(matches!(err, Error::NotConnected));
    }

    #[tokio::test]
    async fn test_disconnect_when_idle_is_noop() {
        let (tx, mut rx) = mpsc::channel(8);
        let link = SerialLink::new(SerialConfig::new(MISSING_PORT), tx);

        link.disconnect().await.unwrap();
        assert_eq!(link.state(), LinkState::Idle);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    #[ignore = "Requires /sys/class/tty - not available in sandboxed builds"]
    fn test_list_ports() {
        // Just verify it doesn't panic
        let _ = list_ports();
    }

    #[tokio::test]
    #[ignore = "Requires a controller on RECYCLE_BRIDGE_TEST_PORT"]
    async fn test_hardware_round_trip() {
        let port = std::env::var("RECYCLE_BRIDGE_TEST_PORT").unwrap();
        let (tx, mut rx) = mpsc::channel(8);
        let link = SerialLink::new(SerialConfig::new(port), tx);

        link.connect().await.unwrap();
        assert_eq!(rx.recv().await, Some(LinkSignal::Opened));
        link.send(Bytes::from_static(br#"{"grinder":0}"#))
            .await
            .unwrap();
        link.disconnect().await.unwrap();
    }
}
