//! Detects local ports opened while assistant terminals are running.
//!
//! The detector is reference counted: each running terminal calls
//! [`PortDetector::start`] and [`PortDetector::stop`]. While the count is
//! above zero the OS socket table is polled with exponential backoff, and
//! every port that was not listening on the previous poll is fired on
//! `on_port_opened`.

use aide_core::{AppError, AppResult, Emitter, Subscription};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::process::Command;
use tokio::task::JoinHandle;

pub const POLL_FLOOR: Duration = Duration::from_millis(250);
pub const POLL_CAP: Duration = Duration::from_secs(5);

/// Socket table layouts we know how to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketTableFormat {
    /// `ss -tunlp`
    Ss,
    /// `netstat -anv -p tcp|udp` on macOS
    BsdNetstat,
    /// `netstat -ano` on Windows
    WindowsNetstat,
}

impl SocketTableFormat {
    pub fn current() -> Self {
        if cfg!(target_os = "macos") {
            SocketTableFormat::BsdNetstat
        } else if cfg!(windows) {
            SocketTableFormat::WindowsNetstat
        } else {
            SocketTableFormat::Ss
        }
    }

    fn address_column(&self) -> usize {
        match self {
            SocketTableFormat::Ss => 4,
            SocketTableFormat::BsdNetstat => 3,
            SocketTableFormat::WindowsNetstat => 1,
        }
    }
}

/// Local ports in a socket table dump.
///
/// TCP rows count only in a listening state; UDP rows always count.
pub fn parse_socket_table(output: &str, format: SocketTableFormat) -> BTreeSet<u16> {
    let mut ports = BTreeSet::new();

    for line in output.lines() {
        let columns: Vec<&str> = line.split_whitespace().collect();
        let Some(protocol) = columns.first().map(|c| c.to_ascii_lowercase()) else {
            continue;
        };
        let is_udp = protocol.starts_with("udp");
        if !is_udp && !protocol.starts_with("tcp") {
            continue;
        }
        if !is_udp && !columns.iter().any(|c| c.starts_with("LISTEN")) {
            continue;
        }

        if let Some(port) = columns
            .get(format.address_column())
            .and_then(|address| parse_port(address))
        {
            ports.insert(port);
        }
    }

    ports
}

/// Trailing port of `host:port`, `host.port` or `[v6]:port`.
fn parse_port(address: &str) -> Option<u16> {
    let (_, port) = address.rsplit_once([':', '.'])?;
    match port.parse::<u16>() {
        Ok(0) | Err(_) => None,
        Ok(port) => Some(port),
    }
}

/// Source of the currently open local ports.
#[async_trait::async_trait]
pub trait PortLister: Send + Sync {
    async fn open_ports(&self) -> AppResult<BTreeSet<u16>>;
}

/// Reads the socket table with the platform's own tools.
#[derive(Debug, Default)]
pub struct SystemPortLister;

impl SystemPortLister {
    async fn run(program: &str, args: &[&str]) -> AppResult<String> {
        let output = Command::new(program)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| AppError::Other(format!("Failed to run {}: {}", program, e)))?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait::async_trait]
impl PortLister for SystemPortLister {
    async fn open_ports(&self) -> AppResult<BTreeSet<u16>> {
        let format = SocketTableFormat::current();
        let table = match format {
            SocketTableFormat::Ss => Self::run("ss", &["-tunlp"]).await?,
            SocketTableFormat::BsdNetstat => {
                let (tcp, udp) = tokio::join!(
                    Self::run("netstat", &["-anv", "-p", "tcp"]),
                    Self::run("netstat", &["-anv", "-p", "udp"])
                );
                format!("{}\n{}", tcp?, udp?)
            }
            SocketTableFormat::WindowsNetstat => Self::run("netstat", &["-ano"]).await?,
        };
        Ok(parse_socket_table(&table, format))
    }
}

/// Exponential delay between polls, with up to 10% jitter added.
#[derive(Debug, Clone)]
pub struct Backoff {
    floor: Duration,
    cap: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(floor: Duration, cap: Duration) -> Self {
        Self {
            floor,
            cap: cap.max(floor),
            current: floor,
        }
    }

    /// Delay before the next poll; doubles the base for the one after.
    pub fn next_delay(&mut self) -> Duration {
        let base = self.current;
        self.current = (self.current * 2).min(self.cap);

        let span = base.as_millis() as u64 / 10;
        let jitter = if span == 0 {
            0
        } else {
            rand::random::<u64>() % (span + 1)
        };
        base + Duration::from_millis(jitter)
    }

    pub fn reset(&mut self) {
        self.current = self.floor;
    }
}

#[derive(Default)]
struct DetectorState {
    ref_count: usize,
    poller: Option<JoinHandle<()>>,
}

struct Inner {
    lister: Arc<dyn PortLister>,
    floor: Duration,
    cap: Duration,
    state: Mutex<DetectorState>,
    on_port_opened: Emitter<u16>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, DetectorState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[derive(Clone)]
pub struct PortDetector {
    inner: Arc<Inner>,
}

impl PortDetector {
    pub fn new() -> Self {
        Self::with_lister(Arc::new(SystemPortLister), POLL_FLOOR, POLL_CAP)
    }

    pub fn with_lister(lister: Arc<dyn PortLister>, floor: Duration, cap: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                lister,
                floor,
                cap,
                state: Mutex::new(DetectorState::default()),
                on_port_opened: Emitter::new(),
            }),
        }
    }

    pub fn on_port_opened<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&u16) + Send + Sync + 'static,
    {
        self.inner.on_port_opened.subscribe(listener)
    }

    pub fn is_polling(&self) -> bool {
        self.inner.lock().poller.is_some()
    }

    /// Add a user; the first one starts polling. Must be called inside a
    /// tokio runtime.
    pub fn start(&self) {
        let mut state = self.inner.lock();
        state.ref_count += 1;
        if state.ref_count > 1 {
            return;
        }

        tracing::debug!("Port detection started");
        let weak = Arc::downgrade(&self.inner);
        state.poller = Some(tokio::spawn(async move {
            let Some(inner) = weak.upgrade() else { return };
            let lister = inner.lister.clone();
            let mut backoff = Backoff::new(inner.floor, inner.cap);
            drop(inner);

            // Ports already open before the first terminal are not news.
            let mut known = lister.open_ports().await.unwrap_or_default();

            loop {
                tokio::time::sleep(backoff.next_delay()).await;

                let ports = match lister.open_ports().await {
                    Ok(ports) => ports,
                    Err(e) => {
                        tracing::debug!("Port poll failed: {}", e);
                        continue;
                    }
                };
                let opened: Vec<u16> = ports.difference(&known).copied().collect();
                known = ports;

                if opened.is_empty() {
                    continue;
                }
                backoff.reset();

                let Some(inner) = weak.upgrade() else { return };
                for port in opened {
                    tracing::info!("Detected open port {}", port);
                    inner.on_port_opened.fire(&port);
                }
            }
        }));
    }

    /// Release a user; the last one stops polling.
    pub fn stop(&self) {
        let poller = {
            let mut state = self.inner.lock();
            state.ref_count = state.ref_count.saturating_sub(1);
            if state.ref_count > 0 {
                return;
            }
            state.poller.take()
        };
        if let Some(poller) = poller {
            tracing::debug!("Port detection stopped");
            poller.abort();
        }
    }

    pub fn dispose(&self) {
        let poller = {
            let mut state = self.inner.lock();
            state.ref_count = 0;
            state.poller.take()
        };
        if let Some(poller) = poller {
            poller.abort();
        }
        self.inner.on_port_opened.dispose();
    }
}

impl Default for PortDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PortDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortDetector")
            .field("ref_count", &self.inner.lock().ref_count)
            .finish()
    }
}
