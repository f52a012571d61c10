//! Scripted in-memory serial ports.
//!
//! A [`MockPort`] plays the device side of the line: it can start with
//! buffered output (boot chatter, the readiness marker) and answer each write
//! with the next queued reply. A [`MockHandle`] keeps access to the shared
//! line after the port has been moved into a session, so tests can check
//! exactly which bytes went out.
//!
//! ```rust
//! use ipmc::port::{MockPort, MockSerial};
//!
//! let device = MockPort::new("/dev/ttyMOCK1")
//!     .with_startup(b"IPMC_READY\n".to_vec())
//!     .reply_to_all(vec![0x01]);
//! let wire = device.handle();
//! let backend = MockSerial::new()
//!     .with_unavailable("/dev/ttyMOCK0")
//!     .with_port(device);
//! # let _ = (wire, backend);
//! ```

use {
    crate::{
        error::{Error, Result},
        port::{Port, PortEnumerator, PortInfo, PortOpener, SerialConfig},
    },
    std::{
        collections::{HashSet, VecDeque},
        io::{ErrorKind, Read, Write},
        sync::{Arc, Mutex, MutexGuard, PoisonError},
        thread,
        time::Duration,
    },
};

/// Longest a read on an empty mock line sleeps before timing out.
const EMPTY_READ_NAP: Duration = Duration::from_millis(1);

#[derive(Debug, Default)]
struct Line {
    rx: VecDeque<u8>,
    written: Vec<u8>,
    replies: VecDeque<Vec<u8>>,
    default_reply: Option<Vec<u8>>,
    fail_writes: bool,
    closed: bool,
}

#[derive(Debug, Default)]
struct Registry {
    open: HashSet<String>,
    max_open: usize,
    attempts: Vec<String>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// In-memory serial port with a scripted device on the other end.
#[derive(Debug)]
pub struct MockPort {
    name: String,
    line: Arc<Mutex<Line>>,
    registry: Option<Arc<Mutex<Registry>>>,
    timeout: Duration,
    open: bool,
}

impl MockPort {
    /// A silent, open port.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            line: Arc::new(Mutex::new(Line::default())),
            registry: None,
            timeout: crate::port::DEFAULT_TIMEOUT,
            open: true,
        }
    }

    /// Bytes the device has already sent when the port is opened.
    #[must_use]
    pub fn with_startup(self, bytes: Vec<u8>) -> Self {
        lock(&self.line).rx.extend(bytes);
        self
    }

    /// Queue a reply for the next write that has no earlier reply queued.
    #[must_use]
    pub fn reply(self, bytes: Vec<u8>) -> Self {
        lock(&self.line).replies.push_back(bytes);
        self
    }

    /// Reply used once the queue is empty.
    #[must_use]
    pub fn reply_to_all(self, bytes: Vec<u8>) -> Self {
        lock(&self.line).default_reply = Some(bytes);
        self
    }

    /// Make every write fail as if the cable was pulled.
    #[must_use]
    pub fn failing_writes(self) -> Self {
        lock(&self.line).fail_writes = true;
        self
    }

    /// Inspection handle sharing this port's line.
    pub fn handle(&self) -> MockHandle {
        MockHandle {
            line: Arc::clone(&self.line),
        }
    }

    fn ensure_open(&self) -> std::io::Result<()> {
        if self.open {
            Ok(())
        } else {
            Err(std::io::Error::new(ErrorKind::NotConnected, "port closed"))
        }
    }
}

impl Port for MockPort {
    fn name(&self) -> &str {
        &self.name
    }

    fn baud_rate(&self) -> u32 {
        crate::port::BAUD_RATE
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.timeout = timeout;
        Ok(())
    }

    fn bytes_available(&mut self) -> Result<usize> {
        self.ensure_open()?;
        Ok(lock(&self.line).rx.len())
    }

    fn clear_input(&mut self) -> Result<()> {
        self.ensure_open()?;
        lock(&self.line).rx.clear();
        Ok(())
    }

    fn close(&mut self) {
        if !self.open {
            return;
        }
        self.open = false;
        lock(&self.line).closed = true;
        if let Some(registry) = &self.registry {
            lock(registry).open.remove(&self.name);
        }
    }
}

impl Drop for MockPort {
    fn drop(&mut self) {
        if self.registry.is_some() {
            self.close();
        }
    }
}

impl Read for MockPort {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.ensure_open()?;
        {
            let mut line = lock(&self.line);
            if !line.rx.is_empty() {
                let n = buf.len().min(line.rx.len());
                for (slot, byte) in buf.iter_mut().zip(line.rx.drain(..n)) {
                    *slot = byte;
                }
                return Ok(n);
            }
        }
        thread::sleep(self.timeout.min(EMPTY_READ_NAP));
        Err(std::io::Error::new(ErrorKind::TimedOut, "no data"))
    }
}

impl Write for MockPort {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.ensure_open()?;
        let mut line = lock(&self.line);
        if line.fail_writes {
            return Err(std::io::Error::new(ErrorKind::BrokenPipe, "device unplugged"));
        }
        line.written.extend_from_slice(buf);
        let reply = line.replies.pop_front().or_else(|| line.default_reply.clone());
        if let Some(reply) = reply {
            line.rx.extend(reply);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.ensure_open()
    }
}

/// Shared view of a [`MockPort`] line.
#[derive(Debug, Clone)]
pub struct MockHandle {
    line: Arc<Mutex<Line>>,
}

impl MockHandle {
    /// Everything written by the host so far.
    pub fn written(&self) -> Vec<u8> {
        lock(&self.line).written.clone()
    }

    /// Take and reset the written log.
    pub fn take_written(&self) -> Vec<u8> {
        std::mem::take(&mut lock(&self.line).written)
    }

    /// Make bytes readable by the host, as if the device sent them.
    pub fn push_rx(&self, bytes: &[u8]) {
        lock(&self.line).rx.extend(bytes.iter().copied());
    }

    /// Queue a reply for an upcoming write.
    pub fn queue_reply(&self, bytes: Vec<u8>) {
        lock(&self.line).replies.push_back(bytes);
    }

    /// Toggle write failures.
    pub fn set_fail_writes(&self, fail: bool) {
        lock(&self.line).fail_writes = fail;
    }

    /// Whether the host closed the port.
    pub fn is_closed(&self) -> bool {
        lock(&self.line).closed
    }
}

/// Scripted host: a fixed list of ports, some of which refuse to open.
#[derive(Debug, Default)]
pub struct MockSerial {
    entries: Vec<(PortInfo, Option<MockPort>)>,
    registry: Arc<Mutex<Registry>>,
}

impl MockSerial {
    /// A host with no ports at all.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an openable port.
    #[must_use]
    pub fn with_port(mut self, port: MockPort) -> Self {
        self.entries.push((PortInfo::named(port.name.clone()), Some(port)));
        self
    }

    /// Append a port that is listed but cannot be opened.
    #[must_use]
    pub fn with_unavailable(mut self, name: impl Into<String>) -> Self {
        self.entries.push((PortInfo::named(name), None));
        self
    }

    /// Port names in the order open was attempted.
    pub fn open_attempts(&self) -> Vec<String> {
        lock(&self.registry).attempts.clone()
    }

    /// Highest number of ports held open at the same time.
    pub fn max_open(&self) -> usize {
        lock(&self.registry).max_open
    }

    /// Number of ports currently open.
    pub fn open_now(&self) -> usize {
        lock(&self.registry).open.len()
    }
}

impl PortEnumerator for MockSerial {
    fn list_ports(&self) -> Result<Vec<PortInfo>> {
        Ok(self.entries.iter().map(|(info, _)| info.clone()).collect())
    }
}

impl PortOpener for MockSerial {
    type Port = MockPort;

    fn open(&self, config: &SerialConfig) -> Result<MockPort> {
        let name = config.port_name.clone();
        let mut registry = lock(&self.registry);
        registry.attempts.push(name.clone());

        let unavailable = |reason: &str| Error::PortUnavailable {
            port: name.clone(),
            reason: reason.to_string(),
        };

        let template = match self.entries.iter().find(|(info, _)| info.name == name) {
            Some((_, Some(port))) => port,
            Some((_, None)) => return Err(unavailable("Permission denied")),
            None => return Err(unavailable("No such device")),
        };
        if registry.open.contains(&name) {
            return Err(unavailable("Device or resource busy"));
        }

        registry.open.insert(name.clone());
        registry.max_open = registry.max_open.max(registry.open.len());
        lock(&template.line).closed = false;

        Ok(MockPort {
            name,
            line: Arc::clone(&template.line),
            registry: Some(Arc::clone(&self.registry)),
            timeout: config.timeout,
            open: true,
        })
    }
}
