//! Live serial-line source.
//!
//! The source is polled by the scheduler on a short period. Each poll reads
//! whatever bytes the port has buffered, keeps partial lines for the next poll
//! and hands at most one complete line to the parser.

use crate::source::error::{SourceError, SourceResult};
use crate::source::parser::parse_line;
use crate::source::types::{ConnectionStatus, Reading};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::io;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio_serial::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use tracing::{debug, info, warn};

/// Read timeout applied to the serial port.
pub const READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Largest partial line kept between polls before it is discarded as garbage.
pub const MAX_LINE_BYTES: usize = 4096;

const READ_CHUNK: usize = 512;

/// Supported baud rates. The link is always 8-N-1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum BaudRate {
    B9600,
    B19200,
    B38400,
    B57600,
    #[default]
    B115200,
}

impl BaudRate {
    pub const ALL: [BaudRate; 5] = [
        BaudRate::B9600,
        BaudRate::B19200,
        BaudRate::B38400,
        BaudRate::B57600,
        BaudRate::B115200,
    ];

    pub fn as_u32(self) -> u32 {
        match self {
            BaudRate::B9600 => 9600,
            BaudRate::B19200 => 19200,
            BaudRate::B38400 => 38400,
            BaudRate::B57600 => 57600,
            BaudRate::B115200 => 115200,
        }
    }
}

impl TryFrom<u32> for BaudRate {
    type Error = SourceError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        BaudRate::ALL
            .into_iter()
            .find(|rate| rate.as_u32() == value)
            .ok_or_else(|| SourceError::UnsupportedBaud(value.to_string()))
    }
}

impl From<BaudRate> for u32 {
    fn from(rate: BaudRate) -> Self {
        rate.as_u32()
    }
}

impl FromStr for BaudRate {
    type Err = SourceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let value = s
            .parse::<u32>()
            .map_err(|_| SourceError::UnsupportedBaud(s.to_string()))?;
        BaudRate::try_from(value)
    }
}

impl fmt::Display for BaudRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u32())
    }
}

/// Byte transport underneath the live source.
///
/// Implemented for serial ports and for [`MemoryTransport`].
pub trait Transport: Send {
    /// Number of bytes that can be read without waiting.
    fn bytes_available(&mut self) -> io::Result<usize>;

    /// Read into `buf`, returning the number of bytes read.
    fn read_bytes(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

impl Transport for Box<dyn SerialPort> {
    fn bytes_available(&mut self) -> io::Result<usize> {
        self.bytes_to_read()
            .map(|n| n as usize)
            .map_err(io::Error::from)
    }

    fn read_bytes(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        io::Read::read(&mut **self, buf)
    }
}

/// List the serial ports visible to the operating system.
pub fn available_ports() -> SourceResult<Vec<String>> {
    let ports = tokio_serial::available_ports()
        .map_err(|e| SourceError::PortEnumeration(e.to_string()))?;
    Ok(ports.into_iter().map(|p| p.port_name).collect())
}

/// Result of a single poll of the live source.
#[derive(Debug)]
pub enum PollOutcome {
    /// Nothing to report this tick.
    Idle,
    /// A complete, well-formed line arrived.
    Reading(Reading),
    /// A complete line arrived but was dropped.
    Malformed(SourceError),
    /// The transport failed and the source is now disconnected.
    Disconnected(SourceError),
}

/// The live source, connected to at most one transport at a time.
pub struct LiveSource {
    transport: Option<Box<dyn Transport>>,
    port_name: Option<String>,
    baud_rate: BaudRate,
    line_buffer: Vec<u8>,
    status_changes: Vec<ConnectionStatus>,
}

impl LiveSource {
    /// Create a disconnected live source.
    pub fn new() -> Self {
        Self {
            transport: None,
            port_name: None,
            baud_rate: BaudRate::default(),
            line_buffer: Vec::new(),
            status_changes: Vec::new(),
        }
    }

    /// Open `port` at `baud` with 8-N-1 framing and a short read timeout.
    ///
    /// An existing connection is closed first. On failure the source stays
    /// disconnected and a status change is queued.
    pub fn connect(&mut self, port: &str, baud: BaudRate) -> SourceResult<()> {
        if self.is_connected() {
            self.disconnect();
        }

        info!(port, baud = baud.as_u32(), "opening serial port");

        let opened = tokio_serial::new(port, baud.as_u32())
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(READ_TIMEOUT)
            .open();

        match opened {
            Ok(serial) => {
                self.baud_rate = baud;
                self.attach(port, Box::new(serial));
                Ok(())
            }
            Err(e) => {
                warn!(port, error = %e, "serial connect failed");
                self.status_changes
                    .push(ConnectionStatus::disconnected(format!("connect failed: {e}")));
                Err(SourceError::ConnectFailure {
                    port: port.to_string(),
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Use an already-open transport as the live link.
    pub fn attach(&mut self, label: &str, transport: Box<dyn Transport>) {
        if self.is_connected() {
            self.disconnect();
        }

        self.transport = Some(transport);
        self.port_name = Some(label.to_string());
        self.line_buffer.clear();
        self.status_changes
            .push(ConnectionStatus::connected(format!("connected to {label}")));
        info!(port = label, "live source connected");
    }

    /// Release the transport. Safe to call when already disconnected.
    ///
    /// Returns `true` if a connection was actually closed.
    pub fn disconnect(&mut self) -> bool {
        self.drop_link("disconnected")
    }

    /// Check for a complete line on the transport.
    ///
    /// Never returns an error: transport failures disconnect the source and are
    /// reported through the outcome and the status queue.
    pub fn poll(&mut self) -> PollOutcome {
        let has_line = self.line_buffer.contains(&b'\n');
        let Some(transport) = self.transport.as_mut() else {
            return PollOutcome::Idle;
        };

        if !has_line {
            if let Err(e) = read_available(transport.as_mut(), &mut self.line_buffer) {
                let err = SourceError::ReadFailure(e);
                warn!(error = %err, "live source read failed, disconnecting");
                self.drop_link(&format!("connection lost: {err}"));
                return PollOutcome::Disconnected(err);
            }
        }

        let Some(line) = self.next_line() else {
            return PollOutcome::Idle;
        };

        match parse_line(&line) {
            Ok(reading) => {
                debug!(thermal = reading.thermal, light = reading.light, "reading received");
                PollOutcome::Reading(reading)
            }
            Err(e) => {
                warn!(error = %e, "dropping malformed line");
                PollOutcome::Malformed(e)
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_some()
    }

    /// Name of the connected port, if any.
    pub fn port_name(&self) -> Option<&str> {
        self.port_name.as_deref()
    }

    pub fn baud_rate(&self) -> BaudRate {
        self.baud_rate
    }

    /// Take the connection status changes queued since the last call.
    pub fn take_status_changes(&mut self) -> Vec<ConnectionStatus> {
        std::mem::take(&mut self.status_changes)
    }

    fn drop_link(&mut self, message: &str) -> bool {
        if self.transport.take().is_none() {
            return false;
        }

        let port = self.port_name.take().unwrap_or_default();
        self.line_buffer.clear();
        self.status_changes
            .push(ConnectionStatus::disconnected(message.to_string()));
        info!(port = %port, message, "live source disconnected");
        true
    }

    /// Pop the next complete, non-empty line from the buffer.
    fn next_line(&mut self) -> Option<String> {
        loop {
            let Some(end) = self.line_buffer.iter().position(|b| *b == b'\n') else {
                if self.line_buffer.len() > MAX_LINE_BYTES {
                    warn!(
                        bytes = self.line_buffer.len(),
                        "discarding oversized partial line"
                    );
                    self.line_buffer.clear();
                }
                return None;
            };

            let raw: Vec<u8> = self.line_buffer.drain(..=end).collect();
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim();
            if !line.is_empty() {
                return Some(line.to_string());
            }
        }
    }
}

impl Default for LiveSource {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for LiveSource {
    fn drop(&mut self) {
        self.disconnect();
    }
}

fn read_available(transport: &mut dyn Transport, buffer: &mut Vec<u8>) -> io::Result<usize> {
    let available = transport.bytes_available()?;
    if available == 0 {
        return Ok(0);
    }

    let mut chunk = [0u8; READ_CHUNK];
    let want = available.min(READ_CHUNK);
    match transport.read_bytes(&mut chunk[..want]) {
        Ok(0) => Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "transport closed",
        )),
        Ok(n) => {
            buffer.extend_from_slice(&chunk[..n]);
            Ok(n)
        }
        Err(e)
            if matches!(
                e.kind(),
                io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
            ) =>
        {
            Ok(0)
        }
        Err(e) => Err(e),
    }
}

#[derive(Debug, Default)]
struct MemoryLink {
    data: VecDeque<u8>,
    failure: Option<io::ErrorKind>,
}

/// In-process transport fed through a [`MemoryTransportHandle`].
///
/// Useful for replaying captured device output and for exercising the live
/// source without hardware.
pub struct MemoryTransport {
    link: Arc<Mutex<MemoryLink>>,
}

/// Writer side of a [`MemoryTransport`].
#[derive(Clone)]
pub struct MemoryTransportHandle {
    link: Arc<Mutex<MemoryLink>>,
}

impl MemoryTransport {
    pub fn pair() -> (Self, MemoryTransportHandle) {
        let link = Arc::new(Mutex::new(MemoryLink::default()));
        (
            Self { link: link.clone() },
            MemoryTransportHandle { link },
        )
    }
}

fn lock_link(link: &Mutex<MemoryLink>) -> MutexGuard<'_, MemoryLink> {
    link.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Transport for MemoryTransport {
    fn bytes_available(&mut self) -> io::Result<usize> {
        let link = lock_link(&self.link);
        match link.failure {
            Some(kind) => Err(io::Error::new(kind, "memory transport failed")),
            None => Ok(link.data.len()),
        }
    }

    fn read_bytes(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut link = lock_link(&self.link);
        if let Some(kind) = link.failure {
            return Err(io::Error::new(kind, "memory transport failed"));
        }
        let n = buf.len().min(link.data.len());
        for (slot, byte) in buf.iter_mut().zip(link.data.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl MemoryTransportHandle {
    /// Queue raw bytes for the reader.
    pub fn feed(&self, bytes: impl AsRef<[u8]>) {
        lock_link(&self.link).data.extend(bytes.as_ref());
    }

    /// Queue one newline-terminated line.
    pub fn feed_line(&self, line: &str) {
        let mut link = lock_link(&self.link);
        link.data.extend(line.as_bytes());
        link.data.push_back(b'\n');
    }

    /// Make every subsequent read fail with `kind`.
    pub fn fail(&self, kind: io::ErrorKind) {
        lock_link(&self.link).failure = Some(kind);
    }
}
