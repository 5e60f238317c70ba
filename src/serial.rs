//! Serial transport for DATAQ instruments.
//!
//! # Types
//!
//! - [`SerialPortIO`]: trait alias combining AsyncRead + AsyncWrite for serial ports
//! - [`DynSerial`]: type-erased boxed serial port
//! - [`CommandLink`]: text command/response channel that also carries the
//!   binary sample stream once acquisition starts
//!
//! # Utilities
//!
//! - [`discover_ports`]: list USB serial ports with the DATAQ vendor id
//! - [`open_serial_async`]: open a serial port with spawn_blocking
//! - [`drain_serial_buffer`]: drain stale data from a serial port
//!
//! All instruments use CDC mode: 8N1, no flow control. Commands are ASCII
//! terminated by a carriage return. While idle the instrument echoes each
//! command back; while streaming it does not.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace};

use crate::error::TransportError;

/// Trait alias for async serial port I/O.
///
/// Implemented by `tokio_serial::SerialStream`, `tokio::io::DuplexStream` and
/// any mock implementing the async I/O traits.
pub trait SerialPortIO: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> SerialPortIO for T {}

/// Type-erased boxed serial port.
pub type DynSerial = Box<dyn SerialPortIO>;

/// Command terminator expected by the instrument.
pub const COMMAND_TERMINATOR: &str = "\r";

/// A USB serial port that looks like a DATAQ instrument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    /// OS path of the port.
    pub path: String,
    /// USB vendor id.
    pub vendor_id: u16,
    /// USB product id.
    pub product_id: u16,
    /// Product string, if the OS reports one.
    pub product: Option<String>,
    /// Serial number, if the OS reports one.
    pub serial_number: Option<String>,
}

/// List serial ports whose USB vendor id matches `vendor_id`.
#[cfg(feature = "instrument_serial")]
pub fn discover_ports(vendor_id: u16) -> Result<Vec<PortInfo>, TransportError> {
    use serialport::SerialPortType;

    let ports = serialport::available_ports()
        .map_err(|e| TransportError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?;

    let found: Vec<PortInfo> = ports
        .into_iter()
        .filter_map(|port| match port.port_type {
            SerialPortType::UsbPort(info) if info.vid == vendor_id => Some(PortInfo {
                path: port.port_name,
                vendor_id: info.vid,
                product_id: info.pid,
                product: info.product,
                serial_number: info.serial_number,
            }),
            _ => None,
        })
        .collect();

    debug!(vendor_id, count = found.len(), "Port discovery finished");
    Ok(found)
}

/// Stub when serial support is disabled.
#[cfg(not(feature = "instrument_serial"))]
pub fn discover_ports(_vendor_id: u16) -> Result<Vec<PortInfo>, TransportError> {
    Err(TransportError::SerialFeatureDisabled)
}

/// First discovered instrument port.
pub fn find_instrument(vendor_id: u16) -> Result<PortInfo, TransportError> {
    discover_ports(vendor_id)?
        .into_iter()
        .next()
        .ok_or(TransportError::NoDevice { vendor_id })
}

/// Open a serial port asynchronously using spawn_blocking.
///
/// Standard settings are applied: 8N1, no flow control.
#[cfg(feature = "instrument_serial")]
pub async fn open_serial_async(path: &str, baud_rate: u32) -> Result<DynSerial, TransportError> {
    use tokio::task::spawn_blocking;
    use tokio_serial::SerialPortBuilderExt;

    let path_owned = path.to_string();
    let stream = spawn_blocking(move || {
        tokio_serial::new(&path_owned, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
    })
    .await
    .map_err(|e| TransportError::Open {
        path: path.to_string(),
        message: format!("spawn_blocking for serial port opening failed: {e}"),
    })?
    .map_err(|e| TransportError::Open {
        path: path.to_string(),
        message: e.to_string(),
    })?;

    debug!(path, baud_rate, "Serial port opened");
    Ok(Box::new(stream))
}

/// Stub when serial support is disabled.
#[cfg(not(feature = "instrument_serial"))]
pub async fn open_serial_async(_path: &str, _baud_rate: u32) -> Result<DynSerial, TransportError> {
    Err(TransportError::SerialFeatureDisabled)
}

/// Drain stale data from a serial port buffer.
///
/// Reads and discards until nothing arrives for `timeout_ms`, the port
/// reports EOF, or a read fails. Returns the number of bytes discarded.
pub async fn drain_serial_buffer<R: AsyncRead + Unpin + ?Sized>(
    port: &mut R,
    timeout_ms: u64,
) -> usize {
    let mut discard = [0u8; 256];
    let quiet = Duration::from_millis(timeout_ms);
    let mut total_discarded = 0usize;

    loop {
        match tokio::time::timeout(quiet, port.read(&mut discard)).await {
            Ok(Ok(0)) => break,
            Ok(Ok(n)) => total_discarded += n,
            Ok(Err(_)) => break,
            Err(_) => break,
        }
    }

    total_discarded
}

/// Strip the framing the instrument wraps around echoed text.
fn clean_line(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw)
        .trim_matches(|c| c == '\r' || c == '\n' || c == '\0')
        .to_string()
}

/// Text command channel over a serial port.
///
/// The same port later carries binary samples; [`CommandLink::read_chunk`]
/// exposes raw reads for that phase.
#[derive(Debug)]
pub struct CommandLink<P> {
    port: P,
    response_timeout: Duration,
    pending: Vec<u8>,
}

impl<P: AsyncRead + AsyncWrite + Unpin> CommandLink<P> {
    /// Wrap a port.
    pub fn new(port: P, response_timeout: Duration) -> Self {
        Self {
            port,
            response_timeout,
            pending: Vec::with_capacity(64),
        }
    }

    /// Configured response timeout.
    pub fn response_timeout(&self) -> Duration {
        self.response_timeout
    }

    /// Write a command without waiting for a reply.
    pub async fn send_no_reply(&mut self, command: &str) -> Result<(), TransportError> {
        trace!(command, "Sending command");
        self.port
            .write_all(format!("{command}{COMMAND_TERMINATOR}").as_bytes())
            .await?;
        self.port.flush().await?;
        Ok(())
    }

    /// Write a command and collect the echoed response lines.
    ///
    /// Waits until at least one non-empty line has arrived. Further complete
    /// lines already received are returned too.
    pub async fn send_command(&mut self, command: &str) -> Result<Vec<String>, TransportError> {
        self.pending.clear();
        self.send_no_reply(command).await?;

        let timeout_ms = self.response_timeout.as_millis() as u64;
        let lines = tokio::time::timeout(self.response_timeout, self.read_lines())
            .await
            .map_err(|_| TransportError::Timeout {
                command: command.to_string(),
                timeout_ms,
            })??;

        debug!(command, response = ?lines, "Command acknowledged");
        Ok(lines)
    }

    async fn read_lines(&mut self) -> Result<Vec<String>, TransportError> {
        let mut buf = [0u8; 256];
        loop {
            let lines = self.take_complete_lines();
            if !lines.is_empty() {
                return Ok(lines);
            }
            let n = self.port.read(&mut buf).await?;
            if n == 0 {
                return Err(TransportError::Closed);
            }
            self.pending.extend_from_slice(&buf[..n]);
        }
    }

    fn take_complete_lines(&mut self) -> Vec<String> {
        let mut lines = Vec::new();
        while let Some(end) = self.pending.iter().position(|&b| b == b'\r' || b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=end).collect();
            let line = clean_line(&raw);
            if !line.is_empty() {
                lines.push(line);
            }
        }
        lines
    }

    /// Read whatever bytes are available. Returns 0 at end of stream.
    pub async fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        Ok(self.port.read(buf).await?)
    }

    /// Discard stale bytes until the port stays quiet for `quiet_ms`.
    pub async fn drain(&mut self, quiet_ms: u64) -> usize {
        self.pending.clear();
        let discarded = drain_serial_buffer(&mut self.port, quiet_ms).await;
        if discarded > 0 {
            debug!(bytes = discarded, "Drained stale bytes");
        }
        discarded
    }

    /// Give back the port.
    pub fn into_inner(self) -> P {
        self.port
    }
}
