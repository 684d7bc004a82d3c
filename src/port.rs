//! The serial port capability consumed by the loader.
//!
//! The loader drives the port through the [`LoaderPort`] trait so the
//! seven-stage protocol can be exercised against a scripted double in tests.
//! [`SystemPort`] is the production implementation, backed by the
//! [`serialport`] crate.

use std::fmt;
use std::io;
use std::time::Duration;

use log::{debug, info, trace};
use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};

use crate::protocol::Bit3Encoder;
use crate::timing::CANCELLATION_CHECK_INTERVAL;

// =============================================================================
// Public Interface
// =============================================================================

/// The operations the loader needs from a serial device.
///
/// Reads and writes use the port's configured timeout
/// (set via [`set_timeout`](Self::set_timeout)); a timed-out call returns
/// `Ok(0)` rather than an error, so callers can interleave cancellation
/// checks with partial transfers.
pub trait LoaderPort: Send {
    /// Claims exclusive access to the device for the duration of an action.
    fn make_active(&mut self) -> serialport::Result<()>;

    /// Releases the device, closing it if open. Called when the port is
    /// handed over to another controller.
    fn release(&mut self) -> serialport::Result<()>;

    /// Opens the device if it is not already open.
    fn ensure_open(&mut self) -> serialport::Result<()>;

    /// Blocks until buffered output has been transmitted.
    fn flush_output(&mut self) -> serialport::Result<()>;

    /// Discards input received but not yet read.
    fn flush_input(&mut self) -> serialport::Result<()>;

    fn set_baudrate(&mut self, baudrate: u32) -> serialport::Result<()>;
    fn set_timeout(&mut self, timeout: Duration) -> serialport::Result<()>;
    fn set_data_bits(&mut self, data_bits: DataBits) -> serialport::Result<()>;
    fn set_parity(&mut self, parity: Parity) -> serialport::Result<()>;
    fn set_stop_bits(&mut self, stop_bits: StopBits) -> serialport::Result<()>;
    fn set_flow_control(&mut self, flow_control: FlowControl) -> serialport::Result<()>;

    /// Sets the DTR control line. `true` asserts the line (low).
    fn set_dtr(&mut self, level: bool) -> serialport::Result<()>;

    /// Sets the RTS control line. `true` asserts the line (low).
    fn set_rts(&mut self, level: bool) -> serialport::Result<()>;

    /// The number of bytes available to read without blocking.
    fn bytes_to_read(&mut self) -> serialport::Result<u32>;

    /// Reads into `buf`, returning the number of bytes read. `Ok(0)` means
    /// the call timed out with nothing available.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Writes from `buf`, returning the number of bytes buffered for
    /// transmission. `Ok(0)` means the call timed out without accepting any.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;
}

/// A [`LoaderPort`] backed by a system serial device.
///
/// The device is opened lazily, on the first [`ensure_open`] call of an
/// action, and reopened transparently after a [`release`]. Opening is
/// retried for a few seconds since USB serial controllers are often slow to
/// come back after a replug.
///
/// [`ensure_open`]: LoaderPort::ensure_open
/// [`release`]: LoaderPort::release
pub struct SystemPort {
    path: String,
    port: Option<Box<dyn SerialPort>>,
}

impl SystemPort {
    /// Creates a port for the device at `path` (e.g. `/dev/ttyUSB0` or
    /// `COM3`). The device is not touched until an action opens it.
    pub fn new(path: impl Into<String>) -> Self {
        SystemPort {
            path: path.into(),
            port: None,
        }
    }

    /// The device path this port was created with.
    pub fn path(&self) -> &str {
        &self.path
    }

    fn active(&mut self) -> serialport::Result<&mut Box<dyn SerialPort>> {
        self.port.as_mut().ok_or_else(|| {
            serialport::Error::new(serialport::ErrorKind::NoDevice, "the port is not open")
        })
    }
}

impl LoaderPort for SystemPort {
    fn make_active(&mut self) -> serialport::Result<()> {
        // Owning the SystemPort is owning the claim; the OS enforces the
        // rest when the device is opened.
        Ok(())
    }

    fn release(&mut self) -> serialport::Result<()> {
        if self.port.take().is_some() {
            info!("released {}", self.path);
        }
        Ok(())
    }

    fn ensure_open(&mut self) -> serialport::Result<()> {
        use retry::{delay, retry_with_index};

        if self.port.is_some() {
            return Ok(());
        }

        let path = self.path.clone();
        let result = retry_with_index(delay::Fixed::from_millis(1000).take(4), |attempt| {
            debug!("trying to open {} ({})", path, attempt);
            serialport::new(path.as_str(), Bit3Encoder::MAX_BAUDRATE)
                .timeout(CANCELLATION_CHECK_INTERVAL)
                .open()
        });
        match result {
            Ok(port) => {
                info!("connected to {}", self.path);
                self.port = Some(port);
                Ok(())
            }
            Err(err) => {
                info!(
                    "failed to open {} after {:?} and {} tries: {}",
                    self.path, err.total_delay, err.tries, err.error
                );
                Err(err.error)
            }
        }
    }

    fn flush_output(&mut self) -> serialport::Result<()> {
        io::Write::flush(self.active()?).map_err(Into::into)
    }

    fn flush_input(&mut self) -> serialport::Result<()> {
        self.active()?.clear(ClearBuffer::Input)
    }

    fn set_baudrate(&mut self, baudrate: u32) -> serialport::Result<()> {
        self.active()?.set_baud_rate(baudrate)
    }

    fn set_timeout(&mut self, timeout: Duration) -> serialport::Result<()> {
        self.active()?.set_timeout(timeout)
    }

    fn set_data_bits(&mut self, data_bits: DataBits) -> serialport::Result<()> {
        self.active()?.set_data_bits(data_bits)
    }

    fn set_parity(&mut self, parity: Parity) -> serialport::Result<()> {
        self.active()?.set_parity(parity)
    }

    fn set_stop_bits(&mut self, stop_bits: StopBits) -> serialport::Result<()> {
        self.active()?.set_stop_bits(stop_bits)
    }

    fn set_flow_control(&mut self, flow_control: FlowControl) -> serialport::Result<()> {
        self.active()?.set_flow_control(flow_control)
    }

    fn set_dtr(&mut self, level: bool) -> serialport::Result<()> {
        self.active()?.write_data_terminal_ready(level)
    }

    fn set_rts(&mut self, level: bool) -> serialport::Result<()> {
        self.active()?.write_request_to_send(level)
    }

    fn bytes_to_read(&mut self) -> serialport::Result<u32> {
        self.active()?.bytes_to_read()
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let port = self
            .active()
            .map_err(|e| io::Error::new(io::ErrorKind::NotConnected, e))?;
        match io::Read::read(port, buf) {
            Ok(n) => {
                trace!("{} bytes read from {}", n, self.path);
                Ok(n)
            }
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(e),
        }
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let port = self
            .active()
            .map_err(|e| io::Error::new(io::ErrorKind::NotConnected, e))?;
        match io::Write::write(port, buf) {
            Ok(n) => {
                trace!("{} bytes written to {}", n, self.path);
                Ok(n)
            }
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(e),
        }
    }
}

impl fmt::Debug for SystemPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SystemPort")
            .field("path", &self.path)
            .field("open", &self.port.is_some())
            .finish()
    }
}
