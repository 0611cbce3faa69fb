//! Serial port access
//!
//! Provides the byte-level port abstraction the engine reads from and
//! writes to, a real implementation on top of the `serialport` crate, and
//! the connector that opens it.
//!
//! Reads never block: a read with no data waiting returns zero bytes.

use acelink_core::ConnectionError;
use std::io::{self, Read, Write};
use std::time::Duration;

/// Information about an available serial port
#[derive(Debug, Clone)]
pub struct SerialPortInfo {
    /// Port name (e.g., "/dev/ttyACM0", "COM3")
    pub port_name: String,

    /// Port description (e.g., "USB ACE")
    pub description: String,

    /// USB vendor ID if applicable
    pub vid: Option<u16>,

    /// USB product ID if applicable
    pub pid: Option<u16>,
}

/// List serial ports that could host the device
///
/// Only USB CDC/serial adapters are reported:
/// - Windows: COM*
/// - Linux: /dev/ttyUSB*, /dev/ttyACM*
/// - macOS: /dev/cu.usbserial-*, /dev/cu.usbmodem*
pub fn list_ports() -> acelink_core::Result<Vec<SerialPortInfo>> {
    let ports = serialport::available_ports().map_err(|e| {
        tracing::error!("Failed to enumerate serial ports: {}", e);
        acelink_core::Error::other(format!("Failed to enumerate ports: {}", e))
    })?;

    Ok(ports
        .into_iter()
        .filter(|port| is_candidate_port(&port.port_name))
        .map(|port| match port.port_type {
            serialport::SerialPortType::UsbPort(usb) => SerialPortInfo {
                description: format!(
                    "USB {} {}",
                    usb.manufacturer.as_deref().unwrap_or("Device"),
                    usb.product.as_deref().unwrap_or("Serial Port")
                ),
                port_name: port.port_name,
                vid: Some(usb.vid),
                pid: Some(usb.pid),
            },
            _ => SerialPortInfo {
                port_name: port.port_name,
                description: "Serial Port".to_string(),
                vid: None,
                pid: None,
            },
        })
        .collect())
}

fn is_candidate_port(port_name: &str) -> bool {
    if let Some(number) = port_name.strip_prefix("COM") {
        return !number.is_empty() && number.chars().all(|c| c.is_ascii_digit());
    }

    port_name.starts_with("/dev/ttyUSB")
        || port_name.starts_with("/dev/ttyACM")
        || port_name.starts_with("/dev/cu.usbserial-")
        || port_name.starts_with("/dev/cu.usbmodem")
}

/// Low-level serial port interface
pub trait SerialPort: Send {
    /// Write data to the port
    fn write(&mut self, data: &[u8]) -> io::Result<usize>;

    /// Read whatever is waiting; zero bytes when nothing is
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Get the port name
    fn name(&self) -> String;

    /// Close the port
    fn close(&mut self) -> io::Result<()>;
}

/// Real serial port implementation using serialport crate
pub struct RealSerialPort {
    port: Box<dyn serialport::SerialPort>,
    name: String,
    read_timeout: Duration,
    write_timeout: Duration,
}

impl RealSerialPort {
    /// Open a serial port
    pub fn open(
        port: &str,
        baud: u32,
        read_timeout: Duration,
        write_timeout: Duration,
    ) -> Result<Self, ConnectionError> {
        let opened = serialport::new(port, baud)
            .timeout(read_timeout)
            .data_bits(serialport::DataBits::Eight)
            .stop_bits(serialport::StopBits::One)
            .parity(serialport::Parity::None)
            .flow_control(serialport::FlowControl::None)
            .open()
            .map_err(|e| {
                tracing::warn!("Failed to open serial port {}: {}", port, e);
                ConnectionError::FailedToOpen {
                    port: port.to_string(),
                    reason: e.to_string(),
                }
            })?;

        Ok(Self {
            port: opened,
            name: port.to_string(),
            read_timeout,
            write_timeout,
        })
    }
}

impl SerialPort for RealSerialPort {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.port.set_timeout(self.write_timeout)?;
        let written = self.port.write(data);
        self.port.set_timeout(self.read_timeout)?;
        let written = written?;
        self.port.flush()?;
        Ok(written)
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.port.bytes_to_read()? == 0 {
            return Ok(0);
        }
        match self.port.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) => {
                Ok(0)
            }
            Err(e) => Err(e),
        }
    }

    fn name(&self) -> String {
        self.name.clone()
    }

    fn close(&mut self) -> io::Result<()> {
        self.port.flush()
    }
}

/// Opens ports for the connection supervisor
pub trait PortConnector: Send + Sync {
    /// Open a fresh port
    fn open(&self) -> Result<Box<dyn SerialPort>, ConnectionError>;

    /// Name of the port this connector opens
    fn port_name(&self) -> String;
}

/// Connector for a real serial device
#[derive(Debug, Clone)]
pub struct SerialConnector {
    port: String,
    baud: u32,
    read_timeout: Duration,
    write_timeout: Duration,
}

impl SerialConnector {
    /// Create a connector
    pub fn new(port: impl Into<String>, baud: u32) -> Self {
        Self {
            port: port.into(),
            baud,
            read_timeout: Duration::from_millis(100),
            write_timeout: Duration::from_millis(500),
        }
    }

    /// Create a connector from driver configuration
    pub fn from_config(config: &acelink_core::AceConfig) -> Self {
        Self::new(config.serial.clone(), config.baud)
            .with_timeouts(config.read_timeout_duration(), config.write_timeout_duration())
    }

    /// Set read and write timeouts
    pub fn with_timeouts(mut self, read_timeout: Duration, write_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self.write_timeout = write_timeout;
        self
    }
}

impl PortConnector for SerialConnector {
    fn open(&self) -> Result<Box<dyn SerialPort>, ConnectionError> {
        let port = RealSerialPort::open(
            &self.port,
            self.baud,
            self.read_timeout,
            self.write_timeout,
        )?;
        Ok(Box::new(port))
    }

    fn port_name(&self) -> String {
        self.port.clone()
    }
}
