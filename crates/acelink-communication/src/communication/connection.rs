//! Link state and connection timing
//!
//! [`Link`] owns the open port. The supervision policy built on it (startup
//! burst, background retry, reconnect after failure) lives with the
//! controller, which owns the timers.

use super::serial::{PortConnector, SerialPort};
use acelink_core::ConnectionError;
use serde::{Deserialize, Serialize};
use std::io;
use std::time::Duration;

/// Attempts made by the startup connection burst
pub const STARTUP_ATTEMPTS: u32 = 5;

/// Pause between failed startup attempts
pub const RETRY_PAUSE: Duration = Duration::from_secs(1);

/// Interval of the background connection check
pub const BACKGROUND_RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// Delay before reconnecting after a link failure
pub const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Read tick interval
pub const READ_INTERVAL: Duration = Duration::from_millis(10);

/// Write tick interval
pub const WRITE_INTERVAL: Duration = Duration::from_millis(50);

/// Bytes requested per read tick
pub const READ_CHUNK: usize = 16;

/// Connection state of the link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkState {
    /// No port open
    #[default]
    Disconnected,
    /// Opening the port
    Connecting,
    /// Port open
    Connected,
}

impl std::fmt::Display for LinkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
        }
    }
}

/// The serial link
#[derive(Default)]
pub struct Link {
    state: LinkState,
    port: Option<Box<dyn SerialPort>>,
}

impl Link {
    /// Create a closed link
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state
    pub fn state(&self) -> LinkState {
        self.state
    }

    /// True while a port is open
    pub fn is_connected(&self) -> bool {
        self.state == LinkState::Connected
    }

    /// Name of the open port
    pub fn port_name(&self) -> Option<String> {
        self.port.as_ref().map(|p| p.name())
    }

    /// Open a port; a no-op when already connected
    pub fn open(&mut self, connector: &dyn PortConnector) -> Result<(), ConnectionError> {
        if self.is_connected() {
            return Ok(());
        }

        self.state = LinkState::Connecting;
        match connector.open() {
            Ok(port) => {
                tracing::info!("Connected to {}", port.name());
                self.port = Some(port);
                self.state = LinkState::Connected;
                Ok(())
            }
            Err(e) => {
                self.state = LinkState::Disconnected;
                Err(e)
            }
        }
    }

    /// Close the port
    pub fn close(&mut self) {
        if let Some(mut port) = self.port.take() {
            if let Err(e) = port.close() {
                tracing::info!("Error closing {}: {}", port.name(), e);
            }
        }
        self.state = LinkState::Disconnected;
    }

    /// Read one chunk of at most [`READ_CHUNK`] bytes
    pub fn read_chunk(&mut self) -> Result<Vec<u8>, ConnectionError> {
        let port = self.port.as_mut().ok_or(ConnectionError::NotConnected)?;
        let mut buf = [0u8; READ_CHUNK];
        let n = port.read(&mut buf).map_err(|e| ConnectionError::ReadFailed {
            reason: e.to_string(),
        })?;
        Ok(buf[..n].to_vec())
    }

    /// Write a whole frame
    pub fn write_frame(&mut self, frame: &[u8]) -> Result<(), ConnectionError> {
        let port = self.port.as_mut().ok_or(ConnectionError::NotConnected)?;
        let mut remaining = frame;
        while !remaining.is_empty() {
            match port.write(remaining) {
                Ok(0) => {
                    return Err(ConnectionError::WriteFailed {
                        reason: io::Error::from(io::ErrorKind::WriteZero).to_string(),
                    })
                }
                Ok(n) => remaining = &remaining[n..],
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    return Err(ConnectionError::WriteFailed {
                        reason: e.to_string(),
                    })
                }
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Link")
            .field("state", &self.state)
            .field("port", &self.port_name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[derive(Default)]
    struct ChunkPort {
        written: Arc<Mutex<Vec<u8>>>,
        max_write: usize,
        fail_reads: bool,
    }

    impl SerialPort for ChunkPort {
        fn write(&mut self, data: &[u8]) -> io::Result<usize> {
            let n = data.len().min(self.max_write);
            self.written.lock().extend_from_slice(&data[..n]);
            Ok(n)
        }

        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            if self.fail_reads {
                Err(io::Error::new(io::ErrorKind::BrokenPipe, "unplugged"))
            } else {
                Ok(0)
            }
        }

        fn name(&self) -> String {
            "mock".to_string()
        }

        fn close(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    struct MockConnector {
        written: Arc<Mutex<Vec<u8>>>,
        fail: bool,
    }

    impl PortConnector for MockConnector {
        fn open(&self) -> Result<Box<dyn SerialPort>, ConnectionError> {
            if self.fail {
                return Err(ConnectionError::FailedToOpen {
                    port: "mock".to_string(),
                    reason: "busy".to_string(),
                });
            }
            Ok(Box::new(ChunkPort {
                written: self.written.clone(),
                max_write: 3,
                fail_reads: false,
            }))
        }

        fn port_name(&self) -> String {
            "mock".to_string()
        }
    }

    #[test]
    fn test_open_and_close() {
        let connector = MockConnector {
            written: Arc::default(),
            fail: false,
        };
        let mut link = Link::new();
        link.open(&connector).unwrap();
        assert_eq!(link.state(), LinkState::Connected);
        assert_eq!(link.port_name().as_deref(), Some("mock"));

        link.close();
        assert_eq!(link.state(), LinkState::Disconnected);
        assert!(matches!(
            link.read_chunk(),
            Err(ConnectionError::NotConnected)
        ));
    }

    #[test]
    fn test_failed_open_leaves_link_disconnected() {
        let connector = MockConnector {
            written: Arc::default(),
            fail: true,
        };
        let mut link = Link::new();
        assert!(link.open(&connector).is_err());
        assert_eq!(link.state(), LinkState::Disconnected);
    }

    #[test]
    fn test_write_frame_handles_short_writes() {
        let written = Arc::new(Mutex::new(Vec::new()));
        let connector = MockConnector {
            written: written.clone(),
            fail: false,
        };
        let mut link = Link::new();
        link.open(&connector).unwrap();
        link.write_frame(&[1, 2, 3, 4, 5, 6, 7]).unwrap();
        assert_eq!(*written.lock(), vec![1, 2, 3, 4, 5, 6, 7]);
    }

    #[test]
    fn test_read_error_is_reported() {
        let mut link = Link::new();
        link.port = Some(Box::new(ChunkPort {
            fail_reads: true,
            ..Default::default()
        }));
        link.state = LinkState::Connected;
        assert!(matches!(
            link.read_chunk(),
            Err(ConnectionError::ReadFailed { .. })
        ));
    }
}
