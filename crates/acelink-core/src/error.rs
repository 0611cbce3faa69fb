//! Error handling for acelink
//!
//! Provides error types for every layer of the device engine:
//! - Frame errors (wire format, checksum, payload decoding)
//! - Connection errors (serial transport)
//! - Request errors (queueing, correlation, device replies)
//! - Operation errors (parking, tool change, infinity spool)
//!
//! All error types use `thiserror` for ergonomic error handling.

use thiserror::Error;

/// Frame error type
///
/// Raised while extracting or decoding a single wire frame. Every variant is
/// non-fatal: the offending frame is dropped and the stream continues.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Candidate frame shorter than the minimum frame size
    #[error("Frame too short: {len} bytes")]
    TooShort {
        /// Number of bytes in the candidate.
        len: usize,
    },

    /// Candidate frame does not start with the frame header
    #[error("Malformed frame header: {found:02X?}")]
    MalformedHeader {
        /// The first two bytes that were found instead of the header.
        found: [u8; 2],
    },

    /// Terminator found before the declared end of the frame
    #[error("Incomplete frame: expected {expected} bytes, got {actual}")]
    Incomplete {
        /// Frame size implied by the length field.
        expected: usize,
        /// Bytes actually present before the terminator.
        actual: usize,
    },

    /// Checksum carried by the frame does not match the payload
    #[error("Checksum mismatch: frame carries {received:#06x}, payload computes {computed:#06x}")]
    ChecksumMismatch {
        /// Checksum read from the frame.
        received: u16,
        /// Checksum computed over the payload.
        computed: u16,
    },

    /// Payload is not valid structured data
    #[error("Payload decode error: {reason}")]
    PayloadDecode {
        /// Parser error message.
        reason: String,
    },

    /// Payload does not fit the 16-bit length field
    #[error("Payload too large: {len} bytes")]
    PayloadTooLarge {
        /// Payload size in bytes.
        len: usize,
    },
}

/// Connection error type
///
/// Represents transport-level failures on the serial link. These trigger
/// teardown and reconnection but are never fatal to the engine.
#[derive(Error, Debug, Clone)]
pub enum ConnectionError {
    /// No link is currently open
    #[error("Device not connected")]
    NotConnected,

    /// Failed to open port
    #[error("Failed to open port {port}: {reason}")]
    FailedToOpen {
        /// The name of the port that failed to open.
        port: String,
        /// The reason the port failed to open.
        reason: String,
    },

    /// Write to the link failed
    #[error("Write failed: {reason}")]
    WriteFailed {
        /// The reason the write failed.
        reason: String,
    },

    /// Read from the link failed
    #[error("Read failed: {reason}")]
    ReadFailed {
        /// The reason the read failed.
        reason: String,
    },

    /// Framing degraded badly enough to force a reconnect
    #[error("Connection reset after {count} incomplete messages")]
    TooManyIncomplete {
        /// Consecutive incomplete messages observed.
        count: u32,
    },

    /// Every connection attempt in a burst failed
    #[error("Giving up after {attempts} connection attempts")]
    AttemptsExhausted {
        /// Number of attempts made.
        attempts: u32,
    },
}

/// Request error type
///
/// Delivered through a request's one-shot completion or returned to the
/// caller of a device operation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RequestError {
    /// The outbound queue was shed while this request was waiting
    #[error("Queue overflow")]
    QueueOverflow,

    /// No reply arrived within the response timeout
    #[error("No response to request {id} after {timeout_ms}ms")]
    ResponseTimeout {
        /// Request id.
        id: u32,
        /// The timeout duration in milliseconds.
        timeout_ms: u64,
    },

    /// The request could not be serialized
    #[error("Failed to encode request: {reason}")]
    Encode {
        /// Serializer error message.
        reason: String,
    },

    /// The device answered with a non-zero code
    #[error("Device error {code}: {message}")]
    Device {
        /// Response code.
        code: i64,
        /// Message reported by the device.
        message: String,
    },

    /// The completion was dropped before a reply could be delivered
    #[error("Request cancelled")]
    Cancelled,
}

/// Operation error type
///
/// Surfaced synchronously to the caller of a parking, tool-change or
/// infinity-spool operation. Operations abort without rollback.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OperationError {
    /// A parking session is already active
    #[error("Already parking slot {slot}")]
    Busy {
        /// Slot of the active session.
        slot: u8,
    },

    /// A tool change or infinity-spool sequence owns the device
    #[error("A tool change sequence is running")]
    SequenceRunning,

    /// The requested slot is not ready
    #[error("Slot {slot} is not ready (status: {status})")]
    SlotNotReady {
        /// Slot index.
        slot: u8,
        /// Last known slot status.
        status: String,
    },

    /// A wait exceeded its budget
    #[error("Timeout after {waited_ms}ms waiting for {stage}")]
    Timeout {
        /// What was being waited for.
        stage: String,
        /// Time waited in milliseconds.
        waited_ms: u64,
    },

    /// Parking did not confirm feed progress
    #[error("Parking failed for slot {slot}")]
    ParkingFailed {
        /// Slot index.
        slot: u8,
    },

    /// No ready slot left in the infinity-spool order
    #[error("No more ready slots available in order")]
    OrderExhausted,

    /// Infinity spool was used before an order was set
    #[error("Infinity spool order not set")]
    OrderNotSet,

    /// Infinity spool order failed validation
    #[error("Invalid infinity spool order: {reason}")]
    InvalidOrder {
        /// Validation failure.
        reason: String,
    },

    /// Infinity spool mode is switched off in configuration
    #[error("Infinity spool disabled")]
    InfinitySpoolDisabled,

    /// No tool is currently loaded
    #[error("Tool is not set")]
    NoCurrentTool,

    /// Slot index outside the device's range
    #[error("Invalid slot index {index}")]
    InvalidSlot {
        /// Offending index.
        index: i64,
    },

    /// An argument is outside its allowed range
    #[error("Invalid parameter '{param}': {reason}")]
    InvalidParameter {
        /// Parameter name.
        param: String,
        /// The reason the value is invalid.
        reason: String,
    },

    /// An external hook failed
    #[error("Hook {hook} failed: {reason}")]
    Hook {
        /// Hook name.
        hook: String,
        /// Error reported by the hook.
        reason: String,
    },
}

/// Main error type for acelink
///
/// A unified error type that can represent any error from all layers.
/// This is the primary error type used in public APIs.
#[derive(Error, Debug)]
pub enum Error {
    /// Frame error
    #[error(transparent)]
    Frame(#[from] FrameError),

    /// Connection error
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// Request error
    #[error(transparent)]
    Request(#[from] RequestError),

    /// Operation error
    #[error(transparent)]
    Operation(#[from] OperationError),

    /// Standard I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an error from a string message
    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }

    /// Check if this is a timeout error
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Error::Operation(OperationError::Timeout { .. })
                | Error::Request(RequestError::ResponseTimeout { .. })
        )
    }

    /// Check if this is a connection error
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Error::Connection(_))
    }

    /// Check if the device rejected the request
    pub fn is_device_error(&self) -> bool {
        matches!(self, Error::Request(RequestError::Device { .. }))
    }
}

/// Result type using Error
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_error_display() {
        let err = FrameError::ChecksumMismatch {
            received: 0x1234,
            computed: 0xffff,
        };
        assert_eq!(
            err.to_string(),
            "Checksum mismatch: frame carries 0x1234, payload computes 0xffff"
        );
    }

    #[test]
    fn test_error_conversion() {
        let err: Error = OperationError::OrderExhausted.into();
        assert!(matches!(err, Error::Operation(_)));

        let err: Error = RequestError::ResponseTimeout {
            id: 7,
            timeout_ms: 2000,
        }
        .into();
        assert!(err.is_timeout());

        let err: Error = ConnectionError::NotConnected.into();
        assert!(err.is_connection_error());
    }

    #[test]
    fn test_device_error_classification() {
        let err: Error = RequestError::Device {
            code: 1,
            message: "busy".to_string(),
        }
        .into();
        assert!(err.is_device_error());
        assert!(!err.is_timeout());
    }
}
