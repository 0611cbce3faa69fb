//! Communication layer
//!
//! Everything between raw serial bytes and correlated request/response
//! pairs: the frame codec, the receive-side assembler, the request
//! dispatcher, the serial port abstraction and the timer scheduler that
//! drives the read and write ticks.

pub mod assembler;
pub mod connection;
pub mod dispatcher;
pub mod frame;
pub mod message;
pub mod scheduler;
pub mod serial;

pub use assembler::{AssemblerOutput, AssemblerStats, FrameAssembler, MAX_INCOMPLETE_MESSAGES};
pub use connection::{
    Link, LinkState, BACKGROUND_RETRY_INTERVAL, READ_CHUNK, READ_INTERVAL, RECONNECT_DELAY,
    RETRY_PAUSE, STARTUP_ATTEMPTS, WRITE_INTERVAL,
};
pub use dispatcher::{
    Completion, DispatcherConfig, RequestDispatcher, ResponseReceiver, ResponseResult,
    REQUEST_ID_WRAP,
};
pub use frame::{checksum, decode_frame, decode_response, encode_frame, encode_request};
pub use message::{Request, Response};
pub use scheduler::{Reschedule, Scheduler, TimerHandle};
pub use serial::{list_ports, PortConnector, RealSerialPort, SerialConnector, SerialPort, SerialPortInfo};
