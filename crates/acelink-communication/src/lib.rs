//! # acelink Communication
//!
//! Serial protocol and sequencing engine for ACE filament changers.
//! The `communication` module covers the wire format, frame assembly,
//! request dispatch and the serial link; `firmware` holds the device
//! engine, parking, tool changes and infinity spool.

pub mod communication;
pub mod firmware;

pub use communication::{
    list_ports, FrameAssembler, Link, LinkState, PortConnector, Request, RequestDispatcher,
    Response, Scheduler, SerialConnector, SerialPort, SerialPortInfo,
};

pub use firmware::ace::{
    AceCommand, AceController, AceEngine, AceStatus, ParkingOutcome, ParkingPhase, Selection,
    ToolChangeReport,
};
