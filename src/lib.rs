//! Streams heart rate readings from a BLE Heart Rate Service peripheral.

pub mod address;
pub mod btle;
pub mod config;
pub mod error;
pub mod fake;
pub mod logging;
pub mod measurement;
pub mod report;
pub mod session;
pub mod signal;
pub mod transport;

pub use address::{DeviceAddress, DEFAULT_DEVICE_ADDRESS};
pub use config::SessionConfig;
pub use error::{SessionError, TransportError};
pub use measurement::{decode, DecodeError, HeartRateReading};
pub use report::{ConsoleSink, ReportSink};
pub use session::SessionManager;
pub use signal::{SessionState, TransportEvent};
pub use transport::BleTransport;
