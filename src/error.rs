use thiserror::Error;
use uuid::Uuid;

use crate::address::DeviceAddress;

/// Failures reported by a [`crate::transport::BleTransport`].
#[derive(Error, Debug)]
pub enum TransportError {
    #[error(transparent)]
    Btle(#[from] btleplug::Error),

    #[error("no Bluetooth adapter found")]
    NoAdapter,

    #[error("peripheral {address} not found")]
    PeripheralNotFound { address: DeviceAddress },

    #[error("timed out")]
    Timeout,

    #[error("characteristic {characteristic} not found")]
    CharacteristicNotFound { characteristic: Uuid },

    #[error("{0}")]
    Rejected(String),
}

/// Terminal outcome of a failed session.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("connection to {address} failed: {source}")]
    Connection {
        address: DeviceAddress,
        #[source]
        source: TransportError,
    },

    #[error("heart rate service {service} not found on {address}")]
    ServiceNotFound { address: DeviceAddress, service: Uuid },

    #[error("subscribing to {characteristic} on {address} failed: {source}")]
    Subscription {
        address: DeviceAddress,
        characteristic: Uuid,
        #[source]
        source: TransportError,
    },

    #[error("{address} disconnected while streaming {characteristic}")]
    PeripheralDisconnected { address: DeviceAddress, characteristic: Uuid },

    #[error("a session for {address} is already active")]
    AlreadyActive { address: DeviceAddress },
}
