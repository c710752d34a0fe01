use async_trait::async_trait;
use tokio::sync::mpsc::Sender;
use uuid::Uuid;

use crate::address::DeviceAddress;
use crate::error::TransportError;
use crate::signal::TransportEvent;

/// What the session needs from a BLE central.
///
/// Notifications and link loss are pushed into the `events` sender handed
/// to [`BleTransport::subscribe`], in the order the stack delivered them.
#[async_trait]
pub trait BleTransport: Send {
    type Connection: Send + Sync;
    type Subscription: Send;

    async fn connect(&mut self, address: &DeviceAddress) -> Result<Self::Connection, TransportError>;

    /// Called after a `connect` future was dropped before it finished, to
    /// stop anything it left running (e.g. a scan).
    async fn abort_connect(&mut self) {}

    async fn list_services(&mut self, connection: &Self::Connection) -> Result<Vec<Uuid>, TransportError>;

    async fn subscribe(
        &mut self,
        connection: &Self::Connection,
        characteristic: Uuid,
        events: Sender<TransportEvent>,
    ) -> Result<Self::Subscription, TransportError>;

    async fn unsubscribe(
        &mut self,
        connection: &Self::Connection,
        subscription: Self::Subscription,
    ) -> Result<(), TransportError>;

    async fn disconnect(&mut self, connection: Self::Connection) -> Result<(), TransportError>;
}
