use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{
    BDAddr, Central, CentralEvent, CharPropFlags, Characteristic, Manager as _, Peripheral, ScanFilter,
    ValueNotification,
};
use btleplug::platform::{Adapter, Manager, Peripheral as PlatformPeripheral, PeripheralId};
use futures::{Stream, StreamExt};
use tokio::sync::mpsc::Sender;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::address::DeviceAddress;
use crate::config::SessionConfig;
use crate::error::TransportError;
use crate::signal::TransportEvent;
use crate::transport::BleTransport;

type CentralEvents = Pin<Box<dyn Stream<Item = CentralEvent> + Send>>;
type Notifications = Pin<Box<dyn Stream<Item = ValueNotification> + Send>>;

/// [`BleTransport`] backed by the host's first Bluetooth adapter.
pub struct BtleplugTransport {
    adapter: Adapter,
    scan_timeout: Duration,
}

pub struct BtleConnection {
    peripheral: PlatformPeripheral,
}

pub struct BtleSubscription {
    characteristic: Characteristic,
    forwarder: JoinHandle<()>,
}

impl BtleplugTransport {
    pub async fn new(config: &SessionConfig) -> Result<Self, TransportError> {
        let manager = Manager::new().await?;
        let adapter_list = manager.adapters().await?;

        for adapter in adapter_list.iter() {
            let name = adapter.adapter_info().await.unwrap_or("No name adapter".to_string());
            debug!("Found bluetooth adapter ({name})");
        }

        let adapter = adapter_list.into_iter().next().ok_or(TransportError::NoAdapter)?;
        info!("Using bluetooth adapter {}", adapter.adapter_info().await?);

        Ok(BtleplugTransport {
            adapter,
            scan_timeout: config.scan_timeout,
        })
    }

    async fn find_peripheral(&self, address: &DeviceAddress) -> Result<PlatformPeripheral, TransportError> {
        // Subscribe before scanning so no discovery slips through.
        let mut events = self.adapter.events().await?;
        self.adapter.start_scan(ScanFilter::default()).await?;

        let found = self.await_peripheral(address, &mut events).await;

        if let Err(err) = self.adapter.stop_scan().await {
            warn!("Failed to stop scan: {err}");
        }
        found
    }

    async fn await_peripheral(
        &self,
        address: &DeviceAddress,
        events: &mut CentralEvents,
    ) -> Result<PlatformPeripheral, TransportError> {
        for peripheral in self.adapter.peripherals().await? {
            if matches_address(&peripheral, address) {
                return Ok(peripheral);
            }
        }

        let scan = async {
            while let Some(event) = events.next().await {
                let (CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id)) = event else {
                    continue;
                };
                let Ok(peripheral) = self.adapter.peripheral(&id).await else { continue; };
                if matches_address(&peripheral, address) {
                    return Some(peripheral);
                }
            }
            None
        };

        match tokio::time::timeout(self.scan_timeout, scan).await {
            Ok(Some(peripheral)) => Ok(peripheral),
            Ok(None) | Err(_) => Err(TransportError::PeripheralNotFound { address: *address }),
        }
    }
}

fn matches_address(peripheral: &PlatformPeripheral, address: &DeviceAddress) -> bool {
    match address {
        DeviceAddress::Mac(mac) => peripheral.address() == BDAddr::from(*mac),
        // CoreBluetooth identifiers only show up inside the peripheral id.
        DeviceAddress::Platform(uuid) => format!("{:?}", peripheral.id())
            .to_lowercase()
            .contains(&uuid.to_string()),
    }
}

#[async_trait]
impl BleTransport for BtleplugTransport {
    type Connection = BtleConnection;
    type Subscription = BtleSubscription;

    async fn connect(&mut self, address: &DeviceAddress) -> Result<BtleConnection, TransportError> {
        let peripheral = self.find_peripheral(address).await?;

        if let Ok(Some(properties)) = peripheral.properties().await {
            let name = properties.local_name.unwrap_or(String::from("(peripheral name unknown)"));
            info!("Found matching peripheral {name:?}...");
        }

        // Connect if we aren't already connected.
        if !peripheral.is_connected().await? {
            peripheral.connect().await?;
        }
        Ok(BtleConnection { peripheral })
    }

    async fn abort_connect(&mut self) {
        if let Err(err) = self.adapter.stop_scan().await {
            warn!("Failed to stop scan after an aborted connect: {err}");
        }
    }

    async fn list_services(&mut self, connection: &BtleConnection) -> Result<Vec<Uuid>, TransportError> {
        connection.peripheral.discover_services().await?;
        Ok(connection.peripheral.services().iter().map(|s| s.uuid).collect())
    }

    async fn subscribe(
        &mut self,
        connection: &BtleConnection,
        characteristic: Uuid,
        events: Sender<TransportEvent>,
    ) -> Result<BtleSubscription, TransportError> {
        let peripheral = &connection.peripheral;
        let characteristic = peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == characteristic)
            .ok_or(TransportError::CharacteristicNotFound { characteristic })?;

        if !characteristic.properties.contains(CharPropFlags::NOTIFY) {
            debug!("Characteristic {} does not advertise NOTIFY", characteristic.uuid);
        }

        // Grab both streams before enabling notifications.
        let notifications = peripheral.notifications().await?;
        let central_events = self.adapter.events().await?;
        peripheral.subscribe(&characteristic).await?;

        let forwarder = tokio::spawn(forward_events(
            characteristic.uuid,
            peripheral.id(),
            notifications,
            central_events,
            events,
        ));

        Ok(BtleSubscription { characteristic, forwarder })
    }

    async fn unsubscribe(
        &mut self,
        connection: &BtleConnection,
        subscription: BtleSubscription,
    ) -> Result<(), TransportError> {
        subscription.forwarder.abort();
        connection.peripheral.unsubscribe(&subscription.characteristic).await?;
        Ok(())
    }

    async fn disconnect(&mut self, connection: BtleConnection) -> Result<(), TransportError> {
        if connection.peripheral.is_connected().await? {
            connection.peripheral.disconnect().await?;
        }
        Ok(())
    }
}

/// Relays notifications for one characteristic until the link drops or the
/// session stops listening.
async fn forward_events(
    characteristic: Uuid,
    peripheral_id: PeripheralId,
    mut notifications: Notifications,
    mut central_events: CentralEvents,
    tx: Sender<TransportEvent>,
) {
    loop {
        tokio::select! {
            notification = notifications.next() => match notification {
                Some(data) if data.uuid == characteristic => {
                    if tx.send(TransportEvent::Notification(data.value)).await.is_err() {
                        break;
                    }
                }
                Some(_) => continue,
                None => {
                    let _ = tx.send(TransportEvent::PeripheralDisconnected).await;
                    break;
                }
            },
            Some(event) = central_events.next() => match event {
                CentralEvent::DeviceDisconnected(id) if id == peripheral_id => {
                    let _ = tx.send(TransportEvent::PeripheralDisconnected).await;
                    break;
                }
                _ => continue,
            },
            _ = tx.closed() => break,
        }
    }
    debug!("Notification forwarder for {characteristic} ended");
}
