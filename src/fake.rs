//! In-process stand-ins for a heart rate strap and a reporting sink.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio::sync::mpsc::Sender;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::address::DeviceAddress;
use crate::error::TransportError;
use crate::measurement::{encode_u8, HeartRateReading, HEART_RATE_SERVICE_UUID};
use crate::report::ReportSink;
use crate::signal::TransportEvent;
use crate::transport::BleTransport;

pub const BATTERY_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000180f_0000_1000_8000_00805f9b34fb);

/// Sends a plausible resting heart rate every `period` until the receiver goes away.
pub async fn transmit_fake_hr_data(tx: Sender<TransportEvent>, period: Duration) {
    loop {
        let random = rand::thread_rng().gen_range(50..70);
        if tx.send(TransportEvent::Notification(encode_u8(random))).await.is_err() {
            break;
        }
        tokio::time::sleep(period).await;
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CallCounts {
    pub connect: usize,
    pub abort_connect: usize,
    pub list_services: usize,
    pub subscribe: usize,
    pub unsubscribe: usize,
    pub disconnect: usize,
}

/// Scripted peripheral. Delivers `script` in order after subscribing, then
/// either feeds random readings or keeps the link open silently.
#[derive(Debug, Default)]
pub struct FakeTransport {
    services: Vec<Uuid>,
    connect_error: Option<String>,
    list_services_error: Option<String>,
    subscribe_error: Option<String>,
    cancel_on_subscribe: Option<CancellationToken>,
    hang_on_connect: bool,
    script: Vec<TransportEvent>,
    live_feed: Option<Duration>,
    calls: Arc<Mutex<CallCounts>>,
}

#[derive(Debug)]
pub struct FakeConnection {
    pub address: DeviceAddress,
}

#[derive(Debug)]
pub struct FakeSubscription {
    feeder: JoinHandle<()>,
}

impl FakeTransport {
    pub fn with_services(services: Vec<Uuid>) -> Self {
        FakeTransport {
            services,
            ..Default::default()
        }
    }

    pub fn heart_rate_sensor() -> Self {
        Self::with_services(vec![BATTERY_SERVICE_UUID, HEART_RATE_SERVICE_UUID])
    }

    pub fn failing_connect(mut self, reason: &str) -> Self {
        self.connect_error = Some(reason.to_string());
        self
    }

    pub fn failing_list_services(mut self, reason: &str) -> Self {
        self.list_services_error = Some(reason.to_string());
        self
    }

    pub fn failing_subscribe(mut self, reason: &str) -> Self {
        self.subscribe_error = Some(reason.to_string());
        self
    }

    /// Fires `cancel` while a subscribe is in flight; the subscribe still succeeds.
    pub fn cancelling_during_subscribe(mut self, cancel: CancellationToken) -> Self {
        self.cancel_on_subscribe = Some(cancel);
        self
    }

    /// Connect never completes.
    pub fn hanging_connect(mut self) -> Self {
        self.hang_on_connect = true;
        self
    }

    pub fn with_notifications<I>(mut self, payloads: I) -> Self
    where
        I: IntoIterator<Item = Vec<u8>>,
    {
        self.script
            .extend(payloads.into_iter().map(TransportEvent::Notification));
        self
    }

    pub fn then_disconnect(mut self) -> Self {
        self.script.push(TransportEvent::PeripheralDisconnected);
        self
    }

    pub fn with_live_feed(mut self, period: Duration) -> Self {
        self.live_feed = Some(period);
        self
    }

    pub fn calls(&self) -> CallCounts {
        *self.calls.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, update: impl FnOnce(&mut CallCounts)) {
        update(&mut *self.calls.lock().unwrap_or_else(PoisonError::into_inner));
    }
}

#[async_trait]
impl BleTransport for FakeTransport {
    type Connection = FakeConnection;
    type Subscription = FakeSubscription;

    async fn connect(&mut self, address: &DeviceAddress) -> Result<FakeConnection, TransportError> {
        self.record(|c| c.connect += 1);
        if self.hang_on_connect {
            std::future::pending::<()>().await;
        }
        match &self.connect_error {
            Some(reason) => Err(TransportError::Rejected(reason.clone())),
            None => Ok(FakeConnection { address: *address }),
        }
    }

    async fn abort_connect(&mut self) {
        self.record(|c| c.abort_connect += 1);
    }

    async fn list_services(&mut self, _connection: &FakeConnection) -> Result<Vec<Uuid>, TransportError> {
        self.record(|c| c.list_services += 1);
        match &self.list_services_error {
            Some(reason) => Err(TransportError::Rejected(reason.clone())),
            None => Ok(self.services.clone()),
        }
    }

    async fn subscribe(
        &mut self,
        _connection: &FakeConnection,
        _characteristic: Uuid,
        events: Sender<TransportEvent>,
    ) -> Result<FakeSubscription, TransportError> {
        self.record(|c| c.subscribe += 1);
        if let Some(reason) = &self.subscribe_error {
            return Err(TransportError::Rejected(reason.clone()));
        }
        if let Some(cancel) = &self.cancel_on_subscribe {
            cancel.cancel();
            tokio::task::yield_now().await;
        }

        let script = self.script.clone();
        let live_feed = self.live_feed;
        let feeder = tokio::spawn(async move {
            for event in script {
                if events.send(event).await.is_err() {
                    return;
                }
            }
            match live_feed {
                Some(period) => transmit_fake_hr_data(events, period).await,
                None => events.closed().await,
            }
        });
        Ok(FakeSubscription { feeder })
    }

    async fn unsubscribe(
        &mut self,
        _connection: &FakeConnection,
        subscription: FakeSubscription,
    ) -> Result<(), TransportError> {
        self.record(|c| c.unsubscribe += 1);
        subscription.feeder.abort();
        Ok(())
    }

    async fn disconnect(&mut self, _connection: FakeConnection) -> Result<(), TransportError> {
        self.record(|c| c.disconnect += 1);
        Ok(())
    }
}

#[derive(Debug, Default)]
struct Recorded {
    readings: Vec<HeartRateReading>,
    warnings: Vec<String>,
    infos: Vec<String>,
    errors: Vec<String>,
}

/// Sink that keeps everything it is given. Clones share the same record.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    recorded: Arc<Mutex<Recorded>>,
    changed: Arc<Notify>,
}

impl RecordingSink {
    fn lock(&self) -> MutexGuard<'_, Recorded> {
        self.recorded.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn readings(&self) -> Vec<u16> {
        self.lock().readings.iter().map(|r| r.bpm).collect()
    }

    pub fn warnings(&self) -> Vec<String> {
        self.lock().warnings.clone()
    }

    pub fn infos(&self) -> Vec<String> {
        self.lock().infos.clone()
    }

    pub fn errors(&self) -> Vec<String> {
        self.lock().errors.clone()
    }

    /// Resolves once at least `count` readings have been reported.
    pub async fn wait_for_readings(&self, count: usize) {
        loop {
            let seen = self.lock().readings.len();
            if seen >= count {
                return;
            }
            self.changed.notified().await;
        }
    }

    fn push(&self, update: impl FnOnce(&mut Recorded)) {
        update(&mut *self.lock());
        self.changed.notify_one();
    }
}

impl ReportSink for RecordingSink {
    fn report(&mut self, reading: &HeartRateReading) {
        let reading = reading.clone();
        self.push(|r| r.readings.push(reading));
    }

    fn report_warning(&mut self, message: &str) {
        self.push(|r| r.warnings.push(message.to_string()));
    }

    fn report_info(&mut self, message: &str) {
        self.push(|r| r.infos.push(message.to_string()));
    }

    fn report_error(&mut self, message: &str) {
        self.push(|r| r.errors.push(message.to_string()));
    }
}
