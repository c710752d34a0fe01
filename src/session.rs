//! Lifecycle of a single heart rate streaming session.
//!
//! The manager walks one peripheral through
//! `Connecting -> Connected -> ServiceCheck -> Subscribing -> Streaming`
//! and always ends in `Closed`, releasing whatever it acquired on the way.
//! Failures are never retried here.

use std::collections::HashSet;
use std::sync::{Mutex, OnceLock, PoisonError};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::address::DeviceAddress;
use crate::config::SessionConfig;
use crate::error::{SessionError, TransportError};
use crate::measurement::{self, HEART_RATE_MEASUREMENT_UUID, HEART_RATE_SERVICE_UUID};
use crate::report::ReportSink;
use crate::signal::{SessionState, TransportEvent};
use crate::transport::BleTransport;

static ACTIVE_SESSIONS: OnceLock<Mutex<HashSet<DeviceAddress>>> = OnceLock::new();

fn active_sessions() -> &'static Mutex<HashSet<DeviceAddress>> {
    ACTIVE_SESSIONS.get_or_init(|| Mutex::new(HashSet::new()))
}

/// Marks an address as in use for as long as it is held.
struct SessionLease {
    address: DeviceAddress,
}

impl SessionLease {
    fn acquire(address: DeviceAddress) -> Option<Self> {
        let mut active = active_sessions().lock().unwrap_or_else(PoisonError::into_inner);
        if !active.insert(address) {
            return None;
        }
        drop(active);
        Some(SessionLease { address })
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        active_sessions()
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.address);
    }
}

pub struct SessionManager<T: BleTransport, S: ReportSink> {
    transport: T,
    sink: S,
    config: SessionConfig,
    state: SessionState,
    history: Vec<SessionState>,
}

impl<T: BleTransport, S: ReportSink> SessionManager<T, S> {
    pub fn new(transport: T, sink: S, config: SessionConfig) -> Self {
        SessionManager {
            transport,
            sink,
            config,
            state: SessionState::Idle,
            history: vec![SessionState::Idle],
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Every state entered by the most recent run, starting with `Idle`.
    pub fn history(&self) -> &[SessionState] {
        &self.history
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Streams readings from `address` into the sink until `cancel` fires.
    ///
    /// Returns `Ok(())` only for a cancelled session. Any fatal error has
    /// already been reported to the sink when this returns.
    pub async fn run(&mut self, address: &DeviceAddress, cancel: CancellationToken) -> Result<(), SessionError> {
        let Some(_lease) = SessionLease::acquire(*address) else {
            let err = SessionError::AlreadyActive { address: *address };
            self.sink.report_error(&err.to_string());
            return Err(err);
        };

        self.state = SessionState::Idle;
        self.history = vec![SessionState::Idle];

        let outcome = self.drive(address, &cancel).await;
        if let Err(err) = &outcome {
            self.sink.report_error(&err.to_string());
        }
        outcome
    }

    async fn drive(&mut self, address: &DeviceAddress, cancel: &CancellationToken) -> Result<(), SessionError> {
        self.transition(SessionState::Connecting);
        info!("Connecting to {address}");

        let connect = tokio::time::timeout(self.config.connect_timeout, self.transport.connect(address));
        let connected = tokio::select! {
            _ = cancel.cancelled() => None,
            result = connect => Some(result),
        };

        let connection = match connected {
            None => {
                self.transport.abort_connect().await;
                return self.close(Ok(()));
            }
            Some(Ok(Ok(connection))) => connection,
            Some(Ok(Err(source))) => {
                return self.close(Err(SessionError::Connection { address: *address, source }));
            }
            Some(Err(_)) => {
                self.transport.abort_connect().await;
                return self.close(Err(SessionError::Connection {
                    address: *address,
                    source: TransportError::Timeout,
                }));
            }
        };
        self.transition(SessionState::Connected);
        info!("Connected to {address}");

        let mut subscription = None;
        let outcome = self.stream(address, &connection, &mut subscription, cancel).await;

        self.begin_shutdown(&outcome);
        self.release(connection, subscription).await;
        self.transition(SessionState::Closed);
        outcome
    }

    async fn stream(
        &mut self,
        address: &DeviceAddress,
        connection: &T::Connection,
        subscription: &mut Option<T::Subscription>,
        cancel: &CancellationToken,
    ) -> Result<(), SessionError> {
        self.transition(SessionState::ServiceCheck);
        let listed = tokio::select! {
            _ = cancel.cancelled() => None,
            result = self.transport.list_services(connection) => Some(result),
        };
        let services = match listed {
            None => return Ok(()),
            Some(Ok(services)) => services,
            Some(Err(source)) => return Err(SessionError::Connection { address: *address, source }),
        };
        debug!("{address} exposes services {services:?}");

        if !services.contains(&HEART_RATE_SERVICE_UUID) {
            return Err(SessionError::ServiceNotFound {
                address: *address,
                service: HEART_RATE_SERVICE_UUID,
            });
        }

        self.transition(SessionState::Subscribing);
        info!("Subscribing to HR notifications...");
        let (tx, mut events) = mpsc::channel(self.config.event_buffer.max(1));
        // Runs to completion even when cancelled so the handle can be released.
        match self.transport.subscribe(connection, HEART_RATE_MEASUREMENT_UUID, tx).await {
            Ok(handle) => *subscription = Some(handle),
            Err(source) => {
                return Err(SessionError::Subscription {
                    address: *address,
                    characteristic: HEART_RATE_MEASUREMENT_UUID,
                    source,
                });
            }
        }
        if cancel.is_cancelled() {
            return Ok(());
        }

        self.transition(SessionState::Streaming);
        info!("Streaming heart rate from {address}");

        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(()),
                event = events.recv() => event,
            };

            match event {
                Some(TransportEvent::Notification(payload)) => self.handle_notification(&payload),
                Some(TransportEvent::PeripheralDisconnected) | None => {
                    return Err(SessionError::PeripheralDisconnected {
                        address: *address,
                        characteristic: HEART_RATE_MEASUREMENT_UUID,
                    });
                }
            }
        }
    }

    fn handle_notification(&mut self, payload: &[u8]) {
        match measurement::decode(payload) {
            Ok(reading) => self.sink.report(&reading),
            Err(err) => self
                .sink
                .report_warning(&format!("dropping notification {payload:02x?}: {err}")),
        }
    }

    async fn release(&mut self, connection: T::Connection, subscription: Option<T::Subscription>) {
        if let Some(subscription) = subscription {
            debug!("Unsubscribing from {HEART_RATE_MEASUREMENT_UUID}");
            if let Err(err) = self.transport.unsubscribe(&connection, subscription).await {
                error!("Failed to unsubscribe: {err}");
            }
        }
        debug!("Disconnecting...");
        if let Err(err) = self.transport.disconnect(connection).await {
            error!("Failed to disconnect: {err}");
        }
    }

    fn begin_shutdown(&mut self, outcome: &Result<(), SessionError>) {
        match outcome {
            Ok(()) => self.transition(SessionState::ShuttingDown),
            Err(_) => self.transition(SessionState::Failed),
        }
    }

    /// Closes a session that never got a connection.
    fn close(&mut self, outcome: Result<(), SessionError>) -> Result<(), SessionError> {
        self.begin_shutdown(&outcome);
        self.transition(SessionState::Closed);
        outcome
    }

    fn transition(&mut self, next: SessionState) {
        debug!("session {:?} -> {:?}", self.state, next);
        self.state = next;
        self.history.push(next);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::fake::{FakeTransport, RecordingSink};

    fn address(last: u8) -> DeviceAddress {
        DeviceAddress::Mac([0x02, 0x00, 0x00, 0x00, 0x01, last])
    }

    #[test]
    fn test_lease_is_exclusive_per_address() {
        let first = SessionLease::acquire(address(1)).unwrap();
        assert!(SessionLease::acquire(address(1)).is_none());
        assert!(SessionLease::acquire(address(2)).is_some());
        drop(first);
        assert!(SessionLease::acquire(address(1)).is_some());
    }

    #[test]
    fn test_rejected_acquire_returns_and_keeps_holder() {
        let (done_tx, done_rx) = std::sync::mpsc::channel();
        std::thread::spawn(move || {
            let held = SessionLease::acquire(address(9));
            let rejected = SessionLease::acquire(address(9));
            let outcome = (held.is_some(), rejected.is_none());
            drop(held);
            done_tx.send(outcome).unwrap();
        });

        let (held, rejected) = done_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(held);
        assert!(rejected);
        assert!(SessionLease::acquire(address(9)).is_some());
    }

    #[tokio::test]
    async fn test_second_session_for_same_address_is_rejected() {
        let _held = SessionLease::acquire(address(3)).unwrap();
        let sink = RecordingSink::default();
        let mut manager = SessionManager::new(FakeTransport::heart_rate_sensor(), sink.clone(), SessionConfig::default());

        let err = manager.run(&address(3), CancellationToken::new()).await.unwrap_err();

        assert!(matches!(err, SessionError::AlreadyActive { .. }));
        assert_eq!(manager.transport().calls().connect, 0);
        assert_eq!(manager.history(), &[SessionState::Idle]);
        assert_eq!(sink.errors().len(), 1);
    }

    #[tokio::test]
    async fn test_connect_failure_closes_without_release() {
        let sink = RecordingSink::default();
        let transport = FakeTransport::heart_rate_sensor().failing_connect("link refused");
        let mut manager = SessionManager::new(transport, sink.clone(), SessionConfig::default());

        let err = manager.run(&address(4), CancellationToken::new()).await.unwrap_err();

        assert!(matches!(err, SessionError::Connection { .. }));
        assert_eq!(
            manager.history(),
            &[SessionState::Idle, SessionState::Connecting, SessionState::Failed, SessionState::Closed]
        );
        let calls = manager.transport().calls();
        assert_eq!(calls.abort_connect, 0);
        assert_eq!(calls.disconnect, 0);
        assert_eq!(calls.unsubscribe, 0);
        assert!(sink.errors()[0].contains("02:00:00:00:01:04"));
    }

    #[tokio::test]
    async fn test_connect_timeout_is_a_connection_error() {
        let transport = FakeTransport::heart_rate_sensor().hanging_connect();
        let config = SessionConfig::default().with_connect_timeout(Duration::from_millis(20));
        let mut manager = SessionManager::new(transport, RecordingSink::default(), config);

        let err = manager.run(&address(5), CancellationToken::new()).await.unwrap_err();

        assert!(matches!(
            err,
            SessionError::Connection { source: TransportError::Timeout, .. }
        ));
        assert_eq!(manager.state(), SessionState::Closed);
        assert_eq!(manager.transport().calls().abort_connect, 1);
        assert_eq!(manager.transport().calls().disconnect, 0);
    }

    #[tokio::test]
    async fn test_cancel_while_connecting_is_clean() {
        let transport = FakeTransport::heart_rate_sensor().hanging_connect();
        let mut manager = SessionManager::new(transport, RecordingSink::default(), SessionConfig::default());
        let cancel = CancellationToken::new();
        cancel.cancel();

        manager.run(&address(6), cancel).await.unwrap();

        assert_eq!(
            manager.history(),
            &[
                SessionState::Idle,
                SessionState::Connecting,
                SessionState::ShuttingDown,
                SessionState::Closed
            ]
        );
        assert_eq!(manager.transport().calls().abort_connect, 1);
    }

    #[tokio::test]
    async fn test_subscription_failure_releases_connection() {
        let sink = RecordingSink::default();
        let transport = FakeTransport::heart_rate_sensor().failing_subscribe("CCCD write rejected");
        let mut manager = SessionManager::new(transport, sink.clone(), SessionConfig::default());

        let err = manager.run(&address(7), CancellationToken::new()).await.unwrap_err();

        assert!(matches!(err, SessionError::Subscription { .. }));
        assert!(!manager.history().contains(&SessionState::Streaming));
        let calls = manager.transport().calls();
        assert_eq!(calls.unsubscribe, 0);
        assert_eq!(calls.disconnect, 1);
        assert!(sink.errors()[0].contains("00002a37-0000-1000-8000-00805f9b34fb"));
    }

    #[tokio::test]
    async fn test_lease_released_after_run() {
        let transport = FakeTransport::heart_rate_sensor().failing_connect("nope");
        let mut manager = SessionManager::new(transport, RecordingSink::default(), SessionConfig::default());

        let _ = manager.run(&address(8), CancellationToken::new()).await;

        assert!(SessionLease::acquire(address(8)).is_some());
    }
}
