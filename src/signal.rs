/// Pushed by a transport into the session's event channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Notification(Vec<u8>),
    PeripheralDisconnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Connected,
    ServiceCheck,
    Subscribing,
    Streaming,
    ShuttingDown,
    Failed,
    Closed,
}
