use std::time::Duration;

/// Tunables for one heart rate session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Upper bound on establishing the link, scan included
    pub connect_timeout: Duration,
    /// How long to scan for a peripheral the adapter hasn't seen yet
    pub scan_timeout: Duration,
    /// Notifications buffered between the transport and the decoder
    pub event_buffer: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            scan_timeout: Duration::from_secs(10),
            event_buffer: 64,
        }
    }
}

impl SessionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_scan_timeout(mut self, timeout: Duration) -> Self {
        self.scan_timeout = timeout;
        self
    }

    pub fn with_event_buffer(mut self, size: usize) -> Self {
        self.event_buffer = size.max(1);
        self
    }
}
