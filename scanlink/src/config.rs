//! Session and manager configuration

use std::time::Duration;

use scanlink_core::constants::*;
use scanlink_types::OperatingMode;

/// Per-session settings
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Upper bound on the transport handshake
    pub connect_timeout: Duration,

    /// Deadline for each outstanding command
    pub response_timeout: Duration,

    /// Time allowed for a session to drain on disconnect
    pub disconnect_timeout: Duration,

    /// Consecutive malformed frames before the session is force-disconnected
    pub max_consecutive_malformed: u32,

    pub command_queue_capacity: usize,
    pub inbound_queue_capacity: usize,
}

impl SessionConfig {
    /// Set connection timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set response timeout
    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    pub fn with_disconnect_timeout(mut self, timeout: Duration) -> Self {
        self.disconnect_timeout = timeout;
        self
    }

    pub fn with_max_consecutive_malformed(mut self, count: u32) -> Self {
        self.max_consecutive_malformed = count.max(1);
        self
    }

    pub fn with_command_queue_capacity(mut self, capacity: usize) -> Self {
        self.command_queue_capacity = capacity.max(1);
        self
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT),
            response_timeout: Duration::from_secs(DEFAULT_RESPONSE_TIMEOUT),
            disconnect_timeout: Duration::from_millis(DEFAULT_DISCONNECT_TIMEOUT_MS),
            max_consecutive_malformed: MAX_CONSECUTIVE_MALFORMED,
            command_queue_capacity: DEFAULT_COMMAND_QUEUE_CAPACITY,
            inbound_queue_capacity: DEFAULT_INBOUND_QUEUE_CAPACITY,
        }
    }
}

/// Session manager settings
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub operating_mode: OperatingMode,
    pub discovery_enabled: bool,
    pub auto_reestablish: bool,
    pub event_queue_capacity: usize,
    pub request_queue_capacity: usize,
    pub session: SessionConfig,
}

impl ManagerConfig {
    pub fn with_operating_mode(mut self, mode: OperatingMode) -> Self {
        self.operating_mode = mode;
        self
    }

    pub fn with_discovery(mut self, enabled: bool) -> Self {
        self.discovery_enabled = enabled;
        self
    }

    pub fn with_auto_reestablish(mut self, enabled: bool) -> Self {
        self.auto_reestablish = enabled;
        self
    }

    /// Set outbound event queue capacity
    pub fn with_event_queue_capacity(mut self, capacity: usize) -> Self {
        self.event_queue_capacity = capacity.max(1);
        self
    }

    pub fn with_session(mut self, session: SessionConfig) -> Self {
        self.session = session;
        self
    }
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            operating_mode: OperatingMode::Both,
            discovery_enabled: false,
            auto_reestablish: false,
            event_queue_capacity: DEFAULT_EVENT_QUEUE_CAPACITY,
            request_queue_capacity: DEFAULT_REQUEST_QUEUE_CAPACITY,
            session: SessionConfig::default(),
        }
    }
}
