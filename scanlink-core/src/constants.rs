//! Protocol constants

/// Default transport connect timeout (seconds)
pub const DEFAULT_CONNECT_TIMEOUT: u64 = 5;

/// Default response deadline for an outstanding command (seconds)
pub const DEFAULT_RESPONSE_TIMEOUT: u64 = 5;

/// Default time allowed for a session to drain on disconnect (milliseconds)
pub const DEFAULT_DISCONNECT_TIMEOUT_MS: u64 = 1000;

/// Consecutive malformed frames tolerated before a session is force-disconnected
pub const MAX_CONSECUTIVE_MALFORMED: u32 = 3;

/// Default capacity of the outbound event queue
pub const DEFAULT_EVENT_QUEUE_CAPACITY: usize = 256;

/// Default capacity of a session's command queue
pub const DEFAULT_COMMAND_QUEUE_CAPACITY: usize = 32;

/// Default number of transport reads buffered ahead of decoding
pub const DEFAULT_INBOUND_QUEUE_CAPACITY: usize = 64;

/// Default capacity of the manager's request queue
pub const DEFAULT_REQUEST_QUEUE_CAPACITY: usize = 64;

/// Notification event bits, as used by the event subscription mask
pub mod events {
    /// Barcode read
    pub const EVENT_BARCODE: u32 = 1;

    /// Image captured in image mode
    pub const EVENT_IMAGE: u32 = 1 << 1;

    /// Video frame captured in video mode
    pub const EVENT_VIDEO: u32 = 1 << 2;

    /// Scanner became available
    pub const EVENT_SCANNER_APPEARANCE: u32 = 1 << 3;

    /// Available scanner disappeared
    pub const EVENT_SCANNER_DISAPPEARANCE: u32 = 1 << 4;

    /// Session established
    pub const EVENT_SESSION_ESTABLISHMENT: u32 = 1 << 5;

    /// Session terminated
    pub const EVENT_SESSION_TERMINATION: u32 = 1 << 6;

    /// Raw data pipe
    pub const EVENT_RAW_DATA: u32 = 1 << 7;

    /// Firmware update progress
    pub const EVENT_FIRMWARE_UPDATE: u32 = 1 << 8;
}

/// Firmware update result codes
pub mod firmware {
    pub const FW_UPDATE_RESULT_SUCCESS: u8 = 0;
    pub const FW_UPDATE_RESULT_FAILURE: u8 = 1;
}
