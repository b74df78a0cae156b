//! Events delivered to the host

use bitflags::bitflags;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use scanlink_core::constants::{events, firmware};
use scanlink_core::{FirmwareProgress, Notification, SessionState};
use scanlink_types::{AvailableScanner, ScannerId, ScannerIdentity};

bitflags! {
    /// Selects which event kinds reach the host
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct EventMask: u32 {
        const BARCODE = events::EVENT_BARCODE;
        const IMAGE = events::EVENT_IMAGE;
        const VIDEO = events::EVENT_VIDEO;
        const SCANNER_APPEARANCE = events::EVENT_SCANNER_APPEARANCE;
        const SCANNER_DISAPPEARANCE = events::EVENT_SCANNER_DISAPPEARANCE;
        const SESSION_ESTABLISHMENT = events::EVENT_SESSION_ESTABLISHMENT;
        const SESSION_TERMINATION = events::EVENT_SESSION_TERMINATION;
        const RAW_DATA = events::EVENT_RAW_DATA;
        const FIRMWARE_UPDATE = events::EVENT_FIRMWARE_UPDATE;

        const LIFECYCLE = Self::SCANNER_APPEARANCE.bits()
            | Self::SCANNER_DISAPPEARANCE.bits()
            | Self::SESSION_ESTABLISHMENT.bits()
            | Self::SESSION_TERMINATION.bits();
    }
}

impl Default for EventMask {
    fn default() -> Self {
        Self::all()
    }
}

/// Point-in-time view of an active session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub identity: ScannerIdentity,
    pub state: SessionState,
    pub established_at: DateTime<Utc>,
}

impl SessionSnapshot {
    pub fn id(&self) -> ScannerId {
        self.identity.id
    }
}

/// Firmware update progress for one scanner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FirmwareUpdate {
    pub scanner_id: ScannerId,
    pub status: u8,
    pub current_record: u32,
    pub max_records: u32,
}

impl FirmwareUpdate {
    fn from_progress(scanner_id: ScannerId, progress: FirmwareProgress) -> Self {
        Self {
            scanner_id,
            status: progress.status,
            current_record: progress.current_record,
            max_records: progress.max_records,
        }
    }

    /// Check if the update reached a final result
    pub fn is_finished(&self) -> bool {
        matches!(
            self.status,
            firmware::FW_UPDATE_RESULT_SUCCESS | firmware::FW_UPDATE_RESULT_FAILURE
        )
    }
}

/// Event delivered to the host, in publish order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    ScannerAppeared(AvailableScanner),
    ScannerDisappeared(ScannerId),
    SessionEstablished(SessionSnapshot),
    SessionTerminated(ScannerId),
    BarcodeData {
        scanner_id: ScannerId,
        barcode_type: u8,
        data: Bytes,
    },
    Image {
        scanner_id: ScannerId,
        data: Bytes,
    },
    VideoFrame {
        scanner_id: ScannerId,
        data: Bytes,
    },
    RawData {
        scanner_id: ScannerId,
        data: Bytes,
    },
    FirmwareUpdate(FirmwareUpdate),
}

impl Event {
    pub(crate) fn from_notification(scanner_id: ScannerId, notification: Notification) -> Self {
        match notification {
            Notification::Barcode { barcode_type, data } => Self::BarcodeData {
                scanner_id,
                barcode_type,
                data,
            },
            Notification::Image(data) => Self::Image { scanner_id, data },
            Notification::Video(data) => Self::VideoFrame { scanner_id, data },
            Notification::RawData(data) => Self::RawData { scanner_id, data },
            Notification::FirmwareUpdate(progress) => {
                Self::FirmwareUpdate(FirmwareUpdate::from_progress(scanner_id, progress))
            }
        }
    }

    /// Scanner the event concerns
    pub fn scanner_id(&self) -> ScannerId {
        match self {
            Self::ScannerAppeared(scanner) => scanner.id(),
            Self::SessionEstablished(snapshot) => snapshot.id(),
            Self::ScannerDisappeared(id) | Self::SessionTerminated(id) => *id,
            Self::BarcodeData { scanner_id, .. }
            | Self::Image { scanner_id, .. }
            | Self::VideoFrame { scanner_id, .. }
            | Self::RawData { scanner_id, .. } => *scanner_id,
            Self::FirmwareUpdate(update) => update.scanner_id,
        }
    }

    /// Mask bit for this event kind
    pub fn kind(&self) -> EventMask {
        match self {
            Self::ScannerAppeared(_) => EventMask::SCANNER_APPEARANCE,
            Self::ScannerDisappeared(_) => EventMask::SCANNER_DISAPPEARANCE,
            Self::SessionEstablished(_) => EventMask::SESSION_ESTABLISHMENT,
            Self::SessionTerminated(_) => EventMask::SESSION_TERMINATION,
            Self::BarcodeData { .. } => EventMask::BARCODE,
            Self::Image { .. } => EventMask::IMAGE,
            Self::VideoFrame { .. } => EventMask::VIDEO,
            Self::RawData { .. } => EventMask::RAW_DATA,
            Self::FirmwareUpdate(_) => EventMask::FIRMWARE_UPDATE,
        }
    }

    /// Lifecycle events are never dropped on queue overflow
    pub fn is_lifecycle(&self) -> bool {
        EventMask::LIFECYCLE.contains(self.kind())
    }
}
