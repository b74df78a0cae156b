//! Scanner protocol opcode definitions

use std::fmt;

use crate::error::CodecError;

/// Protocol operation codes
///
/// Commands sent to a scanner, the reserved firmware family, and the
/// notification opcodes a scanner uses for unsolicited frames.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Opcode {
    // Trigger and scanning
    PullTrigger = 2011,
    ReleaseTrigger = 2012,
    ScanDisable = 2013,
    ScanEnable = 2014,

    // Capture
    CaptureImage = 3000,
    CaptureBarcode = 3500,
    CaptureVideo = 4000,

    // Attributes
    AttrGetAll = 5000,
    AttrGet = 5001,
    AttrGetOffset = 5003,
    AttrSet = 5004,
    AttrStore = 5005,

    // Actions
    SetAction = 6000,

    // Reserved: firmware and parameter family, answered with OpcodeNotSupported
    AbortUpdateFirmware = 2001,
    SetParameterDefaults = 2015,
    SetParameters = 2016,
    SetParameterPersistence = 2017,
    StartNewFirmware = 5014,
    UpdateFirmware = 5016,
    UpdateFirmwareFromPlugin = 5017,

    // Notifications (from scanner, correlation token 0)
    BarcodeEvent = 0x8001,
    ImageEvent = 0x8002,
    VideoEvent = 0x8004,
    RawDataEvent = 0x8080,
    FirmwareUpdateEvent = 0x8100,
}

impl Opcode {
    /// Every opcode the codec recognizes
    pub const ALL: [Opcode; 25] = [
        Self::PullTrigger,
        Self::ReleaseTrigger,
        Self::ScanDisable,
        Self::ScanEnable,
        Self::CaptureImage,
        Self::CaptureBarcode,
        Self::CaptureVideo,
        Self::AttrGetAll,
        Self::AttrGet,
        Self::AttrGetOffset,
        Self::AttrSet,
        Self::AttrStore,
        Self::SetAction,
        Self::AbortUpdateFirmware,
        Self::SetParameterDefaults,
        Self::SetParameters,
        Self::SetParameterPersistence,
        Self::StartNewFirmware,
        Self::UpdateFirmware,
        Self::UpdateFirmwareFromPlugin,
        Self::BarcodeEvent,
        Self::ImageEvent,
        Self::VideoEvent,
        Self::RawDataEvent,
        Self::FirmwareUpdateEvent,
    ];

    /// Check if this is a command (host to scanner)
    pub fn is_command(self) -> bool {
        !self.is_notification()
    }

    /// Check if this is an unsolicited notification (scanner to host)
    pub fn is_notification(self) -> bool {
        matches!(
            self,
            Self::BarcodeEvent
                | Self::ImageEvent
                | Self::VideoEvent
                | Self::RawDataEvent
                | Self::FirmwareUpdateEvent
        )
    }

    /// Check if this command is reserved but not implemented
    ///
    /// Reserved commands never reach the wire; the session answers them
    /// locally with `ResultCode::OpcodeNotSupported`.
    pub fn is_reserved(self) -> bool {
        matches!(
            self,
            Self::AbortUpdateFirmware
                | Self::SetParameterDefaults
                | Self::SetParameters
                | Self::SetParameterPersistence
                | Self::StartNewFirmware
                | Self::UpdateFirmware
                | Self::UpdateFirmwareFromPlugin
        )
    }

    /// Get opcode name
    pub fn name(self) -> &'static str {
        match self {
            Self::PullTrigger => "DEVICE_PULL_TRIGGER",
            Self::ReleaseTrigger => "DEVICE_RELEASE_TRIGGER",
            Self::ScanDisable => "DEVICE_SCAN_DISABLE",
            Self::ScanEnable => "DEVICE_SCAN_ENABLE",
            Self::CaptureImage => "DEVICE_CAPTURE_IMAGE",
            Self::CaptureBarcode => "DEVICE_CAPTURE_BARCODE",
            Self::CaptureVideo => "DEVICE_CAPTURE_VIDEO",
            Self::AttrGetAll => "RSM_ATTR_GETALL",
            Self::AttrGet => "RSM_ATTR_GET",
            Self::AttrGetOffset => "RSM_ATTR_GET_OFFSET",
            Self::AttrSet => "RSM_ATTR_SET",
            Self::AttrStore => "RSM_ATTR_STORE",
            Self::SetAction => "SET_ACTION",
            Self::AbortUpdateFirmware => "DEVICE_ABORT_UPDATE_FIRMWARE",
            Self::SetParameterDefaults => "DEVICE_SET_PARAMETER_DEFAULTS",
            Self::SetParameters => "DEVICE_SET_PARAMETERS",
            Self::SetParameterPersistence => "DEVICE_SET_PARAMETER_PERSISTANCE",
            Self::StartNewFirmware => "START_NEW_FIRMWARE",
            Self::UpdateFirmware => "UPDATE_FIRMWARE",
            Self::UpdateFirmwareFromPlugin => "UPDATE_FIRMWARE_FROM_PLUGIN",
            Self::BarcodeEvent => "EVENT_BARCODE",
            Self::ImageEvent => "EVENT_IMAGE",
            Self::VideoEvent => "EVENT_VIDEO",
            Self::RawDataEvent => "EVENT_RAW_DATA",
            Self::FirmwareUpdateEvent => "EVENT_FIRMWARE_UPDATE",
        }
    }
}

impl From<Opcode> for u16 {
    fn from(op: Opcode) -> u16 {
        op as u16
    }
}

impl TryFrom<u16> for Opcode {
    type Error = CodecError;

    fn try_from(value: u16) -> Result<Self, CodecError> {
        match value {
            2011 => Ok(Self::PullTrigger),
            2012 => Ok(Self::ReleaseTrigger),
            2013 => Ok(Self::ScanDisable),
            2014 => Ok(Self::ScanEnable),
            3000 => Ok(Self::CaptureImage),
            3500 => Ok(Self::CaptureBarcode),
            4000 => Ok(Self::CaptureVideo),
            5000 => Ok(Self::AttrGetAll),
            5001 => Ok(Self::AttrGet),
            5003 => Ok(Self::AttrGetOffset),
            5004 => Ok(Self::AttrSet),
            5005 => Ok(Self::AttrStore),
            6000 => Ok(Self::SetAction),
            2001 => Ok(Self::AbortUpdateFirmware),
            2015 => Ok(Self::SetParameterDefaults),
            2016 => Ok(Self::SetParameters),
            2017 => Ok(Self::SetParameterPersistence),
            5014 => Ok(Self::StartNewFirmware),
            5016 => Ok(Self::UpdateFirmware),
            5017 => Ok(Self::UpdateFirmwareFromPlugin),
            0x8001 => Ok(Self::BarcodeEvent),
            0x8002 => Ok(Self::ImageEvent),
            0x8004 => Ok(Self::VideoEvent),
            0x8080 => Ok(Self::RawDataEvent),
            0x8100 => Ok(Self::FirmwareUpdateEvent),
            _ => Err(CodecError::UnknownOpcode(value)),
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name(), *self as u16)
    }
}
