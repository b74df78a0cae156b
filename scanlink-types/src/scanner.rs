//! Scanner identity and discovery structures

use std::fmt;

use chrono::{DateTime, Utc};

use crate::error::{Error, Result};

/// Scanner identifier assigned by discovery
///
/// Valid identifiers are `1..=65535`; the literal `0` is reserved as the
/// invalid scanner id and can never be constructed.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScannerId(u16);

impl ScannerId {
    /// Reserved invalid scanner id
    pub const INVALID: u16 = 0;

    /// Create a scanner id, rejecting the reserved invalid value
    ///
    /// # Examples
    ///
    /// ```
    /// use scanlink_types::ScannerId;
    ///
    /// assert!(ScannerId::new(7).is_ok());
    /// assert!(ScannerId::new(0).is_err());
    /// ```
    pub fn new(id: u16) -> Result<Self> {
        if id == Self::INVALID {
            return Err(Error::Validation("scanner id 0 is reserved as invalid".into()));
        }
        Ok(Self(id))
    }

    pub fn get(self) -> u16 {
        self.0
    }
}

impl TryFrom<u16> for ScannerId {
    type Error = Error;

    fn try_from(value: u16) -> Result<Self> {
        Self::new(value)
    }
}

impl From<ScannerId> for u16 {
    fn from(id: ScannerId) -> u16 {
        id.0
    }
}

impl fmt::Display for ScannerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Transport a scanner is reachable through
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ConnectionType {
    /// Communication mode could not be determined
    Invalid = 0,

    /// Proprietary accessory link
    Accessory = 1,

    /// Bluetooth Low Energy
    Ble = 2,
}

impl TryFrom<u8> for ConnectionType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::Invalid),
            1 => Ok(Self::Accessory),
            2 => Ok(Self::Ble),
            _ => Err(Error::Parse(format!("unknown connection type: {}", value))),
        }
    }
}

impl fmt::Display for ConnectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Invalid => "invalid",
            Self::Accessory => "accessory",
            Self::Ble => "ble",
        };
        f.write_str(name)
    }
}

/// Filter selecting which transports are eligible for discovery and connection
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum OperatingMode {
    AccessoryOnly = 1,
    BleOnly = 2,
    #[default]
    Both = 3,
}

impl OperatingMode {
    /// Check whether scanners on `connection` are eligible under this mode
    ///
    /// Scanners with an undetermined connection type are never admitted.
    pub fn admits(self, connection: ConnectionType) -> bool {
        match (self, connection) {
            (_, ConnectionType::Invalid) => false,
            (Self::Both, _) => true,
            (Self::AccessoryOnly, ConnectionType::Accessory) => true,
            (Self::BleOnly, ConnectionType::Ble) => true,
            _ => false,
        }
    }
}

impl TryFrom<u8> for OperatingMode {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(Self::AccessoryOnly),
            2 => Ok(Self::BleOnly),
            3 => Ok(Self::Both),
            _ => Err(Error::Validation(format!("invalid operating mode: {}", value))),
        }
    }
}

impl From<OperatingMode> for u8 {
    fn from(mode: OperatingMode) -> u8 {
        mode as u8
    }
}

/// Scanner hardware model
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum ScannerModel {
    /// Unknown, unrecognized or unsupported model
    #[default]
    Invalid = 0,
    Rfd8500Ssi = 1,
    Cs4070 = 2,
    Li3678 = 3,
    Ds3678 = 4,
    Ds8178 = 5,
    Ds2278 = 6,
    GenericSsi = 7,
    Rfd8500Rfid = 8,
}

impl From<u8> for ScannerModel {
    fn from(value: u8) -> Self {
        match value {
            1 => Self::Rfd8500Ssi,
            2 => Self::Cs4070,
            3 => Self::Li3678,
            4 => Self::Ds3678,
            5 => Self::Ds8178,
            6 => Self::Ds2278,
            7 => Self::GenericSsi,
            8 => Self::Rfd8500Rfid,
            _ => Self::Invalid,
        }
    }
}

/// Immutable identity of a scanner, fixed once discovery assigns it
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct ScannerIdentity {
    pub id: ScannerId,
    pub model: ScannerModel,
    pub connection_type: ConnectionType,
}

impl ScannerIdentity {
    pub fn new(id: ScannerId, model: ScannerModel, connection_type: ConnectionType) -> Self {
        Self {
            id,
            model,
            connection_type,
        }
    }
}

impl fmt::Display for ScannerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Scanner[{}, {:?}, {}]",
            self.id, self.model, self.connection_type
        )
    }
}

/// A scanner announced by discovery but not yet in a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvailableScanner {
    pub identity: ScannerIdentity,

    /// Advertised device name
    pub name: Option<String>,

    /// Received signal strength in dBm, when the transport reports one
    pub signal_strength: Option<i16>,

    /// Last time discovery reported this scanner
    pub last_seen: DateTime<Utc>,
}

impl AvailableScanner {
    pub fn new(identity: ScannerIdentity) -> Self {
        Self {
            identity,
            name: None,
            signal_strength: None,
            last_seen: Utc::now(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_signal_strength(mut self, rssi: i16) -> Self {
        self.signal_strength = Some(rssi);
        self
    }

    pub fn id(&self) -> ScannerId {
        self.identity.id
    }
}

impl fmt::Display for AvailableScanner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} \"{}\"",
            self.identity,
            self.name.as_deref().unwrap_or("unnamed")
        )
    }
}
