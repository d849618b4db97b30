//! Peripheral settings: identity and pairing policy
//!
//! Everything here is fixed once the controller is initialized. Settings can
//! be built in code or parsed from JSON (the firmware keeps an optional
//! override blob in NVS).

use crate::adv;
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};

pub const DEFAULT_DEVICE_NAME: &str = "ESP32 BLE";
pub const DEFAULT_PASSKEY: u32 = 123456;

/// Largest ATT MTU the host accepts
pub const MAX_MTU: u16 = 527;
/// ATT default MTU, also the smallest legal value
pub const MIN_MTU: u16 = 23;

/// Six-digit numeric passkey shown to the user during pairing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct Passkey(u32);

impl Passkey {
    pub const MAX: u32 = 999_999;

    pub fn new(value: u32) -> Result<Self, ConfigError> {
        if value > Self::MAX {
            return Err(ConfigError::InvalidPasskey(value));
        }
        Ok(Self(value))
    }

    pub fn value(&self) -> u32 {
        self.0
    }
}

impl Default for Passkey {
    fn default() -> Self {
        Self(DEFAULT_PASSKEY)
    }
}

impl TryFrom<u32> for Passkey {
    type Error = ConfigError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Passkey::new(value)
    }
}

impl From<Passkey> for u32 {
    fn from(passkey: Passkey) -> u32 {
        passkey.0
    }
}

impl std::fmt::Display for Passkey {
    /// Zero padded, the way the peer has to type it
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:06}", self.0)
    }
}

/// Security-manager IO capability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum IoCapability {
    #[default]
    DisplayOnly,
    DisplayYesNo,
    KeyboardOnly,
    NoInputNoOutput,
    KeyboardDisplay,
}

impl IoCapability {
    /// Raw IO capability code used by the pairing request
    pub fn as_raw(&self) -> u8 {
        match self {
            IoCapability::DisplayOnly => 0,
            IoCapability::DisplayYesNo => 1,
            IoCapability::KeyboardOnly => 2,
            IoCapability::NoInputNoOutput => 3,
            IoCapability::KeyboardDisplay => 4,
        }
    }
}

/// Security-manager policy used for every pairing attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PairingPolicy {
    pub bonding: bool,
    pub mitm: bool,
    pub secure_connections: bool,
    pub io_capability: IoCapability,
    pub passkey: Passkey,
}

impl Default for PairingPolicy {
    fn default() -> Self {
        Self {
            bonding: true,
            mitm: true,
            secure_connections: true,
            io_capability: IoCapability::DisplayOnly,
            passkey: Passkey::default(),
        }
    }
}

impl PairingPolicy {
    pub fn with_passkey(passkey: Passkey) -> Self {
        Self { passkey, ..Self::default() }
    }
}

/// Full peripheral configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeripheralConfig {
    pub device_name: String,
    pub preferred_mtu: u16,
    pub pairing: PairingPolicy,
}

impl Default for PeripheralConfig {
    fn default() -> Self {
        Self {
            device_name: DEFAULT_DEVICE_NAME.to_string(),
            preferred_mtu: MAX_MTU,
            pairing: PairingPolicy::default(),
        }
    }
}

impl PeripheralConfig {
    /// Default settings with a caller-supplied name and passkey
    pub fn new(device_name: &str, passkey: u32) -> Result<Self, ConfigError> {
        let config = Self {
            device_name: device_name.to_string(),
            pairing: PairingPolicy::with_passkey(Passkey::new(passkey)?),
            ..Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    /// Parse settings from JSON; missing fields take their defaults
    pub fn from_json(data: &[u8]) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_slice(data)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<Vec<u8>, ConfigError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// The name has to fit the advertising payload next to the fixed fields
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.device_name.is_empty() {
            return Err(ConfigError::EmptyName);
        }
        if self.device_name.len() > adv::MAX_NAME_LEN {
            return Err(ConfigError::NameTooLong {
                len: self.device_name.len(),
                max: adv::MAX_NAME_LEN,
            });
        }
        if !(MIN_MTU..=MAX_MTU).contains(&self.preferred_mtu) {
            return Err(ConfigError::InvalidMtu(self.preferred_mtu));
        }
        Ok(())
    }
}
