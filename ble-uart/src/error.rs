//! Error types
//!
//! Startup failures surface as [`Error`] from `Controller::initialize`.
//! Runtime failures (advertising, notify) have their own enums so the event
//! paths can log them and keep the state machine running.

use crate::host::HostError;

/// Top-level error returned by controller and registry operations
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The host rejected the GATT service table (fatal to startup)
    #[error("GATT service table rejected by host: {0}")]
    Configuration(#[source] HostError),

    /// The host could not determine an own address type after sync
    #[error("cannot determine own address type: {0}")]
    AddressResolution(#[source] HostError),

    #[error("controller already initialized")]
    AlreadyInitialized,

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("host failure: {0}")]
    Host(#[source] HostError),
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum AdvertisingError {
    /// Advertising requested before the host reported sync
    #[error("host not synced, own address type unknown")]
    NotSynced,

    #[error("advertising payload is {len} bytes, limit is {max}")]
    PayloadTooLarge { len: usize, max: usize },

    #[error("error setting advertisement data: {0}")]
    SetFields(#[source] HostError),

    #[error("error enabling advertisement: {0}")]
    Start(#[source] HostError),
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum NotifyError {
    #[error("no central connected")]
    NotConnected,

    /// TX characteristic handle has not been resolved yet
    #[error("UART service not registered")]
    ServiceNotRegistered,

    #[error("host rejected notification: {0}")]
    Host(#[source] HostError),
}

/// ATT error returned to the host from an attribute access callback
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttError {
    #[error("invalid attribute value length")]
    InvalidAttributeValueLength,

    #[error("unlikely error")]
    Unlikely,
}

impl AttError {
    /// ATT protocol error code (Core spec Vol 3, Part F, 3.4.1.1)
    pub fn code(&self) -> u8 {
        match self {
            AttError::InvalidAttributeValueLength => 0x0d,
            AttError::Unlikely => 0x0e,
        }
    }
}

/// Settings validation errors
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("invalid config JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("device name must not be empty")]
    EmptyName,

    #[error("device name is {len} bytes, limit is {max}")]
    NameTooLong { len: usize, max: usize },

    #[error("passkey {0} is not a 6-digit code")]
    InvalidPasskey(u32),

    #[error("MTU {0} outside {min}..={max}", min = crate::config::MIN_MTU, max = crate::config::MAX_MTU)]
    InvalidMtu(u16),
}
