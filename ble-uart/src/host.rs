//! BLE host capability set
//!
//! The controller and registry never talk to a radio directly. They drive a
//! host stack through [`BleHost`]; MCU crates implement it on top of their
//! stack (NimBLE on ESP32), tests use a recording mock.

use crate::adv::AdvFields;
use crate::config::PairingPolicy;
use crate::event::PasskeyAction;
use crate::gatt::ServiceDef;
use uuid::Uuid;

/// Connection handle assigned by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnHandle(pub u16);

/// Attribute handle of a registered characteristic value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AttrHandle(pub u16);

impl std::fmt::Display for ConnHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::fmt::Display for AttrHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{:04x}", self.0)
    }
}

/// Non-zero return code from the host stack
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("rc = {0}")]
pub struct HostError(pub i32);

impl HostError {
    /// The operation is already in progress (NimBLE `BLE_HS_EALREADY`)
    pub const EALREADY: i32 = 2;

    /// Map a C-style return code, where zero means success
    pub fn check(rc: i32) -> Result<(), HostError> {
        if rc == 0 { Ok(()) } else { Err(HostError(rc)) }
    }

    pub fn is_already(&self) -> bool {
        self.0 == Self::EALREADY
    }
}

/// Own address type used while advertising
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnAddrType {
    Public,
    Random,
    RpaPublic,
    RpaRandom,
}

impl OwnAddrType {
    pub fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(OwnAddrType::Public),
            1 => Some(OwnAddrType::Random),
            2 => Some(OwnAddrType::RpaPublic),
            3 => Some(OwnAddrType::RpaRandom),
            _ => None,
        }
    }

    pub fn as_raw(&self) -> u8 {
        match self {
            OwnAddrType::Public => 0,
            OwnAddrType::Random => 1,
            OwnAddrType::RpaPublic => 2,
            OwnAddrType::RpaRandom => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnMode {
    NonConnectable,
    Directed,
    Undirected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscMode {
    NonDiscoverable,
    Limited,
    General,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvDuration {
    /// Advertise until stopped or superseded by a connection
    Forever,
    Millis(u32),
}

/// Advertising parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdvParams {
    pub conn_mode: ConnMode,
    pub disc_mode: DiscMode,
    pub duration: AdvDuration,
}

impl Default for AdvParams {
    /// Undirected connectable, general discoverable, no time limit
    fn default() -> Self {
        Self {
            conn_mode: ConnMode::Undirected,
            disc_mode: DiscMode::General,
            duration: AdvDuration::Forever,
        }
    }
}

/// What the host knows about a live connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnDesc {
    pub conn_handle: ConnHandle,
    pub encrypted: bool,
    pub authenticated: bool,
    pub bonded: bool,
}

/// Trait for BLE host stack implementations
///
/// MCU-specific crates implement this trait using their BLE stack. Methods
/// take `&self` because the host is a process-wide singleton on every target
/// we care about; implementations use interior mutability where needed.
///
/// Implementations must not hold locks across calls back into the
/// controller: `notify` may be called from inside an RX callback.
pub trait BleHost: Send + Sync {
    /// Apply bonding, MITM, secure-connections and IO capability
    fn configure_security(&self, policy: &PairingPolicy) -> Result<(), HostError>;

    /// Check that the host has resources for the given service table
    fn count_services(&self, services: &[ServiceDef]) -> Result<(), HostError>;

    /// Install the service table
    fn add_services(&self, services: &[ServiceDef]) -> Result<(), HostError>;

    /// Look up the value handle of a registered characteristic
    ///
    /// Some hosts only assign handles once their GATT server has started,
    /// so this may fail before sync.
    fn find_characteristic(&self, service: &Uuid, characteristic: &Uuid)
        -> Result<AttrHandle, HostError>;

    fn set_device_name(&self, name: &str) -> Result<(), HostError>;

    /// Preferred local ATT MTU, used when a central requests an exchange
    fn set_preferred_mtu(&self, mtu: u16) -> Result<(), HostError>;

    /// Make sure an identity address is available
    fn ensure_address(&self) -> Result<(), HostError>;

    /// Pick the own address type to advertise with
    fn infer_address_type(&self) -> Result<OwnAddrType, HostError>;

    fn set_adv_fields(&self, fields: &AdvFields) -> Result<(), HostError>;

    fn start_advertising(&self, own_addr_type: OwnAddrType, params: &AdvParams)
        -> Result<(), HostError>;

    /// Check that a connection handle is still known
    fn find_connection(&self, conn: ConnHandle) -> Result<ConnDesc, HostError>;

    /// Answer a security-manager IO request with a passkey
    fn inject_passkey(&self, conn: ConnHandle, action: PasskeyAction, passkey: u32)
        -> Result<(), HostError>;

    /// Send a GATT notification
    fn notify(&self, conn: ConnHandle, attr: AttrHandle, data: &[u8]) -> Result<(), HostError>;

    /// Hand control to the host's event-processing loop
    fn start(&self) -> Result<(), HostError>;
}
