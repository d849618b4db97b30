//! Connection/Pairing Controller
//!
//! Owns the advertising lifecycle and the single connection session. All
//! host events arrive on one context; `notify` may come from anywhere, so the
//! session sits behind a mutex and is never held across a host call.
//!
//! ```text
//! Idle --sync--> Advertising --connect ok--> Connected <--passkey/enc--> Encrypting
//!                     ^   |                     |
//!                     |   +--connect failed-----+ (re-advertise)
//!                     +-------- disconnect -----+
//! ```

use crate::adv::{self, AdvFields};
use crate::config::{MIN_MTU, PairingPolicy, PeripheralConfig, DEFAULT_DEVICE_NAME};
use crate::error::{AdvertisingError, AttError, Error, NotifyError};
use crate::event::{AccessEvent, GapEvent, PasskeyAction};
use crate::gatt::GattRegistry;
use crate::host::{AdvParams, BleHost, ConnDesc, ConnHandle, OwnAddrType};
use log::*;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

/// Observable controller state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeripheralState {
    /// Host not synced yet, or advertising could not be started
    Idle,
    Advertising,
    Connected,
    /// Connected with a passkey exchange outstanding
    Encrypting,
}

/// The active link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub conn_handle: ConnHandle,
    /// Negotiated ATT MTU
    pub mtu: u16,
    pub encrypted: bool,
    /// Pairing used MITM protection
    pub authenticated: bool,
    pub bonded: bool,
    /// Passkey exchange outstanding
    pub pairing: bool,
    /// Central enabled notifications on TX
    pub subscribed: bool,
}

impl ConnectionInfo {
    fn new(conn_handle: ConnHandle) -> Self {
        Self {
            conn_handle,
            mtu: MIN_MTU,
            encrypted: false,
            authenticated: false,
            bonded: false,
            pairing: false,
            subscribed: false,
        }
    }
}

#[derive(Debug, Default)]
struct Session {
    own_addr_type: Option<OwnAddrType>,
    advertising: bool,
    connection: Option<ConnectionInfo>,
}

impl Session {
    fn state(&self) -> PeripheralState {
        match &self.connection {
            Some(conn) if conn.pairing => PeripheralState::Encrypting,
            Some(_) => PeripheralState::Connected,
            None if self.advertising => PeripheralState::Advertising,
            None => PeripheralState::Idle,
        }
    }

    /// The connection record, if it belongs to `conn_handle`
    fn connection_mut(&mut self, conn_handle: ConnHandle) -> Option<&mut ConnectionInfo> {
        self.connection.as_mut().filter(|c| c.conn_handle == conn_handle)
    }
}

struct Shared<H> {
    host: H,
    registry: GattRegistry,
    config: OnceLock<PeripheralConfig>,
    session: Mutex<Session>,
}

/// BLE UART peripheral controller
///
/// Cheap to clone; clones share the same session.
pub struct Controller<H> {
    shared: Arc<Shared<H>>,
}

impl<H> Clone for Controller<H> {
    fn clone(&self) -> Self {
        Self { shared: self.shared.clone() }
    }
}

impl<H: BleHost> Controller<H> {
    pub fn new(host: H) -> Self {
        Self {
            shared: Arc::new(Shared {
                host,
                registry: GattRegistry::new(),
                config: OnceLock::new(),
                session: Mutex::new(Session::default()),
            }),
        }
    }

    pub fn host(&self) -> &H {
        &self.shared.host
    }

    pub fn registry(&self) -> &GattRegistry {
        &self.shared.registry
    }

    /// Settings applied by `initialize`, if it ran
    pub fn config(&self) -> Option<&PeripheralConfig> {
        self.shared.config.get()
    }

    /// Register the handler for bytes written to RX
    pub fn set_rx_callback<F>(&self, callback: F)
    where
        F: Fn(&[u8]) + Send + Sync + 'static,
    {
        self.shared.registry.set_rx_callback(callback);
    }

    /// One-time startup with default settings
    pub fn initialize(&self, device_name: &str, passkey: u32) -> Result<(), Error> {
        self.initialize_with(PeripheralConfig::new(device_name, passkey)?)
    }

    /// One-time startup: security policy, GATT service, device name, MTU,
    /// then hand control to the host
    pub fn initialize_with(&self, config: PeripheralConfig) -> Result<(), Error> {
        config.validate()?;
        self.shared
            .config
            .set(config)
            .map_err(|_| Error::AlreadyInitialized)?;
        let config = self.config().ok_or(Error::AlreadyInitialized)?;
        let host = &self.shared.host;

        host.configure_security(&config.pairing).map_err(Error::Host)?;
        self.shared.registry.register_service(host)?;

        if let Err(e) = host.set_device_name(&config.device_name) {
            error!("Error set device name; {}", e);
        }

        self.set_mtu(config.preferred_mtu);

        host.start().map_err(Error::Host)?;
        info!("BLE initialized as '{}'", config.device_name);
        Ok(())
    }

    /// Set the preferred local MTU; the host falls back to its default on failure
    pub fn set_mtu(&self, mtu: u16) {
        match self.shared.host.set_preferred_mtu(mtu) {
            Ok(()) => debug!("Preferred MTU {}", mtu),
            Err(e) => error!("Error set local mtu {}; {}", mtu, e),
        }
    }

    /// Host and controller are synced: resolve our address and advertise
    pub fn on_sync(&self) {
        let host = &self.shared.host;

        if let Err(e) = host.ensure_address() {
            error!("{}", Error::AddressResolution(e));
            return;
        }

        let own_addr_type = match host.infer_address_type() {
            Ok(addr_type) => addr_type,
            Err(e) => {
                error!("{}", Error::AddressResolution(e));
                return;
            }
        };
        self.session().own_addr_type = Some(own_addr_type);

        if self.shared.registry.tx_attribute_handle().is_none() {
            self.shared.registry.resolve_tx_handle(host);
        }

        self.rearm();
        info!("on_sync() own address type {:?}", own_addr_type);
    }

    /// The host reset itself and dropped every link
    pub fn on_reset(&self, reason: i32) {
        info!("on_reset() reason {}", reason);
        let mut session = self.session();
        session.connection = None;
        session.advertising = false;
    }

    /// (Re)start advertising with a freshly built payload
    ///
    /// Safe to call repeatedly, including right after a failed attempt.
    pub fn advertise(&self) -> Result<(), AdvertisingError> {
        let own_addr_type = self
            .session()
            .own_addr_type
            .ok_or(AdvertisingError::NotSynced)?;

        let fields = AdvFields::uart(self.device_name());
        let len = fields.encoded_len();
        if len > adv::MAX_PAYLOAD_LEN {
            return Err(AdvertisingError::PayloadTooLarge { len, max: adv::MAX_PAYLOAD_LEN });
        }

        let host = &self.shared.host;
        host.set_adv_fields(&fields).map_err(AdvertisingError::SetFields)?;
        match host.start_advertising(own_addr_type, &AdvParams::default()) {
            Ok(()) => {}
            Err(e) if e.is_already() => debug!("Advertising already active"),
            Err(e) => return Err(AdvertisingError::Start(e)),
        }

        self.session().advertising = true;
        debug!("Advertising as '{}'", self.device_name());
        Ok(())
    }

    /// Send `data` as a notification on TX to the connected central
    pub fn notify(&self, data: &[u8]) -> Result<(), NotifyError> {
        let conn_handle = self
            .session()
            .connection
            .map(|c| c.conn_handle)
            .ok_or(NotifyError::NotConnected)?;
        let attr_handle = self
            .shared
            .registry
            .tx_attribute_handle()
            .ok_or(NotifyError::ServiceNotRegistered)?;

        self.shared
            .host
            .notify(conn_handle, attr_handle, data)
            .map_err(NotifyError::Host)?;
        debug!("Notify success ({} bytes)", data.len());
        Ok(())
    }

    /// Attribute access from the host, routed to the registry
    pub fn handle_access(&self, event: &AccessEvent<'_>) -> Result<(), AttError> {
        self.shared.registry.on_attribute_access(event)
    }

    /// React to a GAP event
    pub fn handle_gap_event(&self, event: &GapEvent) {
        match *event {
            GapEvent::Connect { status, conn_handle } => self.on_connect(status, conn_handle),

            GapEvent::Disconnect { reason, conn_handle } => {
                info!("Disconnected, handle {} reason {}", conn_handle, reason);
                {
                    let mut session = self.session();
                    if session.connection_mut(conn_handle).is_some() {
                        session.connection = None;
                    } else if let Some(live) = session.connection {
                        warn!("Stale disconnect for {}, keeping {}", conn_handle, live.conn_handle);
                    }
                    session.advertising = false;
                }
                self.rearm();
            }

            GapEvent::ConnUpdate { status, conn_handle } => {
                info!("Connection updated, status = {}", status);
                self.check_connection(conn_handle);
            }

            GapEvent::AdvComplete { reason } => {
                info!("Advertise complete, reason {}", reason);
                self.session().advertising = false;
                self.rearm();
            }

            GapEvent::EncChange { status, conn_handle } => {
                info!("Encryption change event, status = {}", status);
                let desc = self.check_connection(conn_handle);
                if let Some(conn) = self.session().connection_mut(conn_handle) {
                    conn.pairing = false;
                    conn.encrypted = status == 0 && desc.is_none_or(|d| d.encrypted);
                    if let Some(desc) = desc.filter(|_| status == 0) {
                        conn.authenticated = desc.authenticated;
                        conn.bonded = desc.bonded;
                    }
                }
            }

            GapEvent::Subscribe { conn_handle, attr_handle, cur_notify, .. } => {
                info!("Subscribe event, attr {} notify = {}", attr_handle, cur_notify);
                if self.shared.registry.tx_attribute_handle() == Some(attr_handle) {
                    if let Some(conn) = self.session().connection_mut(conn_handle) {
                        conn.subscribed = cur_notify;
                    }
                }
            }

            GapEvent::Mtu { conn_handle, value, .. } => {
                info!("MTU update event, mtu {}", value);
                if let Some(conn) = self.session().connection_mut(conn_handle) {
                    conn.mtu = value;
                }
            }

            GapEvent::PasskeyAction { conn_handle, action } => {
                self.on_passkey_action(conn_handle, action)
            }

            GapEvent::Other { event_type } => debug!("Unhandled GAP event {}", event_type),
        }
    }

    pub fn state(&self) -> PeripheralState {
        self.session().state()
    }

    pub fn connection(&self) -> Option<ConnectionInfo> {
        self.session().connection
    }

    pub fn is_advertising(&self) -> bool {
        self.session().advertising
    }

    pub fn own_addr_type(&self) -> Option<OwnAddrType> {
        self.session().own_addr_type
    }

    fn on_connect(&self, status: i32, conn_handle: ConnHandle) {
        info!(
            "Connection {}, status = {}",
            if status == 0 { "established" } else { "failed" },
            status
        );

        if status != 0 {
            // a live link, if any, is untouched
            self.session().advertising = false;
            self.rearm();
            return;
        }

        // The host reported the link, so record it even if the lookup fails
        self.check_connection(conn_handle);
        let mut session = self.session();
        session.advertising = false;
        session.connection = Some(ConnectionInfo::new(conn_handle));
    }

    fn on_passkey_action(&self, conn_handle: ConnHandle, action: PasskeyAction) {
        info!("Passkey event {:?}", action);
        if let Some(conn) = self.session().connection_mut(conn_handle) {
            conn.pairing = true;
        }

        match action {
            PasskeyAction::Display => {
                let passkey = self.pairing().passkey;
                info!("Enter passkey {} on the peer side", passkey);
                match self.shared.host.inject_passkey(conn_handle, action, passkey.value()) {
                    Ok(()) => debug!("Passkey injected"),
                    Err(e) => error!("Passkey injection failed; {}", e),
                }
            }
            other => warn!("Passkey action {:?} not handled", other), // TODO: numeric comparison
        }
    }

    /// Check that the host still knows `conn_handle`
    fn check_connection(&self, conn_handle: ConnHandle) -> Option<ConnDesc> {
        match self.shared.host.find_connection(conn_handle) {
            Ok(desc) => Some(desc),
            Err(e) => {
                error!("Connection {} not known to host; {}", conn_handle, e);
                None
            }
        }
    }

    /// Re-enter advertising after a link dropped or an attempt ended
    fn rearm(&self) {
        if let Err(e) = self.advertise() {
            error!("Failed to resume advertising: {}", e);
        }
    }

    fn device_name(&self) -> &str {
        self.config()
            .map(|c| c.device_name.as_str())
            .unwrap_or(DEFAULT_DEVICE_NAME)
    }

    fn pairing(&self) -> PairingPolicy {
        self.config().map(|c| c.pairing).unwrap_or_default()
    }

    fn session(&self) -> MutexGuard<'_, Session> {
        self.shared.session.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
