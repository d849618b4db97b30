//! GATT Service Registry for the UART service
//!
//! One primary service with two characteristics:
//! - RX: the central writes here, bytes go to the registered callback
//! - TX: read/notify, the controller sends notifications on its value handle
//!
//! Both require an encrypted, authenticated link.

use crate::error::{AttError, Error};
use crate::event::{AccessEvent, AccessOp};
use crate::host::{AttrHandle, BleHost};
use log::*;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use uuid::Uuid;

/// UART Service UUID: 59462f12-9543-9999-12c8-58b459a2712d
pub const UART_SERVICE_UUID: Uuid = Uuid::from_u128(0x59462f12_9543_9999_12c8_58b459a2712d);

/// RX Characteristic UUID (write)
pub const RX_CHARACTERISTIC_UUID: Uuid = Uuid::from_u128(0x5c3a659e_897e_45e1_b016_007107c96df6);

/// TX Characteristic UUID (read/notify)
pub const TX_CHARACTERISTIC_UUID: Uuid = Uuid::from_u128(0x5c3a659e_897e_45e1_b016_007107c96df7);

/// 16-bit alias advertised in place of the 128-bit service UUID
pub const UART_SERVICE_UUID16: u16 = 0xfb1e;

/// Largest attribute value the ATT layer allows
pub const MAX_ATTR_LEN: usize = 512;

/// Characteristic property and permission flags (NimBLE bit layout)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CharFlags(u16);

impl CharFlags {
    pub const READ: CharFlags = CharFlags(0x0002);
    pub const WRITE_NO_RSP: CharFlags = CharFlags(0x0004);
    pub const WRITE: CharFlags = CharFlags(0x0008);
    pub const NOTIFY: CharFlags = CharFlags(0x0010);
    pub const INDICATE: CharFlags = CharFlags(0x0020);
    pub const READ_ENC: CharFlags = CharFlags(0x0200);
    pub const READ_AUTHEN: CharFlags = CharFlags(0x0400);
    pub const WRITE_ENC: CharFlags = CharFlags(0x1000);
    pub const WRITE_AUTHEN: CharFlags = CharFlags(0x2000);

    pub const fn bits(&self) -> u16 {
        self.0
    }

    pub const fn union(self, other: CharFlags) -> CharFlags {
        CharFlags(self.0 | other.0)
    }

    pub const fn contains(&self, other: CharFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for CharFlags {
    type Output = CharFlags;

    fn bitor(self, rhs: CharFlags) -> CharFlags {
        self.union(rhs)
    }
}

pub const RX_CHARACTERISTIC_FLAGS: CharFlags =
    CharFlags::WRITE.union(CharFlags::WRITE_ENC).union(CharFlags::WRITE_AUTHEN);

pub const TX_CHARACTERISTIC_FLAGS: CharFlags = CharFlags::READ
    .union(CharFlags::READ_ENC)
    .union(CharFlags::READ_AUTHEN)
    .union(CharFlags::NOTIFY);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicDef {
    pub uuid: Uuid,
    pub flags: CharFlags,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDef {
    pub uuid: Uuid,
    pub primary: bool,
    pub characteristics: Vec<CharacteristicDef>,
}

/// The fixed UART service table
pub fn uart_service() -> ServiceDef {
    ServiceDef {
        uuid: UART_SERVICE_UUID,
        primary: true,
        characteristics: vec![
            CharacteristicDef {
                uuid: RX_CHARACTERISTIC_UUID,
                flags: RX_CHARACTERISTIC_FLAGS,
            },
            CharacteristicDef {
                uuid: TX_CHARACTERISTIC_UUID,
                flags: TX_CHARACTERISTIC_FLAGS,
            },
        ],
    }
}

/// Handler for bytes written to the RX characteristic
pub type RxCallback = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// Owns the service table, the RX callback and the resolved TX handle
pub struct GattRegistry {
    services: Vec<ServiceDef>,
    rx_callback: Mutex<Option<RxCallback>>,
    tx_handle: OnceLock<AttrHandle>,
}

impl Default for GattRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl GattRegistry {
    pub fn new() -> Self {
        Self {
            services: vec![uart_service()],
            rx_callback: Mutex::new(None),
            tx_handle: OnceLock::new(),
        }
    }

    /// Validate the service table with the host, then install it
    ///
    /// A rejected table is fatal to startup.
    pub fn register_service<H: BleHost + ?Sized>(&self, host: &H) -> Result<(), Error> {
        host.count_services(&self.services).map_err(Error::Configuration)?;
        host.add_services(&self.services).map_err(Error::Configuration)?;
        info!("UART service registered ({})", UART_SERVICE_UUID);

        // NimBLE only assigns handles once the GATT server starts; the
        // controller retries on sync.
        self.resolve_tx_handle(host);
        Ok(())
    }

    /// Resolve and cache the TX value handle; later calls return the cached one
    pub fn resolve_tx_handle<H: BleHost + ?Sized>(&self, host: &H) -> Option<AttrHandle> {
        if let Some(handle) = self.tx_handle.get() {
            return Some(*handle);
        }
        match host.find_characteristic(&UART_SERVICE_UUID, &TX_CHARACTERISTIC_UUID) {
            Ok(handle) => {
                let handle = *self.tx_handle.get_or_init(|| handle);
                info!("TX characteristic value handle {}", handle);
                Some(handle)
            }
            Err(e) => {
                debug!("TX handle not assigned yet; {}", e);
                None
            }
        }
    }

    /// Resolved TX value handle, `None` until registration completed
    pub fn tx_attribute_handle(&self) -> Option<AttrHandle> {
        self.tx_handle.get().copied()
    }

    /// Replace the RX callback; the last registration wins
    pub fn set_rx_callback<F>(&self, callback: F)
    where
        F: Fn(&[u8]) + Send + Sync + 'static,
    {
        *self.callback_slot() = Some(Arc::new(callback));
    }

    pub fn clear_rx_callback(&self) {
        *self.callback_slot() = None;
    }

    /// Dispatch a read or write on one of our attributes
    pub fn on_attribute_access(&self, event: &AccessEvent<'_>) -> Result<(), AttError> {
        if event.uuid == RX_CHARACTERISTIC_UUID {
            if let AccessOp::WriteChr(data) = event.op {
                return self.deliver_rx(data);
            }
            return Ok(());
        }

        if event.uuid == TX_CHARACTERISTIC_UUID {
            debug!("Tx event {:?}", event.op);
        }

        Ok(())
    }

    fn deliver_rx(&self, data: &[u8]) -> Result<(), AttError> {
        if data.len() > MAX_ATTR_LEN {
            warn!("RX write of {} bytes exceeds {}", data.len(), MAX_ATTR_LEN);
            return Err(AttError::InvalidAttributeValueLength);
        }

        // Clone out so the callback may re-register or notify without deadlock
        let callback = self.callback_slot().clone();
        match callback {
            Some(callback) => callback(data),
            None => debug!("RX write of {} bytes dropped, no callback", data.len()),
        }
        Ok(())
    }

    fn callback_slot(&self) -> MutexGuard<'_, Option<RxCallback>> {
        self.rx_callback.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
