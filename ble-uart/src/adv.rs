//! Advertising payload
//!
//! The payload is rebuilt on every `advertise()` call. Its contents never
//! change after init, so rebuilding is idempotent.

use crate::gatt::UART_SERVICE_UUID16;

/// LE General Discoverable Mode
pub const FLAG_LE_GENERAL_DISCOVERABLE: u8 = 0x02;
/// BR/EDR Not Supported
pub const FLAG_BR_EDR_NOT_SUPPORTED: u8 = 0x04;

/// Legacy advertising data limit
pub const MAX_PAYLOAD_LEN: usize = 31;

/// Longest complete name that fits next to flags, TX power and one 16-bit UUID
pub const MAX_NAME_LEN: usize = MAX_PAYLOAD_LEN - 3 - 3 - 4 - 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxPower {
    /// Let the host fill in the controller's current level
    Auto,
    Dbm(i8),
}

/// Advertising data fields handed to the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvFields {
    pub flags: u8,
    pub tx_power: Option<TxPower>,
    pub name: Option<String>,
    pub name_complete: bool,
    pub uuids16: Vec<u16>,
    pub uuids16_complete: bool,
}

impl AdvFields {
    /// Payload advertised by the UART peripheral:
    /// flags, automatic TX power, complete name, complete 16-bit UUID list
    pub fn uart(name: &str) -> Self {
        Self {
            flags: FLAG_LE_GENERAL_DISCOVERABLE | FLAG_BR_EDR_NOT_SUPPORTED,
            tx_power: Some(TxPower::Auto),
            name: Some(name.to_string()),
            name_complete: true,
            uuids16: vec![UART_SERVICE_UUID16],
            uuids16_complete: true,
        }
    }

    /// Size of the encoded AD structures
    pub fn encoded_len(&self) -> usize {
        let mut len = 0;
        if self.flags != 0 {
            len += 3;
        }
        if !self.uuids16.is_empty() {
            len += 2 + 2 * self.uuids16.len();
        }
        if let Some(name) = &self.name {
            len += 2 + name.len();
        }
        if self.tx_power.is_some() {
            len += 3;
        }
        len
    }
}
