//! BLE UART Peripheral
//!
//! Host-independent core of a serial-over-BLE peripheral: one write-only RX
//! characteristic, one notify TX characteristic, passkey pairing, and a single
//! central at a time.
//!
//! This crate provides:
//! - [`GattRegistry`]: the fixed UART service table and RX write dispatch
//! - [`Controller`]: advertising lifecycle, connection tracking and pairing
//! - [`BleHost`]: the capability set a BLE host stack must offer
//!
//! # MCU implementations
//! - ESP32 (NimBLE): see the `ble-uart-esp32` firmware crate

pub mod adv;
pub mod config;
pub mod controller;
pub mod error;
pub mod event;
pub mod gatt;
pub mod host;

#[cfg(test)]
mod mock;

pub use adv::AdvFields;
pub use config::{IoCapability, PairingPolicy, Passkey, PeripheralConfig};
pub use controller::{ConnectionInfo, Controller, PeripheralState};
pub use error::{AdvertisingError, AttError, ConfigError, Error, NotifyError};
pub use event::{AccessEvent, AccessOp, GapEvent, PasskeyAction};
pub use gatt::{GattRegistry, RxCallback};
pub use host::{AttrHandle, BleHost, ConnHandle, HostError, OwnAddrType};
