//! Peripheral settings stored in ESP32 NVS (Non-Volatile Storage)
//!
//! An optional JSON blob overrides the built-in defaults; anything missing or
//! unreadable falls back to them.

use ble_uart::PeripheralConfig;
use esp_idf_svc::nvs::{EspNvs, EspNvsPartition, NvsDefault};
use log::*;

const NVS_NAMESPACE: &str = "ble_uart";
const KEY_CONFIG: &str = "config";

/// Load settings, defaulting on any error
pub fn load(nvs_partition: &EspNvsPartition<NvsDefault>) -> PeripheralConfig {
    match load_override(nvs_partition) {
        Ok(Some(config)) => {
            info!("Loaded settings from NVS, name '{}'", config.device_name);
            config
        }
        Ok(None) => PeripheralConfig::default(),
        Err(e) => {
            warn!("Ignoring stored settings: {:?}", e);
            PeripheralConfig::default()
        }
    }
}

fn load_override(
    nvs_partition: &EspNvsPartition<NvsDefault>,
) -> anyhow::Result<Option<PeripheralConfig>> {
    let nvs = EspNvs::new(nvs_partition.clone(), NVS_NAMESPACE, true)?;
    let mut buf = [0u8; 512];
    match nvs.get_blob(KEY_CONFIG, &mut buf)? {
        Some(data) => Ok(Some(PeripheralConfig::from_json(data)?)),
        None => Ok(None),
    }
}
