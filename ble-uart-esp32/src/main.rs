//! BLE UART echo peripheral for ESP32
//!
//! Advertises the UART service, pairs with a fixed passkey and echoes every
//! RX write back as a TX notification.

mod nimble;
mod settings;

use ble_uart::Controller;
use esp_idf_hal::delay::FreeRtos;
use esp_idf_svc::nvs::EspDefaultNvsPartition;
use log::*;
use nimble::NimbleHost;

const FIRMWARE_VERSION: &str = env!("CARGO_PKG_VERSION");
const HARDWARE_VERSION: &str = "1.0.0";

fn main() -> anyhow::Result<()> {
    esp_idf_svc::sys::link_patches();
    esp_idf_svc::log::EspLogger::initialize_default();

    // NVS also holds PHY calibration and bonds
    let nvs = EspDefaultNvsPartition::take()?;
    info!(
        "Power up! Firmware version {}, hardware version {}",
        FIRMWARE_VERSION, HARDWARE_VERSION
    );

    let config = settings::load(&nvs);

    let controller = Controller::new(NimbleHost::new()?);
    nimble::bind(controller.clone());

    let echo = controller.clone();
    controller.set_rx_callback(move |data| {
        info!("Received {} bytes", data.len());
        if let Err(e) = echo.notify(data) {
            error!("Echo failed: {}", e);
        }
    });

    controller.initialize_with(config)?;

    loop {
        info!("Free heap {}", unsafe {
            esp_idf_svc::sys::esp_get_minimum_free_heap_size()
        });
        FreeRtos::delay_ms(5000);
    }
}
