// src/hw  (rppal-backed peripherals, compiled with the "hardware" feature)

pub mod ads1115;
pub mod spi_led;

pub use ads1115::Ads1115;
pub use spi_led::SpiLed;
