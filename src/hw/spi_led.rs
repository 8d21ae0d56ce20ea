// src/hw/spi_led.rs  (WS2812 strip behind a plain SPI shift register)

use log::info;
use rppal::spi::{Bus, Mode, SlaveSelect, Spi};

use crate::ws2812::{LedTransport, TransmitError};

pub struct SpiLed {
    spi: Spi,
}

impl SpiLed {
    /// Mode 0, chip-select 0. The clock must be 3x the strip's bit rate
    /// (2.4 MHz for the standard 800 kHz parts) so each color bit spans
    /// one 3-bit line symbol.
    pub fn open(bus: u8, clock_hz: u32) -> Result<Self, TransmitError> {
        let bus = match bus {
            0 => Bus::Spi0,
            1 => Bus::Spi1,
            2 => Bus::Spi2,
            other => return Err(TransmitError::Bus(format!("no such SPI bus: {other}"))),
        };
        let spi = Spi::new(bus, SlaveSelect::Ss0, clock_hz, Mode::Mode0)
            .map_err(|e| TransmitError::Bus(e.to_string()))?;
        info!("LED strip opened on {bus:?} at {clock_hz} Hz");
        Ok(Self { spi })
    }
}

impl LedTransport for SpiLed {
    fn send(&mut self, waveform: &[u8]) -> Result<(), TransmitError> {
        self.spi
            .write(waveform)
            .map_err(|e| TransmitError::Bus(e.to_string()))?;
        Ok(())
    }
}
