/*
 *  ads1115.rs
 *
 *  NoisLED - sound level monitor
 *  (c) 2024-26 Jay Liao
 *
 *  ADS1115 over I2C in single-shot mode: AIN0 vs ground, +-2.048 V range,
 *  128 SPS. The sampler owns the settle timing between trigger and read.
 *
 *  This program is free software: you can redistribute it and/or modify
 *  it under the terms of the GNU General Public License as published by
 *  the Free Software Foundation, either version 3 of the License, or
 *  (at your option) any later version.
 *
 *  This program is distributed in the hope that it will be useful,
 *  but WITHOUT ANY WARRANTY; without even the implied warranty of
 *  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *  GNU General Public License for more details.
 *
 *  See <http://www.gnu.org/licenses/> to get a copy of the GNU General
 *  Public License.
 *
 */

use log::info;
use rppal::i2c::I2c;

use crate::sampler::{SamplerError, SoundAdc};

const REG_CONVERSION: u8 = 0x00;
const REG_CONFIG: u8 = 0x01;

// OS=1 (start single conversion), MUX=100 (AIN0/GND), PGA=010 (+-2.048 V),
// MODE=1 (single-shot), DR=100 (128 SPS), comparator disabled.
const CONFIG_SINGLE_SHOT: u16 =
    (1 << 15) | (4 << 12) | (2 << 9) | (1 << 8) | (4 << 5) | 0x0003;

pub struct Ads1115 {
    i2c: I2c,
}

impl Ads1115 {
    pub fn open(bus: u8, address: u16) -> Result<Self, SamplerError> {
        let mut i2c =
            I2c::with_bus(bus).map_err(|e| SamplerError::Peripheral(e.to_string()))?;
        i2c.set_slave_address(address)
            .map_err(|e| SamplerError::Peripheral(e.to_string()))?;
        info!("ADS1115 opened on i2c-{bus} at 0x{address:02X}");
        Ok(Self { i2c })
    }
}

impl SoundAdc for Ads1115 {
    fn begin_conversion(&mut self) -> Result<(), SamplerError> {
        let cfg = CONFIG_SINGLE_SHOT.to_be_bytes();
        self.i2c
            .write(&[REG_CONFIG, cfg[0], cfg[1]])
            .map_err(|e| SamplerError::Peripheral(e.to_string()))?;
        Ok(())
    }

    fn read_code(&mut self) -> Result<i16, SamplerError> {
        let mut buf = [0u8; 2];
        self.i2c
            .write_read(&[REG_CONVERSION], &mut buf)
            .map_err(|e| SamplerError::Peripheral(e.to_string()))?;
        Ok(i16::from_be_bytes(buf))
    }
}
