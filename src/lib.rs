/*
 *  lib.rs
 *
 *  NoisLED - sound level monitor
 *  (c) 2024-26 Jay Liao
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

pub mod alert;
pub mod config;
pub mod level;
pub mod sampler;
pub mod server;
pub mod state;
pub mod store;
pub mod window;
pub mod ws2812;

#[cfg(feature = "hardware")]
pub mod hw;
