/*
 *  ws2812.rs
 *
 *  NoisLED - sound level monitor
 *  (c) 2024-26 Jay Liao
 *
 *  Bit-level WS2812 waveform encoding. Each color bit becomes a 3-bit
 *  symbol (110 for 1, 100 for 0) so a plain SPI shift register at 2.4 MHz
 *  reproduces the strip's high-phase/tail timing.
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

use std::sync::{Arc, Mutex};

use thiserror::Error;

/// Number of segments on the bar. The strip protocol itself handles any
/// length, but every frame here is exactly this many triplets.
pub const LED_COUNT: usize = 8;

/// 3-bit line symbol for a logical 1.
pub const SYMBOL_ONE: u8 = 0b110;
/// 3-bit line symbol for a logical 0.
pub const SYMBOL_ZERO: u8 = 0b100;

/// 24 color bits * 3 line bits = 72 bits = 9 transport bytes per LED.
pub const WAVEFORM_BYTES_PER_LED: usize = 9;

#[derive(Debug, Error)]
pub enum TransmitError {
    /// Bus error writing to the transmit peripheral.
    #[error("LED bus write failed: {0}")]
    Bus(String),
    /// Raw payload length is not a whole number of RGB triplets.
    #[error("LED payload length {0} is not a multiple of 3")]
    InvalidLength(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const OFF: Rgb = Rgb { r: 0x00, g: 0x00, b: 0x00 };
    pub const RED: Rgb = Rgb { r: 0xFF, g: 0x00, b: 0x00 };
    pub const GREEN: Rgb = Rgb { r: 0x00, g: 0xFF, b: 0x00 };
    pub const BLUE: Rgb = Rgb { r: 0x00, g: 0x00, b: 0xFF };
    pub const WHITE: Rgb = Rgb { r: 0xFF, g: 0xFF, b: 0xFF };
}

/// One complete set of per-segment colors, rebuilt every mapping cycle and
/// handed to the encoder for a single transmission.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LedFrame {
    segments: [Rgb; LED_COUNT],
}

impl LedFrame {
    /// All segments dark.
    pub fn dark() -> Self {
        Self::default()
    }

    pub fn set(&mut self, index: usize, color: Rgb) {
        if index < LED_COUNT {
            self.segments[index] = color;
        }
    }

    pub fn get(&self, index: usize) -> Option<Rgb> {
        self.segments.get(index).copied()
    }

    pub fn segments(&self) -> &[Rgb; LED_COUNT] {
        &self.segments
    }

    /// Flat R,G,B byte sequence in segment order (input order, not wire
    /// order - the encoder reorders to G,R,B).
    pub fn to_rgb_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(LED_COUNT * 3);
        for seg in &self.segments {
            out.push(seg.r);
            out.push(seg.g);
            out.push(seg.b);
        }
        out
    }
}

/// Expand one color byte MSB-first into 8 line symbols.
pub fn encode_byte(byte: u8, out: &mut Vec<u8>) {
    for i in (0..8).rev() {
        if byte & (1 << i) != 0 {
            out.push(SYMBOL_ONE);
        } else {
            out.push(SYMBOL_ZERO);
        }
    }
}

/// Pack 3-bit symbols MSB-first into whole bytes; a partial final byte is
/// zero-padded.
pub fn pack_symbols(symbols: &[u8]) -> Vec<u8> {
    let mut out = vec![0u8; (symbols.len() * 3).div_ceil(8)];
    let mut bit_pos = 0usize;

    for &sym in symbols {
        for j in (0..3).rev() {
            if (sym >> j) & 1 != 0 {
                out[bit_pos / 8] |= 1 << (7 - (bit_pos % 8));
            }
            bit_pos += 1;
        }
    }
    out
}

/// Encode consecutive RGB triplets into the transmit waveform. Channel
/// order on the wire is G,R,B per LED.
pub fn encode_rgb_bytes(rgb: &[u8]) -> Result<Vec<u8>, TransmitError> {
    if rgb.len() % 3 != 0 {
        return Err(TransmitError::InvalidLength(rgb.len()));
    }

    let leds = rgb.len() / 3;
    let mut symbols = Vec::with_capacity(leds * 24);
    for led in rgb.chunks_exact(3) {
        encode_byte(led[1], &mut symbols); // G
        encode_byte(led[0], &mut symbols); // R
        encode_byte(led[2], &mut symbols); // B
    }

    Ok(pack_symbols(&symbols))
}

/// Write side of the serial transmit peripheral. Synchronous and blocking;
/// one contiguous burst per call.
pub trait LedTransport: Send {
    fn send(&mut self, waveform: &[u8]) -> Result<(), TransmitError>;
}

/// Encoder plus its transport. Failures are surfaced to the caller and not
/// retried here; frames are rebuilt every cycle anyway.
pub struct Ws2812Encoder<T: LedTransport> {
    transport: T,
}

impl<T: LedTransport> Ws2812Encoder<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    pub fn encode_and_send(&mut self, frame: &LedFrame) -> Result<(), TransmitError> {
        self.send_rgb(&frame.to_rgb_bytes())
    }

    /// Raw entry point mirroring the actuator endpoint contract: the byte
    /// sequence must be a whole number of RGB triplets.
    pub fn send_rgb(&mut self, rgb: &[u8]) -> Result<(), TransmitError> {
        let waveform = encode_rgb_bytes(rgb)?;
        self.transport.send(&waveform)
    }
}

/// Shared inspection state for [`MockTransport`].
#[derive(Debug, Default)]
pub struct MockTransportState {
    /// Every waveform burst sent, in order.
    pub sent: Vec<Vec<u8>>,
    /// Simulate a bus failure on the next send.
    pub simulate_failure: bool,
}

/// Transport stand-in for tests and development without the strip attached.
/// Records each burst and can inject failures.
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockTransportState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> Arc<Mutex<MockTransportState>> {
        Arc::clone(&self.state)
    }

    pub fn sent_count(&self) -> usize {
        self.state.lock().unwrap().sent.len()
    }

    pub fn last_sent(&self) -> Option<Vec<u8>> {
        self.state.lock().unwrap().sent.last().cloned()
    }
}

impl LedTransport for MockTransport {
    fn send(&mut self, waveform: &[u8]) -> Result<(), TransmitError> {
        let mut state = self.state.lock().unwrap();
        if state.simulate_failure {
            state.simulate_failure = false;
            return Err(TransmitError::Bus("simulated bus failure".to_string()));
        }
        state.sent.push(waveform.to_vec());
        Ok(())
    }
}
