//! Real-time state record carried by RT-packets.
//!
//! The record is a packed little-endian layout with no padding:
//!
//! | offset | size | field                                   |
//! |-------:|-----:|-----------------------------------------|
//! |      0 |    1 | engine type                             |
//! |      1 |    1 | reserved                                |
//! |      2 |    2 | buffer size                             |
//! |      4 |    4 | engine version                          |
//! |      8 |    4 | option bits                             |
//! |     12 |    4 | sample rate                             |
//! |     16 |   68 | input peak levels, 34 x i16 (dB x 100)  |
//! |     84 |  128 | output peak levels, 64 x i16            |
//! |    212 |    4 | transport bits                          |
//! |    216 |   32 | strip state, 8 x u32                    |
//! |    248 |   32 | bus state, 8 x u32                      |
//! |    280 |   16 | strip gain layer 1, 8 x i16             |
//! |    296 |  112 | strip gain layers 2-8 (unused)          |
//! |    408 |   16 | bus gain, 8 x i16                       |
//! |    424 |  480 | strip labels, 8 x 60 bytes              |
//! |    904 |  480 | bus labels, 8 x 60 bytes                |

use bytes::{Buf, BufMut};

use crate::codec;
use crate::error::{VbanError, VbanResult};

/// Number of input level meters.
pub const INPUT_LEVELS: usize = 34;
/// Number of output level meters.
pub const OUTPUT_LEVELS: usize = 64;
/// Number of strips and of buses.
pub const CHANNELS: usize = 8;
/// Strip gain layers present on the wire; only the first is decoded.
pub const GAIN_LAYERS: usize = 8;
/// Size of one label slot.
pub const LABEL_LEN: usize = 60;

const RESERVED_GAIN_BYTES: usize = (GAIN_LAYERS - 1) * CHANNELS * 2;

/// Encoded size of a [`TelemetryState`].
pub const TELEMETRY_LEN: usize = 16
    + INPUT_LEVELS * 2
    + OUTPUT_LEVELS * 2
    + 4
    + CHANNELS * 4 * 2
    + GAIN_LAYERS * CHANNELS * 2
    + CHANNELS * 2
    + CHANNELS * LABEL_LEN * 2;

/// Decoded real-time engine state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryState {
    pub engine_type: u8,
    pub reserved: u8,
    pub buffer_size: u16,
    pub version: u32,
    pub option_bits: u32,
    pub sample_rate: u32,
    /// Pre-fader input peaks in 1/100 dB
    pub input_levels: [i16; INPUT_LEVELS],
    /// Bus output peaks in 1/100 dB
    pub output_levels: [i16; OUTPUT_LEVELS],
    pub transport_bits: u32,
    /// Mute/solo/etc. bitmask per strip
    pub strip_state: [u32; CHANNELS],
    /// Mute/etc. bitmask per bus
    pub bus_state: [u32; CHANNELS],
    /// First-layer strip gains in 1/100 dB
    pub strip_gains: [i16; CHANNELS],
    /// Bus gains in 1/100 dB
    pub bus_gains: [i16; CHANNELS],
    pub strip_labels: [[u8; LABEL_LEN]; CHANNELS],
    pub bus_labels: [[u8; LABEL_LEN]; CHANNELS],
}

impl Default for TelemetryState {
    fn default() -> Self {
        Self {
            engine_type: 0,
            reserved: 0,
            buffer_size: 0,
            version: 0,
            option_bits: 0,
            sample_rate: 0,
            input_levels: [0; INPUT_LEVELS],
            output_levels: [0; OUTPUT_LEVELS],
            transport_bits: 0,
            strip_state: [0; CHANNELS],
            bus_state: [0; CHANNELS],
            strip_gains: [0; CHANNELS],
            bus_gains: [0; CHANNELS],
            strip_labels: [[0; LABEL_LEN]; CHANNELS],
            bus_labels: [[0; LABEL_LEN]; CHANNELS],
        }
    }
}

impl TelemetryState {
    /// Decode a state record from an RT-packet payload.
    ///
    /// Bytes beyond [`TELEMETRY_LEN`] are ignored.
    ///
    /// # Errors
    /// Returns [`VbanError::MalformedPacket`] if the payload is too short.
    pub fn decode(payload: &[u8]) -> VbanResult<Self> {
        if payload.len() < TELEMETRY_LEN {
            return Err(VbanError::MalformedPacket(format!(
                "RT-packet payload is {} bytes, expected at least {TELEMETRY_LEN}",
                payload.len()
            )));
        }

        let mut buf = &payload[..TELEMETRY_LEN];
        let mut state = Self {
            engine_type: buf.get_u8(),
            reserved: buf.get_u8(),
            buffer_size: buf.get_u16_le(),
            version: buf.get_u32_le(),
            option_bits: buf.get_u32_le(),
            sample_rate: buf.get_u32_le(),
            ..Self::default()
        };

        for level in &mut state.input_levels {
            *level = buf.get_i16_le();
        }
        for level in &mut state.output_levels {
            *level = buf.get_i16_le();
        }
        state.transport_bits = buf.get_u32_le();
        for bits in &mut state.strip_state {
            *bits = buf.get_u32_le();
        }
        for bits in &mut state.bus_state {
            *bits = buf.get_u32_le();
        }
        for gain in &mut state.strip_gains {
            *gain = buf.get_i16_le();
        }
        buf.advance(RESERVED_GAIN_BYTES);
        for gain in &mut state.bus_gains {
            *gain = buf.get_i16_le();
        }
        for label in &mut state.strip_labels {
            buf.copy_to_slice(label);
        }
        for label in &mut state.bus_labels {
            buf.copy_to_slice(label);
        }

        debug_assert!(!buf.has_remaining());
        Ok(state)
    }

    /// Encode the record in wire layout. Unused gain layers are zero.
    pub fn encode<B: BufMut>(&self, out: &mut B) {
        out.put_u8(self.engine_type);
        out.put_u8(self.reserved);
        out.put_u16_le(self.buffer_size);
        out.put_u32_le(self.version);
        out.put_u32_le(self.option_bits);
        out.put_u32_le(self.sample_rate);
        self.input_levels.iter().for_each(|v| out.put_i16_le(*v));
        self.output_levels.iter().for_each(|v| out.put_i16_le(*v));
        out.put_u32_le(self.transport_bits);
        self.strip_state.iter().for_each(|v| out.put_u32_le(*v));
        self.bus_state.iter().for_each(|v| out.put_u32_le(*v));
        self.strip_gains.iter().for_each(|v| out.put_i16_le(*v));
        out.put_bytes(0, RESERVED_GAIN_BYTES);
        self.bus_gains.iter().for_each(|v| out.put_i16_le(*v));
        self.strip_labels.iter().for_each(|l| out.put_slice(l));
        self.bus_labels.iter().for_each(|l| out.put_slice(l));
    }

    /// Strip label `index` with trailing NULs removed.
    #[must_use]
    pub fn strip_label(&self, index: usize) -> Option<String> {
        self.strip_labels.get(index).map(|slot| codec::trim_nul(slot))
    }

    /// Bus label `index` with trailing NULs removed.
    #[must_use]
    pub fn bus_label(&self, index: usize) -> Option<String> {
        self.bus_labels.get(index).map(|slot| codec::trim_nul(slot))
    }

    /// Input peak level in dB.
    #[must_use]
    pub fn input_level_db(&self, index: usize) -> Option<f32> {
        self.input_levels.get(index).map(|v| centi_db(*v))
    }

    /// Output peak level in dB.
    #[must_use]
    pub fn output_level_db(&self, index: usize) -> Option<f32> {
        self.output_levels.get(index).map(|v| centi_db(*v))
    }

    /// First-layer strip gain in dB.
    #[must_use]
    pub fn strip_gain_db(&self, index: usize) -> Option<f32> {
        self.strip_gains.get(index).map(|v| centi_db(*v))
    }

    /// Bus gain in dB.
    #[must_use]
    pub fn bus_gain_db(&self, index: usize) -> Option<f32> {
        self.bus_gains.get(index).map(|v| centi_db(*v))
    }

    /// Engine version as `(major, minor, patch, build)`.
    #[must_use]
    pub fn version_parts(&self) -> (u8, u8, u8, u8) {
        let [a, b, c, d] = self.version.to_be_bytes();
        (a, b, c, d)
    }
}

fn centi_db(value: i16) -> f32 {
    f32::from(value) / 100.0
}

/// Write `text` into a NUL-padded label slot, truncating at 60 bytes.
#[must_use]
pub fn label_slot(text: &str) -> [u8; LABEL_LEN] {
    let mut slot = [0u8; LABEL_LEN];
    let len = text.len().min(LABEL_LEN);
    slot[..len].copy_from_slice(&text.as_bytes()[..len]);
    slot
}
