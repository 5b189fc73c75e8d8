//! Sample conversion for the MCP4921 DAC
//!
//! The DAC consumes 16-bit words: a 4-bit control nibble (channel select,
//! buffering, gain, output enable) followed by 12 data bits. This module
//! converts 8-bit PCM samples or raw 12-bit ADC readings into those words.
//! The receive side needs no inverse: incoming chunks are DAC words
//! already and go to the bus unchanged.

use bytes::{BufMut, Bytes, BytesMut};

use crate::constants::DAC_DATA_MAX;

/// The 4 control bits prepended to every DAC word.
///
/// Bit layout matches the MCP4921 command register (top nibble of the
/// 16-bit word): channel select, buffered reference, gain and shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DacControl(u8);

impl DacControl {
    /// Write to DAC channel A (the MCP4921's only channel)
    pub const CHANNEL_A: u8 = 0b0000;
    /// Buffered reference input
    pub const BUFFERED: u8 = 0b0100;
    /// Unity gain output
    pub const GAIN_1X: u8 = 0b0010;
    /// Output amplifier enabled
    pub const OUTPUT_ON: u8 = 0b0001;

    /// Build a control nibble from raw bits; anything above the low
    /// nibble is masked off.
    pub const fn from_bits(bits: u8) -> Self {
        Self(bits & 0x0F)
    }

    /// The raw nibble value
    pub const fn bits(self) -> u8 {
        self.0
    }
}

impl Default for DacControl {
    /// Session default: channel A, unbuffered, 1x gain, output enabled.
    /// The control nibble is constant for a whole session.
    fn default() -> Self {
        Self::from_bits(Self::CHANNEL_A | Self::GAIN_1X | Self::OUTPUT_ON)
    }
}

/// Rescale an 8-bit PCM sample to the DAC's 12-bit range.
///
/// Linear: `round(sample / 255 * 4095)`. The exact scaling matters for
/// bit-exact output; a `<< 4` approximation maps 255 to 4080, not 4095.
pub fn quantize_8_to_12(sample: u8) -> u16 {
    (sample as f64 / 255.0 * DAC_DATA_MAX as f64).round() as u16
}

/// Pack one 12-bit data value behind the control nibble.
///
/// High byte carries the control nibble and the top four data bits, low
/// byte the remaining eight. This is the byte order the DAC clocks in.
pub fn pack_word(control: DacControl, data: u16) -> [u8; 2] {
    let hi = (control.bits() << 4) | ((data >> 8) as u8 & 0x0F);
    let lo = (data & 0xFF) as u8;
    [hi, lo]
}

/// Split a packed word back into its control nibble and data bits.
/// The streaming paths never need this; it exists for diagnostics.
pub fn unpack_word(word: [u8; 2]) -> (u8, u16) {
    let control = (word[0] >> 4) & 0x0F;
    let data = (((word[0] & 0x0F) as u16) << 8) | word[1] as u16;
    (control, data)
}

/// Convert a buffer of 8-bit PCM samples into packed DAC words.
///
/// Output is exactly `2 * samples.len()` bytes; an empty input yields an
/// empty buffer. Used for whole-file conversion before playback or
/// file streaming.
pub fn pack_buffer_u8(samples: &[u8], control: DacControl) -> Bytes {
    let mut out = BytesMut::with_capacity(samples.len() * 2);
    for &sample in samples {
        out.put_slice(&pack_word(control, quantize_8_to_12(sample)));
    }
    out.freeze()
}

/// Pack raw 12-bit ADC readings into DAC words without rescaling.
///
/// Values above 4095 are a caller contract violation and are not checked
/// here; the excess bits would bleed into the control nibble.
pub fn pack_buffer_u12(samples: &[u16], control: DacControl) -> Bytes {
    let mut out = BytesMut::with_capacity(samples.len() * 2);
    for &sample in samples {
        out.put_slice(&pack_word(control, sample));
    }
    out.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn quantize_endpoints() {
        assert_eq!(quantize_8_to_12(0), 0);
        assert_eq!(quantize_8_to_12(255), 4095);
        // 128 / 255 * 4095 = 2055.53
        assert_eq!(quantize_8_to_12(128), 2056);
    }

    #[test]
    fn quantize_is_monotonic() {
        let mut prev = 0;
        for s in 0..=255u8 {
            let q = quantize_8_to_12(s);
            assert!(q >= prev);
            prev = q;
        }
    }

    #[test]
    fn pack_word_layout() {
        // control 0b1111, data 0x0AB:
        // hi = 0xF0 | (0x0AB >> 8) = 0xF0, lo = 0xAB
        let word = pack_word(DacControl::from_bits(0b1111), 0x0AB);
        assert_eq!(word, [0xF0, 0xAB]);

        let word = pack_word(DacControl::default(), 0xFFF);
        assert_eq!(word, [0x3F, 0xFF]);
    }

    #[test]
    fn default_control_nibble() {
        assert_eq!(DacControl::default().bits(), 0b0011);
    }

    #[test]
    fn empty_buffers_are_noops() {
        assert!(pack_buffer_u8(&[], DacControl::default()).is_empty());
        assert!(pack_buffer_u12(&[], DacControl::default()).is_empty());
    }

    #[test]
    fn buffer_length_doubles() {
        let packed = pack_buffer_u8(&[0, 64, 128, 255], DacControl::default());
        assert_eq!(packed.len(), 8);

        let packed = pack_buffer_u12(&[0, 2048, 4095], DacControl::default());
        assert_eq!(packed.len(), 6);
    }

    proptest! {
        #[test]
        fn quantize_matches_reference(sample: u8) {
            let expected = (sample as f64 / 255.0 * 4095.0).round() as u16;
            let q = quantize_8_to_12(sample);
            prop_assert_eq!(q, expected);
            prop_assert!(q <= 4095);
        }

        #[test]
        fn pack_unpack_round_trips(control in 0u8..16, data in 0u16..4096) {
            let word = pack_word(DacControl::from_bits(control), data);
            prop_assert_eq!(unpack_word(word), (control, data));
        }

        #[test]
        fn packed_buffer_preserves_order(samples in prop::collection::vec(0u16..4096, 0..512)) {
            let control = DacControl::default();
            let packed = pack_buffer_u12(&samples, control);
            prop_assert_eq!(packed.len(), samples.len() * 2);
            for (i, &sample) in samples.iter().enumerate() {
                let word = [packed[i * 2], packed[i * 2 + 1]];
                prop_assert_eq!(unpack_word(word), (control.bits(), sample));
            }
        }
    }
}
